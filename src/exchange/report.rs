// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the sim-modbus-bridge project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Per-step outcome of the exchange

use std::fmt;
use std::time::Duration;

use crate::error::EndpointError;

/// What one endpoint did during a step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EndpointReport {
    /// `host:port` of the endpoint.
    pub endpoint: String,
    /// Registers written, when the write batch fully succeeded.
    pub written: usize,
    /// Registers read back.
    pub read: usize,
    /// Output indices updated from the read-back values.
    pub outputs_updated: Vec<usize>,
    /// Configured input indices with no matching input value.
    pub skipped_inputs: Vec<usize>,
    /// Output indices beyond the output vector, dropped.
    pub skipped_outputs: Vec<usize>,
    pub errors: Vec<EndpointError>,
}

impl EndpointReport {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Self::default()
        }
    }

    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Problem preventing the exchange itself, as opposed to endpoint failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepIssue {
    /// `on_step_end` was called without a registry.
    NotInitialized,
    /// The exchange data has no entry for the configured model.
    ModelNotFound(String),
}

impl fmt::Display for StepIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepIssue::NotInitialized => write!(f, "bridge is not initialized"),
            StepIssue::ModelNotFound(model) => write!(f, "no exchange data for model '{model}'"),
        }
    }
}

/// Aggregated outcome of one `on_step_end` call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepReport {
    /// 1-based step counter since the last initialization.
    pub step: u64,
    pub endpoints: Vec<EndpointReport>,
    pub issue: Option<StepIssue>,
    /// Time spent exchanging, pacing excluded.
    pub elapsed: Duration,
}

impl StepReport {
    pub fn new(step: u64) -> Self {
        Self {
            step,
            ..Self::default()
        }
    }

    /// Number of endpoints that reported at least one error.
    pub fn failed_endpoints(&self) -> usize {
        self.endpoints.iter().filter(|e| !e.is_clean()).count()
    }

    pub fn is_clean(&self) -> bool {
        self.issue.is_none() && self.failed_endpoints() == 0
    }

    /// Every endpoint error of the step, in registry order.
    pub fn errors(&self) -> impl Iterator<Item = &EndpointError> {
        self.endpoints.iter().flat_map(|e| e.errors.iter())
    }

    pub fn endpoint(&self, label: &str) -> Option<&EndpointReport> {
        self.endpoints.iter().find(|e| e.endpoint == label)
    }
}
