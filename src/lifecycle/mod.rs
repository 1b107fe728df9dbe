// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the sim-modbus-bridge project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Simulation lifecycle callbacks
//!
//! The simulation engine calls the bridge at fixed points of a run:
//!
//! | Callback | Bridge action |
//! |----------|---------------|
//! | initialization | open the log, build and connect the endpoint registry |
//! | start of time | nothing |
//! | iteration | nothing |
//! | end of time step | exchange with every server, then pace |
//! | last call | close every connection, flush the log |
//!
//! [`Lifecycle`] holds the registry of the run; several lifecycles can live
//! in one process without sharing anything.

pub mod pacing;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, error, info, warn};
use tokio::time::Instant;

pub use pacing::Pacing;

use crate::config::Config;
use crate::error::{ConfigError, StepError};
use crate::exchange::{ExchangeAdapter, ExchangeData, StepIssue, StepReport};
use crate::logging;
use crate::modbus::{Connector, EndpointRegistry, TcpConnector};

/// Callbacks invoked by a simulation driver.
///
/// Only initialization can fail in normal operation; the end of a time step
/// fails only when the implementation runs in strict mode.
#[async_trait]
pub trait SimulationHooks: Send {
    async fn initialization(&mut self, data: &mut ExchangeData) -> Result<(), ConfigError>;

    async fn start_time(&mut self, data: &mut ExchangeData);

    async fn iteration(&mut self, data: &mut ExchangeData);

    async fn end_of_time_step(&mut self, data: &mut ExchangeData) -> Result<StepReport, StepError>;

    async fn last_call_of_simulation(&mut self, data: &mut ExchangeData);
}

/// The bridge side of one simulation run.
pub struct Lifecycle {
    config: Config,
    connector: Arc<dyn Connector>,
    adapter: ExchangeAdapter,
    registry: Option<EndpointRegistry>,
    step: u64,
    last_report: Option<StepReport>,
}

impl Lifecycle {
    pub fn new(config: Config, connector: Arc<dyn Connector>) -> Self {
        let adapter = ExchangeAdapter::from_config(&config.bridge);
        Self {
            config,
            connector,
            adapter,
            registry: None,
            step: 0,
            last_report: None,
        }
    }

    /// Lifecycle talking Modbus TCP with the configured timeouts.
    pub fn with_tcp(config: Config) -> Self {
        let connector = TcpConnector::new(
            Duration::from_millis(config.bridge.connect_timeout_ms),
            Duration::from_millis(config.bridge.request_timeout_ms),
        );
        Self::new(config, Arc::new(connector))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Registry of the current run, between initialization and finalization.
    pub fn registry(&self) -> Option<&EndpointRegistry> {
        self.registry.as_ref()
    }

    pub fn last_report(&self) -> Option<&StepReport> {
        self.last_report.as_ref()
    }

    /// Build and connect a fresh registry.
    ///
    /// A registry left by a previous run is closed first. Malformed server
    /// definitions are fatal; unreachable servers are not.
    pub async fn on_init(&mut self, _data: &mut ExchangeData) -> Result<(), ConfigError> {
        logging::init(&self.config.logging);

        if let Some(mut previous) = self.registry.take() {
            warn!("Re-initializing, closing the previous connections");
            previous.close_all().await;
        }

        let descriptors = self.config.descriptors().inspect_err(|err| {
            error!("Invalid Modbus server configuration: {err}");
        })?;
        let mut registry = EndpointRegistry::build(descriptors)?;
        registry
            .connect_all(self.connector.as_ref(), self.config.bridge.concurrent)
            .await;

        info!(
            "Bridge initialized for model '{}' with {} Modbus servers",
            self.config.bridge.simulation_model,
            registry.len()
        );
        self.registry = Some(registry);
        self.step = 0;
        self.last_report = None;
        Ok(())
    }

    pub async fn on_start(&mut self, _data: &mut ExchangeData) {
        debug!("Start of simulation time");
    }

    pub async fn on_iterate(&mut self, _data: &mut ExchangeData) {
        debug!("Iteration");
    }

    /// Exchange one step with every server, then wait for the pacing interval.
    ///
    /// Problems are logged and recorded in the report. The call only fails in
    /// strict mode, after pacing, when the report is not clean.
    pub async fn on_step_end(&mut self, data: &mut ExchangeData) -> Result<StepReport, StepError> {
        self.step += 1;
        let started = Instant::now();
        let mut report = StepReport::new(self.step);

        let model = &self.config.bridge.simulation_model;
        match (self.registry.as_mut(), data.get_mut(model)) {
            (None, _) => {
                error!("Step {}: bridge is not initialized", self.step);
                report.issue = Some(StepIssue::NotInitialized);
            }
            (Some(_), None) => {
                error!("Step {}: no exchange data for model '{}'", self.step, model);
                report.issue = Some(StepIssue::ModelNotFound(model.clone()));
            }
            (Some(registry), Some(vector)) => {
                report.endpoints = self.adapter.run_step(registry, vector).await;
            }
        }
        report.elapsed = started.elapsed();

        if report.is_clean() {
            debug!(
                "Step {}: exchanged with {} servers in {:?}",
                report.step,
                report.endpoints.len(),
                report.elapsed
            );
        } else {
            warn!(
                "Step {}: {} of {} servers reported failures",
                report.step,
                report.failed_endpoints(),
                report.endpoints.len()
            );
        }

        self.config.bridge.pacing.wait(report.elapsed).await;
        self.last_report = Some(report.clone());

        if self.config.bridge.strict && !report.is_clean() {
            let step = report.step;
            return Err(match report.issue {
                Some(StepIssue::NotInitialized) => StepError::NotInitialized { step },
                Some(StepIssue::ModelNotFound(model)) => StepError::ModelNotFound { step, model },
                None => StepError::EndpointFailures {
                    report: Box::new(report),
                },
            });
        }
        Ok(report)
    }

    /// Close every connection and flush the log.
    pub async fn on_finalize(&mut self, _data: &mut ExchangeData) {
        match self.registry.take() {
            Some(mut registry) => {
                registry.close_all().await;
                info!("Simulation finished after {} steps", self.step);
            }
            None => debug!("Finalize without an active registry"),
        }
        logging::flush();
    }
}

#[async_trait]
impl SimulationHooks for Lifecycle {
    async fn initialization(&mut self, data: &mut ExchangeData) -> Result<(), ConfigError> {
        self.on_init(data).await
    }

    async fn start_time(&mut self, data: &mut ExchangeData) {
        self.on_start(data).await
    }

    async fn iteration(&mut self, data: &mut ExchangeData) {
        self.on_iterate(data).await
    }

    async fn end_of_time_step(&mut self, data: &mut ExchangeData) -> Result<StepReport, StepError> {
        self.on_step_end(data).await
    }

    async fn last_call_of_simulation(&mut self, data: &mut ExchangeData) {
        self.on_finalize(data).await
    }
}
