// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the sim-modbus-bridge project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Bridge behaviour configuration
//!
//! This module defines how the bridge runs a step: which model of the
//! exchange data it serves, how steps are paced, the network timeouts and
//! how failures are handled.

use serde::{Deserialize, Serialize};

use crate::codec::OverflowPolicy;
use crate::lifecycle::Pacing;
use crate::modbus::BatchPolicy;

/// Configuration of the exchange performed at every step.
///
/// # Example
///
/// ```
/// use sim_modbus_bridge::config::BridgeConfig;
/// use sim_modbus_bridge::lifecycle::Pacing;
///
/// let bridge = BridgeConfig {
///     pacing: Pacing::None,
///     concurrent: true,
///     ..BridgeConfig::default()
/// };
/// assert_eq!(bridge.simulation_model, "main");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Key of the exchange data served by the bridge.
    pub simulation_model: String,

    /// Wall-clock pacing applied after each exchange.
    pub pacing: Pacing,

    /// Upper bound for opening one connection, in milliseconds.
    pub connect_timeout_ms: u64,

    /// Upper bound for one register request, in milliseconds.
    pub request_timeout_ms: u64,

    /// Budget for the whole exchange of a step. Endpoints still busy when it
    /// runs out are abandoned. `None` disables the budget.
    pub step_deadline_ms: Option<u64>,

    /// Exchange with all endpoints concurrently instead of in order.
    pub concurrent: bool,

    /// Turn endpoint failures into a step error.
    pub strict: bool,

    pub write_policy: BatchPolicy,
    pub read_policy: BatchPolicy,

    /// Handling of values that do not fit a 16-bit register once scaled.
    pub overflow: OverflowPolicy,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            simulation_model: "main".to_string(),
            pacing: Pacing::default(),
            connect_timeout_ms: 3000,
            request_timeout_ms: 1000,
            step_deadline_ms: None,
            concurrent: false,
            strict: false,
            write_policy: BatchPolicy::BestEffort,
            read_policy: BatchPolicy::AbortOnFirst,
            overflow: OverflowPolicy::Reject,
        }
    }
}
