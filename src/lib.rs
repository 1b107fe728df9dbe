// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the sim-modbus-bridge project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Simulation to Modbus TCP bridge
//!
//! At the end of every simulation time step the bridge writes a selection of
//! the simulation inputs, scaled by 10, to holding registers of several
//! Modbus TCP servers, and reads other registers back into the simulation
//! outputs. One unreachable server or one rejected register never stops the
//! exchange with the others.
//!
//! ## Modules
//!
//! - [`codec`]: float to 16-bit register conversion
//! - [`modbus`]: server descriptors, endpoints, registry, transports and simulators
//! - [`exchange`]: the per-step protocol and its reports
//! - [`lifecycle`]: the callbacks invoked by the simulation engine, and pacing
//! - [`driver`]: replay of input frames through the callbacks
//! - [`config`]: YAML configuration with schema validation
//! - [`logging`]: the diagnostic log sink
//! - [`error`]: error types

pub mod codec;
pub mod config;
pub mod driver;
pub mod error;
pub mod exchange;
pub mod lifecycle;
pub mod logging;
pub mod modbus;

pub use codec::{OverflowPolicy, RegisterCodec};
pub use exchange::{ExchangeData, ExchangeVector, StepReport};
pub use lifecycle::{Lifecycle, SimulationHooks};
