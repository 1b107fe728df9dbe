// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the sim-modbus-bridge project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Modbus communication module
//!
//! For avoiding confusion with the Modbus master/slave terminology, this module uses
//! the terms "server" and "client" instead. Every field device is a server; the bridge
//! is the client of all of them.
//!
//! ## Key Components
//!
//! - [`ServerDescriptor`]: address and register mapping of one server, as configured.
//! - [`DeviceEndpoint`]: one connection to one server, with write and read batches.
//! - [`EndpointRegistry`]: the ordered endpoints of a simulation run.
//! - [`Connector`] / [`RegisterTransport`]: the seam to the wire, implemented over TCP
//!   by [`TcpConnector`] and in memory by [`MemoryConnector`].
//! - [`DeviceSimulator`]: a Modbus TCP server standing in for a field device.
//!
//! ## Addressing
//!
//! Register addresses are 1-based in the configuration and in logs, and 0-based on
//! the wire. The conversion happens in [`DeviceEndpoint`] only.

pub mod descriptor;
pub mod endpoint;
pub mod memory;
pub mod registry;
pub mod simulator;
pub mod transport;

pub use descriptor::{validate_layout, ServerDescriptor, DEFAULT_UNIT_ID};
pub use endpoint::{BatchPolicy, DeviceEndpoint, EndpointState, ReadBatch};
pub use memory::{JournalEntry, MemoryConnector, Operation};
pub use registry::EndpointRegistry;
pub use simulator::DeviceSimulator;
pub use transport::{Connector, RegisterTransport, TcpConnector};
