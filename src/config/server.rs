// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the sim-modbus-bridge project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Modbus server definitions
//!
//! Each entry of the `servers` list describes one field device and how its
//! holding registers map onto the simulation vectors.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::modbus::{ServerDescriptor, DEFAULT_UNIT_ID};

/// A list of 1-based register addresses.
///
/// Accepts either an explicit list or an inclusive range:
///
/// ```yaml
/// write_registers: [1, 2, 7]
/// read_registers: { first: 4, last: 5 }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RegisterList {
    List(Vec<u16>),
    Range { first: u16, last: u16 },
}

impl Default for RegisterList {
    fn default() -> Self {
        RegisterList::List(Vec::new())
    }
}

impl RegisterList {
    /// Expand to the addresses, in order.
    pub fn addresses(&self, endpoint: &str) -> Result<Vec<u16>, ConfigError> {
        match *self {
            RegisterList::List(ref addresses) => Ok(addresses.clone()),
            RegisterList::Range { first, last } if first > last => Err(ConfigError::EmptyRange {
                endpoint: endpoint.to_string(),
                first,
                last,
            }),
            RegisterList::Range { first, last } => Ok((first..=last).collect()),
        }
    }
}

fn default_port() -> u16 {
    502
}

fn default_unit_id() -> u8 {
    DEFAULT_UNIT_ID
}

/// One Modbus server as written in the configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Hostname or IP address of the device.
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_unit_id")]
    pub unit_id: u8,

    /// Holding registers receiving simulation inputs.
    #[serde(default)]
    pub write_registers: RegisterList,

    /// 0-based input positions, paired with `write_registers`.
    #[serde(default)]
    pub input_indexes: Vec<usize>,

    /// Holding registers read back into the outputs. Empty for write-only devices.
    #[serde(default)]
    pub read_registers: RegisterList,

    /// First output index receiving the read-back values.
    #[serde(default)]
    pub output_offset: usize,
}

impl ServerConfig {
    /// Expand register lists into a descriptor. Descriptor invariants are
    /// checked separately by [`crate::modbus::validate_layout`].
    pub fn descriptor(&self) -> Result<ServerDescriptor, ConfigError> {
        let endpoint = format!("{}:{}", self.host, self.port);
        Ok(ServerDescriptor::new(self.host.clone(), self.port)
            .with_unit_id(self.unit_id)
            .with_writes(
                self.write_registers.addresses(&endpoint)?,
                self.input_indexes.clone(),
            )
            .with_reads(self.read_registers.addresses(&endpoint)?)
            .with_output_offset(self.output_offset))
    }
}
