// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the sim-modbus-bridge project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Static description of one Modbus server and its register mapping

use std::fmt;
use std::ops::Range;

use crate::error::ConfigError;

/// Default Modbus unit (slave) identifier.
pub const DEFAULT_UNIT_ID: u8 = 1;

/// Address and register mapping of one endpoint.
///
/// Register addresses are 1-based as written in the configuration; they are
/// converted to 0-based wire addresses when requests are sent.
/// `input_indexes` are 0-based positions in the simulation input vector and
/// are paired positionally with `write_registers`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerDescriptor {
    pub host: String,
    pub port: u16,
    pub unit_id: u8,
    pub write_registers: Vec<u16>,
    pub input_indexes: Vec<usize>,
    pub read_registers: Vec<u16>,
    /// First output index receiving this endpoint's read-back values.
    pub output_offset: usize,
}

impl ServerDescriptor {
    /// Descriptor with no register mapping; see the `with_*` builders.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            unit_id: DEFAULT_UNIT_ID,
            write_registers: Vec::new(),
            input_indexes: Vec::new(),
            read_registers: Vec::new(),
            output_offset: 0,
        }
    }

    pub fn with_writes(mut self, registers: Vec<u16>, input_indexes: Vec<usize>) -> Self {
        self.write_registers = registers;
        self.input_indexes = input_indexes;
        self
    }

    pub fn with_reads(mut self, registers: Vec<u16>) -> Self {
        self.read_registers = registers;
        self
    }

    pub fn with_output_offset(mut self, offset: usize) -> Self {
        self.output_offset = offset;
        self
    }

    pub fn with_unit_id(mut self, unit_id: u8) -> Self {
        self.unit_id = unit_id;
        self
    }

    /// `host:port` label used in logs and reports.
    pub fn label(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// A descriptor without read registers only pushes values.
    pub fn is_write_only(&self) -> bool {
        self.read_registers.is_empty()
    }

    /// Output indices this endpoint may write to.
    ///
    /// The end saturates; [`validate`](Self::validate) rejects offsets for
    /// which it would.
    pub fn output_range(&self) -> Range<usize> {
        self.output_offset..self.output_offset.saturating_add(self.read_registers.len())
    }

    /// Check the invariants of a single descriptor.
    ///
    /// `index` is the position in the configuration, used when the host
    /// itself is missing.
    pub fn validate(&self, index: usize) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::EmptyHost { index });
        }
        if self.port == 0 {
            return Err(ConfigError::InvalidPort {
                endpoint: self.label(),
            });
        }
        if self.write_registers.len() != self.input_indexes.len() {
            return Err(ConfigError::LengthMismatch {
                endpoint: self.label(),
                registers: self.write_registers.len(),
                indexes: self.input_indexes.len(),
            });
        }
        if self
            .write_registers
            .iter()
            .chain(&self.read_registers)
            .any(|&address| address == 0)
        {
            return Err(ConfigError::ZeroAddress {
                endpoint: self.label(),
            });
        }
        if self
            .output_offset
            .checked_add(self.read_registers.len())
            .is_none()
        {
            return Err(ConfigError::OutputOffsetOverflow {
                endpoint: self.label(),
                offset: self.output_offset,
                count: self.read_registers.len(),
            });
        }
        Ok(())
    }
}

impl fmt::Display for ServerDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} (unit {})", self.host, self.port, self.unit_id)
    }
}

/// Validate every descriptor, then reject overlapping output ranges.
///
/// Two endpoints reading back into the same output slots would overwrite
/// each other within a step, so only disjoint ranges are accepted.
pub fn validate_layout(descriptors: &[ServerDescriptor]) -> Result<(), ConfigError> {
    for (index, descriptor) in descriptors.iter().enumerate() {
        descriptor.validate(index)?;
    }

    let readers: Vec<&ServerDescriptor> =
        descriptors.iter().filter(|d| !d.is_write_only()).collect();
    for (i, first) in readers.iter().enumerate() {
        for second in &readers[i + 1..] {
            let (a, b) = (first.output_range(), second.output_range());
            if a.start < b.end && b.start < a.end {
                return Err(ConfigError::OverlappingOutputs {
                    first: first.label(),
                    first_range: a,
                    second: second.label(),
                    second_range: b,
                });
            }
        }
    }
    Ok(())
}
