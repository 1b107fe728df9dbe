// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the sim-modbus-bridge project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Register codec
//!
//! Simulation values travel to the devices as 16-bit signed holding registers
//! with one decimal of precision: a value is multiplied by 10 and truncated
//! toward zero (`2.36` becomes `23`, `-1.25` becomes `-12`).
//!
//! Values read back from the devices are surfaced unscaled: the raw register
//! is only reinterpreted as a signed 16-bit integer.

use serde::{Deserialize, Serialize};

use crate::error::CodecError;

/// Fixed decimal scale applied on the write path.
pub const SCALE_FACTOR: f64 = 10.0;

/// What to do when a scaled value does not fit in an `i16`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Refuse the value; the register is reported as a failed write.
    #[default]
    Reject,
    /// Clamp to `i16::MIN..=i16::MAX`.
    Saturate,
    /// Keep the low 16 bits (two's-complement wraparound).
    Wrap,
}

/// Converts simulation values to and from holding registers.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RegisterCodec {
    overflow: OverflowPolicy,
}

impl RegisterCodec {
    pub fn new(overflow: OverflowPolicy) -> Self {
        Self { overflow }
    }

    pub fn overflow(&self) -> OverflowPolicy {
        self.overflow
    }

    /// Scale a value by [`SCALE_FACTOR`] and truncate it toward zero.
    ///
    /// Non-finite values are always rejected, whatever the overflow policy.
    pub fn encode(&self, value: f64) -> Result<i16, CodecError> {
        if !value.is_finite() {
            return Err(CodecError::NonFinite(value));
        }
        let scaled = (value * SCALE_FACTOR).trunc();

        match self.overflow {
            OverflowPolicy::Reject => {
                if scaled < f64::from(i16::MIN) || scaled > f64::from(i16::MAX) {
                    Err(CodecError::OutOfRange { value, scaled })
                } else {
                    Ok(scaled as i16)
                }
            }
            // `as` saturates float to int conversions
            OverflowPolicy::Saturate => Ok(scaled as i16),
            OverflowPolicy::Wrap => Ok(scaled as i64 as i16),
        }
    }

    /// Raw register to signed value, no rescaling.
    pub fn decode(raw: u16) -> i16 {
        raw as i16
    }

    /// Signed value to the unsigned word carried by the protocol.
    pub fn to_wire(value: i16) -> u16 {
        value as u16
    }
}
