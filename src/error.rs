// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the sim-modbus-bridge project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Error types for the bridge
//!
//! Errors are layered the same way the data flows:
//!
//! - [`CodecError`]: a simulation value could not be turned into a register
//! - [`TransportError`]: the network or the device refused a single request
//! - [`EndpointError`]: what one endpoint reports for a connect, write or read batch
//! - [`ConfigError`]: a server definition is malformed (fatal at initialization)
//! - [`StepError`]: a whole step failed, only surfaced in strict mode

use std::time::Duration;

use thiserror::Error;

use crate::exchange::StepReport;

/// Failure to encode a simulation value into a 16-bit register.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CodecError {
    #[error("value {0} is not a finite number")]
    NonFinite(f64),
    #[error("value {value} scales to {scaled}, outside the 16-bit register range")]
    OutOfRange { value: f64, scaled: f64 },
}

/// Failure of a single request on the wire.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    #[error("cannot resolve {0}")]
    Resolve(String),
    #[error("I/O error: {0}")]
    Io(String),
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("device exception: {0}")]
    Exception(String),
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// What went wrong for one register inside a batch.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RegisterFault {
    #[error(transparent)]
    Encode(#[from] CodecError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// A failed register, identified by its configured (1-based) address.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("register {address}: {fault}")]
pub struct RegisterFailure {
    pub address: u16,
    pub fault: RegisterFault,
}

fn join_failures(failures: &[RegisterFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Errors reported by a [`DeviceEndpoint`](crate::modbus::DeviceEndpoint).
///
/// None of these are fatal for the simulation run; they are logged and
/// collected in the step report.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EndpointError {
    #[error("{endpoint}: connection failed: {source}")]
    Connect {
        endpoint: String,
        source: TransportError,
    },
    #[error("{endpoint}: not connected")]
    NotConnected { endpoint: String },
    #[error("{endpoint}: endpoint is closed")]
    Closed { endpoint: String },
    #[error("{endpoint}: write failed ({})", join_failures(.failures))]
    Write {
        endpoint: String,
        failures: Vec<RegisterFailure>,
    },
    #[error("{endpoint}: read failed ({})", join_failures(.failures))]
    Read {
        endpoint: String,
        failures: Vec<RegisterFailure>,
    },
    #[error("{endpoint}: abandoned at the step deadline")]
    Deadline { endpoint: String },
}

/// Malformed configuration. Fatal at initialization.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("server {endpoint}: {registers} write registers but {indexes} input indexes")]
    LengthMismatch {
        endpoint: String,
        registers: usize,
        indexes: usize,
    },
    #[error("server {endpoint}: register address 0 is invalid, addresses are 1-based")]
    ZeroAddress { endpoint: String },
    #[error("server {endpoint}: register range {first}..={last} is empty")]
    EmptyRange {
        endpoint: String,
        first: u16,
        last: u16,
    },
    #[error("server #{index}: host is empty")]
    EmptyHost { index: usize },
    #[error("server {endpoint}: port 0 is invalid")]
    InvalidPort { endpoint: String },
    #[error("server {endpoint}: output offset {offset} leaves no room for {count} read registers")]
    OutputOffsetOverflow {
        endpoint: String,
        offset: usize,
        count: usize,
    },
    #[error("output ranges of {first} ({first_range:?}) and {second} ({second_range:?}) overlap")]
    OverlappingOutputs {
        first: String,
        first_range: std::ops::Range<usize>,
        second: String,
        second_range: std::ops::Range<usize>,
    },
}

/// Step-level failure, returned by `on_step_end` in strict mode only.
#[derive(Error, Debug)]
pub enum StepError {
    #[error("step {step}: bridge is not initialized")]
    NotInitialized { step: u64 },
    #[error("step {step}: no exchange data for model '{model}'")]
    ModelNotFound { step: u64, model: String },
    #[error("step {}: {} endpoint(s) reported failures", .report.step, .report.failed_endpoints())]
    EndpointFailures { report: Box<StepReport> },
}
