// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the sim-modbus-bridge project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Diagnostic log configuration

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Where and how verbosely the bridge logs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log file, opened in append mode. `None` logs to stderr.
    pub file: Option<PathBuf>,

    /// One of `off`, `error`, `warn`, `info`, `debug`, `trace`.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            file: Some(PathBuf::from("DataExchange.log")),
            level: "info".to_string(),
        }
    }
}
