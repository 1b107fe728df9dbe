// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the sim-modbus-bridge project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Diagnostic log sink
//!
//! The bridge logs through the `log` facade. [`init`] installs an
//! `env_logger` backend appending to the configured file with lines such as
//!
//! ```text
//! 2025-03-14 09:26:53,589 [INFO] Connected to Modbus server 10.202.240.12:502 (unit 1)
//! ```
//!
//! `RUST_LOG`, when set, takes precedence over the configured level.

use std::fs::OpenOptions;
use std::io::Write;

use chrono::Local;
use env_logger::{Builder, Env, Target};
use log::debug;

use crate::config::LoggingConfig;

/// Install the global logger.
///
/// Returns `false` when a logger was already installed, in which case the
/// existing one keeps running. A log file that cannot be opened falls back
/// to stderr.
pub fn init(config: &LoggingConfig) -> bool {
    let mut builder = Builder::from_env(Env::default().default_filter_or(config.level.as_str()));
    builder.format(|buf, record| {
        writeln!(
            buf,
            "{} [{}] {}",
            Local::now().format("%Y-%m-%d %H:%M:%S,%3f"),
            record.level(),
            record.args()
        )
    });

    if let Some(path) = &config.file {
        match OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => {
                builder.target(Target::Pipe(Box::new(file)));
            }
            Err(err) => {
                eprintln!(
                    "Cannot open log file {}: {}, logging to stderr",
                    path.display(),
                    err
                );
            }
        }
    }

    match builder.try_init() {
        Ok(()) => true,
        Err(_) => {
            debug!("Logger already installed, keeping it");
            false
        }
    }
}

/// Flush buffered log records.
pub fn flush() {
    log::logger().flush();
}
