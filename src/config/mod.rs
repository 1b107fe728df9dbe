// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the sim-modbus-bridge project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Configuration management for the bridge
//!
//! This module provides functionality for loading, validating, and applying
//! configuration settings. The configuration is backed by a YAML file and
//! validated against a JSON schema for robustness.
//!
//! ## Configuration Structure
//!
//! - `bridge`: how steps are exchanged (model name, pacing, timeouts, policies)
//! - `logging`: diagnostic log file and level
//! - `servers`: the ordered list of Modbus servers and their register mapping
//!
//! ## Usage
//!
//! ```no_run
//! use sim_modbus_bridge::config::Config;
//! use std::path::Path;
//!
//! // Load config from file, creates a default if not found
//! let mut config = Config::from_file(Path::new("config.yaml")).unwrap();
//!
//! // Apply command line overrides if needed
//! config.apply_args(
//!     true,  // No pacing
//!     false, // Concurrent
//!     false, // Strict
//!     None,  // Step deadline
//!     None,  // Log file
//!     Some("debug".to_string()),
//! );
//!
//! println!("{} servers configured", config.servers.len());
//! ```

pub mod bridge;
pub mod logging;
pub mod server;
pub mod utils;

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::{debug, error};
use serde::{Deserialize, Serialize};

pub use bridge::BridgeConfig;
pub use logging::LoggingConfig;
pub use server::{RegisterList, ServerConfig};
pub use utils::{is_valid_hostname, is_valid_ip_address, output_config_schema};

use crate::error::ConfigError;
use crate::lifecycle::Pacing;
use crate::modbus::{validate_layout, ServerDescriptor};

/// Root configuration structure.
///
/// Sections missing from the file take their default values. The server
/// list has no per-entry defaults for `host`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub bridge: BridgeConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// Modbus servers, in exchange order.
    #[serde(default)]
    pub servers: Vec<ServerConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bridge: BridgeConfig::default(),
            logging: LoggingConfig::default(),
            servers: vec![
                ServerConfig {
                    host: "127.0.0.1".to_string(),
                    port: 502,
                    unit_id: 1,
                    write_registers: RegisterList::List(vec![1]),
                    input_indexes: vec![5],
                    read_registers: RegisterList::Range { first: 4, last: 5 },
                    output_offset: 0,
                },
                ServerConfig {
                    host: "127.0.0.1".to_string(),
                    port: 503,
                    unit_id: 1,
                    write_registers: RegisterList::Range { first: 1, last: 2 },
                    input_indexes: vec![2, 3],
                    read_registers: RegisterList::default(),
                    output_offset: 0,
                },
            ],
        }
    }
}

impl Config {
    /// Helper method to create a sample config file when validation fails
    fn create_sample_config<P: AsRef<Path>>(path: P) -> Result<()> {
        let path = path.as_ref();
        let sample_path = path.with_extension("sample.yaml");
        debug!("Original path: {:?}, Sample path: {:?}", path, sample_path);

        if let Some(parent) = sample_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                debug!("Creating parent directory: {:?}", parent);
                fs::create_dir_all(parent).with_context(|| {
                    format!(
                        "Failed to create parent directory for sample config at {:?}",
                        parent
                    )
                })?;
            }
        }

        Self::default()
            .save_to_file(&sample_path)
            .with_context(|| format!("Failed to save sample config to {:?}", sample_path))?;

        error!(
            "Sample configuration file created at {:?}\nPlease edit and rename it",
            sample_path
        );
        Ok(())
    }

    /// Load configuration from a file
    ///
    /// A missing file is created with the defaults. A file failing schema
    /// validation, deserialization or the specific rules produces a
    /// `<name>.sample.yaml` next to it and an error.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            debug!(
                "Configuration file not found at {:?}, creating default",
                path
            );
            let default_config = Self::default();
            default_config.save_to_file(path)?;
            return Ok(default_config);
        }

        debug!("Loading configuration from {:?}", path);
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file at {:?}", path))?;

        // YAML to a generic value, then to JSON for schema validation
        let yaml_value: serde_yml::Value = serde_yml::from_str(&contents)
            .with_context(|| format!("Failed to parse YAML configuration from {:?}", path))?;
        let json_value = serde_json::to_value(&yaml_value).with_context(|| {
            format!("Failed to convert YAML to JSON for validation: {:?}", path)
        })?;

        let schema: serde_json::Value = serde_json::from_str(utils::SCHEMA)
            .context("Failed to parse JSON schema")?;
        let validator = jsonschema::draft202012::options()
            .should_validate_formats(true)
            .build(&schema)?;

        debug!("Validating {} configuration against schema", path.display());
        if let Err(error) = validator.validate(&json_value) {
            error!("Configuration validation error before deserialization");
            Self::create_sample_config(path)?;
            anyhow::bail!("Configuration validation failed: {}", error);
        }

        debug!("Schema validation passed, deserializing into Config structure");
        let config: Config = match serde_yml::from_str(&contents) {
            Ok(config) => config,
            Err(err) => {
                error!("Configuration deserialization error: {}", err);
                if let Err(e) = Self::create_sample_config(path) {
                    error!("Failed to create sample config: {}", e);
                }
                return Err(anyhow::anyhow!(
                    "Failed to deserialize configuration from {}: {}",
                    path.display(),
                    err
                ));
            }
        };

        if let Err(err) = utils::validate_specific_rules(&config) {
            error!("Configuration specific validation error: {}", err);
            Self::create_sample_config(path)?;
            return Err(err);
        }

        Ok(config)
    }

    /// Save the configuration to a file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let yaml =
            serde_yml::to_string(self).context("Failed to serialize configuration to YAML")?;

        let mut file = File::create(path.as_ref())
            .with_context(|| format!("Failed to create config file at {:?}", path.as_ref()))?;

        file.write_all(yaml.as_bytes())
            .with_context(|| format!("Failed to write configuration to {:?}", path.as_ref()))?;

        Ok(())
    }

    /// Expand the server list into validated descriptors, in order.
    pub fn descriptors(&self) -> Result<Vec<ServerDescriptor>, ConfigError> {
        let descriptors = self
            .servers
            .iter()
            .map(ServerConfig::descriptor)
            .collect::<Result<Vec<_>, _>>()?;
        validate_layout(&descriptors)?;
        Ok(descriptors)
    }

    /// Apply command line arguments to override configuration values.
    ///
    /// Flags only override when set; options only when provided.
    ///
    /// # Parameters
    ///
    /// * `no_pacing` - Disable wall-clock pacing between steps
    /// * `concurrent` - Exchange with all servers concurrently
    /// * `strict` - Turn endpoint failures into step errors
    /// * `step_deadline_ms` - Budget for the exchange of one step
    /// * `log_file` - Log file replacing the configured one
    /// * `log_level` - Log level replacing the configured one
    pub fn apply_args(
        &mut self,
        no_pacing: bool,
        concurrent: bool,
        strict: bool,
        step_deadline_ms: Option<u64>,
        log_file: Option<PathBuf>,
        log_level: Option<String>,
    ) {
        if no_pacing {
            debug!("Disabling pacing from command line");
            self.bridge.pacing = Pacing::None;
        }
        if concurrent {
            debug!("Enabling concurrent exchange from command line");
            self.bridge.concurrent = true;
        }
        if strict {
            debug!("Enabling strict mode from command line");
            self.bridge.strict = true;
        }
        if let Some(deadline) = step_deadline_ms {
            debug!("Overriding step deadline from command line: {} ms", deadline);
            self.bridge.step_deadline_ms = Some(deadline);
        }
        if let Some(file) = log_file {
            debug!("Overriding log file from command line: {:?}", file);
            self.logging.file = Some(file);
        }
        if let Some(level) = log_level {
            debug!("Overriding log level from command line: {}", level);
            self.logging.level = level;
        }
    }
}
