// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the sim-modbus-bridge project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Configuration utilities
//!
//! This module provides utility functions for working with configuration
//! settings, including validation and schema management.

use anyhow::{Context, Result};
use log::{debug, LevelFilter};

use super::Config;

/// JSON schema of the configuration file, embedded at build time.
pub const SCHEMA: &str = include_str!("../../resources/config.schema.json");

/// Output the embedded JSON schema to the console.
///
/// This function is called when the `--show-config-schema` flag is provided
/// on the command line.
///
/// # Example
///
/// ```bash
/// ./sim_modbus_bridge --show-config-schema > config_schema.json
/// ```
pub fn output_config_schema() -> Result<()> {
    let schema: serde_json::Value =
        serde_json::from_str(SCHEMA).context("Failed to parse JSON schema")?;
    let formatted_schema =
        serde_json::to_string_pretty(&schema).context("Failed to format JSON schema")?;
    println!("{}", formatted_schema);
    Ok(())
}

/// Check if a string is a valid IP address
///
/// Validates that a string represents a valid IPv4 or IPv6 address,
/// or is one of the special values like "localhost".
pub fn is_valid_ip_address(addr: &str) -> bool {
    if addr.parse::<std::net::IpAddr>().is_ok() {
        return true;
    }

    matches!(addr, "localhost" | "::" | "::0" | "0.0.0.0")
}

/// Check that a string is a well-formed DNS hostname.
///
/// Labels are 1 to 63 letters, digits or hyphens, not starting or ending
/// with a hyphen, and the whole name is at most 253 characters.
pub fn is_valid_hostname(name: &str) -> bool {
    let name = name.strip_suffix('.').unwrap_or(name);
    if name.is_empty() || name.len() > 253 {
        return false;
    }

    name.split('.').all(|label| {
        !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
    })
}

/// Validates the configuration against rules the JSON schema cannot express.
///
/// # Validation Rules
///
/// - **Server layout**: every server descriptor is well formed (paired
///   register and index lists, 1-based addresses, non-empty ranges) and
///   read-back output ranges do not overlap
/// - **Hosts**: every server host is an IP address or a valid hostname
/// - **Timeouts**: connect and request timeouts are not zero
/// - **Log level**: the level is one `log` understands
/// - **Model name**: the simulation model name is not empty
pub fn validate_specific_rules(config: &Config) -> Result<()> {
    debug!("Performing additional validation checks");

    config
        .descriptors()
        .context("Invalid Modbus server definitions")?;

    for server in &config.servers {
        if !is_valid_ip_address(&server.host) && !is_valid_hostname(&server.host) {
            anyhow::bail!(
                "Server host '{}' is neither an IP address nor a valid hostname",
                server.host
            );
        }
    }

    if config.bridge.connect_timeout_ms == 0 {
        anyhow::bail!("connect_timeout_ms must be greater than 0");
    }
    if config.bridge.request_timeout_ms == 0 {
        anyhow::bail!("request_timeout_ms must be greater than 0");
    }

    config
        .logging
        .level
        .parse::<LevelFilter>()
        .with_context(|| format!("Invalid log level: {}", config.logging.level))?;

    if config.bridge.simulation_model.trim().is_empty() {
        anyhow::bail!("simulation_model must not be empty");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RegisterList, ServerConfig};

    #[test]
    fn ip_addresses_and_special_names_are_recognized() {
        assert!(is_valid_ip_address("10.202.240.12"));
        assert!(is_valid_ip_address("::1"));
        assert!(is_valid_ip_address("localhost"));
        assert!(!is_valid_ip_address("plc-7.site"));
    }

    #[test]
    fn hostnames_follow_dns_label_rules() {
        assert!(is_valid_hostname("plc-7.site"));
        assert!(is_valid_hostname("plc7.site."));
        assert!(!is_valid_hostname("plc 7"));
        assert!(!is_valid_hostname("-plc.site"));
        assert!(!is_valid_hostname("plc..site"));
        assert!(!is_valid_hostname(""));
    }

    #[test]
    fn malformed_host_fails_specific_rules() {
        let mut config = Config::default();
        config.servers[0].host = "10.208.8.11 ".to_string();
        let err = validate_specific_rules(&config).expect_err("trailing space");
        assert!(err.to_string().contains("neither an IP address"));

        config.servers[0].host = "plc-7.site".to_string();
        assert!(validate_specific_rules(&config).is_ok());
    }

    #[test]
    fn default_config_passes_specific_rules() {
        assert!(validate_specific_rules(&Config::default()).is_ok());
    }

    #[test]
    fn overlapping_readers_fail_specific_rules() {
        let mut config = Config::default();
        config.servers.push(ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 504,
            unit_id: 1,
            write_registers: RegisterList::default(),
            input_indexes: vec![],
            read_registers: RegisterList::List(vec![9]),
            output_offset: 1,
        });
        assert!(validate_specific_rules(&config).is_err());
    }

    #[test]
    fn unknown_log_level_fails_specific_rules() {
        let mut config = Config::default();
        config.logging.level = "chatty".to_string();
        assert!(validate_specific_rules(&config).is_err());
    }
}
