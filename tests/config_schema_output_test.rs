// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the sim-modbus-bridge project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

use anyhow::Result;
use sim_modbus_bridge::config;

#[test]
fn test_config_schema_output() -> Result<()> {
    // Output goes to stdout; only check that the embedded schema parses
    config::output_config_schema()?;
    Ok(())
}

#[test]
fn test_schema_accepts_the_default_config() -> Result<()> {
    let schema: serde_json::Value = serde_json::from_str(config::utils::SCHEMA)?;
    let validator = jsonschema::draft202012::options().build(&schema)?;

    let default_config = serde_json::to_value(config::Config::default())?;
    assert!(validator.is_valid(&default_config));
    Ok(())
}
