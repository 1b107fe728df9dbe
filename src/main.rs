// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the sim-modbus-bridge project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

// Main entry point of the simulation to Modbus bridge
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;

use sim_modbus_bridge::config::{self, Config};
use sim_modbus_bridge::driver::{load_frames, synthetic_frames, ReplayDriver};
use sim_modbus_bridge::lifecycle::Lifecycle;
use sim_modbus_bridge::modbus::MemoryConnector;

/// Exchange simulation values with Modbus TCP servers, one step at a time
#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (YAML format)
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Path to a configuration to validate and exit
    #[arg(long)]
    validate_config: Option<PathBuf>,

    /// Output the configuration schema as JSON and exit
    #[arg(long)]
    show_config_schema: bool,

    /// Input frames, one JSON array per line (synthetic ramp if absent)
    #[arg(long)]
    inputs: Option<PathBuf>,

    /// Output file for the output vectors, one JSON array per line (stdout if absent)
    #[arg(long)]
    output: Option<PathBuf>,

    /// Number of synthetic steps, only used without --inputs
    #[arg(long, default_value_t = 10)]
    steps: usize,

    /// Width of synthetic frames, only used without --inputs
    #[arg(long, default_value_t = 8)]
    width: usize,

    /// Length of the output vector (default: the end of the furthest read-back range)
    #[arg(long)]
    outputs: Option<usize>,

    /// Exchange with in-memory devices instead of Modbus TCP servers
    #[arg(long)]
    simulate: bool,

    /// Do not pace steps on the wall clock
    #[arg(long)]
    no_pacing: bool,

    /// Exchange with all servers concurrently
    #[arg(long)]
    concurrent: bool,

    /// Stop at the first step with a failure
    #[arg(long)]
    strict: bool,

    /// Budget for the exchange of one step, in milliseconds
    #[arg(long)]
    step_deadline_ms: Option<u64>,

    /// Log file (overrides the configuration)
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Enable verbose logging (debug level)
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.show_config_schema {
        return config::output_config_schema();
    }

    if let Some(validate_path) = args.validate_config {
        if !validate_path.exists() {
            return Err(anyhow::anyhow!(
                "Configuration file does not exist: {}",
                validate_path.display()
            ));
        }
        let config = Config::from_file(&validate_path)
            .map_err(|err| anyhow::anyhow!("Configuration validation failed: {}", err))?;
        println!(
            "Configuration file is valid: {} ({} servers)",
            validate_path.display(),
            config.servers.len()
        );
        return Ok(());
    }

    let mut config = Config::from_file(&args.config)?;
    config.apply_args(
        args.no_pacing,
        args.concurrent,
        args.strict,
        args.step_deadline_ms,
        args.log_file.clone(),
        args.verbose.then(|| "debug".to_string()),
    );

    let descriptors = config.descriptors()?;
    let outputs_len = args.outputs.unwrap_or_else(|| {
        descriptors
            .iter()
            .filter(|d| !d.is_write_only())
            .map(|d| d.output_range().end)
            .max()
            .unwrap_or(0)
    });

    let frames = match &args.inputs {
        Some(path) => load_frames(path)?,
        None => synthetic_frames(args.steps, args.width),
    };

    let driver = ReplayDriver::new(config.bridge.simulation_model.clone(), outputs_len);
    let mut lifecycle = if args.simulate {
        let connector = MemoryConnector::from_descriptors(&descriptors);
        Lifecycle::new(config, Arc::new(connector))
    } else {
        Lifecycle::with_tcp(config)
    };

    let outcome = driver.run(&mut lifecycle, &frames).await?;

    let mut writer: Box<dyn Write> = match &args.output {
        Some(path) => Box::new(BufWriter::new(File::create(path).with_context(|| {
            format!("Failed to create output file {}", path.display())
        })?)),
        None => Box::new(io::stdout().lock()),
    };
    for outputs in &outcome.outputs {
        serde_json::to_writer(&mut writer, outputs)?;
        writeln!(writer)?;
    }
    writer.flush()?;

    let failed = outcome.reports.iter().filter(|r| !r.is_clean()).count();
    eprintln!(
        "{} steps exchanged, {} with failures",
        outcome.reports.len(),
        failed
    );
    Ok(())
}
