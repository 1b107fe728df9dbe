// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the sim-modbus-bridge project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

use std::time::Duration;

use anyhow::Result;
use clap::Parser;

use sim_modbus_bridge::codec::{RegisterCodec, SCALE_FACTOR};
use sim_modbus_bridge::modbus::{BatchPolicy, DeviceEndpoint, ServerDescriptor, TcpConnector};

/// Read, and optionally write, holding registers of one Modbus server
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Modbus server address
    #[clap(long, default_value = "127.0.0.1")]
    address: String,

    /// Modbus server port
    #[clap(long, default_value = "502")]
    port: u16,

    /// Modbus unit identifier
    #[clap(long, default_value = "1")]
    unit_id: u8,

    /// First holding register to read (1-based)
    #[clap(long, default_value = "1")]
    register: u16,

    /// Number of registers to read
    #[clap(long, default_value = "4")]
    quantity: u16,

    /// Value to write, scaled by 10, before reading (repeatable, consecutive registers)
    #[clap(long = "write", allow_negative_numbers = true)]
    writes: Vec<f64>,

    /// Request timeout in milliseconds
    #[clap(long, default_value = "1000")]
    timeout_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init_from_env(
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"),
    );

    let args = Args::parse();
    if args.register == 0 {
        anyhow::bail!("Register addresses are 1-based");
    }

    let reads: Vec<u16> = (0..args.quantity)
        .filter_map(|i| args.register.checked_add(i))
        .collect();
    let writes: Vec<u16> = (0..args.writes.len())
        .filter_map(|i| u16::try_from(i).ok())
        .filter_map(|i| args.register.checked_add(i))
        .collect();
    let indexes = (0..writes.len()).collect();

    let descriptor = ServerDescriptor::new(args.address.clone(), args.port)
        .with_unit_id(args.unit_id)
        .with_writes(writes, indexes)
        .with_reads(reads.clone());
    descriptor.validate(0)?;

    println!("Connecting to Modbus server at {}", descriptor);
    let connector = TcpConnector::new(Duration::from_secs(3), Duration::from_millis(args.timeout_ms));
    let mut endpoint = DeviceEndpoint::new(descriptor);
    endpoint.connect(&connector).await?;

    if !args.writes.is_empty() {
        let written = endpoint
            .write_batch(&args.writes, &RegisterCodec::default(), BatchPolicy::AbortOnFirst)
            .await?;
        println!("Wrote {} registers starting at {}", written, args.register);
    }

    let batch = endpoint.read_batch(BatchPolicy::BestEffort).await?;
    for (address, value) in reads.iter().zip(&batch.values) {
        match value {
            Some(raw) => println!(
                "Register {}: raw = {} (scaled = {:.1})",
                address,
                raw,
                f64::from(*raw) / SCALE_FACTOR
            ),
            None => println!("Register {}: unreadable", address),
        }
    }
    for failure in &batch.failures {
        eprintln!("{}", failure);
    }

    endpoint.close().await;
    Ok(())
}
