// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the sim-modbus-bridge project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

use std::net::SocketAddr;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use tokio::net::TcpListener;

use sim_modbus_bridge::modbus::simulator::{serve, DeviceSimulator};

/// Modbus TCP server exposing a block of holding registers
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Address to listen on
    #[clap(long, default_value = "127.0.0.1")]
    address: String,

    /// Port to listen on
    #[clap(long, default_value = "5502")]
    port: u16,

    /// Number of holding registers, served at wire addresses 0..size
    #[clap(long, default_value = "16")]
    size: u16,

    /// Preset a register, as ADDRESS=VALUE with a 1-based address (repeatable)
    #[clap(long = "set", value_parser = parse_preset)]
    presets: Vec<(u16, i16)>,
}

fn parse_preset(arg: &str) -> Result<(u16, i16), String> {
    let (address, value) = arg
        .split_once('=')
        .ok_or_else(|| format!("expected ADDRESS=VALUE, got '{arg}'"))?;
    let address: u16 = address
        .trim()
        .parse()
        .map_err(|err| format!("invalid address '{address}': {err}"))?;
    if address == 0 {
        return Err("addresses are 1-based".to_string());
    }
    let value = value
        .trim()
        .parse()
        .map_err(|err| format!("invalid value '{value}': {err}"))?;
    Ok((address, value))
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init_from_env(
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"),
    );

    let args = Args::parse();
    let socket_addr: SocketAddr = format!("{}:{}", args.address, args.port)
        .parse()
        .with_context(|| format!("Invalid listen address {}:{}", args.address, args.port))?;

    let simulator = DeviceSimulator::new(args.size);
    for (address, value) in &args.presets {
        if !simulator.set_register(address - 1, *value as u16) {
            anyhow::bail!("Register {} is outside the {} served registers", address, args.size);
        }
    }

    let listener = TcpListener::bind(socket_addr)
        .await
        .with_context(|| format!("Failed to bind {}", socket_addr))?;

    tokio::select! {
        result = serve(listener, simulator.clone()) => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down, final registers:");
            for (addr, value) in simulator.snapshot() {
                info!("  register {} = {}", addr + 1, value as i16);
            }
        }
    }
    Ok(())
}
