// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the sim-modbus-bridge project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Transport seam between endpoints and the wire
//!
//! [`Connector`] opens connections, [`RegisterTransport`] carries single
//! register requests over one connection. The TCP implementation uses
//! `tokio-modbus`; the in-memory implementation in
//! [`memory`](super::memory) stands in for field devices.
//!
//! Addresses at this level are 0-based wire addresses and values are raw
//! 16-bit words.

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use tokio::net::lookup_host;
use tokio::time;
use tokio_modbus::prelude::*;

use super::descriptor::ServerDescriptor;
use crate::error::TransportError;

/// One open connection to a Modbus server.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RegisterTransport: Send {
    /// Write one holding register.
    async fn write_register(&mut self, address: u16, value: u16) -> Result<(), TransportError>;

    /// Read one holding register.
    async fn read_register(&mut self, address: u16) -> Result<u16, TransportError>;

    /// Release the connection.
    async fn disconnect(&mut self) -> Result<(), TransportError>;
}

/// Factory for connections, one call per endpoint.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        descriptor: &ServerDescriptor,
    ) -> Result<Box<dyn RegisterTransport>, TransportError>;
}

/// Opens Modbus TCP connections with `tokio-modbus`.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    connect_timeout: Duration,
    request_timeout: Duration,
}

impl TcpConnector {
    pub fn new(connect_timeout: Duration, request_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            request_timeout,
        }
    }
}

impl Default for TcpConnector {
    fn default() -> Self {
        Self::new(Duration::from_secs(3), Duration::from_secs(1))
    }
}

async fn resolve(host: &str, port: u16) -> Result<SocketAddr, TransportError> {
    let mut addrs = lookup_host((host, port))
        .await
        .map_err(|err| TransportError::Resolve(format!("{host}:{port}: {err}")))?;
    addrs
        .next()
        .ok_or_else(|| TransportError::Resolve(format!("{host}:{port}: no address")))
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(
        &self,
        descriptor: &ServerDescriptor,
    ) -> Result<Box<dyn RegisterTransport>, TransportError> {
        let socket_addr = resolve(&descriptor.host, descriptor.port).await?;
        debug!(
            "Connecting to {} at {} (unit {})",
            descriptor.label(),
            socket_addr,
            descriptor.unit_id
        );

        let ctx = time::timeout(
            self.connect_timeout,
            tcp::connect_slave(socket_addr, Slave(descriptor.unit_id)),
        )
        .await
        .map_err(|_| TransportError::Timeout(self.connect_timeout))?
        .map_err(|err| TransportError::Io(err.to_string()))?;

        Ok(Box::new(TcpTransport {
            ctx,
            request_timeout: self.request_timeout,
        }))
    }
}

/// A live `tokio-modbus` client context with a per-request timeout.
pub struct TcpTransport {
    ctx: client::Context,
    request_timeout: Duration,
}

/// Split the nested `tokio-modbus` result into transport errors.
fn flatten<T>(response: tokio_modbus::Result<T>) -> Result<T, TransportError> {
    match response {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(exception)) => Err(TransportError::Exception(exception.to_string())),
        Err(err) => Err(TransportError::Protocol(err.to_string())),
    }
}

#[async_trait]
impl RegisterTransport for TcpTransport {
    async fn write_register(&mut self, address: u16, value: u16) -> Result<(), TransportError> {
        let response = time::timeout(
            self.request_timeout,
            self.ctx.write_multiple_registers(address, &[value]),
        )
        .await
        .map_err(|_| TransportError::Timeout(self.request_timeout))?;
        flatten(response)
    }

    async fn read_register(&mut self, address: u16) -> Result<u16, TransportError> {
        let response = time::timeout(
            self.request_timeout,
            self.ctx.read_holding_registers(address, 1),
        )
        .await
        .map_err(|_| TransportError::Timeout(self.request_timeout))?;
        let values = flatten(response)?;
        values
            .first()
            .copied()
            .ok_or_else(|| TransportError::Protocol("empty read response".to_string()))
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        match time::timeout(self.request_timeout, self.ctx.disconnect()).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(err)) => Err(TransportError::Io(err.to_string())),
            Err(_) => Err(TransportError::Timeout(self.request_timeout)),
        }
    }
}
