// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the sim-modbus-bridge project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! In-process Modbus devices
//!
//! [`MemoryConnector`] implements the transport seam without any network:
//! each device is a map of holding registers keyed by wire (0-based)
//! address. Devices can be made unreachable, slow, or made to fail on
//! given addresses, and every request is appended to a journal so that
//! ordering can be checked afterwards.
//!
//! Used by `--simulate` runs and by the lifecycle tests.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use log::debug;

use super::descriptor::ServerDescriptor;
use super::transport::{Connector, RegisterTransport};
use crate::error::TransportError;

/// A request seen by an in-memory device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Connect,
    Write { address: u16, value: u16 },
    Read { address: u16 },
    Disconnect,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalEntry {
    /// `host:port` of the device.
    pub endpoint: String,
    pub operation: Operation,
}

#[derive(Debug, Clone)]
struct MemoryDevice {
    registers: HashMap<u16, u16>,
    reachable: bool,
    failing_writes: HashSet<u16>,
    failing_reads: HashSet<u16>,
    latency: Duration,
}

impl MemoryDevice {
    fn with_registers(size: u16) -> Self {
        Self {
            registers: (0..size).map(|address| (address, 0)).collect(),
            reachable: true,
            failing_writes: HashSet::new(),
            failing_reads: HashSet::new(),
            latency: Duration::ZERO,
        }
    }
}

#[derive(Debug, Default)]
struct Devices {
    devices: HashMap<String, MemoryDevice>,
    journal: Vec<JournalEntry>,
}

fn key(host: &str, port: u16) -> String {
    format!("{host}:{port}")
}

fn illegal_address() -> TransportError {
    TransportError::Exception("Illegal data address".to_string())
}

/// Connector to a set of in-memory devices. Clones share the same devices.
#[derive(Debug, Clone, Default)]
pub struct MemoryConnector {
    shared: Arc<Mutex<Devices>>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// One device per descriptor, large enough for every configured register.
    pub fn from_descriptors(descriptors: &[ServerDescriptor]) -> Self {
        let connector = Self::new();
        for descriptor in descriptors {
            let size = descriptor
                .write_registers
                .iter()
                .chain(&descriptor.read_registers)
                .copied()
                .max()
                .unwrap_or(0);
            connector.add_device(&descriptor.host, descriptor.port, size);
        }
        connector
    }

    fn lock(&self) -> MutexGuard<'_, Devices> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_device<R>(&self, host: &str, port: u16, f: impl FnOnce(&mut MemoryDevice) -> R) -> Option<R> {
        self.lock().devices.get_mut(&key(host, port)).map(f)
    }

    /// Add (or replace) a device exposing registers `0..size`.
    pub fn add_device(&self, host: &str, port: u16, size: u16) {
        self.lock()
            .devices
            .insert(key(host, port), MemoryDevice::with_registers(size));
    }

    pub fn set_reachable(&self, host: &str, port: u16, reachable: bool) {
        self.with_device(host, port, |device| device.reachable = reachable);
    }

    /// Make writes to a wire address fail with a device exception.
    pub fn fail_write(&self, host: &str, port: u16, address: u16) {
        self.with_device(host, port, |device| device.failing_writes.insert(address));
    }

    /// Make reads of a wire address fail with a device exception.
    pub fn fail_read(&self, host: &str, port: u16, address: u16) {
        self.with_device(host, port, |device| device.failing_reads.insert(address));
    }

    /// Delay applied to every request on the device.
    pub fn set_latency(&self, host: &str, port: u16, latency: Duration) {
        self.with_device(host, port, |device| device.latency = latency);
    }

    pub fn set_register(&self, host: &str, port: u16, address: u16, value: u16) {
        self.with_device(host, port, |device| device.registers.insert(address, value));
    }

    pub fn register(&self, host: &str, port: u16, address: u16) -> Option<u16> {
        self.with_device(host, port, |device| device.registers.get(&address).copied())
            .flatten()
    }

    /// Every request received so far, in arrival order.
    pub fn journal(&self) -> Vec<JournalEntry> {
        self.lock().journal.clone()
    }

    pub fn clear_journal(&self) {
        self.lock().journal.clear();
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(
        &self,
        descriptor: &ServerDescriptor,
    ) -> Result<Box<dyn RegisterTransport>, TransportError> {
        let endpoint = descriptor.label();
        let mut shared = self.lock();
        shared.journal.push(JournalEntry {
            endpoint: endpoint.clone(),
            operation: Operation::Connect,
        });
        match shared.devices.get(&endpoint) {
            Some(device) if device.reachable => {
                debug!("In-memory device {endpoint} accepted connection");
                Ok(Box::new(MemoryTransport {
                    endpoint,
                    shared: Arc::clone(&self.shared),
                }))
            }
            _ => Err(TransportError::Io(format!("{endpoint}: connection refused"))),
        }
    }
}

struct MemoryTransport {
    endpoint: String,
    shared: Arc<Mutex<Devices>>,
}

impl MemoryTransport {
    fn lock(&self) -> MutexGuard<'_, Devices> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Journal the request and return the device latency.
    fn record(&self, operation: Operation) -> Duration {
        let mut shared = self.lock();
        shared.journal.push(JournalEntry {
            endpoint: self.endpoint.clone(),
            operation,
        });
        shared
            .devices
            .get(&self.endpoint)
            .map(|device| device.latency)
            .unwrap_or_default()
    }

    async fn delay(latency: Duration) {
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }

    fn device<R>(
        &self,
        f: impl FnOnce(&mut MemoryDevice) -> Result<R, TransportError>,
    ) -> Result<R, TransportError> {
        let mut shared = self.lock();
        match shared.devices.get_mut(&self.endpoint) {
            Some(device) if device.reachable => f(device),
            _ => Err(TransportError::Io(format!(
                "{}: connection reset",
                self.endpoint
            ))),
        }
    }
}

#[async_trait]
impl RegisterTransport for MemoryTransport {
    async fn write_register(&mut self, address: u16, value: u16) -> Result<(), TransportError> {
        Self::delay(self.record(Operation::Write { address, value })).await;
        self.device(|device| {
            if device.failing_writes.contains(&address) {
                return Err(illegal_address());
            }
            match device.registers.get_mut(&address) {
                Some(register) => {
                    *register = value;
                    Ok(())
                }
                None => Err(illegal_address()),
            }
        })
    }

    async fn read_register(&mut self, address: u16) -> Result<u16, TransportError> {
        Self::delay(self.record(Operation::Read { address })).await;
        self.device(|device| {
            if device.failing_reads.contains(&address) {
                return Err(illegal_address());
            }
            device
                .registers
                .get(&address)
                .copied()
                .ok_or_else(illegal_address)
        })
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        self.record(Operation::Disconnect);
        Ok(())
    }
}
