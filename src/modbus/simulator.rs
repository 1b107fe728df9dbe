// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the sim-modbus-bridge project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Modbus TCP device simulator
//!
//! A small Modbus server exposing a block of holding registers, used to run
//! the bridge without field hardware. It answers:
//!
//! - 0x03: Read Holding Registers
//! - 0x06: Write Single Register
//! - 0x10: Write Multiple Registers
//!
//! Addresses outside the block answer `IllegalDataAddress`; any other
//! function code answers `IllegalFunction`.
//!
//! ## Usage
//!
//! ```no_run
//! use sim_modbus_bridge::modbus::simulator::{serve, DeviceSimulator};
//! use tokio::net::TcpListener;
//!
//! # async fn run() -> std::io::Result<()> {
//! let listener = TcpListener::bind("127.0.0.1:5502").await?;
//! serve(listener, DeviceSimulator::new(16)).await
//! # }
//! ```

use std::{
    collections::HashMap,
    future, io,
    net::SocketAddr,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use log::{debug, error, info};
use tokio::net::{TcpListener, TcpStream};
use tokio_modbus::{
    prelude::*,
    server::tcp::{accept_tcp_connection, Server},
};

/// Holding registers shared by every client connection.
///
/// Clones share the same register block, so the handle kept by the caller
/// sees what clients wrote.
#[derive(Debug, Clone, Default)]
pub struct DeviceSimulator {
    holding_registers: Arc<Mutex<HashMap<u16, u16>>>,
}

impl DeviceSimulator {
    /// Simulator with holding registers `0..size`, all zero.
    pub fn new(size: u16) -> Self {
        Self {
            holding_registers: Arc::new(Mutex::new((0..size).map(|addr| (addr, 0)).collect())),
        }
    }

    fn registers(&self) -> MutexGuard<'_, HashMap<u16, u16>> {
        self.holding_registers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Value of a holding register, by wire (0-based) address.
    pub fn register(&self, addr: u16) -> Option<u16> {
        self.registers().get(&addr).copied()
    }

    /// Preset a holding register. Returns `false` if the address is not served.
    pub fn set_register(&self, addr: u16, value: u16) -> bool {
        match self.registers().get_mut(&addr) {
            Some(register) => {
                *register = value;
                true
            }
            None => false,
        }
    }

    /// All registers, sorted by address.
    pub fn snapshot(&self) -> Vec<(u16, u16)> {
        let mut registers: Vec<(u16, u16)> =
            self.registers().iter().map(|(&a, &v)| (a, v)).collect();
        registers.sort_unstable();
        registers
    }
}

impl tokio_modbus::server::Service for DeviceSimulator {
    type Request = Request<'static>;
    type Response = Response;
    type Exception = ExceptionCode;
    type Future = future::Ready<Result<Self::Response, Self::Exception>>;

    fn call(&self, req: Self::Request) -> Self::Future {
        debug!("Received Modbus request: {:?}", req);

        let res = match req {
            Request::ReadHoldingRegisters(addr, cnt) => {
                register_read(&self.registers(), addr, cnt).map(Response::ReadHoldingRegisters)
            }
            Request::WriteMultipleRegisters(addr, values) => {
                register_write(&mut self.registers(), addr, &values)
                    .map(|_| Response::WriteMultipleRegisters(addr, values.len() as u16))
            }
            Request::WriteSingleRegister(addr, value) => {
                register_write(&mut self.registers(), addr, std::slice::from_ref(&value))
                    .map(|_| Response::WriteSingleRegister(addr, value))
            }
            _ => {
                error!("Exception::IllegalFunction - Unimplemented function code in request: {req:?}");
                Err(ExceptionCode::IllegalFunction)
            }
        };

        future::ready(res)
    }
}

fn register_read(
    registers: &HashMap<u16, u16>,
    addr: u16,
    cnt: u16,
) -> Result<Vec<u16>, ExceptionCode> {
    (0..cnt)
        .map(|i| {
            addr.checked_add(i)
                .and_then(|reg_addr| registers.get(&reg_addr).copied())
                .ok_or_else(|| {
                    error!("Exception::IllegalDataAddress - Register {addr}+{i} not found");
                    ExceptionCode::IllegalDataAddress
                })
        })
        .collect()
}

/// Writes are all-or-nothing: every target address is checked first.
fn register_write(
    registers: &mut HashMap<u16, u16>,
    addr: u16,
    values: &[u16],
) -> Result<(), ExceptionCode> {
    let targets: Vec<u16> = (0..values.len())
        .map(|i| {
            u16::try_from(i)
                .ok()
                .and_then(|i| addr.checked_add(i))
                .filter(|reg_addr| registers.contains_key(reg_addr))
                .ok_or_else(|| {
                    error!("Exception::IllegalDataAddress - Register {addr}+{i} not found");
                    ExceptionCode::IllegalDataAddress
                })
        })
        .collect::<Result<_, _>>()?;

    for (reg_addr, value) in targets.into_iter().zip(values) {
        registers.insert(reg_addr, *value);
        debug!("Written value {} to register {}", value, reg_addr);
    }
    Ok(())
}

/// Serve `simulator` on `listener` until the task is dropped.
pub async fn serve(listener: TcpListener, simulator: DeviceSimulator) -> io::Result<()> {
    info!(
        "Device simulator listening on {} ({} holding registers)",
        listener.local_addr()?,
        simulator.registers().len()
    );

    let server = Server::new(listener);
    let new_service = move |_socket_addr: SocketAddr| Ok::<_, io::Error>(Some(simulator.clone()));
    let on_connected = move |stream: TcpStream, socket_addr: SocketAddr| {
        let new_service = new_service.clone();
        async move {
            debug!("Client connected from {socket_addr}");
            accept_tcp_connection(stream, socket_addr, new_service)
        }
    };
    let on_process_error = |err: io::Error| {
        error!("Device simulator error: {err}");
    };

    server.serve(&on_connected, on_process_error).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_modbus::server::Service;

    #[tokio::test]
    async fn writes_then_reads_holding_registers() {
        let simulator = DeviceSimulator::new(4);
        let written = simulator
            .call(Request::WriteMultipleRegisters(1, vec![20, 30].into()))
            .await;
        assert_eq!(written, Ok(Response::WriteMultipleRegisters(1, 2)));

        let read = simulator.call(Request::ReadHoldingRegisters(0, 3)).await;
        assert_eq!(read, Ok(Response::ReadHoldingRegisters(vec![0, 20, 30])));
        assert_eq!(simulator.register(2), Some(30));
    }

    #[tokio::test]
    async fn out_of_range_addresses_are_rejected() {
        let simulator = DeviceSimulator::new(2);
        assert_eq!(
            simulator.call(Request::ReadHoldingRegisters(1, 2)).await,
            Err(ExceptionCode::IllegalDataAddress)
        );
        assert_eq!(
            simulator
                .call(Request::WriteMultipleRegisters(1, vec![5, 6].into()))
                .await,
            Err(ExceptionCode::IllegalDataAddress)
        );
        // partial writes are not applied
        assert_eq!(simulator.register(1), Some(0));
    }

    #[tokio::test]
    async fn unsupported_functions_are_illegal() {
        let simulator = DeviceSimulator::new(2);
        assert_eq!(
            simulator.call(Request::ReadInputRegisters(0, 1)).await,
            Err(ExceptionCode::IllegalFunction)
        );
    }

    #[test]
    fn presets_only_served_addresses() {
        let simulator = DeviceSimulator::new(2);
        assert!(simulator.set_register(1, 0xFFFE));
        assert!(!simulator.set_register(2, 1));
        assert_eq!(simulator.snapshot(), vec![(0, 0), (1, 0xFFFE)]);
    }
}
