// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the sim-modbus-bridge project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! One Modbus server as seen by the bridge
//!
//! A [`DeviceEndpoint`] owns at most one connection and moves through
//! `Unconnected → Connected → Closed`. `Closed` is terminal: a closed
//! endpoint is never reopened, a new one is built at the next
//! initialization instead.
//!
//! Writes and reads are issued one register per request, in configured
//! order. How a batch reacts to a failed register is chosen with
//! [`BatchPolicy`]: by default writes are best effort and reads stop at the
//! first failure.

use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};

use super::descriptor::ServerDescriptor;
use super::transport::{Connector, RegisterTransport};
use crate::codec::RegisterCodec;
use crate::error::{EndpointError, RegisterFailure, RegisterFault};

/// Reaction of a batch to a failed register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchPolicy {
    /// Log the failure and carry on with the next register.
    BestEffort,
    /// Stop the batch at the first failure.
    AbortOnFirst,
}

/// Observable connection state of an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointState {
    Unconnected,
    Connected,
    Closed,
}

enum Connection {
    Unconnected,
    Connected(Box<dyn RegisterTransport>),
    Closed,
}

/// Values read back by one batch, in configured order.
///
/// Slots are `None` only for registers that failed under
/// [`BatchPolicy::BestEffort`]; those failures are listed in `failures`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReadBatch {
    pub values: Vec<Option<i16>>,
    pub failures: Vec<RegisterFailure>,
}

impl ReadBatch {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Configured (1-based) address to wire (0-based) address.
///
/// Configured addresses are validated to be at least 1 when the registry
/// is built.
fn wire_address(configured: u16) -> u16 {
    configured.saturating_sub(1)
}

pub struct DeviceEndpoint {
    descriptor: ServerDescriptor,
    label: String,
    connection: Connection,
}

impl DeviceEndpoint {
    pub fn new(descriptor: ServerDescriptor) -> Self {
        let label = descriptor.label();
        Self {
            descriptor,
            label,
            connection: Connection::Unconnected,
        }
    }

    pub fn descriptor(&self) -> &ServerDescriptor {
        &self.descriptor
    }

    /// `host:port`, as used in logs and reports.
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn state(&self) -> EndpointState {
        match self.connection {
            Connection::Unconnected => EndpointState::Unconnected,
            Connection::Connected(_) => EndpointState::Connected,
            Connection::Closed => EndpointState::Closed,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state() == EndpointState::Connected
    }

    /// Open the connection to the server.
    ///
    /// Connecting an already connected endpoint does nothing. A failed
    /// attempt leaves the endpoint `Unconnected` and is not retried.
    pub async fn connect(&mut self, connector: &dyn Connector) -> Result<(), EndpointError> {
        match self.connection {
            Connection::Connected(_) => {
                debug!("{} is already connected", self.label);
                return Ok(());
            }
            Connection::Closed => {
                return Err(EndpointError::Closed {
                    endpoint: self.label.clone(),
                })
            }
            Connection::Unconnected => {}
        }

        match connector.connect(&self.descriptor).await {
            Ok(transport) => {
                info!("Connected to Modbus server {}", self.descriptor);
                self.attach(transport);
                Ok(())
            }
            Err(source) => {
                error!(
                    "Error initializing Modbus client for {}: {}",
                    self.label, source
                );
                Err(EndpointError::Connect {
                    endpoint: self.label.clone(),
                    source,
                })
            }
        }
    }

    fn attach(&mut self, transport: Box<dyn RegisterTransport>) {
        self.connection = Connection::Connected(transport);
    }

    fn transport(&mut self) -> Result<&mut Box<dyn RegisterTransport>, EndpointError> {
        match &mut self.connection {
            Connection::Connected(transport) => Ok(transport),
            Connection::Unconnected => Err(EndpointError::NotConnected {
                endpoint: self.label.clone(),
            }),
            Connection::Closed => Err(EndpointError::Closed {
                endpoint: self.label.clone(),
            }),
        }
    }

    /// Encode `values` and write them to the configured write registers.
    ///
    /// Values pair positionally with `write_registers`. Returns the number
    /// of registers written when every register succeeded.
    pub async fn write_batch(
        &mut self,
        values: &[f64],
        codec: &RegisterCodec,
        policy: BatchPolicy,
    ) -> Result<usize, EndpointError> {
        if self.descriptor.write_registers.is_empty() {
            return Ok(0);
        }
        if values.len() != self.descriptor.write_registers.len() {
            warn!(
                "{}: {} values for {} write registers, writing the paired prefix",
                self.label,
                values.len(),
                self.descriptor.write_registers.len()
            );
        }

        let registers = self.descriptor.write_registers.clone();
        let label = self.label.clone();
        let transport = self.transport()?;

        let mut written = 0;
        let mut failures = Vec::new();
        for (&address, &value) in registers.iter().zip(values) {
            let outcome = match codec.encode(value) {
                Ok(register) => transport
                    .write_register(wire_address(address), RegisterCodec::to_wire(register))
                    .await
                    .map(|()| register)
                    .map_err(RegisterFault::from),
                Err(err) => Err(RegisterFault::from(err)),
            };

            match outcome {
                Ok(register) => {
                    written += 1;
                    debug!("{label}: wrote {value} as {register} to register {address}");
                }
                Err(fault) => {
                    error!("Error writing to register {address} for {label}: {fault}");
                    failures.push(RegisterFailure { address, fault });
                    if policy == BatchPolicy::AbortOnFirst {
                        break;
                    }
                }
            }
        }

        if failures.is_empty() {
            Ok(written)
        } else {
            Err(EndpointError::Write {
                endpoint: label,
                failures,
            })
        }
    }

    /// Read the configured read registers, raw and in order.
    pub async fn read_batch(&mut self, policy: BatchPolicy) -> Result<ReadBatch, EndpointError> {
        if self.descriptor.read_registers.is_empty() {
            return Ok(ReadBatch::default());
        }

        let registers = self.descriptor.read_registers.clone();
        let label = self.label.clone();
        let transport = self.transport()?;

        let mut batch = ReadBatch {
            values: Vec::with_capacity(registers.len()),
            failures: Vec::new(),
        };
        for &address in &registers {
            match transport.read_register(wire_address(address)).await {
                Ok(raw) => {
                    let value = RegisterCodec::decode(raw);
                    debug!("{label}: read {value} from register {address}");
                    batch.values.push(Some(value));
                }
                Err(err) => {
                    error!("Error reading register {address} from {label}: {err}");
                    let failure = RegisterFailure {
                        address,
                        fault: err.into(),
                    };
                    match policy {
                        BatchPolicy::AbortOnFirst => {
                            return Err(EndpointError::Read {
                                endpoint: label,
                                failures: vec![failure],
                            })
                        }
                        BatchPolicy::BestEffort => {
                            batch.values.push(None);
                            batch.failures.push(failure);
                        }
                    }
                }
            }
        }
        Ok(batch)
    }

    /// Release the connection. Safe to call any number of times.
    pub async fn close(&mut self) {
        match std::mem::replace(&mut self.connection, Connection::Closed) {
            Connection::Connected(mut transport) => match transport.disconnect().await {
                Ok(()) => info!("Closed Modbus connection for {}", self.label),
                Err(err) => error!(
                    "Error closing Modbus connection for {}: {}",
                    self.label, err
                ),
            },
            Connection::Unconnected => self.connection = Connection::Unconnected,
            Connection::Closed => {}
        }
    }

    /// Drop a connection whose last request was abandoned mid-flight.
    ///
    /// The endpoint returns to `Unconnected`; the next initialization
    /// reconnects it.
    pub fn discard_connection(&mut self) {
        if let Connection::Connected(_) = self.connection {
            warn!(
                "{}: dropping connection abandoned at the step deadline",
                self.label
            );
            self.connection = Connection::Unconnected;
        }
    }
}

impl std::fmt::Debug for DeviceEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceEndpoint")
            .field("descriptor", &self.descriptor)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::OverflowPolicy;
    use crate::error::{CodecError, TransportError};
    use crate::modbus::transport::MockRegisterTransport;
    use async_trait::async_trait;
    use mockall::predicate::eq;
    use mockall::Sequence;

    struct RefusingConnector;

    #[async_trait]
    impl Connector for RefusingConnector {
        async fn connect(
            &self,
            _descriptor: &ServerDescriptor,
        ) -> Result<Box<dyn RegisterTransport>, TransportError> {
            Err(TransportError::Io("connection refused".to_string()))
        }
    }

    fn endpoint_with(mock: MockRegisterTransport, descriptor: ServerDescriptor) -> DeviceEndpoint {
        let mut endpoint = DeviceEndpoint::new(descriptor);
        endpoint.attach(Box::new(mock));
        endpoint
    }

    fn plc() -> ServerDescriptor {
        ServerDescriptor::new("10.0.0.1", 502)
    }

    #[tokio::test]
    async fn write_batch_scales_values_and_shifts_addresses() {
        let mut mock = MockRegisterTransport::new();
        mock.expect_write_register()
            .with(eq(0), eq(23))
            .times(1)
            .returning(|_, _| Ok(()));
        mock.expect_write_register()
            .with(eq(10), eq(RegisterCodec::to_wire(-12)))
            .times(1)
            .returning(|_, _| Ok(()));

        let mut endpoint = endpoint_with(mock, plc().with_writes(vec![1, 11], vec![0, 1]));
        let written = endpoint
            .write_batch(&[2.3, -1.25], &RegisterCodec::default(), BatchPolicy::BestEffort)
            .await;
        assert_eq!(written, Ok(2));
    }

    #[tokio::test]
    async fn best_effort_write_continues_after_a_failure() {
        let mut mock = MockRegisterTransport::new();
        mock.expect_write_register()
            .with(eq(0), eq(10))
            .returning(|_, _| Err(TransportError::Exception("Illegal data address".to_string())));
        mock.expect_write_register()
            .with(eq(1), eq(20))
            .times(1)
            .returning(|_, _| Ok(()));

        let mut endpoint = endpoint_with(mock, plc().with_writes(vec![1, 2], vec![0, 1]));
        let result = endpoint
            .write_batch(&[1.0, 2.0], &RegisterCodec::default(), BatchPolicy::BestEffort)
            .await;

        match result {
            Err(EndpointError::Write { failures, .. }) => {
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].address, 1);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn abort_on_first_write_stops_the_batch() {
        let mut mock = MockRegisterTransport::new();
        mock.expect_write_register()
            .times(1)
            .returning(|_, _| Err(TransportError::Timeout(std::time::Duration::from_secs(1))));

        let mut endpoint = endpoint_with(mock, plc().with_writes(vec![1, 2, 3], vec![0, 1, 2]));
        let result = endpoint
            .write_batch(
                &[1.0, 2.0, 3.0],
                &RegisterCodec::default(),
                BatchPolicy::AbortOnFirst,
            )
            .await;
        assert!(matches!(result, Err(EndpointError::Write { ref failures, .. }) if failures.len() == 1));
    }

    #[tokio::test]
    async fn unencodable_value_is_a_register_failure() {
        let mut mock = MockRegisterTransport::new();
        mock.expect_write_register()
            .with(eq(1), eq(5))
            .times(1)
            .returning(|_, _| Ok(()));

        let mut endpoint = endpoint_with(mock, plc().with_writes(vec![1, 2], vec![0, 1]));
        let result = endpoint
            .write_batch(
                &[5000.0, 0.5],
                &RegisterCodec::new(OverflowPolicy::Reject),
                BatchPolicy::BestEffort,
            )
            .await;

        match result {
            Err(EndpointError::Write { failures, .. }) => {
                assert_eq!(
                    failures,
                    vec![RegisterFailure {
                        address: 1,
                        fault: RegisterFault::Encode(CodecError::OutOfRange {
                            value: 5000.0,
                            scaled: 50000.0
                        }),
                    }]
                );
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn short_value_list_writes_the_paired_prefix() {
        let mut mock = MockRegisterTransport::new();
        mock.expect_write_register()
            .with(eq(0), eq(70))
            .times(1)
            .returning(|_, _| Ok(()));

        let mut endpoint = endpoint_with(mock, plc().with_writes(vec![1, 2], vec![2, 99]));
        let written = endpoint
            .write_batch(&[7.0], &RegisterCodec::default(), BatchPolicy::BestEffort)
            .await;
        assert_eq!(written, Ok(1));
    }

    #[tokio::test]
    async fn read_batch_returns_raw_values_in_order() {
        let mut mock = MockRegisterTransport::new();
        let mut seq = Sequence::new();
        mock.expect_read_register()
            .with(eq(3))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(215));
        mock.expect_read_register()
            .with(eq(4))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(0xFFFE));

        let mut endpoint = endpoint_with(mock, plc().with_reads(vec![4, 5]));
        let batch = endpoint.read_batch(BatchPolicy::AbortOnFirst).await;
        assert_eq!(
            batch,
            Ok(ReadBatch {
                values: vec![Some(215), Some(-2)],
                failures: vec![],
            })
        );
    }

    #[tokio::test]
    async fn abort_on_first_read_abandons_the_rest() {
        let mut mock = MockRegisterTransport::new();
        mock.expect_read_register()
            .with(eq(3))
            .times(1)
            .returning(|_| Err(TransportError::Io("broken pipe".to_string())));
        mock.expect_read_register().with(eq(4)).never();

        let mut endpoint = endpoint_with(mock, plc().with_reads(vec![4, 5]));
        let result = endpoint.read_batch(BatchPolicy::AbortOnFirst).await;
        assert!(matches!(result, Err(EndpointError::Read { ref failures, .. }) if failures[0].address == 4));
    }

    #[tokio::test]
    async fn best_effort_read_leaves_holes() {
        let mut mock = MockRegisterTransport::new();
        mock.expect_read_register()
            .with(eq(3))
            .returning(|_| Err(TransportError::Io("broken pipe".to_string())));
        mock.expect_read_register().with(eq(4)).returning(|_| Ok(7));

        let mut endpoint = endpoint_with(mock, plc().with_reads(vec![4, 5]));
        let batch = endpoint
            .read_batch(BatchPolicy::BestEffort)
            .await
            .expect("best effort read returns a batch");
        assert_eq!(batch.values, vec![None, Some(7)]);
        assert!(!batch.is_complete());
    }

    #[tokio::test]
    async fn write_completes_before_read_begins() {
        let mut mock = MockRegisterTransport::new();
        let mut seq = Sequence::new();
        mock.expect_write_register()
            .times(2)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));
        mock.expect_read_register()
            .times(2)
            .in_sequence(&mut seq)
            .returning(|_| Ok(1));

        let mut endpoint = endpoint_with(
            mock,
            plc().with_writes(vec![1, 2], vec![2, 3]).with_reads(vec![4, 5]),
        );
        let codec = RegisterCodec::default();
        assert_eq!(
            endpoint
                .write_batch(&[2.0, 3.0], &codec, BatchPolicy::BestEffort)
                .await,
            Ok(2)
        );
        assert!(endpoint.read_batch(BatchPolicy::AbortOnFirst).await.is_ok());
    }

    #[tokio::test]
    async fn unconnected_endpoint_fails_immediately() {
        let mut endpoint = DeviceEndpoint::new(plc().with_writes(vec![1], vec![0]).with_reads(vec![2]));
        let codec = RegisterCodec::default();
        assert!(matches!(
            endpoint.write_batch(&[1.0], &codec, BatchPolicy::BestEffort).await,
            Err(EndpointError::NotConnected { .. })
        ));
        assert!(matches!(
            endpoint.read_batch(BatchPolicy::AbortOnFirst).await,
            Err(EndpointError::NotConnected { .. })
        ));
    }

    #[tokio::test]
    async fn failed_connect_leaves_endpoint_unconnected() {
        let mut endpoint = DeviceEndpoint::new(plc());
        let result = endpoint.connect(&RefusingConnector).await;
        assert!(matches!(result, Err(EndpointError::Connect { .. })));
        assert_eq!(endpoint.state(), EndpointState::Unconnected);
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let mut mock = MockRegisterTransport::new();
        mock.expect_disconnect().times(1).returning(|| Ok(()));

        let mut endpoint = endpoint_with(mock, plc());
        endpoint.close().await;
        endpoint.close().await;
        assert_eq!(endpoint.state(), EndpointState::Closed);

        let mut never_connected = DeviceEndpoint::new(plc());
        never_connected.close().await;
        never_connected.close().await;
        assert_eq!(never_connected.state(), EndpointState::Unconnected);
    }

    #[tokio::test]
    async fn closed_endpoint_is_never_reopened() {
        let mut mock = MockRegisterTransport::new();
        mock.expect_disconnect().returning(|| Ok(()));

        let mut endpoint = endpoint_with(mock, plc());
        endpoint.close().await;
        assert!(matches!(
            endpoint.connect(&RefusingConnector).await,
            Err(EndpointError::Closed { .. })
        ));
    }
}
