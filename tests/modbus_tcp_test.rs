// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the sim-modbus-bridge project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Modbus TCP round trips against live device simulators
//!
//! These tests start `DeviceSimulator` instances on OS-assigned ports and
//! drive them through the TCP connector, the endpoint API and the full
//! lifecycle.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::time;

use sim_modbus_bridge::config::{Config, LoggingConfig, RegisterList, ServerConfig};
use sim_modbus_bridge::error::{EndpointError, RegisterFault, TransportError};
use sim_modbus_bridge::exchange::{ExchangeData, ExchangeVector};
use sim_modbus_bridge::lifecycle::{Lifecycle, Pacing};
use sim_modbus_bridge::modbus::simulator::{serve, DeviceSimulator};
use sim_modbus_bridge::modbus::{
    BatchPolicy, DeviceEndpoint, EndpointState, ServerDescriptor, TcpConnector,
};
use sim_modbus_bridge::RegisterCodec;

/// Test utility function to start a device simulator in the background
async fn start_test_server(
    size: u16,
) -> Result<(SocketAddr, DeviceSimulator, tokio::task::JoinHandle<()>), Box<dyn std::error::Error>>
{
    // Use port 0 to let the OS assign an available port
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let socket_addr = listener.local_addr()?;

    let simulator = DeviceSimulator::new(size);
    let served = simulator.clone();
    let handle = tokio::spawn(async move {
        if let Err(e) = serve(listener, served).await {
            eprintln!("Server error: {}", e);
        }
    });

    // Give the server a moment to start
    time::sleep(Duration::from_millis(50)).await;

    Ok((socket_addr, simulator, handle))
}

fn connector() -> TcpConnector {
    TcpConnector::new(Duration::from_secs(2), Duration::from_secs(1))
}

#[tokio::test]
async fn test_write_then_read_over_tcp() -> Result<(), Box<dyn std::error::Error>> {
    let (socket_addr, simulator, _server_handle) = start_test_server(8).await?;
    simulator.set_register(4, 0xFFFE);

    let descriptor = ServerDescriptor::new("127.0.0.1", socket_addr.port())
        .with_writes(vec![1, 2], vec![0, 1])
        .with_reads(vec![2, 5]);
    let mut endpoint = DeviceEndpoint::new(descriptor);
    endpoint.connect(&connector()).await?;
    assert_eq!(endpoint.state(), EndpointState::Connected);

    let written = endpoint
        .write_batch(&[2.3, -1.25], &RegisterCodec::default(), BatchPolicy::BestEffort)
        .await?;
    assert_eq!(written, 2);
    assert_eq!(simulator.register(0), Some(23));
    assert_eq!(simulator.register(1), Some(RegisterCodec::to_wire(-12)));

    let batch = endpoint.read_batch(BatchPolicy::AbortOnFirst).await?;
    assert_eq!(batch.values, vec![Some(-12), Some(-2)]);

    endpoint.close().await;
    endpoint.close().await;
    assert_eq!(endpoint.state(), EndpointState::Closed);
    Ok(())
}

#[tokio::test]
async fn test_illegal_address_is_a_device_exception() -> Result<(), Box<dyn std::error::Error>> {
    let (socket_addr, _simulator, _server_handle) = start_test_server(4).await?;

    let descriptor =
        ServerDescriptor::new("127.0.0.1", socket_addr.port()).with_reads(vec![1, 100]);
    let mut endpoint = DeviceEndpoint::new(descriptor);
    endpoint.connect(&connector()).await?;

    match endpoint.read_batch(BatchPolicy::AbortOnFirst).await {
        Err(EndpointError::Read { failures, .. }) => {
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].address, 100);
            assert!(matches!(
                failures[0].fault,
                RegisterFault::Transport(TransportError::Exception(_))
            ));
        }
        other => panic!("unexpected result: {other:?}"),
    }

    // The connection survives a device exception
    let batch = endpoint.read_batch(BatchPolicy::BestEffort).await?;
    assert_eq!(batch.values, vec![Some(0), None]);

    endpoint.close().await;
    Ok(())
}

#[tokio::test]
async fn test_refused_connection_leaves_endpoint_unconnected() -> Result<(), Box<dyn std::error::Error>>
{
    // Reserve a port, then free it so nothing listens there
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let port = listener.local_addr()?.port();
    drop(listener);

    let mut endpoint = DeviceEndpoint::new(ServerDescriptor::new("127.0.0.1", port));
    let result = endpoint.connect(&connector()).await;
    assert!(matches!(result, Err(EndpointError::Connect { .. })));
    assert_eq!(endpoint.state(), EndpointState::Unconnected);
    Ok(())
}

#[tokio::test]
async fn test_lifecycle_step_over_tcp() -> Result<(), Box<dyn std::error::Error>> {
    let (first_addr, first, _first_handle) = start_test_server(4).await?;
    let (second_addr, second, _second_handle) = start_test_server(8).await?;
    second.set_register(3, 215);
    second.set_register(4, RegisterCodec::to_wire(-40));

    let mut config = Config::default();
    config.bridge.pacing = Pacing::None;
    config.logging = LoggingConfig {
        file: None,
        level: "off".to_string(),
    };
    config.servers = vec![
        ServerConfig {
            host: "127.0.0.1".to_string(),
            port: first_addr.port(),
            unit_id: 1,
            write_registers: RegisterList::List(vec![1]),
            input_indexes: vec![5],
            read_registers: RegisterList::default(),
            output_offset: 0,
        },
        ServerConfig {
            host: "127.0.0.1".to_string(),
            port: second_addr.port(),
            unit_id: 1,
            write_registers: RegisterList::Range { first: 1, last: 2 },
            input_indexes: vec![2, 3],
            read_registers: RegisterList::Range { first: 4, last: 5 },
            output_offset: 0,
        },
    ];

    let mut lifecycle = Lifecycle::with_tcp(config);
    let mut data = ExchangeData::from([(
        "main".to_string(),
        ExchangeVector::new(vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0], 2),
    )]);

    lifecycle.on_init(&mut data).await?;
    let report = lifecycle.on_step_end(&mut data).await?;
    lifecycle.on_finalize(&mut data).await;

    assert!(report.is_clean(), "unexpected failures: {report:?}");
    assert_eq!(first.register(0), Some(50));
    assert_eq!(second.register(0), Some(20));
    assert_eq!(second.register(1), Some(30));
    assert_eq!(data["main"].outputs, vec![215.0, -40.0]);
    Ok(())
}

#[tokio::test]
async fn test_lifecycle_is_independent_per_instance() -> Result<(), Box<dyn std::error::Error>> {
    let (socket_addr, simulator, _server_handle) = start_test_server(2).await?;

    let mut config = Config::default();
    config.bridge.pacing = Pacing::None;
    config.logging.file = None;
    config.servers = vec![ServerConfig {
        host: "127.0.0.1".to_string(),
        port: socket_addr.port(),
        unit_id: 1,
        write_registers: RegisterList::List(vec![1]),
        input_indexes: vec![0],
        read_registers: RegisterList::default(),
        output_offset: 0,
    }];

    let mut first = Lifecycle::with_tcp(config.clone());
    let mut second = Lifecycle::new(config, Arc::new(connector()));
    let mut first_data = ExchangeData::from([("main".to_string(), ExchangeVector::new(vec![1.0], 0))]);
    let mut second_data = ExchangeData::from([("main".to_string(), ExchangeVector::new(vec![2.0], 0))]);

    first.on_init(&mut first_data).await?;
    second.on_init(&mut second_data).await?;

    first.on_step_end(&mut first_data).await?;
    assert_eq!(simulator.register(0), Some(10));
    first.on_finalize(&mut first_data).await;

    // Finalizing one run leaves the other connected
    second.on_step_end(&mut second_data).await?;
    assert_eq!(simulator.register(0), Some(20));
    second.on_finalize(&mut second_data).await;
    Ok(())
}
