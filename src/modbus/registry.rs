// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the sim-modbus-bridge project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! The set of endpoints of one simulation run
//!
//! A registry is built from the configured descriptors at initialization and
//! dropped at finalization; re-initializing builds a fresh one. Endpoints that
//! fail to connect stay in the registry so that their failures show up in
//! every step report.

use futures::future::join_all;
use log::{info, warn};

use super::descriptor::{validate_layout, ServerDescriptor};
use super::endpoint::DeviceEndpoint;
use super::transport::Connector;
use crate::error::ConfigError;

#[derive(Debug, Default)]
pub struct EndpointRegistry {
    endpoints: Vec<DeviceEndpoint>,
}

impl EndpointRegistry {
    /// Build one endpoint per descriptor, in order, without connecting.
    pub fn build(descriptors: Vec<ServerDescriptor>) -> Result<Self, ConfigError> {
        validate_layout(&descriptors)?;
        Ok(Self {
            endpoints: descriptors.into_iter().map(DeviceEndpoint::new).collect(),
        })
    }

    /// Connect every endpoint; failures are logged and do not stop the others.
    ///
    /// Returns the number of connected endpoints.
    pub async fn connect_all(&mut self, connector: &dyn Connector, concurrent: bool) -> usize {
        if concurrent {
            join_all(
                self.endpoints
                    .iter_mut()
                    .map(|endpoint| endpoint.connect(connector)),
            )
            .await;
        } else {
            for endpoint in &mut self.endpoints {
                // failure already logged by the endpoint
                let _ = endpoint.connect(connector).await;
            }
        }

        let connected = self.connected_count();
        if connected < self.endpoints.len() {
            warn!(
                "{} of {} Modbus servers unreachable, continuing degraded",
                self.endpoints.len() - connected,
                self.endpoints.len()
            );
        } else {
            info!("All {} Modbus servers connected", connected);
        }
        connected
    }

    /// Close every endpoint, always attempting all of them.
    pub async fn close_all(&mut self) {
        for endpoint in &mut self.endpoints {
            endpoint.close().await;
        }
    }

    pub fn endpoints(&self) -> &[DeviceEndpoint] {
        &self.endpoints
    }

    pub fn endpoints_mut(&mut self) -> &mut [DeviceEndpoint] {
        &mut self.endpoints
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    pub fn connected_count(&self) -> usize {
        self.endpoints.iter().filter(|e| e.is_connected()).count()
    }
}
