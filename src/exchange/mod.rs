// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the sim-modbus-bridge project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Per-timestep exchange between the simulation vector and the endpoints
//!
//! For each endpoint, in registry order:
//!
//! 1. the configured input indexes select values from `inputs` (indexes past
//!    the end are skipped),
//! 2. the selected values are encoded and written,
//! 3. when read registers are configured they are read back after the write,
//!    whatever its outcome, and land unscaled in `outputs` starting at the
//!    endpoint's output offset.
//!
//! Endpoints run one after the other, or as concurrent futures when the
//! adapter is built with `concurrent`. In both modes `outputs` is only
//! touched once every endpoint has finished, and one endpoint's failure
//! never stops another.

pub mod report;

use std::collections::HashMap;
use std::time::Duration;

use futures::future::join_all;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use tokio::time::{timeout_at, Instant};

use crate::codec::RegisterCodec;
use crate::config::BridgeConfig;
use crate::error::EndpointError;
use crate::modbus::{BatchPolicy, DeviceEndpoint, EndpointRegistry, EndpointState, ReadBatch};

pub use report::{EndpointReport, StepIssue, StepReport};

/// Values shared with the simulation for one model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExchangeVector {
    /// Values produced by the simulation, read-only for the bridge.
    pub inputs: Vec<f64>,
    /// Values fed back to the simulation. Slots no endpoint reads into keep
    /// their previous value.
    pub outputs: Vec<f64>,
}

impl ExchangeVector {
    pub fn new(inputs: Vec<f64>, outputs_len: usize) -> Self {
        Self {
            inputs,
            outputs: vec![0.0; outputs_len],
        }
    }
}

/// Exchange vectors keyed by simulation model name.
pub type ExchangeData = HashMap<String, ExchangeVector>;

/// Pick `inputs[i]` for every index, in order.
///
/// Returns the selected values and the indexes that were out of range.
pub fn select_inputs(inputs: &[f64], indexes: &[usize]) -> (Vec<f64>, Vec<usize>) {
    let mut selected = Vec::with_capacity(indexes.len());
    let mut skipped = Vec::new();
    for &index in indexes {
        match inputs.get(index) {
            Some(&value) => selected.push(value),
            None => skipped.push(index),
        }
    }
    (selected, skipped)
}

/// Store read-back values at `outputs[offset + k]`.
///
/// Missing values (`None`) leave the slot untouched. Returns the updated
/// and the out-of-range output indices.
pub fn apply_readback(
    outputs: &mut [f64],
    offset: usize,
    values: &[Option<i16>],
) -> (Vec<usize>, Vec<usize>) {
    let mut updated = Vec::new();
    let mut skipped = Vec::new();
    for (k, value) in values.iter().enumerate() {
        let Some(value) = value else { continue };
        let Some(index) = offset.checked_add(k) else {
            break;
        };
        match outputs.get_mut(index) {
            Some(slot) => {
                *slot = f64::from(*value);
                updated.push(index);
            }
            None => skipped.push(index),
        }
    }
    (updated, skipped)
}

/// Result of one endpoint's work, applied to `outputs` after the fan-in.
struct EndpointOutcome {
    report: EndpointReport,
    readback: Option<(usize, ReadBatch)>,
}

impl EndpointOutcome {
    fn failed(endpoint: &str, error: EndpointError) -> Self {
        let mut report = EndpointReport::new(endpoint);
        report.errors.push(error);
        Self {
            report,
            readback: None,
        }
    }

    fn deadline(endpoint: &str) -> Self {
        Self::failed(
            endpoint,
            EndpointError::Deadline {
                endpoint: endpoint.to_string(),
            },
        )
    }
}

/// Runs the per-step protocol over a registry.
#[derive(Debug, Clone)]
pub struct ExchangeAdapter {
    codec: RegisterCodec,
    write_policy: BatchPolicy,
    read_policy: BatchPolicy,
    concurrent: bool,
    step_deadline: Option<Duration>,
}

impl Default for ExchangeAdapter {
    fn default() -> Self {
        Self {
            codec: RegisterCodec::default(),
            write_policy: BatchPolicy::BestEffort,
            read_policy: BatchPolicy::AbortOnFirst,
            concurrent: false,
            step_deadline: None,
        }
    }
}

impl ExchangeAdapter {
    pub fn from_config(config: &BridgeConfig) -> Self {
        Self {
            codec: RegisterCodec::new(config.overflow),
            write_policy: config.write_policy,
            read_policy: config.read_policy,
            concurrent: config.concurrent,
            step_deadline: config.step_deadline_ms.map(Duration::from_millis),
        }
    }

    pub fn with_codec(mut self, codec: RegisterCodec) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_policies(mut self, write_policy: BatchPolicy, read_policy: BatchPolicy) -> Self {
        self.write_policy = write_policy;
        self.read_policy = read_policy;
        self
    }

    pub fn concurrent(mut self, concurrent: bool) -> Self {
        self.concurrent = concurrent;
        self
    }

    pub fn with_step_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.step_deadline = deadline;
        self
    }

    /// Exchange one step with every endpoint of the registry.
    ///
    /// Returns one report per endpoint, in registry order.
    pub async fn run_step(
        &self,
        registry: &mut EndpointRegistry,
        vector: &mut ExchangeVector,
    ) -> Vec<EndpointReport> {
        let deadline = self.step_deadline.map(|budget| Instant::now() + budget);
        let inputs = vector.inputs.as_slice();

        let outcomes = if self.concurrent {
            join_all(
                registry
                    .endpoints_mut()
                    .iter_mut()
                    .map(|endpoint| self.bounded(endpoint, inputs, deadline)),
            )
            .await
        } else {
            let mut outcomes = Vec::with_capacity(registry.len());
            for endpoint in registry.endpoints_mut() {
                if deadline.is_some_and(|at| Instant::now() >= at) {
                    warn!("{}: skipped, step deadline already passed", endpoint.label());
                    outcomes.push(EndpointOutcome::deadline(endpoint.label()));
                    continue;
                }
                outcomes.push(self.bounded(endpoint, inputs, deadline).await);
            }
            outcomes
        };

        outcomes
            .into_iter()
            .map(|outcome| {
                let mut report = outcome.report;
                if let Some((offset, batch)) = outcome.readback {
                    let (updated, skipped) =
                        apply_readback(&mut vector.outputs, offset, &batch.values);
                    if !skipped.is_empty() {
                        warn!(
                            "{}: output indices {:?} beyond {} outputs, values dropped",
                            report.endpoint,
                            skipped,
                            vector.outputs.len()
                        );
                    }
                    report.outputs_updated = updated;
                    report.skipped_outputs = skipped;
                }
                report
            })
            .collect()
    }

    /// One endpoint's exchange, abandoned at the deadline if there is one.
    async fn bounded(
        &self,
        endpoint: &mut DeviceEndpoint,
        inputs: &[f64],
        deadline: Option<Instant>,
    ) -> EndpointOutcome {
        let Some(at) = deadline else {
            return self.exchange_with(endpoint, inputs).await;
        };

        let result = timeout_at(at, self.exchange_with(&mut *endpoint, inputs)).await;
        match result {
            Ok(outcome) => outcome,
            Err(_) => {
                endpoint.discard_connection();
                EndpointOutcome::deadline(endpoint.label())
            }
        }
    }

    async fn exchange_with(
        &self,
        endpoint: &mut DeviceEndpoint,
        inputs: &[f64],
    ) -> EndpointOutcome {
        let label = endpoint.label().to_string();
        match endpoint.state() {
            EndpointState::Connected => {}
            EndpointState::Unconnected => {
                debug!("{label}: not connected, skipped");
                let error = EndpointError::NotConnected {
                    endpoint: label.clone(),
                };
                return EndpointOutcome::failed(&label, error);
            }
            EndpointState::Closed => {
                let error = EndpointError::Closed {
                    endpoint: label.clone(),
                };
                return EndpointOutcome::failed(&label, error);
            }
        }

        let descriptor = endpoint.descriptor();
        let (values, skipped) = select_inputs(inputs, &descriptor.input_indexes);
        let reads_back = !descriptor.is_write_only();
        let offset = descriptor.output_offset;
        if !skipped.is_empty() {
            debug!(
                "{label}: input indexes {:?} out of range for {} inputs, skipped",
                skipped,
                inputs.len()
            );
        }

        let mut report = EndpointReport::new(&label);
        report.skipped_inputs = skipped;

        match endpoint
            .write_batch(&values, &self.codec, self.write_policy)
            .await
        {
            Ok(written) => report.written = written,
            Err(err) => report.errors.push(err),
        }

        if !reads_back {
            return EndpointOutcome {
                report,
                readback: None,
            };
        }

        match endpoint.read_batch(self.read_policy).await {
            Ok(mut batch) => {
                report.read = batch.values.iter().filter(|v| v.is_some()).count();
                if !batch.is_complete() {
                    report.errors.push(EndpointError::Read {
                        endpoint: label,
                        failures: std::mem::take(&mut batch.failures),
                    });
                }
                EndpointOutcome {
                    report,
                    readback: Some((offset, batch)),
                }
            }
            Err(err) => {
                report.errors.push(err);
                EndpointOutcome {
                    report,
                    readback: None,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modbus::{MemoryConnector, ServerDescriptor};

    #[test]
    fn select_inputs_follows_index_order() {
        let inputs = [10.0, 20.0, 30.0, 40.0, 50.0, 60.0, 70.0, 80.0];
        assert_eq!(select_inputs(&inputs, &[5, 7]), (vec![60.0, 80.0], vec![]));
        assert_eq!(select_inputs(&inputs, &[7, 0]), (vec![80.0, 10.0], vec![]));
    }

    #[test]
    fn select_inputs_skips_out_of_range_indexes() {
        let inputs = [0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0];
        assert_eq!(select_inputs(&inputs, &[2, 99]), (vec![2.0], vec![99]));
        assert_eq!(select_inputs(&[], &[0]), (vec![], vec![0]));
    }

    #[test]
    fn readback_keeps_missing_slots_and_drops_overflow() {
        let mut outputs = vec![1.0, 1.0, 1.0];
        let (updated, skipped) = apply_readback(&mut outputs, 1, &[Some(-2), None, Some(9)]);
        assert_eq!(outputs, vec![1.0, -2.0, 1.0]);
        assert_eq!(updated, vec![1]);
        assert_eq!(skipped, vec![3]);
    }

    #[test]
    fn readback_at_the_top_of_usize_does_not_panic() {
        let mut outputs = vec![0.0, 0.0];
        let (updated, skipped) =
            apply_readback(&mut outputs, usize::MAX, &[Some(7), Some(8), Some(9)]);
        assert!(updated.is_empty());
        assert_eq!(skipped, vec![usize::MAX]);
        assert_eq!(outputs, vec![0.0, 0.0]);
    }

    #[tokio::test]
    async fn unconnected_endpoint_reports_without_touching_outputs() {
        let descriptors = vec![ServerDescriptor::new("plc", 502)
            .with_writes(vec![1], vec![0])
            .with_reads(vec![2])];
        let mut registry = EndpointRegistry::build(descriptors).expect("valid descriptors");
        let mut vector = ExchangeVector {
            inputs: vec![1.0],
            outputs: vec![42.0],
        };

        let reports = ExchangeAdapter::default()
            .run_step(&mut registry, &mut vector)
            .await;

        assert_eq!(vector.outputs, vec![42.0]);
        assert_eq!(
            reports[0].errors,
            vec![EndpointError::NotConnected {
                endpoint: "plc:502".to_string()
            }]
        );
    }

    #[tokio::test]
    async fn best_effort_reads_fill_the_slots_that_succeeded() {
        let descriptors = vec![ServerDescriptor::new("plc", 502).with_reads(vec![1, 2])];
        let connector = MemoryConnector::from_descriptors(&descriptors);
        connector.set_register("plc", 502, 1, 77);
        connector.fail_read("plc", 502, 0);

        let mut registry = EndpointRegistry::build(descriptors).expect("valid descriptors");
        registry.connect_all(&connector, false).await;
        let mut vector = ExchangeVector {
            inputs: vec![],
            outputs: vec![5.0, 5.0],
        };

        let reports = ExchangeAdapter::default()
            .with_policies(BatchPolicy::BestEffort, BatchPolicy::BestEffort)
            .run_step(&mut registry, &mut vector)
            .await;

        assert_eq!(vector.outputs, vec![5.0, 77.0]);
        assert_eq!(reports[0].read, 1);
        assert_eq!(reports[0].outputs_updated, vec![1]);
        assert!(!reports[0].is_clean());
    }
}
