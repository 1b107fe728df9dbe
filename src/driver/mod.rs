// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the sim-modbus-bridge project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Replay driver
//!
//! Plays recorded (or synthetic) input frames through any
//! [`SimulationHooks`] implementation, calling the hooks in the order a
//! simulation engine would, and collects the output vector after each step.
//!
//! Frames are stored as JSON lines, one array of numbers per step:
//!
//! ```text
//! [21.5, 0.0, 19.2, 45.0]
//! [21.6, 0.0, 19.4, 45.0]
//! ```

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use log::{debug, info};

use crate::exchange::{ExchangeData, ExchangeVector, StepReport};
use crate::lifecycle::SimulationHooks;

/// One step worth of simulation inputs.
pub type Frame = Vec<f64>;

/// Read frames from a JSON lines file. Blank lines are ignored.
pub fn load_frames<P: AsRef<Path>>(path: P) -> Result<Vec<Frame>> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read input frames from {:?}", path))?;

    contents
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(number, line)| {
            serde_json::from_str::<Frame>(line)
                .with_context(|| format!("Invalid frame at {}:{}", path.display(), number + 1))
        })
        .collect()
}

/// `steps` frames of `width` values ramping up by one per step.
///
/// Value `i` of frame `k` is `k + i / 10`.
pub fn synthetic_frames(steps: usize, width: usize) -> Vec<Frame> {
    (0..steps)
        .map(|k| (0..width).map(|i| k as f64 + i as f64 / 10.0).collect())
        .collect()
}

/// What a replay produced.
#[derive(Debug, Clone, Default)]
pub struct ReplayOutcome {
    /// Output vector after each step.
    pub outputs: Vec<Vec<f64>>,
    pub reports: Vec<StepReport>,
}

/// Drives a simulation run over a list of frames.
#[derive(Debug, Clone)]
pub struct ReplayDriver {
    model: String,
    outputs_len: usize,
}

impl ReplayDriver {
    pub fn new(model: impl Into<String>, outputs_len: usize) -> Self {
        Self {
            model: model.into(),
            outputs_len,
        }
    }

    /// Run `frames` through `hooks`.
    ///
    /// The final callback is always made once initialization succeeded, even
    /// when a step fails.
    pub async fn run<H>(&self, hooks: &mut H, frames: &[Frame]) -> Result<ReplayOutcome>
    where
        H: SimulationHooks + ?Sized,
    {
        let mut data = ExchangeData::from([(
            self.model.clone(),
            ExchangeVector::new(Vec::new(), self.outputs_len),
        )]);

        hooks
            .initialization(&mut data)
            .await
            .context("Bridge initialization failed")?;
        hooks.start_time(&mut data).await;
        info!("Replaying {} frames for model '{}'", frames.len(), self.model);

        let mut outcome = ReplayOutcome::default();
        for (index, frame) in frames.iter().enumerate() {
            if let Some(vector) = data.get_mut(&self.model) {
                vector.inputs.clone_from(frame);
            }
            hooks.iteration(&mut data).await;

            match hooks.end_of_time_step(&mut data).await {
                Ok(report) => {
                    let outputs = data
                        .get(&self.model)
                        .map(|vector| vector.outputs.clone())
                        .unwrap_or_default();
                    debug!("Frame {}: outputs {:?}", index + 1, outputs);
                    outcome.outputs.push(outputs);
                    outcome.reports.push(report);
                }
                Err(err) => {
                    hooks.last_call_of_simulation(&mut data).await;
                    return Err(anyhow::Error::new(err)
                        .context(format!("Simulation stopped at frame {}", index + 1)));
                }
            }
        }

        hooks.last_call_of_simulation(&mut data).await;
        Ok(outcome)
    }
}
