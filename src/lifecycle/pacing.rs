// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the sim-modbus-bridge project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Wall-clock pacing of simulation steps

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How long `on_step_end` holds the simulation after the exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Pacing {
    /// Return immediately.
    None,
    /// Sleep a fixed time after every exchange.
    FixedDelay { delay_ms: u64 },
    /// Keep one step per period, exchange time included.
    Cadence { period_ms: u64 },
}

impl Default for Pacing {
    fn default() -> Self {
        Pacing::FixedDelay { delay_ms: 1000 }
    }
}

impl Pacing {
    /// Time left to wait after an exchange that took `elapsed`.
    pub fn remaining(&self, elapsed: Duration) -> Duration {
        match *self {
            Pacing::None => Duration::ZERO,
            Pacing::FixedDelay { delay_ms } => Duration::from_millis(delay_ms),
            Pacing::Cadence { period_ms } => Duration::from_millis(period_ms).saturating_sub(elapsed),
        }
    }

    pub async fn wait(&self, elapsed: Duration) {
        let remaining = self.remaining(elapsed);
        if !remaining.is_zero() {
            tokio::time::sleep(remaining).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remaining_time_per_mode() {
        let elapsed = Duration::from_millis(300);
        assert_eq!(Pacing::None.remaining(elapsed), Duration::ZERO);
        assert_eq!(
            Pacing::FixedDelay { delay_ms: 1000 }.remaining(elapsed),
            Duration::from_secs(1)
        );
        assert_eq!(
            Pacing::Cadence { period_ms: 1000 }.remaining(elapsed),
            Duration::from_millis(700)
        );
        assert_eq!(
            Pacing::Cadence { period_ms: 100 }.remaining(elapsed),
            Duration::ZERO
        );
    }

    #[test]
    fn pacing_is_tagged_by_mode() {
        let pacing: Pacing =
            serde_json::from_str(r#"{"mode":"cadence","period_ms":60000}"#).expect("valid pacing");
        assert_eq!(pacing, Pacing::Cadence { period_ms: 60000 });
        assert_eq!(
            serde_json::to_string(&Pacing::None).expect("serializable"),
            r#"{"mode":"none"}"#
        );
    }

    #[tokio::test(start_paused = true)]
    async fn fixed_delay_sleeps_the_full_delay() {
        let start = tokio::time::Instant::now();
        Pacing::FixedDelay { delay_ms: 250 }
            .wait(Duration::from_millis(10))
            .await;
        assert!(start.elapsed() >= Duration::from_millis(250));
    }
}
