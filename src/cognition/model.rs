//! Health metrics and the derived state vector.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

use crate::config::HealthTuning;

/// How many latency samples the ring retains.
const LATENCY_CAPACITY: usize = 100;
/// Disconnects older than this no longer count against connectivity.
const DISCONNECT_WINDOW: Duration = Duration::from_secs(3600);

/// Normalized health snapshot. Each component is re-derived from raw metrics
/// on every tick, never mutated in place.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StateVector {
    /// Connectivity: decays with each disconnect inside the window.
    pub c: f64,
    /// Performance: inverse of mean recent round-trip latency.
    pub p: f64,
    /// Integrity: decays with cumulative unhandled errors.
    pub i: f64,
}

impl StateVector {
    pub const IDEAL: StateVector = StateVector {
        c: 1.0,
        p: 1.0,
        i: 1.0,
    };

    /// Euclidean distance to another vector.
    pub fn distance(&self, other: &StateVector) -> f64 {
        ((other.c - self.c).powi(2) + (other.p - self.p).powi(2) + (other.i - self.i).powi(2))
            .sqrt()
    }
}

#[derive(Debug, Clone)]
struct DisconnectEvent {
    at: Instant,
    reason: Option<u16>,
}

/// Rolling raw metrics. Written by the supervisor (disconnects, latencies)
/// and the dispatcher (errors); read only through [`compute_vector`].
///
/// [`compute_vector`]: HealthModel::compute_vector
#[derive(Debug)]
pub struct HealthModel {
    tuning: HealthTuning,
    disconnects: VecDeque<DisconnectEvent>,
    latencies: VecDeque<f64>,
    errors: u64,
}

impl Default for HealthModel {
    fn default() -> Self {
        Self::new(HealthTuning::default())
    }
}

impl HealthModel {
    pub fn new(tuning: HealthTuning) -> Self {
        Self {
            tuning,
            disconnects: VecDeque::new(),
            latencies: VecDeque::new(),
            errors: 0,
        }
    }

    pub fn record_disconnect(&mut self, reason: Option<u16>) {
        self.disconnects.push_back(DisconnectEvent {
            at: Instant::now(),
            reason,
        });
    }

    pub fn record_latency(&mut self, ms: f64) {
        if self.latencies.len() >= LATENCY_CAPACITY {
            self.latencies.pop_front();
        }
        self.latencies.push_back(ms);
    }

    pub fn record_error(&mut self) {
        self.errors += 1;
    }

    pub fn error_count(&self) -> u64 {
        self.errors
    }

    /// Disconnect reasons still inside the lookback window, oldest first.
    pub fn recent_disconnect_reasons(&self) -> Vec<Option<u16>> {
        let now = Instant::now();
        self.disconnects
            .iter()
            .filter(|d| now.duration_since(d.at) < DISCONNECT_WINDOW)
            .map(|d| d.reason)
            .collect()
    }

    /// Derive the current state vector. Prunes expired disconnect events as a
    /// side effect; everything else is a pure function of the metrics.
    pub fn compute_vector(&mut self) -> StateVector {
        let now = Instant::now();
        while let Some(front) = self.disconnects.front() {
            if now.duration_since(front.at) >= DISCONNECT_WINDOW {
                self.disconnects.pop_front();
            } else {
                break;
            }
        }

        let recent = self.disconnects.len() as f64;
        let c = (-self.tuning.disconnect_decay * recent).exp();

        // No samples means nothing has been slow yet: maximal performance.
        let p = if self.latencies.is_empty() {
            1.0
        } else {
            let avg = self.latencies.iter().sum::<f64>() / self.latencies.len() as f64;
            (1.0 - avg / self.tuning.latency_floor_ms).max(0.0)
        };

        let i = (-self.tuning.error_decay * self.errors as f64).exp();

        StateVector { c, p, i }
    }
}
