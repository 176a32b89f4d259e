// DME Telemetry - Random-walk updater
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Bounded random walk over the volatile metrics.
//!
//! Each cycle draws an independent delta per volatile metric from
//! `[-step, step]`, adds it and clamps back into `[min, max]`. Only the draw
//! is random; the clamp is a pure function of the pre-clamp value.

use crate::schema::{Metric, Volatility};
use crate::store::MetricStore;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// `max(min, min(max, value))`
pub fn clamp(value: i64, min: i64, max: i64) -> i64 {
    value.min(max).max(min)
}

/// Outcome of one update cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateReport {
    /// Volatile metrics visited
    pub updated: usize,
    /// Metrics whose raw sum left the range and was clamped
    pub clamped: usize,
}

/// Perturbs volatile metrics of a [`MetricStore`]
#[derive(Debug)]
pub struct Updater {
    rng: StdRng,
}

impl Updater {
    /// Updater seeded from OS entropy
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    /// Reproducible updater
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Run one cycle with random deltas
    pub fn step(&mut self, store: &MetricStore) -> UpdateReport {
        let rng = &mut self.rng;
        Self::step_with(store, |_, step| rng.gen_range(-step..=step))
    }

    /// Run one cycle with caller-chosen deltas.
    ///
    /// `delta` receives each volatile metric and its step bound. Static
    /// metrics are never passed to it.
    pub fn step_with<F>(store: &MetricStore, mut delta: F) -> UpdateReport
    where
        F: FnMut(&Metric, i64) -> i64,
    {
        let mut report = UpdateReport::default();
        for metric in store.schema().iter() {
            let step = match metric.volatility {
                Volatility::Volatile { step } => step,
                Volatility::Static => continue,
            };
            let d = delta(metric, step);
            // Only known OIDs are iterated, so the store lookup cannot miss.
            let Ok(before) = store.get_by_oid(&metric.oid) else {
                continue;
            };
            if let Ok(after) = store.apply_delta(&metric.oid, d) {
                report.updated += 1;
                if after != before.saturating_add(d) {
                    report.clamped += 1;
                }
            }
        }
        report
    }
}

impl Default for Updater {
    fn default() -> Self {
        Self::new()
    }
}
