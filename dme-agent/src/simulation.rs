// DME Agent - Telemetry simulator
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Periodic driver of the random walk

use dme::{MetricStore, UpdateReport, Updater};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::debug;

/// Run one update cycle per `period`, starting one period from now
pub async fn run_updater(store: Arc<MetricStore>, period: Duration, mut updater: Updater) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately
    ticker.tick().await;

    loop {
        ticker.tick().await;
        let UpdateReport { updated, clamped } = updater.step(&store);
        debug!(updated, clamped, "metrics updated");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_updates_on_schedule() {
        let store = Arc::new(MetricStore::dme());
        let initial = store.snapshot();
        let task = tokio::spawn(run_updater(
            Arc::clone(&store),
            Duration::from_secs(180),
            Updater::seeded(5),
        ));

        // nothing happens before the first period elapses
        tokio::time::sleep(Duration::from_secs(179)).await;
        assert_eq!(store.snapshot().values(), initial.values());

        tokio::time::sleep(Duration::from_secs(2)).await;
        let after = store.snapshot();
        for (metric, value) in after.iter() {
            assert!(metric.contains(value));
            if !metric.volatility.is_volatile() {
                assert_eq!(Some(value), initial.value_of(&metric.name));
            }
        }

        task.abort();
    }
}
