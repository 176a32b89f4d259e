// DME Telemetry - Metric store
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Single-owner store of current metric values
//!
//! Every read and every mutation goes through one exclusive lock, so a
//! snapshot never observes a half-applied update and no update is lost.
//! The lock is never held across I/O.

use crate::error::StoreError;
use crate::schema::{Metric, MetricSet, Oid};
use std::sync::{Arc, Mutex, MutexGuard};

/// Consistent copy of every value, in canonical order
#[derive(Debug, Clone)]
pub struct Snapshot {
    values: Vec<i64>,
    schema: Arc<MetricSet>,
    oid_order: Arc<[usize]>,
}

impl Snapshot {
    /// Values in canonical order
    pub fn values(&self) -> &[i64] {
        &self.values
    }

    /// Value at a canonical position
    pub fn value_at(&self, index: usize) -> Option<i64> {
        self.values.get(index).copied()
    }

    /// Value for a name
    pub fn value_of(&self, name: &str) -> Option<i64> {
        self.schema
            .index_of_name(name)
            .and_then(|i| self.value_at(i))
    }

    /// `(metric, value)` pairs in canonical order
    pub fn iter(&self) -> impl Iterator<Item = (&Metric, i64)> {
        self.schema.iter().zip(self.values.iter().copied())
    }

    /// Value for an OID
    pub fn value_by_oid(&self, oid: &Oid) -> Option<i64> {
        self.schema.index_of_oid(oid).and_then(|i| self.value_at(i))
    }

    /// First metric whose OID sorts strictly after `oid`
    pub fn next_after(&self, oid: &Oid) -> Option<(&Metric, i64)> {
        let position = self
            .oid_order
            .partition_point(|&i| self.schema.get(i).map_or(false, |m| m.oid <= *oid));
        let index = *self.oid_order.get(position)?;
        Some((self.schema.get(index)?, self.value_at(index)?))
    }

    /// Number of values
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the snapshot is empty
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Thread-safe store of the current value of every metric
#[derive(Debug)]
pub struct MetricStore {
    schema: Arc<MetricSet>,
    /// Canonical positions sorted by OID
    oid_order: Arc<[usize]>,
    values: Mutex<Vec<i64>>,
}

impl MetricStore {
    /// Create a store holding each metric's initial value
    pub fn new(schema: Arc<MetricSet>) -> Self {
        let values = schema.iter().map(|m| m.initial).collect();
        let oid_order = schema.oid_order().into();
        Self {
            schema,
            oid_order,
            values: Mutex::new(values),
        }
    }

    /// Store over the built-in DME schema
    pub fn dme() -> Self {
        Self::new(Arc::new(MetricSet::dme()))
    }

    /// Schema backing this store
    pub fn schema(&self) -> &Arc<MetricSet> {
        &self.schema
    }

    fn lock(&self) -> MutexGuard<'_, Vec<i64>> {
        // Values are plain integers and are always valid, even if a writer panicked.
        self.values.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Consistent copy of all current values
    pub fn snapshot(&self) -> Snapshot {
        let values = self.lock().clone();
        Snapshot {
            values,
            schema: Arc::clone(&self.schema),
            oid_order: Arc::clone(&self.oid_order),
        }
    }

    /// Current value of a metric addressed by OID
    pub fn get_by_oid(&self, oid: &Oid) -> Result<i64, StoreError> {
        let index = self
            .schema
            .index_of_oid(oid)
            .ok_or_else(|| StoreError::UnknownMetric(oid.to_string()))?;
        Ok(self.lock()[index])
    }

    /// Current value of a metric addressed by name
    pub fn get_by_name(&self, name: &str) -> Result<i64, StoreError> {
        let index = self
            .schema
            .index_of_name(name)
            .ok_or_else(|| StoreError::UnknownMetric(name.to_string()))?;
        Ok(self.lock()[index])
    }

    /// Add `delta` to a metric and clamp it to its range; returns the new value
    pub fn apply_delta(&self, oid: &Oid, delta: i64) -> Result<i64, StoreError> {
        let (index, metric) = self
            .schema
            .index_of_oid(oid)
            .and_then(|i| self.schema.get(i).map(|m| (i, m)))
            .ok_or_else(|| StoreError::UnknownMetric(oid.to_string()))?;
        let mut values = self.lock();
        let updated = metric.clamp(values[index].saturating_add(delta));
        values[index] = updated;
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn power_oid() -> Oid {
        "1.3.6.1.4.1.32275.2.1.2.2.5.36".parse().unwrap()
    }

    #[test]
    fn test_initial_values() {
        let store = MetricStore::dme();
        assert_eq!(store.get_by_oid(&power_oid()).unwrap(), 1080);
        assert_eq!(store.get_by_name("mtuExecTransmissionRate-3").unwrap(), 840);
        assert_eq!(store.snapshot().len(), 26);
    }

    #[test]
    fn test_unknown_metric() {
        let store = MetricStore::dme();
        let oid: Oid = "1.3.6.1.4.1.32275.9.9".parse().unwrap();
        assert_eq!(
            store.get_by_oid(&oid),
            Err(StoreError::UnknownMetric(oid.to_string()))
        );
        assert!(store.get_by_name("nope").is_err());
        assert!(store.apply_delta(&oid, 1).is_err());
    }

    #[test]
    fn test_apply_delta_clamps() {
        let store = MetricStore::dme();
        assert_eq!(store.apply_delta(&power_oid(), 100).unwrap(), 1100);
        assert_eq!(store.apply_delta(&power_oid(), -500).unwrap(), 1050);
        assert_eq!(store.apply_delta(&power_oid(), 7).unwrap(), 1057);
    }

    #[test]
    fn test_static_metric_pinned() {
        let store = MetricStore::dme();
        let ident: Oid = "1.3.6.1.4.1.32275.2.1.2.2.5.17".parse().unwrap();
        assert_eq!(store.apply_delta(&ident, 3).unwrap(), 1);
    }

    #[test]
    fn test_snapshot_is_a_copy() {
        let store = MetricStore::dme();
        let before = store.snapshot();
        store.apply_delta(&power_oid(), -10).unwrap();
        assert_eq!(
            before.value_of("mtuExecTXPBTransmittedPowerCurrentValue-0"),
            Some(1080)
        );
        assert_eq!(
            store
                .snapshot()
                .value_of("mtuExecTXPBTransmittedPowerCurrentValue-0"),
            Some(1070)
        );
    }

    #[test]
    fn test_next_after_walks_in_oid_order() {
        let snapshot = MetricStore::dme().snapshot();
        let mut cursor: Oid = "1.3.6.1.4.1.32275".parse().unwrap();
        let mut seen = 0;
        while let Some((metric, value)) = snapshot.next_after(&cursor) {
            assert!(metric.oid > cursor);
            assert_eq!(snapshot.value_by_oid(&metric.oid), Some(value));
            cursor = metric.oid.clone();
            seen += 1;
        }
        assert_eq!(seen, 26);
        assert_eq!(cursor.to_string(), "1.3.6.1.4.1.32275.2.1.2.2.8.38");
    }

    #[test]
    fn test_concurrent_deltas_not_lost() {
        let schema = Arc::new(
            MetricSet::new(vec![crate::schema::Metric::volatile(
                "1.2.3".parse().unwrap(),
                "counter",
                0,
                0,
                1_000_000,
                1,
            )])
            .unwrap(),
        );
        let store = Arc::new(MetricStore::new(schema));
        let oid: Oid = "1.2.3".parse().unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                let oid = oid.clone();
                thread::spawn(move || {
                    for _ in 0..1000 {
                        store.apply_delta(&oid, 1).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.get_by_oid(&oid).unwrap(), 8000);
    }
}
