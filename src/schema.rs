// DME Telemetry - Metric schema
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Metric schema
//!
//! A [`MetricSet`] is built once at startup and never resized. Its order is
//! the canonical column order of every record the collector produces.

use crate::error::SchemaError;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Enterprise subtree of the simulated DME (`1.3.6.1.4.1.32275`)
pub const DME_ENTERPRISE: &[u32] = &[1, 3, 6, 1, 4, 1, 32275];

/// Object identifier, a dotted numeric path
///
/// Ordering is lexicographic by component, so `1.3.6.1.10` sorts after
/// `1.3.6.1.9` and a prefix sorts before all of its descendants.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Oid(Vec<u32>);

impl Oid {
    /// Build from components
    pub fn new(components: impl Into<Vec<u32>>) -> Self {
        Self(components.into())
    }

    /// Components of the identifier
    pub fn components(&self) -> &[u32] {
        &self.0
    }

    /// Number of components
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the identifier has no component
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether `self` lies inside the subtree rooted at `prefix`
    pub fn starts_with(&self, prefix: &Oid) -> bool {
        self.0.starts_with(&prefix.0)
    }

    /// Extend with one more component
    pub fn child(&self, component: u32) -> Self {
        let mut components = self.0.clone();
        components.push(component);
        Self(components)
    }
}

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for component in &self.0 {
            if !first {
                f.write_str(".")?;
            }
            write!(f, "{}", component)?;
            first = false;
        }
        Ok(())
    }
}

impl FromStr for Oid {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim().trim_start_matches('.');
        if trimmed.is_empty() {
            return Err(SchemaError::InvalidOid(s.to_string()));
        }
        trimmed
            .split('.')
            .map(|part| part.parse::<u32>())
            .collect::<Result<Vec<_>, _>>()
            .map(Oid)
            .map_err(|_| SchemaError::InvalidOid(s.to_string()))
    }
}

impl Serialize for Oid {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Whether a metric takes part in the random walk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Volatility {
    /// Perturbed by a delta drawn from `[-step, step]` on each update
    Volatile { step: i64 },
    /// Never touched by the updater
    Static,
}

impl Volatility {
    /// Check if the updater should perturb this metric
    pub fn is_volatile(&self) -> bool {
        matches!(self, Volatility::Volatile { .. })
    }
}

/// One named telemetry point
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Metric {
    /// Protocol-addressable key
    pub oid: Oid,
    /// Human-readable name, also the durable-log column name
    pub name: String,
    /// Value at startup
    pub initial: i64,
    /// Inclusive lower bound
    pub min: i64,
    /// Inclusive upper bound
    pub max: i64,
    /// Random-walk participation
    pub volatility: Volatility,
}

impl Metric {
    /// A metric perturbed by at most `step` per update, kept inside `[min, max]`
    ///
    /// `step` must be non-negative; [`MetricSet::new`] rejects it otherwise.
    pub fn volatile(
        oid: Oid,
        name: impl Into<String>,
        initial: i64,
        min: i64,
        max: i64,
        step: i64,
    ) -> Self {
        Self {
            oid,
            name: name.into(),
            initial,
            min,
            max,
            volatility: Volatility::Volatile { step },
        }
    }

    /// A metric that keeps its initial value
    pub fn fixed(oid: Oid, name: impl Into<String>, initial: i64) -> Self {
        Self {
            oid,
            name: name.into(),
            initial,
            min: initial,
            max: initial,
            volatility: Volatility::Static,
        }
    }

    /// Clamp a candidate value into the declared range
    pub fn clamp(&self, value: i64) -> i64 {
        crate::updater::clamp(value, self.min, self.max)
    }

    /// Check if a value is inside the declared range
    pub fn contains(&self, value: i64) -> bool {
        (self.min..=self.max).contains(&value)
    }
}

/// Fixed, ordered collection of metrics
#[derive(Debug, Clone)]
pub struct MetricSet {
    metrics: Vec<Metric>,
    by_oid: HashMap<Oid, usize>,
    by_name: HashMap<String, usize>,
}

impl MetricSet {
    /// Build a set, validating uniqueness and ranges
    pub fn new(metrics: Vec<Metric>) -> Result<Self, SchemaError> {
        let mut by_oid = HashMap::with_capacity(metrics.len());
        let mut by_name = HashMap::with_capacity(metrics.len());

        for (index, metric) in metrics.iter().enumerate() {
            if metric.min > metric.max {
                return Err(SchemaError::EmptyRange {
                    name: metric.name.clone(),
                    min: metric.min,
                    max: metric.max,
                });
            }
            if !metric.contains(metric.initial) {
                return Err(SchemaError::InitialOutOfRange {
                    name: metric.name.clone(),
                    value: metric.initial,
                    min: metric.min,
                    max: metric.max,
                });
            }
            if let Volatility::Volatile { step } = metric.volatility {
                if step < 0 {
                    return Err(SchemaError::NegativeStep {
                        name: metric.name.clone(),
                        step,
                    });
                }
            }
            if by_oid.insert(metric.oid.clone(), index).is_some() {
                return Err(SchemaError::DuplicateOid(metric.oid.to_string()));
            }
            if by_name.insert(metric.name.clone(), index).is_some() {
                return Err(SchemaError::DuplicateName(metric.name.clone()));
            }
        }

        Ok(Self {
            metrics,
            by_oid,
            by_name,
        })
    }

    /// Number of metrics
    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    /// Whether the set has no metric
    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    /// Metrics in canonical order
    pub fn iter(&self) -> impl Iterator<Item = &Metric> {
        self.metrics.iter()
    }

    /// Metric at a canonical position
    pub fn get(&self, index: usize) -> Option<&Metric> {
        self.metrics.get(index)
    }

    /// Canonical position of an OID
    pub fn index_of_oid(&self, oid: &Oid) -> Option<usize> {
        self.by_oid.get(oid).copied()
    }

    /// Canonical position of a name
    pub fn index_of_name(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    /// Look up by OID
    pub fn by_oid(&self, oid: &Oid) -> Option<&Metric> {
        self.index_of_oid(oid).map(|i| &self.metrics[i])
    }

    /// Look up by name
    pub fn by_name(&self, name: &str) -> Option<&Metric> {
        self.index_of_name(name).map(|i| &self.metrics[i])
    }

    /// Metric names in canonical order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.metrics.iter().map(|m| m.name.as_str())
    }

    /// OIDs in canonical order
    pub fn oids(&self) -> Vec<Oid> {
        self.metrics.iter().map(|m| m.oid.clone()).collect()
    }

    /// Canonical positions sorted by OID, used for next/bulk iteration
    pub fn oid_order(&self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.metrics.len()).collect();
        order.sort_by(|a, b| self.metrics[*a].oid.cmp(&self.metrics[*b].oid));
        order
    }

    /// The simulated DME: 26 metrics, 12 of them volatile
    pub fn dme() -> Self {
        // Constants below satisfy every check in `new`.
        match Self::new(dme_metrics()) {
            Ok(set) => set,
            Err(e) => unreachable!("built-in DME schema is invalid: {e}"),
        }
    }
}

/// OID under `1.3.6.1.4.1.32275.2.1.2.2.<transponder>.<column>`
fn dme_oid(transponder: u32, column: u32) -> Oid {
    let mut components = DME_ENTERPRISE.to_vec();
    components.extend_from_slice(&[2, 1, 2, 2, transponder, column]);
    Oid(components)
}

fn dme_metrics() -> Vec<Metric> {
    let mut metrics = Vec::with_capacity(26);

    // (column A, column B, stem, B initial per transponder, B range per transponder, step)
    // Transponder 0 lives under .5, transponder 3 under .8; channel A is idle.
    let pairs: [(u32, u32, &str, [i64; 2], [(i64, i64); 2], i64); 5] = [
        (10, 34, "DelayCurrentValue", [49200, 49200], [(49000, 49400), (49000, 49400)], 50),
        (11, 35, "PulsePairSpacing", [12000, 12000], [(12000, 12000), (12000, 12000)], 0),
        (12, 36, "TransmittedPowerCurrentValue", [1080, 1125], [(1050, 1100), (1100, 1150)], 5),
        (13, 37, "Efficiency", [90, 91], [(85, 95), (85, 95)], 2),
        (14, 38, "TxFreqError", [2, 2], [(0, 5), (0, 5)], 1),
    ];

    for (col_a, col_b, stem, b_initial, b_range, step) in pairs {
        for (slot, (transponder, suffix)) in [(5u32, 0u8), (8u32, 3u8)].into_iter().enumerate() {
            metrics.push(Metric::fixed(
                dme_oid(transponder, col_a),
                format!("mtuExecTXPA{stem}-{suffix}"),
                0,
            ));
            let name = format!("mtuExecTXPB{stem}-{suffix}");
            let (min, max) = b_range[slot];
            if step > 0 {
                metrics.push(Metric::volatile(
                    dme_oid(transponder, col_b),
                    name,
                    b_initial[slot],
                    min,
                    max,
                    step,
                ));
            } else {
                metrics.push(Metric::fixed(dme_oid(transponder, col_b), name, b_initial[slot]));
            }
        }
    }

    metrics.push(Metric::volatile(dme_oid(5, 15), "mtuExecRadiatedPowerCurrentValue-0", 980, 950, 1010, 10));
    metrics.push(Metric::volatile(dme_oid(8, 15), "mtuExecRadiatedPowerCurrentValue-3", 970, 950, 1010, 10));
    metrics.push(Metric::volatile(dme_oid(5, 16), "mtuExecTransmissionRate-0", 840, 820, 860, 5));
    metrics.push(Metric::volatile(dme_oid(8, 16), "mtuExecTransmissionRate-3", 840, 820, 860, 5));
    metrics.push(Metric::fixed(dme_oid(5, 17), "mtuExecIdentStatus-0", 1));
    metrics.push(Metric::fixed(dme_oid(8, 17), "mtuExecIdentStatus-3", 1));

    metrics
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_oid_parse_display() {
        let oid: Oid = "1.3.6.1.4.1.32275.2.1.2.2.5.36".parse().unwrap();
        assert_eq!(oid.len(), 13);
        assert_eq!(oid.to_string(), "1.3.6.1.4.1.32275.2.1.2.2.5.36");

        let leading: Oid = ".1.3.6".parse().unwrap();
        assert_eq!(leading.to_string(), "1.3.6");
    }

    #[test]
    fn test_oid_parse_rejects_garbage() {
        assert!("".parse::<Oid>().is_err());
        assert!("1.3.x".parse::<Oid>().is_err());
        assert!("1..3".parse::<Oid>().is_err());
        assert!("1.-3".parse::<Oid>().is_err());
    }

    #[test]
    fn test_oid_ordering() {
        let a: Oid = "1.3.6.1.9".parse().unwrap();
        let b: Oid = "1.3.6.1.10".parse().unwrap();
        let prefix: Oid = "1.3.6.1".parse().unwrap();
        assert!(a < b);
        assert!(prefix < a);
        assert!(a.starts_with(&prefix));
        assert!(!prefix.starts_with(&a));
    }

    #[test]
    fn test_dme_schema_shape() {
        let set = MetricSet::dme();
        assert_eq!(set.len(), 26);
        assert_eq!(set.iter().filter(|m| m.volatility.is_volatile()).count(), 12);

        let names: Vec<&str> = set.names().collect();
        assert_eq!(names[0], "mtuExecTXPADelayCurrentValue-0");
        assert_eq!(names[1], "mtuExecTXPBDelayCurrentValue-0");
        assert_eq!(names[25], "mtuExecIdentStatus-3");

        let enterprise = Oid::new(DME_ENTERPRISE);
        assert!(set.iter().all(|m| m.oid.starts_with(&enterprise)));
    }

    #[test]
    fn test_dme_schema_known_points() {
        let set = MetricSet::dme();
        let power = set
            .by_name("mtuExecTXPBTransmittedPowerCurrentValue-0")
            .unwrap();
        assert_eq!(power.oid.to_string(), "1.3.6.1.4.1.32275.2.1.2.2.5.36");
        assert_eq!((power.initial, power.min, power.max), (1080, 1050, 1100));
        assert_eq!(power.volatility, Volatility::Volatile { step: 5 });

        let spacing = set.by_oid(&"1.3.6.1.4.1.32275.2.1.2.2.8.35".parse().unwrap()).unwrap();
        assert_eq!(spacing.name, "mtuExecTXPBPulsePairSpacing-3");
        assert_eq!(spacing.initial, 12000);
        assert_eq!(spacing.volatility, Volatility::Static);
    }

    #[test]
    fn test_metric_set_rejects_duplicates() {
        let oid: Oid = "1.2.3".parse().unwrap();
        let result = MetricSet::new(vec![
            Metric::fixed(oid.clone(), "a", 1),
            Metric::fixed(oid, "b", 1),
        ]);
        assert!(matches!(result, Err(SchemaError::DuplicateOid(_))));

        let result = MetricSet::new(vec![
            Metric::fixed("1.2.3".parse().unwrap(), "a", 1),
            Metric::fixed("1.2.4".parse().unwrap(), "a", 1),
        ]);
        assert!(matches!(result, Err(SchemaError::DuplicateName(_))));
    }

    #[test]
    fn test_metric_set_rejects_bad_ranges() {
        let result = MetricSet::new(vec![Metric::volatile(
            "1.2.3".parse().unwrap(),
            "a",
            5,
            10,
            0,
            1,
        )]);
        assert!(matches!(result, Err(SchemaError::EmptyRange { .. })));

        let result = MetricSet::new(vec![Metric::volatile(
            "1.2.3".parse().unwrap(),
            "a",
            50,
            0,
            10,
            1,
        )]);
        assert!(matches!(result, Err(SchemaError::InitialOutOfRange { .. })));
    }

    #[test]
    fn test_metric_set_rejects_negative_step() {
        for step in [-1, i64::MIN] {
            let result = MetricSet::new(vec![Metric::volatile(
                "1.2.3".parse().unwrap(),
                "a",
                5,
                0,
                10,
                step,
            )]);
            assert_eq!(
                result.unwrap_err(),
                SchemaError::NegativeStep {
                    name: "a".to_string(),
                    step
                }
            );
        }

        let set = MetricSet::new(vec![Metric::volatile(
            "1.2.3".parse().unwrap(),
            "a",
            5,
            0,
            10,
            0,
        )])
        .unwrap();
        assert_eq!(set.get(0).unwrap().volatility, Volatility::Volatile { step: 0 });
    }

    #[test]
    fn test_oid_order_sorted() {
        let set = MetricSet::dme();
        let order = set.oid_order();
        for pair in order.windows(2) {
            assert!(set.get(pair[0]).unwrap().oid < set.get(pair[1]).unwrap().oid);
        }
    }
}
