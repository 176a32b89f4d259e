// DME Telemetry - Collection records
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Fixed-width collection records
//!
//! A record always carries one value per metric in canonical order. Values
//! the transport did not return are defaulted to zero and remembered so the
//! cycle can be flagged degraded.

use crate::schema::MetricSet;
use chrono::{DateTime, Local, SecondsFormat, Timelike};
use std::collections::HashMap;

/// Header of the timestamp column
pub const TIMESTAMP_COLUMN: &str = "Timestamp";

/// Value used for metrics missing from a reading
pub const MISSING_VALUE: i64 = 0;

/// One normalized collection, immutable once assembled
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionRecord {
    /// When the record was assembled
    pub timestamp: DateTime<Local>,
    /// `(name, value)` in canonical order
    pub values: Vec<(String, i64)>,
    /// Names of metrics that were defaulted
    pub missing: Vec<String>,
}

impl CollectionRecord {
    /// Assemble a record from values keyed by metric name.
    ///
    /// Keys that are not part of the schema are ignored.
    pub fn assemble(
        schema: &MetricSet,
        timestamp: DateTime<Local>,
        readings: &HashMap<String, i64>,
    ) -> Self {
        let mut values = Vec::with_capacity(schema.len());
        let mut missing = Vec::new();
        for metric in schema.iter() {
            let value = match readings.get(&metric.name) {
                Some(v) => *v,
                None => {
                    missing.push(metric.name.clone());
                    MISSING_VALUE
                }
            };
            values.push((metric.name.clone(), value));
        }
        Self {
            timestamp,
            values,
            missing,
        }
    }

    /// Whether any value was defaulted
    pub fn is_degraded(&self) -> bool {
        !self.missing.is_empty()
    }

    /// Number of fields in the rendered row (timestamp included)
    pub fn width(&self) -> usize {
        self.values.len() + 1
    }

    /// Header row for a schema
    pub fn header(schema: &MetricSet) -> Vec<String> {
        std::iter::once(TIMESTAMP_COLUMN.to_string())
            .chain(schema.names().map(str::to_string))
            .collect()
    }

    /// Row fields: formatted timestamp followed by the values
    pub fn row(&self) -> Vec<String> {
        std::iter::once(format_log_timestamp(&self.timestamp))
            .chain(self.values.iter().map(|(_, v)| v.to_string()))
            .collect()
    }

    /// ISO-8601 timestamp for the streaming sink
    pub fn iso_timestamp(&self) -> String {
        self.timestamp.to_rfc3339_opts(SecondsFormat::Micros, false)
    }
}

/// `YYYY-MM-DD HH:MM:SS.ss`, hundredths of a second truncated
pub fn format_log_timestamp<Tz: chrono::TimeZone>(ts: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    let centis = (ts.nanosecond() % 1_000_000_000) / 10_000_000;
    format!("{}.{:02}", ts.format("%Y-%m-%d %H:%M:%S"), centis)
}
