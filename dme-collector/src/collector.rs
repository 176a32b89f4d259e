// DME Collector - Telemetry collection
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Collection cycle
//!
//! Each tick walks `Collecting → Formatting → Persisting → Forwarding` and
//! returns to idle. The secured transport is retried; the plain transport is
//! tried once when it gives up. Forwarding only happens after the row is on
//! disk.

use crate::error::TransportError;
use crate::forward::Forwarder;
use crate::log::DurableLog;
use crate::retry::{with_retry, RetryStrategy};
use crate::transport::{Reading, Transport, TransportKind};
use chrono::Local;
use dme::{CollectionRecord, MetricSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// How a cycle ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// A row was persisted
    Completed {
        /// Transport that produced the reading
        transport: TransportKind,
        /// Whether some metrics were defaulted
        degraded: bool,
        /// Sink delivery result, `None` when forwarding is disabled
        forwarded: Option<bool>,
    },
    /// Both transports failed; nothing was written
    Abandoned,
    /// The reading could not be persisted
    PersistFailed,
}

/// Cycle counters
#[derive(Debug, Default)]
pub struct CollectorStats {
    completed: AtomicU64,
    degraded: AtomicU64,
    abandoned: AtomicU64,
    persist_failed: AtomicU64,
    forwarded: AtomicU64,
    forward_failed: AtomicU64,
    fallbacks: AtomicU64,
    panicked: AtomicU64,
}

/// Point-in-time copy of [`CollectorStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CollectorStatsSnapshot {
    pub completed: u64,
    pub degraded: u64,
    pub abandoned: u64,
    pub persist_failed: u64,
    pub forwarded: u64,
    pub forward_failed: u64,
    pub fallbacks: u64,
    pub panicked: u64,
}

impl CollectorStats {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Copy the counters
    pub fn snapshot(&self) -> CollectorStatsSnapshot {
        CollectorStatsSnapshot {
            completed: self.completed.load(Ordering::Relaxed),
            degraded: self.degraded.load(Ordering::Relaxed),
            abandoned: self.abandoned.load(Ordering::Relaxed),
            persist_failed: self.persist_failed.load(Ordering::Relaxed),
            forwarded: self.forwarded.load(Ordering::Relaxed),
            forward_failed: self.forward_failed.load(Ordering::Relaxed),
            fallbacks: self.fallbacks.load(Ordering::Relaxed),
            panicked: self.panicked.load(Ordering::Relaxed),
        }
    }
}

/// Periodic collector
pub struct Collector {
    schema: Arc<MetricSet>,
    secured: Box<dyn Transport>,
    plain: Box<dyn Transport>,
    strategy: RetryStrategy,
    log: DurableLog,
    forwarder: Option<Forwarder>,
    stats: CollectorStats,
}

impl std::fmt::Debug for Collector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collector")
            .field("metrics", &self.schema.len())
            .field("strategy", &self.strategy)
            .field("log", &self.log.path())
            .field("forwarder", &self.forwarder)
            .finish()
    }
}

impl Collector {
    /// Create a collector
    pub fn new(
        schema: Arc<MetricSet>,
        secured: Box<dyn Transport>,
        plain: Box<dyn Transport>,
        strategy: RetryStrategy,
        log: DurableLog,
    ) -> Self {
        Self {
            schema,
            secured,
            plain,
            strategy,
            log,
            forwarder: None,
            stats: CollectorStats::default(),
        }
    }

    /// Forward persisted records to a streaming sink
    pub fn with_forwarder(mut self, forwarder: Forwarder) -> Self {
        self.forwarder = Some(forwarder);
        self
    }

    /// Cycle counters
    pub fn stats(&self) -> &CollectorStats {
        &self.stats
    }

    /// Durable log
    pub fn log(&self) -> &DurableLog {
        &self.log
    }

    /// Read the agent: secured with retries, then plain once
    pub async fn collect(&self) -> Result<(Reading, TransportKind), (TransportError, TransportError)> {
        let outcome = with_retry(&self.strategy, |attempt| {
            debug!(transport = %self.secured.kind(), attempt, "fetching");
            self.secured.fetch(&self.schema)
        })
        .await;

        let secured_error = match outcome.result {
            Ok(reading) => {
                debug!(attempts = outcome.attempts, "secured read succeeded");
                return Ok((reading, self.secured.kind()));
            }
            Err(e) => e,
        };
        info!(
            transport = %self.secured.kind(),
            attempts = outcome.attempts,
            error = %secured_error,
            "secured read failed, falling back"
        );

        CollectorStats::bump(&self.stats.fallbacks);
        match self.plain.fetch(&self.schema).await {
            Ok(reading) => Ok((reading, self.plain.kind())),
            Err(plain_error) => Err((secured_error, plain_error)),
        }
    }

    /// Run one full cycle
    pub async fn run_cycle(&self) -> CycleOutcome {
        debug!(state = "collecting");
        let (reading, transport) = match self.collect().await {
            Ok(collected) => collected,
            Err((secured_error, plain_error)) => {
                CollectorStats::bump(&self.stats.abandoned);
                warn!(
                    secured_error = %secured_error,
                    plain_error = %plain_error,
                    "collection abandoned, both transports failed"
                );
                return CycleOutcome::Abandoned;
            }
        };

        debug!(state = "formatting", %transport);
        let record = CollectionRecord::assemble(&self.schema, Local::now(), &reading);
        let degraded = record.is_degraded();
        if degraded {
            CollectorStats::bump(&self.stats.degraded);
            warn!(
                %transport,
                missing = ?record.missing,
                "reading incomplete, missing metrics set to zero"
            );
        }

        debug!(state = "persisting", path = %self.log.path().display());
        if let Err(e) = self.log.append(&record) {
            CollectorStats::bump(&self.stats.persist_failed);
            error!(path = %self.log.path().display(), error = %e, "failed to persist record");
            return CycleOutcome::PersistFailed;
        }
        CollectorStats::bump(&self.stats.completed);

        let forwarded = match &self.forwarder {
            Some(forwarder) => {
                debug!(state = "forwarding", sink = %forwarder.target());
                match forwarder.forward(&record, transport).await {
                    Ok(()) => {
                        CollectorStats::bump(&self.stats.forwarded);
                        Some(true)
                    }
                    Err(e) => {
                        CollectorStats::bump(&self.stats.forward_failed);
                        warn!(sink = %forwarder.target(), error = %e, "failed to forward record");
                        Some(false)
                    }
                }
            }
            None => None,
        };

        info!(%transport, degraded, "collection complete");
        CycleOutcome::Completed {
            transport,
            degraded,
            forwarded,
        }
    }

    /// Collect forever, sleeping `interval` after each cycle
    ///
    /// Each cycle runs in its own task; a panic ends that cycle only.
    pub async fn run(self: Arc<Self>, interval: Duration) {
        info!(
            interval_secs = interval.as_secs(),
            path = %self.log.path().display(),
            forwarding = self.forwarder.is_some(),
            "collector started"
        );

        let mut cycle: u64 = 0;
        loop {
            cycle += 1;
            let collector = Arc::clone(&self);
            let span = info_span!("cycle", n = cycle);
            let task = tokio::spawn(async move { collector.run_cycle().await }.instrument(span));
            if let Err(e) = task.await {
                CollectorStats::bump(&self.stats.panicked);
                error!(cycle, error = %e, "collection cycle aborted");
            }
            tokio::time::sleep(interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use dme::SecurityError;
    use std::sync::atomic::AtomicU32;

    /// Transport answering from a script
    struct FakeTransport {
        kind: TransportKind,
        calls: Arc<AtomicU32>,
        behavior: Behavior,
    }

    #[derive(Clone, Copy)]
    enum Behavior {
        Complete(i64),
        Partial(i64),
        TimeOut,
        Reject,
        FailTimes(u32, i64),
        Panic,
    }

    impl FakeTransport {
        fn new(kind: TransportKind, behavior: Behavior) -> (Box<dyn Transport>, Arc<AtomicU32>) {
            let calls = Arc::new(AtomicU32::new(0));
            let fake = FakeTransport {
                kind,
                calls: Arc::clone(&calls),
                behavior,
            };
            (Box::new(fake), calls)
        }
    }

    fn full_reading(schema: &MetricSet, value: i64) -> Reading {
        schema.names().map(|n| (n.to_string(), value)).collect()
    }

    #[async_trait]
    impl Transport for FakeTransport {
        fn kind(&self) -> TransportKind {
            self.kind
        }

        async fn fetch(&self, schema: &MetricSet) -> Result<Reading, TransportError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            let timeout = TransportError::Timeout {
                transport: self.kind,
                after: Duration::from_secs(10),
            };
            match self.behavior {
                Behavior::Complete(v) => Ok(full_reading(schema, v)),
                Behavior::Partial(v) => {
                    let mut reading = full_reading(schema, v);
                    reading.remove(&schema.get(0).unwrap().name);
                    Ok(reading)
                }
                Behavior::TimeOut => Err(timeout),
                Behavior::Reject => Err(TransportError::Rejected(SecurityError::WrongDigest)),
                Behavior::FailTimes(n, v) if call > n => Ok(full_reading(schema, v)),
                Behavior::FailTimes(..) => Err(timeout),
                Behavior::Panic => panic!("transport exploded"),
            }
        }
    }

    struct Setup {
        collector: Collector,
        secured_calls: Arc<AtomicU32>,
        plain_calls: Arc<AtomicU32>,
        _dir: tempfile::TempDir,
    }

    fn setup(secured: Behavior, plain: Behavior) -> Setup {
        let dir = tempfile::tempdir().unwrap();
        let schema = Arc::new(MetricSet::dme());
        let (secured, secured_calls) = FakeTransport::new(TransportKind::Secured, secured);
        let (plain, plain_calls) = FakeTransport::new(TransportKind::Plain, plain);
        let log = DurableLog::new(dir.path().join("dme_data.csv"), &schema);
        let collector = Collector::new(
            schema,
            secured,
            plain,
            RetryStrategy::exponential(3, Duration::from_millis(500)),
            log,
        );
        Setup {
            collector,
            secured_calls,
            plain_calls,
            _dir: dir,
        }
    }

    fn lines(collector: &Collector) -> Vec<String> {
        match std::fs::read_to_string(collector.log().path()) {
            Ok(content) => content.lines().map(str::to_string).collect(),
            Err(_) => Vec::new(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_secured_success_skips_plain() {
        let s = setup(Behavior::Complete(5), Behavior::Complete(9));
        let outcome = s.collector.run_cycle().await;
        assert_eq!(
            outcome,
            CycleOutcome::Completed {
                transport: TransportKind::Secured,
                degraded: false,
                forwarded: None
            }
        );
        assert_eq!(s.secured_calls.load(Ordering::SeqCst), 1);
        assert_eq!(s.plain_calls.load(Ordering::SeqCst), 0);

        let lines = lines(&s.collector);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1].split('\t').count(), 27);
        assert!(lines[1].split('\t').skip(1).all(|f| f == "5"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fallback_after_all_retries() {
        let s = setup(Behavior::TimeOut, Behavior::Complete(9));
        let outcome = s.collector.run_cycle().await;
        assert!(matches!(
            outcome,
            CycleOutcome::Completed {
                transport: TransportKind::Plain,
                degraded: false,
                ..
            }
        ));
        // max_retries + 1 secured attempts, one plain attempt
        assert_eq!(s.secured_calls.load(Ordering::SeqCst), 4);
        assert_eq!(s.plain_calls.load(Ordering::SeqCst), 1);
        assert_eq!(s.collector.stats().snapshot().fallbacks, 1);
        assert_eq!(lines(&s.collector).len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejection_falls_back_without_retry() {
        let s = setup(Behavior::Reject, Behavior::Complete(9));
        s.collector.run_cycle().await;
        assert_eq!(s.secured_calls.load(Ordering::SeqCst), 1);
        assert_eq!(s.plain_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_recovers_before_fallback() {
        let s = setup(Behavior::FailTimes(2, 4), Behavior::Complete(9));
        let outcome = s.collector.run_cycle().await;
        assert!(matches!(
            outcome,
            CycleOutcome::Completed {
                transport: TransportKind::Secured,
                ..
            }
        ));
        assert_eq!(s.secured_calls.load(Ordering::SeqCst), 3);
        assert_eq!(s.plain_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_both_failing_writes_nothing() {
        let s = setup(Behavior::TimeOut, Behavior::TimeOut);
        s.collector.run_cycle().await;
        let before = std::fs::read(s.collector.log().path()).unwrap_or_default();

        let outcome = s.collector.run_cycle().await;
        assert_eq!(outcome, CycleOutcome::Abandoned);
        assert!(lines(&s.collector).is_empty());
        assert_eq!(
            std::fs::read(s.collector.log().path()).unwrap_or_default(),
            before
        );
        let stats = s.collector.stats().snapshot();
        assert_eq!(stats.abandoned, 2);
        assert_eq!(stats.completed, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_reading_is_degraded() {
        let s = setup(Behavior::Partial(3), Behavior::Complete(9));
        let outcome = s.collector.run_cycle().await;
        assert!(matches!(
            outcome,
            CycleOutcome::Completed {
                transport: TransportKind::Secured,
                degraded: true,
                ..
            }
        ));
        let lines = lines(&s.collector);
        let fields: Vec<&str> = lines[1].split('\t').collect();
        assert_eq!(fields.len(), 27);
        assert_eq!(fields[1], "0");
        assert_eq!(fields[2], "3");
        assert_eq!(s.collector.stats().snapshot().degraded, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_persist_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let schema = Arc::new(MetricSet::dme());
        let (secured, _) = FakeTransport::new(TransportKind::Secured, Behavior::Complete(1));
        let (plain, _) = FakeTransport::new(TransportKind::Plain, Behavior::Complete(1));
        // a directory cannot be appended to
        let log = DurableLog::new(dir.path(), &schema);
        let collector = Collector::new(schema, secured, plain, RetryStrategy::None, log);
        assert_eq!(collector.run_cycle().await, CycleOutcome::PersistFailed);
        assert_eq!(collector.stats().snapshot().persist_failed, 1);
    }

    #[tokio::test]
    async fn test_sink_failure_keeps_row() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let mut s = setup(Behavior::Complete(2), Behavior::Complete(9));
        s.collector = s.collector.with_forwarder(Forwarder::new(
            "127.0.0.1",
            port,
            Duration::from_secs(1),
            Duration::from_secs(180),
        ));
        let outcome = s.collector.run_cycle().await;
        assert!(matches!(
            outcome,
            CycleOutcome::Completed {
                forwarded: Some(false),
                ..
            }
        ));
        assert_eq!(lines(&s.collector).len(), 2);
        let stats = s.collector.stats().snapshot();
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.forward_failed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_panic_is_contained_by_run_loop() {
        let s = setup(Behavior::Panic, Behavior::Complete(9));
        let collector = Arc::new(s.collector);
        let task = tokio::spawn(Arc::clone(&collector).run(Duration::from_secs(180)));

        // two cycles: t = 0 and t = 180 s
        tokio::time::sleep(Duration::from_secs(181)).await;
        assert_eq!(collector.stats().snapshot().panicked, 2);
        assert!(!task.is_finished());
        task.abort();
    }
}
