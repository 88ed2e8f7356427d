//! Opt-in counters for sync rounds, and log setup.
//!
//! Counters are only collected when `TRELLIS_PERF` is set. Each metric logs
//! its running totals under the `trellis::perf` target every
//! `TRELLIS_PERF_EVERY` samples.

pub mod logging;

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;
use parking_lot::Mutex;

const DEFAULT_REPORT_EVERY: u64 = 200;

pub(crate) fn env_truthy(var: &str) -> Option<bool> {
    std::env::var(var).map(|v| v != "0" && !v.is_empty()).ok()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Metric {
    MetadataBootstrap,
    RpcDispatch,
    SyncRound,
    ClientMessage,
    ServerMessage,
}

impl Metric {
    pub fn name(self) -> &'static str {
        match self {
            Metric::MetadataBootstrap => "metadata_bootstrap",
            Metric::RpcDispatch => "rpc_dispatch",
            Metric::SyncRound => "sync_round",
            Metric::ClientMessage => "client_message",
            Metric::ServerMessage => "server_message",
        }
    }
}

/// Running totals for one metric.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricSnapshot {
    pub samples: u64,
    pub total: Duration,
    pub max: Duration,
    pub bytes: u64,
}

impl MetricSnapshot {
    pub fn mean(&self) -> Duration {
        match u32::try_from(self.samples) {
            Ok(0) => Duration::ZERO,
            Ok(samples) => self.total / samples,
            Err(_) => Duration::from_nanos((self.total.as_nanos() / u128::from(self.samples)) as u64),
        }
    }
}

struct Recorder {
    enabled: bool,
    report_every: u64,
    stats: Mutex<BTreeMap<Metric, MetricSnapshot>>,
}

impl Recorder {
    fn new(enabled: bool, report_every: u64) -> Self {
        Self {
            enabled,
            report_every: report_every.max(1),
            stats: Mutex::new(BTreeMap::new()),
        }
    }

    fn from_env() -> Self {
        let every = std::env::var("TRELLIS_PERF_EVERY")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_REPORT_EVERY);
        Self::new(env_truthy("TRELLIS_PERF").unwrap_or(false), every)
    }

    fn record(&self, metric: Metric, update: impl FnOnce(&mut MetricSnapshot)) {
        if !self.enabled {
            return;
        }
        let mut stats = self.stats.lock();
        let entry = stats.entry(metric).or_default();
        update(entry);
        entry.samples += 1;
        if entry.samples % self.report_every == 0 {
            log_snapshot(metric, entry);
        }
    }

    fn snapshot(&self) -> Vec<(Metric, MetricSnapshot)> {
        self.stats.lock().iter().map(|(metric, stat)| (*metric, *stat)).collect()
    }
}

static RECORDER: Lazy<Recorder> = Lazy::new(Recorder::from_env);

fn log_snapshot(metric: Metric, stat: &MetricSnapshot) {
    tracing::info!(
        target: "trellis::perf",
        metric = metric.name(),
        samples = stat.samples,
        mean_us = stat.mean().as_micros() as u64,
        max_us = stat.max.as_micros() as u64,
        kib = stat.bytes / 1024,
        "perf totals"
    );
}

pub fn enabled() -> bool {
    RECORDER.enabled
}

pub fn record_duration(metric: Metric, elapsed: Duration) {
    RECORDER.record(metric, |stat| {
        stat.total += elapsed;
        stat.max = stat.max.max(elapsed);
    });
}

/// Records the size of one encoded message.
pub fn record_bytes(metric: Metric, bytes: usize) {
    RECORDER.record(metric, |stat| stat.bytes += bytes as u64);
}

/// Totals collected so far, in metric order. Empty unless `TRELLIS_PERF` is
/// set.
pub fn snapshot() -> Vec<(Metric, MetricSnapshot)> {
    RECORDER.snapshot()
}

/// Times a scope when counters are enabled.
pub struct PerfGuard {
    metric: Metric,
    start: Instant,
}

impl PerfGuard {
    pub fn new(metric: Metric) -> Option<Self> {
        enabled().then(|| Self {
            metric,
            start: Instant::now(),
        })
    }
}

impl Drop for PerfGuard {
    fn drop(&mut self) {
        record_duration(self.metric, self.start.elapsed());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_timeout::timeout]
    fn disabled_recorder_keeps_nothing() {
        let recorder = Recorder::new(false, 1);
        recorder.record(Metric::SyncRound, |stat| stat.bytes += 10);
        assert!(recorder.snapshot().is_empty());
    }

    #[test_timeout::timeout]
    fn totals_accumulate_per_metric() {
        let recorder = Recorder::new(true, 1000);
        for millis in [2, 6] {
            recorder.record(Metric::SyncRound, |stat| {
                let elapsed = Duration::from_millis(millis);
                stat.total += elapsed;
                stat.max = stat.max.max(elapsed);
            });
        }
        recorder.record(Metric::ServerMessage, |stat| stat.bytes += 512);

        let snapshot = recorder.snapshot();
        assert_eq!(snapshot.len(), 2);
        let (metric, rounds) = snapshot[0];
        assert_eq!(metric, Metric::SyncRound);
        assert_eq!(rounds.samples, 2);
        assert_eq!(rounds.mean(), Duration::from_millis(4));
        assert_eq!(rounds.max, Duration::from_millis(6));
        assert_eq!(snapshot[1].1.bytes, 512);
    }
}
