//! Routing Statistics
//!
//! Call accounting for the dispatcher:
//! - Calls per provider (success and failure)
//! - Failures per provider
//! - Offload percentage away from the coordinator
//! - Per-provider latency distributions
//!
//! All counters sit behind one lock so a snapshot always reconciles:
//! `sum(calls_by_provider) == total_calls` holds for every value returned by
//! [`StatsCollector::snapshot`].

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::StatsError;

/// Offload target applied when none is configured
pub const DEFAULT_TARGET_THRESHOLD: f64 = 0.95;

// ============================================================================
// Histogram for Latency Tracking
// ============================================================================

/// Fixed-bucket latency histogram (milliseconds)
#[derive(Clone, Debug)]
pub struct Histogram {
    /// Upper bucket bounds
    buckets: Vec<f64>,
    counts: Vec<u64>,
    total: u64,
    sum: u64,
    min: u64,
    max: u64,
}

impl Histogram {
    /// Create a histogram with the given bucket bounds
    pub fn new(buckets: Vec<f64>) -> Self {
        let counts = vec![0; buckets.len()];
        Self {
            buckets,
            counts,
            total: 0,
            sum: 0,
            min: u64::MAX,
            max: 0,
        }
    }

    /// Buckets suited to remote model calls
    pub fn latency_default() -> Self {
        Self::new(vec![
            10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0, 30000.0,
            60000.0, 120000.0,
        ])
    }

    /// Record one value
    pub fn record(&mut self, value_ms: u64) {
        let value = value_ms as f64;
        let idx = self
            .buckets
            .iter()
            .position(|&b| value <= b)
            .unwrap_or(self.buckets.len().saturating_sub(1));

        if let Some(count) = self.counts.get_mut(idx) {
            *count += 1;
        }
        self.total += 1;
        self.sum = self.sum.saturating_add(value_ms);
        self.min = self.min.min(value_ms);
        self.max = self.max.max(value_ms);
    }

    /// Number of recorded values
    pub fn count(&self) -> u64 {
        self.total
    }

    /// Mean of recorded values
    pub fn mean(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.sum as f64 / self.total as f64
    }

    /// Upper bound of the bucket holding the `p` quantile
    ///
    /// Values above the last bucket are reported as the observed maximum.
    pub fn percentile(&self, p: f64) -> f64 {
        if self.total == 0 {
            return 0.0;
        }

        let target = ((self.total as f64) * p).ceil().max(1.0) as u64;
        let mut cumulative = 0u64;

        let last = self.buckets.len().saturating_sub(1);
        for (idx, (bound, &count)) in self.buckets.iter().zip(&self.counts).enumerate() {
            cumulative += count;
            if cumulative >= target && idx < last {
                return bound.min(self.max as f64);
            }
        }

        self.max as f64
    }

    fn summary(&self) -> LatencySummary {
        LatencySummary {
            count: self.total,
            mean_ms: self.mean(),
            min_ms: if self.total == 0 { 0 } else { self.min },
            max_ms: self.max,
            p50_ms: self.percentile(0.5),
            p90_ms: self.percentile(0.9),
            p99_ms: self.percentile(0.99),
        }
    }
}

/// Latency distribution for one provider
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LatencySummary {
    pub count: u64,
    pub mean_ms: f64,
    pub min_ms: u64,
    pub max_ms: u64,
    pub p50_ms: f64,
    pub p90_ms: f64,
    pub p99_ms: f64,
}

// ============================================================================
// Routing Stats
// ============================================================================

/// Consistent snapshot of call accounting
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RoutingStats {
    /// Completed provider calls
    pub total_calls: u64,

    /// Calls per provider (success and failure)
    pub calls_by_provider: BTreeMap<String, u64>,

    /// Failed calls per provider
    pub failures_by_provider: BTreeMap<String, u64>,

    /// Provider that load should be moved away from
    pub coordinator_provider: Option<String>,

    /// Required offload fraction
    pub target_threshold: f64,
}

impl RoutingStats {
    fn empty(coordinator_provider: Option<String>, target_threshold: f64) -> Self {
        Self {
            total_calls: 0,
            calls_by_provider: BTreeMap::new(),
            failures_by_provider: BTreeMap::new(),
            coordinator_provider,
            target_threshold,
        }
    }

    /// Calls made to one provider
    pub fn calls_to(&self, provider: &str) -> u64 {
        self.calls_by_provider.get(provider).copied().unwrap_or(0)
    }

    /// Failed calls made to one provider
    pub fn failures_of(&self, provider: &str) -> u64 {
        self.failures_by_provider.get(provider).copied().unwrap_or(0)
    }

    /// Calls made to the coordinator
    pub fn coordinator_calls(&self) -> u64 {
        self.coordinator_provider
            .as_deref()
            .map_or(0, |name| self.calls_to(name))
    }

    /// Fraction of calls routed away from the coordinator (0.0 with no calls)
    pub fn offload_percentage(&self) -> f64 {
        if self.total_calls == 0 {
            return 0.0;
        }
        let offloaded = self.total_calls.saturating_sub(self.coordinator_calls());
        offloaded as f64 / self.total_calls as f64
    }

    /// Whether the offload target is satisfied (never with zero calls)
    pub fn target_met(&self) -> bool {
        self.total_calls > 0 && self.offload_percentage() >= self.target_threshold
    }

    /// Whether the per-provider counters sum to the totals
    pub fn is_reconciled(&self) -> bool {
        let sum: u64 = self.calls_by_provider.values().sum();
        sum == self.total_calls
            && self
                .failures_by_provider
                .iter()
                .all(|(name, &failures)| failures <= self.calls_to(name))
    }
}

impl std::fmt::Display for RoutingStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Total calls: {}", self.total_calls)?;
        for (name, calls) in &self.calls_by_provider {
            let marker = if Some(name.as_str()) == self.coordinator_provider.as_deref() {
                " (coordinator)"
            } else {
                ""
            };
            writeln!(
                f,
                "  {name}{marker}: {calls} calls, {} failed",
                self.failures_of(name)
            )?;
        }
        write!(
            f,
            "Offload: {:.1}% (target {:.1}%) {}",
            self.offload_percentage() * 100.0,
            self.target_threshold * 100.0,
            if self.target_met() { "MET" } else { "MISSED" }
        )
    }
}

/// Statistics with per-provider latency distributions
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StatsSummary {
    pub stats: RoutingStats,
    pub offload_percentage: f64,
    pub target_met: bool,
    pub latency_by_provider: BTreeMap<String, LatencySummary>,
}

// ============================================================================
// Collector
// ============================================================================

struct StatsInner {
    stats: RoutingStats,
    latency: BTreeMap<String, Histogram>,
}

/// Single owned statistics instance shared by the dispatcher and the engine
pub struct StatsCollector {
    inner: Mutex<StatsInner>,
    active: Arc<AtomicUsize>,
}

impl StatsCollector {
    /// Create a collector measuring offload away from `coordinator`
    pub fn new(coordinator: Option<String>, target_threshold: f64) -> Self {
        Self {
            inner: Mutex::new(StatsInner {
                stats: RoutingStats::empty(coordinator, target_threshold),
                latency: BTreeMap::new(),
            }),
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Consistent read of the counters
    pub fn snapshot(&self) -> RoutingStats {
        self.inner.lock().stats.clone()
    }

    /// Snapshot plus derived values and latency percentiles
    pub fn summary(&self) -> StatsSummary {
        let inner = self.inner.lock();
        StatsSummary {
            offload_percentage: inner.stats.offload_percentage(),
            target_met: inner.stats.target_met(),
            stats: inner.stats.clone(),
            latency_by_provider: inner
                .latency
                .iter()
                .map(|(name, hist)| (name.clone(), hist.summary()))
                .collect(),
        }
    }

    /// Account one completed provider call
    pub fn record_call(&self, provider: &str, success: bool, latency: Duration) {
        let latency_ms = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);

        let mut inner = self.inner.lock();
        inner.stats.total_calls += 1;
        *inner
            .stats
            .calls_by_provider
            .entry(provider.to_string())
            .or_insert(0) += 1;
        if !success {
            *inner
                .stats
                .failures_by_provider
                .entry(provider.to_string())
                .or_insert(0) += 1;
        }
        inner
            .latency
            .entry(provider.to_string())
            .or_insert_with(Histogram::latency_default)
            .record(latency_ms);
    }

    /// Set the coordinator and threshold used by derived fields
    ///
    /// Stays in effect for every later snapshot and batch until changed.
    pub fn configure_target(&self, coordinator: Option<String>, target_threshold: f64) {
        let mut inner = self.inner.lock();
        inner.stats.coordinator_provider = coordinator;
        inner.stats.target_threshold = target_threshold;
    }

    /// Current coordinator
    pub fn coordinator(&self) -> Option<String> {
        self.inner.lock().stats.coordinator_provider.clone()
    }

    /// Clear all counters; rejected while any dispatch is in progress
    pub fn reset(&self) -> Result<(), StatsError> {
        let mut inner = self.inner.lock();
        let active = self.active.load(Ordering::SeqCst);
        if active > 0 {
            return Err(StatsError::DispatchInProgress(active));
        }

        let coordinator = inner.stats.coordinator_provider.take();
        let threshold = inner.stats.target_threshold;
        inner.stats = RoutingStats::empty(coordinator, threshold);
        inner.latency.clear();
        tracing::debug!("Routing statistics reset");
        Ok(())
    }

    /// Dispatches currently between selection and their result
    pub fn in_progress(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Mark a dispatch as started; dropping the guard marks it finished
    pub(crate) fn begin_dispatch(&self) -> DispatchGuard {
        self.active.fetch_add(1, Ordering::SeqCst);
        DispatchGuard {
            active: Arc::clone(&self.active),
        }
    }
}

impl Default for StatsCollector {
    fn default() -> Self {
        Self::new(None, DEFAULT_TARGET_THRESHOLD)
    }
}

impl std::fmt::Debug for StatsCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatsCollector")
            .field("stats", &self.snapshot())
            .field("in_progress", &self.in_progress())
            .finish()
    }
}

/// An active dispatch (RAII guard)
pub(crate) struct DispatchGuard {
    active: Arc<AtomicUsize>,
}

impl Drop for DispatchGuard {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_histogram() {
        let mut hist = Histogram::new(vec![10.0, 25.0, 50.0, 100.0]);

        hist.record(5); // bucket 10
        hist.record(15); // bucket 25
        hist.record(75); // bucket 100
        hist.record(200); // last bucket

        assert_eq!(hist.count(), 4);
        let summary = hist.summary();
        assert_eq!(summary.min_ms, 5);
        assert_eq!(summary.max_ms, 200);
        assert_eq!(hist.percentile(0.5), 25.0);
        // Top of the last bucket reports the observed maximum
        assert_eq!(hist.percentile(0.99), 200.0);
    }

    #[test]
    fn test_percentile_capped_by_max() {
        let mut hist = Histogram::latency_default();
        for _ in 0..10 {
            hist.record(40);
        }
        assert_eq!(hist.percentile(0.5), 40.0);
        assert_eq!(Histogram::latency_default().percentile(0.9), 0.0);
    }

    #[test]
    fn test_record_and_reconcile() {
        let stats = StatsCollector::new(Some("coord".to_string()), 0.95);
        for _ in 0..19 {
            stats.record_call("worker", true, Duration::from_millis(10));
        }
        stats.record_call("coord", false, Duration::from_millis(30));

        let snap = stats.snapshot();
        assert_eq!(snap.total_calls, 20);
        assert_eq!(snap.calls_to("worker"), 19);
        assert_eq!(snap.failures_of("coord"), 1);
        assert!(snap.is_reconciled());
        assert_eq!(snap.offload_percentage(), 0.95);
        assert!(snap.target_met());
    }

    #[test]
    fn test_zero_calls() {
        let snap = StatsCollector::new(Some("coord".to_string()), 0.0).snapshot();
        assert_eq!(snap.offload_percentage(), 0.0);
        assert!(!snap.target_met());
        assert!(snap.is_reconciled());
    }

    #[test]
    fn test_no_coordinator_means_full_offload() {
        let stats = StatsCollector::default();
        stats.record_call("a", true, Duration::ZERO);
        assert_eq!(stats.snapshot().offload_percentage(), 1.0);
    }

    #[test]
    fn test_snapshot_idempotent() {
        let stats = StatsCollector::default();
        stats.record_call("a", true, Duration::from_millis(3));
        assert_eq!(stats.snapshot(), stats.snapshot());
        assert_eq!(stats.summary(), stats.summary());
    }

    #[test]
    fn test_reset_rejected_while_dispatching() {
        let stats = StatsCollector::new(Some("c".to_string()), 0.9);
        stats.record_call("a", true, Duration::ZERO);

        let guard = stats.begin_dispatch();
        assert_eq!(stats.reset(), Err(StatsError::DispatchInProgress(1)));
        assert_eq!(stats.snapshot().total_calls, 1);

        drop(guard);
        stats.reset().unwrap();
        let snap = stats.snapshot();
        assert_eq!(snap.total_calls, 0);
        assert_eq!(snap.coordinator_provider.as_deref(), Some("c"));
        assert_eq!(snap.target_threshold, 0.9);
        assert!(stats.summary().latency_by_provider.is_empty());
    }

    #[test]
    fn test_summary_latency() {
        let stats = StatsCollector::default();
        stats.record_call("a", true, Duration::from_millis(20));
        stats.record_call("a", true, Duration::from_millis(80));

        let summary = stats.summary();
        let latency = &summary.latency_by_provider["a"];
        assert_eq!(latency.count, 2);
        assert_eq!(latency.mean_ms, 50.0);
        assert_eq!(latency.max_ms, 80);
    }

    #[test]
    fn test_display() {
        let stats = StatsCollector::new(Some("grok".to_string()), 0.95);
        stats.record_call("grok", true, Duration::ZERO);
        stats.record_call("groq", true, Duration::ZERO);
        let text = stats.snapshot().to_string();
        assert!(text.contains("grok (coordinator): 1 calls"));
        assert!(text.contains("Offload: 50.0%"));
        assert!(text.contains("MISSED"));
    }
}
