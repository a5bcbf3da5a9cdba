//! Dispatcher
//!
//! Routes one task at a time: select a provider, wait for one of its slots,
//! make the call under a timeout, and account the call.
//!
//! # Suspension Points
//!
//! ```text
//! select ──> admission (provider slot) ──> provider I/O ──> record_call
//!                 │                              │
//!                 │ admission timeout            │ call timeout
//!                 │ or batch deadline            │
//!                 v                              v
//!          Timeout / BatchTimeout         Timeout (call keeps running
//!          (provider never called)         in the background with its slot)
//! ```
//!
//! The provider call runs on its own tokio task that owns the slot. When the
//! call timeout fires the task is detached, so the slot stays occupied until
//! the provider actually answers and the per-provider cap still holds.
//!
//! Latency histograms record the provider call alone: the latency a client
//! reports on success, or the time spent in the call on failure. The
//! [`TaskResult`] latency stays end to end, admission wait included.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use super::config::{duration_ms, DispatchConfig};
use super::metrics::StatsCollector;
use super::policy::select_provider;
use super::pool::ProviderSlot;
use super::registry::{ProviderEntry, ProviderRegistry};
use crate::error::{DispatchError, TimeoutStage};
use crate::provider::ProviderRequest;
use crate::task::{Task, TaskResult};

/// Routes tasks to providers under per-provider concurrency limits
pub struct Dispatcher {
    registry: Arc<ProviderRegistry>,
    stats: Arc<StatsCollector>,
    config: DispatchConfig,
}

impl Dispatcher {
    /// Create a dispatcher over a registry, recording into `stats`
    pub fn new(
        registry: Arc<ProviderRegistry>,
        stats: Arc<StatsCollector>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            registry,
            stats,
            config,
        }
    }

    /// Provider registry
    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    /// Statistics collector
    pub fn stats(&self) -> &Arc<StatsCollector> {
        &self.stats
    }

    /// Dispatch timeouts
    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Route one task and wait for its result
    ///
    /// Never fails: every outcome, including selection and admission
    /// failures, is captured in the returned [`TaskResult`].
    ///
    /// Auto-selection avoids the collector's current coordinator.
    pub async fn route(&self, task: &Task) -> TaskResult {
        let coordinator = self.stats.coordinator();
        self.route_within(task, None, coordinator.as_deref()).await
    }

    /// Route one task on behalf of a batch
    ///
    /// Admission gives up at `batch_deadline` if that comes before the
    /// admission timeout. Auto-selection avoids `coordinator`, which the
    /// batch resolved once up front.
    pub async fn route_within(
        &self,
        task: &Task,
        batch_deadline: Option<Instant>,
        coordinator: Option<&str>,
    ) -> TaskResult {
        let _active = self.stats.begin_dispatch();
        let started = Instant::now();

        let entry = match select_provider(
            &self.registry.snapshot(),
            task.requested_provider.as_deref(),
            coordinator,
        ) {
            Ok(entry) => entry,
            Err(err) => {
                tracing::warn!(task_id = %task.id, error = %err, "Provider selection failed");
                return TaskResult::failed(task.id.clone(), None, err, started.elapsed());
            }
        };

        tracing::debug!(
            task_id = %task.id,
            provider = %entry.name(),
            queued = entry.load.queued(),
            "Selected provider"
        );

        let provider = entry.name().to_string();
        let slot = match self.admit(&entry, started, batch_deadline).await {
            Ok(admitted) => admitted,
            Err(err) => {
                tracing::warn!(
                    task_id = %task.id,
                    provider = %provider,
                    error = %err,
                    "Admission failed"
                );
                return TaskResult::failed(task.id.clone(), Some(provider), err, started.elapsed());
            }
        };

        tracing::debug!(
            task_id = %task.id,
            provider = %provider,
            waited_ms = duration_ms(started.elapsed()),
            "Admitted"
        );

        let (result, call_latency) = self.invoke(task, &entry, slot, started).await;
        self.stats.record_call(&provider, result.success, call_latency);
        result
    }

    /// Wait for a slot on the chosen provider
    async fn admit(
        &self,
        entry: &ProviderEntry,
        started: Instant,
        batch_deadline: Option<Instant>,
    ) -> Result<ProviderSlot, DispatchError> {
        let admission_deadline = started + self.config.admission_timeout();
        let (deadline, batch_bound) = match batch_deadline {
            Some(batch) if batch < admission_deadline => (batch, true),
            _ => (admission_deadline, false),
        };

        let _queued = entry.load.enqueue();
        match tokio::time::timeout_at(deadline, entry.gate.acquire()).await {
            Ok(Ok(permit)) => Ok(entry.load.occupy(&entry.gate, permit)),
            // Gates are never closed while the provider is registered
            Ok(Err(_closed)) => Err(DispatchError::UnknownProvider {
                name: entry.name().to_string(),
            }),
            Err(_elapsed) if batch_bound => Err(DispatchError::BatchTimeout),
            Err(_elapsed) => Err(DispatchError::Timeout {
                stage: TimeoutStage::Admission,
                waited_ms: duration_ms(started.elapsed()),
            }),
        }
    }

    /// Make the provider call while holding `slot`
    ///
    /// Returns the task result and the latency of the call itself.
    async fn invoke(
        &self,
        task: &Task,
        entry: &ProviderEntry,
        slot: ProviderSlot,
        started: Instant,
    ) -> (TaskResult, Duration) {
        let provider = entry.name().to_string();
        let call_timeout = task.timeout.unwrap_or_else(|| self.config.call_timeout());
        let request = ProviderRequest::new(task.prompt.clone(), task.max_tokens, call_timeout);
        let client = Arc::clone(&entry.client);

        let calling = Instant::now();
        let mut call = tokio::spawn(async move {
            let _slot = slot;
            client.send(&request).await
        });

        let result = match tokio::time::timeout(call_timeout, &mut call).await {
            Ok(Ok(Ok(response))) => {
                let result = TaskResult::succeeded(
                    task.id.clone(),
                    provider,
                    response.content,
                    started.elapsed(),
                );
                return (result, response.latency);
            }
            Ok(Ok(Err(err))) => {
                tracing::warn!(
                    task_id = %task.id,
                    provider = %provider,
                    kind = %err.kind,
                    error = %err.message,
                    "Provider call failed"
                );
                let error = DispatchError::ProviderError {
                    provider: provider.clone(),
                    kind: err.kind,
                    message: err.message,
                };
                TaskResult::failed(task.id.clone(), Some(provider), error, started.elapsed())
            }
            Ok(Err(join_err)) => {
                tracing::warn!(
                    task_id = %task.id,
                    provider = %provider,
                    error = %join_err,
                    "Provider call aborted"
                );
                let error = DispatchError::ProviderError {
                    provider: provider.clone(),
                    kind: crate::provider::ProviderErrorKind::Unknown,
                    message: join_err.to_string(),
                };
                TaskResult::failed(task.id.clone(), Some(provider), error, started.elapsed())
            }
            Err(_elapsed) => {
                // Dropping the handle detaches the call; its slot frees when it returns
                drop(call);
                tracing::warn!(
                    task_id = %task.id,
                    provider = %provider,
                    timeout_ms = duration_ms(call_timeout),
                    "Provider call timed out"
                );
                let error = DispatchError::Timeout {
                    stage: TimeoutStage::Call,
                    waited_ms: duration_ms(call_timeout),
                };
                TaskResult::failed(task.id.clone(), Some(provider), error, started.elapsed())
            }
        };
        (result, calling.elapsed())
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("providers", &self.registry.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{ProviderClient, ProviderErrorKind, SimulatedProvider};
    use crate::routing::ProviderConfig;

    fn dispatcher(
        providers: Vec<(ProviderConfig, Arc<SimulatedProvider>)>,
        config: DispatchConfig,
    ) -> Dispatcher {
        let registry = Arc::new(ProviderRegistry::new());
        for (cfg, client) in providers {
            registry
                .register(cfg, client as Arc<dyn ProviderClient>)
                .unwrap();
        }
        Dispatcher::new(registry, Arc::new(StatsCollector::default()), config)
    }

    fn sim(name: &str, latency_ms: u64) -> Arc<SimulatedProvider> {
        Arc::new(SimulatedProvider::new(
            name,
            Duration::from_millis(latency_ms),
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn test_route_success_records_call() {
        let a = sim("a", 50);
        let d = dispatcher(
            vec![(ProviderConfig::new("a", 2, 1.0), a.clone())],
            DispatchConfig::default(),
        );

        let result = d.route(&Task::new("t1", "hello world")).await;
        assert!(result.success);
        assert_eq!(result.provider.as_deref(), Some("a"));
        assert_eq!(result.response, "a: hello world");
        assert!(result.latency >= Duration::from_millis(50));
        assert!(result.latency < Duration::from_millis(60));
        assert_eq!(result.tokens, 6);

        let stats = d.stats().snapshot();
        assert_eq!(stats.total_calls, 1);
        assert_eq!(stats.calls_to("a"), 1);
        assert_eq!(d.stats().in_progress(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_provider_is_not_a_call() {
        let d = dispatcher(
            vec![(ProviderConfig::new("a", 1, 1.0), sim("a", 1))],
            DispatchConfig::default(),
        );

        let result = d.route(&Task::new("t", "p").with_provider("zzz")).await;
        assert!(!result.success);
        assert_eq!(result.provider, None);
        assert_eq!(
            result.error,
            Some(DispatchError::UnknownProvider {
                name: "zzz".to_string()
            })
        );
        assert_eq!(d.stats().snapshot().total_calls, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_provider_error_kind_is_propagated() {
        let x = Arc::new(
            SimulatedProvider::new("x", Duration::from_millis(5))
                .failing_with(ProviderErrorKind::Timeout),
        );
        let d = dispatcher(
            vec![(ProviderConfig::new("x", 1, 1.0), x)],
            DispatchConfig::default(),
        );

        let result = d.route(&Task::new("t", "p").with_provider("x")).await;
        assert!(!result.success);
        assert_eq!(
            result.error.as_ref().and_then(DispatchError::provider_kind),
            Some(ProviderErrorKind::Timeout)
        );
        let stats = d.stats().snapshot();
        assert_eq!(stats.calls_to("x"), 1);
        assert_eq!(stats.failures_of("x"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_admission_timeout_skips_call() {
        let a = sim("a", 1_000);
        let d = Arc::new(dispatcher(
            vec![(ProviderConfig::new("a", 1, 1.0), a.clone())],
            DispatchConfig::default().with_admission_timeout(Duration::from_millis(100)),
        ));

        let first = {
            let d = Arc::clone(&d);
            tokio::spawn(async move { d.route(&Task::new("t1", "p")).await })
        };
        tokio::time::sleep(Duration::from_millis(1)).await;

        let second = d.route(&Task::new("t2", "p")).await;
        assert!(matches!(
            second.error,
            Some(DispatchError::Timeout {
                stage: TimeoutStage::Admission,
                waited_ms
            }) if (100..110).contains(&waited_ms)
        ));
        assert_eq!(second.provider.as_deref(), Some("a"));

        assert!(first.await.unwrap().success);
        assert_eq!(a.calls(), 1);
        assert_eq!(d.stats().snapshot().total_calls, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_timeout_keeps_slot_until_call_returns() {
        let a = sim("a", 500);
        let d = dispatcher(
            vec![(ProviderConfig::new("a", 1, 1.0), a.clone())],
            DispatchConfig::default(),
        );

        let task = Task::new("t", "p").with_timeout(Duration::from_millis(100));
        let result = d.route(&task).await;
        assert_eq!(
            result.error,
            Some(DispatchError::Timeout {
                stage: TimeoutStage::Call,
                waited_ms: 100
            })
        );
        assert_eq!(d.stats().snapshot().calls_to("a"), 1);

        // The detached call still holds the only slot
        assert_eq!(d.registry().load("a").unwrap().in_flight, 1);
        tokio::time::sleep(Duration::from_millis(450)).await;
        assert_eq!(d.registry().load("a").unwrap().in_flight, 0);
        assert_eq!(a.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_deadline_before_admission_timeout() {
        let d = Arc::new(dispatcher(
            vec![(ProviderConfig::new("a", 1, 1.0), sim("a", 1_000))],
            DispatchConfig::default(),
        ));

        let busy = {
            let d = Arc::clone(&d);
            tokio::spawn(async move { d.route(&Task::new("t1", "p")).await })
        };
        tokio::time::sleep(Duration::from_millis(1)).await;

        let deadline = Instant::now() + Duration::from_millis(50);
        let result = d.route_within(&Task::new("t2", "p"), Some(deadline), None).await;
        assert_eq!(result.error, Some(DispatchError::BatchTimeout));

        assert!(busy.await.unwrap().success);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiter_admitted_after_limit_raised() {
        let a = sim("a", 1_000);
        let d = Arc::new(dispatcher(
            vec![(ProviderConfig::new("a", 1, 1.0), a.clone())],
            DispatchConfig::default(),
        ));

        let first = {
            let d = Arc::clone(&d);
            tokio::spawn(async move { d.route(&Task::new("t1", "p")).await })
        };
        tokio::time::sleep(Duration::from_millis(1)).await;
        let second = {
            let d = Arc::clone(&d);
            tokio::spawn(async move { d.route(&Task::new("t2", "p")).await })
        };
        let third = {
            let d = Arc::clone(&d);
            tokio::spawn(async move { d.route(&Task::new("t3", "p")).await })
        };
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(d.registry().load("a").unwrap().queued, 2);

        d.registry().update_limit("a", 2).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        // The running call counts against the raised limit: one waiter moves up
        assert_eq!(a.in_flight(), 2);
        assert_eq!(d.registry().load("a").unwrap().queued, 1);

        for handle in [first, second, third] {
            assert!(handle.await.unwrap().success);
        }
        assert_eq!(a.peak_in_flight(), 2);
        assert_eq!(d.stats().snapshot().total_calls, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lowered_limit_holds_waiters_until_drained() {
        let a = sim("a", 100);
        let d = Arc::new(dispatcher(
            vec![(ProviderConfig::new("a", 3, 1.0), a.clone())],
            DispatchConfig::default(),
        ));

        let handles: Vec<_> = (0..5)
            .map(|i| {
                let d = Arc::clone(&d);
                tokio::spawn(async move { d.route(&Task::new(format!("t{i}"), "p")).await })
            })
            .collect();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(a.in_flight(), 3);

        d.registry().update_limit("a", 1).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(a.in_flight(), 3);

        // Old calls finish at ~100ms; only one waiter fits the new limit
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(a.in_flight(), 1);

        for handle in handles {
            assert!(handle.await.unwrap().success);
        }
        assert_eq!(a.peak_in_flight(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_histogram_uses_provider_latency() {
        let a = sim("a", 50);
        let d = Arc::new(dispatcher(
            vec![(ProviderConfig::new("a", 1, 1.0), a)],
            DispatchConfig::default(),
        ));

        let first = {
            let d = Arc::clone(&d);
            tokio::spawn(async move { d.route(&Task::new("t1", "p")).await })
        };
        tokio::time::sleep(Duration::from_millis(1)).await;
        let second = d.route(&Task::new("t2", "p")).await;
        assert!(first.await.unwrap().success);

        // End to end includes the wait behind t1
        assert!(second.latency >= Duration::from_millis(95));
        let summary = d.stats().summary();
        let latency = &summary.latency_by_provider["a"];
        assert_eq!(latency.count, 2);
        assert_eq!(latency.max_ms, 50);
    }

    #[tokio::test(start_paused = true)]
    async fn test_route_within_uses_given_coordinator() {
        let d = dispatcher(
            vec![
                (ProviderConfig::new("a", 2, 2.0), sim("a", 1)),
                (ProviderConfig::new("b", 2, 1.0), sim("b", 1)),
            ],
            DispatchConfig::default(),
        );
        d.stats().configure_target(Some("b".to_string()), 0.9);

        let result = d.route(&Task::new("t1", "p")).await;
        assert_eq!(result.provider.as_deref(), Some("a"));

        let result = d.route_within(&Task::new("t2", "p"), None, Some("a")).await;
        assert_eq!(result.provider.as_deref(), Some("b"));
    }
}
