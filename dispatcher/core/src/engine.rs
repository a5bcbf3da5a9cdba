//! Parallel Execution Engine
//!
//! Runs a batch of tasks concurrently and collects exactly one result per
//! task.
//!
//! # Admission
//!
//! Every task passes two independent gates before its provider is called:
//!
//! ```text
//! task ──> global worker slot ──> provider slot ──> call
//!          (max_workers)          (concurrency_limit)
//! ```
//!
//! A batch deadline resolves tasks still waiting at either gate as
//! [`DispatchError::BatchTimeout`]. Calls already in flight run to completion.
//!
//! # Panics
//!
//! Each task runs in its own tokio task with unwinding caught, so a panic
//! becomes a [`DispatchError::WorkerFailed`] result for that task alone.
//!
//! # Offload Target
//!
//! A batch's `coordinator_provider` and `target_threshold` are written into
//! the shared [`StatsCollector`](crate::routing::StatsCollector) and stay in
//! effect for later batches until changed. Auto-selection does not read the
//! collector mid-batch: each batch resolves its coordinator once at submit
//! time, so concurrent batches never steer each other's routing.

use std::any::Any;
use std::collections::{BTreeSet, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;

use crate::error::{ContractError, DispatchError};
use crate::routing::config::duration_ms;
use crate::routing::{Dispatcher, RoutingStats};
use crate::task::{Task, TaskId, TaskResult};

/// Global worker cap used when the caller does not set one
pub const DEFAULT_MAX_WORKERS: usize = 16;

/// Per-batch overrides
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchOptions {
    /// Global worker cap for this batch
    pub max_workers: Option<usize>,
    /// Time after which tasks still waiting for admission give up
    pub batch_deadline: Option<Duration>,
    /// Provider whose share of calls the offload target measures
    ///
    /// Excluded from this batch's auto-selection. Also becomes the
    /// collector's coordinator until another batch or caller changes it.
    pub coordinator_provider: Option<String>,
    /// Required offload fraction in `[0, 1]`; persists in the collector
    pub target_threshold: Option<f64>,
}

impl BatchOptions {
    /// Set the global worker cap
    #[must_use]
    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = Some(max_workers);
        self
    }

    /// Set the batch deadline
    #[must_use]
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.batch_deadline = Some(deadline);
        self
    }

    /// Set the coordinator provider
    #[must_use]
    pub fn with_coordinator(mut self, provider: impl Into<String>) -> Self {
        self.coordinator_provider = Some(provider.into());
        self
    }

    /// Set the offload target
    #[must_use]
    pub fn with_target_threshold(mut self, threshold: f64) -> Self {
        self.target_threshold = Some(threshold);
        self
    }
}

/// Results of one batch
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BatchOutcome {
    /// One result per submitted task, in completion order
    pub results: Vec<TaskResult>,
    /// Statistics snapshot taken after the batch finished
    pub stats: RoutingStats,
    /// Wall time of the batch
    pub elapsed: Duration,
}

impl BatchOutcome {
    /// Result for a task id
    #[must_use]
    pub fn result(&self, id: &TaskId) -> Option<&TaskResult> {
        self.results.iter().find(|r| &r.task_id == id)
    }

    /// Number of successful tasks
    #[must_use]
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.success).count()
    }

    /// Number of failed tasks
    #[must_use]
    pub fn failed(&self) -> usize {
        self.results.len() - self.succeeded()
    }
}

/// Runs batches against a shared dispatcher
#[derive(Debug)]
pub struct ExecutionEngine {
    dispatcher: Arc<Dispatcher>,
    max_workers: usize,
}

impl ExecutionEngine {
    /// Create an engine with a default global worker cap
    pub fn new(dispatcher: Arc<Dispatcher>, max_workers: usize) -> Result<Self, ContractError> {
        if max_workers == 0 {
            return Err(ContractError::ZeroWorkers);
        }
        Ok(Self {
            dispatcher,
            max_workers,
        })
    }

    /// Underlying dispatcher
    #[must_use]
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Default global worker cap
    #[must_use]
    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Current statistics snapshot
    #[must_use]
    pub fn stats(&self) -> RoutingStats {
        self.dispatcher.stats().snapshot()
    }

    /// Run a batch with default options
    pub async fn execute_all(&self, tasks: Vec<Task>) -> Result<Vec<TaskResult>, ContractError> {
        Ok(self.submit(tasks, BatchOptions::default()).await?.results)
    }

    /// Run a batch
    ///
    /// Contract violations are reported before any task is dispatched.
    /// Everything else, including unknown providers on individual tasks, is
    /// captured in that task's result.
    pub async fn submit(
        &self,
        tasks: Vec<Task>,
        options: BatchOptions,
    ) -> Result<BatchOutcome, ContractError> {
        let max_workers = self.validate(&tasks, &options)?;
        self.apply_target(&options);

        let started = Instant::now();
        let deadline = options.batch_deadline.map(|d| started + d);
        let coordinator: Option<Arc<str>> = options
            .coordinator_provider
            .clone()
            .or_else(|| self.dispatcher.stats().coordinator())
            .map(Arc::from);
        let ids: Vec<TaskId> = tasks.iter().map(|t| t.id.clone()).collect();

        tracing::info!(
            tasks = tasks.len(),
            max_workers,
            deadline = ?options.batch_deadline,
            coordinator = coordinator.as_deref().unwrap_or("-"),
            "Starting batch"
        );

        let workers = Arc::new(Semaphore::new(max_workers));
        let mut join_set = JoinSet::new();
        for task in tasks {
            let dispatcher = Arc::clone(&self.dispatcher);
            let workers = Arc::clone(&workers);
            let coordinator = coordinator.clone();
            join_set.spawn(async move {
                let id = task.id.clone();
                let run = run_task(dispatcher, workers, task, deadline, coordinator);
                AssertUnwindSafe(run)
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|panic| {
                        let message = panic_message(panic.as_ref());
                        tracing::warn!(task_id = %id, error = %message, "Worker panicked");
                        worker_failure(id, message)
                    })
            });
        }

        let mut results = Vec::with_capacity(ids.len());
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(err) => tracing::warn!(error = %err, "Worker ended without a result"),
            }
        }
        fill_missing(&ids, &mut results);

        let outcome = BatchOutcome {
            results,
            stats: self.stats(),
            elapsed: started.elapsed(),
        };

        tracing::info!(
            succeeded = outcome.succeeded(),
            failed = outcome.failed(),
            elapsed_ms = duration_ms(outcome.elapsed),
            offload = outcome.stats.offload_percentage(),
            target_met = outcome.stats.target_met(),
            "Batch finished"
        );

        Ok(outcome)
    }

    /// Check the batch against the caller contract; returns the worker cap
    fn validate(&self, tasks: &[Task], options: &BatchOptions) -> Result<usize, ContractError> {
        let max_workers = options.max_workers.unwrap_or(self.max_workers);
        if max_workers == 0 {
            return Err(ContractError::ZeroWorkers);
        }

        if let Some(threshold) = options.target_threshold {
            if !(0.0..=1.0).contains(&threshold) {
                return Err(ContractError::InvalidThreshold(threshold));
            }
        }

        let registry = self.dispatcher.registry();
        if let Some(coordinator) = &options.coordinator_provider {
            if registry.get(coordinator).is_err() {
                return Err(ContractError::UnknownCoordinator(coordinator.clone()));
            }
        }

        let mut seen = HashSet::with_capacity(tasks.len());
        for task in tasks {
            if !seen.insert(&task.id) {
                return Err(ContractError::DuplicateTaskId(task.id.clone()));
            }
            if task.max_tokens == 0 {
                return Err(ContractError::ZeroTokenBudget(task.id.clone()));
            }
        }

        let has_enabled = registry.has_enabled();
        let routable = tasks.iter().any(|task| match &task.requested_provider {
            Some(name) => registry.is_routable(name),
            None => has_enabled,
        });
        if !tasks.is_empty() && !routable {
            let requested: BTreeSet<String> = tasks
                .iter()
                .filter_map(|t| t.requested_provider.clone())
                .collect();
            return Err(ContractError::NoRoutableTasks {
                requested: requested.into_iter().collect(),
            });
        }

        Ok(max_workers)
    }

    fn apply_target(&self, options: &BatchOptions) {
        if options.coordinator_provider.is_none() && options.target_threshold.is_none() {
            return;
        }
        let stats = self.dispatcher.stats();
        let current = stats.snapshot();
        stats.configure_target(
            options
                .coordinator_provider
                .clone()
                .or(current.coordinator_provider),
            options.target_threshold.unwrap_or(current.target_threshold),
        );
    }
}

/// Wait for a worker slot, then dispatch
async fn run_task(
    dispatcher: Arc<Dispatcher>,
    workers: Arc<Semaphore>,
    task: Task,
    deadline: Option<Instant>,
    coordinator: Option<Arc<str>>,
) -> TaskResult {
    let waiting = Instant::now();
    let acquire = workers.acquire_owned();
    let permit = match deadline {
        Some(deadline) => match tokio::time::timeout_at(deadline, acquire).await {
            Ok(permit) => permit,
            Err(_elapsed) => {
                tracing::debug!(task_id = %task.id, "Batch deadline reached waiting for a worker");
                return TaskResult::failed(
                    task.id,
                    None,
                    DispatchError::BatchTimeout,
                    waiting.elapsed(),
                );
            }
        },
        None => acquire.await,
    };

    // The worker semaphore is owned by this batch and never closed
    let Ok(_permit) = permit else {
        return worker_failure(task.id, "worker pool closed".to_string());
    };

    dispatcher
        .route_within(&task, deadline, coordinator.as_deref())
        .await
}

fn worker_failure(task_id: TaskId, message: String) -> TaskResult {
    TaskResult::failed(
        task_id,
        None,
        DispatchError::WorkerFailed { message },
        Duration::ZERO,
    )
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("worker panicked: {message}")
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("worker panicked: {message}")
    } else {
        "worker panicked".to_string()
    }
}

/// Add a failure for every task that produced no result
fn fill_missing(ids: &[TaskId], results: &mut Vec<TaskResult>) {
    let returned: HashSet<TaskId> = results.iter().map(|r| r.task_id.clone()).collect();
    for id in ids {
        if !returned.contains(id) {
            results.push(worker_failure(
                id.clone(),
                "worker ended without a result".to_string(),
            ));
        }
    }
}
