//! Dispatch Errors
//!
//! Two families of errors live here:
//!
//! - [`DispatchError`]: per-task failures. These are captured inside the
//!   task's [`TaskResult`](crate::TaskResult) and never cross task boundaries.
//! - [`ContractError`]: caller misuse detected before a batch starts. These are
//!   the only errors a batch submission returns.
//!
//! Registry and statistics errors are kept separate because they surface from
//! reconfiguration calls, not from dispatching.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::provider::ProviderErrorKind;
use crate::task::TaskId;

// ============================================================================
// Per-Task Errors
// ============================================================================

/// Which suspension point a [`DispatchError::Timeout`] expired at
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutStage {
    /// Waiting for a provider concurrency slot
    Admission,
    /// Waiting for the provider call to return
    Call,
}

impl std::fmt::Display for TimeoutStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Admission => write!(f, "admission"),
            Self::Call => write!(f, "provider call"),
        }
    }
}

/// Failure of a single dispatched task
#[derive(Clone, Debug, Error, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DispatchError {
    /// Requested provider is not registered or is disabled
    #[error("Unknown provider: {name}")]
    UnknownProvider {
        /// Name that was requested
        name: String,
    },

    /// Auto-selection found no enabled provider
    #[error("No enabled provider available for automatic selection")]
    NoProviderAvailable,

    /// Admission or the provider call exceeded its deadline
    #[error("Timed out after {waited_ms}ms during {stage}")]
    Timeout {
        /// Where the deadline expired
        stage: TimeoutStage,
        /// How long the task waited at that stage
        waited_ms: u64,
    },

    /// The provider answered with a failure
    #[error("Provider {provider} failed ({kind}): {message}")]
    ProviderError {
        /// Provider that failed
        provider: String,
        /// Failure class reported by the client
        kind: ProviderErrorKind,
        /// Client diagnostic
        message: String,
    },

    /// The batch deadline passed before the task was admitted
    #[error("Batch deadline reached before the task was admitted")]
    BatchTimeout,

    /// The worker running the task panicked or vanished without a result
    #[error("Worker failed: {message}")]
    WorkerFailed {
        /// Panic payload or other diagnostic
        message: String,
    },
}

impl DispatchError {
    /// Provider-reported failure kind, if this error came from a provider
    #[must_use]
    pub fn provider_kind(&self) -> Option<ProviderErrorKind> {
        match self {
            Self::ProviderError { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Whether this error represents any kind of timeout
    ///
    /// Covers dispatcher-side deadlines, the batch deadline, and providers
    /// that reported a timeout themselves.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. }
                | Self::BatchTimeout
                | Self::ProviderError {
                    kind: ProviderErrorKind::Timeout,
                    ..
                }
        )
    }

    /// Whether the provider was actually called before this error arose
    #[must_use]
    pub fn provider_was_called(&self) -> bool {
        matches!(
            self,
            Self::ProviderError { .. }
                | Self::Timeout {
                    stage: TimeoutStage::Call,
                    ..
                }
        )
    }
}

// ============================================================================
// Batch Contract Errors
// ============================================================================

/// Caller contract violations rejected before any dispatch begins
#[derive(Clone, Debug, Error, PartialEq)]
pub enum ContractError {
    /// Global worker cap of zero would never admit anything
    #[error("max_workers must be at least 1")]
    ZeroWorkers,

    /// Two tasks in one batch share an id
    #[error("Duplicate task id in batch: {0}")]
    DuplicateTaskId(TaskId),

    /// A task asked for zero output tokens
    #[error("Task {0} has a zero token budget")]
    ZeroTokenBudget(TaskId),

    /// No task in the batch can reach any provider
    #[error("No task in the batch can be routed (requested: {requested:?})")]
    NoRoutableTasks {
        /// Distinct unresolvable provider names requested by the batch
        requested: Vec<String>,
    },

    /// Threshold must be a fraction
    #[error("Target threshold {0} is outside [0, 1]")]
    InvalidThreshold(f64),

    /// Coordinator must be a registered provider
    #[error("Unknown coordinator provider: {0}")]
    UnknownCoordinator(String),
}

// ============================================================================
// Registry Errors
// ============================================================================

/// Errors from registering or reconfiguring providers
#[derive(Clone, Debug, Error, PartialEq)]
pub enum RegistryError {
    /// Name is not registered
    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    /// Name is already registered
    #[error("Provider already registered: {0}")]
    DuplicateProvider(String),

    /// Concurrency limit must be positive
    #[error("Concurrency limit for {name} must be positive (got {limit})")]
    InvalidLimit {
        /// Provider name
        name: String,
        /// Rejected limit
        limit: usize,
    },

    /// Speed weight must be positive and finite
    #[error("Speed weight for {name} must be positive and finite (got {weight})")]
    InvalidWeight {
        /// Provider name
        name: String,
        /// Rejected weight
        weight: f64,
    },
}

// ============================================================================
// Statistics Errors
// ============================================================================

/// Errors from the statistics collector
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StatsError {
    /// Reset is only valid between batches
    #[error("Cannot reset statistics while {0} dispatches are in progress")]
    DispatchInProgress(usize),
}
