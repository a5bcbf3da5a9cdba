//! Task Types
//!
//! Work items submitted to the dispatcher and the results they produce.
//!
//! A [`Task`] is built by the caller and never mutated afterwards. Every task
//! yields exactly one [`TaskResult`], tagged with the originating [`TaskId`]
//! so callers can re-associate results that complete out of order.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::DispatchError;

/// Default output token budget when the caller does not set one
pub const DEFAULT_MAX_TOKENS: u32 = 1000;

/// Task identifier, unique within a batch
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(pub String);

impl TaskId {
    /// Create a task ID from a string
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a new unique task ID
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("task_{}", uuid::Uuid::new_v4().simple()))
    }

    /// Get the string value
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TaskId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for TaskId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// An immutable unit of work
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Unique id within the batch
    pub id: TaskId,
    /// Opaque prompt payload
    pub prompt: String,
    /// Output token budget (must be positive)
    pub max_tokens: u32,
    /// Explicit provider, or `None` for automatic selection
    pub requested_provider: Option<String>,
    /// Call timeout override for this task
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,
}

impl Task {
    /// Create an auto-routed task with the default token budget
    pub fn new(id: impl Into<TaskId>, prompt: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            prompt: prompt.into(),
            max_tokens: DEFAULT_MAX_TOKENS,
            requested_provider: None,
            timeout: None,
        }
    }

    /// Set the output token budget
    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Pin the task to a specific provider
    #[must_use]
    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.requested_provider = Some(provider.into());
        self
    }

    /// Override the call timeout for this task
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Outcome of dispatching one task
///
/// `error` is present exactly when `success` is false. Results are only
/// constructed inside the crate so that invariant cannot be broken.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    /// Originating task
    pub task_id: TaskId,
    /// Provider actually used (`None` if no provider was resolved)
    pub provider: Option<String>,
    /// Response payload, empty on failure
    pub response: String,
    /// Whether the provider produced a response
    pub success: bool,
    /// Time from dispatch start to resolution
    pub latency: Duration,
    /// Estimated output tokens
    pub tokens: u32,
    /// Failure detail, present iff `success` is false
    pub error: Option<DispatchError>,
}

impl TaskResult {
    pub(crate) fn succeeded(
        task_id: TaskId,
        provider: String,
        response: String,
        latency: Duration,
    ) -> Self {
        let tokens = estimate_tokens(&response);
        Self {
            task_id,
            provider: Some(provider),
            response,
            success: true,
            latency,
            tokens,
            error: None,
        }
    }

    pub(crate) fn failed(
        task_id: TaskId,
        provider: Option<String>,
        error: DispatchError,
        latency: Duration,
    ) -> Self {
        Self {
            task_id,
            provider,
            response: String::new(),
            success: false,
            latency,
            tokens: 0,
            error: Some(error),
        }
    }

    /// Whether the task failed because of a timeout of any kind
    #[must_use]
    pub fn timed_out(&self) -> bool {
        self.error.as_ref().is_some_and(DispatchError::is_timeout)
    }
}

/// Rough output token estimate: two tokens per whitespace-separated word
#[must_use]
pub fn estimate_tokens(text: &str) -> u32 {
    let words = text.split_whitespace().count();
    u32::try_from(words.saturating_mul(2)).unwrap_or(u32::MAX)
}
