//! Routing Configuration
//!
//! Provider descriptors and dispatcher timeouts.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::provider::ProviderKind;

// ============================================================================
// Provider Descriptor
// ============================================================================

/// Static descriptor for one registered provider
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Unique registry key
    pub name: String,

    /// Vendor behind this provider
    pub kind: ProviderKind,

    /// Maximum simultaneous in-flight calls
    pub concurrency_limit: usize,

    /// Relative speed, higher wins auto-selection
    pub speed_weight: f64,

    /// Whether the provider accepts calls
    pub enabled: bool,
}

impl ProviderConfig {
    /// Create an enabled provider of kind `Custom`
    pub fn new(name: impl Into<String>, concurrency_limit: usize, speed_weight: f64) -> Self {
        Self {
            name: name.into(),
            kind: ProviderKind::Custom,
            concurrency_limit,
            speed_weight,
            enabled: true,
        }
    }

    /// Descriptor for a built-in vendor with its default limits
    #[must_use]
    pub fn for_kind(kind: ProviderKind) -> Self {
        Self {
            name: kind.default_name().to_string(),
            kind,
            concurrency_limit: kind.default_concurrency(),
            speed_weight: kind.default_speed_weight(),
            enabled: true,
        }
    }

    /// Set the vendor kind
    #[must_use]
    pub fn with_kind(mut self, kind: ProviderKind) -> Self {
        self.kind = kind;
        self
    }

    /// Mark the provider disabled
    #[must_use]
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

// ============================================================================
// Dispatch Timeouts
// ============================================================================

/// Timeouts applied by the dispatcher to every task
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// How long a task may wait for a provider slot
    pub admission_timeout_ms: u64,

    /// How long a provider call may run (tasks can override)
    pub call_timeout_ms: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            admission_timeout_ms: 30_000, // 30s queue wait
            call_timeout_ms: 120_000,     // 2min for long generations
        }
    }
}

impl DispatchConfig {
    /// Admission timeout as a Duration
    #[must_use]
    pub fn admission_timeout(&self) -> Duration {
        Duration::from_millis(self.admission_timeout_ms)
    }

    /// Call timeout as a Duration
    #[must_use]
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    /// Set the admission timeout
    #[must_use]
    pub fn with_admission_timeout(mut self, timeout: Duration) -> Self {
        self.admission_timeout_ms = duration_ms(timeout);
        self
    }

    /// Set the call timeout
    #[must_use]
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout_ms = duration_ms(timeout);
        self
    }
}

pub(crate) fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
