//! Provider Validation
//!
//! Probes every enabled provider in parallel with a one-line prompt and
//! reports which ones answered. Used before a batch run to confirm that
//! enough providers are reachable to spread load.
//!
//! Probes go through each provider's admission gate, so they never exceed a
//! provider's concurrency limit, but they are not dispatches and do not
//! touch routing statistics.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::provider::ProviderRequest;
use crate::routing::config::duration_ms;
use crate::routing::registry::ProviderEntry;
use crate::routing::ProviderRegistry;

/// Working providers required by default
pub const DEFAULT_MIN_WORKING: usize = 3;

/// Output budget for a probe
const PROBE_MAX_TOKENS: u32 = 100;

/// Longest diagnostic kept per failed probe
const MAX_PROBE_ERROR: usize = 100;

/// Result of probing one provider
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProbeOutcome {
    /// Provider probed
    pub provider: String,
    /// Whether the provider answered
    pub success: bool,
    /// Time until answer, failure or timeout
    pub latency: Duration,
    /// Trimmed response text on success
    pub response: Option<String>,
    /// Truncated error on failure
    pub error: Option<String>,
}

/// Aggregate validation result
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    /// One outcome per enabled provider, in registration order
    pub outcomes: Vec<ProbeOutcome>,
    /// Working providers needed to pass
    pub min_working: usize,
}

impl ValidationReport {
    /// Providers that answered
    #[must_use]
    pub fn working(&self) -> usize {
        self.outcomes.iter().filter(|o| o.success).count()
    }

    /// Providers that failed
    #[must_use]
    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.working()
    }

    /// Whether at least `min_working` providers answered
    #[must_use]
    pub fn passed(&self) -> bool {
        self.working() >= self.min_working
    }
}

impl std::fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for outcome in &self.outcomes {
            if outcome.success {
                writeln!(
                    f,
                    "OK   {:12} | {:>6.2}s | {}",
                    outcome.provider,
                    outcome.latency.as_secs_f64(),
                    outcome.response.as_deref().unwrap_or("")
                )?;
            } else {
                writeln!(
                    f,
                    "FAIL {:12} | {}",
                    outcome.provider,
                    outcome.error.as_deref().unwrap_or("")
                )?;
            }
        }
        write!(
            f,
            "{} working, {} failed (need {})",
            self.working(),
            self.failed(),
            self.min_working
        )
    }
}

/// The prompt sent to a provider during validation
#[must_use]
pub fn probe_prompt(provider: &str) -> String {
    format!("Reply with just: {}_OK", provider.to_uppercase())
}

/// Probe every enabled provider concurrently
pub async fn validate_providers(
    registry: &ProviderRegistry,
    min_working: usize,
    timeout: Duration,
) -> ValidationReport {
    let entries: Vec<Arc<ProviderEntry>> = registry
        .snapshot()
        .into_iter()
        .filter(|e| e.config.enabled)
        .collect();

    tracing::info!(providers = entries.len(), min_working, "Validating providers");

    let outcomes = join_all(entries.iter().map(|entry| probe(entry, timeout))).await;
    let report = ValidationReport {
        outcomes,
        min_working,
    };

    tracing::info!(
        working = report.working(),
        failed = report.failed(),
        passed = report.passed(),
        "Provider validation finished"
    );
    report
}

async fn probe(entry: &ProviderEntry, timeout: Duration) -> ProbeOutcome {
    let provider = entry.name().to_string();
    let started = Instant::now();
    let request = ProviderRequest::new(probe_prompt(&provider), PROBE_MAX_TOKENS, timeout);

    let attempt = async {
        let permit = entry
            .gate
            .acquire()
            .await
            .map_err(|_| "provider gate closed".to_string())?;
        let _slot = entry.load.occupy(&entry.gate, permit);
        entry
            .client
            .send(&request)
            .await
            .map_err(|e| e.to_string())
    };

    let result = match tokio::time::timeout(timeout, attempt).await {
        Ok(result) => result,
        Err(_) => Err(format!("timed out after {}ms", timeout.as_millis())),
    };
    let latency = started.elapsed();

    match result {
        Ok(response) => {
            tracing::debug!(provider = %provider, latency_ms = duration_ms(latency), "Probe succeeded");
            ProbeOutcome {
                provider,
                success: true,
                latency,
                response: Some(response.content.trim().to_string()),
                error: None,
            }
        }
        Err(error) => {
            tracing::warn!(provider = %provider, error = %error, "Probe failed");
            ProbeOutcome {
                provider,
                success: false,
                latency,
                response: None,
                error: Some(error.chars().take(MAX_PROBE_ERROR).collect()),
            }
        }
    }
}
