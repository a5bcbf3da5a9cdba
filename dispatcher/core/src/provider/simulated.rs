//! Simulated Provider
//!
//! In-process client with a fixed latency and an optional failure mode.
//! Tracks how many calls it is serving at once so tests can check the
//! dispatcher's per-provider cap from the provider's side.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use super::client::{
    ProviderClient, ProviderError, ProviderErrorKind, ProviderRequest, ProviderResponse,
};

/// Deterministic stand-in for an external provider
#[derive(Debug)]
pub struct SimulatedProvider {
    name: String,
    latency: Duration,
    failure: Option<ProviderErrorKind>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    calls: AtomicU64,
}

/// Decrements the in-flight counter even if the call future is dropped
struct ServingGuard<'a>(&'a AtomicUsize);

impl Drop for ServingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl SimulatedProvider {
    /// Create a provider that answers every prompt after `latency`
    pub fn new(name: impl Into<String>, latency: Duration) -> Self {
        Self {
            name: name.into(),
            latency,
            failure: None,
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
            calls: AtomicU64::new(0),
        }
    }

    /// Fail every call with `kind` after the configured latency
    #[must_use]
    pub fn failing_with(mut self, kind: ProviderErrorKind) -> Self {
        self.failure = Some(kind);
        self
    }

    /// Calls received so far
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Calls currently being served
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of calls served at once
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProviderClient for SimulatedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, request: &ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let serving = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(serving, Ordering::SeqCst);
        let _guard = ServingGuard(&self.in_flight);

        tokio::time::sleep(self.latency).await;

        if let Some(kind) = self.failure {
            return Err(ProviderError::new(
                kind,
                format!("{} simulated {kind}", self.name),
            ));
        }

        Ok(ProviderResponse {
            content: format!("{}: {}", self.name, request.prompt),
            latency: self.latency,
        })
    }
}
