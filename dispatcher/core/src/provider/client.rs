//! Provider Client Trait
//!
//! The single capability the dispatcher consumes from an external provider:
//! submit a prompt with a token budget, get a response or a classified error.
//!
//! # Design
//!
//! Clients are opaque I/O. They are shared behind `Arc<dyn ProviderClient>`
//! and may be called concurrently up to the provider's concurrency limit; the
//! dispatcher owns admission control, so clients do no throttling of their own.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classification of provider failures
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderErrorKind {
    /// Provider did not answer in time
    Timeout,
    /// Credentials rejected
    AuthError,
    /// Provider throttled the request
    RateLimited,
    /// Anything else (transport errors, bad payloads, 5xx)
    Unknown,
}

impl std::fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timeout => write!(f, "timeout"),
            Self::AuthError => write!(f, "auth error"),
            Self::RateLimited => write!(f, "rate limited"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Error returned by a provider client
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct ProviderError {
    /// Failure class
    pub kind: ProviderErrorKind,
    /// Human-readable detail
    pub message: String,
}

impl ProviderError {
    /// Create an error of the given kind
    pub fn new(kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Timeout error
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Timeout, message)
    }

    /// Authentication error
    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::AuthError, message)
    }

    /// Rate limit error
    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::RateLimited, message)
    }

    /// Unclassified error
    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Unknown, message)
    }
}

/// A single provider call
#[derive(Clone, Debug)]
pub struct ProviderRequest {
    /// Prompt text
    pub prompt: String,
    /// Output token budget
    pub max_tokens: u32,
    /// Deadline the client should honour for its own I/O
    pub timeout: Duration,
}

impl ProviderRequest {
    /// Create a request
    pub fn new(prompt: impl Into<String>, max_tokens: u32, timeout: Duration) -> Self {
        Self {
            prompt: prompt.into(),
            max_tokens,
            timeout,
        }
    }
}

/// Successful provider response
#[derive(Clone, Debug)]
pub struct ProviderResponse {
    /// Response text
    pub content: String,
    /// Time the provider took, as measured by the client
    pub latency: Duration,
}

/// Trait for provider clients
///
/// Implement this trait to plug a new backend into the dispatcher.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// Client label for logs (e.g. "openai-compatible", "simulated")
    fn name(&self) -> &str;

    /// Send a prompt and wait for the complete response
    async fn send(&self, request: &ProviderRequest) -> Result<ProviderResponse, ProviderError>;
}
