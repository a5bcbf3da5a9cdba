//! Provider Integration
//!
//! Access to external providers through the [`ProviderClient`] trait.
//!
//! # Available Clients
//!
//! - [`HttpProviderClient`]: OpenAI-compatible, Anthropic, Gemini and Cohere
//!   HTTP APIs
//! - [`SimulatedProvider`]: in-process client with fixed latency, for tests and
//!   smoke runs
//!
//! The set of vendors is closed: every configured provider names a
//! [`ProviderKind`], and `Custom` covers clients registered in code.

mod client;
mod http;
mod simulated;

use serde::{Deserialize, Serialize};

pub use client::{
    ProviderClient, ProviderError, ProviderErrorKind, ProviderRequest, ProviderResponse,
};
pub use http::{ApiDialect, HttpProviderClient};
pub use simulated::SimulatedProvider;

/// Supported provider vendors
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Anthropic messages API
    Anthropic,
    /// OpenAI chat completions
    OpenAi,
    /// Google Gemini
    Google,
    /// Groq (OpenAI-compatible)
    Groq,
    /// Cohere chat
    Cohere,
    /// Fireworks (OpenAI-compatible)
    Fireworks,
    /// xAI Grok (OpenAI-compatible), the default coordinator
    Grok,
    /// Client registered programmatically
    Custom,
}

impl ProviderKind {
    /// Vendors with a built-in HTTP client, in default registration order
    pub const BUILT_IN: [Self; 7] = [
        Self::Groq,
        Self::Fireworks,
        Self::OpenAi,
        Self::Anthropic,
        Self::Google,
        Self::Cohere,
        Self::Grok,
    ];

    /// Default registry name
    #[must_use]
    pub fn default_name(&self) -> &'static str {
        match self {
            Self::Anthropic => "anthropic",
            Self::OpenAi => "openai",
            Self::Google => "google",
            Self::Groq => "groq",
            Self::Cohere => "cohere",
            Self::Fireworks => "fireworks",
            Self::Grok => "grok",
            Self::Custom => "custom",
        }
    }

    /// Environment variable holding the API key
    #[must_use]
    pub fn api_key_env(&self) -> Option<&'static str> {
        match self {
            Self::Anthropic => Some("ANTHROPIC_API_KEY"),
            Self::OpenAi => Some("OPENAI_API_KEY"),
            Self::Google => Some("GOOGLE_API_KEY"),
            Self::Groq => Some("GROQ_API_KEY"),
            Self::Cohere => Some("COHERE_API_KEY"),
            Self::Fireworks => Some("FIREWORKS_API_KEY"),
            Self::Grok => Some("XAI_API_KEY"),
            Self::Custom => None,
        }
    }

    /// Default model identifier
    #[must_use]
    pub fn default_model(&self) -> &'static str {
        match self {
            Self::Anthropic => "claude-sonnet-4-5-20250929",
            Self::OpenAi => "gpt-5",
            Self::Google => "gemini-2.5-flash",
            Self::Groq => "llama-3.3-70b-versatile",
            Self::Cohere => "command-a-03-2025",
            Self::Fireworks => "accounts/fireworks/models/llama-v3p3-70b-instruct",
            Self::Grok => "grok-4",
            Self::Custom => "",
        }
    }

    /// Default API base URL
    #[must_use]
    pub fn default_base_url(&self) -> &'static str {
        match self {
            Self::Anthropic => "https://api.anthropic.com",
            Self::OpenAi => "https://api.openai.com/v1",
            Self::Google => "https://generativelanguage.googleapis.com",
            Self::Groq => "https://api.groq.com/openai/v1",
            Self::Cohere => "https://api.cohere.ai",
            Self::Fireworks => "https://api.fireworks.ai/inference/v1",
            Self::Grok => "https://api.x.ai/v1",
            Self::Custom => "",
        }
    }

    /// Default max concurrent calls
    #[must_use]
    pub fn default_concurrency(&self) -> usize {
        match self {
            Self::Groq => 8,
            Self::OpenAi | Self::Fireworks => 5,
            Self::Anthropic => 4,
            Self::Google | Self::Cohere => 3,
            Self::Grok => 2,
            Self::Custom => 1,
        }
    }

    /// Default relative speed weight (higher = preferred by auto-selection)
    #[must_use]
    pub fn default_speed_weight(&self) -> f64 {
        match self {
            Self::Groq => 1.0,
            Self::Fireworks => 0.9,
            Self::Google => 0.85,
            Self::OpenAi => 0.75,
            Self::Anthropic => 0.7,
            Self::Cohere => 0.6,
            Self::Grok => 0.5,
            Self::Custom => 0.5,
        }
    }

    /// Wire format spoken by this vendor
    #[must_use]
    pub fn dialect(&self) -> Option<ApiDialect> {
        match self {
            Self::OpenAi => Some(ApiDialect::OpenAiCompletionTokens),
            Self::Groq | Self::Fireworks | Self::Grok => Some(ApiDialect::OpenAiChat),
            Self::Anthropic => Some(ApiDialect::AnthropicMessages),
            Self::Google => Some(ApiDialect::GeminiGenerate),
            Self::Cohere => Some(ApiDialect::CohereChat),
            Self::Custom => None,
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.default_name())
    }
}
