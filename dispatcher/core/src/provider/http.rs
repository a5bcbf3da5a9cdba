//! HTTP Provider Clients
//!
//! One client type covering the four wire formats spoken by the supported
//! vendors:
//!
//! - `/chat/completions` (OpenAI, Groq, Fireworks, xAI)
//! - `/v1/messages` (Anthropic)
//! - `/v1beta/models/{model}:generateContent` (Google Gemini)
//! - `/v1/chat` (Cohere)
//!
//! Status codes are mapped onto [`ProviderErrorKind`]: 401/403 are auth
//! errors, 429 is rate limiting, client-side timeouts are timeouts, and
//! everything else is unknown.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::{json, Value};

use super::client::{
    ProviderClient, ProviderError, ProviderErrorKind, ProviderRequest, ProviderResponse,
};
use super::ProviderKind;

/// Longest error body kept in diagnostics
const MAX_ERROR_BODY: usize = 200;

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Wire format of a provider API
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApiDialect {
    /// OpenAI-compatible chat completions
    OpenAiChat,
    /// OpenAI's own chat completions; current models take
    /// `max_completion_tokens` instead of `max_tokens`
    OpenAiCompletionTokens,
    /// Anthropic messages
    AnthropicMessages,
    /// Google Gemini content generation
    GeminiGenerate,
    /// Cohere chat
    CohereChat,
}

impl ApiDialect {
    /// JSON pointer to the response text
    fn content_pointer(self) -> &'static str {
        match self {
            Self::OpenAiChat | Self::OpenAiCompletionTokens => "/choices/0/message/content",
            Self::AnthropicMessages => "/content/0/text",
            Self::GeminiGenerate => "/candidates/0/content/parts/0/text",
            Self::CohereChat => "/text",
        }
    }
}

/// HTTP client for one configured provider
#[derive(Clone)]
pub struct HttpProviderClient {
    label: String,
    dialect: ApiDialect,
    base_url: String,
    model: String,
    api_key: String,
    http_client: reqwest::Client,
}

impl std::fmt::Debug for HttpProviderClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpProviderClient")
            .field("label", &self.label)
            .field("dialect", &self.dialect)
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

impl HttpProviderClient {
    /// Create a client speaking `dialect` against `base_url`
    pub fn new(
        label: impl Into<String>,
        dialect: ApiDialect,
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Result<Self, ProviderError> {
        let http_client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| ProviderError::unknown(format!("failed to build HTTP client: {e}")))?;
        let base_url: String = base_url.into();

        Ok(Self {
            label: label.into(),
            dialect,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.into(),
            api_key: api_key.into(),
            http_client,
        })
    }

    /// Create a client for a built-in vendor with its default endpoint
    pub fn for_kind(
        kind: ProviderKind,
        model: Option<&str>,
        base_url: Option<&str>,
        api_key: impl Into<String>,
    ) -> Result<Self, ProviderError> {
        let dialect = kind.dialect().ok_or_else(|| {
            ProviderError::unknown(format!("{kind} providers have no built-in HTTP client"))
        })?;
        Self::new(
            kind.default_name(),
            dialect,
            base_url.unwrap_or(kind.default_base_url()),
            model.unwrap_or(kind.default_model()),
            api_key,
        )
    }

    /// Model this client targets
    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Rename the client (used when several registry entries share a vendor)
    pub fn set_label(&mut self, label: impl Into<String>) {
        self.label = label.into();
    }

    fn endpoint(&self) -> String {
        match self.dialect {
            ApiDialect::OpenAiChat | ApiDialect::OpenAiCompletionTokens => {
                format!("{}/chat/completions", self.base_url)
            }
            ApiDialect::AnthropicMessages => format!("{}/v1/messages", self.base_url),
            ApiDialect::GeminiGenerate => format!(
                "{}/v1beta/models/{}:generateContent",
                self.base_url, self.model
            ),
            ApiDialect::CohereChat => format!("{}/v1/chat", self.base_url),
        }
    }

    fn body(&self, request: &ProviderRequest) -> Value {
        match self.dialect {
            ApiDialect::OpenAiChat | ApiDialect::AnthropicMessages => json!({
                "model": self.model,
                "max_tokens": request.max_tokens,
                "messages": [{ "role": "user", "content": request.prompt }],
            }),
            ApiDialect::OpenAiCompletionTokens => json!({
                "model": self.model,
                "max_completion_tokens": request.max_tokens,
                "messages": [{ "role": "user", "content": request.prompt }],
            }),
            ApiDialect::GeminiGenerate => json!({
                "contents": [{ "parts": [{ "text": request.prompt }] }],
                "generationConfig": { "maxOutputTokens": request.max_tokens },
            }),
            ApiDialect::CohereChat => json!({
                "model": self.model,
                "message": request.prompt,
                "max_tokens": request.max_tokens,
            }),
        }
    }

    fn build(&self, request: &ProviderRequest) -> reqwest::RequestBuilder {
        let builder = self
            .http_client
            .post(self.endpoint())
            .timeout(request.timeout)
            .json(&self.body(request));

        match self.dialect {
            ApiDialect::OpenAiChat | ApiDialect::OpenAiCompletionTokens | ApiDialect::CohereChat => {
                builder.bearer_auth(&self.api_key)
            }
            ApiDialect::AnthropicMessages => builder
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", ANTHROPIC_VERSION),
            ApiDialect::GeminiGenerate => builder.query(&[("key", self.api_key.as_str())]),
        }
    }
}

/// Map an HTTP status to a provider error kind
fn classify_status(status: StatusCode) -> ProviderErrorKind {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ProviderErrorKind::AuthError,
        StatusCode::TOO_MANY_REQUESTS => ProviderErrorKind::RateLimited,
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => ProviderErrorKind::Timeout,
        _ => ProviderErrorKind::Unknown,
    }
}

fn classify_transport(err: &reqwest::Error) -> ProviderError {
    if err.is_timeout() {
        ProviderError::timeout(err.to_string())
    } else {
        ProviderError::unknown(err.to_string())
    }
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Pull the response text out of a provider payload
fn extract_content(dialect: ApiDialect, payload: &Value) -> Result<String, ProviderError> {
    payload
        .pointer(dialect.content_pointer())
        .and_then(Value::as_str)
        .map(ToString::to_string)
        .ok_or_else(|| {
            ProviderError::unknown(format!(
                "response missing {}",
                dialect.content_pointer()
            ))
        })
}

#[async_trait]
impl ProviderClient for HttpProviderClient {
    fn name(&self) -> &str {
        &self.label
    }

    async fn send(&self, request: &ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let start = Instant::now();

        let response = self
            .build(request)
            .send()
            .await
            .map_err(|e| classify_transport(&e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::debug!(
                provider = %self.label,
                status = status.as_u16(),
                "Provider returned error status"
            );
            return Err(ProviderError::new(
                classify_status(status),
                format!("HTTP {}: {}", status.as_u16(), truncate(&body, MAX_ERROR_BODY)),
            ));
        }

        let payload: Value = response.json().await.map_err(|e| classify_transport(&e))?;
        let content = extract_content(self.dialect, &payload)?;

        Ok(ProviderResponse {
            content,
            latency: start.elapsed(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(dialect: ApiDialect) -> HttpProviderClient {
        HttpProviderClient::new("test", dialect, "https://example.test/", "m-1", "key").unwrap()
    }

    #[test]
    fn test_endpoints() {
        assert_eq!(
            client(ApiDialect::OpenAiChat).endpoint(),
            "https://example.test/chat/completions"
        );
        assert_eq!(
            client(ApiDialect::AnthropicMessages).endpoint(),
            "https://example.test/v1/messages"
        );
        assert_eq!(
            client(ApiDialect::GeminiGenerate).endpoint(),
            "https://example.test/v1beta/models/m-1:generateContent"
        );
        assert_eq!(
            client(ApiDialect::CohereChat).endpoint(),
            "https://example.test/v1/chat"
        );
    }

    #[test]
    fn test_request_bodies() {
        let request = ProviderRequest::new("ping", 42, Duration::from_secs(1));

        let body = client(ApiDialect::OpenAiChat).body(&request);
        assert_eq!(body["max_tokens"], 42);
        assert_eq!(body["messages"][0]["content"], "ping");

        let body = client(ApiDialect::OpenAiCompletionTokens).body(&request);
        assert_eq!(body["max_completion_tokens"], 42);
        assert!(body.get("max_tokens").is_none());
        assert_eq!(body["messages"][0]["content"], "ping");

        let body = client(ApiDialect::GeminiGenerate).body(&request);
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 42);
        assert_eq!(body["contents"][0]["parts"][0]["text"], "ping");

        let body = client(ApiDialect::CohereChat).body(&request);
        assert_eq!(body["message"], "ping");
    }

    #[test]
    fn test_extract_content() {
        let openai = json!({ "choices": [{ "message": { "content": "OPENAI_OK" } }] });
        assert_eq!(
            extract_content(ApiDialect::OpenAiChat, &openai).unwrap(),
            "OPENAI_OK"
        );

        let anthropic = json!({ "content": [{ "type": "text", "text": "ANTHROPIC_OK" }] });
        assert_eq!(
            extract_content(ApiDialect::AnthropicMessages, &anthropic).unwrap(),
            "ANTHROPIC_OK"
        );

        let cohere = json!({ "text": "COHERE_OK" });
        assert_eq!(
            extract_content(ApiDialect::CohereChat, &cohere).unwrap(),
            "COHERE_OK"
        );

        let err = extract_content(ApiDialect::GeminiGenerate, &json!({})).unwrap_err();
        assert_eq!(err.kind, ProviderErrorKind::Unknown);
    }

    #[test]
    fn test_status_classification() {
        assert_eq!(
            classify_status(StatusCode::UNAUTHORIZED),
            ProviderErrorKind::AuthError
        );
        assert_eq!(
            classify_status(StatusCode::FORBIDDEN),
            ProviderErrorKind::AuthError
        );
        assert_eq!(
            classify_status(StatusCode::TOO_MANY_REQUESTS),
            ProviderErrorKind::RateLimited
        );
        assert_eq!(
            classify_status(StatusCode::GATEWAY_TIMEOUT),
            ProviderErrorKind::Timeout
        );
        assert_eq!(
            classify_status(StatusCode::INTERNAL_SERVER_ERROR),
            ProviderErrorKind::Unknown
        );
    }

    #[test]
    fn test_for_kind_rejects_custom() {
        let err = HttpProviderClient::for_kind(ProviderKind::Custom, None, None, "k").unwrap_err();
        assert_eq!(err.kind, ProviderErrorKind::Unknown);

        let groq = HttpProviderClient::for_kind(ProviderKind::Groq, None, None, "k").unwrap();
        assert_eq!(groq.model(), "llama-3.3-70b-versatile");
        assert_eq!(groq.name(), "groq");
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("abc", 10), "abc");
    }
}
