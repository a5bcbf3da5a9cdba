//! TOML Configuration File Support
//!
//! Centralized configuration loading for the dispatcher, read from
//! `~/.config/dispatcher/config.toml`.
//!
//! # Configuration Priority
//!
//! Configuration values are loaded with the following priority (highest first):
//! 1. CLI arguments (via [`ConfigOverrides`])
//! 2. Environment variables (`DISPATCHER_*`)
//! 3. TOML configuration file
//! 4. Default values
//!
//! # Example Configuration
//!
//! ```toml
//! [dispatch]
//! admission_timeout_ms = 30000
//! call_timeout_ms = 120000
//!
//! [batch]
//! max_workers = 16
//! batch_deadline_ms = 600000
//! coordinator_provider = "grok"
//! target_threshold = 0.95
//!
//! [[providers]]
//! name = "groq"
//! concurrency_limit = 10
//!
//! [[providers]]
//! name = "local-openai"
//! kind = "openai"
//! base_url = "http://localhost:8080/v1"
//! api_key_env = "LOCAL_API_KEY"
//! speed_weight = 0.4
//! ```
//!
//! Entries under `[[providers]]` whose name matches a built-in provider
//! override its defaults; other names add a new provider and must set `kind`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::engine::{BatchOptions, DEFAULT_MAX_WORKERS};
use crate::error::RegistryError;
use crate::provider::{HttpProviderClient, ProviderClient, ProviderKind, SimulatedProvider};
use crate::routing::{DispatchConfig, ProviderConfig, ProviderRegistry, DEFAULT_TARGET_THRESHOLD};

/// Environment variable names read by [`load_config`]
pub mod env {
    /// Global worker cap
    pub const MAX_WORKERS: &str = "DISPATCHER_MAX_WORKERS";
    /// Batch deadline in milliseconds
    pub const BATCH_DEADLINE_MS: &str = "DISPATCHER_BATCH_DEADLINE_MS";
    /// Coordinator provider name
    pub const COORDINATOR: &str = "DISPATCHER_COORDINATOR";
    /// Offload target in `[0, 1]`
    pub const TARGET_THRESHOLD: &str = "DISPATCHER_TARGET_THRESHOLD";
    /// Provider call timeout in milliseconds
    pub const CALL_TIMEOUT_MS: &str = "DISPATCHER_CALL_TIMEOUT_MS";
    /// Admission timeout in milliseconds
    pub const ADMISSION_TIMEOUT_MS: &str = "DISPATCHER_ADMISSION_TIMEOUT_MS";

    /// Every variable, for tests and diagnostics
    pub const ALL: [&str; 6] = [
        MAX_WORKERS,
        BATCH_DEADLINE_MS,
        COORDINATOR,
        TARGET_THRESHOLD,
        CALL_TIMEOUT_MS,
        ADMISSION_TIMEOUT_MS,
    ];
}

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

impl From<RegistryError> for ConfigError {
    fn from(err: RegistryError) -> Self {
        Self::ValidationError(err.to_string())
    }
}

// =============================================================================
// Configuration Source Tracking
// =============================================================================

/// Tracks where a configuration value came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Value from command-line argument
    Cli,
    /// Value from environment variable
    Env,
    /// Value from TOML configuration file
    File,
    /// Default value
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI"),
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// TOML Configuration Structures
// =============================================================================

/// `[dispatch]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchToml {
    /// How long a task may wait for a provider slot
    pub admission_timeout_ms: Option<u64>,

    /// How long a provider call may run
    pub call_timeout_ms: Option<u64>,
}

/// `[batch]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchToml {
    /// Global worker cap
    pub max_workers: Option<usize>,

    /// Batch deadline in milliseconds
    pub batch_deadline_ms: Option<u64>,

    /// Provider the offload target is measured against
    pub coordinator_provider: Option<String>,

    /// Required offload fraction
    pub target_threshold: Option<f64>,
}

/// One `[[providers]]` entry
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderToml {
    /// Registry name
    pub name: String,

    /// Vendor (required for names that are not built in)
    pub kind: Option<ProviderKind>,

    /// Maximum simultaneous calls
    pub concurrency_limit: Option<usize>,

    /// Relative speed for auto-selection
    pub speed_weight: Option<f64>,

    /// Whether the provider is used
    pub enabled: Option<bool>,

    /// Model identifier
    pub model: Option<String>,

    /// API base URL
    pub base_url: Option<String>,

    /// Environment variable holding the API key
    pub api_key_env: Option<String>,
}

/// Top-level TOML configuration structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherToml {
    /// Dispatch timeouts
    pub dispatch: DispatchToml,

    /// Batch defaults
    pub batch: BatchToml,

    /// Provider table overrides and additions
    pub providers: Vec<ProviderToml>,
}

// =============================================================================
// Provider Settings
// =============================================================================

/// Everything needed to register one provider
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProviderSettings {
    /// Registry descriptor
    pub config: ProviderConfig,

    /// Model override (vendor default when `None`)
    pub model: Option<String>,

    /// Base URL override (vendor default when `None`)
    pub base_url: Option<String>,

    /// Environment variable holding the API key
    pub api_key_env: Option<String>,
}

impl ProviderSettings {
    /// Defaults for a built-in vendor
    #[must_use]
    pub fn for_kind(kind: ProviderKind) -> Self {
        Self {
            config: ProviderConfig::for_kind(kind),
            model: None,
            base_url: None,
            api_key_env: kind.api_key_env().map(ToString::to_string),
        }
    }

    /// Registry name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// API key read from the environment, if set and non-empty
    #[must_use]
    pub fn api_key(&self) -> Option<String> {
        self.api_key_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
            .filter(|key| !key.trim().is_empty())
    }

    fn apply(&mut self, toml: &ProviderToml) {
        if let Some(kind) = toml.kind {
            self.config.kind = kind;
            if toml.api_key_env.is_none() && self.api_key_env.is_none() {
                self.api_key_env = kind.api_key_env().map(ToString::to_string);
            }
        }
        if let Some(limit) = toml.concurrency_limit {
            self.config.concurrency_limit = limit;
        }
        if let Some(weight) = toml.speed_weight {
            self.config.speed_weight = weight;
        }
        if let Some(enabled) = toml.enabled {
            self.config.enabled = enabled;
        }
        if toml.model.is_some() {
            self.model = toml.model.clone();
        }
        if toml.base_url.is_some() {
            self.base_url = toml.base_url.clone();
        }
        if toml.api_key_env.is_some() {
            self.api_key_env = toml.api_key_env.clone();
        }
    }

    fn from_toml(toml: &ProviderToml) -> Result<Self, ConfigError> {
        let kind = toml.kind.ok_or_else(|| {
            ConfigError::ValidationError(format!(
                "provider '{}' is not built in and needs a kind",
                toml.name
            ))
        })?;
        let mut settings = Self::for_kind(kind);
        settings.config.name = toml.name.clone();
        settings.apply(toml);
        Ok(settings)
    }
}

// =============================================================================
// Main Configuration Struct
// =============================================================================

/// Centralized configuration for the dispatcher
#[derive(Clone, Debug)]
pub struct DispatcherConfigFile {
    /// Dispatch timeouts
    pub dispatch: DispatchConfig,

    /// Global worker cap
    pub max_workers: usize,

    /// Batch deadline
    pub batch_deadline: Option<Duration>,

    /// Provider the offload target is measured against
    pub coordinator_provider: Option<String>,

    /// Required offload fraction
    pub target_threshold: f64,

    /// Providers in registration order
    pub providers: Vec<ProviderSettings>,

    /// Path to the config file that was loaded (if any)
    pub config_file_path: Option<PathBuf>,

    /// Source of configuration values
    source: ConfigSource,
}

impl Default for DispatcherConfigFile {
    fn default() -> Self {
        Self {
            dispatch: DispatchConfig::default(),
            max_workers: DEFAULT_MAX_WORKERS,
            batch_deadline: None,
            coordinator_provider: Some(ProviderKind::Grok.default_name().to_string()),
            target_threshold: DEFAULT_TARGET_THRESHOLD,
            providers: ProviderKind::BUILT_IN
                .into_iter()
                .map(ProviderSettings::for_kind)
                .collect(),
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl DispatcherConfigFile {
    /// Create a new configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the primary source of this configuration
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Set the configuration source
    pub fn set_source(&mut self, source: ConfigSource) {
        self.source = source;
    }

    /// Settings for one provider
    #[must_use]
    pub fn provider(&self, name: &str) -> Option<&ProviderSettings> {
        self.providers.iter().find(|p| p.name() == name)
    }

    /// Batch options carrying the configured defaults
    #[must_use]
    pub fn batch_options(&self) -> BatchOptions {
        BatchOptions {
            max_workers: Some(self.max_workers),
            batch_deadline: self.batch_deadline,
            coordinator_provider: self.coordinator_provider.clone(),
            target_threshold: Some(self.target_threshold),
        }
    }

    /// Check values that would otherwise fail at batch submission
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_workers == 0 {
            return Err(ConfigError::ValidationError(
                "max_workers must be at least 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.target_threshold) {
            return Err(ConfigError::ValidationError(format!(
                "target_threshold {} is outside [0, 1]",
                self.target_threshold
            )));
        }
        for (idx, provider) in self.providers.iter().enumerate() {
            if self.providers[..idx]
                .iter()
                .any(|p| p.name() == provider.name())
            {
                return Err(ConfigError::ValidationError(format!(
                    "provider '{}' is listed twice",
                    provider.name()
                )));
            }
            if provider.config.concurrency_limit == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "provider '{}' needs a positive concurrency_limit",
                    provider.name()
                )));
            }
            if !provider.config.speed_weight.is_finite() || provider.config.speed_weight <= 0.0 {
                return Err(ConfigError::ValidationError(format!(
                    "provider '{}' needs a positive speed_weight",
                    provider.name()
                )));
            }
        }
        if let Some(coordinator) = &self.coordinator_provider {
            if self.provider(coordinator).is_none() {
                return Err(ConfigError::ValidationError(format!(
                    "coordinator '{coordinator}' is not a configured provider"
                )));
            }
        }
        Ok(())
    }

    /// Enabled providers whose API key variable is unset, as `(name, variable)`
    #[must_use]
    pub fn missing_api_keys(&self) -> Vec<(String, String)> {
        self.providers
            .iter()
            .filter(|p| p.config.enabled && p.api_key().is_none())
            .map(|p| {
                (
                    p.name().to_string(),
                    p.api_key_env.clone().unwrap_or_default(),
                )
            })
            .collect()
    }

    /// Registry of HTTP clients for every configured provider
    ///
    /// Providers without an API key are registered disabled so they remain
    /// visible (and usable as the coordinator) but are never called.
    pub fn build_registry(&self) -> Result<ProviderRegistry, ConfigError> {
        self.validate()?;
        let registry = ProviderRegistry::new();

        for provider in &self.providers {
            let mut config = provider.config.clone();
            let api_key = provider.api_key();
            if config.enabled && api_key.is_none() {
                tracing::warn!(
                    provider = %config.name,
                    env = provider.api_key_env.as_deref().unwrap_or(""),
                    "API key not set, provider disabled"
                );
                config.enabled = false;
            }

            let mut client = HttpProviderClient::for_kind(
                config.kind,
                provider.model.as_deref(),
                provider.base_url.as_deref(),
                api_key.unwrap_or_default(),
            )
            .map_err(|e| ConfigError::ValidationError(format!("{}: {e}", config.name)))?;
            client.set_label(&config.name);

            registry.register(config, Arc::new(client) as Arc<dyn ProviderClient>)?;
        }

        Ok(registry)
    }

    /// Registry of simulated providers mirroring the configured table
    ///
    /// Latency is `base_latency / speed_weight`, so faster providers answer
    /// sooner. Every configured provider is registered with its own enabled
    /// flag; no API keys are needed.
    pub fn build_simulated_registry(
        &self,
        base_latency: Duration,
    ) -> Result<ProviderRegistry, ConfigError> {
        self.validate()?;
        let registry = ProviderRegistry::new();

        for provider in &self.providers {
            let latency = base_latency.div_f64(provider.config.speed_weight);
            let client = SimulatedProvider::new(provider.name(), latency);
            registry.register(
                provider.config.clone(),
                Arc::new(client) as Arc<dyn ProviderClient>,
            )?;
        }

        Ok(registry)
    }
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/dispatcher/config.toml` or
/// `~/.config/dispatcher/config.toml` if `XDG_CONFIG_HOME` is not set.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("dispatcher").join("config.toml"))
}

/// Load configuration from the default path, then the environment
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed.
/// A missing config file is not an error (defaults are used).
pub fn load_config() -> Result<DispatcherConfigFile, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific path, then the environment
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read or parsed,
/// or if a `[[providers]]` entry cannot be resolved.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<DispatcherConfigFile, ConfigError> {
    let mut config = DispatcherConfigFile::default();

    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;

            let toml_config: DispatcherToml = toml::from_str(&toml_content)?;
            apply_toml_config(&mut config, &toml_config)?;
            config.config_file_path = Some(config_path.clone());
            config.source = ConfigSource::File;

            tracing::info!(
                path = %config_path.display(),
                "Loaded configuration from file"
            );
        } else {
            tracing::debug!(
                path = %config_path.display(),
                "Config file not found, using defaults"
            );
        }
    }

    apply_env_config(&mut config, |var| std::env::var(var).ok());

    Ok(config)
}

/// Apply TOML configuration values to the config struct
fn apply_toml_config(
    config: &mut DispatcherConfigFile,
    toml: &DispatcherToml,
) -> Result<(), ConfigError> {
    if let Some(ms) = toml.dispatch.admission_timeout_ms {
        config.dispatch.admission_timeout_ms = ms;
    }
    if let Some(ms) = toml.dispatch.call_timeout_ms {
        config.dispatch.call_timeout_ms = ms;
    }

    if let Some(workers) = toml.batch.max_workers {
        config.max_workers = workers;
    }
    if let Some(ms) = toml.batch.batch_deadline_ms {
        config.batch_deadline = Some(Duration::from_millis(ms));
    }
    if toml.batch.coordinator_provider.is_some() {
        config.coordinator_provider = toml.batch.coordinator_provider.clone();
    }
    if let Some(threshold) = toml.batch.target_threshold {
        config.target_threshold = threshold;
    }

    for entry in &toml.providers {
        if entry.name.is_empty() {
            return Err(ConfigError::ValidationError(
                "provider entries need a name".to_string(),
            ));
        }
        match config.providers.iter_mut().find(|p| p.name() == entry.name) {
            Some(existing) => existing.apply(entry),
            None => config.providers.push(ProviderSettings::from_toml(entry)?),
        }
    }

    Ok(())
}

/// Parse one environment override, ignoring unparsable values
fn parse_env<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &str,
) -> Option<T> {
    let raw = lookup(var)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(var, value = %raw, "Ignoring unparsable environment override");
            None
        }
    }
}

/// Apply environment variable overrides to the config
fn apply_env_config(config: &mut DispatcherConfigFile, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(workers) = parse_env::<usize>(&lookup, env::MAX_WORKERS) {
        config.max_workers = workers;
        config.source = ConfigSource::Env;
    }
    if let Some(ms) = parse_env::<u64>(&lookup, env::BATCH_DEADLINE_MS) {
        config.batch_deadline = Some(Duration::from_millis(ms));
        config.source = ConfigSource::Env;
    }
    if let Some(coordinator) = lookup(env::COORDINATOR) {
        let coordinator = coordinator.trim();
        config.coordinator_provider = if coordinator.is_empty() {
            None
        } else {
            Some(coordinator.to_string())
        };
        config.source = ConfigSource::Env;
    }
    if let Some(threshold) = parse_env::<f64>(&lookup, env::TARGET_THRESHOLD) {
        config.target_threshold = threshold;
        config.source = ConfigSource::Env;
    }
    if let Some(ms) = parse_env::<u64>(&lookup, env::CALL_TIMEOUT_MS) {
        config.dispatch.call_timeout_ms = ms;
        config.source = ConfigSource::Env;
    }
    if let Some(ms) = parse_env::<u64>(&lookup, env::ADMISSION_TIMEOUT_MS) {
        config.dispatch.admission_timeout_ms = ms;
        config.source = ConfigSource::Env;
    }
}

// =============================================================================
// CLI Override Support
// =============================================================================

/// Builder for applying CLI overrides to configuration
///
/// Use this after [`load_config`] to apply command-line argument overrides.
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// Global worker cap override
    pub max_workers: Option<usize>,

    /// Batch deadline override (milliseconds)
    pub batch_deadline_ms: Option<u64>,

    /// Coordinator override
    pub coordinator_provider: Option<String>,

    /// Target threshold override
    pub target_threshold: Option<f64>,

    /// Call timeout override (milliseconds)
    pub call_timeout_ms: Option<u64>,
}

impl ConfigOverrides {
    /// Create a new empty set of overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set worker cap override
    #[must_use]
    pub fn with_max_workers(mut self, workers: usize) -> Self {
        self.max_workers = Some(workers);
        self
    }

    /// Set batch deadline override
    #[must_use]
    pub fn with_batch_deadline_ms(mut self, ms: u64) -> Self {
        self.batch_deadline_ms = Some(ms);
        self
    }

    /// Set coordinator override
    #[must_use]
    pub fn with_coordinator(mut self, provider: impl Into<String>) -> Self {
        self.coordinator_provider = Some(provider.into());
        self
    }

    /// Set target threshold override
    #[must_use]
    pub fn with_target_threshold(mut self, threshold: f64) -> Self {
        self.target_threshold = Some(threshold);
        self
    }

    /// Set call timeout override
    #[must_use]
    pub fn with_call_timeout_ms(mut self, ms: u64) -> Self {
        self.call_timeout_ms = Some(ms);
        self
    }

    /// Apply overrides to a configuration
    pub fn apply(&self, config: &mut DispatcherConfigFile) {
        if self.max_workers.is_some()
            || self.batch_deadline_ms.is_some()
            || self.coordinator_provider.is_some()
            || self.target_threshold.is_some()
            || self.call_timeout_ms.is_some()
        {
            config.source = ConfigSource::Cli;
        }

        if let Some(workers) = self.max_workers {
            config.max_workers = workers;
        }
        if let Some(ms) = self.batch_deadline_ms {
            config.batch_deadline = Some(Duration::from_millis(ms));
        }
        if let Some(ref coordinator) = self.coordinator_provider {
            config.coordinator_provider = Some(coordinator.clone());
        }
        if let Some(threshold) = self.target_threshold {
            config.target_threshold = threshold;
        }
        if let Some(ms) = self.call_timeout_ms {
            config.dispatch.call_timeout_ms = ms;
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
