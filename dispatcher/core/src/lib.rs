//! Dispatcher Core - Multi-Provider Concurrent Task Dispatch
//!
//! This crate fans a batch of independent prompts out to a small set of
//! external model providers, each with its own concurrency limit, and
//! collects one result per task. Statistics track how calls were spread so a
//! caller can check that load moved away from a coordinating provider.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     ExecutionEngine                          │
//! │   submit(tasks, options) ──> global worker gate (max_workers)│
//! └───────────────────────────────┬──────────────────────────────┘
//!                                 │ one tokio task per Task
//! ┌───────────────────────────────┴──────────────────────────────┐
//! │                        Dispatcher                            │
//! │  ┌────────────┐   ┌─────────────────┐   ┌─────────────────┐  │
//! │  │  Routing   │──>│ ProviderRegistry│──>│ ProviderClient  │  │
//! │  │  Policy    │   │ (gates + load)  │   │ (HTTP / sim)    │  │
//! │  └────────────┘   └─────────────────┘   └─────────────────┘  │
//! │                           │                                  │
//! │                           v                                  │
//! │                   StatsCollector                             │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Key Types
//!
//! - [`ExecutionEngine`]: runs a batch under a global worker cap
//! - [`Dispatcher`]: routes one task under its provider's limit
//! - [`ProviderRegistry`]: provider descriptors and admission gates
//! - [`StatsCollector`]: call counts and the offload target
//! - [`ProviderClient`]: the capability each provider implements
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//! use dispatcher_core::{
//!     BatchOptions, DispatchConfig, Dispatcher, ExecutionEngine, ProviderConfig,
//!     ProviderRegistry, SimulatedProvider, StatsCollector, Task,
//! };
//!
//! #[tokio::main]
//! async fn main() {
//!     let registry = Arc::new(ProviderRegistry::new());
//!     registry.register(
//!         ProviderConfig::new("fast", 5, 1.0),
//!         Arc::new(SimulatedProvider::new("fast", Duration::from_millis(50))),
//!     ).unwrap();
//!
//!     let stats = Arc::new(StatsCollector::default());
//!     let dispatcher = Arc::new(Dispatcher::new(registry, stats, DispatchConfig::default()));
//!     let engine = ExecutionEngine::new(dispatcher, 8).unwrap();
//!
//!     let tasks = (0..20).map(|i| Task::new(format!("t{i}"), "Summarise")).collect();
//!     let outcome = engine.submit(tasks, BatchOptions::default()).await.unwrap();
//!     println!("{}", outcome.stats);
//! }
//! ```
//!
//! # Module Overview
//!
//! - [`config`]: TOML configuration with environment and CLI overrides
//! - [`engine`]: batch execution
//! - [`error`]: per-task and contract errors
//! - [`health`]: parallel provider validation
//! - [`provider`]: provider client trait and implementations
//! - [`routing`]: registry, selection, admission and statistics
//! - [`task`]: tasks and results

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod engine;
pub mod error;
pub mod health;
pub mod provider;
pub mod routing;
pub mod task;

pub use engine::{BatchOptions, BatchOutcome, ExecutionEngine, DEFAULT_MAX_WORKERS};
pub use error::{ContractError, DispatchError, RegistryError, StatsError, TimeoutStage};
pub use provider::{
    ApiDialect, HttpProviderClient, ProviderClient, ProviderError, ProviderErrorKind,
    ProviderKind, ProviderRequest, ProviderResponse, SimulatedProvider,
};
pub use routing::{
    DispatchConfig, Dispatcher, LatencySummary, LoadSnapshot, ProviderConfig, ProviderRegistry,
    RoutingStats, StatsCollector, StatsSummary, DEFAULT_TARGET_THRESHOLD,
};
pub use task::{estimate_tokens, Task, TaskId, TaskResult, DEFAULT_MAX_TOKENS};

// Config exports
pub use config::{
    default_config_path, load_config, load_config_from_path, ConfigError, ConfigOverrides,
    ConfigSource, DispatcherConfigFile, DispatcherToml, ProviderSettings,
};

// Validation exports
pub use health::{
    probe_prompt, validate_providers, ProbeOutcome, ValidationReport, DEFAULT_MIN_WORKING,
};
