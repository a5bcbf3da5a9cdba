#![allow(missing_docs)]
//! Provider Routing
//!
//! Selection, admission control and call accounting for tasks sent to
//! external providers.
//!
//! # Architecture
//!
//! ```text
//! +------------------+
//! |    Dispatcher    |  <-- route(task) -> TaskResult
//! +--------+---------+
//!          |
//!          v
//! +------------------+
//! |  RoutingPolicy   |  <-- explicit request or fastest free provider
//! +--------+---------+
//!          |
//!          v
//! +------------------+
//! | ProviderRegistry |  <-- descriptors (RCU), resizable gates, live load
//! +--------+---------+
//!          |
//!    +-----+-----+
//!    |     |     |
//!    v     v     v
//! +----+ +----+ +----+
//! |HTTP| |HTTP| |Sim |  <-- ProviderClient implementations
//! +----+ +----+ +----+
//!
//!          every completed call ──> StatsCollector
//! ```
//!
//! # Design Principles
//!
//! 1. **Bounded Concurrency**: a provider never serves more calls than its limit
//! 2. **Isolation**: a slow provider only delays the tasks routed to it
//! 3. **Exact Accounting**: statistics reconcile with the calls actually made

pub mod config;
pub mod dispatcher;
pub mod metrics;
mod policy;
pub mod pool;
pub mod registry;

pub use config::{DispatchConfig, ProviderConfig};
pub use dispatcher::Dispatcher;
pub use metrics::{
    LatencySummary, RoutingStats, StatsCollector, StatsSummary, DEFAULT_TARGET_THRESHOLD,
};
pub use pool::LoadSnapshot;
pub use registry::ProviderRegistry;
