//! # MQ Bridge Bindings
//!
//! Binding runtime: one worker per configured binding moves messages from
//! a source adapter to a target adapter with at-least-once delivery.
//!
//! - [`config`]: declarative bridge configuration and validation
//! - [`worker`]: poll / transfer / acknowledge loop with per-component backoff
//! - [`health`]: connection health tracking
//! - [`metrics`]: counters and latency histograms
//! - [`orchestrator`]: startup, supervision, snapshots and bounded shutdown

pub mod config;
pub mod error;
pub mod exporter;
pub mod factory;
pub mod health;
pub mod metrics;
pub mod orchestrator;
pub mod retry;
pub mod state;
pub mod worker;

pub use config::{
    AdapterConfig, BackoffConfig, BindingConfig, BindingSpec, BindingType, BridgeConfig, RuntimeConfig,
    ServerConfig,
};
pub use error::{Error, Result};
pub use factory::{AdapterFactory, DefaultAdapterFactory};
pub use health::{BindingHealth, ComponentHealth, HealthStatus, LastError, SystemHealth};
pub use metrics::{BindingMetrics, ComponentMetricsSnapshot, LatencySummary, SystemMetrics, SystemTotals};
pub use orchestrator::{Orchestrator, ShutdownReport};
pub use state::{BindingState, WorkerState};
pub use worker::BindingWorker;
