//! # MQ Bridge Adapters
//!
//! Broker connectivity layer with:
//! - A uniform [`BrokerAdapter`] contract (connect / poll / ack / send)
//! - KubeMQ adapter over the KubeMQ REST gateway
//! - IBM MQ adapter over the IBM MQ messaging REST API
//! - In-memory adapter with fault injection for tests and demos
//! - Error classification into connection / auth / timeout / protocol / unknown
//!
//! ## Architecture
//!
//! ```text
//!            ┌──────────────────────────────┐
//!            │   Binding worker (bindings)  │
//!            └──────┬───────────────┬───────┘
//!        source     │               │     target
//!     ┌─────────────▼───┐     ┌─────▼─────────────┐
//!     │ dyn BrokerAdapter│     │ dyn BrokerAdapter │
//!     └──┬──────────┬────┘     └────┬──────────┬───┘
//!        │          │               │          │
//!   ┌────▼───┐ ┌────▼───┐      ┌────▼───┐ ┌────▼───┐
//!   │ KubeMQ │ │ IBM MQ │      │ KubeMQ │ │ Memory │
//!   └────────┘ └────────┘      └────────┘ └────────┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

pub mod connector;
pub mod error;
pub mod ibm_mq;
pub mod kubemq;
pub mod memory;
pub mod metrics;
pub mod types;

pub use connector::BrokerAdapter;
pub use error::{Error, Operation, Result};
pub use ibm_mq::{IbmMqAdapter, IbmMqConfig};
pub use kubemq::{KubeMqAdapter, KubeMqConfig};
pub use memory::{FaultInjector, MemoryAdapter, MemoryQueue};
pub use types::*;

/// Default HTTP request timeout (seconds) for REST adapters
pub const DEFAULT_REQUEST_TIMEOUT_SECONDS: u64 = 30;

/// Extra time granted to a long-poll request beyond its wait interval
pub const POLL_GRACE_MILLIS: u64 = 2_000;
