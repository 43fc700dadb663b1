//! # MQ Bridge Server
//!
//! Read-only HTTP query surface over the binding orchestrator, plus the
//! `mq-bridge` process entry point.

pub mod error;
pub mod handlers;
pub mod query;
pub mod server;

pub use error::{ApiError, Result};
pub use query::QueryService;
