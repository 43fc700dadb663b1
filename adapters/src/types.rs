//! Shared types for adapters

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Broker kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BrokerKind {
    /// KubeMQ (cloud-native broker)
    KubeMq,
    /// IBM MQ (enterprise queue manager)
    IbmMq,
    /// In-process queue
    Memory,
}

impl BrokerKind {
    /// Stable label used in logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            BrokerKind::KubeMq => "kubemq",
            BrokerKind::IbmMq => "ibm_mq",
            BrokerKind::Memory => "memory",
        }
    }
}

impl std::fmt::Display for BrokerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Role of an adapter inside a binding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Messages are polled from this side
    Source,
    /// Messages are delivered to this side
    Target,
}

impl Role {
    /// Stable label used in logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Source => "source",
            Role::Target => "target",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error category used for health reporting and metrics breakdown
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Broker unreachable, session lost
    Connection,
    /// Credentials rejected
    Auth,
    /// Operation exceeded its deadline
    Timeout,
    /// Malformed or unsupported message
    Protocol,
    /// Anything else
    Unknown,
}

impl ErrorCategory {
    /// All categories, in reporting order
    pub const ALL: [ErrorCategory; 5] = [
        ErrorCategory::Connection,
        ErrorCategory::Auth,
        ErrorCategory::Timeout,
        ErrorCategory::Protocol,
        ErrorCategory::Unknown,
    ];

    /// Stable label used in logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Connection => "connection",
            ErrorCategory::Auth => "auth",
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::Protocol => "protocol",
            ErrorCategory::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Adapter lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    /// No session
    Disconnected,
    /// Session established
    Connected,
}

/// A message moving through a binding.
///
/// `receipt` is the broker-specific delivery handle the source adapter needs
/// to acknowledge or release the message later; it is never forwarded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Message ID (broker assigned when available)
    pub id: String,
    /// Opaque payload
    pub payload: Bytes,
    /// Headers / tags
    pub headers: BTreeMap<String, String>,
    /// Creation or receive timestamp
    pub timestamp: DateTime<Utc>,
    /// Delivery handle on the source broker
    #[serde(skip)]
    pub receipt: Option<String>,
}

impl Message {
    /// Create a new message with a generated ID
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            payload: payload.into(),
            headers: BTreeMap::new(),
            timestamp: Utc::now(),
            receipt: None,
        }
    }

    /// Builder: set ID
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Builder: add header
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Payload size in bytes
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// True when the payload is empty
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// Target-side confirmation of a delivered message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ack {
    /// ID of the message that was delivered
    pub message_id: String,
    /// Reference assigned by the target broker
    pub broker_reference: Option<String>,
    /// Commit time
    pub committed_at: DateTime<Utc>,
}

impl Ack {
    /// Create an ack for a message
    pub fn new(message_id: impl Into<String>, broker_reference: Option<String>) -> Self {
        Self {
            message_id: message_id.into(),
            broker_reference,
            committed_at: Utc::now(),
        }
    }
}
