//! Error types for adapters

use crate::types::{BrokerKind, ErrorCategory};
use reqwest::StatusCode;
use thiserror::Error;

/// Result type for adapter operations
pub type Result<T> = std::result::Result<T, Error>;

/// Adapter operation, used to attach context to classified failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Session establishment
    Connect,
    /// Poll / receive
    Receive,
    /// Deliver to target
    Send,
    /// Acknowledge or release on source
    Ack,
}

impl Operation {
    /// Stable label used in logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Connect => "connect",
            Operation::Receive => "receive",
            Operation::Send => "send",
            Operation::Ack => "ack",
        }
    }
}

/// Adapter errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Broker unreachable or credentials rejected
    #[error("Connect error ({category}): {message}")]
    Connect {
        /// Category
        category: ErrorCategory,
        /// Message
        message: String,
    },

    /// Transient failure while polling
    #[error("Receive error ({category}): {message}")]
    Receive {
        /// Category
        category: ErrorCategory,
        /// Message
        message: String,
    },

    /// Transient failure while delivering
    #[error("Send error ({category}): {message}")]
    Send {
        /// Category
        category: ErrorCategory,
        /// Message
        message: String,
    },

    /// Failure while acknowledging or releasing a source message
    #[error("Acknowledge error ({category}): {message}")]
    Ack {
        /// Category
        category: ErrorCategory,
        /// Message
        message: String,
    },

    /// Malformed or unsupported message
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Operation attempted without a session
    #[error("Not connected to {0}")]
    NotConnected(BrokerKind),

    /// Operation exceeded its deadline
    #[error("Timeout after {millis}ms: {operation}")]
    Timeout {
        /// Timeout duration
        millis: u64,
        /// Operation
        operation: String,
    },

    /// Invalid adapter configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Build an error for an operation with an explicit category.
    ///
    /// A protocol category always yields [`Error::Protocol`].
    pub fn for_op(op: Operation, category: ErrorCategory, message: impl Into<String>) -> Self {
        let message = message.into();
        if category == ErrorCategory::Protocol {
            return Error::Protocol(message);
        }
        match op {
            Operation::Connect => Error::Connect { category, message },
            Operation::Receive => Error::Receive { category, message },
            Operation::Send => Error::Send { category, message },
            Operation::Ack => Error::Ack { category, message },
        }
    }

    /// Classify a transport failure from the HTTP client
    pub fn from_http(op: Operation, err: &reqwest::Error) -> Self {
        let category = if err.is_timeout() {
            ErrorCategory::Timeout
        } else if err.is_connect() || err.is_request() {
            ErrorCategory::Connection
        } else if err.is_decode() || err.is_body() {
            ErrorCategory::Protocol
        } else if let Some(status) = err.status() {
            classify_status(status)
        } else {
            ErrorCategory::Unknown
        };
        Self::for_op(op, category, err.to_string())
    }

    /// Classify a non-success HTTP status returned by a broker
    pub fn from_status(op: Operation, status: StatusCode, body: &str) -> Self {
        let detail = if body.is_empty() {
            status.to_string()
        } else {
            format!("{}: {}", status, body)
        };
        Self::for_op(op, classify_status(status), detail)
    }

    /// Category of this error
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Connect { category, .. }
            | Error::Receive { category, .. }
            | Error::Send { category, .. }
            | Error::Ack { category, .. } => *category,
            Error::Protocol(_) => ErrorCategory::Protocol,
            Error::NotConnected(_) => ErrorCategory::Connection,
            Error::Timeout { .. } => ErrorCategory::Timeout,
            Error::Config(_) => ErrorCategory::Unknown,
        }
    }

    /// True when the session must be re-established before retrying.
    ///
    /// Only protocol failures are message-specific; everything else is
    /// treated as a broken connection.
    pub fn is_connection_level(&self) -> bool {
        self.category() != ErrorCategory::Protocol
    }
}

/// Map an HTTP status to an error category
pub fn classify_status(status: StatusCode) -> ErrorCategory {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ErrorCategory::Auth,
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => ErrorCategory::Timeout,
        // rejections of the payload itself
        StatusCode::PAYLOAD_TOO_LARGE
        | StatusCode::UNSUPPORTED_MEDIA_TYPE
        | StatusCode::UNPROCESSABLE_ENTITY => ErrorCategory::Protocol,
        // wrong queue or endpoint: the binding is unusable until it is fixed
        StatusCode::BAD_REQUEST | StatusCode::NOT_FOUND => ErrorCategory::Connection,
        s if s.is_server_error() => ErrorCategory::Connection,
        _ => ErrorCategory::Unknown,
    }
}

/// Map an HTTP status returned while establishing a session.
///
/// A client error on the session check still means the broker is unusable
/// for this binding, so protocol and unknown collapse to connection.
pub fn classify_connect_status(status: StatusCode) -> ErrorCategory {
    match classify_status(status) {
        ErrorCategory::Protocol | ErrorCategory::Unknown => ErrorCategory::Connection,
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_for_op_protocol_collapses() {
        let err = Error::for_op(Operation::Send, ErrorCategory::Protocol, "bad payload");
        assert_eq!(err, Error::Protocol("bad payload".to_string()));
        assert!(!err.is_connection_level());
    }

    #[test]
    fn test_categories() {
        let err = Error::for_op(Operation::Connect, ErrorCategory::Auth, "denied");
        assert_eq!(err.category(), ErrorCategory::Auth);
        assert!(err.is_connection_level());

        assert_eq!(
            Error::NotConnected(BrokerKind::KubeMq).category(),
            ErrorCategory::Connection
        );
        let timeout = Error::Timeout {
            millis: 10,
            operation: "send".into(),
        };
        assert_eq!(timeout.category(), ErrorCategory::Timeout);
        assert!(timeout.is_connection_level());
    }

    #[test]
    fn test_classify_status() {
        assert_eq!(classify_status(StatusCode::UNAUTHORIZED), ErrorCategory::Auth);
        assert_eq!(classify_status(StatusCode::FORBIDDEN), ErrorCategory::Auth);
        assert_eq!(classify_status(StatusCode::GATEWAY_TIMEOUT), ErrorCategory::Timeout);
        assert_eq!(classify_status(StatusCode::BAD_REQUEST), ErrorCategory::Connection);
        assert_eq!(classify_status(StatusCode::NOT_FOUND), ErrorCategory::Connection);
        assert_eq!(classify_status(StatusCode::PAYLOAD_TOO_LARGE), ErrorCategory::Protocol);
        assert_eq!(
            classify_status(StatusCode::SERVICE_UNAVAILABLE),
            ErrorCategory::Connection
        );
        assert_eq!(classify_status(StatusCode::CONFLICT), ErrorCategory::Unknown);
    }

    #[test]
    fn test_classify_connect_status() {
        assert_eq!(
            classify_connect_status(StatusCode::NOT_FOUND),
            ErrorCategory::Connection
        );
        assert_eq!(classify_connect_status(StatusCode::FORBIDDEN), ErrorCategory::Auth);
    }

    #[test]
    fn test_from_status_message() {
        let err = Error::from_status(Operation::Receive, StatusCode::BAD_GATEWAY, "upstream down");
        match err {
            Error::Receive { category, message } => {
                assert_eq!(category, ErrorCategory::Connection);
                assert!(message.contains("upstream down"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
