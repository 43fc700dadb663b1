//! IBM MQ reason codes (MQRC)

#![allow(missing_docs)]

use crate::types::ErrorCategory;

pub const MQRC_CONNECTION_BROKEN: u32 = 2009;
pub const MQRC_MSG_TOO_BIG_FOR_Q: u32 = 2030;
pub const MQRC_MSG_TOO_BIG_FOR_Q_MGR: u32 = 2031;
pub const MQRC_NO_MSG_AVAILABLE: u32 = 2033;
pub const MQRC_NOT_AUTHORIZED: u32 = 2035;
pub const MQRC_Q_TYPE_ERROR: u32 = 2057;
pub const MQRC_STORAGE_NOT_AVAILABLE: u32 = 2071;
pub const MQRC_PUT_INHIBITED: u32 = 2051;
pub const MQRC_Q_FULL: u32 = 2053;
pub const MQRC_Q_MGR_NOT_AVAILABLE: u32 = 2059;
pub const MQRC_SECURITY_ERROR: u32 = 2063;
pub const MQRC_UNKNOWN_OBJECT_NAME: u32 = 2085;
pub const MQRC_UNKNOWN_REMOTE_Q_MGR: u32 = 2087;
pub const MQRC_RESOURCE_PROBLEM: u32 = 2102;
pub const MQRC_FORMAT_ERROR: u32 = 2110;
pub const MQRC_NOT_CONVERTED: u32 = 2119;
pub const MQRC_Q_MGR_QUIESCING: u32 = 2161;
pub const MQRC_Q_MGR_STOPPING: u32 = 2162;
pub const MQRC_CONNECTION_QUIESCING: u32 = 2202;
pub const MQRC_CONNECTION_STOPPING: u32 = 2203;
pub const MQRC_CHANNEL_NOT_AVAILABLE: u32 = 2537;
pub const MQRC_HOST_NOT_AVAILABLE: u32 = 2538;
pub const MQRC_UNKNOWN_CHANNEL_NAME: u32 = 2540;

/// Error category for a reason code.
///
/// Only reasons that belong to a single message are `Protocol`. A full,
/// inhibited or misnamed queue affects every message, so those retry with
/// backoff instead. `MQRC_NO_MSG_AVAILABLE` is an empty poll, callers must
/// check for it before classifying.
pub fn category(reason: u32) -> ErrorCategory {
    match reason {
        MQRC_CONNECTION_BROKEN
        | MQRC_Q_MGR_NOT_AVAILABLE
        | MQRC_Q_MGR_QUIESCING
        | MQRC_Q_MGR_STOPPING
        | MQRC_CONNECTION_QUIESCING
        | MQRC_CONNECTION_STOPPING
        | MQRC_CHANNEL_NOT_AVAILABLE
        | MQRC_HOST_NOT_AVAILABLE => ErrorCategory::Connection,
        // configuration problems: unusable until fixed, keep retrying
        MQRC_UNKNOWN_OBJECT_NAME
        | MQRC_Q_TYPE_ERROR
        | MQRC_UNKNOWN_REMOTE_Q_MGR
        | MQRC_UNKNOWN_CHANNEL_NAME => ErrorCategory::Connection,
        MQRC_NOT_AUTHORIZED | MQRC_SECURITY_ERROR => ErrorCategory::Auth,
        // transient resource conditions
        MQRC_NO_MSG_AVAILABLE
        | MQRC_Q_FULL
        | MQRC_PUT_INHIBITED
        | MQRC_RESOURCE_PROBLEM
        | MQRC_STORAGE_NOT_AVAILABLE => ErrorCategory::Timeout,
        MQRC_MSG_TOO_BIG_FOR_Q
        | MQRC_MSG_TOO_BIG_FOR_Q_MGR
        | MQRC_FORMAT_ERROR
        | MQRC_NOT_CONVERTED => ErrorCategory::Protocol,
        _ => ErrorCategory::Unknown,
    }
}

/// Human-readable description of a reason code
pub fn describe(reason: u32) -> String {
    let text = match reason {
        MQRC_CONNECTION_BROKEN => "Connection to IBM MQ server was lost",
        MQRC_MSG_TOO_BIG_FOR_Q => "Message is larger than the queue maximum",
        MQRC_MSG_TOO_BIG_FOR_Q_MGR => "Message is larger than the queue manager maximum",
        MQRC_NO_MSG_AVAILABLE => "No message available on the queue",
        MQRC_NOT_AUTHORIZED => "Not authorized to access the requested resource",
        MQRC_PUT_INHIBITED => "Put operations are inhibited on the queue",
        MQRC_Q_FULL => "Queue is full, cannot put message",
        MQRC_Q_MGR_NOT_AVAILABLE => "Queue manager is not available",
        MQRC_SECURITY_ERROR => "Security error while validating credentials",
        MQRC_UNKNOWN_OBJECT_NAME => "Queue name not found or incorrect",
        MQRC_Q_TYPE_ERROR => "Queue type is not valid for this operation",
        MQRC_UNKNOWN_REMOTE_Q_MGR => "Remote queue manager is unknown",
        MQRC_RESOURCE_PROBLEM => "Temporary resource problem on the queue manager",
        MQRC_STORAGE_NOT_AVAILABLE => "Queue manager storage not available",
        MQRC_UNKNOWN_CHANNEL_NAME => "Channel name not found",
        MQRC_FORMAT_ERROR => "Message format error",
        MQRC_NOT_CONVERTED => "Message data could not be converted",
        MQRC_Q_MGR_QUIESCING => "Queue manager is quiescing",
        MQRC_Q_MGR_STOPPING => "Queue manager is stopping",
        MQRC_CONNECTION_QUIESCING => "Connection is quiescing",
        MQRC_CONNECTION_STOPPING => "Connection is stopping",
        MQRC_CHANNEL_NOT_AVAILABLE => "Channel not available",
        MQRC_HOST_NOT_AVAILABLE => "IBM MQ host is not available",
        other => return format!("IBM MQ error with reason code: {}", other),
    };
    text.to_string()
}
