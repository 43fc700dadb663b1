//! Prometheus mirror of binding counters

use adapters::{ErrorCategory, Role};
use prometheus::{
    register_gauge_vec, register_histogram_vec, register_int_counter_vec, GaugeVec, HistogramVec,
    IntCounterVec,
};
use std::time::Duration;

lazy_static::lazy_static! {
    pub static ref MESSAGES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "mq_bridge_messages_total",
        "Messages received from sources and sent to targets",
        &["binding", "role", "direction"]
    )
    .unwrap();

    pub static ref ERRORS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "mq_bridge_errors_total",
        "Adapter operation failures by category",
        &["binding", "role", "category"]
    )
    .unwrap();

    pub static ref RECONNECTIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "mq_bridge_reconnections_total",
        "Entries into reconnection backoff",
        &["binding", "role"]
    )
    .unwrap();

    pub static ref TRANSFER_DURATION: HistogramVec = register_histogram_vec!(
        "mq_bridge_transfer_duration_seconds",
        "Receive-to-commit duration of a transfer",
        &["binding"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    )
    .unwrap();

    pub static ref COMPONENT_UP: GaugeVec = register_gauge_vec!(
        "mq_bridge_component_up",
        "1 when the component is healthy",
        &["binding", "role"]
    )
    .unwrap();
}

pub fn message(binding: &str, role: Role) {
    let direction = match role {
        Role::Source => "received",
        Role::Target => "sent",
    };
    MESSAGES_TOTAL
        .with_label_values(&[binding, role.as_str(), direction])
        .inc();
}

pub fn error(binding: &str, role: Role, category: ErrorCategory) {
    ERRORS_TOTAL
        .with_label_values(&[binding, role.as_str(), category.as_str()])
        .inc();
}

pub fn reconnection(binding: &str, role: Role) {
    RECONNECTIONS_TOTAL
        .with_label_values(&[binding, role.as_str()])
        .inc();
}

pub fn transfer(binding: &str, elapsed: Duration) {
    TRANSFER_DURATION
        .with_label_values(&[binding])
        .observe(elapsed.as_secs_f64());
}

pub fn component_up(binding: &str, role: Role, up: bool) {
    COMPONENT_UP
        .with_label_values(&[binding, role.as_str()])
        .set(if up { 1.0 } else { 0.0 });
}

/// Text exposition of every registered metric
pub fn gather_text() -> String {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        tracing::error!("Failed to encode prometheus metrics: {}", e);
    }
    String::from_utf8(buffer).unwrap_or_default()
}
