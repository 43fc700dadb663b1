//! Adapter metrics

use crate::types::BrokerKind;
use crate::Operation;
use prometheus::{register_counter_vec, register_histogram_vec, CounterVec, HistogramVec};
use std::time::Instant;

lazy_static::lazy_static! {
    pub static ref ADAPTER_REQUESTS_TOTAL: CounterVec = register_counter_vec!(
        "mq_bridge_adapter_requests_total",
        "Total broker requests issued by adapters",
        &["broker", "operation", "status"]
    )
    .unwrap();

    pub static ref ADAPTER_REQUEST_DURATION: HistogramVec = register_histogram_vec!(
        "mq_bridge_adapter_request_duration_seconds",
        "Broker request duration",
        &["broker", "operation"]
    )
    .unwrap();
}

/// Record the outcome of one broker request
pub fn observe_request(broker: BrokerKind, op: Operation, started: Instant, success: bool) {
    ADAPTER_REQUEST_DURATION
        .with_label_values(&[broker.as_str(), op.as_str()])
        .observe(started.elapsed().as_secs_f64());

    let status = if success { "success" } else { "failure" };
    ADAPTER_REQUESTS_TOTAL
        .with_label_values(&[broker.as_str(), op.as_str(), status])
        .inc();
}
