//! Metrics aggregation
//!
//! Counters are exact and monotonic for the life of the process. Latency
//! quantiles come from a bounded sliding window of the most recent samples
//! (nearest-rank), while `count` and `sum` cover every sample ever recorded.

use crate::config::BindingType;
use adapters::ErrorCategory;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

/// Latency histogram over a sliding window
#[derive(Debug, Clone)]
pub struct LatencyHistogram {
    window: VecDeque<f64>,
    capacity: usize,
    count: u64,
    sum_ms: f64,
}

/// Point-in-time view of a [`LatencyHistogram`], milliseconds
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LatencySummary {
    pub count: u64,
    pub sum_ms: f64,
    pub avg_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    pub p50_ms: f64,
    pub p90_ms: f64,
    pub p99_ms: f64,
}

impl LatencyHistogram {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            window: VecDeque::with_capacity(capacity.min(4096)),
            capacity,
            count: 0,
            sum_ms: 0.0,
        }
    }

    pub fn record(&mut self, latency: Duration) {
        let ms = latency.as_secs_f64() * 1000.0;
        if self.window.len() == self.capacity {
            self.window.pop_front();
        }
        self.window.push_back(ms);
        self.count += 1;
        self.sum_ms += ms;
    }

    pub fn summary(&self) -> LatencySummary {
        if self.window.is_empty() {
            return LatencySummary::default();
        }
        let mut sorted: Vec<f64> = self.window.iter().copied().collect();
        sorted.sort_by(|a, b| a.total_cmp(b));
        LatencySummary {
            count: self.count,
            sum_ms: self.sum_ms,
            avg_ms: self.sum_ms / self.count as f64,
            min_ms: sorted[0],
            max_ms: sorted[sorted.len() - 1],
            p50_ms: nearest_rank(&sorted, 50.0),
            p90_ms: nearest_rank(&sorted, 90.0),
            p99_ms: nearest_rank(&sorted, 99.0),
        }
    }
}

/// Nearest-rank percentile of a sorted, non-empty slice
fn nearest_rank(sorted: &[f64], percentile: f64) -> f64 {
    let rank = ((percentile / 100.0) * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

fn empty_categories() -> BTreeMap<ErrorCategory, u64> {
    ErrorCategory::ALL.iter().map(|c| (*c, 0)).collect()
}

/// Counters for one side of a binding
#[derive(Debug, Clone)]
pub struct ComponentMetrics {
    messages_received_total: u64,
    messages_sent_total: u64,
    errors_received_total: u64,
    errors_sent_total: u64,
    reconnections_total: u64,
    connection_attempts_total: u64,
    bytes_received_total: u64,
    bytes_sent_total: u64,
    errors_by_category: BTreeMap<ErrorCategory, u64>,
    latency: LatencyHistogram,
    last_message_received_at: Option<DateTime<Utc>>,
    last_message_sent_at: Option<DateTime<Utc>>,
    last_error_at: Option<DateTime<Utc>>,
    last_connected_at: Option<DateTime<Utc>>,
}

/// Serializable copy of [`ComponentMetrics`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComponentMetricsSnapshot {
    pub messages_received_total: u64,
    pub messages_sent_total: u64,
    pub errors_received_total: u64,
    pub errors_sent_total: u64,
    pub reconnections_total: u64,
    pub connection_attempts_total: u64,
    pub bytes_received_total: u64,
    pub bytes_sent_total: u64,
    pub errors_by_category: BTreeMap<ErrorCategory, u64>,
    pub latency: LatencySummary,
    pub last_message_received_at: Option<DateTime<Utc>>,
    pub last_message_sent_at: Option<DateTime<Utc>>,
    pub last_error_at: Option<DateTime<Utc>>,
    pub last_connected_at: Option<DateTime<Utc>>,
}

impl ComponentMetrics {
    pub fn new(latency_window: usize) -> Self {
        Self {
            messages_received_total: 0,
            messages_sent_total: 0,
            errors_received_total: 0,
            errors_sent_total: 0,
            reconnections_total: 0,
            connection_attempts_total: 0,
            bytes_received_total: 0,
            bytes_sent_total: 0,
            errors_by_category: empty_categories(),
            latency: LatencyHistogram::new(latency_window),
            last_message_received_at: None,
            last_message_sent_at: None,
            last_error_at: None,
            last_connected_at: None,
        }
    }

    pub fn record_received(&mut self, bytes: usize, latency: Duration) {
        self.messages_received_total += 1;
        self.bytes_received_total += bytes as u64;
        self.latency.record(latency);
        self.last_message_received_at = Some(Utc::now());
    }

    pub fn record_sent(&mut self, bytes: usize, latency: Duration) {
        self.messages_sent_total += 1;
        self.bytes_sent_total += bytes as u64;
        self.latency.record(latency);
        self.last_message_sent_at = Some(Utc::now());
    }

    /// Failure while receiving from (source) or acknowledging on this component
    pub fn record_receive_error(&mut self, category: ErrorCategory) {
        self.errors_received_total += 1;
        self.record_category(category);
    }

    /// Failure while delivering to this component
    pub fn record_send_error(&mut self, category: ErrorCategory) {
        self.errors_sent_total += 1;
        self.record_category(category);
    }

    fn record_category(&mut self, category: ErrorCategory) {
        *self.errors_by_category.entry(category).or_insert(0) += 1;
        self.last_error_at = Some(Utc::now());
    }

    pub fn record_reconnection(&mut self) {
        self.reconnections_total += 1;
    }

    pub fn record_connection_attempt(&mut self) {
        self.connection_attempts_total += 1;
    }

    pub fn record_connected(&mut self) {
        self.last_connected_at = Some(Utc::now());
    }

    pub fn snapshot(&self) -> ComponentMetricsSnapshot {
        ComponentMetricsSnapshot {
            messages_received_total: self.messages_received_total,
            messages_sent_total: self.messages_sent_total,
            errors_received_total: self.errors_received_total,
            errors_sent_total: self.errors_sent_total,
            reconnections_total: self.reconnections_total,
            connection_attempts_total: self.connection_attempts_total,
            bytes_received_total: self.bytes_received_total,
            bytes_sent_total: self.bytes_sent_total,
            errors_by_category: self.errors_by_category.clone(),
            latency: self.latency.summary(),
            last_message_received_at: self.last_message_received_at,
            last_message_sent_at: self.last_message_sent_at,
            last_error_at: self.last_error_at,
            last_connected_at: self.last_connected_at,
        }
    }
}

impl ComponentMetricsSnapshot {
    /// Every counter, for monotonicity checks
    pub fn counters(&self) -> Vec<u64> {
        let mut counters = vec![
            self.messages_received_total,
            self.messages_sent_total,
            self.errors_received_total,
            self.errors_sent_total,
            self.reconnections_total,
            self.connection_attempts_total,
            self.bytes_received_total,
            self.bytes_sent_total,
            self.latency.count,
        ];
        counters.extend(self.errors_by_category.values().copied());
        counters
    }
}

/// Source and target counters of one binding
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BindingComponents {
    pub source: ComponentMetricsSnapshot,
    pub target: ComponentMetricsSnapshot,
}

/// Metrics of one binding with its rollup
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BindingMetrics {
    pub binding_type: BindingType,
    pub components: BindingComponents,
    /// Messages committed on the target
    pub messages_transferred_total: u64,
    pub errors_total: u64,
    pub reconnections_total: u64,
    pub bytes_transferred_total: u64,
    /// Receive-to-commit latency of this binding
    pub latency: LatencySummary,
}

impl BindingMetrics {
    pub fn new(binding_type: BindingType, source: ComponentMetricsSnapshot, target: ComponentMetricsSnapshot) -> Self {
        Self {
            binding_type,
            messages_transferred_total: target.messages_sent_total,
            errors_total: source.errors_received_total
                + source.errors_sent_total
                + target.errors_received_total
                + target.errors_sent_total,
            reconnections_total: source.reconnections_total + target.reconnections_total,
            bytes_transferred_total: target.bytes_sent_total,
            latency: source.latency.clone(),
            components: BindingComponents { source, target },
        }
    }
}

/// Sums across all bindings
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SystemTotals {
    pub bindings_total: usize,
    pub messages_received_total: u64,
    pub messages_sent_total: u64,
    pub errors_received_total: u64,
    pub errors_sent_total: u64,
    pub errors_total: u64,
    pub reconnections_total: u64,
    pub connection_attempts_total: u64,
    pub bytes_received_total: u64,
    pub bytes_sent_total: u64,
    pub errors_by_category: BTreeMap<ErrorCategory, u64>,
    pub last_message_received_at: Option<DateTime<Utc>>,
    pub last_message_sent_at: Option<DateTime<Utc>>,
    pub last_error_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub uptime_seconds: i64,
}

/// Per-binding metrics plus system rollups
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemMetrics {
    pub system: SystemTotals,
    pub bindings: BTreeMap<String, BindingMetrics>,
}

impl SystemMetrics {
    pub fn new(bindings: BTreeMap<String, BindingMetrics>, started_at: DateTime<Utc>) -> Self {
        let mut system = SystemTotals {
            bindings_total: bindings.len(),
            errors_by_category: empty_categories(),
            started_at: Some(started_at),
            uptime_seconds: (Utc::now() - started_at).num_seconds().max(0),
            ..SystemTotals::default()
        };
        for binding in bindings.values() {
            for component in [&binding.components.source, &binding.components.target] {
                system.messages_received_total += component.messages_received_total;
                system.messages_sent_total += component.messages_sent_total;
                system.errors_received_total += component.errors_received_total;
                system.errors_sent_total += component.errors_sent_total;
                system.reconnections_total += component.reconnections_total;
                system.connection_attempts_total += component.connection_attempts_total;
                system.bytes_received_total += component.bytes_received_total;
                system.bytes_sent_total += component.bytes_sent_total;
                for (category, count) in &component.errors_by_category {
                    *system.errors_by_category.entry(*category).or_insert(0) += count;
                }
                system.last_message_received_at =
                    system.last_message_received_at.max(component.last_message_received_at);
                system.last_message_sent_at = system.last_message_sent_at.max(component.last_message_sent_at);
                system.last_error_at = system.last_error_at.max(component.last_error_at);
            }
        }
        system.errors_total = system.errors_received_total + system.errors_sent_total;
        Self { system, bindings }
    }
}
