//! Connection health tracking
//!
//! One failure is enough to mark a component unhealthy; only the next
//! successful operation on that component makes it healthy again.

use crate::config::BindingType;
use adapters::ErrorCategory;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

/// Health status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }

    fn all(statuses: impl IntoIterator<Item = HealthStatus>) -> HealthStatus {
        if statuses.into_iter().all(|s| s.is_healthy()) {
            HealthStatus::Healthy
        } else {
            HealthStatus::Unhealthy
        }
    }
}

/// Reason reported before a component has ever connected
pub const NOT_CONNECTED: &str = "not yet connected";

/// Most recent failure of a component
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LastError {
    pub category: ErrorCategory,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Outcome of recording an operation, used to log transitions once
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Unchanged,
    BecameHealthy,
    BecameUnhealthy,
}

/// Health of one side of a binding
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComponentHealth {
    pub status: HealthStatus,
    pub consecutive_failure_count: u64,
    pub last_success_timestamp: Option<DateTime<Utc>>,
    pub last_error: Option<LastError>,
    pub details: BTreeMap<String, String>,
}

impl ComponentHealth {
    /// Not yet connected; unhealthy with a reason until the first success
    pub fn new(details: BTreeMap<String, String>) -> Self {
        Self {
            status: HealthStatus::Unhealthy,
            consecutive_failure_count: 0,
            last_success_timestamp: None,
            last_error: Some(LastError {
                category: ErrorCategory::Connection,
                message: NOT_CONNECTED.to_string(),
                timestamp: Utc::now(),
            }),
            details,
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status.is_healthy()
    }

    pub fn record_success(&mut self) -> Transition {
        let was_healthy = self.is_healthy();
        self.status = HealthStatus::Healthy;
        self.consecutive_failure_count = 0;
        self.last_success_timestamp = Some(Utc::now());
        self.last_error = None;
        if was_healthy {
            Transition::Unchanged
        } else {
            Transition::BecameHealthy
        }
    }

    pub fn record_failure(&mut self, category: ErrorCategory, message: &str) -> Transition {
        let was_healthy = self.is_healthy();
        let message = if message.trim().is_empty() {
            format!("{} error", category)
        } else {
            message.to_string()
        };
        self.status = HealthStatus::Unhealthy;
        self.consecutive_failure_count += 1;
        self.last_error = Some(LastError {
            category,
            message,
            timestamp: Utc::now(),
        });
        if was_healthy {
            Transition::BecameUnhealthy
        } else {
            Transition::Unchanged
        }
    }
}

/// Health of a binding
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BindingHealth {
    pub status: HealthStatus,
    pub binding_type: BindingType,
    /// Current worker state machine phase
    pub state: String,
    pub source: ComponentHealth,
    pub target: ComponentHealth,
}

impl BindingHealth {
    pub fn new(
        binding_type: BindingType,
        state: impl Into<String>,
        source: ComponentHealth,
        target: ComponentHealth,
    ) -> Self {
        Self {
            status: HealthStatus::all([source.status, target.status]),
            binding_type,
            state: state.into(),
            source,
            target,
        }
    }
}

/// Health of every binding; computed on read, never stored
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemHealth {
    pub overall_status: HealthStatus,
    pub bindings: BTreeMap<String, BindingHealth>,
}

impl SystemHealth {
    pub fn new(bindings: BTreeMap<String, BindingHealth>) -> Self {
        Self {
            overall_status: HealthStatus::all(bindings.values().map(|b| b.status)),
            bindings,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn component() -> ComponentHealth {
        ComponentHealth::new(BTreeMap::new())
    }

    #[test]
    fn test_starts_unhealthy_with_reason() {
        let health = component();
        assert_eq!(health.status, HealthStatus::Unhealthy);
        assert_eq!(health.consecutive_failure_count, 0);
        let last = health.last_error.unwrap();
        assert_eq!(last.category, ErrorCategory::Connection);
        assert_eq!(last.message, NOT_CONNECTED);
    }

    #[test]
    fn test_failure_then_recovery() {
        let mut health = component();
        assert_eq!(health.record_success(), Transition::BecameHealthy);
        assert_eq!(health.record_success(), Transition::Unchanged);

        assert_eq!(
            health.record_failure(ErrorCategory::Connection, "refused"),
            Transition::BecameUnhealthy
        );
        assert_eq!(
            health.record_failure(ErrorCategory::Timeout, "slow"),
            Transition::Unchanged
        );
        assert_eq!(health.consecutive_failure_count, 2);
        assert_eq!(
            health.last_error.as_ref().map(|e| e.category),
            Some(ErrorCategory::Timeout)
        );

        assert_eq!(health.record_success(), Transition::BecameHealthy);
        assert_eq!(health.consecutive_failure_count, 0);
        assert!(health.last_success_timestamp.is_some());
        assert!(health.last_error.is_none());
    }

    #[test]
    fn test_empty_message_is_filled() {
        let mut health = component();
        health.record_failure(ErrorCategory::Auth, "  ");
        assert_eq!(health.last_error.unwrap().message, "auth error");
    }

    #[test]
    fn test_binding_and_system_status() {
        let mut healthy = component();
        healthy.record_success();
        let mut failing = component();
        failing.record_failure(ErrorCategory::Unknown, "boom");

        let ok = BindingHealth::new(
            BindingType::KubemqToKubemq,
            "polling",
            healthy.clone(),
            healthy.clone(),
        );
        let bad = BindingHealth::new(BindingType::KubemqToIbmMq, "backoff", healthy, failing);
        assert_eq!(ok.status, HealthStatus::Healthy);
        assert_eq!(bad.status, HealthStatus::Unhealthy);

        let mut bindings = BTreeMap::new();
        bindings.insert("a".to_string(), ok.clone());
        assert_eq!(SystemHealth::new(bindings.clone()).overall_status, HealthStatus::Healthy);
        bindings.insert("b".to_string(), bad);
        assert_eq!(SystemHealth::new(bindings).overall_status, HealthStatus::Unhealthy);
        assert_eq!(SystemHealth::new(BTreeMap::new()).overall_status, HealthStatus::Healthy);
    }

    proptest! {
        #[test]
        fn prop_unhealthy_always_has_last_error(ops in proptest::collection::vec(any::<bool>(), 0..50)) {
            let mut health = component();
            for success in ops {
                if success {
                    health.record_success();
                } else {
                    health.record_failure(ErrorCategory::Connection, "");
                }
                if health.consecutive_failure_count > 0 {
                    prop_assert_eq!(health.status, HealthStatus::Unhealthy);
                }
                if !health.is_healthy() {
                    prop_assert!(health
                        .last_error
                        .as_ref()
                        .map(|e| !e.message.is_empty())
                        .unwrap_or(false));
                }
            }
        }

        #[test]
        fn prop_overall_healthy_iff_all_components(statuses in proptest::collection::vec((any::<bool>(), any::<bool>()), 0..8)) {
            let mut bindings = BTreeMap::new();
            for (i, (src, tgt)) in statuses.iter().enumerate() {
                let mut source = component();
                let mut target = component();
                if *src { source.record_success(); } else { source.record_failure(ErrorCategory::Auth, "denied"); }
                if *tgt { target.record_success(); } else { target.record_failure(ErrorCategory::Auth, "denied"); }
                bindings.insert(
                    format!("b{}", i),
                    BindingHealth::new(BindingType::KubemqToKubemq, "polling", source, target),
                );
            }
            let all_healthy = statuses.iter().all(|(s, t)| *s && *t);
            let system = SystemHealth::new(bindings);
            prop_assert_eq!(system.overall_status.is_healthy(), all_healthy);
        }
    }
}
