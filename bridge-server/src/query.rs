//! Read-only views over the orchestrator for the dashboard API

use bindings::{BindingHealth, BindingMetrics, ComponentHealth, HealthStatus, Orchestrator, SystemMetrics};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::{ApiError, Result};

/// `{ success, data }` wrapper used by every JSON endpoint
#[derive(Debug, Serialize)]
pub struct Envelope<T: Serialize> {
    pub success: bool,
    pub data: T,
}

impl<T: Serialize> Envelope<T> {
    pub fn ok(data: T) -> Self {
        Self { success: true, data }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ComponentView {
    pub status: HealthStatus,
    pub details: BTreeMap<String, String>,
    /// Filled while the component is unhealthy, including before its first connect
    pub errors: Map<String, Value>,
    pub consecutive_failure_count: u64,
    pub last_success_timestamp: Option<DateTime<Utc>>,
}

impl From<ComponentHealth> for ComponentView {
    fn from(health: ComponentHealth) -> Self {
        let mut errors = Map::new();
        if !health.is_healthy() {
            if let Some(last) = &health.last_error {
                errors.insert("last_error".into(), json!(last.message));
                errors.insert("category".into(), json!(last.category));
                errors.insert("timestamp".into(), json!(last.timestamp));
            }
            errors.insert("consecutive_failures".into(), json!(health.consecutive_failure_count));
        }
        Self {
            status: health.status,
            details: health.details,
            errors,
            consecutive_failure_count: health.consecutive_failure_count,
            last_success_timestamp: health.last_success_timestamp,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BindingHealthView {
    pub status: HealthStatus,
    pub binding_type: String,
    pub state: String,
    pub source: ComponentView,
    pub target: ComponentView,
}

impl From<BindingHealth> for BindingHealthView {
    fn from(health: BindingHealth) -> Self {
        Self {
            status: health.status,
            binding_type: health.binding_type.as_str().to_string(),
            state: health.state,
            source: health.source.into(),
            target: health.target.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SystemHealthView {
    pub overall_status: HealthStatus,
    pub bindings: BTreeMap<String, BindingHealthView>,
}

/// Snapshot queries answered straight from orchestrator state
#[derive(Clone)]
pub struct QueryService {
    orchestrator: Arc<Orchestrator>,
}

impl QueryService {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }

    pub fn health(&self) -> SystemHealthView {
        let health = self.orchestrator.health();
        SystemHealthView {
            overall_status: health.overall_status,
            bindings: health
                .bindings
                .into_iter()
                .map(|(name, binding)| (name, binding.into()))
                .collect(),
        }
    }

    pub fn binding_health(&self, name: &str) -> Result<BindingHealthView> {
        self.orchestrator
            .binding_health(name)
            .map(Into::into)
            .ok_or_else(|| ApiError::BindingNotFound(name.to_string()))
    }

    pub fn metrics(&self) -> SystemMetrics {
        self.orchestrator.metrics()
    }

    pub fn binding_metrics(&self, name: &str) -> Result<BindingMetrics> {
        self.orchestrator
            .binding_metrics(name)
            .ok_or_else(|| ApiError::BindingNotFound(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use adapters::ErrorCategory;

    #[test]
    fn test_component_errors_before_first_connect() {
        let view = ComponentView::from(ComponentHealth::new(BTreeMap::new()));
        assert_eq!(view.status, HealthStatus::Unhealthy);
        assert_eq!(view.errors["last_error"], json!("not yet connected"));
        assert_eq!(view.errors["category"], json!("connection"));
        assert_eq!(view.errors["consecutive_failures"], json!(0));
    }

    #[test]
    fn test_component_errors_only_while_failing() {
        let mut health = ComponentHealth::new(BTreeMap::new());
        health.record_failure(ErrorCategory::Auth, "MQRC_NOT_AUTHORIZED");
        let view = ComponentView::from(health.clone());
        assert_eq!(view.errors["last_error"], json!("MQRC_NOT_AUTHORIZED"));
        assert_eq!(view.errors["category"], json!("auth"));
        assert_eq!(view.errors["consecutive_failures"], json!(1));

        health.record_success();
        let view = ComponentView::from(health);
        assert!(view.errors.is_empty());
        assert!(view.status.is_healthy());
    }
}
