//! Shared per-binding state
//!
//! Written only by the binding's own worker, read by the query surface.
//! Both components live behind one lock so a reader always sees a
//! consistent binding, never half of an update.

use crate::config::BindingType;
use crate::exporter;
use crate::health::{BindingHealth, ComponentHealth, Transition};
use crate::metrics::{BindingMetrics, ComponentMetrics};
use adapters::{ErrorCategory, Role};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{info, warn};

/// Binding worker state machine phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Connecting,
    Polling,
    Transferring,
    Backoff,
    ShuttingDown,
    Stopped,
}

impl WorkerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerState::Connecting => "connecting",
            WorkerState::Polling => "polling",
            WorkerState::Transferring => "transferring",
            WorkerState::Backoff => "backoff",
            WorkerState::ShuttingDown => "shutting_down",
            WorkerState::Stopped => "stopped",
        }
    }
}

#[derive(Debug)]
struct ComponentState {
    health: ComponentHealth,
    metrics: ComponentMetrics,
}

#[derive(Debug)]
struct Inner {
    worker: WorkerState,
    source: ComponentState,
    target: ComponentState,
}

impl Inner {
    fn component(&mut self, role: Role) -> &mut ComponentState {
        match role {
            Role::Source => &mut self.source,
            Role::Target => &mut self.target,
        }
    }
}

/// Health and metrics of one binding
#[derive(Debug)]
pub struct BindingState {
    name: String,
    binding_type: BindingType,
    inner: RwLock<Inner>,
}

impl BindingState {
    pub fn new(
        name: impl Into<String>,
        binding_type: BindingType,
        latency_window: usize,
    ) -> Self {
        let component = || ComponentState {
            health: ComponentHealth::new(BTreeMap::new()),
            metrics: ComponentMetrics::new(latency_window),
        };
        Self {
            name: name.into(),
            binding_type,
            inner: RwLock::new(Inner {
                worker: WorkerState::Connecting,
                source: component(),
                target: component(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn binding_type(&self) -> BindingType {
        self.binding_type
    }

    pub fn worker_state(&self) -> WorkerState {
        self.inner.read().worker
    }

    pub fn set_worker_state(&self, state: WorkerState) {
        self.inner.write().worker = state;
    }

    /// Adapter details shown in health responses
    pub fn set_details(&self, role: Role, details: BTreeMap<String, String>) {
        self.inner.write().component(role).health.details = details;
    }

    pub fn record_connect_attempt(&self, role: Role) {
        self.inner.write().component(role).metrics.record_connection_attempt();
    }

    pub fn record_connected(&self, role: Role) {
        let transition = {
            let mut inner = self.inner.write();
            let component = inner.component(role);
            component.metrics.record_connected();
            component.health.record_success()
        };
        self.log_transition(role, transition, None);
    }

    /// Successful adapter operation
    pub fn record_success(&self, role: Role) {
        let transition = self.inner.write().component(role).health.record_success();
        self.log_transition(role, transition, None);
    }

    /// Failed adapter operation. Source failures count as receive errors,
    /// target failures as send errors.
    pub fn record_failure(&self, role: Role, error: &adapters::Error) {
        let category = error.category();
        let message = error.to_string();
        let transition = {
            let mut inner = self.inner.write();
            let component = inner.component(role);
            match role {
                Role::Source => component.metrics.record_receive_error(category),
                Role::Target => component.metrics.record_send_error(category),
            }
            component.health.record_failure(category, &message)
        };
        exporter::error(&self.name, role, category);
        self.log_transition(role, transition, Some((category, &message)));
    }

    pub fn record_reconnection(&self, role: Role) {
        self.inner.write().component(role).metrics.record_reconnection();
        exporter::reconnection(&self.name, role);
    }

    /// Message committed on the target and acknowledged on the source
    pub fn record_transfer(&self, bytes: usize, send_latency: Duration, transfer_latency: Duration) {
        {
            let mut inner = self.inner.write();
            inner.source.metrics.record_received(bytes, transfer_latency);
            inner.target.metrics.record_sent(bytes, send_latency);
        }
        exporter::message(&self.name, Role::Source);
        exporter::message(&self.name, Role::Target);
        exporter::transfer(&self.name, transfer_latency);
    }

    pub fn health(&self) -> BindingHealth {
        let inner = self.inner.read();
        BindingHealth::new(
            self.binding_type,
            inner.worker.as_str(),
            inner.source.health.clone(),
            inner.target.health.clone(),
        )
    }

    pub fn metrics(&self) -> BindingMetrics {
        let inner = self.inner.read();
        BindingMetrics::new(
            self.binding_type,
            inner.source.metrics.snapshot(),
            inner.target.metrics.snapshot(),
        )
    }

    fn log_transition(&self, role: Role, transition: Transition, error: Option<(ErrorCategory, &str)>) {
        match transition {
            Transition::BecameHealthy => {
                exporter::component_up(&self.name, role, true);
                info!("Binding {} {} is healthy", self.name, role);
            }
            Transition::BecameUnhealthy => {
                exporter::component_up(&self.name, role, false);
                let (category, message) = error.unwrap_or((ErrorCategory::Unknown, ""));
                warn!(
                    "Binding {} {} became unhealthy ({}): {}",
                    self.name, role, category, message
                );
            }
            Transition::Unchanged => {}
        }
    }
}
