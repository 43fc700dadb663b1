//! Binding worker
//!
//! One worker per binding runs a sequential poll / transfer / acknowledge
//! loop. A source message is acknowledged only after the target commits it,
//! so any failure before that point leaves it redeliverable on the source.
//!
//! Source and target reconnect independently: each component has its own
//! phase and backoff sequence, and every adapter call carries a deadline so
//! cancellation is observed within the longest single timeout.

use crate::config::{BindingConfig, RuntimeConfig};
use crate::retry::ReconnectBackoff;
use crate::state::{BindingState, WorkerState};
use adapters::{BrokerAdapter, Error as AdapterError, ErrorCategory, Message, Role, POLL_GRACE_MILLIS};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Disconnected,
    Connected,
    Backoff { until: Instant },
}

struct Component {
    adapter: Box<dyn BrokerAdapter>,
    phase: Phase,
    backoff: ReconnectBackoff,
}

/// Runs one binding until cancelled
pub struct BindingWorker {
    config: Arc<BindingConfig>,
    runtime: RuntimeConfig,
    state: Arc<BindingState>,
    source: Component,
    target: Component,
    cancel: CancellationToken,
}

/// Run an adapter call with a deadline
async fn bounded<T>(
    limit: Duration,
    operation: &str,
    call: impl Future<Output = adapters::Result<T>>,
) -> adapters::Result<T> {
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(AdapterError::Timeout {
            millis: limit.as_millis() as u64,
            operation: operation.to_string(),
        }),
    }
}

impl BindingWorker {
    pub fn new(
        config: Arc<BindingConfig>,
        runtime: RuntimeConfig,
        state: Arc<BindingState>,
        source: Box<dyn BrokerAdapter>,
        target: Box<dyn BrokerAdapter>,
        cancel: CancellationToken,
    ) -> Self {
        state.set_details(Role::Source, source.details());
        state.set_details(Role::Target, target.details());
        let component = |adapter| Component {
            adapter,
            phase: Phase::Disconnected,
            backoff: ReconnectBackoff::new(&runtime.backoff),
        };
        Self {
            source: component(source),
            target: component(target),
            config,
            runtime,
            state,
            cancel,
        }
    }

    fn component(&mut self, role: Role) -> &mut Component {
        match role {
            Role::Source => &mut self.source,
            Role::Target => &mut self.target,
        }
    }

    pub async fn run(mut self) {
        info!(
            "Binding {} started ({}: {} -> {})",
            self.config.name,
            self.config.binding_type,
            self.source.adapter.kind(),
            self.target.adapter.kind()
        );
        while !self.cancel.is_cancelled() {
            if self.ensure_connected().await {
                self.poll_once().await;
            }
        }
        self.shutdown().await;
    }

    /// Connect whatever is due; true when both sides are connected
    async fn ensure_connected(&mut self) -> bool {
        for role in [Role::Source, Role::Target] {
            let due = match self.component(role).phase {
                Phase::Connected => false,
                Phase::Backoff { until } => Instant::now() >= until,
                Phase::Disconnected => true,
            };
            if due {
                self.connect(role).await;
            }
            if self.cancel.is_cancelled() {
                return false;
            }
        }

        let pending = [self.source.phase, self.target.phase]
            .into_iter()
            .filter_map(|phase| match phase {
                Phase::Backoff { until } => Some(until),
                _ => None,
            })
            .min();
        match pending {
            None => true,
            Some(until) => {
                self.state.set_worker_state(WorkerState::Backoff);
                tokio::select! {
                    _ = self.cancel.cancelled() => {}
                    _ = tokio::time::sleep_until(until) => {}
                }
                false
            }
        }
    }

    async fn connect(&mut self, role: Role) {
        self.state.set_worker_state(WorkerState::Connecting);
        self.state.record_connect_attempt(role);
        let limit = self.runtime.connect_timeout();
        let cancel = self.cancel.clone();
        let result = {
            let adapter = &mut self.component(role).adapter;
            tokio::select! {
                _ = cancel.cancelled() => return,
                result = bounded(limit, "connect", adapter.connect()) => result,
            }
        };

        match result {
            Ok(()) => {
                // The delay sequence keeps growing until data flows again
                self.component(role).phase = Phase::Connected;
                self.state.record_connected(role);
                info!("Binding {} {} connected", self.config.name, role);
            }
            Err(e) => {
                // Every connect failure is a connection problem, whatever the broker said
                let e = match e.category() {
                    ErrorCategory::Protocol | ErrorCategory::Unknown => AdapterError::Connect {
                        category: ErrorCategory::Connection,
                        message: e.to_string(),
                    },
                    _ => e,
                };
                self.state.record_failure(role, &e);
                self.enter_backoff(role, &e).await;
            }
        }
    }

    async fn enter_backoff(&mut self, role: Role, error: &AdapterError) {
        let limit = self.runtime.connect_timeout();
        let component = self.component(role);
        if tokio::time::timeout(limit, component.adapter.disconnect()).await.is_err() {
            debug!("Disconnect timed out while entering backoff");
        }
        let delay = component.backoff.next_delay();
        let attempt = component.backoff.attempts();
        component.phase = Phase::Backoff {
            until: Instant::now() + delay,
        };
        self.state.record_reconnection(role);
        warn!(
            "Binding {} {} reconnecting in {:?} (attempt {}): {}",
            self.config.name, role, delay, attempt, error
        );
    }

    /// Successful data operation: the component is usable again
    fn succeeded(&mut self, role: Role) {
        self.component(role).backoff.reset();
        self.state.record_success(role);
    }

    /// Record a failed operation; connection-level failures trigger backoff
    async fn fail(&mut self, role: Role, error: AdapterError) {
        self.state.record_failure(role, &error);
        if error.is_connection_level() {
            self.enter_backoff(role, &error).await;
        } else {
            warn!("Binding {} {} operation failed: {}", self.config.name, role, error);
        }
    }

    async fn poll_once(&mut self) {
        self.state.set_worker_state(WorkerState::Polling);
        let interval = self.config.poll_interval;
        let limit = interval + Duration::from_millis(POLL_GRACE_MILLIS);
        let cancel = self.cancel.clone();
        let polled = {
            let adapter = &mut self.source.adapter;
            tokio::select! {
                _ = cancel.cancelled() => return,
                result = bounded(limit, "poll", adapter.poll(interval)) => result,
            }
        };

        match polled {
            Ok(None) => self.succeeded(Role::Source),
            Ok(Some(message)) => {
                self.succeeded(Role::Source);
                self.transfer(message).await;
            }
            Err(e) => self.fail(Role::Source, e).await,
        }
    }

    async fn transfer(&mut self, message: Message) {
        self.state.set_worker_state(WorkerState::Transferring);
        let received_at = Instant::now();
        let sent = bounded(
            self.runtime.send_timeout(),
            "send",
            self.target.adapter.send(&message),
        )
        .await;
        let send_latency = received_at.elapsed();

        match sent {
            Ok(ack) => {
                self.succeeded(Role::Target);
                let acked = bounded(
                    self.runtime.ack_timeout(),
                    "ack",
                    self.source.adapter.ack(&message),
                )
                .await;
                // The target committed, so the transfer counts even if the ack failed
                self.state
                    .record_transfer(message.len(), send_latency, received_at.elapsed());
                match acked {
                    Ok(()) => {
                        self.succeeded(Role::Source);
                        debug!(
                            "Binding {} transferred message {} (target ref: {:?})",
                            self.config.name, message.id, ack.broker_reference
                        );
                    }
                    Err(e) => {
                        warn!(
                            "Binding {} delivered message {} but could not acknowledge it, it will be redelivered",
                            self.config.name, message.id
                        );
                        self.fail(Role::Source, e).await;
                    }
                }
            }
            Err(e) if !e.is_connection_level() => {
                error!(
                    "Binding {} dropping message {}: {}",
                    self.config.name, message.id, e
                );
                self.state.record_failure(Role::Target, &e);
                self.release(&message, false).await;
            }
            Err(e) => {
                self.state.record_failure(Role::Target, &e);
                self.release(&message, true).await;
                self.enter_backoff(Role::Target, &e).await;
            }
        }
    }

    /// Hand a message back to the source without committing it
    async fn release(&mut self, message: &Message, requeue: bool) {
        let released = bounded(
            self.runtime.ack_timeout(),
            "nack",
            self.source.adapter.nack(message, requeue),
        )
        .await;
        if let Err(e) = released {
            self.fail(Role::Source, e).await;
        }
    }

    async fn shutdown(&mut self) {
        self.state.set_worker_state(WorkerState::ShuttingDown);
        info!("Binding {} shutting down", self.config.name);
        let limit = self.runtime.connect_timeout();
        for component in [&mut self.source, &mut self.target] {
            if tokio::time::timeout(limit, component.adapter.disconnect()).await.is_err() {
                debug!("Disconnect timed out during shutdown");
            }
            component.phase = Phase::Disconnected;
        }
        self.state.set_worker_state(WorkerState::Stopped);
        info!("Binding {} stopped", self.config.name);
    }
}
