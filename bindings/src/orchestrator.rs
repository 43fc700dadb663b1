//! Binding orchestration
//!
//! Owns one [`BindingState`] per binding and one supervised worker task per
//! binding. A panicking worker is restarted with fresh adapters; its
//! state outlives the restart so counters never go backwards.

use crate::config::{ensure_unique_names, BindingConfig, RuntimeConfig};
use crate::error::Result;
use crate::factory::AdapterFactory;
use crate::health::{BindingHealth, SystemHealth};
use crate::metrics::{BindingMetrics, SystemMetrics};
use crate::retry::ReconnectBackoff;
use crate::state::{BindingState, WorkerState};
use crate::worker::BindingWorker;
use adapters::{BrokerAdapter, Error as AdapterError, ErrorCategory, Operation, Role};
use chrono::{DateTime, Utc};
use futures::FutureExt;
use parking_lot::Mutex;
use serde::Serialize;
use std::any::Any;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

type AdapterPair = (Box<dyn BrokerAdapter>, Box<dyn BrokerAdapter>);

/// Outcome of [`Orchestrator::shutdown`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ShutdownReport {
    /// Bindings whose worker exited on its own
    pub clean: Vec<String>,
    /// Bindings whose worker had to be aborted
    pub forced: Vec<String>,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.forced.is_empty()
    }
}

pub struct Orchestrator {
    bindings: Vec<Arc<BindingConfig>>,
    runtime: RuntimeConfig,
    factory: Arc<dyn AdapterFactory>,
    states: BTreeMap<String, Arc<BindingState>>,
    tasks: Mutex<Vec<(String, JoinHandle<()>)>>,
    cancel: CancellationToken,
    started_at: DateTime<Utc>,
}

impl Orchestrator {
    /// Validate the binding set. Duplicate names are fatal.
    pub fn new(
        bindings: Vec<BindingConfig>,
        runtime: RuntimeConfig,
        factory: Arc<dyn AdapterFactory>,
    ) -> Result<Self> {
        runtime.validate()?;
        ensure_unique_names(bindings.iter().map(|b| b.name.as_str()))?;

        let states = bindings
            .iter()
            .map(|b| {
                let state = BindingState::new(&b.name, b.binding_type, runtime.latency_window);
                (b.name.clone(), Arc::new(state))
            })
            .collect();

        Ok(Self {
            bindings: bindings.into_iter().map(Arc::new).collect(),
            runtime,
            factory,
            states,
            tasks: Mutex::new(Vec::new()),
            cancel: CancellationToken::new(),
            started_at: Utc::now(),
        })
    }

    /// Spawn one supervised worker per binding.
    ///
    /// Every adapter is constructed before anything is spawned, so a bad
    /// adapter configuration leaves no worker running.
    pub fn start(&self) -> Result<()> {
        let mut tasks = self.tasks.lock();
        if !tasks.is_empty() {
            warn!("Orchestrator already started");
            return Ok(());
        }

        let mut pairs = Vec::with_capacity(self.bindings.len());
        for binding in &self.bindings {
            let pair = create_pair(self.factory.as_ref(), binding).map_err(|e| {
                error!("Failed to create adapters for binding {}: {}", binding.name, e);
                e
            })?;
            pairs.push(pair);
        }

        for (binding, pair) in self.bindings.iter().zip(pairs) {
            let state = match self.states.get(&binding.name) {
                Some(state) => state.clone(),
                None => continue,
            };
            let supervisor = Supervisor {
                binding: binding.clone(),
                runtime: self.runtime.clone(),
                factory: self.factory.clone(),
                state,
                cancel: self.cancel.child_token(),
            };
            tasks.push((binding.name.clone(), tokio::spawn(supervisor.run(pair))));
        }

        info!("Started {} binding workers", tasks.len());
        Ok(())
    }

    pub fn health(&self) -> SystemHealth {
        SystemHealth::new(
            self.states
                .iter()
                .map(|(name, state)| (name.clone(), state.health()))
                .collect(),
        )
    }

    pub fn binding_health(&self, name: &str) -> Option<BindingHealth> {
        self.states.get(name).map(|state| state.health())
    }

    pub fn metrics(&self) -> SystemMetrics {
        SystemMetrics::new(
            self.states
                .iter()
                .map(|(name, state)| (name.clone(), state.metrics()))
                .collect(),
            self.started_at,
        )
    }

    pub fn binding_metrics(&self, name: &str) -> Option<BindingMetrics> {
        self.states.get(name).map(|state| state.metrics())
    }

    /// Cancel every worker and wait for them within `timeout`.
    /// Workers still running at the deadline are aborted.
    pub async fn shutdown(&self, timeout: Duration) -> ShutdownReport {
        info!("Shutting down {} bindings (timeout {:?})", self.states.len(), timeout);
        self.cancel.cancel();

        let deadline = Instant::now() + timeout;
        let tasks = std::mem::take(&mut *self.tasks.lock());
        let mut report = ShutdownReport::default();

        for (name, mut handle) in tasks {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(())) => report.clean.push(name),
                Ok(Err(e)) => {
                    error!("Binding {} supervisor failed: {}", name, e);
                    report.forced.push(name);
                }
                Err(_) => {
                    warn!("Binding {} did not stop in time, aborting", name);
                    handle.abort();
                    if let Some(state) = self.states.get(&name) {
                        state.set_worker_state(WorkerState::Stopped);
                    }
                    report.forced.push(name);
                }
            }
        }

        info!(
            "Shutdown complete: {} clean, {} forced",
            report.clean.len(),
            report.forced.len()
        );
        report
    }
}

fn create_pair(factory: &dyn AdapterFactory, binding: &BindingConfig) -> adapters::Result<AdapterPair> {
    Ok((
        factory.create(binding, Role::Source)?,
        factory.create(binding, Role::Target)?,
    ))
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Restarts a binding's worker after a panic
struct Supervisor {
    binding: Arc<BindingConfig>,
    runtime: RuntimeConfig,
    factory: Arc<dyn AdapterFactory>,
    state: Arc<BindingState>,
    cancel: CancellationToken,
}

impl Supervisor {
    async fn run(self, initial: AdapterPair) {
        let mut backoff = ReconnectBackoff::new(&self.runtime.backoff);
        let mut pending = Some(initial);

        loop {
            let pair = match pending.take() {
                Some(pair) => Ok(pair),
                None => create_pair(self.factory.as_ref(), &self.binding),
            };

            match pair {
                Ok((source, target)) => {
                    let worker = BindingWorker::new(
                        self.binding.clone(),
                        self.runtime.clone(),
                        self.state.clone(),
                        source,
                        target,
                        self.cancel.clone(),
                    );
                    match AssertUnwindSafe(worker.run()).catch_unwind().await {
                        Ok(()) => return,
                        Err(panic) => {
                            let message = format!("worker panicked: {}", panic_message(panic.as_ref()));
                            error!("Binding {} {}", self.binding.name, message);
                            let e = AdapterError::for_op(Operation::Receive, ErrorCategory::Unknown, message);
                            self.state.record_failure(Role::Source, &e);
                            self.state.record_failure(Role::Target, &e);
                        }
                    }
                }
                Err(e) => {
                    error!("Binding {} could not recreate adapters: {}", self.binding.name, e);
                    self.state.record_failure(Role::Source, &e);
                }
            }

            let delay = backoff.next_delay();
            self.state.set_worker_state(WorkerState::Backoff);
            warn!("Restarting binding {} in {:?}", self.binding.name, delay);
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    self.state.set_worker_state(WorkerState::Stopped);
                    return;
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AdapterConfig, BackoffConfig, BindingType};
    use crate::error::Error;
    use adapters::{BrokerKind, FaultInjector, KubeMqConfig, LifecycleState, MemoryAdapter, MemoryQueue, Message};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn runtime() -> RuntimeConfig {
        RuntimeConfig {
            backoff: BackoffConfig {
                initial_interval_ms: 100,
                multiplier: 2.0,
                max_interval_ms: 1_000,
            },
            connect_timeout_ms: 500,
            send_timeout_ms: 500,
            ack_timeout_ms: 500,
            shutdown_timeout_ms: 1_000,
            latency_window: 16,
        }
    }

    fn binding(name: &str) -> BindingConfig {
        let kubemq = |queue: &str| AdapterConfig::KubeMq(KubeMqConfig::new("localhost:9090", queue));
        BindingConfig::new(name, BindingType::KubemqToKubemq, kubemq("in"), kubemq("out"))
            .with_poll_interval(Duration::from_millis(50))
    }

    /// Source adapter that panics on its first connect
    struct PanicOnce {
        connects: Arc<AtomicUsize>,
        inner: MemoryAdapter,
    }

    #[async_trait]
    impl BrokerAdapter for PanicOnce {
        fn kind(&self) -> BrokerKind {
            self.inner.kind()
        }
        fn role(&self) -> Role {
            self.inner.role()
        }
        fn details(&self) -> BTreeMap<String, String> {
            self.inner.details()
        }
        async fn connect(&mut self) -> adapters::Result<()> {
            if self.connects.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("boom");
            }
            self.inner.connect().await
        }
        async fn poll(&mut self, timeout: Duration) -> adapters::Result<Option<Message>> {
            self.inner.poll(timeout).await
        }
        async fn ack(&mut self, message: &Message) -> adapters::Result<()> {
            self.inner.ack(message).await
        }
        async fn nack(&mut self, message: &Message, requeue: bool) -> adapters::Result<()> {
            self.inner.nack(message, requeue).await
        }
        async fn send(&mut self, message: &Message) -> adapters::Result<adapters::Ack> {
            self.inner.send(message).await
        }
        async fn disconnect(&mut self) {
            self.inner.disconnect().await
        }
        fn is_healthy(&self) -> bool {
            self.inner.is_healthy()
        }
        fn state(&self) -> LifecycleState {
            self.inner.state()
        }
    }

    struct TestFactory {
        source: MemoryQueue,
        target: MemoryQueue,
        connects: Arc<AtomicUsize>,
        created: AtomicUsize,
    }

    impl TestFactory {
        fn new() -> Self {
            Self {
                source: MemoryQueue::new("in"),
                target: MemoryQueue::new("out"),
                connects: Arc::new(AtomicUsize::new(0)),
                created: AtomicUsize::new(0),
            }
        }
    }

    impl AdapterFactory for TestFactory {
        fn create(&self, _binding: &BindingConfig, role: Role) -> adapters::Result<Box<dyn BrokerAdapter>> {
            self.created.fetch_add(1, Ordering::SeqCst);
            Ok(match role {
                Role::Source => Box::new(PanicOnce {
                    connects: self.connects.clone(),
                    inner: MemoryAdapter::new(role, self.source.clone(), FaultInjector::new()),
                }),
                Role::Target => Box::new(MemoryAdapter::new(role, self.target.clone(), FaultInjector::new())),
            })
        }
    }

    struct FailingFactory;

    impl AdapterFactory for FailingFactory {
        fn create(&self, _binding: &BindingConfig, _role: Role) -> adapters::Result<Box<dyn BrokerAdapter>> {
            Err(AdapterError::Config("bad address".into()))
        }
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let result = Orchestrator::new(
            vec![binding("dup"), binding("dup")],
            runtime(),
            Arc::new(FailingFactory),
        );
        assert!(matches!(result, Err(Error::DuplicateBinding(name)) if name == "dup"));
    }

    #[tokio::test]
    async fn test_adapter_failure_spawns_nothing() {
        let orchestrator =
            Orchestrator::new(vec![binding("bad")], runtime(), Arc::new(FailingFactory)).unwrap();
        assert!(matches!(orchestrator.start(), Err(Error::Adapter(_))));
        assert!(orchestrator.tasks.lock().is_empty());
        let report = orchestrator.shutdown(Duration::from_millis(100)).await;
        assert!(report.clean.is_empty() && report.forced.is_empty());
    }

    #[tokio::test]
    async fn test_empty_system_is_healthy() {
        let orchestrator = Orchestrator::new(Vec::new(), runtime(), Arc::new(FailingFactory)).unwrap();
        orchestrator.start().unwrap();
        let health = orchestrator.health();
        assert!(health.overall_status.is_healthy());
        assert!(health.bindings.is_empty());
        assert_eq!(orchestrator.metrics().system.bindings_total, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_worker_is_restarted() {
        let factory = Arc::new(TestFactory::new());
        let orchestrator =
            Orchestrator::new(vec![binding("restart")], runtime(), factory.clone()).unwrap();
        orchestrator.start().unwrap();
        factory.source.push(Message::new("after restart").with_id("m1"));

        for _ in 0..500 {
            if factory.target.len() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(factory.target.len(), 1);
        // initial pair plus one fresh pair after the panic
        assert_eq!(factory.created.load(Ordering::SeqCst), 4);

        let metrics = orchestrator.binding_metrics("restart").unwrap();
        assert_eq!(metrics.components.source.errors_by_category[&ErrorCategory::Unknown], 1);
        assert_eq!(metrics.messages_transferred_total, 1);
        assert!(orchestrator.binding_health("restart").unwrap().status.is_healthy());

        let report = orchestrator.shutdown(Duration::from_secs(2)).await;
        assert_eq!(report.clean, vec!["restart".to_string()]);
        assert!(report.is_clean());
    }
}
