// Integration tests for the binding runtime
// Every broker is an in-memory queue, so no external services are needed.

use adapters::{
    BrokerAdapter, Error as AdapterError, ErrorCategory, FaultInjector, IbmMqConfig, KubeMqConfig,
    MemoryAdapter, MemoryQueue, Message, Operation, Role,
};
use bindings::{
    AdapterConfig, AdapterFactory, BackoffConfig, BindingConfig, BindingType, Error, HealthStatus,
    Orchestrator, RuntimeConfig, WorkerState,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone)]
struct Endpoint {
    queue: MemoryQueue,
    faults: FaultInjector,
}

impl Endpoint {
    fn new(name: &str) -> Self {
        Self {
            queue: MemoryQueue::new(name),
            faults: FaultInjector::new(),
        }
    }
}

/// Hands out memory adapters keyed by binding name
#[derive(Default)]
struct MemoryFactory {
    endpoints: Mutex<HashMap<(String, Role), Endpoint>>,
    send_delay: Option<Duration>,
}

impl MemoryFactory {
    fn with_send_delay(delay: Duration) -> Self {
        Self {
            send_delay: Some(delay),
            ..Self::default()
        }
    }

    fn endpoint(&self, binding: &str, role: Role) -> Endpoint {
        self.endpoints
            .lock()
            .entry((binding.to_string(), role))
            .or_insert_with(|| Endpoint::new(&format!("{}-{}", binding, role)))
            .clone()
    }
}

impl AdapterFactory for MemoryFactory {
    fn create(&self, binding: &BindingConfig, role: Role) -> adapters::Result<Box<dyn BrokerAdapter>> {
        let endpoint = self.endpoint(&binding.name, role);
        let mut adapter = MemoryAdapter::new(role, endpoint.queue, endpoint.faults);
        if let (Role::Target, Some(delay)) = (role, self.send_delay) {
            adapter = adapter.with_send_delay(delay);
        }
        Ok(Box::new(adapter))
    }
}

fn runtime() -> RuntimeConfig {
    RuntimeConfig {
        backoff: BackoffConfig {
            initial_interval_ms: 100,
            multiplier: 2.0,
            max_interval_ms: 2_000,
        },
        connect_timeout_ms: 1_000,
        send_timeout_ms: 1_000,
        ack_timeout_ms: 1_000,
        shutdown_timeout_ms: 2_000,
        latency_window: 64,
    }
}

fn kubemq_to_ibm(name: &str) -> BindingConfig {
    BindingConfig::new(
        name,
        BindingType::KubemqToIbmMq,
        AdapterConfig::KubeMq(KubeMqConfig::new("localhost:9090", "bridge.in")),
        AdapterConfig::IbmMq(IbmMqConfig::new("mq", "QM1", "DEV.APP.SVRCONN", "DEV.QUEUE.1")),
    )
    .with_poll_interval(Duration::from_secs(1))
}

async fn wait_for(mut condition: impl FnMut() -> bool) {
    for _ in 0..2_000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}

fn connect_refused() -> AdapterError {
    AdapterError::for_op(Operation::Connect, ErrorCategory::Connection, "connection refused")
}

#[tokio::test(start_paused = true)]
async fn test_end_to_end_transfer() {
    let factory = Arc::new(MemoryFactory::default());
    let orchestrator = Orchestrator::new(vec![kubemq_to_ibm("kubemq_to_ibm")], runtime(), factory.clone()).unwrap();
    orchestrator.start().unwrap();

    let source = factory.endpoint("kubemq_to_ibm", Role::Source).queue;
    let target = factory.endpoint("kubemq_to_ibm", Role::Target).queue;
    source.push(Message::new("M").with_id("M"));

    // one poll interval plus processing
    tokio::time::sleep(Duration::from_millis(1_500)).await;

    let metrics = orchestrator.metrics();
    let binding = &metrics.bindings["kubemq_to_ibm"];
    assert_eq!(binding.components.source.messages_received_total, 1);
    assert_eq!(binding.components.target.messages_sent_total, 1);
    assert_eq!(metrics.system.messages_sent_total, 1);
    assert_eq!(target.messages()[0].id, "M");
    assert_eq!(target.messages()[0].payload.as_ref(), b"M");
    assert!(source.is_empty());
    assert_eq!(orchestrator.health().overall_status, HealthStatus::Healthy);

    let report = orchestrator.shutdown(Duration::from_secs(2)).await;
    assert!(report.is_clean());
}

#[tokio::test(start_paused = true)]
async fn test_binding_isolation() {
    let factory = Arc::new(MemoryFactory::default());
    factory
        .endpoint("a", Role::Source)
        .faults
        .fail_always(Operation::Connect, connect_refused());

    let orchestrator = Orchestrator::new(
        vec![kubemq_to_ibm("a"), kubemq_to_ibm("b")],
        runtime(),
        factory.clone(),
    )
    .unwrap();
    orchestrator.start().unwrap();

    let b_source = factory.endpoint("b", Role::Source).queue;
    b_source.push(Message::new("for b"));
    wait_for(|| orchestrator.binding_metrics("b").unwrap().messages_transferred_total == 1).await;
    wait_for(|| orchestrator.binding_metrics("a").unwrap().components.source.reconnections_total >= 3).await;

    let health = orchestrator.health();
    assert_eq!(health.overall_status, HealthStatus::Unhealthy);
    assert_eq!(health.bindings["a"].status, HealthStatus::Unhealthy);
    assert_eq!(health.bindings["b"].status, HealthStatus::Healthy);

    let b = orchestrator.binding_metrics("b").unwrap();
    assert_eq!(b.errors_total, 0);
    assert_eq!(b.reconnections_total, 0);
    assert!(health.bindings["b"].source.last_error.is_none());
    assert!(health.bindings["b"].target.last_error.is_none());

    orchestrator.shutdown(Duration::from_secs(2)).await;
}

#[tokio::test(start_paused = true)]
async fn test_send_failure_redelivers() {
    let factory = Arc::new(MemoryFactory::default());
    factory.endpoint("retry", Role::Target).faults.fail_times(
        Operation::Send,
        AdapterError::for_op(Operation::Send, ErrorCategory::Timeout, "send timed out"),
        2,
    );
    let orchestrator = Orchestrator::new(vec![kubemq_to_ibm("retry")], runtime(), factory.clone()).unwrap();
    orchestrator.start().unwrap();

    let source = factory.endpoint("retry", Role::Source).queue;
    let target = factory.endpoint("retry", Role::Target).queue;
    source.push(Message::new("keep me").with_id("k1"));

    wait_for(|| target.len() == 1).await;
    wait_for(|| source.is_empty() && source.in_flight() == 0).await;

    let metrics = orchestrator.binding_metrics("retry").unwrap();
    assert_eq!(metrics.components.target.errors_sent_total, 2);
    assert_eq!(metrics.components.target.errors_by_category[&ErrorCategory::Timeout], 2);
    assert_eq!(metrics.components.target.messages_sent_total, 1);
    assert_eq!(target.messages()[0].id, "k1");

    orchestrator.shutdown(Duration::from_secs(2)).await;
}

#[tokio::test]
async fn test_duplicate_names_fail_startup() {
    let factory = Arc::new(MemoryFactory::default());
    let result = Orchestrator::new(
        vec![kubemq_to_ibm("same"), kubemq_to_ibm("same")],
        runtime(),
        factory.clone(),
    );
    assert!(matches!(result, Err(Error::DuplicateBinding(_))));
    // no adapters were ever requested
    assert!(factory.endpoints.lock().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_forces_stuck_worker() {
    let factory = Arc::new(MemoryFactory::with_send_delay(Duration::from_secs(30)));
    let mut runtime = runtime();
    runtime.send_timeout_ms = 60_000;
    let orchestrator = Orchestrator::new(vec![kubemq_to_ibm("stuck")], runtime, factory.clone()).unwrap();
    orchestrator.start().unwrap();

    factory.endpoint("stuck", Role::Source).queue.push(Message::new("slow"));
    let state = || orchestrator.health().bindings["stuck"].state.clone();
    wait_for(|| state() == WorkerState::Transferring.as_str()).await;

    let report = orchestrator.shutdown(Duration::from_millis(200)).await;
    assert_eq!(report.forced, vec!["stuck".to_string()]);
    assert!(!report.is_clean());
    assert_eq!(state(), WorkerState::Stopped.as_str());
}

#[tokio::test(start_paused = true)]
async fn test_counters_never_decrease() {
    let factory = Arc::new(MemoryFactory::default());
    let orchestrator = Orchestrator::new(vec![kubemq_to_ibm("mono")], runtime(), factory.clone()).unwrap();
    orchestrator.start().unwrap();

    let source = factory.endpoint("mono", Role::Source).queue;
    let target_faults = factory.endpoint("mono", Role::Target).faults;
    let mut previous = orchestrator.binding_metrics("mono").unwrap();

    for round in 0..6 {
        if round % 2 == 1 {
            target_faults.fail_times(
                Operation::Send,
                AdapterError::for_op(Operation::Send, ErrorCategory::Connection, "reset"),
                1,
            );
        }
        source.push(Message::new(format!("m{}", round)));
        tokio::time::sleep(Duration::from_millis(700)).await;

        let current = orchestrator.binding_metrics("mono").unwrap();
        for (before, after) in [
            (&previous.components.source, &current.components.source),
            (&previous.components.target, &current.components.target),
        ] {
            for (b, a) in before.counters().iter().zip(after.counters()) {
                assert!(a >= *b, "counter went backwards: {} -> {}", b, a);
            }
        }
        assert!(current.latency.count >= previous.latency.count);
        previous = current;
    }

    orchestrator.shutdown(Duration::from_secs(2)).await;
}
