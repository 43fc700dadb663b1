//! In-process broker with fault injection
//!
//! [`MemoryQueue`] behaves like a work queue with leases: a polled message is
//! moved to an in-flight set until it is acknowledged (removed), released
//! (put back at the head) or its consumer disconnects (put back at the head).
//! [`FaultInjector`] makes any adapter operation fail on demand.

use crate::{connector::BrokerAdapter, metrics::observe_request, types::*, Error, Operation, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tracing::debug;

#[derive(Default)]
struct QueueState {
    ready: VecDeque<Message>,
    in_flight: HashMap<String, Message>,
    next_receipt: u64,
}

#[derive(Default)]
struct QueueInner {
    state: Mutex<QueueState>,
    notify: Notify,
}

/// Shared in-memory queue
#[derive(Clone)]
pub struct MemoryQueue {
    name: Arc<str>,
    inner: Arc<QueueInner>,
}

impl MemoryQueue {
    /// Create an empty queue
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: Arc::from(name.into()),
            inner: Arc::new(QueueInner::default()),
        }
    }

    /// Queue name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Enqueue a message at the tail
    pub fn push(&self, message: Message) {
        self.inner.state.lock().ready.push_back(message);
        self.inner.notify.notify_one();
    }

    /// Enqueue a payload, returning the generated message ID
    pub fn push_payload(&self, payload: impl Into<bytes::Bytes>) -> String {
        let message = Message::new(payload);
        let id = message.id.clone();
        self.push(message);
        id
    }

    /// Messages ready for delivery
    pub fn len(&self) -> usize {
        self.inner.state.lock().ready.len()
    }

    /// True when no message is ready
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Messages leased but not yet settled
    pub fn in_flight(&self) -> usize {
        self.inner.state.lock().in_flight.len()
    }

    /// Snapshot of ready messages, head first
    pub fn messages(&self) -> Vec<Message> {
        self.inner.state.lock().ready.iter().cloned().collect()
    }

    fn lease(&self) -> Option<Message> {
        let mut state = self.inner.state.lock();
        let mut message = state.ready.pop_front()?;
        state.next_receipt += 1;
        let receipt = format!("{}-{}", self.name, state.next_receipt);
        message.receipt = Some(receipt.clone());
        state.in_flight.insert(receipt, message.clone());
        Some(message)
    }

    async fn lease_wait(&self, timeout: Duration) -> Option<Message> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(message) = self.lease() {
                return Some(message);
            }
            if tokio::time::timeout_at(deadline, self.inner.notify.notified())
                .await
                .is_err()
            {
                return self.lease();
            }
        }
    }

    /// Settle a lease. Returns false when the receipt is unknown.
    fn settle(&self, receipt: &str, requeue: bool) -> bool {
        let mut state = self.inner.state.lock();
        let Some(mut message) = state.in_flight.remove(receipt) else {
            return false;
        };
        if requeue {
            message.receipt = None;
            state.ready.push_front(message);
            drop(state);
            self.inner.notify.notify_one();
        }
        true
    }
}

#[derive(Debug, Clone)]
struct Fault {
    error: Error,
    remaining: Option<u32>,
}

/// Injects failures into memory adapter operations
#[derive(Clone, Default)]
pub struct FaultInjector {
    faults: Arc<Mutex<HashMap<Operation, Fault>>>,
}

impl FaultInjector {
    /// Create an injector with no faults
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every call of `op` with `error` until cleared
    pub fn fail_always(&self, op: Operation, error: Error) {
        self.faults.lock().insert(
            op,
            Fault {
                error,
                remaining: None,
            },
        );
    }

    /// Fail the next `times` calls of `op` with `error`
    pub fn fail_times(&self, op: Operation, error: Error, times: u32) {
        self.faults.lock().insert(
            op,
            Fault {
                error,
                remaining: Some(times),
            },
        );
    }

    /// Remove the fault for `op`
    pub fn clear(&self, op: Operation) {
        self.faults.lock().remove(&op);
    }

    /// Remove all faults
    pub fn clear_all(&self) {
        self.faults.lock().clear();
    }

    fn check(&self, op: Operation) -> Result<()> {
        let mut faults = self.faults.lock();
        let Some(fault) = faults.get_mut(&op) else {
            return Ok(());
        };
        let error = fault.error.clone();
        match fault.remaining.as_mut() {
            Some(0) => {
                faults.remove(&op);
                return Ok(());
            }
            Some(n) => {
                *n -= 1;
                if *n == 0 {
                    faults.remove(&op);
                }
            }
            None => {}
        }
        Err(error)
    }
}

/// Adapter over a [`MemoryQueue`]
pub struct MemoryAdapter {
    role: Role,
    queue: MemoryQueue,
    faults: FaultInjector,
    state: LifecycleState,
    held: HashSet<String>,
    send_delay: Option<Duration>,
    sent: u64,
}

impl MemoryAdapter {
    /// Create adapter
    pub fn new(role: Role, queue: MemoryQueue, faults: FaultInjector) -> Self {
        Self {
            role,
            queue,
            faults,
            state: LifecycleState::Disconnected,
            held: HashSet::new(),
            send_delay: None,
            sent: 0,
        }
    }

    /// Delay every send by `delay` (simulates a slow target)
    pub fn with_send_delay(mut self, delay: Duration) -> Self {
        self.send_delay = Some(delay);
        self
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.state == LifecycleState::Connected {
            Ok(())
        } else {
            Err(Error::NotConnected(BrokerKind::Memory))
        }
    }

    fn release_held(&mut self) {
        for receipt in self.held.drain() {
            self.queue.settle(&receipt, true);
        }
    }

    fn fail(&mut self, error: Error) -> Error {
        if error.is_connection_level() {
            self.release_held();
            self.state = LifecycleState::Disconnected;
        }
        error
    }
}

#[async_trait]
impl BrokerAdapter for MemoryAdapter {
    fn kind(&self) -> BrokerKind {
        BrokerKind::Memory
    }

    fn role(&self) -> Role {
        self.role
    }

    fn details(&self) -> BTreeMap<String, String> {
        let mut details = BTreeMap::new();
        details.insert("queue_name".to_string(), self.queue.name().to_string());
        details.insert("broker".to_string(), BrokerKind::Memory.to_string());
        details
    }

    async fn connect(&mut self) -> Result<()> {
        if self.state == LifecycleState::Connected {
            return Ok(());
        }
        let started = Instant::now();
        let result = self.faults.check(Operation::Connect);
        observe_request(BrokerKind::Memory, Operation::Connect, started, result.is_ok());
        result?;
        self.state = LifecycleState::Connected;
        debug!("Memory adapter connected to {}", self.queue.name());
        Ok(())
    }

    async fn poll(&mut self, timeout: Duration) -> Result<Option<Message>> {
        self.ensure_connected()?;
        if let Err(e) = self.faults.check(Operation::Receive) {
            return Err(self.fail(e));
        }
        let message = self.queue.lease_wait(timeout).await;
        if let Some(receipt) = message.as_ref().and_then(|m| m.receipt.clone()) {
            self.held.insert(receipt);
        }
        Ok(message)
    }

    async fn ack(&mut self, message: &Message) -> Result<()> {
        if let Err(e) = self.faults.check(Operation::Ack) {
            return Err(self.fail(e));
        }
        let receipt = message.receipt.as_deref().unwrap_or_default();
        if !self.held.remove(receipt) || !self.queue.settle(receipt, false) {
            return Err(Error::for_op(
                Operation::Ack,
                ErrorCategory::Unknown,
                format!("no lease for message {}", message.id),
            ));
        }
        Ok(())
    }

    async fn nack(&mut self, message: &Message, requeue: bool) -> Result<()> {
        let receipt = message.receipt.as_deref().unwrap_or_default();
        if self.held.remove(receipt) {
            self.queue.settle(receipt, requeue);
        }
        Ok(())
    }

    async fn send(&mut self, message: &Message) -> Result<Ack> {
        self.ensure_connected()?;
        if let Some(delay) = self.send_delay {
            tokio::time::sleep(delay).await;
        }
        let started = Instant::now();
        if let Err(e) = self.faults.check(Operation::Send) {
            observe_request(BrokerKind::Memory, Operation::Send, started, false);
            return Err(self.fail(e));
        }
        let mut delivered = message.clone();
        delivered.receipt = None;
        self.queue.push(delivered);
        self.sent += 1;
        observe_request(BrokerKind::Memory, Operation::Send, started, true);
        Ok(Ack::new(
            message.id.clone(),
            Some(format!("{}#{}", self.queue.name(), self.sent)),
        ))
    }

    async fn disconnect(&mut self) {
        self.release_held();
        self.state = LifecycleState::Disconnected;
    }

    fn is_healthy(&self) -> bool {
        self.state == LifecycleState::Connected
    }

    fn state(&self) -> LifecycleState {
        self.state
    }
}
