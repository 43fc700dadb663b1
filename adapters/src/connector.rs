//! Broker adapter interface

use crate::{types::*, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::time::Duration;

/// Uniform capability contract over one broker queue.
///
/// An adapter is owned by exactly one binding worker, so every operation
/// takes `&mut self`. Any adapter can play either role.
#[async_trait]
pub trait BrokerAdapter: Send {
    /// Get broker kind
    fn kind(&self) -> BrokerKind;

    /// Get role inside the binding
    fn role(&self) -> Role;

    /// Descriptive details (queue name, address, channel...) for health reporting
    fn details(&self) -> BTreeMap<String, String>;

    /// Establish a session. Idempotent when already connected.
    async fn connect(&mut self) -> Result<()>;

    /// Wait up to `timeout` for one message. `Ok(None)` on timeout.
    ///
    /// The returned message stays owned by the broker until [`ack`] or
    /// [`nack`] is called for it.
    ///
    /// [`ack`]: BrokerAdapter::ack
    /// [`nack`]: BrokerAdapter::nack
    async fn poll(&mut self, timeout: Duration) -> Result<Option<Message>>;

    /// Commit consumption of a polled message on the source broker
    async fn ack(&mut self, message: &Message) -> Result<()>;

    /// Give a polled message back. `requeue = true` makes it redeliverable,
    /// `requeue = false` drops it according to the adapter's discard policy.
    async fn nack(&mut self, message: &Message, requeue: bool) -> Result<()>;

    /// Deliver one message. Success means the target committed it.
    async fn send(&mut self, message: &Message) -> Result<Ack>;

    /// Release the session. Safe to call multiple times.
    async fn disconnect(&mut self);

    /// Cheap, non-blocking liveness check
    fn is_healthy(&self) -> bool;

    /// Current lifecycle state
    fn state(&self) -> LifecycleState;
}
