//! KubeMQ adapter (REST gateway)
//!
//! Ack policy: explicit commit. `poll` peeks the head of the queue without
//! consuming it; `ack` consumes exactly one message and checks that it is the
//! one that was peeked. A message that fails before `ack` simply stays at the
//! head of the queue and is seen again on the next poll.

use crate::{
    connector::BrokerAdapter, error::classify_connect_status, metrics::observe_request, types::*, Error,
    Operation, Result, DEFAULT_REQUEST_TIMEOUT_SECONDS, POLL_GRACE_MILLIS,
};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{TimeZone, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Header carrying the KubeMQ metadata string
pub const METADATA_HEADER: &str = "metadata";

/// KubeMQ configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KubeMqConfig {
    /// Gateway address (`host:port` or full URL)
    pub address: String,
    /// Queue (channel) name
    pub queue_name: String,
    /// Client ID presented to the broker
    #[serde(default = "default_client_id")]
    pub client_id: String,
    /// Authentication token
    #[serde(default)]
    pub auth_token: Option<String>,
    /// Use https when `address` has no scheme
    #[serde(default)]
    pub tls: bool,
    /// Per-request timeout (seconds)
    #[serde(default = "default_request_timeout_seconds")]
    pub request_timeout_seconds: u64,
}

fn default_client_id() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "mq-bridge".to_string())
}

fn default_request_timeout_seconds() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECONDS
}

impl KubeMqConfig {
    /// Create config with defaults
    pub fn new(address: impl Into<String>, queue_name: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            queue_name: queue_name.into(),
            client_id: default_client_id(),
            auth_token: None,
            tls: false,
            request_timeout_seconds: DEFAULT_REQUEST_TIMEOUT_SECONDS,
        }
    }

    /// Validate required fields
    pub fn validate(&self) -> Result<()> {
        if self.address.trim().is_empty() {
            return Err(Error::Config("kubemq address is required".to_string()));
        }
        if self.queue_name.trim().is_empty() {
            return Err(Error::Config("kubemq queue_name is required".to_string()));
        }
        Ok(())
    }

    /// Base URL of the REST gateway
    pub fn base_url(&self) -> String {
        let address = self.address.trim_end_matches('/');
        if address.starts_with("http://") || address.starts_with("https://") {
            address.to_string()
        } else {
            let scheme = if self.tls { "https" } else { "http" };
            format!("{}://{}", scheme, address)
        }
    }
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    is_error: bool,
    #[serde(default)]
    message: String,
    data: Option<T>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct ReceiveRequest<'a> {
    #[serde(rename = "RequestID")]
    request_id: String,
    #[serde(rename = "ClientID")]
    client_id: &'a str,
    channel: &'a str,
    max_number_of_messages: u32,
    wait_time_seconds: u64,
    is_peak: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ReceiveData {
    #[serde(default)]
    messages: Vec<QueueMessage>,
    #[serde(default)]
    is_error: bool,
    #[serde(default)]
    error: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct QueueMessage {
    #[serde(rename = "MessageID")]
    message_id: String,
    #[serde(default)]
    metadata: String,
    #[serde(default)]
    body: String,
    #[serde(default)]
    tags: BTreeMap<String, String>,
    #[serde(default)]
    attributes: Option<QueueAttributes>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct QueueAttributes {
    #[serde(default)]
    timestamp: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct SendRequest<'a> {
    id: &'a str,
    #[serde(rename = "ClientID")]
    client_id: &'a str,
    channel: &'a str,
    metadata: &'a str,
    body: String,
    tags: &'a BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SendData {
    #[serde(rename = "MessageID", default)]
    message_id: String,
    #[serde(default)]
    is_error: bool,
    #[serde(default)]
    error: String,
}

/// KubeMQ queue adapter
pub struct KubeMqAdapter {
    config: KubeMqConfig,
    role: Role,
    base_url: String,
    http: reqwest::Client,
    state: LifecycleState,
    healthy: bool,
}

impl KubeMqAdapter {
    /// Create adapter (no I/O until `connect`)
    pub fn new(config: KubeMqConfig, role: Role) -> Result<Self> {
        config.validate()?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()
            .map_err(|e| Error::Config(format!("kubemq http client: {}", e)))?;
        Ok(Self {
            base_url: config.base_url(),
            config,
            role,
            http,
            state: LifecycleState::Disconnected,
            healthy: false,
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let builder = self.http.request(method, format!("{}{}", self.base_url, path));
        match &self.config.auth_token {
            Some(token) => builder.header(reqwest::header::AUTHORIZATION, token),
            None => builder,
        }
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.state == LifecycleState::Connected {
            Ok(())
        } else {
            Err(Error::NotConnected(BrokerKind::KubeMq))
        }
    }

    /// Track the outcome of an operation; connection-level failures drop the session
    fn track<T>(&mut self, op: Operation, started: Instant, result: Result<T>) -> Result<T> {
        observe_request(BrokerKind::KubeMq, op, started, result.is_ok());
        match &result {
            Ok(_) => self.healthy = true,
            Err(e) if e.is_connection_level() => {
                self.healthy = false;
                self.state = LifecycleState::Disconnected;
            }
            Err(_) => {}
        }
        result
    }

    async fn call<T: DeserializeOwned>(
        &self,
        op: Operation,
        builder: reqwest::RequestBuilder,
    ) -> Result<T> {
        let response = builder.send().await.map_err(|e| Error::from_http(op, &e))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::from_status(op, status, &body));
        }
        let envelope: Envelope<T> = response.json().await.map_err(|e| Error::from_http(op, &e))?;
        if envelope.is_error {
            return Err(Error::for_op(op, classify_message(&envelope.message), envelope.message));
        }
        envelope
            .data
            .ok_or_else(|| Error::Protocol(format!("kubemq {} response without data", op.as_str())))
    }

    async fn receive(&self, op: Operation, wait: Duration, peek: bool) -> Result<Vec<QueueMessage>> {
        let wait_seconds = wait.as_secs_f64().ceil().max(1.0) as u64;
        let body = ReceiveRequest {
            request_id: Uuid::new_v4().to_string(),
            client_id: &self.config.client_id,
            channel: &self.config.queue_name,
            max_number_of_messages: 1,
            wait_time_seconds: wait_seconds,
            is_peak: peek,
        };
        let builder = self
            .request(reqwest::Method::POST, "/queue/receive")
            .timeout(Duration::from_secs(wait_seconds) + Duration::from_millis(POLL_GRACE_MILLIS))
            .json(&body);
        let data: ReceiveData = self.call(op, builder).await?;
        if data.is_error {
            return Err(Error::for_op(op, classify_message(&data.error), data.error));
        }
        Ok(data.messages)
    }

    /// Consume the head message, verifying it matches `expected_id`.
    ///
    /// When the peeked message already left the queue the destructive
    /// receive takes whatever is now at the head; that message is sent back
    /// to the queue before returning.
    async fn consume(&self, expected_id: &str) -> Result<()> {
        let mut consumed = self.receive(Operation::Ack, Duration::from_secs(1), false).await?;
        let Some(other) = consumed.pop() else {
            warn!(
                "KubeMQ message {} no longer on {} at ack time",
                expected_id, self.config.queue_name
            );
            return Ok(());
        };
        if other.message_id == expected_id {
            return Ok(());
        }

        warn!(
            "KubeMQ message {} left {} before ack, returning {} to the queue",
            expected_id, self.config.queue_name, other.message_id
        );
        self.restore(&other).await.map_err(|e| {
            error!(
                "KubeMQ message {} was consumed from {} and could not be returned: {}",
                other.message_id, self.config.queue_name, e
            );
            e
        })
    }

    /// Put a consumed message back on the queue unchanged
    async fn restore(&self, raw: &QueueMessage) -> Result<()> {
        let body = SendRequest {
            id: &raw.message_id,
            client_id: &self.config.client_id,
            channel: &self.config.queue_name,
            metadata: &raw.metadata,
            body: raw.body.clone(),
            tags: &raw.tags,
        };
        let builder = self.request(reqwest::Method::POST, "/queue/send").json(&body);
        let data: SendData = self.call(Operation::Ack, builder).await?;
        if data.is_error {
            return Err(Error::for_op(Operation::Ack, classify_message(&data.error), data.error));
        }
        Ok(())
    }
}

/// Classify a broker-reported error string
fn classify_message(message: &str) -> ErrorCategory {
    let lower = message.to_ascii_lowercase();
    if lower.contains("unauthorized") || lower.contains("auth") || lower.contains("token") {
        ErrorCategory::Auth
    } else if lower.contains("timeout") || lower.contains("deadline") {
        ErrorCategory::Timeout
    } else if lower.contains("too large") || lower.contains("size exceeded") {
        // the only gateway failures that belong to one message
        ErrorCategory::Protocol
    } else if lower.contains("unavailable")
        || lower.contains("connection")
        || lower.contains("invalid")
        || lower.contains("not found")
    {
        ErrorCategory::Connection
    } else {
        ErrorCategory::Unknown
    }
}

fn into_message(raw: QueueMessage) -> Result<Message> {
    let payload = BASE64.decode(raw.body.as_bytes()).map_err(|e| {
        Error::Protocol(format!("kubemq message {} body is not base64: {}", raw.message_id, e))
    })?;
    let mut headers = raw.tags;
    if !raw.metadata.is_empty() {
        headers.insert(METADATA_HEADER.to_string(), raw.metadata);
    }
    let timestamp = raw
        .attributes
        .filter(|a| a.timestamp > 0)
        .map(|a| Utc.timestamp_nanos(a.timestamp))
        .unwrap_or_else(Utc::now);
    Ok(Message {
        receipt: Some(raw.message_id.clone()),
        id: raw.message_id,
        payload: payload.into(),
        headers,
        timestamp,
    })
}

#[async_trait]
impl BrokerAdapter for KubeMqAdapter {
    fn kind(&self) -> BrokerKind {
        BrokerKind::KubeMq
    }

    fn role(&self) -> Role {
        self.role
    }

    fn details(&self) -> BTreeMap<String, String> {
        let mut details = BTreeMap::new();
        details.insert("broker".to_string(), BrokerKind::KubeMq.to_string());
        details.insert("address".to_string(), self.config.address.clone());
        details.insert("queue_name".to_string(), self.config.queue_name.clone());
        details.insert("client_id".to_string(), self.config.client_id.clone());
        details
    }

    async fn connect(&mut self) -> Result<()> {
        if self.state == LifecycleState::Connected {
            return Ok(());
        }
        let started = Instant::now();
        let result = match self.request(reqwest::Method::GET, "/ping").send().await {
            Ok(resp) if resp.status().is_success() => Ok(()),
            Ok(resp) => Err(Error::for_op(
                Operation::Connect,
                classify_connect_status(resp.status()),
                format!("kubemq ping returned {}", resp.status()),
            )),
            Err(e) => Err(Error::from_http(Operation::Connect, &e)),
        };
        self.track(Operation::Connect, started, result)?;
        self.state = LifecycleState::Connected;
        info!(
            "Connected to KubeMQ at {} (queue: {})",
            self.base_url, self.config.queue_name
        );
        Ok(())
    }

    async fn poll(&mut self, timeout: Duration) -> Result<Option<Message>> {
        self.ensure_connected()?;
        let started = Instant::now();
        let result = self.receive(Operation::Receive, timeout, true).await;
        let mut messages = self.track(Operation::Receive, started, result)?;
        let Some(raw) = messages.pop() else {
            return Ok(None);
        };
        let id = raw.message_id.clone();
        match into_message(raw) {
            Ok(message) => {
                debug!("Peeked KubeMQ message {} on {}", message.id, self.config.queue_name);
                Ok(Some(message))
            }
            Err(e) => {
                // Drop the undecodable head so it cannot block the queue
                if let Err(consume_err) = self.consume(&id).await {
                    warn!("Failed to drop malformed KubeMQ message {}: {}", id, consume_err);
                }
                Err(e)
            }
        }
    }

    async fn ack(&mut self, message: &Message) -> Result<()> {
        self.ensure_connected()?;
        let started = Instant::now();
        let id = message.receipt.as_deref().unwrap_or(&message.id);
        let result = self.consume(id).await;
        self.track(Operation::Ack, started, result)
    }

    async fn nack(&mut self, message: &Message, requeue: bool) -> Result<()> {
        if requeue {
            // Peeked messages never left the queue
            return Ok(());
        }
        self.ack(message).await
    }

    async fn send(&mut self, message: &Message) -> Result<Ack> {
        self.ensure_connected()?;
        let started = Instant::now();
        let metadata = message
            .headers
            .get(METADATA_HEADER)
            .map(String::as_str)
            .unwrap_or_default();
        let body = SendRequest {
            id: &message.id,
            client_id: &self.config.client_id,
            channel: &self.config.queue_name,
            metadata,
            body: BASE64.encode(&message.payload),
            tags: &message.headers,
        };
        let builder = self.request(reqwest::Method::POST, "/queue/send").json(&body);
        let result = match self.call::<SendData>(Operation::Send, builder).await {
            Ok(data) if data.is_error => Err(Error::for_op(
                Operation::Send,
                classify_message(&data.error),
                data.error,
            )),
            Ok(data) => Ok(Ack::new(
                message.id.clone(),
                (!data.message_id.is_empty()).then_some(data.message_id),
            )),
            Err(e) => Err(e),
        };
        self.track(Operation::Send, started, result)
    }

    async fn disconnect(&mut self) {
        if self.state == LifecycleState::Connected {
            info!("Disconnected from KubeMQ at {}", self.base_url);
        }
        self.state = LifecycleState::Disconnected;
        self.healthy = false;
    }

    fn is_healthy(&self) -> bool {
        self.state == LifecycleState::Connected && self.healthy
    }

    fn state(&self) -> LifecycleState {
        self.state
    }
}
