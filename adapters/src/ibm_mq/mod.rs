//! IBM MQ adapter (messaging REST API)
//!
//! Ack policy: explicit commit. `poll` browses the first message without
//! removing it; `ack` performs a destructive get by message id. A message
//! that fails before `ack` stays on the queue for the next browse.

pub mod reason;

use crate::{
    connector::BrokerAdapter,
    error::{classify_connect_status, classify_status},
    metrics::observe_request,
    types::*,
    Error, Operation, Result, DEFAULT_REQUEST_TIMEOUT_SECONDS,
};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{header::HeaderMap, Method, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const REST_PREFIX: &str = "/ibmmq/rest/v2";
const CSRF_HEADER: &str = "ibm-mq-rest-csrf-token";
const MD_PREFIX: &str = "ibm-mq-md-";
const MESSAGE_ID_HEADER: &str = "ibm-mq-md-messageId";
const CORRELATION_ID_HEADER: &str = "ibm-mq-md-correlationId";
const PERSISTENCE_HEADER: &str = "ibm-mq-md-persistence";

/// Message header mapped to the MQMD correlation id
pub const CORRELATION_ID: &str = "correlation_id";

/// IBM MQ configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IbmMqConfig {
    /// Host of the mqweb server
    pub host_name: String,
    /// mqweb HTTPS port
    #[serde(default = "default_port_number")]
    pub port_number: u16,
    /// Queue manager name
    pub queue_manager: String,
    /// Server-connection channel name
    pub channel_name: String,
    /// Queue name
    pub queue_name: String,
    /// User name for basic auth
    #[serde(default)]
    pub username: Option<String>,
    /// Password for basic auth
    #[serde(default)]
    pub password: Option<String>,
    /// Use https (mqweb default)
    #[serde(default = "default_tls")]
    pub tls: bool,
    /// Accept self-signed mqweb certificates
    #[serde(default)]
    pub accept_invalid_certs: bool,
    /// Explicit REST endpoint, overrides host/port
    #[serde(default)]
    pub base_url: Option<String>,
    /// Pause between browse attempts while polling (milliseconds)
    #[serde(default = "default_browse_interval_ms")]
    pub browse_interval_ms: u64,
    /// Per-request timeout (seconds)
    #[serde(default = "default_request_timeout_seconds")]
    pub request_timeout_seconds: u64,
}

fn default_port_number() -> u16 {
    9443
}

fn default_tls() -> bool {
    true
}

fn default_browse_interval_ms() -> u64 {
    250
}

fn default_request_timeout_seconds() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECONDS
}

impl IbmMqConfig {
    /// Create config with defaults
    pub fn new(
        host_name: impl Into<String>,
        queue_manager: impl Into<String>,
        channel_name: impl Into<String>,
        queue_name: impl Into<String>,
    ) -> Self {
        Self {
            host_name: host_name.into(),
            port_number: default_port_number(),
            queue_manager: queue_manager.into(),
            channel_name: channel_name.into(),
            queue_name: queue_name.into(),
            username: None,
            password: None,
            tls: true,
            accept_invalid_certs: false,
            base_url: None,
            browse_interval_ms: default_browse_interval_ms(),
            request_timeout_seconds: DEFAULT_REQUEST_TIMEOUT_SECONDS,
        }
    }

    /// Validate required fields
    pub fn validate(&self) -> Result<()> {
        let required = [
            ("host_name", &self.host_name),
            ("queue_manager", &self.queue_manager),
            ("channel_name", &self.channel_name),
            ("queue_name", &self.queue_name),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(Error::Config(format!("ibm_mq {} is required", field)));
            }
        }
        Ok(())
    }

    /// MQ style connection name, `host(port)`
    pub fn connection_name(&self) -> String {
        format!("{}({})", self.host_name, self.port_number)
    }

    /// Base URL of the mqweb server
    pub fn endpoint(&self) -> String {
        match &self.base_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => {
                let scheme = if self.tls { "https" } else { "http" };
                format!("{}://{}:{}", scheme, self.host_name, self.port_number)
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: Vec<ErrorDetail>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ErrorDetail {
    #[serde(default)]
    message: String,
    #[serde(default)]
    reason_code: Option<u32>,
}

/// Outcome of one HTTP exchange before interpretation
struct Reply {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

impl Reply {
    fn reason_code(&self) -> Option<(u32, String)> {
        let parsed: ErrorBody = serde_json::from_slice(&self.body).ok()?;
        let detail = parsed.error.into_iter().next()?;
        Some((detail.reason_code?, detail.message))
    }

    fn header(&self, name: &str) -> Option<String> {
        self.headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    }

    /// Classify a failed reply; `None` means "no message available"
    fn into_error(self, op: Operation) -> Option<Error> {
        if let Some((code, message)) = self.reason_code() {
            if code == reason::MQRC_NO_MSG_AVAILABLE {
                return None;
            }
            let detail = format!("{} (MQRC {}: {})", message, code, reason::describe(code));
            return Some(Error::for_op(op, reason::category(code), detail));
        }
        let category = if op == Operation::Connect {
            classify_connect_status(self.status)
        } else {
            classify_status(self.status)
        };
        let detail = if self.body.is_empty() {
            self.status.to_string()
        } else {
            format!("{}: {}", self.status, String::from_utf8_lossy(&self.body))
        };
        Some(Error::for_op(op, category, detail))
    }
}

/// IBM MQ queue adapter
pub struct IbmMqAdapter {
    config: IbmMqConfig,
    role: Role,
    endpoint: String,
    http: reqwest::Client,
    state: LifecycleState,
    healthy: bool,
}

impl IbmMqAdapter {
    /// Create adapter (no I/O until `connect`)
    pub fn new(config: IbmMqConfig, role: Role) -> Result<Self> {
        config.validate()?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .build()
            .map_err(|e| Error::Config(format!("ibm_mq http client: {}", e)))?;
        Ok(Self {
            endpoint: config.endpoint(),
            config,
            role,
            http,
            state: LifecycleState::Disconnected,
            healthy: false,
        })
    }

    fn message_path(&self) -> String {
        format!(
            "{}{}/messaging/qmgr/{}/queue/{}/message",
            self.endpoint, REST_PREFIX, self.config.queue_manager, self.config.queue_name
        )
    }

    fn request(&self, method: Method, url: String) -> reqwest::RequestBuilder {
        let mutating = method != Method::GET;
        let mut builder = self.http.request(method, url);
        if let Some(user) = &self.config.username {
            builder = builder.basic_auth(user, self.config.password.as_deref());
        }
        if mutating {
            builder = builder.header(CSRF_HEADER, "");
        }
        builder
    }

    async fn exchange(&self, op: Operation, builder: reqwest::RequestBuilder) -> Result<Reply> {
        let response = builder.send().await.map_err(|e| Error::from_http(op, &e))?;
        let status = response.status();
        let headers = response.headers().clone();
        // raw payload; only the send side requires text
        let body = response.bytes().await.map_err(|e| Error::from_http(op, &e))?;
        Ok(Reply {
            status,
            headers,
            body,
        })
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.state == LifecycleState::Connected {
            Ok(())
        } else {
            Err(Error::NotConnected(BrokerKind::IbmMq))
        }
    }

    /// Track the outcome of an operation; connection-level failures drop the session
    fn track<T>(&mut self, op: Operation, started: Instant, result: Result<T>) -> Result<T> {
        observe_request(BrokerKind::IbmMq, op, started, result.is_ok());
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

    /// Browse the first message once
    async fn browse(&self) -> Result<Option<Message>> {
        let reply = self
            .exchange(
                Operation::Receive,
                self.request(Method::GET, self.message_path()),
            )
            .await?;
        match reply.status {
            StatusCode::NO_CONTENT => Ok(None),
            s if s.is_success() => into_message(reply).map(Some),
            _ => match reply.into_error(Operation::Receive) {
                Some(err) => Err(err),
                None => Ok(None),
            },
        }
    }

    /// Destructive get of one message by id
    async fn remove(&self, message_id: &str) -> Result<()> {
        let builder = self
            .request(Method::DELETE, self.message_path())
            .query(&[("messageId", message_id)]);
        let reply = self.exchange(Operation::Ack, builder).await?;
        match reply.status {
            StatusCode::NO_CONTENT => {
                warn!(
                    "IBM MQ message {} no longer on {} at ack time",
                    message_id, self.config.queue_name
                );
                Ok(())
            }
            s if s.is_success() => Ok(()),
            _ => match reply.into_error(Operation::Ack) {
                Some(err) => Err(err),
                None => {
                    warn!(
                        "IBM MQ message {} no longer on {} at ack time",
                        message_id, self.config.queue_name
                    );
                    Ok(())
                }
            },
        }
    }
}

fn into_message(reply: Reply) -> Result<Message> {
    let id = reply.header(MESSAGE_ID_HEADER).ok_or_else(|| {
        Error::Protocol("IBM MQ browse response without ibm-mq-md-messageId".to_string())
    })?;
    let mut headers = BTreeMap::new();
    for (name, value) in reply.headers.iter() {
        let name = name.as_str();
        if !name.starts_with(MD_PREFIX) || name.eq_ignore_ascii_case(MESSAGE_ID_HEADER) {
            continue;
        }
        if let Ok(value) = value.to_str() {
            let key = if name.eq_ignore_ascii_case(CORRELATION_ID_HEADER) {
                CORRELATION_ID.to_string()
            } else {
                name.to_string()
            };
            headers.insert(key, value.to_string());
        }
    }
    Ok(Message {
        receipt: Some(id.clone()),
        id,
        payload: reply.body,
        headers,
        timestamp: chrono::Utc::now(),
    })
}

/// MQMD correlation ids are at most 24 bytes, hex encoded
fn valid_correlation_id(value: &str) -> bool {
    !value.is_empty() && value.len() <= 48 && value.chars().all(|c| c.is_ascii_hexdigit())
}

#[async_trait]
impl BrokerAdapter for IbmMqAdapter {
    fn kind(&self) -> BrokerKind {
        BrokerKind::IbmMq
    }

    fn role(&self) -> Role {
        self.role
    }

    fn details(&self) -> BTreeMap<String, String> {
        let mut details = BTreeMap::new();
        details.insert("broker".to_string(), BrokerKind::IbmMq.to_string());
        details.insert("connection_name".to_string(), self.config.connection_name());
        details.insert("queue_manager".to_string(), self.config.queue_manager.clone());
        details.insert("channel_name".to_string(), self.config.channel_name.clone());
        details.insert("queue_name".to_string(), self.config.queue_name.clone());
        details
    }

    async fn connect(&mut self) -> Result<()> {
        if self.state == LifecycleState::Connected {
            return Ok(());
        }
        let started = Instant::now();
        let url = format!(
            "{}{}/admin/qmgr/{}",
            self.endpoint, REST_PREFIX, self.config.queue_manager
        );
        let result = match self
            .exchange(Operation::Connect, self.request(Method::GET, url))
            .await
        {
            Ok(reply) if reply.status.is_success() => Ok(()),
            Ok(reply) => Err(reply.into_error(Operation::Connect).unwrap_or_else(|| {
                Error::for_op(
                    Operation::Connect,
                    ErrorCategory::Connection,
                    "queue manager check failed",
                )
            })),
            Err(e) => Err(e),
        };
        self.track(Operation::Connect, started, result)?;
        self.state = LifecycleState::Connected;
        info!(
            "Connected to IBM MQ queue manager {} at {} (queue: {})",
            self.config.queue_manager,
            self.config.connection_name(),
            self.config.queue_name
        );
        Ok(())
    }

    async fn poll(&mut self, timeout: Duration) -> Result<Option<Message>> {
        self.ensure_connected()?;
        let started = Instant::now();
        let deadline = tokio::time::Instant::now() + timeout;
        let interval = Duration::from_millis(self.config.browse_interval_ms.max(1));
        let result = loop {
            match self.browse().await {
                Ok(None) => {}
                other => break other,
            }
            let now = tokio::time::Instant::now();
            if now >= deadline {
                break Ok(None);
            }
            tokio::time::sleep(interval.min(deadline - now)).await;
        };
        let message = self.track(Operation::Receive, started, result)?;
        if let Some(msg) = &message {
            debug!("Browsed IBM MQ message {} on {}", msg.id, self.config.queue_name);
        }
        Ok(message)
    }

    async fn ack(&mut self, message: &Message) -> Result<()> {
        self.ensure_connected()?;
        let started = Instant::now();
        let id = message.receipt.as_deref().unwrap_or(&message.id);
        let result = self.remove(id).await;
        self.track(Operation::Ack, started, result)
    }

    async fn nack(&mut self, message: &Message, requeue: bool) -> Result<()> {
        if requeue {
            // Browsed messages never left the queue
            return Ok(());
        }
        self.ack(message).await
    }

    async fn send(&mut self, message: &Message) -> Result<Ack> {
        self.ensure_connected()?;
        let started = Instant::now();
        let result = match std::str::from_utf8(&message.payload) {
            Err(e) => Err(Error::Protocol(format!(
                "message {} payload is not UTF-8 text: {}",
                message.id, e
            ))),
            Ok(text) => {
                let mut builder = self
                    .request(Method::POST, self.message_path())
                    .header(reqwest::header::CONTENT_TYPE, "text/plain;charset=utf-8")
                    .header(PERSISTENCE_HEADER, "persistent")
                    .body(text.to_string());
                match message.headers.get(CORRELATION_ID) {
                    Some(cid) if valid_correlation_id(cid) => {
                        builder = builder.header(CORRELATION_ID_HEADER, cid.as_str());
                    }
                    Some(cid) => debug!("Skipping non-hex correlation id {}", cid),
                    None => {}
                }
                match self.exchange(Operation::Send, builder).await {
                    Ok(reply) if reply.status.is_success() => Ok(Ack::new(
                        message.id.clone(),
                        reply.header(MESSAGE_ID_HEADER),
                    )),
                    Ok(reply) => Err(reply.into_error(Operation::Send).unwrap_or_else(|| {
                        Error::for_op(Operation::Send, ErrorCategory::Unknown, "put rejected")
                    })),
                    Err(e) => Err(e),
                }
            }
        };
        self.track(Operation::Send, started, result)
    }

    async fn disconnect(&mut self) {
        if self.state == LifecycleState::Connected {
            info!(
                "Disconnected from IBM MQ queue manager {}",
                self.config.queue_manager
            );
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

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header_exists, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const MESSAGE_PATH: &str = "/ibmmq/rest/v2/messaging/qmgr/QM1/queue/DEV.QUEUE.1/message";

    fn config(server: &MockServer) -> IbmMqConfig {
        let mut cfg = IbmMqConfig::new("localhost", "QM1", "DEV.APP.SVRCONN", "DEV.QUEUE.1");
        cfg.base_url = Some(server.uri());
        cfg.username = Some("app".to_string());
        cfg.password = Some("passw0rd".to_string());
        cfg.browse_interval_ms = 10;
        cfg
    }

    async fn connected(server: &MockServer, role: Role) -> IbmMqAdapter {
        Mock::given(method("GET"))
            .and(path("/ibmmq/rest/v2/admin/qmgr/QM1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"qmgr": [{"name": "QM1"}]})))
            .mount(server)
            .await;
        let mut adapter = IbmMqAdapter::new(config(server), role).unwrap();
        adapter.connect().await.unwrap();
        adapter
    }

    fn mq_error(reason: u32) -> serde_json::Value {
        json!({"error": [{
            "type": "rest",
            "messageId": "MQWB0009E",
            "message": "MQWB0009E: Could not query the queue manager",
            "reasonCode": reason,
            "completionCode": 2
        }]})
    }

    #[test]
    fn test_config() {
        let cfg = IbmMqConfig::new("mq.local", "QM1", "DEV.APP.SVRCONN", "Q");
        assert_eq!(cfg.connection_name(), "mq.local(9443)");
        assert_eq!(cfg.endpoint(), "https://mq.local:9443");
        assert!(cfg.validate().is_ok());
        assert!(IbmMqConfig::new("mq.local", "", "CH", "Q").validate().is_err());
    }

    #[test]
    fn test_valid_correlation_id() {
        assert!(valid_correlation_id("414d5120514d31"));
        assert!(!valid_correlation_id("order-17"));
        assert!(!valid_correlation_id(&"a".repeat(50)));
    }

    #[tokio::test]
    async fn test_connect_auth_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ibmmq/rest/v2/admin/qmgr/QM1"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;
        let mut adapter = IbmMqAdapter::new(config(&server), Role::Target).unwrap();

        let err = adapter.connect().await.unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Auth);
        assert!(!adapter.is_healthy());
    }

    #[tokio::test]
    async fn test_browse_then_destructive_get() {
        let server = MockServer::start().await;
        let mut adapter = connected(&server, Role::Source).await;
        Mock::given(method("GET"))
            .and(path(MESSAGE_PATH))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("ibm-mq-md-messageId", "414d5120514d3120000001")
                    .insert_header("ibm-mq-md-correlationId", "000000000000")
                    .set_body_string("payment-1"),
            )
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path(MESSAGE_PATH))
            .and(query_param("messageId", "414d5120514d3120000001"))
            .and(header_exists("ibm-mq-rest-csrf-token"))
            .respond_with(ResponseTemplate::new(200).set_body_string("payment-1"))
            .expect(1)
            .mount(&server)
            .await;

        let msg = adapter.poll(Duration::from_millis(100)).await.unwrap().unwrap();
        assert_eq!(msg.id, "414d5120514d3120000001");
        assert_eq!(msg.payload, bytes::Bytes::from("payment-1"));
        assert_eq!(
            msg.headers.get(CORRELATION_ID).map(String::as_str),
            Some("000000000000")
        );

        adapter.ack(&msg).await.unwrap();
    }

    #[tokio::test]
    async fn test_poll_empty_until_timeout() {
        let server = MockServer::start().await;
        let mut adapter = connected(&server, Role::Source).await;
        Mock::given(method("GET"))
            .and(path(MESSAGE_PATH))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let msg = adapter.poll(Duration::from_millis(50)).await.unwrap();
        assert!(msg.is_none());
        assert_eq!(adapter.state(), LifecycleState::Connected);
    }

    #[tokio::test]
    async fn test_reason_code_classification() {
        let server = MockServer::start().await;
        let mut adapter = connected(&server, Role::Source).await;
        Mock::given(method("GET"))
            .and(path(MESSAGE_PATH))
            .respond_with(ResponseTemplate::new(500).set_body_json(mq_error(2009)))
            .mount(&server)
            .await;

        let err = adapter.poll(Duration::from_millis(50)).await.unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Connection);
        assert!(err.to_string().contains("MQRC 2009"));
        assert_eq!(adapter.state(), LifecycleState::Disconnected);
    }

    #[tokio::test]
    async fn test_send_queue_full_retries_with_backoff() {
        let server = MockServer::start().await;
        let mut adapter = connected(&server, Role::Target).await;
        Mock::given(method("POST"))
            .and(path(MESSAGE_PATH))
            .respond_with(ResponseTemplate::new(503).set_body_json(mq_error(2053)))
            .mount(&server)
            .await;

        // a full queue is not the message's fault: requeue and back off
        let err = adapter.send(&Message::new("x")).await.unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Timeout);
        assert!(err.is_connection_level());
        assert_eq!(adapter.state(), LifecycleState::Disconnected);
    }

    #[tokio::test]
    async fn test_send_unknown_queue_is_connection_level() {
        let server = MockServer::start().await;
        let mut adapter = connected(&server, Role::Target).await;
        Mock::given(method("POST"))
            .and(path(MESSAGE_PATH))
            .respond_with(ResponseTemplate::new(404).set_body_json(mq_error(2085)))
            .mount(&server)
            .await;

        let err = adapter.send(&Message::new("x")).await.unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Connection);
        assert_eq!(adapter.state(), LifecycleState::Disconnected);
    }

    #[tokio::test]
    async fn test_send_oversized_message_is_protocol() {
        let server = MockServer::start().await;
        let mut adapter = connected(&server, Role::Target).await;
        Mock::given(method("POST"))
            .and(path(MESSAGE_PATH))
            .respond_with(ResponseTemplate::new(400).set_body_json(mq_error(2030)))
            .mount(&server)
            .await;

        let err = adapter.send(&Message::new("x")).await.unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Protocol);
        assert_eq!(adapter.state(), LifecycleState::Connected);
    }

    #[tokio::test]
    async fn test_browse_keeps_binary_payload() {
        let server = MockServer::start().await;
        let mut adapter = connected(&server, Role::Source).await;
        let raw = vec![0xff, 0xfe, 0x00, 0x41];
        Mock::given(method("GET"))
            .and(path(MESSAGE_PATH))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("ibm-mq-md-messageId", "414d5120514d3120000002")
                    .set_body_bytes(raw.clone()),
            )
            .mount(&server)
            .await;

        let msg = adapter.poll(Duration::from_millis(100)).await.unwrap().unwrap();
        assert_eq!(msg.payload, bytes::Bytes::from(raw));
    }

    #[tokio::test]
    async fn test_send_non_utf8_is_protocol() {
        let server = MockServer::start().await;
        let mut adapter = connected(&server, Role::Target).await;

        let err = adapter
            .send(&Message::new(vec![0xff, 0xfe, 0x00]))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[tokio::test]
    async fn test_send_returns_broker_reference() {
        let server = MockServer::start().await;
        let mut adapter = connected(&server, Role::Target).await;
        Mock::given(method("POST"))
            .and(path(MESSAGE_PATH))
            .and(header_exists("ibm-mq-rest-csrf-token"))
            .respond_with(
                ResponseTemplate::new(201).insert_header("ibm-mq-md-messageId", "414d51aa"),
            )
            .expect(1)
            .mount(&server)
            .await;

        let ack = adapter
            .send(&Message::new("hello").with_id("m-9"))
            .await
            .unwrap();
        assert_eq!(ack.message_id, "m-9");
        assert_eq!(ack.broker_reference.as_deref(), Some("414d51aa"));
    }
}
