//! Bridge configuration
//!
//! Loaded once at startup from a declarative file (`CONFIG_PATH`, default
//! `config.yaml`) with `MQ_BRIDGE__*` environment overrides. Adapter blocks
//! are kept untyped until the binding type says which shape they must have.

use crate::{Error, Result};
use adapters::{BrokerKind, IbmMqConfig, KubeMqConfig};
use config::{Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::env;
use std::time::Duration;
use tracing::warn;

/// Default config file path
pub const DEFAULT_CONFIG_PATH: &str = "config.yaml";

/// Environment override prefix (`MQ_BRIDGE__SERVER__PORT=9100`)
pub const ENV_PREFIX: &str = "MQ_BRIDGE";

/// Complete process configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BridgeConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub bindings: Vec<BindingSpec>,
}

/// HTTP query service settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub workers: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 9000,
            workers: 2,
        }
    }
}

/// Reconnection delay growth
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct BackoffConfig {
    pub initial_interval_ms: u64,
    pub multiplier: f64,
    pub max_interval_ms: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_interval_ms: 500,
            multiplier: 2.0,
            max_interval_ms: 30_000,
        }
    }
}

impl BackoffConfig {
    pub fn initial_interval(&self) -> Duration {
        Duration::from_millis(self.initial_interval_ms)
    }

    pub fn max_interval(&self) -> Duration {
        Duration::from_millis(self.max_interval_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.initial_interval_ms == 0 {
            return Err(Error::invalid("runtime", "backoff.initial_interval_ms must be > 0"));
        }
        if self.multiplier.is_nan() || self.multiplier < 1.0 {
            return Err(Error::invalid("runtime", "backoff.multiplier must be >= 1.0"));
        }
        if self.max_interval_ms < self.initial_interval_ms {
            return Err(Error::invalid(
                "runtime",
                "backoff.max_interval_ms must be >= backoff.initial_interval_ms",
            ));
        }
        Ok(())
    }
}

/// Worker timeouts and retry settings, passed to every worker at construction
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub backoff: BackoffConfig,
    pub connect_timeout_ms: u64,
    pub send_timeout_ms: u64,
    pub ack_timeout_ms: u64,
    pub shutdown_timeout_ms: u64,
    /// Samples kept for latency quantiles
    pub latency_window: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            backoff: BackoffConfig::default(),
            connect_timeout_ms: 10_000,
            send_timeout_ms: 10_000,
            ack_timeout_ms: 5_000,
            shutdown_timeout_ms: 15_000,
            latency_window: 1024,
        }
    }
}

impl RuntimeConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        self.backoff.validate()?;
        let timeouts = [
            ("connect_timeout_ms", self.connect_timeout_ms),
            ("send_timeout_ms", self.send_timeout_ms),
            ("ack_timeout_ms", self.ack_timeout_ms),
        ];
        for (field, value) in timeouts {
            if value == 0 {
                return Err(Error::invalid("runtime", format!("{} must be > 0", field)));
            }
        }
        if self.latency_window == 0 {
            return Err(Error::invalid("runtime", "latency_window must be > 0"));
        }
        Ok(())
    }
}

/// Direction of a binding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BindingType {
    #[serde(alias = "kubemq_to_ibm")]
    KubemqToIbmMq,
    IbmMqToKubemq,
    KubemqToKubemq,
}

impl BindingType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BindingType::KubemqToIbmMq => "kubemq_to_ibm_mq",
            BindingType::IbmMqToKubemq => "ibm_mq_to_kubemq",
            BindingType::KubemqToKubemq => "kubemq_to_kubemq",
        }
    }

    pub fn source_kind(&self) -> BrokerKind {
        match self {
            BindingType::KubemqToIbmMq | BindingType::KubemqToKubemq => BrokerKind::KubeMq,
            BindingType::IbmMqToKubemq => BrokerKind::IbmMq,
        }
    }

    pub fn target_kind(&self) -> BrokerKind {
        match self {
            BindingType::KubemqToIbmMq => BrokerKind::IbmMq,
            BindingType::IbmMqToKubemq | BindingType::KubemqToKubemq => BrokerKind::KubeMq,
        }
    }
}

impl std::fmt::Display for BindingType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_poll_interval_ms() -> u64 {
    1_000
}

/// Binding entry as written in the config file
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BindingSpec {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type")]
    pub binding_type: BindingType,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default)]
    pub source: Value,
    #[serde(default)]
    pub target: Value,
}

/// Typed adapter settings
#[derive(Debug, Clone, PartialEq)]
pub enum AdapterConfig {
    KubeMq(KubeMqConfig),
    IbmMq(IbmMqConfig),
}

impl AdapterConfig {
    pub fn kind(&self) -> BrokerKind {
        match self {
            AdapterConfig::KubeMq(_) => BrokerKind::KubeMq,
            AdapterConfig::IbmMq(_) => BrokerKind::IbmMq,
        }
    }

    pub fn queue_name(&self) -> &str {
        match self {
            AdapterConfig::KubeMq(c) => &c.queue_name,
            AdapterConfig::IbmMq(c) => &c.queue_name,
        }
    }
}

/// Validated, immutable binding definition
#[derive(Debug, Clone, PartialEq)]
pub struct BindingConfig {
    pub name: String,
    pub binding_type: BindingType,
    pub poll_interval: Duration,
    pub source: AdapterConfig,
    pub target: AdapterConfig,
}

impl BindingConfig {
    pub fn new(
        name: impl Into<String>,
        binding_type: BindingType,
        source: AdapterConfig,
        target: AdapterConfig,
    ) -> Self {
        Self {
            name: name.into(),
            binding_type,
            poll_interval: Duration::from_millis(default_poll_interval_ms()),
            source,
            target,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

const KUBEMQ_REQUIRED: &[&str] = &["address", "queue_name"];
const IBM_MQ_REQUIRED: &[&str] = &["host_name", "queue_manager", "channel_name", "queue_name"];

impl BindingSpec {
    /// Resolve the untyped adapter blocks into a validated [`BindingConfig`]
    pub fn resolve(&self) -> Result<BindingConfig> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(Error::MissingField {
                binding: "<unnamed>".to_string(),
                field: "name".to_string(),
            });
        }
        if self.poll_interval_ms == 0 {
            return Err(Error::invalid(name, "poll_interval_ms must be > 0"));
        }
        let source = adapter_config(name, "source", self.binding_type.source_kind(), &self.source)?;
        let target = adapter_config(name, "target", self.binding_type.target_kind(), &self.target)?;
        Ok(BindingConfig {
            name: name.to_string(),
            binding_type: self.binding_type,
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            source,
            target,
        })
    }
}

fn adapter_config(binding: &str, side: &str, kind: BrokerKind, block: &Value) -> Result<AdapterConfig> {
    let required = match kind {
        BrokerKind::IbmMq => IBM_MQ_REQUIRED,
        _ => KUBEMQ_REQUIRED,
    };
    for field in required {
        let present = match block.get(field) {
            Some(Value::String(s)) => !s.trim().is_empty(),
            Some(Value::Null) | None => false,
            Some(_) => true,
        };
        if !present {
            return Err(Error::MissingField {
                binding: binding.to_string(),
                field: format!("{}.{}", side, field),
            });
        }
    }

    let invalid = |e: String| Error::invalid(binding, format!("{}: {}", side, e));
    let config = match kind {
        BrokerKind::IbmMq => serde_json::from_value::<IbmMqConfig>(block.clone())
            .map(AdapterConfig::IbmMq)
            .map_err(|e| invalid(e.to_string()))?,
        _ => serde_json::from_value::<KubeMqConfig>(block.clone())
            .map(AdapterConfig::KubeMq)
            .map_err(|e| invalid(e.to_string()))?,
    };
    let checked = match &config {
        AdapterConfig::KubeMq(c) => c.validate(),
        AdapterConfig::IbmMq(c) => c.validate(),
    };
    checked.map_err(|e| invalid(e.to_string()))?;
    Ok(config)
}

/// Reject duplicate binding names
pub fn ensure_unique_names<'a>(names: impl IntoIterator<Item = &'a str>) -> Result<()> {
    let mut seen = HashSet::new();
    for name in names {
        if !seen.insert(name) {
            return Err(Error::DuplicateBinding(name.to_string()));
        }
    }
    Ok(())
}

impl BridgeConfig {
    /// Load from `CONFIG_PATH` (default `config.yaml`) plus environment overrides
    pub fn load() -> Result<Self> {
        let path = env::var("CONFIG_PATH").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::from_file(&path)
    }

    /// Load from an explicit file path plus environment overrides
    pub fn from_file(path: &str) -> Result<Self> {
        let config = config::Config::builder()
            .add_source(File::with_name(path))
            .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?;
        Ok(config.try_deserialize()?)
    }

    /// Parse from an in-memory document
    pub fn from_document(document: &str, format: FileFormat) -> Result<Self> {
        let config = config::Config::builder()
            .add_source(File::from_str(document, format))
            .build()?;
        Ok(config.try_deserialize()?)
    }

    /// Validate everything and resolve the binding list
    pub fn binding_configs(&self) -> Result<Vec<BindingConfig>> {
        self.runtime.validate()?;
        if self.server.port == 0 {
            return Err(Error::invalid("server", "port must be > 0"));
        }
        if self.bindings.is_empty() {
            warn!("No bindings configured, the bridge will only serve health and metrics");
        }
        let resolved = self
            .bindings
            .iter()
            .map(BindingSpec::resolve)
            .collect::<Result<Vec<_>>>()?;
        ensure_unique_names(resolved.iter().map(|b| b.name.as_str()))?;
        Ok(resolved)
    }
}
