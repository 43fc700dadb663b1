//! Adapter construction

use crate::config::{AdapterConfig, BindingConfig};
use adapters::{BrokerAdapter, IbmMqAdapter, KubeMqAdapter, Role};

/// Builds adapters for a binding. Called once at startup and again every
/// time a worker is restarted, so each worker gets fresh adapters.
pub trait AdapterFactory: Send + Sync {
    fn create(&self, binding: &BindingConfig, role: Role) -> adapters::Result<Box<dyn BrokerAdapter>>;
}

/// Builds REST adapters from the binding configuration
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultAdapterFactory;

impl AdapterFactory for DefaultAdapterFactory {
    fn create(&self, binding: &BindingConfig, role: Role) -> adapters::Result<Box<dyn BrokerAdapter>> {
        let config = match role {
            Role::Source => &binding.source,
            Role::Target => &binding.target,
        };
        let adapter: Box<dyn BrokerAdapter> = match config {
            AdapterConfig::KubeMq(c) => Box::new(KubeMqAdapter::new(c.clone(), role)?),
            AdapterConfig::IbmMq(c) => Box::new(IbmMqAdapter::new(c.clone(), role)?),
        };
        Ok(adapter)
    }
}
