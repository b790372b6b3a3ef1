use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::ProbeConfig;
use crate::request::ProbePayload;
use crate::types::FragmentStream;
use crate::ProbeError;

pub mod http;
pub mod scripted;

/// Sends a payload to one backend and yields its response fragments.
///
/// Non-streaming payloads yield exactly one `Complete` fragment. Streaming payloads yield one
/// `Delta` per event as it arrives; dropping the stream cancels the request and releases the
/// connection.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn dispatch(&self, payload: &ProbePayload) -> Result<FragmentStream, ProbeError>;

    fn name(&self) -> &str;
}

#[derive(Default, Clone)]
pub struct BackendRegistry {
    backends: BTreeMap<String, Arc<dyn Backend>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// One HTTP backend per configured entry.
    pub fn from_config(config: &ProbeConfig) -> Result<Self, ProbeError> {
        let mut registry = Self::new();
        for backend in config.backends.values() {
            registry.register(Arc::new(http::HttpBackend::from_config(backend.clone())?));
        }
        Ok(registry)
    }

    pub fn register(&mut self, backend: Arc<dyn Backend>) {
        self.backends.insert(backend.name().to_string(), backend);
    }

    pub fn with_backend(mut self, backend: Arc<dyn Backend>) -> Self {
        self.register(backend);
        self
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Backend>, ProbeError> {
        self.backends
            .get(name)
            .cloned()
            .ok_or_else(|| ProbeError::configuration(format!("unknown backend '{name}'")))
    }
}
