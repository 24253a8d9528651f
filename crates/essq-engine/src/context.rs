use crate::backend::BackendRegistry;
use crate::error::Result;
use crate::probe::{CommandProbe, StatusProbe};
use essq_client::hosts::host_from_settings;
use essq_client::{Host, Registry, RetryPolicy};
use essq_core::config::Settings;
use std::sync::Arc;

type HostFactory = Arc<dyn Fn(&Settings, &str) -> essq_client::Result<Box<dyn Host>> + Send + Sync>;

/// Services shared by every job of a process.
pub struct EngineContext {
    pub settings: Settings,
    pub backends: BackendRegistry,
    pub registry: Registry,
    probe: Option<Arc<dyn StatusProbe>>,
    hosts: HostFactory,
}

impl EngineContext {
    pub fn new(settings: Settings, registry: Registry) -> Self {
        let probe = CommandProbe::from_settings(&settings)
            .map(|p| Arc::new(p) as Arc<dyn StatusProbe>);
        Self {
            settings,
            backends: BackendRegistry::with_defaults(),
            registry,
            probe,
            hosts: Arc::new(|settings, name| host_from_settings(settings, name)),
        }
    }

    /// Opens the registry configured in `settings`.
    pub fn from_settings(settings: Settings) -> Result<Self> {
        let registry = Registry::open(&settings.registry_dir()?)?;
        Ok(Self::new(settings, registry))
    }

    pub fn with_backends(mut self, backends: BackendRegistry) -> Self {
        self.backends = backends;
        self
    }

    pub fn with_probe(mut self, probe: Arc<dyn StatusProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn with_host_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn(&Settings, &str) -> essq_client::Result<Box<dyn Host>> + Send + Sync + 'static,
    {
        self.hosts = Arc::new(factory);
        self
    }

    pub fn host(&self, name: &str) -> Result<Box<dyn Host>> {
        Ok((self.hosts)(&self.settings, name)?)
    }

    pub fn probe(&self) -> Option<&dyn StatusProbe> {
        self.probe.as_deref()
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::from(&self.settings.transport)
    }
}
