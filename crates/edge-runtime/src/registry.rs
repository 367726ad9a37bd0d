//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Runtime registry and control surface for adapters."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::sync::Arc;

use edge_adapter::{
    drivers, AdapterError, ConnectionState, LifecycleState, PollingContext, RuntimeEvent,
};
use edge_common::config::AdapterConfig;
use futures::future::join_all;
use indexmap::IndexMap;
use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::error::{Result, RuntimeError};
use crate::services::RuntimeServices;
use crate::tags::TagRegistry;
use crate::wrapper::{AdapterSummary, AdapterWrapper};

/// Every adapter hosted by the process, keyed by adapter id.
///
/// The map lock is only held to look wrappers up; lifecycle operations run on
/// a cloned handle so a slow driver never blocks the registry.
#[derive(Debug)]
pub struct AdapterRuntimeRegistry {
    services: RuntimeServices,
    adapters: RwLock<IndexMap<String, Arc<AdapterWrapper>>>,
}

impl AdapterRuntimeRegistry {
    pub fn new(services: RuntimeServices) -> Self {
        Self {
            services,
            adapters: RwLock::new(IndexMap::new()),
        }
    }

    pub fn services(&self) -> &RuntimeServices {
        &self.services
    }

    pub fn tags(&self) -> &Arc<TagRegistry> {
        self.services.tags()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RuntimeEvent> {
        self.services.subscribe()
    }

    pub fn len(&self) -> usize {
        self.adapters.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.read().is_empty()
    }

    /// Register a wrapper built against this registry's services.
    pub fn add(&self, wrapper: AdapterWrapper) -> Result<Arc<AdapterWrapper>> {
        let wrapper = Arc::new(wrapper);
        {
            let mut adapters = self.adapters.write();
            let adapter_id = wrapper.adapter_id().to_owned();
            if adapters.contains_key(&adapter_id) {
                return Err(RuntimeError::DuplicateAdapter(adapter_id));
            }
            adapters.insert(adapter_id, wrapper.clone());
        }
        info!(adapter_id = %wrapper.adapter_id(), adapter_type = %wrapper.adapter_type(), "adapter registered");
        self.refresh_gauges();
        Ok(wrapper)
    }

    /// Build the driver and polling contexts for a configured adapter and
    /// register it.
    pub fn add_configured(&self, adapter_id: &str, config: &AdapterConfig) -> Result<Arc<AdapterWrapper>> {
        if self.adapters.read().contains_key(adapter_id) {
            return Err(RuntimeError::DuplicateAdapter(adapter_id.to_owned()));
        }
        let driver = drivers::build(&config.adapter_type, adapter_id, &config.settings)
            .map_err(|err| RuntimeError::adapter(adapter_id, err))?;
        let contexts = config
            .polling
            .iter()
            .map(PollingContext::from_config)
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|err| RuntimeError::adapter(adapter_id, AdapterError::from(err)))?;
        let wrapper = AdapterWrapper::new(adapter_id, driver, contexts, &self.services)
            .with_autostart(config.autostart);
        self.add(wrapper)
    }

    pub fn get(&self, adapter_id: &str) -> Result<Arc<AdapterWrapper>> {
        self.adapters
            .read()
            .get(adapter_id)
            .cloned()
            .ok_or_else(|| RuntimeError::UnknownAdapter(adapter_id.to_owned()))
    }

    /// Force-stop an adapter, drop it from the registry and unregister its
    /// metrics.
    pub async fn remove(&self, adapter_id: &str) -> Result<()> {
        let wrapper = self
            .adapters
            .write()
            .shift_remove(adapter_id)
            .ok_or_else(|| RuntimeError::UnknownAdapter(adapter_id.to_owned()))?;
        if !wrapper.stop(true).await {
            warn!(adapter_id, state = %wrapper.state(), "adapter did not stop cleanly during removal");
        }
        wrapper.metrics().clear_all();
        info!(adapter_id, "adapter removed");
        self.refresh_gauges();
        Ok(())
    }

    pub async fn start(&self, adapter_id: &str) -> Result<bool> {
        let wrapper = self.get(adapter_id)?;
        let started = wrapper.start().await;
        self.refresh_gauges();
        Ok(started)
    }

    pub async fn stop(&self, adapter_id: &str, force: bool) -> Result<bool> {
        let wrapper = self.get(adapter_id)?;
        let stopped = wrapper.stop(force).await;
        self.refresh_gauges();
        Ok(stopped)
    }

    pub fn state(&self, adapter_id: &str) -> Result<LifecycleState> {
        Ok(self.get(adapter_id)?.state())
    }

    pub fn connection_state(&self, adapter_id: &str) -> Result<ConnectionState> {
        Ok(self.get(adapter_id)?.connection_state())
    }

    pub fn list_adapters(&self) -> Vec<AdapterSummary> {
        self.snapshot().iter().map(|wrapper| wrapper.summary()).collect()
    }

    pub async fn write(&self, adapter_id: &str, tag: &str, value: Value) -> Result<()> {
        self.get(adapter_id)?.write(tag, value).await
    }

    /// Start every adapter flagged for autostart, concurrently.
    pub async fn start_all(&self) -> Vec<(String, bool)> {
        let wrappers: Vec<Arc<AdapterWrapper>> = self
            .snapshot()
            .into_iter()
            .filter(|wrapper| wrapper.autostart())
            .collect();
        let results = join_all(wrappers.iter().map(|wrapper| wrapper.start())).await;
        self.refresh_gauges();
        wrappers
            .iter()
            .zip(results)
            .map(|(wrapper, started)| (wrapper.adapter_id().to_owned(), started))
            .collect()
    }

    /// Stop every registered adapter, concurrently.
    pub async fn stop_all(&self, force: bool) -> Vec<(String, bool)> {
        let wrappers = self.snapshot();
        let results = join_all(wrappers.iter().map(|wrapper| wrapper.stop(force))).await;
        self.refresh_gauges();
        wrappers
            .iter()
            .zip(results)
            .map(|(wrapper, stopped)| (wrapper.adapter_id().to_owned(), stopped))
            .collect()
    }

    fn snapshot(&self) -> Vec<Arc<AdapterWrapper>> {
        self.adapters.read().values().cloned().collect()
    }

    fn refresh_gauges(&self) {
        let Some(metrics) = self.services.runtime_metrics() else {
            return;
        };
        let adapters = self.snapshot();
        metrics.set_adapter_count(adapters.len());
        metrics.set_started_count(
            adapters
                .iter()
                .filter(|wrapper| wrapper.state() == LifecycleState::Started)
                .count(),
        );
    }
}
