//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Process-wide services shared by every adapter wrapper."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::sync::Arc;

use edge_adapter::RuntimeEvent;
use edge_common::config::RuntimeConfig;
use edge_metrics::{new_registry, AdapterMetrics, MetricsNamespace, RuntimeMetrics, SharedRegistry};
use tokio::sync::broadcast;

use crate::scheduler::PollingScheduler;
use crate::tags::TagRegistry;

/// Scheduler, tag registry, event channel and metrics shared by the
/// wrappers of one runtime.
#[derive(Clone)]
pub struct RuntimeServices {
    scheduler: Arc<PollingScheduler>,
    events: broadcast::Sender<RuntimeEvent>,
    metrics_registry: SharedRegistry,
    namespace: MetricsNamespace,
    runtime_metrics: Option<RuntimeMetrics>,
}

impl RuntimeServices {
    pub fn new(
        config: &RuntimeConfig,
        metrics_registry: SharedRegistry,
        namespace: MetricsNamespace,
        runtime_metrics: Option<RuntimeMetrics>,
    ) -> Self {
        let tags = Arc::new(TagRegistry::new());
        let mut scheduler = PollingScheduler::from_config(tags, config);
        if let Some(metrics) = &runtime_metrics {
            scheduler = scheduler.with_metrics(metrics.clone());
        }
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            scheduler: Arc::new(scheduler),
            events,
            metrics_registry,
            namespace,
            runtime_metrics,
        }
    }

    pub fn scheduler(&self) -> &Arc<PollingScheduler> {
        &self.scheduler
    }

    pub fn tags(&self) -> &Arc<TagRegistry> {
        self.scheduler.tags()
    }

    pub fn events(&self) -> &broadcast::Sender<RuntimeEvent> {
        &self.events
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RuntimeEvent> {
        self.events.subscribe()
    }

    pub fn metrics_registry(&self) -> SharedRegistry {
        self.metrics_registry.clone()
    }

    pub fn namespace(&self) -> &MetricsNamespace {
        &self.namespace
    }

    pub fn runtime_metrics(&self) -> Option<&RuntimeMetrics> {
        self.runtime_metrics.as_ref()
    }

    pub fn adapter_metrics(&self, adapter_type: &str, adapter_id: &str) -> Arc<AdapterMetrics> {
        Arc::new(AdapterMetrics::new(
            self.metrics_registry.clone(),
            self.namespace.clone(),
            adapter_type,
            adapter_id,
        ))
    }
}

impl Default for RuntimeServices {
    /// Default runtime settings with a private metrics registry.
    fn default() -> Self {
        Self::new(
            &RuntimeConfig::default(),
            new_registry(),
            MetricsNamespace::default(),
            None,
        )
    }
}

impl std::fmt::Debug for RuntimeServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeServices")
            .field("scheduler", &self.scheduler)
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}
