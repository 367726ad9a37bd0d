//! ---
//! ems_section: "03-persistence-logging"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Metrics collection and export utilities."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Per-adapter counters.
//!
//! Every counter has a dotted logical name of the form
//! `<prefix>.<adapter_type>.<adapter_id>.<suffix>` (for example
//! `edge.protocol-adapter.simulation.a1.read.publish.success.count`). The
//! Prometheus series behind it is named after `<prefix>.<suffix>` with the
//! adapter type and id attached as constant labels, so dashboards can
//! aggregate across adapters.

use indexmap::IndexMap;
use parking_lot::Mutex;
use prometheus::{IntCounter, Opts};
use tracing::{debug, warn};

use crate::SharedRegistry;

/// Namespace prefix handed to every [`AdapterMetrics`] at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsNamespace {
    prefix: String,
}

impl MetricsNamespace {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Fully qualified dotted name for an adapter counter.
    pub fn counter_name(&self, adapter_type: &str, adapter_id: &str, suffix: &str) -> String {
        format!("{}.{}.{}.{}", self.prefix, adapter_type, adapter_id, suffix)
    }

    fn series_name(&self, suffix: &str) -> String {
        sanitize(&format!("{}.{}", self.prefix, suffix))
    }
}

impl Default for MetricsNamespace {
    fn default() -> Self {
        Self::new("edge.protocol-adapter")
    }
}

/// Operation families tracked for every adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricCategory {
    ReadPublish,
    WritePublish,
    Connection,
}

impl MetricCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricCategory::ReadPublish => "read.publish",
            MetricCategory::WritePublish => "write.publish",
            MetricCategory::Connection => "connection",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricOutcome {
    Success,
    Failed,
}

impl MetricOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricOutcome::Success => "success",
            MetricOutcome::Failed => "failed",
        }
    }
}

/// Suffix for a category/outcome pair, e.g. `read.publish.failed.count`.
pub fn counter_suffix(category: MetricCategory, outcome: MetricOutcome) -> String {
    format!("{}.{}.count", category.as_str(), outcome.as_str())
}

/// Counters created on behalf of one adapter instance.
///
/// Counters are registered lazily on first increment and tracked by name so
/// [`AdapterMetrics::clear_all`] can unregister exactly the series this helper
/// created.
pub struct AdapterMetrics {
    registry: SharedRegistry,
    namespace: MetricsNamespace,
    adapter_type: String,
    adapter_id: String,
    counters: Mutex<IndexMap<String, IntCounter>>,
}

impl AdapterMetrics {
    pub fn new(
        registry: SharedRegistry,
        namespace: MetricsNamespace,
        adapter_type: impl Into<String>,
        adapter_id: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            namespace,
            adapter_type: adapter_type.into(),
            adapter_id: adapter_id.into(),
            counters: Mutex::new(IndexMap::new()),
        }
    }

    pub fn adapter_id(&self) -> &str {
        &self.adapter_id
    }

    pub fn adapter_type(&self) -> &str {
        &self.adapter_type
    }

    pub fn increment(&self, category: MetricCategory, outcome: MetricOutcome) {
        self.increment_named(&counter_suffix(category, outcome));
    }

    pub fn read_success(&self) {
        self.increment(MetricCategory::ReadPublish, MetricOutcome::Success);
    }

    pub fn read_failed(&self) {
        self.increment(MetricCategory::ReadPublish, MetricOutcome::Failed);
    }

    pub fn write_success(&self) {
        self.increment(MetricCategory::WritePublish, MetricOutcome::Success);
    }

    pub fn write_failed(&self) {
        self.increment(MetricCategory::WritePublish, MetricOutcome::Failed);
    }

    pub fn connection_success(&self) {
        self.increment(MetricCategory::Connection, MetricOutcome::Success);
    }

    pub fn connection_failed(&self) {
        self.increment(MetricCategory::Connection, MetricOutcome::Failed);
    }

    /// Increment an arbitrary counter under this adapter's namespace.
    pub fn increment_named(&self, suffix: &str) {
        let name = self
            .namespace
            .counter_name(&self.adapter_type, &self.adapter_id, suffix);
        let mut counters = self.counters.lock();
        if let Some(counter) = counters.get(&name) {
            counter.inc();
            return;
        }
        if let Some(counter) = self.create_counter(suffix) {
            counter.inc();
            counters.insert(name, counter);
        }
    }

    /// Current value of a counter, zero when it was never incremented.
    pub fn value(&self, suffix: &str) -> u64 {
        let name = self
            .namespace
            .counter_name(&self.adapter_type, &self.adapter_id, suffix);
        self.counters
            .lock()
            .get(&name)
            .map(IntCounter::get)
            .unwrap_or(0)
    }

    /// Dotted names of every counter created so far, in creation order.
    pub fn metric_names(&self) -> Vec<String> {
        self.counters.lock().keys().cloned().collect()
    }

    /// Unregister every counter this helper created.
    pub fn clear_all(&self) {
        let drained: Vec<(String, IntCounter)> = self.counters.lock().drain(..).collect();
        for (name, counter) in drained {
            if let Err(err) = self.registry.unregister(Box::new(counter)) {
                debug!(metric = %name, error = %err, "counter was not registered");
            }
        }
    }

    fn create_counter(&self, suffix: &str) -> Option<IntCounter> {
        let opts = Opts::new(
            self.namespace.series_name(suffix),
            format!("Protocol adapter counter {}", suffix),
        )
        .const_label("adapter_type", self.adapter_type.clone())
        .const_label("adapter_id", self.adapter_id.clone());
        let counter = match IntCounter::with_opts(opts) {
            Ok(counter) => counter,
            Err(err) => {
                warn!(adapter_id = %self.adapter_id, suffix, error = %err, "invalid counter options; dropping increment");
                return None;
            }
        };
        if let Err(err) = self.registry.register(Box::new(counter.clone())) {
            warn!(adapter_id = %self.adapter_id, suffix, error = %err, "counter registration failed; counting locally");
        }
        Some(counter)
    }
}

impl std::fmt::Debug for AdapterMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterMetrics")
            .field("adapter_type", &self.adapter_type)
            .field("adapter_id", &self.adapter_id)
            .finish_non_exhaustive()
    }
}

fn sanitize(raw: &str) -> String {
    let mut out: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == ':' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if out.chars().next().map_or(true, |c| c.is_ascii_digit()) {
        out.insert(0, '_');
    }
    out
}
