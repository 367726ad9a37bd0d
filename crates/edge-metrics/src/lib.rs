//! ---
//! ems_section: "03-persistence-logging"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Metrics collection and export utilities."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::http::{header, HeaderValue, StatusCode};
use axum::routing::get;
use axum::{response::IntoResponse, Router};
use prometheus::{IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info};

pub mod adapter;

pub use adapter::{AdapterMetrics, MetricCategory, MetricOutcome, MetricsNamespace};

/// Shared registry type used across the runtime.
pub type SharedRegistry = Arc<Registry>;

/// Produce a new shared registry.
pub fn new_registry() -> SharedRegistry {
    Arc::new(Registry::new())
}

/// Encode every family gathered from the registry in the text exposition format.
pub fn render_text(registry: &Registry) -> Result<String> {
    let families = registry.gather();
    TextEncoder::new()
        .encode_to_string(&families)
        .context("failed to encode metrics")
}

/// Spawn an HTTP server that exposes the registry at `/metrics`.
pub fn spawn_http_server(registry: SharedRegistry, addr: SocketAddr) -> Result<MetricsServer> {
    let app = Router::new().route(
        "/metrics",
        get({
            let registry = registry.clone();
            move || metrics_handler(registry.clone())
        }),
    );

    let std_listener = StdTcpListener::bind(addr)
        .with_context(|| format!("failed to bind metrics listener {}", addr))?;
    let bound = std_listener
        .local_addr()
        .with_context(|| "failed to read metrics listener address")?;
    std_listener
        .set_nonblocking(true)
        .with_context(|| "failed to configure metrics listener as non-blocking")?;
    let listener = TcpListener::from_std(std_listener)
        .with_context(|| "failed to convert std listener into tokio listener")?;

    info!(address = %bound, "metrics server starting");

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let service = app.into_make_service();
    let handle: JoinHandle<Result<()>> = tokio::spawn(async move {
        axum::serve(listener, service)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await
            .context("metrics server encountered an error")?;
        Ok(())
    });

    Ok(MetricsServer {
        addr: bound,
        shutdown: Some(shutdown_tx),
        task: handle,
    })
}

async fn metrics_handler(registry: SharedRegistry) -> impl IntoResponse {
    match render_text(&registry) {
        Ok(body) => (
            StatusCode::OK,
            [(
                header::CONTENT_TYPE,
                HeaderValue::from_static(prometheus::TEXT_FORMAT),
            )],
            body,
        ),
        Err(err) => {
            error!(error = %err, "failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"))],
                String::from("metrics encoding error"),
            )
        }
    }
}

/// Handle to the running HTTP exporter.
#[derive(Debug)]
pub struct MetricsServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<()>>,
}

impl MetricsServer {
    /// Return the bound address for convenience.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Signal shutdown and await task completion.
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        match self.task.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(err),
            Err(join_err) => Err(anyhow::Error::new(join_err)),
        }
    }
}

/// Process-wide gauges describing the adapter runtime as a whole.
#[derive(Clone)]
pub struct RuntimeMetrics {
    registry: SharedRegistry,
    adapters_total: IntGauge,
    adapters_started: IntGauge,
    polling_jobs_active: IntGauge,
    polling_jobs_removed: IntCounterVec,
}

impl RuntimeMetrics {
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let adapters_total = IntGauge::with_opts(Opts::new(
            "edge_adapters_total",
            "Number of protocol adapters registered with the runtime",
        ))?;
        registry.register(Box::new(adapters_total.clone()))?;

        let adapters_started = IntGauge::with_opts(Opts::new(
            "edge_adapters_started",
            "Number of protocol adapters currently in the Started lifecycle state",
        ))?;
        registry.register(Box::new(adapters_started.clone()))?;

        let polling_jobs_active = IntGauge::with_opts(Opts::new(
            "edge_polling_jobs_active",
            "Polling jobs currently scheduled across all adapters",
        ))?;
        registry.register(Box::new(polling_jobs_active.clone()))?;

        let polling_jobs_removed = IntCounterVec::new(
            Opts::new(
                "edge_polling_jobs_removed_total",
                "Polling jobs removed after exhausting their consecutive error budget",
            ),
            &["adapter_id"],
        )?;
        registry.register(Box::new(polling_jobs_removed.clone()))?;

        Ok(Self {
            registry,
            adapters_total,
            adapters_started,
            polling_jobs_active,
            polling_jobs_removed,
        })
    }

    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    pub fn set_adapter_count(&self, count: usize) {
        self.adapters_total.set(count as i64);
    }

    pub fn set_started_count(&self, count: usize) {
        self.adapters_started.set(count as i64);
    }

    pub fn job_scheduled(&self) {
        self.polling_jobs_active.inc();
    }

    pub fn job_finished(&self) {
        self.polling_jobs_active.dec();
    }

    pub fn record_job_removed(&self, adapter_id: &str) {
        self.polling_jobs_removed
            .with_label_values(&[adapter_id])
            .inc();
    }

    pub fn active_jobs(&self) -> i64 {
        self.polling_jobs_active.get()
    }
}

impl std::fmt::Debug for RuntimeMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeMetrics").finish_non_exhaustive()
    }
}

pub use prometheus;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runtime_metrics_render_as_text() {
        let registry = new_registry();
        let metrics = RuntimeMetrics::new(registry.clone()).unwrap();
        metrics.set_adapter_count(3);
        metrics.job_scheduled();
        metrics.job_scheduled();
        metrics.job_finished();
        metrics.record_job_removed("a1");

        assert_eq!(metrics.active_jobs(), 1);
        let body = render_text(&registry).unwrap();
        assert!(body.contains("edge_adapters_total 3"));
        assert!(body.contains("edge_polling_jobs_active 1"));
        assert!(body.contains("edge_polling_jobs_removed_total{adapter_id=\"a1\"} 1"));
    }

    #[test]
    fn runtime_metrics_refuse_double_registration() {
        let registry = new_registry();
        let _first = RuntimeMetrics::new(registry.clone()).unwrap();
        assert!(RuntimeMetrics::new(registry).is_err());
    }

    #[tokio::test]
    async fn exporter_binds_and_shuts_down() {
        let registry = new_registry();
        let server = spawn_http_server(registry, "127.0.0.1:0".parse().unwrap()).unwrap();
        assert_ne!(server.addr().port(), 0);
        server.shutdown().await.unwrap();
    }
}
