//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Supervision of a single protocol adapter instance."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use edge_adapter::{
    ConnectionState, ConnectionStatus, LifecycleState, PollingContext, ProtocolAdapter,
    RuntimeEvent, TransitionResponse,
};
use edge_metrics::AdapterMetrics;
use futures::future::join_all;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::error::{Result, RuntimeError};
use crate::scheduler::{PollingJob, PollingScheduler};
use crate::services::RuntimeServices;

/// State shared between a wrapper and its polling jobs.
pub(crate) struct AdapterCore {
    pub(crate) adapter_id: String,
    pub(crate) driver: Arc<dyn ProtocolAdapter>,
    pub(crate) connection: Arc<ConnectionStatus>,
    pub(crate) metrics: Arc<AdapterMetrics>,
    pub(crate) consecutive_errors: AtomicU32,
    lifecycle: Mutex<LifecycleState>,
    events: broadcast::Sender<RuntimeEvent>,
}

impl AdapterCore {
    pub(crate) fn lifecycle(&self) -> LifecycleState {
        *self.lifecycle.lock()
    }

    fn transition(&self, target: LifecycleState) -> TransitionResponse {
        let (from, response) = {
            let mut state = self.lifecycle.lock();
            let from = *state;
            let response = from.transition(target);
            if response.is_success() {
                *state = target;
            }
            (from, response)
        };
        if response.is_success() {
            info!(adapter_id = %self.adapter_id, from = %from, to = %target, "{}", response.message);
            self.emit(RuntimeEvent::Lifecycle {
                adapter_id: self.adapter_id.clone(),
                from,
                to: target,
            });
        } else if response.is_failure() {
            warn!(adapter_id = %self.adapter_id, from = %from, to = %target, "{}", response.message);
        }
        response
    }

    pub(crate) fn emit(&self, event: RuntimeEvent) {
        let _ = self.events.send(event);
    }
}

/// Point-in-time view of an adapter for listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdapterSummary {
    pub adapter_id: String,
    pub adapter_type: String,
    pub state: LifecycleState,
    pub connection: ConnectionState,
    pub autostart: bool,
    pub polling_contexts: usize,
    pub active_jobs: usize,
    pub consecutive_errors: u32,
}

/// Supervisor for one protocol adapter.
///
/// `start` and `stop` are serialized by an async operation lock; concurrent
/// callers queue behind it. State reads never wait on the lock.
pub struct AdapterWrapper {
    core: Arc<AdapterCore>,
    adapter_type: String,
    contexts: Vec<Arc<PollingContext>>,
    autostart: bool,
    scheduler: Arc<PollingScheduler>,
    op_lock: tokio::sync::Mutex<()>,
    jobs: Mutex<Vec<Arc<PollingJob>>>,
}

impl AdapterWrapper {
    pub fn new(
        adapter_id: impl Into<String>,
        driver: Arc<dyn ProtocolAdapter>,
        contexts: Vec<PollingContext>,
        services: &RuntimeServices,
    ) -> Self {
        let adapter_id = adapter_id.into();
        let adapter_type = driver.adapter_type().to_owned();
        let metrics = services.adapter_metrics(&adapter_type, &adapter_id);
        let connection = ConnectionStatus::new(adapter_id.clone())
            .with_metrics(metrics.clone())
            .with_events(services.events().clone());
        let core = AdapterCore {
            adapter_id,
            driver,
            connection: Arc::new(connection),
            metrics,
            consecutive_errors: AtomicU32::new(0),
            lifecycle: Mutex::new(LifecycleState::Stopped),
            events: services.events().clone(),
        };
        Self {
            core: Arc::new(core),
            adapter_type,
            contexts: contexts.into_iter().map(Arc::new).collect(),
            autostart: true,
            scheduler: services.scheduler().clone(),
            op_lock: tokio::sync::Mutex::new(()),
            jobs: Mutex::new(Vec::new()),
        }
    }

    pub fn with_autostart(mut self, autostart: bool) -> Self {
        self.autostart = autostart;
        self
    }

    pub fn adapter_id(&self) -> &str {
        &self.core.adapter_id
    }

    pub fn adapter_type(&self) -> &str {
        &self.adapter_type
    }

    pub fn autostart(&self) -> bool {
        self.autostart
    }

    pub fn state(&self) -> LifecycleState {
        self.core.lifecycle()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.core.connection.get()
    }

    pub fn connection(&self) -> &Arc<ConnectionStatus> {
        &self.core.connection
    }

    pub fn metrics(&self) -> &Arc<AdapterMetrics> {
        &self.core.metrics
    }

    /// Consecutive sampling failures across all of this adapter's jobs,
    /// reset by any successful sample.
    pub fn consecutive_errors(&self) -> u32 {
        self.core.consecutive_errors.load(Ordering::SeqCst)
    }

    pub fn polling_contexts(&self) -> impl Iterator<Item = &PollingContext> {
        self.contexts.iter().map(Arc::as_ref)
    }

    /// Jobs scheduled by the most recent start, including ones the circuit
    /// breaker has since removed.
    pub fn jobs(&self) -> Vec<Arc<PollingJob>> {
        self.jobs.lock().clone()
    }

    pub fn active_jobs(&self) -> usize {
        self.jobs
            .lock()
            .iter()
            .filter(|job| !job.is_cancelled())
            .count()
    }

    pub fn summary(&self) -> AdapterSummary {
        AdapterSummary {
            adapter_id: self.adapter_id().to_owned(),
            adapter_type: self.adapter_type.clone(),
            state: self.state(),
            connection: self.connection_state(),
            autostart: self.autostart,
            polling_contexts: self.contexts.len(),
            active_jobs: self.active_jobs(),
            consecutive_errors: self.consecutive_errors(),
        }
    }

    /// Start the driver and schedule every polling context.
    ///
    /// Returns `true` when the adapter ends up `Started`. A caller that
    /// queued behind a successful start returns `true` without touching the
    /// driver again.
    pub async fn start(&self) -> bool {
        let _guard = self.op_lock.lock().await;
        let core = &self.core;
        if core.lifecycle() == LifecycleState::Started {
            debug!(adapter_id = %core.adapter_id, "adapter already started");
            return true;
        }
        if !core.transition(LifecycleState::Starting).is_success() {
            return false;
        }

        core.connection.disconnect();
        core.connection.transition(ConnectionState::Connecting);
        match core.driver.start(&core.connection).await {
            Ok(()) => {
                if core.connection.get() == ConnectionState::Connecting {
                    core.connection.transition(ConnectionState::Connected);
                }
                core.consecutive_errors.store(0, Ordering::SeqCst);
                core.transition(LifecycleState::Started);
                self.schedule_polling();
                true
            }
            Err(err) => {
                error!(adapter_id = %core.adapter_id, error = %err, "adapter failed to start");
                core.connection.fail();
                core.transition(LifecycleState::Error);
                false
            }
        }
    }

    /// Cancel polling and wait for the jobs to end, then stop the driver and
    /// disconnect.
    ///
    /// With `force` a failing driver stop is logged and the adapter still
    /// reaches `Stopped`; without it the adapter moves to `Error`. Stopping an
    /// adapter in `Error` cancels its jobs and disconnects but reports
    /// `false`, as `Error` only leads back to `Starting`.
    pub async fn stop(&self, force: bool) -> bool {
        let _guard = self.op_lock.lock().await;
        let core = &self.core;
        if core.lifecycle() == LifecycleState::Stopped {
            debug!(adapter_id = %core.adapter_id, "adapter already stopped");
            return true;
        }
        let stopping = core.transition(LifecycleState::Stopping);
        self.cancel_jobs().await;
        if !stopping.is_success() {
            core.connection.disconnect();
            return false;
        }

        let result = core.driver.stop(&core.connection).await;
        core.connection.disconnect();
        match result {
            Ok(()) => core.transition(LifecycleState::Stopped).is_success(),
            Err(err) if force => {
                warn!(adapter_id = %core.adapter_id, error = %err, "driver stop failed; forcing stop");
                core.transition(LifecycleState::Stopped).is_success()
            }
            Err(err) => {
                error!(adapter_id = %core.adapter_id, error = %err, "driver stop failed");
                core.transition(LifecycleState::Error);
                false
            }
        }
    }

    /// Write a value through the driver. Only allowed while `Started`.
    pub async fn write(&self, tag: &str, value: Value) -> Result<()> {
        let state = self.state();
        if state != LifecycleState::Started {
            return Err(RuntimeError::NotStarted {
                adapter_id: self.adapter_id().to_owned(),
                state,
            });
        }
        match self.core.driver.write(tag, value).await {
            Ok(()) => {
                self.core.metrics.write_success();
                debug!(adapter_id = %self.adapter_id(), tag, "write published");
                Ok(())
            }
            Err(err) => {
                self.core.metrics.write_failed();
                warn!(adapter_id = %self.adapter_id(), tag, error = %err, "write failed");
                Err(RuntimeError::adapter(self.adapter_id(), err))
            }
        }
    }

    fn schedule_polling(&self) {
        let mut jobs = self.jobs.lock();
        jobs.clear();
        for context in &self.contexts {
            jobs.push(self.scheduler.schedule(self.core.clone(), context.clone()));
        }
        info!(adapter_id = %self.core.adapter_id, jobs = jobs.len(), "polling scheduled");
    }

    /// Cancel every job and wait for its task to end. A sample already in
    /// flight runs to completion before this returns.
    async fn cancel_jobs(&self) {
        let jobs: Vec<Arc<PollingJob>> = self.jobs.lock().drain(..).collect();
        let cancelled = jobs.iter().filter(|job| job.cancel()).count();
        let exits = join_all(jobs.iter().map(|job| job.join())).await;
        debug!(adapter_id = %self.core.adapter_id, cancelled, exits = ?exits, "polling jobs stopped");
    }
}

impl std::fmt::Debug for AdapterWrapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterWrapper")
            .field("adapter_id", &self.core.adapter_id)
            .field("adapter_type", &self.adapter_type)
            .field("state", &self.state())
            .field("connection", &self.connection_state())
            .finish_non_exhaustive()
    }
}
