//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Shared connection state handle passed to drivers."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::sync::Arc;

use edge_metrics::AdapterMetrics;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::event::RuntimeEvent;
use crate::state::{ConnectionState, TransitionResponse};

/// Connection state of one adapter, shared between its supervisor and driver.
///
/// Every change goes through the connection state machine under a single
/// lock, so concurrent reports from the driver and the scheduler are applied
/// one at a time. Entering `Connected` or `Error` bumps the adapter's
/// connection counters.
pub struct ConnectionStatus {
    adapter_id: String,
    state: Mutex<ConnectionState>,
    metrics: Option<Arc<AdapterMetrics>>,
    events: Option<broadcast::Sender<RuntimeEvent>>,
}

impl ConnectionStatus {
    pub fn new(adapter_id: impl Into<String>) -> Self {
        Self {
            adapter_id: adapter_id.into(),
            state: Mutex::new(ConnectionState::Disconnected),
            metrics: None,
            events: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<AdapterMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_events(mut self, events: broadcast::Sender<RuntimeEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn adapter_id(&self) -> &str {
        &self.adapter_id
    }

    pub fn get(&self) -> ConnectionState {
        *self.state.lock()
    }

    /// Request a move to `target`; the state only changes on success.
    pub fn transition(&self, target: ConnectionState) -> TransitionResponse {
        let (from, response) = {
            let mut state = self.state.lock();
            let from = *state;
            let response = from.transition(target);
            if response.is_success() {
                *state = target;
            }
            (from, response)
        };
        if response.is_success() {
            self.committed(from, target);
        } else if response.is_failure() {
            warn!(adapter_id = %self.adapter_id, message = %response.message, "connection transition rejected");
        }
        response
    }

    /// Walk the legal path back to `Disconnected` from wherever the
    /// connection currently is. Returns whether anything changed.
    pub fn disconnect(&self) -> bool {
        let steps = {
            let mut state = self.state.lock();
            let mut steps = Vec::new();
            let mut current = *state;
            for next in current.path_to_disconnected() {
                steps.push((current, *next));
                current = *next;
            }
            *state = current;
            steps
        };
        let changed = !steps.is_empty();
        for (from, to) in steps {
            self.committed(from, to);
        }
        changed
    }

    /// Report a failed connection. Rejected when there is nothing to fail.
    pub fn fail(&self) -> TransitionResponse {
        self.transition(ConnectionState::Error)
    }

    fn committed(&self, from: ConnectionState, to: ConnectionState) {
        debug!(
            adapter_id = %self.adapter_id,
            message = %from.transition(to).message,
            "connection state changed"
        );
        if let Some(metrics) = &self.metrics {
            match to {
                ConnectionState::Connected => metrics.connection_success(),
                ConnectionState::Error => metrics.connection_failed(),
                _ => {}
            }
        }
        if let Some(events) = &self.events {
            let _ = events.send(RuntimeEvent::Connection {
                adapter_id: self.adapter_id.clone(),
                from,
                to,
            });
        }
    }
}

impl std::fmt::Debug for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionStatus")
            .field("adapter_id", &self.adapter_id)
            .field("state", &self.get())
            .finish_non_exhaustive()
    }
}
