//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Runtime notifications broadcast to observers."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use serde::Serialize;

use crate::state::{ConnectionState, LifecycleState};

/// Notification published whenever an adapter changes state or loses a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuntimeEvent {
    Lifecycle {
        adapter_id: String,
        from: LifecycleState,
        to: LifecycleState,
    },
    Connection {
        adapter_id: String,
        from: ConnectionState,
        to: ConnectionState,
    },
    PollingRemoved {
        adapter_id: String,
        tag: String,
        consecutive_errors: u32,
    },
}

impl RuntimeEvent {
    pub fn adapter_id(&self) -> &str {
        match self {
            RuntimeEvent::Lifecycle { adapter_id, .. }
            | RuntimeEvent::Connection { adapter_id, .. }
            | RuntimeEvent::PollingRemoved { adapter_id, .. } => adapter_id,
        }
    }
}
