//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Errors returned at the runtime registry boundary."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use edge_adapter::{AdapterError, LifecycleState};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, RuntimeError>;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("unknown adapter '{0}'")]
    UnknownAdapter(String),
    #[error("adapter '{0}' is already registered")]
    DuplicateAdapter(String),
    #[error("adapter '{adapter_id}' is not started (currently {state})")]
    NotStarted {
        adapter_id: String,
        state: LifecycleState,
    },
    #[error("adapter '{adapter_id}': {source}")]
    Adapter {
        adapter_id: String,
        #[source]
        source: AdapterError,
    },
}

impl RuntimeError {
    pub fn adapter(adapter_id: impl Into<String>, source: AdapterError) -> Self {
        RuntimeError::Adapter {
            adapter_id: adapter_id.into(),
            source,
        }
    }
}
