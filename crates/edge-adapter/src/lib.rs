//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Protocol adapter contracts and reference drivers."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Building blocks shared by the adapter runtime and protocol drivers: the
//! lifecycle and connection state machines, data samples, polling contexts
//! and the [`ProtocolAdapter`] contract.

pub mod connection;
pub mod data;
pub mod driver;
pub mod drivers;
pub mod error;
pub mod event;
pub mod polling;
pub mod state;

pub use connection::ConnectionStatus;
pub use data::{northbound_payload, DataPoint, DataSample};
pub use driver::ProtocolAdapter;
pub use error::{AdapterError, PollingConfigError};
pub use event::RuntimeEvent;
pub use polling::{DelayWindow, PollingContext, UserProperty};
pub use state::{ConnectionState, LifecycleState, TransitionResponse, TransitionStatus};
