//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Adapter supervision runtime."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Supervision runtime for protocol adapters: per-adapter wrappers, the
//! polling scheduler with its circuit breaker, tag fan-out and the registry
//! that exposes the control surface.

pub mod error;
pub mod registry;
pub mod scheduler;
pub mod services;
pub mod tags;
pub mod wrapper;

pub use error::RuntimeError;
pub use registry::AdapterRuntimeRegistry;
pub use scheduler::{JobExit, PollingJob, PollingScheduler};
pub use services::RuntimeServices;
pub use tags::{ChannelConsumer, FnConsumer, TagConsumer, TagDelivery, TagRegistry};
pub use wrapper::{AdapterSummary, AdapterWrapper};
