//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Shared primitives and utilities for the adapter runtime."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Shared primitives for the edge adapter runtime workspace.
//! This crate exposes configuration loading, logging bootstrap and the
//! wall-clock helpers consumed across the workspace.

pub mod config;
pub mod logging;
pub mod time;

pub use config::{
    AdapterConfig, AppConfig, LoggingConfig, MetricsConfig, PollingConfig, RuntimeConfig,
    UserPropertyConfig,
};
pub use logging::{init_tracing, LogFormat};
