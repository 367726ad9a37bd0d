//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Contract implemented by protocol specific drivers."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use async_trait::async_trait;
use serde_json::Value;

use crate::connection::ConnectionStatus;
use crate::data::DataSample;
use crate::error::{AdapterError, Result};
use crate::polling::PollingContext;

/// Unified interface implemented by protocol specific drivers.
///
/// The supervisor moves the connection to `Connecting` before calling
/// [`ProtocolAdapter::start`] and to `Connected` once it returns `Ok`. Drivers
/// keep the handle to report drops later via [`ConnectionStatus::fail`].
#[async_trait]
pub trait ProtocolAdapter: Send + Sync {
    /// Short protocol name used in metric names and logs.
    fn adapter_type(&self) -> &str;

    async fn start(&self, connection: &ConnectionStatus) -> Result<()>;

    async fn stop(&self, connection: &ConnectionStatus) -> Result<()>;

    /// Read the tag described by `context`.
    async fn sample(&self, context: &PollingContext) -> Result<DataSample>;

    /// Write a value to a device tag.
    async fn write(&self, _tag: &str, _value: Value) -> Result<()> {
        Err(AdapterError::Unsupported("write"))
    }
}
