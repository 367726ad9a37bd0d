//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "In-memory Modbus holding register driver."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::connection::ConnectionStatus;
use crate::data::DataSample;
use crate::driver::ProtocolAdapter;
use crate::error::{AdapterError, Result};
use crate::polling::PollingContext;

pub const ADAPTER_TYPE: &str = "modbus";

/// Settings describing the Modbus endpoint. In this in-memory driver the
/// endpoint is just a logical device identifier.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ModbusSettings {
    /// Logical identifier (e.g. IP:port in real deployments). Defaults to the
    /// adapter id.
    pub device_id: String,
    /// Initial holding register contents keyed by address.
    pub registers: IndexMap<u16, u16>,
}

/// In-memory Modbus driver that simulates holding registers.
///
/// Tags take the form `<device_id>:holding:<address>`.
#[derive(Debug, Clone)]
pub struct ModbusAdapter {
    device_id: String,
    registers: Arc<Mutex<HashMap<u16, u16>>>,
    connected: Arc<AtomicBool>,
}

impl ModbusAdapter {
    pub fn new(settings: ModbusSettings) -> Self {
        Self {
            device_id: settings.device_id,
            registers: Arc::new(Mutex::new(settings.registers.into_iter().collect())),
            connected: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn tag_for(&self, address: u16) -> String {
        format!("{}:holding:{}", self.device_id, address)
    }

    /// Read a range of holding registers. Unset registers read as zero.
    pub async fn read_holding_registers(&self, start: u16, count: u16) -> Vec<u16> {
        let registers = self.registers.lock().await;
        (0..count)
            .map(|offset| {
                let addr = start.wrapping_add(offset);
                registers.get(&addr).copied().unwrap_or(0)
            })
            .collect()
    }

    pub async fn write_holding_register(&self, address: u16, value: u16) {
        self.registers.lock().await.insert(address, value);
    }

    fn parse_tag(&self, tag: &str) -> Option<u16> {
        let mut parts = tag.rsplitn(3, ':');
        let address = parts.next()?.parse::<u16>().ok()?;
        let kind = parts.next()?;
        let device = parts.next()?;
        (kind == "holding" && device == self.device_id).then_some(address)
    }
}

#[async_trait]
impl ProtocolAdapter for ModbusAdapter {
    fn adapter_type(&self) -> &str {
        ADAPTER_TYPE
    }

    async fn start(&self, _connection: &ConnectionStatus) -> Result<()> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self, _connection: &ConnectionStatus) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn sample(&self, context: &PollingContext) -> Result<DataSample> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(AdapterError::NotConnected);
        }
        let address = self
            .parse_tag(context.tag())
            .ok_or_else(|| AdapterError::sample(context.tag(), "invalid modbus tag"))?;
        let value = self.read_holding_registers(address, 1).await[0];
        Ok(DataSample::now().with_point(context.tag(), value))
    }

    async fn write(&self, tag: &str, value: Value) -> Result<()> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(AdapterError::NotConnected);
        }
        let address = self
            .parse_tag(tag)
            .ok_or_else(|| AdapterError::write(tag, "invalid modbus tag"))?;
        let numeric = value
            .as_i64()
            .ok_or_else(|| AdapterError::write(tag, "register writes require integer payloads"))?;
        let register = u16::try_from(numeric)
            .map_err(|_| AdapterError::write(tag, "value out of range for 16-bit register"))?;
        self.write_holding_register(address, register).await;
        Ok(())
    }
}
