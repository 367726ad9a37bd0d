//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Reference drivers and the driver factory."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::sync::Arc;

use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::driver::ProtocolAdapter;
use crate::error::{AdapterError, Result};

pub mod modbus;
pub mod simulation;

pub use modbus::{ModbusAdapter, ModbusSettings};
pub use simulation::{SimulationAdapter, SimulationSettings};

/// Build a driver for the configured adapter type.
pub fn build(
    adapter_type: &str,
    adapter_id: &str,
    settings: &IndexMap<String, Value>,
) -> Result<Arc<dyn ProtocolAdapter>> {
    match adapter_type {
        simulation::ADAPTER_TYPE => Ok(Arc::new(SimulationAdapter::new(parse_settings(settings)?)?)),
        modbus::ADAPTER_TYPE => {
            let mut parsed: ModbusSettings = parse_settings(settings)?;
            if parsed.device_id.is_empty() {
                parsed.device_id = adapter_id.to_owned();
            }
            Ok(Arc::new(ModbusAdapter::new(parsed)))
        }
        other => Err(AdapterError::UnknownType(other.to_owned())),
    }
}

fn parse_settings<T: DeserializeOwned>(settings: &IndexMap<String, Value>) -> Result<T> {
    let object: Map<String, Value> = settings
        .iter()
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    serde_json::from_value(Value::Object(object))
        .map_err(|err| AdapterError::InvalidSettings(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn factory_builds_known_types() {
        let mut settings = IndexMap::new();
        settings.insert("seed".to_owned(), json!(7));
        assert_eq!(build("simulation", "a1", &settings).unwrap().adapter_type(), "simulation");
        assert_eq!(build("modbus", "feeder", &IndexMap::new()).unwrap().adapter_type(), "modbus");
    }

    #[test]
    fn factory_rejects_unknown_types_and_bad_settings() {
        assert!(matches!(
            build("opcua", "a1", &IndexMap::new()),
            Err(AdapterError::UnknownType(name)) if name == "opcua"
        ));

        let mut settings = IndexMap::new();
        settings.insert("min_value".to_owned(), json!("low"));
        assert!(matches!(
            build("simulation", "a1", &settings),
            Err(AdapterError::InvalidSettings(_))
        ));
    }
}
