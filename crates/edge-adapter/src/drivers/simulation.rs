//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Random value driver for demos and soak tests."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use async_trait::async_trait;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Deserialize;
use tracing::info;

use crate::connection::ConnectionStatus;
use crate::data::DataSample;
use crate::driver::ProtocolAdapter;
use crate::error::{AdapterError, Result};
use crate::polling::PollingContext;

pub const ADAPTER_TYPE: &str = "simulation";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SimulationSettings {
    pub min_value: f64,
    pub max_value: f64,
    /// Fixed seed for reproducible sequences.
    pub seed: Option<u64>,
    /// Probability in `[0, 1]` that a sample fails.
    pub failure_rate: f64,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            min_value: 0.0,
            max_value: 1000.0,
            seed: None,
            failure_rate: 0.0,
        }
    }
}

/// Driver that produces uniformly distributed values for any tag.
#[derive(Debug)]
pub struct SimulationAdapter {
    settings: SimulationSettings,
    rng: Mutex<StdRng>,
}

impl SimulationAdapter {
    pub fn new(settings: SimulationSettings) -> Result<Self> {
        if !(settings.min_value <= settings.max_value) {
            return Err(AdapterError::InvalidSettings(format!(
                "min_value {} exceeds max_value {}",
                settings.min_value, settings.max_value
            )));
        }
        if !(0.0..=1.0).contains(&settings.failure_rate) {
            return Err(AdapterError::InvalidSettings(format!(
                "failure_rate {} outside [0, 1]",
                settings.failure_rate
            )));
        }
        let rng = match settings.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Ok(Self {
            settings,
            rng: Mutex::new(rng),
        })
    }

    pub fn settings(&self) -> &SimulationSettings {
        &self.settings
    }
}

#[async_trait]
impl ProtocolAdapter for SimulationAdapter {
    fn adapter_type(&self) -> &str {
        ADAPTER_TYPE
    }

    async fn start(&self, connection: &ConnectionStatus) -> Result<()> {
        info!(adapter_id = %connection.adapter_id(), "simulation driver started");
        Ok(())
    }

    async fn stop(&self, connection: &ConnectionStatus) -> Result<()> {
        info!(adapter_id = %connection.adapter_id(), "simulation driver stopped");
        Ok(())
    }

    async fn sample(&self, context: &PollingContext) -> Result<DataSample> {
        let value = {
            let mut rng = self.rng.lock();
            if self.settings.failure_rate > 0.0 && rng.gen_bool(self.settings.failure_rate) {
                return Err(AdapterError::sample(context.tag(), "simulated failure"));
            }
            if self.settings.min_value == self.settings.max_value {
                self.settings.min_value
            } else {
                rng.gen_range(self.settings.min_value..=self.settings.max_value)
            }
        };
        Ok(DataSample::now().with_point(context.tag(), value))
    }
}
