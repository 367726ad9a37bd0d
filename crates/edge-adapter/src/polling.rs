//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Polling contexts and jitter windows."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::time::Duration;

use edge_common::config::PollingConfig;
use rand::Rng;
use serde::Serialize;

use crate::error::PollingConfigError;

/// Bounds of the random delay inserted before each sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct DelayWindow {
    min_ms: u64,
    max_ms: u64,
}

impl DelayWindow {
    pub const NONE: DelayWindow = DelayWindow { min_ms: 0, max_ms: 0 };

    /// Build a window without validating it. Inverted bounds surface as an
    /// error from [`DelayWindow::pick`] on every cycle.
    pub fn from_millis(min_ms: u64, max_ms: u64) -> Self {
        Self { min_ms, max_ms }
    }

    pub fn min_ms(&self) -> u64 {
        self.min_ms
    }

    pub fn max_ms(&self) -> u64 {
        self.max_ms
    }

    pub fn validate(&self) -> Result<(), PollingConfigError> {
        if self.min_ms > self.max_ms {
            return Err(PollingConfigError::InvertedDelayWindow {
                min_ms: self.min_ms,
                max_ms: self.max_ms,
            });
        }
        Ok(())
    }

    /// Draw a delay uniformly from `[min, max]`.
    ///
    /// Returns `Ok(None)` for the zero window so callers skip the sleep
    /// entirely.
    pub fn pick<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<Option<Duration>, PollingConfigError> {
        self.validate()?;
        if self.max_ms == 0 {
            return Ok(None);
        }
        let millis = if self.min_ms == self.max_ms {
            self.min_ms
        } else {
            rng.gen_range(self.min_ms..=self.max_ms)
        };
        Ok(Some(Duration::from_millis(millis)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserProperty {
    pub name: String,
    pub value: String,
}

/// Immutable description of one periodic sampling job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PollingContext {
    tag: String,
    interval: Duration,
    delay: DelayWindow,
    max_polling_errors_before_removal: i32,
    include_timestamp: bool,
    include_tag_names: bool,
    destination: Option<String>,
    qos: u8,
    user_properties: Vec<UserProperty>,
}

impl PollingContext {
    /// Context with default settings. Rejects an empty tag or a zero interval.
    pub fn new(tag: impl Into<String>, interval: Duration) -> Result<Self, PollingConfigError> {
        let tag = tag.into();
        if tag.trim().is_empty() {
            return Err(PollingConfigError::EmptyTag);
        }
        if interval.is_zero() {
            return Err(PollingConfigError::ZeroInterval);
        }
        Ok(Self {
            tag,
            interval,
            delay: DelayWindow::NONE,
            max_polling_errors_before_removal: 10,
            include_timestamp: true,
            include_tag_names: false,
            destination: None,
            qos: 0,
            user_properties: Vec::new(),
        })
    }

    /// Build a context from its configuration entry.
    ///
    /// The delay window is carried over as-is; an inverted window fails each
    /// cycle rather than the construction.
    pub fn from_config(config: &PollingConfig) -> Result<Self, PollingConfigError> {
        let base = Self::new(config.tag.clone(), config.interval)?;
        if config.qos > 2 {
            return Err(PollingConfigError::InvalidQos(config.qos));
        }
        Ok(Self {
            delay: DelayWindow::from_millis(config.min_delay_ms, config.max_delay_ms),
            max_polling_errors_before_removal: config.max_polling_errors_before_removal,
            include_timestamp: config.include_timestamp,
            include_tag_names: config.include_tag_names,
            destination: config.destination.clone(),
            qos: config.qos,
            user_properties: config
                .user_properties
                .iter()
                .map(|prop| UserProperty {
                    name: prop.name.clone(),
                    value: prop.value.clone(),
                })
                .collect(),
            ..base
        })
    }

    pub fn with_delay(mut self, min_ms: u64, max_ms: u64) -> Self {
        self.delay = DelayWindow::from_millis(min_ms, max_ms);
        self
    }

    pub fn with_max_polling_errors(mut self, max: i32) -> Self {
        self.max_polling_errors_before_removal = max;
        self
    }

    pub fn with_destination(mut self, destination: impl Into<String>) -> Self {
        self.destination = Some(destination.into());
        self
    }

    pub fn with_qos(mut self, qos: u8) -> Result<Self, PollingConfigError> {
        if qos > 2 {
            return Err(PollingConfigError::InvalidQos(qos));
        }
        self.qos = qos;
        Ok(self)
    }

    pub fn with_user_property(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.user_properties.push(UserProperty {
            name: name.into(),
            value: value.into(),
        });
        self
    }

    pub fn with_timestamp(mut self, include: bool) -> Self {
        self.include_timestamp = include;
        self
    }

    pub fn with_tag_names(mut self, include: bool) -> Self {
        self.include_tag_names = include;
        self
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn delay(&self) -> DelayWindow {
        self.delay
    }

    pub fn max_polling_errors_before_removal(&self) -> i32 {
        self.max_polling_errors_before_removal
    }

    pub fn include_timestamp(&self) -> bool {
        self.include_timestamp
    }

    pub fn include_tag_names(&self) -> bool {
        self.include_tag_names
    }

    /// Northbound destination, falling back to the tag name.
    pub fn destination(&self) -> &str {
        self.destination.as_deref().unwrap_or(&self.tag)
    }

    pub fn qos(&self) -> u8 {
        self.qos
    }

    pub fn user_properties(&self) -> &[UserProperty] {
        &self.user_properties
    }

    /// Consecutive failures tolerated before removal; `None` disables removal.
    pub fn error_budget(&self) -> Option<u32> {
        u32::try_from(self.max_polling_errors_before_removal).ok()
    }

    pub fn budget_exhausted(&self, consecutive_errors: u32) -> bool {
        match self.error_budget() {
            Some(budget) => consecutive_errors >= budget,
            None => false,
        }
    }
}
