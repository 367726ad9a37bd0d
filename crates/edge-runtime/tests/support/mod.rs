//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Scripted driver and helpers shared by runtime tests."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use edge_adapter::error::Result;
use edge_adapter::{AdapterError, ConnectionStatus, DataSample, PollingContext, ProtocolAdapter};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::time::Instant;

/// Driver whose outcomes are queued by the test.
#[derive(Default)]
pub struct ScriptedDriver {
    pub start_calls: AtomicUsize,
    pub stop_calls: AtomicUsize,
    pub sample_calls: AtomicUsize,
    pub fail_start: AtomicBool,
    pub fail_stop: AtomicBool,
    pub fail_by_default: AtomicBool,
    start_delay: Duration,
    sample_delay: Duration,
    script: Mutex<VecDeque<bool>>,
    sample_times: Mutex<Vec<Instant>>,
}

impl ScriptedDriver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_start_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            start_delay: delay,
            ..Self::default()
        })
    }

    pub fn with_sample_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            sample_delay: delay,
            ..Self::default()
        })
    }

    pub fn failing() -> Arc<Self> {
        let driver = Self::default();
        driver.fail_by_default.store(true, Ordering::SeqCst);
        Arc::new(driver)
    }

    /// Queue sample outcomes; `true` succeeds, `false` fails.
    pub fn script(&self, outcomes: &[bool]) {
        self.script.lock().extend(outcomes.iter().copied());
    }

    pub fn samples(&self) -> usize {
        self.sample_calls.load(Ordering::SeqCst)
    }

    pub fn sample_times(&self) -> Vec<Instant> {
        self.sample_times.lock().clone()
    }
}

#[async_trait]
impl ProtocolAdapter for ScriptedDriver {
    fn adapter_type(&self) -> &str {
        "scripted"
    }

    async fn start(&self, _connection: &ConnectionStatus) -> Result<()> {
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        if !self.start_delay.is_zero() {
            tokio::time::sleep(self.start_delay).await;
        }
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(AdapterError::Connect("scripted refusal".into()));
        }
        Ok(())
    }

    async fn stop(&self, _connection: &ConnectionStatus) -> Result<()> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_stop.load(Ordering::SeqCst) {
            return Err(AdapterError::Connect("scripted stop failure".into()));
        }
        Ok(())
    }

    async fn sample(&self, context: &PollingContext) -> Result<DataSample> {
        self.sample_times.lock().push(Instant::now());
        self.sample_calls.fetch_add(1, Ordering::SeqCst);
        if !self.sample_delay.is_zero() {
            tokio::time::sleep(self.sample_delay).await;
        }
        let succeed = self
            .script
            .lock()
            .pop_front()
            .unwrap_or(!self.fail_by_default.load(Ordering::SeqCst));
        if succeed {
            Ok(DataSample::new(1_700_000_000_000).with_point(context.tag(), 1.5))
        } else {
            Err(AdapterError::sample(context.tag(), "scripted failure"))
        }
    }

    async fn write(&self, tag: &str, value: Value) -> Result<()> {
        if value.is_null() {
            return Err(AdapterError::write(tag, "null payload"));
        }
        Ok(())
    }
}

/// Sleep in 1ms steps until `condition` holds. Panics after 10 000 steps.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..10_000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("condition not reached");
}

/// Yield to other tasks without letting time pass until `condition` holds.
pub async fn settle_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..1_000 {
        if condition() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition not reached without advancing time");
}
