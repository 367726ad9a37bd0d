//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Periodic sampling jobs with jitter and circuit breaking."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Polling jobs.
//!
//! Every [`PollingContext`] of a started adapter runs as its own tokio task
//! ticking at the context interval. Samples from all adapters share one
//! bounded worker pool, so a hung driver only ever holds its own permits.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use edge_adapter::{DataSample, LifecycleState, PollingContext, RuntimeEvent};
use edge_common::config::RuntimeConfig;
use edge_common::time::jitter_us;
use edge_metrics::RuntimeMetrics;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::{watch, Semaphore};
use tokio::time::{interval, timeout, Instant, MissedTickBehavior};
use tracing::{debug, error, warn};

use crate::tags::TagRegistry;
use crate::wrapper::AdapterCore;

/// Why a polling task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobExit {
    Cancelled,
    /// Removed after exhausting its consecutive error budget.
    CircuitOpen,
    /// The task ended without reporting, e.g. a panicking driver.
    Aborted,
}

/// Handle to one scheduled polling task.
#[derive(Debug)]
pub struct PollingJob {
    adapter_id: String,
    context: Arc<PollingContext>,
    cancel: watch::Sender<bool>,
    exit: watch::Sender<Option<JobExit>>,
    consecutive_errors: AtomicU32,
}

impl PollingJob {
    fn new(adapter_id: String, context: Arc<PollingContext>) -> Self {
        let (cancel, _) = watch::channel(false);
        let (exit, _) = watch::channel(None);
        Self {
            adapter_id,
            context,
            cancel,
            exit,
            consecutive_errors: AtomicU32::new(0),
        }
    }

    pub fn adapter_id(&self) -> &str {
        &self.adapter_id
    }

    pub fn context(&self) -> &PollingContext {
        &self.context
    }

    /// Stop the job. Returns `false` when it was already cancelled. A sample
    /// that is already running completes; no further sample starts.
    pub fn cancel(&self) -> bool {
        self.cancel.send_if_modified(|cancelled| {
            if *cancelled {
                false
            } else {
                *cancelled = true;
                true
            }
        })
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive_errors.load(Ordering::SeqCst)
    }

    /// How the task ended, `None` while it is still running.
    pub fn exit(&self) -> Option<JobExit> {
        *self.exit.borrow()
    }

    /// Wait for the task to end.
    pub async fn join(&self) -> JobExit {
        let mut rx = self.exit.subscribe();
        let exit = match rx.wait_for(Option::is_some).await {
            Ok(exit) => *exit,
            Err(_) => None,
        };
        exit.unwrap_or(JobExit::Aborted)
    }

    fn finish(&self, exit: JobExit) {
        self.exit.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(exit);
            true
        });
    }
}

/// Spawns and drives polling jobs.
pub struct PollingScheduler {
    tags: Arc<TagRegistry>,
    workers: Arc<Semaphore>,
    worker_pool_size: usize,
    sample_timeout: Duration,
    metrics: Option<RuntimeMetrics>,
}

impl PollingScheduler {
    pub fn new(tags: Arc<TagRegistry>, worker_pool_size: usize, sample_timeout: Duration) -> Self {
        let worker_pool_size = worker_pool_size.max(1);
        Self {
            tags,
            workers: Arc::new(Semaphore::new(worker_pool_size)),
            worker_pool_size,
            sample_timeout,
            metrics: None,
        }
    }

    pub fn from_config(tags: Arc<TagRegistry>, config: &RuntimeConfig) -> Self {
        Self::new(tags, config.worker_pool_size, config.sample_timeout)
    }

    pub fn with_metrics(mut self, metrics: RuntimeMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn tags(&self) -> &Arc<TagRegistry> {
        &self.tags
    }

    pub fn worker_pool_size(&self) -> usize {
        self.worker_pool_size
    }

    pub fn available_workers(&self) -> usize {
        self.workers.available_permits()
    }

    pub fn sample_timeout(&self) -> Duration {
        self.sample_timeout
    }

    pub(crate) fn schedule(
        &self,
        adapter: Arc<AdapterCore>,
        context: Arc<PollingContext>,
    ) -> Arc<PollingJob> {
        let job = Arc::new(PollingJob::new(adapter.adapter_id.clone(), context));
        if let Some(metrics) = &self.metrics {
            metrics.job_scheduled();
        }
        let runner = JobRunner {
            cancel: job.cancel.subscribe(),
            job: job.clone(),
            adapter,
            tags: self.tags.clone(),
            workers: self.workers.clone(),
            sample_timeout: self.sample_timeout,
            metrics: self.metrics.clone(),
            rng: StdRng::from_entropy(),
        };
        let guard = JobGuard {
            job: job.clone(),
            metrics: self.metrics.clone(),
        };
        debug!(
            adapter_id = %job.adapter_id,
            tag = %job.context.tag(),
            interval_ms = job.context.interval().as_millis() as u64,
            "polling job scheduled"
        );
        tokio::spawn(async move {
            let exit = runner.run().await;
            guard.job.finish(exit);
        });
        job
    }
}

impl std::fmt::Debug for PollingScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollingScheduler")
            .field("worker_pool_size", &self.worker_pool_size)
            .field("sample_timeout", &self.sample_timeout)
            .finish_non_exhaustive()
    }
}

/// Publishes the exit reason and releases the job gauge however the task ends.
struct JobGuard {
    job: Arc<PollingJob>,
    metrics: Option<RuntimeMetrics>,
}

impl Drop for JobGuard {
    fn drop(&mut self) {
        self.job.finish(JobExit::Aborted);
        if let Some(metrics) = &self.metrics {
            metrics.job_finished();
        }
    }
}

enum Cycle {
    Skipped,
    Sampled,
    Failed,
    Cancelled,
    CircuitOpen,
}

struct JobRunner {
    job: Arc<PollingJob>,
    adapter: Arc<AdapterCore>,
    tags: Arc<TagRegistry>,
    workers: Arc<Semaphore>,
    sample_timeout: Duration,
    metrics: Option<RuntimeMetrics>,
    cancel: watch::Receiver<bool>,
    rng: StdRng,
}

impl JobRunner {
    async fn run(mut self) -> JobExit {
        let period = self.job.context.interval();
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_tick = None;
        loop {
            if self.job.is_cancelled() {
                debug!(adapter_id = %self.job.adapter_id, tag = %self.job.context.tag(), "polling job cancelled");
                return JobExit::Cancelled;
            }
            tokio::select! {
                biased;
                changed = self.cancel.changed() => {
                    if changed.is_err() {
                        return JobExit::Cancelled;
                    }
                    continue;
                }
                _ = ticker.tick() => {
                    let now = Instant::now();
                    if let Some(previous) = last_tick.replace(now) {
                        let lag_us = jitter_us(now.duration_since(previous), period);
                        if lag_us > 1_000 {
                            debug!(adapter_id = %self.job.adapter_id, tag = %self.job.context.tag(), lag_us, "polling tick late");
                        }
                    }
                }
            }
            match self.cycle().await {
                Cycle::Cancelled => return JobExit::Cancelled,
                Cycle::CircuitOpen => return JobExit::CircuitOpen,
                Cycle::Skipped | Cycle::Sampled | Cycle::Failed => {}
            }
        }
    }

    async fn cycle(&mut self) -> Cycle {
        let context = self.job.context.clone();
        if !self.adapter_started() {
            return Cycle::Skipped;
        }

        match context.delay().pick(&mut self.rng) {
            Ok(None) => {}
            Ok(Some(delay)) => {
                tokio::select! {
                    biased;
                    _ = self.cancel.changed() => return Cycle::Cancelled,
                    _ = tokio::time::sleep(delay) => {}
                }
                if !self.adapter_started() {
                    return Cycle::Skipped;
                }
            }
            Err(err) => return self.failed(&context, err.to_string()),
        }

        let outcome = {
            let Ok(_permit) = self.workers.acquire().await else {
                return Cycle::Cancelled;
            };
            if self.job.is_cancelled() {
                return Cycle::Cancelled;
            }
            timeout(self.sample_timeout, self.adapter.driver.sample(&context)).await
        };

        match outcome {
            Ok(Ok(sample)) => {
                self.succeeded(&context, &sample);
                Cycle::Sampled
            }
            Ok(Err(err)) => self.failed(&context, err.to_string()),
            Err(_) => self.failed(
                &context,
                format!("sample timed out after {}ms", self.sample_timeout.as_millis()),
            ),
        }
    }

    fn adapter_started(&self) -> bool {
        let state = self.adapter.lifecycle();
        if state != LifecycleState::Started {
            debug!(adapter_id = %self.job.adapter_id, state = %state, "adapter not started; skipping sample");
            return false;
        }
        true
    }

    fn succeeded(&self, context: &PollingContext, sample: &DataSample) {
        self.job.consecutive_errors.store(0, Ordering::SeqCst);
        self.adapter.consecutive_errors.store(0, Ordering::SeqCst);
        self.adapter.metrics.read_success();
        let mut delivered = 0;
        for (tag, points) in sample.iter() {
            delivered += self.tags.feed(tag, sample.timestamp_ms(), points);
        }
        debug!(
            adapter_id = %self.job.adapter_id,
            tag = %context.tag(),
            points = sample.len(),
            delivered,
            "sample published"
        );
    }

    fn failed(&self, context: &PollingContext, reason: String) -> Cycle {
        let errors = self.job.consecutive_errors.fetch_add(1, Ordering::SeqCst) + 1;
        self.adapter.consecutive_errors.fetch_add(1, Ordering::SeqCst);
        self.adapter.metrics.read_failed();
        warn!(
            adapter_id = %self.job.adapter_id,
            tag = %context.tag(),
            consecutive_errors = errors,
            error = %reason,
            "sample failed"
        );
        if !context.budget_exhausted(errors) {
            return Cycle::Failed;
        }

        self.job.cancel();
        let response = self.adapter.connection.fail();
        error!(
            adapter_id = %self.job.adapter_id,
            tag = %context.tag(),
            consecutive_errors = errors,
            connection = %response.message,
            "polling job removed after consecutive failures"
        );
        self.adapter.emit(RuntimeEvent::PollingRemoved {
            adapter_id: self.job.adapter_id.clone(),
            tag: context.tag().to_owned(),
            consecutive_errors: errors,
        });
        if let Some(metrics) = &self.metrics {
            metrics.record_job_removed(&self.job.adapter_id);
        }
        Cycle::CircuitOpen
    }
}
