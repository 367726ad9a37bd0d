//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Polling scheduler timing, jitter and circuit breaking."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
mod support;

use std::sync::Arc;
use std::time::Duration;

use edge_adapter::{ConnectionState, DataPoint, LifecycleState, PollingContext, RuntimeEvent};
use edge_common::config::RuntimeConfig;
use edge_metrics::{new_registry, MetricsNamespace, RuntimeMetrics};
use edge_runtime::{AdapterWrapper, FnConsumer, JobExit, RuntimeServices, TagConsumer};
use parking_lot::Mutex;
use support::{settle_until, wait_until, ScriptedDriver};
use tokio::time::Instant;

fn single(driver: Arc<ScriptedDriver>, context: PollingContext, services: &RuntimeServices) -> AdapterWrapper {
    AdapterWrapper::new("a1", driver, vec![context], services)
}

#[tokio::test(start_paused = true)]
async fn circuit_opens_after_consecutive_failures() {
    let registry = new_registry();
    let runtime_metrics = RuntimeMetrics::new(registry.clone()).unwrap();
    let services = RuntimeServices::new(
        &RuntimeConfig::default(),
        registry,
        MetricsNamespace::default(),
        Some(runtime_metrics.clone()),
    );
    let mut events = services.subscribe();
    let driver = ScriptedDriver::new();
    // One success in the middle resets the counter.
    driver.script(&[false, false, true, false, false, false]);
    let context = PollingContext::new("temp", Duration::from_millis(10)).unwrap().with_max_polling_errors(3);
    let adapter = single(driver.clone(), context, &services);

    assert!(adapter.start().await);
    let job = adapter.jobs().remove(0);
    assert_eq!(runtime_metrics.active_jobs(), 1);

    assert_eq!(job.join().await, JobExit::CircuitOpen);
    assert_eq!(driver.samples(), 6);
    assert_eq!(job.consecutive_errors(), 3);
    assert!(job.is_cancelled());
    assert_eq!(adapter.metrics().value("read.publish.failed.count"), 5);
    assert_eq!(adapter.metrics().value("read.publish.success.count"), 1);
    assert_eq!(adapter.connection_state(), ConnectionState::Error);
    assert_eq!(adapter.state(), LifecycleState::Started);
    assert_eq!(adapter.active_jobs(), 0);
    wait_until(|| runtime_metrics.active_jobs() == 0).await;

    let mut removed = None;
    while let Ok(event) = events.try_recv() {
        if let RuntimeEvent::PollingRemoved { tag, consecutive_errors, .. } = event {
            removed = Some((tag, consecutive_errors));
        }
    }
    assert_eq!(removed, Some(("temp".to_owned(), 3)));

    // No further samples once removed.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(driver.samples(), 6);
}

#[tokio::test(start_paused = true)]
async fn zero_budget_removes_on_first_failure() {
    let services = RuntimeServices::default();
    let driver = ScriptedDriver::failing();
    let context = PollingContext::new("temp", Duration::from_millis(10)).unwrap().with_max_polling_errors(0);
    let adapter = single(driver.clone(), context, &services);

    assert!(adapter.start().await);
    let job = adapter.jobs().remove(0);
    assert_eq!(job.join().await, JobExit::CircuitOpen);
    assert_eq!(driver.samples(), 1);
}

#[tokio::test(start_paused = true)]
async fn negative_budget_never_removes() {
    let services = RuntimeServices::default();
    let driver = ScriptedDriver::failing();
    let context = PollingContext::new("temp", Duration::from_millis(10)).unwrap().with_max_polling_errors(-1);
    let adapter = single(driver.clone(), context, &services);

    assert!(adapter.start().await);
    wait_until(|| driver.samples() >= 25).await;
    let job = adapter.jobs().remove(0);
    assert!(!job.is_cancelled());
    assert!(job.consecutive_errors() >= 25);
    assert_eq!(adapter.connection_state(), ConnectionState::Connected);
    assert!(adapter.stop(false).await);
}

#[tokio::test(start_paused = true)]
async fn cancelling_twice_is_a_no_op() {
    let services = RuntimeServices::default();
    let driver = ScriptedDriver::new();
    let adapter = single(driver.clone(), PollingContext::new("temp", Duration::from_millis(10)).unwrap(), &services);

    assert!(adapter.start().await);
    wait_until(|| driver.samples() >= 2).await;
    let job = adapter.jobs().remove(0);
    assert!(job.cancel());
    assert!(!job.cancel());
    assert_eq!(job.join().await, JobExit::Cancelled);

    let seen = driver.samples();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(driver.samples(), seen);
    assert_eq!(adapter.state(), LifecycleState::Started);
}

#[tokio::test(start_paused = true)]
async fn in_flight_sample_completes_after_cancel() {
    let services = RuntimeServices::default();
    let driver = ScriptedDriver::with_sample_delay(Duration::from_millis(50));
    let delivered = Arc::new(Mutex::new(0usize));
    let sink = delivered.clone();
    let consumer: Arc<dyn TagConsumer> = FnConsumer::new("temp", move |_: &str, _: i64, _: &[DataPoint]| {
        *sink.lock() += 1;
    });
    services.tags().add_consumer(consumer);
    let adapter = single(driver.clone(), PollingContext::new("temp", Duration::from_secs(1)).unwrap(), &services);

    assert!(adapter.start().await);
    wait_until(|| driver.samples() == 1).await;
    let job = adapter.jobs().remove(0);
    job.cancel();
    assert_eq!(job.join().await, JobExit::Cancelled);
    assert_eq!(*delivered.lock(), 1);
    assert_eq!(driver.samples(), 1);
}

#[tokio::test(start_paused = true)]
async fn jitter_window_bounds_the_delay() {
    for _ in 0..10 {
        let services = RuntimeServices::default();
        let driver = ScriptedDriver::new();
        let context = PollingContext::new("temp", Duration::from_secs(60)).unwrap().with_delay(1, 3);
        let adapter = single(driver.clone(), context, &services);

        let started_at = Instant::now();
        assert!(adapter.start().await);
        wait_until(|| driver.samples() == 1).await;
        let delay = driver.sample_times()[0] - started_at;
        assert!(delay >= Duration::from_millis(1), "{delay:?}");
        assert!(delay <= Duration::from_millis(3), "{delay:?}");
        assert!(adapter.stop(false).await);
    }
}

#[tokio::test(start_paused = true)]
async fn degenerate_jitter_windows() {
    let services = RuntimeServices::default();

    let exact = ScriptedDriver::new();
    let adapter = single(
        exact.clone(),
        PollingContext::new("temp", Duration::from_secs(60)).unwrap().with_delay(1, 1),
        &services,
    );
    let started_at = Instant::now();
    assert!(adapter.start().await);
    wait_until(|| exact.samples() == 1).await;
    assert_eq!(exact.sample_times()[0] - started_at, Duration::from_millis(1));
    assert!(adapter.stop(false).await);

    let none = ScriptedDriver::new();
    let adapter = AdapterWrapper::new(
        "a2",
        none.clone(),
        vec![PollingContext::new("temp", Duration::from_secs(60)).unwrap()],
        &services,
    );
    let started_at = Instant::now();
    assert!(adapter.start().await);
    settle_until(|| none.samples() == 1).await;
    assert_eq!(none.sample_times()[0], started_at);
}

#[tokio::test(start_paused = true)]
async fn inverted_jitter_window_fails_without_sampling() {
    let services = RuntimeServices::default();
    let driver = ScriptedDriver::new();
    let context = PollingContext::new("temp", Duration::from_secs(60)).unwrap().with_delay(2, 1);
    let adapter = single(driver.clone(), context, &services);

    let started_at = Instant::now();
    assert!(adapter.start().await);
    settle_until(|| adapter.metrics().value("read.publish.failed.count") == 1).await;
    assert_eq!(Instant::now(), started_at);
    assert_eq!(driver.samples(), 0);
    assert_eq!(adapter.consecutive_errors(), 1);
    assert_eq!(adapter.active_jobs(), 1);
}

#[tokio::test(start_paused = true)]
async fn slow_samples_time_out_as_failures() {
    let config = RuntimeConfig {
        sample_timeout: Duration::from_millis(20),
        ..RuntimeConfig::default()
    };
    let services = RuntimeServices::new(&config, new_registry(), MetricsNamespace::default(), None);
    let driver = ScriptedDriver::with_sample_delay(Duration::from_millis(100));
    let adapter = single(driver.clone(), PollingContext::new("temp", Duration::from_secs(1)).unwrap(), &services);

    assert!(adapter.start().await);
    wait_until(|| adapter.metrics().value("read.publish.failed.count") == 1).await;
    assert_eq!(adapter.metrics().value("read.publish.success.count"), 0);
    assert_eq!(adapter.consecutive_errors(), 1);
}

#[tokio::test(start_paused = true)]
async fn stopped_adapters_stop_sampling() {
    let services = RuntimeServices::default();
    let driver = ScriptedDriver::new();
    let adapter = single(driver.clone(), PollingContext::new("temp", Duration::from_millis(10)).unwrap(), &services);

    assert!(adapter.start().await);
    wait_until(|| driver.samples() >= 3).await;
    assert!(adapter.stop(false).await);
    let seen = driver.samples();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(driver.samples(), seen);
}
