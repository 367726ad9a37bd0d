//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Tag name to consumer fan-out."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Fan-out of sampled data points to the consumers registered for a tag.
//!
//! Registration changes happen under the write lock. [`TagRegistry::feed`]
//! copies the consumer list under the read lock and delivers with the lock
//! released, so consumers may add or remove registrations from inside
//! `accept` without deadlocking.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use edge_adapter::DataPoint;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Receiver of data points for a single tag.
pub trait TagConsumer: Send + Sync {
    fn tag_name(&self) -> &str;

    /// `timestamp_ms` is the epoch-millisecond time the sample was taken.
    fn accept(&self, tag_name: &str, timestamp_ms: i64, points: &[DataPoint]);
}

/// Consumer backed by a closure.
pub struct FnConsumer<F> {
    tag_name: String,
    callback: F,
}

impl<F> FnConsumer<F>
where
    F: Fn(&str, i64, &[DataPoint]) + Send + Sync + 'static,
{
    pub fn new(tag_name: impl Into<String>, callback: F) -> Arc<Self> {
        Arc::new(Self {
            tag_name: tag_name.into(),
            callback,
        })
    }
}

impl<F> TagConsumer for FnConsumer<F>
where
    F: Fn(&str, i64, &[DataPoint]) + Send + Sync + 'static,
{
    fn tag_name(&self) -> &str {
        &self.tag_name
    }

    fn accept(&self, tag_name: &str, timestamp_ms: i64, points: &[DataPoint]) {
        (self.callback)(tag_name, timestamp_ms, points)
    }
}

/// Points delivered to a [`ChannelConsumer`].
#[derive(Debug, Clone, PartialEq)]
pub struct TagDelivery {
    pub tag_name: String,
    pub timestamp_ms: i64,
    pub points: Vec<DataPoint>,
}

/// Consumer that forwards deliveries into a bounded channel.
///
/// Deliveries are dropped with a warning when the channel is full, so a slow
/// reader never stalls the polling job that feeds it.
pub struct ChannelConsumer {
    tag_name: String,
    sender: mpsc::Sender<TagDelivery>,
}

impl ChannelConsumer {
    pub fn channel(
        tag_name: impl Into<String>,
        capacity: usize,
    ) -> (Arc<Self>, mpsc::Receiver<TagDelivery>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (
            Arc::new(Self {
                tag_name: tag_name.into(),
                sender,
            }),
            receiver,
        )
    }
}

impl TagConsumer for ChannelConsumer {
    fn tag_name(&self) -> &str {
        &self.tag_name
    }

    fn accept(&self, tag_name: &str, timestamp_ms: i64, points: &[DataPoint]) {
        let delivery = TagDelivery {
            tag_name: tag_name.to_owned(),
            timestamp_ms,
            points: points.to_vec(),
        };
        match self.sender.try_send(delivery) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(tag = %tag_name, "consumer channel full; dropping delivery");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(tag = %tag_name, "consumer channel closed");
            }
        }
    }
}

#[derive(Clone)]
struct Registration {
    consumer: Arc<dyn TagConsumer>,
    active: Arc<AtomicBool>,
}

fn same_consumer(a: &Arc<dyn TagConsumer>, b: &Arc<dyn TagConsumer>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

/// Tag name to consumers mapping shared by every polling job.
#[derive(Default)]
pub struct TagRegistry {
    consumers: RwLock<HashMap<String, Vec<Registration>>>,
}

impl TagRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a consumer under its own tag name. Registering the same
    /// consumer twice is a no-op and returns `false`.
    pub fn add_consumer(&self, consumer: Arc<dyn TagConsumer>) -> bool {
        let tag = consumer.tag_name().to_owned();
        let mut consumers = self.consumers.write();
        let entries = consumers.entry(tag.clone()).or_default();
        if entries
            .iter()
            .any(|entry| same_consumer(&entry.consumer, &consumer))
        {
            return false;
        }
        entries.push(Registration {
            consumer,
            active: Arc::new(AtomicBool::new(true)),
        });
        debug!(tag = %tag, consumers = entries.len(), "tag consumer added");
        true
    }

    /// Remove a consumer by identity. Returns whether it was registered.
    pub fn remove_consumer(&self, consumer: &Arc<dyn TagConsumer>) -> bool {
        let tag = consumer.tag_name();
        let mut consumers = self.consumers.write();
        let Some(entries) = consumers.get_mut(tag) else {
            return false;
        };
        let Some(index) = entries
            .iter()
            .position(|entry| same_consumer(&entry.consumer, consumer))
        else {
            return false;
        };
        let removed = entries.remove(index);
        removed.active.store(false, Ordering::SeqCst);
        if entries.is_empty() {
            consumers.remove(tag);
        }
        debug!(tag = %tag, "tag consumer removed");
        true
    }

    /// Deliver `points` sampled at `timestamp_ms` to every consumer currently
    /// registered for `tag_name`.
    ///
    /// Returns the number of consumers invoked. A panicking consumer is
    /// logged and does not prevent delivery to the others.
    pub fn feed(&self, tag_name: &str, timestamp_ms: i64, points: &[DataPoint]) -> usize {
        let snapshot: Vec<Registration> = match self.consumers.read().get(tag_name) {
            Some(entries) => entries.clone(),
            None => return 0,
        };
        let mut delivered = 0;
        for registration in snapshot {
            if !registration.active.load(Ordering::SeqCst) {
                continue;
            }
            let consumer = &registration.consumer;
            match catch_unwind(AssertUnwindSafe(|| consumer.accept(tag_name, timestamp_ms, points))) {
                Ok(()) => delivered += 1,
                Err(_) => warn!(tag = %tag_name, "tag consumer panicked during delivery"),
            }
        }
        delivered
    }

    pub fn consumer_count(&self, tag_name: &str) -> usize {
        self.consumers
            .read()
            .get(tag_name)
            .map(Vec::len)
            .unwrap_or(0)
    }

    pub fn tags(&self) -> Vec<String> {
        let mut tags: Vec<String> = self.consumers.read().keys().cloned().collect();
        tags.sort();
        tags
    }
}

impl std::fmt::Debug for TagRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TagRegistry")
            .field("tags", &self.tags())
            .finish()
    }
}
