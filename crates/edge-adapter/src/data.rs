//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Data points, samples, and northbound payload shaping."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use edge_common::time::now_epoch_millis;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::polling::PollingContext;

/// One tag value read from a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    pub tag_name: String,
    pub value: Value,
}

impl DataPoint {
    pub fn new(tag_name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            tag_name: tag_name.into(),
            value: value.into(),
        }
    }
}

/// Result of one sampling cycle: data points grouped by tag name.
///
/// Samples are filled by the driver and handed to the runtime by value;
/// nothing mutates them afterwards.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DataSample {
    timestamp_ms: i64,
    points: IndexMap<String, Vec<DataPoint>>,
}

impl DataSample {
    pub fn new(timestamp_ms: i64) -> Self {
        Self {
            timestamp_ms,
            points: IndexMap::new(),
        }
    }

    /// Empty sample stamped with the current wall clock.
    pub fn now() -> Self {
        Self::new(now_epoch_millis())
    }

    pub fn push(&mut self, point: DataPoint) {
        self.points
            .entry(point.tag_name.clone())
            .or_default()
            .push(point);
    }

    pub fn with_point(mut self, tag_name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.push(DataPoint::new(tag_name, value));
        self
    }

    pub fn timestamp_ms(&self) -> i64 {
        self.timestamp_ms
    }

    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.points.keys().map(String::as_str)
    }

    pub fn points(&self, tag_name: &str) -> &[DataPoint] {
        self.points.get(tag_name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[DataPoint])> {
        self.points
            .iter()
            .map(|(tag, points)| (tag.as_str(), points.as_slice()))
    }

    /// Total number of points across all tags.
    pub fn len(&self) -> usize {
        self.points.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Shape data points into the JSON document published northbound.
///
/// The layout follows the context flags: `timestamp` is present only when
/// `include_timestamp` is set and each value carries its `tagName` only when
/// `include_tag_names` is set.
pub fn northbound_payload(context: &PollingContext, timestamp_ms: i64, points: &[DataPoint]) -> Value {
    let values: Vec<Value> = points
        .iter()
        .map(|point| {
            let mut entry = Map::new();
            if context.include_tag_names() {
                entry.insert("tagName".to_owned(), Value::String(point.tag_name.clone()));
            }
            entry.insert("value".to_owned(), point.value.clone());
            Value::Object(entry)
        })
        .collect();

    let mut payload = Map::new();
    payload.insert("destination".to_owned(), json!(context.destination()));
    payload.insert("qos".to_owned(), json!(context.qos()));
    if !context.user_properties().is_empty() {
        payload.insert("userProperties".to_owned(), json!(context.user_properties()));
    }
    if context.include_timestamp() {
        payload.insert("timestamp".to_owned(), json!(timestamp_ms));
    }
    payload.insert("values".to_owned(), Value::Array(values));
    Value::Object(payload)
}
