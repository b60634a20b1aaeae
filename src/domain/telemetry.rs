// Raw telemetry domain model
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single reading as received from a source adapter.
///
/// Timestamps are not guaranteed unique, ordered or gap-free. A `value` of `None`
/// means the source sent something that did not parse as a number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawSample {
    pub timestamp: DateTime<Utc>,
    pub value: Option<f64>,
}

impl RawSample {
    pub fn new(timestamp: DateTime<Utc>, value: f64) -> Self {
        Self {
            timestamp,
            value: Some(value),
        }
    }

    pub fn absent(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            value: None,
        }
    }
}
