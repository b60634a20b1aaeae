// Defensive parsing of upstream JSON bodies into raw samples
use crate::application::sample_source::FetchFailure;
use crate::domain::telemetry::RawSample;
use crate::domain::time;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::Value;

const NAIVE_FORMATS: [&str; 3] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"];

/// Parse a `[{timestamp, value}, ...]` body.
///
/// Structural problems fail the whole fetch. A value that is not numeric becomes an
/// absent sample; a timestamp that cannot be read drops that element.
pub fn parse_sample_array(body: &Value) -> Result<Vec<RawSample>, FetchFailure> {
    let items = body
        .as_array()
        .ok_or_else(|| FetchFailure::Shape(format!("expected an array, got {}", kind_of(body))))?;

    let mut samples = Vec::with_capacity(items.len());
    for (index, item) in items.iter().enumerate() {
        let object = item.as_object().ok_or_else(|| {
            FetchFailure::Shape(format!("element {} is {}, not an object", index, kind_of(item)))
        })?;

        let raw_timestamp = object
            .get("timestamp")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                FetchFailure::Shape(format!("element {} has no string timestamp", index))
            })?;

        let Some(timestamp) = parse_timestamp(raw_timestamp) else {
            tracing::warn!(
                "Dropping element {} with unreadable timestamp {:?}",
                index,
                raw_timestamp
            );
            continue;
        };

        samples.push(RawSample {
            timestamp,
            value: object.get("value").and_then(parse_value),
        });
    }

    Ok(samples)
}

/// Forecast service response: `{predictions: [...], historicalData: [...]}`
#[derive(Debug, Clone, PartialEq)]
pub struct ForecastEnvelope {
    pub predictions: Vec<RawSample>,
    pub historical_data: Vec<RawSample>,
}

pub fn parse_forecast_envelope(body: &Value) -> Result<ForecastEnvelope, FetchFailure> {
    let object = body
        .as_object()
        .ok_or_else(|| FetchFailure::Shape(format!("expected an object, got {}", kind_of(body))))?;

    let predictions = object
        .get("predictions")
        .ok_or_else(|| FetchFailure::Shape("missing predictions".to_string()))
        .and_then(parse_sample_array)?;

    let historical_data = match object.get("historicalData") {
        Some(Value::Null) | None => Vec::new(),
        Some(history) => parse_sample_array(history)?,
    };

    Ok(ForecastEnvelope {
        predictions,
        historical_data,
    })
}

/// RFC 3339 with any offset, or an offset-less wall-clock time in the reference zone
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }

    NAIVE_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .and_then(time::from_reference_local)
}

fn parse_value(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|v| v.is_finite())
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
