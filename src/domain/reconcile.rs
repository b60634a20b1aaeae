// Reconciler - yesterday (actual + predicted) spliced with the forecast horizon
use super::hourly::HourlySeries;
use super::parameter::Parameter;
use super::telemetry::RawSample;
use super::time::{self, HOURS_PER_DAY};
use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use std::collections::HashMap;

pub const DEFAULT_HORIZON_DAYS: u32 = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Segment {
    Yesterday,
    Forecast,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeriesPoint {
    pub timestamp: DateTime<Utc>,
    pub segment: Segment,
    pub actual_value: Option<f64>,
    pub predicted_value: Option<f64>,
    pub future_value: Option<f64>,
    /// Yesterday point whose timestamp collides with a forecast point
    #[serde(skip)]
    pub suspect: bool,
}

impl SeriesPoint {
    fn yesterday(timestamp: DateTime<Utc>, actual: Option<f64>, predicted: Option<f64>) -> Self {
        Self {
            timestamp,
            segment: Segment::Yesterday,
            actual_value: actual,
            predicted_value: predicted,
            future_value: None,
            suspect: false,
        }
    }

    fn forecast(timestamp: DateTime<Utc>, future: Option<f64>) -> Self {
        Self {
            timestamp,
            segment: Segment::Forecast,
            actual_value: None,
            predicted_value: None,
            future_value: future,
            suspect: false,
        }
    }

    pub fn is_yesterday(&self) -> bool {
        self.segment == Segment::Yesterday
    }
}

/// Gap-preserving past + future series for one parameter
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconciledSeries {
    pub parameter: Parameter,
    pub horizon_days: u32,
    pub points: Vec<SeriesPoint>,
}

impl ReconciledSeries {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn yesterday_points(&self) -> impl Iterator<Item = &SeriesPoint> {
        self.points.iter().filter(|p| p.is_yesterday())
    }

    pub fn forecast_points(&self) -> impl Iterator<Item = &SeriesPoint> {
        self.points.iter().filter(|p| !p.is_yesterday())
    }

    pub fn suspect_count(&self) -> usize {
        self.points.iter().filter(|p| p.suspect).count()
    }
}

/// Merge yesterday's actual and predicted slots with the forecast horizon.
///
/// Pure: the same inputs always give the same series. The forecast grid starts at the
/// first full hour after `now` and holds `24 * horizon_days` points; forecast samples are
/// placed by their own hour, last seen wins, and grid hours without a sample stay absent.
pub fn reconcile(
    parameter: Parameter,
    actual: &HourlySeries,
    predicted: &HourlySeries,
    forecast: &[RawSample],
    horizon_days: u32,
    now: DateTime<Utc>,
) -> ReconciledSeries {
    let forecast_len = HOURS_PER_DAY * horizon_days as usize;
    let mut points = Vec::with_capacity(HOURS_PER_DAY + forecast_len);

    for (hour, timestamp) in actual.timestamps().enumerate() {
        points.push(SeriesPoint::yesterday(
            timestamp,
            actual.get(hour),
            predicted.get(hour),
        ));
    }

    let start = time::next_full_hour(now);
    let mut by_hour: HashMap<DateTime<Utc>, Option<f64>> = HashMap::with_capacity(forecast.len());
    for sample in forecast {
        by_hour.insert(
            time::truncate_to_hour(sample.timestamp),
            sample.value.map(|v| parameter.normalize_value(v)),
        );
    }

    let mut placed = 0usize;
    for offset in 0..forecast_len {
        let timestamp = start + TimeDelta::hours(offset as i64);
        let value = match by_hour.get(&timestamp) {
            Some(value) => {
                placed += 1;
                *value
            }
            None => None,
        };
        points.push(SeriesPoint::forecast(timestamp, value));
    }

    if placed < by_hour.len() {
        tracing::debug!(
            "{}: {} forecast hours fell outside the {}h horizon grid",
            parameter,
            by_hour.len() - placed,
            forecast_len
        );
    }

    flag_overlap(parameter, &mut points);

    // Forecast sorts ahead of yesterday on a tie; sort_by is stable for everything else.
    points.sort_by(|a, b| {
        a.timestamp
            .cmp(&b.timestamp)
            .then_with(|| a.is_yesterday().cmp(&b.is_yesterday()))
    });

    ReconciledSeries {
        parameter,
        horizon_days,
        points,
    }
}

fn flag_overlap(parameter: Parameter, points: &mut [SeriesPoint]) {
    let Some(first_forecast) = points
        .iter()
        .find(|p| !p.is_yesterday())
        .map(|p| p.timestamp)
    else {
        return;
    };

    let mut collisions = 0usize;
    for point in points.iter_mut().filter(|p| p.is_yesterday()) {
        if point.timestamp >= first_forecast {
            point.suspect = true;
            collisions += 1;
        }
    }

    if collisions > 0 {
        tracing::warn!(
            "{}: {} yesterday points overlap the forecast range starting {}; forecast wins on tie",
            parameter,
            collisions,
            first_forecast
        );
    }
}
