// Hourly series builder - irregular samples into a fixed 24-slot day
use super::parameter::Parameter;
use super::telemetry::RawSample;
use super::time::{self, HOURS_PER_DAY};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

/// One value per hour of a calendar day in the reference zone.
///
/// `None` is the gap marker and is never the same thing as `0.0`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HourlySeries {
    date: NaiveDate,
    slots: [Option<f64>; HOURS_PER_DAY],
}

impl HourlySeries {
    pub fn empty(date: NaiveDate) -> Self {
        Self {
            date,
            slots: [None; HOURS_PER_DAY],
        }
    }

    pub fn from_slots(date: NaiveDate, slots: [Option<f64>; HOURS_PER_DAY]) -> Self {
        Self { date, slots }
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn slots(&self) -> &[Option<f64>; HOURS_PER_DAY] {
        &self.slots
    }

    pub fn get(&self, hour: usize) -> Option<f64> {
        self.slots.get(hour).copied().flatten()
    }

    pub fn defined_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    /// Start instant of each slot, in hour order
    pub fn timestamps(&self) -> impl Iterator<Item = DateTime<Utc>> + '_ {
        (0..HOURS_PER_DAY).map(|hour| time::hour_start(self.date, hour))
    }
}

/// Bucket `samples` into the 24 hours of one day.
///
/// The day is `reference_date` when given, else the local date of the first sample,
/// else yesterday relative to `now` (so an empty response still yields a fully absent day).
/// For each hour the last sample in input order wins, even if its value did not parse.
pub fn build_hourly(
    samples: &[RawSample],
    parameter: Parameter,
    reference_date: Option<NaiveDate>,
    now: DateTime<Utc>,
) -> HourlySeries {
    let date = reference_date
        .or_else(|| samples.first().map(|s| time::local_date(s.timestamp)))
        .unwrap_or_else(|| time::yesterday(now));

    let mut series = HourlySeries::empty(date);
    for sample in samples {
        let hour = time::local_hour(sample.timestamp);
        series.slots[hour] = sample.value.map(|v| parameter.normalize_value(v));
    }

    series
}
