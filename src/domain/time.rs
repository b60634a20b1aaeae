// Reference timezone helpers
//
// All hour extraction happens in Asia/Jakarta (UTC+7, no DST).
use chrono::{
    DateTime, DurationRound, NaiveDate, NaiveDateTime, NaiveTime, Offset, TimeDelta, TimeZone,
    Timelike, Utc,
};
use chrono_tz::Tz;

pub const REFERENCE_TZ: Tz = chrono_tz::Asia::Jakarta;

pub const HOURS_PER_DAY: usize = 24;

/// Hour of day (0..=23) of an instant in the reference zone
pub fn local_hour(instant: DateTime<Utc>) -> usize {
    instant.with_timezone(&REFERENCE_TZ).hour() as usize
}

/// Calendar date of an instant in the reference zone
pub fn local_date(instant: DateTime<Utc>) -> NaiveDate {
    instant.with_timezone(&REFERENCE_TZ).date_naive()
}

/// The day before `now`, in the reference zone
pub fn yesterday(now: DateTime<Utc>) -> NaiveDate {
    let today = local_date(now);
    today.pred_opt().unwrap_or(today)
}

/// Start of `hour` on `date` in the reference zone, as a UTC instant
pub fn hour_start(date: NaiveDate, hour: usize) -> DateTime<Utc> {
    let local = date.and_time(NaiveTime::MIN) + TimeDelta::hours(hour as i64);
    let offset = REFERENCE_TZ.offset_from_utc_date(&date).fix();
    Utc.from_utc_datetime(&(local - TimeDelta::seconds(i64::from(offset.local_minus_utc()))))
}

/// Truncate an instant to the start of its hour
pub fn truncate_to_hour(instant: DateTime<Utc>) -> DateTime<Utc> {
    instant.duration_trunc(TimeDelta::hours(1)).unwrap_or(instant)
}

/// The first full hour strictly after `now`
pub fn next_full_hour(now: DateTime<Utc>) -> DateTime<Utc> {
    truncate_to_hour(now) + TimeDelta::hours(1)
}

/// Interpret an offset-less wall-clock time as reference-zone local time
pub fn from_reference_local(naive: NaiveDateTime) -> Option<DateTime<Utc>> {
    REFERENCE_TZ
        .from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
}
