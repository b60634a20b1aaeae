// CSV export formatting - pure functions over a reconciled series
use crate::domain::accuracy::AccuracySummary;
use crate::domain::reconcile::{ReconciledSeries, Segment};
use crate::domain::time::REFERENCE_TZ;
use chrono::{DateTime, Utc};

/// Indonesian locale style, in the reference zone
const TIMESTAMP_FORMAT: &str = "%d/%m/%Y %H.%M";

pub fn format_timestamp(instant: DateTime<Utc>) -> String {
    instant
        .with_timezone(&REFERENCE_TZ)
        .format(TIMESTAMP_FORMAT)
        .to_string()
}

/// Two decimals, or an empty cell for an absent value
pub fn format_value(value: Option<f64>) -> String {
    value.map(|v| format!("{:.2}", v)).unwrap_or_default()
}

pub fn series_to_csv(series: &ReconciledSeries) -> anyhow::Result<Vec<u8>> {
    let unit = series.parameter.unit();
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record([
        "timestamp".to_string(),
        "segment".to_string(),
        format!("actual ({})", unit),
        format!("predicted ({})", unit),
        format!("forecast ({})", unit),
    ])?;

    for point in &series.points {
        let segment = match point.segment {
            Segment::Yesterday => "yesterday",
            Segment::Forecast => "forecast",
        };
        writer.write_record([
            format_timestamp(point.timestamp),
            segment.to_string(),
            format_value(point.actual_value),
            format_value(point.predicted_value),
            format_value(point.future_value),
        ])?;
    }

    writer
        .into_inner()
        .map_err(|e| anyhow::anyhow!("flushing series CSV: {}", e.error()))
}

pub fn accuracy_to_csv(
    series: &ReconciledSeries,
    summary: &AccuracySummary,
) -> anyhow::Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record([
        "parameter",
        "mean absolute error",
        "mape (%)",
        "accuracy (%)",
        "samples",
    ])?;
    writer.write_record([
        series.parameter.label().to_string(),
        format_value(Some(summary.mean_absolute_error)),
        format_value(Some(summary.mape)),
        format_value(Some(summary.accuracy_percent)),
        summary.sample_count.to_string(),
    ])?;

    writer
        .into_inner()
        .map_err(|e| anyhow::anyhow!("flushing accuracy CSV: {}", e.error()))
}
