// Accuracy calculator - MAE / MAPE over the yesterday segment
use super::reconcile::ReconciledSeries;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccuracySummary {
    pub mean_absolute_error: f64,
    pub mape: f64,
    pub accuracy_percent: f64,
    pub sample_count: usize,
}

/// Compare actual and predicted values for yesterday's hours.
///
/// Only hours where both values are defined contribute. An actual of zero still counts
/// towards MAE and `sample_count` but is left out of the percentage average.
pub fn compute_accuracy(series: &ReconciledSeries) -> AccuracySummary {
    let mut abs_error_sum = 0.0;
    let mut sample_count = 0usize;
    let mut pct_error_sum = 0.0;
    let mut pct_count = 0usize;

    for point in series.yesterday_points() {
        let (Some(actual), Some(predicted)) = (point.actual_value, point.predicted_value) else {
            continue;
        };

        let abs_error = (actual - predicted).abs();
        abs_error_sum += abs_error;
        sample_count += 1;

        if actual != 0.0 {
            pct_error_sum += abs_error / actual.abs() * 100.0;
            pct_count += 1;
        }
    }

    let mean_absolute_error = if sample_count > 0 {
        abs_error_sum / sample_count as f64
    } else {
        0.0
    };
    let mape = if pct_count > 0 {
        pct_error_sum / pct_count as f64
    } else {
        0.0
    };
    let accuracy_percent = (100.0 - mape).clamp(0.0, 100.0);

    AccuracySummary {
        mean_absolute_error: round2(mean_absolute_error),
        mape: round2(mape.clamp(0.0, 100.0)),
        accuracy_percent: round2(accuracy_percent),
        sample_count,
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
