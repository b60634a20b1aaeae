// Per-parameter cache entry exposed to chart/table/CSV consumers
use crate::application::sample_source::{FetchFailure, PerSource, SourceKind};
use crate::domain::accuracy::AccuracySummary;
use crate::domain::parameter::Parameter;
use crate::domain::reconcile::ReconciledSeries;
use crate::domain::telemetry::RawSample;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

pub const EMPTY_HISTORY_WARNING: &str = "model has no prediction history for yesterday yet";

pub type RawSources = PerSource<Vec<RawSample>>;

/// Snapshot of everything known about one parameter.
///
/// `series`, `accuracy` and `raw` always come from the same refresh generation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterState {
    pub parameter: Parameter,
    pub generation: u64,
    pub refreshed_at: Option<DateTime<Utc>>,
    pub series: Option<Arc<ReconciledSeries>>,
    pub accuracy: Option<AccuracySummary>,
    pub raw: Arc<RawSources>,
    pub source_loading: PerSource<bool>,
    pub source_error: PerSource<Option<String>>,
    /// Set when yesterday's predictions succeeded but left every hour undefined
    pub history_warning: Option<String>,
}

impl ParameterState {
    pub fn empty(parameter: Parameter) -> Self {
        Self {
            parameter,
            generation: 0,
            refreshed_at: None,
            series: None,
            accuracy: None,
            raw: Arc::new(RawSources::default()),
            source_loading: PerSource::default(),
            source_error: PerSource::default(),
            history_warning: None,
        }
    }

    pub fn is_loading(&self) -> bool {
        SourceKind::ALL.iter().any(|kind| *self.source_loading.get(*kind))
    }

    pub fn has_errors(&self) -> bool {
        SourceKind::ALL
            .iter()
            .any(|kind| self.source_error.get(*kind).is_some())
    }

    pub(crate) fn with_loading(&self) -> Self {
        Self {
            source_loading: PerSource::splat(true),
            ..self.clone()
        }
    }

    /// One source's fetch has settled; the series stays untouched until commit
    pub(crate) fn with_source_settled(&self, kind: SourceKind) -> Self {
        let mut next = self.clone();
        *next.source_loading.get_mut(kind) = false;
        next
    }

    /// A fully replaced snapshot after all four sources succeeded
    pub(crate) fn refreshed(
        &self,
        generation: u64,
        refreshed_at: DateTime<Utc>,
        series: ReconciledSeries,
        accuracy: AccuracySummary,
        raw: RawSources,
    ) -> Self {
        let history_warning =
            lacks_prediction_history(&series).then(|| EMPTY_HISTORY_WARNING.to_string());

        Self {
            parameter: self.parameter,
            generation,
            refreshed_at: Some(refreshed_at),
            series: Some(Arc::new(series)),
            accuracy: Some(accuracy),
            raw: Arc::new(raw),
            source_loading: PerSource::default(),
            source_error: PerSource::default(),
            history_warning,
        }
    }

    /// Previous data kept intact, errors recorded for the sources that failed this time
    pub(crate) fn failed(&self, failures: &PerSource<Option<FetchFailure>>) -> Self {
        let mut next = Self {
            source_loading: PerSource::default(),
            ..self.clone()
        };
        for kind in SourceKind::ALL {
            *next.source_error.get_mut(kind) = failures.get(kind).as_ref().map(ToString::to_string);
        }
        next
    }
}

/// No yesterday hour carries a predicted value
pub(crate) fn lacks_prediction_history(series: &ReconciledSeries) -> bool {
    series.yesterday_points().all(|p| p.predicted_value.is_none())
}
