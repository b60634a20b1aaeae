// Source adapter trait and per-source bookkeeping
use crate::domain::parameter::Parameter;
use crate::domain::telemetry::RawSample;
use crate::domain::time::HOURS_PER_DAY;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Why an adapter could not produce samples
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FetchFailure {
    /// The request did not complete (network error, timeout, non-success status)
    #[error("transport failure: {0}")]
    Transport(String),
    /// A response arrived but failed structural validation
    #[error("unexpected response shape: {0}")]
    Shape(String),
}

impl FetchFailure {
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SourceKind {
    Live,
    YesterdayActual,
    YesterdayPredicted,
    Forecast,
}

impl SourceKind {
    pub const ALL: [SourceKind; 4] = [
        SourceKind::Live,
        SourceKind::YesterdayActual,
        SourceKind::YesterdayPredicted,
        SourceKind::Forecast,
    ];
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Live => "live",
            Self::YesterdayActual => "yesterday-actual",
            Self::YesterdayPredicted => "yesterday-predicted",
            Self::Forecast => "forecast",
        };
        f.write_str(name)
    }
}

/// One value per source, in the shape consumers see for loading/error flags
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PerSource<T> {
    pub live: T,
    pub yesterday_actual: T,
    pub yesterday_predicted: T,
    pub forecast: T,
}

impl<T> PerSource<T> {
    pub fn get(&self, kind: SourceKind) -> &T {
        match kind {
            SourceKind::Live => &self.live,
            SourceKind::YesterdayActual => &self.yesterday_actual,
            SourceKind::YesterdayPredicted => &self.yesterday_predicted,
            SourceKind::Forecast => &self.forecast,
        }
    }

    pub fn get_mut(&mut self, kind: SourceKind) -> &mut T {
        match kind {
            SourceKind::Live => &mut self.live,
            SourceKind::YesterdayActual => &mut self.yesterday_actual,
            SourceKind::YesterdayPredicted => &mut self.yesterday_predicted,
            SourceKind::Forecast => &mut self.forecast,
        }
    }

    pub fn splat(value: T) -> Self
    where
        T: Clone,
    {
        Self {
            live: value.clone(),
            yesterday_actual: value.clone(),
            yesterday_predicted: value.clone(),
            forecast: value,
        }
    }
}

/// Everything an adapter needs to know about the refresh it is serving
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FetchRequest {
    pub parameter: Parameter,
    pub now: DateTime<Utc>,
    pub horizon_days: u32,
}

impl FetchRequest {
    pub fn new(parameter: Parameter, now: DateTime<Utc>, horizon_days: u32) -> Self {
        Self {
            parameter,
            now,
            horizon_days,
        }
    }

    /// Forecast services are always asked for whole days
    pub fn horizon_hours(&self) -> u32 {
        self.horizon_days * HOURS_PER_DAY as u32
    }
}

/// A single upstream feed. Adapters do not retry; the store owns retry and timeout.
#[async_trait]
pub trait SampleSource: Send + Sync {
    async fn fetch(&self, request: &FetchRequest) -> Result<Vec<RawSample>, FetchFailure>;
}

/// The four adapters the store fans out to on every refresh
#[derive(Clone)]
pub struct SourceSet {
    pub live: Arc<dyn SampleSource>,
    pub yesterday_actual: Arc<dyn SampleSource>,
    pub yesterday_predicted: Arc<dyn SampleSource>,
    pub forecast: Arc<dyn SampleSource>,
}

impl SourceSet {
    pub fn get(&self, kind: SourceKind) -> &Arc<dyn SampleSource> {
        match kind {
            SourceKind::Live => &self.live,
            SourceKind::YesterdayActual => &self.yesterday_actual,
            SourceKind::YesterdayPredicted => &self.yesterday_predicted,
            SourceKind::Forecast => &self.forecast,
        }
    }
}
