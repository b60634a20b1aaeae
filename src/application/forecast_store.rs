// Aggregate store - owns every ParameterState and is the only thing that mutates them
use crate::application::clock::Clock;
use crate::application::parameter_state::{
    ParameterState, RawSources, lacks_prediction_history,
};
use crate::application::sample_source::{
    FetchFailure, FetchRequest, PerSource, SampleSource, SourceKind, SourceSet,
};
use crate::domain::accuracy::compute_accuracy;
use crate::domain::hourly::build_hourly;
use crate::domain::parameter::Parameter;
use crate::domain::reconcile::{DEFAULT_HORIZON_DAYS, reconcile};
use crate::domain::telemetry::RawSample;
use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared, join_all};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{RwLock, broadcast};
use tracing::{debug, error, info, warn};

const UPDATE_CHANNEL_CAPACITY: usize = 64;

pub const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Retry with exponential backoff, applied to transport failures only
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub multiplier: f64,
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::ZERO,
            multiplier: 1.0,
        }
    }

    /// Delay before attempt `attempt + 1`, never longer than `MAX_BACKOFF`
    pub fn backoff(&self, attempt: u32) -> Duration {
        if self.initial_backoff.is_zero() {
            return Duration::ZERO;
        }
        let exponent = attempt.saturating_sub(1).min(16) as i32;
        let secs = self.initial_backoff.as_secs_f64() * self.multiplier.max(1.0).powi(exponent);
        Duration::try_from_secs_f64(secs)
            .map(|delay| delay.min(MAX_BACKOFF))
            .unwrap_or(MAX_BACKOFF)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            multiplier: 2.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StoreSettings {
    pub horizon_days: u32,
    pub fetch_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            horizon_days: DEFAULT_HORIZON_DAYS,
            fetch_timeout: Duration::from_secs(15),
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum RefreshOutcome {
    /// All four sources succeeded and a new snapshot was committed
    Refreshed { generation: u64 },
    /// At least one source failed; the previous snapshot was kept
    Failed { failed: Vec<SourceKind> },
    /// The refresh task died before committing
    Aborted { reason: String },
}

type SharedRefresh = Shared<BoxFuture<'static, RefreshOutcome>>;

struct InFlight {
    id: u64,
    refresh: SharedRefresh,
}

#[derive(Clone)]
pub struct ForecastStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    sources: SourceSet,
    settings: StoreSettings,
    clock: Arc<dyn Clock>,
    states: RwLock<HashMap<Parameter, Arc<ParameterState>>>,
    in_flight: Mutex<HashMap<Parameter, InFlight>>,
    updates: broadcast::Sender<Arc<ParameterState>>,
    generation: AtomicU64,
    next_refresh_id: AtomicU64,
}

impl ForecastStore {
    pub fn new(sources: SourceSet, settings: StoreSettings, clock: Arc<dyn Clock>) -> Self {
        let states = Parameter::ALL
            .into_iter()
            .map(|p| (p, Arc::new(ParameterState::empty(p))))
            .collect();
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);

        Self {
            inner: Arc::new(StoreInner {
                sources,
                settings,
                clock,
                states: RwLock::new(states),
                in_flight: Mutex::new(HashMap::new()),
                updates,
                generation: AtomicU64::new(0),
                next_refresh_id: AtomicU64::new(0),
            }),
        }
    }

    pub fn settings(&self) -> &StoreSettings {
        &self.inner.settings
    }

    /// Current snapshot for one parameter
    pub async fn snapshot(&self, parameter: Parameter) -> Arc<ParameterState> {
        let states = self.inner.states.read().await;
        states
            .get(&parameter)
            .cloned()
            .unwrap_or_else(|| Arc::new(ParameterState::empty(parameter)))
    }

    /// Snapshots for every parameter, in `Parameter::ALL` order
    pub async fn snapshots(&self) -> Vec<Arc<ParameterState>> {
        let states = self.inner.states.read().await;
        Parameter::ALL
            .iter()
            .map(|p| {
                states
                    .get(p)
                    .cloned()
                    .unwrap_or_else(|| Arc::new(ParameterState::empty(*p)))
            })
            .collect()
    }

    /// Every state transition is published here after it is committed
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<ParameterState>> {
        self.inner.updates.subscribe()
    }

    /// Refresh one parameter, or join the refresh already running for it
    pub async fn refresh(&self, parameter: Parameter) -> RefreshOutcome {
        self.join_or_start(parameter).await
    }

    /// Refresh all parameters concurrently; a failure in one never affects the others
    pub async fn refresh_all(&self) -> Vec<(Parameter, RefreshOutcome)> {
        let refreshes = Parameter::ALL
            .into_iter()
            .map(|p| async move { (p, self.refresh(p).await) });
        join_all(refreshes).await
    }

    fn join_or_start(&self, parameter: Parameter) -> SharedRefresh {
        let mut in_flight = self
            .inner
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if let Some(existing) = in_flight.get(&parameter) {
            debug!("{}: joining refresh already in flight", parameter);
            return existing.refresh.clone();
        }

        let id = self.inner.next_refresh_id.fetch_add(1, Ordering::Relaxed);

        // Spawned: the commit happens even if every caller is dropped.
        let task = tokio::spawn({
            let inner = self.inner.clone();
            async move {
                let outcome = inner.run_refresh(parameter).await;
                inner.finish(parameter, id);
                outcome
            }
        });

        let inner = self.inner.clone();
        let refresh = async move {
            match task.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!("{}: refresh task aborted: {}", parameter, e);
                    inner.finish(parameter, id);
                    inner
                        .update(parameter, |state| ParameterState {
                            source_loading: PerSource::default(),
                            ..state.clone()
                        })
                        .await;
                    RefreshOutcome::Aborted {
                        reason: e.to_string(),
                    }
                }
            }
        }
        .boxed()
        .shared();

        in_flight.insert(
            parameter,
            InFlight {
                id,
                refresh: refresh.clone(),
            },
        );
        refresh
    }
}

impl StoreInner {
    async fn run_refresh(&self, parameter: Parameter) -> RefreshOutcome {
        let now = self.clock.now();
        let request = FetchRequest::new(parameter, now, self.settings.horizon_days);

        self.update(parameter, ParameterState::with_loading).await;

        // Fan out, then wait for every source to settle before touching the series.
        let (live, yesterday_actual, yesterday_predicted, forecast) = tokio::join!(
            self.fetch_and_settle(SourceKind::Live, &request),
            self.fetch_and_settle(SourceKind::YesterdayActual, &request),
            self.fetch_and_settle(SourceKind::YesterdayPredicted, &request),
            self.fetch_and_settle(SourceKind::Forecast, &request),
        );

        match partition(PerSource {
            live,
            yesterday_actual,
            yesterday_predicted,
            forecast,
        }) {
            Ok(raw) => self.commit_success(parameter, now, raw).await,
            Err(failures) => self.commit_failure(parameter, failures).await,
        }
    }

    /// Fetch one source, then clear its loading flag
    async fn fetch_and_settle(
        &self,
        kind: SourceKind,
        request: &FetchRequest,
    ) -> Result<Vec<RawSample>, FetchFailure> {
        let result = self.fetch_source(kind, request).await;
        self.update(request.parameter, |state| state.with_source_settled(kind))
            .await;
        result
    }

    async fn fetch_source(
        &self,
        kind: SourceKind,
        request: &FetchRequest,
    ) -> Result<Vec<RawSample>, FetchFailure> {
        let source: &Arc<dyn SampleSource> = self.sources.get(kind);
        let retry = &self.settings.retry;
        let timeout = self.settings.fetch_timeout;
        let mut attempt = 1;

        loop {
            let result = match tokio::time::timeout(timeout, source.fetch(request)).await {
                Ok(result) => result,
                Err(_) => Err(FetchFailure::Transport(format!(
                    "timed out after {}ms",
                    timeout.as_millis()
                ))),
            };

            match result {
                Ok(samples) => {
                    debug!(
                        "{} {}: {} samples (attempt {})",
                        request.parameter,
                        kind,
                        samples.len(),
                        attempt
                    );
                    return Ok(samples);
                }
                Err(failure) if failure.is_transport() && attempt < retry.max_attempts => {
                    let delay = retry.backoff(attempt);
                    warn!(
                        "{} {}: {} (attempt {}/{}), retrying in {}ms",
                        request.parameter,
                        kind,
                        failure,
                        attempt,
                        retry.max_attempts,
                        delay.as_millis()
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(failure) => {
                    warn!("{} {}: {}", request.parameter, kind, failure);
                    return Err(failure);
                }
            }
        }
    }

    async fn commit_success(
        &self,
        parameter: Parameter,
        now: DateTime<Utc>,
        raw: RawSources,
    ) -> RefreshOutcome {
        let actual = build_hourly(&raw.yesterday_actual, parameter, None, now);
        let predicted = build_hourly(&raw.yesterday_predicted, parameter, Some(actual.date()), now);
        let series = reconcile(
            parameter,
            &actual,
            &predicted,
            &raw.forecast,
            self.settings.horizon_days,
            now,
        );
        let accuracy = compute_accuracy(&series);

        if lacks_prediction_history(&series) {
            warn!("{}: no prediction history for {}", parameter, actual.date());
        }

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        info!(
            "{}: generation {} committed ({} points, accuracy {:.2}% over {} hours)",
            parameter,
            generation,
            series.len(),
            accuracy.accuracy_percent,
            accuracy.sample_count
        );

        self.update(parameter, |state| {
            state.refreshed(generation, now, series, accuracy, raw)
        })
        .await;

        RefreshOutcome::Refreshed { generation }
    }

    async fn commit_failure(
        &self,
        parameter: Parameter,
        failures: PerSource<Option<FetchFailure>>,
    ) -> RefreshOutcome {
        let failed: Vec<SourceKind> = SourceKind::ALL
            .into_iter()
            .filter(|kind| failures.get(*kind).is_some())
            .collect();

        let kept = self
            .update(parameter, |state| state.failed(&failures))
            .await;
        warn!(
            "{}: refresh failed for {:?}; keeping generation {}",
            parameter, failed, kept.generation
        );

        RefreshOutcome::Failed { failed }
    }

    /// Swap in a whole new snapshot for `parameter` and publish it
    async fn update(
        &self,
        parameter: Parameter,
        next: impl FnOnce(&ParameterState) -> ParameterState,
    ) -> Arc<ParameterState> {
        let next = {
            let mut states = self.states.write().await;
            let current = states
                .get(&parameter)
                .cloned()
                .unwrap_or_else(|| Arc::new(ParameterState::empty(parameter)));
            let next = Arc::new(next(current.as_ref()));
            states.insert(parameter, next.clone());
            next
        };

        // No subscribers is not an error
        let _ = self.updates.send(next.clone());
        next
    }

    fn finish(&self, parameter: Parameter, id: u64) {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if in_flight.get(&parameter).is_some_and(|entry| entry.id == id) {
            in_flight.remove(&parameter);
        }
    }
}

/// Either every source succeeded, or the per-source failures
fn partition(
    results: PerSource<Result<Vec<RawSample>, FetchFailure>>,
) -> Result<RawSources, PerSource<Option<FetchFailure>>> {
    match results {
        PerSource {
            live: Ok(live),
            yesterday_actual: Ok(yesterday_actual),
            yesterday_predicted: Ok(yesterday_predicted),
            forecast: Ok(forecast),
        } => Ok(PerSource {
            live,
            yesterday_actual,
            yesterday_predicted,
            forecast,
        }),
        other => Err(PerSource {
            live: other.live.err(),
            yesterday_actual: other.yesterday_actual.err(),
            yesterday_predicted: other.yesterday_predicted.err(),
            forecast: other.forecast.err(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::clock::FixedClock;
    use crate::application::parameter_state::EMPTY_HISTORY_WARNING;
    use crate::domain::time;
    use async_trait::async_trait;
    use chrono::TimeDelta;
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use tokio::sync::watch;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-03-11T03:20:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn yesterday_samples(value: f64) -> Vec<RawSample> {
        let day = time::yesterday(now());
        (0..24)
            .map(|h| RawSample::new(time::hour_start(day, h), value + h as f64))
            .collect()
    }

    fn forecast_samples() -> Vec<RawSample> {
        let start = time::next_full_hour(now());
        (0..168)
            .map(|h| RawSample::new(start + TimeDelta::hours(h), 7.0))
            .collect()
    }

    /// Returns a canned result; can be switched into a transport failure
    struct StaticSource {
        samples: Vec<RawSample>,
        failing: AtomicBool,
        calls: AtomicUsize,
    }

    impl StaticSource {
        fn new(samples: Vec<RawSample>) -> Arc<Self> {
            Arc::new(Self {
                samples,
                failing: AtomicBool::new(false),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl SampleSource for StaticSource {
        async fn fetch(&self, _request: &FetchRequest) -> Result<Vec<RawSample>, FetchFailure> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failing.load(Ordering::SeqCst) {
                return Err(FetchFailure::Transport("connection refused".to_string()));
            }
            Ok(self.samples.clone())
        }
    }

    /// Fails the first `failures` calls with the given failure
    struct FlakySource {
        failures: usize,
        failure: FetchFailure,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl SampleSource for FlakySource {
        async fn fetch(&self, _request: &FetchRequest) -> Result<Vec<RawSample>, FetchFailure> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                Err(self.failure.clone())
            } else {
                Ok(yesterday_samples(1.0))
            }
        }
    }

    /// Blocks until the gate is opened
    struct GatedSource {
        gate: watch::Sender<bool>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl SampleSource for GatedSource {
        async fn fetch(&self, _request: &FetchRequest) -> Result<Vec<RawSample>, FetchFailure> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut open = self.gate.subscribe();
            open.wait_for(|open| *open)
                .await
                .map_err(|e| FetchFailure::Transport(e.to_string()))?;
            Ok(Vec::new())
        }
    }

    /// Healthy for every parameter except one, which fails while `down` is set
    struct DownForParameter {
        parameter: Parameter,
        down: Arc<AtomicBool>,
        samples: Vec<RawSample>,
    }

    #[async_trait]
    impl SampleSource for DownForParameter {
        async fn fetch(&self, request: &FetchRequest) -> Result<Vec<RawSample>, FetchFailure> {
            if request.parameter == self.parameter && self.down.load(Ordering::SeqCst) {
                return Err(FetchFailure::Transport("502 bad gateway".to_string()));
            }
            Ok(self.samples.clone())
        }
    }

    struct SlowSource;

    #[async_trait]
    impl SampleSource for SlowSource {
        async fn fetch(&self, _request: &FetchRequest) -> Result<Vec<RawSample>, FetchFailure> {
            tokio::time::sleep(Duration::from_millis(500)).await;
            Ok(Vec::new())
        }
    }

    fn settings() -> StoreSettings {
        StoreSettings {
            horizon_days: 7,
            fetch_timeout: Duration::from_secs(5),
            retry: RetryPolicy::none(),
        }
    }

    fn store_with(
        live: Arc<dyn SampleSource>,
        yesterday_actual: Arc<dyn SampleSource>,
        yesterday_predicted: Arc<dyn SampleSource>,
        forecast: Arc<dyn SampleSource>,
        settings: StoreSettings,
    ) -> ForecastStore {
        ForecastStore::new(
            SourceSet {
                live,
                yesterday_actual,
                yesterday_predicted,
                forecast,
            },
            settings,
            Arc::new(FixedClock(now())),
        )
    }

    fn healthy_store() -> ForecastStore {
        store_with(
            StaticSource::new(yesterday_samples(0.0)),
            StaticSource::new(yesterday_samples(10.0)),
            StaticSource::new(yesterday_samples(10.0)),
            StaticSource::new(forecast_samples()),
            settings(),
        )
    }

    #[tokio::test]
    async fn test_starts_empty() {
        let store = healthy_store();
        let states = store.snapshots().await;
        assert_eq!(states.len(), 4);
        assert!(states.iter().all(|s| s.series.is_none() && s.generation == 0));
    }

    #[tokio::test]
    async fn test_successful_refresh_commits_everything() {
        let store = healthy_store();
        let outcome = store.refresh(Parameter::Outflow).await;
        assert_eq!(outcome, RefreshOutcome::Refreshed { generation: 1 });

        let state = store.snapshot(Parameter::Outflow).await;
        let series = state.series.as_ref().unwrap();
        assert_eq!(series.len(), 24 + 168);
        assert_eq!(state.accuracy.unwrap().accuracy_percent, 100.0);
        assert_eq!(state.accuracy.unwrap().sample_count, 24);
        assert!(!state.is_loading());
        assert!(!state.has_errors());
        assert_eq!(state.history_warning, None);
        assert_eq!(state.raw.forecast.len(), 168);

        // Other parameters are untouched
        assert!(store.snapshot(Parameter::Level).await.series.is_none());
    }

    #[tokio::test]
    async fn test_failed_source_keeps_previous_series() {
        let yesterday_actual = StaticSource::new(yesterday_samples(10.0));
        let store = store_with(
            StaticSource::new(yesterday_samples(0.0)),
            yesterday_actual.clone(),
            StaticSource::new(yesterday_samples(10.0)),
            StaticSource::new(forecast_samples()),
            settings(),
        );

        store.refresh(Parameter::Level).await;
        let before = store.snapshot(Parameter::Level).await;

        yesterday_actual.failing.store(true, Ordering::SeqCst);
        let outcome = store.refresh(Parameter::Level).await;
        assert_eq!(
            outcome,
            RefreshOutcome::Failed {
                failed: vec![SourceKind::YesterdayActual]
            }
        );

        let after = store.snapshot(Parameter::Level).await;
        assert_eq!(after.generation, before.generation);
        assert_eq!(after.series, before.series);
        assert_eq!(after.accuracy, before.accuracy);
        assert!(Arc::ptr_eq(&after.raw, &before.raw));
        assert!(after.source_error.yesterday_actual.is_some());
        assert_eq!(after.source_error.forecast, None);
        assert!(!after.is_loading());

        // Recovery clears the error and moves to a new generation
        yesterday_actual.failing.store(false, Ordering::SeqCst);
        store.refresh(Parameter::Level).await;
        let recovered = store.snapshot(Parameter::Level).await;
        assert!(recovered.generation > before.generation);
        assert!(!recovered.has_errors());
    }

    #[tokio::test]
    async fn test_empty_prediction_history_is_a_warning_not_an_error() {
        let store = store_with(
            StaticSource::new(Vec::new()),
            StaticSource::new(yesterday_samples(10.0)),
            StaticSource::new(Vec::new()),
            StaticSource::new(forecast_samples()),
            settings(),
        );

        let outcome = store.refresh(Parameter::Inflow).await;
        assert!(matches!(outcome, RefreshOutcome::Refreshed { .. }));

        let state = store.snapshot(Parameter::Inflow).await;
        assert!(!state.has_errors());
        assert_eq!(state.history_warning.as_deref(), Some(EMPTY_HISTORY_WARNING));
        assert_eq!(state.accuracy.unwrap().sample_count, 0);
        let series = state.series.as_ref().unwrap();
        assert!(series.yesterday_points().all(|p| p.predicted_value.is_none()));
    }

    #[tokio::test]
    async fn test_transport_failures_are_retried() {
        let flaky = Arc::new(FlakySource {
            failures: 2,
            failure: FetchFailure::Transport("503".to_string()),
            calls: AtomicUsize::new(0),
        });
        let mut settings = settings();
        settings.retry = RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(1),
            multiplier: 2.0,
        };
        let store = store_with(
            StaticSource::new(Vec::new()),
            flaky.clone(),
            StaticSource::new(yesterday_samples(1.0)),
            StaticSource::new(forecast_samples()),
            settings,
        );

        let outcome = store.refresh(Parameter::Load).await;
        assert!(matches!(outcome, RefreshOutcome::Refreshed { .. }));
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_shape_failures_are_not_retried() {
        let flaky = Arc::new(FlakySource {
            failures: 1,
            failure: FetchFailure::Shape("expected an array".to_string()),
            calls: AtomicUsize::new(0),
        });
        let mut settings = settings();
        settings.retry.max_attempts = 5;
        settings.retry.initial_backoff = Duration::from_millis(1);
        let store = store_with(
            StaticSource::new(Vec::new()),
            StaticSource::new(yesterday_samples(1.0)),
            StaticSource::new(yesterday_samples(1.0)),
            flaky.clone(),
            settings,
        );

        let outcome = store.refresh(Parameter::Load).await;
        assert_eq!(
            outcome,
            RefreshOutcome::Failed {
                failed: vec![SourceKind::Forecast]
            }
        );
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_timeout_is_a_transport_failure() {
        let mut settings = settings();
        settings.fetch_timeout = Duration::from_millis(20);
        let store = store_with(
            Arc::new(SlowSource),
            StaticSource::new(yesterday_samples(1.0)),
            StaticSource::new(yesterday_samples(1.0)),
            StaticSource::new(forecast_samples()),
            settings,
        );

        store.refresh(Parameter::Outflow).await;
        let state = store.snapshot(Parameter::Outflow).await;
        let error = state.source_error.live.as_deref().unwrap();
        assert!(error.starts_with("transport failure: timed out"));
        assert!(state.series.is_none());
    }

    #[tokio::test]
    async fn test_concurrent_refresh_joins_in_flight() {
        let (gate, _) = watch::channel(false);
        let live = Arc::new(GatedSource {
            gate,
            calls: AtomicUsize::new(0),
        });
        let store = store_with(
            live.clone(),
            StaticSource::new(yesterday_samples(1.0)),
            StaticSource::new(yesterday_samples(1.0)),
            StaticSource::new(forecast_samples()),
            settings(),
        );

        let first = tokio::spawn({
            let store = store.clone();
            async move { store.refresh(Parameter::Load).await }
        });
        while live.calls.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
        let second = tokio::spawn({
            let store = store.clone();
            async move { store.refresh(Parameter::Load).await }
        });
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        let waiting = store.snapshot(Parameter::Load).await;
        assert!(waiting.is_loading());
        assert!(waiting.source_loading.live);
        assert!(!waiting.source_loading.yesterday_actual);
        assert!(!waiting.source_loading.forecast);

        live.gate.send_replace(true);
        let first = first.await.unwrap();
        let second = second.await.unwrap();

        assert_eq!(first, second);
        assert_eq!(live.calls.load(Ordering::SeqCst), 1);

        // Once settled, a new call starts a fresh refresh
        store.refresh(Parameter::Load).await;
        assert_eq!(live.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_refresh_all_covers_every_parameter() {
        let forecast = StaticSource::new(forecast_samples());
        let store = store_with(
            StaticSource::new(Vec::new()),
            StaticSource::new(yesterday_samples(1.0)),
            StaticSource::new(yesterday_samples(1.0)),
            forecast.clone(),
            settings(),
        );

        let outcomes = store.refresh_all().await;
        assert_eq!(outcomes.len(), 4);
        assert!(outcomes
            .iter()
            .all(|(_, o)| matches!(o, RefreshOutcome::Refreshed { .. })));
        assert_eq!(forecast.calls(), 4);

        let generations: Vec<u64> = store.snapshots().await.iter().map(|s| s.generation).collect();
        let mut unique = generations.clone();
        unique.sort_unstable();
        unique.dedup();
        assert_eq!(unique.len(), 4);
    }

    #[tokio::test]
    async fn test_refresh_all_isolates_failures() {
        let down = Arc::new(AtomicBool::new(false));
        let source = |samples: Vec<RawSample>| -> Arc<dyn SampleSource> {
            Arc::new(DownForParameter {
                parameter: Parameter::Level,
                down: down.clone(),
                samples,
            })
        };
        let store = store_with(
            source(Vec::new()),
            source(yesterday_samples(1.0)),
            source(yesterday_samples(1.0)),
            source(forecast_samples()),
            settings(),
        );

        store.refresh_all().await;
        let before = store.snapshots().await;
        assert!(before.iter().all(|s| s.series.is_some()));

        down.store(true, Ordering::SeqCst);
        let outcomes = store.refresh_all().await;

        for ((parameter, outcome), previous) in outcomes.iter().zip(&before) {
            let current = store.snapshot(*parameter).await;
            if *parameter == Parameter::Level {
                assert_eq!(
                    *outcome,
                    RefreshOutcome::Failed {
                        failed: SourceKind::ALL.to_vec()
                    }
                );
                assert_eq!(current.generation, previous.generation);
                assert_eq!(current.series, previous.series);
                assert!(current.has_errors());
            } else {
                assert!(matches!(outcome, RefreshOutcome::Refreshed { .. }));
                assert!(current.generation > previous.generation);
                assert!(!current.has_errors());
            }
            assert!(!current.is_loading());
        }
    }

    #[tokio::test]
    async fn test_all_absent_predictions_count_as_empty_history() {
        let day = time::yesterday(now());
        let unreadable: Vec<RawSample> = (0..24)
            .map(|h| RawSample::absent(time::hour_start(day, h)))
            .collect();
        let store = store_with(
            StaticSource::new(Vec::new()),
            StaticSource::new(yesterday_samples(10.0)),
            StaticSource::new(unreadable),
            StaticSource::new(forecast_samples()),
            settings(),
        );

        store.refresh(Parameter::Outflow).await;
        let state = store.snapshot(Parameter::Outflow).await;
        assert_eq!(state.history_warning.as_deref(), Some(EMPTY_HISTORY_WARNING));
        assert_eq!(state.raw.yesterday_predicted.len(), 24);
        assert_eq!(state.accuracy.unwrap().sample_count, 0);
    }

    #[tokio::test]
    async fn test_subscribers_see_committed_states() {
        let store = healthy_store();
        let mut updates = store.subscribe();

        store.refresh(Parameter::Inflow).await;

        let loading = updates.recv().await.unwrap();
        assert!(SourceKind::ALL.iter().all(|kind| *loading.source_loading.get(*kind)));

        // One update per settled source, then the commit
        for _ in SourceKind::ALL {
            let settling = updates.recv().await.unwrap();
            assert_eq!(settling.generation, 0);
            assert!(settling.series.is_none());
        }
        let committed = updates.recv().await.unwrap();
        assert_eq!(committed.parameter, Parameter::Inflow);
        assert_eq!(committed.generation, 1);
        assert!(committed.series.is_some());
        assert!(!committed.is_loading());
    }

    #[test]
    fn test_backoff_grows_exponentially() {
        let policy = RetryPolicy {
            max_attempts: 4,
            initial_backoff: Duration::from_millis(100),
            multiplier: 2.0,
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(400));
    }

    #[test]
    fn test_backoff_is_capped_for_huge_multipliers() {
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(500),
            multiplier: 1e7,
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(500));
        assert_eq!(policy.backoff(2), MAX_BACKOFF);
        assert_eq!(policy.backoff(4), MAX_BACKOFF);
        assert_eq!(policy.backoff(u32::MAX), MAX_BACKOFF);

        let unbounded = RetryPolicy {
            multiplier: f64::INFINITY,
            ..policy
        };
        assert_eq!(unbounded.backoff(3), MAX_BACKOFF);
    }
}
