// HTTP source adapters for the telemetry and prediction services
use crate::application::sample_source::{FetchFailure, FetchRequest, SampleSource, SourceSet};
use crate::domain::telemetry::RawSample;
use crate::domain::time;
use crate::infrastructure::config::{AppConfig, ParameterBindings, prepare_url};
use crate::infrastructure::payload::{parse_forecast_envelope, parse_sample_array};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TelemetryWindow {
    /// Rolling window ending now
    Live { hours: u32 },
    /// The whole of yesterday in the reference zone
    Yesterday,
}

/// Sensor tag history, `[{timestamp, value}]`
#[derive(Debug, Clone)]
pub struct TelemetrySource {
    client: reqwest::Client,
    url_template: String,
    window: TelemetryWindow,
    bindings: ParameterBindings,
}

impl TelemetrySource {
    pub fn new(
        client: reqwest::Client,
        url_template: String,
        window: TelemetryWindow,
        bindings: ParameterBindings,
    ) -> Self {
        Self {
            client,
            url_template,
            window,
            bindings,
        }
    }

    fn build_url(&self, request: &FetchRequest) -> String {
        let mut vars = HashMap::new();
        vars.insert("tag", self.bindings.get(request.parameter).tag.clone());
        match self.window {
            TelemetryWindow::Live { hours } => {
                vars.insert("hours", hours.to_string());
            }
            TelemetryWindow::Yesterday => {
                vars.insert("date", yesterday_param(request));
            }
        }
        prepare_url(&self.url_template, &vars)
    }
}

#[async_trait]
impl SampleSource for TelemetrySource {
    async fn fetch(&self, request: &FetchRequest) -> Result<Vec<RawSample>, FetchFailure> {
        let body = get_json(&self.client, &self.build_url(request)).await?;
        parse_sample_array(&body)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PredictionKind {
    /// What the model predicted for yesterday, `[{timestamp, value}]`
    History,
    /// The forward horizon, `{predictions, historicalData}`
    Horizon,
}

#[derive(Debug, Clone)]
pub struct PredictionSource {
    client: reqwest::Client,
    url_template: String,
    kind: PredictionKind,
    bindings: ParameterBindings,
}

impl PredictionSource {
    pub fn new(
        client: reqwest::Client,
        url_template: String,
        kind: PredictionKind,
        bindings: ParameterBindings,
    ) -> Self {
        Self {
            client,
            url_template,
            kind,
            bindings,
        }
    }

    fn build_url(&self, request: &FetchRequest) -> String {
        let mut vars = HashMap::new();
        vars.insert("model", self.bindings.get(request.parameter).model.clone());
        match self.kind {
            PredictionKind::History => {
                vars.insert("date", yesterday_param(request));
            }
            PredictionKind::Horizon => {
                vars.insert("hours", request.horizon_hours().to_string());
            }
        }
        prepare_url(&self.url_template, &vars)
    }
}

#[async_trait]
impl SampleSource for PredictionSource {
    async fn fetch(&self, request: &FetchRequest) -> Result<Vec<RawSample>, FetchFailure> {
        let body = get_json(&self.client, &self.build_url(request)).await?;
        match self.kind {
            PredictionKind::History => parse_sample_array(&body),
            PredictionKind::Horizon => {
                let envelope = parse_forecast_envelope(&body)?;
                tracing::debug!(
                    "{} forecast: {} predictions, {} historical points",
                    request.parameter,
                    envelope.predictions.len(),
                    envelope.historical_data.len()
                );
                Ok(envelope.predictions)
            }
        }
    }
}

/// Wire the four HTTP adapters from configuration
pub fn http_source_set(config: &AppConfig, client: reqwest::Client) -> SourceSet {
    let bindings = config.parameters.clone();

    SourceSet {
        live: Arc::new(TelemetrySource::new(
            client.clone(),
            config.telemetry.live_url.clone(),
            TelemetryWindow::Live {
                hours: config.telemetry.live_window_hours,
            },
            bindings.clone(),
        )),
        yesterday_actual: Arc::new(TelemetrySource::new(
            client.clone(),
            config.telemetry.daily_url.clone(),
            TelemetryWindow::Yesterday,
            bindings.clone(),
        )),
        yesterday_predicted: Arc::new(PredictionSource::new(
            client.clone(),
            config.forecast.history_url.clone(),
            PredictionKind::History,
            bindings.clone(),
        )),
        forecast: Arc::new(PredictionSource::new(
            client,
            config.forecast.predict_url.clone(),
            PredictionKind::Horizon,
            bindings,
        )),
    }
}

fn yesterday_param(request: &FetchRequest) -> String {
    time::yesterday(request.now).format("%Y-%m-%d").to_string()
}

async fn get_json(client: &reqwest::Client, url: &str) -> Result<Value, FetchFailure> {
    tracing::debug!("GET {}", url);

    let response = client
        .get(url)
        .header("Accept", "application/json")
        .send()
        .await
        .map_err(|e| FetchFailure::Transport(format!("request to {} failed: {}", url, e)))?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(FetchFailure::Transport(format!(
            "{} returned {}: {}",
            url,
            status,
            body.chars().take(200).collect::<String>()
        )));
    }

    let text = response
        .text()
        .await
        .map_err(|e| FetchFailure::Transport(format!("reading body from {} failed: {}", url, e)))?;

    serde_json::from_str(&text).map_err(|e| FetchFailure::Shape(format!("invalid JSON: {}", e)))
}
