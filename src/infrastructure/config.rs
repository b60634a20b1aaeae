use crate::application::forecast_store::{RetryPolicy, StoreSettings};
use crate::domain::parameter::Parameter;
use crate::domain::reconcile::DEFAULT_HORIZON_DAYS;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub refresh: RefreshSettings,
    #[serde(default)]
    pub telemetry: TelemetrySettings,
    #[serde(default)]
    pub forecast: ForecastSettings,
    #[serde(default)]
    pub parameters: ParameterBindings,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerSettings {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RefreshSettings {
    #[serde(default = "default_period_secs")]
    pub period_secs: u64,
    #[serde(default = "default_horizon_days")]
    pub horizon_days: u32,
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

impl Default for RefreshSettings {
    fn default() -> Self {
        Self {
            period_secs: default_period_secs(),
            horizon_days: default_horizon_days(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

impl RefreshSettings {
    pub fn period(&self) -> Duration {
        Duration::from_secs(self.period_secs.max(1))
    }

    /// Fails on a backoff multiplier that is not a finite number >= 1
    pub fn store_settings(&self) -> anyhow::Result<StoreSettings> {
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            anyhow::bail!(
                "refresh.backoff_multiplier must be a finite number >= 1, got {}",
                self.backoff_multiplier
            );
        }

        Ok(StoreSettings {
            horizon_days: self.horizon_days,
            fetch_timeout: Duration::from_secs(self.fetch_timeout_secs),
            retry: RetryPolicy {
                max_attempts: self.max_attempts.max(1),
                initial_backoff: Duration::from_millis(self.initial_backoff_ms),
                multiplier: self.backoff_multiplier,
            },
        })
    }
}

/// URL templates for the sensor/telemetry service.
/// `${tag}`, `${hours}` and `${date}` are substituted per request.
#[derive(Debug, Deserialize, Clone)]
pub struct TelemetrySettings {
    #[serde(default = "default_live_url")]
    pub live_url: String,
    #[serde(default = "default_daily_url")]
    pub daily_url: String,
    #[serde(default = "default_live_window_hours")]
    pub live_window_hours: u32,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            live_url: default_live_url(),
            daily_url: default_daily_url(),
            live_window_hours: default_live_window_hours(),
        }
    }
}

/// URL templates for the prediction service.
/// `${model}`, `${hours}` and `${date}` are substituted per request.
#[derive(Debug, Deserialize, Clone)]
pub struct ForecastSettings {
    #[serde(default = "default_history_url")]
    pub history_url: String,
    #[serde(default = "default_predict_url")]
    pub predict_url: String,
}

impl Default for ForecastSettings {
    fn default() -> Self {
        Self {
            history_url: default_history_url(),
            predict_url: default_predict_url(),
        }
    }
}

/// Upstream identifiers for one parameter
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct SourceBinding {
    pub tag: String,
    pub model: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ParameterBindings {
    #[serde(default = "default_inflow")]
    pub inflow: SourceBinding,
    #[serde(default = "default_outflow")]
    pub outflow: SourceBinding,
    #[serde(default = "default_level")]
    pub level: SourceBinding,
    #[serde(default = "default_load")]
    pub load: SourceBinding,
}

impl Default for ParameterBindings {
    fn default() -> Self {
        Self {
            inflow: default_inflow(),
            outflow: default_outflow(),
            level: default_level(),
            load: default_load(),
        }
    }
}

impl ParameterBindings {
    pub fn get(&self, parameter: Parameter) -> &SourceBinding {
        match parameter {
            Parameter::Inflow => &self.inflow,
            Parameter::Outflow => &self.outflow,
            Parameter::Level => &self.level,
            Parameter::Load => &self.load,
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_period_secs() -> u64 {
    300
}

fn default_horizon_days() -> u32 {
    DEFAULT_HORIZON_DAYS
}

fn default_fetch_timeout_secs() -> u64 {
    15
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    500
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_live_url() -> String {
    "http://localhost:9000/api/tags/${tag}/history?hours=${hours}".to_string()
}

fn default_daily_url() -> String {
    "http://localhost:9000/api/tags/${tag}/daily?date=${date}".to_string()
}

fn default_live_window_hours() -> u32 {
    6
}

fn default_history_url() -> String {
    "http://localhost:9100/api/models/${model}/history?date=${date}".to_string()
}

fn default_predict_url() -> String {
    "http://localhost:9100/api/models/${model}/predict?hours=${hours}".to_string()
}

fn binding(tag: &str, model: &str) -> SourceBinding {
    SourceBinding {
        tag: tag.to_string(),
        model: model.to_string(),
    }
}

fn default_inflow() -> SourceBinding {
    binding("INFLOW", "inflow")
}

fn default_outflow() -> SourceBinding {
    binding("OUTFLOW", "outflow")
}

fn default_level() -> SourceBinding {
    binding("TMA", "level")
}

fn default_load() -> SourceBinding {
    binding("LOAD_MW", "load")
}

/// `config/forecast.{toml,yaml,json}` if present,
/// then `FORECAST__SECTION__KEY` environment overrides
pub fn load_app_config() -> anyhow::Result<AppConfig> {
    let settings = config::Config::builder()
        .add_source(config::File::with_name("config/forecast").required(false))
        .add_source(
            config::Environment::with_prefix("FORECAST")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    Ok(settings.try_deserialize()?)
}

/// Replace `${name}` placeholders in a URL template, URL-encoding each value
pub fn prepare_url(template: &str, vars: &HashMap<&str, String>) -> String {
    let mut result = template.to_string();
    for (key, value) in vars {
        let placeholder = format!("${{{}}}", key);
        result = result.replace(&placeholder, &urlencoding::encode(value));
    }
    result
}
