// Application state for HTTP handlers
use crate::application::forecast_store::ForecastStore;

#[derive(Clone)]
pub struct AppState {
    pub store: ForecastStore,
}
