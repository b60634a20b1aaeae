// HTTP request handlers
use crate::domain::parameter::{DisplayRange, Parameter};
use crate::infrastructure::chunked_json::stream_from_receiver;
use crate::infrastructure::http_response::{
    CSV_CONTENT_TYPE, accepts_brotli, encoded_response, json_response,
};
use crate::presentation::app_state::AppState;
use crate::presentation::csv_export::{accuracy_to_csv, series_to_csv};
use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use std::sync::Arc;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterInfo {
    pub slug: &'static str,
    pub label: &'static str,
    pub unit: &'static str,
    pub display_range: Option<DisplayRange>,
}

/// Health check endpoint
pub async fn health_check() -> &'static str {
    "ok"
}

/// Static metadata for every parameter
pub async fn list_parameters(headers: HeaderMap) -> Response {
    let parameters: Vec<ParameterInfo> = Parameter::ALL
        .iter()
        .map(|p| ParameterInfo {
            slug: p.slug(),
            label: p.label(),
            unit: p.unit(),
            display_range: p.display_range(),
        })
        .collect();

    into_response(json_response(&parameters, accepts_brotli(&headers)).await)
}

/// Current snapshot of every parameter
pub async fn get_all_states(headers: HeaderMap, State(state): State<Arc<AppState>>) -> Response {
    let snapshots = state.store.snapshots().await;
    into_response(json_response(&snapshots, accepts_brotli(&headers)).await)
}

/// Current snapshot of one parameter
pub async fn get_state(
    Path(slug): Path<String>,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> Response {
    let parameter = match parse_parameter(&slug) {
        Ok(parameter) => parameter,
        Err(response) => return response,
    };

    let snapshot = state.store.snapshot(parameter).await;
    into_response(json_response(&snapshot, accepts_brotli(&headers)).await)
}

/// CSV of the reconciled series (yesterday + forecast)
pub async fn export_series_csv(
    Path(slug): Path<String>,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> Response {
    let parameter = match parse_parameter(&slug) {
        Ok(parameter) => parameter,
        Err(response) => return response,
    };

    let snapshot = state.store.snapshot(parameter).await;
    let Some(series) = snapshot.series.as_ref() else {
        return (StatusCode::NOT_FOUND, "no reconciled series yet").into_response();
    };

    match series_to_csv(series) {
        Ok(csv) => {
            let filename = format!("{}-forecast.csv", parameter.slug());
            into_response(
                encoded_response(csv, CSV_CONTENT_TYPE, Some(&filename), accepts_brotli(&headers))
                    .await,
            )
        }
        Err(e) => {
            tracing::error!("{}: CSV export failed: {:#}", parameter, e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// CSV of yesterday's accuracy summary
pub async fn export_accuracy_csv(
    Path(slug): Path<String>,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> Response {
    let parameter = match parse_parameter(&slug) {
        Ok(parameter) => parameter,
        Err(response) => return response,
    };

    let snapshot = state.store.snapshot(parameter).await;
    let (Some(series), Some(accuracy)) = (snapshot.series.as_ref(), snapshot.accuracy.as_ref())
    else {
        return (StatusCode::NOT_FOUND, "no accuracy summary yet").into_response();
    };

    match accuracy_to_csv(series, accuracy) {
        Ok(csv) => {
            let filename = format!("{}-accuracy.csv", parameter.slug());
            into_response(
                encoded_response(csv, CSV_CONTENT_TYPE, Some(&filename), accepts_brotli(&headers))
                    .await,
            )
        }
        Err(e) => {
            tracing::error!("{}: accuracy CSV export failed: {:#}", parameter, e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Run (or join) a refresh for one parameter and report how it went
pub async fn trigger_refresh(
    Path(slug): Path<String>,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> Response {
    let parameter = match parse_parameter(&slug) {
        Ok(parameter) => parameter,
        Err(response) => return response,
    };

    let outcome = state.store.refresh(parameter).await;
    into_response(json_response(&outcome, accepts_brotli(&headers)).await)
}

/// Current snapshots followed by every committed update, one JSON document per line
pub async fn stream_updates(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let rx = state.store.subscribe();
    let initial = state.store.snapshots().await;
    stream_from_receiver(initial, rx)
}

fn parse_parameter(slug: &str) -> Result<Parameter, Response> {
    slug.parse::<Parameter>()
        .map_err(|e| (StatusCode::NOT_FOUND, e.to_string()).into_response())
}

fn into_response(result: Result<Response, StatusCode>) -> Response {
    match result {
        Ok(response) => response,
        Err(status) => status.into_response(),
    }
}
