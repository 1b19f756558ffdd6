use axum::extract::{Query, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;

use crate::error::ForecastError;
use crate::service::ForecastService;

/// JSON error body `{"error": "..."}` with the status implied by the error kind.
#[derive(Debug)]
pub struct ApiError(pub ForecastError);

impl From<ForecastError> for ApiError {
    fn from(e: ForecastError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if self.0.is_client_error() {
            tracing::debug!(error = %self.0, "Rejected request");
        } else {
            tracing::error!(error = %self.0, "Request failed");
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct PeriodQuery {
    pub period: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DateQuery {
    pub target_date: Option<String>,
    pub period: Option<String>,
}

pub fn router(service: ForecastService) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/predict", get(predict))
        .route("/predict_date", get(predict_date))
        .route("/forecast", get(forecast))
        .route("/cache/clear", post(clear_cache))
        .with_state(service)
}

fn cached_json<T: Serialize>(body: &T, max_age: Duration) -> Response {
    let mut resp = Json(body).into_response();
    if let Ok(v) = HeaderValue::from_str(&format!("public, max-age={}", max_age.as_secs())) {
        resp.headers_mut().insert(header::CACHE_CONTROL, v);
    }
    resp
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn predict(
    State(svc): State<ForecastService>,
    Query(q): Query<PeriodQuery>,
) -> Result<Response, ApiError> {
    let period = svc.resolve_period(q.period.as_deref())?;
    let prediction = svc.predict_next(period).await?;
    Ok(cached_json(&prediction, svc.settings().price_ttl))
}

async fn predict_date(
    State(svc): State<ForecastService>,
    Query(q): Query<DateQuery>,
) -> Result<Response, ApiError> {
    let target = q
        .target_date
        .as_deref()
        .ok_or_else(|| ForecastError::Parse("target_date is required (YYYY-MM-DD)".to_string()))?;
    let period = svc.resolve_period(q.period.as_deref())?;
    let prediction = svc.predict_date(target, period).await?;
    Ok(cached_json(&prediction, svc.settings().price_ttl))
}

async fn forecast(
    State(svc): State<ForecastService>,
    Query(q): Query<PeriodQuery>,
) -> Result<Response, ApiError> {
    let period = svc.resolve_period(q.period.as_deref())?;
    let result = svc.forecast_view(period).await?;
    Ok(cached_json(result.as_ref(), svc.settings().forecast_ttl))
}

async fn clear_cache(State(svc): State<ForecastService>) -> Json<serde_json::Value> {
    let cleared = svc.clear_caches();
    Json(json!({ "cleared": cleared }))
}
