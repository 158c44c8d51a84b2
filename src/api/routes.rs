//! API route definitions.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::error;

use super::state::AppState;
use crate::storage::StoreError;

/// Upper bound on history points per request.
const MAX_HISTORY_POINTS: usize = 1000;

pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/sites", get(list_sites))
        .route("/sites/latest", get(site_latest))
        .route("/sites/history", get(site_history))
}

enum ApiError {
    BadRequest(String),
    NoData(String),
    Storage(StoreError),
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        ApiError::Storage(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NoData(site) => (StatusCode::NOT_FOUND, format!("no data for {}", site)),
            ApiError::Storage(e) => {
                error!(error = %e, "Storage query failed");
                (StatusCode::INTERNAL_SERVER_ERROR, format!("storage failure: {}", e))
            }
        };
        (status, Json(json!({ "data": null, "error": message }))).into_response()
    }
}

/// Run a store query on the blocking pool so a busy database never stalls
/// the runtime threads serving other requests.
async fn blocking<T, F>(query: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, StoreError> + Send + 'static,
    T: Send + 'static,
{
    let result = tokio::task::spawn_blocking(query)
        .await
        .map_err(StoreError::from)?;
    Ok(result?)
}

#[derive(Debug, Deserialize)]
struct SiteQuery {
    url: Option<String>,
    limit: Option<usize>,
}

impl SiteQuery {
    fn url(&self) -> Result<&str, ApiError> {
        self.url
            .as_deref()
            .filter(|u| !u.is_empty())
            .ok_or_else(|| ApiError::BadRequest("missing 'url' query parameter".to_string()))
    }

    fn limit(&self, default: usize) -> usize {
        self.limit.unwrap_or(default).min(MAX_HISTORY_POINTS)
    }
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    limit: Option<usize>,
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    let scheduler = state.scheduler.as_ref().map(|rx| *rx.borrow());
    Json(json!({
        "data": {
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION"),
            "sites": state.query.sites().current().len(),
            "scheduler": scheduler,
        },
        "meta": {
            "timestamp": chrono::Utc::now().to_rfc3339(),
        }
    }))
}

async fn list_sites(
    State(state): State<AppState>,
    Query(q): Query<ListQuery>,
) -> Result<Json<Value>, ApiError> {
    let limit = q.limit.unwrap_or(state.history_points).min(MAX_HISTORY_POINTS);
    let query = state.query.clone();
    let overview = blocking(move || query.overview(limit)).await?;
    Ok(Json(json!({
        "data": overview,
        "meta": { "total": overview.len(), "history_points": limit }
    })))
}

async fn site_latest(
    State(state): State<AppState>,
    Query(q): Query<SiteQuery>,
) -> Result<Json<Value>, ApiError> {
    let url = q.url()?.to_string();
    let query = state.query.clone();
    let site = url.clone();
    match blocking(move || query.latest(&site)).await? {
        Some(outcome) => Ok(Json(json!({ "data": outcome, "meta": { "site": url } }))),
        None => Err(ApiError::NoData(url)),
    }
}

async fn site_history(
    State(state): State<AppState>,
    Query(q): Query<SiteQuery>,
) -> Result<Json<Value>, ApiError> {
    let url = q.url()?.to_string();
    let limit = q.limit(state.history_points);
    let query = state.query.clone();
    let site = url.clone();
    let points = blocking(move || query.history(&site, limit)).await?;
    Ok(Json(json!({
        "data": points,
        "meta": { "site": url, "total": points.len(), "limit": limit }
    })))
}
