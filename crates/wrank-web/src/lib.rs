//! Operator JSON API over the release state machine.

use std::sync::Arc;

use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        Path as AxumPath, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use wrank_core::{Candidate, ReleaseSummary};
use wrank_release::{
    AttachItem, AttachReport, BulkLookup, EnrichReport, ErrorKind, ReleaseDetail, ReleaseError,
    ReleaseService,
};

pub const CRATE_NAME: &str = "wrank-web";

pub struct AppState {
    pub service: ReleaseService,
}

impl AppState {
    pub fn new(service: ReleaseService) -> Self {
        Self { service }
    }
}

/// Error body: `{"error": {"code", "message", "details"}}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
    details: Vec<String>,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: "validation_error",
            message: message.into(),
            details: Vec::new(),
        }
    }
}

impl From<ReleaseError> for ApiError {
    fn from(err: ReleaseError) -> Self {
        let (status, code) = match err.kind() {
            ErrorKind::Validation => (StatusCode::BAD_REQUEST, "validation_error"),
            ErrorKind::Conflict => (StatusCode::CONFLICT, "conflict"),
            ErrorKind::NotFound => (StatusCode::NOT_FOUND, "not_found"),
            ErrorKind::Fetch => (StatusCode::BAD_GATEWAY, "upstream_unavailable"),
            ErrorKind::Persistence => (StatusCode::INTERNAL_SERVER_ERROR, "persistence_error"),
        };
        Self {
            status,
            code,
            message: err.to_string(),
            details: err.details().to_vec(),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::bad_request(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::bad_request(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!(code = self.code, message = %self.message, "request failed");
        } else {
            warn!(code = self.code, message = %self.message, "request rejected");
        }
        let body = json!({
            "error": {
                "code": self.code,
                "message": self.message,
                "details": self.details,
            }
        });
        (self.status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// Release ids must be positive integers.
fn release_id(path: Result<AxumPath<i64>, PathRejection>) -> ApiResult<i64> {
    match path {
        Ok(AxumPath(id)) if id > 0 => Ok(id),
        _ => Err(ApiError::bad_request("invalid release id")),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateReleaseBody {
    #[serde(default)]
    source: String,
    #[serde(default)]
    season: String,
    #[serde(default)]
    week_of: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImportBody {
    #[serde(default)]
    weight_class: i32,
    #[serde(default)]
    raw_text: String,
}

#[derive(Debug, Deserialize)]
struct AttachBody {
    #[serde(default)]
    items: Vec<AttachItem>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WeightClassQuery {
    weight_class: Option<i32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CandidatesQuery {
    weight_class: Option<i32>,
    #[serde(default)]
    name: String,
    #[serde(default)]
    school: String,
}

#[derive(Debug, Serialize)]
struct ClearedStaging {
    ok: bool,
    deleted: u64,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route(
            "/api/admin/rankings/releases",
            get(list_releases_handler).post(create_release_handler),
        )
        .route("/api/admin/rankings/releases/{id}", get(release_detail_handler))
        .route(
            "/api/admin/rankings/releases/{id}/staging",
            post(import_staging_handler).delete(clear_staging_handler),
        )
        .route(
            "/api/admin/rankings/releases/{id}/resolve/lookup",
            post(lookup_handler),
        )
        .route("/api/admin/rankings/staging/attach", post(attach_handler))
        .route("/api/admin/rankings/releases/{id}/publish", post(publish_handler))
        .route("/api/admin/rankings/releases/{id}/enrich", post(enrich_handler))
        .route("/api/admin/roster/candidates", get(candidates_handler))
        .with_state(Arc::new(state))
}

pub async fn serve(state: AppState, port: u16) -> anyhow::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "operator api listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

async fn health_handler() -> &'static str {
    "ok"
}

async fn create_release_handler(
    State(state): State<Arc<AppState>>,
    body: Result<Json<CreateReleaseBody>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<ReleaseDetail>)> {
    let Json(body) = body?;
    let detail = state
        .service
        .create_release(&body.source, &body.season, &body.week_of)
        .await?;
    Ok((StatusCode::CREATED, Json(detail)))
}

async fn list_releases_handler(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<Vec<ReleaseSummary>>> {
    Ok(Json(state.service.list_releases().await?))
}

async fn release_detail_handler(
    State(state): State<Arc<AppState>>,
    path: Result<AxumPath<i64>, PathRejection>,
) -> ApiResult<Json<ReleaseDetail>> {
    let id = release_id(path)?;
    Ok(Json(state.service.release_detail(id).await?))
}

async fn import_staging_handler(
    State(state): State<Arc<AppState>>,
    path: Result<AxumPath<i64>, PathRejection>,
    body: Result<Json<ImportBody>, JsonRejection>,
) -> ApiResult<Json<ReleaseDetail>> {
    let id = release_id(path)?;
    let Json(body) = body?;
    let detail = state
        .service
        .import_staging(id, body.weight_class, &body.raw_text)
        .await?;
    Ok(Json(detail))
}

async fn clear_staging_handler(
    State(state): State<Arc<AppState>>,
    path: Result<AxumPath<i64>, PathRejection>,
    query: Result<Query<WeightClassQuery>, QueryRejection>,
) -> ApiResult<Json<ClearedStaging>> {
    let id = release_id(path)?;
    let Query(query) = query?;
    let deleted = state
        .service
        .clear_staging(id, query.weight_class.unwrap_or_default())
        .await?;
    Ok(Json(ClearedStaging { ok: true, deleted }))
}

async fn lookup_handler(
    State(state): State<Arc<AppState>>,
    path: Result<AxumPath<i64>, PathRejection>,
    query: Result<Query<WeightClassQuery>, QueryRejection>,
) -> ApiResult<Json<BulkLookup>> {
    let id = release_id(path)?;
    let Query(query) = query?;
    let lookup = state
        .service
        .lookup_candidates(id, query.weight_class.unwrap_or_default())
        .await?;
    Ok(Json(lookup))
}

async fn attach_handler(
    State(state): State<Arc<AppState>>,
    body: Result<Json<AttachBody>, JsonRejection>,
) -> ApiResult<Json<AttachReport>> {
    let Json(body) = body?;
    Ok(Json(state.service.attach(&body.items).await?))
}

async fn publish_handler(
    State(state): State<Arc<AppState>>,
    path: Result<AxumPath<i64>, PathRejection>,
) -> ApiResult<Json<ReleaseDetail>> {
    let id = release_id(path)?;
    Ok(Json(state.service.publish(id).await?))
}

async fn enrich_handler(
    State(state): State<Arc<AppState>>,
    path: Result<AxumPath<i64>, PathRejection>,
) -> ApiResult<Json<EnrichReport>> {
    let id = release_id(path)?;
    Ok(Json(state.service.enrich(id).await?))
}

async fn candidates_handler(
    State(state): State<Arc<AppState>>,
    query: Result<Query<CandidatesQuery>, QueryRejection>,
) -> ApiResult<Json<Vec<Candidate>>> {
    let Query(query) = query?;
    let candidates = state
        .service
        .find_candidates(
            query.weight_class.unwrap_or_default(),
            &query.name,
            &query.school,
        )
        .await?;
    Ok(Json(candidates))
}
