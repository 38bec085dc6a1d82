//! Internal HTTP exposure
//!
//! Serves the two library operations for consumers that live in another
//! process. Request and response bodies mirror the function contracts:
//!
//! - `GET /project/:opaque` → `{ "opaqueId", "projectedId" }`
//! - `GET /resolve/:projected` → `{ "projectedId", "opaqueId" }`
//! - `POST /invalidate`, `GET /stats`, `GET /health`

use crate::core::{OpaqueId, ProjectedId, ResolveError};
use crate::index::IndexSummary;
use crate::source::EntitySource;
use crate::{CacheStats, ShortIds};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub candidates: Option<Vec<OpaqueId>>,
}

#[derive(Debug)]
pub struct WebError(pub ResolveError);

impl From<ResolveError> for WebError {
    fn from(err: ResolveError) -> Self {
        WebError(err)
    }
}

impl IntoResponse for WebError {
    fn into_response(self) -> Response {
        let err = self.0;
        let status = match &err {
            ResolveError::InvalidFormat(_) => StatusCode::BAD_REQUEST,
            ResolveError::NotFound(_) | ResolveError::IndexIncomplete { .. } => {
                StatusCode::NOT_FOUND
            }
            ResolveError::Ambiguous { .. } => StatusCode::CONFLICT,
            ResolveError::SourceUnavailable(_) => StatusCode::BAD_GATEWAY,
            ResolveError::IndexUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ResolveError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let candidates = match &err {
            ResolveError::Ambiguous { candidates, .. } => Some(candidates.clone()),
            _ => None,
        };
        let body = ErrorResponse {
            error: err.to_string(),
            code: err.code().to_string(),
            candidates,
        };

        (status, Json(body)).into_response()
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectionResponse {
    pub opaque_id: OpaqueId,
    pub projected_id: ProjectedId,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsResponse {
    pub cache: CacheStats,
    pub index: Option<IndexSummary>,
}

pub fn router<S: EntitySource>(ids: Arc<ShortIds<S>>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/project/:opaque", get(project::<S>))
        .route("/resolve/:projected", get(resolve::<S>))
        .route("/invalidate", post(invalidate::<S>))
        .route("/stats", get(stats::<S>))
        .layer(TraceLayer::new_for_http())
        .with_state(ids)
}

async fn health() -> &'static str {
    "ok"
}

async fn project<S: EntitySource>(
    State(ids): State<Arc<ShortIds<S>>>,
    Path(opaque): Path<String>,
) -> Result<Json<ProjectionResponse>, WebError> {
    let opaque_id = OpaqueId::parse(&opaque)?;
    let projected_id = ids.resolver().projector().project(&opaque_id);
    Ok(Json(ProjectionResponse {
        opaque_id,
        projected_id,
    }))
}

async fn resolve<S: EntitySource>(
    State(ids): State<Arc<ShortIds<S>>>,
    Path(projected): Path<String>,
) -> Result<Json<ProjectionResponse>, WebError> {
    let projected_id = ids.resolver().projector().parse_projected(&projected)?;
    let opaque_id = ids.resolve(projected_id).await?;
    Ok(Json(ProjectionResponse {
        opaque_id,
        projected_id,
    }))
}

async fn invalidate<S: EntitySource>(State(ids): State<Arc<ShortIds<S>>>) -> StatusCode {
    ids.invalidate();
    StatusCode::NO_CONTENT
}

async fn stats<S: EntitySource>(State(ids): State<Arc<ShortIds<S>>>) -> Json<StatsResponse> {
    Json(StatsResponse {
        cache: ids.stats(),
        index: ids.index_summary(),
    })
}
