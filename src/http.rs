//! HTTP API over the application layer.
use std::net::SocketAddr;

use anyhow::{Context, Result};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::app::{
    AppContext, AppError, DeleteResponse, IndexResponse, QueryResponse, SearchPageResponse,
};
use crate::error::ErrorKind;
use crate::index::IndexStats;

#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    pub url: String,
    pub query: String,
    pub top_k: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct IndexRequest {
    pub namespace: String,
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    pub namespace: String,
    pub query: String,
    pub top_k: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub detail: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Health {
    pub status: String,
    pub service: String,
}

/// Error response carrying the status a client should see.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorBody,
}

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        let (status, label) = match &err {
            AppError::Page(_) => (StatusCode::BAD_REQUEST, "Failed to fetch URL"),
            AppError::Core(e) => match e.kind() {
                ErrorKind::InvalidInput => (StatusCode::UNPROCESSABLE_ENTITY, "Invalid input"),
                ErrorKind::Busy => (StatusCode::CONFLICT, "Namespace busy"),
                ErrorKind::BackendUnavailable => {
                    (StatusCode::SERVICE_UNAVAILABLE, "Index unavailable")
                }
                ErrorKind::Internal => (StatusCode::INTERNAL_SERVER_ERROR, "Internal error"),
            },
            AppError::Task(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Internal error"),
        };

        if status.is_server_error() {
            error!("{label}: {err}");
        }

        Self {
            status,
            body: ErrorBody {
                error: label.to_string(),
                detail: err.to_string(),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

type ApiResult<T> = std::result::Result<Json<T>, ApiError>;

pub fn router(ctx: AppContext) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/search", post(search))
        .route("/index", post(index))
        .route("/index/:namespace", delete(delete_index))
        .route("/query", post(query))
        .route("/stats", get(stats))
        .with_state(ctx)
}

/// Bind `bind` and serve until the process is interrupted.
pub async fn serve(ctx: AppContext, bind: &str) -> Result<()> {
    let addr: SocketAddr = bind
        .parse()
        .with_context(|| format!("invalid bind address {bind}"))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    info!("HTTP API listening on http://{addr}");
    axum::serve(listener, router(ctx))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down HTTP API");
        })
        .await
        .context("server shutdown")?;
    Ok(())
}

async fn health() -> Json<Health> {
    Json(Health {
        status: "healthy".to_string(),
        service: "pagerag".to_string(),
    })
}

async fn search(
    State(ctx): State<AppContext>,
    Json(req): Json<SearchRequest>,
) -> ApiResult<SearchPageResponse> {
    Ok(Json(ctx.search_page(&req.url, &req.query, req.top_k).await?))
}

async fn index(
    State(ctx): State<AppContext>,
    Json(req): Json<IndexRequest>,
) -> ApiResult<IndexResponse> {
    Ok(Json(ctx.index_text(&req.namespace, req.text).await?))
}

async fn query(
    State(ctx): State<AppContext>,
    Json(req): Json<QueryRequest>,
) -> ApiResult<QueryResponse> {
    Ok(Json(ctx.query(&req.namespace, &req.query, req.top_k).await?))
}

async fn stats(State(ctx): State<AppContext>) -> ApiResult<IndexStats> {
    Ok(Json(ctx.stats().await?))
}

async fn delete_index(
    State(ctx): State<AppContext>,
    Path(namespace): Path<String>,
) -> ApiResult<DeleteResponse> {
    Ok(Json(ctx.delete(&namespace).await?))
}
