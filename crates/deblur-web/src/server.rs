//! HTTP server for the deblur endpoints
//!
//! Upload and processing go through `/api/deblur`, stored images are served
//! from `/api/images/{id}/{kind}`, the results page looks its entry up via
//! `/api/results/{id}` and releases it via `/api/cleanup/{id}` when the user
//! leaves.

use crate::config::Config;
use crate::deblur::{DeblurClient, DeblurOutcome};
use crate::error::AppError;
use crate::types::{
    CleanupResponse, DebugQuery, DebugResponse, DeblurResponse, HealthResponse, PurgeResponse,
    StatsChange, PLACEHOLDER_SVG,
};
use axum::{
    body::Body,
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::{header, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use ephemeral_blob_store::{ImageKind, Payload, SharedStore, StoreError};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

const STORED_CACHE_CONTROL: &str = "public, max-age=3600";
const PLACEHOLDER_CACHE_CONTROL: &str = "public, max-age=60";

/// Shared state for the HTTP server
pub struct ServerState {
    pub store: SharedStore,
    pub deblur: DeblurClient,
    pub started_at: DateTime<Utc>,
}

impl ServerState {
    pub fn new(store: SharedStore, deblur: DeblurClient) -> Self {
        Self {
            store,
            deblur,
            started_at: Utc::now(),
        }
    }
}

pub type SharedState = Arc<ServerState>;

fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
    }

    let origins: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();
    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE])
}

/// Create the HTTP router
pub fn create_router(state: SharedState, config: &Config) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/deblur", post(deblur))
        .route("/api/images/{id}/{kind}", get(get_image))
        .route("/api/results/{id}", get(get_result))
        .route("/api/cleanup/purge", post(purge))
        .route("/api/cleanup/{id}", post(cleanup).delete(cleanup))
        .route("/api/debug/storage", get(debug_storage))
        .layer(DefaultBodyLimit::max(config.max_upload_bytes))
        .layer(cors_layer(&config.cors_origins))
        .with_state(state)
}

/// Start the HTTP server
pub async fn start_server(state: SharedState, config: &Config) -> std::io::Result<()> {
    let router = create_router(state, config);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.port));
    info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await
}

/// Health check endpoint
async fn health(State(state): State<SharedState>) -> Json<HealthResponse> {
    let storage = state.store.stats().await;
    let uptime_secs = (Utc::now() - state.started_at).num_seconds().max(0) as u64;

    Json(HealthResponse {
        status: "ok".to_string(),
        uptime_secs,
        deblur_configured: state.deblur.is_configured(),
        storage,
    })
}

/// Accept an upload, run it through the deblur service and store both images
async fn deblur(
    State(state): State<SharedState>,
    mut multipart: Multipart,
) -> Result<Json<DeblurResponse>, AppError> {
    let mut id = None;
    let mut image = None;

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "id" => id = Some(field.text().await?.trim().to_string()),
            "image" => {
                let content_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let data = field.bytes().await?;
                image = Some(Payload { data, content_type });
            }
            _ => {}
        }
    }

    let (id, image) = match (id, image) {
        (Some(id), Some(image)) if !id.is_empty() && !image.is_empty() => (id, image),
        _ => return Err(AppError::BadRequest("Missing required fields".to_string())),
    };
    info!(id = %id, size = image.size(), "Processing upload");

    let (processed, note) = match state.deblur.process(&id, &image).await {
        DeblurOutcome::Processed(processed) => (processed, None),
        DeblurOutcome::Fallback(note) => (image.clone(), Some(note.to_string())),
    };

    state.store.put(&id, image, processed).await?;

    Ok(Json(DeblurResponse::new(&id, note)))
}

/// Serve a stored image, or a placeholder when it is gone
async fn get_image(
    State(state): State<SharedState>,
    Path((id, kind)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let kind: ImageKind = kind
        .parse()
        .map_err(|_| AppError::BadRequest("Invalid type parameter".to_string()))?;

    match state.store.get(&id, kind).await {
        Ok(Some(payload)) => Ok(image_response(
            payload.data,
            &payload.content_type,
            STORED_CACHE_CONTROL,
            "stored",
        )),
        Ok(None) => {
            warn!(id = %id, %kind, "Image not found in storage, serving placeholder");
            Ok(placeholder_response())
        }
        Err(StoreError::InvalidArgument(msg)) => Err(AppError::BadRequest(msg)),
        Err(e) => {
            error!(id = %id, %kind, error = %e, "Failed to read image, serving placeholder");
            Ok(placeholder_response())
        }
    }
}

/// Image URLs for an entry that is still stored
async fn get_result(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<DeblurResponse>, AppError> {
    if !state.store.has(&id).await {
        return Err(AppError::NotFound(format!("No result for ID {}", id)));
    }
    Ok(Json(DeblurResponse::new(&id, None)))
}

fn image_response(
    data: impl Into<Body>,
    content_type: &str,
    cache_control: &str,
    status: &str,
) -> Response {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CACHE_CONTROL, cache_control)
        .header("X-Image-Status", status)
        .body(data.into())
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

fn placeholder_response() -> Response {
    image_response(
        PLACEHOLDER_SVG,
        "image/svg+xml",
        PLACEHOLDER_CACHE_CONTROL,
        "placeholder",
    )
}

/// Release signal sent when the user leaves the results view
async fn cleanup(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<CleanupResponse>, AppError> {
    let before = state.store.stats().await;
    let deleted = state.store.delete(&id).await?;
    let after = state.store.stats().await;

    info!(id = %id, deleted, remaining = after.count, "Cleanup requested");

    Ok(Json(CleanupResponse {
        success: true,
        deleted,
        message: format!("Image data for ID {} has been cleaned up", id),
        stats: StatsChange { before, after },
    }))
}

async fn purge(State(state): State<SharedState>) -> Json<PurgeResponse> {
    let before = state.store.stats().await;
    let purged_count = state.store.purge().await;
    let after = state.store.stats().await;

    Json(PurgeResponse {
        success: true,
        purged_count,
        message: format!("Purged {} old image entries", purged_count),
        stats: StatsChange { before, after },
    })
}

async fn debug_storage(
    State(state): State<SharedState>,
    Query(query): Query<DebugQuery>,
) -> Json<DebugResponse> {
    if let Some(id) = query.id {
        let exists = state.store.has(&id).await;
        let verb = if exists { "exists" } else { "does not exist" };
        return Json(DebugResponse::Entry {
            exists,
            message: format!("Image with ID {} {} in storage", id, verb),
        });
    }

    let stats = state.store.stats().await;
    let message = format!(
        "Storage currently contains {} images, using approximately {} KB",
        stats.count,
        (stats.total_size + 512) / 1024
    );
    Json(DebugResponse::Stats { stats, message })
}
