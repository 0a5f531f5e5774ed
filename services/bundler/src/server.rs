//! HTTP API: track upload, job status polling, interactive tile conversion.

use std::sync::Arc;

use axum::{
    extract::{Extension, Multipart, Path},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tracing::info;

use job_store::{JobStatus, JobStore};
use track_common::{
    dedup_tiles, parse_gpx_waypoints, tiles_for_region, BoundingBox, BundleError, TileCoord,
    TileRef, Waypoint,
};

use crate::config::BundlerConfig;
use crate::fetch::TileFetcher;
use crate::runner::JobRunner;

// ============================================================================
// Response Types
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct UploadResponse {
    pub wps: Vec<Waypoint>,
    pub urls: Vec<String>,
    /// "true" once the bundle is ready; mirrors the status endpoint.
    pub status: String,
    pub id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    /// "true" once the bundle is ready for download.
    pub status: String,
    /// Full lifecycle state: prepared | running | done | failed.
    pub state: String,
    pub files: u32,
    pub done: u32,
    pub url: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct VersionResponse {
    pub version: String,
    pub text: String,
}

// ============================================================================
// Shared State
// ============================================================================

pub struct AppState {
    pub store: Arc<JobStore>,
    pub fetcher: Arc<TileFetcher>,
    pub runner: Arc<JobRunner>,
    pub config: Arc<BundlerConfig>,
}

/// Derive the stable job id from a device identifier.
///
/// Deliberately not random: resubmitting from the same device reuses
/// (and overwrites) the same job.
pub fn job_id_for_device(device_id: &str) -> String {
    hex::encode(Sha256::digest(device_id.as_bytes()))
}

// ============================================================================
// Router
// ============================================================================

/// Create the API router.
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(index_handler))
        .route("/gpx", post(upload_handler))
        .route("/status/:id", get(status_handler))
        .route("/tile/:z/:x/:filename", get(tile_handler))
        .route("/health", get(health_handler))
        .nest_service("/static", ServeDir::new(state.config.static_dir.clone()))
        .layer(cors)
        .layer(Extension(state))
}

fn error_response(err: &BundleError) -> Response {
    let status = StatusCode::from_u16(err.http_status_code())
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(serde_json::json!({ "error": err.to_string() }))).into_response()
}

// ============================================================================
// Handlers
// ============================================================================

/// GET / - version banner
async fn index_handler() -> impl IntoResponse {
    Json(VersionResponse {
        version: "1.0".to_string(),
        text: "NaviPack API V1.0".to_string(),
    })
}

/// POST /gpx - upload a track, create the job, start the pipeline.
///
/// Multipart form with a `file` part (the GPX document) and a
/// `device-id` part. Responds immediately with the initial job snapshot;
/// tile acquisition continues in the background.
async fn upload_handler(
    Extension(state): Extension<Arc<AppState>>,
    mut multipart: Multipart,
) -> Response {
    let mut gpx_bytes: Option<Vec<u8>> = None;
    let mut file_name: Option<String> = None;
    let mut device_id: Option<String> = None;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                return error_response(&BundleError::InvalidUpload(format!(
                    "malformed multipart body: {}",
                    e
                )))
            }
        };

        match field.name() {
            Some("file") => {
                file_name = field.file_name().map(|s| s.to_string());
                match field.bytes().await {
                    Ok(bytes) => gpx_bytes = Some(bytes.to_vec()),
                    Err(e) => {
                        return error_response(&BundleError::InvalidUpload(format!(
                            "failed to read file part: {}",
                            e
                        )))
                    }
                }
            }
            Some("device-id") => match field.text().await {
                Ok(text) => device_id = Some(text),
                Err(e) => {
                    return error_response(&BundleError::InvalidUpload(format!(
                        "failed to read device-id part: {}",
                        e
                    )))
                }
            },
            _ => {}
        }
    }

    match build_job(&state, gpx_bytes, file_name, device_id).await {
        Ok(response) => Json(response).into_response(),
        Err(e) => error_response(&e),
    }
}

/// Validate the upload, compute coverage, persist the job and spawn the
/// runner. Split out of the handler so the multipart plumbing stays thin.
async fn build_job(
    state: &AppState,
    gpx_bytes: Option<Vec<u8>>,
    file_name: Option<String>,
    device_id: Option<String>,
) -> Result<UploadResponse, BundleError> {
    let gpx_bytes =
        gpx_bytes.ok_or_else(|| BundleError::InvalidUpload("no file part".to_string()))?;
    let device_id =
        device_id.ok_or_else(|| BundleError::InvalidUpload("no device-id part".to_string()))?;

    let file_name =
        file_name.ok_or_else(|| BundleError::InvalidUpload("no selected file".to_string()))?;
    if !file_name.to_lowercase().ends_with(".gpx") {
        return Err(BundleError::UnsupportedFormat(file_name));
    }

    let waypoints = parse_gpx_waypoints(&gpx_bytes)?;
    let bbox = BoundingBox::from_waypoints(&waypoints)
        .ok_or_else(|| BundleError::InvalidUpload("track contains no points".to_string()))?;

    let mut tiles = Vec::new();
    for &zoom in &state.config.zoom_levels {
        for coord in tiles_for_region(&bbox, zoom) {
            tiles.push(TileRef::from_template(coord, &state.config.tile_url_template));
        }
    }
    let tiles = dedup_tiles(tiles);

    let job_id = job_id_for_device(&device_id);
    info!(job = %job_id, waypoints = waypoints.len(), tiles = tiles.len(), "Job created");

    state.store.create(&job_id, &waypoints, &tiles).await?;
    state.runner.spawn(job_id.clone());

    Ok(UploadResponse {
        urls: tiles.into_iter().map(|t| t.url).collect(),
        wps: waypoints,
        status: "false".to_string(),
        id: job_id,
    })
}

/// GET /status/:id - poll job progress.
///
/// A plain synchronous read of the job ledger; never touches the
/// background pipeline.
async fn status_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(id): Path<String>,
) -> Response {
    match state.store.read(&id).await {
        Ok(job) => Json(StatusResponse {
            status: if job.status == JobStatus::Done {
                "true".to_string()
            } else {
                "false".to_string()
            },
            state: job.status.as_str().to_string(),
            files: job.files_total,
            done: job.files_done,
            url: format!("/static/{}.zip", id),
        })
        .into_response(),
        Err(e) => error_response(&e),
    }
}

/// GET /tile/:z/:x/:filename - convert a single tile interactively.
///
/// `filename` is `<y>.png` for a portable preview or `<y>.raw` for the
/// device-native frame buffer.
async fn tile_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path((z, x, filename)): Path<(u32, i32, String)>,
) -> Response {
    let (y, ext) = match filename.rsplit_once('.') {
        Some((y, ext)) => (y, ext),
        None => {
            return error_response(&BundleError::UnsupportedFormat(filename));
        }
    };
    let y: i32 = match y.parse() {
        Ok(y) => y,
        Err(_) => {
            return error_response(&BundleError::InvalidUpload(format!(
                "invalid tile row: {}",
                y
            )))
        }
    };
    // Reject unknown formats before contacting the upstream server
    if ext != "png" && ext != "raw" {
        return error_response(&BundleError::UnsupportedFormat(ext.to_string()));
    }

    let tile = TileRef::from_template(TileCoord::new(z, x, y), &state.config.tile_url_template);
    let quantized = match state.fetcher.fetch(&tile).await {
        Ok(q) => q,
        Err(e) => return error_response(&e),
    };

    if ext == "png" {
        match quantized.to_png() {
            Ok(png) => ([(header::CONTENT_TYPE, "image/png")], png).into_response(),
            Err(e) => error_response(&e),
        }
    } else {
        (
            [(header::CONTENT_TYPE, "application/octet-stream")],
            quantized.to_device_raster(),
        )
            .into_response()
    }
}

/// GET /health - health check endpoint
async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "bundler"
    }))
}

/// Start the HTTP server.
pub async fn run_server(state: Arc<AppState>, port: u16) -> anyhow::Result<()> {
    let app = create_router(state);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));

    info!(port = port, "Starting bundler API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_id_is_stable() {
        let a = job_id_for_device("1234567890");
        let b = job_id_for_device("1234567890");
        let c = job_id_for_device("other-device");

        assert_eq!(a, b);
        assert_ne!(a, c);
        // hex-encoded SHA-256
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
