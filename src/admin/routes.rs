//! Admin HTTP routes
//!
//! Operational endpoints for a running node: needle probes, volume
//! provisioning, bulk attach and compaction.
//!
//! Status mapping: unparsable parameters are 400, an unknown volume or a
//! missing/deleted needle is 404, everything else that fails is 500.
//! Bulk attach and compaction run long, so their handlers dispatch to a
//! blocking task and answer immediately with an acceptance message.

use std::sync::Arc;

use axum::{
    extract::{Form, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::observability::Logger;
use crate::store::{Store, StoreError};
use crate::volume::VolumeError;

/// State shared across admin handlers.
pub struct AdminState {
    pub store: Arc<Store>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: u16,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct AddFreeVolumeResponse {
    pub succeed: usize,
}

#[derive(Debug, Deserialize)]
pub struct ProbeParams {
    pub vid: String,
    pub key: String,
}

#[derive(Debug, Deserialize)]
pub struct AddVolumeParams {
    pub vid: String,
}

#[derive(Debug, Deserialize)]
pub struct AddFreeVolumeParams {
    pub n: String,
    pub bdir: String,
    pub idir: String,
}

#[derive(Debug, Deserialize)]
pub struct BulkVolumeParams {
    pub vid: String,
    pub bfile: String,
    pub ifile: String,
}

#[derive(Debug, Deserialize)]
pub struct CompactVolumeParams {
    pub vid: String,
}

/// Create the admin routes.
pub fn admin_routes(state: Arc<AdminState>) -> Router {
    Router::new()
        .route("/probe", get(probe_handler))
        .route("/add_volume", post(add_volume_handler))
        .route("/add_free_volume", post(add_free_volume_handler))
        .route("/bulk_volume", post(bulk_volume_handler))
        .route("/compact_volume", post(compact_volume_handler))
        .with_state(state)
}

fn bad_param(name: &str, value: &str) -> (StatusCode, Json<ErrorResponse>) {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: format!("invalid parameter {}: {:?}", name, value),
            code: 400,
        }),
    )
}

fn parse_u32(name: &str, value: &str) -> Result<u32, (StatusCode, Json<ErrorResponse>)> {
    value.parse().map_err(|_| bad_param(name, value))
}

fn parse_u64(name: &str, value: &str) -> Result<u64, (StatusCode, Json<ErrorResponse>)> {
    value.parse().map_err(|_| bad_param(name, value))
}

fn store_error_response(err: &StoreError) -> (StatusCode, Json<ErrorResponse>) {
    let status = match err {
        StoreError::VolumeNotExist(_) => StatusCode::NOT_FOUND,
        StoreError::Volume(VolumeError::NeedleNotExist(_))
        | StoreError::Volume(VolumeError::NeedleDeleted(_)) => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(ErrorResponse {
            error: err.to_string(),
            code: status.as_u16(),
        }),
    )
}

/// GET /probe?vid=&key=
///
/// Reads the needle and returns its payload bytes. Responds to HEAD as
/// well, with headers only.
async fn probe_handler(
    State(state): State<Arc<AdminState>>,
    Query(params): Query<ProbeParams>,
) -> Result<impl IntoResponse, (StatusCode, Json<ErrorResponse>)> {
    let vid = parse_u32("vid", &params.vid)?;
    let key = parse_u64("key", &params.key)?;

    let mut needle = state.store.needle();
    state
        .store
        .probe(vid, key, &mut needle)
        .map_err(|err| store_error_response(&err))?;

    let body = needle.data.clone();
    state.store.free_needle(needle);
    Ok((
        [(header::CONTENT_TYPE, "application/octet-stream")],
        body,
    ))
}

/// POST /add_volume with form field `vid`.
async fn add_volume_handler(
    State(state): State<Arc<AdminState>>,
    Form(params): Form<AddVolumeParams>,
) -> Result<Json<MessageResponse>, (StatusCode, Json<ErrorResponse>)> {
    let vid = parse_u32("vid", &params.vid)?;
    state
        .store
        .add_volume(vid)
        .map_err(|err| store_error_response(&err))?;
    Ok(Json(MessageResponse {
        message: format!("volume {} added", vid),
    }))
}

/// POST /add_free_volume with form fields `n`, `bdir`, `idir`.
///
/// Returns the number of volumes actually created, which may be lower
/// than requested when creation fails partway.
async fn add_free_volume_handler(
    State(state): State<Arc<AdminState>>,
    Form(params): Form<AddFreeVolumeParams>,
) -> Result<Json<AddFreeVolumeResponse>, (StatusCode, Json<ErrorResponse>)> {
    let n = parse_u64("n", &params.n)? as usize;
    let succeed = state
        .store
        .add_free_volume(
            n,
            std::path::Path::new(&params.bdir),
            std::path::Path::new(&params.idir),
        )
        .map_err(|err| store_error_response(&err))?;
    Ok(Json(AddFreeVolumeResponse { succeed }))
}

/// POST /bulk_volume with form fields `vid`, `bfile`, `ifile`.
///
/// The attach is dispatched to a blocking task; the response only means
/// the request was accepted.
async fn bulk_volume_handler(
    State(state): State<Arc<AdminState>>,
    Form(params): Form<BulkVolumeParams>,
) -> Result<Json<MessageResponse>, (StatusCode, Json<ErrorResponse>)> {
    let vid = parse_u32("vid", &params.vid)?;
    let store = Arc::clone(&state.store);
    let bfile = params.bfile.clone();
    let ifile = params.ifile.clone();
    tokio::task::spawn_blocking(move || {
        if let Err(err) = store.bulk_volume(
            vid,
            std::path::Path::new(&bfile),
            std::path::Path::new(&ifile),
        ) {
            Logger::error(
                "BULK_VOLUME_FAILED",
                &[("volume", &vid.to_string()), ("reason", &err.to_string())],
            );
        }
    });
    Ok(Json(MessageResponse {
        message: format!("bulk volume {} accepted", vid),
    }))
}

/// POST /compact_volume with form field `vid`.
///
/// Compaction is dispatched to a blocking task; the response only means
/// the request was accepted. The volume id is validated first so an
/// unknown volume still gets a 404.
async fn compact_volume_handler(
    State(state): State<Arc<AdminState>>,
    Form(params): Form<CompactVolumeParams>,
) -> Result<Json<MessageResponse>, (StatusCode, Json<ErrorResponse>)> {
    let vid = parse_u32("vid", &params.vid)?;
    if state.store.volume(vid).is_none() {
        return Err(store_error_response(&StoreError::VolumeNotExist(vid)));
    }

    let store = Arc::clone(&state.store);
    tokio::task::spawn_blocking(move || {
        if let Err(err) = store.compact_volume(vid) {
            Logger::error(
                "COMPACT_VOLUME_FAILED",
                &[("volume", &vid.to_string()), ("reason", &err.to_string())],
            );
        }
    });
    Ok(Json(MessageResponse {
        message: format!("compaction of volume {} accepted", vid),
    }))
}
