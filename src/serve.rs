//! In-memory reference relay implementing the backend HTTP API.
//!
//! Contacts and media batches overwrite the device's previous snapshot.
//! Locations are appended in capture-time order, so latest and history agree
//! even when uploads arrive out of order. A child's parent binding is whatever it registered
//! with last.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use log::{error, info};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tower_http::cors::{Any, CorsLayer};

use crate::constants::DEFAULT_HISTORY_LIMIT;
use crate::models::{
    ChildSummary, ContactRecord, ContactsBatch, DeviceRegistration, LocationSample,
    LocationUpload, MediaBatch, MediaRecord, Role,
};

#[derive(Debug, Clone)]
struct DeviceRow {
    device_id: String,
    device_name: String,
    mode: Role,
    parent_device_id: Option<String>,
    last_active: DateTime<Utc>,
}

#[derive(Default)]
struct RelayData {
    /// Registration order
    devices: Vec<DeviceRow>,
    contacts: HashMap<String, Vec<ContactRecord>>,
    media: HashMap<String, Vec<MediaRecord>>,
    contacts_batches: HashMap<String, usize>,
    media_batches: HashMap<String, usize>,
    /// Sorted by captured_at, oldest first
    locations: HashMap<String, Vec<LocationSample>>,
}

impl RelayData {
    fn touch(&mut self, device_id: &str) {
        if let Some(row) = self.devices.iter_mut().find(|d| d.device_id == device_id) {
            row.last_active = Utc::now();
        }
    }
}

#[derive(Default)]
pub struct RelayState {
    data: Mutex<RelayData>,
}

impl RelayState {
    pub fn new() -> Self {
        Self::default()
    }

    fn data(&self) -> MutexGuard<'_, RelayData> {
        // A panicked handler cannot leave the maps half-written, so keep serving
        self.data.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Number of location samples stored for a device
    pub fn location_count(&self, device_id: &str) -> usize {
        self.data()
            .locations
            .get(device_id)
            .map(|l| l.len())
            .unwrap_or(0)
    }

    /// Number of contacts batches received for a device
    pub fn contacts_batch_count(&self, device_id: &str) -> usize {
        self.data()
            .contacts_batches
            .get(device_id)
            .copied()
            .unwrap_or(0)
    }

    /// Number of media batches received for a device
    pub fn media_batch_count(&self, device_id: &str) -> usize {
        self.data().media_batches.get(device_id).copied().unwrap_or(0)
    }
}

fn error_response(status: StatusCode, message: &str) -> axum::response::Response {
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}

fn ok_response(count: usize) -> axum::response::Response {
    Json(serde_json::json!({ "success": true, "count": count })).into_response()
}

async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn register_handler(
    State(state): State<Arc<RelayState>>,
    Json(reg): Json<DeviceRegistration>,
) -> impl IntoResponse {
    if reg.device_id.trim().is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "device_id is required");
    }
    let parent_device_id = match reg.mode {
        Role::Parent => None,
        Role::Child => match reg.parent_device_id.as_deref().map(str::trim) {
            Some(parent) if !parent.is_empty() => Some(parent.to_string()),
            _ => {
                return error_response(
                    StatusCode::BAD_REQUEST,
                    "parent_device_id is required for child devices",
                )
            }
        },
    };

    let mut data = state.data();
    let now = Utc::now();
    let existing = data.devices.iter().position(|d| d.device_id == reg.device_id);
    match existing {
        Some(idx) => {
            let row = &mut data.devices[idx];
            row.device_name = reg.device_name.clone();
            row.mode = reg.mode;
            row.parent_device_id = parent_device_id;
            row.last_active = now;
        }
        None => data.devices.push(DeviceRow {
            device_id: reg.device_id.clone(),
            device_name: reg.device_name.clone(),
            mode: reg.mode,
            parent_device_id,
            last_active: now,
        }),
    }
    info!("[Relay] Registered {} device {}", reg.mode, reg.device_id);
    ok_response(1)
}

async fn children_handler(
    State(state): State<Arc<RelayState>>,
    Path(parent_id): Path<String>,
) -> impl IntoResponse {
    let data = state.data();
    let children: Vec<ChildSummary> = data
        .devices
        .iter()
        .filter(|d| {
            d.mode == Role::Child && d.parent_device_id.as_deref() == Some(parent_id.as_str())
        })
        .map(|d| ChildSummary {
            device_id: d.device_id.clone(),
            device_name: d.device_name.clone(),
            last_active: Some(d.last_active),
        })
        .collect();
    Json(children)
}

async fn contacts_batch_handler(
    State(state): State<Arc<RelayState>>,
    Json(batch): Json<ContactsBatch>,
) -> impl IntoResponse {
    let mut data = state.data();
    let count = batch.contacts.len();
    data.contacts.insert(batch.device_id.clone(), batch.contacts);
    *data.contacts_batches.entry(batch.device_id.clone()).or_default() += 1;
    data.touch(&batch.device_id);
    ok_response(count)
}

async fn contacts_handler(
    State(state): State<Arc<RelayState>>,
    Path(device_id): Path<String>,
) -> impl IntoResponse {
    let data = state.data();
    Json(data.contacts.get(&device_id).cloned().unwrap_or_default())
}

async fn media_batch_handler(
    State(state): State<Arc<RelayState>>,
    Json(batch): Json<MediaBatch>,
) -> impl IntoResponse {
    let mut data = state.data();
    let count = batch.media_items.len();
    data.media.insert(batch.device_id.clone(), batch.media_items);
    *data.media_batches.entry(batch.device_id.clone()).or_default() += 1;
    data.touch(&batch.device_id);
    ok_response(count)
}

async fn media_handler(
    State(state): State<Arc<RelayState>>,
    Path(device_id): Path<String>,
) -> impl IntoResponse {
    let data = state.data();
    Json(data.media.get(&device_id).cloned().unwrap_or_default())
}

async fn location_handler(
    State(state): State<Arc<RelayState>>,
    Json(upload): Json<LocationUpload>,
) -> impl IntoResponse {
    if !(-90.0..=90.0).contains(&upload.latitude) || !(-180.0..=180.0).contains(&upload.longitude)
    {
        return error_response(StatusCode::BAD_REQUEST, "coordinates out of range");
    }
    let sample = LocationSample {
        device_id: upload.device_id.clone(),
        latitude: upload.latitude,
        longitude: upload.longitude,
        accuracy: upload.accuracy,
        speed: upload.speed,
        heading: upload.heading,
        captured_at: upload.captured_at.unwrap_or_else(Utc::now),
    };
    let mut data = state.data();
    let samples = data.locations.entry(upload.device_id.clone()).or_default();
    // captured_at order; equal times keep arrival order
    let at = samples.partition_point(|s| s.captured_at <= sample.captured_at);
    samples.insert(at, sample);
    data.touch(&upload.device_id);
    ok_response(1)
}

async fn latest_location_handler(
    State(state): State<Arc<RelayState>>,
    Path(device_id): Path<String>,
) -> impl IntoResponse {
    let data = state.data();
    match data.locations.get(&device_id).and_then(|l| l.last()) {
        Some(sample) => Json(sample.clone()).into_response(),
        None => error_response(StatusCode::NOT_FOUND, "No location found"),
    }
}

#[derive(Deserialize)]
struct HistoryQuery {
    limit: Option<usize>,
}

async fn location_history_handler(
    State(state): State<Arc<RelayState>>,
    Path(device_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> impl IntoResponse {
    let limit = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
    let data = state.data();
    let history: Vec<LocationSample> = data
        .locations
        .get(&device_id)
        .map(|l| l.iter().rev().take(limit).cloned().collect())
        .unwrap_or_default();
    Json(history)
}

/// Build the relay router over `state`
pub fn router(state: Arc<RelayState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/api/devices/register", post(register_handler))
        .route(
            "/api/devices/parent/{parent_id}/children",
            get(children_handler),
        )
        .route("/api/contacts/batch", post(contacts_batch_handler))
        .route("/api/contacts/{device_id}", get(contacts_handler))
        .route("/api/media/batch", post(media_batch_handler))
        .route("/api/media/{device_id}", get(media_handler))
        .route("/api/locations", post(location_handler))
        .route(
            "/api/locations/{device_id}/latest",
            get(latest_location_handler),
        )
        .route(
            "/api/locations/{device_id}/history",
            get(location_history_handler),
        )
        .layer(cors)
        .with_state(state)
}

/// Serve the relay until the process is stopped
pub async fn serve_relay(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let app = router(Arc::new(RelayState::new()));
    let listener = tokio::net::TcpListener::bind(format!("[::]:{}", port))
        .await
        .map_err(|e| format!("Failed to bind relay on port {}: {}", port, e))?;

    println!("Relay listening on: http://[::]:{} (IPv4 + IPv6)", port);
    println!("Endpoints:");
    println!("  POST /api/devices/register");
    println!("  GET  /api/devices/parent/{{parentId}}/children");
    println!("  POST /api/contacts/batch   GET /api/contacts/{{deviceId}}");
    println!("  POST /api/media/batch      GET /api/media/{{deviceId}}");
    println!("  POST /api/locations");
    println!("  GET  /api/locations/{{deviceId}}/latest");
    println!("  GET  /api/locations/{{deviceId}}/history?limit=N");

    if let Err(e) = axum::serve(listener, app).await {
        error!("[Relay] Server error: {}", e);
        return Err(e.into());
    }
    Ok(())
}
