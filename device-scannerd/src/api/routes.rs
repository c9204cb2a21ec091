use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::Deserialize;
use tokio::sync::watch;
use shared::protocol::{
    API_CACHE, API_DEVICES, API_DEVICES_HASH, API_DEVICE_CONTROL, API_NETWORK_INFO, API_SCAN_NETWORK,
};
use shared::types::{ControlRequest, ControlResponse, Device, NetworkInfo};
use crate::service::DeviceService;

#[derive(Clone)]
pub struct AppState {
    pub service: DeviceService,
    pub hash_rx: watch::Receiver<String>,
}

#[derive(Deserialize)]
pub struct ScanQuery {
    #[serde(default)]
    pub force: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloudLinkBody {
    pub cloud_link_id: String,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route(API_NETWORK_INFO, get(get_network_info))
        .route(API_SCAN_NETWORK, get(scan_network))
        .route(API_DEVICE_CONTROL, post(control_device))
        .route(API_DEVICES, get(get_devices))
        .route(API_DEVICES_HASH, get(get_hash))
        .route("/api/devices/:id/cloud-link", put(set_cloud_link))
        .route(API_CACHE, delete(clear_cache))
        .with_state(state)
}

async fn get_network_info(State(state): State<AppState>) -> Json<NetworkInfo> {
    Json(state.service.network_info())
}

async fn scan_network(State(state): State<AppState>, Query(params): Query<ScanQuery>) -> Json<Vec<Device>> {
    Json(state.service.scan(params.force).await)
}

/// Failures are reported in the body, never as a transport error. That
/// includes bodies that do not parse.
async fn control_device(
    State(state): State<AppState>,
    payload: Result<Json<ControlRequest>, JsonRejection>,
) -> Json<ControlResponse> {
    match payload {
        Ok(Json(request)) => Json(state.service.control(&request).await),
        Err(rejection) => {
            tracing::warn!("Rejected control request: {}", rejection.body_text());
            Json(ControlResponse::failed(rejection.body_text()))
        }
    }
}

async fn get_devices(State(state): State<AppState>) -> Result<Json<Vec<Device>>, StatusCode> {
    state.service.devices().await.map(Json).map_err(|e| {
        tracing::error!("Failed to query devices: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })
}

async fn get_hash(State(state): State<AppState>) -> String {
    state.hash_rx.borrow().clone()
}

async fn set_cloud_link(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<CloudLinkBody>,
) -> Result<Json<Device>, StatusCode> {
    state
        .service
        .set_cloud_link(&id, body.cloud_link_id)
        .await
        .map_err(|e| {
            tracing::error!("Failed to link device: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

async fn clear_cache(State(state): State<AppState>) -> StatusCode {
    match state.service.clear().await {
        Ok(()) => StatusCode::NO_CONTENT,
        Err(e) => {
            tracing::error!("Failed to clear cache: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}
