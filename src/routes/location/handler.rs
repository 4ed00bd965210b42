use std::convert::Infallible;

use axum::{
    Extension, Json,
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
};
use futures_util::Stream;

use crate::{
    AppState,
    error::AppError,
    location::{LocationRecord, LocationSession, LocationUpdater, SessionRole},
    utils::{ApiResponse, Claims, success_to_api_response},
};

use super::{model::UpdateLocationRequest, stream::session_events};

/// 车主是行程的 host_id，其余用户都是骑乘者
async fn resolve_role(
    state: &AppState,
    ride_id: &str,
    user_id: &str,
) -> Result<SessionRole, AppError> {
    match state.rides.host_of(ride_id).await? {
        Some(host_id) if host_id == user_id => Ok(SessionRole::Host),
        Some(_) => Ok(SessionRole::Rider),
        None => Err(AppError::NotFound(format!("ride {} not found", ride_id))),
    }
}

#[axum::debug_handler]
pub async fn get_latest(
    State(state): State<AppState>,
    Path(ride_id): Path<String>,
) -> Result<Json<ApiResponse<Option<LocationRecord>>>, AppError> {
    // 还没有上报过时返回 null，不算错误
    let record = state.locations.latest(&ride_id).await?;
    Ok(success_to_api_response(record))
}

#[axum::debug_handler]
pub async fn update_location(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(ride_id): Path<String>,
    Json(req): Json<UpdateLocationRequest>,
) -> Result<Json<ApiResponse<LocationRecord>>, AppError> {
    let eta_seconds = req.eta()?;

    let role = resolve_role(&state, &ride_id, &claims.sub).await?;
    let Some(updater) =
        LocationUpdater::for_role(&state.locations, ride_id.as_str(), claims.sub.as_str(), role)
    else {
        tracing::warn!("User {} tried to report location for ride {}", claims.sub, ride_id);
        return Err(AppError::PermissionDenied);
    };

    let record = updater
        .update_my_location(req.latitude, req.longitude, eta_seconds)
        .await?;

    Ok(success_to_api_response(record))
}

/// 实时位置推送，连接断开时会话随流一起释放
pub async fn stream_location(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(ride_id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let role = resolve_role(&state, &ride_id, &claims.sub).await?;
    let session = LocationSession::open(&state.locations, ride_id, claims.sub, role).await;

    Ok(Sse::new(session_events(session)).keep_alive(KeepAlive::default()))
}
