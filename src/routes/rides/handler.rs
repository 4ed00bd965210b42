use axum::{
    Json,
    extract::{Path, State},
};

use crate::{
    AppState,
    rides::SeatAdjustment,
    utils::{ApiResponse, success_to_api_response},
};

use super::model::SeatRequest;

// 失败也通过 SeatAdjustment 返回，不走错误码
#[axum::debug_handler]
pub async fn decrease_seats(
    State(state): State<AppState>,
    Path(ride_id): Path<String>,
    Json(req): Json<SeatRequest>,
) -> Json<ApiResponse<SeatAdjustment>> {
    success_to_api_response(state.rides.decrease_available_seats(&ride_id, req.count).await)
}

#[axum::debug_handler]
pub async fn increase_seats(
    State(state): State<AppState>,
    Path(ride_id): Path<String>,
    Json(req): Json<SeatRequest>,
) -> Json<ApiResponse<SeatAdjustment>> {
    success_to_api_response(state.rides.increase_available_seats(&ride_id, req.count).await)
}
