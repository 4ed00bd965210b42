use serde::Deserialize;

// 座位增减请求
#[derive(Debug, Deserialize)]
pub struct SeatRequest {
    pub count: i32,
}
