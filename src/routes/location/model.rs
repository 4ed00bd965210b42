use serde::Deserialize;

use crate::error::LocationError;
use crate::location::model::parse_eta;

// 车主上报位置请求
#[derive(Debug, Deserialize)]
pub struct UpdateLocationRequest {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub eta_seconds: Option<i64>,
}

impl UpdateLocationRequest {
    pub fn eta(&self) -> Result<Option<u32>, LocationError> {
        parse_eta(self.eta_seconds)
    }
}
