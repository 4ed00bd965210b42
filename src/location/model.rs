use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::error::LocationError;

/// 每个 (ride_id, user_id) 最新的一条位置记录，同时也是变更通知的完整负载
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationRecord {
    pub ride_id: String,
    pub user_id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub eta_seconds: Option<u32>,
    pub updated_at: DateTime<Utc>,
    /// 存储分配的写入序号，全局递增
    pub revision: i64,
}

impl LocationRecord {
    pub fn position(&self) -> LatLng {
        LatLng {
            lat: self.latitude,
            lng: self.longitude,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

/// 一次上报的输入
#[derive(Debug, Clone, PartialEq)]
pub struct NewLocation {
    pub ride_id: String,
    pub user_id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub eta_seconds: Option<u32>,
}

impl NewLocation {
    pub fn validate(&self) -> Result<(), LocationError> {
        if self.ride_id.trim().is_empty() {
            return Err(LocationError::Validation("ride_id must not be empty".into()));
        }
        if self.user_id.trim().is_empty() {
            return Err(LocationError::Validation("user_id must not be empty".into()));
        }
        if !self.latitude.is_finite() || !self.longitude.is_finite() {
            return Err(LocationError::Validation(format!(
                "coordinates must be finite, got ({}, {})",
                self.latitude, self.longitude
            )));
        }
        if let Some(eta) = self.eta_seconds.filter(|eta| *eta > MAX_ETA_SECONDS) {
            return Err(eta_out_of_range(eta));
        }
        Ok(())
    }
}

/// ETA 上限，与数据库 INTEGER 列一致
pub const MAX_ETA_SECONDS: u32 = i32::MAX as u32;

fn eta_out_of_range(eta: impl std::fmt::Display) -> LocationError {
    LocationError::Validation(format!(
        "eta_seconds must be between 0 and {}, got {}",
        MAX_ETA_SECONDS, eta
    ))
}

/// 从外部输入解析 ETA，负数或超过上限视为格式错误
pub fn parse_eta(eta_seconds: Option<i64>) -> Result<Option<u32>, LocationError> {
    eta_seconds
        .map(|eta| {
            u32::try_from(eta)
                .ok()
                .filter(|eta| *eta <= MAX_ETA_SECONDS)
                .ok_or_else(|| eta_out_of_range(eta))
        })
        .transpose()
}

/// 会话对外暴露的只读状态
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LocationSnapshot {
    pub location: Option<LatLng>,
    pub eta_seconds: Option<u32>,
    pub last_updated: Option<DateTime<Utc>>,
}

impl LocationSnapshot {
    /// 应用一条记录；记录比当前持有的更旧时不做修改，返回是否发生了变化
    pub fn apply(&mut self, record: &LocationRecord) -> bool {
        if let Some(current) = self.last_updated {
            if record.updated_at < current {
                return false;
            }
        }
        self.location = Some(record.position());
        self.eta_seconds = record.eta_seconds;
        self.last_updated = Some(record.updated_at);
        true
    }
}

impl From<&LocationRecord> for LocationSnapshot {
    fn from(record: &LocationRecord) -> Self {
        Self {
            location: Some(record.position()),
            eta_seconds: record.eta_seconds,
            last_updated: Some(record.updated_at),
        }
    }
}

/// ride_locations 表的行
#[derive(Debug, FromRow)]
pub struct LocationRow {
    pub ride_id: String,
    pub user_id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub eta_seconds: Option<i32>,
    pub updated_at: DateTime<Utc>,
    pub revision: i64,
}

impl From<LocationRow> for LocationRecord {
    fn from(row: LocationRow) -> Self {
        Self {
            ride_id: row.ride_id,
            user_id: row.user_id,
            latitude: row.latitude,
            longitude: row.longitude,
            // 表上有 CHECK 约束，负数不会出现
            eta_seconds: row.eta_seconds.and_then(|eta| u32::try_from(eta).ok()),
            updated_at: row.updated_at,
            revision: row.revision,
        }
    }
}
