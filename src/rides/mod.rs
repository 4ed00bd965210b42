//! 行程表的只读查询与座位调整
//!
//! 行程本身由预订流程维护。这里只提供两件事：确定谁是车主（决定会话角色），
//! 以及预订流程使用的座位增减。座位调整在调用边界上总是返回结果对象，不返回错误。

mod memory;
mod postgres;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::LocationError;

pub use memory::MemoryRideRepository;
pub use postgres::PgRideRepository;

/// 单个行程允许的最多座位
pub const MAX_SEATS: i32 = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ride {
    pub ride_id: String,
    pub host_id: String,
    pub total_seats: i32,
    pub available_seats: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeatAdjustment {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SeatAdjustment {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeatChange {
    Decrease,
    Increase,
}

#[async_trait]
pub trait RideRepository: Send + Sync {
    async fn find(&self, ride_id: &str) -> Result<Option<Ride>, LocationError>;

    /// 成功时返回调整后的行程；座位不足、超出上限或行程不存在时返回 `None`
    async fn adjust_seats(
        &self,
        ride_id: &str,
        change: SeatChange,
        count: i32,
    ) -> Result<Option<Ride>, LocationError>;

    async fn host_of(&self, ride_id: &str) -> Result<Option<String>, LocationError> {
        Ok(self.find(ride_id).await?.map(|ride| ride.host_id))
    }

    async fn decrease_available_seats(&self, ride_id: &str, count: i32) -> SeatAdjustment {
        apply_seat_change(self, ride_id, SeatChange::Decrease, count).await
    }

    async fn increase_available_seats(&self, ride_id: &str, count: i32) -> SeatAdjustment {
        apply_seat_change(self, ride_id, SeatChange::Increase, count).await
    }
}

async fn apply_seat_change<R: RideRepository + ?Sized>(
    rides: &R,
    ride_id: &str,
    change: SeatChange,
    count: i32,
) -> SeatAdjustment {
    if ride_id.trim().is_empty() {
        return SeatAdjustment::failed("ride_id must not be empty");
    }
    if !(1..=MAX_SEATS).contains(&count) {
        return SeatAdjustment::failed(format!(
            "seat count must be between 1 and {}, got {}",
            MAX_SEATS, count
        ));
    }

    match rides.adjust_seats(ride_id, change, count).await {
        Ok(Some(ride)) => {
            tracing::info!(
                "{:?} seats of ride {} by {}, {} now available",
                change,
                ride_id,
                count,
                ride.available_seats
            );
            SeatAdjustment::ok()
        }
        Ok(None) => SeatAdjustment::failed(match change {
            SeatChange::Decrease => format!("ride {} has fewer than {} seats left", ride_id, count),
            SeatChange::Increase => format!(
                "ride {} cannot free {} seats beyond its capacity",
                ride_id, count
            ),
        }),
        Err(e) => {
            tracing::error!("Error adjusting seats of ride {}: {}", ride_id, e);
            SeatAdjustment::failed(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rides() -> MemoryRideRepository {
        let rides = MemoryRideRepository::new();
        rides.insert(Ride {
            ride_id: "r1".into(),
            host_id: "host1".into(),
            total_seats: 4,
            available_seats: 2,
        });
        rides
    }

    #[tokio::test]
    async fn host_lookup() {
        let rides = rides();
        assert_eq!(rides.host_of("r1").await.unwrap().as_deref(), Some("host1"));
        assert_eq!(rides.host_of("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn decrease_respects_remaining_seats() {
        let rides = rides();
        assert_eq!(rides.decrease_available_seats("r1", 2).await, SeatAdjustment::ok());

        let refused = rides.decrease_available_seats("r1", 1).await;
        assert!(!refused.success);
        assert!(refused.error.is_some());
        assert_eq!(rides.find("r1").await.unwrap().unwrap().available_seats, 0);
    }

    #[tokio::test]
    async fn increase_is_capped_by_capacity() {
        let rides = rides();
        assert!(rides.increase_available_seats("r1", 2).await.success);
        assert!(!rides.increase_available_seats("r1", 1).await.success);
        assert_eq!(rides.find("r1").await.unwrap().unwrap().available_seats, 4);
    }

    #[tokio::test]
    async fn rejects_bad_input_and_unknown_rides() {
        let rides = rides();
        assert!(!rides.decrease_available_seats("r1", 0).await.success);
        assert!(!rides.increase_available_seats("r1", -3).await.success);
        assert!(!rides.increase_available_seats("r1", MAX_SEATS + 1).await.success);
        assert!(!rides.decrease_available_seats("", 1).await.success);
        assert!(!rides.decrease_available_seats("missing", 1).await.success);
        assert_eq!(rides.find("r1").await.unwrap().unwrap().available_seats, 2);
    }

    #[test]
    fn adjustment_serializes_without_empty_error() {
        let json = serde_json::to_value(SeatAdjustment::ok()).unwrap();
        assert_eq!(json, serde_json::json!({ "success": true }));
    }
}
