use async_trait::async_trait;
use sqlx::{FromRow, PgPool};

use super::{Ride, RideRepository, SeatChange};
use crate::error::LocationError;

#[derive(Debug, FromRow)]
struct RideRow {
    ride_id: String,
    host_id: String,
    total_seats: i32,
    available_seats: i32,
}

impl From<RideRow> for Ride {
    fn from(row: RideRow) -> Self {
        Self {
            ride_id: row.ride_id,
            host_id: row.host_id,
            total_seats: row.total_seats,
            available_seats: row.available_seats,
        }
    }
}

pub struct PgRideRepository {
    pool: PgPool,
}

impl PgRideRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RideRepository for PgRideRepository {
    async fn find(&self, ride_id: &str) -> Result<Option<Ride>, LocationError> {
        let row = sqlx::query_as::<_, RideRow>(
            r#"
            SELECT ride_id, host_id, total_seats, available_seats
            FROM rides
            WHERE ride_id = $1
            "#,
        )
        .bind(ride_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Ride::from))
    }

    async fn adjust_seats(
        &self,
        ride_id: &str,
        change: SeatChange,
        count: i32,
    ) -> Result<Option<Ride>, LocationError> {
        // 条件更新：不满足范围时没有行被修改
        let delta = match change {
            SeatChange::Decrease => -count,
            SeatChange::Increase => count,
        };

        let row = sqlx::query_as::<_, RideRow>(
            r#"
            UPDATE rides
            SET available_seats = available_seats + $2
            WHERE ride_id = $1
              AND available_seats + $2 BETWEEN 0 AND total_seats
            RETURNING ride_id, host_id, total_seats, available_seats
            "#,
        )
        .bind(ride_id)
        .bind(delta)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Ride::from))
    }
}
