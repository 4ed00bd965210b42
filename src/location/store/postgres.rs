use async_trait::async_trait;
use sqlx::PgPool;

use super::LocationRepository;
use crate::error::LocationError;
use crate::location::model::{LocationRecord, LocationRow, NewLocation};

pub struct PgLocationRepository {
    pool: PgPool,
}

impl PgLocationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LocationRepository for PgLocationRepository {
    async fn upsert(&self, location: &NewLocation) -> Result<LocationRecord, LocationError> {
        let eta_seconds = location
            .eta_seconds
            .map(i32::try_from)
            .transpose()
            .map_err(|e| LocationError::Validation(format!("eta_seconds too large: {}", e)))?;

        // ON CONFLICT 会锁住已有行，同一 key 的并发写入在这里串行化
        let row = sqlx::query_as::<_, LocationRow>(
            r#"
            INSERT INTO ride_locations (
                ride_id, user_id, latitude, longitude, eta_seconds, updated_at, revision
            )
            VALUES ($1, $2, $3, $4, $5, clock_timestamp(), nextval('ride_locations_revision_seq'))
            ON CONFLICT (ride_id, user_id) DO UPDATE SET
                latitude = EXCLUDED.latitude,
                longitude = EXCLUDED.longitude,
                eta_seconds = EXCLUDED.eta_seconds,
                updated_at = GREATEST(EXCLUDED.updated_at, ride_locations.updated_at),
                revision = EXCLUDED.revision
            RETURNING
                ride_id, user_id, latitude, longitude, eta_seconds, updated_at, revision
            "#,
        )
        .bind(&location.ride_id)
        .bind(&location.user_id)
        .bind(location.latitude)
        .bind(location.longitude)
        .bind(eta_seconds)
        .fetch_one(&self.pool)
        .await?;

        Ok(LocationRecord::from(row))
    }

    async fn latest(&self, ride_id: &str) -> Result<Option<LocationRecord>, LocationError> {
        let row = sqlx::query_as::<_, LocationRow>(
            r#"
            SELECT
                ride_id, user_id, latitude, longitude, eta_seconds, updated_at, revision
            FROM ride_locations
            WHERE ride_id = $1
            ORDER BY updated_at DESC, revision DESC
            LIMIT 1
            "#,
        )
        .bind(ride_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(LocationRecord::from))
    }
}
