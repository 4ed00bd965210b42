use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use chrono::Utc;

use super::LocationRepository;
use crate::error::LocationError;
use crate::location::model::{LocationRecord, NewLocation};

#[derive(Default)]
struct Table {
    rows: HashMap<(String, String), LocationRecord>,
    next_revision: i64,
}

/// 进程内的位置表
#[derive(Default)]
pub struct MemoryLocationRepository {
    table: Mutex<Table>,
}

impl MemoryLocationRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .rows
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl LocationRepository for MemoryLocationRepository {
    async fn upsert(&self, location: &NewLocation) -> Result<LocationRecord, LocationError> {
        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        table.next_revision += 1;
        let revision = table.next_revision;

        let key = (location.ride_id.clone(), location.user_id.clone());
        let mut updated_at = Utc::now();
        // 时钟回拨时也不能让新写入带上更旧的时间
        if let Some(previous) = table.rows.get(&key) {
            updated_at = updated_at.max(previous.updated_at);
        }

        let record = LocationRecord {
            ride_id: location.ride_id.clone(),
            user_id: location.user_id.clone(),
            latitude: location.latitude,
            longitude: location.longitude,
            eta_seconds: location.eta_seconds,
            updated_at,
            revision,
        };
        table.rows.insert(key, record.clone());
        Ok(record)
    }

    async fn latest(&self, ride_id: &str) -> Result<Option<LocationRecord>, LocationError> {
        let table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(table
            .rows
            .values()
            .filter(|record| record.ride_id == ride_id)
            .max_by_key(|record| (record.updated_at, record.revision))
            .cloned())
    }
}
