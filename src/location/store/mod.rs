mod memory;
mod postgres;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::LocationError;
use crate::location::feed::ChangeFeed;
use crate::location::model::{LocationRecord, NewLocation};

pub use memory::MemoryLocationRepository;
pub use postgres::PgLocationRepository;

/// 位置记录的持久化，按 (ride_id, user_id) 唯一
#[async_trait]
pub trait LocationRepository: Send + Sync {
    /// 插入或替换 (ride_id, user_id) 对应的记录，返回写入后的记录
    async fn upsert(&self, location: &NewLocation) -> Result<LocationRecord, LocationError>;

    /// 行程中最新的一条记录，`updated_at` 相同时取写入序号大的
    async fn latest(&self, ride_id: &str) -> Result<Option<LocationRecord>, LocationError>;
}

/// 位置数据的唯一写入入口：写入存储后通过变更通道广播
#[derive(Clone)]
pub struct LocationStore {
    repository: Arc<dyn LocationRepository>,
    feed: Arc<dyn ChangeFeed>,
}

impl LocationStore {
    pub fn new(repository: Arc<dyn LocationRepository>, feed: Arc<dyn ChangeFeed>) -> Self {
        Self { repository, feed }
    }

    /// 进程内存储，测试和本地调试使用
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(MemoryLocationRepository::new()),
            Arc::new(crate::location::feed::MemoryChangeFeed::new()),
        )
    }

    pub fn feed(&self) -> &Arc<dyn ChangeFeed> {
        &self.feed
    }

    pub async fn upsert(&self, location: NewLocation) -> Result<LocationRecord, LocationError> {
        location.validate()?;

        let record = self.repository.upsert(&location).await?;
        tracing::debug!(
            "Stored location of {} for ride {} (revision {})",
            record.user_id,
            record.ride_id,
            record.revision
        );

        // 写入已经生效，广播失败只记录日志，订阅方会在下次上报时追上
        if let Err(e) = self.feed.publish(&record).await {
            tracing::warn!(
                "Failed to publish location change for ride {}: {}",
                record.ride_id,
                e
            );
        }

        Ok(record)
    }

    pub async fn latest(&self, ride_id: &str) -> Result<Option<LocationRecord>, LocationError> {
        if ride_id.trim().is_empty() {
            return Err(LocationError::Validation("ride_id must not be empty".into()));
        }
        self.repository.latest(ride_id).await
    }
}
