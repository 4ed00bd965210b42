//! 按行程分发的位置变更通知
//!
//! 一个 [`Subscription`] 对应一个后台任务，同一订阅的回调按顺序执行，不会并发。
//! 传输层不保证顺序，单调性由订阅方（会话）按 `updated_at` 自行保证。

mod backoff;
mod memory;
mod redis_feed;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::task::AbortHandle;
use uuid::Uuid;

use crate::error::LocationError;
use crate::location::model::LocationRecord;

pub use backoff::Backoff;
pub use memory::MemoryChangeFeed;
pub use redis_feed::{RedisChangeFeed, channel_name};

pub type ChangeHandler = Arc<dyn Fn(LocationRecord) + Send + Sync>;

#[async_trait]
pub trait ChangeFeed: Send + Sync {
    /// 广播一条已写入的记录
    async fn publish(&self, record: &LocationRecord) -> Result<(), LocationError>;

    /// 注册回调。连接问题在后台重试，不会返回错误
    fn subscribe(&self, ride_id: &str, handler: ChangeHandler) -> Subscription;

    /// 幂等；通道本身已关闭时调用也是安全的
    fn unsubscribe(&self, subscription: &Subscription);
}

/// 订阅句柄，克隆后共享同一个订阅
#[derive(Clone)]
pub struct Subscription {
    inner: Arc<SubscriptionInner>,
}

struct SubscriptionInner {
    id: Uuid,
    ride_id: String,
    handler: ChangeHandler,
    live: Mutex<bool>,
    task: Mutex<Option<AbortHandle>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Subscription {
    pub fn new(ride_id: impl Into<String>, handler: ChangeHandler) -> Self {
        Self {
            inner: Arc::new(SubscriptionInner {
                id: Uuid::new_v4(),
                ride_id: ride_id.into(),
                handler,
                live: Mutex::new(true),
                task: Mutex::new(None),
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn ride_id(&self) -> &str {
        &self.inner.ride_id
    }

    pub fn is_active(&self) -> bool {
        *lock(&self.inner.live)
    }

    /// 把记录交给回调。订阅已取消或记录属于其他行程时什么都不做。
    ///
    /// 回调在持有 `live` 锁时执行，因此 `cancel` 返回后不会再有回调在跑。
    /// 回调内部不能取消自己所在的订阅。
    pub fn deliver(&self, record: LocationRecord) -> bool {
        if record.ride_id != self.inner.ride_id {
            return false;
        }
        let live = lock(&self.inner.live);
        if !*live {
            tracing::debug!(
                "Dropping delivery for cancelled subscription {}",
                self.inner.id
            );
            return false;
        }
        (self.inner.handler)(record);
        true
    }

    /// 绑定投递任务；订阅已取消时直接终止该任务
    pub(crate) fn attach(&self, task: AbortHandle) {
        let live = lock(&self.inner.live);
        if !*live {
            task.abort();
            return;
        }
        if let Some(previous) = lock(&self.inner.task).replace(task) {
            previous.abort();
        }
    }

    pub fn cancel(&self) {
        let mut live = lock(&self.inner.live);
        if !*live {
            return;
        }
        *live = false;
        if let Some(task) = lock(&self.inner.task).take() {
            task.abort();
        }
        drop(live);
        tracing::debug!(
            "Cancelled subscription {} for ride {}",
            self.inner.id,
            self.inner.ride_id
        );
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.inner.id)
            .field("ride_id", &self.inner.ride_id)
            .field("active", &self.is_active())
            .finish()
    }
}
