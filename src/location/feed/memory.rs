use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use async_trait::async_trait;
use tokio::sync::broadcast::{self, error::RecvError};

use super::{ChangeFeed, ChangeHandler, Subscription, lock};
use crate::error::LocationError;
use crate::location::model::LocationRecord;

const DEFAULT_CAPACITY: usize = 64;

type Channels = Mutex<HashMap<String, broadcast::Sender<LocationRecord>>>;

/// 进程内的变更通道，每个行程一个 broadcast 通道
pub struct MemoryChangeFeed {
    channels: Arc<Channels>,
    capacity: usize,
}

/// 转发任务持有的接收端；任务结束或被终止时释放，行程没有接收者了就移除通道
struct ForwardReceiver {
    receiver: Option<broadcast::Receiver<LocationRecord>>,
    channels: Weak<Channels>,
    ride_id: String,
}

impl ForwardReceiver {
    async fn recv(&mut self) -> Result<LocationRecord, RecvError> {
        match self.receiver.as_mut() {
            Some(receiver) => receiver.recv().await,
            None => Err(RecvError::Closed),
        }
    }
}

impl Drop for ForwardReceiver {
    fn drop(&mut self) {
        drop(self.receiver.take());
        let Some(channels) = self.channels.upgrade() else {
            return;
        };
        let mut channels = lock(&channels);
        let idle = channels
            .get(&self.ride_id)
            .is_some_and(|sender| sender.receiver_count() == 0);
        if idle {
            channels.remove(&self.ride_id);
            tracing::debug!("Released location channel for ride {}", self.ride_id);
        }
    }
}

impl MemoryChangeFeed {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            channels: Arc::new(Mutex::new(HashMap::new())),
            capacity: capacity.max(1),
        }
    }

    /// 当前还有订阅者的行程数
    pub fn active_rides(&self) -> usize {
        lock(&self.channels).len()
    }
}

impl Default for MemoryChangeFeed {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChangeFeed for MemoryChangeFeed {
    async fn publish(&self, record: &LocationRecord) -> Result<(), LocationError> {
        let mut channels = lock(&self.channels);
        let orphaned = channels
            .get(&record.ride_id)
            .is_some_and(|sender| sender.send(record.clone()).is_err());
        if orphaned {
            // 没有接收者了，清理掉
            channels.remove(&record.ride_id);
        }
        Ok(())
    }

    fn subscribe(&self, ride_id: &str, handler: ChangeHandler) -> Subscription {
        let subscription = Subscription::new(ride_id, handler);

        let receiver = {
            let mut channels = lock(&self.channels);
            channels
                .entry(ride_id.to_string())
                .or_insert_with(|| broadcast::channel(self.capacity).0)
                .subscribe()
        };
        let mut receiver = ForwardReceiver {
            receiver: Some(receiver),
            channels: Arc::downgrade(&self.channels),
            ride_id: ride_id.to_string(),
        };

        let forwarder = subscription.clone();
        let task = tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(record) => {
                        forwarder.deliver(record);
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(
                            "Subscription {} lagged, skipped {} location updates",
                            forwarder.id(),
                            skipped
                        );
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });
        subscription.attach(task.abort_handle());

        tracing::debug!(
            "Subscription {} registered for ride {}",
            subscription.id(),
            ride_id
        );
        subscription
    }

    fn unsubscribe(&self, subscription: &Subscription) {
        // 终止转发任务；通道由任务释放接收端时清理
        subscription.cancel();
    }
}
