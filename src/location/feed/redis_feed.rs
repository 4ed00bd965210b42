use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use redis::{AsyncCommands, Client as RedisClient};

use super::{Backoff, ChangeFeed, ChangeHandler, Subscription};
use crate::error::LocationError;
use crate::location::model::LocationRecord;

/// 位置变更频道前缀
const LOCATION_CHANNEL_PREFIX: &str = "ride:loc:";

pub fn channel_name(ride_id: &str) -> String {
    format!("{}{}", LOCATION_CHANNEL_PREFIX, ride_id)
}

/// 基于 Redis PUBLISH/SUBSCRIBE 的变更通道
///
/// 每个订阅占用一条独立的 pub/sub 连接，断开后按 [`Backoff`] 无限重连，直到订阅被取消。
pub struct RedisChangeFeed {
    client: RedisClient,
    reconnect_initial: Duration,
    reconnect_max: Duration,
}

impl RedisChangeFeed {
    pub fn new(client: RedisClient, reconnect_initial: Duration, reconnect_max: Duration) -> Self {
        Self {
            client,
            reconnect_initial,
            reconnect_max,
        }
    }
}

#[async_trait]
impl ChangeFeed for RedisChangeFeed {
    async fn publish(&self, record: &LocationRecord) -> Result<(), LocationError> {
        let payload = serde_json::to_string(record)?;
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let receivers: i64 = conn.publish(channel_name(&record.ride_id), payload).await?;
        tracing::debug!(
            "Published location of {} for ride {} to {} listeners",
            record.user_id,
            record.ride_id,
            receivers
        );
        Ok(())
    }

    fn subscribe(&self, ride_id: &str, handler: ChangeHandler) -> Subscription {
        let subscription = Subscription::new(ride_id, handler);
        let backoff = Backoff::new(self.reconnect_initial, self.reconnect_max);

        let task = tokio::spawn(listen_until_cancelled(
            self.client.clone(),
            subscription.clone(),
            backoff,
        ));
        subscription.attach(task.abort_handle());
        subscription
    }

    fn unsubscribe(&self, subscription: &Subscription) {
        // 任务终止时 pub/sub 连接随之关闭
        subscription.cancel();
    }
}

async fn listen_until_cancelled(
    client: RedisClient,
    subscription: Subscription,
    mut backoff: Backoff,
) {
    let channel = channel_name(subscription.ride_id());

    while subscription.is_active() {
        match listen(&client, &channel, &subscription, &mut backoff).await {
            Ok(()) => tracing::info!("Redis stream for {} closed, resubscribing", channel),
            Err(e) => tracing::warn!("Redis subscription to {} failed: {}", channel, e),
        }
        if !subscription.is_active() {
            break;
        }

        let delay = backoff.next_delay();
        tracing::debug!("Reconnecting to {} in {:?}", channel, delay);
        tokio::time::sleep(delay).await;
    }
}

async fn listen(
    client: &RedisClient,
    channel: &str,
    subscription: &Subscription,
    backoff: &mut Backoff,
) -> redis::RedisResult<()> {
    let mut pubsub = client.get_async_pubsub().await?;
    pubsub.subscribe(channel).await?;
    backoff.reset();
    tracing::info!("Subscription {} listening on {}", subscription.id(), channel);

    let mut messages = pubsub.on_message();
    while let Some(msg) = messages.next().await {
        let payload: String = match msg.get_payload() {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!("Unreadable payload on {}: {}", channel, e);
                continue;
            }
        };

        match serde_json::from_str::<LocationRecord>(&payload) {
            Ok(record) => {
                subscription.deliver(record);
            }
            Err(e) => tracing::warn!("Malformed location payload on {}: {}", channel, e),
        }
    }

    Ok(())
}
