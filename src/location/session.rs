use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::watch;
use tokio::task::AbortHandle;

use crate::error::LocationError;
use crate::location::feed::{ChangeFeed, ChangeHandler, Subscription};
use crate::location::model::{LocationRecord, LocationSnapshot, NewLocation};
use crate::location::store::LocationStore;
use crate::location::ticker::{Countdown, run_countdown};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionRole {
    Host,
    Rider,
}

/// 车主上报自己位置的能力，只有车主会话持有
#[derive(Clone)]
pub struct LocationUpdater {
    store: LocationStore,
    ride_id: String,
    user_id: String,
}

impl LocationUpdater {
    /// 唯一的构造入口：只有车主能拿到
    pub fn for_role(
        store: &LocationStore,
        ride_id: impl Into<String>,
        user_id: impl Into<String>,
        role: SessionRole,
    ) -> Option<Self> {
        match role {
            SessionRole::Host => Some(Self {
                store: store.clone(),
                ride_id: ride_id.into(),
                user_id: user_id.into(),
            }),
            SessionRole::Rider => None,
        }
    }

    pub async fn update_my_location(
        &self,
        latitude: f64,
        longitude: f64,
        eta_seconds: Option<u32>,
    ) -> Result<LocationRecord, LocationError> {
        self.store
            .upsert(NewLocation {
                ride_id: self.ride_id.clone(),
                user_id: self.user_id.clone(),
                latitude,
                longitude,
                eta_seconds,
            })
            .await
    }
}

/// 一个观看者与一个行程实时位置的绑定
///
/// 打开时先订阅变更，再读最新记录作为初始状态；读取期间到达的变更先暂存，
/// 读完后再按时间应用。只接受不比当前更旧的记录。
/// 关闭（或 drop）时同步取消订阅和倒计时任务。
/// 行程或用户为空时进入空操作模式：不访问存储和通道，状态永远为空。
pub struct LocationSession {
    ride_id: String,
    user_id: String,
    role: SessionRole,
    state: Arc<watch::Sender<LocationSnapshot>>,
    countdown: watch::Receiver<Countdown>,
    feed: Option<Arc<dyn ChangeFeed>>,
    subscription: Option<Subscription>,
    countdown_task: Option<AbortHandle>,
    updater: Option<LocationUpdater>,
}

impl LocationSession {
    pub async fn open(
        store: &LocationStore,
        ride_id: impl Into<String>,
        user_id: impl Into<String>,
        role: SessionRole,
    ) -> Self {
        let ride_id = ride_id.into();
        let user_id = user_id.into();
        let state = Arc::new(watch::channel(LocationSnapshot::default()).0);

        if ride_id.trim().is_empty() || user_id.trim().is_empty() {
            tracing::debug!("Opening inert location session: ride or user id missing");
            let (_, countdown) = watch::channel(Countdown::Pending);
            return Self {
                ride_id,
                user_id,
                role,
                state,
                countdown,
                feed: None,
                subscription: None,
                countdown_task: None,
                updater: None,
            };
        }

        // 读取期间到达的变更暂存在这里，初始状态写入后才直接应用
        let pending = Arc::new(Mutex::new(Some(Vec::new())));

        let handler_state = Arc::clone(&state);
        let handler_pending = Arc::clone(&pending);
        let handler: ChangeHandler = Arc::new(move |record: LocationRecord| {
            let mut pending = handler_pending
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            match pending.as_mut() {
                Some(buffered) => buffered.push(record),
                None => {
                    handler_state.send_if_modified(|snapshot| snapshot.apply(&record));
                }
            }
        });
        let feed = Arc::clone(store.feed());
        let guard = OpeningSubscription {
            feed: &feed,
            subscription: feed.subscribe(&ride_id, handler),
            armed: true,
        };

        let initial = match store.latest(&ride_id).await {
            Ok(record) => {
                if record.is_none() {
                    tracing::debug!("No location reported yet for ride {}", ride_id);
                }
                record
            }
            Err(e) => {
                tracing::warn!("Initial location read for ride {} failed: {}", ride_id, e);
                None
            }
        };

        {
            let mut pending = pending.lock().unwrap_or_else(PoisonError::into_inner);
            let buffered = pending.take().unwrap_or_default();
            if !buffered.is_empty() {
                tracing::debug!(
                    "Applying {} location changes received while opening ride {}",
                    buffered.len(),
                    ride_id
                );
            }
            state.send_if_modified(|snapshot| {
                let mut changed = false;
                for record in initial.iter().chain(buffered.iter()) {
                    changed |= snapshot.apply(record);
                }
                changed
            });
        }

        let subscription = guard.keep();

        let (countdown_tx, countdown) = watch::channel(Countdown::Pending);
        let countdown_task = tokio::spawn(run_countdown(state.subscribe(), countdown_tx));

        let updater = LocationUpdater::for_role(store, ride_id.as_str(), user_id.as_str(), role);

        tracing::info!(
            "Location session opened for ride {} by {} ({:?})",
            ride_id,
            user_id,
            role
        );

        Self {
            ride_id,
            user_id,
            role,
            state,
            countdown,
            feed: Some(feed),
            subscription: Some(subscription),
            countdown_task: Some(countdown_task.abort_handle()),
            updater,
        }
    }

    pub fn ride_id(&self) -> &str {
        &self.ride_id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn role(&self) -> SessionRole {
        self.role
    }

    pub fn is_live(&self) -> bool {
        self.subscription
            .as_ref()
            .is_some_and(Subscription::is_active)
    }

    pub fn snapshot(&self) -> LocationSnapshot {
        self.state.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<LocationSnapshot> {
        self.state.subscribe()
    }

    pub fn countdown(&self) -> watch::Receiver<Countdown> {
        self.countdown.clone()
    }

    /// 骑乘者会话返回 `None`
    pub fn updater(&self) -> Option<&LocationUpdater> {
        self.updater.as_ref()
    }

    pub fn close(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            match &self.feed {
                Some(feed) => feed.unsubscribe(&subscription),
                None => subscription.cancel(),
            }
            tracing::info!(
                "Location session closed for ride {} by {}",
                self.ride_id,
                self.user_id
            );
        }
        if let Some(task) = self.countdown_task.take() {
            task.abort();
        }
    }
}

/// `open` 在读取初始记录时被取消的话，已建立的订阅随之退订
struct OpeningSubscription<'a> {
    feed: &'a Arc<dyn ChangeFeed>,
    subscription: Subscription,
    armed: bool,
}

impl OpeningSubscription<'_> {
    fn keep(mut self) -> Subscription {
        self.armed = false;
        self.subscription.clone()
    }
}

impl Drop for OpeningSubscription<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.feed.unsubscribe(&self.subscription);
        }
    }
}

impl Drop for LocationSession {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::feed::MemoryChangeFeed;
    use crate::location::model::LatLng;
    use crate::location::store::{LocationRepository, MemoryLocationRepository};
    use async_trait::async_trait;
    use chrono::{Duration, Utc};
    use tokio::sync::Notify;

    fn record(lat: f64, eta: Option<u32>, updated_at: chrono::DateTime<Utc>) -> LocationRecord {
        LocationRecord {
            ride_id: "r1".into(),
            user_id: "host1".into(),
            latitude: lat,
            longitude: -73.0,
            eta_seconds: eta,
            updated_at,
            revision: 1,
        }
    }

    struct UnreachableRepository;

    #[async_trait]
    impl LocationRepository for UnreachableRepository {
        async fn upsert(&self, _: &NewLocation) -> Result<LocationRecord, LocationError> {
            Err(LocationError::Transient("timeout".into()))
        }

        async fn latest(&self, _: &str) -> Result<Option<LocationRecord>, LocationError> {
            Err(LocationError::Transient("timeout".into()))
        }
    }

    /// `latest` 读完表之后停下，等测试放行
    #[derive(Default)]
    struct GatedRepository {
        inner: MemoryLocationRepository,
        reading: Notify,
        gate: Notify,
    }

    #[async_trait]
    impl LocationRepository for GatedRepository {
        async fn upsert(&self, location: &NewLocation) -> Result<LocationRecord, LocationError> {
            self.inner.upsert(location).await
        }

        async fn latest(&self, ride_id: &str) -> Result<Option<LocationRecord>, LocationError> {
            let found = self.inner.latest(ride_id).await;
            self.reading.notify_one();
            self.gate.notified().await;
            found
        }
    }

    #[tokio::test]
    async fn seeds_state_from_latest_record() {
        let store = LocationStore::in_memory();
        let stored = store
            .upsert(NewLocation {
                ride_id: "r1".into(),
                user_id: "host1".into(),
                latitude: 40.0,
                longitude: -73.0,
                eta_seconds: Some(120),
            })
            .await
            .unwrap();

        let session = LocationSession::open(&store, "r1", "rider1", SessionRole::Rider).await;
        let snapshot = session.snapshot();
        assert_eq!(snapshot.location, Some(LatLng { lat: 40.0, lng: -73.0 }));
        assert_eq!(snapshot.eta_seconds, Some(120));
        assert_eq!(snapshot.last_updated, Some(stored.updated_at));
    }

    #[tokio::test]
    async fn only_hosts_receive_an_updater() {
        let store = LocationStore::in_memory();
        let host = LocationSession::open(&store, "r1", "host1", SessionRole::Host).await;
        let rider = LocationSession::open(&store, "r1", "rider1", SessionRole::Rider).await;

        assert!(host.updater().is_some());
        assert!(rider.updater().is_none());
    }

    #[tokio::test]
    async fn out_of_order_delivery_never_regresses() {
        let store = LocationStore::in_memory();
        let session = LocationSession::open(&store, "r1", "rider1", SessionRole::Rider).await;
        let subscription = session.subscription.clone().unwrap();

        let t1 = Utc::now();
        let t2 = t1 + Duration::seconds(3);
        subscription.deliver(record(41.0, Some(60), t2));
        subscription.deliver(record(40.0, Some(90), t1));

        let snapshot = session.snapshot();
        assert_eq!(snapshot.location.map(|p| p.lat), Some(41.0));
        assert_eq!(snapshot.eta_seconds, Some(60));
        assert_eq!(snapshot.last_updated, Some(t2));
    }

    #[tokio::test]
    async fn closed_session_ignores_late_deliveries() {
        let store = LocationStore::in_memory();
        let mut session = LocationSession::open(&store, "r1", "rider1", SessionRole::Rider).await;
        let subscription = session.subscription.clone().unwrap();

        session.close();
        session.close();

        assert!(!session.is_live());
        assert!(!subscription.deliver(record(40.0, Some(30), Utc::now())));
        assert_eq!(session.snapshot(), LocationSnapshot::default());

        store
            .upsert(NewLocation {
                ride_id: "r1".into(),
                user_id: "host1".into(),
                latitude: 40.0,
                longitude: -73.0,
                eta_seconds: Some(30),
            })
            .await
            .unwrap();
        tokio::task::yield_now().await;
        assert_eq!(session.snapshot(), LocationSnapshot::default());
    }

    #[tokio::test]
    async fn empty_ids_make_an_inert_session() {
        let feed = Arc::new(MemoryChangeFeed::new());
        let repository = Arc::new(MemoryLocationRepository::new());
        let store = LocationStore::new(repository.clone(), feed.clone());

        let mut session = LocationSession::open(&store, "", "host1", SessionRole::Host).await;
        assert!(session.updater().is_none());
        assert!(!session.is_live());
        assert_eq!(session.snapshot(), LocationSnapshot::default());
        assert_eq!(*session.countdown().borrow(), Countdown::Pending);
        assert_eq!(feed.active_rides(), 0);

        let other = LocationSession::open(&store, "r1", "", SessionRole::Rider).await;
        assert!(!other.is_live());
        assert_eq!(feed.active_rides(), 0);
        assert!(repository.is_empty());

        session.close();
    }

    #[tokio::test]
    async fn initial_read_failure_keeps_session_usable() {
        let store = LocationStore::new(
            Arc::new(UnreachableRepository),
            Arc::new(MemoryChangeFeed::new()),
        );
        let mut session = LocationSession::open(&store, "r1", "host1", SessionRole::Host).await;
        assert!(session.is_live());
        assert_eq!(session.snapshot(), LocationSnapshot::default());

        // 写入失败要传给调用方
        let result = session
            .updater()
            .unwrap()
            .update_my_location(40.0, -73.0, Some(300))
            .await;
        assert!(matches!(result, Err(LocationError::Transient(_))));

        session.close();
        assert!(!session.is_live());
    }

    #[tokio::test(start_paused = true)]
    async fn rider_sees_host_update_and_starts_counting() {
        let store = LocationStore::in_memory();
        let host = LocationSession::open(&store, "r1", "host1", SessionRole::Host).await;
        let rider = LocationSession::open(&store, "r1", "rider1", SessionRole::Rider).await;

        host.updater()
            .unwrap()
            .update_my_location(40.0, -73.0, Some(300))
            .await
            .unwrap();

        let mut rider_state = rider.watch();
        let snapshot = rider_state
            .wait_for(|s| s.eta_seconds == Some(300))
            .await
            .unwrap()
            .clone();
        assert_eq!(snapshot.location, Some(LatLng { lat: 40.0, lng: -73.0 }));

        let mut countdown = rider.countdown();
        countdown
            .wait_for(|c| *c == Countdown::Remaining(300))
            .await
            .unwrap();
        countdown
            .wait_for(|c| *c == Countdown::Remaining(299))
            .await
            .unwrap();
        assert_eq!(countdown.borrow().to_string(), "04:59");

        // 车主自己的会话也会收到
        let mut host_state = host.watch();
        host_state
            .wait_for(|s| s.eta_seconds == Some(300))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn write_during_initial_read_is_not_lost() {
        let repository = Arc::new(GatedRepository::default());
        let feed = Arc::new(MemoryChangeFeed::new());
        let store = LocationStore::new(repository.clone(), feed);

        let opening = tokio::spawn({
            let store = store.clone();
            async move { LocationSession::open(&store, "r1", "rider1", SessionRole::Rider).await }
        });

        // 读已经完成但还没返回时，车主写入
        repository.reading.notified().await;
        store
            .upsert(NewLocation {
                ride_id: "r1".into(),
                user_id: "host1".into(),
                latitude: 40.0,
                longitude: -73.0,
                eta_seconds: Some(300),
            })
            .await
            .unwrap();
        repository.gate.notify_one();

        let session = opening.await.unwrap();
        let mut watch = session.watch();
        let snapshot = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            watch.wait_for(|s| s.eta_seconds == Some(300)),
        )
        .await
        .expect("rider should observe the write committed while opening")
        .unwrap()
        .clone();
        assert_eq!(snapshot.location, Some(LatLng { lat: 40.0, lng: -73.0 }));
    }

    #[tokio::test]
    async fn cancelled_open_releases_its_subscription() {
        let repository = Arc::new(GatedRepository::default());
        let feed = Arc::new(MemoryChangeFeed::new());
        let store = LocationStore::new(repository.clone(), feed.clone());

        let opening = tokio::spawn({
            let store = store.clone();
            async move { LocationSession::open(&store, "r1", "rider1", SessionRole::Rider).await }
        });
        repository.reading.notified().await;
        assert_eq!(feed.active_rides(), 1);

        opening.abort();
        assert!(opening.await.err().unwrap().is_cancelled());
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(feed.active_rides(), 0);
    }

    #[test]
    fn updater_is_only_built_for_hosts() {
        let store = LocationStore::in_memory();
        assert!(LocationUpdater::for_role(&store, "r1", "host1", SessionRole::Host).is_some());
        assert!(LocationUpdater::for_role(&store, "r1", "rider1", SessionRole::Rider).is_none());
    }
}
