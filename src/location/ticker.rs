//! 本地 ETA 倒计时
//!
//! 两次权威 ETA 之间每秒减一，收到新的 ETA 立即覆盖本地推算值。
//! `Pending`（"–"）只出现在从未收到过 ETA 的时候；收到过 ETA 之后
//! 再收到空 ETA 表示已到达。

use std::fmt;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};

use crate::location::model::LocationSnapshot;

const TICK: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Countdown {
    Pending,
    Remaining(u32),
    Arrived,
}

impl fmt::Display for Countdown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Countdown::Pending => write!(f, "–"),
            Countdown::Remaining(seconds) => write!(f, "{:02}:{:02}", seconds / 60, seconds % 60),
            Countdown::Arrived => write!(f, "Arrived"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TickerState {
    Idle,
    Counting(u32),
    Arrived,
}

#[derive(Debug, Clone)]
pub struct EtaTicker {
    state: TickerState,
    baseline: Option<Instant>,
}

impl Default for EtaTicker {
    fn default() -> Self {
        Self::new()
    }
}

impl EtaTicker {
    pub fn new() -> Self {
        Self {
            state: TickerState::Idle,
            baseline: None,
        }
    }

    /// 收到权威 ETA
    pub fn reset(&mut self, eta_seconds: Option<u32>) {
        self.state = match (eta_seconds, self.state) {
            (Some(0), _) => TickerState::Arrived,
            (Some(seconds), _) => TickerState::Counting(seconds),
            (None, TickerState::Idle) => TickerState::Idle,
            (None, _) => TickerState::Arrived,
        };
        self.baseline = Some(Instant::now());
    }

    /// 过去了一秒
    pub fn tick(&mut self) {
        if let TickerState::Counting(seconds) = self.state {
            let remaining = seconds.saturating_sub(1);
            self.state = if remaining == 0 {
                TickerState::Arrived
            } else {
                TickerState::Counting(remaining)
            };
        }
    }

    pub fn remaining_seconds(&self) -> Option<u32> {
        match self.state {
            TickerState::Counting(seconds) => Some(seconds),
            TickerState::Arrived => Some(0),
            TickerState::Idle => None,
        }
    }

    /// 最近一次权威 ETA 到达的时间
    pub fn baseline(&self) -> Option<Instant> {
        self.baseline
    }

    pub fn countdown(&self) -> Countdown {
        match self.state {
            TickerState::Idle => Countdown::Pending,
            TickerState::Counting(seconds) => Countdown::Remaining(seconds),
            TickerState::Arrived => Countdown::Arrived,
        }
    }

    pub fn display(&self) -> String {
        self.countdown().to_string()
    }
}

/// 会话的倒计时任务：监听快照变化并每秒推进一次，会话关闭时被终止
pub(crate) async fn run_countdown(
    mut snapshots: watch::Receiver<LocationSnapshot>,
    output: watch::Sender<Countdown>,
) {
    let mut ticker = EtaTicker::new();
    {
        let snapshot = snapshots.borrow_and_update();
        if snapshot.last_updated.is_some() {
            ticker.reset(snapshot.eta_seconds);
        }
    }
    output.send_replace(ticker.countdown());

    let mut interval = tokio::time::interval_at(Instant::now() + TICK, TICK);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let eta_seconds = snapshots.borrow_and_update().eta_seconds;
                ticker.reset(eta_seconds);
                // 下一次递减在整整一秒之后
                interval.reset();
            }
            _ = interval.tick() => ticker.tick(),
        }

        let next = ticker.countdown();
        output.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn counts_down_from_authoritative_eta() {
        let mut ticker = EtaTicker::new();
        ticker.reset(Some(125));
        assert_eq!(ticker.display(), "02:05");

        ticker.tick();
        assert_eq!(ticker.display(), "02:04");

        for _ in 0..124 {
            ticker.tick();
        }
        assert_eq!(ticker.display(), "Arrived");
        assert_eq!(ticker.remaining_seconds(), Some(0));

        ticker.tick();
        assert_eq!(ticker.countdown(), Countdown::Arrived);
    }

    #[test]
    fn authoritative_value_overrides_extrapolation() {
        let mut ticker = EtaTicker::new();
        ticker.reset(Some(60));
        for _ in 0..10 {
            ticker.tick();
        }
        assert_eq!(ticker.remaining_seconds(), Some(50));

        ticker.reset(Some(90));
        assert_eq!(ticker.display(), "01:30");
    }

    #[test]
    fn arrived_returns_to_counting_on_new_eta() {
        let mut ticker = EtaTicker::new();
        ticker.reset(Some(1));
        ticker.tick();
        assert_eq!(ticker.countdown(), Countdown::Arrived);

        ticker.reset(Some(30));
        assert_eq!(ticker.countdown(), Countdown::Remaining(30));
    }

    #[test]
    fn pending_and_arrived_stay_distinct() {
        let mut ticker = EtaTicker::new();
        assert_eq!(ticker.display(), "–");
        assert!(ticker.baseline().is_none());

        // 还没收到过 ETA，空值不改变占位
        ticker.reset(None);
        assert_eq!(ticker.countdown(), Countdown::Pending);
        ticker.tick();
        assert_eq!(ticker.countdown(), Countdown::Pending);

        ticker.reset(Some(45));
        ticker.reset(None);
        assert_eq!(ticker.display(), "Arrived");

        let mut zero = EtaTicker::new();
        zero.reset(Some(0));
        assert_eq!(zero.countdown(), Countdown::Arrived);
    }

    #[test]
    fn minutes_are_not_wrapped() {
        assert_eq!(Countdown::Remaining(7500).to_string(), "125:00");
        assert_eq!(Countdown::Remaining(59).to_string(), "00:59");
    }

    fn snapshot(eta: Option<u32>) -> LocationSnapshot {
        LocationSnapshot {
            location: None,
            eta_seconds: eta,
            last_updated: Some(Utc::now()),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn driver_ticks_once_per_simulated_second() {
        let (snapshot_tx, snapshot_rx) = watch::channel(snapshot(Some(125)));
        let (countdown_tx, mut countdown_rx) = watch::channel(Countdown::Pending);
        let task = tokio::spawn(run_countdown(snapshot_rx, countdown_tx));

        let start = Instant::now();
        countdown_rx
            .wait_for(|c| *c == Countdown::Remaining(125))
            .await
            .unwrap();
        assert_eq!(countdown_rx.borrow().to_string(), "02:05");

        countdown_rx
            .wait_for(|c| *c == Countdown::Remaining(124))
            .await
            .unwrap();
        assert_eq!(start.elapsed(), Duration::from_secs(1));

        countdown_rx
            .wait_for(|c| *c == Countdown::Arrived)
            .await
            .unwrap();
        assert_eq!(start.elapsed(), Duration::from_secs(125));

        snapshot_tx.send_replace(snapshot(Some(10)));
        countdown_rx
            .wait_for(|c| *c == Countdown::Remaining(10))
            .await
            .unwrap();

        task.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn driver_without_snapshot_shows_placeholder() {
        let (_snapshot_tx, snapshot_rx) = watch::channel(LocationSnapshot::default());
        let (countdown_tx, countdown_rx) = watch::channel(Countdown::Arrived);
        let task = tokio::spawn(run_countdown(snapshot_rx, countdown_tx));

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(*countdown_rx.borrow(), Countdown::Pending);

        task.abort();
    }
}
