use std::convert::Infallible;

use axum::response::sse::Event;
use futures_util::{Stream, stream};
use tokio::sync::watch;

use crate::location::{Countdown, LocationSession, LocationSnapshot};

struct LiveView {
    // 持有会话直到流被丢弃
    session: LocationSession,
    snapshots: watch::Receiver<LocationSnapshot>,
    countdown: watch::Receiver<Countdown>,
}

enum Change {
    Location,
    Countdown,
    Closed,
}

pub fn session_events(session: LocationSession) -> impl Stream<Item = Result<Event, Infallible>> {
    let mut snapshots = session.watch();
    let mut countdown = session.countdown();
    // 连接建立后先推送一次当前状态
    snapshots.mark_changed();
    countdown.mark_changed();

    let view = LiveView {
        session,
        snapshots,
        countdown,
    };

    stream::unfold(view, |mut view| async move {
        let change = tokio::select! {
            biased;
            changed = view.snapshots.changed() => match changed {
                Ok(()) => Change::Location,
                Err(_) => Change::Closed,
            },
            changed = view.countdown.changed() => match changed {
                Ok(()) => Change::Countdown,
                Err(_) => Change::Closed,
            },
        };

        let event = match change {
            Change::Location => {
                let snapshot = view.snapshots.borrow_and_update().clone();
                location_event(&snapshot)
            }
            Change::Countdown => {
                let countdown = *view.countdown.borrow_and_update();
                Event::default()
                    .event("countdown")
                    .data(countdown.to_string())
            }
            Change::Closed => {
                tracing::debug!("Live view for ride {} ended", view.session.ride_id());
                return None;
            }
        };

        Some((Ok(event), view))
    })
}

fn location_event(snapshot: &LocationSnapshot) -> Event {
    Event::default()
        .event("location")
        .json_data(snapshot)
        .unwrap_or_else(|e| {
            tracing::warn!("Failed to encode location snapshot: {}", e);
            Event::default().event("location").data("{}")
        })
}
