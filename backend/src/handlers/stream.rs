//! Server-Sent Events for ledger changes
//!
//! GET /stream/bars/:bar_id and /stream/reserves/:reserve_id
//!
//! Browsers open these with `EventSource`, which cannot set headers, so the
//! auth middleware also accepts `?token=`. Each stream starts with a
//! `connected` event. A viewer that falls behind the channel gets a `lagged`
//! event with the number of missed events and should re-fetch the ledger.

use std::convert::Infallible;

use axum::{
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::{self, Stream, StreamExt};
use tokio::sync::broadcast::error::RecvError;
use uuid::Uuid;

use crate::error::AppResult;
use crate::middleware::CurrentUser;
use crate::models::Topic;
use crate::services::bus::{NotificationBus, Subscription};
use crate::services::scope::{ensure_bar_access, ensure_reserve_access};
use crate::AppState;

/// One connected viewer. Dropping it unsubscribes from the bus.
struct Viewer {
    bus: NotificationBus,
    subscription: Option<Subscription>,
}

impl Viewer {
    fn new(bus: NotificationBus, subscription: Subscription) -> Self {
        tracing::debug!(topic = %subscription.topic(), "stream viewer connected");
        Self {
            bus,
            subscription: Some(subscription),
        }
    }

    /// Next SSE frame, or `None` once the topic's channel is gone
    async fn next_frame(&mut self) -> Option<Event> {
        let subscription = self.subscription.as_mut()?;
        loop {
            match subscription.recv().await {
                Ok(event) => match Event::default().event(event.event_name()).json_data(&event) {
                    Ok(frame) => return Some(frame),
                    Err(err) => tracing::warn!(error = %err, "failed to encode ledger event"),
                },
                Err(RecvError::Lagged(missed)) => {
                    tracing::debug!(topic = %subscription.topic(), missed, "stream viewer lagged");
                    if let Ok(frame) = Event::default()
                        .event("lagged")
                        .json_data(serde_json::json!({ "missed": missed }))
                    {
                        return Some(frame);
                    }
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}

impl Drop for Viewer {
    fn drop(&mut self) {
        let Some(subscription) = self.subscription.take() else {
            return;
        };
        // No runtime left during shutdown; the whole bus goes away then
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let bus = self.bus.clone();
        runtime.spawn(async move {
            let topic = subscription.topic();
            bus.unsubscribe(subscription).await;
            tracing::debug!(%topic, "stream viewer disconnected");
        });
    }
}

/// Stream ledger changes of one bar
pub async fn stream_bar(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(bar_id): Path<Uuid>,
) -> AppResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    ensure_bar_access(&state.db, &current_user.0, bar_id).await?;
    let subscription = state.bus.subscribe(Topic::Bar(bar_id)).await;
    Ok(sse_response(Viewer::new(state.bus, subscription)))
}

/// Stream changes of one reserve
pub async fn stream_reserve(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(reserve_id): Path<Uuid>,
) -> AppResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    ensure_reserve_access(&state.db, &current_user.0, reserve_id).await?;
    let subscription = state.bus.subscribe(Topic::Reserve(reserve_id)).await;
    Ok(sse_response(Viewer::new(state.bus, subscription)))
}

fn sse_response(viewer: Viewer) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let connected =
        stream::once(async { Ok::<_, Infallible>(Event::default().event("connected").data("ok")) });

    let events = stream::unfold(viewer, |mut viewer| async move {
        let frame = viewer.next_frame().await?;
        Some((Ok::<_, Infallible>(frame), viewer))
    });

    Sse::new(connected.chain(events)).keep_alive(KeepAlive::default())
}
