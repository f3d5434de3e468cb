use std::{convert::Infallible, time::Duration};

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use tracing::{info, warn};

use crate::{
    dao::models::RoomId,
    dto::sse::{Handshake, ServerEvent},
    error::ServiceError,
    services::fanout::{ReconcileAction, RoomSubscription, SignalSource},
    state::SharedState,
};

/// Open a realtime subscription for a room that currently exists.
pub async fn subscribe_room(
    state: &SharedState,
    room_id: RoomId,
) -> Result<RoomSubscription, ServiceError> {
    if state.is_disposed() {
        return Err(ServiceError::InvalidState("server is shutting down".into()));
    }
    state
        .services()
        .directory
        .get_room_by_id(room_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("room `{room_id}` not found")))?;
    Ok(state.services().fanout.subscribe(room_id))
}

/// Poll ticks only reach SSE clients when they carry a full refresh, i.e. while the
/// push channel is down. Routine message polls stay server-side.
fn should_forward(source: SignalSource, action: &ReconcileAction) -> bool {
    match source {
        SignalSource::Push => true,
        SignalSource::Poll => matches!(action, ReconcileAction::Full),
    }
}

fn to_event(payload: ServerEvent) -> Event {
    let mut event = Event::default().data(payload.data);
    if let Some(name) = payload.event {
        event = event.event(name);
    }
    event
}

struct DisconnectLog(RoomId);

impl Drop for DisconnectLog {
    fn drop(&mut self) {
        info!(room_id = %self.0, "room SSE stream disconnected");
    }
}

/// Convert a room subscription into an SSE response. Dropping the response stream
/// (client disconnect) drops the subscription and releases the change feed.
pub fn to_sse_stream(
    mut subscription: RoomSubscription,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let room_id = subscription.room_id();
    let stream = async_stream::stream! {
        let _guard = DisconnectLog(room_id);
        let handshake = Handshake {
            room_id,
            message: "room stream connected".into(),
        };
        if let Ok(payload) = ServerEvent::json(Some("handshake".to_string()), &handshake) {
            yield Ok::<_, Infallible>(to_event(payload));
        }

        while let Some(signal) = subscription.recv().await {
            if !should_forward(signal.source, &signal.action) {
                continue;
            }
            let removed = signal.action == ReconcileAction::RoomRemoved;
            match ServerEvent::from_signal(signal) {
                Ok(payload) => yield Ok::<_, Infallible>(to_event(payload)),
                Err(err) => warn!(%room_id, error = %err, "failed to encode room signal"),
            }
            if removed {
                break;
            }
        }
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routine_polls_are_not_forwarded() {
        assert!(should_forward(SignalSource::Push, &ReconcileAction::Messages));
        assert!(should_forward(SignalSource::Poll, &ReconcileAction::Full));
        assert!(!should_forward(SignalSource::Poll, &ReconcileAction::Messages));
    }
}
