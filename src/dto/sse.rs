use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    dto::room::RoomSummary,
    services::fanout::{FeedSignal, ReconcileAction},
};

#[derive(Clone, Debug)]
/// Dispatched payload carried across SSE channels.
pub struct ServerEvent {
    pub event: Option<String>,
    pub data: String,
}

impl ServerEvent {
    /// Convenience wrapper that serialises `payload` into the SSE data field.
    pub fn json<E, T>(event: E, payload: &T) -> serde_json::Result<Self>
    where
        E: Into<Option<String>>,
        T: Serialize,
    {
        Ok(Self {
            event: event.into(),
            data: serde_json::to_string(payload)?,
        })
    }
}

#[derive(Debug, Serialize, ToSchema)]
/// Initial metadata sent to an SSE client when it connects.
pub struct Handshake {
    pub room_id: Uuid,
    /// Human-readable message confirming the subscription.
    pub message: String,
}

#[derive(Debug, Serialize, ToSchema)]
/// Broadcast when a committed room row changed (playback, content, name).
pub struct RoomUpdatedEvent {
    pub room: RoomSummary,
}

#[derive(Debug, Serialize, ToSchema)]
/// Tells the client which part of its room view is stale.
pub struct RoomSignalEvent {
    pub room_id: Uuid,
}

/// SSE event name for a feed signal.
pub fn event_name(action: &ReconcileAction) -> &'static str {
    match action {
        ReconcileAction::Full => "reconcile",
        ReconcileAction::MergeRoom(_) => "room.updated",
        ReconcileAction::Participants => "participants.changed",
        ReconcileAction::Messages => "messages.changed",
        ReconcileAction::RoomRemoved => "room.deleted",
    }
}

impl ServerEvent {
    /// Encode a feed signal; room rows travel in full, other signals only name the room.
    pub fn from_signal(signal: FeedSignal) -> serde_json::Result<Self> {
        let name = event_name(&signal.action).to_string();
        match signal.action {
            ReconcileAction::MergeRoom(room) => Self::json(
                name,
                &RoomUpdatedEvent {
                    room: room.into(),
                },
            ),
            _ => Self::json(
                name,
                &RoomSignalEvent {
                    room_id: signal.room_id,
                },
            ),
        }
    }
}
