//! Row-level change notifications published by the store for a single room.

use crate::dao::models::{MessageEntity, ParticipantEntity, RoomEntity, RoomId};

/// Relation a change notification originates from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeTable {
    /// `rooms`
    Rooms,
    /// `room_participants`
    RoomParticipants,
    /// `room_messages`
    RoomMessages,
}

impl ChangeTable {
    /// Relation name as exposed by the store.
    pub fn relation(self) -> &'static str {
        match self {
            ChangeTable::Rooms => "rooms",
            ChangeTable::RoomParticipants => "room_participants",
            ChangeTable::RoomMessages => "room_messages",
        }
    }
}

/// Kind of mutation that produced a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeOp {
    /// Row created.
    Insert,
    /// Row modified.
    Update,
    /// Row removed.
    Delete,
}

/// Row image carried by a notification.
#[derive(Debug, Clone, PartialEq)]
pub enum RowPayload {
    Room(RoomEntity),
    Participant(ParticipantEntity),
    Message(MessageEntity),
}

/// Change notification scoped to one room: `{table, operation, old?, new?}`.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub table: ChangeTable,
    pub operation: ChangeOp,
    pub room_id: RoomId,
    pub old: Option<RowPayload>,
    pub new: Option<RowPayload>,
}

impl ChangeEvent {
    pub(crate) fn room(operation: ChangeOp, old: Option<RoomEntity>, new: Option<RoomEntity>) -> Self {
        let room_id = new
            .as_ref()
            .or(old.as_ref())
            .map(|room| room.id)
            .unwrap_or_default();
        Self {
            table: ChangeTable::Rooms,
            operation,
            room_id,
            old: old.map(RowPayload::Room),
            new: new.map(RowPayload::Room),
        }
    }

    pub(crate) fn participant(
        operation: ChangeOp,
        room_id: RoomId,
        row: ParticipantEntity,
    ) -> Self {
        let (old, new) = match operation {
            ChangeOp::Delete => (Some(RowPayload::Participant(row)), None),
            _ => (None, Some(RowPayload::Participant(row))),
        };
        Self {
            table: ChangeTable::RoomParticipants,
            operation,
            room_id,
            old,
            new,
        }
    }

    pub(crate) fn message_inserted(row: MessageEntity) -> Self {
        Self {
            table: ChangeTable::RoomMessages,
            operation: ChangeOp::Insert,
            room_id: row.room_id,
            old: None,
            new: Some(RowPayload::Message(row)),
        }
    }

    /// New room image, when this is a room insert or update.
    pub fn new_room(&self) -> Option<&RoomEntity> {
        match &self.new {
            Some(RowPayload::Room(room)) => Some(room),
            _ => None,
        }
    }
}
