use thiserror::Error;

use crate::dao::models::RoomId;

/// Phases of a viewer's room session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Not viewing any room.
    NoRoom,
    /// A room creation request is in flight.
    Creating,
    /// A join-by-code request is in flight.
    Joining,
    /// Viewing the given room; subscription and poll are live.
    InRoom(RoomId),
    /// Tearing down the view of the given room.
    Leaving(RoomId),
}

/// Events driving the session state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// The viewer asked to create a room.
    CreateRequested,
    /// The viewer asked to join a room by code.
    JoinRequested,
    /// Creation or join succeeded for the given room.
    Entered(RoomId),
    /// Creation or join failed.
    EnterFailed,
    /// The viewer (or a room deletion) asked to leave.
    LeaveRequested,
    /// Teardown finished.
    Left,
}

/// Error returned when attempting to apply an invalid transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid session transition: {event:?} cannot be applied while in {from:?}")]
pub struct InvalidSessionTransition {
    /// The phase the state machine was in when the invalid event was received.
    pub from: SessionPhase,
    /// The event that cannot be applied from this phase.
    pub event: SessionEvent,
}

/// `NoRoom → Creating/Joining → InRoom → Leaving → NoRoom`.
#[derive(Debug, Clone)]
pub struct SessionStateMachine {
    phase: SessionPhase,
    generation: u64,
}

impl Default for SessionStateMachine {
    fn default() -> Self {
        Self {
            phase: SessionPhase::NoRoom,
            generation: 0,
        }
    }
}

impl SessionStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// Incremented on every transition; results fetched under an older generation are stale.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// True when `generation` is still current and the session still views `room_id`.
    pub fn is_current(&self, generation: u64, room_id: RoomId) -> bool {
        self.generation == generation && self.phase == SessionPhase::InRoom(room_id)
    }

    /// Apply `event`, bumping the generation, and return the new phase.
    pub fn apply(&mut self, event: SessionEvent) -> Result<SessionPhase, InvalidSessionTransition> {
        let next = self.compute_transition(event)?;
        self.phase = next;
        self.generation += 1;
        Ok(next)
    }

    fn compute_transition(
        &self,
        event: SessionEvent,
    ) -> Result<SessionPhase, InvalidSessionTransition> {
        let next = match (self.phase, event) {
            (SessionPhase::NoRoom, SessionEvent::CreateRequested) => SessionPhase::Creating,
            (SessionPhase::NoRoom, SessionEvent::JoinRequested) => SessionPhase::Joining,
            (SessionPhase::Creating | SessionPhase::Joining, SessionEvent::Entered(id)) => {
                SessionPhase::InRoom(id)
            }
            (SessionPhase::Creating | SessionPhase::Joining, SessionEvent::EnterFailed) => {
                SessionPhase::NoRoom
            }
            (SessionPhase::InRoom(id), SessionEvent::LeaveRequested) => SessionPhase::Leaving(id),
            (SessionPhase::Leaving(_), SessionEvent::Left) => SessionPhase::NoRoom,
            (from, event) => return Err(InvalidSessionTransition { from, event }),
        };

        Ok(next)
    }
}
