use serde::{Deserialize, Serialize};
use std::time::SystemTime;
use utoipa::ToSchema;
use uuid::Uuid;

/// Identifier of a room row.
pub type RoomId = Uuid;
/// Identifier of an authenticated user (and of their profile row).
pub type UserId = Uuid;

/// Kind of shared content a room is organised around.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum RoomType {
    /// Synchronized video watching.
    #[serde(alias = "movie")]
    Video,
    /// Shared music listening.
    Music,
    /// Browser game session.
    Game,
}

impl RoomType {
    /// Path segment of the page hosting this kind of room.
    pub fn page_path(self) -> &'static str {
        match self {
            RoomType::Video => "movies",
            RoomType::Music => "music",
            RoomType::Game => "games",
        }
    }
}

/// Role attached to a profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    /// Regular user.
    #[default]
    User,
    /// Administrator.
    Admin,
}

/// Room row owned by the room directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomEntity {
    /// Primary key.
    pub id: RoomId,
    /// Six character uppercase join code, unique among active rooms.
    pub code: String,
    /// Human readable name.
    pub name: String,
    /// Kind of session.
    pub room_type: RoomType,
    /// Hosting user; immutable once set. `None` for anonymous creation.
    pub host_id: Option<UserId>,
    /// Current content locator (video URL, track URI...).
    pub content_ref: Option<String>,
    /// Rooms stay active until deactivated or deleted.
    pub is_active: bool,
    /// Elapsed playback time, in seconds.
    pub playback_position: f64,
    /// Whether playback is running.
    pub is_playing: bool,
    /// Creation timestamp.
    pub created_at: SystemTime,
    /// Last mutation timestamp.
    pub updated_at: SystemTime,
}

/// Insert payload for a room; the store assigns id and timestamps.
#[derive(Debug, Clone)]
pub struct NewRoom {
    /// Normalized six-character join code.
    pub code: String,
    /// Display name.
    pub name: String,
    /// Video or music.
    pub room_type: RoomType,
    /// Creator, if the room has one.
    pub host_id: Option<UserId>,
    /// Initial content (video URL, track URI...).
    pub content_ref: Option<String>,
}

/// Partial room update. `host_id` is deliberately absent: hosts never change.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoomPatch {
    pub name: Option<String>,
    /// `Some(None)` clears the content reference.
    pub content_ref: Option<Option<String>>,
    pub is_active: Option<bool>,
    pub playback_position: Option<f64>,
    pub is_playing: Option<bool>,
}

impl RoomPatch {
    /// Patch touching only the playback fields.
    pub fn playback(is_playing: bool, position: f64) -> Self {
        Self {
            is_playing: Some(is_playing),
            playback_position: Some(position),
            ..Self::default()
        }
    }

    /// Patch touching only the content reference.
    pub fn content(content_ref: Option<String>) -> Self {
        Self {
            content_ref: Some(content_ref),
            ..Self::default()
        }
    }

    /// True when no field would change.
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// True when the patch modifies host-controlled fields (content or playback).
    pub fn touches_host_fields(&self) -> bool {
        self.content_ref.is_some() || self.playback_position.is_some() || self.is_playing.is_some()
    }

    /// Merge the patch into `room`, leaving untouched fields as they are.
    pub fn apply_to(&self, room: &mut RoomEntity) {
        if let Some(name) = &self.name {
            room.name = name.clone();
        }
        if let Some(content_ref) = &self.content_ref {
            room.content_ref = content_ref.clone();
        }
        if let Some(is_active) = self.is_active {
            room.is_active = is_active;
        }
        if let Some(position) = self.playback_position {
            room.playback_position = position;
        }
        if let Some(is_playing) = self.is_playing {
            room.is_playing = is_playing;
        }
    }
}

/// Membership row linking a user to a room. At most one per (room, user).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantEntity {
    pub id: Uuid,
    pub room_id: RoomId,
    pub user_id: UserId,
    pub joined_at: SystemTime,
}

/// Denormalized display data for a user, owned by the identity collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileEntity {
    pub id: UserId,
    pub username: String,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub role: UserRole,
    pub created_at: SystemTime,
}

impl ProfileEntity {
    /// Name to show in rosters and chat.
    pub fn label(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.username)
    }
}

/// Partial profile update.
#[derive(Debug, Clone, Default)]
pub struct ProfilePatch {
    pub display_name: Option<Option<String>>,
    pub avatar_url: Option<Option<String>>,
}

/// Chat message row. Append-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageEntity {
    pub id: Uuid,
    pub room_id: RoomId,
    /// `None` for anonymous senders.
    pub user_id: Option<UserId>,
    pub body: String,
    pub created_at: SystemTime,
}

/// Insert payload for a chat message; the store assigns id and timestamp.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub room_id: RoomId,
    pub user_id: Option<UserId>,
    pub body: String,
}

/// Participant joined with its profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParticipantWithProfile {
    pub participant: ParticipantEntity,
    pub profile: Option<ProfileEntity>,
}

/// Message joined with its sender's profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageWithProfile {
    pub message: MessageEntity,
    pub profile: Option<ProfileEntity>,
}

/// Room joined with its host profile and participant roster.
#[derive(Debug, Clone, PartialEq)]
pub struct RoomDetails {
    pub room: RoomEntity,
    pub host: Option<ProfileEntity>,
    /// Ordered by join time ascending.
    pub participants: Vec<ParticipantWithProfile>,
}

impl RoomDetails {
    /// Number of tracked participants.
    pub fn participant_count(&self) -> usize {
        self.participants.len()
    }
}
