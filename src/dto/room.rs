use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::Validate;

use crate::{
    dao::models::{
        ParticipantWithProfile, ProfileEntity, RoomDetails, RoomEntity, RoomPatch, RoomType,
        UserRole,
    },
    dto::{format_system_time, validation::validate_room_code},
};

/// Payload used to create a room hosted by the caller.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct CreateRoomRequest {
    #[validate(length(min = 1, max = 120))]
    pub name: String,
    #[serde(rename = "type")]
    pub room_type: RoomType,
    /// Initial content (video URL, track URI...).
    #[serde(default)]
    #[validate(length(max = 2048))]
    pub content_ref: Option<String>,
}

/// Payload used to join a room by its share code.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct JoinRoomRequest {
    /// Six letters or digits, case-insensitive.
    #[validate(custom(function = "validate_room_code"))]
    pub code: String,
}

/// Partial room update. Omitted fields are left untouched.
#[derive(Debug, Default, Deserialize, ToSchema, Validate)]
pub struct UpdateRoomRequest {
    #[validate(length(min = 1, max = 120))]
    pub name: Option<String>,
    /// If not specified, does not change it.
    /// If null is specified, clears the content reference.
    #[serde(default)]
    #[schema(value_type = Option<String>)]
    pub content_ref: Option<Option<String>>,
    pub is_active: Option<bool>,
    #[validate(range(min = 0.0))]
    pub playback_position: Option<f64>,
    pub is_playing: Option<bool>,
}

impl From<UpdateRoomRequest> for RoomPatch {
    fn from(request: UpdateRoomRequest) -> Self {
        Self {
            name: request.name,
            content_ref: request.content_ref,
            is_active: request.is_active,
            playback_position: request.playback_position,
            is_playing: request.is_playing,
        }
    }
}

/// Play/pause/seek published by the host.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct PlaybackRequest {
    pub is_playing: bool,
    /// Elapsed playback time in seconds.
    #[validate(range(min = 0.0))]
    pub position: f64,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct ListRoomsQuery {
    /// Restrict the listing to one room type.
    #[serde(rename = "type")]
    pub room_type: Option<RoomType>,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct RoomSummary {
    pub id: Uuid,
    pub code: String,
    pub name: String,
    #[serde(rename = "type")]
    pub room_type: RoomType,
    pub host_id: Option<Uuid>,
    pub content_ref: Option<String>,
    pub is_active: bool,
    pub playback_position: f64,
    pub is_playing: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl From<RoomEntity> for RoomSummary {
    fn from(room: RoomEntity) -> Self {
        Self {
            id: room.id,
            code: room.code,
            name: room.name,
            room_type: room.room_type,
            host_id: room.host_id,
            content_ref: room.content_ref,
            is_active: room.is_active,
            playback_position: room.playback_position,
            is_playing: room.is_playing,
            created_at: format_system_time(room.created_at),
            updated_at: format_system_time(room.updated_at),
        }
    }
}

/// Public projection of a profile.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ProfileSummary {
    pub id: Uuid,
    pub username: String,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub role: UserRole,
}

impl From<ProfileEntity> for ProfileSummary {
    fn from(profile: ProfileEntity) -> Self {
        Self {
            id: profile.id,
            username: profile.username,
            display_name: profile.display_name,
            avatar_url: profile.avatar_url,
            role: profile.role,
        }
    }
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ParticipantSummary {
    pub id: Uuid,
    pub user_id: Uuid,
    pub joined_at: String,
    pub profile: Option<ProfileSummary>,
}

impl From<ParticipantWithProfile> for ParticipantSummary {
    fn from(row: ParticipantWithProfile) -> Self {
        Self {
            id: row.participant.id,
            user_id: row.participant.user_id,
            joined_at: format_system_time(row.participant.joined_at),
            profile: row.profile.map(ProfileSummary::from),
        }
    }
}

/// Room joined with its host and roster.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct RoomDetailsResponse {
    pub room: RoomSummary,
    pub host: Option<ProfileSummary>,
    pub participants: Vec<ParticipantSummary>,
    pub participant_count: usize,
}

impl From<RoomDetails> for RoomDetailsResponse {
    fn from(details: RoomDetails) -> Self {
        Self {
            participant_count: details.participant_count(),
            room: details.room.into(),
            host: details.host.map(ProfileSummary::from),
            participants: details
                .participants
                .into_iter()
                .map(ParticipantSummary::from)
                .collect(),
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RoomListResponse {
    pub rooms: Vec<RoomSummary>,
}

/// Whether the caller holds a membership row for the room.
#[derive(Debug, Serialize, ToSchema)]
pub struct MembershipResponse {
    pub member: bool,
}
