pub mod memory;

use futures::future::BoxFuture;
use tokio::sync::broadcast;

use crate::dao::{
    changes::ChangeEvent,
    models::{
        MessageWithProfile, NewMessage, NewRoom, ParticipantEntity, ParticipantWithProfile,
        ProfileEntity, ProfilePatch, RoomEntity, RoomId, RoomPatch, RoomType, UserId,
    },
    storage::StorageResult,
};

pub use self::memory::MemoryRoomStore;

/// Constraint guarding code uniqueness among active rooms.
pub const ROOMS_CODE_KEY: &str = "rooms_code_key";
/// Constraint guarding one membership row per (room, user).
pub const PARTICIPANTS_ROOM_USER_KEY: &str = "room_participants_room_id_user_id_key";
/// Foreign key from participants to rooms.
pub const PARTICIPANTS_ROOM_FKEY: &str = "room_participants_room_id_fkey";
/// Foreign key from messages to rooms.
pub const MESSAGES_ROOM_FKEY: &str = "room_messages_room_id_fkey";
/// Constraint guarding unique usernames.
pub const PROFILES_USERNAME_KEY: &str = "profiles_username_key";

/// Receiver side of a room's change-notification stream.
pub type ChangeFeed = broadcast::Receiver<ChangeEvent>;

/// Abstraction over the relational store holding profiles, rooms, participants and messages.
pub trait RoomStore: Send + Sync {
    fn insert_room(&self, room: NewRoom) -> BoxFuture<'static, StorageResult<RoomEntity>>;
    fn find_room(&self, id: RoomId) -> BoxFuture<'static, StorageResult<Option<RoomEntity>>>;
    /// Lookup among active rooms; `code` must already be normalized.
    fn find_room_by_code(
        &self,
        code: String,
    ) -> BoxFuture<'static, StorageResult<Option<RoomEntity>>>;
    /// Active rooms, newest first.
    fn list_active_rooms(
        &self,
        room_type: Option<RoomType>,
    ) -> BoxFuture<'static, StorageResult<Vec<RoomEntity>>>;
    fn update_room(
        &self,
        id: RoomId,
        patch: RoomPatch,
    ) -> BoxFuture<'static, StorageResult<RoomEntity>>;
    /// Delete a room and cascade to its participants and messages.
    fn delete_room(&self, id: RoomId) -> BoxFuture<'static, StorageResult<()>>;

    /// Insert a membership row; duplicates fail with the unique-violation code.
    fn insert_participant(
        &self,
        room_id: RoomId,
        user_id: UserId,
    ) -> BoxFuture<'static, StorageResult<ParticipantEntity>>;
    /// Delete the membership row, returning whether one existed.
    fn delete_participant(
        &self,
        room_id: RoomId,
        user_id: UserId,
    ) -> BoxFuture<'static, StorageResult<bool>>;
    fn find_participant(
        &self,
        room_id: RoomId,
        user_id: UserId,
    ) -> BoxFuture<'static, StorageResult<Option<ParticipantEntity>>>;
    /// Participants joined with profiles, ascending by join time.
    fn list_participants(
        &self,
        room_id: RoomId,
    ) -> BoxFuture<'static, StorageResult<Vec<ParticipantWithProfile>>>;

    fn insert_message(
        &self,
        message: NewMessage,
    ) -> BoxFuture<'static, StorageResult<MessageWithProfile>>;
    /// Newest `limit` messages joined with profiles, in ascending creation order.
    fn list_messages(
        &self,
        room_id: RoomId,
        limit: usize,
    ) -> BoxFuture<'static, StorageResult<Vec<MessageWithProfile>>>;

    fn upsert_profile(&self, profile: ProfileEntity) -> BoxFuture<'static, StorageResult<()>>;
    fn update_profile(
        &self,
        id: UserId,
        patch: ProfilePatch,
    ) -> BoxFuture<'static, StorageResult<ProfileEntity>>;
    fn find_profile(&self, id: UserId) -> BoxFuture<'static, StorageResult<Option<ProfileEntity>>>;

    /// Subscribe to change notifications for every relation scoped to `room_id`.
    fn subscribe(&self, room_id: RoomId) -> BoxFuture<'static, StorageResult<ChangeFeed>>;
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
    /// Close every change feed and refuse further requests.
    fn shutdown(&self) -> BoxFuture<'static, ()>;
}
