//! In-process implementation of [`RoomStore`] enforcing the relational constraints
//! (unique active codes, unique memberships, foreign keys) and publishing row-level
//! change notifications on a per-room broadcast channel.

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::SystemTime,
};

use dashmap::DashMap;
use futures::future::BoxFuture;
use indexmap::IndexMap;
use tokio::sync::{RwLock, broadcast};
use tracing::debug;
use uuid::Uuid;

use crate::dao::{
    changes::{ChangeEvent, ChangeOp},
    models::{
        MessageEntity, MessageWithProfile, NewMessage, NewRoom, ParticipantEntity,
        ParticipantWithProfile, ProfileEntity, ProfilePatch, RoomEntity, RoomId, RoomPatch,
        RoomType, UserId,
    },
    storage::{StorageError, StorageResult},
};

use super::{
    ChangeFeed, MESSAGES_ROOM_FKEY, PARTICIPANTS_ROOM_FKEY, PARTICIPANTS_ROOM_USER_KEY,
    PROFILES_USERNAME_KEY, ROOMS_CODE_KEY, RoomStore,
};

const DEFAULT_FEED_CAPACITY: usize = 64;

/// Source of server-assigned timestamps.
pub type Clock = Arc<dyn Fn() -> SystemTime + Send + Sync>;

#[derive(Clone)]
pub struct MemoryRoomStore {
    inner: Arc<Inner>,
}

struct Inner {
    tables: RwLock<Tables>,
    feeds: DashMap<RoomId, broadcast::Sender<ChangeEvent>>,
    feed_capacity: usize,
    available: AtomicBool,
    closed: AtomicBool,
    clock: Clock,
}

#[derive(Default)]
struct Tables {
    rooms: IndexMap<RoomId, RoomEntity>,
    participants: Vec<Sequenced<ParticipantEntity>>,
    messages: Vec<Sequenced<MessageEntity>>,
    profiles: HashMap<UserId, ProfileEntity>,
    next_seq: u64,
}

/// Row tagged with its insertion order, used to break timestamp ties.
struct Sequenced<T> {
    seq: u64,
    row: T,
}

impl Tables {
    fn next_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    fn profile(&self, id: Option<UserId>) -> Option<ProfileEntity> {
        id.and_then(|id| self.profiles.get(&id).cloned())
    }
}

impl Default for MemoryRoomStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRoomStore {
    /// Empty store using the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemTime::now))
    }

    /// Empty store assigning timestamps from `clock`.
    pub fn with_clock(clock: Clock) -> Self {
        Self::with_options(clock, DEFAULT_FEED_CAPACITY)
    }

    /// Empty store with an explicit clock and per-room feed capacity.
    pub fn with_options(clock: Clock, feed_capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                tables: RwLock::new(Tables::default()),
                feeds: DashMap::new(),
                feed_capacity: feed_capacity.max(1),
                available: AtomicBool::new(true),
                closed: AtomicBool::new(false),
                clock,
            }),
        }
    }

    /// Simulate the backend going away (or coming back).
    pub fn set_available(&self, available: bool) {
        self.inner.available.store(available, Ordering::SeqCst);
    }

    /// Drop the change feed of a room, disconnecting every subscriber.
    pub fn drop_feed(&self, room_id: RoomId) {
        self.inner.feeds.remove(&room_id);
    }

    /// Number of live change-feed receivers for a room.
    pub fn feed_subscribers(&self, room_id: RoomId) -> usize {
        self.inner
            .feeds
            .get(&room_id)
            .map(|sender| sender.receiver_count())
            .unwrap_or(0)
    }

    fn now(&self) -> SystemTime {
        (self.inner.clock)()
    }

    fn ensure_ready(&self) -> StorageResult<()> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(StorageError::ShutDown);
        }
        if !self.inner.available.load(Ordering::SeqCst) {
            return Err(StorageError::unavailable_msg("in-memory store marked unavailable"));
        }
        Ok(())
    }

    fn publish(&self, event: ChangeEvent) {
        if let Some(sender) = self.inner.feeds.get(&event.room_id) {
            // No receivers is not an error for a notification channel.
            let _ = sender.send(event);
        }
    }

    async fn insert_room_row(&self, room: NewRoom) -> StorageResult<RoomEntity> {
        self.ensure_ready()?;
        let entity = {
            let mut tables = self.inner.tables.write().await;
            if tables
                .rooms
                .values()
                .any(|existing| existing.is_active && existing.code == room.code)
            {
                return Err(StorageError::UniqueViolation {
                    constraint: ROOMS_CODE_KEY,
                });
            }

            let now = self.now();
            let entity = RoomEntity {
                id: Uuid::new_v4(),
                code: room.code,
                name: room.name,
                room_type: room.room_type,
                host_id: room.host_id,
                content_ref: room.content_ref,
                is_active: true,
                playback_position: 0.0,
                is_playing: false,
                created_at: now,
                updated_at: now,
            };
            tables.rooms.insert(entity.id, entity.clone());
            self.publish(ChangeEvent::room(ChangeOp::Insert, None, Some(entity.clone())));
            entity
        };
        Ok(entity)
    }

    async fn update_room_row(&self, id: RoomId, patch: RoomPatch) -> StorageResult<RoomEntity> {
        self.ensure_ready()?;
        let new = {
            let mut tables = self.inner.tables.write().await;
            let reactivating_code = match (patch.is_active, tables.rooms.get(&id)) {
                (Some(true), Some(room)) if !room.is_active => Some(room.code.clone()),
                _ => None,
            };
            if let Some(code) = reactivating_code
                && tables
                    .rooms
                    .values()
                    .any(|other| other.id != id && other.is_active && other.code == code)
            {
                return Err(StorageError::UniqueViolation {
                    constraint: ROOMS_CODE_KEY,
                });
            }

            let now = self.now();
            let room = tables.rooms.get_mut(&id).ok_or_else(|| StorageError::NotFound {
                relation: "rooms",
                id: id.to_string(),
            })?;
            let old = room.clone();
            patch.apply_to(room);
            room.updated_at = now;
            let new = room.clone();
            // Publish under the write guard so feed order matches commit order.
            self.publish(ChangeEvent::room(ChangeOp::Update, Some(old), Some(new.clone())));
            new
        };
        Ok(new)
    }

    async fn delete_room_row(&self, id: RoomId) -> StorageResult<()> {
        self.ensure_ready()?;
        let mut tables = self.inner.tables.write().await;
        if let Some(room) = tables.rooms.shift_remove(&id) {
            tables.participants.retain(|p| p.row.room_id != id);
            tables.messages.retain(|m| m.row.room_id != id);
            debug!(room_id = %id, "room deleted; closing its change feed");
            self.publish(ChangeEvent::room(ChangeOp::Delete, Some(room), None));
            self.inner.feeds.remove(&id);
        }
        Ok(())
    }

    async fn insert_participant_row(
        &self,
        room_id: RoomId,
        user_id: UserId,
    ) -> StorageResult<ParticipantEntity> {
        self.ensure_ready()?;
        let row = {
            let mut tables = self.inner.tables.write().await;
            if !tables.rooms.contains_key(&room_id) {
                return Err(StorageError::ForeignKeyViolation {
                    constraint: PARTICIPANTS_ROOM_FKEY,
                });
            }
            if tables
                .participants
                .iter()
                .any(|p| p.row.room_id == room_id && p.row.user_id == user_id)
            {
                return Err(StorageError::UniqueViolation {
                    constraint: PARTICIPANTS_ROOM_USER_KEY,
                });
            }

            let row = ParticipantEntity {
                id: Uuid::new_v4(),
                room_id,
                user_id,
                joined_at: self.now(),
            };
            let seq = tables.next_seq();
            tables.participants.push(Sequenced {
                seq,
                row: row.clone(),
            });
            self.publish(ChangeEvent::participant(ChangeOp::Insert, room_id, row.clone()));
            row
        };
        Ok(row)
    }

    async fn delete_participant_row(&self, room_id: RoomId, user_id: UserId) -> StorageResult<bool> {
        self.ensure_ready()?;
        let mut tables = self.inner.tables.write().await;
        let position = tables
            .participants
            .iter()
            .position(|p| p.row.room_id == room_id && p.row.user_id == user_id);
        match position {
            Some(index) => {
                let row = tables.participants.remove(index).row;
                self.publish(ChangeEvent::participant(ChangeOp::Delete, room_id, row));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn participants_of(&self, room_id: RoomId) -> StorageResult<Vec<ParticipantWithProfile>> {
        self.ensure_ready()?;
        let tables = self.inner.tables.read().await;
        let mut rows: Vec<&Sequenced<ParticipantEntity>> = tables
            .participants
            .iter()
            .filter(|p| p.row.room_id == room_id)
            .collect();
        rows.sort_by_key(|p| (p.row.joined_at, p.seq));

        Ok(rows
            .into_iter()
            .map(|p| ParticipantWithProfile {
                participant: p.row.clone(),
                profile: tables.profile(Some(p.row.user_id)),
            })
            .collect())
    }

    async fn insert_message_row(&self, message: NewMessage) -> StorageResult<MessageWithProfile> {
        self.ensure_ready()?;
        let joined = {
            let mut tables = self.inner.tables.write().await;
            if !tables.rooms.contains_key(&message.room_id) {
                return Err(StorageError::ForeignKeyViolation {
                    constraint: MESSAGES_ROOM_FKEY,
                });
            }
            let row = MessageEntity {
                id: Uuid::new_v4(),
                room_id: message.room_id,
                user_id: message.user_id,
                body: message.body,
                created_at: self.now(),
            };
            let seq = tables.next_seq();
            tables.messages.push(Sequenced {
                seq,
                row: row.clone(),
            });
            self.publish(ChangeEvent::message_inserted(row.clone()));
            MessageWithProfile {
                profile: tables.profile(row.user_id),
                message: row,
            }
        };
        Ok(joined)
    }

    async fn messages_of(&self, room_id: RoomId, limit: usize) -> StorageResult<Vec<MessageWithProfile>> {
        self.ensure_ready()?;
        let tables = self.inner.tables.read().await;
        let mut rows: Vec<&Sequenced<MessageEntity>> = tables
            .messages
            .iter()
            .filter(|m| m.row.room_id == room_id)
            .collect();
        rows.sort_by_key(|m| (m.row.created_at, m.seq));
        let skip = rows.len().saturating_sub(limit);

        Ok(rows
            .into_iter()
            .skip(skip)
            .map(|m| MessageWithProfile {
                message: m.row.clone(),
                profile: tables.profile(m.row.user_id),
            })
            .collect())
    }

    async fn upsert_profile_row(&self, profile: ProfileEntity) -> StorageResult<()> {
        self.ensure_ready()?;
        let mut tables = self.inner.tables.write().await;
        if tables
            .profiles
            .values()
            .any(|other| other.id != profile.id && other.username == profile.username)
        {
            return Err(StorageError::UniqueViolation {
                constraint: PROFILES_USERNAME_KEY,
            });
        }
        tables.profiles.insert(profile.id, profile);
        Ok(())
    }

    async fn update_profile_row(&self, id: UserId, patch: ProfilePatch) -> StorageResult<ProfileEntity> {
        self.ensure_ready()?;
        let mut tables = self.inner.tables.write().await;
        let profile = tables
            .profiles
            .get_mut(&id)
            .ok_or_else(|| StorageError::NotFound {
                relation: "profiles",
                id: id.to_string(),
            })?;
        if let Some(display_name) = patch.display_name {
            profile.display_name = display_name;
        }
        if let Some(avatar_url) = patch.avatar_url {
            profile.avatar_url = avatar_url;
        }
        Ok(profile.clone())
    }

    fn subscribe_feed(&self, room_id: RoomId) -> StorageResult<ChangeFeed> {
        self.ensure_ready()?;
        let capacity = self.inner.feed_capacity;
        let sender = self
            .inner
            .feeds
            .entry(room_id)
            .or_insert_with(|| broadcast::channel(capacity).0);
        Ok(sender.subscribe())
    }
}

impl RoomStore for MemoryRoomStore {
    fn insert_room(&self, room: NewRoom) -> BoxFuture<'static, StorageResult<RoomEntity>> {
        let store = self.clone();
        Box::pin(async move { store.insert_room_row(room).await })
    }

    fn find_room(&self, id: RoomId) -> BoxFuture<'static, StorageResult<Option<RoomEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store.ensure_ready()?;
            let tables = store.inner.tables.read().await;
            Ok(tables.rooms.get(&id).cloned())
        })
    }

    fn find_room_by_code(
        &self,
        code: String,
    ) -> BoxFuture<'static, StorageResult<Option<RoomEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store.ensure_ready()?;
            let tables = store.inner.tables.read().await;
            Ok(tables
                .rooms
                .values()
                .find(|room| room.is_active && room.code == code)
                .cloned())
        })
    }

    fn list_active_rooms(
        &self,
        room_type: Option<RoomType>,
    ) -> BoxFuture<'static, StorageResult<Vec<RoomEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store.ensure_ready()?;
            let tables = store.inner.tables.read().await;
            // IndexMap keeps insertion order, so reversing yields newest first on ties.
            let mut rooms: Vec<RoomEntity> = tables
                .rooms
                .values()
                .rev()
                .filter(|room| room.is_active)
                .filter(|room| room_type.is_none_or(|kind| room.room_type == kind))
                .cloned()
                .collect();
            rooms.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            Ok(rooms)
        })
    }

    fn update_room(
        &self,
        id: RoomId,
        patch: RoomPatch,
    ) -> BoxFuture<'static, StorageResult<RoomEntity>> {
        let store = self.clone();
        Box::pin(async move { store.update_room_row(id, patch).await })
    }

    fn delete_room(&self, id: RoomId) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.delete_room_row(id).await })
    }

    fn insert_participant(
        &self,
        room_id: RoomId,
        user_id: UserId,
    ) -> BoxFuture<'static, StorageResult<ParticipantEntity>> {
        let store = self.clone();
        Box::pin(async move { store.insert_participant_row(room_id, user_id).await })
    }

    fn delete_participant(
        &self,
        room_id: RoomId,
        user_id: UserId,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move { store.delete_participant_row(room_id, user_id).await })
    }

    fn find_participant(
        &self,
        room_id: RoomId,
        user_id: UserId,
    ) -> BoxFuture<'static, StorageResult<Option<ParticipantEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store.ensure_ready()?;
            let tables = store.inner.tables.read().await;
            Ok(tables
                .participants
                .iter()
                .find(|p| p.row.room_id == room_id && p.row.user_id == user_id)
                .map(|p| p.row.clone()))
        })
    }

    fn list_participants(
        &self,
        room_id: RoomId,
    ) -> BoxFuture<'static, StorageResult<Vec<ParticipantWithProfile>>> {
        let store = self.clone();
        Box::pin(async move { store.participants_of(room_id).await })
    }

    fn insert_message(
        &self,
        message: NewMessage,
    ) -> BoxFuture<'static, StorageResult<MessageWithProfile>> {
        let store = self.clone();
        Box::pin(async move { store.insert_message_row(message).await })
    }

    fn list_messages(
        &self,
        room_id: RoomId,
        limit: usize,
    ) -> BoxFuture<'static, StorageResult<Vec<MessageWithProfile>>> {
        let store = self.clone();
        Box::pin(async move { store.messages_of(room_id, limit).await })
    }

    fn upsert_profile(&self, profile: ProfileEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.upsert_profile_row(profile).await })
    }

    fn update_profile(
        &self,
        id: UserId,
        patch: ProfilePatch,
    ) -> BoxFuture<'static, StorageResult<ProfileEntity>> {
        let store = self.clone();
        Box::pin(async move { store.update_profile_row(id, patch).await })
    }

    fn find_profile(&self, id: UserId) -> BoxFuture<'static, StorageResult<Option<ProfileEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store.ensure_ready()?;
            let tables = store.inner.tables.read().await;
            Ok(tables.profiles.get(&id).cloned())
        })
    }

    fn subscribe(&self, room_id: RoomId) -> BoxFuture<'static, StorageResult<ChangeFeed>> {
        let store = self.clone();
        Box::pin(async move { store.subscribe_feed(room_id) })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.ensure_ready() })
    }

    fn shutdown(&self) -> BoxFuture<'static, ()> {
        let store = self.clone();
        Box::pin(async move {
            store.inner.closed.store(true, Ordering::SeqCst);
            store.inner.feeds.clear();
        })
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::Mutex,
        time::{Duration, UNIX_EPOCH},
    };

    use super::*;
    use crate::dao::{changes::ChangeTable, storage::UNIQUE_VIOLATION};

    fn new_room(code: &str) -> NewRoom {
        NewRoom {
            code: code.into(),
            name: "Movie Night".into(),
            room_type: RoomType::Video,
            host_id: None,
            content_ref: None,
        }
    }

    fn scripted_clock(seconds: Vec<u64>) -> Clock {
        let queue = Mutex::new(seconds.into_iter());
        Arc::new(move || {
            let next = queue.lock().unwrap().next().unwrap_or(0);
            UNIX_EPOCH + Duration::from_secs(next)
        })
    }

    #[tokio::test]
    async fn duplicate_active_code_is_rejected() {
        let store = MemoryRoomStore::new();
        store.insert_room(new_room("ABC123")).await.unwrap();
        let err = store.insert_room(new_room("ABC123")).await.unwrap_err();
        assert!(err.is_unique_violation_of(ROOMS_CODE_KEY));
    }

    #[tokio::test]
    async fn inactive_room_releases_its_code() {
        let store = MemoryRoomStore::new();
        let room = store.insert_room(new_room("ABC123")).await.unwrap();
        store
            .update_room(
                room.id,
                RoomPatch {
                    is_active: Some(false),
                    ..RoomPatch::default()
                },
            )
            .await
            .unwrap();
        assert!(store.insert_room(new_room("ABC123")).await.is_ok());
    }

    #[tokio::test]
    async fn duplicate_participant_reports_unique_violation_code() {
        let store = MemoryRoomStore::new();
        let room = store.insert_room(new_room("ABC123")).await.unwrap();
        let user = Uuid::new_v4();
        store.insert_participant(room.id, user).await.unwrap();
        let err = store.insert_participant(room.id, user).await.unwrap_err();
        assert_eq!(err.code(), Some(UNIQUE_VIOLATION));
    }

    #[tokio::test]
    async fn participant_requires_existing_room() {
        let store = MemoryRoomStore::new();
        let err = store
            .insert_participant(Uuid::new_v4(), Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::ForeignKeyViolation { .. }));
    }

    #[tokio::test]
    async fn list_messages_returns_newest_window_ascending() {
        // Room creation consumes the first tick; messages get t=30, t=10, t=20.
        let store = MemoryRoomStore::with_clock(scripted_clock(vec![1, 30, 10, 20]));
        let room = store.insert_room(new_room("ABC123")).await.unwrap();
        for body in ["third", "first", "second"] {
            store
                .insert_message(NewMessage {
                    room_id: room.id,
                    user_id: None,
                    body: body.into(),
                })
                .await
                .unwrap();
        }

        let all = store.list_messages(room.id, 50).await.unwrap();
        let bodies: Vec<_> = all.iter().map(|m| m.message.body.as_str()).collect();
        assert_eq!(bodies, ["first", "second", "third"]);

        let newest = store.list_messages(room.id, 2).await.unwrap();
        let bodies: Vec<_> = newest.iter().map(|m| m.message.body.as_str()).collect();
        assert_eq!(bodies, ["second", "third"]);
    }

    #[tokio::test]
    async fn timestamp_ties_keep_insertion_order() {
        let store = MemoryRoomStore::with_clock(scripted_clock(vec![5, 5, 5, 5]));
        let room = store.insert_room(new_room("ABC123")).await.unwrap();
        for body in ["a", "b", "c"] {
            store
                .insert_message(NewMessage {
                    room_id: room.id,
                    user_id: None,
                    body: body.into(),
                })
                .await
                .unwrap();
        }
        let bodies: Vec<_> = store
            .list_messages(room.id, 50)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.message.body)
            .collect();
        assert_eq!(bodies, ["a", "b", "c"]);
    }

    #[tokio::test]
    async fn mutations_are_published_to_room_feed() {
        let store = MemoryRoomStore::new();
        let room = store.insert_room(new_room("ABC123")).await.unwrap();
        let mut feed = store.subscribe(room.id).await.unwrap();

        store.insert_participant(room.id, Uuid::new_v4()).await.unwrap();
        store
            .update_room(room.id, RoomPatch::playback(true, 12.0))
            .await
            .unwrap();

        let first = feed.recv().await.unwrap();
        assert_eq!(first.table, ChangeTable::RoomParticipants);
        assert_eq!(first.operation, ChangeOp::Insert);

        let second = feed.recv().await.unwrap();
        assert_eq!(second.table, ChangeTable::Rooms);
        assert_eq!(second.new_room().map(|r| r.is_playing), Some(true));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn concurrent_updates_publish_in_commit_order() {
        let store = MemoryRoomStore::new();
        let room = store.insert_room(new_room("ABC123")).await.unwrap();

        for round in 0..200 {
            let mut feed = store.subscribe(room.id).await.unwrap();
            let writers: Vec<_> = (0..16)
                .map(|i| {
                    let store = store.clone();
                    tokio::spawn(async move {
                        store
                            .update_room(room.id, RoomPatch::playback(true, f64::from(i)))
                            .await
                            .unwrap();
                    })
                })
                .collect();
            for writer in writers {
                writer.await.unwrap();
            }

            let mut last = None;
            while let Ok(event) = feed.try_recv() {
                last = event.new_room().cloned();
            }
            let committed = store.find_room(room.id).await.unwrap().unwrap();
            assert_eq!(last.as_ref(), Some(&committed), "round {round}");
        }
    }

    #[tokio::test]
    async fn delete_room_cascades_and_closes_feed() {
        let store = MemoryRoomStore::new();
        let room = store.insert_room(new_room("ABC123")).await.unwrap();
        store.insert_participant(room.id, Uuid::new_v4()).await.unwrap();
        let mut feed = store.subscribe(room.id).await.unwrap();

        store.delete_room(room.id).await.unwrap();

        let event = feed.recv().await.unwrap();
        assert_eq!(event.operation, ChangeOp::Delete);
        assert!(matches!(
            feed.recv().await,
            Err(broadcast::error::RecvError::Closed)
        ));
        assert!(store.list_participants(room.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unavailable_store_surfaces_error() {
        let store = MemoryRoomStore::new();
        store.set_available(false);
        assert!(matches!(
            store.find_room(Uuid::new_v4()).await,
            Err(StorageError::Unavailable { .. })
        ));
    }
}
