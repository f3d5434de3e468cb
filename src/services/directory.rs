//! Room directory: creation with collision-checked join codes, lookups, updates
//! and deletion. Creating a room auto-enrolls its host through the membership manager.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::{
    config::HostPolicy,
    dao::{
        models::{NewRoom, RoomDetails, RoomEntity, RoomId, RoomPatch, RoomType, UserId},
        room_store::{ROOMS_CODE_KEY, RoomStore},
    },
    error::ServiceError,
    services::{codes, membership::MembershipManager},
};

const MAX_ROOM_NAME_LENGTH: usize = 120;

/// Produces join-code candidates.
pub type CodeSource = Arc<dyn Fn() -> String + Send + Sync>;

/// Creates, lists, updates and deletes rooms.
#[derive(Clone)]
pub struct RoomDirectory {
    store: Arc<dyn RoomStore>,
    membership: MembershipManager,
    code_attempts: u32,
    host_policy: HostPolicy,
    code_source: CodeSource,
}

impl RoomDirectory {
    pub fn new(
        store: Arc<dyn RoomStore>,
        membership: MembershipManager,
        code_attempts: u32,
        host_policy: HostPolicy,
    ) -> Self {
        Self {
            store,
            membership,
            code_attempts: code_attempts.max(1),
            host_policy,
            code_source: Arc::new(|| codes::generate_code(&mut rand::rng())),
        }
    }

    /// Replace the random code generator.
    pub fn with_code_source(mut self, code_source: CodeSource) -> Self {
        self.code_source = code_source;
        self
    }

    /// Create a room hosted by `host`, enroll the host and return the joined view.
    pub async fn create_room(
        &self,
        host: Option<UserId>,
        name: &str,
        room_type: RoomType,
        content_ref: Option<String>,
    ) -> Result<RoomDetails, ServiceError> {
        let name = validate_room_name(name)?;
        let room = self
            .insert_with_unique_code(name, room_type, host, normalize_content_ref(content_ref))
            .await?;
        info!(room_id = %room.id, code = %room.code, ?room_type, "room created");

        self.membership.join(room.id, host).await?;

        self.room_with_participants(room.id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("room `{}` vanished after creation", room.id)))
    }

    async fn insert_with_unique_code(
        &self,
        name: String,
        room_type: RoomType,
        host_id: Option<UserId>,
        content_ref: Option<String>,
    ) -> Result<RoomEntity, ServiceError> {
        for attempt in 1..=self.code_attempts {
            let code = (self.code_source)();
            let draft = NewRoom {
                code: code.clone(),
                name: name.clone(),
                room_type,
                host_id,
                content_ref: content_ref.clone(),
            };
            match self.store.insert_room(draft).await {
                Ok(room) => return Ok(room),
                Err(err) if err.is_unique_violation_of(ROOMS_CODE_KEY) => {
                    debug!(attempt, %code, "join code collision; retrying");
                }
                Err(err) => return Err(err.into()),
            }
        }

        warn!(attempts = self.code_attempts, "join code generation exhausted");
        Err(ServiceError::CodeSpaceExhausted {
            attempts: self.code_attempts,
        })
    }

    pub async fn get_room_by_id(&self, id: RoomId) -> Result<Option<RoomEntity>, ServiceError> {
        Ok(self.store.find_room(id).await?)
    }

    /// Case-insensitive lookup among active rooms.
    pub async fn get_room_by_code(&self, code: &str) -> Result<Option<RoomEntity>, ServiceError> {
        let code = codes::normalize_code(code)?;
        Ok(self.store.find_room_by_code(code).await?)
    }

    /// Active rooms, newest first, optionally restricted to one type.
    pub async fn list_active_rooms(
        &self,
        room_type: Option<RoomType>,
    ) -> Result<Vec<RoomEntity>, ServiceError> {
        Ok(self.store.list_active_rooms(room_type).await?)
    }

    /// Room joined with its host profile and participant roster.
    pub async fn room_with_participants(
        &self,
        id: RoomId,
    ) -> Result<Option<RoomDetails>, ServiceError> {
        let Some(room) = self.store.find_room(id).await? else {
            return Ok(None);
        };
        let host = match room.host_id {
            Some(host_id) => self.store.find_profile(host_id).await?,
            None => None,
        };
        let participants = self.membership.list_participants(id).await?;

        Ok(Some(RoomDetails {
            room,
            host,
            participants,
        }))
    }

    /// Look a room up by code, enroll `user` and return the joined view.
    pub async fn join_room_by_code(
        &self,
        user: Option<UserId>,
        code: &str,
    ) -> Result<RoomDetails, ServiceError> {
        let room = self
            .get_room_by_code(code)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("no active room with code `{}`", code.trim())))?;

        self.membership.join(room.id, user).await?;

        self.room_with_participants(room.id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("room `{}` not found", room.id)))
    }

    /// Apply a partial update. Content and playback fields are host-controlled when
    /// the host policy is [`HostPolicy::Enforce`].
    pub async fn update_room(
        &self,
        actor: Option<UserId>,
        id: RoomId,
        mut patch: RoomPatch,
    ) -> Result<RoomEntity, ServiceError> {
        if let Some(name) = patch.name.take() {
            patch.name = Some(validate_room_name(&name)?);
        }
        if let Some(content_ref) = patch.content_ref.take() {
            patch.content_ref = Some(normalize_content_ref(content_ref));
        }
        if let Some(position) = patch.playback_position {
            validate_position(position)?;
        }
        if patch.is_empty() {
            return self
                .get_room_by_id(id)
                .await?
                .ok_or_else(|| ServiceError::NotFound(format!("room `{id}` not found")));
        }
        if patch.touches_host_fields() {
            self.ensure_host(actor, id).await?;
        }

        let room = self.store.update_room(id, patch).await?;
        debug!(room_id = %id, "room updated");
        Ok(room)
    }

    /// Delete a room and everything attached to it; deleting a missing room is a no-op.
    pub async fn delete_room(&self, actor: Option<UserId>, id: RoomId) -> Result<(), ServiceError> {
        if self.get_room_by_id(id).await?.is_none() {
            return Ok(());
        }
        self.ensure_host(actor, id).await?;
        self.store.delete_room(id).await?;
        info!(room_id = %id, "room deleted");
        Ok(())
    }

    async fn ensure_host(&self, actor: Option<UserId>, id: RoomId) -> Result<(), ServiceError> {
        if self.host_policy == HostPolicy::Delegate {
            return Ok(());
        }
        let room = self
            .get_room_by_id(id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("room `{id}` not found")))?;
        match room.host_id {
            // Hostless rooms (anonymous creation) stay open to every viewer.
            None => Ok(()),
            Some(host) if Some(host) == actor => Ok(()),
            Some(_) => Err(ServiceError::Unauthorized(
                "only the host can change this room".into(),
            )),
        }
    }
}

fn validate_room_name(raw: &str) -> Result<String, ServiceError> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(ServiceError::Validation("room name must not be empty".into()));
    }
    if name.chars().count() > MAX_ROOM_NAME_LENGTH {
        return Err(ServiceError::Validation(format!(
            "room name must be at most {MAX_ROOM_NAME_LENGTH} characters"
        )));
    }
    Ok(name.to_string())
}

/// Playback positions are seconds: finite and non-negative. Backward seeks are fine.
fn validate_position(position: f64) -> Result<(), ServiceError> {
    if !position.is_finite() || position < 0.0 {
        return Err(ServiceError::Validation(format!(
            "playback position must be a finite, non-negative number of seconds (got {position})"
        )));
    }
    Ok(())
}

fn normalize_content_ref(content_ref: Option<String>) -> Option<String> {
    content_ref
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use std::{collections::HashSet, sync::Mutex};

    use uuid::Uuid;

    use super::*;
    use crate::dao::room_store::MemoryRoomStore;

    fn directory(store: &MemoryRoomStore, policy: HostPolicy) -> RoomDirectory {
        let store: Arc<dyn RoomStore> = Arc::new(store.clone());
        RoomDirectory::new(store.clone(), MembershipManager::new(store), 4, policy)
    }

    fn scripted_codes(codes: &[&str]) -> CodeSource {
        let queue = Mutex::new(codes.iter().map(|c| c.to_string()).collect::<Vec<_>>());
        Arc::new(move || {
            let mut queue = queue.lock().unwrap();
            if queue.len() > 1 {
                queue.remove(0)
            } else {
                queue[0].clone()
            }
        })
    }

    #[tokio::test]
    async fn create_room_enrolls_host() {
        let store = MemoryRoomStore::new();
        let host = Uuid::new_v4();
        let details = directory(&store, HostPolicy::Delegate)
            .create_room(Some(host), "  Movie Night ", RoomType::Video, None)
            .await
            .unwrap();

        assert_eq!(details.room.name, "Movie Night");
        assert_eq!(details.room.code.len(), 6);
        assert_eq!(details.room.host_id, Some(host));
        assert_eq!(details.participant_count(), 1);
        assert_eq!(details.participants[0].participant.user_id, host);
    }

    #[tokio::test]
    async fn blank_name_is_rejected_without_store_round_trip() {
        let store = MemoryRoomStore::new();
        store.set_available(false);
        let err = directory(&store, HostPolicy::Delegate)
            .create_room(None, "   ", RoomType::Video, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));
    }

    #[tokio::test]
    async fn code_collision_is_retried() {
        let store = MemoryRoomStore::new();
        let first = directory(&store, HostPolicy::Delegate)
            .with_code_source(scripted_codes(&["AAAAAA"]))
            .create_room(None, "One", RoomType::Game, None)
            .await
            .unwrap();
        let second = directory(&store, HostPolicy::Delegate)
            .with_code_source(scripted_codes(&["AAAAAA", "BBBBBB"]))
            .create_room(None, "Two", RoomType::Game, None)
            .await
            .unwrap();

        assert_eq!(first.room.code, "AAAAAA");
        assert_eq!(second.room.code, "BBBBBB");
    }

    #[tokio::test]
    async fn code_generation_exhaustion_is_reported() {
        let store = MemoryRoomStore::new();
        let dir = directory(&store, HostPolicy::Delegate).with_code_source(scripted_codes(&["AAAAAA"]));
        dir.create_room(None, "One", RoomType::Game, None).await.unwrap();
        let err = dir
            .create_room(None, "Two", RoomType::Game, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::CodeSpaceExhausted { attempts: 4 }));
    }

    #[tokio::test]
    async fn concurrent_creations_get_distinct_codes() {
        let store = MemoryRoomStore::new();
        let dir = directory(&store, HostPolicy::Delegate);
        let tasks: Vec<_> = (0..32)
            .map(|i| {
                let dir = dir.clone();
                tokio::spawn(async move {
                    dir.create_room(None, &format!("Room {i}"), RoomType::Music, None)
                        .await
                        .unwrap()
                        .room
                        .code
                })
            })
            .collect();

        let mut codes = HashSet::new();
        for task in tasks {
            let code = task.await.unwrap();
            assert_eq!(code.len(), 6);
            assert!(code.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
            codes.insert(code);
        }
        assert_eq!(codes.len(), 32);
    }

    #[tokio::test]
    async fn code_lookup_is_case_insensitive() {
        let store = MemoryRoomStore::new();
        let dir = directory(&store, HostPolicy::Delegate).with_code_source(scripted_codes(&["AB12CD"]));
        let created = dir.create_room(None, "Lounge", RoomType::Music, None).await.unwrap();

        let lower = dir.get_room_by_code("ab12cd").await.unwrap().unwrap();
        let upper = dir.get_room_by_code("AB12CD").await.unwrap().unwrap();
        assert_eq!(lower.id, created.room.id);
        assert_eq!(upper.id, created.room.id);
    }

    #[tokio::test]
    async fn join_unknown_code_is_not_found() {
        let store = MemoryRoomStore::new();
        let err = directory(&store, HostPolicy::Delegate)
            .join_room_by_code(Some(Uuid::new_v4()), "ZZZZZZ")
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }

    #[tokio::test]
    async fn active_rooms_are_newest_first_and_filtered_by_type() {
        let store = MemoryRoomStore::new();
        let dir = directory(&store, HostPolicy::Delegate);
        dir.create_room(None, "Old video", RoomType::Video, None).await.unwrap();
        dir.create_room(None, "Music", RoomType::Music, None).await.unwrap();
        dir.create_room(None, "New video", RoomType::Video, None).await.unwrap();

        let videos = dir.list_active_rooms(Some(RoomType::Video)).await.unwrap();
        let names: Vec<_> = videos.iter().map(|room| room.name.as_str()).collect();
        assert_eq!(names, ["New video", "Old video"]);
        assert_eq!(dir.list_active_rooms(None).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn enforced_policy_rejects_non_host_playback() {
        let store = MemoryRoomStore::new();
        let dir = directory(&store, HostPolicy::Enforce);
        let host = Uuid::new_v4();
        let room = dir
            .create_room(Some(host), "Movie Night", RoomType::Video, None)
            .await
            .unwrap()
            .room;

        let err = dir
            .update_room(Some(Uuid::new_v4()), room.id, RoomPatch::playback(true, 3.0))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Unauthorized(_)));

        let updated = dir
            .update_room(Some(host), room.id, RoomPatch::playback(true, 3.0))
            .await
            .unwrap();
        assert!(updated.is_playing);
    }

    #[tokio::test]
    async fn delegated_policy_accepts_any_caller() {
        let store = MemoryRoomStore::new();
        let dir = directory(&store, HostPolicy::Delegate);
        let room = dir
            .create_room(Some(Uuid::new_v4()), "Movie Night", RoomType::Video, None)
            .await
            .unwrap()
            .room;
        let updated = dir
            .update_room(None, room.id, RoomPatch::content(Some(" https://example.test/v ".into())))
            .await
            .unwrap();
        assert_eq!(updated.content_ref.as_deref(), Some("https://example.test/v"));
        assert_eq!(updated.host_id, room.host_id);
    }

    #[tokio::test]
    async fn update_rejects_negative_and_non_finite_positions() {
        let store = MemoryRoomStore::new();
        let directory = directory(&store, HostPolicy::Delegate);
        let room = directory
            .create_room(None, "Movie Night", RoomType::Video, None)
            .await
            .unwrap()
            .room;

        for position in [-5.0, f64::NAN, f64::INFINITY] {
            let err = directory
                .update_room(None, room.id, RoomPatch::playback(true, position))
                .await
                .unwrap_err();
            assert!(matches!(err, ServiceError::Validation(_)), "{position}");
        }

        let stored = directory.get_room_by_id(room.id).await.unwrap().unwrap();
        assert_eq!(stored.playback_position, 0.0);
        assert!(!stored.is_playing);
    }

    #[tokio::test]
    async fn delete_room_is_idempotent() {
        let store = MemoryRoomStore::new();
        let dir = directory(&store, HostPolicy::Delegate);
        let room = dir
            .create_room(None, "Gone soon", RoomType::Game, None)
            .await
            .unwrap()
            .room;
        dir.delete_room(None, room.id).await.unwrap();
        dir.delete_room(None, room.id).await.unwrap();
        assert!(dir.get_room_by_id(room.id).await.unwrap().is_none());
    }
}
