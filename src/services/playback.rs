//! Playback coordinator: publishes play/pause/seek and content changes as room updates.
//!
//! Writes are last-write-wins at the store; concurrent updaters converge on whichever
//! row image the store committed last, which every viewer then observes through the
//! change feed.

use tracing::debug;

use crate::{
    dao::models::{RoomEntity, RoomId, RoomPatch, UserId},
    error::ServiceError,
    services::directory::RoomDirectory,
};

#[derive(Clone)]
pub struct PlaybackCoordinator {
    directory: RoomDirectory,
}

impl PlaybackCoordinator {
    pub fn new(directory: RoomDirectory) -> Self {
        Self { directory }
    }

    /// Persist `(is_playing, position)` for the room. `position` is in seconds and must
    /// be finite and non-negative.
    pub async fn update_playback(
        &self,
        actor: Option<UserId>,
        room_id: RoomId,
        is_playing: bool,
        position: f64,
    ) -> Result<RoomEntity, ServiceError> {
        let room = self
            .directory
            .update_room(actor, room_id, RoomPatch::playback(is_playing, position))
            .await?;
        debug!(%room_id, is_playing, position, "playback published");
        Ok(room)
    }

    /// Switch the room to new content. A blank reference clears it.
    pub async fn update_content(
        &self,
        actor: Option<UserId>,
        room_id: RoomId,
        content_ref: Option<String>,
    ) -> Result<RoomEntity, ServiceError> {
        let room = self
            .directory
            .update_room(actor, room_id, RoomPatch::content(content_ref))
            .await?;
        debug!(%room_id, content_ref = ?room.content_ref, "content published");
        Ok(room)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use uuid::Uuid;

    use super::*;
    use crate::{
        config::HostPolicy,
        dao::{
            models::RoomType,
            room_store::{MemoryRoomStore, RoomStore},
        },
        services::membership::MembershipManager,
    };

    async fn setup() -> (PlaybackCoordinator, RoomId) {
        let store: Arc<dyn RoomStore> = Arc::new(MemoryRoomStore::new());
        let directory = RoomDirectory::new(
            store.clone(),
            MembershipManager::new(store),
            4,
            HostPolicy::Delegate,
        );
        let room = directory
            .create_room(Some(Uuid::new_v4()), "Movie Night", RoomType::Video, None)
            .await
            .unwrap()
            .room;
        (PlaybackCoordinator::new(directory), room.id)
    }

    #[tokio::test]
    async fn last_write_wins() {
        let (playback, room_id) = setup().await;
        playback.update_playback(None, room_id, true, 10.0).await.unwrap();
        let room = playback
            .update_playback(None, room_id, false, 12.5)
            .await
            .unwrap();
        assert!(!room.is_playing);
        assert_eq!(room.playback_position, 12.5);
    }

    #[tokio::test]
    async fn backwards_seek_is_accepted() {
        let (playback, room_id) = setup().await;
        playback.update_playback(None, room_id, true, 90.0).await.unwrap();
        let room = playback.update_playback(None, room_id, true, 5.0).await.unwrap();
        assert_eq!(room.playback_position, 5.0);
    }

    #[tokio::test]
    async fn invalid_positions_are_rejected() {
        let (playback, room_id) = setup().await;
        for position in [-1.0, f64::NAN, f64::INFINITY] {
            let err = playback
                .update_playback(None, room_id, true, position)
                .await
                .unwrap_err();
            assert!(matches!(err, ServiceError::Validation(_)));
        }
    }

    #[tokio::test]
    async fn content_update_keeps_playback_fields() {
        let (playback, room_id) = setup().await;
        playback.update_playback(None, room_id, true, 42.0).await.unwrap();
        let room = playback
            .update_content(None, room_id, Some("spotify:track:123".into()))
            .await
            .unwrap();
        assert_eq!(room.content_ref.as_deref(), Some("spotify:track:123"));
        assert!(room.is_playing);
        assert_eq!(room.playback_position, 42.0);

        let cleared = playback.update_content(None, room_id, Some("  ".into())).await.unwrap();
        assert_eq!(cleared.content_ref, None);
    }

    #[tokio::test]
    async fn unknown_room_is_not_found() {
        let (playback, _room_id) = setup().await;
        let err = playback
            .update_playback(None, Uuid::new_v4(), true, 1.0)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }
}
