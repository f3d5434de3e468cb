//! Membership manager: idempotent join, leave, roster and membership checks.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::{
    dao::{
        models::{ParticipantWithProfile, RoomId, UserId},
        room_store::{PARTICIPANTS_ROOM_FKEY, PARTICIPANTS_ROOM_USER_KEY, RoomStore},
        storage::StorageError,
    },
    error::ServiceError,
};

/// Adds and removes participant rows.
#[derive(Clone)]
pub struct MembershipManager {
    store: Arc<dyn RoomStore>,
}

impl MembershipManager {
    pub fn new(store: Arc<dyn RoomStore>) -> Self {
        Self { store }
    }

    /// Record `user_id` as a participant of `room_id`.
    ///
    /// Anonymous callers are not tracked. A duplicate join is absorbed: only the
    /// membership unique-constraint violation is swallowed, every other error propagates.
    pub async fn join(&self, room_id: RoomId, user_id: Option<UserId>) -> Result<(), ServiceError> {
        let Some(user_id) = user_id else {
            debug!(%room_id, "anonymous viewer; membership not tracked");
            return Ok(());
        };

        match self.store.insert_participant(room_id, user_id).await {
            Ok(_) => {
                debug!(%room_id, %user_id, "participant joined");
                Ok(())
            }
            Err(err) if err.is_unique_violation_of(PARTICIPANTS_ROOM_USER_KEY) => {
                debug!(%room_id, %user_id, "duplicate join absorbed");
                Ok(())
            }
            Err(StorageError::ForeignKeyViolation { constraint })
                if constraint == PARTICIPANTS_ROOM_FKEY =>
            {
                Err(ServiceError::NotFound(format!("room `{room_id}` not found")))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Remove the membership row; absent rows and anonymous callers are a no-op.
    pub async fn leave(&self, room_id: RoomId, user_id: Option<UserId>) -> Result<(), ServiceError> {
        let Some(user_id) = user_id else {
            return Ok(());
        };
        let removed = self.store.delete_participant(room_id, user_id).await?;
        debug!(%room_id, %user_id, removed, "participant left");
        Ok(())
    }

    /// Roster of `room_id`, ordered by join time ascending.
    pub async fn list_participants(
        &self,
        room_id: RoomId,
    ) -> Result<Vec<ParticipantWithProfile>, ServiceError> {
        Ok(self.store.list_participants(room_id).await?)
    }

    pub async fn is_member(&self, room_id: RoomId, user_id: UserId) -> Result<bool, ServiceError> {
        Ok(self.store.find_participant(room_id, user_id).await?.is_some())
    }

    /// Membership check for a possibly anonymous caller; store failures read as "not a member".
    pub async fn is_user_in_room(&self, room_id: RoomId, user_id: Option<UserId>) -> bool {
        let Some(user_id) = user_id else {
            return false;
        };
        match self.is_member(room_id, user_id).await {
            Ok(member) => member,
            Err(err) => {
                warn!(%room_id, %user_id, error = %err, "membership check failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;
    use crate::dao::{
        models::{NewRoom, RoomType},
        room_store::MemoryRoomStore,
    };

    async fn setup() -> (MemoryRoomStore, MembershipManager, RoomId) {
        let store = MemoryRoomStore::new();
        let room = store
            .insert_room(NewRoom {
                code: "ROOM01".into(),
                name: "Lounge".into(),
                room_type: RoomType::Music,
                host_id: None,
                content_ref: None,
            })
            .await
            .unwrap();
        let manager = MembershipManager::new(Arc::new(store.clone()));
        (store, manager, room.id)
    }

    #[tokio::test]
    async fn join_twice_leaves_one_row() {
        let (_store, manager, room_id) = setup().await;
        let user = Uuid::new_v4();

        manager.join(room_id, Some(user)).await.unwrap();
        manager.join(room_id, Some(user)).await.unwrap();

        assert_eq!(manager.list_participants(room_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn join_missing_room_is_not_found() {
        let (store, manager, room_id) = setup().await;
        let err = manager
            .join(Uuid::new_v4(), Some(Uuid::new_v4()))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));

        store.delete_room(room_id).await.unwrap();
        let err = manager.join(room_id, Some(Uuid::new_v4())).await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(message) if message.contains(&room_id.to_string())));
    }

    #[tokio::test]
    async fn unavailable_store_is_upstream() {
        let (store, manager, room_id) = setup().await;
        store.set_available(false);
        let err = manager.join(room_id, Some(Uuid::new_v4())).await.unwrap_err();
        assert!(matches!(err, ServiceError::Upstream(_)));
    }

    #[tokio::test]
    async fn anonymous_join_and_leave_are_no_ops() {
        let (_store, manager, room_id) = setup().await;
        manager.join(room_id, None).await.unwrap();
        manager.leave(room_id, None).await.unwrap();
        assert!(manager.list_participants(room_id).await.unwrap().is_empty());
        assert!(!manager.is_user_in_room(room_id, None).await);
    }

    #[tokio::test]
    async fn leave_removes_membership_and_is_idempotent() {
        let (_store, manager, room_id) = setup().await;
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        manager.join(room_id, Some(alice)).await.unwrap();
        manager.join(room_id, Some(bob)).await.unwrap();

        manager.leave(room_id, Some(bob)).await.unwrap();
        manager.leave(room_id, Some(bob)).await.unwrap();

        assert!(!manager.is_member(room_id, bob).await.unwrap());
        let roster = manager.list_participants(room_id).await.unwrap();
        assert_eq!(roster.len(), 1);
        assert_eq!(roster[0].participant.user_id, alice);
    }

    #[tokio::test]
    async fn membership_check_degrades_to_false_when_store_is_down() {
        let (store, manager, room_id) = setup().await;
        let user = Uuid::new_v4();
        manager.join(room_id, Some(user)).await.unwrap();
        store.set_available(false);
        assert!(!manager.is_user_in_room(room_id, Some(user)).await);
    }
}
