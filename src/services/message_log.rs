//! Append-only per-room chat log.

use std::sync::Arc;

use tracing::debug;

use crate::{
    dao::{
        models::{MessageWithProfile, NewMessage, RoomId, UserId},
        room_store::{MESSAGES_ROOM_FKEY, RoomStore},
        storage::StorageError,
    },
    error::ServiceError,
};

const MAX_MESSAGE_LENGTH: usize = 2_000;

#[derive(Clone)]
pub struct MessageLog {
    store: Arc<dyn RoomStore>,
    page_size: usize,
    max_page_size: usize,
}

impl MessageLog {
    pub fn new(store: Arc<dyn RoomStore>, page_size: usize, max_page_size: usize) -> Self {
        let max_page_size = max_page_size.max(1);
        Self {
            store,
            page_size: page_size.clamp(1, max_page_size),
            max_page_size,
        }
    }

    /// Append a message. Bodies are trimmed; whitespace-only bodies are rejected and
    /// nothing is written.
    pub async fn append(
        &self,
        room_id: RoomId,
        user_id: Option<UserId>,
        body: &str,
    ) -> Result<MessageWithProfile, ServiceError> {
        let body = body.trim();
        if body.is_empty() {
            return Err(ServiceError::Validation("message must not be empty".into()));
        }
        if body.chars().count() > MAX_MESSAGE_LENGTH {
            return Err(ServiceError::Validation(format!(
                "message must be at most {MAX_MESSAGE_LENGTH} characters"
            )));
        }

        let message = NewMessage {
            room_id,
            user_id,
            body: body.to_string(),
        };
        match self.store.insert_message(message).await {
            Ok(row) => {
                debug!(%room_id, message_id = %row.message.id, "message appended");
                Ok(row)
            }
            Err(StorageError::ForeignKeyViolation { constraint }) if constraint == MESSAGES_ROOM_FKEY => {
                Err(ServiceError::NotFound(format!("room `{room_id}` not found")))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Newest messages of the room in ascending creation order. `limit` defaults to the
    /// configured page size and is clamped to the configured maximum.
    pub async fn list(
        &self,
        room_id: RoomId,
        limit: Option<usize>,
    ) -> Result<Vec<MessageWithProfile>, ServiceError> {
        let limit = limit
            .unwrap_or(self.page_size)
            .clamp(1, self.max_page_size);
        Ok(self.store.list_messages(room_id, limit).await?)
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::Mutex,
        time::{Duration, SystemTime, UNIX_EPOCH},
    };

    use uuid::Uuid;

    use super::*;
    use crate::dao::{
        models::{NewRoom, RoomType},
        room_store::MemoryRoomStore,
    };

    async fn setup(store: MemoryRoomStore, page_size: usize) -> (MessageLog, RoomId) {
        let room = store
            .insert_room(NewRoom {
                code: "CHAT01".into(),
                name: "Chat".into(),
                room_type: RoomType::Video,
                host_id: None,
                content_ref: None,
            })
            .await
            .unwrap();
        (MessageLog::new(Arc::new(store), page_size, 200), room.id)
    }

    #[tokio::test]
    async fn blank_message_writes_nothing() {
        let (log, room_id) = setup(MemoryRoomStore::new(), 50).await;
        let err = log.append(room_id, None, "   \n\t").await.unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));
        assert!(log.list(room_id, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn body_is_trimmed_and_anonymous_sender_kept() {
        let (log, room_id) = setup(MemoryRoomStore::new(), 50).await;
        let row = log.append(room_id, None, "  hello  ").await.unwrap();
        assert_eq!(row.message.body, "hello");
        assert_eq!(row.message.user_id, None);
        assert!(row.profile.is_none());
    }

    #[tokio::test]
    async fn page_holds_newest_messages_in_ascending_order() {
        let ticks = Mutex::new(0u64);
        let clock = Arc::new(move || {
            let mut tick = ticks.lock().unwrap();
            *tick += 1;
            UNIX_EPOCH + Duration::from_secs(*tick)
        }) as Arc<dyn Fn() -> SystemTime + Send + Sync>;
        let (log, room_id) = setup(MemoryRoomStore::with_clock(clock), 3).await;

        for body in ["one", "two", "three", "four", "five"] {
            log.append(room_id, Some(Uuid::new_v4()), body).await.unwrap();
        }

        let page: Vec<_> = log
            .list(room_id, None)
            .await
            .unwrap()
            .into_iter()
            .map(|row| row.message.body)
            .collect();
        assert_eq!(page, ["three", "four", "five"]);
        assert_eq!(log.list(room_id, Some(10)).await.unwrap().len(), 5);
    }

    #[tokio::test]
    async fn message_to_missing_room_is_not_found() {
        let (log, _room_id) = setup(MemoryRoomStore::new(), 50).await;
        let err = log.append(Uuid::new_v4(), None, "hi").await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }
}
