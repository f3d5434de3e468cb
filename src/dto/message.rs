use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::Validate;

use crate::{
    dao::models::MessageWithProfile,
    dto::{format_system_time, room::ProfileSummary},
};

#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct SendMessageRequest {
    /// Message text; trimmed before storage.
    #[validate(length(min = 1, max = 2000))]
    pub body: String,
}

#[derive(Debug, Deserialize, IntoParams, Validate)]
pub struct MessagesQuery {
    /// Number of newest messages to return (defaults to the configured page size).
    #[validate(range(min = 1))]
    pub limit: Option<usize>,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct MessageSummary {
    pub id: Uuid,
    pub room_id: Uuid,
    pub user_id: Option<Uuid>,
    pub body: String,
    pub created_at: String,
    pub author: Option<ProfileSummary>,
}

impl From<MessageWithProfile> for MessageSummary {
    fn from(row: MessageWithProfile) -> Self {
        Self {
            id: row.message.id,
            room_id: row.message.room_id,
            user_id: row.message.user_id,
            body: row.message.body,
            created_at: format_system_time(row.message.created_at),
            author: row.profile.map(ProfileSummary::from),
        }
    }
}

/// Message page in ascending creation order.
#[derive(Debug, Serialize, ToSchema)]
pub struct MessagesResponse {
    pub messages: Vec<MessageSummary>,
}
