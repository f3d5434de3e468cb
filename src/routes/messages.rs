use axum::{
    Json, Router,
    extract::{Path, Query, State},
    routing::get,
};
use axum_valid::Valid;
use uuid::Uuid;
use validator::Validate;

use crate::{
    dto::message::{MessageSummary, MessagesQuery, MessagesResponse, SendMessageRequest},
    error::AppError,
    routes::auth::Caller,
    state::SharedState,
};

/// Routes for the per-room chat log.
pub fn router() -> Router<SharedState> {
    Router::new().route("/rooms/{id}/messages", get(list_messages).post(send_message))
}

/// Newest messages of the room, oldest first.
#[utoipa::path(
    get,
    path = "/rooms/{id}/messages",
    tag = "messages",
    params(("id" = String, Path, description = "Room identifier"), MessagesQuery),
    responses((status = 200, description = "Message page", body = MessagesResponse))
)]
pub async fn list_messages(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Valid(Query(query)): Valid<Query<MessagesQuery>>,
) -> Result<Json<MessagesResponse>, AppError> {
    let messages = state.services().messages.list(id, query.limit).await?;
    Ok(Json(MessagesResponse {
        messages: messages.into_iter().map(MessageSummary::from).collect(),
    }))
}

/// Append a chat message authored by the caller.
#[utoipa::path(
    post,
    path = "/rooms/{id}/messages",
    tag = "messages",
    params(("id" = String, Path, description = "Room identifier")),
    request_body = SendMessageRequest,
    responses(
        (status = 200, description = "Message stored", body = MessageSummary),
        (status = 400, description = "Blank or oversized message"),
        (status = 404, description = "Room not found")
    )
)]
pub async fn send_message(
    State(state): State<SharedState>,
    caller: Caller,
    Path(id): Path<Uuid>,
    Json(payload): Json<SendMessageRequest>,
) -> Result<Json<MessageSummary>, AppError> {
    payload.validate()?;
    let user = caller.user_id().await?;
    let message = state
        .services()
        .messages
        .append(id, user, &payload.body)
        .await?;
    Ok(Json(message.into()))
}
