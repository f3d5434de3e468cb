use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post, put},
};
use axum_valid::Valid;
use uuid::Uuid;

use crate::{
    dto::room::{
        CreateRoomRequest, JoinRoomRequest, ListRoomsQuery, MembershipResponse, PlaybackRequest,
        RoomDetailsResponse, RoomListResponse, RoomSummary, UpdateRoomRequest,
    },
    error::AppError,
    routes::auth::Caller,
    state::SharedState,
};

/// Routes for the room directory, membership and playback.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/rooms", get(list_rooms).post(create_room))
        .route("/rooms/join", post(join_room))
        .route("/rooms/code/{code}", get(get_room_by_code))
        .route(
            "/rooms/{id}",
            get(get_room).patch(update_room).delete(delete_room),
        )
        .route("/rooms/{id}/leave", post(leave_room))
        .route("/rooms/{id}/playback", put(update_playback))
        .route("/rooms/{id}/membership", get(membership))
}

/// List active rooms, newest first.
#[utoipa::path(
    get,
    path = "/rooms",
    tag = "rooms",
    params(ListRoomsQuery),
    responses((status = 200, description = "Active rooms", body = RoomListResponse))
)]
pub async fn list_rooms(
    State(state): State<SharedState>,
    Query(query): Query<ListRoomsQuery>,
) -> Result<Json<RoomListResponse>, AppError> {
    let rooms = state
        .services()
        .directory
        .list_active_rooms(query.room_type)
        .await?;
    Ok(Json(RoomListResponse {
        rooms: rooms.into_iter().map(RoomSummary::from).collect(),
    }))
}

/// Create a room hosted by the caller (hostless for anonymous callers).
#[utoipa::path(
    post,
    path = "/rooms",
    tag = "rooms",
    request_body = CreateRoomRequest,
    responses(
        (status = 200, description = "Room created", body = RoomDetailsResponse),
        (status = 400, description = "Invalid payload")
    )
)]
pub async fn create_room(
    State(state): State<SharedState>,
    caller: Caller,
    Valid(Json(payload)): Valid<Json<CreateRoomRequest>>,
) -> Result<Json<RoomDetailsResponse>, AppError> {
    let host = caller.user_id().await?;
    let details = state
        .services()
        .directory
        .create_room(host, &payload.name, payload.room_type, payload.content_ref)
        .await?;
    Ok(Json(details.into()))
}

/// Join the active room matching a share code.
#[utoipa::path(
    post,
    path = "/rooms/join",
    tag = "rooms",
    request_body = JoinRoomRequest,
    responses(
        (status = 200, description = "Joined room", body = RoomDetailsResponse),
        (status = 404, description = "No active room with this code")
    )
)]
pub async fn join_room(
    State(state): State<SharedState>,
    caller: Caller,
    Valid(Json(payload)): Valid<Json<JoinRoomRequest>>,
) -> Result<Json<RoomDetailsResponse>, AppError> {
    let user = caller.user_id().await?;
    let details = state
        .services()
        .directory
        .join_room_by_code(user, &payload.code)
        .await?;
    Ok(Json(details.into()))
}

/// Look up an active room by share code, case-insensitively.
#[utoipa::path(
    get,
    path = "/rooms/code/{code}",
    tag = "rooms",
    params(("code" = String, Path, description = "Six-character share code")),
    responses(
        (status = 200, description = "Room found", body = RoomSummary),
        (status = 404, description = "No active room with this code")
    )
)]
pub async fn get_room_by_code(
    State(state): State<SharedState>,
    Path(code): Path<String>,
) -> Result<Json<RoomSummary>, AppError> {
    let room = state
        .services()
        .directory
        .get_room_by_code(&code)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("no active room with code `{code}`")))?;
    Ok(Json(room.into()))
}

/// Room with host profile and participant roster.
#[utoipa::path(
    get,
    path = "/rooms/{id}",
    tag = "rooms",
    params(("id" = String, Path, description = "Room identifier")),
    responses(
        (status = 200, description = "Room details", body = RoomDetailsResponse),
        (status = 404, description = "Room not found")
    )
)]
pub async fn get_room(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<RoomDetailsResponse>, AppError> {
    let details = state
        .services()
        .directory
        .room_with_participants(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("room `{id}` not found")))?;
    Ok(Json(details.into()))
}

/// Apply a partial update to the room.
#[utoipa::path(
    patch,
    path = "/rooms/{id}",
    tag = "rooms",
    params(("id" = String, Path, description = "Room identifier")),
    request_body = UpdateRoomRequest,
    responses(
        (status = 200, description = "Room updated", body = RoomSummary),
        (status = 401, description = "Only the host may change playback or content"),
        (status = 404, description = "Room not found")
    )
)]
pub async fn update_room(
    State(state): State<SharedState>,
    caller: Caller,
    Path(id): Path<Uuid>,
    Valid(Json(payload)): Valid<Json<UpdateRoomRequest>>,
) -> Result<Json<RoomSummary>, AppError> {
    let actor = caller.user_id().await?;
    let room = state
        .services()
        .directory
        .update_room(actor, id, payload.into())
        .await?;
    Ok(Json(room.into()))
}

/// Delete the room; participants and messages go with it.
#[utoipa::path(
    delete,
    path = "/rooms/{id}",
    tag = "rooms",
    params(("id" = String, Path, description = "Room identifier")),
    responses(
        (status = 204, description = "Room deleted"),
        (status = 401, description = "Only the host may delete the room")
    )
)]
pub async fn delete_room(
    State(state): State<SharedState>,
    caller: Caller,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    let actor = caller.user_id().await?;
    state.services().directory.delete_room(actor, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Remove the caller's membership row.
#[utoipa::path(
    post,
    path = "/rooms/{id}/leave",
    tag = "rooms",
    params(("id" = String, Path, description = "Room identifier")),
    responses((status = 204, description = "Left the room"))
)]
pub async fn leave_room(
    State(state): State<SharedState>,
    caller: Caller,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    let user = caller.user_id().await?;
    state.services().membership.leave(id, user).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Publish play/pause/seek for the room.
#[utoipa::path(
    put,
    path = "/rooms/{id}/playback",
    tag = "rooms",
    params(("id" = String, Path, description = "Room identifier")),
    request_body = PlaybackRequest,
    responses(
        (status = 200, description = "Playback stored", body = RoomSummary),
        (status = 400, description = "Invalid position"),
        (status = 404, description = "Room not found")
    )
)]
pub async fn update_playback(
    State(state): State<SharedState>,
    caller: Caller,
    Path(id): Path<Uuid>,
    Valid(Json(payload)): Valid<Json<PlaybackRequest>>,
) -> Result<Json<RoomSummary>, AppError> {
    let actor = caller.user_id().await?;
    let room = state
        .services()
        .playback
        .update_playback(actor, id, payload.is_playing, payload.position)
        .await?;
    Ok(Json(room.into()))
}

/// Whether the caller is currently a participant. Anonymous callers never are.
#[utoipa::path(
    get,
    path = "/rooms/{id}/membership",
    tag = "rooms",
    params(("id" = String, Path, description = "Room identifier")),
    responses((status = 200, description = "Membership status", body = MembershipResponse))
)]
pub async fn membership(
    State(state): State<SharedState>,
    caller: Caller,
    Path(id): Path<Uuid>,
) -> Result<Json<MembershipResponse>, AppError> {
    let user = caller.user_id().await?;
    let member = state.services().membership.is_user_in_room(id, user).await;
    Ok(Json(MembershipResponse { member }))
}
