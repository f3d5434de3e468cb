use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI specification for the flickzy room sync service.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::auth::sign_up,
        crate::routes::auth::sign_in,
        crate::routes::auth::sign_out,
        crate::routes::auth::me,
        crate::routes::auth::update_me,
        crate::routes::rooms::list_rooms,
        crate::routes::rooms::create_room,
        crate::routes::rooms::join_room,
        crate::routes::rooms::get_room_by_code,
        crate::routes::rooms::get_room,
        crate::routes::rooms::update_room,
        crate::routes::rooms::delete_room,
        crate::routes::rooms::leave_room,
        crate::routes::rooms::update_playback,
        crate::routes::rooms::membership,
        crate::routes::messages::list_messages,
        crate::routes::messages::send_message,
        crate::routes::sse::room_stream,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::auth::SignUpRequest,
            crate::dto::auth::SignInRequest,
            crate::dto::auth::AuthResponse,
            crate::dto::auth::UpdateProfileRequest,
            crate::dto::room::CreateRoomRequest,
            crate::dto::room::JoinRoomRequest,
            crate::dto::room::UpdateRoomRequest,
            crate::dto::room::PlaybackRequest,
            crate::dto::room::RoomSummary,
            crate::dto::room::ProfileSummary,
            crate::dto::room::ParticipantSummary,
            crate::dto::room::RoomDetailsResponse,
            crate::dto::room::RoomListResponse,
            crate::dto::room::MembershipResponse,
            crate::dto::message::SendMessageRequest,
            crate::dto::message::MessageSummary,
            crate::dto::message::MessagesResponse,
            crate::dto::sse::Handshake,
            crate::dto::sse::RoomUpdatedEvent,
            crate::dto::sse::RoomSignalEvent,
            crate::dao::models::RoomType,
            crate::dao::models::UserRole,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "auth", description = "Accounts, sessions and profiles"),
        (name = "rooms", description = "Room directory, membership and playback"),
        (name = "messages", description = "Per-room chat log"),
        (name = "sse", description = "Server-sent events streams"),
    )
)]
pub struct ApiDoc;

#[cfg(feature = "music-proxy")]
#[derive(OpenApi)]
/// Music catalog proxy routes, merged into [`ApiDoc`] when the proxy is compiled in.
#[openapi(
    paths(
        crate::routes::music::search_tracks,
        crate::routes::music::featured_playlists,
        crate::routes::music::new_releases,
    ),
    components(
        schemas(
            crate::dto::music::TrackSummary,
            crate::dto::music::TrackSearchResponse,
            crate::dto::music::PlaylistSummary,
            crate::dto::music::FeaturedPlaylistsResponse,
            crate::dto::music::AlbumSummary,
            crate::dto::music::NewReleasesResponse,
        )
    ),
    tags((name = "music", description = "Music catalog proxy"))
)]
pub struct MusicApiDoc;

/// Full OpenAPI document for the compiled feature set.
pub fn openapi() -> utoipa::openapi::OpenApi {
    #[cfg(feature = "music-proxy")]
    {
        let mut doc = ApiDoc::openapi();
        doc.merge(MusicApiDoc::openapi());
        doc
    }
    #[cfg(not(feature = "music-proxy"))]
    {
        ApiDoc::openapi()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_room_routes() {
        let doc = openapi();
        assert!(doc.paths.paths.contains_key("/rooms/{id}/playback"));
        assert!(doc.paths.paths.contains_key("/rooms/{id}/events"));
        let schemas = doc.components.expect("components").schemas;
        assert!(schemas.contains_key("RoomDetailsResponse"));
    }
}
