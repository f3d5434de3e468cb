use axum::{
    Json, Router,
    extract::{Query, State},
    routing::get,
};

use crate::{
    dto::music::{
        FeaturedPlaylistsResponse, NewReleasesResponse, TrackSearchQuery, TrackSearchResponse,
    },
    error::AppError,
    services::music_service::{MusicCatalog, MusicError},
    state::SharedState,
};

/// Read-only proxy in front of the music catalog.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/api/spotify/search", get(search_tracks))
        .route("/api/spotify/featured", get(featured_playlists))
        .route("/api/spotify/new-releases", get(new_releases))
}

fn catalog(state: &SharedState) -> Result<&MusicCatalog, AppError> {
    state.music().ok_or_else(|| MusicError::NotConfigured.into())
}

/// Search tracks by free text.
#[utoipa::path(
    get,
    path = "/api/spotify/search",
    tag = "music",
    params(TrackSearchQuery),
    responses(
        (status = 200, description = "Matching tracks", body = TrackSearchResponse),
        (status = 400, description = "Search query is required"),
        (status = 502, description = "Catalog request failed"),
        (status = 503, description = "Catalog credentials not configured")
    )
)]
pub async fn search_tracks(
    State(state): State<SharedState>,
    Query(query): Query<TrackSearchQuery>,
) -> Result<Json<TrackSearchResponse>, AppError> {
    let response = catalog(&state)?
        .search_tracks(query.q.as_deref(), query.limit)
        .await?;
    Ok(Json(response))
}

/// Featured playlists.
#[utoipa::path(
    get,
    path = "/api/spotify/featured",
    tag = "music",
    responses(
        (status = 200, description = "Featured playlists", body = FeaturedPlaylistsResponse),
        (status = 502, description = "Catalog request failed"),
        (status = 503, description = "Catalog credentials not configured")
    )
)]
pub async fn featured_playlists(
    State(state): State<SharedState>,
) -> Result<Json<FeaturedPlaylistsResponse>, AppError> {
    Ok(Json(catalog(&state)?.featured_playlists().await?))
}

/// Latest album releases.
#[utoipa::path(
    get,
    path = "/api/spotify/new-releases",
    tag = "music",
    responses(
        (status = 200, description = "New releases", body = NewReleasesResponse),
        (status = 502, description = "Catalog request failed"),
        (status = 503, description = "Catalog credentials not configured")
    )
)]
pub async fn new_releases(
    State(state): State<SharedState>,
) -> Result<Json<NewReleasesResponse>, AppError> {
    Ok(Json(catalog(&state)?.new_releases().await?))
}
