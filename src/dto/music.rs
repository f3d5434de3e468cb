use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

/// Query string accepted by `/api/spotify/search`.
#[derive(Debug, Deserialize, IntoParams)]
pub struct TrackSearchQuery {
    /// Free-text search; required.
    pub q: Option<String>,
    /// Maximum number of tracks (clamped to 1-50, default 20).
    pub limit: Option<u32>,
}

/// Normalized track returned by the search proxy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TrackSummary {
    pub id: String,
    pub name: String,
    /// Comma-separated artist names.
    pub artist: String,
    pub album: String,
    /// Largest album cover, empty when none.
    pub image: String,
    pub preview_url: Option<String>,
    pub external_url: String,
    /// Track length in milliseconds.
    pub duration: u64,
    pub uri: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TrackSearchResponse {
    pub tracks: Vec<TrackSummary>,
    pub total: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistSummary {
    pub id: String,
    pub name: String,
    pub description: String,
    pub image: String,
    pub tracks_count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct FeaturedPlaylistsResponse {
    pub playlists: Vec<PlaylistSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AlbumSummary {
    pub id: String,
    pub name: String,
    pub artist: String,
    pub image: String,
    pub release_date: String,
    pub total_tracks: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewReleasesResponse {
    pub albums: Vec<AlbumSummary>,
}
