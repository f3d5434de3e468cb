//! Spotify catalog proxy: client-credentials token caching and normalized search,
//! featured playlists and new releases.

use std::{sync::Arc, time::Duration};

use reqwest::{Client, StatusCode, header};
use serde::{Deserialize, de::DeserializeOwned};
use thiserror::Error;
use tokio::{sync::Mutex, time::Instant};
use tracing::{debug, info, warn};

use crate::{
    config::SpotifyCredentials,
    dto::music::{
        AlbumSummary, FeaturedPlaylistsResponse, NewReleasesResponse, PlaylistSummary,
        TrackSearchResponse, TrackSummary,
    },
};

const ACCOUNTS_URL: &str = "https://accounts.spotify.com";
const API_URL: &str = "https://api.spotify.com/v1";
const DEFAULT_SEARCH_LIMIT: u32 = 20;
const MAX_SEARCH_LIMIT: u32 = 50;
/// Tokens are refreshed this long before Spotify expires them.
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// Failures raised by the catalog proxy.
#[derive(Debug, Error)]
pub enum MusicError {
    /// No client credentials were configured.
    #[error("music catalog is not configured")]
    NotConfigured,
    /// Search query missing or blank.
    #[error("{0}")]
    InvalidQuery(String),
    /// Building the HTTP client failed.
    #[error("failed to build music catalog client")]
    ClientBuilder {
        #[source]
        source: reqwest::Error,
    },
    /// The request could not be sent.
    #[error("failed to reach music catalog endpoint `{endpoint}`")]
    RequestSend {
        endpoint: &'static str,
        #[source]
        source: reqwest::Error,
    },
    /// The catalog answered with a non-success status.
    #[error("music catalog endpoint `{endpoint}` answered {status}")]
    RequestStatus {
        endpoint: &'static str,
        status: StatusCode,
    },
    /// The response body did not match the expected shape.
    #[error("failed to decode music catalog response from `{endpoint}`")]
    DecodeResponse {
        endpoint: &'static str,
        #[source]
        source: reqwest::Error,
    },
}

/// Convenient result alias returning [`MusicError`] failures.
pub type MusicResult<T> = Result<T, MusicError>;

struct CachedToken {
    value: String,
    expires_at: Instant,
}

#[derive(Clone)]
pub struct MusicCatalog {
    client: Client,
    credentials: Arc<SpotifyCredentials>,
    accounts_url: Arc<str>,
    api_url: Arc<str>,
    token: Arc<Mutex<Option<CachedToken>>>,
}

impl MusicCatalog {
    /// Catalog client talking to the public Spotify endpoints.
    pub fn new(credentials: SpotifyCredentials) -> MusicResult<Self> {
        Self::with_endpoints(credentials, ACCOUNTS_URL, API_URL)
    }

    /// Catalog client talking to explicit accounts/API base URLs.
    pub fn with_endpoints(
        credentials: SpotifyCredentials,
        accounts_url: &str,
        api_url: &str,
    ) -> MusicResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|source| MusicError::ClientBuilder { source })?;

        Ok(Self {
            client,
            credentials: Arc::new(credentials),
            accounts_url: Arc::from(accounts_url.trim_end_matches('/')),
            api_url: Arc::from(api_url.trim_end_matches('/')),
            token: Arc::new(Mutex::new(None)),
        })
    }

    /// Search tracks. `limit` defaults to 20 and is clamped to 1..=50.
    pub async fn search_tracks(
        &self,
        query: Option<&str>,
        limit: Option<u32>,
    ) -> MusicResult<TrackSearchResponse> {
        let query = query
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .ok_or_else(|| MusicError::InvalidQuery("Search query is required".into()))?;
        let limit = limit
            .unwrap_or(DEFAULT_SEARCH_LIMIT)
            .clamp(1, MAX_SEARCH_LIMIT)
            .to_string();

        let raw: RawSearch = self
            .get_json(
                "search",
                &[("q", query), ("type", "track"), ("limit", limit.as_str())],
            )
            .await?;

        Ok(TrackSearchResponse {
            total: raw.tracks.total,
            tracks: raw.tracks.items.into_iter().map(TrackSummary::from).collect(),
        })
    }

    pub async fn featured_playlists(&self) -> MusicResult<FeaturedPlaylistsResponse> {
        let raw: RawFeatured = self.get_json("browse/featured-playlists", &[]).await?;
        Ok(FeaturedPlaylistsResponse {
            playlists: raw
                .playlists
                .items
                .into_iter()
                .flatten()
                .map(PlaylistSummary::from)
                .collect(),
        })
    }

    pub async fn new_releases(&self) -> MusicResult<NewReleasesResponse> {
        let raw: RawNewReleases = self.get_json("browse/new-releases", &[]).await?;
        Ok(NewReleasesResponse {
            albums: raw.albums.items.into_iter().map(AlbumSummary::from).collect(),
        })
    }

    async fn get_json<T>(&self, endpoint: &'static str, query: &[(&str, &str)]) -> MusicResult<T>
    where
        T: DeserializeOwned,
    {
        let token = self.access_token().await?;
        let response = self
            .client
            .get(format!("{}/{}", self.api_url, endpoint))
            .bearer_auth(token)
            .query(query)
            .send()
            .await
            .map_err(|source| MusicError::RequestSend { endpoint, source })?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            // Revoked early; the next call fetches a fresh token.
            self.token.lock().await.take();
        }
        if !status.is_success() {
            return Err(MusicError::RequestStatus { endpoint, status });
        }

        response
            .json::<T>()
            .await
            .map_err(|source| MusicError::DecodeResponse { endpoint, source })
    }

    async fn access_token(&self) -> MusicResult<String> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref()
            && token.expires_at > Instant::now()
        {
            return Ok(token.value.clone());
        }

        const ENDPOINT: &str = "api/token";
        let response = self
            .client
            .post(format!("{}/{}", self.accounts_url, ENDPOINT))
            .basic_auth(
                &self.credentials.client_id,
                Some(&self.credentials.client_secret),
            )
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body("grant_type=client_credentials")
            .send()
            .await
            .map_err(|source| MusicError::RequestSend {
                endpoint: ENDPOINT,
                source,
            })?;
        if !response.status().is_success() {
            return Err(MusicError::RequestStatus {
                endpoint: ENDPOINT,
                status: response.status(),
            });
        }
        let grant: TokenGrant =
            response
                .json()
                .await
                .map_err(|source| MusicError::DecodeResponse {
                    endpoint: ENDPOINT,
                    source,
                })?;

        let lifetime = Duration::from_secs(grant.expires_in).saturating_sub(TOKEN_EXPIRY_MARGIN);
        debug!(expires_in = grant.expires_in, "music catalog token refreshed");
        *cached = Some(CachedToken {
            value: grant.access_token.clone(),
            expires_at: Instant::now() + lifetime,
        });
        Ok(grant.access_token)
    }
}

/// Build the catalog from optional credentials, logging when the proxy is disabled.
pub fn from_credentials(credentials: Option<SpotifyCredentials>) -> Option<MusicCatalog> {
    let Some(credentials) = credentials else {
        info!("Spotify credentials not configured; music proxy disabled");
        return None;
    };
    match MusicCatalog::new(credentials) {
        Ok(catalog) => Some(catalog),
        Err(err) => {
            warn!(error = %err, "failed to build music catalog client; proxy disabled");
            None
        }
    }
}

#[derive(Deserialize)]
struct TokenGrant {
    access_token: String,
    expires_in: u64,
}

#[derive(Deserialize)]
struct RawImage {
    url: String,
}

#[derive(Deserialize)]
struct RawArtist {
    name: String,
}

#[derive(Deserialize)]
struct RawPage<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
    #[serde(default)]
    total: u64,
}

#[derive(Deserialize)]
struct RawSearch {
    tracks: RawPage<RawTrack>,
}

#[derive(Deserialize)]
struct RawTrack {
    id: String,
    name: String,
    artists: Vec<RawArtist>,
    album: RawAlbumRef,
    preview_url: Option<String>,
    external_urls: RawExternalUrls,
    duration_ms: u64,
    uri: String,
}

#[derive(Deserialize)]
struct RawAlbumRef {
    name: String,
    #[serde(default)]
    images: Vec<RawImage>,
}

#[derive(Deserialize, Default)]
struct RawExternalUrls {
    #[serde(default)]
    spotify: String,
}

#[derive(Deserialize)]
struct RawFeatured {
    playlists: RawPage<Option<RawPlaylist>>,
}

#[derive(Deserialize)]
struct RawPlaylist {
    id: String,
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    images: Vec<RawImage>,
    tracks: RawTrackCount,
}

#[derive(Deserialize)]
struct RawTrackCount {
    total: u64,
}

#[derive(Deserialize)]
struct RawNewReleases {
    albums: RawPage<RawAlbum>,
}

#[derive(Deserialize)]
struct RawAlbum {
    id: String,
    name: String,
    artists: Vec<RawArtist>,
    #[serde(default)]
    images: Vec<RawImage>,
    release_date: String,
    total_tracks: u32,
}

fn join_artists(artists: &[RawArtist]) -> String {
    artists
        .iter()
        .map(|artist| artist.name.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

fn first_image(images: &[RawImage]) -> String {
    images.first().map(|image| image.url.clone()).unwrap_or_default()
}

impl From<RawTrack> for TrackSummary {
    fn from(track: RawTrack) -> Self {
        Self {
            artist: join_artists(&track.artists),
            image: first_image(&track.album.images),
            album: track.album.name,
            id: track.id,
            name: track.name,
            preview_url: track.preview_url,
            external_url: track.external_urls.spotify,
            duration: track.duration_ms,
            uri: track.uri,
        }
    }
}

impl From<RawPlaylist> for PlaylistSummary {
    fn from(playlist: RawPlaylist) -> Self {
        Self {
            image: first_image(&playlist.images),
            id: playlist.id,
            name: playlist.name,
            description: playlist.description.unwrap_or_default(),
            tracks_count: playlist.tracks.total,
        }
    }
}

impl From<RawAlbum> for AlbumSummary {
    fn from(album: RawAlbum) -> Self {
        Self {
            artist: join_artists(&album.artists),
            image: first_image(&album.images),
            id: album.id,
            name: album.name,
            release_date: album.release_date,
            total_tracks: album.total_tracks,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use axum::{Json, Router, extract::State, routing::{get, post}};
    use serde_json::{Value, json};

    use super::*;

    async fn mock_catalog() -> (MusicCatalog, Arc<AtomicUsize>) {
        let token_calls = Arc::new(AtomicUsize::new(0));

        async fn token(State(calls): State<Arc<AtomicUsize>>) -> Json<Value> {
            calls.fetch_add(1, Ordering::SeqCst);
            Json(json!({ "access_token": "abc", "token_type": "Bearer", "expires_in": 3600 }))
        }

        async fn search() -> Json<Value> {
            Json(json!({
                "tracks": {
                    "total": 1,
                    "items": [{
                        "id": "t1",
                        "name": "Song",
                        "artists": [{ "name": "A" }, { "name": "B" }],
                        "album": { "name": "Album", "images": [{ "url": "https://img/1" }] },
                        "preview_url": null,
                        "external_urls": { "spotify": "https://open/t1" },
                        "duration_ms": 1234,
                        "uri": "spotify:track:t1"
                    }]
                }
            }))
        }

        async fn new_releases() -> Json<Value> {
            Json(json!({
                "albums": { "items": [{
                    "id": "a1",
                    "name": "Fresh",
                    "artists": [{ "name": "C" }],
                    "images": [],
                    "release_date": "2024-05-01",
                    "total_tracks": 9
                }] }
            }))
        }

        let app = Router::new()
            .route("/api/token", post(token))
            .route("/v1/search", get(search))
            .route("/v1/browse/new-releases", get(new_releases))
            .with_state(token_calls.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let catalog = MusicCatalog::with_endpoints(
            SpotifyCredentials {
                client_id: "id".into(),
                client_secret: "secret".into(),
            },
            &format!("http://{addr}"),
            &format!("http://{addr}/v1"),
        )
        .unwrap();
        (catalog, token_calls)
    }

    #[tokio::test]
    async fn search_normalizes_tracks_and_caches_token() {
        let (catalog, token_calls) = mock_catalog().await;

        let first = catalog.search_tracks(Some("song"), None).await.unwrap();
        catalog.search_tracks(Some("song"), Some(5)).await.unwrap();

        assert_eq!(first.total, 1);
        assert_eq!(
            first.tracks[0],
            TrackSummary {
                id: "t1".into(),
                name: "Song".into(),
                artist: "A, B".into(),
                album: "Album".into(),
                image: "https://img/1".into(),
                preview_url: None,
                external_url: "https://open/t1".into(),
                duration: 1234,
                uri: "spotify:track:t1".into(),
            }
        );
        assert_eq!(token_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn blank_query_is_rejected_before_any_request() {
        let (catalog, token_calls) = mock_catalog().await;
        let err = catalog.search_tracks(Some("  "), None).await.unwrap_err();
        assert!(matches!(err, MusicError::InvalidQuery(_)));
        assert_eq!(token_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn missing_endpoint_is_reported_as_status() {
        let (catalog, _) = mock_catalog().await;
        let err = catalog.featured_playlists().await.unwrap_err();
        assert!(matches!(
            err,
            MusicError::RequestStatus { status: StatusCode::NOT_FOUND, .. }
        ));

        let releases = catalog.new_releases().await.unwrap();
        assert_eq!(releases.albums[0].artist, "C");
        assert_eq!(releases.albums[0].image, "");
    }
}
