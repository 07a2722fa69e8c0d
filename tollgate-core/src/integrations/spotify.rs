//! Spotify Web API.
//!
//! Tokens come from the PKCE flow in [`crate::oauth::pkce`] and are sent as
//! `Authorization: Bearer <token>`. List endpoints return a [`Paging`] object
//! whose `next` field is an absolute URL; [`SpotifyApi::next_page`] follows it.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::{nullable_vec, path_segment};
use crate::client::{ApiClient, ApiError, AuthHeader, RequestSpec};
use crate::config::IntegrationConfig;
use crate::oauth::pkce::{SPOTIFY_AUTH_URL, SPOTIFY_TOKEN_URL};
use crate::token::TokenSource;

pub const SPOTIFY_API_BASE_URL: &str = "https://api.spotify.com/v1";

/// Scopes needed for the profile and playlist endpoints.
pub const DEFAULT_SCOPES: &[&str] = &[
    "user-read-private",
    "user-read-email",
    "playlist-read-private",
    "playlist-read-collaborative",
];

/// Largest page size the API accepts.
pub const MAX_PAGE_LIMIT: u32 = 50;

/// Integration settings for the production endpoints.
pub fn config(client_id: impl Into<String>, redirect_uri: impl Into<String>) -> IntegrationConfig {
    IntegrationConfig::pkce(
        SPOTIFY_API_BASE_URL,
        SPOTIFY_AUTH_URL,
        SPOTIFY_TOKEN_URL,
        client_id,
        redirect_uri,
    )
    .with_scopes(DEFAULT_SCOPES.iter().map(|s| s.to_string()).collect())
    .with_auth_header(AuthHeader::bearer())
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalUrls {
    pub spotify: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    pub url: String,
    pub height: Option<u32>,
    pub width: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    pub display_name: Option<String>,
    pub email: Option<String>,
    pub country: Option<String>,
    pub product: Option<String>,
    #[serde(default, deserialize_with = "nullable_vec")]
    pub images: Vec<Image>,
    #[serde(default)]
    pub external_urls: ExternalUrls,
}

/// A page of results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Paging<T> {
    pub href: String,
    pub items: Vec<T>,
    pub limit: u32,
    pub next: Option<String>,
    pub offset: u32,
    pub previous: Option<String>,
    pub total: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaylistOwner {
    pub id: String,
    pub display_name: Option<String>,
}

/// Link to a playlist's tracks with their count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaylistTracksRef {
    pub href: String,
    pub total: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Playlist {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub owner: PlaylistOwner,
    #[serde(default)]
    pub collaborative: bool,
    pub public: Option<bool>,
    pub tracks: PlaylistTracksRef,
    #[serde(default, deserialize_with = "nullable_vec")]
    pub images: Vec<Image>,
    #[serde(default)]
    pub external_urls: ExternalUrls,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtistSimple {
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub external_urls: ExternalUrls,
    pub uri: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artist {
    pub id: String,
    pub name: String,
    #[serde(default, deserialize_with = "nullable_vec")]
    pub genres: Vec<String>,
    #[serde(default, deserialize_with = "nullable_vec")]
    pub images: Vec<Image>,
    #[serde(default)]
    pub external_urls: ExternalUrls,
    pub uri: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlbumSimple {
    pub id: Option<String>,
    pub name: String,
    #[serde(default, deserialize_with = "nullable_vec")]
    pub artists: Vec<ArtistSimple>,
    #[serde(default, deserialize_with = "nullable_vec")]
    pub images: Vec<Image>,
    pub release_date: Option<String>,
    #[serde(default)]
    pub external_urls: ExternalUrls,
    pub uri: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Track {
    /// `None` for local files added to a playlist.
    pub id: Option<String>,
    pub name: String,
    #[serde(default, deserialize_with = "nullable_vec")]
    pub artists: Vec<ArtistSimple>,
    pub album: Option<AlbumSimple>,
    pub duration_ms: u64,
    pub preview_url: Option<String>,
    #[serde(default)]
    pub external_urls: ExternalUrls,
    pub uri: String,
}

impl Track {
    /// Artist names joined with ", ".
    pub fn artist_names(&self) -> String {
        self.artists
            .iter()
            .map(|artist| artist.name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// A playlist entry. `track` is `None` when the item is no longer available.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaylistTrack {
    pub added_at: Option<String>,
    pub track: Option<Track>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResults {
    pub tracks: Option<Paging<Track>>,
    pub artists: Option<Paging<Artist>>,
    pub albums: Option<Paging<AlbumSimple>>,
    /// Entries can be `null` for playlists that were removed.
    pub playlists: Option<Paging<Option<Playlist>>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecommendationSeed {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub href: Option<String>,
    pub initial_pool_size: Option<u32>,
    pub after_filtering_size: Option<u32>,
    pub after_relinking_size: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recommendations {
    pub tracks: Vec<Track>,
    #[serde(default)]
    pub seeds: Vec<RecommendationSeed>,
}

/// Item types for [`SpotifyApi::search`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SearchType {
    Track,
    Artist,
    Album,
    Playlist,
}

impl SearchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Track => "track",
            Self::Artist => "artist",
            Self::Album => "album",
            Self::Playlist => "playlist",
        }
    }
}

impl std::str::FromStr for SearchType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "track" => Ok(Self::Track),
            "artist" => Ok(Self::Artist),
            "album" => Ok(Self::Album),
            "playlist" => Ok(Self::Playlist),
            other => Err(format!("unknown search type: {}", other)),
        }
    }
}

/// Seeds for [`SpotifyApi::recommendations`]. At least one must be non-empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecommendationSeeds {
    pub artists: Vec<String>,
    pub genres: Vec<String>,
    pub tracks: Vec<String>,
}

impl RecommendationSeeds {
    pub fn is_empty(&self) -> bool {
        self.artists.is_empty() && self.genres.is_empty() && self.tracks.is_empty()
    }
}

/// Client for the Spotify Web API.
#[derive(Debug)]
pub struct SpotifyApi<S: TokenSource> {
    client: ApiClient<S>,
}

impl<S: TokenSource> SpotifyApi<S> {
    pub fn new(client: ApiClient<S>) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &ApiClient<S> {
        &self.client
    }

    /// `GET /me`
    pub async fn current_user_profile(&self) -> Result<UserProfile, ApiError> {
        self.client.execute_json(&self.request("/me")).await
    }

    /// `GET /me/playlists`
    pub async fn current_user_playlists(&self, limit: u32, offset: u32) -> Result<Paging<Playlist>, ApiError> {
        let spec = self
            .request("/me/playlists")
            .query("limit", clamp_limit(limit))
            .query("offset", offset);
        self.client.execute_json(&spec).await
    }

    /// Every playlist of the current user, following `next` links.
    pub async fn all_current_user_playlists(&self) -> Result<Vec<Playlist>, ApiError> {
        let mut page = self.current_user_playlists(MAX_PAGE_LIMIT, 0).await?;
        let mut playlists = std::mem::take(&mut page.items);

        while let Some(mut next) = self.next_page(&page).await? {
            playlists.append(&mut next.items);
            page = next;
        }

        Ok(playlists)
    }

    /// Fetch the page after `page`, or `None` on the last page.
    pub async fn next_page<T: DeserializeOwned>(&self, page: &Paging<T>) -> Result<Option<Paging<T>>, ApiError> {
        match &page.next {
            Some(next) => self.client.execute_json(&self.request(next.as_str())).await.map(Some),
            None => Ok(None),
        }
    }

    /// `GET /playlists/{id}/tracks`
    pub async fn playlist_tracks(
        &self,
        playlist_id: &str,
        limit: u32,
        offset: u32,
    ) -> Result<Paging<PlaylistTrack>, ApiError> {
        let id = path_segment("playlist id", playlist_id)?;
        let spec = self
            .request(format!("/playlists/{}/tracks", id))
            .query("limit", clamp_limit(limit))
            .query("offset", offset);
        self.client.execute_json(&spec).await
    }

    /// `GET /tracks/{id}`
    pub async fn track(&self, track_id: &str) -> Result<Track, ApiError> {
        let id = path_segment("track id", track_id)?;
        self.client.execute_json(&self.request(format!("/tracks/{}", id))).await
    }

    /// `GET /search`
    pub async fn search(&self, query: &str, types: &[SearchType], limit: u32) -> Result<SearchResults, ApiError> {
        if query.trim().is_empty() {
            return Err(ApiError::InvalidRequest("search query must not be empty".to_string()));
        }
        if types.is_empty() {
            return Err(ApiError::InvalidRequest("at least one search type is required".to_string()));
        }

        let types = types.iter().map(SearchType::as_str).collect::<Vec<_>>().join(",");
        let spec = self
            .request("/search")
            .query("q", query.trim())
            .query("type", types)
            .query("limit", clamp_limit(limit));
        self.client.execute_json(&spec).await
    }

    /// `GET /recommendations`
    pub async fn recommendations(&self, seeds: &RecommendationSeeds, limit: u32) -> Result<Recommendations, ApiError> {
        if seeds.is_empty() {
            return Err(ApiError::InvalidRequest(
                "at least one artist, genre or track seed is required".to_string(),
            ));
        }

        let joined = |values: &[String]| (!values.is_empty()).then(|| values.join(","));
        let spec = self
            .request("/recommendations")
            .query_opt("seed_artists", joined(&seeds.artists))
            .query_opt("seed_genres", joined(&seeds.genres))
            .query_opt("seed_tracks", joined(&seeds.tracks))
            .query("limit", limit.clamp(1, 100));
        self.client.execute_json(&spec).await
    }

    fn request(&self, path: impl Into<String>) -> RequestSpec {
        RequestSpec::get(path).with_auth_header(AuthHeader::bearer())
    }
}

fn clamp_limit(limit: u32) -> u32 {
    limit.clamp(1, MAX_PAGE_LIMIT)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PLAYLIST: &str = r#"{
        "id": "37i9dQZF1DXcBWIGoYBM5M",
        "name": "Today's Top Hits",
        "description": null,
        "owner": {"id": "spotify", "display_name": "Spotify"},
        "collaborative": false,
        "public": true,
        "tracks": {"href": "https://api.spotify.com/v1/playlists/37i9dQZF1DXcBWIGoYBM5M/tracks", "total": 50},
        "images": null,
        "external_urls": {"spotify": "https://open.spotify.com/playlist/37i9dQZF1DXcBWIGoYBM5M"}
    }"#;

    #[test]
    fn test_playlist_with_null_images() {
        let playlist: Playlist = serde_json::from_str(PLAYLIST).unwrap();
        assert!(playlist.images.is_empty());
        assert_eq!(playlist.tracks.total, 50);
        assert_eq!(playlist.owner.display_name.as_deref(), Some("Spotify"));
    }

    #[test]
    fn test_paging_decode() {
        let body = format!(
            r#"{{"href":"h","items":[{}],"limit":1,"next":"https://api.spotify.com/v1/me/playlists?offset=1&limit=1","offset":0,"previous":null,"total":2}}"#,
            PLAYLIST
        );
        let page: Paging<Playlist> = serde_json::from_str(&body).unwrap();
        assert_eq!(page.items.len(), 1);
        assert!(page.next.is_some());
        assert_eq!(page.total, 2);
    }

    #[test]
    fn test_local_track_and_artist_names() {
        let track: Track = serde_json::from_str(
            r#"{"id":null,"name":"Demo","artists":[{"id":null,"name":"A"},{"id":null,"name":"B"}],"album":null,"duration_ms":1000,"preview_url":null,"uri":"spotify:local:demo"}"#,
        )
        .unwrap();
        assert!(track.id.is_none());
        assert_eq!(track.artist_names(), "A, B");
    }

    #[test]
    fn test_search_results_with_null_playlist() {
        let body = format!(
            r#"{{"playlists":{{"href":"h","items":[null,{}],"limit":2,"next":null,"offset":0,"previous":null,"total":2}}}}"#,
            PLAYLIST
        );
        let results: SearchResults = serde_json::from_str(&body).unwrap();
        let playlists = results.playlists.unwrap();
        assert!(playlists.items[0].is_none());
        assert!(playlists.items[1].is_some());
        assert!(results.tracks.is_none());
    }

    #[test]
    fn test_search_type_parse() {
        assert_eq!("Track".parse::<SearchType>().unwrap(), SearchType::Track);
        assert_eq!(" playlist ".parse::<SearchType>().unwrap(), SearchType::Playlist);
        assert!("podcast".parse::<SearchType>().is_err());
    }

    #[test]
    fn test_clamp_limit() {
        assert_eq!(clamp_limit(0), 1);
        assert_eq!(clamp_limit(20), 20);
        assert_eq!(clamp_limit(500), MAX_PAGE_LIMIT);
    }

    #[test]
    fn test_config_is_pkce_with_bearer() {
        let config = config("client-id", "http://127.0.0.1:8888/callback");
        assert!(config.validate().is_ok());
        assert_eq!(config.auth_header(), AuthHeader::bearer());
        assert_eq!(config.scopes.len(), DEFAULT_SCOPES.len());
    }

    #[test]
    fn test_recommendation_seeds_empty() {
        assert!(RecommendationSeeds::default().is_empty());
        let seeds = RecommendationSeeds {
            genres: vec!["jazz".to_string()],
            ..Default::default()
        };
        assert!(!seeds.is_empty());
    }
}
