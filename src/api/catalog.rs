//! Catalog API client.
//!
//! Typed read access to `/v1/catalog/{storefront}/…`. Every response is
//! validated once here and deserialized into the records under
//! [`crate::models`].

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, error, info};

use super::session::Session;
use crate::cache::ResponseCache;
use crate::error::{AmdlError, Result};
use crate::models::{Album, Artist, Playlist, Relationship, TrackMetadata};
use crate::retry::network_error;
use crate::url::is_numeric;

/// Wait between relationship pages.
pub const PAGE_DELAY: Duration = Duration::from_secs(2);

/// Page size for artist relationships and pagination.
pub const DEFAULT_LIMIT: u32 = 100;

const DEFAULT_CACHE_CAPACITY: usize = 64;

/// Characters of an error body kept in `CatalogResponse` errors.
const BODY_PREVIEW_LEN: usize = 500;

fn preview(text: &str) -> String {
    if text.chars().count() > BODY_PREVIEW_LEN {
        format!("{}...", text.chars().take(BODY_PREVIEW_LEN).collect::<String>())
    } else {
        text.to_string()
    }
}

/// Catalog client over an authenticated [`Session`].
#[derive(Debug)]
pub struct CatalogClient {
    session: Arc<Session>,
    albums: ResponseCache<Album>,
    playlists: ResponseCache<Playlist>,
    page_delay: Duration,
}

impl CatalogClient {
    pub fn new(session: Arc<Session>) -> Self {
        Self::with_caches(
            session,
            ResponseCache::new(DEFAULT_CACHE_CAPACITY),
            ResponseCache::new(DEFAULT_CACHE_CAPACITY),
        )
    }

    /// Build a client with caller-owned caches.
    pub fn with_caches(
        session: Arc<Session>,
        albums: ResponseCache<Album>,
        playlists: ResponseCache<Playlist>,
    ) -> Self {
        Self {
            session,
            albums,
            playlists,
            page_delay: PAGE_DELAY,
        }
    }

    /// Override the wait between relationship pages.
    pub fn with_page_delay(mut self, delay: Duration) -> Self {
        self.page_delay = delay;
        self
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    fn catalog_url(&self, path: &str) -> String {
        format!(
            "{}/v1/catalog/{}/{}",
            self.session.endpoints().amp_api.trim_end_matches('/'),
            self.session.storefront(),
            path
        )
    }

    /// GET a catalog URL under the retry policy and validate the envelope.
    async fn get_api(&self, url: &str, params: &[(&str, String)]) -> Result<Value> {
        let session = &self.session;
        session
            .retry()
            .run(|| async move {
                debug!("GET {} with params: {:?}", url, params);
                let response = session
                    .get(url)
                    .query(params)
                    .send()
                    .await
                    .map_err(network_error(url))?;
                let status = response.status();
                let text = response.text().await.map_err(network_error(url))?;
                check_envelope(url, status.as_u16(), &text)
            })
            .await
    }

    async fn get_first<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T> {
        let url = self.catalog_url(path);
        let mut data = self.get_api(&url, params).await?;
        let first = data
            .get_mut("data")
            .and_then(|d| d.as_array_mut())
            .filter(|d| !d.is_empty())
            .map(|d| d.swap_remove(0))
            .ok_or_else(|| AmdlError::CatalogResponse {
                url: url.clone(),
                status: 200,
                body: "response has no data".to_string(),
            })?;
        Ok(serde_json::from_value(first)?)
    }

    /// Follow `next` cursors until the relationship is complete.
    pub async fn drain<T: DeserializeOwned>(
        &self,
        relationship: &mut Relationship<T>,
        limit: u32,
    ) -> Result<()> {
        while let Some(next) = relationship.next.take() {
            let url = format!(
                "{}{}",
                self.session.endpoints().amp_api.trim_end_matches('/'),
                next
            );
            let page = self.get_api(&url, &[("limit", limit.to_string())]).await?;
            let page: Relationship<T> = serde_json::from_value(page)?;
            debug!("Fetched {} more items from {}", page.data.len(), next);
            relationship.data.extend(page.data);
            relationship.next = page.next;
            tokio::time::sleep(self.page_delay).await;
        }
        Ok(())
    }

    /// Get a song with its lyrics and album relationships.
    pub async fn get_song(&self, song_id: &str) -> Result<TrackMetadata> {
        if !is_numeric(song_id) {
            return Err(AmdlError::InvalidUrl(format!(
                "song id must be numeric, got {:?}",
                song_id
            )));
        }
        self.get_first(
            &format!("songs/{}", song_id),
            &[
                ("include", "lyrics,albums".to_string()),
                ("extend", "extendedAssetUrls".to_string()),
            ],
        )
        .await
    }

    /// Get an album with its tracks. Cached.
    pub async fn get_album(&self, album_id: &str) -> Result<Album> {
        let key = ResponseCache::<Album>::key("albums", &[("id", album_id)]);
        if let Some(album) = self.albums.get(&key).await {
            debug!("Album {} served from cache", album_id);
            return Ok(album);
        }

        let album: Album = self
            .get_first(
                &format!("albums/{}", album_id),
                &[("include", "tracks".to_string())],
            )
            .await?;
        self.albums.insert(key, album.clone()).await;
        Ok(album)
    }

    /// Get a playlist with all of its tracks. Cached.
    pub async fn get_playlist(&self, playlist_id: &str) -> Result<Playlist> {
        let key = ResponseCache::<Playlist>::key("playlists", &[("id", playlist_id)]);
        if let Some(playlist) = self.playlists.get(&key).await {
            debug!("Playlist {} served from cache", playlist_id);
            return Ok(playlist);
        }

        let mut playlist: Playlist = self
            .get_first(
                &format!("playlists/{}", playlist_id),
                &[("include", "tracks".to_string())],
            )
            .await?;
        self.drain(&mut playlist.relationships.tracks, DEFAULT_LIMIT)
            .await?;
        info!(
            "Playlist {} has {} tracks",
            playlist.attributes.name,
            playlist.tracks().len()
        );
        self.playlists.insert(key, playlist.clone()).await;
        Ok(playlist)
    }

    /// Get an artist with albums and music videos. With `fetch_all` the
    /// relationships are drained of pagination.
    pub async fn get_artist(&self, artist_id: &str, fetch_all: bool) -> Result<Artist> {
        let limit = DEFAULT_LIMIT.to_string();
        let mut artist: Artist = self
            .get_first(
                &format!("artists/{}", artist_id),
                &[
                    ("include", "albums,music-videos".to_string()),
                    ("limit[albums]", limit.clone()),
                    ("limit[music-videos]", limit),
                ],
            )
            .await?;

        if fetch_all {
            self.drain(&mut artist.relationships.albums, DEFAULT_LIMIT)
                .await?;
            self.drain(&mut artist.relationships.music_videos, DEFAULT_LIMIT)
                .await?;
        }
        Ok(artist)
    }

    pub async fn get_music_video(&self, music_video_id: &str) -> Result<TrackMetadata> {
        self.get_first(
            &format!("music-videos/{}", music_video_id),
            &[("include", "albums".to_string())],
        )
        .await
    }

    /// Get an uploaded video (post).
    pub async fn get_post(&self, post_id: &str) -> Result<TrackMetadata> {
        self.get_first(&format!("uploaded-videos/{}", post_id), &[])
            .await
    }

    /// Search the catalog. Returns the raw `results` object keyed by type.
    pub async fn search(&self, term: &str, types: &str, limit: u32, offset: u32) -> Result<Value> {
        let url = self.catalog_url("search");
        let mut response = self
            .get_api(
                &url,
                &[
                    ("term", term.to_string()),
                    ("types", types.to_string()),
                    ("limit", limit.to_string()),
                    ("offset", offset.to_string()),
                ],
            )
            .await?;
        Ok(response
            .get_mut("results")
            .map(Value::take)
            .unwrap_or(Value::Null))
    }

    /// Drop cached albums and playlists.
    pub async fn clear_cache(&self) {
        self.albums.clear().await;
        self.playlists.clear().await;
    }
}

/// Validate a catalog response: success status, JSON body, and either a
/// non-empty `data` array or a `results` object.
fn check_envelope(url: &str, status: u16, text: &str) -> Result<Value> {
    let fail = || AmdlError::CatalogResponse {
        url: url.to_string(),
        status,
        body: preview(text),
    };

    if !(200..300).contains(&status) {
        error!("Catalog request failed (status {}): {}", status, preview(text));
        return Err(fail());
    }

    let value: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => {
            error!("Failed to parse catalog response (status {}): {}", status, e);
            return Err(fail());
        }
    };

    let has_data = value
        .get("data")
        .and_then(|d| d.as_array())
        .is_some_and(|d| !d.is_empty());
    let has_results = value.get("results").is_some_and(|r| !r.is_null());
    if has_data || has_results {
        Ok(value)
    } else {
        Err(fail())
    }
}
