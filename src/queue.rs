//! Expansion of a content reference into an ordered download queue.

use async_trait::async_trait;
use tracing::{debug, info};

use crate::api::CatalogClient;
use crate::error::{AmdlError, Result};
use crate::models::{Album, Artist, PlaylistAttributes, TrackMetadata};
use crate::url::{ContentReference, ContentType};

/// Which part of an artist's catalog to pick from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtistMedia {
    Albums,
    MusicVideos,
}

/// Interactive choice of an artist's albums or music videos.
///
/// Implementations return indices into the slices they are shown.
#[async_trait]
pub trait ArtistSelector: Send + Sync {
    async fn choose_media(&self, artist: &Artist) -> Result<ArtistMedia>;

    async fn choose_albums(&self, albums: &[Album]) -> Result<Vec<usize>>;

    async fn choose_music_videos(&self, videos: &[TrackMetadata]) -> Result<Vec<usize>>;
}

/// Tracks to download for one reference, in catalog order.
#[derive(Debug, Clone, Default)]
pub struct DownloadQueue {
    pub tracks: Vec<TrackMetadata>,
    /// Present when the queue came from a playlist.
    pub playlist: Option<PlaylistAttributes>,
    /// Whether the queue is a collection (album or playlist) rather than
    /// items picked one by one.
    pub is_collection: bool,
}

impl DownloadQueue {
    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }
}

fn picked<T: Clone>(items: &[T], indices: &[usize]) -> Result<Vec<T>> {
    indices
        .iter()
        .map(|&i| {
            items.get(i).cloned().ok_or_else(|| {
                AmdlError::Config(format!("selection {} is out of range (0..{})", i, items.len()))
            })
        })
        .collect()
}

/// Builds queues from the catalog.
pub struct DownloadQueueBuilder<'a> {
    catalog: &'a CatalogClient,
    selector: &'a dyn ArtistSelector,
}

impl<'a> DownloadQueueBuilder<'a> {
    pub fn new(catalog: &'a CatalogClient, selector: &'a dyn ArtistSelector) -> Self {
        Self { catalog, selector }
    }

    pub async fn build(&self, reference: &ContentReference) -> Result<DownloadQueue> {
        let id = reference.id.as_str();
        let queue = match reference.content_type {
            ContentType::Song => single(self.catalog.get_song(id).await?),
            ContentType::MusicVideo => single(self.catalog.get_music_video(id).await?),
            ContentType::Post => single(self.catalog.get_post(id).await?),
            ContentType::Album => {
                let album = self.catalog.get_album(id).await?;
                DownloadQueue {
                    tracks: album.tracks().to_vec(),
                    playlist: None,
                    is_collection: true,
                }
            }
            ContentType::Playlist => {
                let playlist = self.catalog.get_playlist(id).await?;
                DownloadQueue {
                    tracks: playlist.tracks().to_vec(),
                    playlist: Some(playlist.attributes),
                    is_collection: true,
                }
            }
            ContentType::Artist => self.artist_queue(id).await?,
        };

        if queue.is_empty() {
            return Err(AmdlError::EmptyQueue(format!(
                "{} {}",
                reference.content_type.as_str(),
                id
            )));
        }
        info!(
            "Queued {} item(s) for {} {}",
            queue.len(),
            reference.content_type.as_str(),
            id
        );
        Ok(queue)
    }

    async fn artist_queue(&self, artist_id: &str) -> Result<DownloadQueue> {
        let artist = self.catalog.get_artist(artist_id, true).await?;
        let mut tracks = Vec::new();

        match self.selector.choose_media(&artist).await? {
            ArtistMedia::Albums => {
                if artist.albums().is_empty() {
                    return Err(AmdlError::EmptyQueue(format!("albums of {}", artist.name())));
                }
                let indices = self.selector.choose_albums(artist.albums()).await?;
                for album in picked(artist.albums(), &indices)? {
                    debug!("Expanding album {}", album.attributes.name);
                    let album = self.catalog.get_album(&album.id).await?;
                    tracks.extend(album.tracks().iter().cloned());
                }
            }
            ArtistMedia::MusicVideos => {
                if artist.music_videos().is_empty() {
                    return Err(AmdlError::EmptyQueue(format!(
                        "music videos of {}",
                        artist.name()
                    )));
                }
                let indices = self.selector.choose_music_videos(artist.music_videos()).await?;
                tracks.extend(picked(artist.music_videos(), &indices)?);
            }
        }

        Ok(DownloadQueue {
            tracks,
            playlist: None,
            is_collection: false,
        })
    }
}

fn single(track: TrackMetadata) -> DownloadQueue {
    DownloadQueue {
        tracks: vec![track],
        playlist: None,
        is_collection: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::Session;
    use crate::config::Endpoints;
    use crate::retry::RetryPolicy;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct FixedSelector {
        media: ArtistMedia,
        picks: Vec<usize>,
    }

    #[async_trait]
    impl ArtistSelector for FixedSelector {
        async fn choose_media(&self, _artist: &Artist) -> Result<ArtistMedia> {
            Ok(self.media)
        }

        async fn choose_albums(&self, _albums: &[Album]) -> Result<Vec<usize>> {
            Ok(self.picks.clone())
        }

        async fn choose_music_videos(&self, _videos: &[TrackMetadata]) -> Result<Vec<usize>> {
            Ok(self.picks.clone())
        }
    }

    fn selector(media: ArtistMedia, picks: Vec<usize>) -> FixedSelector {
        FixedSelector { media, picks }
    }

    fn catalog(server: &MockServer) -> CatalogClient {
        let endpoints = Endpoints {
            amp_api: server.uri(),
            ..Endpoints::default()
        };
        let session = Session::with_token("eyJhTEST", "mut", "us", "en-US", endpoints)
            .unwrap()
            .with_retry_policy(RetryPolicy::none());
        CatalogClient::new(Arc::new(session)).with_page_delay(Duration::ZERO)
    }

    fn reference(content_type: ContentType, id: &str) -> ContentReference {
        ContentReference {
            storefront: "us".into(),
            content_type,
            id: id.into(),
        }
    }

    fn track(id: &str, disc: u32) -> serde_json::Value {
        json!({
            "id": id,
            "type": "songs",
            "attributes": {"name": format!("Track {}", id), "discNumber": disc,
                           "playParams": {"id": id, "kind": "song"}}
        })
    }

    async fn mount_album(server: &MockServer, id: &str, tracks: Vec<serde_json::Value>) {
        Mock::given(method("GET"))
            .and(path(format!("/v1/catalog/us/albums/{}", id)))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": [{
                "id": id,
                "attributes": {"name": format!("Album {}", id), "artistName": "Band"},
                "relationships": {"tracks": {"data": tracks}}
            }]})))
            .mount(server)
            .await;
    }

    async fn mount_artist(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/v1/catalog/us/artists/7"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": [{
                "id": "7",
                "attributes": {"name": "Band"},
                "relationships": {
                    "albums": {"data": [
                        {"id": "100", "attributes": {"name": "First"}},
                        {"id": "200", "attributes": {"name": "Second"}}
                    ]},
                    "music-videos": {"data": []}
                }
            }]})))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_album_queue_keeps_catalog_order() {
        let server = MockServer::start().await;
        mount_album(&server, "12345", vec![track("1", 1), track("2", 2)]).await;
        let catalog = catalog(&server);
        let sel = selector(ArtistMedia::Albums, vec![]);

        let queue = DownloadQueueBuilder::new(&catalog, &sel)
            .build(&reference(ContentType::Album, "12345"))
            .await
            .unwrap();
        let ids: Vec<_> = queue.tracks.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, ["1", "2"]);
        assert!(queue.is_collection);
        assert!(queue.playlist.is_none());
    }

    #[tokio::test]
    async fn test_playlist_queue_carries_attributes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/catalog/us/playlists/pl.abc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": [{
                "id": "pl.abc",
                "attributes": {"name": "Mix", "curatorName": "Someone"},
                "relationships": {"tracks": {"data": [track("5", 1)]}}
            }]})))
            .mount(&server)
            .await;
        let catalog = catalog(&server);
        let sel = selector(ArtistMedia::Albums, vec![]);

        let queue = DownloadQueueBuilder::new(&catalog, &sel)
            .build(&reference(ContentType::Playlist, "pl.abc"))
            .await
            .unwrap();
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.playlist.unwrap().name, "Mix");
    }

    #[tokio::test]
    async fn test_artist_albums_are_expanded() {
        let server = MockServer::start().await;
        mount_artist(&server).await;
        mount_album(&server, "200", vec![track("21", 1), track("22", 1)]).await;
        let catalog = catalog(&server);
        let sel = selector(ArtistMedia::Albums, vec![1]);

        let queue = DownloadQueueBuilder::new(&catalog, &sel)
            .build(&reference(ContentType::Artist, "7"))
            .await
            .unwrap();
        let ids: Vec<_> = queue.tracks.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, ["21", "22"]);
        assert!(!queue.is_collection);
    }

    #[tokio::test]
    async fn test_artist_without_videos_rejects_video_choice() {
        let server = MockServer::start().await;
        mount_artist(&server).await;
        let catalog = catalog(&server);
        let sel = selector(ArtistMedia::MusicVideos, vec![0]);

        let result = DownloadQueueBuilder::new(&catalog, &sel)
            .build(&reference(ContentType::Artist, "7"))
            .await;
        assert!(matches!(result, Err(AmdlError::EmptyQueue(_))));
    }

    #[tokio::test]
    async fn test_out_of_range_selection() {
        let server = MockServer::start().await;
        mount_artist(&server).await;
        let catalog = catalog(&server);
        let sel = selector(ArtistMedia::Albums, vec![5]);

        let result = DownloadQueueBuilder::new(&catalog, &sel)
            .build(&reference(ContentType::Artist, "7"))
            .await;
        assert!(matches!(result, Err(AmdlError::Config(_))));
    }

    #[tokio::test]
    async fn test_empty_album_is_empty_queue() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/catalog/us/albums/9"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": [{
                "id": "9", "attributes": {"name": "Nothing"}
            }]})))
            .mount(&server)
            .await;
        let catalog = catalog(&server);
        let sel = selector(ArtistMedia::Albums, vec![]);

        let result = DownloadQueueBuilder::new(&catalog, &sel)
            .build(&reference(ContentType::Album, "9"))
            .await;
        assert!(matches!(result, Err(AmdlError::EmptyQueue(_))));
    }
}
