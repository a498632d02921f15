//! Download orchestration.
//!
//! A content reference is expanded into a queue and every queue item is
//! taken end-to-end, one at a time: tags, final path, stream, key,
//! download, remux, move, tag, side files, playlist line. A failing item is
//! recorded and the queue moves on.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures_util::stream::{self, Stream};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::api::{CatalogClient, PlaybackClient, Session};
use crate::config::{Config, CoverFormat};
use crate::download::{backend_for, download_direct, DownloadBackend};
use crate::drm::{Cdm, DecryptionKeyProvider, RemoteCdm};
use crate::error::{AmdlError, Result};
use crate::lyrics::{parse_ttml, Lyrics};
use crate::models::{Album, MediaKind, TrackMetadata};
use crate::paths::PathTemplateEngine;
use crate::playlist_file::PlaylistFileWriter;
use crate::queue::{ArtistSelector, DownloadQueue, DownloadQueueBuilder};
use crate::remux::{EncryptedInput, Remuxer};
use crate::stream::{best_post_asset, StreamResolver};
use crate::tagging::TaggingEngine;
use crate::tags::{PlaylistTags, Tags};
use crate::url::{self, ContentReference};

/// Why a queue item was not downloaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// The item has no play parameters.
    NotStreamable,
    /// Music video inside an album or playlist queue.
    MusicVideoInCollection,
    /// The final file is already there and overwriting is off.
    AlreadyExists(PathBuf),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::NotStreamable => write!(f, "not streamable"),
            SkipReason::MusicVideoInCollection => write!(f, "music video in collection"),
            SkipReason::AlreadyExists(path) => write!(f, "already exists at {}", path.display()),
        }
    }
}

/// Progress notifications for a presentation layer.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    QueueBuilt {
        reference: String,
        total: usize,
    },
    TrackStarted {
        index: usize,
        total: usize,
        title: String,
    },
    TrackFinished {
        index: usize,
        path: PathBuf,
    },
    TrackSkipped {
        index: usize,
        title: String,
        reason: SkipReason,
    },
    TrackFailed {
        index: usize,
        title: String,
        error: String,
    },
    Finished {
        successful: usize,
        skipped: usize,
        failed: usize,
    },
}

/// Result of downloading one content reference.
#[derive(Debug, Default)]
pub struct BatchDownloadResult {
    /// Final paths of downloaded items.
    pub successful: Vec<PathBuf>,
    /// Skipped item titles with the reason.
    pub skipped: Vec<(String, SkipReason)>,
    /// Failed item titles with error messages.
    pub failed: Vec<(String, String)>,
}

impl BatchDownloadResult {
    /// Total number of queue items seen.
    pub fn total(&self) -> usize {
        self.successful.len() + self.skipped.len() + self.failed.len()
    }

    pub fn all_successful(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Skip rule applied before any network work for an item.
pub fn skip_reason(track: &TrackMetadata, in_collection: bool, config: &Config) -> Option<SkipReason> {
    if !track.is_streamable() {
        return Some(SkipReason::NotStreamable);
    }
    if in_collection && track.kind == MediaKind::MusicVideo && !config.disable_music_video_skip {
        return Some(SkipReason::MusicVideoInCollection);
    }
    None
}

/// Scratch file for an item inside the temp directory.
pub fn temp_file(temp: &Path, track_id: &str, suffix: &str, extension: &str) -> PathBuf {
    temp.join(format!("{}_{}{}", track_id, suffix, extension))
}

enum Outcome {
    Downloaded(PathBuf),
    Skipped(SkipReason),
}

/// The whole pipeline wired from one configuration.
pub struct Downloader {
    config: Config,
    catalog: CatalogClient,
    streams: StreamResolver,
    keys: DecryptionKeyProvider,
    backend: Box<dyn DownloadBackend>,
    remuxer: Remuxer,
    paths: PathTemplateEngine,
    tagging: TaggingEngine,
    playlists: PlaylistFileWriter,
    http: reqwest::Client,
    events: Option<mpsc::UnboundedSender<ProgressEvent>>,
}

impl Downloader {
    /// Authenticate from the configured cookies and connect to the
    /// configured remote CDM.
    pub async fn new(config: Config) -> Result<Self> {
        let session = Arc::new(Session::new(&config).await?);
        let cdm: Arc<dyn Cdm> = Arc::new(RemoteCdm::new(&config.cdm)?);
        Self::from_parts(config, session, cdm)
    }

    /// Build from an existing session and CDM.
    pub fn from_parts(config: Config, session: Arc<Session>, cdm: Arc<dyn Cdm>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| AmdlError::Config(format!("Failed to create client: {}", e)))?;
        let license = Arc::new(PlaybackClient::new(session.clone()));

        Ok(Self {
            catalog: CatalogClient::new(session.clone()),
            streams: StreamResolver::new(session, config.codec_music_video),
            keys: DecryptionKeyProvider::new(cdm, license),
            backend: backend_for(&config),
            remuxer: Remuxer::from_config(&config),
            paths: PathTemplateEngine::from_config(&config),
            tagging: TaggingEngine::new(&config, http.clone()),
            playlists: PlaylistFileWriter::new(config.output_path.clone()),
            http,
            events: None,
            config,
        })
    }

    pub fn catalog(&self) -> &CatalogClient {
        &self.catalog
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Progress events from now on. A later call replaces the previous
    /// subscriber.
    pub fn subscribe(&mut self) -> impl Stream<Item = ProgressEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.events = Some(tx);
        stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|event| (event, rx)) })
    }

    /// Stop publishing events; subscribed streams end.
    pub fn unsubscribe(&mut self) {
        self.events = None;
    }

    fn emit(&self, event: ProgressEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }

    /// Resolve `url` and download everything it refers to.
    pub async fn download_url(
        &self,
        url: &str,
        selector: &dyn ArtistSelector,
    ) -> Result<BatchDownloadResult> {
        let reference = url::resolve(url)?;
        self.download_reference(&reference, selector).await
    }

    pub async fn download_reference(
        &self,
        reference: &ContentReference,
        selector: &dyn ArtistSelector,
    ) -> Result<BatchDownloadResult> {
        let queue = DownloadQueueBuilder::new(&self.catalog, selector)
            .build(reference)
            .await?;
        self.emit(ProgressEvent::QueueBuilt {
            reference: reference.to_string(),
            total: queue.len(),
        });

        let result = self.process_queue(&queue).await;
        self.clean_temp().await;

        info!(
            "{}: {} downloaded, {} skipped, {} failed",
            reference,
            result.successful.len(),
            result.skipped.len(),
            result.failed.len()
        );
        self.emit(ProgressEvent::Finished {
            successful: result.successful.len(),
            skipped: result.skipped.len(),
            failed: result.failed.len(),
        });
        Ok(result)
    }

    async fn process_queue(&self, queue: &DownloadQueue) -> BatchDownloadResult {
        let mut result = BatchDownloadResult::default();
        let total = queue.len();

        for (index, track) in queue.tracks.iter().enumerate() {
            let title = track.display_name();

            if let Some(reason) = skip_reason(track, queue.is_collection, &self.config) {
                warn!("[{}/{}] Skipping {}: {}", index + 1, total, title, reason);
                self.emit(ProgressEvent::TrackSkipped {
                    index,
                    title: title.clone(),
                    reason: reason.clone(),
                });
                result.skipped.push((title, reason));
                continue;
            }

            info!("[{}/{}] Downloading {}", index + 1, total, title);
            self.emit(ProgressEvent::TrackStarted {
                index,
                total,
                title: title.clone(),
            });

            match self.process_track(track, index + 1, queue).await {
                Ok(Outcome::Downloaded(path)) => {
                    self.emit(ProgressEvent::TrackFinished {
                        index,
                        path: path.clone(),
                    });
                    result.successful.push(path);
                }
                Ok(Outcome::Skipped(reason)) => {
                    warn!("[{}/{}] Skipping {}: {}", index + 1, total, title, reason);
                    self.emit(ProgressEvent::TrackSkipped {
                        index,
                        title: title.clone(),
                        reason: reason.clone(),
                    });
                    result.skipped.push((title, reason));
                }
                Err(e) => {
                    error!("[{}/{}] Failed {}: {}", index + 1, total, title, e);
                    self.emit(ProgressEvent::TrackFailed {
                        index,
                        title: title.clone(),
                        error: e.to_string(),
                    });
                    result.failed.push((title, e.to_string()));
                }
            }
        }
        result
    }

    /// Metadata with the relationships the pipeline needs.
    async fn full_metadata(&self, track: &TrackMetadata) -> Result<TrackMetadata> {
        match track.kind {
            MediaKind::Song if track.relationships.lyrics.is_none() => {
                self.catalog.get_song(&track.id).await
            }
            MediaKind::MusicVideo if track.relationships.albums.is_none() => {
                self.catalog.get_music_video(&track.id).await
            }
            _ => Ok(track.clone()),
        }
    }

    fn lyrics_for(&self, track: &TrackMetadata) -> Lyrics {
        let Some(ttml) = track.lyrics_ttml() else {
            return Lyrics::default();
        };
        match parse_ttml(ttml) {
            Ok(lyrics) => lyrics.filtered(self.config.synced_lyrics_only, self.config.no_synced_lyrics),
            Err(e) => {
                warn!("Ignoring lyrics of {}: {}", track.display_name(), e);
                Lyrics::default()
            }
        }
    }

    async fn process_track(
        &self,
        track: &TrackMetadata,
        position: usize,
        queue: &DownloadQueue,
    ) -> Result<Outcome> {
        let track = self.full_metadata(track).await?;
        let album: Option<Album> = match track.album_id() {
            Some(id) => Some(self.catalog.get_album(id).await?),
            None => None,
        };
        let lyrics = self.lyrics_for(&track);
        let cover_url = track
            .attributes
            .artwork
            .as_ref()
            .or_else(|| album.as_ref().and_then(|a| a.attributes.artwork.as_ref()))
            .map(|a| self.tagging.cover_url(&a.url));
        let tags = Tags::from_track(
            &track,
            album.as_ref(),
            &lyrics,
            cover_url,
            &self.config.templates.date,
        )?;

        let final_path = self.paths.final_path(&tags, track.kind.extension())?;
        debug!("Final path: {}", final_path.display());

        if final_path.exists() && !self.config.overwrite {
            self.update_playlist(queue, &final_path, position)?;
            return Ok(Outcome::Skipped(SkipReason::AlreadyExists(final_path)));
        }

        let staged = self.fetch_media(&track).await?;
        move_into_place(&staged, &final_path).await?;

        self.tagging.apply(&final_path, &tags).await?;
        if !tags.is_video() {
            self.tagging
                .save_lyrics(
                    &final_path,
                    tags.lyrics_synced.as_deref(),
                    tags.lyrics.as_deref(),
                )
                .await?;
        }
        if self.config.save_cover || self.config.cover_format == CoverFormat::Raw {
            if let Some(url) = &tags.cover_url {
                if let Err(e) = self.tagging.save_cover(&final_path, url).await {
                    warn!("Cover not saved for {}: {}", tags.title, e);
                }
            }
        }
        self.update_playlist(queue, &final_path, position)?;

        info!("Saved {}", final_path.display());
        Ok(Outcome::Downloaded(final_path))
    }

    /// Download and decrypt into the temp directory; returns the staged
    /// file.
    async fn fetch_media(&self, track: &TrackMetadata) -> Result<PathBuf> {
        let temp = &self.config.temp_path;
        tokio::fs::create_dir_all(temp)
            .await
            .map_err(|e| AmdlError::filesystem(temp, e))?;
        let ext = track.kind.extension();
        let id = track.id.as_str();

        match track.kind {
            MediaKind::UploadedVideo => {
                let url = best_post_asset(track)?;
                let staged = temp_file(temp, id, "post", ext);
                download_direct(&self.http, &staged, &url).await?;
                Ok(staged)
            }
            MediaKind::MusicVideo => {
                let (video, audio) = self.streams.music_video(id).await?;
                let video_key = self.keys.get_decryption_key(&video.key_uri, id).await?;
                let audio_key = self.keys.get_decryption_key(&audio.key_uri, id).await?;

                let video_path = temp_file(temp, id, "video_encrypted", ".mp4");
                let audio_path = temp_file(temp, id, "audio_encrypted", ".m4a");
                self.backend.download(&video_path, &video.url).await?;
                self.backend.download(&audio_path, &audio.url).await?;

                let staged = temp_file(temp, id, "remuxed", ext);
                self.remuxer
                    .remux(
                        &[
                            EncryptedInput {
                                path: &video_path,
                                key: &video_key,
                            },
                            EncryptedInput {
                                path: &audio_path,
                                key: &audio_key,
                            },
                        ],
                        &staged,
                    )
                    .await?;
                Ok(staged)
            }
            MediaKind::Song | MediaKind::Other => {
                let song = self.streams.song(id).await?;
                let key = self.keys.get_decryption_key(&song.key_uri, id).await?;

                let encrypted = temp_file(temp, id, "encrypted", ext);
                self.backend.download(&encrypted, &song.url).await?;

                let staged = temp_file(temp, id, "remuxed", ext);
                self.remuxer
                    .remux(
                        &[EncryptedInput {
                            path: &encrypted,
                            key: &key,
                        }],
                        &staged,
                    )
                    .await?;
                Ok(staged)
            }
        }
    }

    fn update_playlist(&self, queue: &DownloadQueue, track_path: &Path, position: usize) -> Result<()> {
        if !self.config.save_playlist {
            return Ok(());
        }
        let Some(attributes) = &queue.playlist else {
            return Ok(());
        };
        let tags = PlaylistTags::new(attributes, position as u32);
        let playlist_path = self.paths.playlist_path(&tags)?;
        self.playlists.update(&playlist_path, track_path, position)
    }

    async fn clean_temp(&self) {
        let temp = &self.config.temp_path;
        match tokio::fs::remove_dir_all(temp).await {
            Ok(()) => debug!("Removed {}", temp.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Could not clean {}: {}", temp.display(), e),
        }
    }
}

/// Move a staged file to its final location, copying across filesystems.
async fn move_into_place(staged: &Path, final_path: &Path) -> Result<()> {
    if let Some(parent) = final_path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| AmdlError::filesystem(parent, e))?;
    }
    if tokio::fs::rename(staged, final_path).await.is_ok() {
        return Ok(());
    }
    tokio::fs::copy(staged, final_path)
        .await
        .map_err(|e| AmdlError::filesystem(final_path, e))?;
    tokio::fs::remove_file(staged)
        .await
        .map_err(|e| AmdlError::filesystem(staged, e))?;
    Ok(())
}
