//! # amdl
//!
//! Download pipeline for Apple Music catalog content: songs, albums,
//! playlists, artists, music videos and posts become decrypted, tagged
//! local files.
//!
//! ## Quick Start
//!
//! The easiest way to use this library is through the [`Downloader`] struct:
//!
//! ```rust,no_run
//! use amdl::queue::{ArtistMedia, ArtistSelector};
//! use amdl::models::{Album, Artist, TrackMetadata};
//! use amdl::{Config, Downloader};
//!
//! struct AllAlbums;
//!
//! #[async_trait::async_trait]
//! impl ArtistSelector for AllAlbums {
//!     async fn choose_media(&self, _: &Artist) -> amdl::Result<ArtistMedia> {
//!         Ok(ArtistMedia::Albums)
//!     }
//!     async fn choose_albums(&self, albums: &[Album]) -> amdl::Result<Vec<usize>> {
//!         Ok((0..albums.len()).collect())
//!     }
//!     async fn choose_music_videos(&self, v: &[TrackMetadata]) -> amdl::Result<Vec<usize>> {
//!         Ok((0..v.len()).collect())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let downloader = Downloader::new(Config::load()?).await?;
//!
//!     let result = downloader
//!         .download_url("https://music.apple.com/us/album/x/1440857781", &AllAlbums)
//!         .await?;
//!     println!("Downloaded {} of {}", result.successful.len(), result.total());
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Pipeline
//!
//! - [`url`] resolves a catalog URL into a [`ContentReference`]
//! - [`queue`] expands it into tracks through the [`CatalogClient`]
//! - [`stream`] finds the encrypted streams, [`drm`] obtains their keys
//! - [`download`] and [`remux`] drive the external tools
//! - [`tags`], [`paths`] and [`tagging`] name and tag the result
//! - [`playlist_file`] keeps `.m3u8` playlists in track order

pub mod api;
pub mod cache;
pub mod config;
pub mod download;
mod downloader;
pub mod drm;
pub mod error;
pub mod lyrics;
pub mod models;
pub mod paths;
pub mod playlist_file;
pub mod queue;
pub mod remux;
pub mod retry;
pub mod stream;
pub mod tagging;
pub mod tags;
pub mod url;

// Main interface (recommended)
pub use downloader::{BatchDownloadResult, Downloader, ProgressEvent, SkipReason};

// Building blocks
pub use api::{CatalogClient, PlaybackClient, Session};
pub use config::Config;
pub use drm::{Cdm, DecryptionKeyProvider, RemoteCdm};
pub use error::{AmdlError, Result};
pub use url::{ContentReference, ContentType};
