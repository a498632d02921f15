//! Data models for catalog API responses.
//!
//! Records are deserialized once at the catalog boundary and passed around
//! read-only afterwards.

pub mod album;
pub mod artist;
pub mod common;
pub mod playlist;
pub mod track;

// Re-exports for convenience
pub use album::{Album, AlbumAttributes};
pub use artist::Artist;
pub use common::{Artwork, MediaKind, PlayParams, Relationship};
pub use playlist::{Playlist, PlaylistAttributes};
pub use track::{TrackAttributes, TrackMetadata};
