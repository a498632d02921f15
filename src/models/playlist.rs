//! Playlist-related models.

use serde::{Deserialize, Serialize};

use super::common::{Artwork, PlayParams, Relationship};
use super::track::TrackMetadata;

/// Curator used when a playlist has none.
pub const DEFAULT_CURATOR: &str = "Apple Music";

/// Playlist attributes carried alongside a playlist download queue.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistAttributes {
    pub name: String,

    #[serde(default)]
    pub curator_name: Option<String>,

    #[serde(default)]
    pub play_params: Option<PlayParams>,

    #[serde(default)]
    pub artwork: Option<Artwork>,

    #[serde(default)]
    pub url: Option<String>,
}

impl PlaylistAttributes {
    /// Curator, falling back to the catalog owner.
    pub fn curator(&self) -> &str {
        self.curator_name
            .as_deref()
            .filter(|c| !c.is_empty())
            .unwrap_or(DEFAULT_CURATOR)
    }

    /// Playlist id as used for playback.
    pub fn id(&self) -> &str {
        self.play_params
            .as_ref()
            .map(|p| p.id.as_str())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PlaylistRelationships {
    #[serde(default)]
    pub tracks: Relationship<TrackMetadata>,
}

/// A catalog playlist.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Playlist {
    pub id: String,

    pub attributes: PlaylistAttributes,

    #[serde(default)]
    pub relationships: PlaylistRelationships,
}

impl Playlist {
    /// Tracks in playlist order.
    pub fn tracks(&self) -> &[TrackMetadata] {
        &self.relationships.tracks.data
    }
}
