//! Artist-related models.

use serde::{Deserialize, Serialize};

use super::album::Album;
use super::common::Relationship;
use super::track::TrackMetadata;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ArtistAttributes {
    pub name: String,

    #[serde(default)]
    pub genre_names: Vec<String>,

    #[serde(default)]
    pub url: Option<String>,
}

/// Discography relationships, drained of pagination when fetched with
/// `fetch_all`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ArtistRelationships {
    #[serde(default)]
    pub albums: Relationship<Album>,

    #[serde(rename = "music-videos", default)]
    pub music_videos: Relationship<TrackMetadata>,
}

/// A catalog artist.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Artist {
    pub id: String,

    pub attributes: ArtistAttributes,

    #[serde(default)]
    pub relationships: ArtistRelationships,
}

impl Artist {
    pub fn name(&self) -> &str {
        &self.attributes.name
    }

    pub fn albums(&self) -> &[Album] {
        &self.relationships.albums.data
    }

    pub fn music_videos(&self) -> &[TrackMetadata] {
        &self.relationships.music_videos.data
    }
}
