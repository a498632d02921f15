//! Album-related models.

use serde::{Deserialize, Serialize};

use super::common::{Artwork, EditorialNotes, PlayParams, Relationship};
use super::track::TrackMetadata;

/// Album attributes.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AlbumAttributes {
    #[serde(default)]
    pub name: String,

    /// Album artist.
    #[serde(default)]
    pub artist_name: String,

    #[serde(default)]
    pub track_count: u32,

    #[serde(default)]
    pub release_date: Option<String>,

    #[serde(default)]
    pub is_compilation: bool,

    #[serde(default)]
    pub copyright: Option<String>,

    #[serde(default)]
    pub record_label: Option<String>,

    #[serde(default)]
    pub upc: Option<String>,

    #[serde(default)]
    pub content_rating: Option<String>,

    #[serde(default)]
    pub artwork: Option<Artwork>,

    #[serde(default)]
    pub url: Option<String>,

    #[serde(default)]
    pub play_params: Option<PlayParams>,

    #[serde(default)]
    pub editorial_notes: Option<EditorialNotes>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AlbumRelationships {
    #[serde(default)]
    pub tracks: Relationship<TrackMetadata>,
}

/// A catalog album. When nested inside another resource only `id` is
/// guaranteed to be present.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Album {
    pub id: String,

    #[serde(default)]
    pub attributes: AlbumAttributes,

    #[serde(default)]
    pub relationships: AlbumRelationships,
}

impl Album {
    /// Tracks in catalog order.
    pub fn tracks(&self) -> &[TrackMetadata] {
        &self.relationships.tracks.data
    }

    /// Number of discs, derived from the highest disc number among tracks.
    pub fn disc_count(&self) -> u32 {
        self.tracks()
            .iter()
            .filter_map(|t| t.attributes.disc_number)
            .max()
            .unwrap_or(1)
    }

    /// Label used in the interactive album picker:
    /// track count | release date | rating | title.
    pub fn selection_label(&self) -> String {
        let rating = self
            .attributes
            .content_rating
            .as_deref()
            .map(title_case)
            .unwrap_or_else(|| "None".to_string());
        format!(
            "{:03} | {:<10} | {:<8} | {}",
            self.attributes.track_count,
            self.attributes.release_date.as_deref().unwrap_or(""),
            rating,
            self.attributes.name
        )
    }
}

pub(crate) fn title_case(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}
