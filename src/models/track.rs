//! Track-related models.
//!
//! A "track" is any downloadable media item in a queue: songs, music videos
//! and uploaded videos (posts) share one record shape.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::album::Album;
use super::common::{Artwork, EditorialNotes, MediaKind, PlayParams, Relationship};

/// Attributes of a downloadable media item.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TrackAttributes {
    /// Track title.
    pub name: String,

    #[serde(default)]
    pub artist_name: String,

    #[serde(default)]
    pub album_name: Option<String>,

    #[serde(default)]
    pub composer_name: Option<String>,

    /// "explicit", "clean" or absent.
    #[serde(default)]
    pub content_rating: Option<String>,

    #[serde(default)]
    pub disc_number: Option<u32>,

    #[serde(default)]
    pub track_number: Option<u32>,

    #[serde(default)]
    pub duration_in_millis: Option<u64>,

    #[serde(default)]
    pub genre_names: Vec<String>,

    #[serde(default)]
    pub release_date: Option<String>,

    /// Posts carry an upload date instead of a release date.
    #[serde(default)]
    pub upload_date: Option<String>,

    #[serde(default)]
    pub artwork: Option<Artwork>,

    /// Canonical catalog URL; its path carries the storefront.
    #[serde(default)]
    pub url: Option<String>,

    /// Absent when the item cannot be streamed in this storefront.
    #[serde(default)]
    pub play_params: Option<PlayParams>,

    #[serde(default)]
    pub is_mastered_for_itunes: bool,

    #[serde(default)]
    pub has_lyrics: bool,

    #[serde(default)]
    pub isrc: Option<String>,

    #[serde(default)]
    pub editorial_notes: Option<EditorialNotes>,

    /// Direct asset URLs keyed by quality, posts only.
    #[serde(default)]
    pub asset_tokens: Option<BTreeMap<String, String>>,
}

/// TTML lyrics resource.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LyricsResource {
    pub id: String,

    #[serde(default)]
    pub attributes: LyricsAttributes,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LyricsAttributes {
    #[serde(default)]
    pub ttml: Option<String>,
}

/// Relationships of a media item.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TrackRelationships {
    #[serde(default)]
    pub albums: Option<Relationship<Album>>,

    #[serde(default)]
    pub lyrics: Option<Relationship<LyricsResource>>,
}

/// A normalized catalog media record.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TrackMetadata {
    /// Stable catalog id.
    pub id: String,

    /// Resource type.
    #[serde(rename = "type", default)]
    pub kind: MediaKind,

    pub attributes: TrackAttributes,

    #[serde(default)]
    pub relationships: TrackRelationships,
}

impl TrackMetadata {
    /// Whether the item can be streamed at all.
    pub fn is_streamable(&self) -> bool {
        self.attributes.play_params.is_some() || self.kind == MediaKind::UploadedVideo
    }

    /// Id of the album this item belongs to, when the relationship is present.
    pub fn album_id(&self) -> Option<&str> {
        self.relationships
            .albums
            .as_ref()
            .and_then(|r| r.data.first())
            .map(|a| a.id.as_str())
    }

    /// Raw TTML lyrics, when included in the response.
    pub fn lyrics_ttml(&self) -> Option<&str> {
        self.relationships
            .lyrics
            .as_ref()
            .and_then(|r| r.data.first())
            .and_then(|l| l.attributes.ttml.as_deref())
    }

    /// Storefront segment of the canonical URL, e.g. "us".
    pub fn storefront(&self) -> Option<&str> {
        self.attributes
            .url
            .as_deref()
            .and_then(|u| u.split('/').nth(3))
            .filter(|s| !s.is_empty())
    }

    /// Human label used in logs and failure reports.
    pub fn display_name(&self) -> String {
        if self.attributes.artist_name.is_empty() {
            self.attributes.name.clone()
        } else {
            format!("{} - {}", self.attributes.artist_name, self.attributes.name)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_deserialize_song() {
        let song: TrackMetadata = serde_json::from_value(json!({
            "id": "1440857786",
            "type": "songs",
            "attributes": {
                "name": "Track",
                "artistName": "Artist",
                "albumName": "Album",
                "discNumber": 1,
                "trackNumber": 3,
                "genreNames": ["Pop", "Music"],
                "url": "https://music.apple.com/us/album/album/1440857781?i=1440857786",
                "playParams": {"id": "1440857786", "kind": "song"}
            },
            "relationships": {
                "albums": {"data": [{"id": "1440857781", "type": "albums"}]},
                "lyrics": {"data": [{"id": "1", "attributes": {"ttml": "<tt/>"}}]}
            }
        }))
        .unwrap();

        assert_eq!(song.kind, MediaKind::Song);
        assert!(song.is_streamable());
        assert_eq!(song.album_id(), Some("1440857781"));
        assert_eq!(song.lyrics_ttml(), Some("<tt/>"));
        assert_eq!(song.storefront(), Some("us"));
        assert_eq!(song.display_name(), "Artist - Track");
    }

    #[test]
    fn test_missing_play_params_is_not_streamable() {
        let song: TrackMetadata = serde_json::from_value(json!({
            "id": "1",
            "type": "songs",
            "attributes": {"name": "Gone"}
        }))
        .unwrap();
        assert!(!song.is_streamable());
        assert_eq!(song.album_id(), None);
    }
}
