//! Common types shared across all models.

use serde::{Deserialize, Serialize};

/// Artwork descriptor.
///
/// `url` is a template containing `{w}x{h}` size placeholders.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Artwork {
    /// URL template, e.g. `https://is1-ssl.mzstatic.com/image/thumb/…/{w}x{h}bb.jpg`.
    pub url: String,

    /// Source width in pixels.
    #[serde(default)]
    pub width: Option<u32>,

    /// Source height in pixels.
    #[serde(default)]
    pub height: Option<u32>,
}

/// Playback parameters. Only present on streamable resources.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PlayParams {
    /// Catalog id used for playback.
    pub id: String,

    /// Resource kind, e.g. "song", "musicVideo", "playlist".
    #[serde(default)]
    pub kind: String,
}

/// Editorial text attached to a resource.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EditorialNotes {
    #[serde(default)]
    pub standard: Option<String>,

    #[serde(default)]
    pub short: Option<String>,
}

/// A relationship list, possibly paginated through `next`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Relationship<T> {
    /// Items on the current page (or all items once drained).
    #[serde(default = "Vec::new")]
    pub data: Vec<T>,

    /// Relative cursor to the next page.
    #[serde(default)]
    pub next: Option<String>,
}

impl<T> Default for Relationship<T> {
    fn default() -> Self {
        Self {
            data: Vec::new(),
            next: None,
        }
    }
}

/// Kind of media resource returned by the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum MediaKind {
    #[serde(rename = "songs")]
    #[default]
    Song,
    #[serde(rename = "music-videos")]
    MusicVideo,
    #[serde(rename = "uploaded-videos")]
    UploadedVideo,
    #[serde(other)]
    Other,
}

impl MediaKind {
    /// File extension of the finished container.
    pub fn extension(&self) -> &'static str {
        match self {
            MediaKind::Song | MediaKind::Other => ".m4a",
            MediaKind::MusicVideo | MediaKind::UploadedVideo => ".m4v",
        }
    }

    /// iTunes `stik` media type code.
    pub fn media_type_code(&self) -> u8 {
        match self {
            MediaKind::Song | MediaKind::Other => 1,
            MediaKind::MusicVideo | MediaKind::UploadedVideo => 6,
        }
    }

    pub fn is_video(&self) -> bool {
        matches!(self, MediaKind::MusicVideo | MediaKind::UploadedVideo)
    }
}

/// Content rating as used in tags.
pub fn rating_label(content_rating: Option<&str>) -> String {
    content_rating.unwrap_or("none").to_string()
}

/// Format milliseconds as MM:SS.
pub fn millis_to_min_sec(millis: u64) -> String {
    let total_seconds = millis / 1000;
    format!("{:02}:{:02}", total_seconds / 60, total_seconds % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_media_kind_from_type_field() {
        let kind: MediaKind = serde_json::from_str("\"music-videos\"").unwrap();
        assert_eq!(kind, MediaKind::MusicVideo);
        let kind: MediaKind = serde_json::from_str("\"library-songs\"").unwrap();
        assert_eq!(kind, MediaKind::Other);
    }

    #[test]
    fn test_relationship_defaults() {
        let rel: Relationship<u32> = serde_json::from_str("{}").unwrap();
        assert!(rel.data.is_empty());
        assert!(rel.next.is_none());
    }

    #[test]
    fn test_millis_to_min_sec() {
        assert_eq!(millis_to_min_sec(215_000), "03:35");
        assert_eq!(millis_to_min_sec(0), "00:00");
    }
}
