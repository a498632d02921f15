//! Normalized per-track tags.
//!
//! Derived once per track from the catalog records and then shared,
//! read-only, by path rendering and container tagging.

use std::fmt::Write as _;

use chrono::{DateTime, NaiveDate, NaiveDateTime};

use crate::error::{AmdlError, Result};
use crate::lyrics::Lyrics;
use crate::models::common::rating_label;
use crate::models::{Album, MediaKind, PlaylistAttributes, TrackMetadata};

/// Value substituted for a template placeholder.
#[derive(Debug, Clone, PartialEq)]
pub enum TemplateValue {
    Text(String),
    Int(i64),
}

/// Source of placeholder values for path templates.
pub trait TemplateContext {
    fn value(&self, key: &str) -> Option<TemplateValue>;
}

fn text(value: &str) -> Option<TemplateValue> {
    Some(TemplateValue::Text(value.to_string()))
}

/// Known but absent values render as empty text.
fn opt_text(value: &Option<String>) -> Option<TemplateValue> {
    Some(TemplateValue::Text(value.clone().unwrap_or_default()))
}

/// Parse a catalog date (`2020-05-01`, `2020-05-01T07:00:00Z` or `2020`).
pub fn parse_release_date(value: &str) -> Option<NaiveDateTime> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.naive_utc());
    }
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0);
    }
    value
        .parse::<i32>()
        .ok()
        .and_then(|year| NaiveDate::from_ymd_opt(year, 1, 1))
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

/// Format a catalog date with a strftime template.
pub fn format_date(value: &str, template: &str) -> Result<String> {
    let date = parse_release_date(value).ok_or_else(|| AmdlError::InvalidTemplate {
        template: template.to_string(),
        reason: format!("unparseable date {:?}", value),
    })?;
    let mut out = String::new();
    write!(out, "{}", date.format(template)).map_err(|_| AmdlError::InvalidTemplate {
        template: template.to_string(),
        reason: "invalid date format".to_string(),
    })?;
    Ok(out)
}

/// Tag record for one queue item.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Tags {
    pub album: Option<String>,
    pub album_artist: Option<String>,
    pub artist: String,
    pub comments: Option<String>,
    pub compilation: bool,
    pub composer: Option<String>,
    pub copyright: Option<String>,
    pub date: Option<String>,
    pub disc: u32,
    pub disc_total: u32,
    pub gapless: bool,
    pub genre: Option<String>,
    pub lyrics: Option<String>,
    pub lyrics_synced: Option<String>,
    pub media_type: u8,
    pub rating: String,
    pub storefront: Option<String>,
    pub title: String,
    pub track: u32,
    pub track_total: u32,
    pub isrc: Option<String>,
    pub cover_url: Option<String>,
}

impl Tags {
    /// Build tags for a song or music video. `album` is the full album the
    /// item belongs to, when it has one.
    pub fn from_track(
        track: &TrackMetadata,
        album: Option<&Album>,
        lyrics: &Lyrics,
        cover_url: Option<String>,
        date_template: &str,
    ) -> Result<Self> {
        let attrs = &track.attributes;
        let release_date = attrs
            .release_date
            .as_deref()
            .or_else(|| attrs.upload_date.as_deref())
            .or_else(|| album.and_then(|a| a.attributes.release_date.as_deref()));
        let date = release_date
            .map(|d| format_date(d, date_template))
            .transpose()?;

        let album_attrs = album.map(|a| &a.attributes);
        Ok(Self {
            album: attrs
                .album_name
                .clone()
                .or_else(|| album_attrs.map(|a| a.name.clone()))
                .filter(|a| !a.is_empty()),
            album_artist: album_attrs
                .map(|a| a.artist_name.clone())
                .filter(|a| !a.is_empty()),
            artist: attrs.artist_name.clone(),
            comments: attrs
                .editorial_notes
                .as_ref()
                .and_then(|n| n.standard.clone()),
            compilation: album_attrs.is_some_and(|a| a.is_compilation),
            composer: attrs.composer_name.clone(),
            copyright: album_attrs.and_then(|a| a.copyright.clone()),
            date,
            disc: attrs.disc_number.unwrap_or(1),
            disc_total: album.map(Album::disc_count).unwrap_or(1),
            gapless: attrs.is_mastered_for_itunes,
            genre: attrs.genre_names.first().cloned(),
            lyrics: lyrics.unsynced.clone(),
            lyrics_synced: lyrics.synced.clone(),
            media_type: track.kind.media_type_code(),
            rating: rating_label(attrs.content_rating.as_deref()),
            storefront: track.storefront().map(str::to_string),
            title: attrs.name.clone(),
            track: attrs.track_number.unwrap_or(1),
            track_total: album_attrs.map(|a| a.track_count).unwrap_or(1),
            isrc: attrs.isrc.clone(),
            cover_url,
        })
    }

    /// Whether the item belongs to an album.
    pub fn has_album(&self) -> bool {
        self.album.is_some()
    }

    /// Whether the item is a video.
    pub fn is_video(&self) -> bool {
        self.media_type == MediaKind::MusicVideo.media_type_code()
    }
}

impl TemplateContext for Tags {
    fn value(&self, key: &str) -> Option<TemplateValue> {
        match key {
            "album" => opt_text(&self.album),
            "album_artist" => opt_text(&self.album_artist),
            "artist" => text(&self.artist),
            "comments" => opt_text(&self.comments),
            "composer" => opt_text(&self.composer),
            "copyright" => opt_text(&self.copyright),
            "date" => opt_text(&self.date),
            "disc" => Some(TemplateValue::Int(self.disc.into())),
            "disc_total" => Some(TemplateValue::Int(self.disc_total.into())),
            "genre" => opt_text(&self.genre),
            "media_type" => Some(TemplateValue::Int(self.media_type.into())),
            "rating" => text(&self.rating),
            "storefront" => opt_text(&self.storefront),
            "title" => text(&self.title),
            "track" => Some(TemplateValue::Int(self.track.into())),
            "track_total" => Some(TemplateValue::Int(self.track_total.into())),
            "isrc" => opt_text(&self.isrc),
            _ => None,
        }
    }
}

/// Values available to the playlist template.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaylistTags {
    pub playlist_artist: String,
    pub playlist_id: String,
    pub playlist_title: String,
    /// 1-based position in the playlist.
    pub playlist_track: u32,
}

impl PlaylistTags {
    pub fn new(attributes: &PlaylistAttributes, playlist_track: u32) -> Self {
        Self {
            playlist_artist: attributes.curator().to_string(),
            playlist_id: attributes.id().to_string(),
            playlist_title: attributes.name.clone(),
            playlist_track,
        }
    }
}

impl TemplateContext for PlaylistTags {
    fn value(&self, key: &str) -> Option<TemplateValue> {
        match key {
            "playlist_artist" => text(&self.playlist_artist),
            "playlist_id" => text(&self.playlist_id),
            "playlist_title" => text(&self.playlist_title),
            "playlist_track" => Some(TemplateValue::Int(self.playlist_track.into())),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn album() -> Album {
        serde_json::from_value(json!({
            "id": "12345",
            "attributes": {
                "name": "Album",
                "artistName": "Album Artist",
                "trackCount": 12,
                "isCompilation": false,
                "copyright": "℗ 2020 Label"
            },
            "relationships": {"tracks": {"data": [
                {"id": "1", "attributes": {"name": "a", "discNumber": 1}},
                {"id": "2", "attributes": {"name": "b", "discNumber": 2}}
            ]}}
        }))
        .unwrap()
    }

    fn song() -> TrackMetadata {
        serde_json::from_value(json!({
            "id": "1",
            "type": "songs",
            "attributes": {
                "name": "Song",
                "artistName": "Artist",
                "albumName": "Album",
                "discNumber": 2,
                "trackNumber": 5,
                "genreNames": ["Rock", "Music"],
                "releaseDate": "2020-05-01",
                "isMasteredForItunes": true,
                "contentRating": "explicit",
                "url": "https://music.apple.com/gb/album/x/12345?i=1",
                "playParams": {"id": "1", "kind": "song"}
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_format_date() {
        assert_eq!(
            format_date("2020-05-01", "%Y-%m-%dT%H:%M:%SZ").unwrap(),
            "2020-05-01T00:00:00Z"
        );
        assert_eq!(format_date("2019-11-22T08:00:00Z", "%Y").unwrap(), "2019");
        assert_eq!(format_date("1999", "%Y-%m-%d").unwrap(), "1999-01-01");
        assert!(format_date("someday", "%Y").is_err());
    }

    #[test]
    fn test_tags_from_song_and_album() {
        let lyrics = Lyrics {
            synced: Some("[00:01.00]x\n".into()),
            unsynced: None,
        };
        let tags = Tags::from_track(&song(), Some(&album()), &lyrics, None, "%Y").unwrap();

        assert_eq!(tags.album.as_deref(), Some("Album"));
        assert_eq!(tags.album_artist.as_deref(), Some("Album Artist"));
        assert_eq!(tags.disc, 2);
        assert_eq!(tags.disc_total, 2);
        assert_eq!(tags.track, 5);
        assert_eq!(tags.track_total, 12);
        assert_eq!(tags.genre.as_deref(), Some("Rock"));
        assert_eq!(tags.date.as_deref(), Some("2020"));
        assert_eq!(tags.rating, "explicit");
        assert_eq!(tags.storefront.as_deref(), Some("gb"));
        assert_eq!(tags.media_type, 1);
        assert!(tags.gapless);
        assert_eq!(tags.lyrics_synced.as_deref(), Some("[00:01.00]x\n"));
        assert_eq!(tags.value("track"), Some(TemplateValue::Int(5)));
        assert_eq!(tags.value("unknown"), None);
    }

    #[test]
    fn test_tags_without_album() {
        let mut track = song();
        track.attributes.album_name = None;
        let tags = Tags::from_track(&track, None, &Lyrics::default(), None, "%Y").unwrap();
        assert!(!tags.has_album());
        assert_eq!(tags.disc_total, 1);
        assert_eq!(tags.value("album"), Some(TemplateValue::Text(String::new())));
    }

    #[test]
    fn test_playlist_tags_default_curator() {
        let attrs = PlaylistAttributes {
            name: "Mix".into(),
            ..Default::default()
        };
        let tags = PlaylistTags::new(&attrs, 3);
        assert_eq!(tags.playlist_artist, "Apple Music");
        assert_eq!(tags.value("playlist_track"), Some(TemplateValue::Int(3)));
    }
}
