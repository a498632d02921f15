//! Catalog URL resolution.

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{AmdlError, Result};

/// `/{storefront}/{type}/{slug}(/{id})?(?i={song id})?`
const VALID_URL_RE: &str = r"/([a-z]{2})/(artist|album|playlist|song|music-video|post)/([^/]*)(?:/([^/?]*))?(?:\?i=)?([0-9a-z]*)?";

/// Numeric path fragment used to recover song ids from odd song URLs.
const SONG_ID_FALLBACK_RE: &str = r"/(\d+)(?:\?|$)";

fn valid_url_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(VALID_URL_RE).expect("static regex"))
}

fn song_id_fallback_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(SONG_ID_FALLBACK_RE).expect("static regex"))
}

/// Kind of catalog content a URL points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ContentType {
    Artist,
    Album,
    Playlist,
    Song,
    MusicVideo,
    Post,
}

impl ContentType {
    /// URL path segment for this type.
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Artist => "artist",
            ContentType::Album => "album",
            ContentType::Playlist => "playlist",
            ContentType::Song => "song",
            ContentType::MusicVideo => "music-video",
            ContentType::Post => "post",
        }
    }

    pub fn all() -> &'static [ContentType] {
        &[
            ContentType::Artist,
            ContentType::Album,
            ContentType::Playlist,
            ContentType::Song,
            ContentType::MusicVideo,
            ContentType::Post,
        ]
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentType {
    type Err = AmdlError;

    fn from_str(s: &str) -> Result<Self> {
        ContentType::all()
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| AmdlError::InvalidUrl(format!("unknown content type {:?}", s)))
    }
}

/// A resolved catalog reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentReference {
    /// Two-letter storefront code, e.g. "us".
    pub storefront: String,
    /// Content type.
    #[serde(rename = "type")]
    pub content_type: ContentType,
    /// Catalog id. Always numeric for songs.
    pub id: String,
}

impl fmt::Display for ContentReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.storefront, self.content_type, self.id)
    }
}

/// Parse a catalog URL into a [`ContentReference`].
///
/// Album URLs carrying a `?i=` track selector resolve to that song.
pub fn resolve(url: &str) -> Result<ContentReference> {
    let caps = valid_url_re()
        .captures(url)
        .ok_or_else(|| AmdlError::InvalidUrl(url.to_string()))?;

    let storefront = caps[1].to_string();
    let song_selector = caps.get(5).map(|m| m.as_str()).filter(|s| !s.is_empty());

    let content_type = match song_selector {
        Some(_) => ContentType::Song,
        None => caps[2].parse()?,
    };

    let id = song_selector
        .or_else(|| caps.get(4).map(|m| m.as_str()).filter(|s| !s.is_empty()))
        .or_else(|| caps.get(3).map(|m| m.as_str()).filter(|s| !s.is_empty()))
        .map(str::to_string)
        .ok_or_else(|| AmdlError::InvalidUrl(format!("no id in {}", url)))?;

    let id = if content_type == ContentType::Song && !is_numeric(&id) {
        song_id_fallback_re()
            .captures(url)
            .map(|c| c[1].to_string())
            .ok_or_else(|| {
                AmdlError::InvalidUrl(format!("could not extract a song id from {}", url))
            })?
    } else {
        id
    };

    Ok(ContentReference {
        storefront,
        content_type,
        id,
    })
}

pub(crate) fn is_numeric(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}
