//! MP4 container tagging, cover art and lyric side files.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use bytes::Bytes;
use lofty::config::WriteOptions;
use lofty::mp4::{AdvisoryRating, Atom, AtomData, AtomIdent, Ilst};
use lofty::picture::{MimeType, Picture, PictureType};
use lofty::tag::{Accessor, TagExt};
use regex::Regex;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::cache::ResponseCache;
use crate::config::{Config, CoverFormat};
use crate::error::{AmdlError, Result};
use crate::retry::{network_error, RetryPolicy};
use crate::tags::Tags;

const COVER_CACHE_CAPACITY: usize = 64;

fn size_suffix_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{w\}x\{h\}[a-z]{2}\.jpg").expect("static regex"))
}

fn raw_suffix_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"/\{w\}x\{h\}[a-z]{2}\.jpg$").expect("static regex"))
}

/// Resolve an artwork template into a concrete cover URL.
pub fn cover_url(template: &str, size: u32, format: CoverFormat) -> String {
    match format {
        CoverFormat::Raw => raw_suffix_re()
            .replace(template, "")
            .replace("is1-ssl", "a1")
            .replace("image/thumb/", ""),
        _ => size_suffix_re()
            .replace(template, format!("{}x{}bb.{}", size, size, format.as_str()).as_str())
            .into_owned(),
    }
}

/// File extension for downloaded cover bytes, sniffed from the magic
/// number and falling back to the URL.
pub fn image_extension(data: &[u8], url: &str) -> String {
    if data.starts_with(&[0xFF, 0xD8, 0xFF]) {
        return "jpg".to_string();
    }
    if data.starts_with(&[0x89, b'P', b'N', b'G']) {
        return "png".to_string();
    }
    Path::new(url.split('?').next().unwrap_or(url))
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_else(|| "jpg".to_string())
}

/// Tag values that survive the exclusion list, ready to be written.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TagPayload {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub album_artist: Option<String>,
    pub composer: Option<String>,
    pub copyright: Option<String>,
    pub comments: Option<String>,
    pub date: Option<String>,
    pub genre: Option<String>,
    pub lyrics: Option<String>,
    pub storefront: Option<String>,
    /// `(number, total)`; an excluded half is 0.
    pub track: Option<(u32, u32)>,
    pub disc: Option<(u32, u32)>,
    pub compilation: Option<bool>,
    pub gapless: Option<bool>,
    pub media_type: Option<u8>,
    pub rating: Option<String>,
}

fn pair(number: Option<u32>, total: Option<u32>) -> Option<(u32, u32)> {
    match (number, total) {
        (None, None) => None,
        (n, t) => Some((n.unwrap_or(0), t.unwrap_or(0))),
    }
}

impl TagPayload {
    /// Build the payload from `tags`, dropping every lowercase name in
    /// `exclude`.
    pub fn from_tags(tags: &Tags, exclude: &[String]) -> Self {
        let keep = |name: &str| !exclude.iter().any(|e| e == name);
        let keep_opt = |name: &str, value: &Option<String>| value.clone().filter(|_| keep(name));
        let keep_val = |name: &str, value: &str| Some(value.to_string()).filter(|_| keep(name));

        Self {
            title: keep_val("title", &tags.title),
            artist: keep_val("artist", &tags.artist),
            album: keep_opt("album", &tags.album),
            album_artist: keep_opt("album_artist", &tags.album_artist),
            composer: keep_opt("composer", &tags.composer),
            copyright: keep_opt("copyright", &tags.copyright),
            comments: keep_opt("comments", &tags.comments),
            date: keep_opt("date", &tags.date),
            genre: keep_opt("genre", &tags.genre),
            lyrics: keep_opt("lyrics", &tags.lyrics),
            storefront: keep_opt("storefront", &tags.storefront),
            track: pair(
                Some(tags.track).filter(|_| keep("track")),
                Some(tags.track_total).filter(|_| keep("track_total")),
            ),
            disc: pair(
                Some(tags.disc).filter(|_| keep("disc")),
                Some(tags.disc_total).filter(|_| keep("disc_total")),
            ),
            compilation: Some(tags.compilation).filter(|_| keep("compilation")),
            gapless: Some(tags.gapless).filter(|_| keep("gapless")),
            media_type: Some(tags.media_type).filter(|_| keep("media_type")),
            rating: keep_val("rating", &tags.rating),
        }
    }

    /// Render into an iTunes-style `ilst` tag.
    pub fn to_ilst(&self, cover: Option<(&Bytes, CoverFormat)>) -> Ilst {
        let mut ilst = Ilst::default();
        let mut text = |ident: &[u8; 4], value: &Option<String>| {
            if let Some(v) = value {
                ilst.insert(Atom::new(AtomIdent::Fourcc(*ident), AtomData::UTF8(v.clone())));
            }
        };
        text(b"aART", &self.album_artist);
        text(b"\xa9wrt", &self.composer);
        text(b"cprt", &self.copyright);
        text(b"\xa9cmt", &self.comments);
        text(b"\xa9day", &self.date);
        text(b"\xa9lyr", &self.lyrics);
        text(b"sfID", &self.storefront);

        if let Some(v) = &self.title {
            ilst.set_title(v.clone());
        }
        if let Some(v) = &self.artist {
            ilst.set_artist(v.clone());
        }
        if let Some(v) = &self.album {
            ilst.set_album(v.clone());
        }
        if let Some(v) = &self.genre {
            ilst.set_genre(v.clone());
        }
        if let Some((number, total)) = self.track {
            ilst.set_track(number);
            ilst.set_track_total(total);
        }
        if let Some((number, total)) = self.disc {
            ilst.set_disk(number);
            ilst.set_disk_total(total);
        }
        if let Some(v) = self.compilation {
            ilst.insert(Atom::new(AtomIdent::Fourcc(*b"cpil"), AtomData::Bool(v)));
        }
        if let Some(v) = self.gapless {
            ilst.insert(Atom::new(AtomIdent::Fourcc(*b"pgap"), AtomData::Bool(v)));
        }
        if let Some(v) = self.media_type {
            ilst.insert(Atom::new(
                AtomIdent::Fourcc(*b"stik"),
                AtomData::SignedInteger(v.into()),
            ));
        }
        if let Some(rating) = &self.rating {
            ilst.set_advisory_rating(match rating.as_str() {
                "explicit" => AdvisoryRating::Explicit,
                "clean" => AdvisoryRating::Clean,
                _ => AdvisoryRating::Inoffensive,
            });
        }

        if let Some((data, format)) = cover {
            let mime = match format {
                CoverFormat::Png => MimeType::Png,
                _ => MimeType::Jpeg,
            };
            ilst.insert_picture(Picture::new_unchecked(
                PictureType::CoverFront,
                Some(mime),
                None,
                data.to_vec(),
            ));
        }
        ilst
    }
}

/// Write `payload` into the MP4 file at `path`, replacing its tags.
pub fn write_tags(path: &Path, payload: &TagPayload, cover: Option<(&Bytes, CoverFormat)>) -> Result<()> {
    payload
        .to_ilst(cover)
        .save_to_path(path, WriteOptions::default())
        .map_err(|e| AmdlError::Tagging(format!("{}: {}", path.display(), e)))?;
    debug!("Tags written to {}", path.display());
    Ok(())
}

type LyricsKey = (PathBuf, Option<String>, Option<String>);

/// Applies tags and writes cover and lyric side files for finished tracks.
pub struct TaggingEngine {
    client: reqwest::Client,
    retry: RetryPolicy,
    exclude: Vec<String>,
    cover_format: CoverFormat,
    cover_size: u32,
    overwrite: bool,
    covers: ResponseCache<Bytes>,
    written_lyrics: Mutex<HashSet<LyricsKey>>,
}

impl TaggingEngine {
    pub fn new(config: &Config, client: reqwest::Client) -> Self {
        Self {
            client,
            retry: RetryPolicy::default(),
            exclude: config.exclude_tags_list(),
            cover_format: config.cover_format,
            cover_size: config.cover_size,
            overwrite: config.overwrite,
            covers: ResponseCache::new(COVER_CACHE_CAPACITY),
            written_lyrics: Mutex::new(HashSet::new()),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn excluded(&self, name: &str) -> bool {
        self.exclude.iter().any(|e| e == name)
    }

    /// Cover URL for an artwork template under the configured size and
    /// format.
    pub fn cover_url(&self, template: &str) -> String {
        cover_url(template, self.cover_size, self.cover_format)
    }

    /// Download cover bytes, memoized by URL.
    pub async fn fetch_cover(&self, url: &str) -> Result<Bytes> {
        if let Some(data) = self.covers.get(url).await {
            debug!("Cover cache hit: {}", url);
            return Ok(data);
        }

        let client = &self.client;
        let data = self
            .retry
            .run(|| async move {
                let response = client
                    .get(url)
                    .send()
                    .await
                    .map_err(network_error(url))?
                    .error_for_status()
                    .map_err(network_error(url))?;
                response.bytes().await.map_err(network_error(url))
            })
            .await?;

        self.covers.insert(url, data.clone()).await;
        Ok(data)
    }

    /// Write tags into the final file. A cover that cannot be fetched is
    /// skipped with a warning.
    pub async fn apply(&self, path: &Path, tags: &Tags) -> Result<()> {
        let payload = TagPayload::from_tags(tags, &self.exclude);

        let embed = !self.excluded("cover") && self.cover_format != CoverFormat::Raw;
        let cover = match (&tags.cover_url, embed) {
            (Some(url), true) => match self.fetch_cover(url).await {
                Ok(data) => Some(data),
                Err(e) => {
                    warn!("Cover art unavailable for {}: {}", tags.title, e);
                    None
                }
            },
            _ => None,
        };

        write_tags(path, &payload, cover.as_ref().map(|c| (c, self.cover_format)))
    }

    /// Write `.lrc` / `.txt` siblings of `media_path`. Repeated calls with
    /// the same inputs do nothing.
    pub async fn save_lyrics(
        &self,
        media_path: &Path,
        synced: Option<&str>,
        unsynced: Option<&str>,
    ) -> Result<()> {
        let key: LyricsKey = (
            media_path.to_path_buf(),
            synced.map(str::to_string),
            unsynced.map(str::to_string),
        );
        let mut written = self.written_lyrics.lock().await;
        if written.contains(&key) {
            return Ok(());
        }

        for (content, ext) in [(synced, "lrc"), (unsynced, "txt")] {
            let Some(content) = content else { continue };
            let target = media_path.with_extension(ext);
            if target.exists() && !self.overwrite {
                debug!("Keeping existing {}", target.display());
                continue;
            }
            tokio::fs::write(&target, content)
                .await
                .map_err(|e| AmdlError::filesystem(&target, e))?;
            debug!("Lyrics saved to {}", target.display());
        }

        written.insert(key);
        Ok(())
    }

    /// Save `Cover.<ext>` into the folder of `media_path`.
    pub async fn save_cover(&self, media_path: &Path, url: &str) -> Result<Option<PathBuf>> {
        let Some(folder) = media_path.parent() else {
            return Ok(None);
        };
        let data = self.fetch_cover(url).await?;
        let target = folder.join(format!("Cover.{}", image_extension(&data, url)));
        if target.exists() && !self.overwrite {
            return Ok(None);
        }

        tokio::fs::create_dir_all(folder)
            .await
            .map_err(|e| AmdlError::filesystem(folder, e))?;
        tokio::fs::write(&target, &data)
            .await
            .map_err(|e| AmdlError::filesystem(&target, e))?;
        info!("Cover saved to {}", target.display());
        Ok(Some(target))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const ARTWORK: &str =
        "https://is1-ssl.mzstatic.com/image/thumb/Music/v4/aa/bb/cover.jpg/{w}x{h}bb.jpg";

    fn tags() -> Tags {
        Tags {
            album: Some("Album".into()),
            artist: "Artist".into(),
            title: "Song".into(),
            disc: 1,
            disc_total: 2,
            track: 3,
            track_total: 10,
            rating: "explicit".into(),
            lyrics: Some("la la\n".into()),
            media_type: 1,
            ..Default::default()
        }
    }

    fn engine(config: &Config) -> TaggingEngine {
        TaggingEngine::new(config, reqwest::Client::new()).with_retry_policy(RetryPolicy::none())
    }

    #[test]
    fn test_cover_url_sized() {
        assert_eq!(
            cover_url(ARTWORK, 1200, CoverFormat::Png),
            "https://is1-ssl.mzstatic.com/image/thumb/Music/v4/aa/bb/cover.jpg/1200x1200bb.png"
        );
    }

    #[test]
    fn test_cover_url_raw() {
        assert_eq!(
            cover_url(ARTWORK, 1200, CoverFormat::Raw),
            "https://a1.mzstatic.com/Music/v4/aa/bb/cover.jpg"
        );
    }

    #[test]
    fn test_payload_exclusions() {
        let exclude = vec!["lyrics".to_string(), "track_total".to_string(), "rating".to_string()];
        let payload = TagPayload::from_tags(&tags(), &exclude);
        assert_eq!(payload.lyrics, None);
        assert_eq!(payload.rating, None);
        assert_eq!(payload.track, Some((3, 0)));
        assert_eq!(payload.disc, Some((1, 2)));
        assert_eq!(payload.title.as_deref(), Some("Song"));

        let payload = TagPayload::from_tags(&tags(), &["disc".into(), "disc_total".into()]);
        assert_eq!(payload.disc, None);
    }

    #[test]
    fn test_ilst_contents() {
        let payload = TagPayload::from_tags(&tags(), &[]);
        let ilst = payload.to_ilst(None);
        assert_eq!(ilst.title().as_deref(), Some("Song"));
        assert_eq!(ilst.track(), Some(3));
        assert_eq!(ilst.track_total(), Some(10));
        assert_eq!(ilst.disk_total(), Some(2));
        assert_eq!(ilst.advisory_rating(), Some(AdvisoryRating::Explicit));
    }

    #[test]
    fn test_image_extension() {
        assert_eq!(image_extension(&[0xFF, 0xD8, 0xFF, 0xE0], "x"), "jpg");
        assert_eq!(image_extension(b"\x89PNG\r\n", "x"), "png");
        assert_eq!(image_extension(b"????", "https://a1/cover.tif?x=1"), "tif");
    }

    #[test]
    fn test_write_tags_rejects_non_mp4() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("song.m4a");
        std::fs::write(&file, b"not an mp4").unwrap();
        let result = write_tags(&file, &TagPayload::default(), None);
        assert!(matches!(result, Err(AmdlError::Tagging(_))));
    }

    #[tokio::test]
    async fn test_cover_is_fetched_once() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/cover.jpg"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0xFF, 0xD8, 0xFF, 0x00]))
            .expect(1)
            .mount(&server)
            .await;

        let engine = engine(&Config::default());
        let url = format!("{}/cover.jpg", server.uri());
        let first = engine.fetch_cover(&url).await.unwrap();
        let second = engine.fetch_cover(&url).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_save_cover_in_media_folder() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/art"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"\x89PNG....".to_vec()))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let media = dir.path().join("Artist").join("Album").join("01 Song.m4a");
        let engine = engine(&Config::default());
        let saved = engine
            .save_cover(&media, &format!("{}/art", server.uri()))
            .await
            .unwrap();
        assert_eq!(saved, Some(dir.path().join("Artist").join("Album").join("Cover.png")));
    }

    #[tokio::test]
    async fn test_lyrics_side_files_memoized() {
        let dir = tempfile::tempdir().unwrap();
        let media = dir.path().join("01 Song.m4a");
        let engine = engine(&Config::default());

        engine
            .save_lyrics(&media, Some("[00:01.00]a\n"), Some("a\n"))
            .await
            .unwrap();
        assert_eq!(
            std::fs::read_to_string(dir.path().join("01 Song.lrc")).unwrap(),
            "[00:01.00]a\n"
        );
        assert_eq!(std::fs::read_to_string(dir.path().join("01 Song.txt")).unwrap(), "a\n");

        std::fs::remove_file(dir.path().join("01 Song.txt")).unwrap();
        engine
            .save_lyrics(&media, Some("[00:01.00]a\n"), Some("a\n"))
            .await
            .unwrap();
        assert!(!dir.path().join("01 Song.txt").exists());
    }
}
