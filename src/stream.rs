//! Stream resolution.
//!
//! Songs come from a single encrypted media playlist named in the
//! webplayback asset list. Music videos come from an HLS master playlist
//! from which one video variant and one audio rendition are chosen. Posts
//! are plain files listed in the item's asset tokens.

use std::collections::HashMap;
use std::sync::Arc;

use reqwest::{Client, Url};
use tracing::{debug, info};

use crate::api::{PlaybackClient, Session};
use crate::config::VideoCodec;
use crate::error::{AmdlError, Result};
use crate::models::TrackMetadata;
use crate::retry::network_error;

/// Webplayback asset flavor for AAC 256 songs.
pub const SONG_FLAVOR: &str = "28:ctrp256";

/// Preferred audio rendition group for music videos.
pub const MUSIC_VIDEO_AUDIO_GROUP: &str = "audio-stereo-256";

/// KEYFORMAT of Widevine keys in media playlists.
pub const WIDEVINE_KEYFORMAT: &str = "urn:uuid:edef8ba9-79d6-4ace-a3c8-27dcd51d21ed";

/// A media playlist and the key URI protecting it.
#[derive(Debug, Clone, PartialEq)]
pub struct EncryptedStream {
    pub url: String,
    /// Full key URI; its last comma-separated field is the protection header.
    pub key_uri: String,
}

/// A variant (`#EXT-X-STREAM-INF`) of a master playlist.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Variant {
    pub uri: String,
    pub bandwidth: u64,
    pub codecs: String,
    pub resolution: Option<String>,
    pub audio_group: Option<String>,
}

/// An alternative rendition (`#EXT-X-MEDIA`).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Rendition {
    pub media_type: String,
    pub group_id: String,
    pub name: String,
    pub uri: Option<String>,
}

/// Parsed master playlist.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MasterPlaylist {
    pub variants: Vec<Variant>,
    pub renditions: Vec<Rendition>,
}

/// Split an HLS attribute list, honoring quoted values.
pub fn parse_attributes(list: &str) -> HashMap<String, String> {
    let mut attrs = HashMap::new();
    let mut rest = list.trim();

    while !rest.is_empty() {
        let Some(eq) = rest.find('=') else { break };
        let key = rest[..eq].trim().to_string();
        rest = &rest[eq + 1..];

        let value;
        if let Some(quoted) = rest.strip_prefix('"') {
            let end = quoted.find('"').unwrap_or(quoted.len());
            value = quoted[..end].to_string();
            rest = quoted.get(end + 1..).unwrap_or("");
            rest = rest.strip_prefix(',').unwrap_or(rest);
        } else {
            let end = rest.find(',').unwrap_or(rest.len());
            value = rest[..end].trim().to_string();
            rest = rest.get(end + 1..).unwrap_or("");
        }
        attrs.insert(key, value);
    }
    attrs
}

/// Parse the variants and renditions of a master playlist.
pub fn parse_master_playlist(text: &str) -> MasterPlaylist {
    let mut playlist = MasterPlaylist::default();
    let mut lines = text.lines().map(str::trim).filter(|l| !l.is_empty());

    while let Some(line) = lines.next() {
        if let Some(attrs) = line.strip_prefix("#EXT-X-STREAM-INF:") {
            let attrs = parse_attributes(attrs);
            // the variant URI is the next non-tag line
            let uri = lines.by_ref().find(|l| !l.starts_with('#'));
            if let Some(uri) = uri {
                playlist.variants.push(Variant {
                    uri: uri.to_string(),
                    bandwidth: attrs
                        .get("BANDWIDTH")
                        .and_then(|b| b.parse().ok())
                        .unwrap_or(0),
                    codecs: attrs.get("CODECS").cloned().unwrap_or_default(),
                    resolution: attrs.get("RESOLUTION").cloned(),
                    audio_group: attrs.get("AUDIO").cloned(),
                });
            }
        } else if let Some(attrs) = line.strip_prefix("#EXT-X-MEDIA:") {
            let attrs = parse_attributes(attrs);
            playlist.renditions.push(Rendition {
                media_type: attrs.get("TYPE").cloned().unwrap_or_default(),
                group_id: attrs.get("GROUP-ID").cloned().unwrap_or_default(),
                name: attrs.get("NAME").cloned().unwrap_or_default(),
                uri: attrs.get("URI").cloned(),
            });
        }
    }
    playlist
}

/// URI of the Widevine `#EXT-X-KEY` in a media playlist.
pub fn find_widevine_key_uri(media_playlist: &str) -> Option<String> {
    media_playlist
        .lines()
        .filter_map(|l| l.trim().strip_prefix("#EXT-X-KEY:"))
        .map(parse_attributes)
        .find(|attrs| {
            attrs
                .get("KEYFORMAT")
                .is_some_and(|f| f.eq_ignore_ascii_case(WIDEVINE_KEYFORMAT))
        })
        .and_then(|mut attrs| attrs.remove("URI"))
}

/// Highest-bandwidth variant matching the codec, or the highest overall.
pub fn select_video_variant(variants: &[Variant], codec: VideoCodec) -> Option<&Variant> {
    let prefix = codec.codec_prefix();
    variants
        .iter()
        .filter(|v| v.codecs.starts_with(prefix))
        .max_by_key(|v| v.bandwidth)
        .or_else(|| variants.iter().max_by_key(|v| v.bandwidth))
}

/// The preferred stereo audio rendition, or the first audio rendition.
pub fn select_audio_rendition(renditions: &[Rendition]) -> Option<&Rendition> {
    let audio = || {
        renditions
            .iter()
            .filter(|r| r.media_type == "AUDIO" && r.uri.is_some())
    };
    audio()
        .find(|r| r.group_id == MUSIC_VIDEO_AUDIO_GROUP)
        .or_else(|| audio().next())
}

/// Vertical resolution implied by an asset token key such as `1080pHdVideo`.
fn asset_rank(key: &str) -> u32 {
    let lower = key.to_lowercase();
    if lower.starts_with("4k") {
        return 2160;
    }
    lower
        .chars()
        .take_while(char::is_ascii_digit)
        .collect::<String>()
        .parse()
        .unwrap_or(0)
}

/// Best direct asset of a post.
pub fn best_post_asset(track: &TrackMetadata) -> Result<String> {
    track
        .attributes
        .asset_tokens
        .as_ref()
        .and_then(|tokens| tokens.iter().max_by_key(|(k, _)| asset_rank(k)))
        .map(|(_, url)| url.clone())
        .ok_or_else(|| AmdlError::Stream(format!("post {} has no assets", track.id)))
}

fn resolve_uri(base: &str, uri: &str) -> Result<String> {
    let base = Url::parse(base).map_err(|e| AmdlError::Stream(format!("bad playlist URL {}: {}", base, e)))?;
    base.join(uri)
        .map(String::from)
        .map_err(|e| AmdlError::Stream(format!("bad playlist URI {}: {}", uri, e)))
}

/// Resolves download URLs and key URIs for queue items.
pub struct StreamResolver {
    client: Client,
    session: Arc<Session>,
    playback: PlaybackClient,
    codec: VideoCodec,
}

impl StreamResolver {
    pub fn new(session: Arc<Session>, codec: VideoCodec) -> Self {
        Self {
            client: session.client().clone(),
            playback: PlaybackClient::new(session.clone()),
            session,
            codec,
        }
    }

    pub fn playback(&self) -> &PlaybackClient {
        &self.playback
    }

    async fn fetch_playlist(&self, url: &str) -> Result<String> {
        let client = &self.client;
        self.session
            .retry()
            .run(|| async move {
                debug!("GET {}", url);
                client
                    .get(url)
                    .send()
                    .await
                    .and_then(|r| r.error_for_status())
                    .map_err(network_error(url))?
                    .text()
                    .await
                    .map_err(network_error(url))
            })
            .await
    }

    async fn encrypted_stream(&self, url: String) -> Result<EncryptedStream> {
        let playlist = self.fetch_playlist(&url).await?;
        let key_uri = find_widevine_key_uri(&playlist)
            .ok_or_else(|| AmdlError::Stream(format!("no Widevine key in {}", url)))?;
        Ok(EncryptedStream { url, key_uri })
    }

    /// Encrypted AAC stream of a song.
    pub async fn song(&self, track_id: &str) -> Result<EncryptedStream> {
        let webplayback = self.playback.get_webplayback(track_id).await?;
        let url = webplayback
            .asset_url(SONG_FLAVOR)
            .ok_or_else(|| AmdlError::Stream(format!("no {} asset for {}", SONG_FLAVOR, track_id)))?
            .to_string();
        self.encrypted_stream(url).await
    }

    /// Video and audio streams of a music video.
    pub async fn music_video(&self, track_id: &str) -> Result<(EncryptedStream, EncryptedStream)> {
        let webplayback = self.playback.get_webplayback(track_id).await?;
        let master_url = webplayback
            .hls_playlist_url
            .ok_or_else(|| AmdlError::Stream(format!("no HLS playlist for {}", track_id)))?;
        let master = parse_master_playlist(&self.fetch_playlist(&master_url).await?);

        let variant = select_video_variant(&master.variants, self.codec)
            .ok_or_else(|| AmdlError::Stream(format!("no video variant for {}", track_id)))?;
        let audio = select_audio_rendition(&master.renditions)
            .and_then(|r| r.uri.as_deref())
            .ok_or_else(|| AmdlError::Stream(format!("no audio rendition for {}", track_id)))?;
        info!(
            "Selected {} @ {} bps ({})",
            variant.resolution.as_deref().unwrap_or("?"),
            variant.bandwidth,
            variant.codecs
        );

        let video = self.encrypted_stream(resolve_uri(&master_url, &variant.uri)?).await?;
        let audio = self.encrypted_stream(resolve_uri(&master_url, audio)?).await?;
        Ok((video, audio))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Endpoints;
    use crate::retry::RetryPolicy;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const MASTER: &str = r#"#EXTM3U
#EXT-X-MEDIA:TYPE=AUDIO,GROUP-ID="audio-stereo-64",NAME="English",URI="audio64/prog.m3u8"
#EXT-X-MEDIA:TYPE=AUDIO,GROUP-ID="audio-stereo-256",NAME="English",URI="audio256/prog.m3u8"
#EXT-X-STREAM-INF:BANDWIDTH=2000000,CODECS="avc1.640028,mp4a.40.2",RESOLUTION=1280x720,AUDIO="audio-stereo-256"
avc720/prog.m3u8
#EXT-X-STREAM-INF:BANDWIDTH=6000000,CODECS="avc1.640028,mp4a.40.2",RESOLUTION=1920x1080,AUDIO="audio-stereo-256"
avc1080/prog.m3u8
#EXT-X-STREAM-INF:BANDWIDTH=9000000,CODECS="hvc1.2.4.L150,mp4a.40.2",RESOLUTION=3840x2160,AUDIO="audio-stereo-256"
hvc2160/prog.m3u8
"#;

    fn media(key: &str) -> String {
        format!(
            "#EXTM3U\n\
             #EXT-X-KEY:METHOD=SAMPLE-AES,URI=\"skd://itunes.apple.com/P000000000/s1/e1\",KEYFORMAT=\"com.apple.streamingkeydelivery\"\n\
             #EXT-X-KEY:METHOD=SAMPLE-AES-CTR,URI=\"{}\",KEYFORMAT=\"{}\",KEYFORMATVERSIONS=\"1\"\n\
             #EXTINF:6,\nseg0.mp4\n",
            key, WIDEVINE_KEYFORMAT
        )
    }

    #[test]
    fn test_parse_attributes_with_quoted_commas() {
        let attrs = parse_attributes(r#"BANDWIDTH=100,CODECS="avc1.64,mp4a.40.2",RESOLUTION=1x1"#);
        assert_eq!(attrs["BANDWIDTH"], "100");
        assert_eq!(attrs["CODECS"], "avc1.64,mp4a.40.2");
        assert_eq!(attrs["RESOLUTION"], "1x1");
    }

    #[test]
    fn test_variant_selection_by_codec() {
        let master = parse_master_playlist(MASTER);
        assert_eq!(master.variants.len(), 3);

        let h264 = select_video_variant(&master.variants, VideoCodec::H264).unwrap();
        assert_eq!(h264.uri, "avc1080/prog.m3u8");
        let h265 = select_video_variant(&master.variants, VideoCodec::H265).unwrap();
        assert_eq!(h265.uri, "hvc2160/prog.m3u8");

        let audio = select_audio_rendition(&master.renditions).unwrap();
        assert_eq!(audio.uri.as_deref(), Some("audio256/prog.m3u8"));
    }

    #[test]
    fn test_codec_fallback_to_best_overall() {
        let variants = vec![Variant {
            uri: "only.m3u8".into(),
            bandwidth: 1,
            codecs: "avc1.4d".into(),
            ..Default::default()
        }];
        assert_eq!(
            select_video_variant(&variants, VideoCodec::H265).unwrap().uri,
            "only.m3u8"
        );
    }

    #[test]
    fn test_find_widevine_key() {
        let key = "data:text/plain;base64,AAAAOHBzc2g=";
        assert_eq!(find_widevine_key_uri(&media(key)).as_deref(), Some(key));
        assert_eq!(find_widevine_key_uri("#EXTM3U\n"), None);
    }

    #[test]
    fn test_best_post_asset() {
        let track: TrackMetadata = serde_json::from_value(json!({
            "id": "p1",
            "type": "uploaded-videos",
            "attributes": {"name": "Post", "assetTokens": {
                "sdVideo": "https://a/sd.mp4",
                "1080pHdVideo": "https://a/1080.mp4",
                "720pHdVideo": "https://a/720.mp4"
            }}
        }))
        .unwrap();
        assert_eq!(best_post_asset(&track).unwrap(), "https://a/1080.mp4");

        let empty = TrackMetadata::default();
        assert!(matches!(best_post_asset(&empty), Err(AmdlError::Stream(_))));
    }

    #[tokio::test]
    async fn test_resolve_music_video_streams() {
        let server = MockServer::start().await;
        let master_url = format!("{}/mv/master.m3u8", server.uri());
        Mock::given(method("POST"))
            .and(path("/webPlayback"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "songList": [{"hls-playlist-url": master_url}]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/mv/master.m3u8"))
            .respond_with(ResponseTemplate::new(200).set_body_string(MASTER))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/mv/avc1080/prog.m3u8"))
            .respond_with(ResponseTemplate::new(200).set_body_string(media("data:;base64,VIDEO")))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/mv/audio256/prog.m3u8"))
            .respond_with(ResponseTemplate::new(200).set_body_string(media("data:;base64,AUDIO")))
            .mount(&server)
            .await;

        let endpoints = Endpoints {
            webplayback: format!("{}/webPlayback", server.uri()),
            ..Endpoints::default()
        };
        let session = Session::with_token("eyJh", "mut", "us", "en-US", endpoints)
            .unwrap()
            .with_retry_policy(RetryPolicy::none());
        let resolver = StreamResolver::new(Arc::new(session), VideoCodec::H264);

        let (video, audio) = resolver.music_video("mv1").await.unwrap();
        assert_eq!(video.url, format!("{}/mv/avc1080/prog.m3u8", server.uri()));
        assert_eq!(video.key_uri, "data:;base64,VIDEO");
        assert_eq!(audio.key_uri, "data:;base64,AUDIO");
    }
}
