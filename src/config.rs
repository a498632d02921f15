//! Configuration.
//!
//! Loaded from `<config dir>/amdl/config.toml` (or an explicit path); every
//! field has a default so a partial file is fine. The CLI applies its flags
//! on top of the loaded value.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{AmdlError, Result};

/// Download backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DownloadMode {
    /// General-purpose downloader (yt-dlp).
    #[default]
    Ytdlp,
    /// Segment-merging downloader (N_m3u8DL-RE).
    Nm3u8dlre,
}

/// Remux backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RemuxMode {
    #[default]
    Ffmpeg,
    /// mp4decrypt followed by MP4Box.
    Mp4box,
}

/// Cover art format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CoverFormat {
    #[default]
    Jpg,
    Png,
    /// Original upload; never embedded, only saved next to the media.
    Raw,
}

impl CoverFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            CoverFormat::Jpg => "jpg",
            CoverFormat::Png => "png",
            CoverFormat::Raw => "raw",
        }
    }
}

/// Preferred music video codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum VideoCodec {
    #[default]
    H264,
    H265,
}

impl VideoCodec {
    /// CODECS attribute prefix in HLS master playlists.
    pub fn codec_prefix(&self) -> &'static str {
        match self {
            VideoCodec::H264 => "avc1",
            VideoCodec::H265 => "hvc1",
        }
    }
}

macro_rules! impl_str_enum {
    ($ty:ty, $($variant:path => $name:literal),+ $(,)?) => {
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                match self {
                    $($variant => write!(f, $name),)+
                }
            }
        }

        impl FromStr for $ty {
            type Err = AmdlError;

            fn from_str(s: &str) -> Result<Self> {
                match s.to_lowercase().as_str() {
                    $($name => Ok($variant),)+
                    _ => Err(AmdlError::Config(format!(
                        "invalid value {:?} for {}",
                        s,
                        stringify!($ty)
                    ))),
                }
            }
        }
    };
}

impl_str_enum!(DownloadMode, DownloadMode::Ytdlp => "ytdlp", DownloadMode::Nm3u8dlre => "nm3u8dlre");
impl_str_enum!(RemuxMode, RemuxMode::Ffmpeg => "ffmpeg", RemuxMode::Mp4box => "mp4box");
impl_str_enum!(CoverFormat, CoverFormat::Jpg => "jpg", CoverFormat::Png => "png", CoverFormat::Raw => "raw");
impl_str_enum!(VideoCodec, VideoCodec::H264 => "h264", VideoCodec::H265 => "h265");

/// Naming templates.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Templates {
    pub folder_album: String,
    pub folder_compilation: String,
    pub folder_no_album: String,
    pub file_single_disc: String,
    pub file_multi_disc: String,
    pub file_no_album: String,
    pub file_playlist: String,
    /// strftime pattern for the `date` tag.
    pub date: String,
}

impl Default for Templates {
    fn default() -> Self {
        Self {
            folder_album: "{album_artist}/{album}".to_string(),
            folder_compilation: "Compilations/{album}".to_string(),
            folder_no_album: "{artist}/Unknown Album".to_string(),
            file_single_disc: "{track:02d} {title}".to_string(),
            file_multi_disc: "{disc}-{track:02d} {title}".to_string(),
            file_no_album: "{title}".to_string(),
            file_playlist: "Playlists/{playlist_artist}/{playlist_title}".to_string(),
            date: "%Y-%m-%dT%H:%M:%SZ".to_string(),
        }
    }
}

/// Remote CDM service settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CdmConfig {
    /// Base URL of the CDM service.
    pub url: String,
    /// Value of the `X-Secret-Key` header.
    pub secret: String,
    /// Device name on the service; `None` selects its built-in device.
    pub device: Option<String>,
}

impl Default for CdmConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8786".to_string(),
            secret: String::new(),
            device: None,
        }
    }
}

/// Paths or names of external tools.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ToolPaths {
    pub ytdlp: String,
    pub nm3u8dlre: String,
    pub ffmpeg: String,
    pub mp4decrypt: String,
    pub mp4box: String,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            ytdlp: "yt-dlp".to_string(),
            nm3u8dlre: "N_m3u8DL-RE".to_string(),
            ffmpeg: "ffmpeg".to_string(),
            mp4decrypt: "mp4decrypt".to_string(),
            mp4box: "MP4Box".to_string(),
        }
    }
}

/// Remote endpoints. Overridable so the clients can be pointed elsewhere.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Endpoints {
    pub homepage: String,
    pub amp_api: String,
    pub webplayback: String,
    pub license: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            homepage: "https://beta.music.apple.com".to_string(),
            amp_api: "https://amp-api.music.apple.com".to_string(),
            webplayback: "https://play.itunes.apple.com/WebObjects/MZPlay.woa/wa/webPlayback"
                .to_string(),
            license:
                "https://play.itunes.apple.com/WebObjects/MZPlay.woa/wa/acquireWebPlaybackLicense"
                    .to_string(),
        }
    }
}

/// Full configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Netscape-format cookies exported from a logged-in browser session.
    pub cookies_path: Option<PathBuf>,
    /// Storefront used when the cookies do not carry one.
    pub storefront: String,
    pub language: String,
    pub output_path: PathBuf,
    pub temp_path: PathBuf,
    pub cdm: CdmConfig,
    pub download_mode: DownloadMode,
    pub remux_mode: RemuxMode,
    pub tools: ToolPaths,
    pub codec_music_video: VideoCodec,
    pub cover_format: CoverFormat,
    pub cover_size: u32,
    pub save_cover: bool,
    /// Explicit file name length; values below 4 are ignored.
    pub truncate: Option<usize>,
    /// Comma-separated tag names to leave out.
    pub exclude_tags: Option<String>,
    pub templates: Templates,
    pub overwrite: bool,
    pub save_playlist: bool,
    pub synced_lyrics_only: bool,
    pub no_synced_lyrics: bool,
    pub disable_music_video_skip: bool,
    pub endpoints: Endpoints,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cookies_path: Some(PathBuf::from("./cookies.txt")),
            storefront: "us".to_string(),
            language: "en-US".to_string(),
            output_path: PathBuf::from("./Apple Music"),
            temp_path: PathBuf::from("./temp"),
            cdm: CdmConfig::default(),
            download_mode: DownloadMode::default(),
            remux_mode: RemuxMode::default(),
            tools: ToolPaths::default(),
            codec_music_video: VideoCodec::default(),
            cover_format: CoverFormat::default(),
            cover_size: 1200,
            save_cover: false,
            truncate: None,
            exclude_tags: None,
            templates: Templates::default(),
            overwrite: false,
            save_playlist: false,
            synced_lyrics_only: false,
            no_synced_lyrics: false,
            disable_music_video_skip: false,
            endpoints: Endpoints::default(),
        }
    }
}

impl Config {
    /// Directory holding the config file.
    pub fn config_dir() -> Result<PathBuf> {
        dirs::config_dir()
            .ok_or_else(|| AmdlError::Config("Could not find config directory".to_string()))
            .map(|dir| dir.join("amdl"))
    }

    /// Default config file location.
    pub fn default_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load from the default location, or defaults when no file exists.
    pub fn load() -> Result<Self> {
        let path = Self::default_path()?;
        if path.exists() {
            Self::load_from(&path)
        } else {
            debug!("No config file at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Load from an explicit path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            AmdlError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config = Self::from_toml(&content)?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| AmdlError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Write the configuration to `path`, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| AmdlError::filesystem(parent, e))?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| AmdlError::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content).map_err(|e| AmdlError::filesystem(path, e))?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// Lower-cased tag names from `exclude_tags`.
    pub fn exclude_tags_list(&self) -> Vec<String> {
        self.exclude_tags
            .as_deref()
            .map(|s| {
                s.split(',')
                    .map(|t| t.trim().to_lowercase())
                    .filter(|t| !t.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Effective truncate length.
    pub fn effective_truncate(&self) -> Option<usize> {
        self.truncate.filter(|t| *t >= 4)
    }
}
