//! Download backends.
//!
//! Encrypted streams are fetched by an external tool chosen in the
//! configuration. Unencrypted post assets are streamed directly over HTTP.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

use crate::config::{Config, DownloadMode};
use crate::error::{AmdlError, Result};
use crate::retry::network_error;

/// Resolve a tool name or path to an executable.
pub fn resolve_binary(name_or_path: &str) -> Option<PathBuf> {
    which::which(name_or_path).ok()
}

/// Run an external tool to completion, mapping failures through `wrap`.
pub(crate) async fn run_tool(
    binary: &str,
    args: &[OsString],
    wrap: fn(String) -> AmdlError,
) -> Result<()> {
    let path = resolve_binary(binary).ok_or_else(|| wrap(format!("{} not found", binary)))?;
    debug!("Running {} {:?}", path.display(), args);

    let output = Command::new(&path)
        .args(args)
        .output()
        .await
        .map_err(|e| wrap(format!("Failed to execute {}: {}", binary, e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(wrap(format!(
            "{} exited with {}: {}",
            binary,
            output.status,
            stderr.trim()
        )));
    }
    Ok(())
}

/// A tool that saves an HLS stream to a file.
#[async_trait]
pub trait DownloadBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Fetch `stream_url` into `path`. No retries.
    async fn download(&self, path: &Path, stream_url: &str) -> Result<()>;
}

/// yt-dlp with the generic extractor.
#[derive(Debug, Clone)]
pub struct YtDlp {
    binary: String,
}

impl YtDlp {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    pub fn args(path: &Path, stream_url: &str) -> Vec<OsString> {
        let mut args: Vec<OsString> = ["--quiet", "--no-warnings", "--output"]
            .iter()
            .map(OsString::from)
            .collect();
        args.push(path.as_os_str().to_owned());
        args.extend(
            [
                "--allow-unplayable-formats",
                "--fixup",
                "never",
                "--use-extractors",
                "generic",
                stream_url,
            ]
            .iter()
            .map(OsString::from),
        );
        args
    }
}

#[async_trait]
impl DownloadBackend for YtDlp {
    fn name(&self) -> &str {
        "yt-dlp"
    }

    async fn download(&self, path: &Path, stream_url: &str) -> Result<()> {
        run_tool(&self.binary, &Self::args(path, stream_url), AmdlError::Download).await
    }
}

/// N_m3u8DL-RE with binary merge.
#[derive(Debug, Clone)]
pub struct Nm3u8dlRe {
    binary: String,
    ffmpeg: String,
}

impl Nm3u8dlRe {
    pub fn new(binary: impl Into<String>, ffmpeg: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            ffmpeg: ffmpeg.into(),
        }
    }

    pub fn args(path: &Path, stream_url: &str, ffmpeg: &Path) -> Result<Vec<OsString>> {
        let dir = path
            .parent()
            .ok_or_else(|| AmdlError::Download(format!("{} has no parent", path.display())))?;
        let stem = path
            .file_stem()
            .ok_or_else(|| AmdlError::Download(format!("{} has no file name", path.display())))?;

        let mut args: Vec<OsString> = [
            stream_url,
            "--binary-merge",
            "--no-log",
            "--log-level",
            "off",
            "--ffmpeg-binary-path",
        ]
        .iter()
        .map(OsString::from)
        .collect();
        args.push(ffmpeg.as_os_str().to_owned());
        args.push("--save-dir".into());
        args.push(dir.as_os_str().to_owned());
        args.push("--save-name".into());
        args.push(stem.to_owned());
        Ok(args)
    }
}

#[async_trait]
impl DownloadBackend for Nm3u8dlRe {
    fn name(&self) -> &str {
        "N_m3u8DL-RE"
    }

    async fn download(&self, path: &Path, stream_url: &str) -> Result<()> {
        let ffmpeg = resolve_binary(&self.ffmpeg)
            .ok_or_else(|| AmdlError::Download(format!("{} not found", self.ffmpeg)))?;
        let args = Self::args(path, stream_url, &ffmpeg)?;
        run_tool(&self.binary, &args, AmdlError::Download).await
    }
}

/// Backend selected by the configuration.
pub fn backend_for(config: &Config) -> Box<dyn DownloadBackend> {
    match config.download_mode {
        DownloadMode::Ytdlp => Box::new(YtDlp::new(&config.tools.ytdlp)),
        DownloadMode::Nm3u8dlre => {
            Box::new(Nm3u8dlRe::new(&config.tools.nm3u8dlre, &config.tools.ffmpeg))
        }
    }
}

/// Stream a plain file to `path`.
pub async fn download_direct(client: &reqwest::Client, path: &Path, url: &str) -> Result<u64> {
    let response = client
        .get(url)
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(network_error(url))?;

    let mut file = tokio::fs::File::create(path)
        .await
        .map_err(|e| AmdlError::filesystem(path, e))?;
    let mut stream = response.bytes_stream();
    let mut written = 0u64;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(network_error(url))?;
        file.write_all(&chunk)
            .await
            .map_err(|e| AmdlError::filesystem(path, e))?;
        written += chunk.len() as u64;
    }
    file.flush().await.map_err(|e| AmdlError::filesystem(path, e))?;

    info!("Downloaded {} bytes to {}", written, path.display());
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path as url_path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn strings(args: &[OsString]) -> Vec<String> {
        args.iter().map(|a| a.to_string_lossy().into_owned()).collect()
    }

    #[test]
    fn test_ytdlp_args() {
        let args = YtDlp::args(Path::new("/tmp/1_encrypted.m4a"), "https://a/p.m3u8");
        assert_eq!(
            strings(&args),
            [
                "--quiet",
                "--no-warnings",
                "--output",
                "/tmp/1_encrypted.m4a",
                "--allow-unplayable-formats",
                "--fixup",
                "never",
                "--use-extractors",
                "generic",
                "https://a/p.m3u8",
            ]
        );
    }

    #[test]
    fn test_nm3u8dlre_args() {
        let args = Nm3u8dlRe::args(
            Path::new("/tmp/work/1_encrypted.m4a"),
            "https://a/p.m3u8",
            Path::new("/usr/bin/ffmpeg"),
        )
        .unwrap();
        assert_eq!(
            strings(&args),
            [
                "https://a/p.m3u8",
                "--binary-merge",
                "--no-log",
                "--log-level",
                "off",
                "--ffmpeg-binary-path",
                "/usr/bin/ffmpeg",
                "--save-dir",
                "/tmp/work",
                "--save-name",
                "1_encrypted",
            ]
        );
    }

    #[tokio::test]
    async fn test_missing_binary_is_download_error() {
        let backend = YtDlp::new("definitely-not-a-real-downloader-xyz");
        let err = backend
            .download(Path::new("/tmp/x.m4a"), "https://a")
            .await
            .unwrap_err();
        match err {
            AmdlError::Download(msg) => assert!(msg.contains("definitely-not-a-real-downloader-xyz")),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_backend_selection() {
        let mut config = Config::default();
        assert_eq!(backend_for(&config).name(), "yt-dlp");
        config.download_mode = DownloadMode::Nm3u8dlre;
        assert_eq!(backend_for(&config).name(), "N_m3u8DL-RE");
    }

    #[tokio::test]
    async fn test_download_direct() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(url_path("/post.mp4"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![7u8; 4096]))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("post.m4v");
        let written = download_direct(
            &reqwest::Client::new(),
            &target,
            &format!("{}/post.mp4", server.uri()),
        )
        .await
        .unwrap();

        assert_eq!(written, 4096);
        assert_eq!(std::fs::read(&target).unwrap().len(), 4096);
    }
}
