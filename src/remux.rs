//! Decrypt and repackage downloaded streams into the final container.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::{Config, RemuxMode, ToolPaths};
use crate::download::run_tool;
use crate::error::{AmdlError, Result};

/// An encrypted input and the hex key that unlocks it.
#[derive(Debug, Clone, Copy)]
pub struct EncryptedInput<'a> {
    pub path: &'a Path,
    pub key: &'a str,
}

fn os(args: &[&str]) -> Vec<OsString> {
    args.iter().map(OsString::from).collect()
}

/// ffmpeg arguments decrypting every input and copying the streams.
pub fn ffmpeg_args(inputs: &[EncryptedInput<'_>], output: &Path) -> Vec<OsString> {
    let mut args = os(&["-loglevel", "error", "-y"]);
    for input in inputs {
        args.extend(os(&["-decryption_key", input.key, "-i"]));
        args.push(input.path.as_os_str().to_owned());
    }
    if inputs.len() > 1 {
        args.extend(os(&["-map", "0:v", "-map", "1:a"]));
    }
    args.extend(os(&["-c", "copy", "-movflags", "+faststart"]));
    args.push(output.as_os_str().to_owned());
    args
}

pub fn mp4decrypt_args(input: &EncryptedInput<'_>, output: &Path) -> Vec<OsString> {
    let mut args = os(&["--key", &format!("1:{}", input.key)]);
    args.push(input.path.as_os_str().to_owned());
    args.push(output.as_os_str().to_owned());
    args
}

pub fn mp4box_args(decrypted: &[PathBuf], output: &Path) -> Vec<OsString> {
    let mut args = os(&["-quiet"]);
    for path in decrypted {
        args.push("-add".into());
        args.push(path.as_os_str().to_owned());
    }
    args.extend(os(&["-itags", "title=placeholder", "-new"]));
    args.push(output.as_os_str().to_owned());
    args
}

/// Remux backend.
#[derive(Debug, Clone)]
pub struct Remuxer {
    mode: RemuxMode,
    tools: ToolPaths,
}

impl Remuxer {
    pub fn new(mode: RemuxMode, tools: ToolPaths) -> Self {
        Self { mode, tools }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.remux_mode, config.tools.clone())
    }

    /// Decrypt `inputs` (one for songs, video then audio for music videos)
    /// into `output`.
    pub async fn remux(&self, inputs: &[EncryptedInput<'_>], output: &Path) -> Result<()> {
        if inputs.is_empty() {
            return Err(AmdlError::Remux("nothing to remux".to_string()));
        }
        debug!("Remuxing {} input(s) into {}", inputs.len(), output.display());

        match self.mode {
            RemuxMode::Ffmpeg => {
                run_tool(&self.tools.ffmpeg, &ffmpeg_args(inputs, output), AmdlError::Remux).await
            }
            RemuxMode::Mp4box => {
                let mut decrypted = Vec::with_capacity(inputs.len());
                for input in inputs {
                    let target = decrypted_path(input.path);
                    run_tool(
                        &self.tools.mp4decrypt,
                        &mp4decrypt_args(input, &target),
                        AmdlError::Remux,
                    )
                    .await?;
                    decrypted.push(target);
                }
                run_tool(&self.tools.mp4box, &mp4box_args(&decrypted, output), AmdlError::Remux)
                    .await
            }
        }
    }
}

/// `dir/x_encrypted.m4a` → `dir/x_encrypted_decrypted.m4a`.
fn decrypted_path(encrypted: &Path) -> PathBuf {
    let stem = encrypted
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = encrypted
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    encrypted.with_file_name(format!("{}_decrypted{}", stem, ext))
}
