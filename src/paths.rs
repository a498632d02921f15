//! Output path rendering.
//!
//! Templates use `{name}` placeholders with an optional integer format spec
//! (`{track:02d}`) and `{{`/`}}` escapes. A template is split on `/`; every
//! rendered segment is sanitized on its own, folders and files with
//! different length limits.

use std::path::{Path, PathBuf};

use crate::config::{Config, Templates};
use crate::error::{AmdlError, Result};
use crate::tags::{PlaylistTags, TemplateContext, TemplateValue};

/// Characters replaced in every path segment.
pub const ILLEGAL_CHARS: &[char] = &['\\', '/', ':', '*', '?', '"', '<', '>', '|', ';'];

pub const ILLEGAL_CHAR_REPLACEMENT: char = '_';

/// Maximum folder segment length.
pub const FOLDER_MAX_LEN: usize = 225;

/// Maximum file name length before the extension allowance.
pub const FILE_MAX_LEN: usize = 255;

/// Extra room kept free in file names.
const FILE_NAME_MARGIN: usize = 10;

fn invalid(template: &str, reason: impl Into<String>) -> AmdlError {
    AmdlError::InvalidTemplate {
        template: template.to_string(),
        reason: reason.into(),
    }
}

/// Apply a format spec (`d`, `2d`, `02d`) to an integer.
fn format_int(value: i64, spec: &str, template: &str) -> Result<String> {
    let digits = spec
        .strip_suffix('d')
        .ok_or_else(|| invalid(template, format!("unsupported format spec {:?}", spec)))?;
    if digits.is_empty() {
        return Ok(value.to_string());
    }
    let zero_pad = digits.starts_with('0');
    let width: usize = digits
        .parse()
        .map_err(|_| invalid(template, format!("unsupported format spec {:?}", spec)))?;
    Ok(if zero_pad {
        format!("{:0width$}", value, width = width)
    } else {
        format!("{:width$}", value, width = width)
    })
}

/// Render a single template against a context.
pub fn render(template: &str, ctx: &dyn TemplateContext) -> Result<String> {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '}' => return Err(invalid(template, "single '}' encountered")),
            '{' => {
                let mut field = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some('{') | None => return Err(invalid(template, "unclosed '{'")),
                        Some(c) => field.push(c),
                    }
                }
                let (name, spec) = match field.split_once(':') {
                    Some((name, spec)) => (name, Some(spec)),
                    None => (field.as_str(), None),
                };
                let value = ctx
                    .value(name)
                    .ok_or_else(|| invalid(template, format!("unknown placeholder {:?}", name)))?;
                match (value, spec) {
                    (TemplateValue::Text(s), None) => out.push_str(&s),
                    (TemplateValue::Int(i), None) => out.push_str(&i.to_string()),
                    (TemplateValue::Int(i), Some(spec)) => {
                        out.push_str(&format_int(i, spec, template)?)
                    }
                    (TemplateValue::Text(_), Some(spec)) => {
                        return Err(invalid(
                            template,
                            format!("format spec {:?} on text placeholder {:?}", spec, name),
                        ))
                    }
                }
            }
            c => out.push(c),
        }
    }
    Ok(out)
}

/// Replace illegal characters, cut to `max_len` characters and trim.
pub fn sanitize(name: &str, max_len: usize) -> String {
    let replaced: String = name
        .chars()
        .map(|c| {
            if ILLEGAL_CHARS.contains(&c) {
                ILLEGAL_CHAR_REPLACEMENT
            } else {
                c
            }
        })
        .take(max_len)
        .collect();
    replaced.trim().to_string()
}

/// Final and playlist path builder.
#[derive(Debug, Clone)]
pub struct PathTemplateEngine {
    output_path: PathBuf,
    templates: Templates,
    truncate: Option<usize>,
}

impl PathTemplateEngine {
    pub fn new(output_path: impl Into<PathBuf>, templates: Templates, truncate: Option<usize>) -> Self {
        Self {
            output_path: output_path.into(),
            templates,
            truncate: truncate.filter(|t| *t >= 4),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.output_path.clone(),
            config.templates.clone(),
            config.truncate,
        )
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    pub fn sanitize_folder(&self, name: &str) -> String {
        sanitize(name, FOLDER_MAX_LEN)
    }

    /// `extension` includes the leading dot.
    pub fn sanitize_file(&self, name: &str, extension: &str) -> String {
        let max_len = self.truncate.unwrap_or_else(|| {
            FILE_MAX_LEN.saturating_sub(extension.chars().count() + FILE_NAME_MARGIN)
        });
        sanitize(name, max_len)
    }

    /// Folder and file templates for a track.
    fn templates_for(&self, tags: &crate::tags::Tags) -> (&str, &str) {
        let t = &self.templates;
        if tags.has_album() {
            let folder = if tags.compilation {
                &t.folder_compilation
            } else {
                &t.folder_album
            };
            let file = if tags.disc_total > 1 {
                &t.file_multi_disc
            } else {
                &t.file_single_disc
            };
            (folder.as_str(), file.as_str())
        } else {
            (t.folder_no_album.as_str(), t.file_no_album.as_str())
        }
    }

    /// Output root + sanitized folder segments + sanitized file segment +
    /// extension.
    pub fn final_path(&self, tags: &crate::tags::Tags, extension: &str) -> Result<PathBuf> {
        let (folder, file) = self.templates_for(tags);
        let segments: Vec<&str> = folder.split('/').chain(file.split('/')).collect();
        let (last, folders) = segments
            .split_last()
            .ok_or_else(|| invalid(file, "empty template"))?;

        let mut path = self.output_path.clone();
        for segment in folders {
            path.push(self.sanitize_folder(&render(segment, tags)?));
        }
        let file_name = self.sanitize_file(&render(last, tags)?, extension);
        if file_name.is_empty() {
            return Err(invalid(last, "file name renders empty"));
        }
        path.push(format!("{}{}", file_name, extension));
        Ok(path)
    }

    /// Output root + playlist template segments (all sanitized as folders)
    /// + `.m3u8`.
    pub fn playlist_path(&self, tags: &PlaylistTags) -> Result<PathBuf> {
        let template = &self.templates.file_playlist;
        let mut path = self.output_path.clone();
        let segments: Vec<&str> = template.split('/').collect();
        let (last, folders) = segments
            .split_last()
            .ok_or_else(|| invalid(template, "empty template"))?;
        for segment in folders {
            path.push(self.sanitize_folder(&render(segment, tags)?));
        }
        path.push(format!("{}.m3u8", self.sanitize_folder(&render(last, tags)?)));
        Ok(path)
    }
}
