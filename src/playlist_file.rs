//! Positional `.m3u8` playlist maintenance.
//!
//! Line N of the playlist file always holds track N, as a path relative to
//! the playlist's folder. Re-running a track rewrites only its own line.

use std::path::{Component, Path, PathBuf};

use tracing::debug;

use crate::error::{AmdlError, Result};

/// Writes playlist entries below a fixed output root.
#[derive(Debug, Clone)]
pub struct PlaylistFileWriter {
    output_path: PathBuf,
}

fn outside_root(path: &Path, root: &Path) -> AmdlError {
    AmdlError::filesystem(
        path,
        std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("{} is outside the output root {}", path.display(), root.display()),
        ),
    )
}

fn normal_parts(path: &Path) -> Vec<String> {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect()
}

impl PlaylistFileWriter {
    pub fn new(output_path: impl Into<PathBuf>) -> Self {
        Self {
            output_path: output_path.into(),
        }
    }

    /// Entry for `track_path` as seen from the folder of `playlist_path`:
    /// one `..` per folder level below the root, then the track path below
    /// the root, `/`-separated.
    pub fn relative_entry(&self, playlist_path: &Path, track_path: &Path) -> Result<String> {
        let root = &self.output_path;
        let playlist_dir = playlist_path
            .parent()
            .ok_or_else(|| outside_root(playlist_path, root))?;
        let playlist_rel = playlist_dir
            .strip_prefix(root)
            .map_err(|_| outside_root(playlist_path, root))?;
        let track_rel = track_path
            .strip_prefix(root)
            .map_err(|_| outside_root(track_path, root))?;

        let mut parts: Vec<String> = vec!["..".to_string(); normal_parts(playlist_rel).len()];
        parts.extend(normal_parts(track_rel));
        Ok(parts.join("/"))
    }

    /// Write `track_path` at 1-based `position`, padding with blank lines.
    pub fn update(&self, playlist_path: &Path, track_path: &Path, position: usize) -> Result<()> {
        if position == 0 {
            return Err(AmdlError::filesystem(
                playlist_path,
                std::io::Error::new(std::io::ErrorKind::InvalidInput, "positions start at 1"),
            ));
        }
        let entry = self.relative_entry(playlist_path, track_path)?;

        if let Some(parent) = playlist_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| AmdlError::filesystem(parent, e))?;
        }

        let mut lines: Vec<String> = match std::fs::read_to_string(playlist_path) {
            Ok(content) => content.lines().map(str::to_string).collect(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(AmdlError::filesystem(playlist_path, e)),
        };
        if lines.len() < position {
            lines.resize(position, String::new());
        }
        lines[position - 1] = entry;

        let mut content = lines.join("\n");
        content.push('\n');
        std::fs::write(playlist_path, content).map_err(|e| AmdlError::filesystem(playlist_path, e))?;
        debug!("Playlist {} line {} updated", playlist_path.display(), position);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relative_entry() {
        let writer = PlaylistFileWriter::new("/out");
        let entry = writer
            .relative_entry(
                Path::new("/out/Playlists/Curator/Mix.m3u8"),
                Path::new("/out/Artist/Album/01 Song.m4a"),
            )
            .unwrap();
        assert_eq!(entry, "../../Artist/Album/01 Song.m4a");
    }

    #[test]
    fn test_position_three_then_one() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let writer = PlaylistFileWriter::new(root);
        let playlist = root.join("Playlists").join("Curator").join("Mix.m3u8");

        writer
            .update(&playlist, &root.join("A").join("B").join("03 Third.m4a"), 3)
            .unwrap();
        assert_eq!(
            std::fs::read_to_string(&playlist).unwrap(),
            "\n\n../../A/B/03 Third.m4a\n"
        );

        writer
            .update(&playlist, &root.join("A").join("B").join("01 First.m4a"), 1)
            .unwrap();
        assert_eq!(
            std::fs::read_to_string(&playlist).unwrap(),
            "../../A/B/01 First.m4a\n\n../../A/B/03 Third.m4a\n"
        );
    }

    #[test]
    fn test_rerun_touches_only_its_line() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let writer = PlaylistFileWriter::new(root);
        let playlist = root.join("P.m3u8");

        for (n, name) in ["a.m4a", "b.m4a", "c.m4a"].iter().enumerate() {
            writer.update(&playlist, &root.join(name), n + 1).unwrap();
        }
        writer.update(&playlist, &root.join("b2.m4a"), 2).unwrap();
        assert_eq!(std::fs::read_to_string(&playlist).unwrap(), "a.m4a\nb2.m4a\nc.m4a\n");
    }

    #[test]
    fn test_paths_outside_root_are_rejected() {
        let writer = PlaylistFileWriter::new("/out");
        let result = writer.relative_entry(Path::new("/elsewhere/Mix.m3u8"), Path::new("/out/a.m4a"));
        assert!(matches!(result, Err(AmdlError::Filesystem { .. })));

        let result = writer.relative_entry(Path::new("/out/Mix.m3u8"), Path::new("/tmp/a.m4a"));
        assert!(matches!(result, Err(AmdlError::Filesystem { .. })));
    }
}
