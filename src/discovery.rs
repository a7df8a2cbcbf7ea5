//! # Media Discovery
//!
//! Pure classification helpers used to build a batch: which files count as
//! media, which files a folder contains, and whether a URL points at a known
//! video host. Nothing here touches the orchestrator.

use std::path::{Path, PathBuf};
use tracing::debug;
use url::Url;

/// File extensions recognized as transcribable media (lowercase, no dot).
pub const MEDIA_EXTENSIONS: [&str; 10] = [
    "mp3", "mp4", "wav", "ogg", "flac", "avi", "mov", "mkv", "webm", "m4a",
];

/// Hosts recognized as video-hosting links.
pub const VIDEO_HOSTS: [&str; 5] = [
    "youtube.com",
    "www.youtube.com",
    "youtu.be",
    "www.youtu.be",
    "m.youtube.com",
];

/// Whether `path` has a media extension (case-insensitive). Does not touch the disk.
pub fn is_media_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| MEDIA_EXTENSIONS.iter().any(|m| m.eq_ignore_ascii_case(ext)))
        .unwrap_or(false)
}

/// All media files under `dir`, recursively, sorted by path.
///
/// A path that is not a directory yields an empty list. Unreadable
/// subdirectories are skipped.
pub fn find_media_files(dir: &Path) -> Vec<PathBuf> {
    let mut found = Vec::new();
    if dir.is_dir() {
        walk(dir, &mut found);
    }
    found.sort();
    found
}

fn walk(dir: &Path, found: &mut Vec<PathBuf>) {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            debug!(dir = %dir.display(), error = %e, "Skipping unreadable directory");
            return;
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();
        match entry.file_type() {
            Ok(kind) if kind.is_dir() => walk(&path, found),
            Ok(_) if path.is_file() && is_media_file(&path) => found.push(path),
            _ => {}
        }
    }
}

/// Whether `input` is an http(s) URL on one of the [`VIDEO_HOSTS`].
pub fn is_video_host_url(input: &str) -> bool {
    let Ok(url) = Url::parse(input.trim()) else {
        return false;
    };
    if !matches!(url.scheme(), "http" | "https") {
        return false;
    }
    url.host_str()
        .map(|host| VIDEO_HOSTS.iter().any(|known| known.eq_ignore_ascii_case(host)))
        .unwrap_or(false)
}
