//! Writing accepted transcripts next to their media files.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// `dir/name.mp3` → `dir/name.<extension>`.
pub fn output_path_for(media: &Path, extension: &str) -> PathBuf {
    media.with_extension(extension.trim_start_matches('.'))
}

/// Write `text` to `path` byte for byte, creating parent directories.
pub async fn save_transcript(path: &Path, text: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Error saving file: cannot create {}", parent.display()))?;
    }

    tokio::fs::write(path, text.as_bytes())
        .await
        .with_context(|| format!("Error saving file: {}", path.display()))?;
    Ok(())
}
