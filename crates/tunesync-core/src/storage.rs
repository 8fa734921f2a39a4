//! Local storage layout for downloaded media.
//!
//! All files live under a dedicated storage root:
//! - `music/<id>.downloading` - in-flight transfer, deleted on cancel/crash
//! - `music/<id>.mp3` - finalized media file
//! - `thumbnails/<id>.jpeg` - item thumbnail

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::{DownloadError, Error, Result};

/// Extension marking a partially downloaded media file.
const DOWNLOADING_EXTENSION: &str = "downloading";

fn fs_error(path: &Path, e: &io::Error) -> Error {
    Error::FileSystem {
        path: path.to_path_buf(),
        message: e.to_string(),
    }
}

/// Path layout and finalization for downloaded media files.
#[derive(Debug, Clone)]
pub struct MediaStorage {
    music_dir: PathBuf,
    thumbnail_dir: PathBuf,
}

impl MediaStorage {
    /// Create a storage layout rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            music_dir: root.join("music"),
            thumbnail_dir: root.join("thumbnails"),
        }
    }

    /// Create the music and thumbnail directories if missing.
    pub fn ensure_directories(&self) -> Result<()> {
        fs::create_dir_all(&self.music_dir).map_err(|e| fs_error(&self.music_dir, &e))?;
        fs::create_dir_all(&self.thumbnail_dir).map_err(|e| fs_error(&self.thumbnail_dir, &e))?;
        Ok(())
    }

    /// Path of the finalized media file for `item_id`.
    #[must_use]
    pub fn media_file(&self, item_id: &str) -> PathBuf {
        self.music_dir.join(format!("{item_id}.mp3"))
    }

    /// Path of the thumbnail file for `item_id`.
    #[must_use]
    pub fn thumbnail_file(&self, item_id: &str) -> PathBuf {
        self.thumbnail_dir.join(format!("{item_id}.jpeg"))
    }

    /// Path of the in-flight transfer file for `item_id`.
    #[must_use]
    pub fn downloading_file(&self, item_id: &str) -> PathBuf {
        self.music_dir.join(format!("{item_id}.{DOWNLOADING_EXTENSION}"))
    }

    /// Atomically rename the in-flight file to its final media name.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::Rename`] when the rename fails; the file
    /// system is then in an inconsistent state and a manual retry is needed.
    pub fn finalize(&self, item_id: &str) -> Result<PathBuf> {
        let from = self.downloading_file(item_id);
        let to = self.media_file(item_id);

        fs::rename(&from, &to).map_err(|e| DownloadError::Rename {
            from: from.clone(),
            to: to.clone(),
            reason: e.to_string(),
        })?;

        debug!("finalized {}", to.display());
        Ok(to)
    }

    /// Best-effort removal of the in-flight file for `item_id`.
    pub fn discard_partial(&self, item_id: &str) {
        let path = self.downloading_file(item_id);
        match fs::remove_file(&path) {
            Ok(()) => debug!("discarded partial download {}", path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!("failed to discard partial {}: {e}", path.display()),
        }
    }

    /// Best-effort removal of the finalized media and thumbnail files.
    pub fn delete_media_files(&self, item_id: &str) {
        for path in [self.media_file(item_id), self.thumbnail_file(item_id)] {
            match fs::remove_file(&path) {
                Ok(()) => debug!("deleted {}", path.display()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!("failed to delete {}: {e}", path.display()),
            }
        }
    }

    /// Delete any leftover `*.downloading` files.
    ///
    /// Run at startup so no partial file survives a crash mid-write.
    ///
    /// # Errors
    ///
    /// Returns an error if a stale file cannot be removed.
    pub fn purge_stale_downloads(&self) -> Result<usize> {
        if !self.music_dir.exists() {
            return Ok(0);
        }

        let mut purged = 0;
        for entry in WalkDir::new(&self.music_dir)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(std::result::Result::ok)
        {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) == Some(DOWNLOADING_EXTENSION) {
                fs::remove_file(path).map_err(|e| fs_error(path, &e))?;
                debug!("purged stale download {}", path.display());
                purged += 1;
            }
        }

        Ok(purged)
    }
}
