//! ID3 tag writing for finalized downloads.

use std::path::Path;

use id3::{Tag, TagLike, Version};
use tracing::debug;

use crate::catalog::RemoteItem;
use crate::error::{Error, Result};

/// Write title, artist and duration tags to a finalized media file.
///
/// # Errors
///
/// Returns an error if the tag cannot be written; callers treat this as
/// non-fatal since the audio itself is already complete.
pub fn write_basic_tags(media_file: &Path, item: &RemoteItem) -> Result<()> {
    let mut tag = Tag::new();
    tag.set_title(item.title.as_str());
    tag.set_artist(item.author.as_str());
    if item.duration_millis > 0 {
        tag.set_duration(item.duration_millis as u32);
    }

    tag.write_to_path(media_file, Version::Id3v24)
        .map_err(|e| Error::Metadata {
            path: media_file.to_path_buf(),
            reason: e.to_string(),
        })?;

    debug!("tagged {}", media_file.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_tags_round_trip() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("abc.mp3");
        std::fs::write(&file, b"not really mpeg frames").unwrap();

        let item = RemoteItem {
            id: "abc".to_string(),
            title: "A Song".to_string(),
            author: "A Band".to_string(),
            duration_millis: 215_000,
            description: String::new(),
            thumbnail_url: String::new(),
        };

        write_basic_tags(&file, &item).unwrap();

        let tag = Tag::read_from_path(&file).unwrap();
        assert_eq!(tag.title(), Some("A Song"));
        assert_eq!(tag.artist(), Some("A Band"));
        assert_eq!(tag.duration(), Some(215_000));
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let item = RemoteItem {
            id: "abc".to_string(),
            title: "t".to_string(),
            author: "a".to_string(),
            duration_millis: 0,
            description: String::new(),
            thumbnail_url: String::new(),
        };

        let err = write_basic_tags(&dir.path().join("missing.mp3"), &item).unwrap_err();
        assert!(matches!(err, Error::Metadata { .. }));
    }
}
