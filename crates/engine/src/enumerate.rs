//! Enumeration of the committed result tree.

use crate::error::ErrorKind;
use crate::types::FileInfo;
use std::path::Path;
use walkdir::WalkDir;

/// Walk the committed tree depth-first and build the result listing.
///
/// Runs only after a successful commit. Sizes come from post-commit
/// filesystem metadata, not from whatever the decoder claimed; ordering
/// is walk order with no further guarantee.
pub fn enumerate(committed_root: &Path) -> Result<Vec<FileInfo>, ErrorKind> {
    let mut files = Vec::new();

    for entry in WalkDir::new(committed_root).follow_links(false) {
        let entry = entry.map_err(|e| ErrorKind::List(e.into()))?;
        if !entry.file_type().is_file() {
            continue;
        }

        let metadata = entry.metadata().map_err(|e| ErrorKind::List(e.into()))?;
        let relative_path = entry
            .path()
            .strip_prefix(committed_root)
            .map_err(|e| {
                ErrorKind::List(std::io::Error::new(std::io::ErrorKind::InvalidData, e))
            })?
            .to_path_buf();

        files.push(FileInfo {
            path: entry.path().to_path_buf(),
            name: entry.file_name().to_string_lossy().to_string(),
            relative_path,
            size: metadata.len(),
        });
    }

    Ok(files)
}
