//! Atomic commit of a staged tree onto the final destination.
//!
//! The destination is observable in exactly two states: pre-commit or
//! fully post-commit. When the destination does not exist a single
//! rename suffices; the staging directory is created adjacent to the
//! destination so the rename stays on one filesystem. Replacing an
//! existing destination uses a rename-aside sequence with restore on
//! failure, since directory renames onto non-empty targets are not
//! atomic replace primitives on the platforms we run on.

use crate::error::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, error, warn};

/// Swap the staging tree into place at `destination`.
///
/// `staged` is carried into commit errors so failure reports state how
/// many entries had been materialized.
///
/// # Errors
///
/// `ATOMIC_MOVE_FAILED` when a plain move onto an absent destination
/// fails; `ATOMIC_REPLACE_ERROR` when the replace sequence fails — in
/// that case the previous destination has been restored.
pub fn commit(staging: &Path, destination: &Path, staged: u64) -> Result<(), ErrorKind> {
    if !destination.exists() {
        std::fs::rename(staging, destination).map_err(|source| ErrorKind::AtomicMove {
            staged,
            source,
        })?;
        debug!(destination = %destination.display(), staged, "committed via atomic move");
        return Ok(());
    }

    let backup = backup_path(destination);

    std::fs::rename(destination, &backup).map_err(|source| ErrorKind::AtomicReplace {
        staged,
        source,
    })?;

    match std::fs::rename(staging, destination) {
        Ok(()) => {
            if let Err(e) = std::fs::remove_dir_all(&backup) {
                // Destination is already correct; a stale backup is the
                // only consequence.
                warn!(backup = %backup.display(), error = %e, "failed to delete commit backup");
            }
            debug!(destination = %destination.display(), staged, "committed via replace");
            Ok(())
        }
        Err(source) => {
            if let Err(restore_err) = std::fs::rename(&backup, destination) {
                error!(
                    backup = %backup.display(),
                    destination = %destination.display(),
                    error = %restore_err,
                    "failed to restore destination after aborted replace"
                );
            }
            Err(ErrorKind::AtomicReplace { staged, source })
        }
    }
}

/// Uniquely named sibling path the current destination is parked at
/// during a replace.
fn backup_path(destination: &Path) -> PathBuf {
    let name = destination
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "out".to_string());
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let parent = destination.parent().unwrap_or_else(|| Path::new("."));
    parent.join(format!(".{name}.replaced-{nanos}-{}", std::process::id()))
}
