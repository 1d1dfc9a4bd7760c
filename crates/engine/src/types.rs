//! Type definitions for staged extraction.

use serde::Serialize;
use std::path::PathBuf;

/// One extraction request. Immutable for the lifetime of the invocation.
#[derive(Debug, Clone)]
pub struct UnarchiveRequest {
    /// Path to the archive file to extract
    pub archive_path: PathBuf,

    /// Final destination directory for the extracted tree
    pub output_path: PathBuf,
}

impl UnarchiveRequest {
    pub fn new(archive_path: impl Into<PathBuf>, output_path: impl Into<PathBuf>) -> Self {
        Self {
            archive_path: archive_path.into(),
            output_path: output_path.into(),
        }
    }
}

/// One regular file in the committed result tree.
///
/// Produced only after a successful atomic commit; sizes are read back
/// from the committed filesystem, not taken from the decoder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileInfo {
    /// Absolute path under the committed destination
    pub path: PathBuf,

    /// Final path segment (base filename)
    pub name: String,

    /// Path relative to the destination root, preserving archive structure
    pub relative_path: PathBuf,

    /// File size in bytes, post-commit
    pub size: u64,
}

/// Successful extraction result. Constructed once, never mutated.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnarchiveResult {
    /// Extracted files in walk order
    pub files: Vec<FileInfo>,

    /// The destination directory the tree was committed to
    pub output_path: PathBuf,
}

/// Outcome of a cancellation request.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelResult {
    /// True if an extraction was active and has been signalled
    pub cancelled: bool,
}

/// Phases a request moves through. Transitions happen only inside the
/// coordinator and are the only place engine state is mutated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Validating,
    Staging,
    Committing,
    Enumerating,
}

impl Phase {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::Validating => "validating",
            Phase::Staging => "staging",
            Phase::Committing => "committing",
            Phase::Enumerating => "enumerating",
        }
    }
}
