//! Error types for the staged extraction engine.

use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;

/// Public error type returned by the engine.
///
/// Wraps the failure taxonomy in [`ErrorKind`] and, in debug builds only,
/// a [`Diagnostics`] snapshot describing how far staging got before the
/// failure. Every error carries a stable machine-readable code (see
/// [`EngineError::code`]) in addition to a human-readable message.
#[derive(Debug, Error)]
#[error("{kind}")]
pub struct EngineError {
    #[source]
    kind: ErrorKind,
    diagnostics: Option<Diagnostics>,
}

impl EngineError {
    pub(crate) fn with_diagnostics(kind: ErrorKind, diagnostics: Option<Diagnostics>) -> Self {
        Self { kind, diagnostics }
    }

    /// The failure category.
    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    /// Stable error code surfaced to callers, e.g. `"UNARCHIVE_BUSY"`.
    pub fn code(&self) -> &'static str {
        self.kind.code()
    }

    /// Debug-build staging diagnostics, if any were captured.
    pub fn diagnostics(&self) -> Option<&Diagnostics> {
        self.diagnostics.as_ref()
    }

    /// Serializable form for dispatch surfaces (CLI JSON output, host bridges).
    pub fn to_payload(&self) -> ErrorPayload {
        ErrorPayload {
            code: self.code().to_string(),
            message: self.to_string(),
            diagnostics: self.diagnostics.clone(),
        }
    }
}

impl From<ErrorKind> for EngineError {
    fn from(kind: ErrorKind) -> Self {
        Self {
            kind,
            diagnostics: None,
        }
    }
}

/// Failure taxonomy for extraction requests.
#[derive(Debug, Error)]
pub enum ErrorKind {
    /// Archive file not found at the specified path.
    #[error("Archive not found: {0}")]
    NotFound(PathBuf),

    /// Another extraction is already in flight on this engine instance.
    #[error("An extraction is already in progress")]
    Busy,

    /// Output path rejected by the sandbox policy.
    #[error("Output path not allowed: {0}")]
    InvalidOutputPath(String),

    /// An archive entry path resolved outside the staging root.
    #[error("Unsafe entry path in archive: {declared}")]
    UnsafeEntry {
        /// The entry path as declared inside the archive
        declared: String,
    },

    /// The extraction was cancelled by the caller.
    #[error("Extraction cancelled")]
    Cancelled,

    /// The staging directory could not be created.
    #[error("Failed to create staging directory: {0}")]
    StagingDirCreate(#[source] std::io::Error),

    /// A directory under staging or the destination parent could not be created.
    #[error("Directory error at {path}: {source}")]
    Directory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Atomic move of staging onto an absent destination failed.
    #[error("Atomic move failed after staging {staged} entries: {source}")]
    AtomicMove {
        /// Entries that had been staged when the move failed
        staged: u64,
        #[source]
        source: std::io::Error,
    },

    /// Atomic replace of an existing destination failed; the destination
    /// was restored to its pre-commit state.
    #[error("Atomic replace failed after staging {staged} entries: {source}")]
    AtomicReplace {
        /// Entries that had been staged when the replace failed
        staged: u64,
        #[source]
        source: std::io::Error,
    },

    /// The decoder failed while reading the archive.
    #[error("Extraction failed: {0}")]
    Extraction(String),

    /// The committed tree could not be enumerated.
    #[error("Failed to list extracted files: {0}")]
    List(#[source] std::io::Error),

    /// The archive format is not supported.
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
}

impl ErrorKind {
    /// Stable machine-readable code for this failure class.
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::NotFound(_) => "FILE_NOT_FOUND",
            ErrorKind::Busy => "UNARCHIVE_BUSY",
            ErrorKind::InvalidOutputPath(_) => "UNARCHIVE_INVALID_PATH",
            ErrorKind::UnsafeEntry { .. } => "UNSAFE_PATH",
            ErrorKind::Cancelled => "UNARCHIVE_CANCELLED",
            ErrorKind::StagingDirCreate(_) => "TEMP_DIR_CREATION_FAILED",
            ErrorKind::Directory { .. } => "DIRECTORY_ERROR",
            ErrorKind::AtomicMove { .. } => "ATOMIC_MOVE_FAILED",
            ErrorKind::AtomicReplace { .. } => "ATOMIC_REPLACE_ERROR",
            ErrorKind::Extraction(_) => "EXTRACTION_ERROR",
            ErrorKind::List(_) => "LIST_ERROR",
            ErrorKind::UnsupportedFormat(_) => "UNSUPPORTED_FORMAT",
        }
    }
}

/// Postmortem data attached to failures in debug builds.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostics {
    /// Number of entries successfully staged before the failure
    pub entries_staged: u64,

    /// Path of the staging directory the request was using
    pub staging_path: PathBuf,
}

/// Serializable error payload: stable code, message, debug diagnostics.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostics: Option<Diagnostics>,
}
