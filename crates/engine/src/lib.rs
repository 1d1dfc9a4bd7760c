//! # Unarchive Engine
//!
//! A safe staged extraction engine for ZIP- and RAR-family archives.
//!
//! Decoding bytes is the easy part and is delegated to pluggable
//! archive readers; this crate's job is making extraction safe and
//! atomic under untrusted archive content and concurrent or cancelled
//! invocations:
//!
//! - single-flight admission: one extraction per engine instance,
//!   excess requests rejected immediately;
//! - output-path sandboxing against a host-supplied allow-list;
//! - per-entry path sanitization plus a post-extraction sweep
//!   (directory-traversal defense);
//! - staging to a private scratch directory, committed to the final
//!   destination as one atomic transition with a restore-safe fallback;
//! - cooperative cancellation polled at entry boundaries;
//! - stable error codes with debug-build diagnostics.
//!
//! The destination directory either does not exist or is a complete,
//! previously committed result. It is never observable half-written.
//!
//! ## Example
//!
//! ```rust,no_run
//! use unarchive_engine::{SandboxPolicy, Unarchiver, UnarchiveRequest};
//! use std::path::PathBuf;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let policy = SandboxPolicy::new(vec![PathBuf::from("/home/me/Documents")]);
//! let engine = Unarchiver::new(policy);
//!
//! let result = engine
//!     .unarchive(UnarchiveRequest::new(
//!         "/home/me/Documents/photos.zip",
//!         "/home/me/Documents/photos",
//!     ))
//!     .await?;
//!
//! for file in &result.files {
//!     println!("{} ({} bytes)", file.relative_path.display(), file.size);
//! }
//! # Ok(())
//! # }
//! ```

pub mod commit;
pub mod coordinator;
pub mod enumerate;
pub mod error;
pub mod reader;
pub mod sandbox;
pub mod sanitize;
pub mod staging;
pub mod types;

// Re-export main types
pub use coordinator::{EngineConfig, Unarchiver};
pub use error::{Diagnostics, EngineError, ErrorKind, ErrorPayload};
pub use reader::{ArchiveOpener, ArchiveReader, EntryControl, EntryMeta, EntrySink};
pub use sandbox::SandboxPolicy;
pub use types::{CancelResult, FileInfo, UnarchiveRequest, UnarchiveResult};
