//! Staged materialization of archive entries into a private scratch tree.
//!
//! Nothing under the staging root is ever exposed to the caller; the
//! atomic committer swaps the whole tree into place afterwards. The
//! stager polls cancellation at entry boundaries only: one entry's write
//! is a short atomic unit of work and is never interrupted midway.

use crate::error::ErrorKind;
use crate::reader::{ArchiveReader, EntryControl, EntryMeta, EntrySink};
use crate::sanitize::{sanitize_entry_path, sweep_staging};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Writes archive entries under a staging root, applying the entry
/// sanitizer to every declared path before a byte is written.
pub struct Stager {
    staging_root: PathBuf,
    staging_canonical: PathBuf,
    cancel: Arc<AtomicBool>,
    staged: u64,
    saw_cancel: bool,
}

impl Stager {
    /// # Errors
    ///
    /// Fails with `DIRECTORY_ERROR` if the staging root cannot be
    /// canonicalized (it must already exist).
    pub fn new(staging_root: &Path, cancel: Arc<AtomicBool>) -> Result<Self, ErrorKind> {
        let staging_canonical =
            std::fs::canonicalize(staging_root).map_err(|e| ErrorKind::Directory {
                path: staging_root.to_path_buf(),
                source: e,
            })?;
        Ok(Self {
            staging_root: staging_root.to_path_buf(),
            staging_canonical,
            cancel,
            staged: 0,
            saw_cancel: false,
        })
    }

    /// Entries successfully staged so far. Valid after a failed run too;
    /// feeds commit errors and debug diagnostics.
    pub fn staged(&self) -> u64 {
        self.staged
    }

    /// Pull every entry from `reader` into the staging tree.
    ///
    /// Individually failed or zero-byte entries are deleted and the run
    /// continues. Sanitizer violations abort the whole run; so does a
    /// failed post-extraction sweep of what the decoder actually wrote.
    pub fn run(&mut self, reader: &mut dyn ArchiveReader) -> Result<(), ErrorKind> {
        if self.cancel.load(Ordering::Relaxed) {
            return Err(ErrorKind::Cancelled);
        }

        reader.for_each_entry(self)?;

        if self.saw_cancel || self.cancel.load(Ordering::Relaxed) {
            return Err(ErrorKind::Cancelled);
        }

        // Trust nothing the decoder materialized until it has been swept.
        sweep_staging(&self.staging_root, &self.staging_canonical)?;

        if self.cancel.load(Ordering::Relaxed) {
            return Err(ErrorKind::Cancelled);
        }

        Ok(())
    }

    fn write_entry(&mut self, meta: &EntryMeta, data: &mut dyn Read) -> Result<(), ErrorKind> {
        let target = sanitize_entry_path(
            &meta.declared_path,
            &self.staging_root,
            &self.staging_canonical,
        )?;

        if meta.is_directory {
            std::fs::create_dir_all(&target).map_err(|e| ErrorKind::Directory {
                path: target.clone(),
                source: e,
            })?;
            return Ok(());
        }

        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ErrorKind::Directory {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        // Exactly one output handle per entry, closed before any retry or
        // removal logic runs.
        let written = {
            let mut out = match std::fs::File::create(&target) {
                Ok(out) => out,
                Err(e) => {
                    warn!(path = %target.display(), error = %e, "skipping entry: create failed");
                    return Ok(());
                }
            };
            std::io::copy(data, &mut out)
        };

        match written {
            Ok(0) => {
                warn!(path = %target.display(), "removing zero-byte entry");
                let _ = std::fs::remove_file(&target);
            }
            Ok(bytes) => {
                self.staged += 1;
                debug!(path = %target.display(), bytes, "staged entry");
            }
            Err(e) => {
                warn!(path = %target.display(), error = %e, "removing failed entry");
                let _ = std::fs::remove_file(&target);
            }
        }

        Ok(())
    }
}

impl EntrySink for Stager {
    fn entry(&mut self, meta: &EntryMeta, data: &mut dyn Read) -> Result<EntryControl, ErrorKind> {
        // Cancellation checkpoint: before starting a new entry, never
        // mid-write.
        if self.cancel.load(Ordering::Relaxed) {
            self.saw_cancel = true;
            return Ok(EntryControl::Stop);
        }

        self.write_entry(meta, data)?;
        Ok(EntryControl::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tempfile::TempDir;

    struct FakeEntry {
        path: &'static str,
        dir: bool,
        data: &'static [u8],
    }

    /// Fake decoder yielding a fixed entry list; optionally flips the
    /// cancel flag after a given number of entries, as if the caller
    /// cancelled while the pass was running.
    struct FakeReader {
        entries: Vec<FakeEntry>,
        cancel_after: Option<(usize, Arc<AtomicBool>)>,
    }

    impl ArchiveReader for FakeReader {
        fn for_each_entry(&mut self, sink: &mut dyn EntrySink) -> Result<(), ErrorKind> {
            for (i, e) in self.entries.iter().enumerate() {
                let meta = EntryMeta {
                    declared_path: e.path.to_string(),
                    is_directory: e.dir,
                    size: e.data.len() as u64,
                };
                let control = sink.entry(&meta, &mut Cursor::new(e.data))?;
                if control == EntryControl::Stop {
                    return Ok(());
                }
                if let Some((after, flag)) = &self.cancel_after {
                    if i + 1 == *after {
                        flag.store(true, Ordering::Relaxed);
                    }
                }
            }
            Ok(())
        }
    }

    fn plain_reader(entries: Vec<FakeEntry>) -> FakeReader {
        FakeReader {
            entries,
            cancel_after: None,
        }
    }

    #[test]
    fn test_stage_basic_tree() {
        let staging = TempDir::new().unwrap();
        let cancel = Arc::new(AtomicBool::new(false));
        let mut stager = Stager::new(staging.path(), cancel).unwrap();

        let mut reader = plain_reader(vec![
            FakeEntry { path: "a.txt", dir: false, data: b"hello" },
            FakeEntry { path: "sub/", dir: true, data: b"" },
            FakeEntry { path: "sub/b.txt", dir: false, data: b"world!" },
        ]);

        stager.run(&mut reader).unwrap();
        assert_eq!(stager.staged(), 2);
        assert_eq!(
            std::fs::read(staging.path().join("a.txt")).unwrap(),
            b"hello"
        );
        assert_eq!(
            std::fs::read(staging.path().join("sub/b.txt")).unwrap(),
            b"world!"
        );
    }

    #[test]
    fn test_stage_creates_missing_parents() {
        let staging = TempDir::new().unwrap();
        let cancel = Arc::new(AtomicBool::new(false));
        let mut stager = Stager::new(staging.path(), cancel).unwrap();

        // No explicit directory entry for "deep/nested"
        let mut reader = plain_reader(vec![FakeEntry {
            path: "deep/nested/c.txt",
            dir: false,
            data: b"c",
        }]);

        stager.run(&mut reader).unwrap();
        assert!(staging.path().join("deep/nested/c.txt").is_file());
    }

    #[test]
    fn test_stage_drops_zero_byte_entry_and_continues() {
        let staging = TempDir::new().unwrap();
        let cancel = Arc::new(AtomicBool::new(false));
        let mut stager = Stager::new(staging.path(), cancel).unwrap();

        let mut reader = plain_reader(vec![
            FakeEntry { path: "empty.txt", dir: false, data: b"" },
            FakeEntry { path: "full.txt", dir: false, data: b"data" },
        ]);

        stager.run(&mut reader).unwrap();
        assert_eq!(stager.staged(), 1);
        assert!(!staging.path().join("empty.txt").exists());
        assert!(staging.path().join("full.txt").is_file());
    }

    #[test]
    fn test_stage_aborts_whole_run_on_traversal() {
        let staging = TempDir::new().unwrap();
        let cancel = Arc::new(AtomicBool::new(false));
        let mut stager = Stager::new(staging.path(), cancel).unwrap();

        let mut reader = plain_reader(vec![
            FakeEntry { path: "ok.txt", dir: false, data: b"fine" },
            FakeEntry { path: "../../evil", dir: false, data: b"boom" },
            FakeEntry { path: "never.txt", dir: false, data: b"unreached" },
        ]);

        let result = stager.run(&mut reader);
        assert!(matches!(result, Err(ErrorKind::UnsafeEntry { .. })));

        // Nothing escaped the staging root
        assert!(!staging.path().parent().unwrap().join("evil").exists());
        // The run stopped at the violation
        assert!(!staging.path().join("never.txt").exists());
    }

    #[test]
    fn test_stage_observes_cancel_at_entry_boundary() {
        let staging = TempDir::new().unwrap();
        let cancel = Arc::new(AtomicBool::new(false));
        let mut stager = Stager::new(staging.path(), cancel.clone()).unwrap();

        let mut reader = FakeReader {
            entries: vec![
                FakeEntry { path: "one.txt", dir: false, data: b"1" },
                FakeEntry { path: "two.txt", dir: false, data: b"2" },
                FakeEntry { path: "three.txt", dir: false, data: b"3" },
            ],
            cancel_after: Some((1, cancel)),
        };

        let result = stager.run(&mut reader);
        assert!(matches!(result, Err(ErrorKind::Cancelled)));

        // The in-flight entry completed; later entries were never started
        assert!(staging.path().join("one.txt").is_file());
        assert!(!staging.path().join("two.txt").exists());
        assert!(!staging.path().join("three.txt").exists());
    }

    #[test]
    fn test_stage_cancel_before_pass() {
        let staging = TempDir::new().unwrap();
        let cancel = Arc::new(AtomicBool::new(true));
        let mut stager = Stager::new(staging.path(), cancel).unwrap();

        let mut reader = plain_reader(vec![FakeEntry {
            path: "a.txt",
            dir: false,
            data: b"x",
        }]);

        assert!(matches!(stager.run(&mut reader), Err(ErrorKind::Cancelled)));
        assert!(!staging.path().join("a.txt").exists());
    }
}
