//! Archive-reader collaborators behind one narrow capability.
//!
//! The engine is decoder-agnostic: a reader produces a lazy, finite,
//! non-restartable sequence of entries, each exposing a readable byte
//! stream. Concrete readers exist for the ZIP and RAR families; anything
//! else is rejected up front as unsupported.

use crate::error::ErrorKind;
use std::fs::File;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Metadata for one archive entry, as declared by the decoder.
#[derive(Debug, Clone)]
pub struct EntryMeta {
    /// Entry path exactly as stored in the archive
    pub declared_path: String,

    /// Whether the entry is a directory
    pub is_directory: bool,

    /// Uncompressed size as claimed by the archive
    pub size: u64,
}

/// Flow control returned by an [`EntrySink`] for each entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryControl {
    /// Keep walking the archive
    Continue,
    /// Stop the walk cooperatively (cancellation)
    Stop,
}

/// Consumer of archive entries during the staging pass.
pub trait EntrySink {
    /// Handle one entry. `data` is valid only for the duration of the call.
    fn entry(&mut self, meta: &EntryMeta, data: &mut dyn Read) -> Result<EntryControl, ErrorKind>;
}

/// One opened archive, ready to be walked exactly once.
pub trait ArchiveReader {
    /// Walk all entries in archive order, handing each to `sink`.
    ///
    /// Returns `Ok(())` when the archive is exhausted or the sink asked
    /// to stop. Structural decode failures abort with an error;
    /// single-entry read failures are logged and skipped.
    fn for_each_entry(&mut self, sink: &mut dyn EntrySink) -> Result<(), ErrorKind>;
}

/// Factory seam for opening archives; tests inject fakes here.
pub trait ArchiveOpener: Send + Sync {
    fn open(&self, path: &Path) -> Result<Box<dyn ArchiveReader>, ErrorKind>;
}

/// Production opener: detects the format from the filename and picks the
/// matching decoder.
#[derive(Debug, Default)]
pub struct FormatOpener;

impl ArchiveOpener for FormatOpener {
    fn open(&self, path: &Path) -> Result<Box<dyn ArchiveReader>, ErrorKind> {
        if is_split_volume(path) && !is_rar_archive(path) {
            return Err(ErrorKind::UnsupportedFormat(
                "Split ZIP volumes are not supported. Combine the parts or extract the set with an external tool.".to_string(),
            ));
        }

        if is_rar_archive(path) {
            return Ok(Box::new(RarReader::open(path)?));
        }

        let extension = lowercase_extension(path);
        if extension == "zip" {
            return Ok(Box::new(ZipReader::open(path)?));
        }

        Err(ErrorKind::UnsupportedFormat(if extension.is_empty() {
            path.display().to_string()
        } else {
            extension
        }))
    }
}

/// ZIP-family reader on the `zip` crate.
pub struct ZipReader {
    archive: zip::ZipArchive<File>,
}

impl ZipReader {
    pub fn open(path: &Path) -> Result<Self, ErrorKind> {
        let file = File::open(path).map_err(|e| ErrorKind::Extraction(e.to_string()))?;
        let archive = zip::ZipArchive::new(file).map_err(map_zip_open_error)?;
        Ok(Self { archive })
    }
}

impl ArchiveReader for ZipReader {
    fn for_each_entry(&mut self, sink: &mut dyn EntrySink) -> Result<(), ErrorKind> {
        for index in 0..self.archive.len() {
            let mut entry = match self.archive.by_index(index) {
                Ok(entry) => entry,
                Err(e) => {
                    // Single-entry decode failure: tolerated, the run continues.
                    warn!(index, error = %e, "skipping unreadable zip entry");
                    continue;
                }
            };

            let meta = EntryMeta {
                declared_path: entry.name().to_string(),
                is_directory: entry.is_dir(),
                size: entry.size(),
            };

            let control = if meta.is_directory {
                sink.entry(&meta, &mut std::io::empty())?
            } else {
                sink.entry(&meta, &mut entry)?
            };

            if control == EntryControl::Stop {
                return Ok(());
            }
        }

        Ok(())
    }
}

fn map_zip_open_error(e: zip::result::ZipError) -> ErrorKind {
    match e {
        zip::result::ZipError::InvalidArchive(msg) => {
            ErrorKind::UnsupportedFormat(format!("not a readable ZIP archive: {msg}"))
        }
        other => ErrorKind::Extraction(other.to_string()),
    }
}

/// RAR-family reader on the `unrar` crate. Multi-part sets are walked
/// from their first part.
pub struct RarReader {
    first_part: PathBuf,
}

impl RarReader {
    pub fn open(path: &Path) -> Result<Self, ErrorKind> {
        // as_first_part() redirects .partN.rar / .rNN names to the start
        // of the volume set.
        let first_part = PathBuf::from(unrar::Archive::new(path).as_first_part().filename());
        Ok(Self { first_part })
    }
}

impl ArchiveReader for RarReader {
    fn for_each_entry(&mut self, sink: &mut dyn EntrySink) -> Result<(), ErrorKind> {
        let archive = unrar::Archive::new(&self.first_part)
            .open_for_processing()
            .map_err(|e| ErrorKind::Extraction(e.to_string()))?;

        let mut current = Some(archive);

        while let Some(arch) = current.take() {
            let header = match arch.read_header() {
                Ok(Some(header)) => header,
                Ok(None) => break,
                Err(e) => return Err(ErrorKind::Extraction(e.to_string())),
            };

            let entry = header.entry();
            let meta = EntryMeta {
                declared_path: entry.filename.to_string_lossy().to_string(),
                is_directory: entry.is_directory(),
                size: entry.unpacked_size,
            };

            if meta.is_directory {
                let control = sink.entry(&meta, &mut std::io::empty())?;
                current = Some(
                    header
                        .skip()
                        .map_err(|e| ErrorKind::Extraction(e.to_string()))?,
                );
                if control == EntryControl::Stop {
                    return Ok(());
                }
            } else {
                let (data, rest) = header
                    .read()
                    .map_err(|e| ErrorKind::Extraction(e.to_string()))?;
                let control = sink.entry(&meta, &mut Cursor::new(data))?;
                current = Some(rest);
                if control == EntryControl::Stop {
                    return Ok(());
                }
            }
        }

        Ok(())
    }
}

/// Check if a file belongs to the RAR family based on its name.
fn is_rar_archive(path: &Path) -> bool {
    let extension = lowercase_extension(path);
    let filename = lowercase_filename(path);

    if extension == "rar" {
        return true;
    }

    // Multi-part RAR: .part1.rar, .part01.rar
    if filename.contains(".part") && filename.ends_with(".rar") {
        return true;
    }

    // Legacy volume naming: .r00, .r01, ...
    if extension.starts_with('r')
        && extension.len() >= 2
        && extension[1..].chars().all(|c| c.is_ascii_digit())
    {
        return true;
    }

    false
}

/// Check for split-volume naming across formats (.zip.001, .partN.zip).
fn is_split_volume(path: &Path) -> bool {
    let extension = lowercase_extension(path);
    let filename = lowercase_filename(path);

    if filename.contains(".part") && (filename.ends_with(".rar") || filename.ends_with(".zip")) {
        return true;
    }

    if filename.contains(".zip.") && extension.chars().all(|c| c.is_ascii_digit()) && !extension.is_empty() {
        return true;
    }

    if extension.starts_with('r')
        && extension.len() >= 2
        && extension[1..].chars().all(|c| c.is_ascii_digit())
    {
        return true;
    }

    false
}

fn lowercase_extension(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase()
}

fn lowercase_filename(path: &Path) -> String {
    path.file_name()
        .and_then(|f| f.to_str())
        .unwrap_or("")
        .to_lowercase()
}
