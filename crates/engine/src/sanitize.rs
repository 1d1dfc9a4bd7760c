//! Per-entry path sanitization: the directory-traversal ("zip-slip") defense.
//!
//! Every archive-declared entry path is validated before a single byte is
//! written for it, and the whole staging tree is swept again after the
//! extraction pass in case the decoder materialized files on its own.
//! One unsafe entry aborts the whole request; traversal safety is
//! all-or-nothing, never best-effort-skip.

use crate::error::ErrorKind;
use crate::sandbox::canonicalize_partial;
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

/// Resolve an archive-declared entry path to a safe absolute path under
/// the staging root.
///
/// Performs two layers of validation:
/// - lexical: rejects absolute paths, Windows prefixes, any `..`
///   component, non-UTF-8 components, and paths that normalize to empty;
/// - filesystem: joins the normalized path to `staging_root`, resolves
///   the deepest existing ancestor, and requires `staging_canonical` as
///   prefix, so symlinked intermediate directories cannot redirect the
///   write outside staging.
///
/// # Errors
///
/// Returns `ErrorKind::UnsafeEntry` carrying the declared path on any
/// violation.
pub fn sanitize_entry_path(
    declared: &str,
    staging_root: &Path,
    staging_canonical: &Path,
) -> Result<PathBuf, ErrorKind> {
    let normalized = normalize_declared_path(declared)?;

    let joined = staging_root.join(&normalized);
    let resolved = canonicalize_partial(&joined).map_err(|_| unsafe_entry(declared))?;

    if !resolved.starts_with(staging_canonical) {
        return Err(unsafe_entry(declared));
    }

    Ok(joined)
}

/// Lexically normalize a declared entry path to a safe relative path.
fn normalize_declared_path(declared: &str) -> Result<PathBuf, ErrorKind> {
    // An absolute entry name is an out-of-tree write attempt; fail the
    // request rather than rehome the entry under staging.
    let path = Path::new(declared);
    if path.is_absolute() || declared.starts_with(['/', '\\']) {
        return Err(unsafe_entry(declared));
    }

    let mut normalized = PathBuf::new();

    for component in path.components() {
        match component {
            Component::Normal(part) => {
                let part_str = part.to_str().ok_or_else(|| unsafe_entry(declared))?;
                if part_str == ".." {
                    return Err(unsafe_entry(declared));
                }
                normalized.push(part);
            }
            Component::CurDir => continue,
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(unsafe_entry(declared));
            }
        }
    }

    if normalized.as_os_str().is_empty() {
        return Err(unsafe_entry(declared));
    }

    Ok(normalized)
}

/// Re-validate everything actually materialized under the staging root.
///
/// Defense against decoders that perform their own extraction without
/// per-entry callbacks: no file is trusted until its on-disk location has
/// been checked against the canonical staging root, and symlinks are
/// rejected outright.
pub fn sweep_staging(staging_root: &Path, staging_canonical: &Path) -> Result<(), ErrorKind> {
    for entry in WalkDir::new(staging_root).follow_links(false) {
        let entry = entry.map_err(|e| {
            ErrorKind::Directory {
                path: staging_root.to_path_buf(),
                source: e.into(),
            }
        })?;

        if entry.path_is_symlink() {
            return Err(unsafe_entry(&entry.path().display().to_string()));
        }

        let resolved = std::fs::canonicalize(entry.path())
            .map_err(|_| unsafe_entry(&entry.path().display().to_string()))?;
        if !resolved.starts_with(staging_canonical) {
            return Err(unsafe_entry(&entry.path().display().to_string()));
        }
    }

    Ok(())
}

fn unsafe_entry(declared: &str) -> ErrorKind {
    ErrorKind::UnsafeEntry {
        declared: declared.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn staging() -> (TempDir, PathBuf) {
        let dir = TempDir::new().unwrap();
        let canonical = std::fs::canonicalize(dir.path()).unwrap();
        (dir, canonical)
    }

    #[test]
    fn test_sanitize_valid_paths() {
        let (dir, canonical) = staging();

        let p = sanitize_entry_path("file.txt", dir.path(), &canonical).unwrap();
        assert_eq!(p, dir.path().join("file.txt"));

        let p = sanitize_entry_path("dir/subdir/file.txt", dir.path(), &canonical).unwrap();
        assert_eq!(p, dir.path().join("dir/subdir/file.txt"));

        // "." components collapse away
        let p = sanitize_entry_path("./dir/file.txt", dir.path(), &canonical).unwrap();
        assert_eq!(p, dir.path().join("dir/file.txt"));
    }

    #[test]
    fn test_sanitize_rejects_absolute_paths() {
        let (dir, canonical) = staging();

        for declared in ["/abs.txt", "/dir/file.txt", "\\abs.txt", "\\\\server\\share"] {
            let result = sanitize_entry_path(declared, dir.path(), &canonical);
            assert!(
                matches!(result, Err(ErrorKind::UnsafeEntry { .. })),
                "expected rejection for {declared:?}"
            );
        }
    }

    #[test]
    fn test_sanitize_rejects_traversal() {
        let (dir, canonical) = staging();

        for declared in [
            "../evil",
            "../../evil",
            "dir/../../evil",
            "./../evil",
            "safe/../../../etc/passwd",
            "dir/..",
        ] {
            let result = sanitize_entry_path(declared, dir.path(), &canonical);
            assert!(
                matches!(result, Err(ErrorKind::UnsafeEntry { .. })),
                "expected rejection for {declared:?}"
            );
        }
    }

    #[test]
    fn test_sanitize_rejects_empty_and_dot() {
        let (dir, canonical) = staging();

        assert!(sanitize_entry_path("", dir.path(), &canonical).is_err());
        assert!(sanitize_entry_path(".", dir.path(), &canonical).is_err());
        assert!(sanitize_entry_path("//", dir.path(), &canonical).is_err());
    }

    #[test]
    fn test_sanitize_unicode_paths() {
        let (dir, canonical) = staging();

        let p = sanitize_entry_path("日本語/ファイル.txt", dir.path(), &canonical).unwrap();
        assert_eq!(p, dir.path().join("日本語/ファイル.txt"));

        // Traversal hidden behind unicode segments is still traversal
        assert!(sanitize_entry_path("日本語/../../x", dir.path(), &canonical).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_sanitize_rejects_symlinked_intermediate_dir() {
        let (dir, canonical) = staging();
        let outside = TempDir::new().unwrap();

        // An earlier (hostile) step planted a symlink inside staging
        std::os::unix::fs::symlink(outside.path(), dir.path().join("link")).unwrap();

        let result = sanitize_entry_path("link/file.txt", dir.path(), &canonical);
        assert!(matches!(result, Err(ErrorKind::UnsafeEntry { .. })));
    }

    #[test]
    fn test_sweep_accepts_clean_tree() {
        let (dir, canonical) = staging();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub/a.txt"), b"hello").unwrap();

        assert!(sweep_staging(dir.path(), &canonical).is_ok());
    }

    #[cfg(unix)]
    #[test]
    fn test_sweep_rejects_symlink() {
        let (dir, canonical) = staging();
        std::os::unix::fs::symlink("/etc/passwd", dir.path().join("leak")).unwrap();

        let result = sweep_staging(dir.path(), &canonical);
        assert!(matches!(result, Err(ErrorKind::UnsafeEntry { .. })));
    }
}
