//! Destination sandboxing for extraction output paths.
//!
//! Extraction targets are restricted to directories the host application
//! exclusively owns. The allow-list of roots is supplied by the host
//! (documents area, cache area, app-scoped external storage); it is
//! never hard-coded here.

use crate::error::ErrorKind;
use std::path::{Component, Path, PathBuf};

/// Allow-list of destination roots an extraction may commit into.
#[derive(Debug, Clone, Default)]
pub struct SandboxPolicy {
    allowed_roots: Vec<PathBuf>,
}

impl SandboxPolicy {
    /// Build a policy from host-supplied roots.
    pub fn new(allowed_roots: Vec<PathBuf>) -> Self {
        Self { allowed_roots }
    }

    /// Validate a candidate destination path against the allow-list.
    ///
    /// The candidate is canonicalized (symlinks resolved, `.`/`..`
    /// normalized); since the destination is allowed to not exist yet,
    /// only the deepest existing ancestor is resolved through the
    /// filesystem and the remaining suffix is appended lexically. The
    /// path is accepted iff a canonicalized allow-list root equals it or
    /// is a proper prefix of it.
    ///
    /// # Errors
    ///
    /// Returns `ErrorKind::InvalidOutputPath` for empty input, paths that
    /// fail canonicalization, and paths outside every allowed root.
    pub fn validate(&self, candidate: &Path) -> Result<PathBuf, ErrorKind> {
        if candidate.as_os_str().is_empty() {
            return Err(ErrorKind::InvalidOutputPath("<empty>".to_string()));
        }

        let resolved = canonicalize_partial(candidate)
            .map_err(|_| ErrorKind::InvalidOutputPath(candidate.display().to_string()))?;

        for root in &self.allowed_roots {
            let Ok(root) = std::fs::canonicalize(root) else {
                // A root that does not resolve cannot admit anything.
                continue;
            };
            if resolved.starts_with(&root) {
                return Ok(resolved);
            }
        }

        Err(ErrorKind::InvalidOutputPath(candidate.display().to_string()))
    }
}

/// Canonicalize a path that may not fully exist yet.
///
/// The deepest existing ancestor is resolved with `fs::canonicalize`;
/// the non-existing suffix is appended component-wise. `..` and root
/// components in the suffix are rejected so the suffix cannot walk back
/// out of the resolved ancestor.
pub(crate) fn canonicalize_partial(path: &Path) -> std::io::Result<PathBuf> {
    let mut existing = path;
    let mut suffix: Vec<&std::ffi::OsStr> = Vec::new();

    loop {
        match std::fs::canonicalize(existing) {
            Ok(mut resolved) => {
                for part in suffix.iter().rev() {
                    resolved.push(part);
                }
                return Ok(resolved);
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let mut components = existing.components();
                match components.next_back() {
                    Some(Component::Normal(part)) => {
                        suffix.push(part);
                        existing = components.as_path();
                        if existing.as_os_str().is_empty() {
                            // Relative path whose first component is missing:
                            // anchor it at the current directory.
                            return canonicalize_partial(&Path::new(".").join(path));
                        }
                    }
                    _ => {
                        return Err(std::io::Error::new(
                            std::io::ErrorKind::InvalidInput,
                            format!("unresolvable path: {}", path.display()),
                        ));
                    }
                }
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_validate_inside_root() {
        let root = TempDir::new().unwrap();
        let policy = SandboxPolicy::new(vec![root.path().to_path_buf()]);

        // Existing subdirectory
        std::fs::create_dir(root.path().join("docs")).unwrap();
        assert!(policy.validate(&root.path().join("docs")).is_ok());

        // Not-yet-existing destination under the root
        assert!(policy.validate(&root.path().join("out/extracted")).is_ok());

        // The root itself
        assert!(policy.validate(root.path()).is_ok());
    }

    #[test]
    fn test_validate_outside_root() {
        let root = TempDir::new().unwrap();
        let other = TempDir::new().unwrap();
        let policy = SandboxPolicy::new(vec![root.path().to_path_buf()]);

        let result = policy.validate(other.path());
        assert!(matches!(result, Err(ErrorKind::InvalidOutputPath(_))));
    }

    #[test]
    fn test_validate_rejects_empty() {
        let policy = SandboxPolicy::new(vec![PathBuf::from("/tmp")]);
        assert!(policy.validate(Path::new("")).is_err());
    }

    #[test]
    fn test_validate_rejects_parent_escape() {
        let root = TempDir::new().unwrap();
        let policy = SandboxPolicy::new(vec![root.path().to_path_buf()]);

        // Dotted escape below an existing prefix canonicalizes outside the root
        let sneaky = root.path().join("..").join("elsewhere");
        assert!(policy.validate(&sneaky).is_err());
    }

    #[test]
    fn test_validate_no_roots_rejects_everything() {
        let policy = SandboxPolicy::default();
        assert!(policy.validate(Path::new("/tmp")).is_err());
    }

    #[test]
    fn test_canonicalize_partial_missing_tail() {
        let root = TempDir::new().unwrap();
        let target = root.path().join("a/b/c");
        let resolved = canonicalize_partial(&target).unwrap();
        let canonical_root = std::fs::canonicalize(root.path()).unwrap();
        assert_eq!(resolved, canonical_root.join("a/b/c"));
    }

    #[test]
    fn test_canonicalize_partial_resolves_symlinked_ancestor() {
        #[cfg(unix)]
        {
            let root = TempDir::new().unwrap();
            let real = root.path().join("real");
            std::fs::create_dir(&real).unwrap();
            let link = root.path().join("link");
            std::os::unix::fs::symlink(&real, &link).unwrap();

            let resolved = canonicalize_partial(&link.join("missing")).unwrap();
            let canonical_real = std::fs::canonicalize(&real).unwrap();
            assert_eq!(resolved, canonical_real.join("missing"));
        }
    }
}
