//! Resolves client-supplied filenames to paths confined under the server's
//! serving root.
//!
//! The resolution is purely logical (string/`Component` based) so that a
//! request can be rejected before any filesystem access happens; an
//! additional canonicalization check guards against a symlink inside the
//! root pointing back out of it.

use std::fmt;
use std::path::{Component, Path, PathBuf};

#[derive(Debug, PartialEq)]
pub enum SanitizeError {
    /// The filename escapes the serving root, contains a NUL byte, or
    /// names a reserved file.
    Invalid,
    /// Resolving a symlink would have left the serving root.
    Escape,
}

impl fmt::Display for SanitizeError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SanitizeError::Invalid => write!(f, "filename is not valid"),
            SanitizeError::Escape => write!(f, "filename escapes the serving root"),
        }
    }
}

#[cfg(windows)]
const RESERVED_NAMES: &[&str] = &[
    "con", "prn", "aux", "nul", "com1", "com2", "com3", "com4", "com5", "com6", "com7", "com8",
    "com9", "lpt1", "lpt2", "lpt3", "lpt4", "lpt5", "lpt6", "lpt7", "lpt8", "lpt9",
];

/// Logically resolves `filename` to a path confined under `root`.
///
/// This never touches the filesystem for the *logical* part of the check:
/// leading `/` and `..` components are folded away rather than followed, so
/// `/etc/passwd` and `../../etc/passwd` both resolve to `root/etc/passwd`.
/// Callers that open the resolved path for reading should additionally call
/// [`confine_existing`] once the file is known to exist, to catch a symlink
/// planted inside `root` that points outside of it.
pub fn resolve(root: &Path, filename: &str) -> Result<PathBuf, SanitizeError> {
    if filename.is_empty() || filename.as_bytes().contains(&0) {
        return Err(SanitizeError::Invalid);
    }

    let mut stack: Vec<Component> = Vec::new();
    for component in Path::new(filename).components() {
        match component {
            Component::Normal(part) => stack.push(Component::Normal(part)),
            Component::ParentDir => {
                stack.pop();
            }
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
        }
    }

    if stack.is_empty() {
        return Err(SanitizeError::Invalid);
    }

    if is_reserved(&stack) {
        return Err(SanitizeError::Invalid);
    }

    let mut resolved = root.to_path_buf();
    for part in stack {
        resolved.push(part.as_os_str());
    }
    Ok(resolved)
}

#[cfg(windows)]
fn is_reserved(stack: &[Component]) -> bool {
    stack.last().map_or(false, |c| {
        let name = c.as_os_str().to_string_lossy();
        let stem = name.split('.').next().unwrap_or("");
        RESERVED_NAMES.contains(&stem.to_ascii_lowercase().as_str())
    })
}

#[cfg(not(windows))]
fn is_reserved(_stack: &[Component]) -> bool {
    false
}

/// Confirms that the already-resolved path `p` still lives under `root`
/// once symlinks are followed. Called after a successful open so a planted
/// symlink can't redirect reads outside the serving root.
///
/// If either path can't be canonicalized (e.g. because it lives in a
/// virtual or in-memory backend rather than the real filesystem) this is
/// not treated as an escape: the check only rejects a *confirmed* escape,
/// it does not require the real filesystem to back the transfer.
pub fn confine_existing(root: &Path, p: &Path) -> Result<(), SanitizeError> {
    let (canon_root, canon_p) = match (root.canonicalize(), p.canonicalize()) {
        (Ok(r), Ok(p)) => (r, p),
        _ => return Ok(()),
    };
    if canon_p.starts_with(&canon_root) {
        Ok(())
    } else {
        Err(SanitizeError::Escape)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_leading_slash() {
        let root = Path::new("/srv/tftp");
        assert_eq!(
            resolve(root, "/etc/passwd").unwrap(),
            PathBuf::from("/srv/tftp/etc/passwd")
        );
    }

    #[test]
    fn strips_parent_dirs() {
        let root = Path::new("/srv/tftp");
        assert_eq!(
            resolve(root, "../../etc/passwd").unwrap(),
            PathBuf::from("/srv/tftp/etc/passwd")
        );
    }

    #[test]
    fn interior_parent_dirs_cancel_out() {
        let root = Path::new("/srv/tftp");
        assert_eq!(
            resolve(root, "a/b/../../c.bin").unwrap(),
            PathBuf::from("/srv/tftp/c.bin")
        );
    }

    #[test]
    fn rejects_nul_byte() {
        let root = Path::new("/srv/tftp");
        assert_eq!(resolve(root, "foo\0bar"), Err(SanitizeError::Invalid));
    }

    #[test]
    fn rejects_empty_after_resolution() {
        let root = Path::new("/srv/tftp");
        assert_eq!(resolve(root, "../.."), Err(SanitizeError::Invalid));
    }

    #[test]
    fn plain_name_joins_root() {
        let root = Path::new("/srv/tftp");
        assert_eq!(
            resolve(root, "TEST.bin").unwrap(),
            PathBuf::from("/srv/tftp/TEST.bin")
        );
    }

    #[test]
    fn confine_existing_allows_plain_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("inside.bin");
        std::fs::write(&file, b"hi").unwrap();
        assert_eq!(confine_existing(dir.path(), &file), Ok(()));
    }

    #[cfg(unix)]
    #[test]
    fn confine_existing_rejects_symlink_escape() {
        use std::os::unix::fs::symlink;

        let outside = tempfile::tempdir().unwrap();
        let secret = outside.path().join("secret.bin");
        std::fs::write(&secret, b"top secret").unwrap();

        let root = tempfile::tempdir().unwrap();
        let link = root.path().join("innocuous.bin");
        symlink(&secret, &link).unwrap();

        assert_eq!(
            confine_existing(root.path(), &link),
            Err(SanitizeError::Escape)
        );
    }
}
