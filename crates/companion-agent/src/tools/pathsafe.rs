//! Path policy for the filesystem tools.
//!
//! Every path the model touches must resolve inside an allowlisted root
//! (the workspace directory and `/tmp`). The final component is `lstat`ed
//! to reject symlinks, the open uses `O_NOFOLLOW` where the platform
//! supports it, and the opened descriptor's device/inode pair is compared
//! against a fresh stat of the resolved path so a swap between check and
//! use is detected. A blocklist of dangerous filenames is enforced after
//! resolution.

use std::fs::{File, OpenOptions};
use std::path::{Component, Path, PathBuf};

/// Filename/path fragments that are never readable or writable, whatever
/// root they resolve into.
const BLOCKED_PATTERNS: &[&str] = &[
    ".bashrc",
    ".bash_profile",
    ".zshrc",
    ".zprofile",
    ".profile",
    ".ssh/",
    "authorized_keys",
    ".env",
    ".git/hooks",
    ".netrc",
    ".gnupg/",
];

pub struct PathPolicy {
    roots: Vec<PathBuf>,
}

impl PathPolicy {
    /// `workspace_root` is always allowed; `/tmp` is added alongside it.
    pub fn new(workspace_root: PathBuf) -> Self {
        Self {
            roots: vec![workspace_root, PathBuf::from("/tmp")],
        }
    }

    #[cfg(test)]
    pub fn with_roots(roots: Vec<PathBuf>) -> Self {
        Self { roots }
    }

    /// Resolve a path for reading: it must exist, not be a symlink, resolve
    /// under an allowed root, and not match the blocklist.
    pub fn resolve_for_read(&self, raw: &str) -> Result<PathBuf, String> {
        let path = self.absolutize(raw);

        let meta = std::fs::symlink_metadata(&path)
            .map_err(|e| format!("cannot stat '{}': {e}", path.display()))?;
        if meta.file_type().is_symlink() {
            return Err(format!("'{}' is a symlink", path.display()));
        }

        let resolved = std::fs::canonicalize(&path)
            .map_err(|e| format!("cannot resolve '{}': {e}", path.display()))?;
        self.check_resolved(&resolved)?;
        Ok(resolved)
    }

    /// Resolve a path for writing. The file itself may not exist yet; in
    /// that case every existing ancestor is resolved and checked, and the
    /// remaining components must be plain names (no `..`).
    pub fn resolve_for_write(&self, raw: &str) -> Result<PathBuf, String> {
        let path = self.absolutize(raw);

        if let Ok(meta) = std::fs::symlink_metadata(&path) {
            if meta.file_type().is_symlink() {
                return Err(format!("'{}' is a symlink", path.display()));
            }
            let resolved = std::fs::canonicalize(&path)
                .map_err(|e| format!("cannot resolve '{}': {e}", path.display()))?;
            self.check_resolved(&resolved)?;
            return Ok(resolved);
        }

        // File doesn't exist: walk up to the nearest existing ancestor.
        let mut existing = path.as_path();
        let mut suffix: Vec<std::ffi::OsString> = Vec::new();
        loop {
            match existing.parent() {
                Some(parent) => {
                    suffix.push(existing.file_name().unwrap_or_default().to_os_string());
                    existing = parent;
                    if existing.exists() {
                        break;
                    }
                }
                None => return Err(format!("'{}' has no existing ancestor", path.display())),
            }
        }

        for part in &suffix {
            let part = Path::new(part);
            if part
                .components()
                .any(|c| matches!(c, Component::ParentDir | Component::CurDir))
            {
                return Err(format!("'{}' contains relative components", path.display()));
            }
        }

        let resolved_base = std::fs::canonicalize(existing)
            .map_err(|e| format!("cannot resolve '{}': {e}", existing.display()))?;
        let mut resolved = resolved_base;
        for part in suffix.iter().rev() {
            resolved.push(part);
        }
        self.check_resolved(&resolved)?;
        Ok(resolved)
    }

    /// Open for reading with symlink/TOCTOU defenses applied.
    pub fn open_for_read(&self, raw: &str) -> Result<(File, PathBuf), String> {
        let resolved = self.resolve_for_read(raw)?;
        let file = open_nofollow(&resolved, false, false)
            .map_err(|e| format!("cannot open '{}': {e}", resolved.display()))?;
        verify_same_inode(&file, &resolved)?;
        Ok((file, resolved))
    }

    /// Open for writing (create + truncate) with the same defenses.
    pub fn open_for_write(&self, raw: &str) -> Result<(File, PathBuf), String> {
        let resolved = self.resolve_for_write(raw)?;
        if let Some(parent) = resolved.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| format!("cannot create '{}': {e}", parent.display()))?;
        }
        let file = open_nofollow(&resolved, true, true)
            .map_err(|e| format!("cannot open '{}': {e}", resolved.display()))?;
        verify_same_inode(&file, &resolved)?;
        Ok((file, resolved))
    }

    fn absolutize(&self, raw: &str) -> PathBuf {
        let path = Path::new(raw);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            // Relative paths resolve against the workspace root.
            self.roots[0].join(path)
        }
    }

    fn check_resolved(&self, resolved: &Path) -> Result<(), String> {
        let inside = self.roots.iter().any(|root| {
            std::fs::canonicalize(root)
                .map(|r| resolved.starts_with(&r))
                .unwrap_or(false)
        });
        if !inside {
            return Err(format!(
                "'{}' is outside the allowed directories",
                resolved.display()
            ));
        }

        let as_str = resolved.to_string_lossy();
        for pattern in BLOCKED_PATTERNS {
            let hit = if pattern.ends_with('/') {
                as_str.contains(&format!("/{pattern}")) || as_str.contains(*pattern)
            } else {
                as_str.ends_with(pattern)
                    || as_str.contains(&format!("/{pattern}/"))
            };
            if hit {
                return Err(format!("'{}' matches blocked pattern '{pattern}'", as_str));
            }
        }
        Ok(())
    }
}

#[cfg(unix)]
fn open_nofollow(path: &Path, write: bool, create: bool) -> std::io::Result<File> {
    use std::os::unix::fs::OpenOptionsExt;
    let mut opts = OpenOptions::new();
    opts.read(!write).custom_flags(libc::O_NOFOLLOW);
    if write {
        opts.write(true).truncate(true);
    }
    if create {
        opts.create(true);
    }
    opts.open(path)
}

#[cfg(not(unix))]
fn open_nofollow(path: &Path, write: bool, create: bool) -> std::io::Result<File> {
    let mut opts = OpenOptions::new();
    opts.read(!write);
    if write {
        opts.write(true).truncate(true);
    }
    if create {
        opts.create(true);
    }
    opts.open(path)
}

/// Compare the open descriptor against a fresh stat of the path: a mismatch
/// means the entry was swapped between resolution and open.
#[cfg(unix)]
fn verify_same_inode(file: &File, path: &Path) -> Result<(), String> {
    use std::os::unix::fs::MetadataExt;
    let fd_meta = file
        .metadata()
        .map_err(|e| format!("fstat failed: {e}"))?;
    let path_meta = std::fs::symlink_metadata(path)
        .map_err(|e| format!("stat failed: {e}"))?;
    if fd_meta.dev() != path_meta.dev() || fd_meta.ino() != path_meta.ino() {
        return Err(format!(
            "'{}' changed identity during open",
            path.display()
        ));
    }
    Ok(())
}

#[cfg(not(unix))]
fn verify_same_inode(_file: &File, _path: &Path) -> Result<(), String> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn policy_in(dir: &tempfile::TempDir) -> PathPolicy {
        PathPolicy::with_roots(vec![dir.path().to_path_buf()])
    }

    #[test]
    fn read_inside_root_is_allowed() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("note.txt");
        std::fs::write(&file, "hello").unwrap();

        let policy = policy_in(&dir);
        let resolved = policy.resolve_for_read(file.to_str().unwrap()).unwrap();
        assert!(resolved.ends_with("note.txt"));
    }

    #[test]
    fn relative_paths_resolve_against_workspace() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("rel.txt"), "x").unwrap();

        let policy = policy_in(&dir);
        assert!(policy.resolve_for_read("rel.txt").is_ok());
    }

    #[test]
    fn escape_via_dotdot_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let policy = policy_in(&dir);
        let outside = format!("{}/../../etc/hostname", dir.path().display());
        assert!(policy.resolve_for_read(&outside).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn symlink_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("real.txt");
        std::fs::write(&target, "secret").unwrap();
        let link = dir.path().join("link.txt");
        std::os::unix::fs::symlink(&target, &link).unwrap();

        let policy = policy_in(&dir);
        let err = policy.resolve_for_read(link.to_str().unwrap()).unwrap_err();
        assert!(err.contains("symlink"));
    }

    #[cfg(unix)]
    #[test]
    fn symlink_escaping_root_is_rejected_for_write() {
        let dir = tempfile::tempdir().unwrap();
        let link = dir.path().join("escape");
        std::os::unix::fs::symlink("/etc", &link).unwrap();

        let policy = policy_in(&dir);
        assert!(policy
            .resolve_for_write(link.join("evil.txt").to_str().unwrap())
            .is_err());
    }

    #[test]
    fn blocked_filenames_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let policy = policy_in(&dir);
        for name in [".bashrc", ".env", ".ssh/id_rsa", ".git/hooks/pre-commit"] {
            let path = dir.path().join(name);
            assert!(
                policy.resolve_for_write(path.to_str().unwrap()).is_err(),
                "{name} should be blocked"
            );
        }
    }

    #[test]
    fn write_to_new_nested_path_is_allowed() {
        let dir = tempfile::tempdir().unwrap();
        let policy = policy_in(&dir);
        let path = dir.path().join("a/b/new.txt");
        let resolved = policy.resolve_for_write(path.to_str().unwrap()).unwrap();
        assert!(resolved.ends_with("a/b/new.txt"));
    }

    #[test]
    fn open_for_read_returns_matching_descriptor() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("data.txt");
        std::fs::write(&file, "payload").unwrap();

        let policy = policy_in(&dir);
        let (mut f, _path) = policy.open_for_read(file.to_str().unwrap()).unwrap();
        let mut content = String::new();
        use std::io::Read;
        f.read_to_string(&mut content).unwrap();
        assert_eq!(content, "payload");
    }

    #[test]
    fn open_for_write_truncates() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("out.txt");
        std::fs::write(&file, "old content").unwrap();

        let policy = policy_in(&dir);
        let (mut f, _path) = policy.open_for_write(file.to_str().unwrap()).unwrap();
        f.write_all(b"new").unwrap();
        drop(f);
        assert_eq!(std::fs::read_to_string(&file).unwrap(), "new");
    }
}
