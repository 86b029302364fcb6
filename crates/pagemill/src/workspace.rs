//! Per-job scratch directory.
//!
//! A `ScratchWorkspace` is owned by exactly one job and deletes its directory
//! when dropped, which covers early returns, timeouts, cancellation and panics
//! unwinding through the pipeline.

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::IngestError;
use crate::sanitize;

const ENTRIES_DIR: &str = "entries";

pub struct ScratchWorkspace {
    dir: Option<tempfile::TempDir>,
    root: PathBuf,
}

impl ScratchWorkspace {
    /// Creates a fresh, uniquely named directory under `parent`.
    pub fn create_in(parent: &Path, job_id: &str) -> Result<Self, IngestError> {
        fs::create_dir_all(parent).map_err(|e| IngestError::Workspace {
            path: parent.to_path_buf(),
            source: e,
        })?;

        let dir = tempfile::Builder::new()
            .prefix(&format!("job-{}-", job_id))
            .tempdir_in(parent)
            .map_err(|e| IngestError::Workspace {
                path: parent.to_path_buf(),
                source: e,
            })?;
        let root = dir.path().to_path_buf();

        let entries = root.join(ENTRIES_DIR);
        fs::create_dir(&entries).map_err(|e| IngestError::Workspace {
            path: entries.clone(),
            source: e,
        })?;

        debug!(workspace = %root.display(), "Created scratch workspace");

        Ok(Self {
            dir: Some(dir),
            root,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolves an archive entry name to a path inside the workspace.
    ///
    /// Fails for absolute names, drive prefixes and any `..` that climbs above
    /// the root, independent of whatever checks the decoder performed.
    pub fn resolve_entry(&self, entry_name: &str) -> Result<PathBuf, IngestError> {
        let relative =
            normalize_entry_name(entry_name).ok_or_else(|| IngestError::PathTraversalRejected {
                entry: sanitize::entry_label(entry_name),
            })?;
        let resolved = self.root.join(relative);
        if !resolved.starts_with(&self.root) {
            return Err(IngestError::PathTraversalRejected {
                entry: sanitize::entry_label(entry_name),
            });
        }
        Ok(resolved)
    }

    /// Workspace-relative location for the `sequence`-th extracted entry.
    pub fn entry_slot(&self, sequence: usize, extension: &str) -> PathBuf {
        Path::new(ENTRIES_DIR).join(format!("{:06}.{}", sequence, extension))
    }

    /// Absolute path of a workspace-relative path.
    pub fn path_of(&self, relative: &Path) -> PathBuf {
        self.root.join(relative)
    }

    /// Creates a new file at a workspace-relative path, failing if it exists.
    pub fn create_file(&self, relative: &Path) -> Result<File, IngestError> {
        let path = self.path_of(relative);
        fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| IngestError::Workspace { path, source: e })
    }
}

impl Drop for ScratchWorkspace {
    fn drop(&mut self) {
        if let Some(dir) = self.dir.take() {
            match dir.close() {
                Ok(()) => debug!(workspace = %self.root.display(), "Removed scratch workspace"),
                Err(e) => warn!(
                    workspace = %self.root.display(),
                    error = %e,
                    "Failed to remove scratch workspace"
                ),
            }
        }
    }
}

/// Lexically normalizes an archive entry name into a relative path.
///
/// Returns `None` when the name is empty, absolute, carries a drive prefix or
/// climbs above its root.
fn normalize_entry_name(name: &str) -> Option<PathBuf> {
    let unified = name.replace('\\', "/");
    if unified.starts_with('/') || has_drive_prefix(&unified) || unified.contains('\0') {
        return None;
    }

    let mut parts: Vec<&str> = Vec::new();
    for part in unified.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop()?;
            }
            other => parts.push(other),
        }
    }

    if parts.is_empty() {
        return None;
    }
    Some(parts.iter().collect())
}

fn has_drive_prefix(name: &str) -> bool {
    let bytes = name.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_workspace_removed_on_drop() {
        let parent = tempfile::tempdir().unwrap();
        let root = {
            let ws = ScratchWorkspace::create_in(parent.path(), "abc").unwrap();
            let mut file = ws.create_file(&ws.entry_slot(1, "png")).unwrap();
            std::io::Write::write_all(&mut file, b"data").unwrap();
            assert!(ws.root().join("entries/000001.png").exists());
            ws.root().to_path_buf()
        };
        assert!(!root.exists());
    }

    #[test]
    fn test_workspace_removed_on_panic() {
        let parent = tempfile::tempdir().unwrap();
        let parent_path = parent.path().to_path_buf();
        let result = std::panic::catch_unwind(move || {
            let _ws = ScratchWorkspace::create_in(&parent_path, "boom").unwrap();
            panic!("decoder crashed");
        });
        assert!(result.is_err());
        assert_eq!(std::fs::read_dir(parent.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_workspaces_are_distinct() {
        let parent = tempfile::tempdir().unwrap();
        let a = ScratchWorkspace::create_in(parent.path(), "same").unwrap();
        let b = ScratchWorkspace::create_in(parent.path(), "same").unwrap();
        assert_ne!(a.root(), b.root());
    }

    #[test]
    fn test_resolve_entry_accepts_nested_names() {
        let parent = tempfile::tempdir().unwrap();
        let ws = ScratchWorkspace::create_in(parent.path(), "j").unwrap();

        let resolved = ws.resolve_entry("chapter 1/./pages/../001.jpg").unwrap();
        assert_eq!(resolved, ws.root().join("chapter 1").join("001.jpg"));

        let resolved = ws.resolve_entry("scans\\002.png").unwrap();
        assert_eq!(resolved, ws.root().join("scans").join("002.png"));
    }

    #[test]
    fn test_resolve_entry_rejects_escapes() {
        let parent = tempfile::tempdir().unwrap();
        let ws = ScratchWorkspace::create_in(parent.path(), "j").unwrap();

        for name in [
            "../evil.jpg",
            "pages/../../evil.jpg",
            "/etc/passwd",
            "..\\..\\evil.png",
            "C:\\Windows\\evil.png",
            "c:evil.png",
            "",
            "./",
        ] {
            let err = ws.resolve_entry(name).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::PathTraversalRejected, "{}", name);
        }
    }

    #[test]
    fn test_rejected_entry_name_is_escaped_and_bounded() {
        let parent = tempfile::tempdir().unwrap();
        let ws = ScratchWorkspace::create_in(parent.path(), "j").unwrap();
        let name = format!("../\u{1b}[2J{}.png", "a".repeat(4_000));

        let err = ws.resolve_entry(&name).unwrap_err();
        let message = err.user_message();
        assert!(!message.contains('\u{1b}'));
        assert!(message.contains("\\u{1b}[2J"));
        assert!(message.chars().count() < 400);
    }

    #[test]
    fn test_create_file_refuses_overwrite() {
        let parent = tempfile::tempdir().unwrap();
        let ws = ScratchWorkspace::create_in(parent.path(), "j").unwrap();
        let slot = ws.entry_slot(7, "jpg");
        ws.create_file(&slot).unwrap();
        assert!(ws.create_file(&slot).is_err());
    }
}
