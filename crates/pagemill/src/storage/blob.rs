use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use tracing::debug;

use super::BlobStore;
use crate::error::StorageError;

const MAX_CHAPTER_ID_LEN: usize = 128;

/// Storage key of a committed page: `{chapter_id}/{ordinal}.{ext}`.
pub fn page_key(chapter_id: &str, ordinal: u32, extension: &str) -> String {
    format!("{}/{}.{}", chapter_id, ordinal, extension)
}

/// Chapter ids become directory names, so only a conservative alphabet is allowed.
pub fn validate_chapter_id(chapter_id: &str) -> Result<(), StorageError> {
    let invalid = |reason: &str| StorageError::InvalidKey {
        key: chapter_id.to_string(),
        reason: reason.to_string(),
    };

    if chapter_id.is_empty() {
        return Err(invalid("chapter id is empty"));
    }
    if chapter_id.len() > MAX_CHAPTER_ID_LEN {
        return Err(invalid("chapter id is too long"));
    }
    if chapter_id.starts_with('.') {
        return Err(invalid("chapter id starts with a dot"));
    }
    if !chapter_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return Err(invalid("chapter id may only contain letters, digits, '-', '_' and '.'"));
    }
    Ok(())
}

/// Moves `src` to `dst`, failing if `dst` exists.
///
/// A hard link claims the name atomically; when linking is impossible
/// (another device, unsupported filesystem) the bytes are copied into a file
/// opened with `create_new`.
fn move_no_clobber(src: &Path, dst: &Path) -> Result<(), StorageError> {
    match fs::hard_link(src, dst) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            return Err(StorageError::FileExists(dst.to_path_buf()));
        }
        Err(_) => copy_no_clobber(src, dst)?,
    }

    if let Err(e) = fs::remove_file(src) {
        debug!(path = %src.display(), error = %e, "Could not remove moved source");
    }
    Ok(())
}

fn copy_no_clobber(src: &Path, dst: &Path) -> Result<(), StorageError> {
    let move_error = |e: io::Error| StorageError::MoveFile {
        from: src.to_path_buf(),
        to: dst.to_path_buf(),
        source: e,
    };

    let mut input = fs::File::open(src).map_err(move_error)?;
    let mut output = match fs::OpenOptions::new().write(true).create_new(true).open(dst) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            return Err(StorageError::FileExists(dst.to_path_buf()));
        }
        Err(e) => return Err(move_error(e)),
    };

    if let Err(e) = io::copy(&mut input, &mut output).and_then(|_| output.sync_all()) {
        drop(output);
        let _ = fs::remove_file(dst);
        return Err(move_error(e));
    }
    Ok(())
}

/// `BlobStore` rooted in a local directory.
pub struct FileBlobStore {
    root: PathBuf,
}

impl FileBlobStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute path for a key. Keys must be relative and free of `..`.
    pub fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(key);
        let clean = !key.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !clean {
            return Err(StorageError::InvalidKey {
                key: key.to_string(),
                reason: "keys must be relative paths without '..'".to_string(),
            });
        }
        Ok(self.root.join(relative))
    }

    fn ensure_directory(&self, path: &Path) -> Result<(), StorageError> {
        if !path.exists() {
            fs::create_dir_all(path).map_err(|e| StorageError::CreateDirectory {
                path: path.to_path_buf(),
                source: e,
            })?;
        }
        Ok(())
    }
}

impl BlobStore for FileBlobStore {
    fn put_file(&self, source: &Path, key: &str) -> Result<(), StorageError> {
        let destination = self.path_for(key)?;
        if let Some(parent) = destination.parent() {
            self.ensure_directory(parent)?;
        }
        move_no_clobber(source, &destination)
    }

    fn delete(&self, key: &str) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(StorageError::RemoveFile { path, source: e }),
        }

        // Drop the chapter directory once it is empty; a non-empty one stays.
        if let Some(parent) = path.parent() {
            if parent != self.root {
                let _ = fs::remove_dir(parent);
            }
        }
        Ok(())
    }
}
