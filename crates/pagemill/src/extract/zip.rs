use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use tracing::{debug, warn};
use zip::result::ZipError;
use zip::ZipArchive;

use super::{CandidateEntry, ContainerExtractor, ExtractContext};
use crate::error::IngestError;

/// Zip / cbz, read in-process.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZipExtractor;

impl ContainerExtractor for ZipExtractor {
    fn extract(
        &self,
        source: &Path,
        ctx: &mut ExtractContext<'_>,
    ) -> Result<Vec<CandidateEntry>, IngestError> {
        let file = File::open(source).map_err(|e| IngestError::ReadSource {
            path: source.to_path_buf(),
            source: e,
        })?;
        let mut archive = ZipArchive::new(BufReader::new(file)).map_err(map_zip_error)?;
        debug!(entries = archive.len(), "Opened zip archive");

        let mut extracted = Vec::new();
        for index in 0..archive.len() {
            ctx.cancel.check()?;
            let mut entry = archive.by_index(index).map_err(map_zip_error)?;
            if entry.is_dir() {
                continue;
            }
            if entry.is_symlink() {
                warn!(entry = entry.name(), "Skipping symlink entry");
                continue;
            }

            // Raw name, so escaping names reach the workspace check instead
            // of being silently rewritten.
            let name = entry.name().to_string();
            if let Some(candidate) = ctx.accept_entry(&name, &mut entry)? {
                extracted.push(candidate);
            }
        }
        Ok(extracted)
    }
}

fn map_zip_error(err: ZipError) -> IngestError {
    match err {
        ZipError::UnsupportedArchive(msg) if msg == ZipError::PASSWORD_REQUIRED => {
            IngestError::PasswordProtected
        }
        ZipError::InvalidPassword => IngestError::PasswordProtected,
        other => IngestError::CorruptArchive(format!("zip: {}", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TraversalPolicy;
    use crate::error::ErrorKind;
    use crate::guard::{ResourceGuard, ResourceLimits};
    use crate::pipeline::CancelToken;
    use crate::workspace::ScratchWorkspace;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    fn build_zip(path: &Path, entries: &[(&str, &[u8])]) {
        let mut writer = zip::ZipWriter::new(File::create(path).unwrap());
        for (name, data) in entries {
            writer
                .start_file(*name, SimpleFileOptions::default())
                .unwrap();
            writer.write_all(data).unwrap();
        }
        writer.finish().unwrap();
    }

    fn run(
        source: &Path,
        policy: TraversalPolicy,
    ) -> Result<(Vec<CandidateEntry>, usize), IngestError> {
        let parent = tempfile::tempdir().unwrap();
        let workspace = ScratchWorkspace::create_in(parent.path(), "zip").unwrap();
        let mut guard = ResourceGuard::new(ResourceLimits::default());
        guard.admit(std::fs::metadata(source).unwrap().len()).unwrap();
        let cancel = CancelToken::new();
        let mut warnings = Vec::new();
        let mut ctx = ExtractContext::new(&workspace, &mut guard, &cancel, policy, &mut warnings);
        let entries = ZipExtractor.extract(source, &mut ctx)?;
        Ok((entries, warnings.len()))
    }

    #[test]
    fn test_extracts_pages_and_skips_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("chapter.cbz");
        build_zip(
            &source,
            &[
                ("ComicInfo.xml", b"<ComicInfo/>"),
                ("002.jpg", b"second"),
                ("__MACOSX/._002.jpg", b"fork"),
                ("001.jpg", b"first"),
            ],
        );

        let (entries, warnings) = run(&source, TraversalPolicy::RejectJob).unwrap();
        let names: Vec<&str> = entries.iter().map(|e| e.original_name.as_str()).collect();
        assert_eq!(names, vec!["002.jpg", "001.jpg"]);
        assert_eq!(entries[0].sequence, 1);
        assert_eq!(entries[1].size, 5);
        assert_eq!(warnings, 0);
    }

    #[test]
    fn test_traversal_entry_rejects_job() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("evil.zip");
        build_zip(&source, &[("001.jpg", b"ok"), ("../../escape.jpg", b"bad")]);

        let err = run(&source, TraversalPolicy::RejectJob).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PathTraversalRejected);
        assert!(!dir.path().join("escape.jpg").exists());
    }

    #[test]
    fn test_traversal_entry_skipped_under_skip_policy() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("evil.zip");
        build_zip(&source, &[("001.jpg", b"ok"), ("/abs/escape.jpg", b"bad")]);

        let (entries, warnings) = run(&source, TraversalPolicy::SkipEntry).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(warnings, 1);
    }

    #[test]
    fn test_encrypted_entry_is_password_protected() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("locked.zip");
        build_zip(&source, &[("001.jpg", b"secret")]);

        // Flag the entry as encrypted in both the local and central headers.
        let mut bytes = std::fs::read(&source).unwrap();
        let local = find(&bytes, b"PK\x03\x04").unwrap();
        bytes[local + 6] |= 1;
        let central = find(&bytes, b"PK\x01\x02").unwrap();
        bytes[central + 8] |= 1;
        std::fs::write(&source, &bytes).unwrap();

        let err = run(&source, TraversalPolicy::RejectJob).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PasswordProtected);
    }

    #[test]
    fn test_truncated_archive_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("broken.zip");
        std::fs::write(&source, b"PK\x03\x04\x14\x00\x00\x00garbage").unwrap();

        let err = run(&source, TraversalPolicy::RejectJob).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CorruptArchive);
    }

    fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
        haystack.windows(needle.len()).position(|w| w == needle)
    }
}
