//! Container extraction into the scratch workspace.
//!
//! Each container family has one strategy. Strategies never write where an
//! entry name points: names are only checked for escapes and carried as data,
//! while bytes land in generated slots under `entries/`.

use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::config::{DecoderConfig, RasterFormat, TraversalPolicy};
use crate::detect::SourceFormat;
use crate::error::IngestError;
use crate::guard::ResourceGuard;
use crate::pipeline::{CancelToken, PipelineWarning};
use crate::sanitize;
use crate::workspace::ScratchWorkspace;

pub mod external;
pub mod single;
pub mod tar;
pub mod zip;

pub use self::external::{ArchiveTool, ExternalExtractor};
pub use self::single::ImageExtractor;
pub use self::tar::TarExtractor;
pub use self::zip::ZipExtractor;

const COPY_CHUNK: usize = 64 * 1024;

/// A file materialized in the workspace, not yet validated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateEntry {
    /// Name as it appeared in the container (or the generated page name).
    pub original_name: String,
    pub size: u64,
    /// Location relative to the workspace root.
    pub relative_path: PathBuf,
    /// Position in container or render order, starting at 1.
    pub sequence: usize,
}

pub trait ContainerExtractor {
    fn extract(
        &self,
        source: &Path,
        ctx: &mut ExtractContext<'_>,
    ) -> Result<Vec<CandidateEntry>, IngestError>;
}

/// Extraction strategy, chosen once from the detected format.
pub enum Extractor {
    Zip(ZipExtractor),
    Rar(ExternalExtractor),
    SevenZip(ExternalExtractor),
    Tar(TarExtractor),
    Image(ImageExtractor),
}

impl Extractor {
    /// Returns `None` for paginated documents, which are rendered instead.
    pub fn for_format(
        format: SourceFormat,
        decoders: &DecoderConfig,
        declared_filename: &str,
    ) -> Option<Self> {
        match format {
            SourceFormat::Zip => Some(Extractor::Zip(ZipExtractor)),
            SourceFormat::Rar => Some(Extractor::Rar(ExternalExtractor::new(
                ArchiveTool::from_config(decoders),
            ))),
            SourceFormat::SevenZip => Some(Extractor::SevenZip(ExternalExtractor::new(
                ArchiveTool::from_config(decoders),
            ))),
            SourceFormat::Tar { compression } => {
                Some(Extractor::Tar(TarExtractor::new(compression)))
            }
            SourceFormat::Image { format } => Some(Extractor::Image(ImageExtractor::new(
                format,
                declared_filename,
            ))),
            SourceFormat::Document => None,
        }
    }

    pub fn family(&self) -> &'static str {
        match self {
            Extractor::Zip(_) => "zip",
            Extractor::Rar(_) => "rar",
            Extractor::SevenZip(_) => "7z",
            Extractor::Tar(_) => "tar",
            Extractor::Image(_) => "image",
        }
    }

    pub fn extract(
        &self,
        source: &Path,
        ctx: &mut ExtractContext<'_>,
    ) -> Result<Vec<CandidateEntry>, IngestError> {
        let entries = match self {
            Extractor::Zip(e) => e.extract(source, ctx),
            Extractor::Rar(e) | Extractor::SevenZip(e) => e.extract(source, ctx),
            Extractor::Tar(e) => e.extract(source, ctx),
            Extractor::Image(e) => e.extract(source, ctx),
        }?;
        debug!(
            family = self.family(),
            entries = entries.len(),
            bytes = ctx.guard.output_bytes(),
            "Extraction finished"
        );
        Ok(entries)
    }
}

/// Everything a strategy needs for one job.
pub struct ExtractContext<'a> {
    pub workspace: &'a ScratchWorkspace,
    pub guard: &'a mut ResourceGuard,
    pub cancel: &'a CancelToken,
    pub traversal_policy: TraversalPolicy,
    pub warnings: &'a mut Vec<PipelineWarning>,
    next_sequence: usize,
}

impl<'a> ExtractContext<'a> {
    pub fn new(
        workspace: &'a ScratchWorkspace,
        guard: &'a mut ResourceGuard,
        cancel: &'a CancelToken,
        traversal_policy: TraversalPolicy,
        warnings: &'a mut Vec<PipelineWarning>,
    ) -> Self {
        Self {
            workspace,
            guard,
            cancel,
            traversal_policy,
            warnings,
            next_sequence: 0,
        }
    }

    /// Decides whether a container entry should be extracted.
    ///
    /// Escaping names fail the job or are skipped according to the traversal
    /// policy. Non-page entries (metadata, hidden files, resource forks) are
    /// skipped silently.
    pub fn screen(&mut self, name: &str) -> Result<bool, IngestError> {
        self.cancel.check()?;

        if let Err(err) = self.workspace.resolve_entry(name) {
            match self.traversal_policy {
                TraversalPolicy::RejectJob => {
                    warn!(
                        entry = %sanitize::entry_label(name),
                        "Entry escapes the workspace, rejecting upload"
                    );
                    return Err(err);
                }
                TraversalPolicy::SkipEntry => {
                    let entry = sanitize::entry_label(name);
                    warn!(entry = %entry, "Entry escapes the workspace, skipping it");
                    self.warnings.push(PipelineWarning::UnsafeEntrySkipped { entry });
                    return Ok(false);
                }
            }
        }

        if !is_page_candidate(name) {
            debug!(entry = name, "Skipping non-page entry");
            return Ok(false);
        }

        Ok(true)
    }

    /// Screens and, if accepted, streams one entry into the workspace.
    pub fn accept_entry<R: Read + ?Sized>(
        &mut self,
        name: &str,
        reader: &mut R,
    ) -> Result<Option<CandidateEntry>, IngestError> {
        if !self.screen(name)? {
            return Ok(None);
        }
        self.write_screened(name, reader).map(Some)
    }

    /// Writes an entry that already passed `screen`, keeping its extension.
    pub fn write_screened<R: Read + ?Sized>(
        &mut self,
        name: &str,
        reader: &mut R,
    ) -> Result<CandidateEntry, IngestError> {
        let extension = entry_extension(name).unwrap_or_else(|| "bin".to_string());
        self.write_entry(name, &extension, reader)
    }

    /// Copies `reader` into a fresh slot, charging every chunk to the guard
    /// before it is written.
    pub fn write_entry<R: Read + ?Sized>(
        &mut self,
        name: &str,
        extension: &str,
        reader: &mut R,
    ) -> Result<CandidateEntry, IngestError> {
        self.guard.admit_entries(1)?;
        let (sequence, relative_path) = self.reserve_slot(extension);
        let file = self.workspace.create_file(&relative_path)?;
        let absolute = self.workspace.path_of(&relative_path);
        let mut writer = BufWriter::new(file);

        let mut buf = vec![0u8; COPY_CHUNK];
        let mut size = 0u64;
        loop {
            let n = match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    return Err(IngestError::CorruptArchive(format!(
                        "Failed to read entry '{}': {}",
                        name, e
                    )))
                }
            };
            self.guard.consume(n as u64)?;
            self.cancel.check()?;
            writer
                .write_all(&buf[..n])
                .map_err(|e| IngestError::Workspace {
                    path: absolute.clone(),
                    source: e,
                })?;
            size += n as u64;
        }
        writer.flush().map_err(|e| IngestError::Workspace {
            path: absolute.clone(),
            source: e,
        })?;

        Ok(CandidateEntry {
            original_name: name.to_string(),
            size,
            relative_path,
            sequence,
        })
    }

    /// Allocates the next workspace slot without writing to it.
    pub fn reserve_slot(&mut self, extension: &str) -> (usize, PathBuf) {
        self.next_sequence += 1;
        let relative = self.workspace.entry_slot(self.next_sequence, extension);
        (self.next_sequence, relative)
    }
}

/// Whether an entry name looks like a page image worth extracting.
pub fn is_page_candidate(name: &str) -> bool {
    let unified = name.replace('\\', "/");
    let components: Vec<&str> = unified.split('/').filter(|c| !c.is_empty()).collect();

    let file_name = match components.last() {
        Some(file_name) => *file_name,
        None => return false,
    };
    if components.iter().any(|c| c.eq_ignore_ascii_case("__MACOSX")) {
        return false;
    }
    if file_name.starts_with('.') {
        return false;
    }

    entry_extension(file_name)
        .and_then(|ext| RasterFormat::from_extension(&ext))
        .is_some()
}

fn entry_extension(name: &str) -> Option<String> {
    let file_name = name.rsplit(['/', '\\']).next()?;
    let (_, ext) = file_name.rsplit_once('.')?;
    if ext.is_empty() || ext.len() > 8 || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::guard::ResourceLimits;

    #[test]
    fn test_page_candidates() {
        assert!(is_page_candidate("001.jpg"));
        assert!(is_page_candidate("Chapter 1/Page 10.PNG"));
        assert!(is_page_candidate("scans\\p2.webp"));
        assert!(!is_page_candidate("ComicInfo.xml"));
        assert!(!is_page_candidate("__MACOSX/._001.jpg"));
        assert!(!is_page_candidate(".thumbnail.jpg"));
        assert!(!is_page_candidate("Thumbs.db"));
        assert!(!is_page_candidate("pages/"));
        assert!(!is_page_candidate("README"));
    }

    #[test]
    fn test_entry_extension() {
        assert_eq!(entry_extension("a/b/001.JPG").as_deref(), Some("jpg"));
        assert_eq!(entry_extension("weird.name.png").as_deref(), Some("png"));
        assert_eq!(entry_extension("noext"), None);
        assert_eq!(entry_extension("evil.p/ng"), None);
    }

    #[test]
    fn test_write_entry_charges_guard_and_stops_at_ceiling() {
        let parent = tempfile::tempdir().unwrap();
        let workspace = ScratchWorkspace::create_in(parent.path(), "t").unwrap();
        let mut guard = ResourceGuard::new(ResourceLimits {
            max_input_bytes: 1_000_000,
            max_decompressed_bytes: 100_000,
            max_decompression_ratio: 1_000.0,
            max_page_count: 10,
        });
        guard.admit(1_000).unwrap();
        let cancel = CancelToken::new();
        let mut warnings = Vec::new();
        let mut ctx = ExtractContext::new(
            &workspace,
            &mut guard,
            &cancel,
            TraversalPolicy::RejectJob,
            &mut warnings,
        );

        let small = vec![7u8; 10_000];
        let entry = ctx
            .accept_entry("001.png", &mut small.as_slice())
            .unwrap()
            .unwrap();
        assert_eq!(entry.size, 10_000);
        assert_eq!(entry.sequence, 1);
        assert_eq!(
            std::fs::read(workspace.path_of(&entry.relative_path)).unwrap(),
            small
        );

        let mut huge = std::io::repeat(0u8).take(10_000_000);
        let err = ctx.accept_entry("002.png", &mut huge).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SizeExceeded);
        assert!(guard.output_bytes() <= 100_000);
    }

    #[test]
    fn test_traversal_policy_skip_records_warning() {
        let parent = tempfile::tempdir().unwrap();
        let workspace = ScratchWorkspace::create_in(parent.path(), "t").unwrap();
        let mut guard = ResourceGuard::new(ResourceLimits::default());
        guard.admit(1_000).unwrap();
        let cancel = CancelToken::new();
        let mut warnings = Vec::new();

        {
            let mut ctx = ExtractContext::new(
                &workspace,
                &mut guard,
                &cancel,
                TraversalPolicy::SkipEntry,
                &mut warnings,
            );
            let skipped = ctx
                .accept_entry("../../evil.png", &mut &b"x"[..])
                .unwrap();
            assert!(skipped.is_none());
        }
        assert_eq!(
            warnings,
            vec![PipelineWarning::UnsafeEntrySkipped {
                entry: "../../evil.png".to_string()
            }]
        );
        assert!(!parent.path().join("evil.png").exists());
    }

    #[test]
    fn test_cancelled_context_refuses_entries() {
        let parent = tempfile::tempdir().unwrap();
        let workspace = ScratchWorkspace::create_in(parent.path(), "t").unwrap();
        let mut guard = ResourceGuard::new(ResourceLimits::default());
        let cancel = CancelToken::new();
        cancel.cancel();
        let mut warnings = Vec::new();
        let mut ctx = ExtractContext::new(
            &workspace,
            &mut guard,
            &cancel,
            TraversalPolicy::RejectJob,
            &mut warnings,
        );
        let err = ctx.accept_entry("001.png", &mut &b"x"[..]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
    }
}
