//! Full decode of every candidate before anything is committed.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use image::ImageReader;
use tracing::{debug, warn};

use crate::config::{CorruptEntryPolicy, RasterFormat};
use crate::error::IngestError;
use crate::extract::CandidateEntry;
use crate::pipeline::{CancelToken, PipelineWarning};
use crate::sanitize;
use crate::workspace::ScratchWorkspace;

/// How far from the end a JPEG end-of-image marker is searched for.
const JPEG_TAIL_WINDOW: u64 = 2048;

/// A candidate that decoded cleanly in an allowed format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedPage {
    pub original_name: String,
    pub relative_path: PathBuf,
    pub format: RasterFormat,
    pub width: u32,
    pub height: u32,
    pub size: u64,
    pub sequence: usize,
}

pub struct EntryValidator {
    allowed: Vec<RasterFormat>,
    policy: CorruptEntryPolicy,
}

impl EntryValidator {
    pub fn new(allowed: Vec<RasterFormat>, policy: CorruptEntryPolicy) -> Self {
        Self { allowed, policy }
    }

    pub fn validate(
        &self,
        workspace: &ScratchWorkspace,
        candidates: Vec<CandidateEntry>,
        cancel: &CancelToken,
        warnings: &mut Vec<PipelineWarning>,
    ) -> Result<Vec<ValidatedPage>, IngestError> {
        let mut pages = Vec::with_capacity(candidates.len());

        for candidate in candidates {
            cancel.check()?;
            let path = workspace.path_of(&candidate.relative_path);

            match self.check(&path, candidate.size) {
                Ok((format, width, height)) => pages.push(ValidatedPage {
                    original_name: candidate.original_name,
                    relative_path: candidate.relative_path,
                    format,
                    width,
                    height,
                    size: candidate.size,
                    sequence: candidate.sequence,
                }),
                Err(reason) => {
                    let entry = sanitize::entry_label(&candidate.original_name);
                    match self.policy {
                        CorruptEntryPolicy::RejectAll => {
                            warn!(%entry, %reason, "Rejecting upload");
                            return Err(IngestError::PartialDecodeFailure { entry, reason });
                        }
                        CorruptEntryPolicy::SkipAndWarn => {
                            warn!(%entry, %reason, "Skipping entry");
                            warnings.push(PipelineWarning::EntrySkipped { entry, reason });
                        }
                    }
                }
            }
        }

        if pages.is_empty() {
            return Err(IngestError::NoValidPages);
        }
        debug!(pages = pages.len(), "Validated entries");
        Ok(pages)
    }

    /// Decodes one file. The error is a human-readable reason.
    fn check(&self, path: &Path, size: u64) -> Result<(RasterFormat, u32, u32), String> {
        if size == 0 {
            return Err("empty file".to_string());
        }

        let mut reader = ImageReader::open(path)
            .and_then(|r| r.with_guessed_format())
            .map_err(|e| format!("unreadable: {}", e))?;
        let format = reader
            .format()
            .and_then(RasterFormat::from_image_format)
            .ok_or_else(|| "not a recognized image".to_string())?;
        if !self.allowed.contains(&format) {
            return Err(format!("{} images are not allowed", format));
        }
        if format == RasterFormat::Jpeg && !has_jpeg_end_marker(path, size)? {
            return Err("truncated JPEG (missing end-of-image marker)".to_string());
        }

        reader.limits(image::Limits::default());
        let image = reader
            .decode()
            .map_err(|e| format!("decode failed: {}", e))?;
        Ok((format, image.width(), image.height()))
    }
}

fn has_jpeg_end_marker(path: &Path, size: u64) -> Result<bool, String> {
    let window = size.min(JPEG_TAIL_WINDOW);
    let mut file = File::open(path).map_err(|e| format!("unreadable: {}", e))?;
    file.seek(SeekFrom::Start(size - window))
        .map_err(|e| format!("unreadable: {}", e))?;
    let mut tail = Vec::with_capacity(window as usize);
    file.take(window)
        .read_to_end(&mut tail)
        .map_err(|e| format!("unreadable: {}", e))?;
    Ok(tail.windows(2).any(|w| w == [0xFF, 0xD9]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::default_allowed_raster_formats;
    use crate::error::ErrorKind;
    use std::io::Cursor;

    fn encode(format: image::ImageFormat) -> Vec<u8> {
        let img = image::RgbImage::from_pixel(16, 24, image::Rgb([200, 10, 10]));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, format).unwrap();
        out.into_inner()
    }

    struct Fixture {
        _parent: tempfile::TempDir,
        workspace: ScratchWorkspace,
        candidates: Vec<CandidateEntry>,
    }

    fn fixture(files: &[(&str, Vec<u8>)]) -> Fixture {
        let parent = tempfile::tempdir().unwrap();
        let workspace = ScratchWorkspace::create_in(parent.path(), "v").unwrap();
        let candidates = files
            .iter()
            .enumerate()
            .map(|(i, (name, data))| {
                let ext = name.rsplit('.').next().unwrap();
                let relative_path = workspace.entry_slot(i + 1, ext);
                std::fs::write(workspace.path_of(&relative_path), data).unwrap();
                CandidateEntry {
                    original_name: name.to_string(),
                    size: data.len() as u64,
                    relative_path,
                    sequence: i + 1,
                }
            })
            .collect();
        Fixture {
            _parent: parent,
            workspace,
            candidates,
        }
    }

    fn validator(policy: CorruptEntryPolicy) -> EntryValidator {
        EntryValidator::new(default_allowed_raster_formats(), policy)
    }

    #[test]
    fn test_valid_images_pass_with_dimensions() {
        let f = fixture(&[
            ("001.png", encode(image::ImageFormat::Png)),
            ("002.jpg", encode(image::ImageFormat::Jpeg)),
        ]);
        let mut warnings = Vec::new();
        let pages = validator(CorruptEntryPolicy::RejectAll)
            .validate(&f.workspace, f.candidates, &CancelToken::new(), &mut warnings)
            .unwrap();

        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0].format, RasterFormat::Png);
        assert_eq!(pages[1].format, RasterFormat::Jpeg);
        assert_eq!((pages[0].width, pages[0].height), (16, 24));
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_truncated_jpeg_rejects_job() {
        let mut jpeg = encode(image::ImageFormat::Jpeg);
        jpeg.truncate(jpeg.len() - 4);
        let f = fixture(&[("001.png", encode(image::ImageFormat::Png)), ("002.jpg", jpeg)]);

        let err = validator(CorruptEntryPolicy::RejectAll)
            .validate(&f.workspace, f.candidates, &CancelToken::new(), &mut Vec::new())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PartialDecodeFailure);
        match err {
            IngestError::PartialDecodeFailure { entry, .. } => assert_eq!(entry, "002.jpg"),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_skip_and_warn_keeps_survivors() {
        let mut png = encode(image::ImageFormat::Png);
        png.truncate(png.len() / 2);
        let f = fixture(&[
            ("001.png", encode(image::ImageFormat::Png)),
            ("002.png", png),
            ("003.png", Vec::new()),
            ("004.png", b"definitely not an image".to_vec()),
        ]);
        let mut warnings = Vec::new();

        let pages = validator(CorruptEntryPolicy::SkipAndWarn)
            .validate(&f.workspace, f.candidates, &CancelToken::new(), &mut warnings)
            .unwrap();
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].original_name, "001.png");
        assert_eq!(warnings.len(), 3);
    }

    #[test]
    fn test_disallowed_format_is_rejected() {
        let f = fixture(&[("001.bmp", encode(image::ImageFormat::Bmp))]);
        let err = validator(CorruptEntryPolicy::RejectAll)
            .validate(&f.workspace, f.candidates, &CancelToken::new(), &mut Vec::new())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PartialDecodeFailure);
    }

    #[test]
    fn test_no_survivors_is_no_valid_pages() {
        let f = fixture(&[("001.png", Vec::new())]);
        let err = validator(CorruptEntryPolicy::SkipAndWarn)
            .validate(&f.workspace, f.candidates, &CancelToken::new(), &mut Vec::new())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoValidPages);

        let f = fixture(&[]);
        let err = validator(CorruptEntryPolicy::RejectAll)
            .validate(&f.workspace, f.candidates, &CancelToken::new(), &mut Vec::new())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoValidPages);
    }
}
