//! Upload classification by byte signature, with the declared filename as a fallback.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use serde::Serialize;
use tracing::warn;

use crate::config::RasterFormat;
use crate::error::IngestError;

/// Bytes inspected when sniffing. PDF headers may be preceded by junk,
/// tar magic sits at offset 257.
pub const SNIFF_LEN: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TarCompression {
    None,
    Gzip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case", tag = "family")]
pub enum SourceFormat {
    Zip,
    Rar,
    SevenZip,
    Tar { compression: TarCompression },
    Document,
    Image { format: RasterFormat },
}

impl SourceFormat {
    pub fn label(&self) -> &'static str {
        match self {
            SourceFormat::Zip => "zip",
            SourceFormat::Rar => "rar",
            SourceFormat::SevenZip => "7z",
            SourceFormat::Tar { .. } => "tar",
            SourceFormat::Document => "document",
            SourceFormat::Image { .. } => "image",
        }
    }

    /// Whether two detections name the same container family.
    fn same_family(&self, other: &SourceFormat) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Detection {
    pub format: SourceFormat,
    pub by_signature: bool,
    /// The extension named a different family than the signature.
    pub extension_mismatch: Option<SourceFormat>,
}

pub fn detect(header: &[u8], declared_filename: &str) -> Result<Detection, IngestError> {
    let sniffed = sniff_signature(header);
    let by_extension = format_from_extension(declared_filename);

    match (sniffed, by_extension) {
        (Some(format), ext) => {
            let extension_mismatch = ext.filter(|e| !e.same_family(&format));
            if let Some(declared) = extension_mismatch {
                warn!(
                    declared = declared.label(),
                    detected = format.label(),
                    "Declared extension disagrees with file signature, trusting signature"
                );
            }
            Ok(Detection {
                format,
                by_signature: true,
                extension_mismatch,
            })
        }
        (None, Some(format)) => Ok(Detection {
            format,
            by_signature: false,
            extension_mismatch: None,
        }),
        (None, None) => Err(IngestError::UnsupportedFormat(format!(
            "unrecognized content for '{}'",
            declared_filename
        ))),
    }
}

/// Reads the leading bytes of `path` and classifies it.
pub fn detect_file(path: &Path, declared_filename: &str) -> Result<Detection, IngestError> {
    let file = File::open(path).map_err(|e| IngestError::ReadSource {
        path: path.to_path_buf(),
        source: e,
    })?;
    let mut header = Vec::with_capacity(SNIFF_LEN);
    file.take(SNIFF_LEN as u64)
        .read_to_end(&mut header)
        .map_err(|e| IngestError::ReadSource {
            path: path.to_path_buf(),
            source: e,
        })?;
    detect(&header, declared_filename)
}

pub fn sniff_signature(data: &[u8]) -> Option<SourceFormat> {
    match data {
        [b'P', b'K', 0x03, 0x04, ..]
        | [b'P', b'K', 0x05, 0x06, ..]
        | [b'P', b'K', 0x07, 0x08, ..] => {
            Some(SourceFormat::Zip)
        }
        [b'R', b'a', b'r', b'!', 0x1A, 0x07, ..] => Some(SourceFormat::Rar),
        [b'7', b'z', 0xBC, 0xAF, 0x27, 0x1C, ..] => Some(SourceFormat::SevenZip),
        [0x1F, 0x8B, ..] => Some(SourceFormat::Tar {
            compression: TarCompression::Gzip,
        }),
        _ if is_tar_header(data) => Some(SourceFormat::Tar {
            compression: TarCompression::None,
        }),
        _ => raster_signature(data)
            .or_else(|| is_pdf_header(data).then_some(SourceFormat::Document)),
    }
}

// Image magic sits at offset zero, so it wins over a `%PDF-` found later in the header.
fn raster_signature(data: &[u8]) -> Option<SourceFormat> {
    image::guess_format(data)
        .ok()
        .and_then(RasterFormat::from_image_format)
        .map(|format| SourceFormat::Image { format })
}

fn is_tar_header(data: &[u8]) -> bool {
    // POSIX "ustar\0" and old GNU "ustar  \0" both start with the same five bytes.
    data.len() >= 512 && &data[257..262] == b"ustar"
}

fn is_pdf_header(data: &[u8]) -> bool {
    let window = &data[..data.len().min(SNIFF_LEN)];
    window.windows(5).any(|w| w == b"%PDF-")
}

pub fn format_from_extension(filename: &str) -> Option<SourceFormat> {
    let lower = filename.to_ascii_lowercase();
    if lower.ends_with(".tar.gz") || lower.ends_with(".tgz") {
        return Some(SourceFormat::Tar {
            compression: TarCompression::Gzip,
        });
    }

    let ext = Path::new(&lower).extension()?.to_str()?;
    match ext {
        "zip" | "cbz" => Some(SourceFormat::Zip),
        "rar" | "cbr" => Some(SourceFormat::Rar),
        "7z" | "cb7" => Some(SourceFormat::SevenZip),
        "tar" | "cbt" => Some(SourceFormat::Tar {
            compression: TarCompression::None,
        }),
        "pdf" => Some(SourceFormat::Document),
        other => RasterFormat::from_extension(other).map(|format| SourceFormat::Image { format }),
    }
}
