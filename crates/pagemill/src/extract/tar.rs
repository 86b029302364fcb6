use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use flate2::read::MultiGzDecoder;
use tar::{Archive, EntryType};
use tracing::{debug, warn};

use super::{CandidateEntry, ContainerExtractor, ExtractContext};
use crate::detect::TarCompression;
use crate::error::IngestError;

/// Plain or gzip-compressed tar, streamed in-process.
#[derive(Debug, Clone, Copy)]
pub struct TarExtractor {
    compression: TarCompression,
}

impl TarExtractor {
    pub fn new(compression: TarCompression) -> Self {
        Self { compression }
    }

    fn unpack<R: Read>(
        &self,
        reader: R,
        ctx: &mut ExtractContext<'_>,
    ) -> Result<Vec<CandidateEntry>, IngestError> {
        let mut archive = Archive::new(reader);
        let entries = archive.entries().map_err(corrupt)?;

        let mut extracted = Vec::new();
        for entry in entries {
            ctx.cancel.check()?;
            let mut entry = entry.map_err(corrupt)?;
            let name = String::from_utf8_lossy(&entry.path_bytes()).into_owned();

            match entry.header().entry_type() {
                EntryType::Regular | EntryType::Continuous => {}
                EntryType::Directory => continue,
                EntryType::Symlink | EntryType::Link => {
                    warn!(entry = %name, "Skipping link entry");
                    continue;
                }
                other => {
                    debug!(entry = %name, kind = ?other, "Skipping special entry");
                    continue;
                }
            }

            if let Some(candidate) = ctx.accept_entry(&name, &mut entry)? {
                extracted.push(candidate);
            }
        }
        Ok(extracted)
    }
}

impl ContainerExtractor for TarExtractor {
    fn extract(
        &self,
        source: &Path,
        ctx: &mut ExtractContext<'_>,
    ) -> Result<Vec<CandidateEntry>, IngestError> {
        let file = File::open(source).map_err(|e| IngestError::ReadSource {
            path: source.to_path_buf(),
            source: e,
        })?;
        let reader = BufReader::new(file);
        match self.compression {
            TarCompression::None => self.unpack(reader, ctx),
            TarCompression::Gzip => self.unpack(MultiGzDecoder::new(reader), ctx),
        }
    }
}

fn corrupt(err: std::io::Error) -> IngestError {
    IngestError::CorruptArchive(format!("tar: {}", err))
}
