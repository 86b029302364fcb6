//! Rar and 7z containers, unpacked by an external `7z` process.
//!
//! The archive is listed first (`7z l -slt`), then every accepted file entry
//! is streamed out of its own `7z e -so` process, so the guard sees each
//! chunk before it reaches the workspace.

use std::collections::HashSet;
use std::path::Path;

use tracing::{debug, warn};

use super::{CandidateEntry, ContainerExtractor, ExtractContext};
use crate::config::DecoderConfig;
use crate::error::IngestError;
use crate::pipeline::CancelToken;
use crate::sandbox::{DecoderCommand, DecoderError, DecoderLimits, DecoderProcess};
use crate::sanitize;

const MAX_LISTING_BYTES: usize = 4 * 1024 * 1024;
const LISTING_SEPARATOR: &str = "----------";

/// One file or directory as reported by `7z l -slt`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListedEntry {
    pub path: String,
    pub size: Option<u64>,
    pub is_dir: bool,
    pub is_link: bool,
    pub encrypted: bool,
}

/// The `7z` binary and the ceilings it runs under.
#[derive(Debug, Clone)]
pub struct ArchiveTool {
    binary: String,
    limits: DecoderLimits,
}

impl ArchiveTool {
    pub fn new(binary: impl Into<String>, limits: DecoderLimits) -> Self {
        Self {
            binary: binary.into(),
            limits,
        }
    }

    pub fn from_config(config: &DecoderConfig) -> Self {
        Self::new(config.seven_zip_binary.clone(), DecoderLimits::from_config(config))
    }

    fn command(&self) -> DecoderCommand {
        DecoderCommand::new(&self.binary, self.limits)
    }

    pub fn list(
        &self,
        source: &Path,
        cancel: &CancelToken,
    ) -> Result<Vec<ListedEntry>, IngestError> {
        // An empty -p keeps 7z from ever prompting for a password.
        let output = self
            .command()
            .args(["l", "-slt", "-y", "-p", "--"])
            .arg(source)
            .output(cancel, MAX_LISTING_BYTES)
            .map_err(archive_error)?;

        let text = String::from_utf8_lossy(&output);
        Ok(parse_listing(&text))
    }

    /// Starts a process that writes one entry's bytes to its stdout.
    pub fn open_entry(
        &self,
        source: &Path,
        entry_path: &str,
        cancel: &CancelToken,
    ) -> Result<DecoderProcess, IngestError> {
        self.command()
            .args(["e", "-so", "-y", "-p", "-spd", "--"])
            .arg(source)
            .arg(entry_path)
            .spawn(cancel)
            .map_err(archive_error)
    }
}

/// Rar and 7z strategy.
#[derive(Debug, Clone)]
pub struct ExternalExtractor {
    tool: ArchiveTool,
}

impl ExternalExtractor {
    pub fn new(tool: ArchiveTool) -> Self {
        Self { tool }
    }
}

impl ContainerExtractor for ExternalExtractor {
    fn extract(
        &self,
        source: &Path,
        ctx: &mut ExtractContext<'_>,
    ) -> Result<Vec<CandidateEntry>, IngestError> {
        let listing = self.tool.list(source, ctx.cancel)?;
        debug!(entries = listing.len(), "Listed archive");

        if listing.iter().any(|entry| entry.encrypted) {
            return Err(IngestError::PasswordProtected);
        }
        // `7z e` selects by path, so a repeated path would concatenate every copy.
        if let Some(path) = first_duplicate_path(&listing) {
            return Err(IngestError::CorruptArchive(format!(
                "duplicate entry path '{}'",
                sanitize::entry_label(path)
            )));
        }

        let mut extracted = Vec::new();
        for entry in listing {
            if entry.is_dir {
                continue;
            }
            if entry.is_link {
                warn!(entry = %entry.path, "Skipping link entry");
                continue;
            }
            if !ctx.screen(&entry.path)? {
                continue;
            }
            if let Some(size) = entry.size {
                ctx.guard.check_projected(size)?;
            }

            let mut process = self.tool.open_entry(source, &entry.path, ctx.cancel)?;
            let candidate = ctx.write_screened(&entry.path, &mut process)?;
            process.finish().map_err(archive_error)?;
            extracted.push(candidate);
        }
        Ok(extracted)
    }
}

fn first_duplicate_path(listing: &[ListedEntry]) -> Option<&str> {
    let mut seen = HashSet::new();
    listing
        .iter()
        .filter(|entry| !entry.is_dir)
        .map(|entry| entry.path.as_str())
        .find(|path| !seen.insert(*path))
}

fn archive_error(err: DecoderError) -> IngestError {
    if err.stderr().is_some_and(mentions_password) {
        return IngestError::PasswordProtected;
    }
    err.into_ingest(IngestError::CorruptArchive)
}

fn mentions_password(stderr: &str) -> bool {
    let lower = stderr.to_ascii_lowercase();
    lower.contains("wrong password") || lower.contains("encrypted archive")
}

/// Parses the technical listing printed by `7z l -slt`.
///
/// Only the blocks after the `----------` separator describe entries; the
/// block before it describes the archive itself.
pub fn parse_listing(text: &str) -> Vec<ListedEntry> {
    let body = match text.find(LISTING_SEPARATOR) {
        Some(at) => &text[at + LISTING_SEPARATOR.len()..],
        None => return Vec::new(),
    };

    let mut entries = Vec::new();
    let mut current: Option<ListedEntry> = None;
    for line in body.lines() {
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() {
            if let Some(entry) = current.take() {
                entries.push(entry);
            }
            continue;
        }

        let (key, value) = match line.split_once(" = ") {
            Some((key, value)) => (key.trim(), value),
            None => match line.strip_suffix(" =") {
                Some(key) => (key.trim(), ""),
                None => continue,
            },
        };

        if key == "Path" {
            if let Some(entry) = current.take() {
                entries.push(entry);
            }
            current = Some(ListedEntry {
                path: value.to_string(),
                ..ListedEntry::default()
            });
            continue;
        }

        let Some(entry) = current.as_mut() else {
            continue;
        };
        match key {
            "Size" => entry.size = value.trim().parse().ok(),
            "Folder" => entry.is_dir = value.trim() == "+",
            "Encrypted" => entry.encrypted = value.trim() == "+",
            "Symbolic Link" | "Hard Link" | "Link" => entry.is_link |= !value.trim().is_empty(),
            "Attributes" => {
                let attributes = value.trim();
                if attributes.starts_with('D') {
                    entry.is_dir = true;
                }
                // Unix mode string, e.g. "A_ lrwxrwxrwx".
                if attributes
                    .split_whitespace()
                    .any(|part| part.len() == 10 && part.starts_with('l'))
                {
                    entry.is_link = true;
                }
            }
            _ => {}
        }
    }
    if let Some(entry) = current.take() {
        entries.push(entry);
    }
    entries
}
