//! Per-job resource accounting.
//!
//! A `ResourceGuard` is created for exactly one job and consulted before
//! extraction starts and again for every chunk of output. Rejections happen
//! before the offending bytes are written, so a job never holds more than the
//! configured ceiling on disk.

use crate::config::schema::{
    DEFAULT_MAX_DECOMPRESSED_BYTES, DEFAULT_MAX_DECOMPRESSION_RATIO, DEFAULT_MAX_INPUT_BYTES,
    DEFAULT_MAX_PAGE_COUNT,
};
use crate::error::IngestError;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResourceLimits {
    pub max_input_bytes: u64,
    pub max_decompressed_bytes: u64,
    pub max_decompression_ratio: f64,
    pub max_page_count: usize,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_input_bytes: DEFAULT_MAX_INPUT_BYTES,
            max_decompressed_bytes: DEFAULT_MAX_DECOMPRESSED_BYTES,
            max_decompression_ratio: DEFAULT_MAX_DECOMPRESSION_RATIO,
            max_page_count: DEFAULT_MAX_PAGE_COUNT,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResourceGuard {
    limits: ResourceLimits,
    input_bytes: u64,
    output_bytes: u64,
    entries: usize,
    enforce_ratio: bool,
}

impl ResourceGuard {
    pub fn new(limits: ResourceLimits) -> Self {
        Self {
            limits,
            input_bytes: 0,
            output_bytes: 0,
            entries: 0,
            enforce_ratio: true,
        }
    }

    /// Checks the declared upload size. Called once, before any extraction work.
    pub fn admit(&mut self, declared_size: u64) -> Result<(), IngestError> {
        if declared_size > self.limits.max_input_bytes {
            return Err(IngestError::SizeExceeded(format!(
                "upload is {} bytes, the limit is {} bytes",
                declared_size, self.limits.max_input_bytes
            )));
        }
        self.input_bytes = declared_size;
        Ok(())
    }

    /// Rasterized document pages are not decompressed data, so only the
    /// absolute output ceiling applies to them.
    pub fn disable_ratio_check(&mut self) {
        self.enforce_ratio = false;
    }

    /// Charges `additional` output bytes against the job. Must be called
    /// before those bytes are written.
    pub fn consume(&mut self, additional: u64) -> Result<(), IngestError> {
        let total = self.output_bytes.saturating_add(additional);

        if total > self.limits.max_decompressed_bytes {
            return Err(IngestError::SizeExceeded(format!(
                "extracted content exceeds {} bytes",
                self.limits.max_decompressed_bytes
            )));
        }

        if self.enforce_ratio && additional > 0 {
            let ratio = if self.input_bytes == 0 {
                f64::INFINITY
            } else {
                total as f64 / self.input_bytes as f64
            };
            if ratio > self.limits.max_decompression_ratio {
                return Err(IngestError::DecompressionRatioExceeded {
                    ratio,
                    limit: self.limits.max_decompression_ratio,
                });
            }
        }

        self.output_bytes = total;
        Ok(())
    }

    /// Checks whether `additional` bytes would fit without charging them.
    ///
    /// Used with sizes an archive declares up front, so an obviously
    /// oversized entry is refused before a decoder is started for it.
    pub fn check_projected(&self, additional: u64) -> Result<(), IngestError> {
        self.clone().consume(additional)
    }

    /// Reserves `count` page slots.
    pub fn admit_entries(&mut self, count: usize) -> Result<(), IngestError> {
        let total = self.entries.saturating_add(count);
        if total > self.limits.max_page_count {
            return Err(IngestError::SizeExceeded(format!(
                "more than {} pages",
                self.limits.max_page_count
            )));
        }
        self.entries = total;
        Ok(())
    }

    pub fn output_bytes(&self) -> u64 {
        self.output_bytes
    }

    pub fn entries(&self) -> usize {
        self.entries
    }

    /// Bytes that may still be written before the absolute ceiling is hit.
    pub fn remaining_bytes(&self) -> u64 {
        self.limits
            .max_decompressed_bytes
            .saturating_sub(self.output_bytes)
    }

    pub fn limits(&self) -> &ResourceLimits {
        &self.limits
    }
}
