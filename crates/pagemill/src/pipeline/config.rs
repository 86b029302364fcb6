use std::path::PathBuf;
use std::time::Duration;

use crate::config::schema::{
    default_allowed_raster_formats, DEFAULT_JOB_TIMEOUT_SECONDS, DEFAULT_RENDER_DPI,
};
use crate::config::{Config, CorruptEntryPolicy, DecoderConfig, RasterFormat, TraversalPolicy};
use crate::guard::ResourceLimits;

pub struct PipelineConfig {
    pub scratch_directory: PathBuf,
    pub limits: ResourceLimits,
    pub allowed_raster_formats: Vec<RasterFormat>,
    pub render_dpi: u32,
    pub job_timeout: Duration,
    pub corrupt_entry_policy: CorruptEntryPolicy,
    pub traversal_policy: TraversalPolicy,
    pub decoders: DecoderConfig,
}

impl PipelineConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            scratch_directory: PathBuf::from(&config.scratch_directory),
            limits: ResourceLimits {
                max_input_bytes: config.max_input_bytes,
                max_decompressed_bytes: config.max_decompressed_bytes,
                max_decompression_ratio: config.max_decompression_ratio,
                max_page_count: config.max_page_count,
            },
            allowed_raster_formats: config.allowed_raster_formats.clone(),
            render_dpi: config.document_render_dpi,
            job_timeout: Duration::from_secs(config.job_timeout_seconds),
            corrupt_entry_policy: config.corrupt_entry_policy,
            traversal_policy: config.traversal_policy,
            decoders: config.decoders.clone(),
        }
    }

    /// Default limits and policies, scratch space under `scratch_directory`.
    pub fn with_scratch_directory<P: Into<PathBuf>>(scratch_directory: P) -> Self {
        Self {
            scratch_directory: scratch_directory.into(),
            limits: ResourceLimits::default(),
            allowed_raster_formats: default_allowed_raster_formats(),
            render_dpi: DEFAULT_RENDER_DPI,
            job_timeout: Duration::from_secs(DEFAULT_JOB_TIMEOUT_SECONDS),
            corrupt_entry_policy: CorruptEntryPolicy::default(),
            traversal_policy: TraversalPolicy::default(),
            decoders: DecoderConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::load_config_from_str;

    #[test]
    fn test_from_config_copies_limits() {
        let config = load_config_from_str(
            r#"{"version": "1.0", "scratch_directory": "/srv/scratch",
                "storage_directory": "/srv/pages",
                "max_input_bytes": 2048, "max_page_count": 12, "job_timeout_seconds": 9,
                "corrupt_entry_policy": "skip_and_warn"}"#,
        )
        .unwrap();

        let pipeline = PipelineConfig::from_config(&config);
        assert_eq!(pipeline.scratch_directory, PathBuf::from("/srv/scratch"));
        assert_eq!(pipeline.limits.max_input_bytes, 2048);
        assert_eq!(pipeline.limits.max_page_count, 12);
        assert_eq!(pipeline.job_timeout, Duration::from_secs(9));
        assert_eq!(pipeline.corrupt_entry_policy, CorruptEntryPolicy::SkipAndWarn);
        assert_eq!(pipeline.render_dpi, 150);
    }
}
