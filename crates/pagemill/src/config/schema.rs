use serde::{Deserialize, Serialize};

pub const DEFAULT_MAX_INPUT_BYTES: u64 = 100 * 1024 * 1024;
pub const DEFAULT_MAX_DECOMPRESSED_BYTES: u64 = 1024 * 1024 * 1024;
pub const DEFAULT_MAX_DECOMPRESSION_RATIO: f64 = 100.0;
pub const DEFAULT_MAX_PAGE_COUNT: usize = 1000;
pub const DEFAULT_RENDER_DPI: u32 = 150;
pub const DEFAULT_JOB_TIMEOUT_SECONDS: u64 = 300;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub version: String,
    pub scratch_directory: String,
    pub storage_directory: String,
    /// Defaults to `~/.pagemill/data/pagemill.db`.
    #[serde(default)]
    pub database_path: Option<String>,
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_max_input_bytes")]
    pub max_input_bytes: u64,
    #[serde(default = "default_max_decompressed_bytes")]
    pub max_decompressed_bytes: u64,
    #[serde(default = "default_max_decompression_ratio")]
    pub max_decompression_ratio: f64,
    #[serde(default = "default_max_page_count")]
    pub max_page_count: usize,
    #[serde(default = "default_allowed_raster_formats")]
    pub allowed_raster_formats: Vec<RasterFormat>,
    #[serde(default = "default_render_dpi")]
    pub document_render_dpi: u32,
    #[serde(default = "default_job_timeout_seconds")]
    pub job_timeout_seconds: u64,
    #[serde(default)]
    pub corrupt_entry_policy: CorruptEntryPolicy,
    #[serde(default)]
    pub traversal_policy: TraversalPolicy,
    #[serde(default)]
    pub decoders: DecoderConfig,
}

fn default_worker_count() -> usize {
    num_cpus::get()
}

fn default_queue_capacity() -> usize {
    64
}

fn default_max_input_bytes() -> u64 {
    DEFAULT_MAX_INPUT_BYTES
}

fn default_max_decompressed_bytes() -> u64 {
    DEFAULT_MAX_DECOMPRESSED_BYTES
}

fn default_max_decompression_ratio() -> f64 {
    DEFAULT_MAX_DECOMPRESSION_RATIO
}

fn default_max_page_count() -> usize {
    DEFAULT_MAX_PAGE_COUNT
}

pub fn default_allowed_raster_formats() -> Vec<RasterFormat> {
    vec![RasterFormat::Jpeg, RasterFormat::Png, RasterFormat::Webp, RasterFormat::Gif]
}

fn default_render_dpi() -> u32 {
    DEFAULT_RENDER_DPI
}

fn default_job_timeout_seconds() -> u64 {
    DEFAULT_JOB_TIMEOUT_SECONDS
}

/// Raster formats a page image may be stored in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RasterFormat {
    Jpeg,
    Png,
    Gif,
    Webp,
    Bmp,
    Tiff,
}

impl RasterFormat {
    pub fn from_image_format(format: image::ImageFormat) -> Option<Self> {
        match format {
            image::ImageFormat::Jpeg => Some(RasterFormat::Jpeg),
            image::ImageFormat::Png => Some(RasterFormat::Png),
            image::ImageFormat::Gif => Some(RasterFormat::Gif),
            image::ImageFormat::WebP => Some(RasterFormat::Webp),
            image::ImageFormat::Bmp => Some(RasterFormat::Bmp),
            image::ImageFormat::Tiff => Some(RasterFormat::Tiff),
            _ => None,
        }
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" | "jpe" | "jfif" => Some(RasterFormat::Jpeg),
            "png" => Some(RasterFormat::Png),
            "gif" => Some(RasterFormat::Gif),
            "webp" => Some(RasterFormat::Webp),
            "bmp" => Some(RasterFormat::Bmp),
            "tif" | "tiff" => Some(RasterFormat::Tiff),
            _ => None,
        }
    }

    /// Canonical extension used for stored pages.
    pub fn extension(&self) -> &'static str {
        match self {
            RasterFormat::Jpeg => "jpg",
            RasterFormat::Png => "png",
            RasterFormat::Gif => "gif",
            RasterFormat::Webp => "webp",
            RasterFormat::Bmp => "bmp",
            RasterFormat::Tiff => "tiff",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            RasterFormat::Jpeg => "image/jpeg",
            RasterFormat::Png => "image/png",
            RasterFormat::Gif => "image/gif",
            RasterFormat::Webp => "image/webp",
            RasterFormat::Bmp => "image/bmp",
            RasterFormat::Tiff => "image/tiff",
        }
    }
}

impl std::fmt::Display for RasterFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.extension())
    }
}

/// What to do when one candidate entry fails validation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorruptEntryPolicy {
    #[default]
    RejectAll,
    SkipAndWarn,
}

/// What to do when an entry name escapes the scratch workspace.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraversalPolicy {
    #[default]
    RejectJob,
    SkipEntry,
}

/// External decoder binaries and the ceilings they run under.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecoderConfig {
    #[serde(default = "default_seven_zip_binary")]
    pub seven_zip_binary: String,
    #[serde(default = "default_pdftoppm_binary")]
    pub pdftoppm_binary: String,
    #[serde(default = "default_memory_limit_bytes")]
    pub memory_limit_bytes: u64,
    #[serde(default = "default_cpu_limit_seconds")]
    pub cpu_limit_seconds: u64,
}

fn default_seven_zip_binary() -> String {
    "7z".to_string()
}

fn default_pdftoppm_binary() -> String {
    "pdftoppm".to_string()
}

fn default_memory_limit_bytes() -> u64 {
    1024 * 1024 * 1024
}

fn default_cpu_limit_seconds() -> u64 {
    120
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            seven_zip_binary: default_seven_zip_binary(),
            pdftoppm_binary: default_pdftoppm_binary(),
            memory_limit_bytes: default_memory_limit_bytes(),
            cpu_limit_seconds: default_cpu_limit_seconds(),
        }
    }
}
