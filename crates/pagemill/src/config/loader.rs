use std::path::Path;

use crate::config::schema::Config;
use crate::error::ConfigError;

const SCHEMA_JSON: &str = include_str!("../../../../schema/config-v1.json");

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let json_value: serde_json::Value = serde_json::from_str(content)?;

    validate_schema(&json_value)?;

    let config: Config = serde_json::from_value(json_value)?;

    validate_config(&config)?;

    Ok(config)
}

fn validate_schema(json_value: &serde_json::Value) -> Result<(), ConfigError> {
    let schema: serde_json::Value =
        serde_json::from_str(SCHEMA_JSON).map_err(|e| ConfigError::Validation {
            message: format!("Invalid embedded schema JSON: {}", e),
        })?;

    let validator = jsonschema::validator_for(&schema).map_err(|e| ConfigError::Validation {
        message: format!("Failed to compile JSON schema: {}", e),
    })?;

    let error_messages: Vec<String> = validator
        .iter_errors(json_value)
        .map(|e| e.to_string())
        .collect();
    if !error_messages.is_empty() {
        return Err(ConfigError::SchemaValidation {
            errors: error_messages.join("; "),
        });
    }

    Ok(())
}

fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.version != "1.0" {
        return Err(ConfigError::Validation {
            message: format!("Unsupported config version: {}", config.version),
        });
    }

    if config.worker_count == 0 || config.queue_capacity == 0 {
        return Err(ConfigError::Validation {
            message: "worker_count and queue_capacity must be greater than zero".to_string(),
        });
    }

    if config.max_input_bytes == 0 || config.max_decompressed_bytes == 0 {
        return Err(ConfigError::Validation {
            message: "Byte limits must be greater than zero".to_string(),
        });
    }

    if !config.max_decompression_ratio.is_finite() || config.max_decompression_ratio <= 1.0 {
        return Err(ConfigError::Validation {
            message: format!(
                "max_decompression_ratio must be a finite number above 1, got {}",
                config.max_decompression_ratio
            ),
        });
    }

    if config.max_page_count == 0 {
        return Err(ConfigError::Validation {
            message: "max_page_count must be greater than zero".to_string(),
        });
    }

    if !(36..=1200).contains(&config.document_render_dpi) {
        return Err(ConfigError::Validation {
            message: format!(
                "document_render_dpi must be between 36 and 1200, got {}",
                config.document_render_dpi
            ),
        });
    }

    if config.job_timeout_seconds == 0 {
        return Err(ConfigError::Validation {
            message: "job_timeout_seconds must be greater than zero".to_string(),
        });
    }

    if config.allowed_raster_formats.is_empty() {
        return Err(ConfigError::Validation {
            message: "allowed_raster_formats must list at least one format".to_string(),
        });
    }

    // Rendered document pages are always PNG.
    if !config
        .allowed_raster_formats
        .contains(&crate::config::RasterFormat::Png)
    {
        log::warn!("PNG is not an allowed raster format; document uploads will be rejected");
    }

    Ok(())
}
