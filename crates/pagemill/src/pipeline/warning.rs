use std::fmt;

use serde::Serialize;

/// Non-fatal findings collected while a job runs. They travel with the
/// result so callers can tell the user what was left out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum PipelineWarning {
    /// The filename extension named a different container than the bytes.
    FormatMismatch { declared: String, detected: String },
    /// An entry name pointed outside the workspace and was not extracted.
    UnsafeEntrySkipped { entry: String },
    /// An entry failed validation and was dropped.
    EntrySkipped { entry: String, reason: String },
}

impl fmt::Display for PipelineWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineWarning::FormatMismatch { declared, detected } => write!(
                f,
                "File is named like a {} but contains a {}",
                declared, detected
            ),
            PipelineWarning::UnsafeEntrySkipped { entry } => {
                write!(f, "Skipped unsafe entry '{}'", entry)
            }
            PipelineWarning::EntrySkipped { entry, reason } => {
                write!(f, "Skipped '{}': {}", entry, reason)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_warning_serializes_with_type_tag() {
        let warning = PipelineWarning::EntrySkipped {
            entry: "004.jpg".to_string(),
            reason: "truncated JPEG".to_string(),
        };
        let json = serde_json::to_value(&warning).unwrap();
        assert_eq!(json["type"], "entry_skipped");
        assert_eq!(json["entry"], "004.jpg");
        assert_eq!(warning.to_string(), "Skipped '004.jpg': truncated JPEG");
    }
}
