use crate::commit::PageRecord;
use crate::detect::Detection;
use crate::worker::job::IngestJob;

use super::warning::PipelineWarning;

pub struct PipelineContext {
    // Input
    pub job: IngestJob,

    // Detect step result
    pub detection: Option<Detection>,

    // Extract/render step result
    pub candidate_count: usize,

    // Validate step result
    pub valid_page_count: usize,

    // Commit step result
    pub pages: Vec<PageRecord>,

    // Non-fatal warnings
    pub warnings: Vec<PipelineWarning>,
}

impl PipelineContext {
    pub fn new(job: IngestJob) -> Self {
        Self {
            job,
            detection: None,
            candidate_count: 0,
            valid_page_count: 0,
            pages: Vec::new(),
            warnings: Vec::new(),
        }
    }
}
