pub mod cancel;
pub mod config;
pub mod context;
pub mod progress;
pub mod runner;
pub mod warning;

pub use cancel::CancelToken;
pub use config::PipelineConfig;
pub use context::PipelineContext;
pub use progress::{BroadcastProgress, NoopProgress, ProgressEvent, ProgressReporter};
pub use runner::IngestPipeline;
pub use warning::PipelineWarning;
