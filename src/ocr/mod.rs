//! External OCR tooling.
//!
//! Defines the [`OcrPipeline`] and [`PreviewRenderer`] traits so the
//! subprocess-backed implementations can be swapped out (tests use
//! in-process fakes or `sh` scripts).

pub mod command;
pub mod pipeline;
pub mod results;
pub mod viewer;

use std::path::Path;

use crate::error::JobError;
use crate::workspace::Job;

/// Runs OCR over a prepared job, leaving `results/output_*.jsonl` behind.
#[async_trait::async_trait]
pub trait OcrPipeline: Send + Sync {
    fn name(&self) -> &str;

    /// Returns the pipeline's captured stdout for the processing log.
    async fn run(&self, job: &Job) -> Result<String, JobError>;
}

/// Renders an HTML comparison view of an output file into `out_dir`.
#[async_trait::async_trait]
pub trait PreviewRenderer: Send + Sync {
    fn name(&self) -> &str;

    async fn render(&self, output_file: &Path, out_dir: &Path) -> Result<(), JobError>;
}
