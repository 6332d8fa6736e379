//! Subprocess-backed OCR pipeline (`<pipeline> <job_dir> --pdfs <input.pdf>`).

use std::ffi::OsStr;
use std::time::Duration;
use tracing::{debug, info};

use super::command;
use super::OcrPipeline;
use crate::config::CommandSpec;
use crate::error::JobError;
use crate::workspace::Job;

pub struct CommandPipeline {
    spec: CommandSpec,
    timeout: Option<Duration>,
}

impl CommandPipeline {
    pub fn new(spec: CommandSpec, timeout: Option<Duration>) -> Self {
        Self { spec, timeout }
    }
}

#[async_trait::async_trait]
impl OcrPipeline for CommandPipeline {
    fn name(&self) -> &str {
        "pipeline"
    }

    async fn run(&self, job: &Job) -> Result<String, JobError> {
        info!("Running OCR pipeline `{}` for job {}", self.spec.display(), job.timestamp);

        let input = job.input_path();
        let args = [job.dir.as_os_str(), OsStr::new("--pdfs"), input.as_os_str()];
        let output = command::run("pipeline", &self.spec, args, self.timeout).await?;

        if !output.stderr.is_empty() {
            debug!("Pipeline stderr for job {}:\n{}", job.timestamp, output.stderr);
        }
        info!("OCR pipeline finished for job {}", job.timestamp);
        Ok(output.stdout)
    }
}
