//! Per-request orchestration: workspace → pipeline → results → preview.
//!
//! Every outcome, including hard failures, is turned into a
//! [`ProcessOutput`] for display. Stages run strictly in order.

use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::error::JobError;
use crate::ocr::results::{self, ParsedOutput, ResultLookup};
use crate::ocr::viewer::find_preview_html;
use crate::ocr::{OcrPipeline, PreviewRenderer};
use crate::preview;
use crate::workspace::{Job, Workspace};

pub const UPLOAD_PROMPT: &str = "Please upload a PDF file";

/// How far a request got before its outputs were displayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStage {
    Idle,
    WorkspacePrepared,
    PipelineRan,
    ResultParsed,
    PreviewRendered,
}

/// The four display regions plus the last stage reached.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessOutput {
    pub log: String,
    pub text: String,
    pub html: String,
    pub metadata: Vec<(String, String)>,
    pub stage: JobStage,
}

impl ProcessOutput {
    fn log_only(log: String, stage: JobStage) -> Self {
        Self {
            log,
            text: String::new(),
            html: String::new(),
            metadata: Vec::new(),
            stage,
        }
    }
}

pub struct Processor {
    workspace: Workspace,
    pipeline: Arc<dyn OcrPipeline>,
    viewer: Arc<dyn PreviewRenderer>,
}

impl Processor {
    pub fn new(workspace: Workspace, pipeline: Arc<dyn OcrPipeline>, viewer: Arc<dyn PreviewRenderer>) -> Self {
        Self {
            workspace,
            pipeline,
            viewer,
        }
    }

    /// Process an uploaded PDF. `None` or an empty upload short-circuits
    /// with a prompt and touches neither the filesystem nor any subprocess.
    pub async fn process(&self, upload: Option<&[u8]>) -> ProcessOutput {
        let Some(data) = upload.filter(|d| !d.is_empty()) else {
            return ProcessOutput::log_only(UPLOAD_PROMPT.to_string(), JobStage::Idle);
        };

        let mut stage = JobStage::Idle;
        match self.run(data, &mut stage).await {
            Ok(output) => output,
            Err(e) => {
                error!("Job failed at {:?}: {}", stage, e);
                ProcessOutput::log_only(e.user_message(), stage)
            }
        }
    }

    async fn run(&self, data: &[u8], stage: &mut JobStage) -> Result<ProcessOutput, JobError> {
        let (job, _lease) = self.workspace.create_job(data)?;
        *stage = JobStage::WorkspacePrepared;

        info!("Job {}: running {}", job.timestamp, self.pipeline.name());
        let mut log = self.pipeline.run(&job).await?;
        *stage = JobStage::PipelineRan;

        let parsed = match results::locate_and_parse(&job.results_dir())? {
            ResultLookup::Found(parsed) => parsed,
            soft => {
                let reason = soft.soft_failure_message().unwrap_or_default();
                warn!("Job {}: {}", job.timestamp, reason);
                return Ok(ProcessOutput::log_only(
                    format!("{}\n\nLog output:\n{}", reason, log),
                    *stage,
                ));
            }
        };
        *stage = JobStage::ResultParsed;

        if parsed.extra_records > 0 {
            log.push_str(&format!(
                "\nOutput contained {} additional record(s); only the first is shown",
                parsed.extra_records
            ));
        }

        let html = self.render_preview(&job, &parsed, &mut log).await;
        if !html.is_empty() {
            *stage = JobStage::PreviewRendered;
        }

        info!("Job {} complete ({} chars of text)", job.timestamp, parsed.record.text.len());

        Ok(ProcessOutput {
            log,
            metadata: results::metadata_rows(&parsed.record.metadata),
            text: parsed.record.text,
            html,
            stage: *stage,
        })
    }

    /// Render and post-process the preview. Failures only add a note to `log`.
    async fn render_preview(&self, job: &Job, parsed: &ParsedOutput, log: &mut String) -> String {
        let out_dir = job.previews_dir();

        if let Err(e) = self.viewer.render(&parsed.path, &out_dir).await {
            warn!("Preview generation by {} failed for job {}: {}", self.viewer.name(), job.timestamp, e);
            log.push_str(&format!("\nFailed to generate HTML preview: {}", e));
            return String::new();
        }

        let Some(page) = find_preview_html(&out_dir) else {
            warn!("Viewer produced no HTML for job {}", job.timestamp);
            log.push_str("\nNo HTML preview was produced");
            return String::new();
        };

        match std::fs::read_to_string(&page) {
            Ok(raw) => preview::enhance(&raw),
            Err(e) => {
                warn!("Failed to read preview {:?}: {}", page, e);
                log.push_str(&format!("\nFailed to read HTML preview: {}", e));
                String::new()
            }
        }
    }
}
