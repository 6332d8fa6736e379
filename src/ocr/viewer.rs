//! Subprocess-backed HTML preview renderer.
//!
//! The viewer is pointed at a per-job output directory so concurrent jobs
//! never read each other's previews.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use super::command;
use super::PreviewRenderer;
use crate::config::CommandSpec;
use crate::error::JobError;

pub struct CommandViewer {
    spec: CommandSpec,
    timeout: Option<Duration>,
}

impl CommandViewer {
    pub fn new(spec: CommandSpec, timeout: Option<Duration>) -> Self {
        Self { spec, timeout }
    }
}

#[async_trait::async_trait]
impl PreviewRenderer for CommandViewer {
    fn name(&self) -> &str {
        "viewer"
    }

    async fn render(&self, output_file: &Path, out_dir: &Path) -> Result<(), JobError> {
        info!("Rendering preview for {:?} into {:?}", output_file, out_dir);
        let args = [output_file.as_os_str(), OsStr::new("--output_dir"), out_dir.as_os_str()];
        command::run("viewer", &self.spec, args, self.timeout).await?;
        Ok(())
    }
}

/// First `*.html` file in `dir` by name, if any.
pub fn find_preview_html(dir: &Path) -> Option<PathBuf> {
    let mut pages: Vec<PathBuf> = std::fs::read_dir(dir)
        .ok()?
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && path.extension().map(|e| e == "html").unwrap_or(false))
        .collect();
    pages.sort();
    pages.into_iter().next()
}
