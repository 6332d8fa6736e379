//! Hard failures of a processing job.
//!
//! Soft failures (missing results directory, missing or empty output file)
//! are not errors; see [`crate::ocr::results::ResultLookup`].

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum JobError {
    #[error("{context} ({}): {source}", .path.display())]
    Filesystem {
        context: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to start {tool}: {source}")]
    Spawn {
        tool: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("{tool} exited with {status}: {stderr}")]
    Pipeline {
        tool: &'static str,
        status: String,
        stderr: String,
    },

    #[error("{tool} timed out after {}s", .after.as_secs())]
    Timeout { tool: &'static str, after: Duration },

    #[error("invalid output record: {0}")]
    Parse(#[from] serde_json::Error),
}

impl JobError {
    pub fn filesystem(context: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Filesystem {
            context,
            path: path.into(),
            source,
        }
    }

    /// Message shown to the user in the log region.
    pub fn user_message(&self) -> String {
        match self {
            Self::Pipeline { stderr, .. } => format!("Pipeline execution failed: {}", stderr),
            Self::Timeout { tool, after } => {
                format!("{} timed out after {}s", capitalize(tool), after.as_secs())
            }
            other => format!("Error during processing: {}", other),
        }
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_message_carries_stderr_verbatim() {
        let err = JobError::Pipeline {
            tool: "pipeline",
            status: "exit status: 2".to_string(),
            stderr: "CUDA out of memory\n".to_string(),
        };
        assert_eq!(err.user_message(), "Pipeline execution failed: CUDA out of memory\n");
    }

    #[test]
    fn test_timeout_message() {
        let err = JobError::Timeout {
            tool: "pipeline",
            after: Duration::from_secs(90),
        };
        assert_eq!(err.user_message(), "Pipeline timed out after 90s");
    }

    #[test]
    fn test_generic_message() {
        let err = JobError::Parse(serde_json::from_str::<serde_json::Value>("{").unwrap_err());
        assert!(err.user_message().starts_with("Error during processing: invalid output record"));
    }
}
