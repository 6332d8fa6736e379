//! Runtime configuration.
//!
//! Values come from the process environment (optionally seeded from a `.env`
//! file by `main`). Every setting has a default so the server starts with no
//! configuration at all.

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:7860";
const DEFAULT_WORKSPACE_DIR: &str = "olmocr_workspace";
const DEFAULT_PIPELINE_CMD: &str = "python -m olmocr.pipeline";
const DEFAULT_VIEWER_CMD: &str = "python -m olmocr.viewer.dolmaviewer";
const DEFAULT_PIPELINE_TIMEOUT_SECS: u64 = 3600;
const DEFAULT_VIEWER_TIMEOUT_SECS: u64 = 300;
const DEFAULT_RETENTION_SECS: u64 = 86_400;
const DEFAULT_MAX_UPLOAD_MB: usize = 200;

/// An external program plus the arguments that always precede the per-job ones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Split a command line on whitespace. Quoting is not supported.
    pub fn parse(line: &str) -> Result<Self> {
        let mut parts = line.split_whitespace();
        let program = parts
            .next()
            .with_context(|| format!("Command line is empty: {:?}", line))?;
        Ok(Self::new(program, parts))
    }

    /// Human-readable form, used in logs.
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub workspace_dir: PathBuf,
    pub pipeline: CommandSpec,
    pub viewer: CommandSpec,
    /// `None` means the pipeline may run forever.
    pub pipeline_timeout: Option<Duration>,
    pub viewer_timeout: Option<Duration>,
    /// `None` keeps job directories forever.
    pub retention: Option<Duration>,
    pub max_upload_bytes: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR.parse().expect("default bind address is valid"),
            workspace_dir: PathBuf::from(DEFAULT_WORKSPACE_DIR),
            pipeline: CommandSpec::parse(DEFAULT_PIPELINE_CMD).expect("default pipeline command"),
            viewer: CommandSpec::parse(DEFAULT_VIEWER_CMD).expect("default viewer command"),
            pipeline_timeout: secs_or_none(DEFAULT_PIPELINE_TIMEOUT_SECS),
            viewer_timeout: secs_or_none(DEFAULT_VIEWER_TIMEOUT_SECS),
            retention: secs_or_none(DEFAULT_RETENTION_SECS),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_MB * 1024 * 1024,
        }
    }
}

impl AppConfig {
    /// Read configuration from `OCR_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup. Unset keys keep their default.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(addr) = lookup("OCR_BIND_ADDR") {
            config.bind_addr = addr
                .parse()
                .with_context(|| format!("Invalid OCR_BIND_ADDR: {:?}", addr))?;
        }
        if let Some(dir) = lookup("OCR_WORKSPACE_DIR") {
            config.workspace_dir = PathBuf::from(dir);
        }
        if let Some(cmd) = lookup("OCR_PIPELINE_CMD") {
            config.pipeline = CommandSpec::parse(&cmd).context("Invalid OCR_PIPELINE_CMD")?;
        }
        if let Some(cmd) = lookup("OCR_VIEWER_CMD") {
            config.viewer = CommandSpec::parse(&cmd).context("Invalid OCR_VIEWER_CMD")?;
        }
        if let Some(secs) = parse_number::<u64>(&lookup, "OCR_PIPELINE_TIMEOUT_SECS")? {
            config.pipeline_timeout = secs_or_none(secs);
        }
        if let Some(secs) = parse_number::<u64>(&lookup, "OCR_VIEWER_TIMEOUT_SECS")? {
            config.viewer_timeout = secs_or_none(secs);
        }
        if let Some(secs) = parse_number::<u64>(&lookup, "OCR_RETENTION_SECS")? {
            config.retention = secs_or_none(secs);
        }
        if let Some(mb) = parse_number::<usize>(&lookup, "OCR_MAX_UPLOAD_MB")? {
            config.max_upload_bytes = mb
                .checked_mul(1024 * 1024)
                .with_context(|| format!("Invalid OCR_MAX_UPLOAD_MB: {} is too large", mb))?;
        }

        Ok(config)
    }
}

fn parse_number<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    lookup(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .with_context(|| format!("Invalid {}: {:?}", key, raw))
        })
        .transpose()
}

/// Zero disables a duration setting.
fn secs_or_none(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config.workspace_dir, PathBuf::from("olmocr_workspace"));
        assert_eq!(config.pipeline.program, "python");
        assert_eq!(config.pipeline.args, vec!["-m", "olmocr.pipeline"]);
        assert_eq!(config.viewer.display(), "python -m olmocr.viewer.dolmaviewer");
        assert_eq!(config.pipeline_timeout, Some(Duration::from_secs(3600)));
        assert_eq!(config.bind_addr.port(), 7860);
    }

    #[test]
    fn test_overrides() {
        let config = AppConfig::from_lookup(lookup_from(&[
            ("OCR_WORKSPACE_DIR", "/tmp/jobs"),
            ("OCR_PIPELINE_CMD", "  olmocr-run   --fast "),
            ("OCR_PIPELINE_TIMEOUT_SECS", "0"),
            ("OCR_RETENTION_SECS", "60"),
            ("OCR_MAX_UPLOAD_MB", "5"),
        ]))
        .unwrap();

        assert_eq!(config.workspace_dir, PathBuf::from("/tmp/jobs"));
        assert_eq!(config.pipeline, CommandSpec::new("olmocr-run", ["--fast"]));
        assert_eq!(config.pipeline_timeout, None);
        assert_eq!(config.retention, Some(Duration::from_secs(60)));
        assert_eq!(config.max_upload_bytes, 5 * 1024 * 1024);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(AppConfig::from_lookup(lookup_from(&[("OCR_VIEWER_TIMEOUT_SECS", "soon")])).is_err());
        assert!(AppConfig::from_lookup(lookup_from(&[("OCR_PIPELINE_CMD", "   ")])).is_err());
        assert!(AppConfig::from_lookup(lookup_from(&[("OCR_BIND_ADDR", "nowhere")])).is_err());
        let huge = usize::MAX.to_string();
        assert!(AppConfig::from_lookup(lookup_from(&[("OCR_MAX_UPLOAD_MB", huge.as_str())])).is_err());
    }
}
