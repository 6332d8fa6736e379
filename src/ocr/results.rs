//! Locating and parsing the pipeline's output record.

use serde::Deserialize;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::JobError;

const OUTPUT_PREFIX: &str = "output_";
const OUTPUT_SUFFIX: &str = ".jsonl";
const MISSING_TEXT: &str = "No text content found";

/// First record of an output file.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct OcrRecord {
    #[serde(default = "missing_text", deserialize_with = "text_or_json")]
    pub text: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

fn missing_text() -> String {
    MISSING_TEXT.to_string()
}

/// Strings pass through; anything else is shown as compact JSON.
fn text_or_json<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(display_value(&Value::deserialize(deserializer)?))
}

/// Outcome of looking for and reading the output file.
#[derive(Debug)]
pub enum ResultLookup {
    NoResultsDir,
    NoOutputFile,
    EmptyOutput,
    Found(ParsedOutput),
}

#[derive(Debug)]
pub struct ParsedOutput {
    pub path: PathBuf,
    pub record: OcrRecord,
    /// Records after the first, which are not displayed.
    pub extra_records: usize,
}

impl ResultLookup {
    /// Log line for the soft-failure variants.
    pub fn soft_failure_message(&self) -> Option<&'static str> {
        match self {
            Self::NoResultsDir => Some("Processing finished, but no results directory was produced"),
            Self::NoOutputFile => Some("Processing finished, but no output file was found"),
            Self::EmptyOutput => Some("Output file is empty"),
            Self::Found(_) => None,
        }
    }
}

/// Find `output_*.jsonl` in `results_dir` and parse its first record.
pub fn locate_and_parse(results_dir: &Path) -> Result<ResultLookup, JobError> {
    if !results_dir.is_dir() {
        warn!("No results directory at {:?}", results_dir);
        return Ok(ResultLookup::NoResultsDir);
    }

    let Some(path) = find_output_file(results_dir)? else {
        warn!("No output_*.jsonl in {:?}", results_dir);
        return Ok(ResultLookup::NoOutputFile);
    };

    let content = std::fs::read_to_string(&path)
        .map_err(|e| JobError::filesystem("Failed to read output file", &path, e))?;
    let content = content.trim();
    if content.is_empty() {
        warn!("Output file {:?} is empty", path);
        return Ok(ResultLookup::EmptyOutput);
    }

    let (record, extra_records) = parse_records(content)?;
    debug!("Parsed {:?} ({} metadata keys, {} extra records)", path, record.metadata.len(), extra_records);

    Ok(ResultLookup::Found(ParsedOutput {
        path,
        record,
        extra_records,
    }))
}

/// First matching file by name, so repeated lookups are stable.
fn find_output_file(results_dir: &Path) -> Result<Option<PathBuf>, JobError> {
    let entries = std::fs::read_dir(results_dir)
        .map_err(|e| JobError::filesystem("Failed to list results", results_dir, e))?;

    let mut matches: Vec<PathBuf> = entries
        .flatten()
        .filter(|entry| {
            entry
                .file_name()
                .to_str()
                .map(|name| name.starts_with(OUTPUT_PREFIX) && name.ends_with(OUTPUT_SUFFIX))
                .unwrap_or(false)
        })
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .collect();
    matches.sort();

    Ok(matches.into_iter().next())
}

/// Parse the first JSON object and count the values that follow it.
pub fn parse_records(content: &str) -> Result<(OcrRecord, usize), JobError> {
    let mut stream = serde_json::Deserializer::from_str(content).into_iter::<Value>();

    let first = match stream.next() {
        Some(value) => value?,
        None => return Err(not_a_record("no JSON value in output")),
    };
    if !first.is_object() {
        return Err(not_a_record("first record is not a JSON object"));
    }
    let record = OcrRecord::deserialize(first)?;

    let mut extra = 0;
    for value in stream {
        value?;
        extra += 1;
    }

    Ok((record, extra))
}

fn not_a_record(msg: &str) -> JobError {
    JobError::Parse(<serde_json::Error as serde::de::Error>::custom(msg))
}

/// Two-column rows for the metadata table, in record order.
pub fn metadata_rows(metadata: &Map<String, Value>) -> Vec<(String, String)> {
    metadata
        .iter()
        .map(|(key, value)| (key.clone(), display_value(value)))
        .collect()
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
