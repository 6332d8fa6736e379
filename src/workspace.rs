//! Per-request scratch directories.
//!
//! Layout: `<root>/job_<unix_ts>/input.pdf`, with the pipeline writing
//! `results/` and the viewer writing `previews/` next to it. Jobs are keyed
//! by second-resolution timestamp only, so two uploads in the same second
//! share a directory.
//!
//! Jobs still being processed hold a [`JobLease`]; the retention sweep never
//! deletes a leased job.

use chrono::Utc;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::JobError;

const JOB_PREFIX: &str = "job_";
const INPUT_FILE: &str = "input.pdf";
const RESULTS_DIR: &str = "results";
const PREVIEWS_DIR: &str = "previews";

/// Root directory holding every job.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
    /// In-flight job timestamps, counted since same-second jobs share a key.
    active: Arc<Mutex<HashMap<i64, usize>>>,
}

/// Marks a job as in flight until dropped.
#[derive(Debug)]
pub struct JobLease {
    timestamp: i64,
    active: Arc<Mutex<HashMap<i64, usize>>>,
}

impl Drop for JobLease {
    fn drop(&mut self) {
        let mut active = lock(&self.active);
        if let Some(count) = active.get_mut(&self.timestamp) {
            *count -= 1;
            if *count == 0 {
                active.remove(&self.timestamp);
            }
        }
    }
}

fn lock(active: &Mutex<HashMap<i64, usize>>) -> MutexGuard<'_, HashMap<i64, usize>> {
    active.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One job's working directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub timestamp: i64,
    pub dir: PathBuf,
}

impl Job {
    pub fn input_path(&self) -> PathBuf {
        self.dir.join(INPUT_FILE)
    }

    pub fn results_dir(&self) -> PathBuf {
        self.dir.join(RESULTS_DIR)
    }

    pub fn previews_dir(&self) -> PathBuf {
        self.dir.join(PREVIEWS_DIR)
    }
}

impl Workspace {
    /// Open the workspace, creating the root directory if needed.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, JobError> {
        let root = root.into();
        std::fs::create_dir_all(&root)
            .map_err(|e| JobError::filesystem("Failed to create workspace", &root, e))?;
        Ok(Self {
            root,
            active: Arc::default(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn job_dir(&self, timestamp: i64) -> PathBuf {
        self.root.join(format!("{}{}", JOB_PREFIX, timestamp))
    }

    /// Create a job keyed by the current time and store the upload in it.
    ///
    /// The job is leased before its directory exists, so a concurrent sweep
    /// cannot remove it; drop the lease once the job is finished.
    pub fn create_job(&self, input: &[u8]) -> Result<(Job, JobLease), JobError> {
        let timestamp = Utc::now().timestamp();
        let lease = self.lease(timestamp);
        let job = self.create_job_at(timestamp, input)?;
        Ok((job, lease))
    }

    /// Protect the job keyed by `timestamp` from retention sweeps.
    pub fn lease(&self, timestamp: i64) -> JobLease {
        *lock(&self.active).entry(timestamp).or_insert(0) += 1;
        JobLease {
            timestamp,
            active: Arc::clone(&self.active),
        }
    }

    fn is_leased(&self, timestamp: i64) -> bool {
        lock(&self.active).contains_key(&timestamp)
    }

    /// Create (or reuse) the job directory for `timestamp` and write `input.pdf`.
    pub fn create_job_at(&self, timestamp: i64, input: &[u8]) -> Result<Job, JobError> {
        let dir = self.job_dir(timestamp);
        std::fs::create_dir_all(&dir)
            .map_err(|e| JobError::filesystem("Failed to create job directory", &dir, e))?;

        let job = Job { timestamp, dir };
        let input_path = job.input_path();
        std::fs::write(&input_path, input)
            .map_err(|e| JobError::filesystem("Failed to copy upload", &input_path, e))?;

        info!("Prepared job {} ({} bytes) at {:?}", timestamp, input.len(), job.dir);
        Ok(job)
    }

    /// Delete job directories older than `ttl` relative to `now` (unix seconds).
    ///
    /// Entries that are not `job_<ts>` directories and jobs still holding a
    /// lease are left alone. Returns the number of jobs removed.
    pub fn sweep_expired(&self, ttl: Duration, now: i64) -> Result<usize, JobError> {
        let cutoff = now.saturating_sub(ttl.as_secs() as i64);
        let entries = std::fs::read_dir(&self.root)
            .map_err(|e| JobError::filesystem("Failed to list workspace", &self.root, e))?;

        let mut removed = 0;
        for entry in entries.flatten() {
            let Some(timestamp) = entry.file_name().to_str().and_then(parse_job_timestamp) else {
                continue;
            };
            if timestamp >= cutoff || !entry.path().is_dir() {
                continue;
            }
            if self.is_leased(timestamp) {
                debug!("Skipping in-flight job {} during sweep", timestamp);
                continue;
            }
            match std::fs::remove_dir_all(entry.path()) {
                Ok(()) => {
                    debug!("Removed expired job {}", timestamp);
                    removed += 1;
                }
                Err(e) => warn!("Failed to remove expired job {:?}: {}", entry.path(), e),
            }
        }

        if removed > 0 {
            info!("Workspace sweep removed {} expired job(s)", removed);
        }
        Ok(removed)
    }
}

fn parse_job_timestamp(name: &str) -> Option<i64> {
    name.strip_prefix(JOB_PREFIX)?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_create_job_writes_input() {
        let tmp = TempDir::new().unwrap();
        let workspace = Workspace::new(tmp.path().join("ws")).unwrap();

        let job = workspace.create_job_at(1_700_000_000, b"%PDF-1.7").unwrap();

        assert_eq!(job.dir, tmp.path().join("ws").join("job_1700000000"));
        assert_eq!(std::fs::read(job.input_path()).unwrap(), b"%PDF-1.7");
        assert_eq!(job.results_dir(), job.dir.join("results"));
    }

    #[test]
    fn test_distinct_timestamps_get_distinct_dirs() {
        let tmp = TempDir::new().unwrap();
        let workspace = Workspace::new(tmp.path()).unwrap();

        let a = workspace.create_job_at(100, b"a").unwrap();
        let b = workspace.create_job_at(101, b"b").unwrap();

        assert_ne!(a.dir, b.dir);
        assert_eq!(std::fs::read(a.input_path()).unwrap(), b"a");
        assert_eq!(std::fs::read(b.input_path()).unwrap(), b"b");
    }

    #[test]
    fn test_same_second_jobs_collide() {
        // Known hazard: the key is the timestamp alone, so the second upload
        // lands in the first job's directory and overwrites its input.
        let tmp = TempDir::new().unwrap();
        let workspace = Workspace::new(tmp.path()).unwrap();

        let first = workspace.create_job_at(42, b"first").unwrap();
        let second = workspace.create_job_at(42, b"second").unwrap();

        assert_eq!(first.dir, second.dir);
        assert_eq!(std::fs::read(first.input_path()).unwrap(), b"second");
    }

    #[test]
    fn test_sweep_removes_only_expired_jobs() {
        let tmp = TempDir::new().unwrap();
        let workspace = Workspace::new(tmp.path()).unwrap();
        workspace.create_job_at(1_000, b"old").unwrap();
        workspace.create_job_at(1_900, b"fresh").unwrap();
        std::fs::create_dir(tmp.path().join("job_notanumber")).unwrap();
        std::fs::write(tmp.path().join("notes.txt"), "keep").unwrap();

        let removed = workspace.sweep_expired(Duration::from_secs(500), 2_000).unwrap();

        assert_eq!(removed, 1);
        assert!(!workspace.job_dir(1_000).exists());
        assert!(workspace.job_dir(1_900).exists());
        assert!(tmp.path().join("job_notanumber").exists());
        assert!(tmp.path().join("notes.txt").exists());
    }

    #[test]
    fn test_sweep_skips_in_flight_jobs() {
        let tmp = TempDir::new().unwrap();
        let workspace = Workspace::new(tmp.path()).unwrap();
        let lease = workspace.lease(1_000);
        let job = workspace.create_job_at(1_000, b"running").unwrap();
        std::fs::create_dir(job.results_dir()).unwrap();

        let removed = workspace.sweep_expired(Duration::from_secs(60), 1_120).unwrap();
        assert_eq!(removed, 0);
        assert!(job.input_path().exists());
        assert!(job.results_dir().exists());

        drop(lease);
        let removed = workspace.sweep_expired(Duration::from_secs(60), 1_120).unwrap();
        assert_eq!(removed, 1);
        assert!(!job.dir.exists());
    }

    #[test]
    fn test_same_second_leases_are_counted() {
        let tmp = TempDir::new().unwrap();
        let workspace = Workspace::new(tmp.path()).unwrap();
        let first = workspace.lease(500);
        let second = workspace.lease(500);

        drop(first);
        assert!(workspace.is_leased(500));
        drop(second);
        assert!(!workspace.is_leased(500));
    }

    #[test]
    fn test_create_job_holds_lease_until_dropped() {
        let tmp = TempDir::new().unwrap();
        let workspace = Workspace::new(tmp.path()).unwrap();

        let (job, lease) = workspace.create_job(b"%PDF").unwrap();
        assert!(workspace.is_leased(job.timestamp));
        drop(lease);
        assert!(!workspace.is_leased(job.timestamp));
    }

    #[test]
    fn test_create_job_fails_when_root_is_a_file() {
        let tmp = TempDir::new().unwrap();
        let workspace = Workspace::new(tmp.path().join("ws")).unwrap();
        std::fs::remove_dir(workspace.root()).unwrap();
        std::fs::write(workspace.root(), "not a dir").unwrap();

        let err = workspace.create_job_at(7, b"x").unwrap_err();
        assert!(matches!(err, JobError::Filesystem { .. }));
    }
}
