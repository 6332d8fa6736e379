//! Child-process runner shared by the pipeline and the viewer.

use std::ffi::OsStr;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

use crate::config::CommandSpec;
use crate::error::JobError;

/// Captured output of a successful run.
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Run `spec` followed by `extra_args`, waiting at most `deadline`.
///
/// The child runs in its own process group. If the returned future is
/// dropped or the deadline passes, the whole group is killed, so helpers the
/// child started die with it. A non-zero exit becomes [`JobError::Pipeline`]
/// carrying stderr.
pub async fn run<I, S>(
    tool: &'static str,
    spec: &CommandSpec,
    extra_args: I,
    deadline: Option<Duration>,
) -> Result<CommandOutput, JobError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut command = Command::new(&spec.program);
    command
        .args(&spec.args)
        .args(extra_args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    command.process_group(0);

    debug!("Running {}: {:?}", tool, command.as_std());

    let child = command
        .spawn()
        .map_err(|source| JobError::Spawn { tool, source })?;
    let group = ProcessGroup::of(child.id());

    let output = match deadline {
        Some(after) => tokio::time::timeout(after, child.wait_with_output())
            .await
            .map_err(|_| JobError::Timeout { tool, after })?,
        None => child.wait_with_output().await,
    }
    .map_err(|source| JobError::Spawn { tool, source })?;
    group.disarm();

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

    if !output.status.success() {
        return Err(JobError::Pipeline {
            tool,
            status: output.status.to_string(),
            stderr,
        });
    }

    Ok(CommandOutput { stdout, stderr })
}

/// Kills the child's process group on drop unless the child was reaped.
struct ProcessGroup {
    pgid: Option<i32>,
}

impl ProcessGroup {
    fn of(pid: Option<u32>) -> Self {
        Self {
            pgid: pid.and_then(|pid| i32::try_from(pid).ok()).filter(|&pid| pid > 0),
        }
    }

    /// The leader has exited and been reaped; its id may be reused.
    fn disarm(mut self) {
        self.pgid = None;
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        #[cfg(unix)]
        {
            if let Some(pgid) = self.pgid.take() {
                // SAFETY: kill(2) takes no pointers; a negative pid targets the group.
                if unsafe { libc::kill(-pgid, libc::SIGKILL) } == 0 {
                    debug!("Killed process group {}", pgid);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> CommandSpec {
        CommandSpec::new("sh", ["-c", script, "sh"])
    }

    #[tokio::test]
    async fn test_captures_stdout_and_args() {
        let out = run("pipeline", &sh("echo \"got $1 $2\"; echo warn >&2"), ["a", "b"], None)
            .await
            .unwrap();
        assert_eq!(out.stdout, "got a b\n");
        assert_eq!(out.stderr, "warn\n");
    }

    #[tokio::test]
    async fn test_non_zero_exit_carries_stderr() {
        let err = run("pipeline", &sh("echo partial; echo 'model load failed' >&2; exit 3"), Vec::<String>::new(), None)
            .await
            .unwrap_err();
        match err {
            JobError::Pipeline { stderr, status, .. } => {
                assert_eq!(stderr, "model load failed\n");
                assert!(status.contains('3'));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_deadline_is_a_distinct_error() {
        let err = run("viewer", &sh("sleep 5"), Vec::<String>::new(), Some(Duration::from_millis(100)))
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::Timeout { tool: "viewer", .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_deadline_kills_background_helpers() {
        let tmp = tempfile::TempDir::new().unwrap();
        let marker = tmp.path().join("helper-finished");

        let err = run(
            "pipeline",
            &sh("(sleep 1; touch \"$1\") & wait"),
            [marker.as_os_str()],
            Some(Duration::from_millis(200)),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, JobError::Timeout { .. }));

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!marker.exists(), "background helper outlived the timeout");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_dropping_the_future_kills_background_helpers() {
        let tmp = tempfile::TempDir::new().unwrap();
        let marker = tmp.path().join("helper-finished");
        let spec = sh("(sleep 1; touch \"$1\") & wait");

        let abandoned = tokio::time::timeout(
            Duration::from_millis(200),
            run("pipeline", &spec, [marker.as_os_str()], None),
        )
        .await;
        assert!(abandoned.is_err());

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!marker.exists(), "background helper outlived the request");
    }

    #[tokio::test]
    async fn test_missing_program() {
        let spec = CommandSpec::new("definitely-not-a-real-binary-olmocr", Vec::<String>::new());
        let err = run("pipeline", &spec, Vec::<String>::new(), None).await.unwrap_err();
        assert!(matches!(err, JobError::Spawn { .. }));
    }
}
