//! Command executor
//!
//! Runs each job as a shell command on this host, picked by the job's profile.
//! Stdout lines of the form `::artifact name=value` register artifacts; any
//! other output is logged at debug level.

use archway_core::domain::artifact::ArtifactRef;
use archway_core::domain::job::{JobResult, JobStatus};
use archway_core::domain::pipeline::JobSpec;
use archway_lua::ExecutorProfile;
use async_trait::async_trait;
use std::collections::{BTreeMap, VecDeque};
use std::process::Stdio;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, warn};

use super::{BuildExecutor, ExecutionError, JobContext};

const ARTIFACT_MARKER: &str = "::artifact ";
const STDERR_TAIL_LINES: usize = 20;

/// Parses an `::artifact name=value` line
pub fn parse_artifact_line(line: &str) -> Option<(&str, &str)> {
    let rest = line.trim_end().strip_prefix(ARTIFACT_MARKER)?;
    let (name, value) = rest.split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    Some((name, value))
}

/// Reads the next line of process output, replacing invalid UTF-8
///
/// Returns `None` at end of stream or on a read error.
async fn next_line_lossy<R: AsyncBufRead + Unpin>(reader: &mut R, buf: &mut Vec<u8>) -> Option<String> {
    buf.clear();
    match reader.read_until(b'\n', buf).await {
        Ok(0) => None,
        Ok(_) => {
            let line = String::from_utf8_lossy(buf);
            Some(line.trim_end_matches(['\n', '\r']).to_string())
        }
        Err(e) => {
            debug!("Output stream closed: {}", e);
            None
        }
    }
}

/// Executor backed by local shell commands, one per profile
pub struct CommandExecutor {
    profiles: BTreeMap<String, ExecutorProfile>,
    /// Environment injected into every job (e.g. `REPOSITORY_URI`)
    shared_env: BTreeMap<String, String>,
}

impl CommandExecutor {
    pub fn new(profiles: BTreeMap<String, ExecutorProfile>) -> Self {
        Self {
            profiles,
            shared_env: BTreeMap::new(),
        }
    }

    pub fn with_shared_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.shared_env = env;
        self
    }

    pub fn profile_names(&self) -> Vec<&str> {
        self.profiles.keys().map(String::as_str).collect()
    }

    fn build_command(
        &self,
        profile: &ExecutorProfile,
        job: &JobSpec,
        ctx: &JobContext,
    ) -> Command {
        let mut command = Command::new(&profile.shell);
        command
            .arg("-c")
            .arg(&profile.command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(workdir) = &profile.workdir {
            command.current_dir(workdir);
        }

        command
            .envs(&self.shared_env)
            .envs(&profile.env)
            .envs(&ctx.env)
            .env("ARCHWAY_RUN_ID", ctx.run_id.to_string())
            .env("ARCHWAY_STAGE", &ctx.stage)
            .env("ARCHWAY_JOB", job.display_name())
            .env("ARCHWAY_ATTEMPT", ctx.attempt.to_string())
            .env("SOURCE", &job.source)
            .env(
                "ARCHWAY_INHERITED",
                ctx.inherited
                    .iter()
                    .map(|a| a.name.as_str())
                    .collect::<Vec<_>>()
                    .join(","),
            );

        command
    }
}

#[async_trait]
impl BuildExecutor for CommandExecutor {
    async fn execute(&self, job: &JobSpec, ctx: &JobContext) -> Result<JobResult, ExecutionError> {
        let profile = self
            .profiles
            .get(&job.profile)
            .ok_or_else(|| ExecutionError::NoRunner(job.profile.clone()))?;

        debug!(
            "Launching {} ({}) attempt {} for run {}",
            job.display_name(),
            profile.name,
            ctx.attempt,
            ctx.run_id
        );

        let mut child = self
            .build_command(profile, job, ctx)
            .spawn()
            .map_err(|e| ExecutionError::Launch(format!("{}: {}", profile.shell, e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ExecutionError::Launch("stdout not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| ExecutionError::Launch("stderr not captured".to_string()))?;

        let job_name = job.display_name().to_string();
        let stderr_task = tokio::spawn(async move {
            let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
            let mut reader = BufReader::new(stderr);
            let mut buf = Vec::new();
            while let Some(line) = next_line_lossy(&mut reader, &mut buf).await {
                if tail.len() == STDERR_TAIL_LINES {
                    tail.pop_front();
                }
                tail.push_back(line);
            }
            tail.into_iter().collect::<Vec<_>>().join("\n")
        });

        let mut artifacts: Vec<ArtifactRef> = Vec::new();

        let exit = tokio::select! {
            status = async {
                let mut reader = BufReader::new(stdout);
                let mut buf = Vec::new();
                while let Some(line) = next_line_lossy(&mut reader, &mut buf).await {
                    match parse_artifact_line(&line) {
                        Some((name, value)) => artifacts.push(ctx.publish(name, value)),
                        None => debug!("[{}] {}", job_name, line),
                    }
                }
                drop(reader);
                child.wait().await
            } => Some(status),
            _ = ctx.cancel.cancelled() => None,
        };

        let Some(exit) = exit else {
            if let Err(e) = child.kill().await {
                warn!("Failed to kill {} after cancellation: {}", job_name, e);
            }
            stderr_task.abort();
            return Ok(ctx
                .result(job, JobStatus::Cancelled)
                .with_artifacts(artifacts)
                .with_error("cancelled"));
        };

        let status = exit.map_err(|e| ExecutionError::Launch(e.to_string()))?;
        let stderr_tail = stderr_task.await.unwrap_or_default();

        if status.success() {
            return Ok(ctx
                .result(job, JobStatus::Succeeded)
                .with_artifacts(artifacts));
        }

        let mut error = match status.code() {
            Some(code) => format!("command exited with status {}", code),
            None => "command terminated by signal".to_string(),
        };
        if !stderr_tail.is_empty() {
            error.push_str(": ");
            error.push_str(&stderr_tail);
        }

        Ok(ctx
            .result(job, JobStatus::Failed)
            .with_artifacts(artifacts)
            .with_error(error))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::CancelToken;
    use crate::repository::ArtifactStore;
    use chrono::Utc;
    use std::sync::Arc;
    use std::time::Duration;
    use uuid::Uuid;

    fn profile(name: &str, command: &str) -> ExecutorProfile {
        ExecutorProfile {
            name: name.to_string(),
            command: command.to_string(),
            shell: "sh".to_string(),
            workdir: None,
            env: BTreeMap::new(),
        }
    }

    fn executor(command: &str) -> CommandExecutor {
        CommandExecutor::new(BTreeMap::from([(
            "arm64".to_string(),
            profile("arm64", command),
        )]))
    }

    fn context(store: &Arc<ArtifactStore>) -> JobContext {
        JobContext {
            run_id: Uuid::new_v4(),
            stage: "build-arm".to_string(),
            attempt: 1,
            env: BTreeMap::from([("TAG".to_string(), "arm64".to_string())]),
            inherited: vec![],
            artifacts: Arc::clone(store),
            cancel: CancelToken::new(),
            started_at: Utc::now(),
        }
    }

    #[test]
    fn test_parse_artifact_line() {
        assert_eq!(
            parse_artifact_line("::artifact image@arm=repo:arm64"),
            Some(("image@arm", "repo:arm64"))
        );
        assert_eq!(
            parse_artifact_line("::artifact digest=sha256:a=b\n"),
            Some(("digest", "sha256:a=b"))
        );
        assert_eq!(parse_artifact_line("::artifact =value"), None);
        assert_eq!(parse_artifact_line("::artifact novalue"), None);
        assert_eq!(parse_artifact_line("building image"), None);
    }

    #[tokio::test]
    async fn test_unknown_profile_is_execution_error() {
        let store = Arc::new(ArtifactStore::new());
        let err = executor("true")
            .execute(&JobSpec::new("riscv", "repo"), &context(&store))
            .await
            .unwrap_err();
        assert_eq!(err, ExecutionError::NoRunner("riscv".to_string()));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_publishes_artifacts() {
        let store = Arc::new(ArtifactStore::new());
        let executor = executor(r#"echo "building $SOURCE"; echo "::artifact image@arm=$SOURCE:$TAG""#);

        let result = executor
            .execute(&JobSpec::new("arm64", "repo"), &context(&store))
            .await
            .unwrap();

        assert_eq!(result.status, JobStatus::Succeeded);
        assert_eq!(result.artifacts.len(), 1);
        assert_eq!(result.artifacts[0].name, "image@arm");
        assert_eq!(
            store.get_string(&result.artifacts[0]),
            Some("repo:arm64".to_string())
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_failure_reports_stderr() {
        let store = Arc::new(ArtifactStore::new());
        let executor = executor("echo 'no space left' >&2; exit 3");

        let result = executor
            .execute(&JobSpec::new("arm64", "repo"), &context(&store))
            .await
            .unwrap();

        assert_eq!(result.status, JobStatus::Failed);
        let error = result.error.unwrap();
        assert!(error.contains("status 3"));
        assert!(error.contains("no space left"));
    }

    #[tokio::test]
    async fn test_next_line_lossy() {
        let mut reader = BufReader::new(&b"ok\r\n\xffbad\nlast"[..]);
        let mut buf = Vec::new();

        assert_eq!(next_line_lossy(&mut reader, &mut buf).await.as_deref(), Some("ok"));
        assert_eq!(
            next_line_lossy(&mut reader, &mut buf).await.as_deref(),
            Some("\u{FFFD}bad")
        );
        assert_eq!(next_line_lossy(&mut reader, &mut buf).await.as_deref(), Some("last"));
        assert_eq!(next_line_lossy(&mut reader, &mut buf).await, None);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_invalid_utf8_stdout_is_drained() {
        let store = Arc::new(ArtifactStore::new());
        let executor = executor(
            "printf '\\377\\n'; head -c 300000 /dev/zero | tr '\\0' a; echo; echo '::artifact image@arm=ok'; exit 0",
        );

        let result = tokio::time::timeout(
            Duration::from_secs(10),
            executor.execute(&JobSpec::new("arm64", "repo"), &context(&store)),
        )
        .await
        .expect("command with non-UTF-8 output should finish")
        .unwrap();

        assert_eq!(result.status, JobStatus::Succeeded);
        assert_eq!(result.artifacts.len(), 1);
        assert_eq!(result.artifacts[0].name, "image@arm");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_invalid_utf8_stderr_keeps_command_alive() {
        let store = Arc::new(ArtifactStore::new());
        let executor = executor("printf '\\377\\n' >&2; sleep 0.3; echo more >&2; exit 0");

        let result = executor
            .execute(&JobSpec::new("arm64", "repo"), &context(&store))
            .await
            .unwrap();

        assert_eq!(result.status, JobStatus::Succeeded, "{:?}", result.error);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_invalid_utf8_stderr_tail_is_reported() {
        let store = Arc::new(ArtifactStore::new());
        let executor = executor("printf 'bad \\377 byte\\n' >&2; echo 'disk full' >&2; exit 2");

        let result = executor
            .execute(&JobSpec::new("arm64", "repo"), &context(&store))
            .await
            .unwrap();

        assert_eq!(result.status, JobStatus::Failed);
        let error = result.error.unwrap();
        assert!(error.contains("bad \u{FFFD} byte"));
        assert!(error.contains("disk full"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cancellation_kills_command() {
        let store = Arc::new(ArtifactStore::new());
        let executor = executor("sleep 30");
        let ctx = context(&store);

        let cancel = ctx.cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel.cancel();
        });

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            executor.execute(&JobSpec::new("arm64", "repo"), &ctx),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(result.status, JobStatus::Cancelled);
    }
}
