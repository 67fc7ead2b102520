//! Build phase execution.

use crate::stage::PhaseConfig;
use anyhow::Context;
use serde::Serialize;
use std::path::Path;
use std::process::Stdio;
use std::time::Instant;
use tokio::process::Command;
use tracing::debug;

/// Env var pointing phase scripts at the session directory.
pub const SESSION_ENV: &str = "TAGRELAY_SESSION";

/// Result of a phase execution.
#[derive(Debug, Clone, Serialize)]
pub struct StageResult {
    /// Phase name.
    pub stage_name: String,

    /// Exit code (0 = success).
    pub exit_code: i32,

    /// Captured stdout.
    pub stdout: String,

    /// Captured stderr.
    pub stderr: String,

    /// Duration in milliseconds.
    pub duration_ms: u64,

    /// Whether execution succeeded.
    pub success: bool,
}

impl StageResult {
    /// Whether this phase passed (exit code 0).
    pub fn passed(&self) -> bool {
        self.success && self.exit_code == 0
    }

    /// Result for a phase that could not be run at all.
    pub fn errored(stage_name: impl Into<String>, error: &anyhow::Error, duration_ms: u64) -> Self {
        Self {
            stage_name: stage_name.into(),
            exit_code: -1,
            stdout: String::new(),
            stderr: format!("{error:#}"),
            duration_ms,
            success: false,
        }
    }
}

/// Shell state shared by the phases of one build.
///
/// Build specs expect variables and the working directory set in one phase
/// to be visible in the next. Each phase script exports its variables and
/// current directory into this session on exit and restores them on start.
pub struct BuildSession {
    dir: tempfile::TempDir,
}

impl BuildSession {
    pub fn new() -> anyhow::Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix("tagrelay-session-")
            .tempdir()
            .context("failed to create build session directory")?;
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

/// Runs build phases as `bash` scripts.
pub struct CiRunner;

impl CiRunner {
    /// Script executed for `config`.
    ///
    /// `set -e` makes the first failing command fail the phase. With a
    /// session, every assignment is exported (`set -a`) and read-only
    /// variables are left out of the saved state.
    pub fn script(config: &PhaseConfig, with_session: bool) -> String {
        let mut lines = vec!["set -e".to_string()];
        if with_session {
            lines.push("set -a".to_string());
            lines.push(format!(
                "if [ -f \"${SESSION_ENV}/env\" ]; then . \"${SESSION_ENV}/env\"; fi"
            ));
            lines.push(format!(
                "if [ -f \"${SESSION_ENV}/cwd\" ]; then cd \"$(cat \"${SESSION_ENV}/cwd\")\"; fi"
            ));
            lines.push(format!(
                "trap 'export -p | grep -v \"^declare -[a-zA-Z]*r\" > \"${SESSION_ENV}/env\"; \
                 pwd > \"${SESSION_ENV}/cwd\"' EXIT"
            ));
        }
        lines.extend(config.commands.iter().cloned());
        lines.join("\n")
    }

    /// Execute one phase in `workdir` and return the result.
    ///
    /// A non-zero exit is a failed [`StageResult`]; spawn failures and
    /// timeouts are errors.
    pub async fn execute_phase(
        config: &PhaseConfig,
        workdir: &Path,
        session: Option<&BuildSession>,
    ) -> anyhow::Result<StageResult> {
        let start = Instant::now();

        if config.commands.is_empty() {
            anyhow::bail!("Phase {} has no commands", config.name);
        }

        let script = Self::script(config, session.is_some());
        debug!(phase = %config.name, %script, "Running phase script");

        let mut command = Command::new("bash");
        command
            .arg("-c")
            .arg(&script)
            .current_dir(workdir)
            .envs(config.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(session) = session {
            command.env(SESSION_ENV, session.path());
        }

        let child = command
            .spawn()
            .with_context(|| format!("failed to spawn bash for phase {}", config.name))?;

        let output = if config.timeout_secs > 0 {
            tokio::time::timeout(
                std::time::Duration::from_secs(config.timeout_secs),
                child.wait_with_output(),
            )
            .await
            .map_err(|_| {
                anyhow::anyhow!(
                    "Phase {} timed out after {} seconds",
                    config.name,
                    config.timeout_secs
                )
            })??
        } else {
            child.wait_with_output().await?
        };

        let duration_ms = start.elapsed().as_millis() as u64;
        let exit_code = output.status.code().unwrap_or(-1);

        Ok(StageResult {
            stage_name: config.name.clone(),
            exit_code,
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            duration_ms,
            success: output.status.success(),
        })
    }
}
