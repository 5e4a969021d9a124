// src/core/exec/mod.rs

//! Runs external binaries (`zfs`, `zpool`, `systemctl`, ...) under a
//! cancellable, per-class deadline. Arguments are always passed as separate
//! tokens — never concatenated into a shell string — so the executor itself
//! cannot be an injection vector; whitelist validation of request-derived
//! arguments happens one layer up, in the handlers, via [`whitelist`].

pub mod whitelist;

use crate::config::ExecConfig;
use crate::core::DPlaneError;
use crate::core::metrics::EXEC_INVOCATIONS_TOTAL;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::warn;

/// Timeout class for a single invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecClass {
    /// Status/list commands.
    Fast,
    /// Mutations, reloads.
    Medium,
    /// `zfs`/`zpool`, which may hang on bad disks.
    Zfs,
    /// Recursive operations, send/receive.
    Slow,
}

/// Captured result of a completed external command.
#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub status_code: Option<i32>,
    pub combined_output: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.status_code == Some(0)
    }
}

/// Runs allow-listed external commands under a per-class deadline.
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    config: ExecConfig,
}

impl CommandExecutor {
    pub fn new(config: ExecConfig) -> Self {
        Self { config }
    }

    fn deadline_for(&self, class: ExecClass) -> Duration {
        let secs = match class {
            ExecClass::Fast => self.config.fast_timeout_secs,
            ExecClass::Medium => self.config.medium_timeout_secs,
            ExecClass::Zfs => self.config.zfs_timeout_secs,
            ExecClass::Slow => self.config.slow_timeout_secs,
        };
        Duration::from_secs(secs)
    }

    /// Runs `program` with `args` under `class`'s deadline, returning the
    /// combined stdout+stderr. On deadline expiry the child is killed and a
    /// `DeadlineExceeded` error carrying the full invocation is returned.
    pub async fn run(
        &self,
        class: ExecClass,
        program: &str,
        args: &[&str],
    ) -> Result<ExecOutput, DPlaneError> {
        self.run_with_stdin(class, program, args, None).await
    }

    /// As [`run`], but writes `stdin_data` to the child's stdin before
    /// reading its output — used for passphrase input to encryption commands.
    pub async fn run_with_stdin(
        &self,
        class: ExecClass,
        program: &str,
        args: &[&str],
        stdin_data: Option<&[u8]>,
    ) -> Result<ExecOutput, DPlaneError> {
        let deadline = self.deadline_for(class);

        let mut cmd = Command::new(program);
        cmd.args(args);
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.stdin(if stdin_data.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });
        cmd.kill_on_drop(true);

        let invocation = || {
            let mut parts = vec![program.to_string()];
            parts.extend(args.iter().map(|a| a.to_string()));
            parts
        };

        let mut child = cmd.spawn().map_err(|e| {
            DPlaneError::DependencyUnavailable(format!("failed to spawn '{program}': {e}"))
        })?;

        if let Some(data) = stdin_data {
            if let Some(mut stdin) = child.stdin.take() {
                if let Err(e) = stdin.write_all(data).await {
                    warn!(program, error = %e, "failed writing stdin to child process");
                }
                drop(stdin);
            }
        }

        let wait = child.wait_with_output();
        match tokio::time::timeout(deadline, wait).await {
            Ok(Ok(output)) => {
                let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
                combined.push_str(&String::from_utf8_lossy(&output.stderr));
                let outcome = if output.status.success() { "success" } else { "nonzero" };
                EXEC_INVOCATIONS_TOTAL.with_label_values(&[program, outcome]).inc();
                Ok(ExecOutput {
                    status_code: output.status.code(),
                    combined_output: combined,
                })
            }
            Ok(Err(e)) => {
                EXEC_INVOCATIONS_TOTAL.with_label_values(&[program, "wait_error"]).inc();
                Err(DPlaneError::Internal(format!(
                    "failed waiting on '{program}': {e}"
                )))
            }
            Err(_) => {
                EXEC_INVOCATIONS_TOTAL.with_label_values(&[program, "timeout"]).inc();
                Err(DPlaneError::DeadlineExceeded {
                    program: program.to_string(),
                    args: invocation(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn executor() -> CommandExecutor {
        CommandExecutor::new(ExecConfig {
            fast_timeout_secs: 1,
            medium_timeout_secs: 1,
            zfs_timeout_secs: 1,
            slow_timeout_secs: 1,
        })
    }

    #[tokio::test]
    async fn captures_stdout_and_exit_code() {
        let exec = executor();
        let out = exec
            .run(ExecClass::Fast, "echo", &["hello"])
            .await
            .unwrap();
        assert!(out.success());
        assert!(out.combined_output.contains("hello"));
    }

    #[tokio::test]
    async fn deadline_exceeded_kills_child() {
        let exec = executor();
        let err = exec
            .run(ExecClass::Fast, "sleep", &["5"])
            .await
            .unwrap_err();
        assert!(matches!(err, DPlaneError::DeadlineExceeded { .. }));
    }

    #[tokio::test]
    async fn stdin_is_forwarded() {
        let exec = executor();
        let out = exec
            .run_with_stdin(ExecClass::Fast, "cat", &[], Some(b"secret\n"))
            .await
            .unwrap();
        assert!(out.combined_output.contains("secret"));
    }
}
