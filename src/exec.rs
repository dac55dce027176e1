//! Command execution inside a node's sandbox
//!
//! Every role effect reduces to command strings sent to the node's own
//! context. Two flavours exist: `execute` waits for the command and reports
//! its exit status, `launch` starts a long-running daemon in the background
//! and returns immediately.

use crate::errors::{NodeError, Result};
use async_trait::async_trait;
use std::process::{Output, Stdio};
use tokio::process::Command;
use tracing::{debug, warn};

/// Result of a finished command
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExecOutcome {
    /// Exit code, `None` when the process was killed by a signal
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutcome {
    pub fn ok() -> Self {
        Self {
            status: Some(0),
            ..Default::default()
        }
    }

    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            status: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.status == Some(0)
    }
}

impl From<Output> for ExecOutcome {
    fn from(output: Output) -> Self {
        Self {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        }
    }
}

/// Execution capability of a node
#[async_trait]
pub trait Executor: Send + Sync {
    /// Human readable sandbox label used in logs
    fn sandbox(&self) -> String;

    /// Run a command to completion
    async fn execute(&self, command: &str) -> std::io::Result<ExecOutcome>;

    /// Start a command in the background without waiting for it
    async fn launch(&self, command: &str) -> std::io::Result<()>;
}

/// Run a command and turn a spawn failure or non-zero exit into
/// [`NodeError::Execution`]
pub async fn run_checked(executor: &dyn Executor, command: &str) -> Result<ExecOutcome> {
    debug!("[{}] running: {}", executor.sandbox(), command);
    let outcome = executor
        .execute(command)
        .await
        .map_err(|e| NodeError::Execution {
            command: command.to_string(),
            reason: e.to_string(),
        })?;

    if !outcome.success() {
        let reason = match outcome.status {
            Some(code) => format!("exit status {}: {}", code, outcome.stderr.trim()),
            None => "terminated by signal".to_string(),
        };
        return Err(NodeError::Execution {
            command: command.to_string(),
            reason,
        });
    }
    Ok(outcome)
}

/// Run a command and only log a failure
pub async fn run_logged(executor: &dyn Executor, command: &str) -> bool {
    match run_checked(executor, command).await {
        Ok(_) => true,
        Err(e) => {
            warn!("[{}] {}", executor.sandbox(), e);
            false
        }
    }
}

/// Start a daemon in the background, mapping spawn errors to
/// [`NodeError::Execution`]
pub async fn launch_daemon(executor: &dyn Executor, command: &str) -> Result<()> {
    debug!("[{}] launching: {}", executor.sandbox(), command);
    executor
        .launch(command)
        .await
        .map_err(|e| NodeError::Execution {
            command: command.to_string(),
            reason: e.to_string(),
        })
}

fn is_shell_safe(c: char) -> bool {
    c.is_ascii_alphanumeric() || "._:@+-/,".contains(c)
}

/// Quote a word for `sh -c`. Words made only of safe characters are kept as
/// they are, anything else is single-quoted.
pub fn shell_quote(word: &str) -> String {
    if !word.is_empty() && word.chars().all(is_shell_safe) {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}

/// True for a value that may be interpolated into a command as one bare
/// argument: ASCII alphanumerics and `._:@+-`, not starting with `-`.
pub fn is_plain_token(value: &str) -> bool {
    !value.is_empty()
        && !value.starts_with('-')
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "._:@+-".contains(c))
}

async fn spawn_detached(mut cmd: Command, label: String) -> std::io::Result<()> {
    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()?;

    // Reap the child once it exits; its status is never inspected.
    tokio::spawn(async move {
        if let Err(e) = child.wait().await {
            debug!("[{}] background process wait failed: {}", label, e);
        }
    });
    Ok(())
}

/// Runs commands through `sh -c` in the host (root) namespace
#[derive(Debug, Clone, Default)]
pub struct HostExecutor;

impl HostExecutor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Executor for HostExecutor {
    fn sandbox(&self) -> String {
        "host".to_string()
    }

    async fn execute(&self, command: &str) -> std::io::Result<ExecOutcome> {
        let output = Command::new("sh").args(["-c", command]).output().await?;
        Ok(output.into())
    }

    async fn launch(&self, command: &str) -> std::io::Result<()> {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", command]);
        spawn_detached(cmd, self.sandbox()).await
    }
}

/// Runs commands through `ip netns exec <namespace> sh -c`
#[derive(Debug, Clone)]
pub struct NamespaceExecutor {
    namespace: String,
}

impl NamespaceExecutor {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn command(&self, command: &str) -> Command {
        let mut cmd = Command::new("ip");
        cmd.args(["netns", "exec", &self.namespace, "sh", "-c", command]);
        cmd
    }
}

#[async_trait]
impl Executor for NamespaceExecutor {
    fn sandbox(&self) -> String {
        format!("netns:{}", self.namespace)
    }

    async fn execute(&self, command: &str) -> std::io::Result<ExecOutcome> {
        let output = self.command(command).output().await?;
        Ok(output.into())
    }

    async fn launch(&self, command: &str) -> std::io::Result<()> {
        spawn_detached(self.command(command), self.sandbox()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_host_executor_reports_exit_status() {
        let host = HostExecutor::new();

        let ok = host.execute("echo hello").await.expect("spawn sh");
        assert!(ok.success());
        assert_eq!(ok.stdout.trim(), "hello");

        let failed = host.execute("exit 3").await.expect("spawn sh");
        assert_eq!(failed.status, Some(3));
        assert!(!failed.success());
    }

    #[tokio::test]
    async fn test_run_checked_maps_non_zero_exit() {
        let host = HostExecutor::new();
        let err = run_checked(&host, "echo boom >&2; exit 7")
            .await
            .unwrap_err();
        assert!(err.is_execution());
        let msg = err.to_string();
        assert!(msg.contains("exit status 7"), "unexpected message: {}", msg);
        assert!(msg.contains("boom"));
    }

    #[tokio::test]
    async fn test_launch_returns_without_waiting() {
        let host = HostExecutor::new();
        let started = std::time::Instant::now();
        host.launch("sleep 5").await.expect("launch");
        assert!(started.elapsed() < std::time::Duration::from_secs(2));
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("/tmp/j1.priv.dir/snmpd.conf"), "/tmp/j1.priv.dir/snmpd.conf");
        assert_eq!(shell_quote("/tmp/my plans/x"), "'/tmp/my plans/x'");
        assert_eq!(shell_quote("$(id)"), "'$(id)'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_quote(""), "''");
    }

    #[tokio::test]
    async fn test_quoted_word_reaches_sh_as_one_argument() {
        let host = HostExecutor::new();
        let word = "a b;$(echo x)'q";
        let out = host
            .execute(&format!("printf '%s|' {}", shell_quote(word)))
            .await
            .expect("spawn sh");
        assert_eq!(out.stdout, format!("{}|", word));
    }

    #[test]
    fn test_plain_tokens() {
        for ok in ["eth0", "s11-eth2", "10.0.0.1", "udp", "fe80::1", "eth+", "j1@lab"] {
            assert!(is_plain_token(ok), "{}", ok);
        }
        for bad in ["", "-j", "eth0;id", "a b", "$(id)", "x`id`", "a|b", "a/b", "a,b", "*"] {
            assert!(!is_plain_token(bad), "{}", bad);
        }
    }

    #[test]
    fn test_namespace_executor_label() {
        let ns = NamespaceExecutor::new("j1");
        assert_eq!(ns.namespace(), "j1");
        assert_eq!(ns.sandbox(), "netns:j1");
    }
}
