//! Bounded execution of external tools.
//!
//! Every block-device and container-runtime call goes through [`run`], which
//! captures output and enforces a per-invocation timeout. A process that
//! outlives its timeout is killed when its future is dropped.

use std::ffi::OsStr;
use std::time::Duration;

use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::error::{Result, ThinscanError};

/// Captured result of one external command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// A successful invocation with the given stdout.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self { success: true, code: Some(0), stdout: stdout.into(), stderr: String::new() }
    }

    /// A failed invocation with the given stderr.
    pub fn failed(stderr: impl Into<String>) -> Self {
        Self { success: false, code: Some(1), stdout: String::new(), stderr: stderr.into() }
    }

    /// Trimmed stderr, falling back to stdout when stderr is empty.
    pub fn diagnostic(&self) -> String {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            self.stdout.trim().to_string()
        } else {
            stderr.to_string()
        }
    }
}

/// Run `program` with `args`, capturing output, bounded by `limit`.
///
/// A non-zero exit is not an error here; callers decide what a failure
/// means. Errors are reserved for spawn failures and timeouts.
pub async fn run<S: AsRef<OsStr>>(
    program: &str,
    args: &[S],
    limit: Duration,
) -> Result<CommandOutput> {
    let rendered = render(program, args);
    debug!(command = %rendered, "Executing external command");

    let mut cmd = Command::new(program);
    cmd.args(args).kill_on_drop(true);

    let output = match timeout(limit, cmd.output()).await {
        Ok(result) => result.map_err(|e| {
            ThinscanError::Internal(format!("Failed to execute {}: {}", program, e))
        })?,
        Err(_) => {
            warn!(command = %rendered, secs = limit.as_secs(), "External command timed out");
            return Err(ThinscanError::CommandTimeout { command: rendered, secs: limit.as_secs() });
        }
    };

    let result = CommandOutput {
        success: output.status.success(),
        code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
    };

    if !result.success {
        debug!(command = %rendered, code = ?result.code, stderr = %result.stderr.trim(), "External command failed");
    }

    Ok(result)
}

fn render<S: AsRef<OsStr>>(program: &str, args: &[S]) -> String {
    let mut rendered = program.to_string();
    for arg in args {
        let arg: &OsStr = arg.as_ref();
        rendered.push(' ');
        rendered.push_str(&arg.to_string_lossy());
    }
    rendered
}
