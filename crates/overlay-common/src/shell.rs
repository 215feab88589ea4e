//! Shell command execution utilities.
//!
//! Host and switch configuration is done by running `ip`, `ovs-vsctl` and
//! `ovs-ofctl`. Every interpolated value goes through [`shellquote`] so a
//! host or switch name can never inject a second command.
//!
//! # Example
//!
//! ```ignore
//! use overlay_common::shell::{self, OVS_OFCTL_CMD, shellquote};
//!
//! let cmd = format!("{} dump-flows {}", OVS_OFCTL_CMD, shellquote("s1"));
//! let result = shell::exec(&cmd).await?;
//! ```

use nix::errno::Errno;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use once_cell::sync::Lazy;
use regex::Regex;
use std::process::Stdio;
use tokio::process::Command;

use crate::error::{ShellError, ShellResult};

/// Path to the `ip` command for interface, address and route configuration.
pub const IP_CMD: &str = "/sbin/ip";

/// Path to the `bridge` command for VXLAN forwarding database entries.
pub const BRIDGE_CMD: &str = "/sbin/bridge";

/// Path to `sysctl`, used to toggle forwarding on router nodes.
pub const SYSCTL_CMD: &str = "/sbin/sysctl";

/// Path to the Open vSwitch database utility (ports and interfaces).
pub const OVS_VSCTL_CMD: &str = "/usr/bin/ovs-vsctl";

/// Path to the OpenFlow utility (flow tables).
pub const OVS_OFCTL_CMD: &str = "/usr/bin/ovs-ofctl";

/// Regex for characters that need escaping in shell double-quotes.
/// Matches: $, `, ", \, and newline
static SHELL_ESCAPE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"([$`"\\\n])"#).expect("Invalid regex pattern"));

/// Quotes a string for safe use in shell commands.
///
/// This function wraps the string in double quotes and escapes any
/// characters that have special meaning inside double quotes:
/// `$`, `` ` ``, `"`, `\` and newline.
///
/// # Example
///
/// ```
/// use overlay_common::shell::shellquote;
///
/// assert_eq!(shellquote("s1"), "\"s1\"");
/// assert_eq!(shellquote("with$var"), "\"with\\$var\"");
/// ```
pub fn shellquote(s: &str) -> String {
    let escaped = SHELL_ESCAPE_RE.replace_all(s, r"\$1");
    format!("\"{}\"", escaped)
}

/// Result of a shell command execution.
#[derive(Debug, Clone)]
pub struct ExecResult {
    /// The exit code of the command (0 = success).
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecResult {
    /// Returns true if the command succeeded (exit code 0).
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Returns the combined output (stdout + stderr) for error messages.
    pub fn combined_output(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else if self.stdout.is_empty() {
            self.stderr.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}

/// Kills the process group of a running command when dropped.
///
/// `/bin/sh -c` forks for every command but the last, so killing the shell
/// alone would orphan e.g. a `sleep` still running inside it.
struct ProcessGroupGuard {
    pgid: Option<Pid>,
}

impl ProcessGroupGuard {
    fn new(pid: Option<u32>) -> Self {
        Self {
            pgid: pid.and_then(|p| i32::try_from(p).ok()).map(Pid::from_raw),
        }
    }

    fn disarm(mut self) {
        self.pgid = None;
    }
}

impl Drop for ProcessGroupGuard {
    fn drop(&mut self) {
        let Some(pgid) = self.pgid.take() else {
            return;
        };
        match killpg(pgid, Signal::SIGKILL) {
            Ok(()) => tracing::debug!(pgid = %pgid, "Killed abandoned command"),
            Err(Errno::ESRCH) => {}
            Err(e) => tracing::warn!(pgid = %pgid, error = %e, "Failed to kill abandoned command"),
        }
    }
}

/// Executes a shell command asynchronously.
///
/// The command runs through `/bin/sh -c` so chained commands (`&&`) work.
/// It gets its own process group; dropping the returned future (for
/// example on a timeout) kills the whole group.
///
/// # Errors
///
/// Returns [`ShellError::ShellExec`] if the shell could not be spawned. A
/// non-zero exit is *not* an error here; see [`exec_or_throw`].
pub async fn exec(cmd: &str) -> ShellResult<ExecResult> {
    tracing::debug!(command = %cmd, "Executing shell command");

    let spawn_error = |e| ShellError::ShellExec {
        command: cmd.to_string(),
        source: e,
    };
    let child = Command::new("/bin/sh")
        .arg("-c")
        .arg(cmd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0)
        .kill_on_drop(true)
        .spawn()
        .map_err(spawn_error)?;

    let guard = ProcessGroupGuard::new(child.id());
    let output = child.wait_with_output().await.map_err(spawn_error)?;
    guard.disarm();

    let exit_code = output.status.code().unwrap_or(-1);
    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

    let result = ExecResult {
        exit_code,
        stdout,
        stderr,
    };

    if result.success() {
        tracing::trace!(command = %cmd, exit_code = exit_code, "Command succeeded");
    } else {
        tracing::warn!(
            command = %cmd,
            exit_code = exit_code,
            stderr = %result.stderr,
            "Command failed"
        );
    }

    Ok(result)
}

/// Executes a shell command and fails on non-zero exit.
///
/// Returns stdout on success.
pub async fn exec_or_throw(cmd: &str) -> ShellResult<String> {
    let result = exec(cmd).await?;
    if result.success() {
        Ok(result.stdout)
    } else {
        Err(ShellError::ShellCommandFailed {
            command: cmd.to_string(),
            exit_code: result.exit_code,
            output: result.combined_output(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_shellquote_simple() {
        assert_eq!(shellquote("s1"), "\"s1\"");
        assert_eq!(shellquote("h1-eth0.100"), "\"h1-eth0.100\"");
    }

    #[test]
    fn test_shellquote_special_chars() {
        assert_eq!(shellquote("$HOME"), "\"\\$HOME\"");
        assert_eq!(shellquote("`whoami`"), "\"\\`whoami\\`\"");
        assert_eq!(shellquote("say \"hi\""), "\"say \\\"hi\\\"\"");
        assert_eq!(shellquote("path\\to"), "\"path\\\\to\"");
        assert_eq!(shellquote("line1\nline2"), "\"line1\\\nline2\"");
    }

    #[test]
    fn test_shellquote_injection_stays_inside_quotes() {
        assert_eq!(shellquote("s1; rm -rf /"), "\"s1; rm -rf /\"");
    }

    #[test]
    fn test_exec_result_combined() {
        let result = ExecResult {
            exit_code: 0,
            stdout: "stdout".to_string(),
            stderr: "stderr".to_string(),
        };
        assert!(result.success());
        assert_eq!(result.combined_output(), "stdout\nstderr");

        let failed = ExecResult {
            exit_code: 1,
            stdout: String::new(),
            stderr: "error message".to_string(),
        };
        assert!(!failed.success());
        assert_eq!(failed.combined_output(), "error message");
    }

    #[tokio::test]
    async fn test_exec_echo() {
        let result = exec("echo hello").await.unwrap();
        assert!(result.success());
        assert_eq!(result.stdout, "hello");
    }

    #[tokio::test]
    async fn test_abandoned_command_is_killed() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("survived");
        let cmd = format!(
            "(sleep 0.3 && touch {}) & wait",
            shellquote(&marker.to_string_lossy())
        );

        let result = tokio::time::timeout(Duration::from_millis(50), exec(&cmd)).await;
        assert!(result.is_err());

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn test_exec_or_throw_failure() {
        let result = exec_or_throw("exit 3").await;
        match result {
            Err(ShellError::ShellCommandFailed { exit_code, .. }) => {
                assert_eq!(exit_code, 3);
            }
            _ => panic!("Expected ShellCommandFailed error"),
        }
    }
}
