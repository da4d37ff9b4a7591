//! Command Gateway
//!
//! Every call out to the operating system (`nmcli`, `systemctl`, `wg-quick`,
//! ...) goes through [`CommandRunner`], which enforces a timeout, captures
//! both output streams and records metrics. The per-domain services on top
//! turn that raw text into typed results.

pub mod hotspot;
pub mod network;
pub mod system;
pub mod vpn;

#[cfg(test)]
pub(crate) mod fake;

use async_trait::async_trait;
use std::fmt;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::logging;
use crate::metrics::{COMMAND_LATENCY, COMMAND_RESULTS};

// Arguments whose following value is a secret
const SECRET_FLAGS: &[&str] = &["password", "wifi-sec.psk", "802-11-wireless-security.psk"];

/// One external invocation: program, arguments and how long to wait for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub timeout: Duration,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            timeout,
        }
    }

    /// `sudo <program>`
    pub fn sudo(program: impl Into<String>, timeout: Duration) -> Self {
        Self::new("sudo", timeout).arg(program)
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, A>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Full command line, secrets included. Never log this.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    // The binary that does the work, skipping a leading sudo
    fn label(&self) -> &str {
        if self.program == "sudo" {
            self.args.first().map(String::as_str).unwrap_or("sudo")
        } else {
            &self.program
        }
    }
}

// Log-safe rendering
impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        let mut hide_next = false;
        for arg in &self.args {
            if hide_next {
                write!(f, " {}", logging::REDACTED)?;
                hide_next = false;
                continue;
            }
            write!(f, " {}", logging::redact(arg))?;
            hide_next = SECRET_FLAGS.contains(&arg.as_str());
        }
        Ok(())
    }
}

/// Captured result of a command that ran to completion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    // stderr when there is one, stdout otherwise
    pub fn error_text(&self) -> &str {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            self.stdout.trim()
        } else {
            stderr
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("{program} timed out after {}s", after.as_secs())]
    Timeout { program: String, after: Duration },

    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

impl GatewayError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, GatewayError::Timeout { .. })
    }
}

/// The seam between the portal and the OS.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run to completion (or timeout). A non-zero exit is *not* an error here;
    /// callers inspect [`CommandOutput::success`].
    async fn run(&self, cmd: &CommandSpec) -> Result<CommandOutput, GatewayError>;

    /// Start a background process and return its pid without waiting.
    fn spawn_detached(&self, cmd: &CommandSpec) -> Result<u32, GatewayError>;
}

/// Runs real processes with `tokio::process`.
///
/// A process that outlives its timeout is left running; the caller only
/// stops waiting for it.
#[derive(Debug, Default, Clone)]
pub struct SystemRunner;

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, cmd: &CommandSpec) -> Result<CommandOutput, GatewayError> {
        debug!("Executing: {}", cmd);
        let start = Instant::now();

        let child = Command::new(&cmd.program)
            .args(&cmd.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| {
                COMMAND_RESULTS.with_label_values(&[cmd.label(), "spawn_error"]).inc();
                GatewayError::Spawn {
                    program: cmd.program.clone(),
                    source,
                }
            })?;

        let output = match tokio::time::timeout(cmd.timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|source| GatewayError::Spawn {
                program: cmd.program.clone(),
                source,
            })?,
            Err(_) => {
                COMMAND_RESULTS.with_label_values(&[cmd.label(), "timeout"]).inc();
                warn!("Command timed out after {:?}: {}", cmd.timeout, cmd);
                return Err(GatewayError::Timeout {
                    program: cmd.label().to_string(),
                    after: cmd.timeout,
                });
            }
        };

        COMMAND_LATENCY.observe(start.elapsed().as_secs_f64());
        let output = CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        let outcome = if output.success() { "ok" } else { "failed" };
        COMMAND_RESULTS.with_label_values(&[cmd.label(), outcome]).inc();
        if !output.success() {
            debug!("Command exited with {:?}: {}", output.code, cmd);
        }
        Ok(output)
    }

    fn spawn_detached(&self, cmd: &CommandSpec) -> Result<u32, GatewayError> {
        debug!("Spawning detached: {}", cmd);
        let spawn_error = |source: std::io::Error| GatewayError::Spawn {
            program: cmd.program.clone(),
            source,
        };

        // the runtime reaps the child once it exits; we never wait on it
        let child = Command::new(&cmd.program)
            .args(&cmd.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(spawn_error)?;

        child.id().ok_or_else(|| {
            spawn_error(std::io::Error::other("process exited before its pid was read"))
        })
    }
}

/// Failure classes recognised in command error text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    PermissionDenied,
    DeviceMissing,
    Authentication,
    NotConnected,
    AlreadyExists,
    Timeout,
    Unreachable,
    NotFound,
    Other,
}

// Order matters: "device not found" must win over "not found"
const FAILURE_PATTERNS: &[(Failure, &[&str])] = &[
    (Failure::PermissionDenied, &["permission denied", "operation not permitted"]),
    (Failure::DeviceMissing, &["device not found", "no such device", "device missing"]),
    (Failure::Authentication, &["secrets were required", "authentication", "handshake"]),
    (Failure::NotConnected, &["not connected", "no active connection", "not active"]),
    (Failure::AlreadyExists, &["already exists", "already up", "already active"]),
    (Failure::Timeout, &["timeout", "timed out"]),
    (Failure::Unreachable, &["unreachable", "no route"]),
    (Failure::NotFound, &["no network with ssid", "not found", "no such file", "does not exist"]),
];

pub fn classify(error_text: &str) -> Failure {
    let lower = error_text.to_lowercase();
    FAILURE_PATTERNS
        .iter()
        .find(|(_, needles)| needles.iter().any(|n| lower.contains(n)))
        .map(|(failure, _)| *failure)
        .unwrap_or(Failure::Other)
}

/// Create or truncate `path` with owner-only permissions and write `content`.
pub(crate) async fn write_private(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)
        .await?;
    // mode() only applies on creation
    file.set_permissions(std::fs::Permissions::from_mode(0o600)).await?;
    file.write_all(content).await?;
    file.flush().await
}
