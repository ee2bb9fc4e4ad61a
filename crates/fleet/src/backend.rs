use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use tokio::process::Command;

use fleet_protocol::{ErrorKind, RawOutcome};
use system_utils::process::{run_command_with_timeout, CommandError};
use system_utils::ssh::{apply_askpass_env, apply_ssh_options};

use crate::registry::Target;

const MAX_OUTPUT_BYTES: usize = 1024 * 1024;
const SSH_CONNECT_TIMEOUT_SECS: u64 = 10;
// ssh reserves exit 255 for its own transport/auth failures.
const SSH_TRANSPORT_EXIT: i32 = 255;

#[derive(Debug, Clone)]
pub enum ExecTarget {
    Local,
    Remote(Target),
}

impl ExecTarget {
    pub fn name(&self) -> &str {
        match self {
            ExecTarget::Local => fleet_protocol::LOCAL_TARGET,
            ExecTarget::Remote(target) => &target.name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendError {
    pub kind: ErrorKind,
    pub detail: String,
}

impl BackendError {
    pub fn timeout(after: Duration) -> Self {
        Self {
            kind: ErrorKind::Timeout,
            detail: format!("no response within {}s", after.as_secs_f64()),
        }
    }

    pub fn connection(detail: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::ConnectionFailed,
            detail: detail.into(),
        }
    }

    pub fn script_not_found(path: &Path) -> Self {
        Self {
            kind: ErrorKind::ScriptNotFound,
            detail: format!("script not found: {}", path.display()),
        }
    }
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.detail)
    }
}

impl std::error::Error for BackendError {}

/// What a liveness probe reports back: current time and working directory on
/// the probed machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeReport {
    pub time: String,
    pub path: String,
}

/// Seam between the dispatcher and the machinery that actually runs scripts.
/// Implementations must bound every call by `timeout` and surface transport
/// failures as values, never panics.
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    async fn execute(
        &self,
        target: &ExecTarget,
        script: &str,
        args: &str,
        timeout: Duration,
    ) -> Result<RawOutcome, BackendError>;

    async fn probe(
        &self,
        target: &ExecTarget,
        timeout: Duration,
    ) -> Result<ProbeReport, BackendError>;
}

/// Production backend: local scripts run from the configured script
/// directory; remote scripts run over the system ssh client inside the
/// target's install path.
pub struct ProcessBackend {
    script_dir: PathBuf,
    ssh_args: Vec<String>,
}

impl ProcessBackend {
    pub fn new(script_dir: PathBuf, ssh_args: Vec<String>) -> Self {
        Self {
            script_dir,
            ssh_args,
        }
    }

    fn resolve_script(&self, script: &str) -> Result<PathBuf, BackendError> {
        let path = self.script_dir.join(script);
        // Scripts are addressed by bare name; anything that escapes the
        // script directory is treated as absent.
        if script.contains('/') || script.contains("..") || !path.is_file() {
            return Err(BackendError::script_not_found(&path));
        }
        Ok(path)
    }

    fn build_ssh_command(&self, target: &Target, remote_command: &str) -> Result<Command, BackendError> {
        let mut cmd = Command::new("ssh");
        let has_password = !target.credential.secret.is_empty();
        if has_password {
            apply_askpass_env(&mut cmd, &target.credential.secret)
                .map_err(|err| BackendError::connection(format!("askpass setup failed: {err}")))?;
        }
        cmd.arg("-T");
        apply_ssh_options(&mut cmd, has_password, SSH_CONNECT_TIMEOUT_SECS);
        cmd.args(&self.ssh_args);
        cmd.arg(format!("{}@{}", target.credential.principal, target.address));
        cmd.arg(remote_command);
        Ok(cmd)
    }

    async fn run_local(
        &self,
        script: &str,
        args: &str,
        timeout: Duration,
    ) -> Result<RawOutcome, BackendError> {
        let path = self.resolve_script(script)?;
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(local_invocation(&path, args));
        let captured = run_command_with_timeout(&mut cmd, timeout, MAX_OUTPUT_BYTES)
            .await
            .map_err(map_command_error)?;
        Ok(RawOutcome {
            output: captured.combined(),
            exit_succeeded: captured.exit_success,
        })
    }

    async fn run_remote(
        &self,
        target: &Target,
        script: &str,
        args: &str,
        timeout: Duration,
    ) -> Result<RawOutcome, BackendError> {
        let remote_command = build_remote_command(&target.install_path, script, args);
        let mut cmd = self.build_ssh_command(target, &remote_command)?;
        let captured = run_command_with_timeout(&mut cmd, timeout, MAX_OUTPUT_BYTES)
            .await
            .map_err(map_command_error)?;
        if !captured.exit_success && captured.exit_code == Some(SSH_TRANSPORT_EXIT) {
            return Err(BackendError::connection(transport_detail(&captured.stderr)));
        }
        Ok(RawOutcome {
            output: captured.combined(),
            exit_succeeded: captured.exit_success,
        })
    }
}

#[async_trait]
impl ExecutionBackend for ProcessBackend {
    async fn execute(
        &self,
        target: &ExecTarget,
        script: &str,
        args: &str,
        timeout: Duration,
    ) -> Result<RawOutcome, BackendError> {
        match target {
            ExecTarget::Local => self.run_local(script, args, timeout).await,
            ExecTarget::Remote(target) => self.run_remote(target, script, args, timeout).await,
        }
    }

    async fn probe(
        &self,
        target: &ExecTarget,
        timeout: Duration,
    ) -> Result<ProbeReport, BackendError> {
        match target {
            ExecTarget::Local => {
                if !self.script_dir.is_dir() {
                    return Err(BackendError::script_not_found(&self.script_dir));
                }
                Ok(ProbeReport {
                    time: humantime::format_rfc3339_seconds(SystemTime::now()).to_string(),
                    path: self.script_dir.display().to_string(),
                })
            }
            ExecTarget::Remote(target) => {
                let remote_command = build_probe_command(&target.install_path);
                let mut cmd = self.build_ssh_command(target, &remote_command)?;
                let captured = run_command_with_timeout(&mut cmd, timeout, MAX_OUTPUT_BYTES)
                    .await
                    .map_err(map_command_error)?;
                if !captured.exit_success {
                    return Err(BackendError::connection(transport_detail(&captured.stderr)));
                }
                parse_probe_output(&captured.stdout)
                    .ok_or_else(|| BackendError::connection("malformed probe response"))
            }
        }
    }
}

fn map_command_error(err: CommandError) -> BackendError {
    match err {
        CommandError::TimedOut { after } => BackendError::timeout(after),
        CommandError::Io { .. } => BackendError::connection(err.to_string()),
    }
}

fn local_invocation(path: &Path, args: &str) -> String {
    let mut command = String::from("sh ");
    command.push_str(&shell_escape(&path.to_string_lossy()));
    let args = args.trim();
    if !args.is_empty() {
        command.push(' ');
        // The argument string is the called script's responsibility and is
        // passed through verbatim.
        command.push_str(args);
    }
    command
}

fn build_remote_command(install_path: &str, script: &str, args: &str) -> String {
    let mut command = String::from("cd ");
    command.push_str(&shell_escape(install_path));
    command.push_str(" && sh ");
    command.push_str(&shell_escape(script));
    let args = args.trim();
    if !args.is_empty() {
        command.push(' ');
        command.push_str(args);
    }
    format!("sh -c {}", shell_escape(&command))
}

fn build_probe_command(install_path: &str) -> String {
    let command = format!(
        "cd {} && pwd && date -u +%Y-%m-%dT%H:%M:%SZ",
        shell_escape(install_path)
    );
    format!("sh -c {}", shell_escape(&command))
}

fn parse_probe_output(stdout: &str) -> Option<ProbeReport> {
    let mut lines = stdout.lines().filter(|line| !line.trim().is_empty());
    let path = lines.next()?.trim().to_string();
    let time = lines.next()?.trim().to_string();
    Some(ProbeReport { time, path })
}

fn transport_detail(stderr: &str) -> String {
    let trimmed = stderr.trim();
    if trimmed.is_empty() {
        "connection failed".to_string()
    } else {
        // Last line tends to carry the useful ssh diagnostic.
        trimmed.lines().last().unwrap_or(trimmed).to_string()
    }
}

fn shell_escape(value: &str) -> String {
    let mut escaped = String::from("'");
    for ch in value.chars() {
        if ch == '\'' {
            escaped.push_str("'\"'\"'");
        } else {
            escaped.push(ch);
        }
    }
    escaped.push('\'');
    escaped
}
