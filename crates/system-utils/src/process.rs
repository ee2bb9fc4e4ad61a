use std::fmt;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::time::timeout;

pub const TRUNCATION_MARKER: &str = "\n[output truncated]";

/// Failure of a bounded child-process run. Timeout expiry is a distinct
/// variant so callers can classify it apart from spawn/transport failures.
#[derive(Debug)]
pub enum CommandError {
    TimedOut { after: Duration },
    Io { context: &'static str, source: std::io::Error },
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandError::TimedOut { after } => {
                write!(f, "timed out after {}s", after.as_secs_f64())
            }
            CommandError::Io { context, source } => write!(f, "{context}: {source}"),
        }
    }
}

impl std::error::Error for CommandError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CommandError::TimedOut { .. } => None,
            CommandError::Io { source, .. } => Some(source),
        }
    }
}

#[derive(Debug)]
pub struct CapturedOutput {
    pub exit_success: bool,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub truncated: bool,
}

impl CapturedOutput {
    /// Combined stdout-then-stderr text, with the truncation marker appended
    /// when either stream hit the capture cap.
    pub fn combined(&self) -> String {
        let mut out = String::with_capacity(self.stdout.len() + self.stderr.len());
        out.push_str(&self.stdout);
        out.push_str(&self.stderr);
        if self.truncated {
            out.push_str(TRUNCATION_MARKER);
        }
        out
    }
}

/// Runs `cmd` with piped output, bounded by `command_timeout`. The child is
/// killed when the bound expires. Streams are read concurrently with the wait
/// so a chatty child cannot deadlock on a full pipe.
pub async fn run_command_with_timeout(
    cmd: &mut Command,
    command_timeout: Duration,
    max_output_bytes: usize,
) -> Result<CapturedOutput, CommandError> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    let mut child = cmd.spawn().map_err(|source| CommandError::Io {
        context: "failed to spawn command",
        source,
    })?;
    let mut stdout_pipe = child.stdout.take();
    let mut stderr_pipe = child.stderr.take();

    let capture = async {
        let (status, stdout, stderr) = tokio::join!(
            child.wait(),
            read_capped(&mut stdout_pipe, max_output_bytes),
            read_capped(&mut stderr_pipe, max_output_bytes),
        );
        (status, stdout, stderr)
    };
    let (status, stdout, stderr) = match timeout(command_timeout, capture).await {
        Ok(captured) => captured,
        Err(_) => {
            let _ = child.kill().await;
            let _ = child.wait().await;
            return Err(CommandError::TimedOut {
                after: command_timeout,
            });
        }
    };
    let status = status.map_err(|source| CommandError::Io {
        context: "failed to wait on command",
        source,
    })?;

    let (stdout_bytes, stdout_truncated) = stdout;
    let (stderr_bytes, stderr_truncated) = stderr;
    Ok(CapturedOutput {
        exit_success: status.success(),
        exit_code: status.code(),
        stdout: String::from_utf8_lossy(&stdout_bytes).to_string(),
        stderr: String::from_utf8_lossy(&stderr_bytes).to_string(),
        truncated: stdout_truncated || stderr_truncated,
    })
}

async fn read_capped<R: AsyncRead + Unpin>(
    pipe: &mut Option<R>,
    max_bytes: usize,
) -> (Vec<u8>, bool) {
    let Some(reader) = pipe.as_mut() else {
        return (Vec::new(), false);
    };
    let mut buffer = Vec::new();
    let mut truncated = false;
    let mut chunk = [0u8; 4096];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                if buffer.len() < max_bytes {
                    let remaining = max_bytes - buffer.len();
                    let to_copy = remaining.min(n);
                    buffer.extend_from_slice(&chunk[..to_copy]);
                    if to_copy < n {
                        truncated = true;
                    }
                } else {
                    truncated = true;
                }
            }
        }
    }
    (buffer, truncated)
}
