use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;
use uuid::Uuid;

/// Reserved target name for the machine the dispatcher itself runs on.
pub const LOCAL_TARGET: &str = "local";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    TargetNotFound,
    ScriptNotFound,
    ConnectionFailed,
    Timeout,
    DecodeFallback,
}

impl ErrorKind {
    /// Whether a caller-side retry can plausibly change the outcome.
    pub fn retryable(self) -> bool {
        matches!(self, ErrorKind::ConnectionFailed | ErrorKind::Timeout)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Invocation {
    pub id: String,
    pub target: String,
    pub script: String,
    #[serde(default)]
    pub args: String,
    pub timeout_ms: u64,
}

impl Invocation {
    pub fn new(
        target: impl Into<String>,
        script: impl Into<String>,
        args: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            target: target.into(),
            script: script.into(),
            args: args.into(),
            timeout_ms: timeout.as_millis() as u64,
        }
    }

    pub fn is_local(&self) -> bool {
        self.target == LOCAL_TARGET
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// What a backend hands back before decoding: combined stdout/stderr text
/// plus the process exit indicator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RawOutcome {
    pub output: String,
    pub exit_succeeded: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DispatchResult {
    pub succeeded: bool,
    #[serde(default)]
    pub payload: Option<Map<String, Value>>,
    #[serde(default)]
    pub raw_output: String,
    #[serde(default)]
    pub error: Option<ErrorKind>,
    #[serde(default)]
    pub detail: Option<String>,
}

impl DispatchResult {
    pub fn structured(payload: Map<String, Value>) -> Self {
        Self {
            succeeded: true,
            payload: Some(payload),
            raw_output: String::new(),
            error: None,
            detail: None,
        }
    }

    pub fn raw(output: impl Into<String>, succeeded: bool, error: Option<ErrorKind>) -> Self {
        Self {
            succeeded,
            payload: None,
            raw_output: output.into(),
            error,
            detail: None,
        }
    }

    pub fn failure(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            succeeded: false,
            payload: None,
            raw_output: String::new(),
            error: Some(kind),
            detail: Some(detail.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConnectionProbe {
    pub target: String,
    pub connected: bool,
    #[serde(default)]
    pub remote_time: Option<String>,
    #[serde(default)]
    pub remote_path: Option<String>,
    #[serde(default)]
    pub error_detail: Option<String>,
    pub probed_at: String,
}

impl ConnectionProbe {
    pub fn up(
        target: impl Into<String>,
        remote_time: impl Into<String>,
        remote_path: impl Into<String>,
        probed_at: impl Into<String>,
    ) -> Self {
        Self {
            target: target.into(),
            connected: true,
            remote_time: Some(remote_time.into()),
            remote_path: Some(remote_path.into()),
            error_detail: None,
            probed_at: probed_at.into(),
        }
    }

    pub fn down(
        target: impl Into<String>,
        detail: impl Into<String>,
        probed_at: impl Into<String>,
    ) -> Self {
        Self {
            target: target.into(),
            connected: false,
            remote_time: None,
            remote_path: None,
            error_detail: Some(detail.into()),
            probed_at: probed_at.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invocation_roundtrip() {
        let invocation = Invocation::new(
            "kids-pc",
            "status.sh",
            "-Json",
            Duration::from_secs(120),
        );
        let json = serde_json::to_string(&invocation).expect("serialize");
        let decoded: Invocation = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(invocation, decoded);
        assert_eq!(decoded.timeout(), Duration::from_secs(120));
        assert!(!decoded.is_local());
    }

    #[test]
    fn local_marker_is_recognized() {
        let invocation = Invocation::new(LOCAL_TARGET, "status.sh", "", Duration::from_secs(5));
        assert!(invocation.is_local());
    }

    #[test]
    fn dispatch_result_roundtrip() {
        let mut payload = Map::new();
        payload.insert("usedMinutes".to_string(), Value::from(45));
        let result = DispatchResult::structured(payload);
        let json = serde_json::to_string(&result).expect("serialize");
        let decoded: DispatchResult = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(result, decoded);
    }

    #[test]
    fn failure_sets_kind_and_detail() {
        let result = DispatchResult::failure(ErrorKind::TargetNotFound, "no such target");
        assert!(!result.succeeded);
        assert_eq!(result.error, Some(ErrorKind::TargetNotFound));
        assert_eq!(result.detail.as_deref(), Some("no such target"));
    }

    #[test]
    fn retryability_follows_kind() {
        assert!(ErrorKind::Timeout.retryable());
        assert!(ErrorKind::ConnectionFailed.retryable());
        assert!(!ErrorKind::TargetNotFound.retryable());
        assert!(!ErrorKind::ScriptNotFound.retryable());
        assert!(!ErrorKind::DecodeFallback.retryable());
    }

    #[test]
    fn probe_roundtrip() {
        let probe = ConnectionProbe::down("kids-pc", "connection refused", "2026-01-01T00:00:00Z");
        let json = serde_json::to_string(&probe).expect("serialize");
        let decoded: ConnectionProbe = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(probe, decoded);
        assert!(decoded.remote_time.is_none());
    }
}
