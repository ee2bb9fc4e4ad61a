use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tokio::sync::RwLock;

use fleet_protocol::{ErrorKind, RawOutcome};

use crate::backend::{BackendError, ExecTarget, ExecutionBackend, ProbeReport};
use crate::registry::{Credential, Target, TargetRegistry};

pub(crate) fn temp_dir(prefix: &str) -> PathBuf {
    let mut dir = std::env::temp_dir();
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    dir.push(format!("{prefix}-{nanos}"));
    fs::create_dir_all(&dir).expect("create temp dir");
    dir
}

pub(crate) fn sample_target(name: &str) -> Target {
    Target {
        name: name.to_string(),
        address: "192.168.0.42".to_string(),
        credential: Credential {
            principal: "user".to_string(),
            secret: "pw".to_string(),
        },
        install_path: "/opt/app".to_string(),
    }
}

pub(crate) fn registry_with(names: &[&str]) -> Arc<RwLock<TargetRegistry>> {
    let dir = temp_dir("fleet-test-registry");
    let mut registry = TargetRegistry::open(dir.join("targets.json")).expect("open registry");
    for name in names {
        registry.add(sample_target(name)).expect("add target");
    }
    Arc::new(RwLock::new(registry))
}

pub(crate) struct StubBackend {
    output: String,
    exit_succeeded: bool,
    calls: Arc<AtomicUsize>,
}

pub(crate) fn stub_backend(
    output: &str,
    exit_succeeded: bool,
) -> (Arc<dyn ExecutionBackend>, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let backend = Arc::new(StubBackend {
        output: output.to_string(),
        exit_succeeded,
        calls: Arc::clone(&calls),
    });
    (backend, calls)
}

#[async_trait]
impl ExecutionBackend for StubBackend {
    async fn execute(
        &self,
        _target: &ExecTarget,
        _script: &str,
        _args: &str,
        _timeout: Duration,
    ) -> Result<RawOutcome, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(RawOutcome {
            output: self.output.clone(),
            exit_succeeded: self.exit_succeeded,
        })
    }

    async fn probe(
        &self,
        _target: &ExecTarget,
        _timeout: Duration,
    ) -> Result<ProbeReport, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(ProbeReport {
            time: "2026-01-01T00:00:00Z".to_string(),
            path: "/stub".to_string(),
        })
    }
}

/// Never responds; exercises the dispatcher's outer timeout bound.
pub(crate) struct HangingBackend;

#[async_trait]
impl ExecutionBackend for HangingBackend {
    async fn execute(
        &self,
        _target: &ExecTarget,
        _script: &str,
        _args: &str,
        _timeout: Duration,
    ) -> Result<RawOutcome, BackendError> {
        tokio::time::sleep(Duration::from_secs(600)).await;
        Ok(RawOutcome {
            output: String::new(),
            exit_succeeded: true,
        })
    }

    async fn probe(
        &self,
        _target: &ExecTarget,
        _timeout: Duration,
    ) -> Result<ProbeReport, BackendError> {
        tokio::time::sleep(Duration::from_secs(600)).await;
        Err(BackendError::connection("unreachable"))
    }
}

pub(crate) struct FailingBackend {
    kind: ErrorKind,
    detail: String,
}

impl FailingBackend {
    pub(crate) fn new(kind: ErrorKind, detail: &str) -> Self {
        Self {
            kind,
            detail: detail.to_string(),
        }
    }

    fn error(&self) -> BackendError {
        BackendError {
            kind: self.kind,
            detail: self.detail.clone(),
        }
    }
}

#[async_trait]
impl ExecutionBackend for FailingBackend {
    async fn execute(
        &self,
        _target: &ExecTarget,
        _script: &str,
        _args: &str,
        _timeout: Duration,
    ) -> Result<RawOutcome, BackendError> {
        Err(self.error())
    }

    async fn probe(
        &self,
        _target: &ExecTarget,
        _timeout: Duration,
    ) -> Result<ProbeReport, BackendError> {
        Err(self.error())
    }
}

/// Hangs on one named target (or all of them) and answers promptly for the
/// rest; exercises probe independence and batch cancellation.
pub(crate) struct SelectiveHangBackend {
    hang_on: Option<String>,
}

impl SelectiveHangBackend {
    pub(crate) fn new(hang_on: &str) -> Self {
        Self {
            hang_on: Some(hang_on.to_string()),
        }
    }

    pub(crate) fn hang_all() -> Self {
        Self { hang_on: None }
    }

    fn hangs_for(&self, target: &ExecTarget) -> bool {
        match &self.hang_on {
            Some(name) => target.name() == name,
            None => true,
        }
    }
}

#[async_trait]
impl ExecutionBackend for SelectiveHangBackend {
    async fn execute(
        &self,
        target: &ExecTarget,
        _script: &str,
        _args: &str,
        _timeout: Duration,
    ) -> Result<RawOutcome, BackendError> {
        if self.hangs_for(target) {
            tokio::time::sleep(Duration::from_secs(600)).await;
        }
        Ok(RawOutcome {
            output: String::new(),
            exit_succeeded: true,
        })
    }

    async fn probe(
        &self,
        target: &ExecTarget,
        _timeout: Duration,
    ) -> Result<ProbeReport, BackendError> {
        if self.hangs_for(target) {
            tokio::time::sleep(Duration::from_secs(600)).await;
        } else {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        Ok(ProbeReport {
            time: "2026-01-01T00:00:00Z".to_string(),
            path: "/opt/app".to_string(),
        })
    }
}
