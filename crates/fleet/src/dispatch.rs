use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::sync::RwLock;

use fleet_protocol::{ConnectionProbe, DispatchResult, ErrorKind, Invocation, LOCAL_TARGET};

use crate::backend::{BackendError, ExecTarget, ExecutionBackend};
use crate::decode::decode;
use crate::registry::TargetRegistry;

// Small slack on the outer bound so a well-behaved adapter reports its own
// expiry first; a stuck adapter is cut off shortly after.
const TIMEOUT_GRACE: Duration = Duration::from_millis(50);

/// Orchestrates one invocation end-to-end: resolve the target, call the
/// backend under the invocation's timeout, decode the output. Every failure
/// becomes a typed `DispatchResult`; this never returns a Rust error and
/// never retries.
pub struct Dispatcher {
    registry: Arc<RwLock<TargetRegistry>>,
    backend: Arc<dyn ExecutionBackend>,
}

impl Dispatcher {
    pub fn new(registry: Arc<RwLock<TargetRegistry>>, backend: Arc<dyn ExecutionBackend>) -> Self {
        Self { registry, backend }
    }

    pub async fn dispatch(&self, invocation: &Invocation) -> DispatchResult {
        let Some(target) = self.resolve(&invocation.target).await else {
            tracing::warn!(
                id = %invocation.id,
                target = %invocation.target,
                "dispatch to unregistered target"
            );
            return DispatchResult::failure(
                ErrorKind::TargetNotFound,
                format!("target {} is not registered", invocation.target),
            );
        };

        let bound = invocation.timeout();
        let call = self
            .backend
            .execute(&target, &invocation.script, &invocation.args, bound);
        let outcome = match tokio::time::timeout(bound + TIMEOUT_GRACE, call).await {
            Ok(outcome) => outcome,
            Err(_) => Err(BackendError::timeout(bound)),
        };

        match outcome {
            Ok(raw) => {
                let result = decode(&raw);
                tracing::info!(
                    id = %invocation.id,
                    target = %invocation.target,
                    script = %invocation.script,
                    succeeded = result.succeeded,
                    structured = result.payload.is_some(),
                    "dispatch completed"
                );
                result
            }
            Err(err) => {
                tracing::warn!(
                    id = %invocation.id,
                    target = %invocation.target,
                    script = %invocation.script,
                    kind = ?err.kind,
                    detail = %err.detail,
                    "dispatch failed"
                );
                DispatchResult::failure(err.kind, err.detail)
            }
        }
    }

    /// Liveness probe against one target. Failures surface as a disconnected
    /// probe, never as an error.
    pub async fn probe(&self, name: &str, probe_timeout: Duration) -> ConnectionProbe {
        let probed_at = now_rfc3339();
        let Some(target) = self.resolve(name).await else {
            return ConnectionProbe::down(name, "target is not registered", probed_at);
        };
        let call = self.backend.probe(&target, probe_timeout);
        let outcome = match tokio::time::timeout(probe_timeout + TIMEOUT_GRACE, call).await {
            Ok(outcome) => outcome,
            Err(_) => Err(BackendError::timeout(probe_timeout)),
        };
        match outcome {
            Ok(report) => ConnectionProbe::up(name, report.time, report.path, probed_at),
            Err(err) => ConnectionProbe::down(name, err.detail, probed_at),
        }
    }

    pub async fn target_names(&self) -> Vec<String> {
        self.registry.read().await.names()
    }

    async fn resolve(&self, name: &str) -> Option<ExecTarget> {
        if name == LOCAL_TARGET {
            return Some(ExecTarget::Local);
        }
        let registry = self.registry.read().await;
        registry.get(name).map(ExecTarget::Remote)
    }
}

fn now_rfc3339() -> String {
    humantime::format_rfc3339_seconds(SystemTime::now()).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{
        registry_with, sample_target, stub_backend, FailingBackend, HangingBackend,
    };
    use std::time::Instant;

    fn invocation(target: &str) -> Invocation {
        Invocation::new(target, "status.sh", "-Json", Duration::from_secs(5))
    }

    #[tokio::test]
    async fn structured_output_succeeds_despite_failed_exit() {
        let registry = registry_with(&["kids-pc"]);
        let (backend, _calls) = stub_backend("{\"usedMinutes\": 45}", false);
        let dispatcher = Dispatcher::new(registry, backend);

        let result = dispatcher.dispatch(&invocation("kids-pc")).await;
        assert!(result.succeeded);
        assert_eq!(result.payload.expect("payload")["usedMinutes"], 45);
    }

    #[tokio::test]
    async fn unknown_target_short_circuits_without_backend_call() {
        let registry = registry_with(&[]);
        let (backend, calls) = stub_backend("{}", true);
        let dispatcher = Dispatcher::new(registry, backend);

        let result = dispatcher.dispatch(&invocation("nonexistent")).await;
        assert!(!result.succeeded);
        assert_eq!(result.error, Some(ErrorKind::TargetNotFound));
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn local_marker_skips_registry() {
        let registry = registry_with(&[]);
        let (backend, calls) = stub_backend("done\n", true);
        let dispatcher = Dispatcher::new(registry, backend);

        let result = dispatcher.dispatch(&invocation(LOCAL_TARGET)).await;
        assert!(result.succeeded);
        assert_eq!(result.raw_output, "done\n");
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn hanging_backend_times_out_within_bound() {
        let registry = registry_with(&["kids-pc"]);
        let dispatcher = Dispatcher::new(registry, Arc::new(HangingBackend));

        let invocation =
            Invocation::new("kids-pc", "status.sh", "", Duration::from_millis(200));
        let started = Instant::now();
        let result = dispatcher.dispatch(&invocation).await;
        assert!(!result.succeeded);
        assert_eq!(result.error, Some(ErrorKind::Timeout));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn backend_error_maps_without_decoding() {
        let registry = registry_with(&["kids-pc"]);
        let backend = Arc::new(FailingBackend::new(
            ErrorKind::ConnectionFailed,
            "connection refused",
        ));
        let dispatcher = Dispatcher::new(registry, backend);

        let result = dispatcher.dispatch(&invocation("kids-pc")).await;
        assert!(!result.succeeded);
        assert_eq!(result.error, Some(ErrorKind::ConnectionFailed));
        assert_eq!(result.detail.as_deref(), Some("connection refused"));
        assert!(result.payload.is_none());
    }

    #[tokio::test]
    async fn register_dispatch_end_to_end() {
        let registry = registry_with(&[]);
        {
            let mut guard = registry.write().await;
            let mut target = sample_target("kids-pc");
            target.address = "192.168.0.42".to_string();
            target.install_path = "C:\\App".to_string();
            guard.add(target).expect("add");
        }
        let (backend, _calls) = stub_backend("{\"usedMinutes\":45,\"limitHours\":2}", true);
        let dispatcher = Dispatcher::new(registry, backend);

        let result = dispatcher.dispatch(&invocation("kids-pc")).await;
        assert!(result.succeeded);
        let payload = result.payload.expect("payload");
        assert_eq!(payload["usedMinutes"], 45);
        assert_eq!(payload["limitHours"], 2);
    }

    #[tokio::test]
    async fn removed_target_is_not_found() {
        let registry = registry_with(&["kids-pc"]);
        let (backend, calls) = stub_backend("{}", true);
        let dispatcher = Dispatcher::new(Arc::clone(&registry), backend);

        assert!(registry.write().await.remove("kids-pc").expect("remove"));
        let result = dispatcher.dispatch(&invocation("kids-pc")).await;
        assert_eq!(result.error, Some(ErrorKind::TargetNotFound));
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn probe_reports_disconnect_instead_of_raising() {
        let registry = registry_with(&["kids-pc"]);
        let backend = Arc::new(FailingBackend::new(
            ErrorKind::ConnectionFailed,
            "host unreachable",
        ));
        let dispatcher = Dispatcher::new(registry, backend);

        let probe = dispatcher.probe("kids-pc", Duration::from_millis(500)).await;
        assert!(!probe.connected);
        assert_eq!(probe.error_detail.as_deref(), Some("host unreachable"));
        assert!(!probe.probed_at.is_empty());
    }
}
