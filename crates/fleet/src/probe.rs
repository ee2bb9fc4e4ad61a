use std::sync::Arc;
use std::time::Duration;

use futures_util::future;
use futures_util::stream::{FuturesUnordered, StreamExt};
use futures_util::Stream;
use tokio_util::sync::CancellationToken;

use fleet_protocol::ConnectionProbe;

use crate::dispatch::Dispatcher;

/// Probes every registered target concurrently, yielding results in
/// completion order: N targets cost roughly the slowest latency, not the sum.
///
/// The registry is snapshotted once at batch start; probes never mutate it.
/// Cancelling the token abandons the remaining local waits best-effort — a
/// remote session that already started may still run to completion on the
/// remote host, since the transport offers no cooperative abort.
pub async fn probe_all(
    dispatcher: Arc<Dispatcher>,
    probe_timeout: Duration,
    cancel: CancellationToken,
) -> impl Stream<Item = ConnectionProbe> {
    let names = dispatcher.target_names().await;
    tracing::debug!(targets = names.len(), "probing fleet");
    let tasks: FuturesUnordered<_> = names
        .into_iter()
        .map(|name| {
            let dispatcher = Arc::clone(&dispatcher);
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::select! {
                    probe = dispatcher.probe(&name, probe_timeout) => Some(probe),
                    _ = cancel.cancelled() => None,
                }
            })
        })
        .collect();
    tasks.filter_map(|joined| future::ready(joined.ok().flatten()))
}
