//! Resolution bridge between the blocking guest thread and the async host.
//!
//! Lazy modules are computed on demand. The guest thread sends a
//! [`ResolveRequest`] and blocks on its reply; a responder task that owns the
//! [`ExecutionContext`] computes the snapshot. The responder stops as soon as
//! the isolate drops its [`BridgeHandle`].

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::context::ExecutionContext;
use crate::error::ResolveError;
use crate::sandbox::capability::ModuleKind;
use crate::snapshot::{snapshot_for, Snapshot};

/// Pending lazy requests per run. A guest has one thread, so at most one is
/// ever in flight.
const BRIDGE_CAPACITY: usize = 1;

/// A request for one module's snapshot.
#[derive(Debug)]
pub struct ResolveRequest {
    pub module: ModuleKind,
    pub reply: oneshot::Sender<Result<Snapshot, ResolveError>>,
}

/// The guest-side handle for requesting lazy snapshots.
///
/// Must only be used from a blocking thread.
#[derive(Debug)]
pub struct BridgeHandle {
    request_tx: mpsc::Sender<ResolveRequest>,
}

impl BridgeHandle {
    /// Request the snapshot for `module`, blocking until the host replies.
    pub fn request(&self, module: ModuleKind) -> Result<Snapshot, ResolveError> {
        let closed = || ResolveError::BridgeClosed {
            module: module.name().to_string(),
        };
        let (reply, response) = oneshot::channel();
        self.request_tx
            .blocking_send(ResolveRequest { module, reply })
            .map_err(|_| closed())?;
        response.blocking_recv().map_err(|_| closed())?
    }
}

/// Create a bridge pair without a responder.
pub fn create_bridge() -> (BridgeHandle, mpsc::Receiver<ResolveRequest>) {
    let (request_tx, request_rx) = mpsc::channel(BRIDGE_CAPACITY);
    (BridgeHandle { request_tx }, request_rx)
}

/// Create a bridge whose requests are answered from `ctx`.
///
/// Returns the guest handle and the responder task; the task yields the
/// number of requests it served.
pub fn spawn_responder(ctx: Arc<ExecutionContext>) -> (BridgeHandle, JoinHandle<usize>) {
    let (handle, mut requests) = create_bridge();
    let responder = tokio::spawn(async move {
        let mut served = 0;
        while let Some(request) = requests.recv().await {
            let snapshot = snapshot_for(request.module, &ctx);
            // The guest side may have been interrupted while waiting.
            let _ = request.reply.send(snapshot);
            served += 1;
        }
        tracing::trace!(served, "resolution bridge closed");
        served
    });
    (handle, responder)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bridge_round_trip() {
        let (handle, mut requests) = create_bridge();

        let host = std::thread::spawn(move || {
            let request = requests.blocking_recv().unwrap();
            assert_eq!(request.module, ModuleKind::Roles);
            request
                .reply
                .send(Ok(Snapshot::unavailable(request.module)))
                .unwrap();
        });

        let snapshot = handle.request(ModuleKind::Roles).unwrap();
        assert_eq!(snapshot, Snapshot::unavailable(ModuleKind::Roles));
        host.join().unwrap();
    }

    #[test]
    fn test_bridge_channel_closed() {
        let (handle, requests) = create_bridge();
        drop(requests);

        let err = handle.request(ModuleKind::Members).unwrap_err();
        assert_eq!(err.code(), "MODULE_UNAVAILABLE");
    }

    #[test]
    fn test_bridge_reply_dropped() {
        let (handle, mut requests) = create_bridge();

        let host = std::thread::spawn(move || {
            // Receive and drop without replying.
            let _request = requests.blocking_recv().unwrap();
        });

        let err = handle.request(ModuleKind::Economy).unwrap_err();
        assert!(matches!(err, ResolveError::BridgeClosed { .. }));
        host.join().unwrap();
    }
}
