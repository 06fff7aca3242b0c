use crate::codec::MbapCodec;
use crate::metrics::{DOWNSTREAM_ERRORS, RESPONSES_ROUTED, ROUTING_MISSES};
use crate::shared::ProxyShared;
use futures::StreamExt;
use proxy_core::Frame;
use std::sync::Arc;
use tokio::net::tcp::OwnedReadHalf;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Sole reader of the downstream connection.
///
/// Exits when the device closes the connection or a read fails; the rest of
/// the proxy keeps running without a route back.
pub(crate) async fn run_router(
    reader: OwnedReadHalf,
    shared: Arc<ProxyShared>,
    cancel: CancellationToken,
) {
    let mut downstream = FramedRead::new(reader, MbapCodec);

    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break,
            next = downstream.next() => next,
        };
        match next {
            Some(Ok(frame)) => route_response(frame, &shared),
            Some(Err(e)) => {
                error!(error = %e, "Downstream read failed; pending requests will not be answered");
                downstream_lost(&shared);
                break;
            }
            None => {
                error!("Downstream device closed the connection; pending requests will not be answered");
                downstream_lost(&shared);
                break;
            }
        }
    }

    debug!("Response router stopped");
}

fn route_response(frame: Frame, shared: &ProxyShared) {
    let transaction_id = frame.transaction_id();
    let client = {
        let mut pending = shared.pending();
        let client = pending.take(transaction_id);
        shared.publish_pending_len(pending.len());
        client
    };

    let Some(client) = client else {
        warn!(transaction_id, len = frame.len(), "No pending request for response; dropping");
        ROUTING_MISSES.inc();
        return;
    };

    match client.tx.try_send(frame) {
        Ok(()) => {
            debug!(transaction_id, client_addr = %client.addr, "Routed response");
            RESPONSES_ROUTED.inc();
        }
        Err(TrySendError::Closed(_)) => {
            warn!(
                transaction_id,
                client_addr = %client.addr,
                "Client disconnected before its response arrived; dropping"
            );
        }
        Err(TrySendError::Full(_)) => {
            warn!(
                transaction_id,
                client_addr = %client.addr,
                "Client response queue full; dropping"
            );
        }
    }
}

fn downstream_lost(shared: &ProxyShared) {
    DOWNSTREAM_ERRORS.inc();
    shared.mark_downstream_lost();
    let mut pending = shared.pending();
    let abandoned = pending.len();
    pending.clear();
    shared.publish_pending_len(0);
    if abandoned > 0 {
        warn!(abandoned, "Abandoned in-flight requests");
    }
}
