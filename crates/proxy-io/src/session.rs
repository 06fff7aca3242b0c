use crate::codec::MbapCodec;
use crate::metrics::{CLIENTS_CONNECTED, CLIENT_ERRORS, REQUESTS_QUEUED};
use crate::shared::{ProxyShared, ReplySink, Request};
use futures::{SinkExt, StreamExt};
use proxy_core::Priority;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Serves one client connection until it closes, fails, or the proxy stops.
///
/// Inbound frames are queued for the dispatcher; responses handed back by the
/// router arrive on this session's channel and are written out verbatim.
/// Nothing that happens here reaches other sessions.
#[instrument(skip_all, fields(client_addr = %addr))]
pub(crate) async fn run_session(
    stream: TcpStream,
    addr: SocketAddr,
    shared: Arc<ProxyShared>,
    cancel: CancellationToken,
) {
    let priority = Priority::for_peer(&addr);
    if let Err(e) = stream.set_nodelay(true) {
        debug!(error = %e, "Failed to set TCP_NODELAY");
    }
    let (reader, writer) = stream.into_split();
    let mut inbound = FramedRead::new(reader, MbapCodec);
    let mut outbound = FramedWrite::new(writer, MbapCodec);

    let (tx, mut responses) = mpsc::channel(shared.client_queue_capacity);
    let reply = ReplySink { addr, tx };

    CLIENTS_CONNECTED.inc();
    info!(priority = priority.as_str(), "Client connected");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Closing client session for shutdown");
                break;
            }
            next = inbound.next() => match next {
                Some(Ok(frame)) => {
                    debug!(
                        transaction_id = frame.transaction_id(),
                        priority = priority.as_str(),
                        len = frame.len(),
                        "Enqueueing request"
                    );
                    REQUESTS_QUEUED.with_label_values(&[priority.as_str()]).inc();
                    shared.queue.push(
                        priority,
                        Request {
                            client: reply.clone(),
                            frame,
                        },
                    );
                }
                Some(Err(e)) => {
                    warn!(error = %e, "Client read failed; closing connection");
                    CLIENT_ERRORS.inc();
                    break;
                }
                None => {
                    debug!("Connection closed by client");
                    break;
                }
            },
            Some(response) = responses.recv() => {
                let transaction_id = response.transaction_id();
                let sent = tokio::select! {
                    _ = cancel.cancelled() => break,
                    sent = outbound.send(response) => sent,
                };
                if let Err(e) = sent {
                    warn!(transaction_id, error = %e, "Client write failed; closing connection");
                    CLIENT_ERRORS.inc();
                    break;
                }
                debug!(transaction_id, "Response delivered");
            }
        }
    }

    // Dropping both halves closes the socket.
    drop(inbound);
    drop(outbound);
    CLIENTS_CONNECTED.dec();
    info!("Client session closed");
}
