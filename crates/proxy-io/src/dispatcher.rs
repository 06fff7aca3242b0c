use crate::codec::MbapCodec;
use crate::metrics::{DOWNSTREAM_ERRORS, DUPLICATE_REJECTIONS, REQUESTS_FORWARDED};
use crate::shared::ProxyShared;
use futures::SinkExt;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::tcp::OwnedWriteHalf;
use tokio_util::codec::FramedWrite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Sole writer of the downstream connection.
///
/// Takes requests in priority order, records who asked for each transaction
/// id, then writes the frame unchanged.
pub(crate) async fn run_dispatcher(
    writer: OwnedWriteHalf,
    shared: Arc<ProxyShared>,
    cancel: CancellationToken,
) {
    let mut downstream = FramedWrite::new(writer, MbapCodec);

    loop {
        let (priority, request) = tokio::select! {
            _ = cancel.cancelled() => break,
            next = shared.queue.pop_next() => next,
        };
        let transaction_id = request.frame.transaction_id();
        let client_addr = request.client.addr;

        let recorded = {
            let mut pending = shared.pending();
            let recorded = pending.insert(transaction_id, request.client, Instant::now());
            shared.publish_pending_len(pending.len());
            recorded
        };
        match recorded {
            Ok(Some(orphan)) => {
                warn!(
                    transaction_id,
                    client_addr = %client_addr,
                    orphaned_client = %orphan.addr,
                    "Replaced pending transaction; earlier requester will not be answered"
                );
            }
            Ok(None) => {}
            Err(e) => {
                warn!(
                    transaction_id,
                    client_addr = %client_addr,
                    error = %e,
                    "Dropping request"
                );
                DUPLICATE_REJECTIONS.inc();
                continue;
            }
        }

        debug!(
            transaction_id,
            client_addr = %client_addr,
            priority = priority.as_str(),
            "Forwarding request downstream"
        );
        let written = tokio::select! {
            _ = cancel.cancelled() => break,
            written = downstream.send(request.frame) => written,
        };
        match written {
            Ok(()) => REQUESTS_FORWARDED.inc(),
            Err(e) => {
                error!(
                    transaction_id,
                    client_addr = %client_addr,
                    error = %e,
                    "Downstream write failed"
                );
                DOWNSTREAM_ERRORS.inc();
                shared.mark_downstream_lost();
                let mut pending = shared.pending();
                pending.take(transaction_id);
                shared.publish_pending_len(pending.len());
            }
        }
    }

    debug!("Dispatcher stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProxyConfig;
    use crate::shared::{ReplySink, Request};
    use proxy_core::{Frame, Priority};
    use tokio::io::AsyncReadExt;
    use tokio::net::{TcpListener, TcpStream};
    use tokio::sync::mpsc;

    fn request(tid: u16, tx: &mpsc::Sender<Frame>) -> Request {
        let bytes = vec![
            (tid >> 8) as u8,
            tid as u8,
            0x00,
            0x00,
            0x00,
            0x06,
            0x01,
            0x03,
            0x00,
            0x00,
            0x00,
            0x01,
        ];
        Request {
            client: ReplySink {
                addr: "10.0.0.9:40000".parse().unwrap(),
                tx: tx.clone(),
            },
            frame: Frame::new(bytes).unwrap(),
        }
    }

    async fn device_pair() -> (OwnedWriteHalf, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let proxy_side = TcpStream::connect(addr).await.unwrap();
        let (device_side, _) = listener.accept().await.unwrap();
        let (_, writer) = proxy_side.into_split();
        (writer, device_side)
    }

    async fn read_tid(device: &mut TcpStream) -> u16 {
        let mut frame = [0u8; 12];
        device.read_exact(&mut frame).await.unwrap();
        u16::from_be_bytes([frame[0], frame[1]])
    }

    #[tokio::test]
    async fn test_high_priority_requests_are_written_first() {
        let shared = Arc::new(ProxyShared::new(&ProxyConfig::default()));
        let (tx, _rx) = mpsc::channel(8);
        shared.queue.push(Priority::Normal, request(1, &tx));
        shared.queue.push(Priority::Normal, request(2, &tx));
        shared.queue.push(Priority::High, request(3, &tx));

        let (writer, mut device) = device_pair().await;
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_dispatcher(writer, Arc::clone(&shared), cancel.clone()));

        assert_eq!(read_tid(&mut device).await, 3);
        assert_eq!(read_tid(&mut device).await, 1);
        assert_eq!(read_tid(&mut device).await, 2);
        assert_eq!(shared.pending().len(), 3);

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_duplicate_transaction_id_is_not_forwarded() {
        let shared = Arc::new(ProxyShared::new(&ProxyConfig::default()));
        let (tx, _rx) = mpsc::channel(8);
        shared.queue.push(Priority::Normal, request(7, &tx));
        shared.queue.push(Priority::Normal, request(7, &tx));
        shared.queue.push(Priority::Normal, request(8, &tx));

        let (writer, mut device) = device_pair().await;
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_dispatcher(writer, Arc::clone(&shared), cancel.clone()));

        assert_eq!(read_tid(&mut device).await, 7);
        assert_eq!(read_tid(&mut device).await, 8);
        assert!(shared.pending().contains(7));
        assert!(shared.pending().contains(8));

        cancel.cancel();
        task.await.unwrap();
    }
}
