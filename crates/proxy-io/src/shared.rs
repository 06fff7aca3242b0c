use crate::config::ProxyConfig;
use crate::metrics::PENDING_REQUESTS;
use crate::queue::WorkQueue;
use proxy_core::{Frame, PendingRequests};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::mpsc;

/// Where a response for one request has to go.
///
/// The connection itself stays with its session task; the router only
/// ever holds this sender.
#[derive(Debug, Clone)]
pub(crate) struct ReplySink {
    pub addr: SocketAddr,
    pub tx: mpsc::Sender<Frame>,
}

#[derive(Debug)]
pub(crate) struct Request {
    pub client: ReplySink,
    pub frame: Frame,
}

/// State shared by the acceptor, sessions, dispatcher and router of one instance.
#[derive(Debug)]
pub(crate) struct ProxyShared {
    pub queue: WorkQueue<Request>,
    pending: Mutex<PendingRequests<ReplySink>>,
    downstream_connected: AtomicBool,
    pub client_queue_capacity: usize,
}

impl ProxyShared {
    pub fn new(config: &ProxyConfig) -> Self {
        Self {
            queue: WorkQueue::new(),
            pending: Mutex::new(PendingRequests::new(
                config.duplicate_policy,
                config.request_timeout,
                config.max_pending,
            )),
            downstream_connected: AtomicBool::new(true),
            client_queue_capacity: config.client_queue_capacity.max(1),
        }
    }

    /// Never hold the guard across an await.
    pub fn pending(&self) -> MutexGuard<'_, PendingRequests<ReplySink>> {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn publish_pending_len(&self, len: usize) {
        PENDING_REQUESTS.set(len as i64);
    }

    pub fn downstream_connected(&self) -> bool {
        self.downstream_connected.load(Ordering::Relaxed)
    }

    pub fn mark_downstream_lost(&self) {
        self.downstream_connected.store(false, Ordering::Relaxed);
    }
}
