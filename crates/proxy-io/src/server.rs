//! Proxy instance lifecycle.
//!
//! [`RunningProxy`] is the async instance: bind, connect downstream, spawn the
//! acceptor, dispatcher and router, and tear all of it down again.
//! [`ProxyHandle`] wraps it with its own Tokio runtime for synchronous callers
//! such as the HTTP control API.

use crate::config::ProxyConfig;
use crate::dispatcher::run_dispatcher;
use crate::error::ProxyError;
use crate::metrics::PROXY_RUNNING;
use crate::router::run_router;
use crate::session::run_session;
use crate::shared::ProxyShared;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::Runtime;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);
const RUNTIME_SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

pub struct RunningProxy {
    listen_addr: SocketAddr,
    target_addr: SocketAddr,
    shared: Arc<ProxyShared>,
    cancel: CancellationToken,
    tasks: JoinSet<()>,
}

impl RunningProxy {
    /// Binds the listener, opens the downstream connection, and starts the
    /// workers. Both failures are reported here, before anything is spawned.
    pub async fn launch(config: ProxyConfig) -> Result<Self, ProxyError> {
        let listener = TcpListener::bind(&config.listen_addr)
            .await
            .map_err(|source| ProxyError::Bind {
                addr: config.listen_addr.clone(),
                source,
            })?;
        let listen_addr = listener.local_addr()?;

        let connect = TcpStream::connect(&config.target_addr);
        let downstream = match tokio::time::timeout(config.connect_timeout, connect).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => {
                return Err(ProxyError::Connect {
                    addr: config.target_addr.clone(),
                    source,
                })
            }
            Err(_) => {
                return Err(ProxyError::ConnectTimeout {
                    addr: config.target_addr.clone(),
                    timeout_ms: config.connect_timeout.as_millis() as u64,
                })
            }
        };
        if let Err(e) = downstream.set_nodelay(true) {
            debug!(error = %e, "Failed to set TCP_NODELAY on downstream connection");
        }
        let target_addr = downstream.peer_addr()?;
        let (down_reader, down_writer) = downstream.into_split();

        let shared = Arc::new(ProxyShared::new(&config));
        let cancel = CancellationToken::new();
        let mut tasks = JoinSet::new();
        tasks.spawn(accept_loop(listener, Arc::clone(&shared), cancel.clone()));
        tasks.spawn(run_dispatcher(down_writer, Arc::clone(&shared), cancel.clone()));
        tasks.spawn(run_router(down_reader, Arc::clone(&shared), cancel.clone()));

        PROXY_RUNNING.set(1);
        info!(
            listen_addr = %listen_addr,
            target_addr = %target_addr,
            duplicate_policy = config.duplicate_policy.as_str(),
            "Modbus proxy started"
        );

        Ok(Self {
            listen_addr,
            target_addr,
            shared,
            cancel,
            tasks,
        })
    }

    /// Actual bound address (useful when listening on port 0).
    pub fn listen_addr(&self) -> SocketAddr {
        self.listen_addr
    }

    pub fn target_addr(&self) -> SocketAddr {
        self.target_addr
    }

    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    /// False once the router has seen the device go away.
    pub fn downstream_connected(&self) -> bool {
        self.shared.downstream_connected()
    }

    /// Signals every worker, waits for them to exit, and discards whatever is
    /// still queued or pending. All sockets are closed when this returns.
    pub async fn shutdown(mut self) {
        info!(listen_addr = %self.listen_addr, "Shutting down Modbus proxy");
        self.cancel.cancel();
        while let Some(joined) = self.tasks.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "Proxy task ended abnormally");
            }
        }

        let dropped = self.shared.queue.drain().len();
        if dropped > 0 {
            warn!(dropped, "Discarded queued requests on shutdown");
        }
        {
            let mut pending = self.shared.pending();
            pending.clear();
            self.shared.publish_pending_len(0);
        }
        PROXY_RUNNING.set(0);
        info!(listen_addr = %self.listen_addr, "Modbus proxy stopped");
    }
}

impl Drop for RunningProxy {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn accept_loop(listener: TcpListener, shared: Arc<ProxyShared>, cancel: CancellationToken) {
    let mut sessions = JoinSet::new();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    sessions.spawn(run_session(stream, addr, Arc::clone(&shared), cancel.clone()));
                }
                Err(e) => {
                    warn!(error = %e, "Accept failed");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            },
            Some(joined) = sessions.join_next(), if !sessions.is_empty() => {
                if let Err(e) = joined {
                    warn!(error = %e, "Client session ended abnormally");
                }
            }
        }
    }

    drop(listener);
    while sessions.join_next().await.is_some() {}
    debug!("Acceptor stopped");
}

/// Synchronous owner of one proxy instance and the runtime it runs on.
///
/// Must not be created or dropped from inside another Tokio runtime.
pub struct ProxyHandle {
    runtime: Option<Runtime>,
    proxy: Option<RunningProxy>,
    listen_addr: SocketAddr,
    target_addr: SocketAddr,
}

impl ProxyHandle {
    pub fn start(config: ProxyConfig) -> Result<Self, ProxyError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("modbus-proxy")
            .enable_all()
            .build()
            .map_err(ProxyError::Runtime)?;
        let proxy = runtime.block_on(RunningProxy::launch(config))?;

        Ok(Self {
            listen_addr: proxy.listen_addr(),
            target_addr: proxy.target_addr(),
            runtime: Some(runtime),
            proxy: Some(proxy),
        })
    }

    /// Idempotent: later calls do nothing.
    pub fn stop(&mut self) {
        let (Some(runtime), Some(proxy)) = (self.runtime.take(), self.proxy.take()) else {
            return;
        };
        runtime.block_on(proxy.shutdown());
        runtime.shutdown_timeout(RUNTIME_SHUTDOWN_GRACE);
    }

    pub fn is_running(&self) -> bool {
        self.proxy.as_ref().is_some_and(RunningProxy::is_running)
    }

    pub fn downstream_connected(&self) -> bool {
        self.proxy
            .as_ref()
            .is_some_and(RunningProxy::downstream_connected)
    }

    pub fn listen_addr(&self) -> SocketAddr {
        self.listen_addr
    }

    pub fn target_addr(&self) -> SocketAddr {
        self.target_addr
    }
}

impl Drop for ProxyHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
