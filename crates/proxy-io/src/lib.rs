pub mod codec;
pub mod config;
pub mod control;
pub mod controller;
mod dispatcher;
pub mod error;
pub mod metrics;
pub mod queue;
mod router;
pub mod server;
mod session;
mod shared;

pub use codec::MbapCodec;
pub use config::{join_host_port, ProxyConfig};
pub use control::serve_control;
pub use controller::{ProxyController, ProxyStatus, StartStatus, StopStatus};
pub use error::ProxyError;
pub use metrics::{init_metrics, serve_metrics};
pub use queue::WorkQueue;
pub use server::{ProxyHandle, RunningProxy};
