//! HTTP control API for starting, stopping and inspecting the proxy.
//!
//! `POST /api/proxy/start`, `POST /api/proxy/stop`, `GET /api/proxy/status`.
//! Bodies and responses are JSON.

use crate::controller::ProxyController;
use crate::error::ProxyError;
use serde::Deserialize;
use serde_json::{json, Value};
use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tiny_http::{Header, Method, Request, Response, Server};
use tracing::{debug, info, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Debug, Deserialize)]
struct StartRequest {
    #[serde(default = "default_listen_host")]
    listen_host: String,
    #[serde(default = "default_listen_port")]
    listen_port: u16,
    target_host: Option<String>,
    target_port: Option<u16>,
}

fn default_listen_host() -> String {
    "0.0.0.0".to_string()
}

fn default_listen_port() -> u16 {
    5020
}

/// Binds the control server and serves it on a background thread until
/// `stop` is set.
pub fn serve_control(
    bind_addr: &str,
    controller: Arc<ProxyController>,
    stop: Arc<AtomicBool>,
) -> Result<thread::JoinHandle<()>, ProxyError> {
    let server = Server::http(bind_addr).map_err(|e| ProxyError::Control {
        addr: bind_addr.to_string(),
        reason: e.to_string(),
    })?;
    info!(addr = %bind_addr, "Control API listening");

    Ok(thread::spawn(move || {
        while !stop.load(Ordering::Relaxed) {
            match server.recv_timeout(POLL_INTERVAL) {
                Ok(Some(request)) => handle_request(&controller, request),
                Ok(None) => {}
                Err(e) => {
                    warn!(error = %e, "Control API receive failed");
                    break;
                }
            }
        }
        debug!("Control API stopped");
    }))
}

fn handle_request(controller: &ProxyController, mut request: Request) {
    let method = request.method().clone();
    let url = request.url().to_string();
    debug!(method = %method, url = %url, "Control request");

    let (code, body) = match (&method, url.as_str()) {
        (Method::Post, "/api/proxy/start") => {
            let mut raw = String::new();
            match request.as_reader().read_to_string(&mut raw) {
                Ok(_) => start_proxy(controller, &raw),
                Err(e) => (400, json!({ "error": format!("failed to read body: {e}") })),
            }
        }
        (Method::Post, "/api/proxy/stop") => (200, json!({ "status": controller.stop() })),
        (Method::Get, "/api/proxy/status") => match serde_json::to_value(controller.status()) {
            Ok(status) => (200, status),
            Err(e) => (500, json!({ "error": e.to_string() })),
        },
        _ => (404, json!({ "error": "not found" })),
    };

    let mut response = Response::from_string(body.to_string()).with_status_code(code);
    if let Ok(header) = Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..]) {
        response = response.with_header(header);
    }
    if let Err(e) = request.respond(response) {
        warn!(error = %e, "Failed to send control response");
    }
}

fn start_proxy(controller: &ProxyController, raw: &str) -> (u16, Value) {
    let body = if raw.trim().is_empty() { "{}" } else { raw };
    let req: StartRequest = match serde_json::from_str(body) {
        Ok(req) => req,
        Err(e) => return (400, json!({ "error": format!("invalid request body: {e}") })),
    };
    let (Some(target_host), Some(target_port)) = (req.target_host, req.target_port) else {
        return (
            400,
            json!({ "error": "target_host and target_port are required" }),
        );
    };

    match controller.start(&req.listen_host, req.listen_port, &target_host, target_port) {
        Ok(status) => (200, json!({ "status": status })),
        Err(e) => {
            warn!(error = %e, "Proxy start failed");
            (500, json!({ "error": e.to_string() }))
        }
    }
}
