//! Prometheus metrics for the Modbus proxy.
//!
//! Covers client sessions, request scheduling, and response routing.

use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use std::sync::LazyLock;
use std::thread;
use tiny_http::{Response, Server};

/// Global metrics registry
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// ============================================================================
// Session Metrics
// ============================================================================

/// Currently connected client sessions
pub static CLIENTS_CONNECTED: LazyLock<IntGauge> = LazyLock::new(|| {
    let gauge = IntGauge::new(
        "modbus_proxy_clients_connected",
        "Currently connected client sessions",
    )
    .unwrap();
    REGISTRY.register(Box::new(gauge.clone())).unwrap();
    gauge
});

/// Client sessions closed because of a read, write, or framing error
pub static CLIENT_ERRORS: LazyLock<IntCounter> = LazyLock::new(|| {
    let counter = IntCounter::new(
        "modbus_proxy_client_errors_total",
        "Client sessions closed due to I/O or framing errors",
    )
    .unwrap();
    REGISTRY.register(Box::new(counter.clone())).unwrap();
    counter
});

// ============================================================================
// Scheduling Metrics
// ============================================================================

/// Requests accepted from clients, by priority class
pub static REQUESTS_QUEUED: LazyLock<IntCounterVec> = LazyLock::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "modbus_proxy_requests_queued_total",
            "Requests accepted from clients by priority class",
        ),
        &["priority"],
    )
    .unwrap();
    REGISTRY.register(Box::new(counter.clone())).unwrap();
    counter
});

/// Requests written to the downstream device
pub static REQUESTS_FORWARDED: LazyLock<IntCounter> = LazyLock::new(|| {
    let counter = IntCounter::new(
        "modbus_proxy_requests_forwarded_total",
        "Requests written to the downstream device",
    )
    .unwrap();
    REGISTRY.register(Box::new(counter.clone())).unwrap();
    counter
});

/// Requests dropped because their transaction id was already in flight
pub static DUPLICATE_REJECTIONS: LazyLock<IntCounter> = LazyLock::new(|| {
    let counter = IntCounter::new(
        "modbus_proxy_duplicate_rejections_total",
        "Requests dropped because their transaction id was already pending",
    )
    .unwrap();
    REGISTRY.register(Box::new(counter.clone())).unwrap();
    counter
});

/// In-flight transactions awaiting a downstream response
pub static PENDING_REQUESTS: LazyLock<IntGauge> = LazyLock::new(|| {
    let gauge = IntGauge::new(
        "modbus_proxy_pending_requests",
        "Transactions awaiting a downstream response",
    )
    .unwrap();
    REGISTRY.register(Box::new(gauge.clone())).unwrap();
    gauge
});

// ============================================================================
// Routing Metrics
// ============================================================================

/// Responses delivered to the requesting client
pub static RESPONSES_ROUTED: LazyLock<IntCounter> = LazyLock::new(|| {
    let counter = IntCounter::new(
        "modbus_proxy_responses_routed_total",
        "Downstream responses delivered to the requesting client",
    )
    .unwrap();
    REGISTRY.register(Box::new(counter.clone())).unwrap();
    counter
});

/// Responses with no matching pending transaction
pub static ROUTING_MISSES: LazyLock<IntCounter> = LazyLock::new(|| {
    let counter = IntCounter::new(
        "modbus_proxy_routing_misses_total",
        "Downstream responses dropped for lack of a pending transaction",
    )
    .unwrap();
    REGISTRY.register(Box::new(counter.clone())).unwrap();
    counter
});

/// Downstream read or write failures
pub static DOWNSTREAM_ERRORS: LazyLock<IntCounter> = LazyLock::new(|| {
    let counter = IntCounter::new(
        "modbus_proxy_downstream_errors_total",
        "Downstream connection read or write failures",
    )
    .unwrap();
    REGISTRY.register(Box::new(counter.clone())).unwrap();
    counter
});

/// Proxy state (1 = running, 0 = stopped)
pub static PROXY_RUNNING: LazyLock<IntGauge> = LazyLock::new(|| {
    let gauge = IntGauge::new(
        "modbus_proxy_running",
        "Proxy instance status (1=running, 0=stopped)",
    )
    .unwrap();
    REGISTRY.register(Box::new(gauge.clone())).unwrap();
    gauge
});

// ============================================================================
// Metrics HTTP Server
// ============================================================================

/// Start the metrics HTTP server on the given address.
/// Returns a join handle for the server thread.
pub fn serve_metrics(bind_addr: String) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let server = match Server::http(&bind_addr) {
            Ok(s) => s,
            Err(e) => {
                tracing::error!("Failed to start metrics server on {}: {}", bind_addr, e);
                return;
            }
        };

        tracing::info!("Metrics server listening on http://{}/metrics", bind_addr);

        for request in server.incoming_requests() {
            match request.url() {
                "/metrics" => {
                    let encoder = TextEncoder::new();
                    let metric_families = REGISTRY.gather();
                    let mut buffer = Vec::new();

                    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
                        tracing::warn!("Failed to encode metrics: {}", e);
                        let _ = request.respond(
                            Response::from_string("Internal Server Error").with_status_code(500),
                        );
                        continue;
                    }

                    let mut response = Response::from_data(buffer);
                    if let Ok(header) = tiny_http::Header::from_bytes(
                        &b"Content-Type"[..],
                        &b"text/plain; version=0.0.4"[..],
                    ) {
                        response = response.with_header(header);
                    }
                    let _ = request.respond(response);
                }
                "/health" => {
                    let _ = request.respond(Response::from_string("OK"));
                }
                "/ready" => {
                    // Ready while a proxy instance is forwarding
                    if PROXY_RUNNING.get() > 0 {
                        let _ = request.respond(Response::from_string("Ready"));
                    } else {
                        let _ = request
                            .respond(Response::from_string("Not Ready").with_status_code(503));
                    }
                }
                _ => {
                    let _ =
                        request.respond(Response::from_string("Not Found").with_status_code(404));
                }
            }
        }
    })
}

/// Initialize all metrics (forces lazy initialization)
pub fn init_metrics() {
    let _ = CLIENTS_CONNECTED.get();
    let _ = CLIENT_ERRORS.get();
    let _ = REQUESTS_QUEUED.with_label_values(&["high"]).get();
    let _ = REQUESTS_QUEUED.with_label_values(&["normal"]).get();
    let _ = REQUESTS_FORWARDED.get();
    let _ = DUPLICATE_REJECTIONS.get();
    let _ = PENDING_REQUESTS.get();
    let _ = RESPONSES_ROUTED.get();
    let _ = ROUTING_MISSES.get();
    let _ = DOWNSTREAM_ERRORS.get();
    let _ = PROXY_RUNNING.get();
}
