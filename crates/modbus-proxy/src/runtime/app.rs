use crate::runtime::config::RuntimeConfig;
use crate::runtime::logging::init_tracing;
use crate::runtime::telemetry;
use proxy_io::{serve_control, ProxyController, ProxyError, StopStatus};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

const IDLE_POLL: Duration = Duration::from_millis(200);

pub fn run_from_args() {
    let config = RuntimeConfig::from_env();
    if config.show_help {
        RuntimeConfig::print_help();
        return;
    }
    if let Err(e) = run(config) {
        error!(error = %e, "modbus-proxy exiting on startup failure");
        std::process::exit(1);
    }
}

pub fn run(config: RuntimeConfig) -> Result<(), ProxyError> {
    init_tracing(config.json_logs);
    for flag in &config.rejected {
        warn!(flag = %flag, "Ignoring invalid command-line value");
    }

    telemetry::init();
    let _metrics_handle = telemetry::start_metrics_server(&config.metrics_addr);

    let template = config.proxy_template();
    info!(
        connect_timeout_ms = config.connect_timeout_ms,
        request_timeout_ms = config.request_timeout_ms,
        max_pending = config.max_pending,
        duplicate_policy = config.duplicate_policy.as_str(),
        "Proxy settings"
    );
    let controller = Arc::new(ProxyController::new(template.clone()));

    if config.target_addr.is_some() {
        controller.start_with(template)?;
    }

    let stop = Arc::new(AtomicBool::new(false));
    let control_handle = if config.control_enabled {
        let handle = serve_control(
            &config.control_addr,
            Arc::clone(&controller),
            Arc::clone(&stop),
        );
        match handle {
            Ok(handle) => Some(handle),
            Err(e) => {
                controller.stop();
                return Err(e);
            }
        }
    } else {
        info!("Control API disabled");
        None
    };

    if config.target_addr.is_none() && control_handle.is_none() {
        warn!("No --target and no control API; nothing will ever be proxied");
    }

    info!("modbus-proxy running");
    let deadline = config
        .run_seconds
        .map(|seconds| Instant::now() + Duration::from_secs(seconds));
    if let Some(seconds) = config.run_seconds {
        info!(seconds, "Running for limited duration");
    }
    while !stop.load(Ordering::Relaxed) {
        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            stop.store(true, Ordering::Relaxed);
            break;
        }
        thread::sleep(IDLE_POLL);
    }

    if let Some(handle) = control_handle {
        let _ = handle.join();
    }
    let final_status = controller.status();
    if controller.stop() == StopStatus::Stopped {
        info!(
            downstream_connected = final_status.downstream_connected,
            "Proxy stopped at exit"
        );
    }
    info!("Run complete");
    Ok(())
}
