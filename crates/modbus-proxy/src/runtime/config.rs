use proxy_core::DuplicatePolicy;
use proxy_io::ProxyConfig;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub show_help: bool,
    pub run_seconds: Option<u64>,
    pub listen_addr: String,
    pub target_addr: Option<String>,
    pub control_addr: String,
    pub control_enabled: bool,
    pub json_logs: bool,
    pub metrics_addr: Option<String>,
    pub connect_timeout_ms: u64,
    pub request_timeout_ms: u64,
    pub max_pending: usize,
    pub duplicate_policy: DuplicatePolicy,
    /// Flags that were recognized but carried unusable values.
    pub rejected: Vec<String>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        let proxy = ProxyConfig::default();
        Self {
            show_help: false,
            run_seconds: None,
            listen_addr: proxy.listen_addr,
            target_addr: None,
            control_addr: "0.0.0.0:8080".to_string(),
            control_enabled: true,
            json_logs: false,
            metrics_addr: None,
            connect_timeout_ms: proxy.connect_timeout.as_millis() as u64,
            request_timeout_ms: proxy.request_timeout.as_millis() as u64,
            max_pending: proxy.max_pending,
            duplicate_policy: proxy.duplicate_policy,
            rejected: Vec::new(),
        }
    }
}

impl RuntimeConfig {
    pub fn from_env() -> Self {
        let args: Vec<String> = std::env::args().collect();
        Self::from_args(&args)
    }

    pub fn from_args(args: &[String]) -> Self {
        let mut cfg = RuntimeConfig::default();
        let mut i = 1;
        while i < args.len() {
            let flag = args[i].as_str();
            let value = args.get(i + 1).cloned();
            match flag {
                "--run-seconds" => {
                    if let Some(value) = value {
                        cfg.run_seconds = cfg.parse_or_reject(flag, &value);
                        i += 1;
                    }
                }
                "--listen" => {
                    if let Some(value) = value {
                        cfg.listen_addr = value;
                        i += 1;
                    }
                }
                "--target" => {
                    if let Some(value) = value {
                        cfg.target_addr = Some(value);
                        i += 1;
                    }
                }
                "--control-addr" => {
                    if let Some(value) = value {
                        cfg.control_addr = value;
                        i += 1;
                    }
                }
                "--no-control" => {
                    cfg.control_enabled = false;
                }
                "--json-logs" => {
                    cfg.json_logs = true;
                }
                "--metrics-addr" => {
                    if let Some(value) = value {
                        cfg.metrics_addr = Some(value);
                        i += 1;
                    }
                }
                "--connect-timeout-ms" => {
                    if let Some(value) = value {
                        if let Some(ms) = cfg.parse_or_reject(flag, &value) {
                            cfg.connect_timeout_ms = ms;
                        }
                        i += 1;
                    }
                }
                "--request-timeout-ms" => {
                    if let Some(value) = value {
                        if let Some(ms) = cfg.parse_or_reject(flag, &value) {
                            cfg.request_timeout_ms = ms;
                        }
                        i += 1;
                    }
                }
                "--max-pending" => {
                    if let Some(value) = value {
                        if let Some(max) = cfg.parse_or_reject(flag, &value) {
                            cfg.max_pending = max;
                        }
                        i += 1;
                    }
                }
                "--duplicate-policy" => {
                    if let Some(value) = value {
                        match DuplicatePolicy::parse(&value) {
                            Some(policy) => cfg.duplicate_policy = policy,
                            None => cfg.rejected.push(format!("{flag} {value}")),
                        }
                        i += 1;
                    }
                }
                "--help" | "-h" => {
                    cfg.show_help = true;
                    break;
                }
                _ => {}
            }
            i += 1;
        }
        cfg
    }

    fn parse_or_reject<T: std::str::FromStr>(&mut self, flag: &str, value: &str) -> Option<T> {
        let parsed = value.parse().ok();
        if parsed.is_none() {
            self.rejected.push(format!("{flag} {value}"));
        }
        parsed
    }

    /// Timeouts and policies for every instance the controller starts.
    pub fn proxy_template(&self) -> ProxyConfig {
        ProxyConfig {
            listen_addr: self.listen_addr.clone(),
            target_addr: self.target_addr.clone().unwrap_or_default(),
            ..ProxyConfig::default()
        }
        .with_connect_timeout(Duration::from_millis(self.connect_timeout_ms))
        .with_request_timeout(Duration::from_millis(self.request_timeout_ms))
        .with_max_pending(self.max_pending)
        .with_duplicate_policy(self.duplicate_policy)
    }

    pub fn print_help() {
        println!(
            r#"modbus-proxy - Priority-aware Modbus/TCP multiplexing proxy

USAGE:
    modbus-proxy [OPTIONS]

OPTIONS:
    --listen <ADDR>              Client-facing bind address [default: 0.0.0.0:5020]
    --target <ADDR>              Modbus device to forward to; starts the proxy immediately
    --control-addr <ADDR>        HTTP control API bind address [default: 0.0.0.0:8080]
    --no-control                 Disable the HTTP control API
    --metrics-addr <ADDR>        Enable Prometheus metrics server on address (e.g., 0.0.0.0:9090)
    --json-logs                  Output logs in JSON format (for log aggregation)
    --run-seconds <SECS>         Run for a fixed duration then exit
    --connect-timeout-ms <MS>    Downstream connect timeout [default: 3000]
    --request-timeout-ms <MS>    Age after which a pending request counts as orphaned [default: 5000]
    --max-pending <N>            Maximum in-flight transactions [default: 1024]
    --duplicate-policy <NAME>    Pending transaction id reuse (reject|replace) [default: reject]
    -h, --help                   Print this help message

ENVIRONMENT VARIABLES:
    RUST_LOG                     Set log filter (e.g., RUST_LOG=debug,proxy_io=trace)

CONTROL API:
    POST /api/proxy/start        {{"listen_host", "listen_port", "target_host", "target_port"}}
    POST /api/proxy/stop
    GET  /api/proxy/status

EXAMPLES:
    # Forward local clients to a PLC, with metrics
    modbus-proxy --target 192.168.1.10:502 --metrics-addr 0.0.0.0:9090

    # Control API only; start the proxy later over HTTP
    modbus-proxy --control-addr 127.0.0.1:8080
"#
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        std::iter::once("modbus-proxy")
            .chain(list.iter().copied())
            .map(String::from)
            .collect()
    }

    #[test]
    fn test_defaults() {
        let cfg = RuntimeConfig::from_args(&args(&[]));
        assert_eq!(cfg.listen_addr, "0.0.0.0:5020");
        assert_eq!(cfg.control_addr, "0.0.0.0:8080");
        assert!(cfg.control_enabled);
        assert!(cfg.target_addr.is_none());
        assert_eq!(cfg.duplicate_policy, DuplicatePolicy::Reject);
        assert!(cfg.rejected.is_empty());
    }

    #[test]
    fn test_parses_flags() {
        let cfg = RuntimeConfig::from_args(&args(&[
            "--listen",
            "127.0.0.1:1502",
            "--target",
            "10.0.0.5:502",
            "--no-control",
            "--json-logs",
            "--run-seconds",
            "3",
            "--request-timeout-ms",
            "250",
            "--duplicate-policy",
            "replace",
        ]));
        assert_eq!(cfg.listen_addr, "127.0.0.1:1502");
        assert_eq!(cfg.target_addr.as_deref(), Some("10.0.0.5:502"));
        assert!(!cfg.control_enabled);
        assert!(cfg.json_logs);
        assert_eq!(cfg.run_seconds, Some(3));
        assert_eq!(cfg.request_timeout_ms, 250);
        assert_eq!(cfg.duplicate_policy, DuplicatePolicy::Replace);
    }

    #[test]
    fn test_bad_values_are_recorded_and_ignored() {
        let cfg = RuntimeConfig::from_args(&args(&[
            "--duplicate-policy",
            "sometimes",
            "--max-pending",
            "lots",
        ]));
        assert_eq!(cfg.duplicate_policy, DuplicatePolicy::Reject);
        assert_eq!(cfg.max_pending, 1024);
        assert_eq!(
            cfg.rejected,
            vec!["--duplicate-policy sometimes", "--max-pending lots"]
        );
    }

    #[test]
    fn test_help_stops_parsing() {
        let cfg = RuntimeConfig::from_args(&args(&["-h", "--no-control"]));
        assert!(cfg.show_help);
        assert!(cfg.control_enabled);
    }

    #[test]
    fn test_proxy_template_carries_timeouts() {
        let cfg = RuntimeConfig::from_args(&args(&[
            "--target",
            "127.0.0.1:502",
            "--connect-timeout-ms",
            "1500",
        ]));
        let template = cfg.proxy_template();
        assert_eq!(template.target_addr, "127.0.0.1:502");
        assert_eq!(template.connect_timeout, Duration::from_millis(1500));
        assert_eq!(template.request_timeout, Duration::from_secs(5));
    }
}
