use proxy_core::DuplicatePolicy;
use std::time::Duration;

/// Settings for one proxy instance.
#[derive(Clone, Debug)]
pub struct ProxyConfig {
    /// Address clients connect to (e.g. "0.0.0.0:5020")
    pub listen_addr: String,
    /// Downstream Modbus/TCP device (e.g. "192.168.1.10:502")
    pub target_addr: String,
    /// Upper bound on the initial downstream connect
    pub connect_timeout: Duration,
    /// Age after which an unanswered request is considered orphaned
    pub request_timeout: Duration,
    /// Maximum number of in-flight transactions tracked at once
    pub max_pending: usize,
    /// Handling of a transaction id that is already in flight
    pub duplicate_policy: DuplicatePolicy,
    /// Responses buffered per client before new ones are dropped
    pub client_queue_capacity: usize,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:5020".to_string(),
            target_addr: "127.0.0.1:502".to_string(),
            connect_timeout: Duration::from_secs(3),
            request_timeout: Duration::from_secs(5),
            max_pending: 1024,
            duplicate_policy: DuplicatePolicy::Reject,
            client_queue_capacity: 32,
        }
    }
}

impl ProxyConfig {
    pub fn new(listen_addr: impl Into<String>, target_addr: impl Into<String>) -> Self {
        Self {
            listen_addr: listen_addr.into(),
            target_addr: target_addr.into(),
            ..Default::default()
        }
    }

    pub fn from_parts(
        listen_host: &str,
        listen_port: u16,
        target_host: &str,
        target_port: u16,
    ) -> Self {
        Self::new(
            join_host_port(listen_host, listen_port),
            join_host_port(target_host, target_port),
        )
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_max_pending(mut self, max_pending: usize) -> Self {
        self.max_pending = max_pending;
        self
    }

    pub fn with_duplicate_policy(mut self, policy: DuplicatePolicy) -> Self {
        self.duplicate_policy = policy;
        self
    }

    pub fn with_client_queue_capacity(mut self, capacity: usize) -> Self {
        self.client_queue_capacity = capacity;
        self
    }
}

/// Formats `host:port`, bracketing bare IPv6 literals.
pub fn join_host_port(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ProxyConfig::default();
        assert_eq!(config.listen_addr, "0.0.0.0:5020");
        assert_eq!(config.duplicate_policy, DuplicatePolicy::Reject);
        assert!(config.client_queue_capacity > 0);
    }

    #[test]
    fn test_from_parts_brackets_ipv6() {
        let config = ProxyConfig::from_parts("::", 5020, "192.168.1.10", 502);
        assert_eq!(config.listen_addr, "[::]:5020");
        assert_eq!(config.target_addr, "192.168.1.10:502");
    }

    #[test]
    fn test_builder_overrides() {
        let config = ProxyConfig::new("127.0.0.1:0", "127.0.0.1:1502")
            .with_request_timeout(Duration::from_millis(250))
            .with_duplicate_policy(DuplicatePolicy::Replace)
            .with_max_pending(8);
        assert_eq!(config.request_timeout, Duration::from_millis(250));
        assert_eq!(config.duplicate_policy, DuplicatePolicy::Replace);
        assert_eq!(config.max_pending, 8);
    }
}
