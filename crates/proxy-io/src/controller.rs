use crate::config::ProxyConfig;
use crate::error::ProxyError;
use crate::server::ProxyHandle;
use serde::Serialize;
use std::sync::{Mutex, MutexGuard};
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StartStatus {
    Started,
    AlreadyRunning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopStatus {
    Stopped,
    NotRunning,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProxyStatus {
    pub running: bool,
    pub downstream_connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub listen_addr: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_addr: Option<String>,
}

/// Owns at most one proxy instance and serializes start/stop/status on it.
///
/// Starting while an instance is live reports `AlreadyRunning` and leaves the
/// live instance alone.
pub struct ProxyController {
    template: ProxyConfig,
    active: Mutex<Option<ProxyHandle>>,
}

impl ProxyController {
    /// `template` supplies timeouts and policies; addresses come from `start`.
    pub fn new(template: ProxyConfig) -> Self {
        Self {
            template,
            active: Mutex::new(None),
        }
    }

    fn active(&self) -> MutexGuard<'_, Option<ProxyHandle>> {
        self.active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn start(
        &self,
        listen_host: &str,
        listen_port: u16,
        target_host: &str,
        target_port: u16,
    ) -> Result<StartStatus, ProxyError> {
        let parts = ProxyConfig::from_parts(listen_host, listen_port, target_host, target_port);
        self.start_with(ProxyConfig {
            listen_addr: parts.listen_addr,
            target_addr: parts.target_addr,
            ..self.template.clone()
        })
    }

    pub fn start_with(&self, config: ProxyConfig) -> Result<StartStatus, ProxyError> {
        let mut active = self.active();
        if active.as_ref().is_some_and(ProxyHandle::is_running) {
            info!(listen_addr = %config.listen_addr, "Proxy already running");
            return Ok(StartStatus::AlreadyRunning);
        }
        // A stale handle is stopped before its slot is reused.
        if let Some(mut stale) = active.take() {
            stale.stop();
        }
        *active = Some(ProxyHandle::start(config)?);
        Ok(StartStatus::Started)
    }

    pub fn stop(&self) -> StopStatus {
        let handle = self.active().take();
        match handle {
            Some(mut handle) => {
                handle.stop();
                StopStatus::Stopped
            }
            None => StopStatus::NotRunning,
        }
    }

    pub fn status(&self) -> ProxyStatus {
        let active = self.active();
        match active.as_ref() {
            Some(handle) if handle.is_running() => ProxyStatus {
                running: true,
                downstream_connected: handle.downstream_connected(),
                listen_addr: Some(handle.listen_addr().to_string()),
                target_addr: Some(handle.target_addr().to_string()),
            },
            _ => ProxyStatus {
                running: false,
                downstream_connected: false,
                listen_addr: None,
                target_addr: None,
            },
        }
    }
}

impl Default for ProxyController {
    fn default() -> Self {
        Self::new(ProxyConfig::default())
    }
}
