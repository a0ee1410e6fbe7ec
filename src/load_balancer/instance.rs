//! Backend instance abstraction.
//!
//! # Responsibilities
//! - Represent a single backend endpoint of a service
//! - Carry the weight and gray flag used during selection
//! - Track health state (Healthy/Unhealthy) with flap protection

use std::fmt;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use url::Url;

use crate::config::InstanceConfig;

/// Health State enum.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    Unknown = 0,
    Healthy = 1,
    Unhealthy = 2,
}

impl From<u8> for HealthState {
    fn from(val: u8) -> Self {
        match val {
            1 => HealthState::Healthy,
            2 => HealthState::Unhealthy,
            _ => HealthState::Unknown,
        }
    }
}

/// Error raised when an instance URL cannot be used as a forwarding target.
#[derive(Debug, thiserror::Error)]
pub enum InstanceError {
    #[error("invalid instance url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
}

/// A single backend instance.
#[derive(Debug)]
pub struct Instance {
    /// Service this instance belongs to.
    pub service_id: String,
    /// Base URL requests are forwarded to.
    pub base_url: Url,
    /// Target host.
    pub host: String,
    /// Target port (explicit or scheme default).
    pub port: u16,
    /// Weight for weighted round robin (≥ 1).
    pub weight: u32,
    /// Receives gray-release traffic.
    pub gray: bool,

    /// Current health state (0=Unknown, 1=Healthy, 2=Unhealthy).
    pub state: AtomicU8,
    /// Consecutive failure count.
    pub consecutive_failures: AtomicUsize,
    /// Consecutive success count.
    pub consecutive_successes: AtomicUsize,
}

impl Instance {
    /// Create a healthy, non-gray instance.
    pub fn new(service_id: impl Into<String>, url: &str, weight: u32) -> Result<Self, InstanceError> {
        let invalid = |reason: String| InstanceError::InvalidUrl {
            url: url.to_string(),
            reason,
        };
        let base_url = Url::parse(url).map_err(|e| invalid(e.to_string()))?;
        let host = base_url
            .host_str()
            .ok_or_else(|| invalid("missing host".to_string()))?
            .to_string();
        let port = base_url
            .port_or_known_default()
            .ok_or_else(|| invalid("missing port".to_string()))?;

        Ok(Self {
            service_id: service_id.into(),
            base_url,
            host,
            port,
            weight: weight.max(1),
            gray: false,
            state: AtomicU8::new(HealthState::Healthy as u8),
            consecutive_failures: AtomicUsize::new(0),
            consecutive_successes: AtomicUsize::new(0),
        })
    }

    pub fn from_config(config: &InstanceConfig) -> Result<Self, InstanceError> {
        let instance = Self::new(config.service_id.clone(), &config.url, config.weight)?
            .with_gray(config.gray);
        instance.set_healthy(config.healthy);
        Ok(instance)
    }

    pub fn with_gray(mut self, gray: bool) -> Self {
        self.gray = gray;
        self
    }

    /// Pool key for this instance.
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Value of the outbound `Host` header: port only when non-default.
    pub fn host_header(&self) -> String {
        match self.base_url.port() {
            Some(port) => format!("{}:{}", self.host, port),
            None => self.host.clone(),
        }
    }

    // --- Health Logic ---

    /// Return true if instance is considered healthy (Healthy or Unknown).
    pub fn is_healthy(&self) -> bool {
        let s = self.state.load(Ordering::Relaxed);
        s != (HealthState::Unhealthy as u8)
    }

    pub fn health_state(&self) -> HealthState {
        HealthState::from(self.state.load(Ordering::Relaxed))
    }

    /// Force the health state, clearing the streak counters.
    pub fn set_healthy(&self, healthy: bool) {
        let state = if healthy { HealthState::Healthy } else { HealthState::Unhealthy };
        self.state.store(state as u8, Ordering::Relaxed);
        self.consecutive_failures.store(0, Ordering::Relaxed);
        self.consecutive_successes.store(0, Ordering::Relaxed);
    }

    /// Report a successful check. Returns true on a transition to Healthy.
    pub fn mark_success(&self, healthy_threshold: usize) -> bool {
        self.consecutive_failures.store(0, Ordering::Relaxed);

        if self.state.load(Ordering::Relaxed) == (HealthState::Healthy as u8) {
            return false;
        }

        let successes = self.consecutive_successes.fetch_add(1, Ordering::Relaxed) + 1;
        if successes >= healthy_threshold {
            self.state.store(HealthState::Healthy as u8, Ordering::Relaxed);
            return true;
        }
        false
    }

    /// Report a failed check. Returns true on a transition to Unhealthy.
    pub fn mark_failure(&self, unhealthy_threshold: usize) -> bool {
        self.consecutive_successes.store(0, Ordering::Relaxed);

        if self.state.load(Ordering::Relaxed) == (HealthState::Unhealthy as u8) {
            return false;
        }

        let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        if failures >= unhealthy_threshold {
            self.state.store(HealthState::Unhealthy as u8, Ordering::Relaxed);
            return true;
        }
        false
    }
}

impl fmt::Display for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.service_id, self.base_url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authority_and_host_header() {
        let explicit = Instance::new("svc", "http://h:9000", 1).unwrap();
        assert_eq!(explicit.authority(), "h:9000");
        assert_eq!(explicit.host_header(), "h:9000");

        let default_port = Instance::new("svc", "http://h", 1).unwrap();
        assert_eq!(default_port.authority(), "h:80");
        assert_eq!(default_port.host_header(), "h");
    }

    #[test]
    fn test_invalid_url() {
        assert!(Instance::new("svc", "not a url", 1).is_err());
    }

    #[test]
    fn test_health_thresholds() {
        let instance = Instance::new("svc", "http://h:1", 1).unwrap();
        assert!(instance.is_healthy());

        assert!(!instance.mark_failure(2));
        assert!(instance.is_healthy());
        assert!(instance.mark_failure(2));
        assert!(!instance.is_healthy());

        assert!(!instance.mark_success(2));
        assert!(instance.mark_success(2));
        assert_eq!(instance.health_state(), HealthState::Healthy);
    }
}
