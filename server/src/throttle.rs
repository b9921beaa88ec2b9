//! Per-host connection attempt throttling.

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};

/// Minimum gap between connection attempts from one host.
pub const CONNECTION_COOLDOWN: Duration = Duration::from_secs(5);

/// Attempts older than this are forgotten.
pub const ATTEMPT_RETENTION: Duration = Duration::from_secs(60 * 60);

/// Remembers when each host last tried to connect.
///
/// Keyed by IP rather than socket address so a client cannot dodge the
/// cooldown by hopping source ports.
#[derive(Debug, Default)]
pub struct ConnectionThrottle {
    attempts: HashMap<IpAddr, Instant>,
}

impl ConnectionThrottle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_admissible(&self, ip: IpAddr) -> bool {
        self.is_admissible_at(ip, Instant::now())
    }

    pub fn record_attempt(&mut self, ip: IpAddr) {
        self.record_attempt_at(ip, Instant::now());
    }

    /// True unless `ip` attempted a connection within the cooldown before `now`.
    pub fn is_admissible_at(&self, ip: IpAddr, now: Instant) -> bool {
        match self.attempts.get(&ip) {
            Some(last) => now.saturating_duration_since(*last) >= CONNECTION_COOLDOWN,
            None => true,
        }
    }

    /// Stamps an attempt at `now` and drops entries past the retention window.
    pub fn record_attempt_at(&mut self, ip: IpAddr, now: Instant) {
        self.attempts.insert(ip, now);
        self.attempts
            .retain(|_, last| now.saturating_duration_since(*last) <= ATTEMPT_RETENTION);
    }

    pub fn len(&self) -> usize {
        self.attempts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attempts.is_empty()
    }
}
