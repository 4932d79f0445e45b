//! Server-side heartbeat watchdog.

use std::time::Duration;
use tokio::time::Instant;

/// Deadline by which the peer must ping again.
#[derive(Clone, Copy, Debug)]
pub struct PingWatchdog {
    timeout: Duration,
    last_ping: Instant,
}

impl PingWatchdog {
    /// Starts counting from now.
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            last_ping: Instant::now(),
        }
    }

    pub fn touch(&mut self) {
        self.last_ping = Instant::now();
    }

    pub fn deadline(&self) -> Instant {
        self.last_ping + self.timeout
    }
}
