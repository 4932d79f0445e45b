//! Telemetry utilities for signon timing and span construction.

use std::time::Instant;

/// Guard for timing a signon decision and recording metrics.
///
/// Records latency when dropped.
pub struct SignonTimer {
    stage: &'static str,
    start: Instant,
}

impl SignonTimer {
    /// Start timing a signon stage (`primary` or `secondary`).
    pub fn new(stage: &'static str) -> Self {
        Self {
            stage,
            start: Instant::now(),
        }
    }
}

impl Drop for SignonTimer {
    fn drop(&mut self) {
        let duration = self.start.elapsed().as_secs_f64();
        crate::metrics::record_signon_latency(self.stage, duration);
    }
}

/// Standardized span constructors.
pub mod spans {
    use std::net::SocketAddr;
    use tracing::{Span, info_span};

    /// Span for one accepted Upend channel.
    pub fn connection(addr: &SocketAddr) -> Span {
        info_span!("connection", ip = %addr.ip(), port = addr.port())
    }

    /// Span for a Downend connector actor.
    pub fn downend(url: &str) -> Span {
        info_span!("downend", url = %url)
    }
}
