//! Prometheus metrics for tetherd.
//!
//! Every recorder is a no-op until [`init`] has run, so library users and
//! tests that never call it pay nothing.
//!
//! - `tether_signon_total{stage, outcome}` - signon decisions
//! - `tether_signon_duration_seconds{stage}` - authenticator latency
//! - `tether_reuse_total{outcome}` - session resumption attempts
//! - `tether_sessions{state}` - sessions per record state (gauge)

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts,
    Registry, TextEncoder,
};
use std::collections::BTreeMap;
use std::sync::OnceLock;

/// Global Prometheus registry for all metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

pub fn registry() -> &'static Registry {
    REGISTRY.get_or_init(Registry::new)
}

// ========================================================================
// Counters (monotonic increasing)
// ========================================================================

/// Signon decisions by stage (primary/secondary) and outcome.
pub static SIGNON_OUTCOMES: OnceLock<IntCounterVec> = OnceLock::new();

/// Session resumption attempts by outcome.
pub static REUSE_OUTCOMES: OnceLock<IntCounterVec> = OnceLock::new();

/// Administrative kickouts.
pub static KICKOUTS: OnceLock<IntCounter> = OnceLock::new();

/// Sessions terminated by the expiry sweep.
pub static EXPIRED_SESSIONS: OnceLock<IntCounter> = OnceLock::new();

/// Channels closed because the peer stopped pinging.
pub static PING_TIMEOUTS: OnceLock<IntCounter> = OnceLock::new();

/// Application frames dropped before signon.
pub static DROPPED_FRAMES: OnceLock<IntCounter> = OnceLock::new();

// ========================================================================
// Gauges (can increase/decrease)
// ========================================================================

/// Currently open channels.
pub static OPEN_CHANNELS: OnceLock<IntGauge> = OnceLock::new();

/// Session records by state.
pub static SESSIONS: OnceLock<IntGaugeVec> = OnceLock::new();

// ========================================================================
// Histograms
// ========================================================================

pub static SIGNON_LATENCY: OnceLock<HistogramVec> = OnceLock::new();

/// Initialize the Prometheus metrics registry.
///
/// Must be called once at server startup before any metrics are recorded.
pub fn init() {
    let r = registry();

    // Helper macro to register metric
    macro_rules! register {
        ($metric:ident, $init:expr) => {
            match $init {
                Ok(m) => {
                    if let Err(e) = r.register(Box::new(m.clone())) {
                        tracing::warn!(error = %e, concat!("Failed to register metric ", stringify!($metric)));
                    }
                    let _ = $metric.set(m);
                }
                Err(e) => {
                    tracing::error!(error = %e, concat!("Failed to create metric ", stringify!($metric)));
                }
            }
        };
    }

    register!(SIGNON_OUTCOMES, IntCounterVec::new(Opts::new("tether_signon_total", "Signon decisions by stage and outcome"), &["stage", "outcome"]));
    register!(REUSE_OUTCOMES, IntCounterVec::new(Opts::new("tether_reuse_total", "Session resumption attempts by outcome"), &["outcome"]));
    register!(KICKOUTS, IntCounter::new("tether_kickouts_total", "Administrative kickouts"));
    register!(EXPIRED_SESSIONS, IntCounter::new("tether_expired_sessions_total", "Sessions expired after inactivity"));
    register!(PING_TIMEOUTS, IntCounter::new("tether_ping_timeouts_total", "Channels closed for missing pings"));
    register!(DROPPED_FRAMES, IntCounter::new("tether_dropped_frames_total", "Application frames dropped before signon"));
    register!(OPEN_CHANNELS, IntGauge::new("tether_open_channels", "Currently open channels"));
    register!(SESSIONS, IntGaugeVec::new(Opts::new("tether_sessions", "Session records by state"), &["state"]));
    register!(SIGNON_LATENCY, HistogramVec::new(
        HistogramOpts::new("tether_signon_duration_seconds", "Signon decision latency by stage")
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]),
        &["stage"]));
}

/// Gather all metrics and encode them in Prometheus text format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = registry().gather();
    let mut buffer = vec![];
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode Prometheus metrics");
        return String::new();
    }
    match String::from_utf8(buffer) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "Prometheus metrics were not valid UTF-8");
            String::new()
        }
    }
}

// ============================================================================
// Recorders
// ============================================================================

fn inc(metric: &OnceLock<IntCounter>) {
    if let Some(c) = metric.get() {
        c.inc();
    }
}

#[inline]
pub fn record_signon(stage: &str, outcome: &str) {
    if let Some(c) = SIGNON_OUTCOMES.get() {
        c.with_label_values(&[stage, outcome]).inc();
    }
}

#[inline]
pub fn record_signon_latency(stage: &str, duration_secs: f64) {
    if let Some(h) = SIGNON_LATENCY.get() {
        h.with_label_values(&[stage]).observe(duration_secs);
    }
}

#[inline]
pub fn record_reuse(outcome: &str) {
    if let Some(c) = REUSE_OUTCOMES.get() {
        c.with_label_values(&[outcome]).inc();
    }
}

#[inline]
pub fn record_kickout() {
    inc(&KICKOUTS);
}

#[inline]
pub fn record_expired(count: usize) {
    if let Some(c) = EXPIRED_SESSIONS.get() {
        c.inc_by(count as u64);
    }
}

#[inline]
pub fn record_ping_timeout() {
    inc(&PING_TIMEOUTS);
}

#[inline]
pub fn record_dropped_frame() {
    inc(&DROPPED_FRAMES);
}

#[inline]
pub fn channel_opened() {
    if let Some(g) = OPEN_CHANNELS.get() {
        g.inc();
    }
}

#[inline]
pub fn channel_closed() {
    if let Some(g) = OPEN_CHANNELS.get() {
        g.dec();
    }
}

/// Replace the per-state session gauge. States missing from `counts` read 0.
pub fn set_sessions_by_state(counts: &BTreeMap<&'static str, usize>) {
    let Some(g) = SESSIONS.get() else {
        return;
    };
    for state in [
        "pending_primary",
        "pending_secondary",
        "active",
        "disconnected_reusable",
    ] {
        let count = counts.get(state).copied().unwrap_or(0);
        g.with_label_values(&[state]).set(count as i64);
    }
}
