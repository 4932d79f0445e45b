//! Timing policy shared by both ends of a connection.
//!
//! A [`TimeBoundary`] bundles the durations that govern heartbeat and
//! reconnection. The Upend owns the authoritative value and announces it in
//! the [`ConnectionDescriptor`](crate::ConnectionDescriptor), so both ends
//! run on one policy.
//!
//! Instances only come out of the staged builder (or a validated parse), so
//! a partially configured or out-of-range boundary cannot exist:
//!
//! ```rust
//! use tether_proto::TimeBoundary;
//!
//! let boundary = TimeBoundary::builder()
//!     .ping_interval(1_000)
//!     .pong_timeout_never()
//!     .reconnect_immediately()
//!     .ping_timeout_never()
//!     .session_inactivity_immediate()
//!     .build()
//!     .unwrap();
//! assert_eq!(boundary.reconnect_delay_range().upper_ms(), 0);
//! ```

use crate::error::{ProtocolError, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Stand-in for "never". Small enough to add to a monotonic instant.
pub const NEVER_MS: u64 = u32::MAX as u64;

/// Connect timeout used when the reconnect lower bound is zero.
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 1_000;

/// Inclusive range of reconnect delays, in milliseconds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DelayRange {
    lower_ms: u64,
    upper_ms: u64,
}

impl DelayRange {
    /// Create a range, rejecting `lower_ms > upper_ms`.
    pub fn new(lower_ms: u64, upper_ms: u64) -> Result<Self> {
        if lower_ms > upper_ms {
            return Err(ProtocolError::InvalidTimeBoundary(format!(
                "reconnect delay lower bound {} exceeds upper bound {}",
                lower_ms, upper_ms
            )));
        }
        Ok(Self { lower_ms, upper_ms })
    }

    /// Lower bound, inclusive.
    pub fn lower_ms(&self) -> u64 {
        self.lower_ms
    }

    /// Upper bound, inclusive.
    pub fn upper_ms(&self) -> u64 {
        self.upper_ms
    }

    /// Draw a delay uniformly in `[lower, upper]`.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> u64 {
        rng.gen_range(self.lower_ms..=self.upper_ms)
    }
}

/// Names of the six integers a [`TimeBoundary`] flattens to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[allow(missing_docs)]
pub enum Key {
    PingIntervalMs,
    PongTimeoutMs,
    ReconnectDelayRangeMsLowerBound,
    ReconnectDelayRangeMsUpperBound,
    PingTimeoutMs,
    SessionInactivityMaximumMs,
}

impl Key {
    /// Every key, in declaration order.
    pub const ALL: [Key; 6] = [
        Key::PingIntervalMs,
        Key::PongTimeoutMs,
        Key::ReconnectDelayRangeMsLowerBound,
        Key::ReconnectDelayRangeMsUpperBound,
        Key::PingTimeoutMs,
        Key::SessionInactivityMaximumMs,
    ];

    /// Canonical upper-snake name.
    pub fn name(self) -> &'static str {
        match self {
            Key::PingIntervalMs => "PING_INTERVAL_MS",
            Key::PongTimeoutMs => "PONG_TIMEOUT_MS",
            Key::ReconnectDelayRangeMsLowerBound => "RECONNECT_DELAY_RANGE_MS_LOWER_BOUND",
            Key::ReconnectDelayRangeMsUpperBound => "RECONNECT_DELAY_RANGE_MS_UPPER_BOUND",
            Key::PingTimeoutMs => "PING_TIMEOUT_MS",
            Key::SessionInactivityMaximumMs => "SESSION_INACTIVITY_MAXIMUM_MS",
        }
    }

    /// HTTP header carrying this key in a connection descriptor.
    pub fn header_name(self) -> &'static str {
        match self {
            Key::PingIntervalMs => "x-tether-ping-interval-ms",
            Key::PongTimeoutMs => "x-tether-pong-timeout-ms",
            Key::ReconnectDelayRangeMsLowerBound => "x-tether-reconnect-delay-range-ms-lower-bound",
            Key::ReconnectDelayRangeMsUpperBound => "x-tether-reconnect-delay-range-ms-upper-bound",
            Key::PingTimeoutMs => "x-tether-ping-timeout-ms",
            Key::SessionInactivityMaximumMs => "x-tether-session-inactivity-maximum-ms",
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Heartbeat and reconnection timing policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawTimeBoundary", into = "RawTimeBoundary")]
pub struct TimeBoundary {
    ping_interval_ms: u64,
    pong_timeout_ms: u64,
    reconnect_delay: DelayRange,
    ping_timeout_ms: u64,
    session_inactivity_maximum_ms: u64,
}

impl TimeBoundary {
    /// Tolerates roughly 500 ms of lag in each direction.
    pub const LENIENT: TimeBoundary = TimeBoundary {
        ping_interval_ms: 1_000,
        pong_timeout_ms: 2_500,
        reconnect_delay: DelayRange {
            lower_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            upper_ms: 3_000,
        },
        ping_timeout_ms: 2_500,
        session_inactivity_maximum_ms: 10_000,
    };

    /// No heartbeat at all; only reconnection and session expiry apply.
    pub const QUIET: TimeBoundary = TimeBoundary {
        ping_interval_ms: NEVER_MS,
        pong_timeout_ms: NEVER_MS,
        reconnect_delay: DelayRange {
            lower_ms: 1_000,
            upper_ms: 1_000,
        },
        ping_timeout_ms: NEVER_MS,
        session_inactivity_maximum_ms: 10_000,
    };

    /// Start the staged builder.
    pub fn builder() -> PingIntervalStep {
        PingIntervalStep(Partial::default())
    }

    /// Delay between two pings sent by the Downend.
    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    /// How long the Downend waits for a pong before declaring the channel dead.
    pub fn pong_timeout(&self) -> Duration {
        Duration::from_millis(self.pong_timeout_ms)
    }

    /// How long the Upend tolerates no ping before declaring the channel dead.
    pub fn ping_timeout(&self) -> Duration {
        Duration::from_millis(self.ping_timeout_ms)
    }

    /// How long a disconnected session stays reusable.
    pub fn session_inactivity_maximum(&self) -> Duration {
        Duration::from_millis(self.session_inactivity_maximum_ms)
    }

    /// Range the reconnect delay is drawn from.
    pub fn reconnect_delay_range(&self) -> DelayRange {
        self.reconnect_delay
    }

    /// Draw a randomized reconnect delay.
    pub fn reconnect_delay<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        Duration::from_millis(self.reconnect_delay.sample(rng))
    }

    /// Bound on a single connection attempt.
    pub fn connect_timeout(&self) -> Duration {
        match self.reconnect_delay.lower_ms {
            0 => Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
            lower => Duration::from_millis(lower),
        }
    }

    /// Flatten into the six keyed integers.
    pub fn as_map(&self) -> BTreeMap<Key, u64> {
        Key::ALL.iter().map(|key| (*key, self.get(*key))).collect()
    }

    /// Value of a single key.
    pub fn get(&self, key: Key) -> u64 {
        match key {
            Key::PingIntervalMs => self.ping_interval_ms,
            Key::PongTimeoutMs => self.pong_timeout_ms,
            Key::ReconnectDelayRangeMsLowerBound => self.reconnect_delay.lower_ms,
            Key::ReconnectDelayRangeMsUpperBound => self.reconnect_delay.upper_ms,
            Key::PingTimeoutMs => self.ping_timeout_ms,
            Key::SessionInactivityMaximumMs => self.session_inactivity_maximum_ms,
        }
    }

    /// Rebuild from keyed integers, running them through the builder.
    pub fn parse<F>(mut resolve: F) -> Result<Self>
    where
        F: FnMut(Key) -> Result<u64>,
    {
        TimeBoundary::builder()
            .ping_interval(resolve(Key::PingIntervalMs)?)
            .pong_timeout(resolve(Key::PongTimeoutMs)?)
            .reconnect_delay(
                resolve(Key::ReconnectDelayRangeMsLowerBound)?,
                resolve(Key::ReconnectDelayRangeMsUpperBound)?,
            )
            .ping_timeout(resolve(Key::PingTimeoutMs)?)
            .session_inactivity_maximum(resolve(Key::SessionInactivityMaximumMs)?)
            .build()
    }
}

impl Default for TimeBoundary {
    fn default() -> Self {
        Self::LENIENT
    }
}

impl fmt::Display for TimeBoundary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ping={}ms pong_timeout={}ms reconnect=[{},{}]ms ping_timeout={}ms inactivity={}ms",
            self.ping_interval_ms,
            self.pong_timeout_ms,
            self.reconnect_delay.lower_ms,
            self.reconnect_delay.upper_ms,
            self.ping_timeout_ms,
            self.session_inactivity_maximum_ms
        )
    }
}

// ============================================================================
// Staged builder
// ============================================================================

#[derive(Debug, Default, Clone, Copy)]
struct Partial {
    ping_interval_ms: u64,
    pong_timeout_ms: u64,
    reconnect_lower_ms: u64,
    reconnect_upper_ms: u64,
    ping_timeout_ms: u64,
    session_inactivity_maximum_ms: u64,
}

/// First builder step: ping interval.
#[must_use]
#[derive(Debug)]
pub struct PingIntervalStep(Partial);

/// Second builder step: pong timeout on the Downend.
#[must_use]
#[derive(Debug)]
pub struct PongTimeoutStep(Partial);

/// Third builder step: reconnect delay range.
#[must_use]
#[derive(Debug)]
pub struct ReconnectDelayStep(Partial);

/// Fourth builder step: ping timeout on the Upend.
#[must_use]
#[derive(Debug)]
pub struct PingTimeoutStep(Partial);

/// Fifth builder step: maximum session inactivity.
#[must_use]
#[derive(Debug)]
pub struct SessionInactivityStep(Partial);

/// Final builder step.
#[must_use]
#[derive(Debug)]
pub struct BuildStep(Partial);

impl PingIntervalStep {
    /// Milliseconds between pings; must be positive.
    pub fn ping_interval(mut self, ms: u64) -> PongTimeoutStep {
        self.0.ping_interval_ms = ms;
        PongTimeoutStep(self.0)
    }

    /// Never ping.
    pub fn ping_interval_never(self) -> PongTimeoutStep {
        self.ping_interval(NEVER_MS)
    }
}

impl PongTimeoutStep {
    /// Milliseconds to wait for a pong.
    pub fn pong_timeout(mut self, ms: u64) -> ReconnectDelayStep {
        self.0.pong_timeout_ms = ms;
        ReconnectDelayStep(self.0)
    }

    /// Wait for a pong forever.
    pub fn pong_timeout_never(self) -> ReconnectDelayStep {
        self.pong_timeout(NEVER_MS)
    }
}

impl ReconnectDelayStep {
    /// Reconnect after a delay drawn in `[lower_ms, upper_ms]`.
    pub fn reconnect_delay(mut self, lower_ms: u64, upper_ms: u64) -> PingTimeoutStep {
        self.0.reconnect_lower_ms = lower_ms;
        self.0.reconnect_upper_ms = upper_ms;
        PingTimeoutStep(self.0)
    }

    /// Reconnect with no delay.
    pub fn reconnect_immediately(self) -> PingTimeoutStep {
        self.reconnect_delay(0, 0)
    }

    /// Reconnect after `[delay_ms, 2 * delay_ms]`.
    pub fn reconnect_delay_up_to_double(self, delay_ms: u64) -> PingTimeoutStep {
        self.reconnect_delay(delay_ms, delay_ms.saturating_mul(2))
    }

    /// Practically never reconnect.
    pub fn reconnect_never(self) -> PingTimeoutStep {
        self.reconnect_delay(NEVER_MS - 1, NEVER_MS)
    }
}

impl PingTimeoutStep {
    /// Milliseconds the Upend tolerates without a ping.
    pub fn ping_timeout(mut self, ms: u64) -> SessionInactivityStep {
        self.0.ping_timeout_ms = ms;
        SessionInactivityStep(self.0)
    }

    /// The Upend never times out a silent channel.
    pub fn ping_timeout_never(self) -> SessionInactivityStep {
        self.ping_timeout(NEVER_MS)
    }
}

impl SessionInactivityStep {
    /// Milliseconds a disconnected session stays reusable.
    pub fn session_inactivity_maximum(mut self, ms: u64) -> BuildStep {
        self.0.session_inactivity_maximum_ms = ms;
        BuildStep(self.0)
    }

    /// Sessions expire as soon as their channel goes.
    pub fn session_inactivity_immediate(self) -> BuildStep {
        self.session_inactivity_maximum(0)
    }

    /// Sessions stay reusable practically forever.
    pub fn session_inactivity_forever(self) -> BuildStep {
        self.session_inactivity_maximum(NEVER_MS)
    }
}

impl BuildStep {
    /// Validate and produce the boundary.
    pub fn build(self) -> Result<TimeBoundary> {
        let p = self.0;
        if p.ping_interval_ms == 0 {
            return Err(ProtocolError::InvalidTimeBoundary(
                "ping interval must be positive".to_string(),
            ));
        }
        for (key, value) in [
            (Key::PingIntervalMs, p.ping_interval_ms),
            (Key::PongTimeoutMs, p.pong_timeout_ms),
            (Key::ReconnectDelayRangeMsLowerBound, p.reconnect_lower_ms),
            (Key::ReconnectDelayRangeMsUpperBound, p.reconnect_upper_ms),
            (Key::PingTimeoutMs, p.ping_timeout_ms),
            (Key::SessionInactivityMaximumMs, p.session_inactivity_maximum_ms),
        ] {
            if value > NEVER_MS {
                return Err(ProtocolError::InvalidTimeBoundary(format!(
                    "{} is {}, above the {} ms ceiling",
                    key, value, NEVER_MS
                )));
            }
        }
        Ok(TimeBoundary {
            ping_interval_ms: p.ping_interval_ms,
            pong_timeout_ms: p.pong_timeout_ms,
            reconnect_delay: DelayRange::new(p.reconnect_lower_ms, p.reconnect_upper_ms)?,
            ping_timeout_ms: p.ping_timeout_ms,
            session_inactivity_maximum_ms: p.session_inactivity_maximum_ms,
        })
    }
}

// ============================================================================
// Serde representation (flat, defaults from LENIENT)
// ============================================================================

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawTimeBoundary {
    #[serde(default = "raw_defaults::ping_interval_ms")]
    ping_interval_ms: u64,
    #[serde(default = "raw_defaults::pong_timeout_ms")]
    pong_timeout_ms: u64,
    #[serde(default = "raw_defaults::reconnect_delay_lower_ms")]
    reconnect_delay_lower_ms: u64,
    #[serde(default = "raw_defaults::reconnect_delay_upper_ms")]
    reconnect_delay_upper_ms: u64,
    #[serde(default = "raw_defaults::ping_timeout_ms")]
    ping_timeout_ms: u64,
    #[serde(default = "raw_defaults::session_inactivity_maximum_ms")]
    session_inactivity_maximum_ms: u64,
}

mod raw_defaults {
    use super::TimeBoundary;

    const L: TimeBoundary = TimeBoundary::LENIENT;

    pub fn ping_interval_ms() -> u64 {
        L.ping_interval_ms
    }
    pub fn pong_timeout_ms() -> u64 {
        L.pong_timeout_ms
    }
    pub fn reconnect_delay_lower_ms() -> u64 {
        L.reconnect_delay.lower_ms
    }
    pub fn reconnect_delay_upper_ms() -> u64 {
        L.reconnect_delay.upper_ms
    }
    pub fn ping_timeout_ms() -> u64 {
        L.ping_timeout_ms
    }
    pub fn session_inactivity_maximum_ms() -> u64 {
        L.session_inactivity_maximum_ms
    }
}

impl TryFrom<RawTimeBoundary> for TimeBoundary {
    type Error = ProtocolError;

    fn try_from(raw: RawTimeBoundary) -> Result<Self> {
        TimeBoundary::builder()
            .ping_interval(raw.ping_interval_ms)
            .pong_timeout(raw.pong_timeout_ms)
            .reconnect_delay(raw.reconnect_delay_lower_ms, raw.reconnect_delay_upper_ms)
            .ping_timeout(raw.ping_timeout_ms)
            .session_inactivity_maximum(raw.session_inactivity_maximum_ms)
            .build()
    }
}

impl From<TimeBoundary> for RawTimeBoundary {
    fn from(tb: TimeBoundary) -> Self {
        Self {
            ping_interval_ms: tb.ping_interval_ms,
            pong_timeout_ms: tb.pong_timeout_ms,
            reconnect_delay_lower_ms: tb.reconnect_delay.lower_ms,
            reconnect_delay_upper_ms: tb.reconnect_delay.upper_ms,
            ping_timeout_ms: tb.ping_timeout_ms,
            session_inactivity_maximum_ms: tb.session_inactivity_maximum_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lenient_via_builder() -> TimeBoundary {
        TimeBoundary::builder()
            .ping_interval(1_000)
            .pong_timeout(2_500)
            .reconnect_delay(1_000, 3_000)
            .ping_timeout(2_500)
            .session_inactivity_maximum(10_000)
            .build()
            .unwrap()
    }

    #[test]
    fn test_builder_matches_lenient_preset() {
        assert_eq!(lenient_via_builder(), TimeBoundary::LENIENT);
        assert_eq!(TimeBoundary::default(), TimeBoundary::LENIENT);
    }

    #[test]
    fn test_zero_ping_interval_rejected() {
        let result = TimeBoundary::builder()
            .ping_interval(0)
            .pong_timeout(0)
            .reconnect_immediately()
            .ping_timeout(0)
            .session_inactivity_immediate()
            .build();
        assert!(matches!(result, Err(ProtocolError::InvalidTimeBoundary(_))));
    }

    #[test]
    fn test_inverted_reconnect_range_rejected() {
        let result = TimeBoundary::builder()
            .ping_interval(10)
            .pong_timeout(10)
            .reconnect_delay(3_000, 1_000)
            .ping_timeout(10)
            .session_inactivity_maximum(10)
            .build();
        assert!(matches!(result, Err(ProtocolError::InvalidTimeBoundary(_))));
    }

    #[test]
    fn test_value_above_never_rejected() {
        let result = TimeBoundary::builder()
            .ping_interval(10)
            .pong_timeout(u64::MAX)
            .reconnect_immediately()
            .ping_timeout(10)
            .session_inactivity_maximum(10)
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_shortcuts() {
        let tb = TimeBoundary::builder()
            .ping_interval_never()
            .pong_timeout_never()
            .reconnect_delay_up_to_double(500)
            .ping_timeout_never()
            .session_inactivity_forever()
            .build()
            .unwrap();
        assert_eq!(tb.ping_interval(), Duration::from_millis(NEVER_MS));
        assert_eq!(tb.reconnect_delay_range(), DelayRange::new(500, 1_000).unwrap());
        assert_eq!(tb.session_inactivity_maximum(), Duration::from_millis(NEVER_MS));
    }

    #[test]
    fn test_connect_timeout_falls_back_when_lower_bound_is_zero() {
        assert_eq!(TimeBoundary::LENIENT.connect_timeout(), Duration::from_millis(1_000));
        let immediate = TimeBoundary::builder()
            .ping_interval(100)
            .pong_timeout(100)
            .reconnect_immediately()
            .ping_timeout(100)
            .session_inactivity_maximum(100)
            .build()
            .unwrap();
        assert_eq!(
            immediate.connect_timeout(),
            Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS)
        );
    }

    #[test]
    fn test_as_map_then_parse() {
        let tb = TimeBoundary::builder()
            .ping_interval(11)
            .pong_timeout(12)
            .reconnect_delay(13, 14)
            .ping_timeout(15)
            .session_inactivity_maximum(16)
            .build()
            .unwrap();
        let map = tb.as_map();
        assert_eq!(map.len(), 6);
        assert_eq!(map[&Key::ReconnectDelayRangeMsUpperBound], 14);
        let parsed = TimeBoundary::parse(|key| Ok(map[&key])).unwrap();
        assert_eq!(parsed, tb);
    }

    #[test]
    fn test_parse_propagates_resolver_error() {
        let result = TimeBoundary::parse(|key| match key {
            Key::PingTimeoutMs => Err(ProtocolError::MissingHeader("x-tether-ping-timeout-ms")),
            _ => Ok(100),
        });
        assert!(matches!(result, Err(ProtocolError::MissingHeader(_))));
    }

    #[test]
    fn test_serde_defaults_fill_missing_fields() {
        let tb: TimeBoundary = serde_json::from_str(r#"{"ping_interval_ms": 500}"#).unwrap();
        assert_eq!(tb.ping_interval(), Duration::from_millis(500));
        assert_eq!(tb.pong_timeout(), TimeBoundary::LENIENT.pong_timeout());
    }

    #[test]
    fn test_serde_rejects_invalid_values() {
        let result: std::result::Result<TimeBoundary, _> = serde_json::from_str(
            r#"{"reconnect_delay_lower_ms": 5000, "reconnect_delay_upper_ms": 10}"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(
            TimeBoundary::LENIENT.to_string(),
            "ping=1000ms pong_timeout=2500ms reconnect=[1000,3000]ms ping_timeout=2500ms inactivity=10000ms"
        );
    }
}
