//! Heartbeat and reconnect timers for one Downend connection.
//!
//! Each timer is a spawned sleep that posts a [`TimerFired`] message to the
//! connector's queue. Firing does not act by itself: the connector checks the
//! message against the timer id stored in the current snapshot, so a timer
//! that was superseded after it was enqueued turns into a no-op.

use crate::downend::state::ConnectionSnapshot;
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::time::Duration;
use tether_proto::TimeBoundary;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TimerKind {
    Reconnect,
    Ping,
    PongTimeout,
}

impl TimerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimerKind::Reconnect => "reconnect",
            TimerKind::Ping => "ping",
            TimerKind::PongTimeout => "pong_timeout",
        }
    }
}

/// Unique per driver; never reused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

/// A scheduled timer as stored in a snapshot.
#[derive(Clone, Debug)]
pub struct TimerHandle {
    id: TimerId,
    kind: TimerKind,
    deadline: Instant,
    cancel: CancellationToken,
}

impl TimerHandle {
    pub fn id(&self) -> TimerId {
        self.id
    }

    pub fn kind(&self) -> TimerKind {
        self.kind
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Stop the sleep task. A message already enqueued stays enqueued.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// A handle with no task behind it.
    #[cfg(test)]
    pub(crate) fn detached(kind: TimerKind) -> Self {
        Self {
            id: TimerId(u64::MAX),
            kind,
            deadline: Instant::now(),
            cancel: CancellationToken::new(),
        }
    }
}

/// Posted to the connector queue when a timer elapses.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimerFired {
    pub id: TimerId,
    pub kind: TimerKind,
}

/// What the connector should do about a fired timer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HeartbeatAction {
    SendPing,
    ChannelDead,
    Reconnect,
    /// Superseded since it was scheduled.
    Stale,
}

pub struct HeartbeatDriver {
    next_id: u64,
    fired: mpsc::UnboundedSender<TimerFired>,
    rng: StdRng,
}

impl HeartbeatDriver {
    pub fn new(fired: mpsc::UnboundedSender<TimerFired>) -> Self {
        Self {
            next_id: 0,
            fired,
            rng: StdRng::from_entropy(),
        }
    }

    /// Deterministic reconnect delays.
    pub fn with_seed(fired: mpsc::UnboundedSender<TimerFired>, seed: u64) -> Self {
        Self {
            next_id: 0,
            fired,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn schedule_ping(&mut self, tb: &TimeBoundary) -> TimerHandle {
        self.schedule(TimerKind::Ping, tb.ping_interval())
    }

    pub fn schedule_pong_timeout(&mut self, tb: &TimeBoundary) -> TimerHandle {
        self.schedule(TimerKind::PongTimeout, tb.pong_timeout())
    }

    /// Reconnect after a delay drawn uniformly from the reconnect range.
    pub fn schedule_reconnect(&mut self, tb: &TimeBoundary) -> TimerHandle {
        let delay = tb.reconnect_delay(&mut self.rng);
        tracing::debug!(delay_ms = delay.as_millis() as u64, "Reconnect scheduled");
        self.schedule(TimerKind::Reconnect, delay)
    }

    fn schedule(&mut self, kind: TimerKind, after: Duration) -> TimerHandle {
        let id = TimerId(self.next_id);
        self.next_id += 1;
        let deadline = Instant::now() + after;
        let cancel = CancellationToken::new();

        let token = cancel.clone();
        let fired = self.fired.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep_until(deadline) => {
                    // Receiver gone means the connector shut down.
                    let _ = fired.send(TimerFired { id, kind });
                }
            }
        });

        TimerHandle {
            id,
            kind,
            deadline,
            cancel,
        }
    }

    /// Decide whether a fired timer is still the one the snapshot holds.
    pub fn on_fired<C: Clone>(
        &self,
        snapshot: &ConnectionSnapshot<C>,
        fired: TimerFired,
    ) -> HeartbeatAction {
        let (slot, action) = match fired.kind {
            TimerKind::Ping => (snapshot.ping_timer(), HeartbeatAction::SendPing),
            TimerKind::PongTimeout => (snapshot.pong_timer(), HeartbeatAction::ChannelDead),
            TimerKind::Reconnect => (snapshot.reconnect_timer(), HeartbeatAction::Reconnect),
        };
        match slot {
            Some(current) if current.id == fired.id => action,
            _ => {
                tracing::debug!(timer = fired.kind.as_str(), id = fired.id.0, "Stale timer ignored");
                HeartbeatAction::Stale
            }
        }
    }

    /// Cancel every timer a snapshot holds.
    pub fn cancel_all<C: Clone>(snapshot: &ConnectionSnapshot<C>) {
        for timer in snapshot.timers() {
            timer.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downend::state::{Completion, ConnectionSnapshot};
    use tether_proto::ConnectionDescriptor;

    fn connected(driver: &mut HeartbeatDriver) -> ConnectionSnapshot<u8> {
        let tb = TimeBoundary::LENIENT;
        ConnectionSnapshot::initial()
            .start_connecting(Completion::new(), ConnectionDescriptor::new("t", false, tb))
            .unwrap()
            .channel_established(1)
            .unwrap()
            .connected(ConnectionDescriptor::new("t", false, tb), driver.schedule_ping(&tb))
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_ping_fires_after_interval() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut driver = HeartbeatDriver::with_seed(tx, 1);
        let snap = connected(&mut driver);

        tokio::time::sleep(Duration::from_millis(999)).await;
        assert!(rx.try_recv().is_err());
        tokio::time::sleep(Duration::from_millis(2)).await;

        let fired = rx.recv().await.unwrap();
        assert_eq!(fired.kind, TimerKind::Ping);
        assert_eq!(driver.on_fired(&snap, fired), HeartbeatAction::SendPing);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_timer_never_fires() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut driver = HeartbeatDriver::with_seed(tx, 1);
        let handle = driver.schedule_pong_timeout(&TimeBoundary::LENIENT);
        handle.cancel();

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_enqueued_pong_timeout_is_stale_after_pong() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut driver = HeartbeatDriver::with_seed(tx, 1);
        let tb = TimeBoundary::LENIENT;
        let snap = connected(&mut driver);
        HeartbeatDriver::cancel_all(&snap);

        let waiting = snap
            .pong_timeout_planned(driver.schedule_pong_timeout(&tb))
            .unwrap();
        tokio::time::sleep(tb.pong_timeout() + Duration::from_millis(1)).await;
        // The timeout is already queued when the pong arrives.
        let fired = rx.recv().await.unwrap();
        assert_eq!(fired.kind, TimerKind::PongTimeout);

        let after_pong = waiting.next_ping_planned(driver.schedule_ping(&tb)).unwrap();
        assert_eq!(driver.on_fired(&after_pong, fired), HeartbeatAction::Stale);
        assert_eq!(driver.on_fired(&waiting, fired), HeartbeatAction::ChannelDead);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_delay_within_range() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut driver = HeartbeatDriver::with_seed(tx, 42);
        let tb = TimeBoundary::LENIENT;
        for _ in 0..50 {
            let start = Instant::now();
            let handle = driver.schedule_reconnect(&tb);
            let delay = handle.deadline() - start;
            assert!(delay >= Duration::from_millis(1_000));
            assert!(delay <= Duration::from_millis(3_000));
            handle.cancel();
        }
    }

    #[test]
    fn test_timer_ids_are_unique() {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        rt.block_on(async {
            let (tx, _rx) = mpsc::unbounded_channel();
            let mut driver = HeartbeatDriver::new(tx);
            let a = driver.schedule_ping(&TimeBoundary::LENIENT);
            let b = driver.schedule_ping(&TimeBoundary::LENIENT);
            assert_ne!(a.id(), b.id());
        });
    }
}
