//! Server-side handle to one physical channel.
//!
//! A handle is cheap to clone. The connection task owns the receiving end of
//! the outbound queue; once that task ends the handle reports itself closed.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use tether_proto::Phase;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Process-unique channel identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(u64);

impl ChannelId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ch{}", self.0)
    }
}

/// Frames queued for delivery on a channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outbound {
    Phase(Phase),
    Application(String),
}

#[derive(Clone, Debug)]
pub struct ChannelHandle {
    id: ChannelId,
    remote: SocketAddr,
    outbound: mpsc::Sender<Outbound>,
    kicked: CancellationToken,
}

impl ChannelHandle {
    pub fn new(remote: SocketAddr, capacity: usize) -> (Self, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handle = Self {
            id: ChannelId::next(),
            remote,
            outbound: tx,
            kicked: CancellationToken::new(),
        };
        (handle, rx)
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    pub fn remote(&self) -> SocketAddr {
        self.remote
    }

    /// Queue a frame without waiting. False when the queue is full or gone.
    pub fn try_send(&self, message: Outbound) -> bool {
        self.outbound.try_send(message).is_ok()
    }

    /// Force the channel to disconnect.
    pub fn kick(&self) {
        self.kicked.cancel();
    }

    /// Token cancelled by [`kick`](Self::kick).
    pub fn kicked(&self) -> CancellationToken {
        self.kicked.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.kicked.is_cancelled() || self.outbound.is_closed()
    }
}
