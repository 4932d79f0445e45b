//! Downend: the client side of a tether.
//!
//! - [`state`]: immutable connection snapshots and their transitions
//! - [`heartbeat`]: ping, pong-timeout and reconnect timers
//! - [`signon`]: where credentials come from
//! - [`connector`]: the actor tying them to a WebSocket

pub mod connector;
pub mod heartbeat;
pub mod signon;
pub mod state;

pub use connector::{DownendConnector, DownendSetup, DownendSnapshot, Link, StartHandle, StopHandle};
pub use heartbeat::{HeartbeatAction, HeartbeatDriver, TimerHandle, TimerKind};
pub use signon::{Credentials, SignonMaterializer, StaticCredentials};
pub use state::{Completion, ConnectionSnapshot, SnapshotParts, State};
