//! # tether-proto
//!
//! Protocol values shared by the two ends of a tether connection.
//!
//! ## Contents
//!
//! - [`TimeBoundary`]: the heartbeat and reconnection timing policy
//! - [`ConnectionDescriptor`]: what the Upend announces in the upgrade response
//! - [`Phase`]: session lifecycle messages and their text-frame codec
//! - Session tokens: [`SessionIdentifier`], [`SecondaryToken`], [`SecondaryCode`]
//! - Optional Tokio/WebSocket glue for the upgrade handshake
//!
//! ## Quick Start
//!
//! ```rust
//! use tether_proto::{Phase, TimeBoundary};
//!
//! let boundary = TimeBoundary::builder()
//!     .ping_interval(1_000)
//!     .pong_timeout(2_500)
//!     .reconnect_delay(1_000, 3_000)
//!     .ping_timeout(2_500)
//!     .session_inactivity_maximum(10_000)
//!     .build()
//!     .expect("valid boundary");
//! assert_eq!(boundary, TimeBoundary::LENIENT);
//!
//! let frame = Phase::Signoff.encode().expect("encodable");
//! assert_eq!(Phase::decode_text(&frame).unwrap().unwrap(), Phase::Signoff);
//! assert!(Phase::decode_text("hello").is_none());
//! ```

#![deny(clippy::all)]
#![warn(missing_docs)]

pub mod descriptor;
pub mod error;
pub mod phase;
pub mod session;
pub mod time_boundary;
#[cfg(feature = "tokio")]
pub mod websocket;

pub use self::descriptor::ConnectionDescriptor;
pub use self::error::{ProtocolError, Result};
pub use self::phase::{Direction, Phase, PHASE_MAGIC};
pub use self::session::{Secret, SecondaryCode, SecondaryToken, SessionIdentifier, SignonFailure};
pub use self::time_boundary::{
    DelayRange, Key, TimeBoundary, DEFAULT_CONNECT_TIMEOUT_MS, NEVER_MS,
};
