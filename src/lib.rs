//! tether - reconnect-durable WebSocket sessions.
//!
//! A Downend (client) keeps one logical session alive across dropped
//! transports. An Upend (server) owns those sessions, enforces signon on
//! every channel and lets a Downend resume its session after a reconnect.
//!
//! Protocol values (timing policy, descriptor, lifecycle messages) live in
//! the `tether-proto` crate and are re-exported here.

pub mod config;
pub mod downend;
pub mod error;
pub mod http;
pub mod metrics;
pub mod telemetry;
pub mod upend;

pub use error::{ConnectorError, RegistryError, SnapshotError};
pub use tether_proto::{
    ConnectionDescriptor, Phase, SecondaryCode, SecondaryToken, SessionIdentifier, SignonFailure,
    TimeBoundary,
};
