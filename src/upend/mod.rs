//! Upend: the server side of a tether.
//!
//! The [`registry::SessionRegistry`] owns every session. Each accepted
//! channel gets a [`gate::SignonGate`] that admits application traffic only
//! once the registry has bound a session to it.

pub mod application;
pub mod authenticator;
pub mod channel;
pub mod connection;
pub mod expiry;
pub mod gate;
pub mod gateway;
pub mod liveness;
pub mod rate_limit;
pub mod registrar;
pub mod registry;

pub use application::{Application, EchoApplication};
pub use authenticator::{
    AccountTable, PrimaryAuthenticator, PrimaryVerdict, SecondaryAuthenticator, StaticSecondaryCodes,
};
pub use channel::{ChannelHandle, ChannelId, Outbound};
pub use gate::{GateState, InboundVerdict, SignonGate};
pub use gateway::{Gateway, UpendContext};
pub use liveness::PingWatchdog;
pub use rate_limit::ConnectionRateLimiter;
pub use registrar::ChannelRegistrar;
pub use registry::{
    OutcomeResolver, PendingOutcome, RecordState, SessionRegistry, SessionSummary, SignonOutcome,
};
