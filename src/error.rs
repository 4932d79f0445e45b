//! Unified error handling for tether.
//!
//! Errors are grouped by the component raising them. Programming errors in
//! the Downend state machine ([`SnapshotError`]) are kept apart from the
//! declared failures of the session registry ([`RegistryError`]) and from
//! runtime conditions of the connector ([`ConnectorError`]).

use crate::downend::state::State;
use tether_proto::SignonFailure;
use thiserror::Error;

// ============================================================================
// Snapshot Errors (state machine bugs, never retried)
// ============================================================================

/// A transition was requested from a state that does not allow it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot apply {attempted} while {current}")]
pub struct TransitionError {
    /// Name of the rejected transition.
    pub attempted: &'static str,
    /// State the snapshot was in.
    pub current: State,
}

/// A snapshot would break the nullity contract of its state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{state} snapshot invalid: {message}")]
pub struct InvariantViolation {
    /// State of the rejected snapshot.
    pub state: State,
    /// Which field is wrong.
    pub message: &'static str,
}

/// Any failure building a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SnapshotError {
    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error(transparent)]
    Invariant(#[from] InvariantViolation),
}

// ============================================================================
// Connector Errors (Downend public API)
// ============================================================================

/// Errors returned by the Downend connector.
#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error("state machine: {0}")]
    Snapshot(#[from] SnapshotError),

    #[error("not ready to send in state {0}")]
    NotReady(State),

    #[error("connector task has shut down")]
    Shutdown,

}

impl From<TransitionError> for ConnectorError {
    fn from(e: TransitionError) -> Self {
        Self::Snapshot(e.into())
    }
}

// ============================================================================
// Registry Errors (declared failures, reported to the caller)
// ============================================================================

/// Declared failures of the session registry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("unknown session")]
    UnknownSession,

    #[error("session expired")]
    SessionExpired,

    #[error("session is not reusable")]
    SessionNotReusable,

    #[error("outcome abandoned before resolution")]
    Abandoned,
}

impl RegistryError {
    /// Get a static error code string for metrics labeling.
    #[inline]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::UnknownSession => "unknown_session",
            Self::SessionExpired => "session_expired",
            Self::SessionNotReusable => "session_not_reusable",
            Self::Abandoned => "abandoned",
        }
    }

    /// Failure notice sent to the peer.
    pub fn as_failure(&self) -> SignonFailure {
        match self {
            Self::SessionNotReusable => SignonFailure::SessionBusy,
            Self::UnknownSession | Self::SessionExpired | Self::Abandoned => SignonFailure::UnknownSession,
        }
    }
}
