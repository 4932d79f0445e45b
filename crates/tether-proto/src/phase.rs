//! Session lifecycle messages.
//!
//! Lifecycle traffic shares the WebSocket with application traffic. A
//! lifecycle message is a text frame starting with [`PHASE_MAGIC`] followed
//! by a JSON body; anything else is left alone for the application.

use crate::error::Result;
use crate::session::{Secret, SecondaryCode, SecondaryToken, SessionIdentifier, SignonFailure};
use serde::{Deserialize, Serialize};

/// Prefix marking a text frame as lifecycle traffic.
pub const PHASE_MAGIC: &str = "Phase ";

/// Which end sends a given phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    /// Downend to Upend.
    Upward,
    /// Upend to Downend.
    Downward,
}

/// A session lifecycle message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum Phase {
    /// Primary credentials.
    SignonAttempt {
        /// User login.
        login: String,
        /// Password or equivalent.
        secret: Secret,
    },
    /// The Upend wants a secondary code for this token.
    SecondarySignonNeeded {
        /// Challenge to echo back.
        token: SecondaryToken,
    },
    /// Answer to a secondary challenge.
    SecondarySignonAttempt {
        /// Challenge received earlier.
        token: SecondaryToken,
        /// Secondary code.
        code: SecondaryCode,
    },
    /// Reattach a new channel to an existing session.
    ResumeSession {
        /// Session to resume.
        session: SessionIdentifier,
    },
    /// Signon or resumption succeeded.
    SessionValid {
        /// The session now bound to this channel.
        session: SessionIdentifier,
    },
    /// Signon or resumption failed.
    SignonFailureNotice {
        /// Reason.
        failure: SignonFailure,
    },
    /// Graceful end of the session.
    Signoff,
}

impl Phase {
    /// Which end is allowed to send this phase.
    pub fn direction(&self) -> Direction {
        match self {
            Phase::SignonAttempt { .. }
            | Phase::SecondarySignonAttempt { .. }
            | Phase::ResumeSession { .. }
            | Phase::Signoff => Direction::Upward,
            Phase::SecondarySignonNeeded { .. }
            | Phase::SessionValid { .. }
            | Phase::SignonFailureNotice { .. } => Direction::Downward,
        }
    }

    /// Short name for logs and metrics.
    pub fn name(&self) -> &'static str {
        match self {
            Phase::SignonAttempt { .. } => "signon_attempt",
            Phase::SecondarySignonNeeded { .. } => "secondary_signon_needed",
            Phase::SecondarySignonAttempt { .. } => "secondary_signon_attempt",
            Phase::ResumeSession { .. } => "resume_session",
            Phase::SessionValid { .. } => "session_valid",
            Phase::SignonFailureNotice { .. } => "signon_failure_notice",
            Phase::Signoff => "signoff",
        }
    }

    /// Encode as the payload of a text frame.
    pub fn encode(&self) -> Result<String> {
        let body = serde_json::to_string(self)?;
        Ok(format!("{}{}", PHASE_MAGIC, body))
    }

    /// Decode a text frame.
    ///
    /// Returns `None` when the frame is not lifecycle traffic.
    pub fn decode_text(text: &str) -> Option<Result<Phase>> {
        let body = text.strip_prefix(PHASE_MAGIC)?;
        Some(serde_json::from_str(body).map_err(Into::into))
    }
}

/// True when `text` carries the lifecycle prefix.
pub fn is_phase_frame(text: &str) -> bool {
    text.starts_with(PHASE_MAGIC)
}
