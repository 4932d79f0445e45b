//! Error types for the tether protocol library.

use thiserror::Error;

/// Convenience type alias for Results using [`ProtocolError`].
pub type Result<T, E = ProtocolError> = std::result::Result<T, E>;

/// Protocol-level errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProtocolError {
    /// A timing policy value is out of range.
    #[error("invalid time boundary: {0}")]
    InvalidTimeBoundary(String),

    /// A descriptor header is absent from the upgrade response.
    #[error("missing header: {0}")]
    MissingHeader(&'static str),

    /// A descriptor header is present but cannot be parsed.
    #[error("invalid header {name}: {value:?}")]
    InvalidHeader {
        /// Header name.
        name: &'static str,
        /// Raw value, lossily decoded.
        value: String,
    },

    /// A value cannot be represented as an HTTP header.
    #[error("value not representable as header {name}: {value:?}")]
    UnrepresentableHeader {
        /// Header name.
        name: &'static str,
        /// Offending value.
        value: String,
    },

    /// A frame carried the phase prefix but its body did not decode.
    #[error("malformed lifecycle phase: {0}")]
    MalformedPhase(#[from] serde_json::Error),

    /// An opaque token contains characters outside its alphabet.
    #[error("invalid identifier: {0:?}")]
    InvalidIdentifier(String),
}
