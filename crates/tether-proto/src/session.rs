//! Session tokens and signon failure reasons.

use crate::error::ProtocolError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! opaque_token {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Mint a fresh random token.
            pub fn generate() -> Self {
                Self(Uuid::new_v4().simple().to_string())
            }

            /// Borrow the textual form.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl FromStr for $name {
            type Err = ProtocolError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let valid = !s.is_empty()
                    && s.len() <= 64
                    && s.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
                if valid {
                    Ok(Self(s.to_string()))
                } else {
                    Err(ProtocolError::InvalidIdentifier(s.to_string()))
                }
            }
        }

        impl TryFrom<String> for $name {
            type Error = ProtocolError;

            fn try_from(s: String) -> Result<Self, Self::Error> {
                s.parse()
            }
        }

        impl From<$name> for String {
            fn from(token: $name) -> String {
                token.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }
    };
}

opaque_token!(
    /// Names a logical session. Minted by the Upend, stable across reconnections.
    SessionIdentifier
);

opaque_token!(
    /// Challenge handed out when a secondary factor is required.
    SecondaryToken
);

/// Text that must not end up in logs.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    /// Wrap a secret value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Borrow the underlying value.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// True when nothing was supplied.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

/// Code answering a [`SecondaryToken`] challenge (e.g. a one-time password).
pub type SecondaryCode = Secret;

/// Why a signon (or a session reuse) was refused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignonFailure {
    /// No such login.
    UnknownLogin,
    /// Login exists but the secret does not match.
    InvalidCredential,
    /// The login already owns an active session.
    SessionAlreadyExists,
    /// A secondary code was required but none was given.
    MissingSecondaryCode,
    /// The secondary code (or its token) did not match.
    IncorrectSecondaryCode,
    /// The session to resume is unknown or expired.
    UnknownSession,
    /// The session to resume is still bound to a channel the Upend considers live.
    SessionBusy,
}

impl SignonFailure {
    /// Static code for metrics labels and logs.
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnknownLogin => "unknown_login",
            Self::InvalidCredential => "invalid_credential",
            Self::SessionAlreadyExists => "session_already_exists",
            Self::MissingSecondaryCode => "missing_secondary_code",
            Self::IncorrectSecondaryCode => "incorrect_secondary_code",
            Self::UnknownSession => "unknown_session",
            Self::SessionBusy => "session_busy",
        }
    }
}

impl fmt::Display for SignonFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::UnknownLogin => "unknown login",
            Self::InvalidCredential => "invalid credential",
            Self::SessionAlreadyExists => "session already exists",
            Self::MissingSecondaryCode => "missing secondary code",
            Self::IncorrectSecondaryCode => "incorrect secondary code",
            Self::UnknownSession => "unknown session",
            Self::SessionBusy => "session busy",
        };
        f.write_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_identifiers_are_distinct_and_parseable() {
        let a = SessionIdentifier::generate();
        let b = SessionIdentifier::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().parse::<SessionIdentifier>().unwrap(), a);
    }

    #[test]
    fn test_identifier_rejects_bad_characters() {
        assert!("".parse::<SessionIdentifier>().is_err());
        assert!("has space".parse::<SecondaryToken>().is_err());
        assert!("ok-token_1".parse::<SecondaryToken>().is_ok());
    }

    #[test]
    fn test_identifier_serde_validates() {
        let id: SessionIdentifier = serde_json::from_str("\"abc123\"").unwrap();
        assert_eq!(id.as_str(), "abc123");
        assert!(serde_json::from_str::<SessionIdentifier>("\"a b\"").is_err());
    }

    #[test]
    fn test_secret_debug_is_redacted() {
        let secret = Secret::new("hunter2");
        assert_eq!(format!("{:?}", secret), "Secret(***)");
        assert_eq!(secret.expose(), "hunter2");
    }

    #[test]
    fn test_failure_wire_names() {
        let json = serde_json::to_string(&SignonFailure::SessionAlreadyExists).unwrap();
        assert_eq!(json, "\"SESSION_ALREADY_EXISTS\"");
        assert_eq!(SignonFailure::UnknownSession.code(), "unknown_session");
        let busy: SignonFailure = serde_json::from_str("\"SESSION_BUSY\"").unwrap();
        assert_eq!(busy, SignonFailure::SessionBusy);
    }
}
