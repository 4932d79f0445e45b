//! WebSocket upgrade handshake helpers.
//!
//! The Upend validates the `Origin` of each upgrade request and stamps the
//! [`ConnectionDescriptor`] onto the 101 response. Both steps plug into
//! `tokio_tungstenite::accept_hdr_async`:
//!
//! ```rust,ignore
//! let callback = |req: &Request, response: Response| {
//!     let result = validate_handshake(req, &policy);
//!     build_handshake_response(&result, &descriptor, response)
//! };
//! let ws = tokio_tungstenite::accept_hdr_async(stream, callback).await?;
//! ```

use crate::descriptor::ConnectionDescriptor;
use http::StatusCode;
use std::fmt;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};

/// Which browser origins may open a channel.
#[derive(Clone, Debug, Default)]
pub struct OriginPolicy {
    /// Allowed `Origin` values. Empty allows any; `"*"` matches any.
    pub allowed_origins: Vec<String>,
    /// Reject requests without an `Origin` header.
    pub require_origin: bool,
}

/// Outcome of validating an upgrade request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HandshakeResult {
    /// Proceed with the upgrade.
    Accept {
        /// Origin the request came from, if announced.
        origin: Option<String>,
    },
    /// Refuse the upgrade.
    Reject {
        /// HTTP status to answer with.
        status: u16,
        /// Human-readable rejection reason.
        reason: String,
    },
}

impl fmt::Display for HandshakeResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandshakeResult::Accept { origin } => {
                write!(f, "Accept")?;
                if let Some(orig) = origin {
                    write!(f, " (origin: {})", orig)?;
                }
                Ok(())
            }
            HandshakeResult::Reject { status, reason } => {
                write!(f, "Reject {} - {}", status, reason)
            }
        }
    }
}

/// Validate an upgrade request against the origin policy.
pub fn validate_handshake(req: &Request, policy: &OriginPolicy) -> HandshakeResult {
    let origin = req
        .headers()
        .get("Origin")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());

    if policy.require_origin && origin.is_none() {
        return HandshakeResult::Reject {
            status: 403,
            reason: "Origin header required".to_string(),
        };
    }

    if !policy.allowed_origins.is_empty() {
        if let Some(ref origin_value) = origin {
            if !policy
                .allowed_origins
                .iter()
                .any(|allowed| allowed == origin_value || allowed == "*")
            {
                return HandshakeResult::Reject {
                    status: 403,
                    reason: format!("Origin '{}' not allowed", origin_value),
                };
            }
        }
    }

    HandshakeResult::Accept { origin }
}

/// Turn a validation result into the handshake response.
///
/// Accepted upgrades carry the descriptor headers.
#[allow(clippy::result_large_err)]
pub fn build_handshake_response(
    result: &HandshakeResult,
    descriptor: &ConnectionDescriptor,
    mut response: Response,
) -> Result<Response, ErrorResponse> {
    match result {
        HandshakeResult::Accept { .. } => {
            if let Err(e) = descriptor.write_headers(response.headers_mut()) {
                tracing::error!(error = %e, "Cannot encode connection descriptor");
                return Err(error_response(500, "connection descriptor unavailable"));
            }
            Ok(response)
        }
        HandshakeResult::Reject { status, reason } => Err(error_response(*status, reason)),
    }
}

fn error_response(status: u16, reason: &str) -> ErrorResponse {
    let mut response = ErrorResponse::new(Some(reason.to_string()));
    *response.status_mut() = StatusCode::from_u16(status).unwrap_or(StatusCode::FORBIDDEN);
    response
}
