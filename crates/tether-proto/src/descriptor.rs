//! Parameters the Upend announces when a channel is established.
//!
//! The descriptor travels as HTTP headers on the WebSocket upgrade response,
//! so the Downend knows the timing policy before the first frame.

use crate::error::{ProtocolError, Result};
use crate::time_boundary::{Key, TimeBoundary};
use http::header::{HeaderMap, HeaderName, HeaderValue};

/// Header carrying the Upend version string.
pub const UPEND_VERSION_HEADER: &str = "x-tether-upend-version";

/// Header carrying the authentication flag.
pub const AUTHENTICATION_REQUIRED_HEADER: &str = "x-tether-authentication-required";

/// Handshake-negotiated connection parameters.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionDescriptor {
    /// Free-form Upend version.
    pub upend_version: String,
    /// Whether application traffic requires a signed-in session.
    pub authentication_required: bool,
    /// Timing policy both ends follow.
    pub time_boundary: TimeBoundary,
}

impl ConnectionDescriptor {
    /// Bundle descriptor fields.
    pub fn new(
        upend_version: impl Into<String>,
        authentication_required: bool,
        time_boundary: TimeBoundary,
    ) -> Self {
        Self {
            upend_version: upend_version.into(),
            authentication_required,
            time_boundary,
        }
    }

    /// Write every descriptor header into `headers`, replacing existing values.
    pub fn write_headers(&self, headers: &mut HeaderMap) -> Result<()> {
        let version = HeaderValue::from_str(&self.upend_version).map_err(|_| {
            ProtocolError::UnrepresentableHeader {
                name: UPEND_VERSION_HEADER,
                value: self.upend_version.clone(),
            }
        })?;
        headers.insert(HeaderName::from_static(UPEND_VERSION_HEADER), version);
        headers.insert(
            HeaderName::from_static(AUTHENTICATION_REQUIRED_HEADER),
            HeaderValue::from_static(if self.authentication_required {
                "true"
            } else {
                "false"
            }),
        );
        for (key, value) in self.time_boundary.as_map() {
            headers.insert(HeaderName::from_static(key.header_name()), HeaderValue::from(value));
        }
        Ok(())
    }

    /// Headers as a fresh map.
    pub fn to_headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        self.write_headers(&mut headers)?;
        Ok(headers)
    }

    /// Parse a descriptor out of upgrade response headers.
    pub fn from_headers(headers: &HeaderMap) -> Result<Self> {
        let upend_version = header_str(headers, UPEND_VERSION_HEADER)?.to_string();
        let authentication_required = match header_str(headers, AUTHENTICATION_REQUIRED_HEADER)? {
            "true" => true,
            "false" => false,
            other => {
                return Err(ProtocolError::InvalidHeader {
                    name: AUTHENTICATION_REQUIRED_HEADER,
                    value: other.to_string(),
                })
            }
        };
        let time_boundary = TimeBoundary::parse(|key: Key| {
            let name = key.header_name();
            let raw = header_str(headers, name)?;
            raw.parse::<u64>().map_err(|_| ProtocolError::InvalidHeader {
                name,
                value: raw.to_string(),
            })
        })?;
        Ok(Self {
            upend_version,
            authentication_required,
            time_boundary,
        })
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &'static str) -> Result<&'a str> {
    let value = headers
        .get(name)
        .ok_or(ProtocolError::MissingHeader(name))?;
    value.to_str().map_err(|_| ProtocolError::InvalidHeader {
        name,
        value: String::from_utf8_lossy(value.as_bytes()).into_owned(),
    })
}
