//! Credential supply for Downend signon.

use async_trait::async_trait;
use std::fmt;
use tether_proto::{Secret, SecondaryCode, SecondaryToken, SignonFailure};
use zeroize::Zeroize;

/// Primary signon credentials.
#[derive(Clone)]
pub struct Credentials {
    pub login: String,
    pub secret: Secret,
}

impl Credentials {
    pub fn new(login: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            login: login.into(),
            secret: Secret::new(secret),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("login", &self.login)
            .finish_non_exhaustive()
    }
}

/// Supplies credentials to the connector when the Upend asks for them.
///
/// Every method may take as long as it needs; the connector keeps running
/// heartbeats meanwhile. Returning `None` gives up on signon for the current
/// channel, leaving the connector CONNECTED without a login.
#[async_trait]
pub trait SignonMaterializer: Send + Sync {
    async fn credentials(&self) -> Option<Credentials>;

    async fn secondary_code(&self, token: &SecondaryToken) -> Option<SecondaryCode>;

    /// A signon attempt was refused. Return credentials to retry with.
    async fn signon_failed(&self, failure: SignonFailure) -> Option<Credentials> {
        tracing::warn!(reason = %failure, "Signon refused");
        None
    }
}

/// Fixed credentials, with an optional fixed secondary code.
///
/// Never retries after a refusal.
pub struct StaticCredentials {
    credentials: Credentials,
    secondary: Option<String>,
}

impl StaticCredentials {
    pub fn new(login: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            credentials: Credentials::new(login, secret),
            secondary: None,
        }
    }

    pub fn with_secondary_code(mut self, code: impl Into<String>) -> Self {
        self.secondary = Some(code.into());
        self
    }
}

impl Drop for StaticCredentials {
    fn drop(&mut self) {
        if let Some(code) = self.secondary.as_mut() {
            code.zeroize();
        }
    }
}

#[async_trait]
impl SignonMaterializer for StaticCredentials {
    async fn credentials(&self) -> Option<Credentials> {
        Some(self.credentials.clone())
    }

    async fn secondary_code(&self, _token: &SecondaryToken) -> Option<SecondaryCode> {
        self.secondary.as_ref().map(|code| Secret::new(code.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_credentials() {
        let m = StaticCredentials::new("alice", "wonderland");
        let creds = m.credentials().await.unwrap();
        assert_eq!(creds.login, "alice");
        assert_eq!(creds.secret.expose(), "wonderland");
        assert!(m.secondary_code(&SecondaryToken::generate()).await.is_none());
        assert!(m.signon_failed(SignonFailure::InvalidCredential).await.is_none());
    }

    #[tokio::test]
    async fn test_static_secondary_code() {
        let m = StaticCredentials::new("bob", "pw").with_secondary_code("123456");
        let code = m.secondary_code(&SecondaryToken::generate()).await.unwrap();
        assert_eq!(code.expose(), "123456");
    }

    #[test]
    fn test_credentials_debug_hides_secret() {
        let creds = Credentials::new("alice", "wonderland");
        let printed = format!("{:?}", creds);
        assert!(printed.contains("alice"));
        assert!(!printed.contains("wonderland"));
    }
}
