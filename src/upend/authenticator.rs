//! Credential checks consulted by the session registry.
//!
//! Both traits are async so a backend may do I/O. The registry never calls
//! them while holding a lock.

use async_trait::async_trait;
use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use std::collections::HashMap;
use subtle::ConstantTimeEq;
use tether_proto::{Secret, SecondaryCode, SecondaryToken, SignonFailure};

/// Result of checking primary credentials.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PrimaryVerdict {
    Accepted,
    /// Credentials are fine but a secondary code is required.
    NeedsSecondary,
    Denied(SignonFailure),
}

#[async_trait]
pub trait PrimaryAuthenticator: Send + Sync {
    async fn authenticate(&self, login: &str, secret: &Secret) -> PrimaryVerdict;
}

#[async_trait]
pub trait SecondaryAuthenticator: Send + Sync {
    /// `token` is the challenge issued for this attempt.
    async fn verify(&self, login: &str, token: &SecondaryToken, code: &SecondaryCode) -> bool;
}

/// Verify a password against a stored Argon2 hash.
pub fn verify_password(
    password: &str,
    hash: &PasswordHash<'_>,
) -> Result<bool, argon2::password_hash::Error> {
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), hash)
        .is_ok())
}

/// Hash a password using default Argon2 settings.
pub fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();

    Ok(argon2
        .hash_password(password.as_bytes(), &salt)?
        .to_string())
}

fn codes_match(expected: &str, given: &str) -> bool {
    expected.as_bytes().ct_eq(given.as_bytes()).into()
}

#[derive(Clone, Debug)]
struct Account {
    password_hash: String,
    secondary_code: Option<String>,
}

/// Accounts with Argon2 password hashes and optional fixed secondary codes.
#[derive(Clone, Debug, Default)]
pub struct AccountTable {
    accounts: HashMap<String, Account>,
}

impl AccountTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace an account. `password_hash` is a PHC string.
    pub fn insert(
        &mut self,
        login: impl Into<String>,
        password_hash: impl Into<String>,
        secondary_code: Option<String>,
    ) {
        self.accounts.insert(
            login.into(),
            Account {
                password_hash: password_hash.into(),
                secondary_code,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }
}

#[async_trait]
impl PrimaryAuthenticator for AccountTable {
    async fn authenticate(&self, login: &str, secret: &Secret) -> PrimaryVerdict {
        let Some(account) = self.accounts.get(login) else {
            return PrimaryVerdict::Denied(SignonFailure::UnknownLogin);
        };

        let hash = account.password_hash.clone();
        let password = secret.expose().to_string();
        // Argon2 is deliberately slow; keep it off the IO threads.
        let verified = tokio::task::spawn_blocking(move || {
            let parsed = PasswordHash::new(&hash)?;
            verify_password(&password, &parsed)
        })
        .await;

        match verified {
            Ok(Ok(true)) if account.secondary_code.is_some() => PrimaryVerdict::NeedsSecondary,
            Ok(Ok(true)) => PrimaryVerdict::Accepted,
            Ok(Ok(false)) => PrimaryVerdict::Denied(SignonFailure::InvalidCredential),
            Ok(Err(e)) => {
                tracing::error!(login = %login, error = %e, "Stored password hash is invalid");
                PrimaryVerdict::Denied(SignonFailure::InvalidCredential)
            }
            Err(e) => {
                tracing::error!(error = %e, "Password verification task failed");
                PrimaryVerdict::Denied(SignonFailure::InvalidCredential)
            }
        }
    }
}

#[async_trait]
impl SecondaryAuthenticator for AccountTable {
    async fn verify(&self, login: &str, _token: &SecondaryToken, code: &SecondaryCode) -> bool {
        self.accounts
            .get(login)
            .and_then(|a| a.secondary_code.as_deref())
            .is_some_and(|expected| codes_match(expected, code.expose()))
    }
}

/// Fixed secondary code per login.
#[derive(Clone, Debug, Default)]
pub struct StaticSecondaryCodes {
    codes: HashMap<String, String>,
}

impl StaticSecondaryCodes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, login: impl Into<String>, code: impl Into<String>) -> Self {
        self.codes.insert(login.into(), code.into());
        self
    }
}

#[async_trait]
impl SecondaryAuthenticator for StaticSecondaryCodes {
    async fn verify(&self, login: &str, _token: &SecondaryToken, code: &SecondaryCode) -> bool {
        self.codes
            .get(login)
            .is_some_and(|expected| codes_match(expected, code.expose()))
    }
}
