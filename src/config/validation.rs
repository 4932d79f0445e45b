//! Configuration validation.
//!
//! Validates configuration at startup to catch common errors early.

use super::Config;
use argon2::PasswordHash;
use std::collections::HashSet;
use thiserror::Error;

/// Validation errors for configuration.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("server.name is required")]
    MissingServerName,
    #[error("server.upend_version must be a non-empty visible ASCII string, got '{0}'")]
    InvalidUpendVersion(String),
    #[error("server.authentication_required is set but no [[account]] is defined")]
    NoAccounts,
    #[error("account login must not be empty")]
    EmptyLogin,
    #[error("account '{0}' is defined more than once")]
    DuplicateAccount(String),
    #[error("account '{0}' has a password_hash that is not a PHC string")]
    InvalidPasswordHash(String),
    #[error("account '{0}' has an empty secondary_code")]
    EmptySecondaryCode(String),
    #[error("listen.connection_burst must be at least 1")]
    ZeroConnectionBurst,
    #[error("sweeper.interval_ms must be at least 1")]
    ZeroSweepInterval,
}

/// Validate a configuration, returning all errors found.
pub fn validate(config: &Config) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.server.name.is_empty() {
        errors.push(ValidationError::MissingServerName);
    }

    // Travels as an HTTP header value.
    let version = &config.server.upend_version;
    if version.is_empty() || !version.bytes().all(|b| b.is_ascii_graphic() || b == b' ') {
        errors.push(ValidationError::InvalidUpendVersion(version.clone()));
    }

    if config.server.authentication_required && config.accounts.is_empty() {
        errors.push(ValidationError::NoAccounts);
    }

    let mut seen = HashSet::new();
    for account in &config.accounts {
        if account.login.is_empty() {
            errors.push(ValidationError::EmptyLogin);
            continue;
        }
        if !seen.insert(account.login.as_str()) {
            errors.push(ValidationError::DuplicateAccount(account.login.clone()));
        }
        if PasswordHash::new(&account.password_hash).is_err() {
            errors.push(ValidationError::InvalidPasswordHash(account.login.clone()));
        }
        if account.secondary_code.as_deref() == Some("") {
            errors.push(ValidationError::EmptySecondaryCode(account.login.clone()));
        }
    }

    if config.listen.connection_burst == 0 {
        errors.push(ValidationError::ZeroConnectionBurst);
    }
    if config.sweeper.interval_ms == 0 {
        errors.push(ValidationError::ZeroSweepInterval);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
