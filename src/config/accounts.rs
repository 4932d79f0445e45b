//! Signon account configuration.

use crate::upend::authenticator::AccountTable;
use serde::Deserialize;

/// One `[[account]]` block.
#[derive(Clone, Deserialize)]
pub struct AccountBlock {
    pub login: String,
    /// Argon2 PHC string, as printed by `tetherd hash-password`.
    pub password_hash: String,
    /// When set, signon also requires this secondary code.
    #[serde(default)]
    pub secondary_code: Option<String>,
}

impl std::fmt::Debug for AccountBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountBlock")
            .field("login", &self.login)
            .field("secondary_code", &self.secondary_code.as_ref().map(|_| "<redacted>"))
            .finish_non_exhaustive()
    }
}

/// Build the authenticator table from configured accounts.
pub fn account_table(accounts: &[AccountBlock]) -> AccountTable {
    let mut table = AccountTable::new();
    for account in accounts {
        table.insert(
            account.login.clone(),
            account.password_hash.clone(),
            account.secondary_code.clone(),
        );
    }
    table
}
