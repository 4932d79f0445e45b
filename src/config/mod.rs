//! Configuration loading and management.
//!
//! This module is split into logical submodules:
//! - [`types`]: Core config struct definitions (Config, ServerConfig, SweeperConfig)
//! - [`listen`]: WebSocket listener configuration (ListenConfig)
//! - [`accounts`]: Signon accounts (AccountBlock)
//! - [`validation`]: Startup checks that collect every problem at once

mod accounts;
mod listen;
mod types;
pub mod validation;

pub use accounts::{AccountBlock, account_table};
pub use listen::ListenConfig;
pub use types::{Config, ConfigError, ServerConfig, SweeperConfig};
pub use validation::{ValidationError, validate};
