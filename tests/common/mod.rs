//! Integration test common infrastructure.
//!
//! Provides an in-process Upend on an ephemeral port, a raw WebSocket test
//! client speaking lifecycle phases, a relay that can stall live connections,
//! and small polling helpers.

pub mod client;
pub mod proxy;
pub mod server;

#[allow(unused_imports)]
pub use client::TestClient;
#[allow(unused_imports)]
pub use proxy::StallingProxy;
#[allow(unused_imports)]
pub use server::{ServerOptions, TestServer};

use std::time::Duration;

/// Poll `condition` every 10ms until it holds or `limit` passes.
#[allow(dead_code)]
pub async fn eventually<F>(limit: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + limit;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
