//! Test server management.
//!
//! Runs a full Upend (gateway, registry, expiry sweeper) inside the test
//! process on an ephemeral port.

use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tether::TimeBoundary;
use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHasher, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};
use tether::upend::expiry::spawn_expiry_task;
use tether::upend::{
    AccountTable, ChannelRegistrar, ConnectionRateLimiter, EchoApplication, Gateway,
    SessionRegistry, UpendContext,
};
use tether_proto::ConnectionDescriptor;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub const ALICE: (&str, &str) = ("alice", "alice-password");
pub const BOB: (&str, &str) = ("bob", "bob-password");
/// Secondary code bob must supply.
pub const BOB_CODE: &str = "424242";

/// Minimum-cost Argon2 so signon stays well inside short ping timeouts.
fn cheap_hash(password: &str) -> String {
    let params = Params::new(8, 1, 1, None).expect("argon2 params");
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
    let salt = SaltString::generate(&mut OsRng);
    argon2
        .hash_password(password.as_bytes(), &salt)
        .expect("hash")
        .to_string()
}

fn hashes() -> &'static (String, String) {
    static HASHES: OnceLock<(String, String)> = OnceLock::new();
    HASHES.get_or_init(|| (cheap_hash(ALICE.1), cheap_hash(BOB.1)))
}

#[derive(Clone, Debug)]
pub struct ServerOptions {
    pub time_boundary: TimeBoundary,
    pub authentication_required: bool,
    pub sweep_interval: Duration,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            time_boundary: TimeBoundary::LENIENT,
            authentication_required: true,
            sweep_interval: Duration::from_millis(50),
        }
    }
}

/// A test server instance.
pub struct TestServer {
    addr: SocketAddr,
    pub registry: Arc<SessionRegistry>,
    pub registrar: Arc<ChannelRegistrar>,
    shutdown: CancellationToken,
    gateway: JoinHandle<()>,
}

impl TestServer {
    /// Spawn a server with LENIENT timing and signon required.
    pub async fn spawn() -> anyhow::Result<Self> {
        Self::spawn_with(ServerOptions::default()).await
    }

    pub async fn spawn_with(options: ServerOptions) -> anyhow::Result<Self> {
        let (alice_hash, bob_hash) = hashes().clone();
        let mut accounts = AccountTable::new();
        accounts.insert(ALICE.0, alice_hash, None);
        accounts.insert(BOB.0, bob_hash, Some(BOB_CODE.to_string()));
        let accounts = Arc::new(accounts);

        let registry = Arc::new(SessionRegistry::new(
            accounts.clone(),
            accounts,
            options.time_boundary,
        ));
        let registrar = Arc::new(ChannelRegistrar::new());
        let descriptor = ConnectionDescriptor::new(
            "test-upend",
            options.authentication_required,
            options.time_boundary,
        );
        let ctx = UpendContext::new(Arc::clone(&registry), descriptor, Arc::new(EchoApplication))
            .with_registrar(Arc::clone(&registrar))
            .with_rate_limiter(ConnectionRateLimiter::new(10_000));

        let gateway = Gateway::bind("127.0.0.1:0".parse()?, Arc::new(ctx)).await?;
        let addr = gateway.local_addr()?;
        let shutdown = CancellationToken::new();
        spawn_expiry_task(Arc::clone(&registry), options.sweep_interval, shutdown.clone());
        let gateway = tokio::spawn(async move {
            let _ = gateway.run().await;
        });

        Ok(Self {
            addr,
            registry,
            registrar,
            shutdown,
            gateway,
        })
    }

    /// Get the server address.
    pub fn address(&self) -> SocketAddr {
        self.addr
    }

    pub fn url(&self) -> String {
        format!("ws://{}/", self.addr)
    }

    /// Create a new test client connected to this server.
    pub async fn connect(&self) -> anyhow::Result<super::client::TestClient> {
        super::client::TestClient::connect(&self.url()).await
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
        self.gateway.abort();
        self.registry.kickout_all();
    }
}
