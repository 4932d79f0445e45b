//! tetherd - a standalone Upend serving an echo application.
//!
//! Usage:
//!   tetherd [config.toml]
//!   tetherd hash-password <password>

use std::sync::Arc;
use tether::config::{self, Config};
use tether::upend::{EchoApplication, Gateway, SessionRegistry, UpendContext};
use tether::upend::authenticator::hash_password;
use tether::upend::expiry::spawn_expiry_task;
use tether::upend::rate_limit::ConnectionRateLimiter;
use tether::{http, metrics};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    let mut args = std::env::args().skip(1);
    let first = args.next();

    if first.as_deref() == Some("hash-password") {
        let Some(password) = args.next() else {
            anyhow::bail!("usage: tetherd hash-password <password>");
        };
        let hash = hash_password(&password).map_err(|e| anyhow::anyhow!("hashing failed: {e}"))?;
        println!("{hash}");
        return Ok(());
    }

    // Load configuration
    let config_path = first.unwrap_or_else(|| "config.toml".to_string());

    let config = Config::load(&config_path).map_err(|e| {
        error!(path = %config_path, error = %e, "Failed to load config");
        e
    })?;

    if let Err(errors) = config::validate(&config) {
        for e in &errors {
            error!(error = %e, "Invalid configuration");
        }
        anyhow::bail!("{} configuration error(s) in {}", errors.len(), config_path);
    }

    info!(
        server = %config.server.name,
        version = %config.server.upend_version,
        authentication_required = config.server.authentication_required,
        time_boundary = %config.time_boundary,
        "Starting tetherd"
    );

    let accounts = Arc::new(config::account_table(&config.accounts));
    info!(count = accounts.len(), "Loaded accounts");

    let registry = Arc::new(SessionRegistry::new(
        accounts.clone(),
        accounts,
        config.time_boundary,
    ));

    // Convention: metrics_port = 0 disables the HTTP endpoint (used by tests).
    let metrics_port = config.server.metrics_port;
    if metrics_port == 0 {
        info!("Metrics disabled");
    } else {
        metrics::init();
        info!("Metrics initialized");

        let registry = Arc::clone(&registry);
        tokio::spawn(async move {
            http::run_http_server(metrics_port, registry).await;
        });
        info!(port = metrics_port, "Admin HTTP server started");
    }

    let shutdown = CancellationToken::new();
    let sweeper = spawn_expiry_task(
        Arc::clone(&registry),
        config.sweeper.interval(),
        shutdown.clone(),
    );
    info!(interval_ms = config.sweeper.interval_ms, "Session expiry task started");

    let ctx = UpendContext::new(
        Arc::clone(&registry),
        config.descriptor(),
        Arc::new(EchoApplication),
    )
    .with_origin_policy(config.listen.origin_policy())
    .with_rate_limiter(ConnectionRateLimiter::new(config.listen.connection_burst));

    let gateway = Gateway::bind(config.listen.address, Arc::new(ctx)).await?;

    let result = tokio::select! {
        result = gateway.run() => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, shutting down");
            Ok(())
        }
    };

    let kicked = registry.kickout_all();
    info!(kicked, "Sessions terminated");
    shutdown.cancel();
    let _ = sweeper.await;
    result
}
