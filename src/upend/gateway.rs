//! Gateway - TCP listener that upgrades incoming connections to channels.
//!
//! The Gateway accepts sockets, applies the per-IP rate limit, performs the
//! WebSocket upgrade (origin check plus descriptor headers) and spawns one
//! [`Connection`] task per channel.

use crate::upend::application::Application;
use crate::upend::connection::Connection;
use crate::upend::rate_limit::ConnectionRateLimiter;
use crate::upend::registrar::ChannelRegistrar;
use crate::upend::registry::SessionRegistry;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tether_proto::ConnectionDescriptor;
use tether_proto::websocket::{HandshakeResult, OriginPolicy, build_handshake_response, validate_handshake};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use tracing::{Instrument, debug, error, info, instrument, warn};

/// Upper bound on the HTTP upgrade exchange.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Everything shared by the connection tasks of one Upend.
pub struct UpendContext {
    pub registry: Arc<SessionRegistry>,
    pub registrar: Arc<ChannelRegistrar>,
    pub descriptor: ConnectionDescriptor,
    pub origin_policy: OriginPolicy,
    pub application: Arc<dyn Application>,
    pub rate_limiter: ConnectionRateLimiter,
}

impl UpendContext {
    pub fn new(
        registry: Arc<SessionRegistry>,
        descriptor: ConnectionDescriptor,
        application: Arc<dyn Application>,
    ) -> Self {
        Self {
            registry,
            registrar: Arc::new(ChannelRegistrar::new()),
            descriptor,
            origin_policy: OriginPolicy::default(),
            application,
            rate_limiter: ConnectionRateLimiter::default(),
        }
    }

    pub fn with_origin_policy(mut self, policy: OriginPolicy) -> Self {
        self.origin_policy = policy;
        self
    }

    pub fn with_rate_limiter(mut self, limiter: ConnectionRateLimiter) -> Self {
        self.rate_limiter = limiter;
        self
    }

    pub fn with_registrar(mut self, registrar: Arc<ChannelRegistrar>) -> Self {
        self.registrar = registrar;
        self
    }
}

/// The Gateway accepts incoming TCP connections and spawns handlers.
pub struct Gateway {
    listener: TcpListener,
    ctx: Arc<UpendContext>,
}

impl Gateway {
    /// Bind the gateway to the specified address.
    pub async fn bind(addr: SocketAddr, ctx: Arc<UpendContext>) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!(address = %listener.local_addr()?, "WebSocket listener bound");
        Ok(Self { listener, ctx })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Run the gateway, accepting connections forever.
    #[instrument(skip(self), name = "gateway")]
    pub async fn run(self) -> anyhow::Result<()> {
        loop {
            let (stream, addr) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    error!(error = %e, "Accept failed");
                    continue;
                }
            };

            if !self.ctx.rate_limiter.check(addr.ip()) {
                warn!(%addr, "Connection rate limit exceeded - rejecting");
                drop(stream);
                continue;
            }

            let ctx = Arc::clone(&self.ctx);
            tokio::spawn(
                async move {
                    let ws = match tokio::time::timeout(HANDSHAKE_TIMEOUT, upgrade(stream, &ctx)).await {
                        Ok(Ok(ws)) => ws,
                        Ok(Err(e)) => {
                            debug!(error = %e, "WebSocket handshake failed");
                            return;
                        }
                        Err(_) => {
                            warn!("WebSocket handshake timed out");
                            return;
                        }
                    };
                    if let Err(e) = Connection::new(ctx, ws, addr).run().await {
                        debug!(error = %e, "Connection ended with error");
                    }
                }
                .instrument(crate::telemetry::spans::connection(&addr)),
            );
        }
    }
}

async fn upgrade(
    stream: TcpStream,
    ctx: &UpendContext,
) -> Result<WebSocketStream<TcpStream>, tokio_tungstenite::tungstenite::Error> {
    let callback = |req: &Request, response: Response| {
        let result = validate_handshake(req, &ctx.origin_policy);
        if let HandshakeResult::Reject { .. } = &result {
            info!(%result, "Upgrade rejected");
        }
        build_handshake_response(&result, &ctx.descriptor, response)
    };
    accept_hdr_async(stream, callback).await
}
