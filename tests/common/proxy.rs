//! TCP relay in front of a test server that can freeze live connections.
//!
//! A stalled connection keeps both sockets open but stops moving bytes, so
//! each side sees a half-open channel: no close, no pongs, no pings.

use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub struct StallingProxy {
    addr: SocketAddr,
    stall: Arc<Mutex<CancellationToken>>,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

impl StallingProxy {
    pub async fn spawn(upstream: SocketAddr) -> anyhow::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let stall = Arc::new(Mutex::new(CancellationToken::new()));
        let shutdown = CancellationToken::new();

        let task = tokio::spawn({
            let stall = Arc::clone(&stall);
            let shutdown = shutdown.clone();
            async move {
                while let Ok((client, _)) = listener.accept().await {
                    let stalled = stall.lock().clone();
                    tokio::spawn(relay(client, upstream, stalled, shutdown.clone()));
                }
            }
        });

        Ok(Self {
            addr,
            stall,
            shutdown,
            task,
        })
    }

    pub fn url(&self) -> String {
        format!("ws://{}/", self.addr)
    }

    /// Freeze every connection open right now. Later connections relay normally.
    pub fn stall(&self) {
        let mut current = self.stall.lock();
        current.cancel();
        *current = CancellationToken::new();
    }
}

async fn relay(
    mut client: TcpStream,
    upstream: SocketAddr,
    stalled: CancellationToken,
    shutdown: CancellationToken,
) {
    let Ok(mut server) = TcpStream::connect(upstream).await else {
        return;
    };
    tokio::select! {
        _ = tokio::io::copy_bidirectional(&mut client, &mut server) => return,
        _ = stalled.cancelled() => {}
    }
    // Hold both sockets open without reading.
    shutdown.cancelled().await;
}

impl Drop for StallingProxy {
    fn drop(&mut self) {
        self.shutdown.cancel();
        self.task.abort();
    }
}
