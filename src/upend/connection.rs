//! One upgraded channel, from first frame to close.
//!
//! The connection task multiplexes the socket, the outbound queue, kickout,
//! the pending signon decision and the ping deadline in one `select!` loop.
//! Whatever ends the loop, the gate reports the closure to the registry.

use crate::upend::channel::{ChannelHandle, Outbound};
use crate::upend::gate::{InboundVerdict, SignonGate};
use crate::upend::gateway::UpendContext;
use crate::upend::liveness::PingWatchdog;
use crate::upend::registry::{PendingOutcome, SignonOutcome};
use futures_util::future::OptionFuture;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tether_proto::Phase;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

/// Outbound frames a slow peer may have queued before we start dropping.
const OUTBOUND_CAPACITY: usize = 256;

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;

pub struct Connection {
    ctx: Arc<UpendContext>,
    ws: WebSocketStream<TcpStream>,
    remote: SocketAddr,
}

impl Connection {
    pub fn new(ctx: Arc<UpendContext>, ws: WebSocketStream<TcpStream>, remote: SocketAddr) -> Self {
        Self { ctx, ws, remote }
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let (channel, outbound) = ChannelHandle::new(self.remote, OUTBOUND_CAPACITY);
        let mut gate = SignonGate::new(
            Arc::clone(&self.ctx.registry),
            Arc::clone(&self.ctx.registrar),
            channel.clone(),
            self.ctx.descriptor.authentication_required,
        );
        crate::metrics::channel_opened();
        info!(channel = %channel.id(), "Channel open");

        let result = pump(&self.ctx, self.ws, &channel, outbound, &mut gate).await;

        let session = gate.session().cloned();
        gate.closed();
        crate::metrics::channel_closed();
        match session {
            Some(session) => info!(channel = %channel.id(), session = %session, "Channel closed"),
            None => info!(channel = %channel.id(), "Channel closed"),
        }
        result
    }
}

async fn pump(
    ctx: &UpendContext,
    ws: WebSocketStream<TcpStream>,
    channel: &ChannelHandle,
    mut outbound: mpsc::Receiver<Outbound>,
    gate: &mut SignonGate,
) -> anyhow::Result<()> {
    let (mut sink, mut stream) = ws.split();
    let kicked = channel.kicked();
    let mut watchdog = PingWatchdog::new(ctx.descriptor.time_boundary.ping_timeout());
    let mut pending: Option<PendingOutcome<SignonOutcome>> = None;

    loop {
        tokio::select! {
            _ = kicked.cancelled() => {
                info!("Kicked out");
                let _ = sink.send(Message::Close(None)).await;
                return Ok(());
            }
            Some(outcome) = OptionFuture::from(pending.as_mut()) => {
                pending = None;
                let phase = gate.on_signon_outcome(outcome);
                send_phase(&mut sink, &phase).await?;
            }
            Some(message) = outbound.recv() => match message {
                Outbound::Phase(phase) => send_phase(&mut sink, &phase).await?,
                Outbound::Application(text) if gate.admits_outbound() => {
                    sink.send(Message::Text(text)).await?;
                }
                Outbound::Application(_) => debug!("Outbound application frame before signon dropped"),
            },
            _ = tokio::time::sleep_until(watchdog.deadline()) => {
                warn!("Ping timeout, closing channel");
                crate::metrics::record_ping_timeout();
                let _ = sink.send(Message::Close(None)).await;
                return Ok(());
            }
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => match gate.on_text(text) {
                    InboundVerdict::Forward(text) => {
                        ctx.application.on_message(gate.session(), channel, text).await;
                    }
                    InboundVerdict::Drop => {}
                    InboundVerdict::Reply(phase) => send_phase(&mut sink, &phase).await?,
                    InboundVerdict::Await(outcome) => pending = Some(outcome),
                    InboundVerdict::Close => {
                        let _ = sink.send(Message::Close(None)).await;
                        return Ok(());
                    }
                },
                // Flushing writes the queued auto-pong.
                Some(Ok(Message::Ping(_))) => {
                    watchdog.touch();
                    sink.flush().await?;
                }
                Some(Ok(Message::Close(_))) | None => return Ok(()),
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
            },
        }
    }
}

async fn send_phase(sink: &mut WsSink, phase: &Phase) -> anyhow::Result<()> {
    let text = phase.encode()?;
    debug!(phase = phase.name(), "Sending phase");
    sink.send(Message::Text(text)).await?;
    Ok(())
}
