//! The Downend connector actor.
//!
//! One task owns the connection snapshot. User calls, socket events, timer
//! firings and materializer answers all arrive as messages on its queues and
//! are handled one at a time, so transitions never race. Readers see the
//! latest snapshot through a `watch` channel.

use crate::downend::heartbeat::{HeartbeatAction, HeartbeatDriver, TimerFired};
use crate::downend::signon::{Credentials, SignonMaterializer};
use crate::downend::state::{Completion, ConnectionSnapshot, State};
use crate::error::{ConnectorError, SnapshotError, TransitionError};
use anyhow::Context;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tether_proto::{
    ConnectionDescriptor, Phase, SecondaryCode, SecondaryToken, SessionIdentifier,
    SignonFailure, TimeBoundary,
};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{Instrument, debug, error, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Resolves once the connector is CONNECTED (or SIGNED_IN when signon is
/// required), or once the start was cut short by a stop.
pub type StartHandle = Completion;

/// Resolves once the connector is STOPPED.
pub type StopHandle = Completion;

pub type DownendSnapshot = ConnectionSnapshot<Link>;

/// Everything a connector needs before it starts.
pub struct DownendSetup {
    /// `ws://` or `wss://` URL of the Upend.
    pub url: String,
    /// Timing used until the Upend's descriptor arrives.
    pub time_boundary: TimeBoundary,
    pub signon: Option<Arc<dyn SignonMaterializer>>,
    /// Receives application frames once ready to send.
    pub inbound: Option<mpsc::UnboundedSender<String>>,
}

impl DownendSetup {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            time_boundary: TimeBoundary::default(),
            signon: None,
            inbound: None,
        }
    }

    pub fn time_boundary(mut self, time_boundary: TimeBoundary) -> Self {
        self.time_boundary = time_boundary;
        self
    }

    pub fn signon(mut self, materializer: impl SignonMaterializer + 'static) -> Self {
        self.signon = Some(Arc::new(materializer));
        self
    }

    pub fn inbound(mut self, sink: mpsc::UnboundedSender<String>) -> Self {
        self.inbound = Some(sink);
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct LinkId(u64);

/// A live WebSocket channel, as held by snapshots.
#[derive(Clone, Debug)]
pub struct Link {
    id: LinkId,
    outbound: mpsc::UnboundedSender<Message>,
    closer: CancellationToken,
}

impl Link {
    pub fn id(&self) -> LinkId {
        self.id
    }

    /// Ask the IO task to close the socket. Queued frames go out first.
    pub fn close(&self) {
        self.closer.cancel();
    }

    fn send(&self, message: Message) -> bool {
        self.outbound.send(message).is_ok()
    }
}

type Reply<T> = oneshot::Sender<Result<T, ConnectorError>>;

enum Command {
    Start(Reply<StartHandle>),
    Stop(Reply<StopHandle>),
    EmergencyStop(Reply<StopHandle>),
    Signoff(Reply<StopHandle>),
}

enum LinkFrame {
    Text(String),
    Pong,
}

enum Event {
    Command(Command),
    Dialed {
        attempt: u64,
        result: anyhow::Result<(WsStream, ConnectionDescriptor)>,
    },
    Frame {
        link: LinkId,
        frame: LinkFrame,
    },
    LinkClosed {
        link: LinkId,
    },
    Credentials {
        link: LinkId,
        credentials: Option<Credentials>,
    },
    SecondaryCode {
        link: LinkId,
        token: SecondaryToken,
        code: Option<SecondaryCode>,
    },
}

/// Handle to a running connector. Dropping it shuts the connector down.
pub struct DownendConnector {
    events: mpsc::UnboundedSender<Event>,
    snapshot: watch::Receiver<DownendSnapshot>,
    session: watch::Receiver<Option<SessionIdentifier>>,
    _shutdown: DropGuard,
}

impl DownendConnector {
    /// Spawn the connector task. It starts STOPPED.
    pub fn spawn(setup: DownendSetup) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (timers_tx, timers_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(ConnectionSnapshot::initial());
        let (session_tx, session_rx) = watch::channel(None);
        let shutdown = CancellationToken::new();

        let span = crate::telemetry::spans::downend(&setup.url);
        let actor = Actor {
            url: setup.url,
            time_boundary: setup.time_boundary,
            signon: setup.signon,
            inbound: setup.inbound,
            snapshot: snapshot_tx,
            session: session_tx,
            events_tx: events_tx.clone(),
            heartbeat: HeartbeatDriver::new(timers_tx),
            next_link: 0,
            next_attempt: 0,
            dial: None,
            resume: None,
            pending_login: None,
        };
        tokio::spawn(
            actor
                .run(events_rx, timers_rx, shutdown.clone())
                .instrument(span),
        );

        Self {
            events: events_tx,
            snapshot: snapshot_rx,
            session: session_rx,
            _shutdown: shutdown.drop_guard(),
        }
    }

    /// STOPPED -> CONNECTING.
    pub async fn start(&self) -> Result<StartHandle, ConnectorError> {
        self.request(Command::Start).await
    }

    /// Begin a clean stop.
    pub async fn stop(&self) -> Result<StopHandle, ConnectorError> {
        self.request(Command::Stop).await
    }

    /// Jump straight to STOPPED. The socket is told to close but its closing
    /// handshake is not awaited.
    pub async fn emergency_stop(&self) -> Result<StopHandle, ConnectorError> {
        self.request(Command::EmergencyStop).await
    }

    /// End the session on the Upend, then stop.
    pub async fn signoff(&self) -> Result<StopHandle, ConnectorError> {
        self.request(Command::Signoff).await
    }

    /// Send an application frame.
    pub fn send(&self, text: impl Into<String>) -> Result<(), ConnectorError> {
        let snapshot = self.snapshot();
        if !snapshot.ready_to_send() {
            return Err(ConnectorError::NotReady(snapshot.state()));
        }
        match snapshot.channel() {
            Some(link) if link.send(Message::Text(text.into())) => Ok(()),
            _ => Err(ConnectorError::NotReady(snapshot.state())),
        }
    }

    pub fn snapshot(&self) -> DownendSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn state(&self) -> State {
        self.snapshot.borrow().state()
    }

    pub fn ready_to_send(&self) -> bool {
        self.snapshot.borrow().ready_to_send()
    }

    /// Every published snapshot, starting with the current one.
    pub fn subscribe(&self) -> watch::Receiver<DownendSnapshot> {
        self.snapshot.clone()
    }

    /// Wait until a snapshot in `state` is published.
    pub async fn wait_for_state(&self, state: State) -> Result<DownendSnapshot, ConnectorError> {
        let mut rx = self.snapshot.clone();
        let snapshot = rx
            .wait_for(|s| s.state() == state)
            .await
            .map_err(|_| ConnectorError::Shutdown)?;
        Ok(snapshot.clone())
    }

    /// The session the connector will try to resume.
    pub fn session(&self) -> Option<SessionIdentifier> {
        self.session.borrow().clone()
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(Reply<T>) -> Command,
    ) -> Result<T, ConnectorError> {
        let (tx, rx) = oneshot::channel();
        self.events
            .send(Event::Command(command(tx)))
            .map_err(|_| ConnectorError::Shutdown)?;
        rx.await.map_err(|_| ConnectorError::Shutdown)?
    }
}

struct Dial {
    attempt: u64,
    cancel: CancellationToken,
}

struct Resume {
    session: SessionIdentifier,
    login: String,
}

struct Actor {
    url: String,
    time_boundary: TimeBoundary,
    signon: Option<Arc<dyn SignonMaterializer>>,
    inbound: Option<mpsc::UnboundedSender<String>>,
    snapshot: watch::Sender<DownendSnapshot>,
    session: watch::Sender<Option<SessionIdentifier>>,
    events_tx: mpsc::UnboundedSender<Event>,
    heartbeat: HeartbeatDriver,
    next_link: u64,
    next_attempt: u64,
    dial: Option<Dial>,
    resume: Option<Resume>,
    /// Login of the signon attempt in flight on the current link.
    pending_login: Option<String>,
}

impl Actor {
    async fn run(
        mut self,
        mut events: mpsc::UnboundedReceiver<Event>,
        mut timers: mpsc::UnboundedReceiver<TimerFired>,
        shutdown: CancellationToken,
    ) {
        debug!("Connector started");
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                Some(event) = events.recv() => self.on_event(event),
                Some(fired) = timers.recv() => self.on_timer(fired),
            }
        }

        let current = self.current();
        HeartbeatDriver::cancel_all(&current);
        self.cancel_dial();
        if let Some(link) = current.channel() {
            link.close();
        }
        debug!("Connector shut down");
    }

    fn current(&self) -> DownendSnapshot {
        self.snapshot.borrow().clone()
    }

    fn publish(&self, next: DownendSnapshot) {
        debug!(state = %next.state(), "State changed");
        self.snapshot.send_replace(next);
    }

    /// Publish an internally triggered transition. A rejection here is a bug.
    fn transition(&self, next: Result<DownendSnapshot, SnapshotError>) -> bool {
        match next {
            Ok(snapshot) => {
                self.publish(snapshot);
                true
            }
            Err(e) => {
                error!(error = %e, "Transition rejected");
                false
            }
        }
    }

    fn policy(&self, snapshot: &DownendSnapshot) -> TimeBoundary {
        snapshot
            .descriptor()
            .map(|d| d.time_boundary)
            .unwrap_or(self.time_boundary)
    }

    fn on_event(&mut self, event: Event) {
        match event {
            Event::Command(Command::Start(reply)) => {
                let _ = reply.send(self.on_start());
            }
            Event::Command(Command::Stop(reply)) => {
                let _ = reply.send(self.on_stop());
            }
            Event::Command(Command::EmergencyStop(reply)) => {
                let _ = reply.send(self.on_emergency_stop());
            }
            Event::Command(Command::Signoff(reply)) => {
                let _ = reply.send(self.on_signoff());
            }
            Event::Dialed { attempt, result } => self.on_dialed(attempt, result),
            Event::Frame { link, frame } => {
                if !self.is_current_link(link) {
                    debug!("Frame from stale link dropped");
                    return;
                }
                match frame {
                    LinkFrame::Pong => self.on_pong(),
                    LinkFrame::Text(text) => self.on_text(link, text),
                }
            }
            Event::LinkClosed { link } => self.on_link_closed(link),
            Event::Credentials { link, credentials } => self.on_credentials(link, credentials),
            Event::SecondaryCode { link, token, code } => self.on_secondary_code(link, token, code),
        }
    }

    fn is_current_link(&self, link: LinkId) -> bool {
        self.snapshot.borrow().channel().map(Link::id) == Some(link)
    }

    // ------------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------------

    fn on_start(&mut self) -> Result<StartHandle, ConnectorError> {
        let current = self.current();
        let start = Completion::new();
        let provisional = ConnectionDescriptor::new("", false, self.time_boundary);
        let next = current.start_connecting(start.clone(), provisional)?;
        self.publish(next);
        info!(url = %self.url, "Starting");
        self.dial();
        Ok(start)
    }

    fn on_stop(&mut self) -> Result<StopHandle, ConnectorError> {
        let current = self.current();
        let stop = Completion::new();
        let stopping = current.stopping(stop.clone())?;

        HeartbeatDriver::cancel_all(&current);
        self.cancel_dial();
        self.pending_login = None;
        if let Some(start) = current.start() {
            start.complete();
        }
        self.publish(stopping.clone());
        info!("Stopping");

        match stopping.channel() {
            // The IO task reports LinkClosed once the socket is gone.
            Some(link) => link.close(),
            None => self.finish_stop(&stopping),
        }
        Ok(stop)
    }

    fn on_emergency_stop(&mut self) -> Result<StopHandle, ConnectorError> {
        let current = self.current();
        let next = current.emergency_stopped()?;

        HeartbeatDriver::cancel_all(&current);
        self.cancel_dial();
        self.pending_login = None;
        if let Some(link) = current.channel() {
            link.close();
        }
        if let Some(start) = current.start() {
            start.complete();
        }
        let stop = next.stop().cloned().unwrap_or_else(Completion::completed);
        stop.complete();
        self.publish(next);
        warn!("Emergency stop");
        Ok(stop)
    }

    fn on_signoff(&mut self) -> Result<StopHandle, ConnectorError> {
        let current = self.current();
        if current.state() != State::SignedIn {
            return Err(TransitionError {
                attempted: "signoff",
                current: current.state(),
            }
            .into());
        }
        if let Some(link) = current.channel() {
            self.send_phase(link, Phase::Signoff);
        }
        self.forget_session();
        info!("Signing off");
        self.on_stop()
    }

    fn finish_stop(&self, stopping: &DownendSnapshot) {
        match stopping.stopped() {
            Ok(next) => {
                if let Some(stop) = next.stop() {
                    stop.complete();
                }
                self.publish(next);
                info!("Stopped");
            }
            Err(e) => error!(error = %e, "Transition rejected"),
        }
    }

    // ------------------------------------------------------------------------
    // Dialing
    // ------------------------------------------------------------------------

    fn dial(&mut self) {
        let current = self.current();
        let timeout = self.policy(&current).connect_timeout();
        self.next_attempt += 1;
        let attempt = self.next_attempt;
        let cancel = CancellationToken::new();
        if let Some(previous) = self.dial.replace(Dial {
            attempt,
            cancel: cancel.clone(),
        }) {
            previous.cancel.cancel();
        }

        let url = self.url.clone();
        let events = self.events_tx.clone();
        tokio::spawn(
            async move {
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    result = dial(&url, timeout) => {
                        let _ = events.send(Event::Dialed { attempt, result });
                    }
                }
            }
            .in_current_span(),
        );
    }

    fn cancel_dial(&mut self) {
        if let Some(dial) = self.dial.take() {
            dial.cancel.cancel();
        }
    }

    fn on_dialed(&mut self, attempt: u64, result: anyhow::Result<(WsStream, ConnectionDescriptor)>) {
        if self.dial.as_ref().map(|d| d.attempt) != Some(attempt) {
            debug!(attempt, "Stale connection attempt dropped");
            return;
        }
        self.dial = None;

        let current = self.current();
        if current.state() != State::Connecting {
            return;
        }

        match result {
            Err(e) => {
                warn!(error = %format!("{e:#}"), "Connection attempt failed");
                let policy = self.policy(&current);
                let timer = self.heartbeat.schedule_reconnect(&policy);
                self.transition(current.reconnect_planned(timer));
            }
            Ok((ws, descriptor)) => {
                let link = self.open_link(ws);
                let ping = self.heartbeat.schedule_ping(&descriptor.time_boundary);
                info!(
                    upend_version = %descriptor.upend_version,
                    authentication_required = descriptor.authentication_required,
                    time_boundary = %descriptor.time_boundary,
                    "Connected"
                );
                let next = current
                    .channel_established(link.clone())
                    .and_then(|s| s.connected(descriptor, ping));
                if self.transition(next) {
                    self.begin_signon();
                } else {
                    link.close();
                }
            }
        }
    }

    fn open_link(&mut self, ws: WsStream) -> Link {
        self.next_link += 1;
        let id = LinkId(self.next_link);
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let closer = CancellationToken::new();
        tokio::spawn(
            run_link(id, ws, outbound_rx, closer.clone(), self.events_tx.clone())
                .in_current_span(),
        );
        Link {
            id,
            outbound: outbound_tx,
            closer,
        }
    }

    fn on_link_closed(&mut self, link: LinkId) {
        if !self.is_current_link(link) {
            debug!("Stale link closed");
            return;
        }
        let current = self.current();
        match current.state() {
            State::Stopping => self.finish_stop(&current),
            _ => self.lose_channel(),
        }
    }

    fn lose_channel(&mut self) {
        let current = self.current();
        HeartbeatDriver::cancel_all(&current);
        self.pending_login = None;
        let policy = self.policy(&current);
        let timer = self.heartbeat.schedule_reconnect(&policy);
        if self.transition(current.channel_lost(timer)) {
            info!("Channel lost, reconnecting");
        }
    }

    // ------------------------------------------------------------------------
    // Heartbeat
    // ------------------------------------------------------------------------

    fn on_timer(&mut self, fired: TimerFired) {
        let current = self.current();
        match self.heartbeat.on_fired(&current, fired) {
            HeartbeatAction::SendPing => {
                let Some(link) = current.channel() else {
                    return;
                };
                link.send(Message::Ping(Vec::new()));
                let policy = self.policy(&current);
                let timer = self.heartbeat.schedule_pong_timeout(&policy);
                self.transition(current.pong_timeout_planned(timer));
            }
            HeartbeatAction::ChannelDead => {
                warn!("Pong timeout, closing channel");
                if let Some(link) = current.channel() {
                    link.close();
                }
                self.lose_channel();
            }
            HeartbeatAction::Reconnect => self.dial(),
            HeartbeatAction::Stale => {}
        }
    }

    fn on_pong(&mut self) {
        let current = self.current();
        let Some(pong) = current.pong_timer() else {
            return;
        };
        pong.cancel();
        let policy = self.policy(&current);
        let timer = self.heartbeat.schedule_ping(&policy);
        self.transition(current.next_ping_planned(timer));
    }

    // ------------------------------------------------------------------------
    // Signon
    // ------------------------------------------------------------------------

    fn begin_signon(&mut self) {
        let current = self.current();
        let (Some(link), Some(descriptor)) = (current.channel(), current.descriptor()) else {
            return;
        };
        if !descriptor.authentication_required {
            if let Some(start) = current.start() {
                start.complete();
            }
            return;
        }
        if let Some(resume) = &self.resume {
            info!(session = %resume.session, "Resuming session");
            self.send_phase(
                link,
                Phase::ResumeSession {
                    session: resume.session.clone(),
                },
            );
            return;
        }
        self.request_credentials(link.id, None);
    }

    fn request_credentials(&self, link: LinkId, failure: Option<SignonFailure>) {
        let Some(materializer) = self.signon.clone() else {
            warn!("Signon required but no credentials configured");
            return;
        };
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            let credentials = match failure {
                None => materializer.credentials().await,
                Some(failure) => materializer.signon_failed(failure).await,
            };
            let _ = events.send(Event::Credentials { link, credentials });
        });
    }

    fn on_credentials(&mut self, link: LinkId, credentials: Option<Credentials>) {
        let current = self.current();
        if !self.is_current_link(link) || current.state() != State::Connected {
            return;
        }
        let Some(channel) = current.channel() else {
            return;
        };
        match credentials {
            Some(Credentials { login, secret }) => {
                debug!(login = %login, "Sending signon attempt");
                self.pending_login = Some(login.clone());
                self.send_phase(channel, Phase::SignonAttempt { login, secret });
            }
            None => info!("No credentials supplied, staying signed out"),
        }
    }

    fn on_secondary_code(&mut self, link: LinkId, token: SecondaryToken, code: Option<SecondaryCode>) {
        let current = self.current();
        if !self.is_current_link(link) || current.state() != State::Connected {
            return;
        }
        let Some(channel) = current.channel() else {
            return;
        };
        match code {
            Some(code) => self.send_phase(channel, Phase::SecondarySignonAttempt { token, code }),
            None => warn!("No secondary code supplied, staying signed out"),
        }
    }

    fn on_text(&mut self, link: LinkId, text: String) {
        match Phase::decode_text(&text) {
            None => {
                let current = self.current();
                if !current.ready_to_send() {
                    debug!("Application frame before signon dropped");
                    return;
                }
                if let Some(sink) = &self.inbound {
                    let _ = sink.send(text);
                }
            }
            Some(Err(e)) => warn!(error = %e, "Malformed phase frame"),
            Some(Ok(phase)) => self.on_phase(link, phase),
        }
    }

    fn on_phase(&mut self, link: LinkId, phase: Phase) {
        let current = self.current();
        match phase {
            Phase::SessionValid { session } => {
                if current.state() != State::Connected {
                    debug!(state = %current.state(), "SessionValid ignored");
                    return;
                }
                let login = self
                    .pending_login
                    .take()
                    .or_else(|| self.resume.as_ref().map(|r| r.login.clone()))
                    .or_else(|| current.login().map(str::to_string))
                    .unwrap_or_default();
                if self.transition(current.signed_in(login.clone())) {
                    info!(session = %session, login = %login, "Signed in");
                    self.session.send_replace(Some(session.clone()));
                    self.resume = Some(Resume { session, login });
                    if let Some(start) = current.start() {
                        start.complete();
                    }
                }
            }
            Phase::SignonFailureNotice { failure } => {
                self.pending_login = None;
                match failure {
                    SignonFailure::UnknownSession if self.resume.is_some() => {
                        info!("Session not resumable, signing on again");
                        self.forget_session();
                        self.request_credentials(link, None);
                    }
                    // The Upend has not noticed the old channel is dead yet.
                    SignonFailure::SessionBusy if self.resume.is_some() => {
                        info!("Session still bound to an older channel, retrying resume");
                        if let Some(channel) = current.channel() {
                            channel.close();
                        }
                        self.lose_channel();
                    }
                    _ => {
                        warn!(reason = %failure, "Signon failed");
                        self.request_credentials(link, Some(failure));
                    }
                }
            }
            Phase::SecondarySignonNeeded { token } => {
                let Some(materializer) = self.signon.clone() else {
                    warn!("Secondary code requested but no credentials configured");
                    return;
                };
                let events = self.events_tx.clone();
                tokio::spawn(async move {
                    let code = materializer.secondary_code(&token).await;
                    let _ = events.send(Event::SecondaryCode { link, token, code });
                });
            }
            other => warn!(phase = other.name(), "Upward phase received from Upend"),
        }
    }

    fn send_phase(&self, link: &Link, phase: Phase) {
        match phase.encode() {
            Ok(text) => {
                if !link.send(Message::Text(text)) {
                    debug!(phase = phase.name(), "Link gone, phase not sent");
                }
            }
            Err(e) => error!(error = %e, phase = phase.name(), "Cannot encode phase"),
        }
    }

    fn forget_session(&mut self) {
        self.resume = None;
        self.session.send_replace(None);
    }
}

async fn dial(url: &str, timeout: Duration) -> anyhow::Result<(WsStream, ConnectionDescriptor)> {
    let (ws, response) = tokio::time::timeout(timeout, tokio_tungstenite::connect_async(url))
        .await
        .context("connect timed out")?
        .context("websocket handshake failed")?;
    let descriptor = ConnectionDescriptor::from_headers(response.headers())
        .context("upgrade response lacks a valid connection descriptor")?;
    Ok((ws, descriptor))
}

/// Pump one socket until it closes, then report `LinkClosed`.
async fn run_link(
    id: LinkId,
    ws: WsStream,
    mut outbound: mpsc::UnboundedReceiver<Message>,
    closer: CancellationToken,
    events: mpsc::UnboundedSender<Event>,
) {
    let (mut sink, mut stream) = ws.split();
    loop {
        tokio::select! {
            biased;
            _ = closer.cancelled() => {
                while let Ok(message) = outbound.try_recv() {
                    if sink.send(message).await.is_err() {
                        break;
                    }
                }
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
            Some(message) = outbound.recv() => {
                if let Err(e) = sink.send(message).await {
                    debug!(error = %e, "Write failed");
                    break;
                }
            }
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    let _ = events.send(Event::Frame { link: id, frame: LinkFrame::Text(text) });
                }
                Some(Ok(Message::Pong(_))) => {
                    let _ = events.send(Event::Frame { link: id, frame: LinkFrame::Pong });
                }
                // Flushing writes the queued auto-pong.
                Some(Ok(Message::Ping(_))) => {
                    if sink.flush().await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(error = %e, "Read failed");
                    break;
                }
            }
        }
    }
    let _ = events.send(Event::LinkClosed { link: id });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downend::signon::StaticCredentials;
    use tokio::net::TcpListener;

    async fn unused_url() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        format!("ws://{}", addr)
    }

    fn quick() -> TimeBoundary {
        TimeBoundary::builder()
            .ping_interval(1_000)
            .pong_timeout(1_000)
            .reconnect_delay(20, 40)
            .ping_timeout(1_000)
            .session_inactivity_maximum(1_000)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_rejects_invalid_commands_while_stopped() {
        let connector = DownendConnector::spawn(DownendSetup::new("ws://127.0.0.1:9"));
        assert_eq!(connector.state(), State::Stopped);
        assert!(matches!(
            connector.stop().await,
            Err(ConnectorError::Snapshot(SnapshotError::Transition(_)))
        ));
        assert!(matches!(
            connector.emergency_stop().await,
            Err(ConnectorError::Snapshot(_))
        ));
        assert!(matches!(connector.signoff().await, Err(ConnectorError::Snapshot(_))));
        assert!(matches!(
            connector.send("hello"),
            Err(ConnectorError::NotReady(State::Stopped))
        ));
        assert_eq!(connector.state(), State::Stopped);
    }

    #[tokio::test]
    async fn test_unreachable_upend_keeps_reconnecting_until_stopped() {
        let url = unused_url().await;
        let connector = DownendConnector::spawn(
            DownendSetup::new(url)
                .time_boundary(quick())
                .signon(StaticCredentials::new("alice", "pw")),
        );

        let start = connector.start().await.unwrap();
        assert!(!start.is_complete());
        assert!(matches!(
            connector.start().await,
            Err(ConnectorError::Snapshot(SnapshotError::Transition(_)))
        ));

        let mut rx = connector.subscribe();
        tokio::time::timeout(
            Duration::from_secs(5),
            rx.wait_for(|s| s.reconnect_timer().is_some()),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(connector.state(), State::Connecting);

        let stop = connector.stop().await.unwrap();
        tokio::time::timeout(Duration::from_secs(1), stop.wait())
            .await
            .unwrap();
        let snapshot = connector.snapshot();
        assert_eq!(snapshot.state(), State::Stopped);
        assert_eq!(snapshot.timers().count(), 0);
        assert!(start.is_complete());
    }

    #[tokio::test]
    async fn test_drop_shuts_down_actor() {
        let connector = DownendConnector::spawn(DownendSetup::new("ws://127.0.0.1:9"));
        let mut rx = connector.subscribe();
        drop(connector);
        tokio::time::timeout(Duration::from_secs(1), rx.changed())
            .await
            .unwrap()
            .unwrap_err();
    }
}
