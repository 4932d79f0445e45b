//! Connection state machine for the Downend.
//!
//! A connection's lifecycle is a sequence of immutable [`ConnectionSnapshot`]
//! values. Every transition method borrows the current snapshot and returns a
//! brand-new one, or an error leaving the current one untouched. Every
//! snapshot is checked against the nullity contract of its state when built,
//! so a reader holding one always sees a consistent value.
//!
//! | State      | start | stop | channel | descriptor | login |
//! |------------|-------|------|---------|------------|-------|
//! | STOPPED    | none  | set  | none    |            | none  |
//! | CONNECTING | set   | none |         |            |       |
//! | CONNECTED  | set   | none | set     | set        |       |
//! | SIGNED_IN  | set   | none | set     | set        | set   |
//! | STOPPING   | none  | set  |         | set        | none  |
//!
//! On top of the table: a STOPPED snapshot holds no timer, and a CONNECTING
//! snapshot holds no ping or pong timer.

use crate::downend::heartbeat::TimerHandle;
use crate::error::{InvariantViolation, SnapshotError, TransitionError};
use std::fmt;
use std::sync::Arc;
use tether_proto::ConnectionDescriptor;
use tokio::sync::watch;

/// Lifecycle state of a Downend connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum State {
    Stopped,
    Connecting,
    Connected,
    SignedIn,
    Stopping,
}

impl State {
    pub const ALL: [State; 5] = [
        State::Stopped,
        State::Connecting,
        State::Connected,
        State::SignedIn,
        State::Stopping,
    ];
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            State::Stopped => "STOPPED",
            State::Connecting => "CONNECTING",
            State::Connected => "CONNECTED",
            State::SignedIn => "SIGNED_IN",
            State::Stopping => "STOPPING",
        };
        f.write_str(name)
    }
}

/// Completion signal for a start or stop request.
///
/// Clones share the same signal. Completing is idempotent.
#[derive(Clone)]
pub struct Completion {
    done: Arc<watch::Sender<bool>>,
}

impl Completion {
    pub fn new() -> Self {
        let (done, _) = watch::channel(false);
        Self {
            done: Arc::new(done),
        }
    }

    /// A signal that is already complete.
    pub fn completed() -> Self {
        let signal = Self::new();
        signal.complete();
        signal
    }

    pub fn complete(&self) {
        self.done.send_replace(true);
    }

    pub fn is_complete(&self) -> bool {
        *self.done.borrow()
    }

    /// Wait until the signal completes.
    pub async fn wait(&self) {
        let mut rx = self.done.subscribe();
        // The sender lives in `self`, so this only ends once complete.
        let _ = rx.wait_for(|done| *done).await;
    }

    /// Whether two handles share one signal.
    pub fn same_as(&self, other: &Completion) -> bool {
        Arc::ptr_eq(&self.done, &other.done)
    }
}

impl Default for Completion {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("complete", &self.is_complete())
            .finish()
    }
}

/// Raw fields of a snapshot, for building one outside a transition.
#[derive(Clone, Debug)]
pub struct SnapshotParts<C> {
    pub state: State,
    pub channel: Option<C>,
    pub start: Option<Completion>,
    pub stop: Option<Completion>,
    pub descriptor: Option<ConnectionDescriptor>,
    pub reconnect_timer: Option<TimerHandle>,
    pub ping_timer: Option<TimerHandle>,
    pub pong_timer: Option<TimerHandle>,
    pub login: Option<String>,
}

/// One immutable step in a connection's lifecycle.
///
/// `C` is the channel handle; the connector uses a live WebSocket link.
#[derive(Clone, Debug)]
pub struct ConnectionSnapshot<C> {
    parts: SnapshotParts<C>,
}

impl<C: Clone> ConnectionSnapshot<C> {
    /// The initial STOPPED snapshot.
    pub fn initial() -> Self {
        Self {
            parts: SnapshotParts {
                state: State::Stopped,
                channel: None,
                start: None,
                stop: Some(Completion::completed()),
                descriptor: None,
                reconnect_timer: None,
                ping_timer: None,
                pong_timer: None,
                login: None,
            },
        }
    }

    /// Build a snapshot from raw parts, enforcing the nullity contract.
    pub fn from_parts(parts: SnapshotParts<C>) -> Result<Self, InvariantViolation> {
        check_invariants(&parts)?;
        Ok(Self { parts })
    }

    pub fn state(&self) -> State {
        self.parts.state
    }

    pub fn channel(&self) -> Option<&C> {
        self.parts.channel.as_ref()
    }

    pub fn start(&self) -> Option<&Completion> {
        self.parts.start.as_ref()
    }

    pub fn stop(&self) -> Option<&Completion> {
        self.parts.stop.as_ref()
    }

    pub fn descriptor(&self) -> Option<&ConnectionDescriptor> {
        self.parts.descriptor.as_ref()
    }

    pub fn reconnect_timer(&self) -> Option<&TimerHandle> {
        self.parts.reconnect_timer.as_ref()
    }

    pub fn ping_timer(&self) -> Option<&TimerHandle> {
        self.parts.ping_timer.as_ref()
    }

    pub fn pong_timer(&self) -> Option<&TimerHandle> {
        self.parts.pong_timer.as_ref()
    }

    pub fn login(&self) -> Option<&str> {
        self.parts.login.as_deref()
    }

    /// Every timer this snapshot holds.
    pub fn timers(&self) -> impl Iterator<Item = &TimerHandle> {
        [
            self.parts.reconnect_timer.as_ref(),
            self.parts.ping_timer.as_ref(),
            self.parts.pong_timer.as_ref(),
        ]
        .into_iter()
        .flatten()
    }

    /// Application traffic may flow.
    pub fn ready_to_send(&self) -> bool {
        match &self.parts.descriptor {
            None => false,
            Some(descriptor) if descriptor.authentication_required => {
                self.parts.state == State::SignedIn
            }
            Some(_) => self.parts.state == State::Connected,
        }
    }

    // ------------------------------------------------------------------------
    // Transitions
    // ------------------------------------------------------------------------

    /// STOPPED -> CONNECTING.
    ///
    /// `provisional` describes the connection until the Upend's descriptor
    /// arrives; STOPPING needs a descriptor even before the first handshake.
    pub fn start_connecting(
        &self,
        start: Completion,
        provisional: ConnectionDescriptor,
    ) -> Result<Self, SnapshotError> {
        self.require("start_connecting", &[State::Stopped])?;
        self.next(SnapshotParts {
            state: State::Connecting,
            channel: None,
            start: Some(start),
            stop: None,
            descriptor: Some(provisional),
            reconnect_timer: None,
            ping_timer: None,
            pong_timer: None,
            login: None,
        })
    }

    /// CONNECTING -> CONNECTING with a freshly established channel.
    pub fn channel_established(&self, channel: C) -> Result<Self, SnapshotError> {
        self.require("channel_established", &[State::Connecting])?;
        self.next(SnapshotParts {
            channel: Some(channel),
            reconnect_timer: None,
            ..self.parts.clone()
        })
    }

    /// CONNECTING -> CONNECTING, waiting for `timer` before the next attempt.
    pub fn reconnect_planned(&self, timer: TimerHandle) -> Result<Self, SnapshotError> {
        self.require("reconnect_planned", &[State::Connecting])?;
        self.next(SnapshotParts {
            channel: None,
            reconnect_timer: Some(timer),
            ..self.parts.clone()
        })
    }

    /// CONNECTING -> CONNECTED once the Upend's descriptor is known.
    pub fn connected(
        &self,
        descriptor: ConnectionDescriptor,
        ping_timer: TimerHandle,
    ) -> Result<Self, SnapshotError> {
        self.require("connected", &[State::Connecting])?;
        self.next(SnapshotParts {
            state: State::Connected,
            descriptor: Some(descriptor),
            reconnect_timer: None,
            ping_timer: Some(ping_timer),
            pong_timer: None,
            ..self.parts.clone()
        })
    }

    /// Replace the ping timer after a pong.
    pub fn next_ping_planned(&self, timer: TimerHandle) -> Result<Self, SnapshotError> {
        self.require("next_ping_planned", &[State::Connected, State::SignedIn])?;
        self.next(SnapshotParts {
            ping_timer: Some(timer),
            pong_timer: None,
            ..self.parts.clone()
        })
    }

    /// A ping went out; wait for its pong until `timer` fires.
    pub fn pong_timeout_planned(&self, timer: TimerHandle) -> Result<Self, SnapshotError> {
        self.require("pong_timeout_planned", &[State::Connected, State::SignedIn])?;
        self.next(SnapshotParts {
            ping_timer: None,
            pong_timer: Some(timer),
            ..self.parts.clone()
        })
    }

    /// CONNECTED -> SIGNED_IN.
    pub fn signed_in(&self, login: impl Into<String>) -> Result<Self, SnapshotError> {
        self.require("signed_in", &[State::Connected])?;
        self.next(SnapshotParts {
            state: State::SignedIn,
            login: Some(login.into()),
            ..self.parts.clone()
        })
    }

    /// The channel went away without a stop request; reconnect after `timer`.
    ///
    /// Descriptor and login survive so the session can be resumed.
    pub fn channel_lost(&self, reconnect_timer: TimerHandle) -> Result<Self, SnapshotError> {
        self.require(
            "channel_lost",
            &[State::Connecting, State::Connected, State::SignedIn],
        )?;
        self.next(SnapshotParts {
            state: State::Connecting,
            channel: None,
            reconnect_timer: Some(reconnect_timer),
            ping_timer: None,
            pong_timer: None,
            ..self.parts.clone()
        })
    }

    /// Begin a clean stop. Timers are dropped; the channel stays until closed.
    pub fn stopping(&self, stop: Completion) -> Result<Self, SnapshotError> {
        self.require(
            "stopping",
            &[State::Connecting, State::Connected, State::SignedIn],
        )?;
        self.next(SnapshotParts {
            state: State::Stopping,
            start: None,
            stop: Some(stop),
            reconnect_timer: None,
            ping_timer: None,
            pong_timer: None,
            login: None,
            ..self.parts.clone()
        })
    }

    /// STOPPING -> STOPPED.
    pub fn stopped(&self) -> Result<Self, SnapshotError> {
        self.require("stopped", &[State::Stopping])?;
        self.next(SnapshotParts {
            state: State::Stopped,
            channel: None,
            ..self.parts.clone()
        })
    }

    /// Straight to STOPPED, skipping STOPPING.
    ///
    /// Keeps the pending stop signal if there is one, otherwise installs an
    /// already completed one.
    pub fn emergency_stopped(&self) -> Result<Self, SnapshotError> {
        self.require(
            "emergency_stopped",
            &[State::Connected, State::SignedIn, State::Stopping],
        )?;
        let stop = self.parts.stop.clone().unwrap_or_else(Completion::completed);
        self.next(SnapshotParts {
            state: State::Stopped,
            channel: None,
            start: None,
            stop: Some(stop),
            descriptor: self.parts.descriptor.clone(),
            reconnect_timer: None,
            ping_timer: None,
            pong_timer: None,
            login: None,
        })
    }

    fn require(&self, attempted: &'static str, allowed: &[State]) -> Result<(), TransitionError> {
        if allowed.contains(&self.parts.state) {
            Ok(())
        } else {
            Err(TransitionError {
                attempted,
                current: self.parts.state,
            })
        }
    }

    fn next(&self, parts: SnapshotParts<C>) -> Result<Self, SnapshotError> {
        Ok(Self::from_parts(parts)?)
    }
}

fn check_invariants<C>(p: &SnapshotParts<C>) -> Result<(), InvariantViolation> {
    let fail = |message| {
        Err(InvariantViolation {
            state: p.state,
            message,
        })
    };
    let set = |present: bool, message| if present { Ok(()) } else { fail(message) };
    let unset = |present: bool, message| if present { fail(message) } else { Ok(()) };

    match p.state {
        State::Stopped => {
            unset(p.start.is_some(), "start signal must be absent")?;
            set(p.stop.is_some(), "stop signal must be present")?;
            unset(p.channel.is_some(), "channel must be absent")?;
            unset(p.login.is_some(), "login must be absent")?;
            unset(p.reconnect_timer.is_some(), "reconnect timer must be absent")?;
            unset(p.ping_timer.is_some(), "ping timer must be absent")?;
            unset(p.pong_timer.is_some(), "pong timer must be absent")?;
        }
        State::Connecting => {
            set(p.start.is_some(), "start signal must be present")?;
            unset(p.stop.is_some(), "stop signal must be absent")?;
            unset(p.ping_timer.is_some(), "ping timer must be absent")?;
            unset(p.pong_timer.is_some(), "pong timer must be absent")?;
        }
        State::Connected => {
            set(p.start.is_some(), "start signal must be present")?;
            unset(p.stop.is_some(), "stop signal must be absent")?;
            set(p.channel.is_some(), "channel must be present")?;
            set(p.descriptor.is_some(), "descriptor must be present")?;
        }
        State::SignedIn => {
            set(p.start.is_some(), "start signal must be present")?;
            unset(p.stop.is_some(), "stop signal must be absent")?;
            set(p.channel.is_some(), "channel must be present")?;
            set(p.descriptor.is_some(), "descriptor must be present")?;
            set(p.login.is_some(), "login must be present")?;
        }
        State::Stopping => {
            unset(p.start.is_some(), "start signal must be absent")?;
            set(p.stop.is_some(), "stop signal must be present")?;
            set(p.descriptor.is_some(), "descriptor must be present")?;
            unset(p.login.is_some(), "login must be absent")?;
        }
    }
    Ok(())
}
