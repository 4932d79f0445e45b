//! Per-channel signon enforcement.
//!
//! The gate sits between a channel's socket and the application. Until the
//! channel carries an active session, only lifecycle phases get through; once
//! a session is bound, application frames are forwarded untouched. The gate
//! keeps channel-local state only and reaches shared state through the
//! registry and the registrar.

use crate::error::RegistryError;
use crate::upend::channel::ChannelHandle;
use crate::upend::registrar::ChannelRegistrar;
use crate::upend::registry::{PendingOutcome, SessionRegistry, SignonOutcome};
use std::sync::Arc;
use tether_proto::{Phase, SessionIdentifier, SignonFailure};
use tracing::{debug, info, warn};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GateState {
    AwaitingSignon,
    /// A challenge was issued; waiting for the code.
    AwaitingSecondary,
    /// An authenticator is deciding.
    SignonPending,
    Active(SessionIdentifier),
    Closed,
}

/// What the connection should do with an inbound text frame.
#[derive(Debug)]
pub enum InboundVerdict {
    Forward(String),
    Drop,
    Reply(Phase),
    /// Wait for the outcome, then hand it to [`SignonGate::on_signon_outcome`].
    Await(PendingOutcome<SignonOutcome>),
    Close,
}

pub struct SignonGate {
    registry: Arc<SessionRegistry>,
    registrar: Arc<ChannelRegistrar>,
    channel: ChannelHandle,
    authentication_required: bool,
    state: GateState,
    signoff_seen: bool,
}

impl SignonGate {
    pub fn new(
        registry: Arc<SessionRegistry>,
        registrar: Arc<ChannelRegistrar>,
        channel: ChannelHandle,
        authentication_required: bool,
    ) -> Self {
        Self {
            registry,
            registrar,
            channel,
            authentication_required,
            state: GateState::AwaitingSignon,
            signoff_seen: false,
        }
    }

    pub fn state(&self) -> &GateState {
        &self.state
    }

    pub fn session(&self) -> Option<&SessionIdentifier> {
        match &self.state {
            GateState::Active(session) => Some(session),
            _ => None,
        }
    }

    /// Application traffic may flow in both directions.
    pub fn admits_application(&self) -> bool {
        !self.authentication_required || matches!(self.state, GateState::Active(_))
    }

    pub fn admits_outbound(&self) -> bool {
        self.admits_application() && self.state != GateState::Closed
    }

    pub fn on_text(&mut self, text: String) -> InboundVerdict {
        match Phase::decode_text(&text) {
            None if self.admits_application() => InboundVerdict::Forward(text),
            None => {
                crate::metrics::record_dropped_frame();
                debug!(channel = %self.channel.id(), "Application frame before signon dropped");
                InboundVerdict::Drop
            }
            Some(Err(e)) => {
                warn!(channel = %self.channel.id(), error = %e, "Malformed phase frame");
                InboundVerdict::Drop
            }
            Some(Ok(phase)) => self.on_phase(phase),
        }
    }

    fn on_phase(&mut self, phase: Phase) -> InboundVerdict {
        let awaiting = matches!(
            self.state,
            GateState::AwaitingSignon | GateState::AwaitingSecondary
        );
        match phase {
            Phase::SignonAttempt { login, secret } => {
                if let GateState::Active(_) = self.state {
                    return failure(SignonFailure::SessionAlreadyExists);
                }
                if !awaiting {
                    debug!(channel = %self.channel.id(), "Signon attempt while one is pending");
                    return InboundVerdict::Drop;
                }
                self.state = GateState::SignonPending;
                InboundVerdict::Await(self.registry.attempt_primary_signon(
                    login,
                    secret,
                    self.channel.clone(),
                ))
            }
            Phase::SecondarySignonAttempt { token, code } => {
                if !awaiting {
                    return InboundVerdict::Drop;
                }
                self.state = GateState::SignonPending;
                InboundVerdict::Await(self.registry.attempt_secondary_signon(
                    self.channel.clone(),
                    token,
                    code,
                ))
            }
            Phase::ResumeSession { session } => {
                if !awaiting {
                    return InboundVerdict::Drop;
                }
                match self.registry.try_reuse(&session, &self.channel) {
                    Ok(_) => {
                        self.activate(session.clone());
                        InboundVerdict::Reply(Phase::SessionValid { session })
                    }
                    Err(e) => {
                        info!(session = %session, reason = e.error_code(), "Resume refused");
                        self.state = GateState::AwaitingSignon;
                        failure(e.as_failure())
                    }
                }
            }
            Phase::Signoff => {
                if let GateState::Active(_) = self.state {
                    self.signoff_seen = true;
                }
                InboundVerdict::Close
            }
            other => {
                warn!(channel = %self.channel.id(), phase = other.name(), "Downward phase received from Downend");
                InboundVerdict::Drop
            }
        }
    }

    /// Apply a resolved signon and return the phase to send back.
    pub fn on_signon_outcome(&mut self, outcome: Result<SignonOutcome, RegistryError>) -> Phase {
        match outcome {
            Ok(SignonOutcome::Accepted { session, .. }) => {
                self.activate(session.clone());
                Phase::SessionValid { session }
            }
            Ok(SignonOutcome::NeedsSecondaryFactor { token }) => {
                self.state = GateState::AwaitingSecondary;
                Phase::SecondarySignonNeeded { token }
            }
            Ok(SignonOutcome::Denied(failure)) => {
                self.state = GateState::AwaitingSignon;
                Phase::SignonFailureNotice { failure }
            }
            Err(e) => {
                self.state = GateState::AwaitingSignon;
                Phase::SignonFailureNotice {
                    failure: e.as_failure(),
                }
            }
        }
    }

    fn activate(&mut self, session: SessionIdentifier) {
        self.registrar.register(session.clone(), self.channel.clone());
        self.state = GateState::Active(session);
    }

    /// The channel is gone. Reports to the registry exactly once.
    pub fn closed(&mut self) {
        // Signons still deciding must see the channel as closed.
        self.channel.kick();
        let previous = std::mem::replace(&mut self.state, GateState::Closed);
        match previous {
            GateState::Active(session) => {
                self.registrar.unregister(&session, self.channel.id());
                self.registry
                    .closed(self.channel.id(), &session, self.signoff_seen);
            }
            GateState::SignonPending | GateState::AwaitingSecondary => {
                self.registry.release_channel(self.channel.id());
            }
            GateState::AwaitingSignon | GateState::Closed => {}
        }
    }
}

fn failure(failure: SignonFailure) -> InboundVerdict {
    InboundVerdict::Reply(Phase::SignonFailureNotice { failure })
}
