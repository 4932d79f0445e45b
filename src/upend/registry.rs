//! Session registry: the single source of truth for who owns a session.
//!
//! # Locking
//!
//! Records live behind `Arc<Mutex<SessionRecord>>` in a `DashMap`. Every
//! read-decide-write on a record happens under its mutex, which is what makes
//! a concurrent `try_reuse` and `closed` for one session resolve one after
//! the other.
//!
//! Lock order is `logins` shard, then `sessions` shard, then record mutex.
//! Nothing touches `logins` or `challenges` while holding a record mutex or a
//! `sessions` guard, and map guards are dropped before locking a record
//! except inside [`SessionRegistry::claim_login`].

use crate::error::RegistryError;
use crate::upend::authenticator::{PrimaryAuthenticator, PrimaryVerdict, SecondaryAuthenticator};
use crate::upend::channel::{ChannelHandle, ChannelId};
use crate::telemetry::SignonTimer;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tether_proto::{Secret, SecondaryCode, SecondaryToken, SessionIdentifier, SignonFailure, TimeBoundary};
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, info, warn};

// ============================================================================
// Records
// ============================================================================

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RecordState {
    PendingPrimary,
    PendingSecondary { token: SecondaryToken },
    Active,
    DisconnectedReusable,
    Terminated,
}

impl RecordState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordState::PendingPrimary => "pending_primary",
            RecordState::PendingSecondary { .. } => "pending_secondary",
            RecordState::Active => "active",
            RecordState::DisconnectedReusable => "disconnected_reusable",
            RecordState::Terminated => "terminated",
        }
    }

    fn is_pending(&self) -> bool {
        matches!(
            self,
            RecordState::PendingPrimary | RecordState::PendingSecondary { .. }
        )
    }
}

#[derive(Debug)]
pub struct SessionRecord {
    session: SessionIdentifier,
    login: String,
    state: RecordState,
    channel: Option<ChannelHandle>,
    remote: SocketAddr,
    created_at: Instant,
    created_wall: DateTime<Utc>,
    last_active_at: Instant,
}

impl SessionRecord {
    fn pending(session: SessionIdentifier, login: &str, channel: &ChannelHandle) -> Self {
        let now = Instant::now();
        Self {
            session,
            login: login.to_string(),
            state: RecordState::PendingPrimary,
            channel: Some(channel.clone()),
            remote: channel.remote(),
            created_at: now,
            created_wall: Utc::now(),
            last_active_at: now,
        }
    }

    /// The login may be claimed by a new signon.
    fn reclaimable(&self) -> bool {
        match self.state {
            RecordState::DisconnectedReusable | RecordState::Terminated => true,
            _ => self.channel.as_ref().is_none_or(ChannelHandle::is_closed),
        }
    }
}

/// Administrative view of one session.
#[derive(Clone, Debug, Serialize)]
pub struct SessionSummary {
    pub session: String,
    pub login: String,
    pub state: &'static str,
    pub remote: String,
    pub bound: bool,
    pub idle_ms: u64,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Outcomes
// ============================================================================

/// Result of a signon attempt that reached a decision.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SignonOutcome {
    Accepted {
        session: SessionIdentifier,
        login: String,
    },
    NeedsSecondaryFactor {
        token: SecondaryToken,
    },
    Denied(SignonFailure),
}

impl SignonOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            SignonOutcome::Accepted { .. } => "accepted",
            SignonOutcome::NeedsSecondaryFactor { .. } => "needs_secondary",
            SignonOutcome::Denied(failure) => failure.code(),
        }
    }
}

/// A result delivered exactly once by another task.
///
/// Resolves to [`RegistryError::Abandoned`] if the resolving side is dropped
/// without answering.
#[derive(Debug)]
pub struct PendingOutcome<T> {
    rx: oneshot::Receiver<T>,
}

/// The only way to resolve a [`PendingOutcome`]; consumed by use.
#[derive(Debug)]
pub struct OutcomeResolver<T> {
    tx: oneshot::Sender<T>,
}

impl<T> PendingOutcome<T> {
    pub fn channel() -> (Self, OutcomeResolver<T>) {
        let (tx, rx) = oneshot::channel();
        (Self { rx }, OutcomeResolver { tx })
    }
}

impl<T> OutcomeResolver<T> {
    pub fn resolve(self, value: T) {
        // The waiting side may have gone away; the decision stands regardless.
        let _ = self.tx.send(value);
    }
}

impl<T> Future for PendingOutcome<T> {
    type Output = Result<T, RegistryError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|r| r.map_err(|_| RegistryError::Abandoned))
    }
}

// ============================================================================
// Registry
// ============================================================================

type RecordRef = Arc<Mutex<SessionRecord>>;

pub struct SessionRegistry {
    sessions: DashMap<SessionIdentifier, RecordRef>,
    logins: DashMap<String, SessionIdentifier>,
    challenges: DashMap<SecondaryToken, SessionIdentifier>,
    primary: Arc<dyn PrimaryAuthenticator>,
    secondary: Arc<dyn SecondaryAuthenticator>,
    time_boundary: TimeBoundary,
}

impl SessionRegistry {
    pub fn new(
        primary: Arc<dyn PrimaryAuthenticator>,
        secondary: Arc<dyn SecondaryAuthenticator>,
        time_boundary: TimeBoundary,
    ) -> Self {
        Self {
            sessions: DashMap::new(),
            logins: DashMap::new(),
            challenges: DashMap::new(),
            primary,
            secondary,
            time_boundary,
        }
    }

    pub fn time_boundary(&self) -> &TimeBoundary {
        &self.time_boundary
    }

    fn inactivity_maximum(&self) -> Duration {
        self.time_boundary.session_inactivity_maximum()
    }

    fn record(&self, session: &SessionIdentifier) -> Option<RecordRef> {
        self.sessions.get(session).map(|r| Arc::clone(r.value()))
    }

    /// Check primary credentials for `login` arriving on `channel`.
    ///
    /// The login is claimed before the authenticator runs, so concurrent
    /// attempts for one login see `SessionAlreadyExists` immediately.
    pub fn attempt_primary_signon(
        self: &Arc<Self>,
        login: String,
        secret: Secret,
        channel: ChannelHandle,
    ) -> PendingOutcome<SignonOutcome> {
        let (outcome, resolver) = PendingOutcome::channel();
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let _timer = SignonTimer::new("primary");
            let result = registry.primary_signon(&login, &secret, &channel).await;
            crate::metrics::record_signon("primary", result.label());
            resolver.resolve(result);
        });
        outcome
    }

    /// Answer a secondary challenge issued to `channel`.
    pub fn attempt_secondary_signon(
        self: &Arc<Self>,
        channel: ChannelHandle,
        token: SecondaryToken,
        code: SecondaryCode,
    ) -> PendingOutcome<SignonOutcome> {
        let (outcome, resolver) = PendingOutcome::channel();
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let _timer = SignonTimer::new("secondary");
            let result = registry.secondary_signon(&channel, &token, &code).await;
            crate::metrics::record_signon("secondary", result.label());
            resolver.resolve(result);
        });
        outcome
    }

    async fn primary_signon(
        &self,
        login: &str,
        secret: &Secret,
        channel: &ChannelHandle,
    ) -> SignonOutcome {
        let (session, record) = match self.claim_login(login, channel) {
            Ok(claim) => claim,
            Err(failure) => {
                info!(login = %login, remote = %channel.remote(), "Signon refused, login in use");
                return SignonOutcome::Denied(failure);
            }
        };

        match self.primary.authenticate(login, secret).await {
            PrimaryVerdict::Accepted => self.activate(&session, &record, channel, None),
            PrimaryVerdict::NeedsSecondary => {
                let token = SecondaryToken::generate();
                {
                    let mut rec = record.lock();
                    if rec.state != RecordState::PendingPrimary {
                        return SignonOutcome::Denied(SignonFailure::UnknownSession);
                    }
                    rec.state = RecordState::PendingSecondary {
                        token: token.clone(),
                    };
                }
                self.challenges.insert(token.clone(), session.clone());
                debug!(login = %login, session = %session, "Secondary code required");
                SignonOutcome::NeedsSecondaryFactor { token }
            }
            PrimaryVerdict::Denied(failure) => {
                self.drop_record(&session);
                info!(login = %login, remote = %channel.remote(), reason = %failure, "Signon denied");
                SignonOutcome::Denied(failure)
            }
        }
    }

    async fn secondary_signon(
        &self,
        channel: &ChannelHandle,
        token: &SecondaryToken,
        code: &SecondaryCode,
    ) -> SignonOutcome {
        // Removing the challenge makes each token single-use.
        let Some((_, session)) = self.challenges.remove(token) else {
            return SignonOutcome::Denied(SignonFailure::IncorrectSecondaryCode);
        };
        let Some(record) = self.record(&session) else {
            return SignonOutcome::Denied(SignonFailure::IncorrectSecondaryCode);
        };

        let login = {
            let rec = record.lock();
            let expected = matches!(&rec.state, RecordState::PendingSecondary { token: t } if t == token);
            let same_channel = rec.channel.as_ref().map(ChannelHandle::id) == Some(channel.id());
            if !expected || !same_channel {
                drop(rec);
                warn!(session = %session, remote = %channel.remote(), "Secondary answer on the wrong channel");
                self.drop_record(&session);
                return SignonOutcome::Denied(SignonFailure::IncorrectSecondaryCode);
            }
            rec.login.clone()
        };

        if code.is_empty() {
            self.drop_record(&session);
            return SignonOutcome::Denied(SignonFailure::MissingSecondaryCode);
        }

        if self.secondary.verify(&login, token, code).await {
            self.activate(&session, &record, channel, Some(token))
        } else {
            self.drop_record(&session);
            info!(login = %login, remote = %channel.remote(), "Secondary code rejected");
            SignonOutcome::Denied(SignonFailure::IncorrectSecondaryCode)
        }
    }

    /// Reserve `login` for a new pending record.
    ///
    /// A login held by a record that can no longer be resumed or whose
    /// channel is gone is taken over, and that record is destroyed.
    fn claim_login(
        &self,
        login: &str,
        channel: &ChannelHandle,
    ) -> Result<(SessionIdentifier, RecordRef), SignonFailure> {
        let session = SessionIdentifier::generate();
        let record = Arc::new(Mutex::new(SessionRecord::pending(session.clone(), login, channel)));
        // Visible in `sessions` before `logins` so a claimed login never
        // points at a missing record.
        self.sessions.insert(session.clone(), Arc::clone(&record));

        let displaced = match self.logins.entry(login.to_string()) {
            Entry::Vacant(slot) => {
                slot.insert(session.clone());
                None
            }
            Entry::Occupied(mut slot) => {
                let existing = slot.get().clone();
                let reclaimable = self
                    .record(&existing)
                    .is_none_or(|other| other.lock().reclaimable());
                if !reclaimable {
                    drop(slot);
                    self.sessions.remove(&session);
                    return Err(SignonFailure::SessionAlreadyExists);
                }
                slot.insert(session.clone());
                Some(existing)
            }
        };

        if let Some(old) = displaced {
            info!(login = %login, session = %old, "Replacing stale session");
            if let Some(stale) = self.drop_record(&old) {
                stale.kick();
            }
        }
        Ok((session, record))
    }

    fn activate(
        &self,
        session: &SessionIdentifier,
        record: &RecordRef,
        channel: &ChannelHandle,
        token: Option<&SecondaryToken>,
    ) -> SignonOutcome {
        let mut rec = record.lock();
        let expected = match (&rec.state, token) {
            (RecordState::PendingPrimary, None) => true,
            (RecordState::PendingSecondary { token: t }, Some(token)) => t == token,
            _ => false,
        };
        if !expected || channel.is_closed() {
            drop(rec);
            debug!(session = %session, "Signon finished after the channel went away");
            self.drop_record(session);
            return SignonOutcome::Denied(SignonFailure::UnknownSession);
        }
        rec.state = RecordState::Active;
        rec.last_active_at = Instant::now();
        let login = rec.login.clone();
        info!(login = %login, session = %session, remote = %channel.remote(), "Session active");
        SignonOutcome::Accepted {
            session: session.clone(),
            login,
        }
    }

    /// Rebind an existing session to `channel` without authentication.
    ///
    /// Succeeds from DISCONNECTED_REUSABLE within the inactivity window, or
    /// from ACTIVE when the bound channel is already gone. Returns the login.
    pub fn try_reuse(
        &self,
        session: &SessionIdentifier,
        channel: &ChannelHandle,
    ) -> Result<String, RegistryError> {
        let result = self.reuse(session, channel);
        crate::metrics::record_reuse(match &result {
            Ok(_) => "accepted",
            Err(e) => e.error_code(),
        });
        result
    }

    fn reuse(&self, session: &SessionIdentifier, channel: &ChannelHandle) -> Result<String, RegistryError> {
        let record = self.record(session).ok_or(RegistryError::UnknownSession)?;
        let mut rec = record.lock();
        let now = Instant::now();

        let expired = match &rec.state {
            RecordState::DisconnectedReusable => {
                now.saturating_duration_since(rec.last_active_at) > self.inactivity_maximum()
            }
            RecordState::Active if rec.channel.as_ref().is_none_or(ChannelHandle::is_closed) => false,
            RecordState::Terminated => return Err(RegistryError::UnknownSession),
            _ => return Err(RegistryError::SessionNotReusable),
        };
        if expired {
            rec.state = RecordState::Terminated;
            drop(rec);
            self.drop_record(session);
            info!(session = %session, "Session expired before reuse");
            return Err(RegistryError::SessionExpired);
        }

        rec.state = RecordState::Active;
        rec.channel = Some(channel.clone());
        rec.remote = channel.remote();
        rec.last_active_at = now;
        info!(session = %session, login = %rec.login, remote = %channel.remote(), "Session resumed");
        Ok(rec.login.clone())
    }

    /// A channel bound to `session` went away.
    ///
    /// Ignored unless `channel` is still the one bound to the record.
    pub fn closed(&self, channel: ChannelId, session: &SessionIdentifier, terminated_explicitly: bool) {
        let Some(record) = self.record(session) else {
            return;
        };
        let mut rec = record.lock();
        if rec.channel.as_ref().map(ChannelHandle::id) != Some(channel) {
            debug!(session = %session, channel = %channel, "Close from a channel no longer bound");
            return;
        }

        if terminated_explicitly || rec.state != RecordState::Active {
            rec.state = RecordState::Terminated;
            let login = rec.login.clone();
            drop(rec);
            self.drop_record(session);
            if terminated_explicitly {
                info!(session = %session, login = %login, "Signed off");
            }
            return;
        }

        rec.state = RecordState::DisconnectedReusable;
        rec.channel = None;
        rec.last_active_at = Instant::now();
        info!(session = %session, login = %rec.login, "Session disconnected, reusable");
    }

    /// A channel went away while a signon on it was still in flight.
    ///
    /// Whatever record that signon left bound to `channel` is closed as if the
    /// session had been active on it.
    pub fn release_channel(&self, channel: ChannelId) {
        let records: Vec<RecordRef> = self.sessions.iter().map(|e| Arc::clone(e.value())).collect();
        for record in records {
            let session = {
                let rec = record.lock();
                if rec.channel.as_ref().map(ChannelHandle::id) != Some(channel) {
                    continue;
                }
                rec.session.clone()
            };
            debug!(session = %session, channel = %channel, "Releasing record of an abandoned signon");
            self.closed(channel, &session, false);
        }
    }

    /// Destroy a session and disconnect its channel.
    pub fn kickout(&self, session: &SessionIdentifier) -> bool {
        let Some(record) = self.record(session) else {
            return false;
        };
        record.lock().state = RecordState::Terminated;
        if let Some(channel) = self.drop_record(session) {
            channel.kick();
        }
        crate::metrics::record_kickout();
        info!(session = %session, "Session kicked out");
        true
    }

    /// Kick out every session. Returns how many there were.
    pub fn kickout_all(&self) -> usize {
        let ids: Vec<SessionIdentifier> = self.sessions.iter().map(|e| e.key().clone()).collect();
        ids.iter().filter(|id| self.kickout(id)).count()
    }

    /// Terminate records past the inactivity window.
    ///
    /// Covers disconnected sessions and signons stuck in a pending state. An
    /// ACTIVE record whose channel is gone starts its inactivity window here.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let limit = self.inactivity_maximum();
        let records: Vec<RecordRef> = self.sessions.iter().map(|e| Arc::clone(e.value())).collect();

        let mut expired = Vec::new();
        for record in records {
            let mut rec = record.lock();
            let stale = match rec.state {
                RecordState::DisconnectedReusable => {
                    now.saturating_duration_since(rec.last_active_at) > limit
                }
                ref state if state.is_pending() => {
                    now.saturating_duration_since(rec.created_at) > limit
                }
                RecordState::Terminated => true,
                RecordState::Active if rec.channel.as_ref().is_none_or(ChannelHandle::is_closed) => {
                    rec.state = RecordState::DisconnectedReusable;
                    rec.channel = None;
                    rec.last_active_at = now;
                    info!(session = %rec.session, login = %rec.login, "Active session lost its channel, reusable");
                    false
                }
                _ => false,
            };
            if stale {
                rec.state = RecordState::Terminated;
                expired.push(rec.session.clone());
            }
        }

        for session in &expired {
            if let Some(channel) = self.drop_record(session) {
                channel.kick();
            }
            debug!(session = %session, "Session expired");
        }
        crate::metrics::record_expired(expired.len());
        expired.len()
    }

    /// Remove a record from every index. Returns the channel it was bound to.
    ///
    /// Must not be called while holding the record's mutex.
    fn drop_record(&self, session: &SessionIdentifier) -> Option<ChannelHandle> {
        let (_, record) = self.sessions.remove(session)?;
        let (login, channel, token) = {
            let mut rec = record.lock();
            let token = match std::mem::replace(&mut rec.state, RecordState::Terminated) {
                RecordState::PendingSecondary { token } => Some(token),
                _ => None,
            };
            (rec.login.clone(), rec.channel.take(), token)
        };
        self.logins.remove_if(&login, |_, owner| owner == session);
        if let Some(token) = token {
            self.challenges.remove(&token);
        }
        channel
    }

    pub fn state_of(&self, session: &SessionIdentifier) -> Option<RecordState> {
        self.record(session).map(|r| r.lock().state.clone())
    }

    pub fn session_for_login(&self, login: &str) -> Option<SessionIdentifier> {
        self.logins.get(login).map(|s| s.value().clone())
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn sessions(&self) -> Vec<SessionSummary> {
        let now = Instant::now();
        let records: Vec<RecordRef> = self.sessions.iter().map(|e| Arc::clone(e.value())).collect();
        let mut summaries: Vec<SessionSummary> = records
            .iter()
            .map(|record| {
                let rec = record.lock();
                SessionSummary {
                    session: rec.session.to_string(),
                    login: rec.login.clone(),
                    state: rec.state.as_str(),
                    remote: rec.remote.to_string(),
                    bound: rec.channel.is_some(),
                    idle_ms: now.saturating_duration_since(rec.last_active_at).as_millis() as u64,
                    created_at: rec.created_wall,
                }
            })
            .collect();
        summaries.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        summaries
    }

    /// Record count per state label.
    pub fn count_by_state(&self) -> BTreeMap<&'static str, usize> {
        let mut counts = BTreeMap::new();
        for summary in self.sessions() {
            *counts.entry(summary.state).or_insert(0) += 1;
        }
        counts
    }
}
