//! Session expiry background task.
//!
//! Periodically terminates sessions that stayed disconnected (or stuck in a
//! pending signon) past the inactivity window, and refreshes the session
//! gauges.

use crate::upend::registry::SessionRegistry;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Spawn the sweeper. It runs every `interval` until `shutdown` fires.
pub fn spawn_expiry_task(
    registry: Arc<SessionRegistry>,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("Expiry task stopping");
                    break;
                }
                _ = ticker.tick() => sweep_once(&registry),
            }
        }
    })
}

fn sweep_once(registry: &SessionRegistry) {
    let expired = registry.sweep_expired();
    if expired > 0 {
        info!(expired, "Expired inactive sessions");
    }
    crate::metrics::set_sessions_by_state(&registry.count_by_state());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upend::authenticator::{PrimaryAuthenticator, PrimaryVerdict, StaticSecondaryCodes};
    use crate::upend::channel::ChannelHandle;
    use crate::upend::registry::SignonOutcome;
    use async_trait::async_trait;
    use tether_proto::{Secret, TimeBoundary};

    struct AcceptAll;

    #[async_trait]
    impl PrimaryAuthenticator for AcceptAll {
        async fn authenticate(&self, _: &str, _: &Secret) -> PrimaryVerdict {
            PrimaryVerdict::Accepted
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_expires_disconnected_session() {
        let registry = Arc::new(SessionRegistry::new(
            Arc::new(AcceptAll),
            Arc::new(StaticSecondaryCodes::new()),
            TimeBoundary::LENIENT,
        ));
        let (channel, _rx) = ChannelHandle::new("127.0.0.1:1".parse().unwrap(), 4);
        let SignonOutcome::Accepted { session, .. } = registry
            .attempt_primary_signon("alice".into(), Secret::new("x"), channel.clone())
            .await
            .unwrap()
        else {
            panic!("expected acceptance");
        };
        registry.closed(channel.id(), &session, false);

        let shutdown = CancellationToken::new();
        let task = spawn_expiry_task(Arc::clone(&registry), Duration::from_secs(1), shutdown.clone());

        tokio::time::sleep(Duration::from_secs(9)).await;
        assert_eq!(registry.len(), 1);
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(registry.is_empty());

        shutdown.cancel();
        task.await.unwrap();
    }
}
