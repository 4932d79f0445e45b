//! Application traffic handler.

use crate::upend::channel::{ChannelHandle, Outbound};
use async_trait::async_trait;
use tether_proto::SessionIdentifier;

/// Receives the application frames a gate lets through.
///
/// `session` is `None` only when the Upend does not require signon.
#[async_trait]
pub trait Application: Send + Sync {
    async fn on_message(&self, session: Option<&SessionIdentifier>, channel: &ChannelHandle, text: String);
}

/// Sends every frame back where it came from.
#[derive(Clone, Copy, Debug, Default)]
pub struct EchoApplication;

#[async_trait]
impl Application for EchoApplication {
    async fn on_message(&self, session: Option<&SessionIdentifier>, channel: &ChannelHandle, text: String) {
        if !channel.try_send(Outbound::Application(text)) {
            tracing::debug!(session = ?session.map(SessionIdentifier::as_str), "Echo dropped, queue full");
        }
    }
}
