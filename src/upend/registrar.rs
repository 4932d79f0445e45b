//! Session identifier to live channel routing.

use crate::upend::channel::{ChannelHandle, ChannelId, Outbound};
use dashmap::DashMap;
use tether_proto::SessionIdentifier;

/// Routes application messages to whichever channel currently carries a
/// session.
#[derive(Debug, Default)]
pub struct ChannelRegistrar {
    channels: DashMap<SessionIdentifier, ChannelHandle>,
}

impl ChannelRegistrar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `session` to `channel`, replacing any previous binding.
    pub fn register(&self, session: SessionIdentifier, channel: ChannelHandle) {
        self.channels.insert(session, channel);
    }

    /// Remove the binding, but only if it still points at `channel`.
    pub fn unregister(&self, session: &SessionIdentifier, channel: ChannelId) -> bool {
        self.channels
            .remove_if(session, |_, bound| bound.id() == channel)
            .is_some()
    }

    pub fn channel_for(&self, session: &SessionIdentifier) -> Option<ChannelHandle> {
        self.channels.get(session).map(|c| c.value().clone())
    }

    /// Queue an application message for `session`.
    pub fn send_to(&self, session: &SessionIdentifier, text: impl Into<String>) -> bool {
        match self.channel_for(session) {
            Some(channel) => channel.try_send(Outbound::Application(text.into())),
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}
