//! Session state shared by the reducer and the command gateway.
//!
//! A [`SessionState`] is owned by exactly one writer (the session task) and
//! published to readers as clones. It is rebuilt from scratch whenever the
//! client lands on a different server.

use huddle_shared::constants::LOBBY_CHANNEL;
use huddle_shared::types::{ChannelId, SessionId};

use crate::config::ClientConfig;
use crate::connection::ConnectionController;
use crate::store::EntityStore;

/// Authoritative snapshot of one connection session.
#[derive(Debug, Clone)]
pub struct SessionState {
    /// Fresh for every reconstructed store; carried in log spans.
    pub session_id: SessionId,

    /// Users, channels, chat and media entities.
    pub store: EntityStore,

    /// Server, voice and reconnect axes. Survives store rebuilds.
    pub connection: ConnectionController,

    /// Channel the UI is currently showing. Supplied from outside and used
    /// for unread accounting and typing visibility.
    pub viewing: ChannelId,

    config: ClientConfig,
}

impl SessionState {
    /// Create a new, empty session state.
    pub fn new(config: ClientConfig) -> Self {
        Self {
            session_id: SessionId::new(),
            store: EntityStore::new(config.max_messages_per_channel),
            connection: ConnectionController::new(),
            viewing: LOBBY_CHANNEL,
            config,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Switch the viewed channel and clear its unread counter.
    pub fn view_channel(&mut self, channel: ChannelId) {
        self.viewing = channel;
        self.store.reset_unread(channel);
    }

    /// Tear down the entity store for a new server. Connection axes are kept
    /// since they describe the link, not the server's contents.
    pub fn reset_session(&mut self) {
        self.session_id = SessionId::new();
        self.store = EntityStore::new(self.config.max_messages_per_channel);
        self.viewing = LOBBY_CHANNEL;
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new(ClientConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_view_channel_resets_unread() {
        let mut state = SessionState::default();
        state.store.increment_unread(ChannelId(4));
        state.view_channel(ChannelId(4));
        assert_eq!(state.viewing, ChannelId(4));
        assert_eq!(state.store.unread(ChannelId(4)), 0);
    }

    #[test]
    fn test_reset_session_mints_new_id() {
        let mut state = SessionState::default();
        let before = state.session_id;
        state.store.increment_unread(ChannelId(1));
        state.view_channel(ChannelId(2));
        state.reset_session();

        assert_ne!(state.session_id, before);
        assert_eq!(state.store.unread(ChannelId(1)), 0);
        assert_eq!(state.viewing, LOBBY_CHANNEL);
    }
}
