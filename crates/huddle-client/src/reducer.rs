//! Inbound event dispatch.
//!
//! Events are applied one at a time, in arrival order, each mapping to a
//! single store or connection mutation. Nothing in here reads the wall
//! clock or returns an error: events referencing unknown ids are dropped.

use chrono::{DateTime, Utc};
use tracing::{debug, trace};

use huddle_shared::protocol::InboundEvent;

use crate::config::ClientConfig;
use crate::messages::CreateOutcome;
use crate::state::SessionState;

/// Owns the session state and folds events into it.
#[derive(Debug, Clone, Default)]
pub struct EventReducer {
    state: SessionState,
}

impl EventReducer {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            state: SessionState::new(config),
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut SessionState {
        &mut self.state
    }

    pub fn apply_all<I>(&mut self, events: I)
    where
        I: IntoIterator<Item = InboundEvent>,
    {
        for event in events {
            self.apply(event);
        }
    }

    pub fn apply(&mut self, event: InboundEvent) {
        trace!(tag = event.tag(), "Applying event");
        let state = &mut self.state;
        let typing_ttl = state.config().typing_ttl_chrono();
        let store = &mut state.store;

        match event {
            InboundEvent::RosterReplace { users } => store.replace_users(&users),
            InboundEvent::RosterJoined(entry) => store.upsert_user(&entry),
            InboundEvent::RosterLeft { user_id } => store.remove_user(user_id),
            InboundEvent::RosterRenamed { user_id, username } => {
                store.rename_user(user_id, &username)
            }
            InboundEvent::ServerInfo { name } => store.set_server_name(&name),
            InboundEvent::OwnerChanged { owner_id } => store.set_owner(owner_id),
            InboundEvent::SelfIdentified { user_id } => store.set_local_user(user_id),

            InboundEvent::ChatCreated(record) => {
                let channel = record.channel_id;
                let outcome = store.apply_chat_create(record);
                if outcome == CreateOutcome::Appended && channel != state.viewing {
                    store.increment_unread(channel);
                }
            }
            InboundEvent::ChatEdited {
                msg_id,
                text,
                edited_at,
            } => store.apply_chat_edit(msg_id, &text, edited_at),
            InboundEvent::ChatDeleted { msg_id } => store.apply_chat_delete(msg_id),
            InboundEvent::ChatReactionAdded {
                msg_id,
                emoji,
                user_id,
            } => store.apply_reaction_added(msg_id, &emoji, user_id),
            InboundEvent::ChatReactionRemoved {
                msg_id,
                emoji,
                user_id,
            } => store.apply_reaction_removed(msg_id, &emoji, user_id),
            InboundEvent::ChatPinned { msg_id } => store.apply_pin(msg_id, true),
            InboundEvent::ChatUnpinned { msg_id } => store.apply_pin(msg_id, false),
            InboundEvent::ChatLinkPreview { msg_id, preview } => {
                store.apply_link_preview(msg_id, preview)
            }

            InboundEvent::ChannelList { channels } => store.replace_channels(channels),
            InboundEvent::ChannelMemberMoved {
                user_id,
                channel_id,
            } => store.move_user(user_id, channel_id),

            InboundEvent::TypingSignal {
                user_id,
                username,
                channel_id,
                at,
            } => {
                if store.local_user() == Some(user_id) {
                    debug!(user = %user_id, "Own typing signal dropped");
                    return;
                }
                let expires_at = at
                    .checked_add_signed(typing_ttl)
                    .unwrap_or(DateTime::<Utc>::MAX_UTC);
                store.upsert_typing(user_id, &username, channel_id, expires_at);
            }

            InboundEvent::VideoState {
                user_id,
                active,
                screen_share,
                layers,
            } => store.set_video_state(user_id, active, screen_share, layers),
            InboundEvent::VideoLayers { user_id, layers } => {
                store.set_video_layers(user_id, layers)
            }
            InboundEvent::RecordingState {
                channel_id,
                recording,
                started_by,
            } => store.set_recording(channel_id, recording, &started_by),

            InboundEvent::Kicked { reason } => {
                debug!(reason = reason.as_deref().unwrap_or(""), "Kick received");
                state.connection.kicked();
            }
            InboundEvent::ConnectionLost { reason } => state.connection.connection_lost(&reason),
            InboundEvent::ReconnectScheduled {
                attempt,
                retry_at,
                reason,
            } => state.connection.reconnect_scheduled(attempt, retry_at, &reason),
            InboundEvent::Reconnected { addr } => state.connection.reconnected(&addr),
        }
    }
}
