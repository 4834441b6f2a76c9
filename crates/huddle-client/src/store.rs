//! Entity store: users, channels, membership, chat, typing, video,
//! recording and unread counters for one connection session.
//!
//! All mutators are synchronous and total. Unknown ids and repeated
//! idempotent operations degrade to no-ops; nothing here can fail.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use huddle_shared::constants::{LOBBY_CHANNEL, LOBBY_NAME};
use huddle_shared::protocol::{
    ChannelInfo, ChatRecord, LinkPreview, RosterEntry, VideoLayer,
};
use huddle_shared::types::{ChannelId, MessageId, UserId};

use crate::messages::{ChatHistory, CreateOutcome};

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub role: Option<String>,
}

impl From<&RosterEntry> for User {
    fn from(entry: &RosterEntry) -> Self {
        Self {
            id: entry.id,
            username: entry.username.clone(),
            role: entry.role.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Channel {
    pub id: ChannelId,
    pub name: String,
}

impl From<ChannelInfo> for Channel {
    fn from(info: ChannelInfo) -> Self {
        Self {
            id: info.id,
            name: info.name,
        }
    }
}

/// Transient typing indicator; visibility is `now < expires_at`.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct TypingEntry {
    pub user_id: UserId,
    pub username: String,
    pub channel_id: ChannelId,
    pub expires_at: DateTime<Utc>,
}

/// Present only while the user's video is active.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct VideoState {
    pub screen_share: bool,
    pub layers: Vec<VideoLayer>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RecordingState {
    pub recording: bool,
    pub started_by: String,
}

/// Server-level metadata delivered outside the roster.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct ServerMeta {
    pub name: Option<String>,
    pub owner_id: Option<UserId>,
    pub local_user_id: Option<UserId>,
}

#[derive(Debug, Clone, Default)]
pub struct EntityStore {
    users: Vec<User>,
    channels: Vec<Channel>,
    membership: HashMap<UserId, ChannelId>,
    chat: ChatHistory,
    typing: HashMap<UserId, TypingEntry>,
    video: BTreeMap<UserId, VideoState>,
    recording: BTreeMap<ChannelId, RecordingState>,
    unread: BTreeMap<ChannelId, u32>,
    server: ServerMeta,
}

impl EntityStore {
    pub fn new(max_messages_per_channel: Option<usize>) -> Self {
        Self {
            chat: ChatHistory::new(max_messages_per_channel),
            ..Self::default()
        }
    }

    // -- Users and membership ---------------------------------------------

    /// Replace the roster. Membership is only written for entries that
    /// carry a channel; ids absent from the list keep their mapping.
    pub fn replace_users(&mut self, entries: &[RosterEntry]) {
        self.users = entries.iter().map(User::from).collect();
        for entry in entries {
            if let Some(channel) = entry.channel_id {
                self.membership.insert(entry.id, channel);
            }
        }
    }

    pub fn upsert_user(&mut self, entry: &RosterEntry) {
        let user = User::from(entry);
        match self.users.iter_mut().find(|u| u.id == entry.id) {
            Some(existing) => *existing = user,
            None => self.users.push(user),
        }
        if let Some(channel) = entry.channel_id {
            self.membership.insert(entry.id, channel);
        }
    }

    pub fn remove_user(&mut self, id: UserId) {
        let before = self.users.len();
        self.users.retain(|u| u.id != id);
        self.membership.remove(&id);
        if self.users.len() == before {
            debug!(user = %id, "Leave for unknown user ignored");
        }
    }

    pub fn rename_user(&mut self, id: UserId, username: &str) {
        match self.users.iter_mut().find(|u| u.id == id) {
            Some(user) => user.username = username.to_string(),
            None => debug!(user = %id, "Rename for unknown user ignored"),
        }
    }

    pub fn move_user(&mut self, id: UserId, channel: ChannelId) {
        self.membership.insert(id, channel);
    }

    /// Channel the user is in; unmapped users are in the lobby.
    pub fn channel_of(&self, id: UserId) -> ChannelId {
        self.membership.get(&id).copied().unwrap_or(LOBBY_CHANNEL)
    }

    pub fn users(&self) -> &[User] {
        &self.users
    }

    pub fn user(&self, id: UserId) -> Option<&User> {
        self.users.iter().find(|u| u.id == id)
    }

    /// Users currently mapped to `channel`.
    pub fn members_of(&self, channel: ChannelId) -> Vec<&User> {
        self.users
            .iter()
            .filter(|u| self.channel_of(u.id) == channel)
            .collect()
    }

    // -- Channels ---------------------------------------------------------

    pub fn replace_channels(&mut self, channels: Vec<ChannelInfo>) {
        self.channels = channels.into_iter().map(Channel::from).collect();
    }

    /// The channel list with the lobby first, synthesized when missing.
    pub fn channels(&self) -> Vec<Channel> {
        let mut out = Vec::with_capacity(self.channels.len() + 1);
        if !self.channels.iter().any(|c| c.id.is_lobby()) {
            out.push(Channel {
                id: LOBBY_CHANNEL,
                name: LOBBY_NAME.to_string(),
            });
        }
        out.extend(self.channels.iter().cloned());
        out
    }

    pub fn channel(&self, id: ChannelId) -> Option<Channel> {
        self.channels.iter().find(|c| c.id == id).cloned().or_else(|| {
            id.is_lobby().then(|| Channel {
                id,
                name: LOBBY_NAME.to_string(),
            })
        })
    }

    // -- Chat -------------------------------------------------------------

    pub fn apply_chat_create(&mut self, record: ChatRecord) -> CreateOutcome {
        self.chat.create(record)
    }

    pub fn apply_chat_edit(&mut self, msg_id: MessageId, text: &str, edited_at: DateTime<Utc>) {
        if !self.chat.edit(msg_id, text, edited_at) {
            debug!(msg = %msg_id, "Edit for unknown message dropped");
        }
    }

    pub fn apply_chat_delete(&mut self, msg_id: MessageId) {
        if !self.chat.delete(msg_id) {
            debug!(msg = %msg_id, "Delete for unknown message dropped");
        }
    }

    pub fn apply_reaction_added(&mut self, msg_id: MessageId, emoji: &str, user: UserId) {
        self.chat.add_reaction(msg_id, emoji, user);
    }

    pub fn apply_reaction_removed(&mut self, msg_id: MessageId, emoji: &str, user: UserId) {
        self.chat.remove_reaction(msg_id, emoji, user);
    }

    pub fn apply_pin(&mut self, msg_id: MessageId, pinned: bool) {
        if !self.chat.set_pinned(msg_id, pinned) {
            debug!(msg = %msg_id, pinned, "Pin change for unknown message dropped");
        }
    }

    pub fn apply_link_preview(&mut self, msg_id: MessageId, preview: LinkPreview) {
        self.chat.set_preview(msg_id, preview);
    }

    pub fn chat(&self) -> &ChatHistory {
        &self.chat
    }

    // -- Typing -----------------------------------------------------------

    /// Unconditional replace. Self-filtering happens in the reducer.
    pub fn upsert_typing(
        &mut self,
        user_id: UserId,
        username: &str,
        channel_id: ChannelId,
        expires_at: DateTime<Utc>,
    ) {
        self.typing.insert(
            user_id,
            TypingEntry {
                user_id,
                username: username.to_string(),
                channel_id,
                expires_at,
            },
        );
    }

    pub fn typing(&self) -> impl Iterator<Item = &TypingEntry> {
        self.typing.values()
    }

    // -- Video / recording ------------------------------------------------

    /// Inactive video removes the entry; active video upserts it, keeping
    /// the known layers unless new ones are supplied.
    pub fn set_video_state(
        &mut self,
        user_id: UserId,
        active: bool,
        screen_share: bool,
        layers: Option<Vec<VideoLayer>>,
    ) {
        if !active {
            self.video.remove(&user_id);
            return;
        }

        let entry = self.video.entry(user_id).or_insert_with(|| VideoState {
            screen_share,
            layers: Vec::new(),
        });
        entry.screen_share = screen_share;
        if let Some(layers) = layers {
            entry.layers = layers;
        }
    }

    pub fn set_video_layers(&mut self, user_id: UserId, layers: Vec<VideoLayer>) {
        match self.video.get_mut(&user_id) {
            Some(state) => state.layers = layers,
            None => debug!(user = %user_id, "Layers for inactive video dropped"),
        }
    }

    pub fn video(&self, user_id: UserId) -> Option<&VideoState> {
        self.video.get(&user_id)
    }

    pub fn video_states(&self) -> &BTreeMap<UserId, VideoState> {
        &self.video
    }

    /// Recording entries, like video, exist only while true.
    pub fn set_recording(&mut self, channel_id: ChannelId, recording: bool, started_by: &str) {
        if !recording {
            self.recording.remove(&channel_id);
            return;
        }
        self.recording.insert(
            channel_id,
            RecordingState {
                recording,
                started_by: started_by.to_string(),
            },
        );
    }

    pub fn recording(&self, channel_id: ChannelId) -> Option<&RecordingState> {
        self.recording.get(&channel_id)
    }

    pub fn recording_states(&self) -> &BTreeMap<ChannelId, RecordingState> {
        &self.recording
    }

    // -- Unread -----------------------------------------------------------

    pub fn increment_unread(&mut self, channel_id: ChannelId) {
        *self.unread.entry(channel_id).or_insert(0) += 1;
    }

    pub fn reset_unread(&mut self, channel_id: ChannelId) {
        self.unread.remove(&channel_id);
    }

    pub fn unread(&self, channel_id: ChannelId) -> u32 {
        self.unread.get(&channel_id).copied().unwrap_or(0)
    }

    pub fn unread_counts(&self) -> &BTreeMap<ChannelId, u32> {
        &self.unread
    }

    // -- Server meta ------------------------------------------------------

    pub fn set_server_name(&mut self, name: &str) {
        self.server.name = Some(name.to_string());
    }

    pub fn set_owner(&mut self, owner_id: UserId) {
        self.server.owner_id = Some(owner_id);
    }

    pub fn set_local_user(&mut self, user_id: UserId) {
        self.server.local_user_id = Some(user_id);
    }

    pub fn local_user(&self) -> Option<UserId> {
        self.server.local_user_id
    }

    pub fn server(&self) -> &ServerMeta {
        &self.server
    }
}
