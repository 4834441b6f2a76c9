//! Read-time projection of a session for the presentation layer.
//!
//! Time-bounded entries (typing indicators, reconnect countdown) are
//! evaluated against an explicit `now`; nothing here mutates the state.
//! Expired typing entries stay in the store and are simply never shown.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use huddle_shared::types::{ChannelId, UserId};

use crate::connection::{ReconnectPhase, ServerLink, VoiceLink};
use crate::messages::ChatMessage;
use crate::state::SessionState;
use crate::store::{Channel, RecordingState, ServerMeta, TypingEntry, VideoState};

/// Typing entries visible at `now` in the viewed channel, sorted by name.
pub fn visible_typing(state: &SessionState, now: DateTime<Utc>) -> Vec<TypingEntry> {
    let local = state.store.local_user();
    let mut visible: Vec<TypingEntry> = state
        .store
        .typing()
        .filter(|t| now < t.expires_at)
        .filter(|t| t.channel_id == state.viewing)
        .filter(|t| Some(t.user_id) != local)
        .cloned()
        .collect();
    visible.sort_by(|a, b| a.username.cmp(&b.username).then(a.user_id.cmp(&b.user_id)));
    visible
}

/// Whole seconds until the scheduled reconnect fires, rounded up.
/// `None` unless a retry is pending.
pub fn reconnect_countdown(state: &SessionState, now: DateTime<Utc>) -> Option<u64> {
    let ReconnectPhase::Retrying { retry_at } = state.connection.reconnect().phase else {
        return None;
    };
    let remaining_ms = (retry_at - now).num_milliseconds().max(0) as u64;
    Some(remaining_ms.div_ceil(1000))
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ProjectedUser {
    pub id: UserId,
    pub username: String,
    pub role: Option<String>,
    pub channel_id: ChannelId,
    pub is_owner: bool,
    pub video: Option<VideoState>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ConnectionView {
    pub server: ServerLink,
    pub connected: bool,
    pub connected_addr: Option<String>,
    pub pending_addr: Option<String>,
    pub connect_error: Option<String>,
    pub voice: VoiceLink,
    pub voice_connected: bool,
    pub reconnecting: bool,
    pub reconnect_attempt: u32,
    pub seconds_until_retry: Option<u64>,
    pub reconnect_reason: Option<String>,
}

/// Everything the UI renders, computed for one instant.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ProjectedState {
    pub server: ServerMeta,
    pub viewing: ChannelId,
    pub users: Vec<ProjectedUser>,
    pub channels: Vec<Channel>,
    pub messages: BTreeMap<ChannelId, Vec<ChatMessage>>,
    pub unread: BTreeMap<ChannelId, u32>,
    pub typing: Vec<TypingEntry>,
    /// Every active video, including users not yet in the roster.
    pub video: BTreeMap<UserId, VideoState>,
    pub recording: BTreeMap<ChannelId, RecordingState>,
    pub connection: ConnectionView,
}

pub fn project(state: &SessionState, now: DateTime<Utc>) -> ProjectedState {
    let store = &state.store;
    let conn = &state.connection;
    let owner = store.server().owner_id;

    let users = store
        .users()
        .iter()
        .map(|u| ProjectedUser {
            id: u.id,
            username: u.username.clone(),
            role: u.role.clone(),
            channel_id: store.channel_of(u.id),
            is_owner: owner == Some(u.id),
            video: store.video(u.id).cloned(),
        })
        .collect();

    let messages = store
        .chat()
        .channels()
        .map(|(channel, msgs)| (*channel, msgs.clone()))
        .collect();

    let reconnect = conn.reconnect();
    let connection = ConnectionView {
        server: conn.server(),
        connected: conn.connected(),
        connected_addr: conn.connected_addr().map(str::to_string),
        pending_addr: conn.pending_addr().map(str::to_string),
        connect_error: conn.connect_error().map(str::to_string),
        voice: conn.voice(),
        voice_connected: conn.voice_connected(),
        reconnecting: reconnect.is_active(),
        reconnect_attempt: reconnect.attempt,
        seconds_until_retry: reconnect_countdown(state, now),
        reconnect_reason: reconnect.reason.clone(),
    };

    ProjectedState {
        server: store.server().clone(),
        viewing: state.viewing,
        users,
        channels: store.channels(),
        messages,
        unread: store.unread_counts().clone(),
        typing: visible_typing(state, now),
        video: store.video_states().clone(),
        recording: store.recording_states().clone(),
        connection,
    }
}
