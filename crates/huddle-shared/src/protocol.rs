use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::types::{ChannelId, MessageId, UserId};

/// Every event the backend pushes over the ordered event channel.
///
/// Payloads arrive already decoded; the JSON helpers below exist for event
/// logs and tests, not as a wire codec.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload", rename_all = "kebab-case")]
pub enum InboundEvent {
    /// Full roster replacement
    RosterReplace { users: Vec<RosterEntry> },

    /// A single user appeared
    RosterJoined(RosterEntry),

    RosterLeft { user_id: UserId },

    RosterRenamed { user_id: UserId, username: String },

    /// Server display name
    ServerInfo { name: String },

    OwnerChanged { owner_id: UserId },

    /// The id the server assigned to the local user
    SelfIdentified { user_id: UserId },

    ChatCreated(ChatRecord),

    ChatEdited {
        msg_id: MessageId,
        text: String,
        edited_at: DateTime<Utc>,
    },

    ChatDeleted { msg_id: MessageId },

    ChatReactionAdded {
        msg_id: MessageId,
        emoji: String,
        user_id: UserId,
    },

    ChatReactionRemoved {
        msg_id: MessageId,
        emoji: String,
        user_id: UserId,
    },

    ChatPinned { msg_id: MessageId },

    ChatUnpinned { msg_id: MessageId },

    /// Link preview resolved after the message was created
    ChatLinkPreview {
        msg_id: MessageId,
        preview: LinkPreview,
    },

    /// Full channel list replacement
    ChannelList { channels: Vec<ChannelInfo> },

    ChannelMemberMoved {
        user_id: UserId,
        channel_id: ChannelId,
    },

    /// A user is typing; `at` is when the signal was observed
    TypingSignal {
        user_id: UserId,
        username: String,
        channel_id: ChannelId,
        at: DateTime<Utc>,
    },

    VideoState {
        user_id: UserId,
        active: bool,
        #[serde(default)]
        screen_share: bool,
        #[serde(default)]
        layers: Option<Vec<VideoLayer>>,
    },

    /// Simulcast layer update for an already active video
    VideoLayers {
        user_id: UserId,
        layers: Vec<VideoLayer>,
    },

    RecordingState {
        channel_id: ChannelId,
        recording: bool,
        #[serde(default)]
        started_by: String,
    },

    /// The server owner removed the local user
    Kicked {
        #[serde(default)]
        reason: Option<String>,
    },

    /// Transport lost the server connection
    ConnectionLost { reason: String },

    /// The backend will retry `attempt` at `retry_at`
    ReconnectScheduled {
        attempt: u32,
        retry_at: DateTime<Utc>,
        reason: String,
    },

    Reconnected { addr: String },
}

impl InboundEvent {
    /// Stable tag, identical to the serialized `type` field.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::RosterReplace { .. } => "roster-replace",
            Self::RosterJoined(_) => "roster-joined",
            Self::RosterLeft { .. } => "roster-left",
            Self::RosterRenamed { .. } => "roster-renamed",
            Self::ServerInfo { .. } => "server-info",
            Self::OwnerChanged { .. } => "owner-changed",
            Self::SelfIdentified { .. } => "self-identified",
            Self::ChatCreated(_) => "chat-created",
            Self::ChatEdited { .. } => "chat-edited",
            Self::ChatDeleted { .. } => "chat-deleted",
            Self::ChatReactionAdded { .. } => "chat-reaction-added",
            Self::ChatReactionRemoved { .. } => "chat-reaction-removed",
            Self::ChatPinned { .. } => "chat-pinned",
            Self::ChatUnpinned { .. } => "chat-unpinned",
            Self::ChatLinkPreview { .. } => "chat-link-preview",
            Self::ChannelList { .. } => "channel-list",
            Self::ChannelMemberMoved { .. } => "channel-member-moved",
            Self::TypingSignal { .. } => "typing-signal",
            Self::VideoState { .. } => "video-state",
            Self::VideoLayers { .. } => "video-layers",
            Self::RecordingState { .. } => "recording-state",
            Self::Kicked { .. } => "kicked",
            Self::ConnectionLost { .. } => "connection-lost",
            Self::ReconnectScheduled { .. } => "reconnect-scheduled",
            Self::Reconnected { .. } => "reconnected",
        }
    }

    /// Decode one event from a JSON line
    pub fn from_json(line: &str) -> Result<Self, ProtocolError> {
        let line = line.trim();
        if line.is_empty() {
            return Err(ProtocolError::EmptyLine);
        }
        Ok(serde_json::from_str(line)?)
    }

    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Roster entry as delivered by `roster-replace` / `roster-joined`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RosterEntry {
    pub id: UserId,
    pub username: String,
    #[serde(default)]
    pub role: Option<String>,
    /// Current channel; `None` leaves membership to `channel-member-moved`
    #[serde(default)]
    pub channel_id: Option<ChannelId>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChannelInfo {
    pub id: ChannelId,
    pub name: String,
}

/// A chat message as created by the server
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatRecord {
    pub msg_id: MessageId,
    pub sender_id: UserId,
    pub username: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    pub channel_id: ChannelId,
    #[serde(default)]
    pub mentions: BTreeSet<UserId>,
    #[serde(default)]
    pub attachment: Option<Attachment>,
    #[serde(default)]
    pub preview: Option<LinkPreview>,
    #[serde(default)]
    pub reply_to: Option<ReplyRef>,
    /// Narration line (join/leave notices etc.), not authored chat
    #[serde(default)]
    pub system: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Attachment {
    pub url: String,
    pub name: String,
    pub size: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LinkPreview {
    pub url: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
}

/// Quoted parent of a reply
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReplyRef {
    pub msg_id: MessageId,
    pub username: String,
    pub snippet: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VideoLayer {
    pub quality: String,
    pub width: u32,
    pub height: u32,
    pub bitrate: u32,
}

// ---------------------------------------------------------------------------
// Outbound commands
// ---------------------------------------------------------------------------

/// User-initiated actions sent to the backend
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload", rename_all = "kebab-case")]
pub enum Command {
    Connect { addr: String, username: String },
    Disconnect,
    JoinVoice { channel_id: ChannelId },
    LeaveVoice,
    SendChat {
        channel_id: ChannelId,
        text: String,
        #[serde(default)]
        reply_to: Option<MessageId>,
    },
    EditMessage { msg_id: MessageId, text: String },
    DeleteMessage { msg_id: MessageId },
    AddReaction { msg_id: MessageId, emoji: String },
    RemoveReaction { msg_id: MessageId, emoji: String },
    KickUser { user_id: UserId },
    CreateChannel { name: String },
    MoveUser { user_id: UserId, channel_id: ChannelId },
}

/// How a command's local effect relates to its asynchronous result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailurePolicy {
    /// Prior state is kept while in flight and restored on failure
    RollbackOnFailure,
    /// The local effect is committed up front and never undone
    CommitLocally,
    /// No local effect; a failure only surfaces its reason
    SurfaceOnly,
}

impl Command {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connect { .. } => "connect",
            Self::Disconnect => "disconnect",
            Self::JoinVoice { .. } => "join-voice",
            Self::LeaveVoice => "leave-voice",
            Self::SendChat { .. } => "send-chat",
            Self::EditMessage { .. } => "edit-message",
            Self::DeleteMessage { .. } => "delete-message",
            Self::AddReaction { .. } => "add-reaction",
            Self::RemoveReaction { .. } => "remove-reaction",
            Self::KickUser { .. } => "kick-user",
            Self::CreateChannel { .. } => "create-channel",
            Self::MoveUser { .. } => "move-user",
        }
    }

    pub fn failure_policy(&self) -> FailurePolicy {
        match self {
            Self::Connect { .. } | Self::JoinVoice { .. } => FailurePolicy::RollbackOnFailure,
            Self::LeaveVoice | Self::Disconnect => FailurePolicy::CommitLocally,
            _ => FailurePolicy::SurfaceOnly,
        }
    }
}

/// Result of an outbound command: empty on success, otherwise a
/// human-readable failure reason.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct CommandResult(pub String);

impl CommandResult {
    pub fn ok() -> Self {
        Self(String::new())
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }

    pub fn is_success(&self) -> bool {
        self.0.is_empty()
    }

    pub fn error(&self) -> Option<&str> {
        if self.0.is_empty() {
            None
        } else {
            Some(&self.0)
        }
    }
}

impl From<String> for CommandResult {
    fn from(value: String) -> Self {
        Self(value)
    }
}
