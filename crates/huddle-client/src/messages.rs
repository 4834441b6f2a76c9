//! Per-channel chat history.
//!
//! Messages are kept in arrival order per channel and are never physically
//! removed by events: deletion is a soft flag. Every mutator is total, an
//! unknown message id is a no-op reported through the `bool` return.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::Serialize;

use huddle_shared::protocol::{Attachment, ChatRecord, LinkPreview, ReplyRef};
use huddle_shared::types::{ChannelId, MessageId, UserId};

/// A chat message as rendered by the UI.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ChatMessage {
    pub msg_id: MessageId,
    pub sender_id: UserId,
    pub username: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    pub channel_id: ChannelId,
    pub edited: bool,
    pub edited_timestamp: Option<DateTime<Utc>>,
    /// Soft delete: text is cleared, the record stays for the placeholder.
    pub deleted: bool,
    pub pinned: bool,
    /// emoji -> reactor ids; the displayed count is the set size.
    pub reactions: BTreeMap<String, BTreeSet<UserId>>,
    pub mentions: BTreeSet<UserId>,
    pub attachment: Option<Attachment>,
    pub preview: Option<LinkPreview>,
    pub reply_to: Option<ReplyRef>,
    pub system: bool,
}

impl ChatMessage {
    pub fn reaction_count(&self, emoji: &str) -> usize {
        self.reactions.get(emoji).map_or(0, BTreeSet::len)
    }

    pub fn mentions_user(&self, user: UserId) -> bool {
        self.mentions.contains(&user)
    }

    /// Overwrite from a redelivered create without undoing later events.
    /// Edits, deletion, pins and reactions are local history and survive.
    fn absorb_redelivery(&mut self, record: ChatRecord) {
        self.sender_id = record.sender_id;
        self.channel_id = record.channel_id;
        self.username = record.username;
        self.timestamp = record.timestamp;
        self.mentions = record.mentions;
        self.attachment = record.attachment;
        self.reply_to = record.reply_to;
        self.system = record.system;
        if record.preview.is_some() {
            self.preview = record.preview;
        }
        if !self.edited && !self.deleted {
            self.text = record.text;
        }
    }
}

impl From<ChatRecord> for ChatMessage {
    fn from(r: ChatRecord) -> Self {
        Self {
            msg_id: r.msg_id,
            sender_id: r.sender_id,
            username: r.username,
            text: r.text,
            timestamp: r.timestamp,
            channel_id: r.channel_id,
            edited: false,
            edited_timestamp: None,
            deleted: false,
            pinned: false,
            reactions: BTreeMap::new(),
            mentions: r.mentions,
            attachment: r.attachment,
            preview: r.preview,
            reply_to: r.reply_to,
            system: r.system,
        }
    }
}

/// Outcome of [`ChatHistory::create`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    Appended,
    /// The msg_id was already known; the record was refreshed in place.
    Redelivered,
}

#[derive(Debug, Clone, Default)]
pub struct ChatHistory {
    by_channel: HashMap<ChannelId, Vec<ChatMessage>>,
    index: HashMap<MessageId, ChannelId>,
    max_per_channel: Option<usize>,
}

impl ChatHistory {
    pub fn new(max_per_channel: Option<usize>) -> Self {
        Self {
            by_channel: HashMap::new(),
            index: HashMap::new(),
            max_per_channel: max_per_channel.map(|n| n.max(1)),
        }
    }

    /// Append a new message, or overwrite it when the id is known. A
    /// redelivery naming another channel moves the record there.
    pub fn create(&mut self, record: ChatRecord) -> CreateOutcome {
        let msg_id = record.msg_id;
        let channel = record.channel_id;

        if let Some(&known) = self.index.get(&msg_id) {
            if known != channel {
                self.relocate(msg_id, known, channel);
            }
            if let Some(existing) = self.find_mut(msg_id) {
                existing.absorb_redelivery(record);
            }
            return CreateOutcome::Redelivered;
        }

        self.index.insert(msg_id, channel);
        self.by_channel
            .entry(channel)
            .or_default()
            .push(ChatMessage::from(record));
        self.trim_channel(channel);
        CreateOutcome::Appended
    }

    pub fn edit(&mut self, msg_id: MessageId, text: &str, edited_at: DateTime<Utc>) -> bool {
        match self.find_mut(msg_id) {
            Some(msg) if !msg.deleted => {
                msg.text = text.to_string();
                msg.edited = true;
                msg.edited_timestamp = Some(edited_at);
                true
            }
            _ => false,
        }
    }

    pub fn delete(&mut self, msg_id: MessageId) -> bool {
        let Some(msg) = self.find_mut(msg_id) else {
            return false;
        };
        msg.deleted = true;
        msg.text.clear();
        true
    }

    /// Add `user` to the reactor set of `emoji`. Repeating is harmless.
    pub fn add_reaction(&mut self, msg_id: MessageId, emoji: &str, user: UserId) -> bool {
        let Some(msg) = self.find_mut(msg_id) else {
            return false;
        };
        msg.reactions
            .entry(emoji.to_string())
            .or_default()
            .insert(user)
    }

    /// Remove `user` from the reactor set of `emoji`; emptied buckets are pruned.
    pub fn remove_reaction(&mut self, msg_id: MessageId, emoji: &str, user: UserId) -> bool {
        let Some(msg) = self.find_mut(msg_id) else {
            return false;
        };
        let Some(reactors) = msg.reactions.get_mut(emoji) else {
            return false;
        };
        let removed = reactors.remove(&user);
        if reactors.is_empty() {
            msg.reactions.remove(emoji);
        }
        removed
    }

    pub fn set_pinned(&mut self, msg_id: MessageId, pinned: bool) -> bool {
        let Some(msg) = self.find_mut(msg_id) else {
            return false;
        };
        msg.pinned = pinned;
        true
    }

    pub fn set_preview(&mut self, msg_id: MessageId, preview: LinkPreview) -> bool {
        let Some(msg) = self.find_mut(msg_id) else {
            return false;
        };
        msg.preview = Some(preview);
        true
    }

    pub fn get(&self, msg_id: MessageId) -> Option<&ChatMessage> {
        let channel = self.index.get(&msg_id)?;
        self.by_channel
            .get(channel)?
            .iter()
            .find(|m| m.msg_id == msg_id)
    }

    /// Messages of one channel in arrival order.
    pub fn channel(&self, channel: ChannelId) -> &[ChatMessage] {
        self.by_channel
            .get(&channel)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn pinned(&self, channel: ChannelId) -> Vec<&ChatMessage> {
        self.channel(channel).iter().filter(|m| m.pinned).collect()
    }

    pub fn channels(&self) -> impl Iterator<Item = (&ChannelId, &Vec<ChatMessage>)> {
        self.by_channel.iter()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    fn find_mut(&mut self, msg_id: MessageId) -> Option<&mut ChatMessage> {
        let channel = self.index.get(&msg_id)?;
        self.by_channel
            .get_mut(channel)?
            .iter_mut()
            .find(|m| m.msg_id == msg_id)
    }

    fn relocate(&mut self, msg_id: MessageId, from: ChannelId, to: ChannelId) {
        let Some(messages) = self.by_channel.get_mut(&from) else {
            return;
        };
        let Some(pos) = messages.iter().position(|m| m.msg_id == msg_id) else {
            return;
        };
        let mut msg = messages.remove(pos);
        if messages.is_empty() {
            self.by_channel.remove(&from);
        }

        msg.channel_id = to;
        self.index.insert(msg_id, to);
        self.by_channel.entry(to).or_default().push(msg);
        self.trim_channel(to);
    }

    fn trim_channel(&mut self, channel: ChannelId) {
        let Some(max) = self.max_per_channel else {
            return;
        };
        let Some(messages) = self.by_channel.get_mut(&channel) else {
            return;
        };
        if messages.len() <= max {
            return;
        }

        let excess = messages.len() - max;
        for dropped in messages.drain(0..excess) {
            self.index.remove(&dropped.msg_id);
        }
    }
}
