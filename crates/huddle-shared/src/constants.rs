use crate::types::ChannelId;

/// Application name
pub const APP_NAME: &str = "Huddle";

/// Reserved lobby channel, valid even when absent from the channel list
pub const LOBBY_CHANNEL: ChannelId = ChannelId(0);

/// Display name used for the lobby when the server does not list it
pub const LOBBY_NAME: &str = "Lobby";

/// Fixed reason surfaced when the server owner kicks the local user
pub const KICKED_MESSAGE: &str = "Disconnected by owner";

/// Reason used when the transport drops a command without replying
pub const TRANSPORT_DROPPED_MESSAGE: &str = "transport dropped the command";

/// Reason used when the outbound transport queue is full
pub const TRANSPORT_BUSY_MESSAGE: &str = "transport queue is full";

/// How long a typing signal stays visible (milliseconds)
pub const DEFAULT_TYPING_TTL_MS: u64 = 3_000;

/// Session inbox capacity (events, commands and settlements share it)
pub const DEFAULT_INBOX_CAPACITY: usize = 256;

/// Outbound transport queue capacity
pub const DEFAULT_TRANSPORT_CAPACITY: usize = 64;

/// Clock tick period driving the reconnect countdown (milliseconds)
pub const DEFAULT_TICK_INTERVAL_MS: u64 = 250;
