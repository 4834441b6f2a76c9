//! Server, voice and reconnect state.
//!
//! The three axes are independent: voice can stay joined while the server
//! link drops and comes back, and the reconnect countdown only exists while
//! the server link is down.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use huddle_shared::constants::KICKED_MESSAGE;
use huddle_shared::protocol::CommandResult;
use huddle_shared::types::ChannelId;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub enum ServerLink {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub enum VoiceLink {
    Idle,
    Joining(ChannelId),
    Joined(ChannelId),
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub enum ReconnectPhase {
    Inactive,
    /// Waiting for `retry_at`
    Retrying { retry_at: DateTime<Utc> },
    /// The scheduled attempt fired and is in progress
    Connecting,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ReconnectState {
    pub phase: ReconnectPhase,
    /// Attempts fired so far in the current outage
    pub attempt: u32,
    pub reason: Option<String>,
}

impl Default for ReconnectState {
    fn default() -> Self {
        Self {
            phase: ReconnectPhase::Inactive,
            attempt: 0,
            reason: None,
        }
    }
}

impl ReconnectState {
    pub fn is_active(&self) -> bool {
        self.phase != ReconnectPhase::Inactive
    }
}

/// What a settled connect did to the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// Connected to `addr`; `new_session` when it differs from the previous server.
    Established { addr: String, new_session: bool },
    /// Prior connection state left untouched; only the error changed.
    Failed,
    /// The attempt was superseded by a disconnect, kick or newer connect.
    Stale,
}

#[derive(Debug, Clone)]
pub struct ConnectionController {
    server: ServerLink,
    connected_addr: Option<String>,
    pending_addr: Option<String>,
    connect_error: Option<String>,
    voice: VoiceLink,
    reconnect: ReconnectState,
}

impl Default for ConnectionController {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionController {
    pub fn new() -> Self {
        Self {
            server: ServerLink::Disconnected,
            connected_addr: None,
            pending_addr: None,
            connect_error: None,
            voice: VoiceLink::Idle,
            reconnect: ReconnectState::default(),
        }
    }

    // -- Server axis ------------------------------------------------------

    /// Start a connect attempt. A live connection stays `Connected` with
    /// its address while the attempt is in flight.
    pub fn begin_connect(&mut self, addr: &str) {
        self.pending_addr = Some(addr.to_string());
        self.connect_error = None;
        if self.server != ServerLink::Connected {
            self.server = ServerLink::Connecting;
        }
        info!(addr, switching = self.server == ServerLink::Connected, "Connect started");
    }

    /// Whether a connect to `addr` is the attempt currently in flight.
    pub fn is_current_attempt(&self, addr: &str) -> bool {
        self.pending_addr.as_deref() == Some(addr)
    }

    /// Settle a connect. Results for attempts that are no longer current
    /// never touch the connection.
    pub fn finish_connect(&mut self, addr: &str, result: &CommandResult) -> ConnectOutcome {
        if !self.is_current_attempt(addr) {
            debug!(addr, "Stale connect result ignored");
            return ConnectOutcome::Stale;
        }
        self.pending_addr = None;

        if let Some(reason) = result.error() {
            if self.server == ServerLink::Connecting {
                self.server = ServerLink::Disconnected;
            }
            self.connect_error = Some(reason.to_string());
            info!(addr, reason, "Connect failed, prior connection kept");
            return ConnectOutcome::Failed;
        }

        let new_session = self.connected_addr.as_deref() != Some(addr);
        self.server = ServerLink::Connected;
        self.connected_addr = Some(addr.to_string());
        self.connect_error = None;
        self.reconnect = ReconnectState::default();
        info!(addr, new_session, "Connected");
        ConnectOutcome::Established {
            addr: addr.to_string(),
            new_session,
        }
    }

    /// Explicit local teardown of both server and voice.
    pub fn disconnect(&mut self) {
        self.server = ServerLink::Disconnected;
        self.connected_addr = None;
        self.pending_addr = None;
        self.connect_error = None;
        self.voice = VoiceLink::Idle;
        self.reconnect = ReconnectState::default();
        info!("Disconnected by user");
    }

    /// Forced disconnect by the server owner; ends any reconnect countdown
    /// and orphans any connect still in flight.
    pub fn kicked(&mut self) {
        self.server = ServerLink::Disconnected;
        self.pending_addr = None;
        self.connect_error = Some(KICKED_MESSAGE.to_string());
        self.reconnect = ReconnectState::default();
        info!("Kicked by server owner");
    }

    pub fn connection_lost(&mut self, reason: &str) {
        self.server = ServerLink::Disconnected;
        self.connect_error = Some(reason.to_string());
        info!(reason, "Connection lost");
    }

    // -- Reconnect axis ---------------------------------------------------

    pub fn reconnect_scheduled(&mut self, attempt: u32, retry_at: DateTime<Utc>, reason: &str) {
        self.server = ServerLink::Disconnected;
        self.reconnect = ReconnectState {
            phase: ReconnectPhase::Retrying { retry_at },
            attempt,
            reason: Some(reason.to_string()),
        };
        debug!(attempt, %retry_at, "Reconnect scheduled");
    }

    pub fn reconnected(&mut self, addr: &str) {
        self.server = ServerLink::Connected;
        self.connected_addr = Some(addr.to_string());
        self.connect_error = None;
        self.reconnect = ReconnectState::default();
        info!(addr, "Reconnected");
    }

    /// Fire the countdown once `now` reaches `retry_at`. Returns `true`
    /// when the attempt fired on this tick.
    pub fn tick(&mut self, now: DateTime<Utc>) -> bool {
        let ReconnectPhase::Retrying { retry_at } = self.reconnect.phase else {
            return false;
        };
        if now < retry_at {
            return false;
        }

        self.reconnect.phase = ReconnectPhase::Connecting;
        self.reconnect.attempt = self.reconnect.attempt.saturating_add(1);
        self.server = ServerLink::Connecting;
        info!(attempt = self.reconnect.attempt, "Reconnect attempt fired");
        true
    }

    /// Stop reconnecting. Returns `false` when nothing was in progress.
    pub fn cancel_reconnect(&mut self) -> bool {
        if !self.reconnect.is_active() {
            return false;
        }
        self.reconnect = ReconnectState::default();
        if self.server == ServerLink::Connecting && self.pending_addr.is_none() {
            self.server = ServerLink::Disconnected;
        }
        info!("Reconnect cancelled");
        true
    }

    // -- Voice axis -------------------------------------------------------

    pub fn begin_join_voice(&mut self, channel: ChannelId) {
        self.voice = VoiceLink::Joining(channel);
        debug!(channel = %channel, "Joining voice");
    }

    /// Settle a join. A join that was superseded (left or re-targeted
    /// while in flight) never re-raises voice.
    pub fn finish_join_voice(&mut self, channel: ChannelId, result: &CommandResult) {
        let still_joining = self.voice == VoiceLink::Joining(channel);
        match result.error() {
            None if still_joining => {
                self.voice = VoiceLink::Joined(channel);
                info!(channel = %channel, "Voice joined");
            }
            None => debug!(channel = %channel, "Stale voice join result ignored"),
            Some(reason) => {
                if still_joining {
                    self.voice = VoiceLink::Idle;
                }
                self.connect_error = Some(reason.to_string());
                info!(channel = %channel, reason, "Voice join failed");
            }
        }
    }

    /// Local audio is already torn down when this is called.
    pub fn leave_voice(&mut self) {
        self.voice = VoiceLink::Idle;
        info!("Voice left");
    }

    /// A failed leave is surfaced but never re-raises voice.
    pub fn finish_leave_voice(&mut self, result: &CommandResult) {
        if let Some(reason) = result.error() {
            self.connect_error = Some(reason.to_string());
        }
    }

    // -- Errors -----------------------------------------------------------

    pub fn surface_error(&mut self, reason: &str) {
        self.connect_error = Some(reason.to_string());
    }

    pub fn clear_error(&mut self) {
        self.connect_error = None;
    }

    // -- Accessors --------------------------------------------------------

    pub fn server(&self) -> ServerLink {
        self.server
    }

    pub fn connected(&self) -> bool {
        self.server == ServerLink::Connected
    }

    pub fn connected_addr(&self) -> Option<&str> {
        self.connected_addr.as_deref()
    }

    pub fn pending_addr(&self) -> Option<&str> {
        self.pending_addr.as_deref()
    }

    pub fn connect_error(&self) -> Option<&str> {
        self.connect_error.as_deref()
    }

    pub fn voice(&self) -> VoiceLink {
        self.voice
    }

    pub fn voice_connected(&self) -> bool {
        matches!(self.voice, VoiceLink::Joined(_))
    }

    pub fn reconnect(&self) -> &ReconnectState {
        &self.reconnect
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;

    fn t0() -> DateTime<Utc> {
        Utc.timestamp_opt(1_714_000_000, 0).unwrap()
    }

    fn connected_to(addr: &str) -> ConnectionController {
        let mut conn = ConnectionController::new();
        conn.begin_connect(addr);
        conn.finish_connect(addr, &CommandResult::ok());
        conn
    }

    #[test]
    fn test_happy_path_connect() {
        let mut conn = ConnectionController::new();
        conn.begin_connect("10.0.0.1:7777");
        assert_eq!(conn.server(), ServerLink::Connecting);

        let outcome = conn.finish_connect("10.0.0.1:7777", &CommandResult::ok());
        assert_eq!(
            outcome,
            ConnectOutcome::Established {
                addr: "10.0.0.1:7777".into(),
                new_session: true,
            }
        );
        assert!(conn.connected());
        assert_eq!(conn.connected_addr(), Some("10.0.0.1:7777"));
    }

    #[test]
    fn test_first_connect_failure_disconnects() {
        let mut conn = ConnectionController::new();
        conn.begin_connect("10.0.0.1:7777");
        conn.finish_connect("10.0.0.1:7777", &CommandResult::failed("refused"));
        assert_eq!(conn.server(), ServerLink::Disconnected);
        assert_eq!(conn.connect_error(), Some("refused"));
    }

    #[test]
    fn test_failed_switch_keeps_previous_server() {
        let mut conn = connected_to("old.example:7777");
        conn.begin_connect("new.example:7777");
        assert_eq!(conn.server(), ServerLink::Connected);
        assert_eq!(conn.connected_addr(), Some("old.example:7777"));

        let outcome = conn.finish_connect("new.example:7777", &CommandResult::failed("timeout"));
        assert_eq!(outcome, ConnectOutcome::Failed);
        assert!(conn.connected());
        assert_eq!(conn.connected_addr(), Some("old.example:7777"));
        assert_eq!(conn.connect_error(), Some("timeout"));
        assert_eq!(conn.pending_addr(), None);
    }

    #[test]
    fn test_kick_sets_fixed_reason_and_stops_reconnect() {
        let mut conn = connected_to("srv:1");
        conn.reconnect_scheduled(1, t0(), "flaky");
        conn.kicked();
        assert!(!conn.connected());
        assert_eq!(conn.connect_error(), Some(KICKED_MESSAGE));
        assert!(!conn.reconnect().is_active());
    }

    #[test]
    fn test_voice_is_independent_of_server_loss() {
        let mut conn = connected_to("srv:1");
        conn.begin_join_voice(ChannelId(2));
        conn.finish_join_voice(ChannelId(2), &CommandResult::ok());
        conn.connection_lost("network unreachable");
        assert!(conn.voice_connected());
        assert!(!conn.connected());
    }

    #[test]
    fn test_leave_voice_commits_locally() {
        let mut conn = connected_to("srv:1");
        conn.begin_join_voice(ChannelId(2));
        conn.finish_join_voice(ChannelId(2), &CommandResult::ok());

        conn.leave_voice();
        assert!(!conn.voice_connected());
        conn.finish_leave_voice(&CommandResult::failed("not in voice"));
        assert!(!conn.voice_connected());
        assert_eq!(conn.connect_error(), Some("not in voice"));
    }

    #[test]
    fn test_join_result_after_leave_does_not_rejoin() {
        let mut conn = connected_to("srv:1");
        conn.begin_join_voice(ChannelId(2));
        conn.leave_voice();
        conn.finish_join_voice(ChannelId(2), &CommandResult::ok());
        assert_eq!(conn.voice(), VoiceLink::Idle);
    }

    #[test]
    fn test_join_failure_rolls_back() {
        let mut conn = connected_to("srv:1");
        conn.begin_join_voice(ChannelId(2));
        conn.finish_join_voice(ChannelId(2), &CommandResult::failed("no mic"));
        assert_eq!(conn.voice(), VoiceLink::Idle);
        assert_eq!(conn.connect_error(), Some("no mic"));
    }

    #[test]
    fn test_reconnect_countdown_fires_on_tick() {
        let mut conn = connected_to("srv:1");
        conn.connection_lost("reset by peer");
        conn.reconnect_scheduled(0, t0() + Duration::seconds(5), "reset by peer");

        assert!(!conn.tick(t0() + Duration::seconds(4)));
        assert!(matches!(conn.reconnect().phase, ReconnectPhase::Retrying { .. }));

        assert!(conn.tick(t0() + Duration::seconds(5)));
        assert_eq!(conn.reconnect().phase, ReconnectPhase::Connecting);
        assert_eq!(conn.reconnect().attempt, 1);
        assert_eq!(conn.server(), ServerLink::Connecting);

        assert!(!conn.tick(t0() + Duration::seconds(9)));

        conn.reconnected("srv:1");
        assert!(conn.connected());
        assert!(!conn.reconnect().is_active());
        assert_eq!(conn.connect_error(), None);
    }

    #[test]
    fn test_cancel_reconnect_from_any_phase() {
        let mut conn = ConnectionController::new();
        assert!(!conn.cancel_reconnect());

        conn.reconnect_scheduled(2, t0(), "down");
        assert!(conn.cancel_reconnect());
        assert!(!conn.reconnect().is_active());

        conn.reconnect_scheduled(2, t0(), "down");
        conn.tick(t0());
        assert!(conn.cancel_reconnect());
        assert_eq!(conn.server(), ServerLink::Disconnected);
    }

    #[test]
    fn test_explicit_disconnect_tears_down_voice() {
        let mut conn = connected_to("srv:1");
        conn.begin_join_voice(ChannelId(1));
        conn.finish_join_voice(ChannelId(1), &CommandResult::ok());
        conn.disconnect();
        assert!(!conn.connected());
        assert_eq!(conn.connected_addr(), None);
        assert!(!conn.voice_connected());
    }

    #[test]
    fn test_connect_success_after_disconnect_is_ignored() {
        let mut conn = ConnectionController::new();
        conn.begin_connect("a:1");
        conn.disconnect();

        let outcome = conn.finish_connect("a:1", &CommandResult::ok());
        assert_eq!(outcome, ConnectOutcome::Stale);
        assert!(!conn.connected());
        assert_eq!(conn.connected_addr(), None);
    }

    #[test]
    fn test_connect_result_after_kick_is_ignored() {
        let mut conn = connected_to("old:1");
        conn.begin_connect("new:1");
        conn.kicked();

        assert_eq!(conn.finish_connect("new:1", &CommandResult::ok()), ConnectOutcome::Stale);
        assert!(!conn.connected());
        assert_eq!(conn.connect_error(), Some(KICKED_MESSAGE));
    }

    #[test]
    fn test_superseded_connect_failure_is_ignored() {
        let mut conn = ConnectionController::new();
        conn.begin_connect("a:1");
        conn.begin_connect("b:1");

        assert_eq!(conn.finish_connect("a:1", &CommandResult::failed("refused")), ConnectOutcome::Stale);
        assert_eq!(conn.server(), ServerLink::Connecting);
        assert_eq!(conn.connect_error(), None);
        assert!(matches!(
            conn.finish_connect("b:1", &CommandResult::ok()),
            ConnectOutcome::Established { .. }
        ));
    }

    #[test]
    fn test_attempt_counter_saturates() {
        let mut conn = ConnectionController::new();
        conn.reconnect_scheduled(u32::MAX, t0(), "down");
        assert!(conn.tick(t0()));
        assert_eq!(conn.reconnect().attempt, u32::MAX);
    }
}
