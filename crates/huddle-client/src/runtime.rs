//! Single-writer session task.
//!
//! Inbound events, command issues, command results, view switches, reconnect
//! cancellation and clock ticks all funnel through one `mpsc` inbox and are
//! applied one at a time. After every input the task publishes a clone of
//! the state on a `watch` channel for any number of readers.

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, info_span, warn, Instrument};

use huddle_shared::constants::{TRANSPORT_BUSY_MESSAGE, TRANSPORT_DROPPED_MESSAGE};
use huddle_shared::protocol::{Command, CommandResult, InboundEvent};
use huddle_shared::types::ChannelId;

use crate::config::ClientConfig;
use crate::error::SessionError;
use crate::gateway::{CommandGateway, Ticket};
use crate::projection::{self, ProjectedState};
use crate::reducer::EventReducer;
use crate::state::SessionState;

/// Everything the session task consumes.
#[derive(Debug)]
pub enum SessionInput {
    Event(InboundEvent),
    Command(Command),
    Settled { ticket: Ticket, result: CommandResult },
    ViewChannel(ChannelId),
    CancelReconnect,
    Tick(DateTime<Utc>),
    /// Reply with the state once every earlier input has been applied.
    Sync(oneshot::Sender<SessionState>),
    Shutdown,
}

/// A command handed to the transport. The transport answers on `reply`;
/// dropping it settles the command as failed.
#[derive(Debug)]
pub struct OutboundRequest {
    pub ticket: Ticket,
    pub command: Command,
    pub reply: oneshot::Sender<CommandResult>,
}

/// Cloneable front door to a running session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    inbox: mpsc::Sender<SessionInput>,
    snapshot: watch::Receiver<SessionState>,
}

impl SessionHandle {
    pub async fn push_event(&self, event: InboundEvent) -> Result<(), SessionError> {
        self.send(SessionInput::Event(event)).await
    }

    pub async fn send_command(&self, command: Command) -> Result<(), SessionError> {
        self.send(SessionInput::Command(command)).await
    }

    pub async fn view_channel(&self, channel: ChannelId) -> Result<(), SessionError> {
        self.send(SessionInput::ViewChannel(channel)).await
    }

    pub async fn cancel_reconnect(&self) -> Result<(), SessionError> {
        self.send(SessionInput::CancelReconnect).await
    }

    /// Drive the clock by hand (sessions spawned without a ticker).
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<(), SessionError> {
        self.send(SessionInput::Tick(now)).await
    }

    /// Wait until everything queued so far is applied and return the state.
    pub async fn sync(&self) -> Result<SessionState, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.send(SessionInput::Sync(tx)).await?;
        rx.await.map_err(|_| SessionError::NoReply)
    }

    pub async fn shutdown(&self) -> Result<(), SessionError> {
        self.send(SessionInput::Shutdown).await
    }

    /// Latest published state.
    pub fn snapshot(&self) -> SessionState {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.snapshot.clone()
    }

    pub fn project(&self, now: DateTime<Utc>) -> ProjectedState {
        projection::project(&self.snapshot.borrow(), now)
    }

    async fn send(&self, input: SessionInput) -> Result<(), SessionError> {
        self.inbox
            .send(input)
            .await
            .map_err(|_| SessionError::InboxClosed)
    }
}

/// Pieces returned by [`Session::spawn`].
pub struct SpawnedSession {
    pub handle: SessionHandle,
    /// Commands for the transport, in issue order.
    pub outbound: mpsc::Receiver<OutboundRequest>,
    pub task: JoinHandle<()>,
}

pub struct Session {
    reducer: EventReducer,
    gateway: CommandGateway,
    inbox: mpsc::WeakSender<SessionInput>,
    outbound: mpsc::Sender<OutboundRequest>,
    published: watch::Sender<SessionState>,
}

impl Session {
    /// Spawn a session whose reconnect countdown is driven by the wall clock.
    pub fn spawn(config: ClientConfig) -> SpawnedSession {
        Self::spawn_inner(config, true)
    }

    /// Spawn a session without a ticker; the caller feeds `Tick`s.
    pub fn spawn_manual_clock(config: ClientConfig) -> SpawnedSession {
        Self::spawn_inner(config, false)
    }

    fn spawn_inner(config: ClientConfig, wall_clock: bool) -> SpawnedSession {
        let (inbox_tx, inbox_rx) = mpsc::channel(config.inbox_capacity.max(1));
        let (outbound_tx, outbound_rx) = mpsc::channel(config.transport_capacity.max(1));

        let reducer = EventReducer::new(config.clone());
        let (published, snapshot) = watch::channel(reducer.state().clone());
        let span = info_span!("session", id = %reducer.state().session_id);

        if wall_clock {
            spawn_ticker(inbox_tx.downgrade(), config.tick_interval);
        }

        let session = Session {
            reducer,
            gateway: CommandGateway::new(),
            inbox: inbox_tx.downgrade(),
            outbound: outbound_tx,
            published,
        };
        let task = tokio::spawn(session.run(inbox_rx).instrument(span));

        SpawnedSession {
            handle: SessionHandle {
                inbox: inbox_tx,
                snapshot,
            },
            outbound: outbound_rx,
            task,
        }
    }

    async fn run(mut self, mut inbox: mpsc::Receiver<SessionInput>) {
        info!("Session started");

        while let Some(input) = inbox.recv().await {
            match input {
                SessionInput::Shutdown => break,
                SessionInput::Sync(reply) => {
                    let _ = reply.send(self.reducer.state().clone());
                    continue;
                }
                other => self.handle(other),
            }
            self.published.send_replace(self.reducer.state().clone());
        }

        info!(in_flight = self.gateway.in_flight(), "Session stopped");
    }

    fn handle(&mut self, input: SessionInput) {
        match input {
            SessionInput::Event(event) => self.reducer.apply(event),
            SessionInput::Command(command) => self.issue(command),
            SessionInput::Settled { ticket, result } => {
                let applied = self.gateway.settle(self.reducer.state_mut(), ticket, result);
                debug!(%ticket, applied = applied.len(), "Command settled");
            }
            SessionInput::ViewChannel(channel) => self.reducer.state_mut().view_channel(channel),
            SessionInput::CancelReconnect => {
                self.reducer.state_mut().connection.cancel_reconnect();
            }
            SessionInput::Tick(now) => {
                self.reducer.state_mut().connection.tick(now);
            }
            SessionInput::Sync(_) | SessionInput::Shutdown => {}
        }
    }

    /// Hand a command to the transport without ever waiting on it; a full
    /// or closed queue fails the command on the spot.
    fn issue(&mut self, command: Command) {
        let ticket = self.gateway.begin(self.reducer.state_mut(), command.clone());
        let (reply_tx, reply_rx) = oneshot::channel();

        let request = OutboundRequest {
            ticket,
            command,
            reply: reply_tx,
        };
        let reason = match self.outbound.try_send(request) {
            Ok(()) => None,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(%ticket, "Transport queue is full, failing command");
                Some(TRANSPORT_BUSY_MESSAGE)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!(%ticket, "Transport is gone, failing command");
                Some(TRANSPORT_DROPPED_MESSAGE)
            }
        };
        if let Some(reason) = reason {
            self.gateway
                .settle(self.reducer.state_mut(), ticket, CommandResult::failed(reason));
            return;
        }

        let inbox = self.inbox.clone();
        tokio::spawn(async move {
            let result = reply_rx
                .await
                .unwrap_or_else(|_| CommandResult::failed(TRANSPORT_DROPPED_MESSAGE));
            if let Some(inbox) = inbox.upgrade() {
                let _ = inbox.send(SessionInput::Settled { ticket, result }).await;
            }
        });
    }
}

fn spawn_ticker(inbox: mpsc::WeakSender<SessionInput>, period: std::time::Duration) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            let Some(inbox) = inbox.upgrade() else {
                break;
            };
            if inbox.send(SessionInput::Tick(Utc::now())).await.is_err() {
                break;
            }
        }
        debug!("Clock ticker stopped");
    });
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};

    use huddle_shared::protocol::RosterEntry;
    use huddle_shared::types::UserId;

    use super::*;
    use crate::connection::ReconnectPhase;

    fn t0() -> DateTime<Utc> {
        Utc.timestamp_opt(1_714_000_000, 0).unwrap()
    }

    fn connect(addr: &str) -> Command {
        Command::Connect {
            addr: addr.into(),
            username: "alice".into(),
        }
    }

    #[tokio::test]
    async fn test_events_are_applied_in_order() {
        let SpawnedSession { handle, .. } = Session::spawn_manual_clock(ClientConfig::default());

        handle
            .push_event(InboundEvent::RosterJoined(RosterEntry {
                id: UserId(1),
                username: "Alice".into(),
                role: None,
                channel_id: None,
            }))
            .await
            .unwrap();
        handle
            .push_event(InboundEvent::RosterRenamed {
                user_id: UserId(1),
                username: "Alicia".into(),
            })
            .await
            .unwrap();

        let state = handle.sync().await.unwrap();
        assert_eq!(state.store.user(UserId(1)).unwrap().username, "Alicia");
        assert_eq!(handle.snapshot().store.users().len(), 1);
    }

    #[tokio::test]
    async fn test_command_round_trip_through_transport() {
        let SpawnedSession {
            handle,
            mut outbound,
            ..
        } = Session::spawn_manual_clock(ClientConfig::default());

        handle.send_command(connect("srv:1")).await.unwrap();
        let request = outbound.recv().await.expect("transport should get the command");
        assert_eq!(request.command, connect("srv:1"));
        assert_eq!(handle.sync().await.unwrap().connection.pending_addr(), Some("srv:1"));

        request.reply.send(CommandResult::ok()).unwrap();

        let mut watcher = handle.subscribe();
        watcher
            .wait_for(|s| s.connection.connected())
            .await
            .expect("session should publish the connection");
        assert_eq!(handle.snapshot().connection.connected_addr(), Some("srv:1"));
    }

    #[tokio::test]
    async fn test_out_of_order_replies_settle_in_issue_order() {
        let SpawnedSession {
            handle,
            mut outbound,
            ..
        } = Session::spawn_manual_clock(ClientConfig::default());

        handle
            .send_command(Command::CreateChannel { name: "a".into() })
            .await
            .unwrap();
        handle
            .send_command(Command::KickUser { user_id: UserId(4) })
            .await
            .unwrap();
        let first = outbound.recv().await.unwrap();
        let second = outbound.recv().await.unwrap();

        second.reply.send(CommandResult::failed("second")).unwrap();
        first.reply.send(CommandResult::failed("first")).unwrap();

        let mut watcher = handle.subscribe();
        let state = watcher
            .wait_for(|s| s.connection.connect_error() == Some("second"))
            .await
            .unwrap()
            .clone();
        assert_eq!(state.connection.connect_error(), Some("second"));
    }

    #[tokio::test]
    async fn test_dropped_reply_settles_as_failure() {
        let SpawnedSession {
            handle,
            mut outbound,
            ..
        } = Session::spawn_manual_clock(ClientConfig::default());

        handle
            .send_command(Command::JoinVoice {
                channel_id: ChannelId(2),
            })
            .await
            .unwrap();
        drop(outbound.recv().await.unwrap());

        let mut watcher = handle.subscribe();
        watcher
            .wait_for(|s| s.connection.connect_error() == Some(TRANSPORT_DROPPED_MESSAGE))
            .await
            .unwrap();
        assert!(!handle.snapshot().connection.voice_connected());
    }

    #[tokio::test]
    async fn test_closed_transport_fails_immediately() {
        let SpawnedSession {
            handle, outbound, ..
        } = Session::spawn_manual_clock(ClientConfig::default());
        drop(outbound);

        handle.send_command(connect("srv:1")).await.unwrap();
        let state = handle.sync().await.unwrap();
        assert!(!state.connection.connected());
        assert_eq!(state.connection.connect_error(), Some(TRANSPORT_DROPPED_MESSAGE));
    }

    #[tokio::test]
    async fn test_manual_tick_fires_reconnect() {
        let SpawnedSession { handle, .. } = Session::spawn_manual_clock(ClientConfig::default());

        handle
            .push_event(InboundEvent::ReconnectScheduled {
                attempt: 0,
                retry_at: t0() + Duration::seconds(5),
                reason: "timeout".into(),
            })
            .await
            .unwrap();
        handle.tick(t0() + Duration::seconds(1)).await.unwrap();
        handle.sync().await.unwrap();
        let view = handle.project(t0() + Duration::seconds(1));
        assert_eq!(view.connection.seconds_until_retry, Some(4));

        handle.tick(t0() + Duration::seconds(5)).await.unwrap();
        let state = handle.sync().await.unwrap();
        assert_eq!(state.connection.reconnect().phase, ReconnectPhase::Connecting);
        assert_eq!(state.connection.reconnect().attempt, 1);
    }

    #[tokio::test]
    async fn test_cancel_and_view_switch() {
        let SpawnedSession { handle, .. } = Session::spawn_manual_clock(ClientConfig::default());
        handle
            .push_event(InboundEvent::ReconnectScheduled {
                attempt: 3,
                retry_at: t0(),
                reason: "down".into(),
            })
            .await
            .unwrap();
        handle.cancel_reconnect().await.unwrap();
        handle.view_channel(ChannelId(6)).await.unwrap();

        let state = handle.sync().await.unwrap();
        assert!(!state.connection.reconnect().is_active());
        assert_eq!(state.viewing, ChannelId(6));
    }

    #[tokio::test]
    async fn test_shutdown_closes_inbox() {
        let SpawnedSession { handle, task, .. } = Session::spawn_manual_clock(ClientConfig::default());
        handle.shutdown().await.unwrap();
        task.await.unwrap();
        assert!(matches!(
            handle.push_event(InboundEvent::ServerInfo { name: "x".into() }).await,
            Err(SessionError::InboxClosed)
        ));
    }

    #[tokio::test]
    async fn test_full_transport_queue_never_stalls_the_loop() {
        let config = ClientConfig {
            transport_capacity: 1,
            ..ClientConfig::default()
        };
        let SpawnedSession {
            handle,
            mut outbound,
            ..
        } = Session::spawn_manual_clock(config);

        handle
            .send_command(Command::CreateChannel { name: "a".into() })
            .await
            .unwrap();
        handle
            .send_command(Command::CreateChannel { name: "b".into() })
            .await
            .unwrap();
        handle
            .push_event(InboundEvent::ServerInfo { name: "Home".into() })
            .await
            .unwrap();

        let state = tokio::time::timeout(std::time::Duration::from_secs(2), handle.sync())
            .await
            .expect("session loop should not wait on the transport")
            .unwrap();
        assert_eq!(state.store.server().name.as_deref(), Some("Home"));

        let first = outbound.recv().await.unwrap();
        assert_eq!(first.command, Command::CreateChannel { name: "a".into() });
        first.reply.send(CommandResult::ok()).unwrap();

        let mut watcher = handle.subscribe();
        watcher
            .wait_for(|s| s.connection.connect_error() == Some(TRANSPORT_BUSY_MESSAGE))
            .await
            .unwrap();
    }
}
