//! Outbound command bookkeeping.
//!
//! `begin` applies a command's optimistic local effect and hands out a
//! ticket; `settle` reconciles the asynchronous result. Results that arrive
//! ahead of an earlier ticket are parked until every earlier ticket has
//! settled, so reconciliation always runs in issue order.
//!
//! The one exception is the session boundary: a successful connect to a new
//! server rebuilds the entity store as soon as its result arrives, so events
//! the new server sends while the result is parked land in the new store.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use huddle_shared::protocol::{Command, CommandResult};

use crate::connection::ConnectOutcome;
use crate::state::SessionState;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Ticket(pub u64);

impl std::fmt::Display for Ticket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Default)]
pub struct CommandGateway {
    next_ticket: u64,
    in_flight: BTreeMap<Ticket, Command>,
    parked: BTreeMap<Ticket, CommandResult>,
}

impl CommandGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply the optimistic effect of `command` and register it as in flight.
    pub fn begin(&mut self, state: &mut SessionState, command: Command) -> Ticket {
        let ticket = Ticket(self.next_ticket);
        self.next_ticket += 1;

        let conn = &mut state.connection;
        match &command {
            Command::Connect { addr, .. } => conn.begin_connect(addr),
            Command::Disconnect => conn.disconnect(),
            Command::JoinVoice { channel_id } => conn.begin_join_voice(*channel_id),
            Command::LeaveVoice => conn.leave_voice(),
            _ => {}
        }

        debug!(%ticket, kind = command.kind(), policy = ?command.failure_policy(), "Command issued");
        self.in_flight.insert(ticket, command);
        ticket
    }

    /// Record the result for `ticket` and reconcile every result that is now
    /// unblocked. Returns the tickets reconciled by this call, in order.
    pub fn settle(
        &mut self,
        state: &mut SessionState,
        ticket: Ticket,
        result: CommandResult,
    ) -> Vec<Ticket> {
        if !self.in_flight.contains_key(&ticket) || self.parked.contains_key(&ticket) {
            debug!(%ticket, "Result for unknown or already settled ticket ignored");
            return Vec::new();
        }
        self.mark_session_boundary(state, ticket, &result);
        self.parked.insert(ticket, result);

        let mut applied = Vec::new();
        while let Some((&oldest, _)) = self.in_flight.first_key_value() {
            let Some(result) = self.parked.remove(&oldest) else {
                break;
            };
            if let Some(command) = self.in_flight.remove(&oldest) {
                reconcile(state, command, &result);
                applied.push(oldest);
            }
        }

        if applied.is_empty() {
            debug!(%ticket, "Result parked behind an earlier command");
        }
        applied
    }

    fn mark_session_boundary(&self, state: &mut SessionState, ticket: Ticket, result: &CommandResult) {
        let Some(Command::Connect { addr, .. }) = self.in_flight.get(&ticket) else {
            return;
        };
        let conn = &state.connection;
        if !result.is_success()
            || !conn.is_current_attempt(addr)
            || conn.connected_addr() == Some(addr.as_str())
        {
            return;
        }
        state.reset_session();
        info!(%ticket, session = %state.session_id, addr = %addr, "New session started");
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn pending(&self, ticket: Ticket) -> Option<&Command> {
        self.in_flight.get(&ticket)
    }
}

fn reconcile(state: &mut SessionState, command: Command, result: &CommandResult) {
    match command {
        Command::Connect { addr, .. } => {
            if state.connection.finish_connect(&addr, result) == ConnectOutcome::Stale {
                debug!(kind = "connect", addr = %addr, "Superseded connect settled");
            }
        }
        // Local teardown already happened in `begin`.
        Command::Disconnect => {}
        Command::JoinVoice { channel_id } => {
            state.connection.finish_join_voice(channel_id, result)
        }
        Command::LeaveVoice => state.connection.finish_leave_voice(result),
        other => {
            if let Some(reason) = result.error() {
                info!(kind = other.kind(), reason, "Command failed");
                state.connection.surface_error(reason);
            }
        }
    }
}
