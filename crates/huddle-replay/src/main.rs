//! # huddle-replay
//!
//! Feeds a JSON-lines event log through a client session and prints the
//! resulting projected state as JSON.
//!
//! ```text
//! huddle-replay [--view <CHANNEL>] [--at <RFC3339>] [PATH]
//! ```
//!
//! Events are read from `PATH`, or from stdin when no path is given. Blank
//! lines are skipped; malformed lines are logged and skipped.

use std::path::PathBuf;

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::Parser;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use huddle_client::{init_tracing, ClientConfig, Session, SpawnedSession};
use huddle_shared::protocol::InboundEvent;
use huddle_shared::types::ChannelId;

/// Replay a JSON-lines event log through a client session
#[derive(Debug, Parser)]
#[command(name = "huddle-replay")]
#[command(about = "Fold a JSON-lines event log into a session and print the projected state")]
struct Args {
    /// Channel the projection is computed for
    #[arg(long)]
    view: Option<u32>,

    /// Instant to evaluate typing and countdowns at (RFC 3339); defaults to now
    #[arg(long)]
    at: Option<DateTime<Utc>>,

    /// Event log; stdin when omitted
    path: Option<PathBuf>,
}

async fn read_events<R: AsyncBufRead + Unpin>(reader: R) -> anyhow::Result<Vec<InboundEvent>> {
    let mut lines = reader.lines();
    let mut events = Vec::new();
    let mut line_no = 0usize;
    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        match InboundEvent::from_json(&line) {
            Ok(event) => events.push(event),
            Err(huddle_shared::error::ProtocolError::EmptyLine) => {}
            Err(e) => warn!(line = line_no, error = %e, "Skipping malformed event"),
        }
    }
    Ok(events)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let args = Args::parse();
    let config = ClientConfig::from_env();
    info!(?config, "Loaded configuration");

    let events = match &args.path {
        Some(path) => {
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("failed to open {}", path.display()))?;
            read_events(BufReader::new(file)).await?
        }
        None => read_events(BufReader::new(tokio::io::stdin())).await?,
    };
    info!(count = events.len(), "Replaying events");

    // No transport: the replay never issues commands.
    let SpawnedSession { handle, task, .. } = Session::spawn_manual_clock(config);

    if let Some(channel) = args.view {
        handle.view_channel(ChannelId(channel)).await?;
    }
    for event in events {
        handle.push_event(event).await?;
    }

    let state = handle.sync().await?;
    let now = args.at.unwrap_or_else(Utc::now);
    let projected = huddle_client::project(&state, now);
    println!("{}", serde_json::to_string_pretty(&projected)?);

    handle.shutdown().await?;
    task.await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn args(list: &[&str]) -> Result<Args, clap::Error> {
        Args::try_parse_from(std::iter::once("huddle-replay").chain(list.iter().copied()))
    }

    #[test]
    fn test_parse_args() {
        let parsed = args(&["--view", "3", "--at", "2024-04-25T00:00:00Z", "log.jsonl"]).unwrap();
        assert_eq!(parsed.view, Some(3));
        assert_eq!(parsed.at, Some(Utc.timestamp_opt(1_714_003_200, 0).unwrap()));
        assert_eq!(parsed.path, Some(PathBuf::from("log.jsonl")));

        let defaults = args(&[]).unwrap();
        assert!(defaults.view.is_none() && defaults.at.is_none() && defaults.path.is_none());

        assert!(args(&["--view"]).is_err());
        assert!(args(&["--view", "lobby"]).is_err());
        assert!(args(&["--at", "yesterday"]).is_err());
        assert!(args(&["--bogus"]).is_err());
        assert!(args(&["a", "b"]).is_err());
    }

    #[tokio::test]
    async fn test_read_events_skips_bad_lines() {
        let input = concat!(
            "{\"type\":\"server-info\",\"payload\":{\"name\":\"Home\"}}\n",
            "\n",
            "not json\n",
            "{\"type\":\"self-identified\",\"payload\":{\"user_id\":4}}\n",
        );
        let events = read_events(BufReader::new(input.as_bytes())).await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].tag(), "server-info");
    }
}
