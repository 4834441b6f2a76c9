pub mod config;
pub mod connection;
pub mod error;
pub mod gateway;
pub mod messages;
pub mod projection;
pub mod reducer;
pub mod runtime;
pub mod state;
pub mod store;

use tracing_subscriber::{fmt, EnvFilter};

pub use crate::config::ClientConfig;
pub use crate::error::SessionError;
pub use crate::projection::{project, ProjectedState};
pub use crate::runtime::{OutboundRequest, Session, SessionHandle, SessionInput, SpawnedSession};
pub use crate::state::SessionState;

/// Install the global `tracing` subscriber. `RUST_LOG` overrides the default
/// filter. Calling this twice is harmless.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("huddle_client=debug,huddle_shared=info,warn"));

    let _ = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .try_init();
}
