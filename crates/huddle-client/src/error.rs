use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Session inbox is closed")]
    InboxClosed,

    #[error("Session stopped before replying")]
    NoReply,
}
