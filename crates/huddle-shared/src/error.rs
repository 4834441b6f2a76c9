use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Event decode error: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Empty event line")]
    EmptyLine,
}
