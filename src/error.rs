//! Error types for MG400 channel operations

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Mg400Error>;

#[derive(Error, Debug)]
pub enum Mg400Error {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Malformed reply ({reason}): {line:?}")]
    ProtocolParse { line: String, reason: String },

    #[error("Controller rejected {command} with status {code}")]
    CommandRejected { code: i32, command: String },

    #[error("{channel} channel failed {trials} consecutive times, giving up")]
    ChannelFatal { channel: &'static str, trials: u32 },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("No message registered for error id {0}")]
    UnknownErrorId(i64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Mg400Error {
    pub(crate) fn parse(line: &str, reason: impl Into<String>) -> Self {
        Mg400Error::ProtocolParse {
            line: line.to_string(),
            reason: reason.into(),
        }
    }

    /// True for failures that leave the socket unusable until reconnected.
    pub fn is_connection(&self) -> bool {
        matches!(self, Mg400Error::Connection(_) | Mg400Error::Io(_))
    }
}
