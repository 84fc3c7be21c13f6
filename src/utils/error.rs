use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TunnelError {
    #[error("{field} not specified for {key}")]
    MissingField { key: String, field: &'static str },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Host unreachable: {0}")]
    HostUnreachable(String),

    #[error("SSH handshake failed: {0}")]
    Handshake(String),

    #[error("Host key rejected: {0}")]
    HostKeyRejected(String),

    #[error("Channel open failed: {0}")]
    ChannelOpen(String),

    #[error("Failed to parse SSH config {path:?}: {reason}")]
    SshConfigParse { path: PathBuf, reason: String },

    #[error("Port {0} is already in use")]
    PortInUse(u16),

    #[error("Failed to bind listener: {0}")]
    Bind(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, TunnelError>;

impl TunnelError {
    /// Whether the error should abort the operation that produced it.
    ///
    /// Channel-open failures only cost one local connection, and a broken
    /// SSH config file only loses the optional lookup.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::ChannelOpen(_) | Self::SshConfigParse { .. })
    }

    /// Returns a user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            Self::MissingField { key, field } => {
                format!("Database '{}' is missing required setting {}", key, field)
            }
            Self::PortInUse(port) => format!("Local port {} is already in use", port),
            Self::AuthenticationFailed(reason) => format!("Authentication failed: {}", reason),
            Self::HostUnreachable(reason) => format!("Could not reach SSH gateway: {}", reason),
            Self::Handshake(reason) => format!("SSH gateway did not complete the handshake: {}", reason),
            Self::HostKeyRejected(reason) => {
                format!("SSH gateway host key was rejected: {}", reason)
            }
            _ => self.to_string(),
        }
    }
}
