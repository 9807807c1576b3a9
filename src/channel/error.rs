//! Push-channel error types

use thiserror::Error;

/// Errors that can occur on the push channel and its transport
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("Connect failed: {0}")]
    Connect(String),

    #[error("Connection attempt already in progress")]
    AlreadyConnecting,

    #[error("Channel is closing")]
    Closing,

    #[error("Transport error: {0}")]
    Transport(String),
}

impl ChannelError {
    /// Whether a later connect() attempt could plausibly succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            ChannelError::Connect(_) => true,
            ChannelError::Transport(_) => true,
            ChannelError::AlreadyConnecting => false,
            ChannelError::Closing => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_retryable() {
        assert!(ChannelError::Connect("refused".to_string()).is_retryable());
        assert!(ChannelError::Transport("reset".to_string()).is_retryable());
        assert!(!ChannelError::AlreadyConnecting.is_retryable());
        assert!(!ChannelError::Closing.is_retryable());
    }
}
