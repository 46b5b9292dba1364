use std::io;

/// Shown when the microphone, speaker, or remote session could not be set up.
pub const SETUP_FAILED_MESSAGE: &str = "Failed to initialize audio or connection.";

/// Shown when an open session fails.
pub const CONNECTION_ERROR_MESSAGE: &str = "Connection error. Please try again.";

#[derive(Debug, thiserror::Error)]
pub enum VivaError {
    #[error("audio error: {0}")]
    Audio(String),

    #[error("microphone unavailable: {0}")]
    Permission(String),

    #[error("resample error: {0}")]
    Resample(String),

    #[error("codec error: {0}")]
    Codec(String),

    #[error("failed to open live session: {0}")]
    SessionOpen(String),

    #[error("live session error: {0}")]
    Transport(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("profile error: {0}")]
    Profile(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("{0}")]
    Other(String),
}

impl VivaError {
    /// The message surfaced to the person using the client.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Audio(_) | Self::Permission(_) | Self::Resample(_) | Self::SessionOpen(_) => {
                SETUP_FAILED_MESSAGE.to_string()
            }
            Self::Transport(_) => CONNECTION_ERROR_MESSAGE.to_string(),
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, VivaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setup_failures_share_one_message() {
        assert_eq!(
            VivaError::Permission("denied".to_string()).user_message(),
            SETUP_FAILED_MESSAGE
        );
        assert_eq!(
            VivaError::SessionOpen("no key".to_string()).user_message(),
            SETUP_FAILED_MESSAGE
        );
    }

    #[test]
    fn transport_failure_asks_to_retry() {
        let msg = VivaError::Transport("reset by peer".to_string()).user_message();
        assert_eq!(msg, CONNECTION_ERROR_MESSAGE);
    }
}
