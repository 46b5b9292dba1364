use crate::error::VivaError;

/// What the remote session reports back to the manager.
#[derive(Debug)]
pub enum LiveEvent {
    /// Setup finished; audio can flow.
    Opened,
    /// Base64 16-bit PCM at 24kHz from the model's turn.
    AudioReceived(String),
    /// The remote side ended the session.
    Closed,
    /// The session could not be opened, or failed while open.
    Errored(VivaError),
}

/// Session state for one connection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Idle,
    Connecting,
    Open,
    Closing,
    Closed,
    Errored,
}

impl SessionState {
    /// Only an open session counts as connected.
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Open)
    }
}

/// The observable state a presentation layer renders from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LiveStatus {
    pub connected: bool,
    pub speaking: bool,
    pub error: Option<String>,
}
