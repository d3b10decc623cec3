/// Errors surfaced by a [`Session`](crate::Session).
///
/// Input errors (`InvalidArgument`, `SessionDestroyed`) are returned at the
/// call site. Connection-level errors (`Connect`, `Authentication`,
/// `Terminal`) are delivered as [`Event::Error`](crate::Event::Error).
/// Per-command errors (`Transport`, `Server`, `Cancelled`) only reach the
/// callback or [`PendingReply`](crate::PendingReply) of that command.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("session has been destroyed")]
    SessionDestroyed,
    #[error("connect error: {0}")]
    Connect(String),
    #[error("authentication failed: {0}")]
    Authentication(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("server error: {0}")]
    Server(String),
    #[error("request cancelled")]
    Cancelled,
    #[error("disconnected, exhausted retries")]
    Terminal,
}

impl SessionError {
    /// True for errors that describe the connection rather than one command.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            SessionError::Connect(_) | SessionError::Authentication(_) | SessionError::Terminal
        )
    }
}
