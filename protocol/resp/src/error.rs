/// Errors produced while parsing RESP data.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    /// More bytes are needed before a complete value can be parsed.
    #[error("incomplete data")]
    Incomplete,
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("invalid integer: {0}")]
    InvalidInteger(String),
    #[error("bulk string too long: {len} > {max}")]
    BulkStringTooLong { len: usize, max: usize },
}
