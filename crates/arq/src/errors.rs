use thiserror::Error;

/// Failure to queue bytes for sending.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SendError {
    #[error("send buffer full, pending: {pending} bytes, limit: {limit} bytes")]
    BufferFull { pending: usize, limit: usize },

    #[error("message too big, size: {size}, max size: {max_size}")]
    MessageTooLarge { size: usize, max_size: usize },

    #[error("link is dead")]
    LinkDead,
}

/// Failure to take a message out of the ready queue.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RecvError {
    /// No complete message is ready yet.
    #[error("no complete message available")]
    WouldBlock,

    /// The next ready message does not fit; it stays queued.
    #[error("buffer too small, needed: {needed}, available: {available}")]
    BufferTooSmall { needed: usize, available: usize },

    #[error("link is dead")]
    LinkDead,
}

/// Reason an inbound datagram was ignored.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InputError {
    #[error("truncated segment, {len} bytes left")]
    Truncated { len: usize },

    #[error("conversation mismatch, expected: {expected}, actual: {actual}")]
    ConversationMismatch { expected: u32, actual: u32 },

    #[error("unknown command: {0}")]
    UnknownCommand(u8),

    #[error("link is dead")]
    LinkDead,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid `{field}`: {reason}")]
    Invalid {
        field: &'static str,
        reason: String,
    },

    #[error(transparent)]
    Parse(#[from] toml::de::Error),
}
