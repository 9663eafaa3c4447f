/// Errors surfaced by a peer channel.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// The peer disconnected or the channel was shut down.
    #[error("connection closed")]
    ConnectionClosed,

    /// The peer sent data that could not be decoded into a message.
    #[error("decode error: {0}")]
    Decode(String),

    /// A value could not be turned into a message field map.
    #[error("encode error: {0}")]
    Encode(String),

    /// Transport-level I/O error.
    #[error("channel I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ChannelError {
    /// Returns true if this error means the connection is gone.
    pub fn is_connection_closed(&self) -> bool {
        match self {
            Self::ConnectionClosed => true,
            Self::Io(err) => matches!(
                err.kind(),
                std::io::ErrorKind::UnexpectedEof
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::BrokenPipe
            ),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, ChannelError>;
