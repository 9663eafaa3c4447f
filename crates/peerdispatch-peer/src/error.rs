use peerdispatch_channel::ChannelError;

use crate::handler::HandlerId;
use crate::handshake::HandshakeState;

/// Errors that can occur while dispatching a peer connection.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// The peer channel failed (disconnect, decode error, transport error).
    #[error("channel error: {0}")]
    Channel(#[from] ChannelError),

    /// The peer answered the handshake with an unexpected message.
    #[error("handshake protocol violation in {state}: expected '{expected}', received '{received}'")]
    HandshakeViolation {
        state: HandshakeState,
        expected: &'static str,
        received: String,
    },

    /// A caller-imposed deadline expired.
    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The waiter's handler was deregistered before a match arrived.
    #[error("waiter {0} was deregistered before a response arrived")]
    Cancelled(HandlerId),

    /// The dispatcher stopped; carries the reason the pump loop ended.
    #[error("dispatcher closed: {0}")]
    Closed(String),
}

impl DispatchError {
    /// Returns true if the connection ended underneath the dispatcher.
    pub fn is_connection_closed(&self) -> bool {
        matches!(self, Self::Channel(err) if err.is_connection_closed())
    }
}

pub type Result<T> = std::result::Result<T, DispatchError>;
