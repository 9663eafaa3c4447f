//! Per-peer message dispatcher.
//!
//! peerdispatch sits between one peer connection and the rest of a node: it
//! runs the version/verack handshake, then fans every received message out to
//! registered handlers, each of which gets an independent copy. Callers that
//! need a single reply use one-shot response waiters.
//!
//! # Crate Structure
//!
//! - [`channel`]: the peer channel boundary and an in-memory loopback pair
//! - [`peer`]: handler registry, dispatcher, response waiters, handshake
//! - [`logging`]: `tracing-subscriber` setup (behind the `logging` feature)

/// Re-export channel types.
pub mod channel {
    pub use peerdispatch_channel::*;
}

/// Re-export dispatcher types.
pub mod peer {
    pub use peerdispatch_peer::*;
}

#[cfg(feature = "logging")]
pub mod logging;

pub use peerdispatch_channel::{names, Message, PeerReceiver, PeerSender};
pub use peerdispatch_peer::{
    DispatchError, Dispatcher, DispatcherHandle, Handler, HandlerId, HandshakeConfig,
    HandshakeResult, ResponseWaiter,
};
