//! Message dispatch for a single peer connection.
//!
//! Handlers register against a dispatcher and receive their own copy of every
//! message the peer sends. One-shot response waiters resolve on the first
//! matching message and remove themselves. The dispatcher drives the
//! version/verack handshake once, then pumps messages until the connection
//! ends.

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod handshake;
pub mod registry;
pub mod waiter;

pub use config::DispatcherConfig;
pub use dispatcher::{Dispatcher, DispatcherHandle};
pub use error::{DispatchError, Result};
pub use handler::{Handler, HandlerId};
pub use handshake::{
    handshake, handshake_with_config, HandshakeConfig, HandshakeResult, HandshakeState,
    PeerAddress, VersionMessage, DEFAULT_PROTOCOL_VERSION,
};
pub use registry::HandlerRegistry;
pub use waiter::ResponseWaiter;
