//! Peer channel boundary for the peer message dispatcher.
//!
//! A peer channel is the narrow interface between one network connection and
//! the dispatcher: send a named message with fields, and asynchronously
//! receive the next decoded message. Wire encoding and connection setup live
//! outside this crate; it only defines the boundary and a loopback pair.

pub mod error;
pub mod memory;
pub mod message;
pub mod names;
pub mod stream;
pub mod traits;

pub use error::{ChannelError, Result};
pub use memory::{MemoryReceiver, MemorySender, RemotePeer};
pub use message::{Fields, Message};
pub use stream::StreamReceiver;
pub use traits::{PeerReceiver, PeerSender};
