//! In-memory loopback channel.
//!
//! [`pair`] returns the two local halves a dispatcher consumes plus a
//! [`RemotePeer`] that plays the other end: it delivers messages (or decode
//! failures) to the local side, observes what the local side sent, and can
//! hang up.

use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{ChannelError, Result};
use crate::message::Message;
use crate::traits::{PeerReceiver, PeerSender};

/// Build a connected loopback channel.
pub fn pair() -> (MemorySender, MemoryReceiver, RemotePeer) {
    let (to_remote, from_local) = mpsc::unbounded_channel();
    let (to_local, from_remote) = mpsc::unbounded_channel();

    (
        MemorySender { tx: to_remote },
        MemoryReceiver { rx: from_remote },
        RemotePeer {
            outbound: Some(to_local),
            inbound: from_local,
        },
    )
}

/// Local sending half of a loopback channel.
#[derive(Debug, Clone)]
pub struct MemorySender {
    tx: mpsc::UnboundedSender<Message>,
}

impl PeerSender for MemorySender {
    fn send(&self, message: Message) -> Result<()> {
        self.tx
            .send(message)
            .map_err(|_| ChannelError::ConnectionClosed)
    }
}

/// Local receiving half of a loopback channel.
#[derive(Debug)]
pub struct MemoryReceiver {
    rx: mpsc::UnboundedReceiver<Result<Message>>,
}

impl PeerReceiver for MemoryReceiver {
    async fn receive_next(&mut self) -> Result<Message> {
        match self.rx.recv().await {
            Some(next) => next,
            None => Err(ChannelError::ConnectionClosed),
        }
    }
}

/// The scripted far end of a loopback channel.
#[derive(Debug)]
pub struct RemotePeer {
    outbound: Option<mpsc::UnboundedSender<Result<Message>>>,
    inbound: mpsc::UnboundedReceiver<Message>,
}

impl RemotePeer {
    /// Deliver a message to the local receiver.
    pub fn deliver(&self, message: Message) -> Result<()> {
        self.push(Ok(message))
    }

    /// Deliver several messages in order.
    pub fn deliver_all(&self, messages: impl IntoIterator<Item = Message>) -> Result<()> {
        for message in messages {
            self.deliver(message)?;
        }
        Ok(())
    }

    /// Make the local receiver fail with a decode error.
    pub fn deliver_decode_error(&self, reason: impl Into<String>) -> Result<()> {
        self.push(Err(ChannelError::Decode(reason.into())))
    }

    /// Stop delivering. Messages already queued are still received, after
    /// which the local receiver reports `ConnectionClosed`. Local sends keep
    /// succeeding.
    pub fn end_stream(&mut self) {
        if self.outbound.take().is_some() {
            debug!("remote peer ended its stream");
        }
    }

    /// Hang up in both directions.
    pub fn disconnect(&mut self) {
        self.end_stream();
        self.inbound.close();
        debug!("remote peer disconnected");
    }

    /// Wait for the next message the local side sent.
    ///
    /// Returns `None` once the local sender is dropped and everything sent
    /// has been observed.
    pub async fn next_sent(&mut self) -> Option<Message> {
        self.inbound.recv().await
    }

    /// Take the next sent message if one is already queued.
    pub fn try_next_sent(&mut self) -> Option<Message> {
        self.inbound.try_recv().ok()
    }

    fn push(&self, item: Result<Message>) -> Result<()> {
        let outbound = self
            .outbound
            .as_ref()
            .ok_or(ChannelError::ConnectionClosed)?;
        outbound
            .send(item)
            .map_err(|_| ChannelError::ConnectionClosed)
    }
}
