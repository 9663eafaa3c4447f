use std::future::Future;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::error::{ChannelError, Result};
use crate::message::Message;

/// Sending half of a peer channel.
///
/// Sends are fire-and-forget: the call queues the message and returns. It
/// fails only when the transport underneath is gone.
pub trait PeerSender: Send + Sync {
    /// Queue a message for the peer.
    fn send(&self, message: Message) -> Result<()>;
}

/// Receiving half of a peer channel.
///
/// Exactly one consumer owns a receiver; there are never concurrent
/// `receive_next` calls on the same connection.
pub trait PeerReceiver: Send {
    /// Wait for the next fully decoded message.
    ///
    /// Fails with [`ChannelError::ConnectionClosed`] once the peer is gone, or
    /// with [`ChannelError::Decode`] when the peer sent malformed data.
    fn receive_next(&mut self) -> impl Future<Output = Result<Message>> + Send;
}

impl<T: PeerSender + ?Sized> PeerSender for Arc<T> {
    fn send(&self, message: Message) -> Result<()> {
        (**self).send(message)
    }
}

impl<T: PeerSender + ?Sized> PeerSender for Box<T> {
    fn send(&self, message: Message) -> Result<()> {
        (**self).send(message)
    }
}

impl PeerSender for mpsc::UnboundedSender<Message> {
    fn send(&self, message: Message) -> Result<()> {
        mpsc::UnboundedSender::send(self, message).map_err(|_| ChannelError::ConnectionClosed)
    }
}

impl PeerReceiver for mpsc::UnboundedReceiver<Message> {
    async fn receive_next(&mut self) -> Result<Message> {
        self.recv().await.ok_or(ChannelError::ConnectionClosed)
    }
}

impl PeerReceiver for mpsc::Receiver<Message> {
    async fn receive_next(&mut self) -> Result<Message> {
        self.recv().await.ok_or(ChannelError::ConnectionClosed)
    }
}
