use std::future::poll_fn;
use std::pin::Pin;

use futures_core::Stream;

use crate::error::{ChannelError, Result};
use crate::message::Message;
use crate::traits::PeerReceiver;

/// Adapts a stream of decoded messages into a [`PeerReceiver`].
///
/// Plug in e.g. a `tokio_util::codec::FramedRead` built with a wire codec.
/// End of stream is reported as [`ChannelError::ConnectionClosed`].
#[derive(Debug)]
pub struct StreamReceiver<S> {
    inner: S,
}

impl<S> StreamReceiver<S> {
    /// Wrap a message stream.
    pub fn new(inner: S) -> Self {
        Self { inner }
    }
}

impl<S, E> PeerReceiver for StreamReceiver<S>
where
    S: Stream<Item = std::result::Result<Message, E>> + Unpin + Send,
    E: Into<ChannelError> + Send,
{
    async fn receive_next(&mut self) -> Result<Message> {
        let inner = &mut self.inner;
        match poll_fn(|cx| Pin::new(&mut *inner).poll_next(cx)).await {
            Some(Ok(message)) => Ok(message),
            Some(Err(err)) => Err(err.into()),
            None => Err(ChannelError::ConnectionClosed),
        }
    }
}
