use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::task::{Context, Poll};
use std::time::Duration;

use peerdispatch_channel::Message;
use tokio::sync::oneshot;
use tracing::trace;

use crate::dispatcher::{DispatcherHandle, Shared};
use crate::error::{DispatchError, Result};
use crate::handler::{Handler, HandlerId};

/// State behind a waiter's handler: the names it accepts, the result slot and
/// the id it uses to deregister itself.
struct WaiterState {
    id: HandlerId,
    names: HashSet<String>,
    slot: Mutex<Option<oneshot::Sender<Message>>>,
    registry: Weak<Shared>,
}

impl WaiterState {
    fn offer(&self, message: Message) {
        if !self.names.contains(&message.name) {
            return;
        }

        let sender = self
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(sender) = sender else {
            return;
        };

        if let Some(shared) = self.registry.upgrade() {
            shared.deregister(self.id);
        }
        trace!(id = %self.id, name = %message.name, "waiter resolved");
        // The waiter may have been dropped in the meantime; nothing to do then.
        let _ = sender.send(message);
    }
}

/// A pending one-shot wait for a message with one of a set of names.
///
/// Resolves with the first matching message dispatched after creation.
/// Dropping it before that deregisters its handler.
pub struct ResponseWaiter {
    id: HandlerId,
    rx: oneshot::Receiver<Message>,
    shared: Arc<Shared>,
}

impl ResponseWaiter {
    /// Registration id of the waiter's handler.
    pub fn id(&self) -> HandlerId {
        self.id
    }
}

impl Future for ResponseWaiter {
    type Output = Result<Message>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match Pin::new(&mut this.rx).poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Ok(message)) => Poll::Ready(Ok(message)),
            Poll::Ready(Err(_)) => {
                let err = match this.shared.lock().closed_reason() {
                    Some(reason) => DispatchError::Closed(reason.to_string()),
                    None => DispatchError::Cancelled(this.id),
                };
                Poll::Ready(Err(err))
            }
        }
    }
}

impl Drop for ResponseWaiter {
    fn drop(&mut self) {
        self.shared.deregister(self.id);
    }
}

impl fmt::Debug for ResponseWaiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseWaiter")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

impl DispatcherHandle {
    /// Wait for the next message whose name is in `names`.
    ///
    /// The waiter is registered immediately, so it sees every message
    /// dispatched after this call returns. It resolves exactly once and
    /// removes itself. No timeout is applied; see
    /// [`wait_for_timeout`](Self::wait_for_timeout).
    pub fn wait_for<I, N>(&self, names: I) -> ResponseWaiter
    where
        I: IntoIterator<Item = N>,
        N: Into<String>,
    {
        let names: HashSet<String> = names.into_iter().map(Into::into).collect();
        let (tx, rx) = oneshot::channel();
        let registry = Arc::downgrade(&self.shared);

        let id = self.register_with(move |id| {
            trace!(%id, ?names, "waiter registered");
            let state = WaiterState {
                id,
                names,
                slot: Mutex::new(Some(tx)),
                registry,
            };
            Handler::immediate(move |message| state.offer(message))
        });

        ResponseWaiter {
            id,
            rx,
            shared: Arc::clone(&self.shared),
        }
    }

    /// [`wait_for`](Self::wait_for) bounded by a deadline.
    ///
    /// The waiter is registered before this returns. On expiry it is dropped,
    /// and with it its registration.
    pub fn wait_for_timeout<I, N>(
        &self,
        names: I,
        timeout: Duration,
    ) -> impl Future<Output = Result<Message>> + Send + 'static
    where
        I: IntoIterator<Item = N>,
        N: Into<String>,
    {
        let waiter = self.wait_for(names);
        async move {
            match tokio::time::timeout(timeout, waiter).await {
                Ok(result) => result,
                Err(_) => Err(DispatchError::Timeout(timeout)),
            }
        }
    }
}
