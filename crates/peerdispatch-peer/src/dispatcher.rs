use std::convert::Infallible;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use peerdispatch_channel::{Message, PeerReceiver, PeerSender};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;
use tracing::{debug, trace, warn};

use crate::config::DispatcherConfig;
use crate::error::Result;
use crate::handler::{Handler, HandlerId};
use crate::handshake::{handshake_with_config, HandshakeConfig, HandshakeResult};
use crate::registry::HandlerRegistry;
use crate::waiter::ResponseWaiter;

/// State shared between a dispatcher, its handles and its waiters.
pub(crate) struct Shared {
    registry: Mutex<HandlerRegistry>,
    tasks: TaskTracker,
}

impl Shared {
    // Handlers never run under this lock, so a poisoned guard still holds a
    // consistent registry.
    pub(crate) fn lock(&self) -> MutexGuard<'_, HandlerRegistry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Remove a handler and drop it after the lock is released.
    pub(crate) fn deregister(&self, id: HandlerId) -> bool {
        let removed = self.lock().remove(id);
        removed.is_some()
    }
}

/// Cloneable access to a dispatcher's handler registry.
///
/// This is what external collaborators hold: they register handlers, create
/// response waiters and may feed messages through [`dispatch`](Self::dispatch)
/// while the dispatcher itself is busy in its pump loop.
#[derive(Clone)]
pub struct DispatcherHandle {
    pub(crate) shared: Arc<Shared>,
}

impl DispatcherHandle {
    fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                registry: Mutex::new(HandlerRegistry::new()),
                tasks: TaskTracker::new(),
            }),
        }
    }

    /// Register a handler; it sees every message dispatched from now on.
    pub fn register(&self, handler: Handler) -> HandlerId {
        self.register_with(|_| handler)
    }

    /// Register a handler built from its own id.
    ///
    /// `build` runs outside the registry lock, so it may touch the handle.
    /// The handler takes its delivery position when `build` returns; anything
    /// `build` registers itself is delivered to first.
    pub fn register_with(&self, build: impl FnOnce(HandlerId) -> Handler) -> HandlerId {
        let id = self.shared.lock().issue_id();
        let handler = build(id);
        let refused = self.shared.lock().insert(id, handler);
        drop(refused);
        id
    }

    /// Remove a handler. Unknown or already removed ids are a no-op.
    pub fn deregister(&self, id: HandlerId) -> bool {
        self.shared.deregister(id)
    }

    /// Check whether a handler is still registered.
    pub fn is_registered(&self, id: HandlerId) -> bool {
        self.shared.lock().contains(id)
    }

    /// Number of registered handlers.
    pub fn handler_count(&self) -> usize {
        self.shared.lock().len()
    }

    /// Fan a message out to every registered handler.
    ///
    /// The handler set is snapshotted first: handlers registered during the
    /// pass do not see this message, and handlers removed during the pass
    /// still do. Every handler gets its own copy. Immediate handlers run
    /// inline in registration order; scheduled handlers are spawned in
    /// registration order and never hold up the handlers after them.
    ///
    /// Scheduled handlers need a Tokio runtime. Outside one they are skipped
    /// with a warning.
    ///
    /// Returns the number of handlers the message was delivered to.
    pub fn dispatch(&self, message: &Message) -> usize {
        let snapshot = self.shared.lock().snapshot();
        trace!(name = %message.name, handlers = snapshot.len(), "dispatching message");

        let runtime = Handle::try_current().ok();
        let mut delivered = 0;
        for (id, handler) in &snapshot {
            match handler {
                Handler::Immediate(callback) => callback(message.clone()),
                Handler::Scheduled(callback) => {
                    let Some(runtime) = &runtime else {
                        warn!(
                            %id,
                            name = %message.name,
                            "no Tokio runtime, scheduled handler skipped"
                        );
                        continue;
                    };
                    trace!(%id, "spawning scheduled handler");
                    self.shared.tasks.spawn_on(callback(message.clone()), runtime);
                }
            }
            delivered += 1;
        }

        delivered
    }

    /// Drop every handler and refuse new ones. Pending waiters fail with
    /// [`DispatchError::Closed`](crate::DispatchError::Closed).
    pub fn close(&self, reason: impl Into<String>) {
        let drained = self.shared.lock().close(reason);
        drop(drained);
    }

    /// Returns true once the dispatcher has stopped.
    pub fn is_closed(&self) -> bool {
        self.shared.lock().is_closed()
    }

    /// Reason the dispatcher stopped, if it has.
    pub fn closed_reason(&self) -> Option<String> {
        self.shared.lock().closed_reason().map(str::to_string)
    }

    /// Wait until every scheduled handler task spawned so far has finished.
    pub async fn drain(&self) {
        let tasks = &self.shared.tasks;
        tasks.close();
        tasks.wait().await;
        if !self.is_closed() {
            tasks.reopen();
        }
    }

    /// [`drain`](Self::drain) bounded by a timeout. Returns false on expiry.
    pub async fn drain_within(&self, timeout: Duration) -> bool {
        let drained = tokio::time::timeout(timeout, self.drain()).await.is_ok();
        if !drained && !self.is_closed() {
            self.shared.tasks.reopen();
        }
        drained
    }
}

impl fmt::Debug for DispatcherHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registry = self.shared.lock();
        f.debug_struct("DispatcherHandle")
            .field("handlers", &registry.len())
            .field("closed", &registry.closed_reason())
            .field("tasks", &self.shared.tasks.len())
            .finish()
    }
}

/// Message dispatcher for one peer connection.
///
/// Owns the receiving half of the peer channel. Runs the handshake once,
/// then pumps messages to registered handlers until the connection ends.
pub struct Dispatcher<S, R> {
    sender: Arc<S>,
    receiver: R,
    handle: DispatcherHandle,
    config: DispatcherConfig,
}

impl<S, R> Dispatcher<S, R>
where
    S: PeerSender,
    R: PeerReceiver,
{
    /// Create a dispatcher with default configuration.
    pub fn new(sender: S, receiver: R) -> Self {
        Self::with_config(sender, receiver, DispatcherConfig::default())
    }

    /// Create a dispatcher with explicit configuration.
    pub fn with_config(sender: S, receiver: R, config: DispatcherConfig) -> Self {
        Self {
            sender: Arc::new(sender),
            receiver,
            handle: DispatcherHandle::new(),
            config,
        }
    }

    /// Handle for registering handlers and waiters.
    pub fn handle(&self) -> DispatcherHandle {
        self.handle.clone()
    }

    /// Shared sending half, for collaborators that talk to the peer.
    pub fn sender(&self) -> Arc<S> {
        Arc::clone(&self.sender)
    }

    /// Dispatcher configuration.
    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Send a message to the peer.
    pub fn send(&self, message: Message) -> Result<()> {
        self.sender.as_ref().send(message)?;
        Ok(())
    }

    /// See [`DispatcherHandle::register`].
    pub fn register(&self, handler: Handler) -> HandlerId {
        self.handle.register(handler)
    }

    /// See [`DispatcherHandle::deregister`].
    pub fn deregister(&self, id: HandlerId) -> bool {
        self.handle.deregister(id)
    }

    /// See [`DispatcherHandle::wait_for`].
    pub fn wait_for<I, N>(&self, names: I) -> ResponseWaiter
    where
        I: IntoIterator<Item = N>,
        N: Into<String>,
    {
        self.handle.wait_for(names)
    }

    /// Run the version/verack handshake with default configuration.
    pub async fn run_handshake(&mut self) -> Result<HandshakeResult> {
        self.run_handshake_with_config(&HandshakeConfig::default())
            .await
    }

    /// Run the version/verack handshake with explicit configuration.
    pub async fn run_handshake_with_config(
        &mut self,
        config: &HandshakeConfig,
    ) -> Result<HandshakeResult> {
        handshake_with_config(self.sender.as_ref(), &mut self.receiver, &self.handle, config).await
    }

    /// Receive and dispatch messages until the channel fails.
    ///
    /// Only ever returns the error that ended the connection. Before
    /// returning it closes the registry, failing pending waiters, and (if
    /// configured) drains in-flight scheduled handlers.
    pub async fn run_pump(mut self) -> Result<Infallible> {
        debug!(handlers = self.handle.handler_count(), "pump loop started");

        let err = loop {
            match self.receiver.receive_next().await {
                Ok(message) => {
                    self.handle.dispatch(&message);
                }
                Err(err) => break err,
            }
        };

        debug!(error = %err, "pump loop terminated");
        self.handle.close(err.to_string());

        if self.config.drain_on_close && !self.handle.drain_within(self.config.drain_timeout).await
        {
            warn!(
                timeout = ?self.config.drain_timeout,
                "scheduled handlers still running after drain timeout"
            );
        }

        Err(err.into())
    }

    /// Spawn [`run_pump`](Self::run_pump) on the current Tokio runtime.
    pub fn spawn_pump(self) -> JoinHandle<Result<Infallible>>
    where
        S: 'static,
        R: 'static,
    {
        tokio::spawn(self.run_pump())
    }
}

impl<S, R> Drop for Dispatcher<S, R> {
    fn drop(&mut self) {
        if !self.handle.is_closed() {
            self.handle.close("dispatcher dropped");
        }
    }
}

impl<S, R> fmt::Debug for Dispatcher<S, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("handle", &self.handle)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use peerdispatch_channel::memory::{self, RemotePeer};
    use peerdispatch_channel::{ChannelError, MemoryReceiver, MemorySender};
    use serde_json::json;

    use super::*;
    use crate::error::DispatchError;

    fn loopback() -> (Dispatcher<MemorySender, MemoryReceiver>, RemotePeer) {
        let (sender, receiver, remote) = memory::pair();
        (Dispatcher::new(sender, receiver), remote)
    }

    fn recorder() -> (Arc<Mutex<Vec<Message>>>, Handler) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let handler = Handler::immediate(move |message| sink.lock().unwrap().push(message));
        (seen, handler)
    }

    fn inv(items: serde_json::Value) -> Message {
        Message::from_serialize("inv", &json!({ "items": items })).unwrap()
    }

    #[tokio::test]
    async fn handlers_get_independent_copies() {
        let (dispatcher, _remote) = loopback();
        let handle = dispatcher.handle();

        let mutated = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&mutated);
        handle.register(Handler::immediate(move |mut message| {
            message.fields.insert("tampered".to_string(), json!(true));
            message.fields.remove("items");
            sink.lock().unwrap().push(message);
        }));
        let (seen, handler) = recorder();
        handle.register(handler);

        let original = inv(json!(["x"]));
        assert_eq!(handle.dispatch(&original), 2);

        assert_eq!(seen.lock().unwrap()[0], original);
        let tampered = &mutated.lock().unwrap()[0];
        assert_eq!(tampered.field("tampered"), Some(&json!(true)));
        assert!(tampered.field("items").is_none());
        assert_eq!(original.field("items"), Some(&json!(["x"])));
    }

    #[tokio::test]
    async fn immediate_handlers_run_in_registration_order() {
        let (dispatcher, _remote) = loopback();
        let handle = dispatcher.handle();
        let order = Arc::new(Mutex::new(Vec::new()));

        for tag in 0..4 {
            let order = Arc::clone(&order);
            handle.register(Handler::immediate(move |_| order.lock().unwrap().push(tag)));
        }

        handle.dispatch(&Message::empty("ping"));
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn nested_registration_is_delivered_in_insertion_order() {
        let (dispatcher, _remote) = loopback();
        let handle = dispatcher.handle();
        let order = Arc::new(Mutex::new(Vec::new()));

        let registrar = handle.clone();
        let outer_log = Arc::clone(&order);
        let inner_log = Arc::clone(&order);
        let outer = handle.register_with(move |_| {
            registrar.register(Handler::immediate(move |_| {
                inner_log.lock().unwrap().push("inner")
            }));
            Handler::immediate(move |_| outer_log.lock().unwrap().push("outer"))
        });

        assert_eq!(handle.dispatch(&Message::empty("ping")), 2);
        assert_eq!(*order.lock().unwrap(), vec!["inner", "outer"]);
        assert!(handle.is_registered(outer));
    }

    #[tokio::test]
    async fn pending_scheduled_handler_does_not_hold_up_later_handlers() {
        let (dispatcher, _remote) = loopback();
        let handle = dispatcher.handle();
        handle.register(Handler::scheduled(|_| std::future::pending::<()>()));
        let (seen, handler) = recorder();
        handle.register(handler);

        assert_eq!(handle.dispatch(&Message::empty("inv")), 2);
        assert_eq!(seen.lock().unwrap().len(), 1);
        assert!(!handle.drain_within(Duration::from_millis(10)).await);
        assert!(!handle.shared.tasks.is_closed());
    }

    #[test]
    fn scheduled_handlers_are_skipped_outside_a_runtime() {
        let (dispatcher, _remote) = loopback();
        let handle = dispatcher.handle();
        handle.register(Handler::scheduled(|_| async {}));
        let (seen, handler) = recorder();
        handle.register(handler);

        assert_eq!(handle.dispatch(&Message::empty("inv")), 1);
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn handler_added_mid_pass_misses_current_message() {
        let (dispatcher, _remote) = loopback();
        let handle = dispatcher.handle();
        let late_calls = Arc::new(AtomicUsize::new(0));

        let registrar = handle.clone();
        let counter = Arc::clone(&late_calls);
        handle.register(Handler::immediate(move |_| {
            let counter = Arc::clone(&counter);
            registrar.register(Handler::immediate(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }));
        }));

        handle.dispatch(&Message::empty("ping"));
        assert_eq!(late_calls.load(Ordering::SeqCst), 0);
        assert_eq!(handle.handler_count(), 2);

        handle.dispatch(&Message::empty("ping"));
        assert_eq!(late_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn handler_removed_mid_pass_still_sees_current_message() {
        let (dispatcher, _remote) = loopback();
        let handle = dispatcher.handle();

        let remover = handle.clone();
        let victim = Arc::new(Mutex::new(None::<HandlerId>));
        let target = Arc::clone(&victim);
        handle.register(Handler::immediate(move |_| {
            if let Some(id) = *target.lock().unwrap() {
                remover.deregister(id);
            }
        }));
        let (seen, handler) = recorder();
        *victim.lock().unwrap() = Some(handle.register(handler));

        handle.dispatch(&Message::empty("first"));
        handle.dispatch(&Message::empty("second"));

        let names: Vec<String> = seen.lock().unwrap().iter().map(|m| m.name.clone()).collect();
        assert_eq!(names, vec!["first"]);
    }

    #[tokio::test]
    async fn scheduled_handlers_are_spawned_and_drained() {
        let (dispatcher, _remote) = loopback();
        let handle = dispatcher.handle();
        let done = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&done);
        handle.register(Handler::scheduled(move |message| {
            let counter = Arc::clone(&counter);
            async move {
                tokio::task::yield_now().await;
                if message.is("inv") {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            }
        }));

        handle.dispatch(&inv(json!([1])));
        handle.dispatch(&inv(json!([2])));
        handle.drain().await;
        assert_eq!(done.load(Ordering::SeqCst), 2);

        // Tracker is reopened after a drain while the dispatcher is live.
        handle.dispatch(&inv(json!([3])));
        handle.drain().await;
        assert_eq!(done.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn pump_preserves_order_and_reports_close() {
        let (dispatcher, mut remote) = loopback();
        let (seen, handler) = recorder();
        dispatcher.register(handler);

        let names = ["inv", "headers", "tx", "block", "notfound"];
        remote
            .deliver_all(names.iter().map(|name| Message::empty(*name)))
            .unwrap();
        remote.end_stream();

        let err = dispatcher.run_pump().await.unwrap_err();
        assert!(err.is_connection_closed());

        let observed: Vec<String> = seen.lock().unwrap().iter().map(|m| m.name.clone()).collect();
        assert_eq!(observed, names);
    }

    #[tokio::test]
    async fn pump_stops_on_decode_error() {
        let (dispatcher, remote) = loopback();
        let handle = dispatcher.handle();
        let (seen, handler) = recorder();
        handle.register(handler);

        remote.deliver(Message::empty("inv")).unwrap();
        remote.deliver_decode_error("truncated payload").unwrap();
        remote.deliver(Message::empty("never-dispatched")).unwrap();

        let err = dispatcher.run_pump().await.unwrap_err();
        assert!(matches!(err, DispatchError::Channel(ChannelError::Decode(_))));
        assert_eq!(seen.lock().unwrap().len(), 1);
        assert!(handle.is_closed());
        assert_eq!(handle.handler_count(), 0);
        assert!(handle
            .closed_reason()
            .unwrap()
            .contains("truncated payload"));
    }

    #[tokio::test]
    async fn pump_drains_scheduled_handlers_before_returning() {
        let (dispatcher, mut remote) = loopback();
        let finished = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&finished);
        dispatcher.register(Handler::scheduled(move |_| {
            let counter = Arc::clone(&counter);
            async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                counter.fetch_add(1, Ordering::SeqCst);
            }
        }));

        remote.deliver(Message::empty("inv")).unwrap();
        remote.end_stream();

        let _ = dispatcher.run_pump().await;
        assert_eq!(finished.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn registration_after_close_is_refused() {
        let (dispatcher, _remote) = loopback();
        let handle = dispatcher.handle();
        drop(dispatcher);

        assert_eq!(handle.closed_reason().as_deref(), Some("dispatcher dropped"));
        let id = handle.register(Handler::immediate(|_| {}));
        assert!(!handle.is_registered(id));
        assert!(!handle.deregister(id));
    }

    #[tokio::test]
    async fn send_reaches_remote() {
        let (dispatcher, mut remote) = loopback();
        dispatcher.send(Message::empty("mempool")).unwrap();
        dispatcher.sender().send(Message::empty("ping")).unwrap();

        assert_eq!(remote.next_sent().await.unwrap().name, "mempool");
        assert_eq!(remote.next_sent().await.unwrap().name, "ping");
    }
}
