use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures_core::future::BoxFuture;
use peerdispatch_channel::Message;

/// Identifier issued by a handler registry.
///
/// Identifiers increase monotonically and are never reused by the registry
/// that issued them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HandlerId(pub(crate) u64);

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

type ImmediateFn = dyn Fn(Message) + Send + Sync;
type ScheduledFn = dyn Fn(Message) -> BoxFuture<'static, ()> + Send + Sync;

/// A message handler, tagged by how it runs.
///
/// The registrant picks the variant; the dispatcher never inspects the
/// callback to decide.
#[derive(Clone)]
pub enum Handler {
    /// Runs inline during the dispatch pass.
    Immediate(Arc<ImmediateFn>),
    /// Spawned as its own task for every delivery.
    Scheduled(Arc<ScheduledFn>),
}

impl Handler {
    /// Handler that runs to completion inside the dispatch pass.
    ///
    /// Keep it short: every later handler in the pass waits for it.
    pub fn immediate<F>(f: F) -> Self
    where
        F: Fn(Message) + Send + Sync + 'static,
    {
        Self::Immediate(Arc::new(f))
    }

    /// Handler whose future is spawned on the Tokio runtime per delivery.
    pub fn scheduled<F, Fut>(f: F) -> Self
    where
        F: Fn(Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self::Scheduled(Arc::new(move |message| -> BoxFuture<'static, ()> {
            Box::pin(f(message))
        }))
    }

    /// Returns true for handlers that run as spawned tasks.
    pub fn is_scheduled(&self) -> bool {
        matches!(self, Self::Scheduled(_))
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Immediate(_) => f.write_str("Handler::Immediate"),
            Self::Scheduled(_) => f.write_str("Handler::Scheduled"),
        }
    }
}
