//! Inbound message handlers.

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::RwLock;

use super::messages::ClientMessage;
use super::pool::Pool;

/// A callback invoked for every inbound message.
///
/// Handlers receive a handle to the pool so they can reply with
/// [`Pool::send`] or [`Pool::broadcast`].
pub type Handler = Arc<dyn Fn(Pool, ClientMessage) -> BoxFuture<'static, ()> + Send + Sync>;

/// Wraps an async closure into a [`Handler`].
pub fn handler_fn<F, Fut>(f: F) -> Handler
where
    F: Fn(Pool, ClientMessage) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |pool, msg| f(pool, msg).boxed())
}

/// Append-only, ordered list of handlers.
#[derive(Default)]
pub struct HandlerSet {
    handlers: RwLock<Vec<Handler>>,
}

impl std::fmt::Debug for HandlerSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerSet")
            .field("len", &self.len())
            .finish()
    }
}

impl HandlerSet {
    /// Creates an empty handler set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a handler.
    pub fn push(&self, handler: Handler) {
        self.handlers.write().push(handler);
    }

    /// Returns the number of handlers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.read().len()
    }

    /// Returns true if no handler is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.read().is_empty()
    }

    /// Returns the handlers in registration order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Handler> {
        self.handlers.read().iter().map(Arc::clone).collect()
    }

    /// Runs every handler on `msg`, each to completion before the next.
    pub async fn dispatch(&self, pool: &Pool, msg: &ClientMessage) {
        for handler in self.snapshot() {
            handler(pool.clone(), msg.clone()).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::config::PoolConfig;

    #[test]
    fn test_handler_set_push() {
        let set = HandlerSet::new();
        assert!(set.is_empty());

        set.push(handler_fn(|_pool, _msg| async {}));
        set.push(handler_fn(|_pool, _msg| async {}));
        assert_eq!(set.len(), 2);
        assert_eq!(set.snapshot().len(), 2);
    }

    #[tokio::test]
    async fn test_handler_set_dispatch_runs_every_handler() {
        let pool = Pool::new(PoolConfig::default()).expect("pool");
        let set = HandlerSet::new();
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let calls = Arc::clone(&calls);
            set.push(handler_fn(move |_pool, _msg| {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                }
            }));
        }

        set.dispatch(&pool, &ClientMessage::new("a", "x")).await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        pool.close().await.expect("close");
    }
}
