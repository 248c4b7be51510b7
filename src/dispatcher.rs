//! Outbound dispatch queues.
//!
//! Each [`Dispatcher`] is a bounded queue drained by exactly one worker task
//! for the lifetime of the pool. The pool runs two of them, one for unicast
//! and one for broadcast traffic, so that each stream stays ordered and a
//! burst of one kind cannot starve the other.

use std::sync::Arc;

use futures::future::join_all;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::task::TaskTracker;
use tracing::{debug, trace};

use super::error::PoolError;
use super::messages::Outbound;
use super::pool::Shared;
use super::transport::Frame;

/// A bounded, single-consumer delivery queue.
#[derive(Debug)]
pub struct Dispatcher {
    /// Queue name used in logs.
    name: &'static str,

    /// Producer side; `None` once closed.
    tx: Mutex<Option<mpsc::Sender<Outbound>>>,
}

impl Dispatcher {
    /// Creates the queue and spawns its worker on `tracker`.
    pub(crate) fn spawn(
        name: &'static str,
        capacity: usize,
        shared: Arc<Shared>,
        tracker: &TaskTracker,
    ) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        tracker.spawn(run(name, rx, shared));

        Self {
            name,
            tx: Mutex::new(Some(tx)),
        }
    }

    /// Returns the queue name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Enqueues a message, waiting while the queue is full.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Closed`] if the queue has been closed.
    pub async fn enqueue(&self, msg: Outbound) -> Result<(), PoolError> {
        let tx = self.tx.lock().clone().ok_or(PoolError::Closed)?;
        tx.send(msg).await.map_err(|_| PoolError::Closed)
    }

    /// Stops accepting messages.
    ///
    /// The worker drains what is already queued and exits once every
    /// in-flight producer has finished.
    pub fn close(&self) {
        self.tx.lock().take();
    }
}

async fn run(name: &'static str, mut rx: mpsc::Receiver<Outbound>, shared: Arc<Shared>) {
    debug!(queue = name, "start sending messages");

    while let Some(msg) = rx.recv().await {
        trace!(queue = name, kind = msg.kind(), size = msg.payload().len(), "dequeued message");
        deliver(&shared, msg).await;
    }

    debug!(queue = name, "message sender is stopped");
}

/// Delivers one queued item.
async fn deliver(shared: &Shared, msg: Outbound) {
    match msg {
        Outbound::Unicast(msg) => {
            let Some(conn) = shared.registry.get(msg.client_id.as_str()) else {
                trace!(client_id = %msg.client_id, "recipient is gone, dropping message");
                return;
            };
            shared
                .write_or_evict(&conn, Frame::Message(msg.payload), "client message")
                .await;
        }
        Outbound::Broadcast(msg) => {
            let conns = shared.registry.snapshot();
            trace!(recipients = conns.len(), "broadcasting message");

            // Writes are independent: a stalled peer only holds up its own future.
            join_all(conns.iter().map(|conn| {
                shared.write_or_evict(conn, Frame::Message(msg.payload.clone()), "broadcast message")
            }))
            .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio_test::assert_ok;

    use super::*;
    use crate::config::PoolConfig;
    use crate::messages::{BroadcastMessage, ClientMessage};
    use crate::pool::tests::attach;

    #[tokio::test]
    async fn test_dispatcher_enqueue_after_close() {
        let shared = Arc::new(Shared::new(PoolConfig::default()));
        let tracker = TaskTracker::new();
        let dispatcher = Dispatcher::spawn("unicast", 4, shared, &tracker);

        assert_eq!(dispatcher.name(), "unicast");
        assert_ok!(
            dispatcher
                .enqueue(Outbound::from(ClientMessage::new("a", "x")))
                .await
        );

        dispatcher.close();

        let result = dispatcher
            .enqueue(Outbound::from(ClientMessage::new("a", "x")))
            .await;
        assert!(matches!(result, Err(PoolError::Closed)));

        tracker.close();
        tracker.wait().await;
    }

    #[tokio::test]
    async fn test_dispatcher_drains_before_exit() {
        let shared = Arc::new(Shared::new(PoolConfig::with_capacity(4)));
        let (_conn, mut peer) = attach(&shared, "a");
        let tracker = TaskTracker::new();
        let dispatcher = Dispatcher::spawn("broadcast", 4, Arc::clone(&shared), &tracker);

        for payload in ["1", "2", "3"] {
            assert_ok!(
                dispatcher
                    .enqueue(Outbound::from(BroadcastMessage::new(payload)))
                    .await
            );
        }
        dispatcher.close();
        tracker.close();
        tracker.wait().await;

        assert_eq!(peer.next_message().await, Some("1".into()));
        assert_eq!(peer.next_message().await, Some("2".into()));
        assert_eq!(peer.next_message().await, Some("3".into()));
        assert_eq!(shared.metrics.messages_sent(), 3);
    }

    #[tokio::test]
    async fn test_deliver_unicast_to_missing_client() {
        let shared = Shared::new(PoolConfig::default());
        deliver(&shared, Outbound::from(ClientMessage::new("ghost", "x"))).await;
        assert_eq!(shared.metrics.messages_sent(), 0);
        assert_eq!(shared.metrics.write_failures(), 0);
    }

    #[tokio::test]
    async fn test_deliver_broadcast_isolates_failures() {
        let shared = Shared::new(PoolConfig::with_capacity(4));
        let (_a, mut peer_a) = attach(&shared, "a");
        let (_b, mut peer_b) = attach(&shared, "b");
        let (_c, mut peer_c) = attach(&shared, "c");
        peer_b.break_writes();

        deliver(&shared, Outbound::from(BroadcastMessage::new("hello"))).await;

        assert_eq!(peer_a.next_message().await, Some("hello".into()));
        assert_eq!(peer_c.next_message().await, Some("hello".into()));
        assert_eq!(shared.metrics.messages_sent(), 2);
        assert_eq!(shared.metrics.write_failures(), 1);
        assert_eq!(shared.registry.len(), 2);
        assert!(!shared.registry.contains("b"));
    }
}
