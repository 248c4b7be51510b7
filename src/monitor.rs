//! Keepalive monitor.
//!
//! Pings every registered connection on a fixed period, independent of
//! traffic. A failed ping evicts the connection like any other failed write.
//! Silent peers are caught by the reader's read deadline, which only pongs
//! (or other inbound frames) extend.

use std::sync::Arc;

use bytes::Bytes;
use futures::future::join_all;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::pool::Shared;
use super::transport::Frame;

/// Runs the ping loop until `shutdown` is cancelled.
pub(crate) async fn run(shared: Arc<Shared>, shutdown: CancellationToken) {
    debug!("start sending ping messages");

    let period = shared.config.ping_period();
    let mut ticker = time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            () = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                probe_all(&shared).await;
            }
        }
    }

    debug!("ping message sender is stopped");
}

/// Sends one ping to every registered connection.
///
/// Returns the number of connections that acknowledged the write.
pub(crate) async fn probe_all(shared: &Shared) -> usize {
    let conns = shared.registry.snapshot();
    trace!(connections = conns.len(), "sending pings");

    let results = join_all(conns.iter().map(|conn| async move {
        let ok = shared
            .write_or_evict(conn, Frame::Ping(Bytes::new()), "ping message")
            .await;
        if ok {
            shared.metrics.record_ping_sent();
        }
        ok
    }))
    .await;

    results.into_iter().filter(|ok| *ok).count()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio_util::task::TaskTracker;

    use super::*;
    use crate::config::PoolConfig;
    use crate::pool::tests::attach;

    #[tokio::test]
    async fn test_probe_all_pings_every_connection() {
        let shared = Shared::new(PoolConfig::with_capacity(4));
        let (_a, mut peer_a) = attach(&shared, "a");
        let (_b, mut peer_b) = attach(&shared, "b");

        assert_eq!(probe_all(&shared).await, 2);
        assert_eq!(peer_a.next_frame().await, Some(Frame::Ping(Bytes::new())));
        assert_eq!(peer_b.next_frame().await, Some(Frame::Ping(Bytes::new())));
        assert_eq!(shared.metrics.pings_sent(), 2);
    }

    #[tokio::test]
    async fn test_probe_all_evicts_dead_peer() {
        let shared = Shared::new(PoolConfig::with_capacity(4));
        let (_a, _peer_a) = attach(&shared, "a");
        let (_b, mut peer_b) = attach(&shared, "b");
        peer_b.break_writes();

        assert_eq!(probe_all(&shared).await, 1);
        assert_eq!(shared.registry.len(), 1);
        assert!(shared.registry.contains("a"));
        assert_eq!(shared.metrics.write_failures(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitor_ticks_until_cancelled() {
        let config = PoolConfig::with_capacity(4)
            .with_ping_period(Duration::from_millis(100))
            .with_read_wait(Duration::from_secs(1));
        let shared = Arc::new(Shared::new(config));
        let (_a, mut peer) = attach(&shared, "a");

        let shutdown = CancellationToken::new();
        let tracker = TaskTracker::new();
        tracker.spawn(run(Arc::clone(&shared), shutdown.clone()));

        assert_eq!(peer.next_frame().await, Some(Frame::Ping(Bytes::new())));
        assert_eq!(peer.next_frame().await, Some(Frame::Ping(Bytes::new())));

        shutdown.cancel();
        tracker.close();
        tracker.wait().await;
        assert!(shared.metrics.pings_sent() >= 2);
    }
}
