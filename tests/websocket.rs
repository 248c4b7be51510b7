//! End-to-end tests over a real listener with a WebSocket client.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use wspool::{routes, ClientMessage, Pool, PoolConfig, PoolState};

const TIMEOUT: Duration = Duration::from_secs(5);

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Boots a server around a fresh pool and returns its base URL.
async fn boot(config: PoolConfig) -> (String, Pool) {
    let pool = Pool::new(config).expect("pool");
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");

    let app = routes::router(pool.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve");
    });

    (format!("ws://{}", addr), pool)
}

async fn connect(base: &str, id: &str) -> WsStream {
    let (ws, _) = connect_async(format!("{}/ws/{}", base, id))
        .await
        .expect("connect");
    ws
}

async fn wait_for_count(pool: &Pool, expected: usize) {
    for _ in 0..200 {
        if pool.count() == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(pool.count(), expected);
}

/// Reads the next text or binary message, skipping control frames.
async fn next_message(ws: &mut WsStream) -> Option<Message> {
    loop {
        let msg = timeout(TIMEOUT, ws.next())
            .await
            .expect("timeout waiting for message")?;
        match msg {
            Ok(msg @ (Message::Text(_) | Message::Binary(_))) => return Some(msg),
            Ok(Message::Close(_)) | Err(_) => return None,
            Ok(_) => continue,
        }
    }
}

#[tokio::test]
async fn test_echo() {
    let (base, pool) = boot(PoolConfig::with_capacity(4)).await;
    pool.register_handler(|pool: Pool, msg: ClientMessage| async move {
        let _ = pool.send(msg.client_id, msg.payload).await;
    })
    .expect("handler");

    let mut ws = connect(&base, "alice").await;
    wait_for_count(&pool, 1).await;

    ws.send(Message::text("Hello")).await.expect("send");
    assert_eq!(next_message(&mut ws).await, Some(Message::text("Hello")));

    pool.close().await.expect("close");
}

#[tokio::test]
async fn test_binary_payload_stays_binary() {
    let (base, pool) = boot(PoolConfig::with_capacity(4)).await;
    let mut ws = connect(&base, "bob").await;
    wait_for_count(&pool, 1).await;

    let payload = vec![0xff, 0x00, 0xfe];
    pool.send("bob", payload.clone()).await.expect("send");
    assert_eq!(
        next_message(&mut ws).await,
        Some(Message::binary(payload))
    );

    pool.close().await.expect("close");
}

#[tokio::test]
async fn test_broadcast() {
    let (base, pool) = boot(PoolConfig::with_capacity(4)).await;
    let mut a = connect(&base, "a").await;
    let mut b = connect(&base, "b").await;
    wait_for_count(&pool, 2).await;

    pool.broadcast("news").await.expect("broadcast");
    assert_eq!(next_message(&mut a).await, Some(Message::text("news")));
    assert_eq!(next_message(&mut b).await, Some(Message::text("news")));

    pool.close().await.expect("close");
}

#[tokio::test]
async fn test_pool_full_rejects_upgrade() {
    let (base, pool) = boot(PoolConfig::with_capacity(2)).await;
    let _a = connect(&base, "a").await;
    let _b = connect(&base, "b").await;

    match connect_async(format!("{}/ws/c", base)).await {
        Err(tungstenite::Error::Http(response)) => {
            assert_eq!(response.status(), 503);
        }
        Err(other) => unreachable!("unexpected error: {}", other),
        Ok(_) => unreachable!("upgrade should have been refused"),
    }

    wait_for_count(&pool, 2).await;
    assert_eq!(pool.metrics().registrations_rejected(), 1);

    pool.close().await.expect("close");
}

#[tokio::test]
async fn test_client_disconnect_unregisters() {
    let (base, pool) = boot(PoolConfig::with_capacity(4)).await;
    let mut ws = connect(&base, "carol").await;
    wait_for_count(&pool, 1).await;

    ws.close(None).await.expect("close");
    wait_for_count(&pool, 0).await;

    // The id is free again.
    let _ws = connect(&base, "carol").await;
    wait_for_count(&pool, 1).await;

    pool.close().await.expect("close");
}

#[tokio::test]
async fn test_close_disconnects_clients() {
    let (base, pool) = boot(PoolConfig::with_capacity(4)).await;
    let mut ws = connect(&base, "dave").await;
    wait_for_count(&pool, 1).await;

    pool.close().await.expect("close");
    assert_eq!(pool.state(), PoolState::Closed);
    assert_eq!(pool.count(), 0);
    assert_eq!(next_message(&mut ws).await, None);

    assert!(pool.send("dave", "late").await.is_err());
}
