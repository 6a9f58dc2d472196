//! Connection behavior against a local WebSocket endpoint.
//!
//! Run with: cargo test --test websocket

use std::net::SocketAddr;
use std::time::Duration;

use devtools_link::{Connection, ConnectionConfig, ConnectionState, Error};
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep, timeout};
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;
use tracing_subscriber::EnvFilter;

// ============================================================================
// Fake Remote End
// ============================================================================

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn config() -> ConnectionConfig {
    ConnectionConfig::new()
        .with_open_timeout(Duration::from_secs(2))
        .with_close_timeout(Duration::from_millis(200))
}

/// Starts a remote end on an ephemeral port and returns its address.
///
/// Methods understood by the remote end:
///
/// | Method | Behavior |
/// |--------|----------|
/// | `echo` | replies with the params |
/// | `emit` | pushes `params.event` with `params.data`, then replies `{}` |
/// | `ignore` | never replies |
/// | `hangup` | closes the socket |
/// | other | replies with a "wasn't found" error |
async fn spawn_remote() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(serve_client(stream));
        }
    });

    addr
}

async fn serve_client(stream: TcpStream) {
    let Ok(ws) = accept_async(stream).await else {
        return;
    };
    let (mut write, mut read) = ws.split();

    while let Some(Ok(message)) = read.next().await {
        let Message::Text(text) = message else {
            continue;
        };
        let Ok(request) = serde_json::from_str::<Value>(text.as_str()) else {
            continue;
        };

        let id = request["id"].clone();
        let params = request["params"].clone();

        let replies = match request["method"].as_str() {
            Some("echo") => vec![json!({"id": id, "result": params})],
            Some("emit") => vec![
                json!({"method": params["event"], "params": params["data"]}),
                json!({"id": id, "result": {}}),
            ],
            Some("ignore") => Vec::new(),
            Some("hangup") => {
                let _ = write.close().await;
                return;
            }
            Some(method) => vec![json!({
                "id": id,
                "error": {"code": -32601, "message": format!("'{method}' wasn't found")}
            })],
            None => Vec::new(),
        };

        for reply in replies {
            if write.send(Message::Text(reply.to_string().into())).await.is_err() {
                return;
            }
        }
    }
}

async fn connect(addr: SocketAddr) -> Connection {
    init_tracing();
    Connection::connect(&format!("ws://{addr}/devtools"), config())
        .await
        .expect("connect")
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_request_roundtrip() -> anyhow::Result<()> {
    let addr = spawn_remote().await;
    let conn = connect(addr).await;
    assert!(conn.is_open());

    let result = conn
        .send("echo", json!({"value": 42}), Duration::from_secs(2))
        .await?;
    assert_eq!(result, json!({"value": 42}));

    conn.destroy().await;
    assert_eq!(conn.state(), ConnectionState::Closed);
    Ok(())
}

#[tokio::test]
async fn test_concurrent_requests() -> anyhow::Result<()> {
    let addr = spawn_remote().await;
    let conn = connect(addr).await;

    let callers: Vec<_> = (0..20)
        .map(|i| {
            let conn = conn.clone();
            tokio::spawn(async move { conn.send("echo", json!(i), Duration::from_secs(2)).await })
        })
        .collect();

    for (i, caller) in callers.into_iter().enumerate() {
        assert_eq!(caller.await??, json!(i));
    }

    conn.destroy().await;
    Ok(())
}

#[tokio::test]
async fn test_pushed_event_reaches_subscriber_and_waiter() -> anyhow::Result<()> {
    let addr = spawn_remote().await;
    let conn = connect(addr).await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    conn.subscribe("Page.loadEventFired", move |params| {
        let _ = tx.send(params);
        Ok(())
    });

    let waiter = {
        let conn = conn.clone();
        tokio::spawn(async move { conn.wait_for("Page.loadEventFired", Duration::from_secs(2)).await })
    };
    sleep(Duration::from_millis(20)).await;

    conn.send(
        "emit",
        json!({"event": "Page.loadEventFired", "data": {"timestamp": 1.5}}),
        Duration::from_secs(2),
    )
    .await?;

    let params = timeout(Duration::from_secs(1), rx.recv()).await?.expect("event");
    assert_eq!(params, json!({"timestamp": 1.5}));
    assert!(waiter.await?);

    conn.destroy().await;
    Ok(())
}

#[tokio::test]
async fn test_unknown_method_is_version_mismatch() -> anyhow::Result<()> {
    let addr = spawn_remote().await;
    let conn = connect(addr).await;

    let err = conn
        .send("Tracing.start", json!({}), Duration::from_secs(2))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::VersionMismatch { .. }));

    conn.destroy().await;
    Ok(())
}

#[tokio::test]
async fn test_remote_hangup_fails_pending_requests() -> anyhow::Result<()> {
    let addr = spawn_remote().await;
    let conn = connect(addr).await;

    let blocked = {
        let conn = conn.clone();
        tokio::spawn(async move { conn.send("ignore", json!({}), Duration::from_secs(30)).await })
    };
    sleep(Duration::from_millis(50)).await;

    let _ = conn.send("hangup", json!({}), Duration::from_secs(2)).await;

    let result = timeout(Duration::from_secs(2), blocked).await??;
    assert!(matches!(result, Err(Error::ConnectionClosed)));

    let deadline = Instant::now() + Duration::from_secs(2);
    while conn.state() != ConnectionState::Closed {
        assert!(Instant::now() < deadline, "connection did not close");
        sleep(Duration::from_millis(10)).await;
    }

    conn.destroy().await;
    Ok(())
}

#[tokio::test]
async fn test_connect_refused() {
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    drop(listener);

    let err = Connection::connect(&format!("ws://{addr}"), config())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Connection { .. }));
}

#[tokio::test]
async fn test_connect_times_out_without_handshake() {
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");

    // Accepts TCP but never answers the upgrade request.
    let silent = tokio::spawn(async move {
        let (_stream, _) = listener.accept().await.expect("accept");
        sleep(Duration::from_secs(10)).await;
    });

    let started = Instant::now();
    let err = Connection::connect(
        &format!("ws://{addr}"),
        config().with_open_timeout(Duration::from_millis(200)),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, Error::ConnectTimeout { timeout_ms: 200 }));
    assert!(started.elapsed() < Duration::from_secs(2));
    silent.abort();
}
