//! Connection walkthrough against an in-process target.
//!
//! Demonstrates:
//! - send / call (blocking request with timeout)
//! - send_async + collect_async (detached request)
//! - subscribe and the binding event convention
//! - wait_for (method occurrence)
//! - destroy (releases every blocked caller)
//!
//! Usage:
//!   cargo run --example echo_target
//!   cargo run --example echo_target -- --debug

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use devtools_link::{
    AsyncOutcome, Connection, ConnectionConfig, Error, MemoryPeer, MemoryTransport, Result,
};
use serde_json::json;
use tokio::time::sleep;
use tracing_subscriber::EnvFilter;

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() {
    let debug = std::env::args().any(|a| a == "--debug");
    init_logging(debug);

    if let Err(e) = run().await {
        eprintln!("\n[ERROR] {e}");
        std::process::exit(1);
    }
}

fn init_logging(debug: bool) {
    let filter = if debug {
        "devtools_link=trace"
    } else {
        "devtools_link=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_target(false)
        .init();
}

/// Plays the remote end: answers a few methods and emits events.
fn spawn_target(peer: Arc<MemoryPeer>) {
    tokio::spawn(async move {
        while let Some(request) = peer.recv_request().await {
            match request["method"].as_str() {
                Some("getStatus") => {
                    peer.respond(&request, json!({"ok": true}));
                }
                Some("Page.navigate") => {
                    peer.respond(&request, json!({"frameId": "main"}));
                    let peer = Arc::clone(&peer);
                    tokio::spawn(async move {
                        sleep(Duration::from_millis(300)).await;
                        peer.push_event("Page.loadEventFired", json!({"timestamp": 0.3}));
                        peer.push_event(
                            "Runtime.bindingCalled",
                            json!({"name": "onReady", "payload": "{\"ready\":true}"}),
                        );
                    });
                }
                Some("Legacy.method") => {
                    peer.respond_error(&request, "'Legacy.method' wasn't found");
                }
                Some("Slow.method") => {}
                _ => {
                    peer.respond(&request, json!({}));
                }
            }
        }
    });
}

async fn run() -> Result<()> {
    println!("=== Echo Target ===\n");

    // ========================================================================
    // Setup
    // ========================================================================

    let (transport, peer) = MemoryTransport::pair();
    spawn_target(Arc::new(peer));

    let config = ConnectionConfig::new().with_command_timeout(Duration::from_secs(2));
    let conn = Connection::open_with(async move { Ok(transport) }, config).await?;
    println!("[Setup] ✓ Connection {}\n", conn.state());

    // ========================================================================
    // Requests
    // ========================================================================

    println!("[1] send('getStatus')");
    let status = conn.send("getStatus", json!({}), Duration::from_secs(5)).await?;
    println!("    ✓ {status}\n");

    println!("[2] call('Legacy.method') (expect version mismatch)");
    match conn.call("Legacy.method", json!({})).await {
        Err(Error::VersionMismatch { message, .. }) => println!("    ✓ {message}\n"),
        other => println!("    ✗ Unexpected: {other:?}\n"),
    }

    println!("[3] send_async('Runtime.enable')");
    let id = conn.send_async("Runtime.enable", json!({})).await?;
    sleep(Duration::from_millis(50)).await;
    match conn.collect_async(&id) {
        AsyncOutcome::Ready(result) => println!("    ✓ Collected {result:?}\n"),
        AsyncOutcome::Pending => println!("    … Still pending\n"),
        AsyncOutcome::Unknown => println!("    ✗ Unknown request\n"),
    }

    // ========================================================================
    // Events
    // ========================================================================

    println!("[4] subscribe + wait_for");
    let loads = Arc::new(AtomicUsize::new(0));
    {
        let loads = Arc::clone(&loads);
        conn.subscribe("Page.loadEventFired", move |params| {
            loads.fetch_add(1, Ordering::SeqCst);
            println!("    → Page loaded: {params}");
            Ok(())
        });
    }
    conn.subscribe("onReady", |params| {
        println!("    → Binding onReady: {}", params["payload"]);
        Ok(())
    });

    conn.call("Page.navigate", json!({"url": "about:blank"})).await?;
    let fired = conn
        .wait_for("Page.loadEventFired", Duration::from_secs(2))
        .await;
    sleep(Duration::from_millis(50)).await;
    println!(
        "    ✓ wait_for returned {fired}, observer saw {} event(s)\n",
        loads.load(Ordering::SeqCst)
    );

    // ========================================================================
    // Shutdown
    // ========================================================================

    println!("[5] destroy with a request in flight");
    let blocked = {
        let conn = conn.clone();
        tokio::spawn(async move { conn.send("Slow.method", json!({}), Duration::from_secs(30)).await })
    };
    sleep(Duration::from_millis(50)).await;

    conn.destroy().await;
    match blocked.await {
        Ok(Err(e)) => println!("    ✓ In-flight request released: {e}"),
        other => println!("    ✗ Unexpected: {other:?}"),
    }
    println!("    ✓ State: {}", conn.state());

    println!("\n=== Done ===\n");
    Ok(())
}
