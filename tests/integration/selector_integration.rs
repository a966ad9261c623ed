//! Selector integration tests
//!
//! Drives selectors through a fully assembled [`Router`]: persisted choice
//! across restarts, and what a switch does to connections already in
//! flight.

use std::fs;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use selector_router::config::load_config_str;
use selector_router::connection::InboundContext;
use selector_router::error::ConnectionError;
use selector_router::interrupt::is_interrupted;
use selector_router::outbound::{ConnectionHandler, ConnectionOrigin, Outbound};
use selector_router::{Config, Router};

// ============================================================================
// Test Helpers
// ============================================================================

fn router_config(dir: &TempDir, interrupt_external: bool) -> Config {
    let json = format!(
        r#"{{
            "outbounds": [
                {{"tag": "direct", "type": "direct"}},
                {{"tag": "direct-2", "type": "direct"}},
                {{"tag": "block", "type": "block"}}
            ],
            "selectors": [{{
                "tag": "proxy",
                "outbounds": ["direct", "direct-2", "block"],
                "interrupt_exist_connections": {interrupt_external}
            }}],
            "cache_file": "cache.json",
            "base_dir": {:?}
        }}"#,
        dir.path().display().to_string()
    );
    load_config_str(&json).unwrap()
}

/// Echo server that serves connections until the test ends
async fn spawn_echo_server() -> (SocketAddr, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                let mut buf = [0u8; 1024];
                loop {
                    match stream.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            if stream.write_all(&buf[..n]).await.is_err() {
                                break;
                            }
                        }
                    }
                }
            });
        }
    });
    (addr, handle)
}

async fn round_trip<S: AsyncReadExt + AsyncWriteExt + Unpin>(stream: &mut S, payload: &[u8]) {
    stream.write_all(payload).await.unwrap();
    let mut buf = vec![0u8; payload.len()];
    stream.read_exact(&mut buf).await.unwrap();
    assert_eq!(buf, payload);
}

// ============================================================================
// Persistence Tests
// ============================================================================

#[test]
fn test_selection_persists_across_restart() {
    let dir = TempDir::new().unwrap();
    let config = router_config(&dir, false);

    let router = Router::new(&config).unwrap();
    router.start().unwrap();
    assert_eq!(router.selector("proxy").unwrap().now(), "direct");
    assert!(router.select("proxy", "block").unwrap());
    router.close();
    drop(router);

    let content = fs::read_to_string(dir.path().join("cache.json")).unwrap();
    let cache: serde_json::Value = serde_json::from_str(&content).unwrap();
    assert_eq!(cache["selected"]["proxy"], "block");

    let router = Router::new(&config).unwrap();
    router.start().unwrap();
    assert_eq!(router.selector("proxy").unwrap().now(), "block");
}

#[test]
fn test_stale_persisted_selection_falls_back() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("cache.json"),
        r#"{"selected": {"proxy": "removed-long-ago"}}"#,
    )
    .unwrap();
    let mut config = router_config(&dir, false);
    config.selectors[0].default = Some("direct-2".into());

    let router = Router::new(&config).unwrap();
    router.start().unwrap();
    assert_eq!(router.selector("proxy").unwrap().now(), "direct-2");
}

#[test]
fn test_repeated_select_writes_once() {
    let dir = TempDir::new().unwrap();
    let router = Router::new(&router_config(&dir, false)).unwrap();
    router.start().unwrap();
    let cache_path = dir.path().join("cache.json");

    assert!(router.select("proxy", "direct-2").unwrap());
    let first = fs::metadata(&cache_path).unwrap().modified().unwrap();

    std::thread::sleep(Duration::from_millis(20));
    assert!(router.select("proxy", "direct-2").unwrap());
    let second = fs::metadata(&cache_path).unwrap().modified().unwrap();
    assert_eq!(first, second);
}

// ============================================================================
// Interruption Tests
// ============================================================================

#[tokio::test]
async fn test_switch_interrupts_dialed_connection() {
    let dir = TempDir::new().unwrap();
    let router = Router::new(&router_config(&dir, false)).unwrap();
    router.start().unwrap();
    let (addr, server) = spawn_echo_server().await;

    let proxy = router.selector("proxy").unwrap();
    let mut conn = proxy
        .connect(addr, Duration::from_secs(5), ConnectionOrigin::Internal)
        .await
        .unwrap();
    round_trip(&mut conn, b"ping").await;

    assert!(router.select("proxy", "direct-2").unwrap());

    let mut buf = [0u8; 4];
    let err = conn.read(&mut buf).await.unwrap_err();
    assert!(is_interrupted(&err));

    let mut fresh = proxy
        .connect(addr, Duration::from_secs(5), ConnectionOrigin::Internal)
        .await
        .unwrap();
    round_trip(&mut fresh, b"again").await;

    server.abort();
}

#[tokio::test]
async fn test_inbound_connection_survives_switch_by_default() {
    let dir = TempDir::new().unwrap();
    let router = Router::new(&router_config(&dir, false)).unwrap();
    router.start().unwrap();
    let (addr, server) = spawn_echo_server().await;

    let proxy = router.selector("proxy").unwrap();
    let (mut client, inbound) = tokio::io::duplex(4096);
    let relay = {
        let proxy = Arc::clone(&proxy);
        tokio::spawn(async move {
            proxy
                .handle_connection(Box::new(inbound), InboundContext::new(addr))
                .await
        })
    };

    round_trip(&mut client, b"before").await;
    assert!(router.select("proxy", "direct-2").unwrap());
    round_trip(&mut client, b"after").await;

    drop(client);
    let result = relay.await.unwrap().unwrap();
    assert_eq!(result.client_to_upstream, 11);
    assert_eq!(result.upstream_to_client, 11);

    server.abort();
}

#[tokio::test]
async fn test_inbound_connection_interrupted_when_configured() {
    let dir = TempDir::new().unwrap();
    let router = Router::new(&router_config(&dir, true)).unwrap();
    router.start().unwrap();
    let (addr, server) = spawn_echo_server().await;

    let proxy = router.selector("proxy").unwrap();
    let (mut client, inbound) = tokio::io::duplex(4096);
    let relay = {
        let proxy = Arc::clone(&proxy);
        tokio::spawn(async move {
            proxy
                .handle_connection(Box::new(inbound), InboundContext::new(addr))
                .await
        })
    };

    round_trip(&mut client, b"hello").await;
    assert!(router.select("proxy", "direct-2").unwrap());

    let result = tokio::time::timeout(Duration::from_secs(5), relay)
        .await
        .expect("relay did not stop after the switch")
        .unwrap();
    assert!(matches!(result, Err(ConnectionError::Interrupted)));
    assert_eq!(router.connections().stats().interrupted(), 1);

    server.abort();
}

#[tokio::test]
async fn test_inbound_connection_to_blocked_member() {
    let dir = TempDir::new().unwrap();
    let router = Router::new(&router_config(&dir, false)).unwrap();
    router.start().unwrap();
    assert!(router.select("proxy", "block").unwrap());

    let (_client, inbound) = tokio::io::duplex(64);
    let proxy = router.selector("proxy").unwrap();
    let result = proxy
        .handle_connection(
            Box::new(inbound),
            InboundContext::new("127.0.0.1:9".parse().unwrap()),
        )
        .await;
    assert!(matches!(result, Err(ConnectionError::Dial(_))));
}
