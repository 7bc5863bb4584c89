mod common;

use std::time::Duration;

use common::{free_port, wait_for_state, Fixture};
use elmbridge::{Bridge, NetworkBridge};
use elmbridge_core::{BridgeState, NetworkConfig};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

fn localhost(base_port: u16) -> NetworkConfig {
    NetworkConfig {
        bind_address: "127.0.0.1".to_string(),
        base_port,
    }
}

#[tokio::test]
async fn test_client_bytes_reach_emulator_and_back() {
    let fx = Fixture::new();
    let bridge = NetworkBridge::new(localhost(free_port()), fx.ctx.clone());
    bridge.start().await.unwrap();
    let port = bridge.bound_port().unwrap();

    let mut client = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    client.write_all(&[0x41, 0x42, 0x43]).await.unwrap();

    let mut echoed = [0u8; 3];
    tokio::time::timeout(Duration::from_secs(2), client.read_exact(&mut echoed))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(echoed, [0x41, 0x42, 0x43]);
    assert_eq!(bridge.state(), BridgeState::Connected);

    assert!(fx.logged(&format!("Network server listening on port {}", port)));
    assert!(fx.logged("Client connected: 127.0.0.1:"));
    assert!(fx.logged("Loopback socket connected"));
    assert!(fx.wait_for_log(" * Received from network:").await);
    assert!(fx.wait_for_log(" * Sending data to network:").await);

    bridge.stop().await;
}

#[tokio::test]
async fn test_busy_port_is_skipped() {
    let fx = Fixture::new();
    let blocker = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let busy = blocker.local_addr().unwrap().port();

    let bridge = NetworkBridge::new(localhost(busy), fx.ctx.clone());
    bridge.start().await.unwrap();

    let port = bridge.bound_port().unwrap();
    assert!(port > busy);
    assert!(fx.logged(&format!("Port {} in use", busy)));
    assert!(fx.logged(&format!("Network server listening on port {}", port)));

    bridge.stop().await;
}

#[tokio::test]
async fn test_disconnect_returns_to_listening() {
    let fx = Fixture::new();
    let bridge = NetworkBridge::new(localhost(free_port()), fx.ctx.clone());
    bridge.start().await.unwrap();
    let port = bridge.bound_port().unwrap();

    let client = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    assert!(wait_for_state(|| bridge.state(), BridgeState::Connected).await);
    drop(client);

    assert!(fx.wait_for_log("Network connection closed").await);
    assert!(wait_for_state(|| bridge.state(), BridgeState::Listening).await);

    // the same listener serves the next client
    let mut second = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    second.write_all(b"ATI\r").await.unwrap();
    let mut echoed = [0u8; 4];
    second.read_exact(&mut echoed).await.unwrap();
    assert_eq!(&echoed, b"ATI\r");

    bridge.stop().await;
}

#[tokio::test]
async fn test_stop_during_relay_is_bounded() {
    let fx = Fixture::new();
    let bridge = NetworkBridge::new(localhost(free_port()), fx.ctx.clone());
    bridge.start().await.unwrap();
    let port = bridge.bound_port().unwrap();

    let mut client = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    client.write_all(b"ATZ\r").await.unwrap();
    let mut echoed = [0u8; 4];
    client.read_exact(&mut echoed).await.unwrap();
    assert_eq!(fx.emulator_channels_closed(), 0);

    tokio::time::timeout(Duration::from_secs(3), bridge.stop())
        .await
        .expect("stop completes");
    assert_eq!(bridge.state(), BridgeState::Stopped);
    assert_eq!(bridge.bound_port(), None);

    // the external connection was closed
    let mut rest = Vec::new();
    let closed = tokio::time::timeout(Duration::from_secs(2), client.read_to_end(&mut rest)).await;
    assert!(closed.is_ok());

    // the emulator side saw its channel close
    assert!(fx.wait_for_emulator_closed(1).await);

    // and so was the listener
    assert!(TcpStream::connect(("127.0.0.1", port)).await.is_err());
    assert!(fx.logged("Cancelled"));
}

#[tokio::test]
async fn test_stop_is_idempotent() {
    let fx = Fixture::new();
    let bridge = NetworkBridge::new(localhost(free_port()), fx.ctx.clone());

    bridge.stop().await;
    bridge.start().await.unwrap();
    bridge.stop().await;
    bridge.stop().await;
    assert_eq!(bridge.state(), BridgeState::Stopped);
}

#[tokio::test]
async fn test_stale_sockets_cleared_after_accept() {
    let fx = Fixture::new();
    let stale = fx.dir.path().join("previous-run.sock");
    drop(std::os::unix::net::UnixListener::bind(&stale).unwrap());

    let bridge = NetworkBridge::new(localhost(free_port()), fx.ctx.clone());
    bridge.start().await.unwrap();
    let port = bridge.bound_port().unwrap();
    assert!(stale.exists());

    let mut client = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    client.write_all(b"ATZ\r").await.unwrap();
    let mut echoed = [0u8; 4];
    client.read_exact(&mut echoed).await.unwrap();

    assert!(!stale.exists());
    // the live emulator socket is kept
    assert!(fx.dir.path().join(common::EMULATOR_SOCKET).exists());

    bridge.stop().await;
}
