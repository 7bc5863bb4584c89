mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{wait_for_state, Fixture};
use elmbridge::transport::ble::gatt::{
    GattEvent, GattStatus, CCCD_UUID, ENABLE_NOTIFICATION_VALUE, GREETING,
    RX_CHARACTERISTIC_UUID, SERVICE_UUID, TX_CHARACTERISTIC_UUID,
};
use elmbridge::transport::ble::mock::MockPeripheral;
use elmbridge::{BleBridge, Bridge};
use elmbridge_core::{hexdump, BleConfig, BridgeError, BridgeState};

const DEVICE: &str = "5C:F3:70:A1:22:10";

fn config() -> BleConfig {
    BleConfig {
        device_name: Some("OBDII".to_string()),
        registration_timeout_ms: 1000,
    }
}

async fn started(fx: &Fixture) -> (Arc<MockPeripheral>, BleBridge) {
    let peripheral = Arc::new(MockPeripheral::new());
    let bridge = BleBridge::new(peripheral.clone(), config(), fx.ctx.clone());
    bridge.start().await.unwrap();
    (peripheral, bridge)
}

fn subscribe(peripheral: &MockPeripheral, request_id: u32) {
    assert!(peripheral.inject(GattEvent::ConnectionStateChanged {
        device: DEVICE.to_string(),
        connected: true,
    }));
    assert!(peripheral.inject(GattEvent::DescriptorWrite {
        device: DEVICE.to_string(),
        request_id,
        descriptor: CCCD_UUID,
        value: ENABLE_NOTIFICATION_VALUE.to_vec(),
        response_needed: true,
    }));
}

fn rx_write(peripheral: &MockPeripheral, value: &[u8]) {
    assert!(peripheral.inject(GattEvent::CharacteristicWrite {
        device: DEVICE.to_string(),
        request_id: 7,
        characteristic: RX_CHARACTERISTIC_UUID,
        value: value.to_vec(),
        response_needed: false,
    }));
}

#[tokio::test]
async fn test_start_registers_service_and_advertises() {
    let fx = Fixture::new();
    let (peripheral, bridge) = started(&fx).await;

    assert_eq!(bridge.state(), BridgeState::Ready);
    assert!(peripheral.is_advertising());
    let services = peripheral.services();
    assert_eq!(services.len(), 1);
    assert_eq!(services[0].uuid, SERVICE_UUID);

    assert!(fx.logged("GATT service added"));
    // flags (3) + name "OBDII" (7) + 128-bit service (18)
    assert!(fx.logged("ADV length = 28"));
    assert!(fx.logged("02 01 06 06 09 4F 42 44 49 49 11 07 9E CA DC 24"));
    assert!(fx.logged("Loopback socket connected"));
    assert!(fx.wait_for_log("BLE advertising started").await);

    bridge.stop().await;
}

#[tokio::test]
async fn test_configured_name_is_advertised_and_logged() {
    let fx = Fixture::new();
    let (peripheral, bridge) = started(&fx).await;

    let (data, scan_response) = peripheral.advertised().expect("advertising");
    assert_eq!(data.local_name.as_deref(), Some("OBDII"));
    assert_eq!(scan_response.service_uuids, vec![SERVICE_UUID]);

    let broadcast = data.combined_payload(&scan_response);
    assert!(fx.logged(&format!("ADV length = {}", broadcast.len())));
    assert!(fx.logged(&hexdump::dump_compact(&broadcast)));

    bridge.stop().await;
}

#[tokio::test]
async fn test_adapter_name_used_without_configured_name() {
    let fx = Fixture::new();
    let peripheral = Arc::new(MockPeripheral::new());
    let bridge = BleBridge::new(
        peripheral.clone(),
        BleConfig {
            device_name: None,
            ..config()
        },
        fx.ctx.clone(),
    );
    bridge.start().await.unwrap();

    let (data, _) = peripheral.advertised().expect("advertising");
    assert_eq!(data.local_name.as_deref(), Some("MockELM"));
    // flags (3) + name "MockELM" (9) + 128-bit service (18)
    assert!(fx.logged("ADV length = 30"));

    bridge.stop().await;
}

#[tokio::test]
async fn test_greeting_on_subscribe() {
    let fx = Fixture::new();
    let (peripheral, bridge) = started(&fx).await;

    subscribe(&peripheral, 3);

    let notes = peripheral
        .wait_for_notifications(1, Duration::from_secs(2))
        .await;
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].value, GREETING);
    assert_eq!(notes[0].characteristic, TX_CHARACTERISTIC_UUID);
    assert_eq!(notes[0].device, DEVICE);

    assert!(wait_for_state(|| bridge.state(), BridgeState::Subscribed).await);
    assert_eq!(bridge.subscriber().as_deref(), Some(DEVICE));

    // the CCCD write is acknowledged after the greeting went out
    for _ in 0..400 {
        if !peripheral.responses().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(
        peripheral.responses(),
        vec![(DEVICE.to_string(), 3, GattStatus::Success)]
    );

    bridge.stop().await;
}

#[tokio::test]
async fn test_emulator_output_is_fragmented() {
    let fx = Fixture::new();
    let (peripheral, bridge) = started(&fx).await;

    subscribe(&peripheral, 1);
    peripheral
        .wait_for_notifications(1, Duration::from_secs(2))
        .await;

    let payload: Vec<u8> = (0..45u8).map(|i| b'0' + (i % 10)).collect();
    rx_write(&peripheral, &payload);

    let mut joined = Vec::new();
    for _ in 0..400 {
        let notes = peripheral.notifications();
        assert!(notes.iter().all(|n| n.value.len() <= 20));
        joined = notes[1..].iter().flat_map(|n| n.value.clone()).collect();
        if joined.len() >= payload.len() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(joined, payload);

    assert!(fx.logged(" * Received from Bluetooth: (passing to loopback)"));
    assert!(fx
        .wait_for_log(" * Sending the data received from loopback on bluetooth:")
        .await);

    bridge.stop().await;
}

#[tokio::test]
async fn test_greeting_never_splits_emulator_output() {
    let fx = Fixture::new();
    let (peripheral, bridge) = started(&fx).await;
    peripheral.set_notify_delay(Duration::from_millis(20));

    subscribe(&peripheral, 1);
    peripheral
        .wait_for_notifications(1, Duration::from_secs(2))
        .await;

    let payload: Vec<u8> = (0..45u8).map(|i| b'A' + (i % 26)).collect();
    rx_write(&peripheral, &payload);
    // first output fragment is out, the rest are still being sent
    peripheral
        .wait_for_notifications(2, Duration::from_secs(2))
        .await;

    // a second enable write triggers another greeting mid-payload
    assert!(peripheral.inject(GattEvent::DescriptorWrite {
        device: DEVICE.to_string(),
        request_id: 2,
        descriptor: CCCD_UUID,
        value: ENABLE_NOTIFICATION_VALUE.to_vec(),
        response_needed: false,
    }));

    let notes = peripheral
        .wait_for_notifications(5, Duration::from_secs(2))
        .await;
    assert_eq!(notes.len(), 5);
    assert_eq!(notes[0].value, GREETING);
    let joined: Vec<u8> = notes[1..4].iter().flat_map(|n| n.value.clone()).collect();
    assert_eq!(joined, payload);
    assert_eq!(notes[4].value, GREETING);

    bridge.stop().await;
}

#[tokio::test]
async fn test_output_dropped_without_subscriber() {
    let fx = Fixture::new();
    let (peripheral, bridge) = started(&fx).await;

    assert!(peripheral.inject(GattEvent::ConnectionStateChanged {
        device: DEVICE.to_string(),
        connected: true,
    }));
    rx_write(&peripheral, b"ATZ\r");

    assert!(fx.wait_for_log("No subscriber, dropped").await);
    assert!(peripheral.notifications().is_empty());

    bridge.stop().await;
}

#[tokio::test]
async fn test_disconnect_clears_subscription() {
    let fx = Fixture::new();
    let (peripheral, bridge) = started(&fx).await;

    subscribe(&peripheral, 1);
    assert!(wait_for_state(|| bridge.state(), BridgeState::Subscribed).await);

    peripheral.inject(GattEvent::ConnectionStateChanged {
        device: DEVICE.to_string(),
        connected: false,
    });
    assert!(wait_for_state(|| bridge.state(), BridgeState::Ready).await);
    assert_eq!(bridge.subscriber(), None);
    assert!(fx.logged(&format!("{}: disconnected", DEVICE)));

    bridge.stop().await;
}

#[tokio::test]
async fn test_disabled_radio_prompts_user() {
    let fx = Fixture::new();
    let peripheral = Arc::new(MockPeripheral::new());
    peripheral.set_enabled(false);
    let bridge = BleBridge::new(peripheral.clone(), config(), fx.ctx.clone());

    let err = bridge.start().await.unwrap_err();
    assert!(matches!(err, BridgeError::TransportUnavailable(_)));
    assert_eq!(fx.notifier.prompts(), 1);
    assert!(!peripheral.is_server_open());
}

#[tokio::test]
async fn test_missing_advertiser_is_terminal() {
    let fx = Fixture::new();
    let peripheral = Arc::new(MockPeripheral::new());
    peripheral.set_multi_advertisement(false);
    let bridge = BleBridge::new(peripheral.clone(), config(), fx.ctx.clone());

    let err = bridge.start().await.unwrap_err();
    assert!(err.is_terminal());
    assert!(fx.logged("BLE advertising not supported"));
    assert!(!peripheral.is_advertising());
}

#[tokio::test]
async fn test_registration_timeout() {
    let fx = Fixture::new();
    let peripheral = Arc::new(MockPeripheral::new());
    peripheral.set_service_status(None);
    let bridge = BleBridge::new(
        peripheral.clone(),
        BleConfig {
            registration_timeout_ms: 50,
            ..config()
        },
        fx.ctx.clone(),
    );

    let err = bridge.start().await.unwrap_err();
    assert!(matches!(err, BridgeError::Platform(_)));
    assert!(!peripheral.is_server_open());
    assert!(!peripheral.is_advertising());
    assert_eq!(bridge.state(), BridgeState::Stopped);
}

#[tokio::test]
async fn test_failed_registration_aborts_start() {
    let fx = Fixture::new();
    let peripheral = Arc::new(MockPeripheral::new());
    peripheral.set_service_status(Some(GattStatus::Failure(133)));
    let bridge = BleBridge::new(peripheral.clone(), config(), fx.ctx.clone());

    let err = bridge.start().await.unwrap_err();
    assert!(matches!(err, BridgeError::Platform(_)));
    assert!(fx.logged("Service add failed"));
}

#[tokio::test]
async fn test_stop_swallows_teardown_errors() {
    let fx = Fixture::new();
    let (peripheral, bridge) = started(&fx).await;
    subscribe(&peripheral, 1);
    assert!(wait_for_state(|| bridge.state(), BridgeState::Subscribed).await);

    peripheral.set_fail_teardown(true);
    tokio::time::timeout(Duration::from_secs(3), bridge.stop())
        .await
        .expect("stop completes");

    assert_eq!(bridge.state(), BridgeState::Stopped);
    assert_eq!(bridge.subscriber(), None);
    assert!(!peripheral.is_advertising());
    assert!(!peripheral.is_server_open());
    assert!(fx.logged("Error: Platform error: mock teardown failure"));
}
