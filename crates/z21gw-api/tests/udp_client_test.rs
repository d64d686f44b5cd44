#![allow(clippy::unwrap_used)]
// Integration tests for `Z21Client` against a fake z21 on loopback.

use std::net::SocketAddr;
use std::pin::pin;
use std::time::Duration;

use futures_util::StreamExt;
use pretty_assertions::assert_eq;
use tokio::net::UdpSocket;

use z21gw_api::message::split_packets;
use z21gw_api::{BroadcastFlags, CanDetector, Error, Message, Request, SystemState, Z21Client};

const WAIT: Duration = Duration::from_secs(2);

// ── Helpers ─────────────────────────────────────────────────────────

async fn setup() -> (UdpSocket, Z21Client) {
    let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = peer.local_addr().unwrap().to_string();
    let client = Z21Client::connect(&addr).await.unwrap();
    (peer, client)
}

/// Receive one datagram and decode its first packet as a request.
async fn recv_request(peer: &UdpSocket) -> (Request, Vec<u8>, SocketAddr) {
    let mut buf = [0u8; 1500];
    let (len, from) = tokio::time::timeout(WAIT, peer.recv_from(&mut buf))
        .await
        .expect("fake z21 received nothing")
        .unwrap();
    let raw = buf[..len].to_vec();
    let (header, data) = split_packets(&raw).next().unwrap();
    (Request::decode(header, data).unwrap(), raw, from)
}

// ── Request / reply ─────────────────────────────────────────────────

#[tokio::test]
async fn test_serial_number_round_trip() {
    let (peer, client) = setup().await;

    let device = async {
        let (request, raw, from) = recv_request(&peer).await;
        assert_eq!(request, Request::SerialNumber);
        assert_eq!(raw, vec![0x04, 0x00, 0x10, 0x00]);
        let reply = Message::SerialNumber { serial_number: 12345 }.encode();
        peer.send_to(&reply, from).await.unwrap();
    };

    let (reply, ()) = tokio::join!(
        client.send_receive(&Request::SerialNumber, WAIT),
        device
    );

    assert_eq!(
        reply.unwrap(),
        Some(Message::SerialNumber { serial_number: 12345 })
    );
}

#[tokio::test]
async fn test_request_times_out_without_reply() {
    let (_peer, client) = setup().await;

    let result = client
        .send_receive(&Request::SerialNumber, Duration::from_millis(50))
        .await;

    assert!(
        matches!(result, Err(Error::Timeout { timeout_ms: 50 })),
        "expected Timeout error, got: {result:?}"
    );
}

#[tokio::test]
async fn test_broadcast_flags_are_fire_and_forget() {
    let (peer, client) = setup().await;
    let flags = BroadcastFlags::SYSTEM_UPDATES | BroadcastFlags::CAN_DETECTOR_UPDATES;

    let reply = client
        .send_receive(&Request::BroadcastFlags { flags }, WAIT)
        .await
        .unwrap();
    assert_eq!(reply, None);

    let (request, raw, _) = recv_request(&peer).await;
    assert_eq!(request, Request::BroadcastFlags { flags });
    assert_eq!(raw, vec![0x08, 0x00, 0x50, 0x00, 0x00, 0x01, 0x08, 0x00]);
}

#[tokio::test]
async fn test_datagram_with_reply_and_event() {
    let (peer, client) = setup().await;
    let mut events = pin!(client.events());

    let state = SystemState {
        main_current: 80,
        temperature: 30,
        supply_voltage: 18_000,
        vcc_voltage: 16_000,
        ..SystemState::default()
    };
    let device = async {
        let (request, _, from) = recv_request(&peer).await;
        assert_eq!(request, Request::HardwareInfo);
        let mut datagram = Message::SystemState(state.clone()).encode();
        datagram.extend(
            Message::HardwareInfo {
                hardware_type: 0x0211,
                firmware_version: "1.43".into(),
            }
            .encode(),
        );
        peer.send_to(&datagram, from).await.unwrap();
    };

    let (reply, ()) = tokio::join!(client.send_receive(&Request::HardwareInfo, WAIT), device);
    assert_eq!(
        reply.unwrap(),
        Some(Message::HardwareInfo {
            hardware_type: 0x0211,
            firmware_version: "1.43".into(),
        })
    );

    let event = tokio::time::timeout(WAIT, events.next()).await.unwrap().unwrap();
    assert_eq!(*event, Message::SystemState(state));
}

// ── Events ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_unsolicited_packets_become_events() {
    let (peer, client) = setup().await;
    let mut events = pin!(client.events());

    // The fake learns the client's address from its first datagram.
    let flags = BroadcastFlags::CAN_DETECTOR_UPDATES;
    client
        .send_receive(&Request::BroadcastFlags { flags }, WAIT)
        .await
        .unwrap();
    let (_, _, from) = recv_request(&peer).await;

    let detector = CanDetector {
        network_id: 0xD000,
        address: 17,
        port: 3,
        detector_type: 0x01,
        value1: 0x1100,
        value2: 0,
    };
    peer.send_to(&Message::CanDetector(detector.clone()).encode(), from)
        .await
        .unwrap();

    let event = tokio::time::timeout(WAIT, events.next()).await.unwrap().unwrap();
    assert_eq!(*event, Message::CanDetector(detector));
    assert_eq!(event.kind(), "can_detector");
}

#[tokio::test]
async fn test_late_reply_is_not_an_event() {
    let (peer, client) = setup().await;
    let mut events = pin!(client.events());

    let result = client
        .send_receive(&Request::SerialNumber, Duration::from_millis(50))
        .await;
    assert!(matches!(result, Err(Error::Timeout { .. })));
    let (_, _, from) = recv_request(&peer).await;
    assert_eq!(from.port(), client.local_addr().unwrap().port());
    assert_eq!(client.peer_addr(), peer.local_addr().unwrap());

    // The serial arrives too late; only the state change that follows is streamed.
    let late = Message::SerialNumber { serial_number: 12345 }.encode();
    peer.send_to(&late, from).await.unwrap();
    let state = Message::SystemState(SystemState {
        main_current: 120,
        ..SystemState::default()
    });
    peer.send_to(&state.encode(), from).await.unwrap();

    let event = tokio::time::timeout(WAIT, events.next()).await.unwrap().unwrap();
    assert_eq!(*event, state);
}

// ── Close ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_close_logs_off_and_ends_streams() {
    let (peer, client) = setup().await;
    let mut events = pin!(client.events());

    client.close().await;
    // Second close is a no-op.
    client.close().await;

    let (request, raw, _) = recv_request(&peer).await;
    assert_eq!(request, Request::Logoff);
    assert_eq!(raw, vec![0x04, 0x00, 0x30, 0x00]);

    let end = tokio::time::timeout(WAIT, events.next()).await.unwrap();
    assert!(end.is_none());

    let result = client.send_receive(&Request::SerialNumber, WAIT).await;
    assert!(
        matches!(result, Err(Error::Closed)),
        "expected Closed error, got: {result:?}"
    );
}

#[tokio::test]
async fn test_close_fails_pending_request() {
    let (peer, client) = setup().await;

    let pending = tokio::spawn({
        let client = client.clone();
        async move {
            client
                .send_receive(&Request::SystemState, Duration::from_secs(30))
                .await
        }
    });

    let (request, _, _) = recv_request(&peer).await;
    assert_eq!(request, Request::SystemState);

    client.close().await;

    let result = tokio::time::timeout(WAIT, pending).await.unwrap().unwrap();
    assert!(
        matches!(result, Err(Error::Closed)),
        "expected Closed error, got: {result:?}"
    );
}
