// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![allow(clippy::uninlined_format_args)]

//! Integration tests for interest channels over a framed connection
//!
//! # Test Coverage
//!
//! - Open handshake and interest registration acknowledgements
//! - Add / Modify delivery scoped to the registered interest
//! - Dropping the interest stops delivery while the instance lives on
//! - One unacknowledged data message at a time
//! - Unknown message types answered with an error, channel stays open
//! - Replies written in the order the requests arrived
//! - Ack timeout and peer disconnect both close the channel

mod common;

use common::TestClient;
use registry_core::{
    ClientMessage, DeltaField, ErrorCode, InstanceInfo, InstanceStatus, Interest, InterestChannel,
    InterestState, MessageConnection, ServerMessage,
};
use registry_server::{
    ConnectionOptions, FramedConnection, InstanceRegistry, InterestNotificationMultiplexer,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::DuplexStream;

const LEASE: Duration = Duration::from_secs(90);
const QUIET: Duration = Duration::from_millis(150);

type Channel = Arc<InterestChannel<InterestNotificationMultiplexer>>;

fn open_channel(
    registry: &Arc<InstanceRegistry>,
    options: ConnectionOptions,
) -> (Channel, TestClient<DuplexStream>) {
    let (server_io, client_io) = tokio::io::duplex(64 * 1024);
    let transport: Arc<dyn MessageConnection> =
        FramedConnection::new(server_io, "test-peer", options);
    let multiplexer = InterestNotificationMultiplexer::new(Arc::clone(registry));
    let channel = InterestChannel::open(transport, multiplexer).unwrap();
    (channel, TestClient::new(client_io))
}

async fn subscribe(client: &mut TestClient<DuplexStream>, interest: Interest) {
    client
        .send(ClientMessage::InterestRegistration {
            interests: vec![interest],
        })
        .await;
    assert_eq!(client.recv().await, ServerMessage::Acknowledgement);
}

#[tokio::test]
async fn test_application_interest_scenario() {
    let registry = Arc::new(InstanceRegistry::default());
    let (channel, mut client) = open_channel(&registry, ConnectionOptions::default());

    assert_eq!(channel.state(), InterestState::Open);
    assert_eq!(client.recv().await, ServerMessage::Acknowledgement);

    subscribe(&mut client, Interest::application("A")).await;
    assert_eq!(channel.interest(), Interest::application("A"));

    let x = InstanceInfo::new("x", "A");
    registry.register(x.clone(), LEASE).unwrap();
    assert_eq!(
        client.recv_and_ack().await,
        ServerMessage::AddInstance { instance: x }
    );

    let x_up = InstanceInfo::new("x", "A").with_status(InstanceStatus::Up);
    registry.register(x_up, LEASE).unwrap();
    match client.recv_and_ack().await {
        ServerMessage::UpdateInstanceInfo { delta } => {
            assert_eq!(delta.instance_id, "x");
            assert_eq!(delta.field, DeltaField::Status(InstanceStatus::Up));
        }
        other => panic!("Wrong message type: {:?}", other),
    }
    assert!(client.recv_within(QUIET).await.is_none());

    client.send(ClientMessage::UnregisterInterestSet).await;
    assert_eq!(client.recv().await, ServerMessage::Acknowledgement);
    assert_eq!(channel.interest(), Interest::None);

    let x_down = InstanceInfo::new("x", "A").with_status(InstanceStatus::Down);
    registry.register(x_down, LEASE).unwrap();
    assert!(client.recv_within(QUIET).await.is_none());
    assert!(registry.get("x").is_some());
}

#[tokio::test]
async fn test_other_applications_filtered_out() {
    let registry = Arc::new(InstanceRegistry::default());
    let (_channel, mut client) = open_channel(&registry, ConnectionOptions::default());
    assert_eq!(client.recv().await, ServerMessage::Acknowledgement);
    subscribe(&mut client, Interest::application("A")).await;

    registry.register(InstanceInfo::new("y", "B"), LEASE).unwrap();
    registry.register(InstanceInfo::new("x", "A"), LEASE).unwrap();
    registry.unregister("x");

    match client.recv_and_ack().await {
        ServerMessage::AddInstance { instance } => assert_eq!(instance.id, "x"),
        other => panic!("Wrong message type: {:?}", other),
    }
    assert_eq!(
        client.recv_and_ack().await,
        ServerMessage::DeleteInstance {
            instance_id: "x".into()
        }
    );
    assert!(client.recv_within(QUIET).await.is_none());
}

#[tokio::test]
async fn test_next_message_waits_for_ack() {
    let registry = Arc::new(InstanceRegistry::default());
    let (_channel, mut client) = open_channel(&registry, ConnectionOptions::default());
    assert_eq!(client.recv().await, ServerMessage::Acknowledgement);
    subscribe(&mut client, Interest::Full).await;

    registry.register(InstanceInfo::new("i-1", "orders"), LEASE).unwrap();
    registry.register(InstanceInfo::new("i-2", "orders"), LEASE).unwrap();

    match client.recv().await {
        ServerMessage::AddInstance { instance } => assert_eq!(instance.id, "i-1"),
        other => panic!("Wrong message type: {:?}", other),
    }
    assert!(client.recv_within(QUIET).await.is_none());

    client.ack().await;
    match client.recv_and_ack().await {
        ServerMessage::AddInstance { instance } => assert_eq!(instance.id, "i-2"),
        other => panic!("Wrong message type: {:?}", other),
    }
}

#[tokio::test]
async fn test_unknown_message_type() {
    let registry = Arc::new(InstanceRegistry::default());
    let (channel, mut client) = open_channel(&registry, ConnectionOptions::default());
    assert_eq!(client.recv().await, ServerMessage::Acknowledgement);

    client.send_raw(&serde_json::json!({ "type": "bogus" })).await;
    match client.recv().await {
        ServerMessage::Error { code, .. } => assert_eq!(code, ErrorCode::UnexpectedMessage),
        other => panic!("Wrong message type: {:?}", other),
    }
    assert!(client.recv_within(QUIET).await.is_none());
    assert_eq!(channel.state(), InterestState::Open);

    client.send(ClientMessage::Heartbeat).await;
    match client.recv().await {
        ServerMessage::Error { code, .. } => assert_eq!(code, ErrorCode::UnexpectedMessage),
        other => panic!("Wrong message type: {:?}", other),
    }
    assert_eq!(channel.state(), InterestState::Open);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_replies_arrive_in_request_order() {
    let registry = Arc::new(InstanceRegistry::default());
    let (_channel, mut client) = open_channel(&registry, ConnectionOptions::default());
    assert_eq!(client.recv().await, ServerMessage::Acknowledgement);

    for _ in 0..200 {
        client.send_raw(&serde_json::json!({ "type": "bogus" })).await;
        client
            .send(ClientMessage::InterestRegistration {
                interests: vec![Interest::Full],
            })
            .await;
    }

    for round in 0..200 {
        match client.recv().await {
            ServerMessage::Error { code, .. } => assert_eq!(code, ErrorCode::UnexpectedMessage),
            other => panic!("round {}: wrong message type: {:?}", round, other),
        }
        assert_eq!(
            client.recv().await,
            ServerMessage::Acknowledgement,
            "round {}",
            round
        );
    }
}

#[tokio::test]
async fn test_ack_timeout_closes_channel() {
    let registry = Arc::new(InstanceRegistry::default());
    let options = ConnectionOptions {
        ack_timeout: Duration::from_millis(50),
        ..Default::default()
    };
    let (channel, mut client) = open_channel(&registry, options);
    assert_eq!(client.recv().await, ServerMessage::Acknowledgement);
    subscribe(&mut client, Interest::Full).await;

    registry.register(InstanceInfo::new("i-1", "orders"), LEASE).unwrap();
    assert!(matches!(client.recv().await, ServerMessage::AddInstance { .. }));

    tokio::time::timeout(Duration::from_secs(2), channel.closed())
        .await
        .unwrap();
    assert_eq!(channel.state(), InterestState::Closed);
}

#[tokio::test]
async fn test_peer_disconnect_closes_channel() {
    let registry = Arc::new(InstanceRegistry::default());
    let (channel, mut client) = open_channel(&registry, ConnectionOptions::default());
    assert_eq!(client.recv().await, ServerMessage::Acknowledgement);
    subscribe(&mut client, Interest::Full).await;
    drop(client);

    tokio::time::timeout(Duration::from_secs(2), channel.closed())
        .await
        .unwrap();
    assert_eq!(channel.state(), InterestState::Closed);
    assert_eq!(channel.interest(), Interest::None);
}
