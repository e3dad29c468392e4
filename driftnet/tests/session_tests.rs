// Two pools wired head-to-head: handshake, ordering and delivery.

use std::net::Ipv4Addr;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use driftnet::directory::NodeDirectory;
use driftnet::events::Events;
use driftnet::message::{InboundMessage, Payload};
use driftnet::node::{Datagram, Endpoint, Node};
use driftnet::pool::SessionPool;
use driftnet::routing::{RoutingTable, SharedRoutingTable};
use driftnet::session::SessionRole;
use drifttrust::NodeIdentity;

struct TestNode {
    node: Node,
    pool: SessionPool,
    directory: NodeDirectory,
    routing: SharedRoutingTable,
    out: mpsc::Receiver<Datagram>,
    msgs: mpsc::Receiver<InboundMessage>,
}

fn make_node(port: u16) -> TestNode {
    let (out_tx, out_rx) = mpsc::channel(256);
    let (msg_tx, msg_rx) = mpsc::channel(256);
    let identity = Arc::new(NodeIdentity::generate());
    let node = Node::with_identity(identity.public(), Endpoint::new(Ipv4Addr::LOCALHOST, port));
    let directory = NodeDirectory::new();
    let routing = Arc::new(Mutex::new(RoutingTable::new(identity.node_id())));
    let pool = SessionPool::new(
        identity,
        Events::new(),
        directory.clone(),
        routing.clone(),
        out_tx,
        msg_tx,
    );
    TestNode {
        node,
        pool,
        directory,
        routing,
        out: out_rx,
        msgs: msg_rx,
    }
}

/// Shuttle datagrams both ways until the wire goes quiet, stamping each
/// with its sender's address the way the transport would.
async fn exchange(a: &mut TestNode, b: &mut TestNode) {
    loop {
        let mut moved = false;
        while let Ok(mut datagram) = a.out.try_recv() {
            datagram.endpoint = a.node.endpoint;
            b.pool.handle_datagram(datagram).await;
            moved = true;
        }
        while let Ok(mut datagram) = b.out.try_recv() {
            datagram.endpoint = b.node.endpoint;
            a.pool.handle_datagram(datagram).await;
            moved = true;
        }
        if !moved {
            break;
        }
    }
}

fn drain_payloads(node: &mut TestNode) -> Vec<Payload> {
    let mut payloads = Vec::new();
    while let Ok(message) = node.msgs.try_recv() {
        payloads.push(message.payload);
    }
    payloads
}

fn ping(request_id: u32) -> Payload {
    Payload::Ping {
        request_id,
        enr_seq: 1,
    }
}

#[tokio::test]
async fn handshake_and_echo() {
    let mut alice = make_node(40001);
    let mut bob = make_node(40002);

    // Alice pings; the first message rides the full handshake.
    alice
        .pool
        .send_message(&bob.node, ping(0x01020304))
        .await
        .unwrap();
    exchange(&mut alice, &mut bob).await;

    assert_eq!(drain_payloads(&mut bob), vec![ping(0x01020304)]);

    // Both ends report a completed handshake.
    let alice_session = alice.pool.get_session(&bob.node.id).await.unwrap();
    let bob_session = bob.pool.get_session(&alice.node.id).await.unwrap();
    assert!(alice_session.handshake_complete);
    assert!(bob_session.handshake_complete);
    assert_eq!(alice_session.role, SessionRole::Initiator);
    assert_eq!(bob_session.role, SessionRole::Recipient);

    // Bob answers over the established session.
    bob.pool
        .send_message(
            &alice.node,
            Payload::Pong {
                request_id: 0x01020304,
                enr_seq: 1,
                packet_ip: alice.node.endpoint.ip,
                packet_port: alice.node.endpoint.port,
            },
        )
        .await
        .unwrap();
    exchange(&mut alice, &mut bob).await;

    let received = drain_payloads(&mut alice);
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].request_id(), 0x01020304);
}

#[tokio::test]
async fn recipient_learns_the_initiator_identity() {
    let mut alice = make_node(40003);
    let mut bob = make_node(40004);

    alice.pool.send_message(&bob.node, ping(1)).await.unwrap();
    exchange(&mut alice, &mut bob).await;

    // Bob never knew alice beforehand; the auth response taught him.
    let session = bob.pool.get_session(&alice.node.id).await.unwrap();
    assert_eq!(session.remote.pubkey, alice.node.pubkey);
}

#[tokio::test]
async fn completed_handshakes_are_recorded() {
    let mut alice = make_node(40014);
    let mut bob = make_node(40015);

    alice.pool.send_message(&bob.node, ping(1)).await.unwrap();
    exchange(&mut alice, &mut bob).await;

    // Each side filed the proven peer in its directory and routing table,
    // including bob, who was only ever contacted.
    assert_eq!(bob.directory.get(&alice.node.id), Some(alice.node));
    assert!(bob.routing.lock().contains(&alice.node.id));
    assert_eq!(alice.directory.get(&bob.node.id), Some(bob.node));
    assert!(alice.routing.lock().contains(&bob.node.id));
}

#[tokio::test]
async fn messages_sent_before_completion_arrive_in_order() {
    let mut alice = make_node(40005);
    let mut bob = make_node(40006);

    // All eight accepted before a single datagram crosses the wire.
    for request_id in 1..=8 {
        alice
            .pool
            .send_message(&bob.node, ping(request_id))
            .await
            .unwrap();
    }
    exchange(&mut alice, &mut bob).await;

    let expected: Vec<Payload> = (1..=8).map(ping).collect();
    assert_eq!(drain_payloads(&mut bob), expected);
}

#[tokio::test]
async fn queued_messages_flush_both_ways() {
    let mut alice = make_node(40007);
    let mut bob = make_node(40008);

    // Bob queues toward alice before any session exists on the wire;
    // alice's handshake completes it.
    alice.pool.send_message(&bob.node, ping(1)).await.unwrap();
    let mut opener = alice.out.try_recv().unwrap();
    opener.endpoint = alice.node.endpoint;
    bob.pool.handle_datagram(opener).await;
    bob.pool.send_message(&alice.node, ping(100)).await.unwrap();
    exchange(&mut alice, &mut bob).await;

    assert_eq!(drain_payloads(&mut bob), vec![ping(1)]);
    assert_eq!(drain_payloads(&mut alice), vec![ping(100)]);
}

#[tokio::test]
async fn long_conversation_survives_both_directions() {
    let mut alice = make_node(40009);
    let mut bob = make_node(40010);

    alice.pool.send_message(&bob.node, ping(0)).await.unwrap();
    exchange(&mut alice, &mut bob).await;
    drain_payloads(&mut bob);

    for round in 1..=20u32 {
        alice
            .pool
            .send_message(&bob.node, ping(round))
            .await
            .unwrap();
        bob.pool
            .send_message(&alice.node, ping(1000 + round))
            .await
            .unwrap();
    }
    exchange(&mut alice, &mut bob).await;

    let to_bob: Vec<Payload> = (1..=20).map(ping).collect();
    let to_alice: Vec<Payload> = (1..=20).map(|r| ping(1000 + r)).collect();
    assert_eq!(drain_payloads(&mut bob), to_bob);
    assert_eq!(drain_payloads(&mut alice), to_alice);
}

#[tokio::test]
async fn third_party_packets_do_not_disturb_a_session() {
    let mut alice = make_node(40011);
    let mut bob = make_node(40012);
    let mut carol = make_node(40013);

    alice.pool.send_message(&bob.node, ping(1)).await.unwrap();
    exchange(&mut alice, &mut bob).await;
    drain_payloads(&mut bob);

    // Carol opens toward bob; bob challenges her without touching the
    // alice session.
    carol.pool.send_message(&bob.node, ping(2)).await.unwrap();
    exchange(&mut carol, &mut bob).await;

    assert!(bob.pool.get_session(&alice.node.id).await.is_ok());
    assert!(bob.pool.get_session(&carol.node.id).await.is_ok());
    assert_eq!(drain_payloads(&mut bob), vec![ping(2)]);

    // The established pair still works.
    alice.pool.send_message(&bob.node, ping(3)).await.unwrap();
    exchange(&mut alice, &mut bob).await;
    assert_eq!(drain_payloads(&mut bob), vec![ping(3)]);
}
