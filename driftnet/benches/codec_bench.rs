// Packet and payload codec benchmarks using criterion.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use bytes::Bytes;
use std::net::Ipv4Addr;

use driftnet::message::{NodeRecord, Payload};
use driftnet::node::{compute_magic, Endpoint};
use driftnet::packet::{MessagePacket, Packet};
use drifttrust::NodeIdentity;

fn bench_packet_codec(c: &mut Criterion) {
    let packet = Packet::Message(MessagePacket {
        tag: [0xAAu8; 32],
        auth_tag: [0xBBu8; 12],
        ciphertext: Bytes::from(vec![0xCCu8; 1024]),
    });
    let wire = packet.encode();
    let magic = compute_magic(&[0x77u8; 32]);

    c.bench_function("packet_encode_1k", |b| {
        b.iter(|| black_box(packet.encode()));
    });
    c.bench_function("packet_decode_1k", |b| {
        b.iter(|| black_box(Packet::decode(black_box(&wire), &magic).unwrap()));
    });
}

fn bench_payload_codec(c: &mut Criterion) {
    let identity = NodeIdentity::generate();
    let record = NodeRecord {
        identity: identity.public(),
        endpoint: Endpoint::new(Ipv4Addr::new(10, 1, 2, 3), 30303),
    };
    let payload = Payload::FoundNodes {
        request_id: 42,
        total: 1,
        nodes: vec![record; 12],
    };
    let encoded = payload.encode();

    c.bench_function("found_nodes_encode_full_page", |b| {
        b.iter(|| black_box(payload.encode()));
    });
    c.bench_function("found_nodes_decode_full_page", |b| {
        b.iter(|| black_box(Payload::decode(black_box(&encoded)).unwrap()));
    });
}

criterion_group!(benches, bench_packet_codec, bench_payload_codec);
criterion_main!(benches);
