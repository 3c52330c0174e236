//! Egress restorer integration tests.
//!
//! Drives full connections through both halves of auto-redirect mode: the
//! client's segments through the ingress redirector, the proxy's replies
//! through the egress restorer.

use redir_datapath::conntrack::FlowKey;
use redir_datapath::test_util::*;
use redir_datapath::{Packet, Verdict};
use std::net::{Ipv4Addr, SocketAddrV4};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn client_key() -> FlowKey {
    FlowKey::new(
        *TEST_CLIENT.ip(),
        TEST_CLIENT.port(),
        *TEST_TARGET.ip(),
        TEST_TARGET.port(),
    )
}

#[test]
fn test_reply_source_restored() {
    init_tracing();
    let auto = test_auto_redirect(1024);
    let (ingress, egress) = (auto.ingress(), auto.egress());

    let mut syn = create_syn(TEST_CLIENT, TEST_SERVER);
    ingress.process(&mut Packet::new(&mut syn));

    // The proxy answers from its listener
    let mut reply = create_data_segment(TEST_TARGET, TEST_CLIENT, b"HTTP/1.1 200 OK\r\n");
    assert_eq!(egress.process(&mut Packet::new(&mut reply)), Verdict::Pass);

    let segment = parse_tcp_segment(&reply).expect("TCP parse failed");
    assert_eq!(segment.src, TEST_SERVER);
    assert_eq!(segment.dst, TEST_CLIENT);
    assert_eq!(segment.payload, b"HTTP/1.1 200 OK\r\n");
    assert!(verify_checksums(&reply), "checksums invalid after restore");
}

#[test]
fn test_reply_without_record_untouched() {
    init_tracing();
    let auto = test_auto_redirect(1024);
    let egress = auto.egress();

    let mut reply = create_data_segment(TEST_TARGET, TEST_CLIENT, b"orphan");
    let original = reply.clone();

    assert_eq!(egress.process(&mut Packet::new(&mut reply)), Verdict::Pass);
    assert_eq!(reply, original);
}

#[test]
fn test_proxy_upstream_traffic_untouched() {
    init_tracing();
    let auto = test_auto_redirect(1024);
    let (ingress, egress) = (auto.ingress(), auto.egress());

    let mut syn = create_syn(TEST_CLIENT, TEST_SERVER);
    ingress.process(&mut Packet::new(&mut syn));

    // Proxy dialing the real server from an ephemeral port
    let proxy_upstream = SocketAddrV4::new(*TEST_TARGET.ip(), 51000);
    let mut frame = create_syn(proxy_upstream, TEST_SERVER);
    let original = frame.clone();

    assert_eq!(egress.process(&mut Packet::new(&mut frame)), Verdict::Pass);
    assert_eq!(frame, original);
}

#[test]
fn test_fin_ack_retires_flow() {
    init_tracing();
    let auto = test_auto_redirect(1024);
    let (ingress, egress) = (auto.ingress(), auto.egress());

    let mut syn = create_syn(TEST_CLIENT, TEST_SERVER);
    ingress.process(&mut Packet::new(&mut syn));
    assert!(auto.flows().lookup(&client_key()).is_some());

    let mut fin = create_fin_ack(TEST_TARGET, TEST_CLIENT);
    assert_eq!(egress.process(&mut Packet::new(&mut fin)), Verdict::Pass);

    // The closing segment itself is still restored
    let segment = parse_tcp_segment(&fin).expect("TCP parse failed");
    assert_eq!(segment.src, TEST_SERVER);
    assert!(segment.fin);
    assert!(verify_checksums(&fin));
    assert!(auto.flows().lookup(&client_key()).is_none());

    // Later replies on the same tuple are no longer rewritten
    let mut late = create_data_segment(TEST_TARGET, TEST_CLIENT, b"late");
    let original = late.clone();
    egress.process(&mut Packet::new(&mut late));
    assert_eq!(late, original);

    // A new SYN on the reused 4-tuple is tracked again
    let mut syn = create_syn(TEST_CLIENT, SocketAddrV4::new(Ipv4Addr::new(9, 9, 9, 9), 443));
    ingress.process(&mut Packet::new(&mut syn));
    assert_eq!(
        auto.flows().lookup(&client_key()).map(|o| o.socket_addr()),
        Some(SocketAddrV4::new(Ipv4Addr::new(9, 9, 9, 9), 443))
    );
}

#[test]
fn test_full_connection_round_trip() {
    init_tracing();
    let auto = test_auto_redirect(1024);
    let (ingress, egress) = (auto.ingress(), auto.egress());

    let clients = [
        SocketAddrV4::new(Ipv4Addr::new(192, 168, 1, 10), 40000),
        SocketAddrV4::new(Ipv4Addr::new(192, 168, 1, 11), 40000),
        SocketAddrV4::new(Ipv4Addr::new(192, 168, 1, 10), 40001),
    ];
    let servers = [
        SocketAddrV4::new(Ipv4Addr::new(1, 1, 1, 1), 443),
        SocketAddrV4::new(Ipv4Addr::new(93, 184, 216, 34), 80),
        SocketAddrV4::new(Ipv4Addr::new(142, 250, 0, 1), 8443),
    ];

    for (client, server) in clients.iter().zip(servers.iter()) {
        let mut syn = create_syn(*client, *server);
        ingress.process(&mut Packet::new(&mut syn));
    }
    assert_eq!(auto.flows().len(), 3);

    for (client, server) in clients.iter().zip(servers.iter()) {
        let mut reply = create_data_segment(TEST_TARGET, *client, b"data");
        assert_eq!(egress.process(&mut Packet::new(&mut reply)), Verdict::Pass);

        let segment = parse_tcp_segment(&reply).expect("TCP parse failed");
        assert_eq!(segment.src, *server);
        assert_eq!(segment.dst, *client);
        assert!(verify_checksums(&reply));
    }
}
