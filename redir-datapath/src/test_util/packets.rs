//! Frame builders and parsers for integration tests.
//!
//! Frames start directly with the Ethernet header, the way a TC hook sees
//! them. Checksums are computed in full by smoltcp so tests can tell
//! incremental updates apart from correct ones.

use crate::packet::{TCP_FLAG_ACK, TCP_FLAG_FIN, TCP_FLAG_PSH, TCP_FLAG_RST, TCP_FLAG_SYN};
use smoltcp::phy::ChecksumCapabilities;
use smoltcp::wire::{
    ArpOperation, ArpPacket, ArpRepr, EthernetAddress, EthernetFrame, EthernetProtocol,
    EthernetRepr, Icmpv4Packet, Icmpv4Repr, IpAddress, IpProtocol, Ipv4Address, Ipv4Packet,
    Ipv4Repr, Ipv6Address, Ipv6Packet, Ipv6Repr, TcpPacket, TcpSeqNumber, UdpPacket, UdpRepr,
};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddrV4};

// ============================================================================
// Constants
// ============================================================================

/// Ethernet header size
pub const ETHERNET_HDR_SIZE: usize = 14;

/// IP header size (without options)
pub const IP_HDR_SIZE: usize = 20;

/// TCP header size (without options)
pub const TCP_HDR_SIZE: usize = 20;

/// UDP header size
pub const UDP_HDR_SIZE: usize = 8;

/// IPv6 header size
pub const IPV6_HDR_SIZE: usize = 40;

/// ARP packet size (Ethernet + IPv4)
pub const ARP_PKT_SIZE: usize = 28;

/// MAC address of the LAN client
pub const CLIENT_MAC: [u8; 6] = [0x52, 0x54, 0x00, 0x12, 0x34, 0x56];

/// MAC address of the gateway running the datapath
pub const GATEWAY_MAC: [u8; 6] = [0x52, 0x54, 0x00, 0xab, 0xcd, 0xef];

/// Broadcast MAC address
pub const BROADCAST_MAC: [u8; 6] = [0xff; 6];

fn emit_ethernet(packet: &mut [u8], ethertype: EthernetProtocol) -> EthernetFrame<&mut [u8]> {
    let eth_repr = EthernetRepr {
        src_addr: EthernetAddress(CLIENT_MAC),
        dst_addr: EthernetAddress(GATEWAY_MAC),
        ethertype,
    };
    let mut eth_frame = EthernetFrame::new_unchecked(packet);
    eth_repr.emit(&mut eth_frame);
    eth_frame
}

// ============================================================================
// TCP Segments
// ============================================================================

/// Create an IPv4/TCP frame with valid IPv4 and TCP checksums.
///
/// `flags` is a combination of the `TCP_FLAG_*` constants.
pub fn create_tcp_segment(
    src: SocketAddrV4,
    dst: SocketAddrV4,
    flags: u8,
    payload: &[u8],
) -> Vec<u8> {
    let tcp_len = TCP_HDR_SIZE + payload.len();
    let total_len = ETHERNET_HDR_SIZE + IP_HDR_SIZE + tcp_len;
    let mut packet = vec![0u8; total_len];

    let mut eth_frame = emit_ethernet(&mut packet, EthernetProtocol::Ipv4);

    // IPv4 packet
    let ip_repr = Ipv4Repr {
        src_addr: Ipv4Address::from_bytes(&src.ip().octets()),
        dst_addr: Ipv4Address::from_bytes(&dst.ip().octets()),
        next_header: IpProtocol::Tcp,
        payload_len: tcp_len,
        hop_limit: 64,
    };
    let mut ip_packet = Ipv4Packet::new_unchecked(eth_frame.payload_mut());
    ip_repr.emit(&mut ip_packet, &ChecksumCapabilities::default());

    // TCP segment
    let mut tcp = TcpPacket::new_unchecked(ip_packet.payload_mut());
    tcp.set_src_port(src.port());
    tcp.set_dst_port(dst.port());
    tcp.set_seq_number(TcpSeqNumber(1000));
    tcp.set_ack_number(TcpSeqNumber(if flags & TCP_FLAG_ACK != 0 { 1 } else { 0 }));
    tcp.set_header_len(TCP_HDR_SIZE as u8);
    tcp.clear_flags();
    tcp.set_fin(flags & TCP_FLAG_FIN != 0);
    tcp.set_syn(flags & TCP_FLAG_SYN != 0);
    tcp.set_rst(flags & TCP_FLAG_RST != 0);
    tcp.set_psh(flags & TCP_FLAG_PSH != 0);
    tcp.set_ack(flags & TCP_FLAG_ACK != 0);
    tcp.set_window_len(64240);
    tcp.set_urgent_at(0);
    tcp.payload_mut().copy_from_slice(payload);
    tcp.fill_checksum(
        &IpAddress::Ipv4(ip_repr.src_addr),
        &IpAddress::Ipv4(ip_repr.dst_addr),
    );

    packet
}

/// Create a connection-opening SYN
pub fn create_syn(src: SocketAddrV4, dst: SocketAddrV4) -> Vec<u8> {
    create_tcp_segment(src, dst, TCP_FLAG_SYN, &[])
}

/// Create a data segment of an established connection
pub fn create_data_segment(src: SocketAddrV4, dst: SocketAddrV4, payload: &[u8]) -> Vec<u8> {
    create_tcp_segment(src, dst, TCP_FLAG_PSH | TCP_FLAG_ACK, payload)
}

/// Create a connection-closing FIN+ACK
pub fn create_fin_ack(src: SocketAddrV4, dst: SocketAddrV4) -> Vec<u8> {
    create_tcp_segment(src, dst, TCP_FLAG_FIN | TCP_FLAG_ACK, &[])
}

/// Parsed TCP segment
#[derive(Debug)]
pub struct TcpSegment {
    pub src: SocketAddrV4,
    pub dst: SocketAddrV4,
    pub syn: bool,
    pub ack: bool,
    pub fin: bool,
    pub rst: bool,
    pub payload: Vec<u8>,
}

/// Parse an IPv4/TCP frame
pub fn parse_tcp_segment(packet: &[u8]) -> Option<TcpSegment> {
    let eth_frame = EthernetFrame::new_checked(packet).ok()?;
    if eth_frame.ethertype() != EthernetProtocol::Ipv4 {
        return None;
    }

    let ip_packet = Ipv4Packet::new_checked(eth_frame.payload()).ok()?;
    if ip_packet.next_header() != IpProtocol::Tcp {
        return None;
    }

    let tcp = TcpPacket::new_checked(ip_packet.payload()).ok()?;

    Some(TcpSegment {
        src: SocketAddrV4::new(Ipv4Addr::from(ip_packet.src_addr().0), tcp.src_port()),
        dst: SocketAddrV4::new(Ipv4Addr::from(ip_packet.dst_addr().0), tcp.dst_port()),
        syn: tcp.syn(),
        ack: tcp.ack(),
        fin: tcp.fin(),
        rst: tcp.rst(),
        payload: tcp.payload().to_vec(),
    })
}

/// Check the IPv4 header checksum and the TCP checksum of a frame by full
/// recomputation.
pub fn verify_checksums(packet: &[u8]) -> bool {
    let Ok(eth_frame) = EthernetFrame::new_checked(packet) else {
        return false;
    };
    let Ok(ip_packet) = Ipv4Packet::new_checked(eth_frame.payload()) else {
        return false;
    };
    if !ip_packet.verify_checksum() {
        return false;
    }
    let Ok(tcp) = TcpPacket::new_checked(ip_packet.payload()) else {
        return false;
    };
    tcp.verify_checksum(
        &IpAddress::Ipv4(ip_packet.src_addr()),
        &IpAddress::Ipv4(ip_packet.dst_addr()),
    )
}

// ============================================================================
// Other Traffic
// ============================================================================

/// Create an IPv4/UDP frame
pub fn create_udp_datagram(src: SocketAddrV4, dst: SocketAddrV4, payload: &[u8]) -> Vec<u8> {
    let udp_len = UDP_HDR_SIZE + payload.len();
    let total_len = ETHERNET_HDR_SIZE + IP_HDR_SIZE + udp_len;
    let mut packet = vec![0u8; total_len];

    let mut eth_frame = emit_ethernet(&mut packet, EthernetProtocol::Ipv4);

    let ip_repr = Ipv4Repr {
        src_addr: Ipv4Address::from_bytes(&src.ip().octets()),
        dst_addr: Ipv4Address::from_bytes(&dst.ip().octets()),
        next_header: IpProtocol::Udp,
        payload_len: udp_len,
        hop_limit: 64,
    };
    let mut ip_packet = Ipv4Packet::new_unchecked(eth_frame.payload_mut());
    ip_repr.emit(&mut ip_packet, &ChecksumCapabilities::default());

    let udp_repr = UdpRepr {
        src_port: src.port(),
        dst_port: dst.port(),
    };
    let mut udp_packet = UdpPacket::new_unchecked(ip_packet.payload_mut());
    udp_repr.emit(
        &mut udp_packet,
        &ip_repr.src_addr.into(),
        &ip_repr.dst_addr.into(),
        payload.len(),
        |buf| buf.copy_from_slice(payload),
        &ChecksumCapabilities::default(),
    );

    packet
}

/// Create an ICMP echo request frame
pub fn create_icmp_echo_request(src_ip: Ipv4Addr, dst_ip: Ipv4Addr, id: u16, seq: u16) -> Vec<u8> {
    let data = b"ping from test!";
    let icmp_repr = Icmpv4Repr::EchoRequest {
        ident: id,
        seq_no: seq,
        data,
    };

    let icmp_len = icmp_repr.buffer_len();
    let total_len = ETHERNET_HDR_SIZE + IP_HDR_SIZE + icmp_len;
    let mut packet = vec![0u8; total_len];

    let mut eth_frame = emit_ethernet(&mut packet, EthernetProtocol::Ipv4);

    let ip_repr = Ipv4Repr {
        src_addr: Ipv4Address::from_bytes(&src_ip.octets()),
        dst_addr: Ipv4Address::from_bytes(&dst_ip.octets()),
        next_header: IpProtocol::Icmp,
        payload_len: icmp_len,
        hop_limit: 64,
    };
    let mut ip_packet = Ipv4Packet::new_unchecked(eth_frame.payload_mut());
    ip_repr.emit(&mut ip_packet, &ChecksumCapabilities::default());

    let mut icmp_packet = Icmpv4Packet::new_unchecked(ip_packet.payload_mut());
    icmp_repr.emit(&mut icmp_packet, &ChecksumCapabilities::default());

    packet
}

/// Create an ARP request frame
pub fn create_arp_request(sender_ip: Ipv4Addr, target_ip: Ipv4Addr) -> Vec<u8> {
    let mut packet = vec![0u8; ETHERNET_HDR_SIZE + ARP_PKT_SIZE];

    let eth_repr = EthernetRepr {
        src_addr: EthernetAddress(CLIENT_MAC),
        dst_addr: EthernetAddress(BROADCAST_MAC),
        ethertype: EthernetProtocol::Arp,
    };
    let mut eth_frame = EthernetFrame::new_unchecked(&mut packet[..]);
    eth_repr.emit(&mut eth_frame);

    let arp_repr = ArpRepr::EthernetIpv4 {
        operation: ArpOperation::Request,
        source_hardware_addr: EthernetAddress(CLIENT_MAC),
        source_protocol_addr: Ipv4Address::from_bytes(&sender_ip.octets()),
        target_hardware_addr: EthernetAddress([0; 6]),
        target_protocol_addr: Ipv4Address::from_bytes(&target_ip.octets()),
    };
    let mut arp_packet = ArpPacket::new_unchecked(eth_frame.payload_mut());
    arp_repr.emit(&mut arp_packet);

    packet
}

/// Create an IPv6/UDP frame
pub fn create_ipv6_udp(
    src: Ipv6Addr,
    dst: Ipv6Addr,
    src_port: u16,
    dst_port: u16,
    payload: &[u8],
) -> Vec<u8> {
    let udp_len = UDP_HDR_SIZE + payload.len();
    let total_len = ETHERNET_HDR_SIZE + IPV6_HDR_SIZE + udp_len;
    let mut packet = vec![0u8; total_len];

    let mut eth_frame = emit_ethernet(&mut packet, EthernetProtocol::Ipv6);

    let ipv6_repr = Ipv6Repr {
        src_addr: Ipv6Address::from_bytes(&src.octets()),
        dst_addr: Ipv6Address::from_bytes(&dst.octets()),
        next_header: IpProtocol::Udp,
        payload_len: udp_len,
        hop_limit: 64,
    };
    let mut ipv6_packet = Ipv6Packet::new_unchecked(eth_frame.payload_mut());
    ipv6_repr.emit(&mut ipv6_packet);

    let udp_repr = UdpRepr { src_port, dst_port };
    let mut udp_packet = UdpPacket::new_unchecked(ipv6_packet.payload_mut());
    udp_repr.emit(
        &mut udp_packet,
        &ipv6_repr.src_addr.into(),
        &ipv6_repr.dst_addr.into(),
        payload.len(),
        |buf| buf.copy_from_slice(payload),
        &ChecksumCapabilities::default(),
    );

    packet
}

#[cfg(test)]
mod tests {
    use super::*;

    const CLIENT: SocketAddrV4 = SocketAddrV4::new(Ipv4Addr::new(192, 168, 1, 10), 40000);
    const SERVER: SocketAddrV4 = SocketAddrV4::new(Ipv4Addr::new(1, 1, 1, 1), 443);

    #[test]
    fn test_tcp_segment_packet() {
        let packet = create_tcp_segment(CLIENT, SERVER, TCP_FLAG_PSH | TCP_FLAG_ACK, b"hello");

        assert!(verify_checksums(&packet));

        let segment = parse_tcp_segment(&packet).expect("TCP parse failed");
        assert_eq!(segment.src, CLIENT);
        assert_eq!(segment.dst, SERVER);
        assert!(segment.ack);
        assert!(!segment.syn);
        assert_eq!(segment.payload, b"hello");
    }

    #[test]
    fn test_syn_packet() {
        let packet = create_syn(CLIENT, SERVER);
        let segment = parse_tcp_segment(&packet).expect("TCP parse failed");
        assert!(segment.syn);
        assert!(!segment.ack);
        assert!(!segment.fin);
    }

    #[test]
    fn test_corrupted_checksum_detected() {
        let mut packet = create_syn(CLIENT, SERVER);
        // Flip a destination address bit without fixing any checksum
        packet[ETHERNET_HDR_SIZE + 19] ^= 0x01;
        assert!(!verify_checksums(&packet));
    }

    #[test]
    fn test_udp_is_not_tcp() {
        let packet = create_udp_datagram(CLIENT, SERVER, b"query");
        assert!(parse_tcp_segment(&packet).is_none());
        assert!(!verify_checksums(&packet));
    }

    #[test]
    fn test_arp_request_packet() {
        let packet =
            create_arp_request(Ipv4Addr::new(192, 168, 1, 10), Ipv4Addr::new(192, 168, 1, 1));

        let eth = EthernetFrame::new_checked(&packet).expect("Ethernet parse failed");
        assert_eq!(eth.src_addr().0, CLIENT_MAC);
        assert_eq!(eth.dst_addr().0, BROADCAST_MAC);
        assert_eq!(eth.ethertype(), EthernetProtocol::Arp);
    }

    #[test]
    fn test_icmp_echo_request_packet() {
        let packet = create_icmp_echo_request(
            Ipv4Addr::new(192, 168, 1, 10),
            Ipv4Addr::new(8, 8, 8, 8),
            1234,
            1,
        );

        let eth = EthernetFrame::new_checked(&packet).expect("Ethernet parse failed");
        let ip = Ipv4Packet::new_checked(eth.payload()).expect("IP parse failed");
        assert_eq!(ip.next_header(), IpProtocol::Icmp);
        assert!(ip.verify_checksum());
    }

    #[test]
    fn test_ipv6_udp_packet() {
        let packet = create_ipv6_udp(
            "fd00::1".parse().unwrap(),
            "2001:db8::1".parse().unwrap(),
            5353,
            443,
            b"quic",
        );

        let eth = EthernetFrame::new_checked(&packet).expect("Ethernet parse failed");
        assert_eq!(eth.ethertype(), EthernetProtocol::Ipv6);
        let ip = Ipv6Packet::new_checked(eth.payload()).expect("IPv6 parse failed");
        assert_eq!(ip.next_header(), IpProtocol::Udp);
    }
}
