//! Stateless packet admissibility rules.
//!
//! Every bypass decision of the redirect components is expressed as an
//! [`Admission`], produced here before any byte of the frame is touched.

use std::net::{Ipv4Addr, SocketAddrV4};

/// DNS port, never redirected to the proxy.
pub const DNS_PORT: u16 = 53;

/// Outcome of classifying a packet for one of the redirect components.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Eligible for redirect or restore.
    Admit,
    /// Not our traffic: pass through unmodified.
    Reject(RejectReason),
}

impl Admission {
    pub fn is_admit(&self) -> bool {
        matches!(self, Admission::Admit)
    }
}

/// Why a packet bypasses the datapath.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Not an IPv4 frame, or a truncated/invalid IPv4 header
    NotIpv4,
    /// IPv4 payload is not TCP
    NotTcp,
    /// The parameter store holds no snapshot for the referenced feature
    Unconfigured,
    /// Destination is loopback, private or broadcast
    LocalDestination,
    /// Destination already is the redirect target
    RedirectTarget,
    /// DNS traffic
    Dns,
    /// Return-path packet not sourced by the proxy listener
    NotProxyOrigin,
    /// Packet carries the proxy's own mark
    ProxyMark,
    /// ARP frame
    Arp,
    /// ICMP payload
    Icmp,
    /// Continuation segment of a flow whose SYN was never tracked
    Untracked,
}

/// Loopback, RFC 1918 private ranges and the limited broadcast address.
///
/// Addresses are compared octet by octet in transmission order.
pub fn is_local(addr: Ipv4Addr) -> bool {
    if addr == Ipv4Addr::BROADCAST {
        return true;
    }

    match addr.octets() {
        [127, ..] | [10, ..] => true,
        [172, second, ..] => (16..=31).contains(&second),
        [192, 168, ..] => true,
        _ => false,
    }
}

pub fn is_dns(port: u16) -> bool {
    port == DNS_PORT
}

/// Whether `(addr, port)` is the proxy listener itself.
pub fn is_proxy_origin(addr: Ipv4Addr, port: u16, target: SocketAddrV4) -> bool {
    addr == *target.ip() && port == target.port()
}

/// Classify an outbound TCP segment for redirection to `target`.
pub fn classify_ingress(dst: Ipv4Addr, dst_port: u16, target: SocketAddrV4) -> Admission {
    if dst == *target.ip() {
        Admission::Reject(RejectReason::RedirectTarget)
    } else if is_local(dst) {
        Admission::Reject(RejectReason::LocalDestination)
    } else if is_dns(dst_port) {
        Admission::Reject(RejectReason::Dns)
    } else {
        Admission::Admit
    }
}

/// Classify a return-path TCP segment for restoration.
pub fn classify_egress(src: Ipv4Addr, src_port: u16, target: SocketAddrV4) -> Admission {
    if is_proxy_origin(src, src_port, target) {
        Admission::Admit
    } else {
        Admission::Reject(RejectReason::NotProxyOrigin)
    }
}
