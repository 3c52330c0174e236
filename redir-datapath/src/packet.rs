//! Ethernet/IPv4/TCP frame access for the redirect datapath.
//!
//! Frames start with the Ethernet header, as they do on a TC hook. All reads
//! and writes go through bounds-checked helpers so that a short frame turns
//! into an error instead of a panic.

use crate::checksum::{l3_csum_replace, l4_csum_replace};
use crate::error::{DatapathError, Result};
use std::net::Ipv4Addr;

// Header sizes
pub const ETH_HLEN: usize = 14;
pub const IPV4_MIN_HLEN: usize = 20;
pub const TCP_MIN_HLEN: usize = 20;

// EtherTypes
pub const ETH_P_IP: u16 = 0x0800;
pub const ETH_P_ARP: u16 = 0x0806;
pub const ETH_P_IPV6: u16 = 0x86DD;

// IP protocols
pub const IPPROTO_ICMP: u8 = 1;
pub const IPPROTO_TCP: u8 = 6;
pub const IPPROTO_UDP: u8 = 17;

// IPv4 field offsets from the start of the frame
pub const IP_PROTO_OFF: usize = ETH_HLEN + 9;
pub const IP_CSUM_OFF: usize = ETH_HLEN + 10;
pub const IP_SRC_OFF: usize = ETH_HLEN + 12;
pub const IP_DST_OFF: usize = ETH_HLEN + 16;

// TCP field offsets from the start of the TCP header
pub const TCP_SRC_OFF: usize = 0;
pub const TCP_DST_OFF: usize = 2;
pub const TCP_FLAGS_OFF: usize = 13;
pub const TCP_CSUM_OFF: usize = 16;

// TCP flags
pub const TCP_FLAG_FIN: u8 = 0x01;
pub const TCP_FLAG_SYN: u8 = 0x02;
pub const TCP_FLAG_RST: u8 = 0x04;
pub const TCP_FLAG_PSH: u8 = 0x08;
pub const TCP_FLAG_ACK: u8 = 0x10;

/// Which side of a connection a rewrite applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Source,
    Destination,
}

/// IPv4 header fields the datapath decides on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Header {
    pub protocol: u8,
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    /// Offset of the transport header from the start of the frame
    pub l4_offset: usize,
}

/// TCP header fields the datapath decides on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TcpHeader {
    pub src_port: u16,
    pub dst_port: u16,
    pub flags: u8,
}

impl TcpHeader {
    /// SYN set and ACK clear: the first segment of a new connection.
    pub fn is_syn_only(&self) -> bool {
        self.flags & TCP_FLAG_SYN != 0 && self.flags & TCP_FLAG_ACK == 0
    }

    pub fn is_fin_ack(&self) -> bool {
        self.flags & TCP_FLAG_FIN != 0 && self.flags & TCP_FLAG_ACK != 0
    }
}

/// A mutable Ethernet frame plus the skb mark it arrived with.
pub struct Packet<'a> {
    data: &'a mut [u8],
    mark: u32,
}

impl<'a> Packet<'a> {
    pub fn new(data: &'a mut [u8]) -> Self {
        Self { data, mark: 0 }
    }

    pub fn with_mark(data: &'a mut [u8], mark: u32) -> Self {
        Self { data, mark }
    }

    pub fn mark(&self) -> u32 {
        self.mark
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data[..]
    }

    /// Load `N` bytes starting at `offset`.
    pub fn load<const N: usize>(&self, offset: usize) -> Result<[u8; N]> {
        let range = self.range(offset, N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(&self.data[range]);
        Ok(out)
    }

    /// Overwrite bytes starting at `offset`.
    pub fn store(&mut self, offset: usize, bytes: &[u8]) -> Result<()> {
        let range = self.range(offset, bytes.len())?;
        self.data[range].copy_from_slice(bytes);
        Ok(())
    }

    fn range(&self, offset: usize, len: usize) -> Result<std::ops::Range<usize>> {
        match offset.checked_add(len) {
            Some(end) if end <= self.data.len() => Ok(offset..end),
            _ => Err(DatapathError::OutOfBounds {
                offset,
                len,
                packet_len: self.data.len(),
            }),
        }
    }

    /// EtherType, or `None` if the frame is shorter than an Ethernet header.
    pub fn ethertype(&self) -> Option<u16> {
        self.load::<2>(12).ok().map(u16::from_be_bytes)
    }

    /// Parse the IPv4 header.
    ///
    /// Returns `None` for non-IPv4 frames, truncated headers and header
    /// lengths below the minimum; none of those are ours to rewrite.
    pub fn ipv4(&self) -> Option<Ipv4Header> {
        if self.ethertype()? != ETH_P_IP {
            return None;
        }

        let [version_ihl] = self.load::<1>(ETH_HLEN).ok()?;
        let ihl = usize::from(version_ihl & 0x0f) * 4;
        if version_ihl >> 4 != 4 || ihl < IPV4_MIN_HLEN {
            return None;
        }
        let [protocol] = self.load::<1>(IP_PROTO_OFF).ok()?;
        let src = Ipv4Addr::from(self.load::<4>(IP_SRC_OFF).ok()?);
        let dst = Ipv4Addr::from(self.load::<4>(IP_DST_OFF).ok()?);

        Some(Ipv4Header {
            protocol,
            src,
            dst,
            l4_offset: ETH_HLEN + ihl,
        })
    }

    /// Parse the TCP header that follows `ip`.
    ///
    /// A frame claiming TCP without room for the full header is an error.
    pub fn tcp(&self, ip: &Ipv4Header) -> Result<TcpHeader> {
        let header = self.load::<TCP_MIN_HLEN>(ip.l4_offset)?;
        Ok(TcpHeader {
            src_port: u16::from_be_bytes([header[TCP_SRC_OFF], header[TCP_SRC_OFF + 1]]),
            dst_port: u16::from_be_bytes([header[TCP_DST_OFF], header[TCP_DST_OFF + 1]]),
            flags: header[TCP_FLAGS_OFF],
        })
    }

    /// Rewrite an IPv4 address of a TCP segment.
    ///
    /// The TCP checksum (pseudo-header) and the IPv4 header checksum are
    /// adjusted from the bytes currently in the frame before the address is
    /// overwritten.
    pub fn rewrite_addr(
        &mut self,
        ip: &Ipv4Header,
        endpoint: Endpoint,
        new: Ipv4Addr,
    ) -> Result<()> {
        let offset = match endpoint {
            Endpoint::Source => IP_SRC_OFF,
            Endpoint::Destination => IP_DST_OFF,
        };
        let old = self.load::<4>(offset)?;
        let new = new.octets();

        l4_csum_replace(self, ip.l4_offset + TCP_CSUM_OFF, &old, &new)?;
        l3_csum_replace(self, IP_CSUM_OFF, &old, &new)?;
        self.store(offset, &new)
    }

    /// Rewrite a TCP port, adjusting the TCP checksum first.
    pub fn rewrite_port(&mut self, ip: &Ipv4Header, endpoint: Endpoint, new: u16) -> Result<()> {
        let offset = ip.l4_offset
            + match endpoint {
                Endpoint::Source => TCP_SRC_OFF,
                Endpoint::Destination => TCP_DST_OFF,
            };
        let old = self.load::<2>(offset)?;
        let new = new.to_be_bytes();

        l4_csum_replace(self, ip.l4_offset + TCP_CSUM_OFF, &old, &new)?;
        self.store(offset, &new)
    }
}
