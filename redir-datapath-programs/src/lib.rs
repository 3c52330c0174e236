#![no_std]

/// Flow table key: the client's tuple towards the redirect target.
/// All fields in network byte order.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct RedirInfo {
    pub sip: [u8; 4],
    pub dip: [u8; 4],
    pub sport: [u8; 2],
    pub dport: [u8; 2],
}

impl RedirInfo {
    pub const fn new(sip: [u8; 4], sport: [u8; 2], dip: [u8; 4], dport: [u8; 2]) -> Self {
        Self {
            sip,
            dip,
            sport,
            dport,
        }
    }
}

/// Flow table value: the destination the client originally addressed.
/// All fields in network byte order.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct OriginInfo {
    pub ip: [u8; 4],
    pub port: [u8; 2],
    _pad: u16,
}

impl OriginInfo {
    pub const fn new(ip: [u8; 4], port: [u8; 2]) -> Self {
        Self { ip, port, _pad: 0 }
    }
}

// Flow table size
pub const FLOW_TABLE_MAX_ENTRIES: u32 = 65535;

// Redirect parameter slots
pub const REDIR_SLOT_ICMP_IFINDEX: u32 = 0;
pub const REDIR_SLOT_TARGET_ADDR: u32 = 1;
pub const REDIR_SLOT_TARGET_PORT: u32 = 2;
pub const REDIR_SLOTS: u32 = 3;

// TUN parameter slots
pub const TUN_SLOT_PROXY_MARK: u32 = 0;
pub const TUN_SLOT_IFINDEX: u32 = 1;
pub const TUN_SLOTS: u32 = 2;

// EtherTypes
pub const ETH_P_IP: u16 = 0x0800;
pub const ETH_P_ARP: u16 = 0x0806;

// IP protocols
pub const IPPROTO_ICMP: u8 = 1;
pub const IPPROTO_TCP: u8 = 6;

// Header sizes and offsets
pub const ETH_HLEN: usize = 14;
pub const IPV4_MIN_HLEN: usize = 20;
pub const TCP_MIN_HLEN: usize = 20;
pub const IP_CSUM_OFF: usize = ETH_HLEN + 10;
pub const IP_SRC_OFF: usize = ETH_HLEN + 12;
pub const IP_DST_OFF: usize = ETH_HLEN + 16;
pub const TCP_SRC_OFF: usize = 0;
pub const TCP_DST_OFF: usize = 2;
pub const TCP_FLAGS_OFF: usize = 13;
pub const TCP_CSUM_OFF: usize = 16;

// TCP flags
pub const TCP_FLAG_FIN: u8 = 0x01;
pub const TCP_FLAG_SYN: u8 = 0x02;
pub const TCP_FLAG_ACK: u8 = 0x10;

pub const DNS_PORT: u16 = 53;

/// Loopback, RFC 1918 private ranges and limited broadcast.
#[inline(always)]
pub fn is_lan_ip(addr: [u8; 4]) -> bool {
    if addr == [0xff; 4] {
        return true;
    }
    match addr[0] {
        127 | 10 => true,
        172 => (16..=31).contains(&addr[1]),
        192 => addr[1] == 168,
        _ => false,
    }
}
