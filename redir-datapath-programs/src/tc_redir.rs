//! TC auto-redirect programs
//!
//! Attached to the ingress and egress hooks of the intercepted interface.
//! - Ingress: new TCP connections (SYN without ACK) to non-LAN, non-DNS
//!   destinations are recorded and rewritten to the proxy listener
//! - Egress: proxy replies get their source rewritten back to the recorded
//!   original destination; FIN+ACK retires the record
//! - ICMP on ingress is redirected to a configured interface

#![no_std]
#![no_main]

use aya_ebpf::{
    bindings::{BPF_F_PSEUDO_HDR, BPF_NOEXIST, TC_ACT_OK, TC_ACT_SHOT},
    cty::c_long,
    helpers::bpf_redirect,
    macros::{classifier, map},
    maps::{Array, LruHashMap},
    programs::TcContext,
};
use aya_log_ebpf::debug;

use redir_datapath_programs::{
    DNS_PORT, ETH_HLEN, ETH_P_IP, FLOW_TABLE_MAX_ENTRIES, IP_CSUM_OFF, IP_DST_OFF, IP_SRC_OFF,
    IPPROTO_ICMP, IPPROTO_TCP, IPV4_MIN_HLEN, OriginInfo, REDIR_SLOT_ICMP_IFINDEX,
    REDIR_SLOT_TARGET_ADDR, REDIR_SLOT_TARGET_PORT, REDIR_SLOTS, RedirInfo, TCP_CSUM_OFF,
    TCP_DST_OFF, TCP_FLAG_ACK, TCP_FLAG_FIN, TCP_FLAG_SYN, TCP_FLAGS_OFF, TCP_MIN_HLEN,
    TCP_SRC_OFF, is_lan_ip,
};

/// Client tuple (towards the proxy) -> original destination
#[map]
static PAIR_ORIGINAL_DST: LruHashMap<RedirInfo, OriginInfo> =
    LruHashMap::with_max_entries(FLOW_TABLE_MAX_ENTRIES, 0);

/// Slot 0: ICMP redirect ifindex, slot 1: target address, slot 2: target port
#[map]
static REDIR_PARAMS: Array<u32> = Array::with_max_entries(REDIR_SLOTS, 0);

struct Ipv4Tcp {
    l4: usize,
    saddr: [u8; 4],
    daddr: [u8; 4],
    sport: [u8; 2],
    dport: [u8; 2],
    flags: u8,
}

#[classifier]
pub fn tc_redir_ingress(mut ctx: TcContext) -> i32 {
    match try_tc_redir_ingress(&mut ctx) {
        Ok(action) => action,
        Err(_) => TC_ACT_SHOT, // Truncated TCP header or failed rewrite
    }
}

#[classifier]
pub fn tc_redir_egress(mut ctx: TcContext) -> i32 {
    match try_tc_redir_egress(&mut ctx) {
        Ok(action) => action,
        Err(_) => TC_ACT_SHOT,
    }
}

/// IPv4 protocol and header length, or `None` if the frame is not ours.
#[inline(always)]
fn ipv4_header(ctx: &TcContext) -> Option<(u8, usize)> {
    let eth_type = u16::from_be(ctx.load::<u16>(12).ok()?);
    if eth_type != ETH_P_IP {
        return None;
    }

    let version_ihl = ctx.load::<u8>(ETH_HLEN).ok()?;
    let ihl = ((version_ihl & 0x0f) as usize) * 4;
    if ihl < IPV4_MIN_HLEN {
        return None;
    }
    // Whole fixed header must be present
    ctx.load::<[u8; IPV4_MIN_HLEN]>(ETH_HLEN).ok()?;

    let proto = ctx.load::<u8>(ETH_HLEN + 9).ok()?;
    Some((proto, ETH_HLEN + ihl))
}

#[inline(always)]
fn tcp_header(ctx: &TcContext, l4: usize) -> Result<Ipv4Tcp, c_long> {
    // Fails for a truncated TCP header
    ctx.load::<[u8; TCP_MIN_HLEN]>(l4)?;

    Ok(Ipv4Tcp {
        l4,
        saddr: ctx.load(IP_SRC_OFF)?,
        daddr: ctx.load(IP_DST_OFF)?,
        sport: ctx.load(l4 + TCP_SRC_OFF)?,
        dport: ctx.load(l4 + TCP_DST_OFF)?,
        flags: ctx.load(l4 + TCP_FLAGS_OFF)?,
    })
}

/// Redirect target as network-order address and port.
#[inline(always)]
fn redirect_target() -> Option<([u8; 4], [u8; 2])> {
    let addr = REDIR_PARAMS.get(REDIR_SLOT_TARGET_ADDR)?;
    let port = REDIR_PARAMS.get(REDIR_SLOT_TARGET_PORT)?;
    Some((addr.to_be_bytes(), (*port as u16).to_be_bytes()))
}

#[inline(always)]
fn try_tc_redir_ingress(ctx: &mut TcContext) -> Result<i32, c_long> {
    let Some((proto, l4)) = ipv4_header(ctx) else {
        return Ok(TC_ACT_OK);
    };

    // A missing slot 0 means the parameters were never written
    let Some(&icmp_ifindex) = REDIR_PARAMS.get(REDIR_SLOT_ICMP_IFINDEX) else {
        return Ok(TC_ACT_OK);
    };

    if proto == IPPROTO_ICMP && icmp_ifindex != 0 {
        let ret = unsafe { bpf_redirect(icmp_ifindex, 0) };
        return Ok(ret as i32);
    }

    if proto != IPPROTO_TCP {
        return Ok(TC_ACT_OK);
    }

    let tcp = tcp_header(ctx, l4)?;

    let Some((target_ip, target_port)) = redirect_target() else {
        return Ok(TC_ACT_OK);
    };

    if tcp.daddr == target_ip
        || is_lan_ip(tcp.daddr)
        || u16::from_be_bytes(tcp.dport) == DNS_PORT
    {
        return Ok(TC_ACT_OK);
    }

    let key = RedirInfo::new(tcp.saddr, tcp.sport, target_ip, target_port);

    if tcp.flags & TCP_FLAG_SYN != 0 && tcp.flags & TCP_FLAG_ACK == 0 {
        let origin = OriginInfo::new(tcp.daddr, tcp.dport);
        // Existing record wins
        if PAIR_ORIGINAL_DST
            .insert(&key, &origin, BPF_NOEXIST as u64)
            .is_ok()
        {
            debug!(ctx, "tracking flow from port {}", u16::from_be_bytes(tcp.sport));
        }
    } else if unsafe { PAIR_ORIGINAL_DST.get(&key) }.is_none() {
        return Ok(TC_ACT_OK);
    }

    rewrite_addr(ctx, tcp.l4, IP_DST_OFF, target_ip)?;
    rewrite_port(ctx, tcp.l4 + TCP_DST_OFF, tcp.l4, target_port)?;

    Ok(TC_ACT_OK)
}

#[inline(always)]
fn try_tc_redir_egress(ctx: &mut TcContext) -> Result<i32, c_long> {
    let Some((proto, l4)) = ipv4_header(ctx) else {
        return Ok(TC_ACT_OK);
    };

    if proto != IPPROTO_TCP {
        return Ok(TC_ACT_OK);
    }

    let tcp = tcp_header(ctx, l4)?;

    let Some((target_ip, target_port)) = redirect_target() else {
        return Ok(TC_ACT_OK);
    };

    if tcp.saddr != target_ip || tcp.sport != target_port {
        return Ok(TC_ACT_OK);
    }

    let key = RedirInfo::new(tcp.daddr, tcp.dport, tcp.saddr, tcp.sport);

    let Some(origin) = (unsafe { PAIR_ORIGINAL_DST.get(&key) }).copied() else {
        return Ok(TC_ACT_OK);
    };

    if tcp.flags & TCP_FLAG_FIN != 0 && tcp.flags & TCP_FLAG_ACK != 0 {
        let _ = PAIR_ORIGINAL_DST.remove(&key);
    }

    rewrite_addr(ctx, tcp.l4, IP_SRC_OFF, origin.ip)?;
    rewrite_port(ctx, tcp.l4 + TCP_SRC_OFF, tcp.l4, origin.port)?;

    Ok(TC_ACT_OK)
}

/// Rewrite an address; TCP (pseudo-header) and IPv4 checksums are updated
/// from the old bytes before the store.
#[inline(always)]
fn rewrite_addr(
    ctx: &mut TcContext,
    l4: usize,
    offset: usize,
    new: [u8; 4],
) -> Result<(), c_long> {
    let old: [u8; 4] = ctx.load(offset)?;
    let from = u32::from_ne_bytes(old) as u64;
    let to = u32::from_ne_bytes(new) as u64;

    ctx.l4_csum_replace(l4 + TCP_CSUM_OFF, from, to, BPF_F_PSEUDO_HDR as u64 | 4)?;
    ctx.l3_csum_replace(IP_CSUM_OFF, from, to, 4)?;
    ctx.store(offset, &new, 0)
}

#[inline(always)]
fn rewrite_port(
    ctx: &mut TcContext,
    offset: usize,
    l4: usize,
    new: [u8; 2],
) -> Result<(), c_long> {
    let old: [u8; 2] = ctx.load(offset)?;
    let from = u16::from_ne_bytes(old) as u64;
    let to = u16::from_ne_bytes(new) as u64;

    ctx.l4_csum_replace(l4 + TCP_CSUM_OFF, from, to, 2)?;
    ctx.store(offset, &new, 0)
}

#[cfg(not(test))]
#[panic_handler]
fn panic(_info: &core::panic::PanicInfo) -> ! {
    loop {}
}

#[unsafe(link_section = "license")]
#[unsafe(no_mangle)]
static LICENSE: [u8; 4] = *b"GPL\0";
