//! TC redirect-to-TUN program
//!
//! Every frame that is not ARP, not marked by the proxy, not ICMP and not
//! addressed to a LAN destination is transmitted on the TUN interface.

#![no_std]
#![no_main]

use aya_ebpf::{
    bindings::TC_ACT_OK,
    helpers::bpf_redirect,
    macros::{classifier, map},
    maps::Array,
    programs::TcContext,
};

use redir_datapath_programs::{
    ETH_HLEN, ETH_P_ARP, ETH_P_IP, IP_DST_OFF, IPPROTO_ICMP, IPV4_MIN_HLEN, TUN_SLOT_IFINDEX,
    TUN_SLOT_PROXY_MARK, TUN_SLOTS, is_lan_ip,
};

/// Slot 0: proxy mark, slot 1: TUN ifindex
#[map]
static TUN_PARAMS: Array<u32> = Array::with_max_entries(TUN_SLOTS, 0);

#[classifier]
pub fn tc_tun(ctx: TcContext) -> i32 {
    match try_tc_tun(&ctx) {
        Ok(action) => action,
        Err(_) => TC_ACT_OK, // Never drop, only divert
    }
}

#[inline(always)]
fn try_tc_tun(ctx: &TcContext) -> Result<i32, ()> {
    let Ok(eth_type) = ctx.load::<u16>(12) else {
        return Ok(TC_ACT_OK);
    };
    let eth_type = u16::from_be(eth_type);

    if eth_type == ETH_P_ARP {
        return Ok(TC_ACT_OK);
    }

    let Some(&proxy_mark) = TUN_PARAMS.get(TUN_SLOT_PROXY_MARK) else {
        return Ok(TC_ACT_OK);
    };

    // Proxy's own traffic, diverting it again would loop
    let mark = unsafe { (*ctx.skb.skb).mark };
    if mark == proxy_mark {
        return Ok(TC_ACT_OK);
    }

    if eth_type == ETH_P_IP {
        let Ok(_) = ctx.load::<[u8; IPV4_MIN_HLEN]>(ETH_HLEN) else {
            return Ok(TC_ACT_OK);
        };

        let proto = ctx.load::<u8>(ETH_HLEN + 9).map_err(|_| ())?;
        if proto == IPPROTO_ICMP {
            return Ok(TC_ACT_OK);
        }

        let daddr = ctx.load::<[u8; 4]>(IP_DST_OFF).map_err(|_| ())?;
        if is_lan_ip(daddr) {
            return Ok(TC_ACT_OK);
        }
    }

    let Some(&tun_ifindex) = TUN_PARAMS.get(TUN_SLOT_IFINDEX) else {
        return Ok(TC_ACT_OK);
    };
    if tun_ifindex == 0 {
        return Ok(TC_ACT_OK);
    }

    // Transmit on the TUN device rather than inject as received
    let ret = unsafe { bpf_redirect(tun_ifindex, 0) };
    Ok(ret as i32)
}

#[cfg(not(test))]
#[panic_handler]
fn panic(_info: &core::panic::PanicInfo) -> ! {
    loop {}
}

#[unsafe(link_section = "license")]
#[unsafe(no_mangle)]
static LICENSE: [u8; 4] = *b"GPL\0";
