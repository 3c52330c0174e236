//! Redirect-to-TUN decider.
//!
//! A stateless alternative to auto-redirect: every frame that is not
//! excluded is transmitted on the TUN interface, where the proxy's userspace
//! stack picks it up. Frames carrying the proxy mark were emitted by the
//! proxy itself and are never diverted, which is what keeps the proxy's
//! upstream traffic from looping back into the TUN device.

use crate::classify::{Admission, RejectReason, is_local};
use crate::packet::{ETH_P_ARP, ETH_P_IP, IPPROTO_ICMP, Packet};
use crate::params::{ParamStore, TunParams};
use crate::verdict::{RedirectDirection, Verdict};
use std::sync::Arc;
use tracing::trace;

pub struct TunRedirectDecider {
    params: Arc<ParamStore<TunParams>>,
}

impl TunRedirectDecider {
    pub fn new(params: Arc<ParamStore<TunParams>>) -> Self {
        Self { params }
    }

    /// Decide the fate of one frame. Never modifies it.
    pub fn decide(&self, packet: &Packet<'_>) -> Verdict {
        let Some(params) = self.params.current() else {
            return bypass(RejectReason::Unconfigured);
        };

        if let Admission::Reject(reason) = admission(packet, &params) {
            return bypass(reason);
        }

        match params.tun_interface() {
            Some(ifindex) => {
                // Transmit rather than receive on the TUN device so the frame
                // goes through the device's egress path into the proxy.
                Verdict::Redirect {
                    ifindex,
                    direction: RedirectDirection::Egress,
                }
            }
            None => bypass(RejectReason::Unconfigured),
        }
    }
}

fn admission(packet: &Packet<'_>, params: &TunParams) -> Admission {
    let Some(ethertype) = packet.ethertype() else {
        return Admission::Reject(RejectReason::NotIpv4);
    };

    if ethertype == ETH_P_ARP {
        return Admission::Reject(RejectReason::Arp);
    }

    if packet.mark() == params.proxy_mark {
        return Admission::Reject(RejectReason::ProxyMark);
    }

    if ethertype == ETH_P_IP {
        let Some(ip) = packet.ipv4() else {
            return Admission::Reject(RejectReason::NotIpv4);
        };
        if ip.protocol == IPPROTO_ICMP {
            return Admission::Reject(RejectReason::Icmp);
        }
        if is_local(ip.dst) {
            return Admission::Reject(RejectReason::LocalDestination);
        }
    }

    // Other EtherTypes fall through to the redirect
    Admission::Admit
}

fn bypass(reason: RejectReason) -> Verdict {
    trace!(?reason, "Tun bypass");
    Verdict::Pass
}
