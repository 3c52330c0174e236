//! Ingress redirector: sends new outbound TCP connections to the proxy.
//!
//! Attached on the ingress hook of the intercepted interface. A SYN (without
//! ACK) to a non-local, non-DNS destination creates a flow record holding
//! the original destination, then the segment's destination is rewritten to
//! the redirect target. Later segments of that flow are rewritten only while
//! the record exists; flows whose SYN was never seen pass untouched.
//!
//! ICMP bypasses the flow table and, if configured, is diverted to the
//! ICMP redirect interface.

use crate::classify::{Admission, RejectReason, classify_ingress};
use crate::conntrack::{FlowKey, FlowTable, OriginalDst};
use crate::error::Result;
use crate::packet::{Endpoint, IPPROTO_ICMP, IPPROTO_TCP, Packet};
use crate::params::{ParamStore, RedirectParams};
use crate::verdict::{RedirectDirection, Verdict};
use std::sync::Arc;
use tracing::{debug, trace};

pub struct IngressRedirector {
    params: Arc<ParamStore<RedirectParams>>,
    flows: Arc<FlowTable>,
}

impl IngressRedirector {
    pub fn new(params: Arc<ParamStore<RedirectParams>>, flows: Arc<FlowTable>) -> Self {
        Self { params, flows }
    }

    pub fn flows(&self) -> &Arc<FlowTable> {
        &self.flows
    }

    /// Process one frame. Rewrite failures drop the packet.
    pub fn process(&self, packet: &mut Packet<'_>) -> Verdict {
        match self.try_process(packet) {
            Ok(verdict) => verdict,
            Err(e) => {
                debug!(error = %e, "Ingress rewrite failed, dropping packet");
                Verdict::Drop
            }
        }
    }

    fn try_process(&self, packet: &mut Packet<'_>) -> Result<Verdict> {
        let Some(ip) = packet.ipv4() else {
            return Ok(bypass(RejectReason::NotIpv4));
        };

        let Some(params) = self.params.current() else {
            return Ok(bypass(RejectReason::Unconfigured));
        };

        if ip.protocol == IPPROTO_ICMP {
            return Ok(match params.icmp_redirect() {
                Some(ifindex) => {
                    trace!(ifindex, dst = %ip.dst, "Redirecting ICMP");
                    Verdict::Redirect {
                        ifindex,
                        direction: RedirectDirection::Egress,
                    }
                }
                None => bypass(RejectReason::Icmp),
            });
        }

        if ip.protocol != IPPROTO_TCP {
            return Ok(bypass(RejectReason::NotTcp));
        }

        let tcp = packet.tcp(&ip)?;

        let Some(target) = params.target else {
            return Ok(bypass(RejectReason::Unconfigured));
        };

        if let Admission::Reject(reason) = classify_ingress(ip.dst, tcp.dst_port, target) {
            return Ok(bypass(reason));
        }

        let key = FlowKey::new(ip.src, tcp.src_port, *target.ip(), target.port());

        if tcp.is_syn_only() {
            let origin = OriginalDst::new(ip.dst, tcp.dst_port);
            if self.flows.create_if_absent(key, origin) {
                debug!(
                    src = %ip.src,
                    src_port = tcp.src_port,
                    orig_dst = %origin.socket_addr(),
                    "Tracking redirected flow"
                );
            }
        } else if self.flows.lookup(&key).is_none() {
            return Ok(bypass(RejectReason::Untracked));
        }

        packet.rewrite_addr(&ip, Endpoint::Destination, *target.ip())?;
        packet.rewrite_port(&ip, Endpoint::Destination, target.port())?;

        Ok(Verdict::Pass)
    }
}

fn bypass(reason: RejectReason) -> Verdict {
    trace!(?reason, "Ingress bypass");
    Verdict::Pass
}
