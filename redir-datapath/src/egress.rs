//! Egress restorer: makes proxy replies look like they come from the
//! original destination.
//!
//! Attached on the egress hook of the intercepted interface. Segments sourced
//! by the redirect target are matched against the flow table with the
//! reversed tuple; on a hit the source address and port are rewritten back
//! to the recorded original destination. A FIN+ACK additionally retires the
//! record. Proxy traffic without a record (its own upstream connections)
//! passes untouched.

use crate::classify::{Admission, RejectReason, classify_egress};
use crate::conntrack::{FlowKey, FlowTable};
use crate::error::Result;
use crate::packet::{Endpoint, IPPROTO_TCP, Packet};
use crate::params::{ParamStore, RedirectParams};
use crate::verdict::Verdict;
use std::sync::Arc;
use tracing::{debug, trace};

pub struct EgressRestorer {
    params: Arc<ParamStore<RedirectParams>>,
    flows: Arc<FlowTable>,
}

impl EgressRestorer {
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
                debug!(error = %e, "Egress restore failed, dropping packet");
                Verdict::Drop
            }
        }
    }

    fn try_process(&self, packet: &mut Packet<'_>) -> Result<Verdict> {
        let Some(ip) = packet.ipv4() else {
            return Ok(bypass(RejectReason::NotIpv4));
        };

        if ip.protocol != IPPROTO_TCP {
            return Ok(bypass(RejectReason::NotTcp));
        }

        let tcp = packet.tcp(&ip)?;

        let Some(target) = self.params.current().and_then(|p| p.target) else {
            return Ok(bypass(RejectReason::Unconfigured));
        };

        if let Admission::Reject(reason) = classify_egress(ip.src, tcp.src_port, target) {
            return Ok(bypass(reason));
        }

        // The client is the destination of the reply; the ingress key was
        // built with the client as source.
        let key = FlowKey::new(ip.dst, tcp.dst_port, ip.src, tcp.src_port);

        let Some(origin) = self.flows.lookup(&key) else {
            return Ok(bypass(RejectReason::Untracked));
        };

        if tcp.is_fin_ack() && self.flows.delete(&key) {
            debug!(
                client = %ip.dst,
                client_port = tcp.dst_port,
                orig_dst = %origin.socket_addr(),
                "Flow record retired"
            );
        }

        packet.rewrite_addr(&ip, Endpoint::Source, origin.addr)?;
        packet.rewrite_port(&ip, Endpoint::Source, origin.port)?;

        Ok(Verdict::Pass)
    }
}

fn bypass(reason: RejectReason) -> Verdict {
    trace!(?reason, "Egress bypass");
    Verdict::Pass
}
