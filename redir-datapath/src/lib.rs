//! redir-datapath: packet-level datapath of a transparent proxy.
//!
//! Decides, per Ethernet frame seen on a TC hook, whether to pass, drop,
//! rewrite or divert it, so outbound TCP connections from a host or LAN are
//! handed to a local proxy without the clients being aware of it.
//!
//! # Architecture
//!
//! ```text
//!                     auto-redirect mode
//! client --SYN--> [tc ingress] IngressRedirector --dst:=target--> proxy
//!                        |            |
//!                        |            +--> FlowTable (client tuple -> original dst)
//!                        +--> ICMP --> bpf_redirect(icmp ifindex)
//!
//! client <------- [tc egress]  EgressRestorer <--src:=original dst-- proxy
//!
//!                     redirect-to-TUN mode
//! frame --> [tc] TunRedirectDecider --unmarked, non-local--> TUN device --> proxy
//! ```
//!
//! Kernel-side programs live in `redir-datapath-programs`; this crate holds
//! the same decision logic over plain byte buffers, the configuration layer
//! feeding the parameter stores, and the test harness.

pub mod auto_redirect;
pub mod checksum;
pub mod classify;
pub mod config;
pub mod conntrack;
pub mod egress;
pub mod error;
pub mod ingress;
pub mod packet;
pub mod params;
pub mod tun;
pub mod verdict;

#[cfg(any(test, feature = "test-util"))]
pub mod test_util;

// Re-export commonly used types
pub use auto_redirect::AutoRedirect;
pub use classify::{Admission, RejectReason};
pub use config::{AutoRedirectConfig, DatapathConfig, FlowTableConfig, TunConfig};
pub use conntrack::{FlowKey, FlowTable, OriginalDst};
pub use egress::EgressRestorer;
pub use error::{DatapathError, Result};
pub use ingress::IngressRedirector;
pub use packet::Packet;
pub use params::{ParamStore, RedirectParams, TunParams};
pub use tun::TunRedirectDecider;
pub use verdict::{RedirectDirection, Verdict};
