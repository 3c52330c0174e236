//! Test utilities for redir-datapath integration tests.
//!
//! Provides frame builders and a small harness wiring the ingress redirector,
//! egress restorer and TUN decider to in-memory parameter stores.

pub mod packets;

pub use packets::*;

use crate::auto_redirect::AutoRedirect;
use crate::conntrack::FlowTable;
use crate::params::{ParamStore, RedirectParams, TunParams};
use crate::tun::TunRedirectDecider;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::num::NonZeroUsize;
use std::sync::Arc;

/// Proxy listener used by the integration tests
pub const TEST_TARGET: SocketAddrV4 = SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 1), 7893);

/// LAN client originating connections
pub const TEST_CLIENT: SocketAddrV4 = SocketAddrV4::new(Ipv4Addr::new(192, 168, 1, 10), 40000);

/// Public server the client believes it talks to
pub const TEST_SERVER: SocketAddrV4 = SocketAddrV4::new(Ipv4Addr::new(1, 1, 1, 1), 443);

/// Mark carried by the proxy's own traffic in TUN mode
pub const TEST_PROXY_MARK: u32 = 0x162;

/// TUN device index in TUN mode
pub const TEST_TUN_IFINDEX: u32 = 7;

/// Auto-redirect pair configured for [`TEST_TARGET`] with a flow table of
/// `capacity` records in a single shard.
pub fn test_auto_redirect(capacity: usize) -> AutoRedirect {
    let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
    AutoRedirect::new(
        Arc::new(ParamStore::new(RedirectParams::new(TEST_TARGET))),
        Arc::new(FlowTable::with_shards(capacity, 1)),
    )
}

/// TUN decider configured with [`TEST_PROXY_MARK`] and [`TEST_TUN_IFINDEX`].
pub fn test_tun_decider() -> TunRedirectDecider {
    TunRedirectDecider::new(Arc::new(ParamStore::new(TunParams::new(
        TEST_PROXY_MARK,
        TEST_TUN_IFINDEX,
    ))))
}
