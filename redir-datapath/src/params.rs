//! Parameter stores for the two interception modes.
//!
//! The control plane publishes immutable snapshots; the per-packet path reads
//! them lock-free. An empty store means the mode is not configured and every
//! packet passes through.
//!
//! The raw slot layouts used by kernel array maps are kept as conversions:
//!
//! | Store    | Slot | Meaning                                          |
//! |----------|------|--------------------------------------------------|
//! | redirect | 0    | ICMP redirect ifindex, 0 disables                |
//! | redirect | 1    | Redirect target address, host order              |
//! | redirect | 2    | Redirect target port, host order (low 16 bits)   |
//! | tun      | 0    | Mark carried by the proxy's own traffic          |
//! | tun      | 1    | TUN ifindex, 0 disables                          |

use arc_swap::ArcSwapOption;
use std::fmt::Debug;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::Arc;
use tracing::info;

/// Auto-redirect parameters, shared by the ingress redirector and the
/// egress restorer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RedirectParams {
    /// Interface ICMP is diverted to (transmit direction), 0 disables
    pub icmp_redirect_ifindex: u32,
    /// Proxy listener; `None` leaves TCP untouched
    pub target: Option<SocketAddrV4>,
}

impl RedirectParams {
    pub const SLOTS: usize = 3;

    pub fn new(target: SocketAddrV4) -> Self {
        Self {
            icmp_redirect_ifindex: 0,
            target: Some(target),
        }
    }

    pub fn with_icmp_redirect(mut self, ifindex: u32) -> Self {
        self.icmp_redirect_ifindex = ifindex;
        self
    }

    /// ICMP redirect interface, if enabled.
    pub fn icmp_redirect(&self) -> Option<u32> {
        (self.icmp_redirect_ifindex != 0).then_some(self.icmp_redirect_ifindex)
    }

    /// Decode the raw slot layout. A missing slot 0 means the store is
    /// unpopulated; a missing slot 1 or 2 leaves the target unset.
    pub fn from_slots(slots: &[Option<u32>; Self::SLOTS]) -> Option<Self> {
        let icmp_redirect_ifindex = slots[0]?;
        let target = match (slots[1], slots[2]) {
            (Some(addr), Some(port)) => Some(SocketAddrV4::new(Ipv4Addr::from(addr), port as u16)),
            _ => None,
        };

        Some(Self {
            icmp_redirect_ifindex,
            target,
        })
    }

    pub fn to_slots(&self) -> [Option<u32>; Self::SLOTS] {
        [
            Some(self.icmp_redirect_ifindex),
            self.target.map(|t| u32::from(*t.ip())),
            self.target.map(|t| u32::from(t.port())),
        ]
    }
}

/// Redirect-to-TUN parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TunParams {
    /// Mark set on packets emitted by the proxy itself
    pub proxy_mark: u32,
    /// TUN interface non-excluded traffic is diverted to, 0 disables
    pub tun_ifindex: u32,
}

impl TunParams {
    pub const SLOTS: usize = 2;

    pub fn new(proxy_mark: u32, tun_ifindex: u32) -> Self {
        Self {
            proxy_mark,
            tun_ifindex,
        }
    }

    /// TUN interface, if enabled.
    pub fn tun_interface(&self) -> Option<u32> {
        (self.tun_ifindex != 0).then_some(self.tun_ifindex)
    }

    /// Decode the raw slot layout. A missing mark means the store is
    /// unpopulated; a missing ifindex disables the redirect.
    pub fn from_slots(slots: &[Option<u32>; Self::SLOTS]) -> Option<Self> {
        Some(Self {
            proxy_mark: slots[0]?,
            tun_ifindex: slots[1].unwrap_or(0),
        })
    }

    pub fn to_slots(&self) -> [Option<u32>; Self::SLOTS] {
        [Some(self.proxy_mark), Some(self.tun_ifindex)]
    }
}

/// Hot-swappable parameter snapshot.
pub struct ParamStore<T> {
    current: ArcSwapOption<T>,
}

impl<T: Copy + Debug> ParamStore<T> {
    /// Store with no snapshot; the owning mode is disabled until
    /// [`ParamStore::publish`] is called.
    pub fn empty() -> Self {
        Self {
            current: ArcSwapOption::empty(),
        }
    }

    pub fn new(params: T) -> Self {
        Self {
            current: ArcSwapOption::from_pointee(params),
        }
    }

    /// Replace the snapshot. Packets already being processed finish with
    /// the snapshot they loaded.
    pub fn publish(&self, params: T) {
        info!(?params, "Parameters published");
        self.current.store(Some(Arc::new(params)));
    }

    pub fn clear(&self) {
        info!("Parameters cleared");
        self.current.store(None);
    }

    /// Current snapshot, if configured.
    pub fn current(&self) -> Option<T> {
        self.current.load().as_deref().copied()
    }

    pub fn is_configured(&self) -> bool {
        self.current.load().is_some()
    }
}

impl<T: Copy + Debug> Default for ParamStore<T> {
    fn default() -> Self {
        Self::empty()
    }
}
