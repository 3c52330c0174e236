//! Per-invocation outcome and its TC action code.

// TC action codes (linux/pkt_cls.h)
pub const TC_ACT_OK: i32 = 0;
pub const TC_ACT_SHOT: i32 = 2;
pub const TC_ACT_REDIRECT: i32 = 7;

/// bpf_redirect() flag selecting the receive path
pub const BPF_F_INGRESS: u64 = 1;

/// Network-stack entry point a redirected packet re-enters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectDirection {
    /// Transmitted on the target interface (egress injection)
    Egress,
    /// Received on the target interface (simulated ingress)
    Ingress,
}

impl RedirectDirection {
    /// Flags for bpf_redirect()
    pub const fn flags(self) -> u64 {
        match self {
            RedirectDirection::Egress => 0,
            RedirectDirection::Ingress => BPF_F_INGRESS,
        }
    }
}

/// What happens to a packet after one datapath invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Continue normal stack processing (possibly rewritten)
    Pass,
    /// Discard the packet
    Drop,
    /// Divert to another interface
    Redirect {
        ifindex: u32,
        direction: RedirectDirection,
    },
}

impl Verdict {
    pub const fn tc_action(self) -> i32 {
        match self {
            Verdict::Pass => TC_ACT_OK,
            Verdict::Drop => TC_ACT_SHOT,
            Verdict::Redirect { .. } => TC_ACT_REDIRECT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tc_action_codes() {
        assert_eq!(Verdict::Pass.tc_action(), 0);
        assert_eq!(Verdict::Drop.tc_action(), 2);
        let redirect = Verdict::Redirect {
            ifindex: 5,
            direction: RedirectDirection::Egress,
        };
        assert_eq!(redirect.tc_action(), 7);
    }

    #[test]
    fn test_direction_flags() {
        assert_eq!(RedirectDirection::Egress.flags(), 0);
        assert_eq!(RedirectDirection::Ingress.flags(), BPF_F_INGRESS);
    }
}
