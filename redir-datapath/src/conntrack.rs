//! Flow table: redirected connection -> original destination.
//!
//! The table is lock-striped: each shard is an LRU cache behind its own
//! mutex, held only for a single map operation. A key always hashes to the
//! same shard, so the shard lock makes `create_if_absent` atomic per key.

use lru::LruCache;
use std::hash::{BuildHasher, RandomState};
use std::net::{Ipv4Addr, SocketAddrV4};
use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{info, trace};

/// Default number of tracked flows.
pub const DEFAULT_CAPACITY: usize = 65535;

/// Default number of lock stripes.
pub const DEFAULT_SHARDS: usize = 16;

/// Identifies one redirected TCP connection as seen after rewriting:
/// client address/port plus the redirect target it was sent to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FlowKey {
    pub src_addr: Ipv4Addr,
    pub src_port: u16,
    pub dst_addr: Ipv4Addr,
    pub dst_port: u16,
}

impl FlowKey {
    /// Encoded size: 12 bytes of tuple padded to 16.
    pub const WIRE_LEN: usize = 16;

    pub const fn new(
        src_addr: Ipv4Addr,
        src_port: u16,
        dst_addr: Ipv4Addr,
        dst_port: u16,
    ) -> Self {
        Self {
            src_addr,
            src_port,
            dst_addr,
            dst_port,
        }
    }

    /// Network byte order: `sip[4] dip[4] sport[2] dport[2] pad[4]`.
    pub fn to_bytes(&self) -> [u8; Self::WIRE_LEN] {
        let mut out = [0u8; Self::WIRE_LEN];
        out[0..4].copy_from_slice(&self.src_addr.octets());
        out[4..8].copy_from_slice(&self.dst_addr.octets());
        out[8..10].copy_from_slice(&self.src_port.to_be_bytes());
        out[10..12].copy_from_slice(&self.dst_port.to_be_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8; Self::WIRE_LEN]) -> Self {
        Self {
            src_addr: Ipv4Addr::new(bytes[0], bytes[1], bytes[2], bytes[3]),
            dst_addr: Ipv4Addr::new(bytes[4], bytes[5], bytes[6], bytes[7]),
            src_port: u16::from_be_bytes([bytes[8], bytes[9]]),
            dst_port: u16::from_be_bytes([bytes[10], bytes[11]]),
        }
    }
}

/// Destination a connection was originally sent to, recorded on its SYN.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OriginalDst {
    pub addr: Ipv4Addr,
    pub port: u16,
}

impl OriginalDst {
    /// Encoded size: address, port, 2 bytes padding.
    pub const WIRE_LEN: usize = 8;

    pub const fn new(addr: Ipv4Addr, port: u16) -> Self {
        Self { addr, port }
    }

    pub fn to_bytes(&self) -> [u8; Self::WIRE_LEN] {
        let mut out = [0u8; Self::WIRE_LEN];
        out[0..4].copy_from_slice(&self.addr.octets());
        out[4..6].copy_from_slice(&self.port.to_be_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8; Self::WIRE_LEN]) -> Self {
        Self {
            addr: Ipv4Addr::new(bytes[0], bytes[1], bytes[2], bytes[3]),
            port: u16::from_be_bytes([bytes[4], bytes[5]]),
        }
    }

    pub fn socket_addr(&self) -> SocketAddrV4 {
        SocketAddrV4::new(self.addr, self.port)
    }
}

type Shard = LruCache<FlowKey, OriginalDst>;

/// Bounded, concurrently accessed flow table with LRU eviction.
///
/// Total occupancy never exceeds the configured capacity. Eviction is
/// decided per shard, so records may start being evicted before the table
/// holds `capacity` flows.
pub struct FlowTable {
    shards: Box<[Mutex<Shard>]>,
    hasher: RandomState,
    capacity: NonZeroUsize,
}

impl FlowTable {
    /// Create a table holding up to `capacity` flows with the default
    /// number of shards.
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self::with_shards(capacity, DEFAULT_SHARDS)
    }

    /// Create a table split into `shards` lock stripes.
    ///
    /// Shard sizes add up to exactly `capacity`; the first
    /// `capacity % shards` shards hold one extra record. Recency is tracked
    /// per shard, so a full shard can evict before the table as a whole is
    /// full. A single shard gives exact LRU order over the whole table.
    pub fn with_shards(capacity: NonZeroUsize, shards: usize) -> Self {
        let shards = shards.clamp(1, capacity.get());
        let base = capacity.get() / shards;
        let extra = capacity.get() % shards;

        info!(
            capacity = capacity.get(),
            shards,
            per_shard = base,
            "Flow table created"
        );

        Self {
            shards: (0..shards)
                .map(|i| {
                    let size = base + usize::from(i < extra);
                    Mutex::new(LruCache::new(
                        NonZeroUsize::new(size).unwrap_or(NonZeroUsize::MIN),
                    ))
                })
                .collect(),
            hasher: RandomState::new(),
            capacity,
        }
    }

    fn shard(&self, key: &FlowKey) -> MutexGuard<'_, Shard> {
        let index = (self.hasher.hash_one(key) as usize) % self.shards.len();
        self.shards[index]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert `value` unless `key` is already tracked.
    ///
    /// Returns `true` only for the caller that created the record; an
    /// existing record is left untouched. Inserting into a full shard evicts
    /// its least recently used record.
    pub fn create_if_absent(&self, key: FlowKey, value: OriginalDst) -> bool {
        let mut shard = self.shard(&key);
        if shard.contains(&key) {
            return false;
        }

        if let Some((evicted, _)) = shard.push(key, value) {
            trace!(?evicted, "Flow record evicted");
        }
        true
    }

    /// Look up the original destination of a tracked flow, marking it as
    /// recently used.
    pub fn lookup(&self, key: &FlowKey) -> Option<OriginalDst> {
        self.shard(key).get(key).copied()
    }

    /// Remove a flow record. Removing an absent key is a no-op.
    pub fn delete(&self, key: &FlowKey) -> bool {
        self.shard(key).pop(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|s| s.lock().unwrap_or_else(PoisonError::into_inner).len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity.get()
    }

    pub fn clear(&self) {
        for shard in self.shards.iter() {
            shard.lock().unwrap_or_else(PoisonError::into_inner).clear();
        }
    }
}

impl Default for FlowTable {
    fn default() -> Self {
        Self::new(NonZeroUsize::new(DEFAULT_CAPACITY).unwrap_or(NonZeroUsize::MIN))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(src_port: u16) -> FlowKey {
        FlowKey::new(
            Ipv4Addr::new(192, 168, 1, 10),
            src_port,
            Ipv4Addr::new(10, 0, 0, 1),
            7893,
        )
    }

    fn origin(last_octet: u8) -> OriginalDst {
        OriginalDst::new(Ipv4Addr::new(93, 184, 216, last_octet), 443)
    }

    fn single_shard(capacity: usize) -> FlowTable {
        FlowTable::with_shards(NonZeroUsize::new(capacity).unwrap(), 1)
    }

    #[test]
    fn test_create_if_absent_first_wins() {
        let table = FlowTable::default();

        assert!(table.create_if_absent(key(40000), origin(1)));
        assert!(!table.create_if_absent(key(40000), origin(2)));

        assert_eq!(table.lookup(&key(40000)), Some(origin(1)));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_lookup_absent() {
        let table = FlowTable::default();
        assert_eq!(table.lookup(&key(1)), None);
        assert!(table.is_empty());
    }

    #[test]
    fn test_delete_idempotent() {
        let table = FlowTable::default();
        table.create_if_absent(key(40000), origin(1));

        assert!(table.delete(&key(40000)));
        assert!(!table.delete(&key(40000)));
        assert_eq!(table.lookup(&key(40000)), None);

        // A new connection on the same tuple is tracked again
        assert!(table.create_if_absent(key(40000), origin(3)));
        assert_eq!(table.lookup(&key(40000)), Some(origin(3)));
    }

    #[test]
    fn test_lru_eviction() {
        let table = single_shard(3);
        for port in 1..=3 {
            assert!(table.create_if_absent(key(port), origin(port as u8)));
        }

        table.create_if_absent(key(4), origin(4));

        assert_eq!(table.len(), 3);
        assert_eq!(table.lookup(&key(1)), None);
        assert_eq!(table.lookup(&key(4)), Some(origin(4)));
    }

    #[test]
    fn test_lookup_refreshes_recency() {
        let table = single_shard(3);
        for port in 1..=3 {
            table.create_if_absent(key(port), origin(port as u8));
        }

        // Touch the oldest record so the next insert evicts port 2 instead
        assert!(table.lookup(&key(1)).is_some());
        table.create_if_absent(key(4), origin(4));

        assert_eq!(table.lookup(&key(1)), Some(origin(1)));
        assert_eq!(table.lookup(&key(2)), None);
        assert_eq!(table.lookup(&key(3)), Some(origin(3)));
    }

    #[test]
    fn test_shards_clamped_to_capacity() {
        let table = FlowTable::with_shards(NonZeroUsize::new(2).unwrap(), 64);
        assert_eq!(table.capacity(), 2);
        table.create_if_absent(key(1), origin(1));
        table.create_if_absent(key(2), origin(2));
        table.clear();
        assert!(table.is_empty());
    }

    #[test]
    fn test_shard_sizes_sum_to_capacity() {
        for (capacity, shards) in [(DEFAULT_CAPACITY, DEFAULT_SHARDS), (10, 3), (7, 7), (5, 1)] {
            let table = FlowTable::with_shards(NonZeroUsize::new(capacity).unwrap(), shards);
            let total: usize = table
                .shards
                .iter()
                .map(|s| s.lock().unwrap().cap().get())
                .sum();
            assert_eq!(total, capacity, "capacity {capacity} over {shards} shards");
        }
    }

    #[test]
    fn test_wire_encoding() {
        let k = key(40000);
        let bytes = k.to_bytes();
        assert_eq!(&bytes[0..4], &[192, 168, 1, 10]);
        assert_eq!(&bytes[4..8], &[10, 0, 0, 1]);
        assert_eq!(&bytes[8..10], &40000u16.to_be_bytes());
        assert_eq!(&bytes[10..12], &7893u16.to_be_bytes());
        assert_eq!(&bytes[12..16], &[0, 0, 0, 0]);
        assert_eq!(FlowKey::from_bytes(&bytes), k);

        let o = origin(34);
        let bytes = o.to_bytes();
        assert_eq!(bytes, [93, 184, 216, 34, 0x01, 0xbb, 0, 0]);
        assert_eq!(OriginalDst::from_bytes(&bytes), o);
        assert_eq!(o.socket_addr(), "93.184.216.34:443".parse().unwrap());
    }
}
