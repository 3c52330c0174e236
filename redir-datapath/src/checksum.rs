//! Incremental Internet checksum maintenance (RFC 1624).
//!
//! Rewritten header fields never trigger a full recomputation: the stored
//! checksum is adjusted by removing the old field value and adding the new
//! one, `HC' = ~(~HC + ~m + m')`. Callers must pass the bytes that are in
//! the frame *before* the field is overwritten.

use crate::error::{DatapathError, Result};
use crate::packet::Packet;

/// Fold a 32-bit one's-complement sum into 16 bits.
pub fn fold(mut sum: u32) -> u16 {
    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    sum as u16
}

/// Adjust checksum `check` for a 16- or 32-bit field changing from `old` to
/// `new` (both in network byte order).
pub fn csum_replace(check: u16, old: &[u8], new: &[u8]) -> Result<u16> {
    if old.len() != new.len() || !matches!(old.len(), 2 | 4) {
        return Err(DatapathError::FieldWidth {
            old: old.len(),
            new: new.len(),
        });
    }

    let mut sum = u32::from(!check);
    for word in old.chunks_exact(2) {
        sum += u32::from(!u16::from_be_bytes([word[0], word[1]]));
    }
    for word in new.chunks_exact(2) {
        sum += u32::from(u16::from_be_bytes([word[0], word[1]]));
    }
    Ok(!fold(sum))
}

/// Full RFC 1071 checksum over `data`.
pub fn internet_checksum(data: &[u8]) -> u16 {
    let mut sum = 0u32;
    let mut words = data.chunks_exact(2);
    for word in &mut words {
        sum += u32::from(u16::from_be_bytes([word[0], word[1]]));
    }
    if let [last] = words.remainder() {
        sum += u32::from(u16::from_be_bytes([*last, 0]));
    }
    !fold(sum)
}

/// Update the IPv4 header checksum stored at `offset`.
pub fn l3_csum_replace(
    packet: &mut Packet<'_>,
    offset: usize,
    old: &[u8],
    new: &[u8],
) -> Result<()> {
    replace_at(packet, offset, old, new)
}

/// Update the transport checksum stored at `offset`.
///
/// Addresses belong to the TCP pseudo-header, so address rewrites go
/// through here as well as through [`l3_csum_replace`].
pub fn l4_csum_replace(
    packet: &mut Packet<'_>,
    offset: usize,
    old: &[u8],
    new: &[u8],
) -> Result<()> {
    replace_at(packet, offset, old, new)
}

fn replace_at(packet: &mut Packet<'_>, offset: usize, old: &[u8], new: &[u8]) -> Result<()> {
    let check = u16::from_be_bytes(packet.load::<2>(offset)?);
    let updated = csum_replace(check, old, new)?;
    packet.store(offset, &updated.to_be_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Sample IPv4 header with the checksum field zeroed.
    fn sample_ipv4_header() -> Vec<u8> {
        vec![
            0x45, 0x00, 0x00, 0x3c, 0x1c, 0x46, 0x40, 0x00, 0x40, 0x06, 0x00, 0x00, 0xac, 0x10,
            0x0a, 0x63, 0xac, 0x10, 0x0a, 0x0c,
        ]
    }

    #[test]
    fn test_rfc1624_example() {
        // RFC 1624 section 4: m = 0x5555 -> m' = 0x3285 with HC = 0xdd2f
        let updated = csum_replace(0xdd2f, &[0x55, 0x55], &[0x32, 0x85]).unwrap();
        assert_eq!(updated, 0x0000);
    }

    #[test]
    fn test_internet_checksum_known_header() {
        let header = sample_ipv4_header();
        assert_eq!(internet_checksum(&header), 0xb1e6);
    }

    #[test]
    fn test_internet_checksum_odd_length() {
        assert_eq!(internet_checksum(&[0x01]), !0x0100);
    }

    #[test]
    fn test_incremental_matches_full_recompute() {
        let mut header = sample_ipv4_header();
        let check = internet_checksum(&header);
        header[10..12].copy_from_slice(&check.to_be_bytes());

        let old: [u8; 4] = header[16..20].try_into().unwrap();
        let new = [93, 184, 216, 34];
        let updated = csum_replace(check, &old, &new).unwrap();

        header[16..20].copy_from_slice(&new);
        header[10..12].fill(0);
        assert_eq!(updated, internet_checksum(&header));
    }

    #[test]
    fn test_port_change_matches_full_recompute() {
        let mut data = sample_ipv4_header();
        let check = internet_checksum(&data);

        let updated = csum_replace(check, &[0x1c, 0x46], &[0x1e, 0xd5]).unwrap();
        data[4..6].copy_from_slice(&[0x1e, 0xd5]);
        assert_eq!(updated, internet_checksum(&data));
    }

    #[test]
    fn test_same_value_is_noop() {
        let check = internet_checksum(&sample_ipv4_header());
        let field = [10, 0, 0, 1];
        assert_eq!(csum_replace(check, &field, &field).unwrap(), check);
    }

    #[test]
    fn test_replace_twice_equals_once() {
        let check = internet_checksum(&sample_ipv4_header());
        let old = [0xac, 0x10, 0x0a, 0x0c];
        let target = [10, 0, 0, 1];

        let once = csum_replace(check, &old, &target).unwrap();
        let twice = csum_replace(once, &target, &target).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_rejects_bad_widths() {
        assert!(matches!(
            csum_replace(0, &[1, 2, 3], &[1, 2, 3]),
            Err(DatapathError::FieldWidth { old: 3, new: 3 })
        ));
        assert!(csum_replace(0, &[1, 2], &[1, 2, 3, 4]).is_err());
    }

    #[test]
    fn test_replace_in_packet_out_of_bounds() {
        let mut data = vec![0u8; 4];
        let mut packet = Packet::new(&mut data);
        assert!(l4_csum_replace(&mut packet, 3, &[0, 0], &[1, 1]).is_err());
        assert_eq!(packet.as_bytes(), &[0, 0, 0, 0]);
    }
}
