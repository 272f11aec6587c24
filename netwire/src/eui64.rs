//! EUI-64 interface identifiers and the link-local addresses built from them.
//!
//! See RFC 2464 §4 and RFC 4291 §2.5.1. Given a 48-bit MAC `aa:bb:cc:dd:ee:ff`,
//! the EUI-64 identifier is `aa:bb:cc:ff:fe:dd:ee:ff` with the universal/local
//! bit of the first octet flipped.

use smoltcp::wire::{EthernetAddress, Ipv6Address};

/// Derive the 8-byte EUI-64 interface identifier for `mac`.
pub fn eui64(mac: &EthernetAddress) -> [u8; 8] {
    let m = mac.as_bytes();
    [m[0] ^ 0x02, m[1], m[2], 0xff, 0xfe, m[3], m[4], m[5]]
}

/// Concatenate `prefix`'s first 64 bits with the EUI-64 of `mac`.
///
/// Only the network-bits half of `prefix` is used; the low 64 bits of the
/// result always come from `mac`, regardless of what `prefix` carries there.
pub fn eui64_address(prefix: &Ipv6Address, mac: &EthernetAddress) -> Ipv6Address {
    let mut bytes = [0u8; 16];
    bytes[..8].copy_from_slice(&prefix.as_bytes()[..8]);
    bytes[8..].copy_from_slice(&eui64(mac));
    Ipv6Address::from_bytes(&bytes)
}

/// `fe80::/64`, the well-known link-local prefix.
const LINK_LOCAL_PREFIX: Ipv6Address = Ipv6Address::new(0xfe80, 0, 0, 0, 0, 0, 0, 0);

/// The link-local (`fe80::/64`) address of `mac`.
pub fn link_local_eui64(mac: &EthernetAddress) -> Ipv6Address {
    eui64_address(&LINK_LOCAL_PREFIX, mac)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eui64_inserts_ff_fe_and_flips_ul_bit() {
        let mac = EthernetAddress::from_bytes(&[0x52, 0x54, 0x00, 0x12, 0x34, 0x56]);
        let id = eui64(&mac);
        assert_eq!(id, [0x50, 0x54, 0x00, 0xff, 0xfe, 0x12, 0x34, 0x56]);
    }

    #[test]
    fn link_local_is_under_fe80_and_matches_eui64() {
        let mac = EthernetAddress::from_bytes(&[0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);
        let ll = link_local_eui64(&mac);
        assert_eq!(&ll.as_bytes()[..2], &[0xfe, 0x80]);
        assert_eq!(&ll.as_bytes()[2..8], &[0, 0, 0, 0, 0, 0]);
        assert_eq!(&ll.as_bytes()[8..], &eui64(&mac));
    }

    #[test]
    fn ul_bit_round_trips_for_locally_administered_mac() {
        // 02:... already has the U/L bit set, so EUI-64 must clear it.
        let mac = EthernetAddress::from_bytes(&[0x02, 0x00, 0x00, 0x00, 0x00, 0x01]);
        let id = eui64(&mac);
        assert_eq!(id[0], 0x00);
    }
}
