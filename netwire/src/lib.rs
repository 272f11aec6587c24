//! Frame construction and parsing for the tap responder.
//!
//! This crate has no notion of interfaces, queues, or bindings — it only knows how
//! to turn captured bytes into the fields the responders need, and how to turn a
//! decision back into bytes ready for raw injection. Everything here is built on
//! top of [`smoltcp`]'s wire representations so that checksums, byte order, and
//! field widths follow the same rules as the rest of the ecosystem.

pub mod dhcp;
pub mod eui64;
pub mod frames;

pub use eui64::link_local_eui64;
pub use smoltcp::wire::EthernetAddress as MacAddr;
pub use smoltcp::wire::Ipv4Address;
pub use smoltcp::wire::Ipv6Address;

/// Parse the canonical lowercase colon-separated MAC form used throughout this
/// crate (`aa:bb:cc:dd:ee:ff`). `smoltcp`'s own `FromStr` impl does no case
/// normalization on output, so replies always render through [`format_mac`].
pub fn parse_mac(s: &str) -> Option<MacAddr> {
    let mut bytes = [0u8; 6];
    let mut parts = s.split(':');
    for byte in bytes.iter_mut() {
        let part = parts.next()?;
        if part.len() != 2 {
            return None;
        }
        *byte = u8::from_str_radix(part, 16).ok()?;
    }
    if parts.next().is_some() {
        return None;
    }
    Some(MacAddr::from_bytes(&bytes))
}

/// Render a MAC address in canonical lowercase colon form.
pub fn format_mac(mac: &MacAddr) -> String {
    let b = mac.as_bytes();
    format!(
        "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
        b[0], b[1], b[2], b[3], b[4], b[5]
    )
}
