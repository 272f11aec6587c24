//! IPv6 Neighbor Discovery (RFC 4861) request parsing and reply construction.
//!
//! Mirrors [`crate::dhcp`]: requests arrive as a captured IPv6 packet (Ethernet
//! already stripped), replies are emitted as full Ethernet frames ready for
//! injection on the originating interface.

use smoltcp::phy::Medium;
use smoltcp::time::Duration;
use smoltcp::wire::{
    EthernetAddress, EthernetFrame, EthernetProtocol, EthernetRepr, HardwareAddress, Icmpv6Packet,
    IpAddress, IpProtocol, Ipv6Address, Ipv6Packet, Ipv6Repr, NdiscNeighborFlags,
    NdiscPrefixInfoFlags, NdiscPrefixInformation, NdiscRepr, NdiscRouterFlags, RawHardwareAddress,
};
use thiserror::Error;

use crate::eui64::link_local_eui64;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NdpParseError {
    #[error("packet is not IPv6")]
    NotIpv6,
    #[error("not an ICMPv6 packet")]
    NotIcmpv6,
    #[error("malformed NDP message: {0}")]
    Malformed(String),
    #[error("not a solicitation this responder answers")]
    Unhandled,
}

/// A Router or Neighbor Solicitation this responder can answer.
#[derive(Debug, Clone)]
pub enum NdpSolicitation {
    Router {
        /// `::` during a guest's own early-boot DAD window.
        source: Ipv6Address,
        source_lladdr: Option<EthernetAddress>,
    },
    Neighbor {
        source: Ipv6Address,
        target: Ipv6Address,
        source_lladdr: Option<EthernetAddress>,
    },
}

/// Parse a captured IPv6 packet down to the solicitation this responder cares about.
///
/// Router/Neighbor Advertisements, Redirects, and anything else this responder
/// never originates are reported as [`NdpParseError::Unhandled`]; callers drop
/// those packets without reply.
pub fn parse_solicitation(ip_packet: &[u8]) -> Result<NdpSolicitation, NdpParseError> {
    let ipv6 = Ipv6Packet::new_checked(ip_packet).map_err(|_| NdpParseError::NotIpv6)?;
    if ipv6.next_header() != IpProtocol::Icmpv6 {
        return Err(NdpParseError::NotIcmpv6);
    }
    let icmpv6 =
        Icmpv6Packet::new_checked(ipv6.payload()).map_err(|_| NdpParseError::NotIcmpv6)?;
    let ndp =
        NdiscRepr::parse(&icmpv6).map_err(|e| NdpParseError::Malformed(format!("{e:?}")))?;

    match ndp {
        NdiscRepr::RouterSolicit { lladdr } => Ok(NdpSolicitation::Router {
            source: ipv6.src_addr(),
            source_lladdr: lladdr_to_mac(lladdr),
        }),
        NdiscRepr::NeighborSolicit {
            target_addr,
            lladdr,
        } => Ok(NdpSolicitation::Neighbor {
            source: ipv6.src_addr(),
            target: target_addr,
            source_lladdr: lladdr_to_mac(lladdr),
        }),
        _ => Err(NdpParseError::Unhandled),
    }
}

fn lladdr_to_mac(lladdr: Option<RawHardwareAddress>) -> Option<EthernetAddress> {
    match lladdr?.parse(Medium::Ethernet).ok()? {
        HardwareAddress::Ethernet(mac) => Some(mac),
        #[allow(unreachable_patterns)]
        _ => None,
    }
}

/// The Ethernet multicast address carrying a given IPv6 multicast group
/// (RFC 2464 §7: `33:33:xx:xx:xx:xx` from the low 32 bits of the address).
pub fn multicast_mac(addr: &Ipv6Address) -> EthernetAddress {
    let b = addr.as_bytes();
    EthernetAddress::from_bytes(&[0x33, 0x33, b[12], b[13], b[14], b[15]])
}

/// Lifetimes and prefix carried by a synthesized Router Advertisement.
pub struct RouterAdvertParams {
    pub server_mac: EthernetAddress,
    pub prefix: Ipv6Address,
    pub prefix_len: u8,
    pub router_lifetime_secs: u16,
    pub valid_lifetime_secs: u32,
    pub preferred_lifetime_secs: u32,
}

/// Build a Router Advertisement (RFC 4861 §4.2), solicited or periodic.
///
/// `dst_addr`/`eth_dst` are the caller's choice: unicast back to a known RS
/// source, or the all-nodes multicast group otherwise (RFC 4861 §6.2.6). The
/// source address is always this responder's own link-local EUI-64 address —
/// it never advertises itself as anything else. Carries exactly one option,
/// Prefix Information; no SLLAO, no MTU option.
pub fn build_router_advertisement(
    params: &RouterAdvertParams,
    dst_addr: Ipv6Address,
    eth_dst: EthernetAddress,
) -> Vec<u8> {
    let src_addr = link_local_eui64(&params.server_mac);

    let ndp_repr = NdiscRepr::RouterAdvert {
        hop_limit: 64,
        flags: NdiscRouterFlags::empty(),
        router_lifetime: Duration::from_secs(params.router_lifetime_secs.into()),
        reachable_time: Duration::from_millis(0),
        retrans_time: Duration::from_millis(0),
        lladdr: None,
        mtu: None,
        prefix_info: Some(NdiscPrefixInformation {
            prefix_len: params.prefix_len,
            prefix: params.prefix,
            valid_lifetime: Duration::from_secs(params.valid_lifetime_secs.into()),
            preferred_lifetime: Duration::from_secs(params.preferred_lifetime_secs.into()),
            flags: NdiscPrefixInfoFlags::ON_LINK | NdiscPrefixInfoFlags::ADDRCONF,
        }),
    };

    emit_icmpv6(src_addr, dst_addr, params.server_mac, eth_dst, &ndp_repr)
}

/// Build a solicited Neighbor Advertisement.
///
/// `target` is the address being vouched for — any address in the
/// responder's advertised prefix, or its own link-local address, never only
/// the latter. The L3 source is always this responder's own link-local
/// EUI-64 address (`ifll`), regardless of which target is being answered
/// for; only `target_addr` carries the address under solicitation.
///
/// Flags are `R=1, O=0, S=1`: the host answers as a router (`ROUTER`)
/// to a solicitation (`SOLICITED`) but deliberately omits `OVERRIDE` so a
/// guest's existing neighbor-cache entry for this address is not clobbered.
pub fn build_neighbor_advertisement(
    server_mac: EthernetAddress,
    target: Ipv6Address,
    dst_addr: Ipv6Address,
    eth_dst: EthernetAddress,
) -> Vec<u8> {
    let flags = NdiscNeighborFlags::ROUTER | NdiscNeighborFlags::SOLICITED;

    let ndp_repr = NdiscRepr::NeighborAdvert {
        flags,
        target_addr: target,
        lladdr: Some(RawHardwareAddress::from(server_mac)),
    };

    let src_addr = link_local_eui64(&server_mac);
    emit_icmpv6(src_addr, dst_addr, server_mac, eth_dst, &ndp_repr)
}

fn emit_icmpv6(
    src_addr: Ipv6Address,
    dst_addr: Ipv6Address,
    eth_src: EthernetAddress,
    eth_dst: EthernetAddress,
    ndp_repr: &NdiscRepr<'_>,
) -> Vec<u8> {
    let ipv6_repr = Ipv6Repr {
        src_addr,
        dst_addr,
        next_header: IpProtocol::Icmpv6,
        payload_len: ndp_repr.buffer_len(),
        hop_limit: 255,
    };
    let eth_repr = EthernetRepr {
        src_addr: eth_src,
        dst_addr: eth_dst,
        ethertype: EthernetProtocol::Ipv6,
    };

    let total_len = eth_repr.buffer_len() + ipv6_repr.buffer_len() + ndp_repr.buffer_len();
    let mut buffer = vec![0u8; total_len];

    let mut eth_frame = EthernetFrame::new_unchecked(&mut buffer);
    eth_repr.emit(&mut eth_frame);

    let mut ipv6_packet = Ipv6Packet::new_unchecked(eth_frame.payload_mut());
    ipv6_repr.emit(&mut ipv6_packet);

    let mut icmpv6_packet = Icmpv6Packet::new_unchecked(ipv6_packet.payload_mut());
    ndp_repr.emit(&mut icmpv6_packet);
    icmpv6_packet.fill_checksum(&IpAddress::Ipv6(src_addr), &IpAddress::Ipv6(dst_addr));

    buffer
}
