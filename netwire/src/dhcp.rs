//! BOOTP/DHCP request decoding and reply construction (RFC 2131, RFC 2132).
//!
//! Requests arrive as a captured IPv4 packet (Ethernet has already been stripped
//! by the kernel's packet-queue copy). Replies are emitted as full Ethernet
//! frames, ready for injection on the originating interface.

use smoltcp::phy::ChecksumCapabilities;
use smoltcp::wire::{
    dhcpv4, EthernetAddress, EthernetFrame, EthernetProtocol, EthernetRepr, IpAddress, IpProtocol,
    Ipv4Address, Ipv4Packet, Ipv4Repr, UdpPacket, UdpRepr, UDP_HEADER_LEN,
};
use thiserror::Error;

pub use dhcpv4::MessageType;

/// Options 12 (`hostname`), 15 (`domain name`), and 28 (`broadcast address`) are
/// not modeled directly by `smoltcp`'s [`dhcpv4::Repr`]; they ride along as raw
/// [`dhcpv4::DhcpOption`]s.
const OPT_HOSTNAME: u8 = 12;
const OPT_DOMAIN_NAME: u8 = 15;
const OPT_BROADCAST_ADDRESS: u8 = 28;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DhcpParseError {
    #[error("packet is not IPv4")]
    NotIpv4,
    #[error("malformed IPv4 header: {0}")]
    Ipv4(String),
    #[error("not a UDP datagram")]
    NotUdp,
    #[error("malformed UDP datagram: {0}")]
    Udp(String),
    #[error("no DHCP options payload present")]
    NoDhcpPayload,
    #[error("malformed DHCP/BOOTP payload: {0}")]
    Malformed(String),
}

/// Everything the responder needs out of a captured DISCOVER/REQUEST/INFORM/RELEASE.
#[derive(Debug, Clone)]
pub struct DhcpRequest {
    pub message_type: MessageType,
    pub transaction_id: u32,
    pub secs: u16,
    pub broadcast: bool,
    pub client_hardware_address: EthernetAddress,
    pub client_ip: Ipv4Address,
    pub relay_agent_ip: Ipv4Address,
    pub requested_ip: Option<Ipv4Address>,
    pub source_port: u16,
    pub dest_port: u16,
}

/// Decode a captured IPv4 packet down to its DHCP request fields.
///
/// `hlen` truncation of `chaddr` is handled inside `smoltcp`'s representation,
/// which assumes the hardware type is Ethernet (`htype = 1`, `hlen = 6`) — true
/// of every guest NIC this responder ever sees.
pub fn parse_request(ip_packet: &[u8]) -> Result<DhcpRequest, DhcpParseError> {
    let ipv4 = Ipv4Packet::new_checked(ip_packet).map_err(|_| DhcpParseError::NotIpv4)?;
    if ipv4.next_header() != IpProtocol::Udp {
        return Err(DhcpParseError::NotUdp);
    }
    let udp = UdpPacket::new_checked(ipv4.payload())
        .map_err(|e| DhcpParseError::Udp(format!("{e:?}")))?;

    let dhcp_packet = dhcpv4::Packet::new_checked(udp.payload())
        .map_err(|_| DhcpParseError::NoDhcpPayload)?;
    let repr = dhcpv4::Repr::parse(&dhcp_packet)
        .map_err(|e| DhcpParseError::Malformed(format!("{e:?}")))?;

    Ok(DhcpRequest {
        message_type: repr.message_type,
        transaction_id: repr.transaction_id,
        secs: repr.secs,
        broadcast: repr.broadcast,
        client_hardware_address: repr.client_hardware_address,
        client_ip: repr.client_ip,
        relay_agent_ip: repr.relay_agent_ip,
        requested_ip: repr.requested_ip,
        source_port: udp.src_port(),
        dest_port: udp.dst_port(),
    })
}

/// The options a lease-bearing reply (OFFER, or ACK to a matching REQUEST) carries.
#[derive(Debug, Clone)]
pub struct LeaseOptions<'a> {
    pub hostname: &'a str,
    pub domain: &'a str,
    pub router: Ipv4Address,
    pub name_servers: &'a [Ipv4Address],
    pub broadcast_address: Ipv4Address,
    pub subnet_mask: Ipv4Address,
    pub renewal_time: u32,
    pub lease_time: u32,
}

/// The options an INFORM's ACK carries: identity, no lease.
#[derive(Debug, Clone)]
pub struct InformOptions<'a> {
    pub hostname: &'a str,
    pub domain: &'a str,
    pub name_servers: &'a [Ipv4Address],
}

/// What kind of reply to build, and the options that go with it.
pub enum ReplyBody<'a> {
    /// OFFER or ACK carrying the full lease option block. `your_ip` is always
    /// `client.ip` (the Binding Store's authoritative address).
    Lease {
        your_ip: Ipv4Address,
        options: LeaseOptions<'a>,
    },
    /// ACK to a REQUEST whose `requested_addr` didn't match: no lease fields.
    Nak,
    /// ACK to an INFORM: identity options only, no lease, no `yiaddr`.
    Inform(InformOptions<'a>),
}

/// The dummy server identity this responder always answers as (never a real
/// routable address — see the reserved constant in the top-level spec).
pub const SERVER_ID: Ipv4Address = Ipv4Address::new(1, 2, 3, 4);

/// Build the full reply frame: Ethernet + IPv4 + UDP + BOOTP/DHCP.
///
/// Per RFC 2131, every field of the BOOTP header not explicitly touched here
/// (`xid`, `secs`, the broadcast flag, `ciaddr`, `giaddr`, `chaddr`) is carried
/// over unchanged from the request, as a real server would.
pub fn build_reply(
    req: &DhcpRequest,
    resp_type: MessageType,
    server_mac: EthernetAddress,
    dest_ip: Ipv4Address,
    body: &ReplyBody<'_>,
) -> Vec<u8> {
    let (your_ip, router, subnet_mask, broadcast_address, dns, renewal, lease, hostname, domain) =
        match body {
            ReplyBody::Lease { your_ip, options } => (
                *your_ip,
                Some(options.router),
                Some(options.subnet_mask),
                Some(options.broadcast_address),
                options.name_servers,
                Some(options.renewal_time),
                Some(options.lease_time),
                Some(options.hostname),
                Some(options.domain),
            ),
            ReplyBody::Nak => (
                Ipv4Address::UNSPECIFIED,
                None,
                None,
                None,
                [].as_slice(),
                None,
                None,
                None,
                None,
            ),
            ReplyBody::Inform(options) => (
                Ipv4Address::UNSPECIFIED,
                None,
                None,
                None,
                options.name_servers,
                None,
                None,
                Some(options.hostname),
                Some(options.domain),
            ),
        };

    let broadcast_bytes = broadcast_address.map(|addr| *addr.as_bytes());
    let mut additional = Vec::new();
    if let Some(hostname) = hostname {
        additional.push(dhcpv4::DhcpOption {
            kind: OPT_HOSTNAME,
            data: hostname.as_bytes(),
        });
    }
    if let Some(domain) = domain {
        additional.push(dhcpv4::DhcpOption {
            kind: OPT_DOMAIN_NAME,
            data: domain.as_bytes(),
        });
    }
    if let Some(bytes) = broadcast_bytes.as_ref() {
        additional.push(dhcpv4::DhcpOption {
            kind: OPT_BROADCAST_ADDRESS,
            data: bytes,
        });
    }

    let dns_servers = if dns.is_empty() {
        None
    } else {
        let mut arr = [None, None, None];
        for (slot, addr) in arr.iter_mut().zip(dns.iter()) {
            *slot = Some(*addr);
        }
        Some(arr)
    };

    let dhcp_repr = dhcpv4::Repr {
        message_type: resp_type,
        transaction_id: req.transaction_id,
        secs: req.secs,
        client_hardware_address: req.client_hardware_address,
        client_ip: req.client_ip,
        your_ip,
        server_ip: Ipv4Address::UNSPECIFIED,
        router,
        subnet_mask,
        relay_agent_ip: req.relay_agent_ip,
        broadcast: req.broadcast,
        requested_ip: None,
        client_identifier: None,
        server_identifier: Some(SERVER_ID),
        parameter_request_list: None,
        dns_servers,
        max_size: None,
        lease_duration: lease,
        renew_duration: renewal,
        rebind_duration: None,
        additional_options: &additional,
    };

    emit_frame(
        server_mac,
        req.client_hardware_address,
        SERVER_ID,
        dest_ip,
        req.dest_port,
        req.source_port,
        &dhcp_repr,
    )
}

fn emit_frame(
    server_mac: EthernetAddress,
    client_mac: EthernetAddress,
    server_ip: Ipv4Address,
    dest_ip: Ipv4Address,
    src_port: u16,
    dst_port: u16,
    dhcp_repr: &dhcpv4::Repr<'_>,
) -> Vec<u8> {
    let dhcp_len = dhcp_repr.buffer_len();
    let udp_repr = UdpRepr {
        src_port,
        dst_port,
    };
    let ipv4_repr = Ipv4Repr {
        src_addr: server_ip,
        dst_addr: dest_ip,
        next_header: IpProtocol::Udp,
        payload_len: UDP_HEADER_LEN + dhcp_len,
        hop_limit: 64,
    };
    let eth_repr = EthernetRepr {
        src_addr: server_mac,
        dst_addr: client_mac,
        ethertype: EthernetProtocol::Ipv4,
    };

    let total_len = eth_repr.buffer_len() + ipv4_repr.buffer_len() + UDP_HEADER_LEN + dhcp_len;
    let mut buffer = vec![0u8; total_len];

    let mut eth_frame = EthernetFrame::new_unchecked(&mut buffer);
    eth_repr.emit(&mut eth_frame);

    let mut ipv4_packet = Ipv4Packet::new_unchecked(eth_frame.payload_mut());
    ipv4_repr.emit(&mut ipv4_packet, &ChecksumCapabilities::default());

    let mut udp_packet = UdpPacket::new_unchecked(ipv4_packet.payload_mut());
    udp_repr.emit(
        &mut udp_packet,
        &IpAddress::Ipv4(ipv4_repr.src_addr),
        &IpAddress::Ipv4(ipv4_repr.dst_addr),
        dhcp_len,
        |payload| {
            let mut dhcp_packet = dhcpv4::Packet::new_unchecked(payload);
            dhcp_repr.emit(&mut dhcp_packet).ok();
        },
        &ChecksumCapabilities::default(),
    );

    buffer
}
