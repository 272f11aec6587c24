//! DHCPv4 Responder: decode, anti-spoof, state machine, reply frame.

use std::path::Path;

use netwire::dhcp::{self, DhcpRequest, InformOptions, LeaseOptions, MessageType, ReplyBody};
use netwire::Ipv4Address;
use tracing::{info, warn};

use crate::host;
use crate::store::BindingStore;

const DEFAULT_LEASE_TIME: u32 = 604_800;
const DEFAULT_RENEWAL_TIME: u32 = 600;

/// A reply ready for raw L2 injection on `iface`.
pub struct DhcpReply {
    pub iface: String,
    pub frame: Vec<u8>,
}

/// Decode and answer one captured DHCP packet.
///
/// The caller always drops the original packet regardless of
/// what this function returns — it is never re-accepted onto the wire. A
/// `None` result means "no reply", not "pass the packet through".
pub fn handle_dhcp_packet(
    store: &BindingStore,
    sysfs_net_root: &Path,
    name_servers: &[Ipv4Address],
    ifindex: u32,
    ip_packet: &[u8],
) -> Option<DhcpReply> {
    let iface = store.iface_by_ifindex(ifindex)?;

    let req = match dhcp::parse_request(ip_packet) {
        Ok(req) => req,
        Err(err) => {
            warn!(iface, error = %err, "invalid DHCP packet, dropping");
            return None;
        }
    };

    let mac = req.client_hardware_address;
    let client = match store.client_by_mac(&mac) {
        Some(client) => client,
        None => {
            warn!(iface, mac = %netwire::format_mac(&mac), "invalid client, dropping");
            return None;
        }
    };

    if client.iface != iface {
        warn!(
            iface,
            pinned_iface = %client.iface,
            mac = %netwire::format_mac(&mac),
            "spoofed request: client pinned to a different interface, dropping"
        );
        return None;
    }

    let server_mac = match host::hwaddr(sysfs_net_root, iface) {
        Ok(mac) => mac,
        Err(err) => {
            warn!(iface, error = %err, "could not read interface hardware address, dropping");
            return None;
        }
    };

    let subnet = store.ipv4_subnet(&client.link).copied().unwrap_or_default();
    let requested = req.requested_ip.unwrap_or_else(|| client.ip());

    let (resp_type, body) = match req.message_type {
        MessageType::Discover => (MessageType::Offer, lease_body(client, &subnet, name_servers)),
        MessageType::Request if requested == client.ip() => {
            (MessageType::Ack, lease_body(client, &subnet, name_servers))
        }
        MessageType::Request => (MessageType::Nak, ReplyBody::Nak),
        MessageType::Inform => (
            MessageType::Ack,
            ReplyBody::Inform(InformOptions {
                hostname: &client.hostname,
                domain: client.domain(),
                name_servers,
            }),
        ),
        MessageType::Release => {
            info!(iface, mac = %netwire::format_mac(&mac), "RELEASE received, no reply");
            return None;
        }
        other => {
            warn!(iface, message_type = ?other, "UNKNOWN DHCP message type, no reply");
            return None;
        }
    };

    info!(
        iface,
        mac = %netwire::format_mac(&mac),
        message_type = ?req.message_type,
        response = ?resp_type,
        "DHCP request received"
    );

    let frame = dhcp::build_reply(&req, resp_type, server_mac, client.ip(), &body);

    info!(
        iface,
        mac = %netwire::format_mac(&mac),
        ip = %client.ip(),
        response = ?resp_type,
        "DHCP reply sent"
    );

    Some(DhcpReply {
        iface: iface.to_string(),
        frame,
    })
}

fn lease_body<'a>(
    client: &'a crate::model::Client,
    subnet: &crate::model::Ipv4Subnet,
    name_servers: &'a [Ipv4Address],
) -> ReplyBody<'a> {
    ReplyBody::Lease {
        your_ip: client.ip(),
        options: LeaseOptions {
            hostname: &client.hostname,
            domain: client.domain(),
            router: subnet.gateway.unwrap_or(Ipv4Address::UNSPECIFIED),
            name_servers,
            broadcast_address: subnet.broadcast().unwrap_or(Ipv4Address::BROADCAST),
            subnet_mask: subnet.netmask().unwrap_or(Ipv4Address::UNSPECIFIED),
            renewal_time: DEFAULT_RENEWAL_TIME,
            lease_time: DEFAULT_LEASE_TIME,
        },
    }
}
