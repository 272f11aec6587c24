//! IPv6 RA Responder and NA Responder.

use std::path::Path;

use netwire::frames::{
    self, build_neighbor_advertisement, build_router_advertisement, multicast_mac,
    NdpSolicitation, RouterAdvertParams,
};
use netwire::{link_local_eui64, Ipv6Address, MacAddr};
use tracing::{debug, info, warn};

use crate::host;
use crate::store::BindingStore;

const RA_ROUTER_LIFETIME_SECS: u16 = 14_400;
const RA_VALID_LIFETIME_SECS: u32 = 86_400;
const RA_PREFERRED_LIFETIME_SECS: u32 = 14_400;

/// A reply ready for raw L2 injection on `iface`.
pub struct NdpReply {
    pub iface: String,
    pub frame: Vec<u8>,
}

/// Outcome of the NA Responder's acceptance test.
pub enum NsOutcome {
    /// Target is outside the advertised prefix and isn't our own link-local
    /// address: accept the packet unchanged, no reply.
    Accept,
    Reply(NdpReply),
}

/// Handle a captured Router Solicitation. Always answers; the only
/// rejection path is an unresolvable interface.
pub fn handle_rs_packet(
    store: &BindingStore,
    sysfs_net_root: &Path,
    ifindex: u32,
    frame_source_mac: MacAddr,
    ip_packet: &[u8],
) -> Option<NdpReply> {
    let iface = store.iface_by_ifindex(ifindex)?;

    let solicitation = match frames::parse_solicitation(ip_packet) {
        Ok(NdpSolicitation::Router { source, source_lladdr }) => (source, source_lladdr),
        Ok(_) => return None,
        Err(err) => {
            warn!(iface, error = %err, "malformed Router Solicitation, dropping");
            return None;
        }
    };
    let (source, source_lladdr) = solicitation;

    let server_mac = match host::hwaddr(sysfs_net_root, iface) {
        Ok(mac) => mac,
        Err(err) => {
            warn!(iface, error = %err, "could not read interface hardware address, dropping");
            return None;
        }
    };

    let subnet = store.ipv6_subnet(iface).copied().unwrap_or_default();
    let (Some(prefix), Some(prefix_len)) = (subnet.prefix, subnet.prefix_len) else {
        warn!(iface, "no IPv6 subnet known for interface, dropping Router Solicitation");
        return None;
    };

    let (dst_addr, eth_dst) = if !source.is_unspecified() {
        (source, source_lladdr.unwrap_or(frame_source_mac))
    } else {
        let all_nodes = Ipv6Address::LINK_LOCAL_ALL_NODES;
        (all_nodes, multicast_mac(&all_nodes))
    };

    let params = RouterAdvertParams {
        server_mac,
        prefix,
        prefix_len,
        router_lifetime_secs: RA_ROUTER_LIFETIME_SECS,
        valid_lifetime_secs: RA_VALID_LIFETIME_SECS,
        preferred_lifetime_secs: RA_PREFERRED_LIFETIME_SECS,
    };
    let frame = build_router_advertisement(&params, dst_addr, eth_dst);

    info!(iface, prefix = %prefix, prefix_len, "sent Router Advertisement");

    Some(NdpReply {
        iface: iface.to_string(),
        frame,
    })
}

/// Handle a captured Neighbor Solicitation.
///
/// A valid in-prefix (or own-link-local) target always gets a synthesized
/// Neighbor Advertisement, even a DAD probe with no source-link-layer option
/// (source `::`) — the L2 destination falls back to the frame's own source
/// MAC (`frame_source_mac`, from `NFQA_HWADDR`) in that case, mirroring the
/// RS path's existing fallback.
pub fn handle_ns_packet(
    store: &BindingStore,
    sysfs_net_root: &Path,
    ifindex: u32,
    frame_source_mac: MacAddr,
    ip_packet: &[u8],
) -> NsOutcome {
    let Some(iface) = store.iface_by_ifindex(ifindex) else {
        return NsOutcome::Accept;
    };

    let (source, target, source_lladdr) = match frames::parse_solicitation(ip_packet) {
        Ok(NdpSolicitation::Neighbor {
            source,
            target,
            source_lladdr,
        }) => (source, target, source_lladdr),
        _ => return NsOutcome::Accept,
    };

    let server_mac = match host::hwaddr(sysfs_net_root, iface) {
        Ok(mac) => mac,
        Err(err) => {
            warn!(iface, error = %err, "could not read interface hardware address, accepting unchanged");
            return NsOutcome::Accept;
        }
    };
    let ifll = link_local_eui64(&server_mac);
    let subnet = store.ipv6_subnet(iface).copied().unwrap_or_default();

    if !(subnet.contains(&target) || target == ifll) {
        debug!(iface, target = %target, "NS target not routable here, accepting unchanged");
        return NsOutcome::Accept;
    }

    let requester_mac = source_lladdr.unwrap_or(frame_source_mac);

    let frame = build_neighbor_advertisement(server_mac, target, source, requester_mac);

    info!(iface, target = %target, "sent Neighbor Advertisement");

    NsOutcome::Reply(NdpReply {
        iface: iface.to_string(),
        frame,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Client, Ipv4Subnet, Ipv6Subnet};
    use std::fs;

    fn fake_sysfs(iface: &str, mac_text: &str) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let ifdir = dir.path().join(iface);
        fs::create_dir_all(&ifdir).unwrap();
        fs::write(ifdir.join("ifindex"), "7\n").unwrap();
        fs::write(ifdir.join("address"), format!("{mac_text}\n")).unwrap();
        dir
    }

    fn sample_store(prefix_len: u8) -> BindingStore {
        let mut store = BindingStore::new();
        let client = Client {
            mac: netwire::parse_mac("52:54:00:12:34:56").unwrap(),
            ips: vec!["10.0.0.7".parse().unwrap()],
            hostname: "vm7.example.org".into(),
            link: "br0".into(),
            iface: "tap0".into(),
        };
        let ipv6_subnet = Ipv6Subnet {
            prefix: Some(Ipv6Address::from_bytes(&[
                0x20, 0x01, 0x0d, 0xb8, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
            ])),
            prefix_len: Some(prefix_len),
        };
        store.upsert(client, 7, Ipv4Subnet::default(), ipv6_subnet);
        store
    }

    fn ns_ip_packet(target: Ipv6Address, source: Ipv6Address, lladdr: Option<MacAddr>) -> Vec<u8> {
        use smoltcp::wire::{
            Icmpv6Packet, IpProtocol, Ipv6Packet, Ipv6Repr, NdiscRepr, RawHardwareAddress,
        };
        let ndp_repr = NdiscRepr::NeighborSolicit {
            target_addr: target,
            lladdr: lladdr.map(RawHardwareAddress::from),
        };
        let ipv6_repr = Ipv6Repr {
            src_addr: source,
            dst_addr: target,
            next_header: IpProtocol::Icmpv6,
            payload_len: ndp_repr.buffer_len(),
            hop_limit: 255,
        };
        let mut buf = vec![0u8; ipv6_repr.buffer_len() + ndp_repr.buffer_len()];
        let mut packet = Ipv6Packet::new_unchecked(&mut buf);
        ipv6_repr.emit(&mut packet);
        let mut icmpv6 = Icmpv6Packet::new_unchecked(packet.payload_mut());
        ndp_repr.emit(&mut icmpv6);
        buf
    }

    #[test]
    fn ns_in_prefix_with_lladdr_produces_neighbor_advertisement() {
        let sysfs = fake_sysfs("tap0", "aa:bb:cc:dd:ee:ff");
        let store = sample_store(64);
        let target = Ipv6Address::from_bytes(&[
            0x20, 0x01, 0x0d, 0xb8, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1,
        ]);
        let source = Ipv6Address::from_bytes(&[0xfe, 0x80, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1]);
        let lladdr = MacAddr::from_bytes(&[0x11, 0x22, 0x33, 0x44, 0x55, 0x66]);
        let packet = ns_ip_packet(target, source, Some(lladdr));
        let frame_source_mac = MacAddr::from_bytes(&[0x99, 0x99, 0x99, 0x99, 0x99, 0x99]);

        match handle_ns_packet(&store, sysfs.path(), 7, frame_source_mac, &packet) {
            NsOutcome::Reply(reply) => assert_eq!(reply.iface, "tap0"),
            NsOutcome::Accept => panic!("expected a Neighbor Advertisement"),
        }
    }

    #[test]
    fn ns_out_of_prefix_is_accepted_unchanged() {
        let sysfs = fake_sysfs("tap0", "aa:bb:cc:dd:ee:ff");
        let store = sample_store(64);
        let target = Ipv6Address::from_bytes(&[
            0x20, 0x01, 0x0d, 0xb9, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1,
        ]);
        let source = Ipv6Address::from_bytes(&[0xfe, 0x80, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1]);
        let lladdr = MacAddr::from_bytes(&[0x11, 0x22, 0x33, 0x44, 0x55, 0x66]);
        let packet = ns_ip_packet(target, source, Some(lladdr));
        let frame_source_mac = MacAddr::from_bytes(&[0x99, 0x99, 0x99, 0x99, 0x99, 0x99]);

        match handle_ns_packet(&store, sysfs.path(), 7, frame_source_mac, &packet) {
            NsOutcome::Accept => {}
            NsOutcome::Reply(_) => panic!("expected accept-unchanged"),
        }
    }

    #[test]
    fn ns_targeting_own_link_local_is_answered() {
        let sysfs = fake_sysfs("tap0", "aa:bb:cc:dd:ee:ff");
        let store = sample_store(64);
        let server_mac = MacAddr::from_bytes(&[0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);
        let target = link_local_eui64(&server_mac);
        let source = Ipv6Address::from_bytes(&[0xfe, 0x80, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 2]);
        let lladdr = MacAddr::from_bytes(&[0x11, 0x22, 0x33, 0x44, 0x55, 0x66]);
        let packet = ns_ip_packet(target, source, Some(lladdr));
        let frame_source_mac = MacAddr::from_bytes(&[0x99, 0x99, 0x99, 0x99, 0x99, 0x99]);

        match handle_ns_packet(&store, sysfs.path(), 7, frame_source_mac, &packet) {
            NsOutcome::Reply(_) => {}
            NsOutcome::Accept => panic!("expected a Neighbor Advertisement for ifll"),
        }
    }

    #[test]
    fn ns_dad_probe_without_lladdr_still_gets_answered() {
        // A DAD probe has source `::` and no source-link-layer option; the
        // responder must still answer, falling back to the captured frame's
        // source MAC for the L2 destination instead of silently accepting.
        let sysfs = fake_sysfs("tap0", "aa:bb:cc:dd:ee:ff");
        let store = sample_store(64);
        let target = Ipv6Address::from_bytes(&[
            0x20, 0x01, 0x0d, 0xb8, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1,
        ]);
        let source = Ipv6Address::UNSPECIFIED;
        let packet = ns_ip_packet(target, source, None);
        let frame_source_mac = MacAddr::from_bytes(&[0x11, 0x22, 0x33, 0x44, 0x55, 0x66]);

        let reply = match handle_ns_packet(&store, sysfs.path(), 7, frame_source_mac, &packet) {
            NsOutcome::Reply(reply) => reply,
            NsOutcome::Accept => panic!("expected a Neighbor Advertisement for a DAD probe"),
        };

        let eth = smoltcp::wire::EthernetFrame::new_checked(&reply.frame).unwrap();
        assert_eq!(eth.dst_addr(), frame_source_mac);
    }
}
