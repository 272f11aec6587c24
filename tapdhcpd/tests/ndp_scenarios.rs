//! End-to-end IPv6 neighbor-discovery scenarios, decoded down to wire
//! fields rather than trusted from the builder that produced them.

use std::fs;

use smoltcp::phy::Medium;
use smoltcp::wire::{
    EthernetFrame, EthernetProtocol, HardwareAddress, Icmpv6Packet, Ipv6Packet,
    NdiscNeighborFlags, NdiscRepr,
};

use tapdhcpd::model::{Client, Ipv4Subnet, Ipv6Subnet};
use tapdhcpd::ndp_responder::{handle_ns_packet, NsOutcome};
use tapdhcpd::store::BindingStore;

fn fake_sysfs(iface: &str, mac_text: &str) -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    let ifdir = dir.path().join(iface);
    fs::create_dir_all(&ifdir).unwrap();
    fs::write(ifdir.join("ifindex"), "7\n").unwrap();
    fs::write(ifdir.join("address"), format!("{mac_text}\n")).unwrap();
    dir
}

fn tap0_with_prefix() -> BindingStore {
    let mut store = BindingStore::new();
    let client = Client {
        mac: netwire::parse_mac("52:54:00:12:34:56").unwrap(),
        ips: vec!["10.0.0.7".parse().unwrap()],
        hostname: "vm7.example.org".into(),
        link: "br0".into(),
        iface: "tap0".into(),
    };
    let ipv6_subnet = Ipv6Subnet {
        prefix: Some("2001:db8::".parse().unwrap()),
        prefix_len: Some(64),
    };
    store.upsert(client, 7, Ipv4Subnet::default(), ipv6_subnet);
    store
}

fn ns_ip_packet(
    target: netwire::Ipv6Address,
    source: netwire::Ipv6Address,
    lladdr: netwire::MacAddr,
) -> Vec<u8> {
    use smoltcp::wire::{IpProtocol, Ipv6Repr, RawHardwareAddress};
    let ndp_repr = NdiscRepr::NeighborSolicit {
        target_addr: target,
        lladdr: Some(RawHardwareAddress::from(lladdr)),
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

/// S5 — an in-prefix NS with a source link-layer option yields a Neighbor
/// Advertisement with R=1, O=0, S=1 and the exact addresses the spec names.
#[test]
fn s5_in_prefix_ns_yields_a_neighbor_advertisement() {
    let sysfs = fake_sysfs("tap0", "aa:bb:cc:dd:ee:ff");
    let store = tap0_with_prefix();

    let target: netwire::Ipv6Address = "2001:db8::1".parse().unwrap();
    let source: netwire::Ipv6Address = "fe80::1".parse().unwrap();
    let lladdr = netwire::parse_mac("11:22:33:44:55:66").unwrap();
    let packet = ns_ip_packet(target, source, lladdr);
    let frame_source_mac = netwire::parse_mac("99:99:99:99:99:99").unwrap();

    let reply = match handle_ns_packet(&store, sysfs.path(), 7, frame_source_mac, &packet) {
        NsOutcome::Reply(reply) => reply,
        NsOutcome::Accept => panic!("expected a Neighbor Advertisement"),
    };
    assert_eq!(reply.iface, "tap0");

    let eth = EthernetFrame::new_checked(&reply.frame).unwrap();
    assert_eq!(eth.ethertype(), EthernetProtocol::Ipv6);
    let ipv6 = Ipv6Packet::new_checked(eth.payload()).unwrap();
    let server_mac = netwire::parse_mac("aa:bb:cc:dd:ee:ff").unwrap();
    assert_eq!(ipv6.src_addr(), netwire::link_local_eui64(&server_mac));
    assert_eq!(ipv6.dst_addr(), source);

    let icmpv6 = Icmpv6Packet::new_checked(ipv6.payload()).unwrap();
    let repr = NdiscRepr::parse(&icmpv6).unwrap();
    match repr {
        NdiscRepr::NeighborAdvert {
            flags,
            target_addr,
            lladdr: target_lladdr,
        } => {
            assert_eq!(target_addr, target);
            assert!(flags.contains(NdiscNeighborFlags::ROUTER));
            assert!(flags.contains(NdiscNeighborFlags::SOLICITED));
            assert!(!flags.contains(NdiscNeighborFlags::OVERRIDE));
            let reported_mac = match target_lladdr.and_then(|a| a.parse(Medium::Ethernet).ok()) {
                Some(HardwareAddress::Ethernet(mac)) => Some(mac),
                _ => None,
            };
            assert_eq!(reported_mac, Some(server_mac));
        }
        _ => panic!("expected a Neighbor Advertisement"),
    }
}

/// S6 — an out-of-prefix NS (and not our own link-local) is accepted
/// unchanged: no reply synthesized.
#[test]
fn s6_out_of_prefix_ns_is_accepted_unchanged() {
    let sysfs = fake_sysfs("tap0", "aa:bb:cc:dd:ee:ff");
    let store = tap0_with_prefix();

    let target: netwire::Ipv6Address = "2001:db9::1".parse().unwrap();
    let source: netwire::Ipv6Address = "fe80::1".parse().unwrap();
    let lladdr = netwire::parse_mac("11:22:33:44:55:66").unwrap();
    let packet = ns_ip_packet(target, source, lladdr);
    let frame_source_mac = netwire::parse_mac("99:99:99:99:99:99").unwrap();

    match handle_ns_packet(&store, sysfs.path(), 7, frame_source_mac, &packet) {
        NsOutcome::Accept => {}
        NsOutcome::Reply(_) => panic!("expected accept-unchanged for an out-of-prefix target"),
    }
}
