//! The Binding Store: the single authoritative registry the reconciler
//! mutates and every responder reads from.

use std::collections::HashMap;

use netwire::MacAddr;

use crate::model::{Client, Ipv4Subnet, Ipv6Subnet};

/// `mac -> Client`, `ifindex -> iface`, `link -> Ipv4Subnet`, `iface -> Ipv6Subnet`.
///
/// All mutation happens through the methods below, which are only ever called
/// from the reconciler: single-writer, no locks needed.
#[derive(Debug, Default)]
pub struct BindingStore {
    clients: HashMap<MacAddr, Client>,
    ifindex_to_iface: HashMap<u32, String>,
    ipv4_subnets: HashMap<String, Ipv4Subnet>,
    ipv6_subnets: HashMap<String, Ipv6Subnet>,
}

impl BindingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn client_by_mac(&self, mac: &MacAddr) -> Option<&Client> {
        self.clients.get(mac)
    }

    pub fn iface_by_ifindex(&self, ifindex: u32) -> Option<&str> {
        self.ifindex_to_iface.get(&ifindex).map(String::as_str)
    }

    pub fn ipv4_subnet(&self, link: &str) -> Option<&Ipv4Subnet> {
        self.ipv4_subnets.get(link)
    }

    pub fn ipv6_subnet(&self, iface: &str) -> Option<&Ipv6Subnet> {
        self.ipv6_subnets.get(iface)
    }

    /// Insert/replace `client` (keyed by MAC), its ifindex mapping, and its
    /// IPv4/IPv6 subnet metadata. Any prior entry with the same MAC is fully
    /// replaced, never merged.
    pub fn upsert(
        &mut self,
        client: Client,
        ifindex: u32,
        ipv4_subnet: Ipv4Subnet,
        ipv6_subnet: Ipv6Subnet,
    ) {
        self.ifindex_to_iface
            .insert(ifindex, client.iface.clone());
        self.ipv4_subnets
            .insert(client.link.clone(), ipv4_subnet);
        self.ipv6_subnets
            .insert(client.iface.clone(), ipv6_subnet);
        self.clients.insert(client.mac, client);
    }

    /// Evict everything associated with `iface`: its IPv6 subnet entry, every
    /// client pinned to it, and every ifindex mapping pointing at it.
    ///
    /// Keys to remove are collected into owned `Vec`s first — mutating a map
    /// while iterating it is undefined in many host languages; here the
    /// borrow checker would refuse it outright, so this also reads as the
    /// natural way to write the removal.
    pub fn remove_iface(&mut self, iface: &str) {
        self.ipv6_subnets.remove(iface);

        let stale_macs: Vec<MacAddr> = self
            .clients
            .iter()
            .filter(|(_, c)| c.iface == iface)
            .map(|(mac, _)| *mac)
            .collect();
        for mac in stale_macs {
            self.clients.remove(&mac);
        }

        let stale_ifindexes: Vec<u32> = self
            .ifindex_to_iface
            .iter()
            .filter(|(_, name)| name.as_str() == iface)
            .map(|(ifindex, _)| *ifindex)
            .collect();
        for ifindex in stale_ifindexes {
            self.ifindex_to_iface.remove(&ifindex);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_client(iface: &str) -> Client {
        Client {
            mac: MacAddr::from_bytes(&[0x52, 0x54, 0, 0x12, 0x34, 0x56]),
            ips: vec!["10.0.0.7".parse().unwrap()],
            hostname: "vm7.example.org".into(),
            link: "br0".into(),
            iface: iface.into(),
        }
    }

    #[test]
    fn upsert_then_lookup_by_mac_and_ifindex() {
        let mut store = BindingStore::new();
        let client = sample_client("tap0");
        store.upsert(client.clone(), 7, Ipv4Subnet::default(), Ipv6Subnet::default());

        assert_eq!(store.client_by_mac(&client.mac), Some(&client));
        assert_eq!(store.iface_by_ifindex(7), Some("tap0"));
    }

    #[test]
    fn remove_iface_evicts_clients_subnet_and_ifindex() {
        let mut store = BindingStore::new();
        let client = sample_client("tap0");
        store.upsert(client.clone(), 7, Ipv4Subnet::default(), Ipv6Subnet::default());

        store.remove_iface("tap0");

        assert_eq!(store.client_by_mac(&client.mac), None);
        assert_eq!(store.iface_by_ifindex(7), None);
        assert_eq!(store.ipv6_subnet("tap0"), None);
    }

    #[test]
    fn remove_iface_does_not_touch_other_interfaces() {
        let mut store = BindingStore::new();
        let tap0 = sample_client("tap0");
        let mut tap1 = sample_client("tap1");
        tap1.mac = MacAddr::from_bytes(&[0x52, 0x54, 0, 0x12, 0x34, 0x57]);

        store.upsert(tap0.clone(), 7, Ipv4Subnet::default(), Ipv6Subnet::default());
        store.upsert(tap1.clone(), 8, Ipv4Subnet::default(), Ipv6Subnet::default());

        store.remove_iface("tap0");

        assert_eq!(store.client_by_mac(&tap0.mac), None);
        assert_eq!(store.client_by_mac(&tap1.mac), Some(&tap1));
        assert_eq!(store.iface_by_ifindex(8), Some("tap1"));
    }

    #[test]
    fn replacing_a_mac_fully_overwrites_the_prior_entry() {
        let mut store = BindingStore::new();
        let mut client = sample_client("tap0");
        store.upsert(client.clone(), 7, Ipv4Subnet::default(), Ipv6Subnet::default());

        client.hostname = "renamed.example.org".into();
        store.upsert(client.clone(), 7, Ipv4Subnet::default(), Ipv6Subnet::default());

        assert_eq!(
            store.client_by_mac(&client.mac).unwrap().hostname,
            "renamed.example.org"
        );
    }
}
