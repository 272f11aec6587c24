//! Decodes a single `KEY=VALUE` binding file into a candidate [`Client`].
//!
//! `iface` and `link`-derived subnets are NOT filled in here — this module
//! only knows about the file's own content. The reconciler attaches `iface`
//! (the file's basename) and resolves subnets afterward.

use netwire::MacAddr;

use crate::model::Client;

/// A partially-built client: fields present in the file, `iface` still unset.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub mac: Option<MacAddr>,
    pub ips: Vec<netwire::Ipv4Address>,
    pub hostname: Option<String>,
    pub link: Option<String>,
}

impl Candidate {
    /// Promote to a full [`Client`] if every required field (`MAC`, at least
    /// one `IP`, `HOSTNAME`) is present; `LINK` defaults to an empty string if
    /// omitted; unknown or missing keys never abort parsing.
    pub fn into_client(self, iface: &str) -> Option<Client> {
        let mac = self.mac?;
        if self.ips.is_empty() {
            return None;
        }
        let hostname = self.hostname?;
        Some(Client {
            mac,
            ips: self.ips,
            hostname,
            link: self.link.unwrap_or_default(),
            iface: iface.to_string(),
        })
    }
}

/// Parse `contents` (the binding file's raw text) into a [`Candidate`].
///
/// Lines that are not `KEY=VALUE`, or whose key is not one of `IP`, `MAC`,
/// `LINK`, `HOSTNAME`, are silently ignored — the format has no notion of a
/// malformed line, only of an incomplete file (handled by
/// [`Candidate::into_client`]).
pub fn parse_binding_file(contents: &str) -> Candidate {
    let mut candidate = Candidate::default();
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let value = value.trim();
        match key.trim() {
            "MAC" => candidate.mac = netwire::parse_mac(value),
            "IP" => {
                candidate.ips = value
                    .split_whitespace()
                    .filter_map(|s| s.parse().ok())
                    .collect();
            }
            "LINK" => candidate.link = Some(value.to_string()),
            "HOSTNAME" => candidate.hostname = Some(value.to_string()),
            _ => {}
        }
    }
    candidate
}
