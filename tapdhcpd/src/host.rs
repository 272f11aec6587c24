//! Host introspection: interface index/hwaddr lookups and route-table parsing.
//!
//! Path composition here follows a canonicalize-and-verify discipline: a
//! crafted interface name (`../../etc/passwd`) must never let a read escape
//! the configured sysfs-net root.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::str::FromStr;

use netwire::MacAddr;
use thiserror::Error;

use crate::model::{Ipv4Subnet, Ipv6Subnet};

#[derive(Debug, Error)]
pub enum HostInfoError {
    #[error("interface name escapes sysfs-net root: {0}")]
    PathTraversal(String),
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed ifindex contents in {0}")]
    MalformedIfindex(PathBuf),
    #[error("malformed hardware address in {0}")]
    MalformedHwaddr(PathBuf),
}

/// Resolve `<sysfs_net_root>/<iface>/<leaf>`, rejecting any `iface` whose
/// canonicalized path does not remain under `sysfs_net_root`.
fn guarded_leaf_path(
    sysfs_net_root: &Path,
    iface: &str,
    leaf: &str,
) -> Result<PathBuf, HostInfoError> {
    let candidate = sysfs_net_root.join(iface).join(leaf);
    let root_canon = sysfs_net_root
        .canonicalize()
        .map_err(|source| HostInfoError::Io {
            path: sysfs_net_root.to_path_buf(),
            source,
        })?;
    let candidate_canon = candidate
        .canonicalize()
        .map_err(|source| HostInfoError::Io {
            path: candidate.clone(),
            source,
        })?;
    if !candidate_canon.starts_with(&root_canon) {
        return Err(HostInfoError::PathTraversal(iface.to_string()));
    }
    Ok(candidate_canon)
}

/// Read the kernel-reported ifindex for `iface`. Any failure (missing
/// interface, traversal, parse error) is a transient condition — callers treat
/// the candidate binding as unresolvable, never fatal.
pub fn ifindex(sysfs_net_root: &Path, iface: &str) -> Result<u32, HostInfoError> {
    let path = guarded_leaf_path(sysfs_net_root, iface, "ifindex")?;
    let contents = std::fs::read_to_string(&path).map_err(|source| HostInfoError::Io {
        path: path.clone(),
        source,
    })?;
    contents
        .trim()
        .parse::<u32>()
        .map_err(|_| HostInfoError::MalformedIfindex(path))
}

/// Read the interface's L2 address, in the canonical lowercase colon form.
pub fn hwaddr(sysfs_net_root: &Path, iface: &str) -> Result<MacAddr, HostInfoError> {
    let path = guarded_leaf_path(sysfs_net_root, iface, "address")?;
    let contents = std::fs::read_to_string(&path).map_err(|source| HostInfoError::Io {
        path: path.clone(),
        source,
    })?;
    netwire::parse_mac(contents.trim()).ok_or(HostInfoError::MalformedHwaddr(path))
}

struct RouteScan<A> {
    gateway: Option<A>,
    network: Option<A>,
    prefix_len: Option<u8>,
}

/// Run `ip -<family> ro ls table <table>` and extract the default gateway plus
/// the least-specific connected route on the default device. Any failure —
/// the command not existing, a non-zero exit, nothing parseable — yields all
/// fields unset rather than an error; callers are expected to tolerate this.
fn scan_routes<A: FromStr + Copy>(table: &str, family: u8) -> RouteScan<A> {
    let flag = format!("-{family}");
    let output = Command::new("ip")
        .args(["-o", &flag, "ro", "ls", "table", table])
        .output();
    let Ok(output) = output else {
        return RouteScan {
            gateway: None,
            network: None,
            prefix_len: None,
        };
    };
    if !output.status.success() {
        return RouteScan {
            gateway: None,
            network: None,
            prefix_len: None,
        };
    }
    parse_route_lines(&String::from_utf8_lossy(&output.stdout))
}

fn parse_route_lines<A: FromStr + Copy>(text: &str) -> RouteScan<A> {
    let mut gateway = None;
    let mut default_dev = None;
    for line in text.lines() {
        let words: Vec<&str> = line.split_whitespace().collect();
        if words.first() != Some(&"default") {
            continue;
        }
        if let Some(via_idx) = words.iter().position(|w| *w == "via") {
            gateway = words.get(via_idx + 1).and_then(|s| s.parse().ok());
        }
        if let Some(dev_idx) = words.iter().position(|w| *w == "dev") {
            default_dev = words.get(dev_idx + 1).map(|s| s.to_string());
        }
    }

    let Some(default_dev) = default_dev else {
        return RouteScan {
            gateway,
            network: None,
            prefix_len: None,
        };
    };

    let mut best: Option<(u8, A)> = None;
    for line in text.lines() {
        let words: Vec<&str> = line.split_whitespace().collect();
        let Some(first) = words.first() else { continue };
        if *first == "default" {
            continue;
        }
        let Some(dev_idx) = words.iter().position(|w| *w == "dev") else {
            continue;
        };
        if words.get(dev_idx + 1) != Some(&default_dev.as_str()) {
            continue;
        }
        let Some((addr_str, len_str)) = first.split_once('/') else {
            continue;
        };
        let (Ok(addr), Ok(len)) = (addr_str.parse::<A>(), len_str.parse::<u8>()) else {
            continue;
        };
        match best {
            Some((best_len, _)) if best_len <= len => {}
            _ => best = Some((len, addr)),
        }
    }

    RouteScan {
        gateway,
        network: best.map(|(_, addr)| addr),
        prefix_len: best.map(|(len, _)| len),
    }
}

/// Derive the IPv4 connected subnet for `link` (routing table name/id, usually
/// `main`, keyed in this daemon by the binding file's `LINK=` value).
pub fn parse_routes_v4(table: &str) -> Ipv4Subnet {
    let scan: RouteScan<netwire::Ipv4Address> = scan_routes(table, 4);
    Ipv4Subnet {
        gateway: scan.gateway,
        network: scan.network,
        prefix_len: scan.prefix_len,
    }
}

/// Derive the IPv6 connected subnet for `link`.
pub fn parse_routes_v6(table: &str) -> Ipv6Subnet {
    let scan: RouteScan<netwire::Ipv6Address> = scan_routes(table, 6);
    Ipv6Subnet {
        prefix: scan.network,
        prefix_len: scan.prefix_len,
    }
}
