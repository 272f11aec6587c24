//! Command-line surface. One flat mode of operation — there is no
//! subcommand tree, unlike a multi-mode tool, so this is a single `Parser`
//! struct rather than the `Command` enum the teacher crate uses for its
//! several verbs.

use std::net::Ipv4Addr;
use std::path::PathBuf;

use clap::Parser;

/// Default queue numbers. The RS default is deliberately distinct from the
/// DHCP default — the source daemon this was modeled on let both collide at
/// 42, which this implementation treats as a latent bug rather than
/// behavior worth reproducing (see DESIGN.md).
pub const DEFAULT_DHCP_QUEUE: u16 = 42;
pub const DEFAULT_RS_QUEUE: u16 = 43;
pub const DEFAULT_NS_QUEUE: u16 = 44;

pub const DEFAULT_PID_FILE: &str = "/var/run/nfdhcpd.pid";
pub const DEFAULT_SYSFS_NET_ROOT: &str = "/sys/class/net";

/// The original daemon's two hard-coded recursive resolvers, kept as the
/// default so existing deployments see unchanged behavior without a config
/// edit (Open Question 5).
pub const DEFAULT_NAME_SERVERS: [Ipv4Addr; 2] =
    [Ipv4Addr::new(194, 177, 210, 10), Ipv4Addr::new(194, 177, 210, 211)];

#[derive(Parser, Debug)]
#[command(name = "tapdhcpd")]
#[command(about = "Promiscuous per-tap DHCP/IPv6-ND responder for VM hosting hypervisors")]
pub struct Cli {
    /// Directory of per-interface binding files to watch.
    #[arg(long)]
    pub path: PathBuf,

    /// NFQUEUE number carrying captured DHCPv4 traffic. Pass 0 to disable.
    #[arg(long, default_value_t = DEFAULT_DHCP_QUEUE)]
    pub dhcp_queue: u16,

    /// NFQUEUE number carrying captured IPv6 Router Solicitations. Pass 0 to disable.
    #[arg(long, default_value_t = DEFAULT_RS_QUEUE)]
    pub rs_queue: u16,

    /// NFQUEUE number carrying captured IPv6 Neighbor Solicitations. Pass 0 to disable.
    #[arg(long, default_value_t = DEFAULT_NS_QUEUE)]
    pub ns_queue: u16,

    /// Recursive DNS servers advertised to clients (repeatable, 1 or 2 expected).
    #[arg(long = "name-server")]
    pub name_servers: Vec<Ipv4Addr>,

    /// Unprivileged user to switch to after opening raw sockets and queues.
    #[arg(long, default_value = "nobody")]
    pub user: String,

    /// Where to write the PID file when daemonized.
    #[arg(long, default_value = DEFAULT_PID_FILE)]
    pub pid_file: PathBuf,

    /// Stay in the foreground instead of daemonizing; logs go to stderr.
    #[arg(long)]
    pub foreground: bool,

    /// Raise the log verbosity floor to DEBUG.
    #[arg(long)]
    pub debug: bool,

    /// Root of the kernel's network-info pseudo-filesystem. Override point for tests.
    #[arg(long, default_value = DEFAULT_SYSFS_NET_ROOT)]
    pub sysfs_net_root: PathBuf,
}

impl Cli {
    /// The resolver list to advertise: the CLI's own values if any were
    /// given, otherwise the original daemon's two hard-coded addresses.
    pub fn resolved_name_servers(&self) -> Vec<Ipv4Addr> {
        if self.name_servers.is_empty() {
            DEFAULT_NAME_SERVERS.to_vec()
        } else {
            self.name_servers.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_give_non_colliding_queue_numbers() {
        assert_ne!(DEFAULT_DHCP_QUEUE, DEFAULT_RS_QUEUE);
        assert_ne!(DEFAULT_RS_QUEUE, DEFAULT_NS_QUEUE);
        assert_ne!(DEFAULT_DHCP_QUEUE, DEFAULT_NS_QUEUE);
    }

    #[test]
    fn empty_name_servers_fall_back_to_the_original_pair() {
        let cli = Cli {
            path: "/tmp".into(),
            dhcp_queue: DEFAULT_DHCP_QUEUE,
            rs_queue: DEFAULT_RS_QUEUE,
            ns_queue: DEFAULT_NS_QUEUE,
            name_servers: vec![],
            user: "nobody".into(),
            pid_file: DEFAULT_PID_FILE.into(),
            foreground: true,
            debug: false,
            sysfs_net_root: DEFAULT_SYSFS_NET_ROOT.into(),
        };
        assert_eq!(cli.resolved_name_servers(), DEFAULT_NAME_SERVERS.to_vec());
    }
}
