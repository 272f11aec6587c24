//! Process entry point: CLI parsing, logging, daemonization, resource
//! binding, privilege drop, then the serve loop. Everything in this file is
//! ambient-stack plumbing — the core responder logic lives in the
//! library crate.

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use tapdhcpd::cli::Cli;
use tapdhcpd::privilege;
use tapdhcpd::queue::QueueNumbers;
use tapdhcpd::server::{self, ServerConfig};

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.debug, cli.foreground);

    if !cli.foreground {
        daemonize::Daemonize::new()
            .pid_file(&cli.pid_file)
            .start()
            .with_context(|| format!("failed to daemonize (pid file {})", cli.pid_file.display()))?;
    }

    let queue_numbers = QueueNumbers {
        dhcp: non_zero(cli.dhcp_queue),
        rs: non_zero(cli.rs_queue),
        ns: non_zero(cli.ns_queue),
    };

    let name_servers = cli
        .resolved_name_servers()
        .into_iter()
        .map(netwire::Ipv4Address::from)
        .collect();

    let config = ServerConfig {
        config_dir: cli.path.clone(),
        sysfs_net_root: cli.sysfs_net_root.clone(),
        queue_numbers,
        name_servers,
    };

    // Open the packet queues and filesystem watcher, and perform the initial
    // reconciliation, while still privileged — this is the only phase that
    // needs more than CAP_NET_RAW. Raw sockets for injection are opened
    // lazily per-interface later and only ever need CAP_NET_RAW, which is
    // exactly what survives the drop below.
    let bound = server::bind(config).context("failed to open packet queues")?;

    privilege::drop_to_unprivileged(&cli.user).context("failed to drop privileges")?;

    server::serve(bound).context("server loop exited")?;
    unreachable!("server::serve never returns on success")
}

fn non_zero(n: u16) -> Option<u16> {
    if n == 0 {
        None
    } else {
        Some(n)
    }
}

fn init_logging(debug: bool, foreground: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    if foreground {
        subscriber.init();
    } else {
        subscriber.with_ansi(false).init();
    }
}
