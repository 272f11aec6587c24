//! Ties the Binding Store, Config Reconciler, three packet responders, and
//! Queue Multiplexer together into the serve loop.
//! Everything before this module is a pure function of its inputs; this is
//! the only place with an actual event loop.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::warn;

use crate::dhcp_responder;
use crate::inject::{InjectError, RawSocket};
use crate::ndp_responder::{self, NsOutcome};
use crate::queue::{FsEvent, Multiplexer, QueueError, QueueNumbers, QueueRole, Verdict};
use crate::reconciler::Reconciler;
use crate::store::BindingStore;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error("initial reconciliation of {0} failed: {1}")]
    InitialReconcile(PathBuf, #[source] crate::reconciler::ReconcileError),
}

pub struct ServerConfig {
    pub config_dir: PathBuf,
    pub sysfs_net_root: PathBuf,
    pub queue_numbers: QueueNumbers,
    pub name_servers: Vec<Ipv4Addr>,
}

/// Caches one bound raw socket per ifindex so replies don't reopen a socket
/// per packet. Injection failures are logged and otherwise ignored — the
/// wire write is best-effort.
struct InjectorCache {
    sockets: HashMap<u32, RawSocket>,
}

impl InjectorCache {
    fn new() -> Self {
        Self {
            sockets: HashMap::new(),
        }
    }

    fn send(&mut self, ifindex: u32, frame: &[u8]) {
        let socket = match self.sockets.entry(ifindex) {
            std::collections::hash_map::Entry::Occupied(entry) => entry.into_mut(),
            std::collections::hash_map::Entry::Vacant(entry) => {
                match RawSocket::bind(ifindex) {
                    Ok(socket) => entry.insert(socket),
                    Err(err) => {
                        warn!(ifindex, error = %err, "failed to open raw socket for injection");
                        return;
                    }
                }
            }
        };
        if let Err(err) = socket.send(frame) {
            report_send_failure(ifindex, err);
        }
    }
}

fn report_send_failure(ifindex: u32, err: InjectError) {
    warn!(ifindex, error = %err, "failed to inject synthesized frame");
}

/// Everything opened before privilege drop: the packet queues, the
/// filesystem watcher, and the initial reconciliation of the binding
/// directory. `main` calls [`bind`] while still privileged, drops
/// privileges, then calls [`serve`] — nothing in [`serve`] ever needs more
/// than `CAP_NET_RAW` again.
pub struct Bound {
    store: BindingStore,
    reconciler: Reconciler,
    mux: Multiplexer,
    config: ServerConfig,
}

/// Open every packet queue and the filesystem watcher, and perform the
/// initial reconciliation of `config.config_dir` against the directory's
/// existing contents at startup. Must run before privileges are dropped.
pub fn bind(config: ServerConfig) -> Result<Bound, ServerError> {
    let mut store = BindingStore::new();
    let reconciler = Reconciler::new(config.sysfs_net_root.clone());
    reconciler
        .reconcile_initial(&mut store, &config.config_dir)
        .map_err(|e| ServerError::InitialReconcile(config.config_dir.clone(), e))?;

    let mux = Multiplexer::open(config.queue_numbers, &config.config_dir)?;

    Ok(Bound {
        store,
        reconciler,
        mux,
        config,
    })
}

/// Run the serve loop forever. It never returns on success.
pub fn serve(bound: Bound) -> Result<(), ServerError> {
    let Bound {
        mut store,
        reconciler,
        mut mux,
        config,
    } = bound;
    let mut injector = InjectorCache::new();

    loop {
        let readiness = mux.wait()?;

        if readiness.fs_events_pending {
            let events = mux.drain_fs_events()?;
            apply_fs_events(&reconciler, &mut store, &config.config_dir, events);
        }

        for role in readiness.ready_roles {
            match role {
                QueueRole::Dhcp => drain_dhcp(&mut mux, &store, &config, &mut injector)?,
                QueueRole::Rs => drain_rs(&mut mux, &store, &config, &mut injector)?,
                QueueRole::Ns => drain_ns(&mut mux, &store, &config, &mut injector)?,
            }
        }
    }
}

fn apply_fs_events(
    reconciler: &Reconciler,
    store: &mut BindingStore,
    config_dir: &Path,
    events: Vec<FsEvent>,
) {
    for event in events {
        match event {
            FsEvent::Written(name) => reconciler.handle_write(store, &config_dir.join(&name)),
            FsEvent::Removed(name) => reconciler.handle_remove(store, &name),
        }
    }
}

fn drain_dhcp(
    mux: &mut Multiplexer,
    store: &BindingStore,
    config: &ServerConfig,
    injector: &mut InjectorCache,
) -> Result<(), ServerError> {
    let mut pending: Vec<(u32, Vec<u8>)> = Vec::new();
    mux.drain_queue(QueueRole::Dhcp, |ifindex, _hw_addr, payload| {
        // The original packet is always dropped, win or lose — a
        // synthesized reply must never race the guest's own retransmit.
        if let Some(reply) = dhcp_responder::handle_dhcp_packet(
            store,
            &config.sysfs_net_root,
            &config.name_servers,
            ifindex,
            payload,
        ) {
            pending.push((ifindex, reply.frame));
        }
        Verdict::Drop
    })?;
    for (ifindex, frame) in pending {
        injector.send(ifindex, &frame);
    }
    Ok(())
}

fn drain_rs(
    mux: &mut Multiplexer,
    store: &BindingStore,
    config: &ServerConfig,
    injector: &mut InjectorCache,
) -> Result<(), ServerError> {
    let mut pending: Vec<(u32, Vec<u8>)> = Vec::new();
    mux.drain_queue(QueueRole::Rs, |ifindex, hw_addr, payload| {
        let frame_source_mac = hw_addr
            .map(|bytes| netwire::MacAddr::from_bytes(&bytes))
            .unwrap_or(netwire::MacAddr::BROADCAST);
        if let Some(reply) = ndp_responder::handle_rs_packet(
            store,
            &config.sysfs_net_root,
            ifindex,
            frame_source_mac,
            payload,
        ) {
            pending.push((ifindex, reply.frame));
        }
        Verdict::Drop
    })?;
    for (ifindex, frame) in pending {
        injector.send(ifindex, &frame);
    }
    Ok(())
}

fn drain_ns(
    mux: &mut Multiplexer,
    store: &BindingStore,
    config: &ServerConfig,
    injector: &mut InjectorCache,
) -> Result<(), ServerError> {
    let mut pending: Vec<(u32, Vec<u8>)> = Vec::new();
    mux.drain_queue(QueueRole::Ns, |ifindex, hw_addr, payload| {
        let frame_source_mac = hw_addr
            .map(|bytes| netwire::MacAddr::from_bytes(&bytes))
            .unwrap_or(netwire::MacAddr::BROADCAST);
        match ndp_responder::handle_ns_packet(
            store,
            &config.sysfs_net_root,
            ifindex,
            frame_source_mac,
            payload,
        ) {
            NsOutcome::Accept => Verdict::Accept,
            NsOutcome::Reply(reply) => {
                pending.push((ifindex, reply.frame));
                Verdict::Drop
            }
        }
    })?;
    for (ifindex, frame) in pending {
        injector.send(ifindex, &frame);
    }
    Ok(())
}
