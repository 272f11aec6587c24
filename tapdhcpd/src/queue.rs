//! Queue Multiplexer (§4.5): owns the kernel packet-queue handles plus the
//! filesystem-watcher descriptor, and performs readiness-based
//! demultiplexing with a 1-second tick.
//!
//! This module is deliberately mechanical — it knows how to wait for
//! readiness and drain whichever descriptor is ready, but has no opinion on
//! what a DHCP/RS/NS packet *means*. [`crate::server`] wires the drained
//! messages into the Binding Store and the three responders.

use std::collections::HashSet;
use std::os::fd::{AsRawFd, BorrowedFd, RawFd};
use std::path::Path;

use inotify::{EventMask, Inotify, WatchDescriptor, WatchMask};
use nfq::Queue;
use nix::poll::{poll, PollFd, PollFlags};
use thiserror::Error;

/// Which responder a queue's captured traffic belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueRole {
    Dhcp,
    Rs,
    Ns,
}

/// The three queue numbers from the CLI; any may be `None` to disable that role.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueueNumbers {
    pub dhcp: Option<u16>,
    pub rs: Option<u16>,
    pub ns: Option<u16>,
}

impl QueueNumbers {
    fn entries(&self) -> [(QueueRole, Option<u16>); 3] {
        [
            (QueueRole::Dhcp, self.dhcp),
            (QueueRole::Rs, self.rs),
            (QueueRole::Ns, self.ns),
        ]
    }
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue numbers collide: {a:?} and {b:?} are both {num}")]
    Collision {
        a: QueueRole,
        b: QueueRole,
        num: u16,
    },
    #[error("failed to open NFQUEUE handle for {role:?}: {source}")]
    Open {
        role: QueueRole,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to bind NFQUEUE {num} for {role:?}: {source}")]
    Bind {
        role: QueueRole,
        num: u16,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to set NFQUEUE {role:?} nonblocking: {source}")]
    Nonblocking {
        role: QueueRole,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to initialize filesystem watcher: {0}")]
    WatcherInit(#[source] std::io::Error),
    #[error("failed to watch configuration directory {path}: {source}")]
    Watch {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("readiness wait failed: {0}")]
    Poll(#[source] nix::Error),
    #[error("failed to receive from queue {role:?}: {source}")]
    Recv {
        role: QueueRole,
        #[source]
        source: std::io::Error,
    },
}

/// Maximum number of packets the kernel will hold for one queue before
/// dropping them ahead of user space (§5, §6).
const QUEUE_MAX_LEN: u32 = 5000;

struct BoundQueue {
    role: QueueRole,
    queue: Queue,
}

/// Owns every open NFQUEUE handle plus the inotify watch on the
/// configuration directory, and demultiplexes readiness across both kinds
/// of descriptor with a 1-second tick (§4.5).
pub struct Multiplexer {
    queues: Vec<BoundQueue>,
    watcher: Inotify,
    _watch: WatchDescriptor,
}

/// What [`Multiplexer::wait`] found ready in one iteration.
pub struct Readiness {
    pub fs_events_pending: bool,
    pub ready_roles: Vec<QueueRole>,
}

impl Multiplexer {
    /// Open every non-disabled queue and the filesystem watcher. Refuses to
    /// start if two enabled queue roles share a number (Open Question 1) —
    /// the source daemon this was modeled on let DHCP and RS collide at 42,
    /// which this implementation treats as a configuration error instead.
    pub fn open(numbers: QueueNumbers, config_dir: &Path) -> Result<Self, QueueError> {
        let enabled: Vec<(QueueRole, u16)> = numbers
            .entries()
            .into_iter()
            .filter_map(|(role, num)| num.map(|n| (role, n)))
            .collect();

        let mut seen: HashSet<u16> = HashSet::new();
        for (role, num) in &enabled {
            if !seen.insert(*num) {
                let other = enabled
                    .iter()
                    .find(|(r, n)| n == num && *r != *role)
                    .map(|(r, _)| *r)
                    .unwrap_or(*role);
                return Err(QueueError::Collision {
                    a: *role,
                    b: other,
                    num: *num,
                });
            }
        }

        let mut queues = Vec::with_capacity(enabled.len());
        for (role, num) in enabled {
            let mut queue = Queue::open().map_err(|source| QueueError::Open { role, source })?;
            queue
                .bind(num)
                .map_err(|source| QueueError::Bind { role, num, source })?;
            // Required for `drain_queue`'s `WouldBlock` break to ever fire —
            // without this, `recv()` blocks forever once the queue empties,
            // starving every other queue and the filesystem watcher.
            queue
                .set_nonblocking(true)
                .map_err(|source| QueueError::Nonblocking { role, source })?;
            let _ = queue.set_queue_max_len(QUEUE_MAX_LEN);
            queues.push(BoundQueue { role, queue });
        }

        let mut watcher = Inotify::init().map_err(QueueError::WatcherInit)?;
        let watch = watcher
            .watches()
            .add(
                config_dir,
                WatchMask::CLOSE_WRITE | WatchMask::DELETE | WatchMask::MOVED_FROM,
            )
            .map_err(|source| QueueError::Watch {
                path: config_dir.to_path_buf(),
                source,
            })?;

        Ok(Self {
            queues,
            watcher,
            _watch: watch,
        })
    }

    /// Block for up to one second on readiness across every open descriptor.
    pub fn wait(&self) -> Result<Readiness, QueueError> {
        let watcher_fd = self.watcher.as_raw_fd();
        let mut fds: Vec<PollFd> = Vec::with_capacity(self.queues.len() + 1);
        fds.push(borrowed_pollfd(watcher_fd));
        for q in &self.queues {
            fds.push(borrowed_pollfd(q.queue.as_raw_fd()));
        }

        const TICK_MS: i32 = 1000;
        poll(&mut fds, TICK_MS).map_err(QueueError::Poll)?;

        let fs_events_pending = fds[0]
            .revents()
            .map(|r| r.contains(PollFlags::POLLIN))
            .unwrap_or(false);

        let mut ready_roles = Vec::new();
        for (pollfd, bound) in fds[1..].iter().zip(&self.queues) {
            if pollfd
                .revents()
                .map(|r| r.contains(PollFlags::POLLIN))
                .unwrap_or(false)
            {
                ready_roles.push(bound.role);
            }
        }

        Ok(Readiness {
            fs_events_pending,
            ready_roles,
        })
    }

    /// Drain every pending inotify event. Config changes are always fully
    /// processed before any packet is handled in the same iteration (§4.5).
    pub fn drain_fs_events(&mut self) -> Result<Vec<FsEvent>, QueueError> {
        let mut buffer = [0u8; 4096];
        let events = self
            .watcher
            .read_events(&mut buffer)
            .map_err(QueueError::WatcherInit)?;
        Ok(events
            .filter_map(|event| {
                let name = event.name?.to_str()?.to_string();
                if event.mask.contains(EventMask::DELETE) || event.mask.contains(EventMask::MOVED_FROM) {
                    Some(FsEvent::Removed(name))
                } else if event.mask.contains(EventMask::CLOSE_WRITE) {
                    Some(FsEvent::Written(name))
                } else {
                    None
                }
            })
            .collect())
    }

    /// Drain every packet pending on `role`'s queue, handing each one to
    /// `handler` and applying exactly the verdict it returns (§5, §8 invariant 1).
    ///
    /// `handler` also receives the packet's source hardware address when
    /// libnetfilter_queue reported one (`NFQA_HWADDR`) — the RS responder
    /// needs it as an L2-destination fallback when a solicitation carries no
    /// source-link-layer-address option (§4.7).
    pub fn drain_queue(
        &mut self,
        role: QueueRole,
        mut handler: impl FnMut(u32, Option<[u8; 6]>, &[u8]) -> Verdict,
    ) -> Result<(), QueueError> {
        let Some(bound) = self.queues.iter_mut().find(|q| q.role == role) else {
            return Ok(());
        };
        loop {
            let mut message = match bound.queue.recv() {
                Ok(message) => message,
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(source) => return Err(QueueError::Recv { role, source }),
            };
            let ifindex = message.get_indev();
            let hw_addr = message
                .get_hw_addr()
                .and_then(|addr| <[u8; 6]>::try_from(addr).ok());
            let verdict = handler(ifindex, hw_addr, message.get_payload());
            message.set_verdict(verdict.into());
            bound.queue.verdict(message).map_err(|source| QueueError::Recv { role, source })?;
        }
        Ok(())
    }
}

fn borrowed_pollfd(fd: RawFd) -> PollFd<'static> {
    // SAFETY: the originating `Queue`/`Inotify` outlives this poll call —
    // `wait` never returns these fds past the function in which they're built.
    let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
    PollFd::new(borrowed, PollFlags::POLLIN)
}

/// The verdict a responder issues on a captured packet (§5, glossary).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Drop,
    Accept,
}

impl From<Verdict> for nfq::Verdict {
    fn from(v: Verdict) -> Self {
        match v {
            Verdict::Drop => nfq::Verdict::Drop,
            Verdict::Accept => nfq::Verdict::Accept,
        }
    }
}

/// One filesystem-watcher event, already reduced to the two kinds §4.4 cares
/// about (file-closed-after-write, file-deleted/moved-away).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FsEvent {
    Written(String),
    Removed(String),
}
