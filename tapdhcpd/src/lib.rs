//! Promiscuous, per-tap DHCP/IPv6-ND responder for VM hosting hypervisors.
//!
//! The pieces that make up the daemon are split into small modules mirroring
//! the server's own component boundaries: host introspection, the binding
//! store and its reconciler, the three packet responders, raw L2 injection,
//! and the queue/filesystem-watcher multiplexer that drives all of them.
//! [`server::bind`] and [`server::serve`] are the two entry points `main`
//! calls once the ambient stack (CLI parsing, logging, daemonization,
//! privilege drop) has set up, split so privileges can be dropped between
//! them.

pub mod binding_file;
pub mod cli;
pub mod dhcp_responder;
pub mod host;
pub mod inject;
pub mod model;
pub mod ndp_responder;
pub mod privilege;
pub mod queue;
pub mod reconciler;
pub mod server;
pub mod store;
