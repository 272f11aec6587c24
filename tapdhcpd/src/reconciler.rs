//! Config Reconciler: turns binding-file add/remove events into Binding Store
//! mutations.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::warn;

use crate::binding_file::parse_binding_file;
use crate::host::{self, HostInfoError};
use crate::store::BindingStore;

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("failed to enumerate configuration directory {path}: {source}")]
    ReadDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub struct Reconciler {
    sysfs_net_root: PathBuf,
}

impl Reconciler {
    pub fn new(sysfs_net_root: PathBuf) -> Self {
        Self { sysfs_net_root }
    }

    /// Enumerate `config_dir` and issue a synthetic add for each existing
    /// file, matching the behavior of a fresh inotify watch whose directory
    /// already has content.
    pub fn reconcile_initial(
        &self,
        store: &mut BindingStore,
        config_dir: &Path,
    ) -> Result<(), ReconcileError> {
        let entries = std::fs::read_dir(config_dir).map_err(|source| ReconcileError::ReadDir {
            path: config_dir.to_path_buf(),
            source,
        })?;
        for entry in entries.flatten() {
            if entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                self.handle_write(store, &entry.path());
            }
        }
        Ok(())
    }

    /// Handle a file-closed-after-write event for `path`.
    pub fn handle_write(&self, store: &mut BindingStore, path: &Path) {
        let Some(iface) = path.file_name().and_then(|n| n.to_str()) else {
            return;
        };

        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(err) => {
                warn!(iface, error = %err, "failed to read binding file");
                return;
            }
        };

        let candidate = parse_binding_file(&contents);
        let Some(client) = candidate.into_client(iface) else {
            warn!(iface, "binding file missing required fields, not installed");
            return;
        };

        let ifindex = match host::ifindex(&self.sysfs_net_root, iface) {
            Ok(ifindex) => ifindex,
            Err(HostInfoError::PathTraversal(name)) => {
                warn!(iface = %name, "interface name escapes sysfs-net root, dropping candidate");
                return;
            }
            Err(err) => {
                warn!(iface, error = %err, "stale configuration: interface not present on host");
                return;
            }
        };

        let ipv4_subnet = host::parse_routes_v4(&client.link);
        let ipv6_subnet = host::parse_routes_v6(&client.link);
        store.upsert(client, ifindex, ipv4_subnet, ipv6_subnet);
    }

    /// Handle a file-deleted event naming `iface`.
    pub fn handle_remove(&self, store: &mut BindingStore, iface: &str) {
        store.remove_iface(iface);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn fake_sysfs(root: &Path, iface: &str, ifindex: &str, addr: &str) {
        let dir = root.join(iface);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("ifindex"), ifindex).unwrap();
        fs::write(dir.join("address"), addr).unwrap();
    }

    #[test]
    fn handle_write_installs_a_valid_binding() {
        let sysfs = tempfile::tempdir().unwrap();
        fake_sysfs(sysfs.path(), "tap0", "7\n", "52:54:00:aa:bb:cc\n");
        let config = tempfile::tempdir().unwrap();
        let binding_path = config.path().join("tap0");
        fs::write(
            &binding_path,
            "MAC=52:54:00:12:34:56\nIP=10.0.0.7\nLINK=br0\nHOSTNAME=vm7.example.org\n",
        )
        .unwrap();

        let reconciler = Reconciler::new(sysfs.path().to_path_buf());
        let mut store = BindingStore::new();
        reconciler.handle_write(&mut store, &binding_path);

        let mac = netwire::parse_mac("52:54:00:12:34:56").unwrap();
        let client = store.client_by_mac(&mac).expect("client installed");
        assert_eq!(client.iface, "tap0");
        assert_eq!(store.iface_by_ifindex(7), Some("tap0"));
    }

    #[test]
    fn handle_write_skips_candidate_when_interface_is_absent() {
        let sysfs = tempfile::tempdir().unwrap();
        let config = tempfile::tempdir().unwrap();
        let binding_path = config.path().join("tap0");
        fs::write(
            &binding_path,
            "MAC=52:54:00:12:34:56\nIP=10.0.0.7\nHOSTNAME=vm7\n",
        )
        .unwrap();

        let reconciler = Reconciler::new(sysfs.path().to_path_buf());
        let mut store = BindingStore::new();
        reconciler.handle_write(&mut store, &binding_path);

        let mac = netwire::parse_mac("52:54:00:12:34:56").unwrap();
        assert!(store.client_by_mac(&mac).is_none());
    }

    #[test]
    fn handle_remove_evicts_the_named_interface() {
        let sysfs = tempfile::tempdir().unwrap();
        fake_sysfs(sysfs.path(), "tap0", "7\n", "52:54:00:aa:bb:cc\n");
        let config = tempfile::tempdir().unwrap();
        let binding_path = config.path().join("tap0");
        fs::write(
            &binding_path,
            "MAC=52:54:00:12:34:56\nIP=10.0.0.7\nLINK=br0\nHOSTNAME=vm7.example.org\n",
        )
        .unwrap();

        let reconciler = Reconciler::new(sysfs.path().to_path_buf());
        let mut store = BindingStore::new();
        reconciler.handle_write(&mut store, &binding_path);
        reconciler.handle_remove(&mut store, "tap0");

        let mac = netwire::parse_mac("52:54:00:12:34:56").unwrap();
        assert!(store.client_by_mac(&mac).is_none());
    }

    #[test]
    fn reconcile_initial_picks_up_preexisting_files() {
        let sysfs = tempfile::tempdir().unwrap();
        fake_sysfs(sysfs.path(), "tap0", "7\n", "52:54:00:aa:bb:cc\n");
        let config = tempfile::tempdir().unwrap();
        fs::write(
            config.path().join("tap0"),
            "MAC=52:54:00:12:34:56\nIP=10.0.0.7\nLINK=br0\nHOSTNAME=vm7.example.org\n",
        )
        .unwrap();

        let reconciler = Reconciler::new(sysfs.path().to_path_buf());
        let mut store = BindingStore::new();
        reconciler
            .reconcile_initial(&mut store, config.path())
            .unwrap();

        let mac = netwire::parse_mac("52:54:00:12:34:56").unwrap();
        assert!(store.client_by_mac(&mac).is_some());
    }
}
