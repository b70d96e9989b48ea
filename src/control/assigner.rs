//! The assigner
//!
//! A single elected loop that owns every role record and address snapshot in
//! the store. It watches the server heartbeats, replans roles on membership
//! change, publishes each plan as a new version, and collects role records
//! no participant can still need.
//!
//! Publication order matters: the address snapshot for a version is written
//! only after all of that version's role records, so a visible snapshot
//! implies visible roles. A write failure aborts the loop; restarting it is
//! safe because startup reconstruction rebuilds the same bookkeeping from
//! the surviving records.

use crate::common::{CancelToken, Error, Result};
use crate::control::assign::{self, Assignment};
use crate::control::keys::KeyLayout;
use crate::control::records::{
    self, Addresses, FrontendState, ServerRole, ServerState, ShardAddresses, INVALID_VERSION,
};
use crate::discovery::{Discovery, Snapshot};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

pub(crate) struct Assigner {
    discovery: Arc<dyn Discovery>,
    keys: KeyLayout,
    num_shards: u64,
    num_replicas: u64,
}

/// Bookkeeping rebuilt from the highest-version role record of each server.
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct Recovered {
    pub servers: BTreeSet<String>,
    pub masters: BTreeMap<u64, String>,
    pub replicas: BTreeMap<u64, Vec<String>>,
    pub next_version: i64,
}

pub(crate) fn recover(role_records: &Snapshot) -> Result<Recovered> {
    let mut latest: BTreeMap<String, ServerRole> = BTreeMap::new();
    let mut next_version = 0;
    for encoded in role_records.values() {
        let role: ServerRole = records::decode(encoded)?;
        next_version = next_version.max(role.version + 1);
        match latest.get(&role.id) {
            Some(existing) if existing.version >= role.version => {}
            _ => {
                latest.insert(role.id.clone(), role);
            }
        }
    }
    let mut recovered = Recovered {
        next_version,
        ..Default::default()
    };
    for (id, role) in &latest {
        recovered.servers.insert(id.clone());
        for &shard in &role.masters {
            recovered.masters.insert(shard, id.clone());
        }
        for &shard in &role.replicas {
            recovered.replicas.entry(shard).or_default().push(id.clone());
        }
    }
    Ok(recovered)
}

impl Assigner {
    pub(crate) fn new(
        discovery: Arc<dyn Discovery>,
        keys: KeyLayout,
        num_shards: u64,
        num_replicas: u64,
    ) -> Self {
        Self {
            discovery,
            keys,
            num_shards,
            num_replicas,
        }
    }

    pub(crate) async fn run(self, mut cancel: CancelToken) -> Result<()> {
        let existing = self.discovery.get_all(&self.keys.server_role_dir()).await?;
        let recovered = recover(&existing)?;
        tracing::info!(
            servers = recovered.servers.len(),
            next_version = recovered.next_version,
            "assigner reconstructed state"
        );
        let mut old_servers = recovered.servers;
        let mut old_masters = recovered.masters;
        let mut old_replicas = recovered.replicas;
        let mut next_version = recovered.next_version;
        let mut old_min_version: i64 = 0;

        let mut watch = self.discovery.watch_all(&self.keys.server_state_dir()).await?;
        loop {
            let snapshot = tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                snapshot = watch.recv() => snapshot.ok_or(Error::WatchClosed)?,
            };
            // A fresh cluster has no one to serve.
            if snapshot.is_empty() {
                continue;
            }
            let mut states: BTreeMap<String, ServerState> = BTreeMap::new();
            for encoded in snapshot.values() {
                let state: ServerState = records::decode(encoded)?;
                states.insert(state.id.clone(), state);
            }

            let min_version = states
                .values()
                .map(|state| state.version)
                .min()
                .unwrap_or(INVALID_VERSION);
            if min_version > old_min_version {
                old_min_version = min_version;
                self.wait_for_frontends(min_version, &mut cancel).await?;
                self.collect_roles(min_version).await?;
            }

            let servers: BTreeSet<String> = states.keys().cloned().collect();
            if servers == old_servers {
                continue;
            }

            let planned = match assign::plan_roles(
                self.num_shards,
                self.num_replicas,
                next_version,
                &states,
                &old_masters,
                &old_replicas,
            ) {
                Ok(planned) => planned,
                Err(failure) => {
                    tracing::error!(
                        ?failure,
                        servers = states.len(),
                        num_shards = self.num_shards,
                        num_replicas = self.num_replicas,
                        "cannot assign all shard roles; waiting for membership change"
                    );
                    continue;
                }
            };
            self.publish(next_version, &planned, &states).await?;

            old_servers = servers;
            old_masters = planned.masters;
            old_replicas = planned.replicas;
            next_version += 1;
        }
    }

    /// Hold garbage collection until every frontend has caught up to
    /// `min_version`, so no router still references the records about to go.
    async fn wait_for_frontends(&self, min_version: i64, cancel: &mut CancelToken) -> Result<()> {
        let mut watch = self
            .discovery
            .watch_all(&self.keys.frontend_state_dir())
            .await?;
        loop {
            let snapshot = tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                snapshot = watch.recv() => snapshot.ok_or(Error::WatchClosed)?,
            };
            let mut caught_up = true;
            for encoded in snapshot.values() {
                let state: FrontendState = records::decode(encoded)?;
                if state.version < min_version {
                    caught_up = false;
                    break;
                }
            }
            if caught_up {
                return Ok(());
            }
        }
    }

    /// Delete role records no live server acknowledges anymore.
    async fn collect_roles(&self, min_version: i64) -> Result<()> {
        let role_records = self.discovery.get_all(&self.keys.server_role_dir()).await?;
        for (key, encoded) in &role_records {
            let role: ServerRole = records::decode(encoded)?;
            if role.version < min_version {
                self.discovery.delete(key).await?;
                tracing::info!(id = %role.id, version = role.version, "collected obsolete server role");
            }
        }
        Ok(())
    }

    async fn publish(
        &self,
        version: i64,
        planned: &Assignment,
        states: &BTreeMap<String, ServerState>,
    ) -> Result<()> {
        let mut addresses = Addresses {
            version,
            addresses: BTreeMap::new(),
        };
        for shard in 0..self.num_shards {
            addresses.addresses.insert(shard, ShardAddresses::default());
        }
        for (id, role) in &planned.roles {
            self.discovery
                .set(
                    &self.keys.server_role_version_key(id, version),
                    &records::encode(role)?,
                    None,
                )
                .await?;
            tracing::info!(id = %id, version, masters = role.masters.len(), replicas = role.replicas.len(), "published server role");

            let address = &states[id].address;
            for &shard in &role.masters {
                if let Some(entry) = addresses.addresses.get_mut(&shard) {
                    entry.master = address.clone();
                }
            }
            for &shard in &role.replicas {
                if let Some(entry) = addresses.addresses.get_mut(&shard) {
                    entry.replicas.insert(address.clone());
                }
            }
        }
        self.discovery
            .set(
                &self.keys.addresses_key(version),
                &records::encode(&addresses)?,
                None,
            )
            .await?;
        tracing::info!(version, "published addresses snapshot");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoded_role(id: &str, version: i64, masters: &[u64], replicas: &[u64]) -> String {
        records::encode(&ServerRole {
            id: id.to_string(),
            version,
            masters: masters.iter().copied().collect(),
            replicas: replicas.iter().copied().collect(),
        })
        .unwrap()
    }

    #[test]
    fn test_recover_empty_store() {
        let recovered = recover(&Snapshot::new()).unwrap();
        assert_eq!(recovered.next_version, 0);
        assert!(recovered.servers.is_empty());
        assert!(recovered.masters.is_empty());
    }

    #[test]
    fn test_recover_keeps_highest_version_per_server() {
        let mut records_map = Snapshot::new();
        records_map.insert("r/a/0".to_string(), encoded_role("a", 0, &[0, 1], &[]));
        records_map.insert("r/a/1".to_string(), encoded_role("a", 1, &[0], &[1]));
        records_map.insert("r/b/1".to_string(), encoded_role("b", 1, &[1], &[0]));

        let recovered = recover(&records_map).unwrap();
        assert_eq!(recovered.next_version, 2);
        assert_eq!(recovered.masters[&0], "a");
        assert_eq!(recovered.masters[&1], "b");
        assert_eq!(recovered.replicas[&1], vec!["a".to_string()]);
        assert_eq!(recovered.replicas[&0], vec!["b".to_string()]);
    }

    #[test]
    fn test_recover_is_idempotent() {
        let mut records_map = Snapshot::new();
        records_map.insert("r/a/2".to_string(), encoded_role("a", 2, &[0], &[1]));
        records_map.insert("r/b/2".to_string(), encoded_role("b", 2, &[1], &[0]));
        records_map.insert("r/b/1".to_string(), encoded_role("b", 1, &[0, 1], &[]));

        let first = recover(&records_map).unwrap();
        let second = recover(&records_map).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_recover_rejects_malformed_record() {
        let mut records_map = Snapshot::new();
        records_map.insert("r/a/0".to_string(), "{broken".to_string());
        assert!(matches!(
            recover(&records_map).unwrap_err(),
            Error::Decode(_)
        ));
    }
}
