//! Version-indexed address cache
//!
//! Address snapshots are immutable once published, so a fetched version can
//! be cached for the life of the process. Growth is bounded by how many
//! versions a process ever references, which tracks membership churn, not
//! request volume.

use crate::common::{Error, Result};
use crate::control::keys::KeyLayout;
use crate::control::records::{self, Addresses, INVALID_VERSION};
use crate::discovery::Discovery;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, RwLock};

pub(crate) struct AddressCache {
    discovery: Arc<dyn Discovery>,
    keys: KeyLayout,
    cached: RwLock<HashMap<i64, Arc<Addresses>>>,
}

impl AddressCache {
    pub(crate) fn new(discovery: Arc<dyn Discovery>, keys: KeyLayout) -> Self {
        Self {
            discovery,
            keys,
            cached: RwLock::new(HashMap::new()),
        }
    }

    /// Master endpoint for a shard. `None` when the shard is absent at that
    /// version, which is a valid empty state rather than an error.
    pub(crate) async fn master_address(&self, shard: u64, version: i64) -> Result<Option<String>> {
        let addresses = self.addresses(version).await?;
        let result = addresses
            .addresses
            .get(&shard)
            .map(|entry| entry.master.clone());
        tracing::debug!(shard, version, found = result.is_some(), "master address lookup");
        Ok(result)
    }

    /// Replica endpoints for a shard; the shard must exist at that version.
    pub(crate) async fn replica_addresses(
        &self,
        shard: u64,
        version: i64,
    ) -> Result<BTreeSet<String>> {
        let addresses = self.addresses(version).await?;
        match addresses.addresses.get(&shard) {
            Some(entry) => Ok(entry.replicas.clone()),
            None => Err(Error::ShardNotFound(shard)),
        }
    }

    pub(crate) async fn shard_to_master(&self, version: i64) -> Result<BTreeMap<u64, String>> {
        let addresses = self.addresses(version).await?;
        Ok(addresses
            .addresses
            .iter()
            .map(|(&shard, entry)| (shard, entry.master.clone()))
            .collect())
    }

    pub(crate) async fn shard_to_replicas(
        &self,
        version: i64,
    ) -> Result<BTreeMap<u64, BTreeSet<String>>> {
        let addresses = self.addresses(version).await?;
        Ok(addresses
            .addresses
            .iter()
            .map(|(&shard, entry)| (shard, entry.replicas.clone()))
            .collect())
    }

    async fn addresses(&self, version: i64) -> Result<Arc<Addresses>> {
        if version == INVALID_VERSION {
            return Err(Error::InvalidVersion);
        }
        if let Some(addresses) = self.cached.read().unwrap().get(&version) {
            return Ok(Arc::clone(addresses));
        }
        let encoded = self
            .discovery
            .get(&self.keys.addresses_key(version))
            .await?
            .ok_or(Error::AddressesNotFound(version))?;
        let addresses: Arc<Addresses> = Arc::new(records::decode(&encoded)?);
        // Another reader may have raced the fetch; the snapshot is immutable
        // so either copy is equally valid.
        Ok(Arc::clone(
            self.cached
                .write()
                .unwrap()
                .entry(version)
                .or_insert(addresses),
        ))
    }
}
