//! Control-plane records
//!
//! Everything the control plane writes to the discovery store is one of
//! these types, encoded as JSON so records stay self-describing and new
//! fields never break older readers. Decoding failure anywhere is treated
//! as data corruption and is fatal for the observer.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Version of a participant that has not yet acknowledged any role.
pub const INVALID_VERSION: i64 = -1;

fn invalid_version() -> i64 {
    INVALID_VERSION
}

/// Heartbeat record of a server. Lease-refreshed by its owner; vanishes when
/// the owner stops.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerState {
    pub id: String,
    pub address: String,
    /// Shards the server currently holds locally
    #[serde(default)]
    pub shards: BTreeSet<u64>,
    /// Last role version the server has fully applied
    #[serde(default = "invalid_version")]
    pub version: i64,
}

/// Heartbeat record of a frontend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrontendState {
    pub address: String,
    #[serde(default = "invalid_version")]
    pub version: i64,
}

/// One server's role at one version. Written by the assigner, durable until
/// collected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerRole {
    pub id: String,
    pub version: i64,
    #[serde(default)]
    pub masters: BTreeSet<u64>,
    #[serde(default)]
    pub replicas: BTreeSet<u64>,
}

impl ServerRole {
    pub fn new(id: &str, version: i64) -> Self {
        Self {
            id: id.to_string(),
            version,
            masters: BTreeSet::new(),
            replicas: BTreeSet::new(),
        }
    }

    /// Does this role place `shard` on the server in either capacity?
    pub fn has_shard(&self, shard: u64) -> bool {
        self.masters.contains(&shard) || self.replicas.contains(&shard)
    }

    /// All shards this role demands, masters and replicas together.
    pub fn shards(&self) -> impl Iterator<Item = u64> + '_ {
        self.masters.iter().chain(self.replicas.iter()).copied()
    }
}

/// Endpoints serving one shard.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardAddresses {
    #[serde(default)]
    pub master: String,
    #[serde(default)]
    pub replicas: BTreeSet<String>,
}

/// Immutable routing snapshot for one version, covering every shard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Addresses {
    pub version: i64,
    #[serde(default)]
    pub addresses: BTreeMap<u64, ShardAddresses>,
}

pub(crate) fn encode<T: Serialize>(record: &T) -> crate::Result<String> {
    Ok(serde_json::to_string(record)?)
}

pub(crate) fn decode<T: DeserializeOwned>(encoded: &str) -> crate::Result<T> {
    Ok(serde_json::from_str(encoded)?)
}
