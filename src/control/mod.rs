//! The sharding control plane
//!
//! Decides, for a fixed set of shards and a replication factor, which server
//! masters each shard and which servers replicate it; publishes every
//! decision as an immutable numbered version; and keeps the mapping live as
//! servers come and go. Coordination happens entirely through the
//! [`Discovery`](crate::discovery::Discovery) store:
//!
//! - servers and frontends announce themselves with lease-held heartbeats
//!   that also carry the last version they finished installing
//! - the assigner watches those heartbeats, replans on membership change,
//!   and publishes role records plus an address snapshot per version
//! - each server follows its own role records and drives its data plane to
//!   match before acknowledging
//! - frontends only ever route at the minimum version all servers have
//!   acknowledged

pub mod controller;
pub mod records;

mod addresses;
mod announce;
mod assign;
mod assigner;
mod barrier;
mod follower;
mod frontend;
mod keys;

pub use controller::ShardController;
pub use records::{
    Addresses, FrontendState, ServerRole, ServerState, ShardAddresses, INVALID_VERSION,
};

use crate::common::Result;
use async_trait::async_trait;
use std::collections::BTreeSet;

/// The server-side data plane the control plane drives.
#[async_trait]
pub trait ShardServer: Send + Sync + 'static {
    /// Shards this server currently holds locally.
    async fn local_shards(&self) -> Result<BTreeSet<u64>>;

    /// Make `shard` locally available before returning, seeding its data
    /// from `from_version`.
    async fn add_shard(&self, shard: u64, from_version: i64) -> Result<()>;

    /// Tear down the local holding of `shard`.
    async fn remove_shard(&self, shard: u64, from_version: i64) -> Result<()>;
}

/// The frontend query plane the control plane drives.
#[async_trait]
pub trait ShardFrontend: Send + Sync + 'static {
    /// Switch routing to `version`; after return the frontend must route
    /// using this version only.
    async fn version(&self, version: i64) -> Result<()>;
}
