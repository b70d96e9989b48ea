//! Shard controller
//!
//! The public face of the control plane. One instance serves all roles: a
//! server process registers itself, a frontend process registers itself and
//! routes via the address lookups, and exactly one process cluster-wide
//! runs the assignment loop.

use crate::common::{cancellation, CancelHandle, CancelToken, ClusterConfig, Error, Result};
use crate::control::addresses::AddressCache;
use crate::control::assigner::Assigner;
use crate::control::keys::KeyLayout;
use crate::control::records::{self, ServerRole, ServerState};
use crate::control::{announce, barrier, follower, frontend, ShardFrontend, ShardServer};
use crate::discovery::Discovery;
use futures_util::stream::{FuturesUnordered, StreamExt};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub struct ShardController {
    discovery: Arc<dyn Discovery>,
    config: ClusterConfig,
    keys: KeyLayout,
    cache: AddressCache,
}

impl ShardController {
    pub fn new(discovery: Arc<dyn Discovery>, config: ClusterConfig) -> Result<Self> {
        config.validate()?;
        let keys = KeyLayout::new(&config.namespace);
        let cache = AddressCache::new(Arc::clone(&discovery), keys.clone());
        Ok(Self {
            discovery,
            config,
            keys,
            cache,
        })
    }

    // === Address lookups ===

    /// Master endpoint for `shard` at `version`; `None` when the shard is
    /// absent at that version.
    pub async fn get_master_address(&self, shard: u64, version: i64) -> Result<Option<String>> {
        self.cache.master_address(shard, version).await
    }

    /// Replica endpoints for `shard` at `version`.
    pub async fn get_replica_addresses(
        &self,
        shard: u64,
        version: i64,
    ) -> Result<BTreeSet<String>> {
        self.cache.replica_addresses(shard, version).await
    }

    /// Full shard -> master map at `version`.
    pub async fn get_shard_to_master(&self, version: i64) -> Result<BTreeMap<u64, String>> {
        self.cache.shard_to_master(version).await
    }

    /// Full shard -> replicas map at `version`.
    pub async fn get_shard_to_replicas(
        &self,
        version: i64,
    ) -> Result<BTreeMap<u64, BTreeSet<String>>> {
        self.cache.shard_to_replicas(version).await
    }

    // === Registration ===

    /// Run a server's control-plane presence until cancelled: the heartbeat
    /// producer and the role follower, joined so the first fatal error (or
    /// the caller's cancel) brings both down before this returns.
    pub async fn register_server(
        &self,
        cancel: CancelToken,
        id: &str,
        address: &str,
        server: Arc<dyn ShardServer>,
    ) -> Result<()> {
        tracing::info!(id, address, "registering server");
        let (version_tx, version_rx) = mpsc::channel(1);
        let (internal, internal_token) = cancellation();
        let tasks: FuturesUnordered<JoinHandle<Result<()>>> = FuturesUnordered::new();
        tasks.push(tokio::spawn(announce::announce_server(
            Arc::clone(&self.discovery),
            self.keys.clone(),
            id.to_string(),
            address.to_string(),
            Arc::clone(&server),
            version_rx,
            self.config.hold_ttl(),
            internal_token.clone(),
        )));
        tasks.push(tokio::spawn(follower::fill_roles(
            Arc::clone(&self.discovery),
            self.keys.clone(),
            id.to_string(),
            server,
            version_tx,
            internal_token.clone(),
        )));
        tasks.push(tokio::spawn(merge_cancel(cancel, internal_token)));

        let result = supervise(tasks, internal).await;
        tracing::info!(id, address, ok = result.is_ok(), "server registration finished");
        result
    }

    /// Same as [`register_server`](Self::register_server) for a frontend:
    /// the heartbeat producer and the version follower.
    pub async fn register_frontend(
        &self,
        cancel: CancelToken,
        address: &str,
        frontend: Arc<dyn ShardFrontend>,
    ) -> Result<()> {
        tracing::info!(address, "registering frontend");
        let (version_tx, version_rx) = mpsc::channel(1);
        let (internal, internal_token) = cancellation();
        let tasks: FuturesUnordered<JoinHandle<Result<()>>> = FuturesUnordered::new();
        tasks.push(tokio::spawn(announce::announce_frontend(
            Arc::clone(&self.discovery),
            self.keys.clone(),
            address.to_string(),
            version_rx,
            self.config.hold_ttl(),
            internal_token.clone(),
        )));
        tasks.push(tokio::spawn(frontend::run_frontend(
            Arc::clone(&self.discovery),
            self.keys.clone(),
            address.to_string(),
            frontend,
            version_tx,
            internal_token.clone(),
        )));
        tasks.push(tokio::spawn(merge_cancel(cancel, internal_token)));

        let result = supervise(tasks, internal).await;
        tracing::info!(address, ok = result.is_ok(), "frontend registration finished");
        result
    }

    // === Assignment ===

    /// Run the assignment loop until cancelled. Exactly one instance may run
    /// cluster-wide.
    pub async fn assign_roles(&self, cancel: CancelToken) -> Result<()> {
        tracing::info!("starting role assignment");
        let result = Assigner::new(
            Arc::clone(&self.discovery),
            self.keys.clone(),
            self.config.num_shards,
            self.config.num_replicas,
        )
        .run(cancel)
        .await;
        tracing::info!(ok = result.is_ok(), "role assignment finished");
        result
    }

    /// Block until the given servers and frontends have all converged to one
    /// common installed version.
    pub async fn wait_for_availability(
        &self,
        frontend_ids: &[String],
        server_ids: &[String],
    ) -> Result<()> {
        barrier::wait_for_availability(
            Arc::clone(&self.discovery),
            self.keys.clone(),
            frontend_ids,
            server_ids,
        )
        .await
    }

    // === Tooling reads ===

    /// Current server heartbeat records.
    pub async fn server_states(&self) -> Result<BTreeMap<String, ServerState>> {
        let snapshot = self.discovery.get_all(&self.keys.server_state_dir()).await?;
        let mut states = BTreeMap::new();
        for encoded in snapshot.values() {
            let state: ServerState = records::decode(encoded)?;
            states.insert(state.id.clone(), state);
        }
        Ok(states)
    }

    /// Current role records, per server and version.
    pub async fn server_roles(&self) -> Result<BTreeMap<String, BTreeMap<i64, ServerRole>>> {
        let snapshot = self.discovery.get_all(&self.keys.server_role_dir()).await?;
        let mut roles: BTreeMap<String, BTreeMap<i64, ServerRole>> = BTreeMap::new();
        for encoded in snapshot.values() {
            let role: ServerRole = records::decode(encoded)?;
            roles
                .entry(role.id.clone())
                .or_default()
                .insert(role.version, role);
        }
        Ok(roles)
    }
}

/// Translate the caller's cancel into the registration's shutdown: external
/// cancellation is an error the registration reports, internal cancellation
/// (a sibling already failed) is a quiet exit.
async fn merge_cancel(mut external: CancelToken, mut internal: CancelToken) -> Result<()> {
    tokio::select! {
        _ = external.cancelled() => Err(Error::Cancelled),
        _ = internal.cancelled() => Ok(()),
    }
}

/// Wait for every task; the first error wins and cancels the siblings.
async fn supervise(
    mut tasks: FuturesUnordered<JoinHandle<Result<()>>>,
    internal: CancelHandle,
) -> Result<()> {
    let mut first: Option<Error> = None;
    while let Some(joined) = tasks.next().await {
        let result = joined.unwrap_or_else(|e| Err(Error::Internal(format!("task failed: {e}"))));
        if let Err(err) = result {
            first.get_or_insert(err);
            internal.cancel();
        }
    }
    match first {
        Some(err) => Err(err),
        None => Ok(()),
    }
}
