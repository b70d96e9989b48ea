//! Server role follower
//!
//! Watches the server's own role records and drives the local data plane to
//! match. Only the two newest published versions are held hot; that window
//! lets the server keep serving an acknowledged version while the next one
//! installs, and bounds how much state teardown lags behind.
//!
//! Ordering is load-bearing: every `add_shard` for a version completes
//! before that version is acknowledged on the outbox, and a version's shards
//! are only torn down once the version has fallen out of the retained
//! window, which requires a later version to be fully installed.

use crate::common::{CancelToken, Error, Result};
use crate::control::keys::KeyLayout;
use crate::control::records::{self, ServerRole};
use crate::control::ShardServer;
use crate::discovery::Discovery;
use futures_util::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc;

/// How many of the newest role versions a server keeps installed.
const ROLE_WINDOW: usize = 2;

pub(crate) async fn fill_roles(
    discovery: Arc<dyn Discovery>,
    keys: KeyLayout,
    id: String,
    server: Arc<dyn ShardServer>,
    version_tx: mpsc::Sender<i64>,
    mut cancel: CancelToken,
) -> Result<()> {
    let mut held: BTreeMap<i64, ServerRole> = BTreeMap::new();
    let mut watch = discovery.watch_all(&keys.server_role_key(&id)).await?;
    loop {
        let snapshot = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            snapshot = watch.recv() => snapshot.ok_or(Error::WatchClosed)?,
        };

        let mut published: BTreeMap<i64, ServerRole> = BTreeMap::new();
        for encoded in snapshot.values() {
            let role: ServerRole = records::decode(encoded)?;
            published.insert(role.version, role);
        }
        let window: Vec<i64> = published
            .keys()
            .rev()
            .take(ROLE_WINDOW)
            .rev()
            .copied()
            .collect();

        // Install newly appeared versions in ascending order, acknowledging
        // each one only after all its shards are in place.
        for &version in &window {
            if held.contains_key(&version) {
                continue;
            }
            let role = &published[&version];
            let needed: Vec<u64> = role
                .shards()
                .filter(|&shard| !window_holds(&held, shard))
                .collect();
            install_shards(&server, &needed, version).await?;
            tracing::info!(id = %id, version, shards = needed.len(), "installed shard role");
            held.insert(version, role.clone());
            if version_tx.send(version).await.is_err() {
                return Ok(());
            }
        }

        // Tear down shards of versions that fell out of the window and are
        // not demanded by anything retained.
        let retained: BTreeMap<i64, ServerRole> = window
            .iter()
            .map(|version| (*version, published[version].clone()))
            .collect();
        for (&version, role) in &held {
            if retained.contains_key(&version) {
                continue;
            }
            let obsolete: Vec<u64> = role
                .shards()
                .filter(|&shard| !window_holds(&retained, shard))
                .collect();
            remove_shards(&server, &obsolete, version).await?;
            tracing::info!(id = %id, version, shards = obsolete.len(), "removed shard role");
        }
        held = retained;
    }
}

fn window_holds(window: &BTreeMap<i64, ServerRole>, shard: u64) -> bool {
    window.values().any(|role| role.has_shard(shard))
}

async fn install_shards(server: &Arc<dyn ShardServer>, shards: &[u64], version: i64) -> Result<()> {
    let installs = shards
        .iter()
        .map(|&shard| server.add_shard(shard, version - 1));
    first_error(join_all(installs).await)
}

async fn remove_shards(server: &Arc<dyn ShardServer>, shards: &[u64], version: i64) -> Result<()> {
    let removals = shards
        .iter()
        .map(|&shard| server.remove_shard(shard, version - 1));
    first_error(join_all(removals).await)
}

/// Every call runs to completion; the first failure wins.
fn first_error(results: Vec<Result<()>>) -> Result<()> {
    match results.into_iter().find_map(|result| result.err()) {
        Some(err) => Err(err),
        None => Ok(()),
    }
}
