//! Availability barrier
//!
//! A one-shot wait used by deployment tooling and tests: first the expected
//! servers must all report one common installed version with exactly one
//! role record each, then every expected frontend must report that same
//! version. Returns on the first snapshot pair that satisfies both phases.

use crate::common::{Error, Result};
use crate::control::keys::KeyLayout;
use crate::control::records::{self, FrontendState, ServerRole, ServerState, INVALID_VERSION};
use crate::discovery::{Discovery, Snapshot};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

pub(crate) async fn wait_for_availability(
    discovery: Arc<dyn Discovery>,
    keys: KeyLayout,
    frontend_ids: &[String],
    server_ids: &[String],
) -> Result<()> {
    let mut watch = discovery.watch_all(&keys.server_dir()).await?;
    let version = loop {
        let snapshot = watch.recv().await.ok_or(Error::WatchClosed)?;
        if let Some(version) = servers_converged(&snapshot, &keys, server_ids)? {
            break version;
        }
    };
    tracing::debug!(version, "servers converged, waiting for frontends");

    let mut watch = discovery.watch_all(&keys.frontend_state_dir()).await?;
    loop {
        let snapshot = watch.recv().await.ok_or(Error::WatchClosed)?;
        if frontends_converged(&snapshot, frontend_ids, version)? {
            return Ok(());
        }
    }
}

/// The single version every expected server has installed, if the server
/// subtree has fully converged.
fn servers_converged(
    snapshot: &Snapshot,
    keys: &KeyLayout,
    server_ids: &[String],
) -> Result<Option<i64>> {
    let state_prefix = format!("{}/", keys.server_state_dir());
    let role_prefix = format!("{}/", keys.server_role_dir());
    let mut states: BTreeMap<String, ServerState> = BTreeMap::new();
    let mut roles: BTreeMap<String, Vec<ServerRole>> = BTreeMap::new();
    for (key, encoded) in snapshot {
        if key.starts_with(&state_prefix) {
            let state: ServerState = records::decode(encoded)?;
            states.insert(state.id.clone(), state);
        } else if key.starts_with(&role_prefix) {
            let role: ServerRole = records::decode(encoded)?;
            roles.entry(role.id.clone()).or_default().push(role);
        }
    }

    if states.len() != server_ids.len() || roles.len() != server_ids.len() {
        return Ok(None);
    }
    for id in server_ids {
        if !states.contains_key(id) || !roles.contains_key(id) {
            return Ok(None);
        }
    }
    let versions: BTreeSet<i64> = states.values().map(|state| state.version).collect();
    if versions.len() != 1 || versions.contains(&INVALID_VERSION) {
        return Ok(None);
    }
    let version = *versions.iter().next().unwrap_or(&INVALID_VERSION);
    for server_roles in roles.values() {
        if server_roles.len() != 1 || server_roles[0].version != version {
            return Ok(None);
        }
    }
    Ok(Some(version))
}

fn frontends_converged(
    snapshot: &Snapshot,
    frontend_ids: &[String],
    version: i64,
) -> Result<bool> {
    let mut frontends: BTreeMap<String, FrontendState> = BTreeMap::new();
    for encoded in snapshot.values() {
        let state: FrontendState = records::decode(encoded)?;
        if state.version != version {
            return Ok(false);
        }
        frontends.insert(state.address.clone(), state);
    }
    if frontends.len() != frontend_ids.len() {
        return Ok(false);
    }
    Ok(frontend_ids.iter().all(|id| frontends.contains_key(id)))
}
