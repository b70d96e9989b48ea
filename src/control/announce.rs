//! Heartbeat producers
//!
//! Servers and frontends announce themselves by rewriting a lease-held state
//! record at half the lease interval, so one store hiccup still leaves a
//! full refresh window before the record expires. The producer also carries
//! the participant's acknowledgement: whenever the follower hands it a newly
//! installed version, the record is rewritten immediately with that version.
//!
//! Producers publish liveness only; they never decide correctness. A store
//! write failure terminates the producer and registration fails.

use crate::common::{CancelToken, Result};
use crate::control::keys::KeyLayout;
use crate::control::records::{self, FrontendState, ServerState, INVALID_VERSION};
use crate::control::ShardServer;
use crate::discovery::Discovery;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

pub(crate) async fn announce_server(
    discovery: Arc<dyn Discovery>,
    keys: KeyLayout,
    id: String,
    address: String,
    server: Arc<dyn ShardServer>,
    mut version_rx: mpsc::Receiver<i64>,
    hold_ttl: Duration,
    mut cancel: CancelToken,
) -> Result<()> {
    let key = keys.server_state_key(&id);
    let mut state = ServerState {
        id,
        address,
        shards: Default::default(),
        version: INVALID_VERSION,
    };
    loop {
        state.shards = server.local_shards().await?;
        let encoded = records::encode(&state)?;
        discovery.set(&key, &encoded, Some(hold_ttl)).await?;
        tracing::debug!(id = %state.id, version = state.version, shards = state.shards.len(), "announced server state");

        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            version = version_rx.recv() => match version {
                Some(version) => state.version = version,
                None => return Ok(()),
            },
            _ = tokio::time::sleep(hold_ttl / 2) => {}
        }
    }
}

pub(crate) async fn announce_frontend(
    discovery: Arc<dyn Discovery>,
    keys: KeyLayout,
    address: String,
    mut version_rx: mpsc::Receiver<i64>,
    hold_ttl: Duration,
    mut cancel: CancelToken,
) -> Result<()> {
    let key = keys.frontend_state_key(&address);
    let mut state = FrontendState {
        address,
        version: INVALID_VERSION,
    };
    loop {
        let encoded = records::encode(&state)?;
        discovery.set(&key, &encoded, Some(hold_ttl)).await?;
        tracing::debug!(address = %state.address, version = state.version, "announced frontend state");

        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            version = version_rx.recv() => match version {
                Some(version) => state.version = version,
                None => return Ok(()),
            },
            _ = tokio::time::sleep(hold_ttl / 2) => {}
        }
    }
}
