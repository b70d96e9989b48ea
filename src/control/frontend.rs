//! Frontend version follower
//!
//! A frontend may only route at a version every server has finished
//! installing, otherwise it would hand requests to endpoints that do not
//! hold the data yet. The follower watches all server states and advances
//! the frontend to the minimum acknowledged version whenever that minimum
//! strictly increases.

use crate::common::{CancelToken, Error, Result};
use crate::control::keys::KeyLayout;
use crate::control::records::{self, ServerState, INVALID_VERSION};
use crate::control::ShardFrontend;
use crate::discovery::Discovery;
use std::sync::Arc;
use tokio::sync::mpsc;

pub(crate) async fn run_frontend(
    discovery: Arc<dyn Discovery>,
    keys: KeyLayout,
    address: String,
    frontend: Arc<dyn ShardFrontend>,
    version_tx: mpsc::Sender<i64>,
    mut cancel: CancelToken,
) -> Result<()> {
    let mut current = INVALID_VERSION;
    let mut watch = discovery.watch_all(&keys.server_state_dir()).await?;
    loop {
        let snapshot = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            snapshot = watch.recv() => snapshot.ok_or(Error::WatchClosed)?,
        };
        if snapshot.is_empty() {
            continue;
        }
        let mut min_version = i64::MAX;
        for encoded in snapshot.values() {
            let state: ServerState = records::decode(encoded)?;
            min_version = min_version.min(state.version);
        }
        if min_version > current {
            frontend.version(min_version).await?;
            tracing::info!(address = %address, version = min_version, "frontend advanced to version");
            current = min_version;
            if version_tx.send(current).await.is_err() {
                return Ok(());
            }
        }
    }
}
