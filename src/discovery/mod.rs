//! Discovery store contract
//!
//! The control plane coordinates exclusively through a watchable key-value
//! store with TTL leases. This module defines the consumed contract; the
//! store itself (etcd, consul, ...) lives outside the crate. [`MemDiscovery`]
//! is the bundled in-process implementation used by tests and single-process
//! deployments.

pub mod mem;

pub use mem::MemDiscovery;

use crate::common::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::mpsc;

/// Full contents of a key prefix, ordered by key.
pub type Snapshot = BTreeMap<String, String>;

/// The watchable key-value store the control plane runs against.
#[async_trait]
pub trait Discovery: Send + Sync + 'static {
    /// Read a single key. `None` when absent or lease-expired.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Read every live key under a prefix.
    async fn get_all(&self, prefix: &str) -> Result<Snapshot>;

    /// Write a key. `ttl` of `None` means the key never expires; otherwise
    /// the key vanishes unless rewritten within the lease.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;

    /// Remove a key. Removing an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Subscribe to a prefix. The subscription delivers the current snapshot
    /// immediately, then a fresh full snapshot after every mutation beneath
    /// the prefix (including lease expiry). Deliveries arrive over a single
    /// receiver, so each observer sees changes serialized.
    async fn watch_all(&self, prefix: &str) -> Result<Watch>;
}

/// A live prefix subscription. Dropping it ends the subscription.
pub struct Watch {
    rx: mpsc::UnboundedReceiver<Snapshot>,
}

impl Watch {
    /// Wrap the store side's snapshot channel. Store adapters push a full
    /// snapshot per change into the sender half.
    pub fn new(rx: mpsc::UnboundedReceiver<Snapshot>) -> Self {
        Self { rx }
    }

    /// Next snapshot, or `None` once the store side has gone away.
    pub async fn recv(&mut self) -> Option<Snapshot> {
        self.rx.recv().await
    }
}
