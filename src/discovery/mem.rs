//! In-process discovery store
//!
//! An ordered map with per-key lease deadlines and prefix watches. A
//! background task sweeps expired leases so watchers observe a key's
//! disappearance without anyone reading it first.

use crate::common::Result;
use crate::discovery::{Discovery, Snapshot, Watch};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// How often the sweeper checks for expired leases.
const SWEEP_INTERVAL: Duration = Duration::from_millis(100);

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn expired(&self, now: Instant) -> bool {
        matches!(self.expires_at, Some(deadline) if deadline <= now)
    }
}

struct Watcher {
    prefix: String,
    tx: mpsc::UnboundedSender<Snapshot>,
}

#[derive(Default)]
struct Inner {
    entries: BTreeMap<String, Entry>,
    watchers: Vec<Watcher>,
}

impl Inner {
    fn snapshot(&self, prefix: &str, now: Instant) -> Snapshot {
        self.entries
            .iter()
            .filter(|(key, entry)| key_in_prefix(key, prefix) && !entry.expired(now))
            .map(|(key, entry)| (key.clone(), entry.value.clone()))
            .collect()
    }

    /// Push fresh snapshots to every watcher covering one of `keys`,
    /// dropping watchers whose receiver has gone away.
    fn notify(&mut self, keys: &[String], now: Instant) {
        let snapshots: Vec<Option<Snapshot>> = self
            .watchers
            .iter()
            .map(|watcher| {
                keys.iter()
                    .any(|key| key_in_prefix(key, &watcher.prefix))
                    .then(|| self.snapshot(&watcher.prefix, now))
            })
            .collect();
        let mut live = Vec::with_capacity(self.watchers.len());
        for (watcher, snapshot) in self.watchers.drain(..).zip(snapshots) {
            match snapshot {
                Some(snapshot) => {
                    if watcher.tx.send(snapshot).is_ok() {
                        live.push(watcher);
                    }
                }
                None => live.push(watcher),
            }
        }
        self.watchers = live;
    }
}

/// In-memory [`Discovery`] implementation.
///
/// Requires a running tokio runtime: construction spawns the lease sweeper,
/// which stops on its own once the store is dropped.
pub struct MemDiscovery {
    inner: Arc<Mutex<Inner>>,
}

impl MemDiscovery {
    pub fn new() -> Self {
        let inner = Arc::new(Mutex::new(Inner::default()));
        tokio::spawn(sweep_loop(Arc::downgrade(&inner)));
        Self { inner }
    }
}

async fn sweep_loop(inner: Weak<Mutex<Inner>>) {
    let mut tick = tokio::time::interval(SWEEP_INTERVAL);
    loop {
        tick.tick().await;
        let Some(inner) = inner.upgrade() else {
            return;
        };
        let mut inner = inner.lock().unwrap();
        let now = Instant::now();
        let expired: Vec<String> = inner
            .entries
            .iter()
            .filter(|(_, entry)| entry.expired(now))
            .map(|(key, _)| key.clone())
            .collect();
        if expired.is_empty() {
            continue;
        }
        for key in &expired {
            inner.entries.remove(key);
        }
        inner.notify(&expired, now);
    }
}

fn key_in_prefix(key: &str, prefix: &str) -> bool {
    match key.strip_prefix(prefix) {
        Some("") => true,
        Some(rest) => rest.starts_with('/'),
        None => false,
    }
}

#[async_trait]
impl Discovery for MemDiscovery {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let inner = self.inner.lock().unwrap();
        let now = Instant::now();
        Ok(inner
            .entries
            .get(key)
            .filter(|entry| !entry.expired(now))
            .map(|entry| entry.value.clone()))
    }

    async fn get_all(&self, prefix: &str) -> Result<Snapshot> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.snapshot(prefix, Instant::now()))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let now = Instant::now();
        inner.entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: ttl.map(|ttl| now + ttl),
            },
        );
        inner.notify(&[key.to_string()], now);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.entries.remove(key).is_some() {
            inner.notify(&[key.to_string()], Instant::now());
        }
        Ok(())
    }

    async fn watch_all(&self, prefix: &str) -> Result<Watch> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.lock().unwrap();
        let _ = tx.send(inner.snapshot(prefix, Instant::now()));
        inner.watchers.push(Watcher {
            prefix: prefix.to_string(),
            tx,
        });
        Ok(Watch::new(rx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_set_get_delete() {
        let store = MemDiscovery::new();

        store.set("/a/b", "1", None).await.unwrap();
        assert_eq!(store.get("/a/b").await.unwrap().unwrap(), "1");

        store.delete("/a/b").await.unwrap();
        assert!(store.get("/a/b").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_get_all_respects_prefix_boundaries() {
        let store = MemDiscovery::new();
        store.set("/a/b/1", "x", None).await.unwrap();
        store.set("/a/b/2", "y", None).await.unwrap();
        store.set("/a/bc", "z", None).await.unwrap();

        let all = store.get_all("/a/b").await.unwrap();
        assert_eq!(all.len(), 2);
        assert!(all.contains_key("/a/b/1"));
        assert!(!all.contains_key("/a/bc"));
    }

    #[tokio::test]
    async fn test_lease_expiry() {
        let store = MemDiscovery::new();
        store
            .set("/lease", "v", Some(Duration::from_millis(50)))
            .await
            .unwrap();
        assert!(store.get("/lease").await.unwrap().is_some());

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(store.get("/lease").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_watch_delivers_initial_and_updates() {
        let store = MemDiscovery::new();
        store.set("/w/1", "a", None).await.unwrap();

        let mut watch = store.watch_all("/w").await.unwrap();
        let initial = watch.recv().await.unwrap();
        assert_eq!(initial.len(), 1);

        store.set("/w/2", "b", None).await.unwrap();
        let updated = watch.recv().await.unwrap();
        assert_eq!(updated.len(), 2);

        store.delete("/w/1").await.unwrap();
        let after_delete = watch.recv().await.unwrap();
        assert_eq!(after_delete.len(), 1);
        assert!(after_delete.contains_key("/w/2"));
    }

    #[tokio::test]
    async fn test_watch_sees_lease_expiry() {
        let store = MemDiscovery::new();
        store
            .set("/w/leased", "v", Some(Duration::from_millis(50)))
            .await
            .unwrap();

        let mut watch = store.watch_all("/w").await.unwrap();
        assert_eq!(watch.recv().await.unwrap().len(), 1);

        let empty = timeout(Duration::from_secs(1), watch.recv())
            .await
            .expect("sweeper should notify")
            .unwrap();
        assert!(empty.is_empty());
    }
}
