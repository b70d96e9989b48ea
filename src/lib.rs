//! # shardplane
//!
//! The sharding control plane of a distributed data-processing cluster:
//! - balanced, sticky shard -> (master, replicas) assignment
//! - lease-held heartbeats announcing liveness and version acknowledgement
//! - two-phase visibility: no routing to a version until every server has
//!   installed it
//! - garbage collection of role records no participant can still need
//!
//! ## Architecture
//!
//! ```text
//!  ┌──────────┐ heartbeat (TTL)  ┌─────────────────┐   watch    ┌──────────┐
//!  │ Servers  ├─────────────────►│                 ├───────────►│ Assigner │
//!  │ (data    │◄─────────────────┤ Discovery store │◄───────────┤ (roles + │
//!  │  plane)  │  watch own roles │  (watchable KV) │  publish   │  addrs)  │
//!  └──────────┘                  │                 │            └──────────┘
//!  ┌──────────┐ heartbeat (TTL)  │                 │
//!  │ Frontends├─────────────────►│                 │
//!  │ (routing)│◄─────────────────┤                 │
//!  └──────────┘  watch states    └─────────────────┘
//! ```
//!
//! Servers install the shards their newest role records demand, then
//! acknowledge the version through their heartbeat. The assigner observes
//! acknowledgements, which gates garbage collection; frontends advance to
//! the minimum acknowledged version, which gates routing.
//!
//! ## Usage
//!
//! ```ignore
//! let discovery = Arc::new(MemDiscovery::new());
//! let controller = ShardController::new(discovery, ClusterConfig::default())?;
//!
//! // On each server process:
//! controller.register_server(cancel, "srv-1", "10.0.0.1:1050", data_plane).await?;
//!
//! // On each frontend process:
//! controller.register_frontend(cancel, "10.0.0.9:650", query_plane).await?;
//!
//! // On exactly one process cluster-wide:
//! controller.assign_roles(cancel).await?;
//!
//! // Routing:
//! let master = controller.get_master_address(shard, version).await?;
//! ```

pub mod common;
pub mod control;
pub mod discovery;

// Re-export commonly used types
pub use common::{cancellation, CancelHandle, CancelToken, ClusterConfig, Error, Result};
pub use control::{ShardController, ShardFrontend, ShardServer, INVALID_VERSION};
pub use discovery::{Discovery, MemDiscovery, Snapshot, Watch};

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
