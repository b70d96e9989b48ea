//! Key layout for control-plane records in the discovery store
//!
//! All records live under `<namespace>/shard`. The server subtree holds both
//! heartbeat states and role records so the availability barrier can watch
//! them with a single subscription; all other prefixes are disjoint.

/// Builds the key families under one namespace.
#[derive(Debug, Clone)]
pub(crate) struct KeyLayout {
    root: String,
}

impl KeyLayout {
    pub(crate) fn new(namespace: &str) -> Self {
        Self {
            root: format!("{}/shard", namespace.trim_end_matches('/')),
        }
    }

    pub(crate) fn server_dir(&self) -> String {
        format!("{}/server", self.root)
    }

    pub(crate) fn server_state_dir(&self) -> String {
        format!("{}/state", self.server_dir())
    }

    pub(crate) fn server_state_key(&self, id: &str) -> String {
        format!("{}/{}", self.server_state_dir(), id)
    }

    pub(crate) fn server_role_dir(&self) -> String {
        format!("{}/role", self.server_dir())
    }

    pub(crate) fn server_role_key(&self, id: &str) -> String {
        format!("{}/{}", self.server_role_dir(), id)
    }

    pub(crate) fn server_role_version_key(&self, id: &str, version: i64) -> String {
        format!("{}/{}", self.server_role_key(id), version)
    }

    pub(crate) fn frontend_state_dir(&self) -> String {
        format!("{}/frontend/state", self.root)
    }

    pub(crate) fn frontend_state_key(&self, address: &str) -> String {
        format!("{}/{}", self.frontend_state_dir(), address)
    }

    pub(crate) fn addresses_dir(&self) -> String {
        format!("{}/addresses", self.root)
    }

    pub(crate) fn addresses_key(&self, version: i64) -> String {
        format!("{}/{}", self.addresses_dir(), version)
    }
}
