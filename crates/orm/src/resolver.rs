//! Named-connection resolver
//!
//! Applications register connections by name once at startup and the ORM
//! resolves them on demand. A process-wide default instance is provided for
//! wiring convenience; an explicit resolver can always be constructed and
//! passed around instead.

use std::sync::Arc;

use dashmap::DashMap;
use once_cell::sync::Lazy;

use crate::backends::DatabaseConnection;
use crate::error::{ModelError, ModelResult};

/// Name used when an entity definition does not pin a connection
pub const DEFAULT_CONNECTION: &str = "default";

/// Registry of named database connections
#[derive(Default)]
pub struct ConnectionResolver {
    connections: DashMap<String, Arc<dyn DatabaseConnection>>,
}

impl ConnectionResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a connection under a name
    pub fn register(&self, name: impl Into<String>, connection: Arc<dyn DatabaseConnection>) {
        self.connections.insert(name.into(), connection);
    }

    /// Resolve a connection by name; `None` resolves the default
    pub fn resolve(&self, name: Option<&str>) -> ModelResult<Arc<dyn DatabaseConnection>> {
        let name = name.unwrap_or(DEFAULT_CONNECTION);
        self.connections
            .get(name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| {
                ModelError::Connection(format!("no connection registered under '{}'", name))
            })
    }

    pub fn has(&self, name: &str) -> bool {
        self.connections.contains_key(name)
    }
}

/// The process-wide resolver instance
pub fn global() -> &'static ConnectionResolver {
    static GLOBAL: Lazy<ConnectionResolver> = Lazy::new(ConnectionResolver::new);
    &GLOBAL
}
