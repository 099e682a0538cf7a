//! Shared connection handles with an explicit lifecycle
//!
//! A [`ConnectionManager`] is created once (at process start, or injected per
//! request scope), passed to whoever needs collections, and shut down
//! explicitly. It holds one driver client per alias; every
//! [`MongoConnection`] it hands out shares that client's pool.

use crate::config::{ConnectionDescriptor, Settings};
use crate::connection::{build_client, verify_reachable, MongoConnection, PoolConfig};
use crate::retry::RetryPolicy;
use mongodb::Client;
use mongolier_common::Result;
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::{debug, info};

/// Owns the driver clients for every configured alias
pub struct ConnectionManager {
    settings: Settings,
    policy: RetryPolicy,
    clients: RwLock<HashMap<String, Client>>,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("aliases", &self.aliases())
            .field("connected", &self.clients.read().len())
            .finish()
    }
}

impl ConnectionManager {
    /// Creates a manager. No connection is made until a collection is asked for.
    pub fn new(settings: Settings) -> Self {
        let policy = settings.retry_policy();
        Self {
            settings,
            policy,
            clients: RwLock::new(HashMap::new()),
        }
    }

    /// Overrides the retry policy taken from the settings
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Configured aliases, sorted
    pub fn aliases(&self) -> Vec<String> {
        let mut aliases: Vec<String> = self.settings.databases.keys().cloned().collect();
        aliases.sort();
        aliases
    }

    /// True once a client for `target` has been created
    pub fn is_connected(&self, target: &str) -> bool {
        self.clients.read().contains_key(target)
    }

    /// Collection handle for an alias; `database` falls back to the alias'
    /// `default_database`
    pub async fn connection(
        &self,
        alias: &str,
        database: Option<&str>,
        collection: &str,
    ) -> Result<MongoConnection> {
        let descriptor = self.settings.descriptor(alias, database, collection)?;
        self.connect(descriptor).await
    }

    /// Collection handle for a descriptor whose target is an alias or a URI
    pub async fn connect(&self, descriptor: ConnectionDescriptor) -> Result<MongoConnection> {
        let client = self.client_for(descriptor.target(), descriptor.database()).await?;
        MongoConnection::from_client(client, descriptor, self.policy.clone())
    }

    async fn client_for(&self, target: &str, database: &str) -> Result<Client> {
        let existing = self.clients.read().get(target).cloned();
        if let Some(client) = existing {
            return Ok(client);
        }

        let uri = self.settings.resolve_uri(target)?;
        let pool = match self.settings.databases.get(target) {
            Some(db) => db.pool_config(),
            None => PoolConfig::default(),
        };

        let client = build_client(&uri, &pool).await?;
        verify_reachable(&client, database).await?;

        let mut clients = self.clients.write();
        let client = clients.entry(target.to_string()).or_insert(client).clone();
        debug!(target_alias = target, "Client registered");
        Ok(client)
    }

    /// Closes every client. Handles obtained earlier stop working.
    pub async fn shutdown(self) {
        let clients = std::mem::take(&mut *self.clients.write());
        for (target, client) in clients {
            client.shutdown().await;
            info!(target_alias = %target, "Client shut down");
        }
    }
}
