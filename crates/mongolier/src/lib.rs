//! MongoDB collection access that survives replica-set failovers
//!
//! A [`MongoConnection`] wraps one collection of one database. Every
//! operation goes through a [`RetryPolicy`]: when the driver reports a
//! transient connectivity failure (primary stepped down, pool cleared, socket
//! dropped) the call is retried with backoff instead of surfacing the error.
//!
//! # Features
//! - Named connection aliases loaded from TOML ([`Settings`])
//! - Shared clients with explicit shutdown ([`ConnectionManager`])
//! - Serialization filters for templates and JSON APIs ([`filters`])
//! - Fixture dump/load and collection/index sync
//!
//! ```no_run
//! use bson::doc;
//! use mongolier::{ConnectionManager, FindQuery, Settings};
//!
//! # async fn example() -> mongolier::Result<()> {
//! let manager = ConnectionManager::new(Settings::with_default_uri("mongodb://localhost:27017"));
//! let tickets = manager.connection("default", Some("app"), "tickets").await?;
//! let open = tickets.find(&FindQuery::new(doc! { "status": "open" })).await?;
//! manager.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod connection;
pub mod filters;
pub mod fixtures;
pub mod manager;
pub mod query;
pub mod retry;
pub mod store;
pub mod sync;
pub mod validation;

#[cfg(any(test, feature = "testing"))]
pub mod memory;

pub use config::{
    ConnectionDescriptor, DatabaseSettings, DriverOptions, PaginationSettings, ReadPreferenceMode,
    RetrySettings, Settings, DEFAULT_ALIAS, DEFAULT_PAGINATION, URI_ENV_VAR,
};
pub use connection::{MongoConnection, PoolConfig};
pub use filters::{FieldFilter, SerializeOptions};
pub use fixtures::{Fixture, LoadReport};
pub use manager::ConnectionManager;
pub use mongolier_common::{MongolierError, Result};
pub use query::FindQuery;
pub use retry::{OperationKind, RetryPolicy};
pub use store::DocumentStore;
pub use sync::{CollectionSpec, IndexSpec, SyncReport};
pub use validation::{CollectionName, DatabaseName};

#[cfg(any(test, feature = "testing"))]
pub use memory::MemoryStore;
