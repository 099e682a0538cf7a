//! mongolier management commands
//!
//! - `mongolier dumpdata` - Export collections to a fixture file
//! - `mongolier loaddata` - Upsert fixture files into their collections
//! - `mongolier sync` - Create declared collections and indexes
//! - `mongolier ping` - Check that an alias is reachable
//! - `mongolier serve` - Expose collections as JSON REST resources

pub mod dumpdata;
pub mod loaddata;
pub mod ping;
pub mod serve;
pub mod sync;

use mongolier::ConnectionManager;

/// State shared by every command
pub struct CommandContext {
    pub manager: ConnectionManager,
    /// Alias selected with `--alias`
    pub alias: String,
}

impl CommandContext {
    pub fn new(manager: ConnectionManager, alias: impl Into<String>) -> Self {
        Self {
            manager,
            alias: alias.into(),
        }
    }
}
