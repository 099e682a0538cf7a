//! Collection sync: make declared collections and indexes exist
//!
//! Collections are schema-free, so "syncing" only means creating the
//! collections listed in the settings and ensuring their indexes.

use crate::connection::MongoConnection;
use bson::Document;
use mongodb::options::IndexOptions;
use mongolier_common::Result;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::info;

/// One `[[collections]]` entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionSpec {
    /// Alias to connect through (default alias when absent)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    /// Database (alias default database when absent)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub indexes: Vec<IndexSpec>,
}

/// An index declaration; key order follows the file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexSpec {
    pub keys: Document,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub sparse: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expire_after_seconds: Option<u64>,
}

impl IndexSpec {
    /// Driver index options, or `None` when every option is at its default
    pub fn index_options(&self) -> Option<IndexOptions> {
        if self.name.is_none() && !self.unique && !self.sparse && self.expire_after_seconds.is_none() {
            return None;
        }

        let mut options = IndexOptions::default();
        options.name = self.name.clone();
        if self.unique {
            options.unique = Some(true);
        }
        if self.sparse {
            options.sparse = Some(true);
        }
        options.expire_after = self.expire_after_seconds.map(Duration::from_secs);
        Some(options)
    }

    /// Human-readable form used in reports, e.g. `status_1 (unique)`
    pub fn describe(&self) -> String {
        let name = self.name.clone().unwrap_or_else(|| {
            self.keys
                .iter()
                .map(|(k, v)| format!("{}_{}", k, v))
                .collect::<Vec<_>>()
                .join("_")
        });
        if self.unique {
            format!("{} (unique)", name)
        } else {
            name
        }
    }
}

/// What a sync did (or would do, on a dry run)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub collection: String,
    pub created: bool,
    pub indexes: Vec<String>,
}

/// Creates the collection if missing and ensures each declared index
pub async fn sync_collection(
    conn: &MongoConnection,
    spec: &CollectionSpec,
    dry_run: bool,
) -> Result<SyncReport> {
    let collection = conn.sibling(&spec.name)?;
    let existing = collection.list_collection_names().await?;

    let mut report = SyncReport {
        collection: spec.name.clone(),
        created: !existing.iter().any(|name| name == &spec.name),
        indexes: Vec::new(),
    };

    if report.created && !dry_run {
        collection.create_collection().await?;
        info!(collection = %spec.name, "Created collection");
    }

    for index in &spec.indexes {
        if !dry_run {
            let result = collection
                .create_index(index.keys.clone(), index.index_options())
                .await?;
            info!(collection = %spec.name, index = %result.index_name, "Ensured index");
        }
        report.indexes.push(index.describe());
    }

    Ok(report)
}
