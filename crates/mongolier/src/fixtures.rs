//! Fixture files: dump a collection to JSON and load it back
//!
//! A fixture file is a JSON array of sections, one per collection:
//!
//! ```json
//! [
//!   {
//!     "database": "app",
//!     "collection": "tickets",
//!     "exported_at": "2024-01-12T09:30:00Z",
//!     "documents": [{ "_id": { "$oid": "65a1f0c2e4b0a1b2c3d4e5f6" }, "title": "..." }]
//!   }
//! ]
//! ```
//!
//! Documents are relaxed extended JSON so ObjectIds and dates survive the
//! round trip. Loading upserts by `_id`, so loading the same file twice
//! leaves the collection unchanged.

use crate::connection::{ensure_id, MongoConnection};
use crate::filters::json_to_document;
use crate::query::FindQuery;
use bson::{doc, Bson, Document};
use chrono::{DateTime, Utc};
use mongolier_common::{MongolierError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use tracing::info;

/// One collection's worth of documents
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fixture {
    pub database: String,
    pub collection: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exported_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub documents: Vec<Value>,
}

impl Fixture {
    pub fn new(database: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            collection: collection.into(),
            exported_at: None,
            documents: Vec::new(),
        }
    }

    /// Builds a fixture from driver documents, stamped with the current time
    pub fn from_documents(
        database: impl Into<String>,
        collection: impl Into<String>,
        documents: Vec<Document>,
    ) -> Self {
        Self {
            database: database.into(),
            collection: collection.into(),
            exported_at: Some(Utc::now()),
            documents: documents
                .into_iter()
                .map(|doc| Bson::Document(doc).into_relaxed_extjson())
                .collect(),
        }
    }

    /// Converts the JSON documents back into driver documents
    pub fn to_documents(&self) -> Result<Vec<Document>> {
        self.documents
            .iter()
            .enumerate()
            .map(|(index, value)| {
                json_to_document(value.clone()).map_err(|e| {
                    MongolierError::Fixture(format!(
                        "{}.{} document #{}: {}",
                        self.database, self.collection, index, e
                    ))
                })
            })
            .collect()
    }
}

/// Parses a fixture file. A single section object is accepted as well as an
/// array of sections.
pub fn parse_fixtures(content: &str) -> Result<Vec<Fixture>> {
    let value: Value = serde_json::from_str(content)
        .map_err(|e| MongolierError::Fixture(format!("Invalid fixture JSON: {}", e)))?;

    let sections = match value {
        Value::Array(sections) => sections,
        object @ Value::Object(_) => vec![object],
        _ => {
            return Err(MongolierError::Fixture(
                "Fixture must be a JSON array of sections".to_string(),
            ))
        }
    };

    sections
        .into_iter()
        .enumerate()
        .map(|(index, section)| {
            serde_json::from_value(section).map_err(|e| {
                MongolierError::Fixture(format!("Fixture section #{}: {}", index, e))
            })
        })
        .collect()
}

/// Reads and parses a fixture file from disk
pub fn read_fixtures(path: &Path) -> Result<Vec<Fixture>> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        MongolierError::Fixture(format!("Failed to read {}: {}", path.display(), e))
    })?;
    parse_fixtures(&content)
}

/// Serializes fixtures; `indent` of `None` gives compact output
pub fn fixtures_to_string(fixtures: &[Fixture], indent: Option<usize>) -> Result<String> {
    match indent {
        None => Ok(serde_json::to_string(fixtures)?),
        Some(width) => {
            let indent = " ".repeat(width);
            let formatter = serde_json::ser::PrettyFormatter::with_indent(indent.as_bytes());
            let mut buffer = Vec::new();
            let mut serializer = serde_json::Serializer::with_formatter(&mut buffer, formatter);
            fixtures.serialize(&mut serializer)?;
            String::from_utf8(buffer).map_err(|e| MongolierError::Internal(e.to_string()))
        }
    }
}

/// Dumps every document in the connection's collection, ordered by `_id`
pub async fn dump(conn: &MongoConnection) -> Result<Fixture> {
    let documents = conn
        .find(&FindQuery::new(doc! {}).sort(doc! { "_id": 1 }))
        .await?;

    let descriptor = conn.descriptor();
    info!(
        database = descriptor.database(),
        collection = descriptor.collection(),
        count = documents.len(),
        "Dumped collection"
    );

    Ok(Fixture::from_documents(
        descriptor.database(),
        descriptor.collection(),
        documents,
    ))
}

/// Outcome of loading one fixture section
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub inserted: u64,
    pub replaced: u64,
}

impl LoadReport {
    pub fn total(&self) -> u64 {
        self.inserted + self.replaced
    }
}

impl std::ops::AddAssign for LoadReport {
    fn add_assign(&mut self, other: Self) {
        self.inserted += other.inserted;
        self.replaced += other.replaced;
    }
}

/// Upserts every document of `fixture` by `_id` into the connection's
/// collection. Documents without an `_id` get a fresh ObjectId.
pub async fn load(conn: &MongoConnection, fixture: &Fixture) -> Result<LoadReport> {
    let mut report = LoadReport::default();

    for mut document in fixture.to_documents()? {
        let id = ensure_id(&mut document);
        let result = conn.replace_one(&doc! { "_id": id }, document, true).await?;
        if result.upserted_id.is_some() {
            report.inserted += 1;
        } else {
            report.replaced += 1;
        }
    }

    info!(
        database = %fixture.database,
        collection = %fixture.collection,
        inserted = report.inserted,
        replaced = report.replaced,
        "Loaded fixture"
    );
    Ok(report)
}
