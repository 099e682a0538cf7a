//! The seam between the framework layer and a collection

use crate::query::FindQuery;
use async_trait::async_trait;
use bson::{Bson, Document};
use mongolier_common::Result;

/// Collection operations used by views, the REST resource and the
/// management commands.
///
/// Implemented by [`MongoConnection`](crate::MongoConnection). Counts are
/// returned instead of driver result structs so other stores can implement
/// the trait.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Name of the collection behind this store
    fn collection_name(&self) -> &str;

    /// All documents matching the query
    async fn find(&self, query: &FindQuery) -> Result<Vec<Document>>;

    /// First document matching the query
    async fn find_one(&self, query: &FindQuery) -> Result<Option<Document>>;

    /// Number of documents matching the filter
    async fn count(&self, filter: &Document) -> Result<u64>;

    /// Inserts a document, returning its `_id`
    async fn insert_one(&self, document: Document) -> Result<Bson>;

    /// Replaces the first match, returning the number of matched documents
    async fn replace_one(&self, filter: &Document, replacement: Document) -> Result<u64>;

    /// Applies an update document to the first match, returning the number of
    /// matched documents
    async fn update_one(&self, filter: &Document, update: Document) -> Result<u64>;

    /// Deletes the first match, returning the number of deleted documents
    async fn delete_one(&self, filter: &Document) -> Result<u64>;
}
