//! Resilient MongoDB collection handle
//!
//! [`MongoConnection`] exposes the driver's own collection operations with the
//! driver's own argument and result types. The only thing it adds is that each
//! call is re-issued when the driver reports the auto-reconnect condition,
//! within the bounds of a [`RetryPolicy`].

use crate::config::ConnectionDescriptor;
use crate::query::FindQuery;
use crate::retry::{OperationKind, RetryPolicy};
use crate::store::DocumentStore;
use async_trait::async_trait;
use bson::{doc, oid::ObjectId, Bson, Document};
use futures::TryStreamExt;
use mongodb::{
    error::{ErrorKind, WriteFailure},
    options::{
        ClientOptions, CollectionOptions, IndexOptions, InsertManyOptions, ReplaceOptions,
        ServerApi, ServerApiVersion,
    },
    results::{CreateIndexResult, DeleteResult, UpdateResult},
    Client, Collection, Database, IndexModel,
};
use mongolier_common::{is_duplicate_id_key, MongolierError, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument};

/// Connection pool configuration
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Minimum number of connections in the pool (default: 5)
    pub min_pool_size: Option<u32>,
    /// Maximum number of connections in the pool (default: 20)
    pub max_pool_size: Option<u32>,
    /// Maximum time a connection can remain idle before being closed (default: none)
    pub max_idle_time: Option<Duration>,
    /// Connection timeout (default: 10s)
    pub connect_timeout: Option<Duration>,
    /// Server selection timeout (default: 30s)
    pub server_selection_timeout: Option<Duration>,
    /// Application name for server logs
    pub app_name: Option<String>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_pool_size: Some(5),
            max_pool_size: Some(20),
            max_idle_time: None,
            connect_timeout: Some(Duration::from_secs(10)),
            server_selection_timeout: Some(Duration::from_secs(30)),
            app_name: Some("mongolier".to_string()),
        }
    }
}

impl PoolConfig {
    fn apply(&self, options: &mut ClientOptions) {
        if let Some(min) = self.min_pool_size {
            options.min_pool_size = Some(min);
        }
        if let Some(max) = self.max_pool_size {
            options.max_pool_size = Some(max);
        }
        if let Some(idle) = self.max_idle_time {
            options.max_idle_time = Some(idle);
        }
        if let Some(connect) = self.connect_timeout {
            options.connect_timeout = Some(connect);
        }
        if let Some(server_sel) = self.server_selection_timeout {
            options.server_selection_timeout = Some(server_sel);
        }
        if let Some(app) = &self.app_name {
            options.app_name = Some(app.clone());
        }
    }
}

/// Builds a driver client for a connection string. No I/O happens until the
/// first operation.
pub(crate) async fn build_client(uri: &str, config: &PoolConfig) -> Result<Client> {
    let mut client_options = ClientOptions::parse(uri)
        .await
        .map_err(|e| MongolierError::Configuration(format!("Invalid connection URI: {}", e)))?;

    config.apply(&mut client_options);

    // Set stable API version for compatibility
    let server_api = ServerApi::builder().version(ServerApiVersion::V1).build();
    client_options.server_api = Some(server_api);

    Client::with_options(client_options)
        .map_err(|e| MongolierError::Configuration(format!("Invalid client options: {}", e)))
}

/// Pings through a client; an unreachable server is a configuration error
pub(crate) async fn verify_reachable(client: &Client, database: &str) -> Result<()> {
    client
        .database(database)
        .run_command(doc! { "ping": 1 })
        .await
        .map(|_| ())
        .map_err(|e| MongolierError::Configuration(format!("Unable to reach MongoDB: {}", e)))
}

/// A database + collection pair that retries on auto-reconnect
///
/// Cheap to clone; clones share the driver client and its pool.
#[derive(Clone)]
pub struct MongoConnection {
    client: Client,
    database: Database,
    collection: Collection<Document>,
    descriptor: Arc<ConnectionDescriptor>,
    policy: RetryPolicy,
}

impl std::fmt::Debug for MongoConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MongoConnection")
            .field("descriptor", &self.descriptor.to_string())
            .field("max_attempts", &self.policy.max_attempts)
            .finish()
    }
}

impl MongoConnection {
    /// Connects to `uri` and resolves the descriptor's database and
    /// collection, verifying the server is reachable.
    ///
    /// # Errors
    ///
    /// Returns [`MongolierError::Configuration`] if the URI or descriptor
    /// options are malformed, or the server cannot be reached. Construction
    /// is never retried.
    #[instrument(skip_all, fields(descriptor = %descriptor))]
    pub async fn connect(
        uri: &str,
        descriptor: ConnectionDescriptor,
        config: PoolConfig,
        policy: RetryPolicy,
    ) -> Result<Self> {
        let client = build_client(uri, &config).await?;
        verify_reachable(&client, descriptor.database()).await?;

        info!("Connection established");
        Self::from_client(client, descriptor, policy)
    }

    /// Wraps an already-built client. Used by the connection manager so many
    /// collections share one pool.
    pub fn from_client(
        client: Client,
        descriptor: ConnectionDescriptor,
        policy: RetryPolicy,
    ) -> Result<Self> {
        let database = client.database(descriptor.database());

        let mut options = CollectionOptions::default();
        options.selection_criteria = descriptor.options().selection_criteria()?;
        let collection = database.collection_with_options(descriptor.collection(), options);

        Ok(Self {
            client,
            database,
            collection,
            descriptor: Arc::new(descriptor),
            policy,
        })
    }

    /// Returns a handle on another collection of the same database, sharing
    /// the client, options and retry policy
    pub fn sibling(&self, collection: &str) -> Result<Self> {
        let descriptor = ConnectionDescriptor::new(
            self.descriptor.target(),
            self.descriptor.database(),
            collection,
        )?
        .with_options(self.descriptor.options().clone());
        Self::from_client(self.client.clone(), descriptor, self.policy.clone())
    }

    pub fn descriptor(&self) -> &ConnectionDescriptor {
        &self.descriptor
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Returns a copy of this handle using a different retry policy
    pub fn with_policy(&self, policy: RetryPolicy) -> Self {
        Self {
            policy,
            ..self.clone()
        }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    /// The raw driver collection, bypassing retries
    pub fn collection(&self) -> &Collection<Document> {
        &self.collection
    }

    /// Check that the server answers
    pub async fn ping(&self) -> Result<()> {
        let database = self.database.clone();
        self.policy
            .run("ping", OperationKind::Read, || {
                let database = database.clone();
                async move { database.run_command(doc! { "ping": 1 }).await }
            })
            .await?;
        Ok(())
    }

    /// Runs a find and drains the cursor. A reconnect while draining re-runs
    /// the whole query.
    pub async fn find(&self, query: &FindQuery) -> Result<Vec<Document>> {
        debug!(collection = self.descriptor.collection(), filter = %query.get_filter(), "find");
        let docs = self
            .policy
            .run("find", OperationKind::Read, || {
                let collection = self.collection.clone();
                let filter = query.get_filter().clone();
                let options = query.find_options();
                async move {
                    collection
                        .find(filter)
                        .with_options(options)
                        .await?
                        .try_collect::<Vec<Document>>()
                        .await
                }
            })
            .await?;
        Ok(docs)
    }

    /// Returns the first match, honouring the query's sort
    pub async fn find_one(&self, query: &FindQuery) -> Result<Option<Document>> {
        debug!(collection = self.descriptor.collection(), filter = %query.get_filter(), "find_one");
        let doc = self
            .policy
            .run("find_one", OperationKind::Read, || {
                let collection = self.collection.clone();
                let filter = query.get_filter().clone();
                let options = query.find_one_options();
                async move { collection.find_one(filter).with_options(options).await }
            })
            .await?;
        Ok(doc)
    }

    /// Counts matching documents
    pub async fn count(&self, filter: &Document) -> Result<u64> {
        let count = self
            .policy
            .run("count", OperationKind::Read, || {
                let collection = self.collection.clone();
                let filter = filter.clone();
                async move { collection.count_documents(filter).await }
            })
            .await?;
        Ok(count)
    }

    /// Distinct values of a field among matching documents
    pub async fn distinct(&self, field: &str, filter: &Document) -> Result<Vec<Bson>> {
        let values = self
            .policy
            .run("distinct", OperationKind::Read, || {
                let collection = self.collection.clone();
                let filter = filter.clone();
                let field = field.to_string();
                async move { collection.distinct(field, filter).await }
            })
            .await?;
        Ok(values)
    }

    /// Runs an aggregation pipeline and drains the cursor
    pub async fn aggregate(&self, pipeline: &[Document]) -> Result<Vec<Document>> {
        let docs = self
            .policy
            .run("aggregate", OperationKind::Read, || {
                let collection = self.collection.clone();
                let pipeline = pipeline.to_vec();
                async move {
                    collection
                        .aggregate(pipeline)
                        .await?
                        .try_collect::<Vec<Document>>()
                        .await
                }
            })
            .await?;
        Ok(docs)
    }

    /// Inserts one document.
    ///
    /// An `_id` is assigned before the first attempt when missing. If a retry
    /// then hits a duplicate key on that generated `_id`, the earlier attempt
    /// reached the server and the insert is reported as done. A duplicate on
    /// a caller-supplied `_id` is always returned as an error.
    pub async fn insert_one(&self, mut document: Document) -> Result<Bson> {
        let generated = [!document.contains_key("_id")];
        let id = ensure_id(&mut document);
        let mut attempt = 0u32;

        self.policy
            .run("insert_one", OperationKind::IdempotentWrite, || {
                attempt += 1;
                let attempt = attempt;
                let collection = self.collection.clone();
                let document = document.clone();
                async move {
                    match collection.insert_one(document).await {
                        Ok(_) => Ok(()),
                        Err(e) if landed_on_earlier_attempt(&e, attempt, &generated) => {
                            debug!("insert_one already applied before reconnect");
                            Ok(())
                        }
                        Err(e) => Err(e),
                    }
                }
            })
            .await?;

        Ok(id)
    }

    /// Inserts many documents, returning their ids in input order.
    ///
    /// Ids are assigned up front. Retries run unordered so documents that
    /// already landed only produce `_id` duplicates, which are ignored for
    /// generated ids.
    pub async fn insert_many(&self, mut documents: Vec<Document>) -> Result<Vec<Bson>> {
        if documents.is_empty() {
            return Ok(Vec::new());
        }
        let generated: Vec<bool> = documents.iter().map(|d| !d.contains_key("_id")).collect();
        let ids: Vec<Bson> = documents.iter_mut().map(ensure_id).collect();
        let mut attempt = 0u32;

        self.policy
            .run("insert_many", OperationKind::IdempotentWrite, || {
                attempt += 1;
                let attempt = attempt;
                let collection = self.collection.clone();
                let documents = documents.clone();
                let generated = &generated;
                async move {
                    let mut options = InsertManyOptions::default();
                    if attempt > 1 {
                        options.ordered = Some(false);
                    }
                    match collection.insert_many(documents).with_options(options).await {
                        Ok(_) => Ok(()),
                        Err(e) if landed_on_earlier_attempt(&e, attempt, generated) => {
                            debug!("insert_many already applied before reconnect");
                            Ok(())
                        }
                        Err(e) => Err(e),
                    }
                }
            })
            .await?;

        Ok(ids)
    }

    /// Applies an update to the first match. Attempted once unless the
    /// policy retries writes.
    pub async fn update_one(&self, filter: &Document, update: Document) -> Result<UpdateResult> {
        let result = self
            .policy
            .run("update_one", OperationKind::Write, || {
                let collection = self.collection.clone();
                let filter = filter.clone();
                let update = update.clone();
                async move { collection.update_one(filter, update).await }
            })
            .await?;
        Ok(result)
    }

    /// Applies an update to every match. Attempted once unless the policy
    /// retries writes.
    pub async fn update_many(&self, filter: &Document, update: Document) -> Result<UpdateResult> {
        let result = self
            .policy
            .run("update_many", OperationKind::Write, || {
                let collection = self.collection.clone();
                let filter = filter.clone();
                let update = update.clone();
                async move { collection.update_many(filter, update).await }
            })
            .await?;
        Ok(result)
    }

    /// Replaces the first match. Replacing is idempotent and always retried.
    pub async fn replace_one(
        &self,
        filter: &Document,
        replacement: Document,
        upsert: bool,
    ) -> Result<UpdateResult> {
        let result = self
            .policy
            .run("replace_one", OperationKind::IdempotentWrite, || {
                let collection = self.collection.clone();
                let filter = filter.clone();
                let replacement = replacement.clone();
                async move {
                    let mut options = ReplaceOptions::default();
                    options.upsert = Some(upsert);
                    collection
                        .replace_one(filter, replacement)
                        .with_options(options)
                        .await
                }
            })
            .await?;
        Ok(result)
    }

    /// Deletes the first match. Attempted once unless the policy retries
    /// writes.
    pub async fn delete_one(&self, filter: &Document) -> Result<DeleteResult> {
        let result = self
            .policy
            .run("delete_one", OperationKind::Write, || {
                let collection = self.collection.clone();
                let filter = filter.clone();
                async move { collection.delete_one(filter).await }
            })
            .await?;
        Ok(result)
    }

    /// Deletes every match. Attempted once unless the policy retries writes.
    pub async fn delete_many(&self, filter: &Document) -> Result<DeleteResult> {
        let result = self
            .policy
            .run("delete_many", OperationKind::Write, || {
                let collection = self.collection.clone();
                let filter = filter.clone();
                async move { collection.delete_many(filter).await }
            })
            .await?;
        Ok(result)
    }

    /// Creates an index; a no-op on the server when it already exists
    pub async fn create_index(
        &self,
        keys: Document,
        options: Option<IndexOptions>,
    ) -> Result<CreateIndexResult> {
        let result = self
            .policy
            .run("create_index", OperationKind::IdempotentWrite, || {
                let collection = self.collection.clone();
                let model = match options.clone() {
                    Some(options) => IndexModel::builder().keys(keys.clone()).options(options).build(),
                    None => IndexModel::builder().keys(keys.clone()).build(),
                };
                async move { collection.create_index(model).await }
            })
            .await?;
        Ok(result)
    }

    /// Names of the collections in this handle's database
    pub async fn list_collection_names(&self) -> Result<Vec<String>> {
        let names = self
            .policy
            .run("list_collection_names", OperationKind::Read, || {
                let database = self.database.clone();
                async move { database.list_collection_names().await }
            })
            .await?;
        Ok(names)
    }

    /// Explicitly creates this handle's collection
    pub async fn create_collection(&self) -> Result<()> {
        let name = self.descriptor.collection().to_string();
        self.policy
            .run("create_collection", OperationKind::Write, || {
                let database = self.database.clone();
                let name = name.clone();
                async move { database.create_collection(name).await }
            })
            .await?;
        Ok(())
    }
}

/// Returns the document's `_id`, generating an ObjectId when absent
pub(crate) fn ensure_id(document: &mut Document) -> Bson {
    match document.get("_id") {
        Some(id) => id.clone(),
        None => {
            let id = Bson::ObjectId(ObjectId::new());
            document.insert("_id", id.clone());
            id
        }
    }
}

/// Whether an insert error on `attempt` (1-indexed) only reports documents
/// that an earlier attempt already wrote.
///
/// `generated[i]` tells whether document `i` got its `_id` from [`ensure_id`].
/// Only those ids are trusted: a duplicate on a caller-supplied `_id` may be a
/// real conflict with a document that existed before the call.
pub(crate) fn landed_on_earlier_attempt(
    err: &mongodb::error::Error,
    attempt: u32,
    generated: &[bool],
) -> bool {
    if attempt <= 1 || !is_duplicate_id_key(err) {
        return false;
    }

    match &*err.kind {
        ErrorKind::Write(WriteFailure::WriteError(_)) => generated.first().copied().unwrap_or(false),
        ErrorKind::InsertMany(insert_err) => insert_err
            .write_errors
            .as_ref()
            .map(|errors| {
                errors
                    .iter()
                    .all(|e| generated.get(e.index).copied().unwrap_or(false))
            })
            .unwrap_or(false),
        _ => false,
    }
}

#[async_trait]
impl DocumentStore for MongoConnection {
    fn collection_name(&self) -> &str {
        self.descriptor.collection()
    }

    async fn find(&self, query: &FindQuery) -> Result<Vec<Document>> {
        MongoConnection::find(self, query).await
    }

    async fn find_one(&self, query: &FindQuery) -> Result<Option<Document>> {
        MongoConnection::find_one(self, query).await
    }

    async fn count(&self, filter: &Document) -> Result<u64> {
        MongoConnection::count(self, filter).await
    }

    async fn insert_one(&self, document: Document) -> Result<Bson> {
        MongoConnection::insert_one(self, document).await
    }

    async fn replace_one(&self, filter: &Document, replacement: Document) -> Result<u64> {
        let result = MongoConnection::replace_one(self, filter, replacement, false).await?;
        Ok(result.matched_count)
    }

    async fn update_one(&self, filter: &Document, update: Document) -> Result<u64> {
        let result = MongoConnection::update_one(self, filter, update).await?;
        Ok(result.matched_count)
    }

    async fn delete_one(&self, filter: &Document) -> Result<u64> {
        let result = MongoConnection::delete_one(self, filter).await?;
        Ok(result.deleted_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_pool_config() {
        let config = PoolConfig::default();
        assert_eq!(config.min_pool_size, Some(5));
        assert_eq!(config.max_pool_size, Some(20));
        assert_eq!(config.app_name, Some("mongolier".to_string()));
    }

    #[test]
    fn test_ensure_id_keeps_existing() {
        let mut document = doc! { "_id": "ticket-1", "status": "open" };
        assert_eq!(ensure_id(&mut document), Bson::String("ticket-1".to_string()));
        assert_eq!(document.len(), 2);
    }

    #[test]
    fn test_ensure_id_generates_object_id() {
        let mut document = doc! { "status": "open" };
        let id = ensure_id(&mut document);
        assert!(matches!(id, Bson::ObjectId(_)));
        assert_eq!(document.get("_id"), Some(&id));
    }

    fn duplicate_id_write_error() -> mongodb::error::Error {
        let write_error = bson::from_document(doc! {
            "code": 11000,
            "errmsg": "E11000 duplicate key error collection: app.tickets index: _id_ dup key: { _id: 1 }",
        })
        .unwrap();
        ErrorKind::Write(WriteFailure::WriteError(write_error)).into()
    }

    fn duplicate_id_insert_many_error(indexes: &[i32]) -> mongodb::error::Error {
        let write_errors: Vec<Bson> = indexes
            .iter()
            .map(|i| {
                Bson::Document(doc! {
                    "index": *i,
                    "code": 11000,
                    "errmsg": "E11000 duplicate key error collection: app.tickets index: _id_ dup key",
                })
            })
            .collect();
        let insert_err = bson::from_document(doc! {
            "writeErrors": write_errors,
            "writeConcernError": Bson::Null,
        })
        .unwrap();
        ErrorKind::InsertMany(insert_err).into()
    }

    #[test]
    fn test_duplicate_on_first_attempt_is_an_error() {
        let err = duplicate_id_write_error();
        assert!(!landed_on_earlier_attempt(&err, 1, &[true]));
        assert!(landed_on_earlier_attempt(&err, 2, &[true]));
    }

    #[test]
    fn test_duplicate_on_caller_id_is_an_error_even_when_retried() {
        let err = duplicate_id_write_error();
        assert!(!landed_on_earlier_attempt(&err, 2, &[false]));
        assert!(!landed_on_earlier_attempt(&err, 3, &[]));
    }

    #[test]
    fn test_insert_many_duplicates_checked_per_document() {
        let err = duplicate_id_insert_many_error(&[0, 2]);
        assert!(landed_on_earlier_attempt(&err, 2, &[true, false, true]));
        assert!(!landed_on_earlier_attempt(&err, 2, &[true, true, false]));
        assert!(!landed_on_earlier_attempt(&err, 1, &[true, true, true]));
    }

    #[test]
    fn test_other_write_errors_are_not_absorbed() {
        let write_error = bson::from_document(doc! {
            "code": 121,
            "errmsg": "Document failed validation",
        })
        .unwrap();
        let err: mongodb::error::Error = ErrorKind::Write(WriteFailure::WriteError(write_error)).into();
        assert!(!landed_on_earlier_attempt(&err, 2, &[true]));
    }

    #[tokio::test]
    async fn test_invalid_uri_is_configuration_error() {
        let descriptor = ConnectionDescriptor::new("default", "app", "tickets").unwrap();
        let err = MongoConnection::connect(
            "not-a-uri",
            descriptor,
            PoolConfig::default(),
            RetryPolicy::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, MongolierError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_from_client_resolves_names() {
        let client = build_client("mongodb://localhost:27017", &PoolConfig::default())
            .await
            .unwrap();
        let descriptor = ConnectionDescriptor::new("default", "app", "tickets").unwrap();
        let conn = MongoConnection::from_client(client, descriptor, RetryPolicy::default()).unwrap();

        assert_eq!(conn.database().name(), "app");
        assert_eq!(conn.collection().name(), "tickets");
        assert_eq!(DocumentStore::collection_name(&conn), "tickets");

        let sibling = conn.sibling("comments").unwrap();
        assert_eq!(sibling.collection().name(), "comments");
        assert_eq!(sibling.database().name(), "app");
    }

    #[tokio::test]
    async fn test_with_policy() {
        let client = build_client("mongodb://localhost:27017", &PoolConfig::default())
            .await
            .unwrap();
        let descriptor = ConnectionDescriptor::new("default", "app", "tickets").unwrap();
        let conn = MongoConnection::from_client(client, descriptor, RetryPolicy::default()).unwrap();
        let strict = conn.with_policy(RetryPolicy::no_retry());
        assert_eq!(strict.policy().max_attempts, 1);
        assert_eq!(conn.policy().max_attempts, 3);
    }
}
