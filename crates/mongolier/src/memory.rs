//! In-memory [`DocumentStore`] for tests
//!
//! Filters match on top-level field equality only; updates understand `$set`
//! and `$unset`. Enough to exercise views and resources without a server.

use crate::query::FindQuery;
use crate::store::DocumentStore;
use async_trait::async_trait;
use bson::{oid::ObjectId, Bson, Document};
use mongolier_common::{MongolierError, Result};
use parking_lot::Mutex;
use std::cmp::Ordering;

#[derive(Debug, Default)]
pub struct MemoryStore {
    name: String,
    documents: Mutex<Vec<Document>>,
}

impl MemoryStore {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            documents: Mutex::new(Vec::new()),
        }
    }

    /// Store pre-filled with `documents`; missing ids are generated
    pub fn with_documents(name: impl Into<String>, documents: Vec<Document>) -> Self {
        let store = Self::new(name);
        {
            let mut stored = store.documents.lock();
            for mut document in documents {
                if !document.contains_key("_id") {
                    document.insert("_id", ObjectId::new());
                }
                stored.push(document);
            }
        }
        store
    }

    /// Snapshot of every stored document
    pub fn all(&self) -> Vec<Document> {
        self.documents.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.documents.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.lock().is_empty()
    }
}

fn matches(document: &Document, filter: &Document) -> bool {
    filter.iter().all(|(key, expected)| match document.get(key) {
        Some(actual) => match expected {
            Bson::Document(op) if op.contains_key("$in") => match op.get("$in") {
                Some(Bson::Array(candidates)) => candidates.iter().any(|c| equals(actual, c)),
                _ => false,
            },
            _ => equals(actual, expected),
        },
        None => false,
    })
}

fn equals(actual: &Bson, expected: &Bson) -> bool {
    match (as_number(actual), as_number(expected)) {
        (Some(a), Some(b)) => a == b,
        _ => actual == expected,
    }
}

fn compare_values(a: Option<&Bson>, b: Option<&Bson>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => match (as_number(a), as_number(b)) {
            (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
            _ => match (a, b) {
                (Bson::String(x), Bson::String(y)) => x.cmp(y),
                (Bson::ObjectId(x), Bson::ObjectId(y)) => x.bytes().cmp(&y.bytes()),
                (Bson::Boolean(x), Bson::Boolean(y)) => x.cmp(y),
                (Bson::DateTime(x), Bson::DateTime(y)) => x.cmp(y),
                _ => Ordering::Equal,
            },
        },
    }
}

fn as_number(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(i) => Some(*i as f64),
        Bson::Int64(i) => Some(*i as f64),
        Bson::Double(d) => Some(*d),
        _ => None,
    }
}

fn sort_documents(documents: &mut [Document], sort: &Document) {
    documents.sort_by(|a, b| {
        for (field, direction) in sort {
            let descending = as_number(direction).map(|d| d < 0.0).unwrap_or(false);
            let ordering = compare_values(a.get(field), b.get(field));
            let ordering = if descending { ordering.reverse() } else { ordering };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });
}

fn select(documents: &[Document], query: &FindQuery) -> Vec<Document> {
    let mut selected: Vec<Document> = documents
        .iter()
        .filter(|doc| matches(doc, query.get_filter()))
        .cloned()
        .collect();

    if let Some(sort) = query.get_sort() {
        sort_documents(&mut selected, sort);
    }

    let skip = query.get_skip().unwrap_or(0) as usize;
    let limit = match query.get_limit() {
        Some(limit) if limit != 0 => limit.unsigned_abs() as usize,
        _ => usize::MAX,
    };

    selected.into_iter().skip(skip).take(limit).collect()
}

fn apply_update(document: &mut Document, update: &Document) -> Result<()> {
    for (operator, fields) in update {
        let Bson::Document(fields) = fields else {
            return Err(MongolierError::Validation(format!(
                "Update operator '{}' expects a document",
                operator
            )));
        };
        match operator.as_str() {
            "$set" => {
                for (key, value) in fields {
                    document.insert(key.clone(), value.clone());
                }
            }
            "$unset" => {
                for key in fields.keys() {
                    document.remove(key);
                }
            }
            other => {
                return Err(MongolierError::Validation(format!(
                    "Unsupported update operator: '{}'",
                    other
                )))
            }
        }
    }
    Ok(())
}

#[async_trait]
impl DocumentStore for MemoryStore {
    fn collection_name(&self) -> &str {
        &self.name
    }

    async fn find(&self, query: &FindQuery) -> Result<Vec<Document>> {
        Ok(select(&self.documents.lock(), query))
    }

    async fn find_one(&self, query: &FindQuery) -> Result<Option<Document>> {
        let query = query.clone().limit(1);
        Ok(select(&self.documents.lock(), &query).into_iter().next())
    }

    async fn count(&self, filter: &Document) -> Result<u64> {
        let documents = self.documents.lock();
        Ok(documents.iter().filter(|doc| matches(doc, filter)).count() as u64)
    }

    async fn insert_one(&self, mut document: Document) -> Result<Bson> {
        let id = match document.get("_id") {
            Some(id) => id.clone(),
            None => {
                let id = Bson::ObjectId(ObjectId::new());
                document.insert("_id", id.clone());
                id
            }
        };

        let mut documents = self.documents.lock();
        if documents.iter().any(|doc| doc.get("_id") == Some(&id)) {
            return Err(MongolierError::Validation(format!(
                "E11000 duplicate key error index: _id_ dup key: {}",
                id
            )));
        }
        documents.push(document);
        Ok(id)
    }

    async fn replace_one(&self, filter: &Document, mut replacement: Document) -> Result<u64> {
        let mut documents = self.documents.lock();
        let Some(existing) = documents.iter_mut().find(|doc| matches(doc, filter)) else {
            return Ok(0);
        };
        if let Some(id) = existing.get("_id").cloned() {
            replacement.insert("_id", id);
        }
        *existing = replacement;
        Ok(1)
    }

    async fn update_one(&self, filter: &Document, update: Document) -> Result<u64> {
        let mut documents = self.documents.lock();
        let Some(existing) = documents.iter_mut().find(|doc| matches(doc, filter)) else {
            return Ok(0);
        };
        apply_update(existing, &update)?;
        Ok(1)
    }

    async fn delete_one(&self, filter: &Document) -> Result<u64> {
        let mut documents = self.documents.lock();
        match documents.iter().position(|doc| matches(doc, filter)) {
            Some(index) => {
                documents.remove(index);
                Ok(1)
            }
            None => Ok(0),
        }
    }
}
