//! Object filtering for serialization
//!
//! Turns driver documents into JSON objects suitable for templates and API
//! responses: `_id` is dropped (optionally re-exposed as a string `id`) and
//! fields can be whitelisted or blacklisted.

use bson::{doc, oid::ObjectId, Bson, Document};
use mongolier_common::{MongolierError, Result};
use serde_json::{Map, Value};

/// Which top-level fields of a document are exposed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldFilter {
    include: Vec<String>,
    exclude: Vec<String>,
}

impl FieldFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Only expose these fields. An empty list means all fields.
    pub fn include<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.include = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Never expose these fields
    pub fn exclude<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn is_empty(&self) -> bool {
        self.include.is_empty() && self.exclude.is_empty()
    }

    /// True if `field` survives this filter. `_id` always survives so the
    /// serializer can decide what to do with it.
    pub fn allows(&self, field: &str) -> bool {
        if field == "_id" {
            return true;
        }
        if self.exclude.iter().any(|f| f == field) {
            return false;
        }
        self.include.is_empty() || self.include.iter().any(|f| f == field)
    }

    /// Copy of `document` with only the allowed fields
    pub fn apply(&self, document: &Document) -> Document {
        if self.is_empty() {
            return document.clone();
        }
        document
            .iter()
            .filter(|(key, _)| self.allows(key))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }
}

/// How documents are turned into JSON
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerializeOptions {
    /// Expose `_id` as a string under `id_field`
    pub show_id: bool,
    pub id_field: String,
    pub fields: FieldFilter,
}

impl Default for SerializeOptions {
    fn default() -> Self {
        Self {
            show_id: false,
            id_field: "id".to_string(),
            fields: FieldFilter::default(),
        }
    }
}

impl SerializeOptions {
    pub fn with_id() -> Self {
        Self {
            show_id: true,
            ..Default::default()
        }
    }

    pub fn fields(mut self, fields: FieldFilter) -> Self {
        self.fields = fields;
        self
    }
}

/// String form of an `_id`: hex for ObjectIds, the value itself for strings
pub fn id_to_string(id: &Bson) -> String {
    match id {
        Bson::ObjectId(oid) => oid.to_hex(),
        Bson::String(s) => s.clone(),
        Bson::Int32(i) => i.to_string(),
        Bson::Int64(i) => i.to_string(),
        other => other.clone().into_relaxed_extjson().to_string(),
    }
}

/// Serializes one document into a JSON object
pub fn document_to_json(document: &Document, options: &SerializeOptions) -> Value {
    let mut object = Map::new();

    for (key, value) in document {
        if key == "_id" || !options.fields.allows(key) {
            continue;
        }
        object.insert(key.clone(), value.clone().into_relaxed_extjson());
    }

    if options.show_id {
        if let Some(id) = document.get("_id") {
            object.insert(options.id_field.clone(), Value::String(id_to_string(id)));
        }
    }

    Value::Object(object)
}

/// Serializes a list of documents
pub fn documents_to_json(documents: &[Document], options: &SerializeOptions) -> Vec<Value> {
    documents
        .iter()
        .map(|doc| document_to_json(doc, options))
        .collect()
}

/// Parses a JSON object (extended JSON accepted) into a document
pub fn json_to_document(value: Value) -> Result<Document> {
    if !value.is_object() {
        return Err(MongolierError::Validation(
            "Expected a JSON object".to_string(),
        ));
    }
    match Bson::try_from(value) {
        Ok(Bson::Document(document)) => Ok(document),
        Ok(other) => Err(MongolierError::Validation(format!(
            "Expected a JSON object, got {:?}",
            other.element_type()
        ))),
        Err(e) => Err(MongolierError::Deserialization(e.to_string())),
    }
}

/// Interprets an id taken from a URL: 24 hex characters become an ObjectId,
/// anything else stays a string
pub fn parse_id(raw: &str) -> Bson {
    if raw.len() == 24 && raw.chars().all(|c| c.is_ascii_hexdigit()) {
        if let Ok(oid) = ObjectId::parse_str(raw) {
            return Bson::ObjectId(oid);
        }
    }
    Bson::String(raw.to_string())
}

/// `{ "_id": <parsed id> }`
pub fn id_filter(raw: &str) -> Document {
    doc! { "_id": parse_id(raw) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ticket() -> Document {
        doc! {
            "_id": ObjectId::parse_str("65a1f0c2e4b0a1b2c3d4e5f6").unwrap(),
            "title": "Printer on fire",
            "status": "open",
            "priority": 3,
        }
    }

    #[test]
    fn test_id_hidden_by_default() {
        let value = document_to_json(&ticket(), &SerializeOptions::default());
        assert_eq!(
            value,
            json!({ "title": "Printer on fire", "status": "open", "priority": 3 })
        );
    }

    #[test]
    fn test_show_id_exposes_hex_string() {
        let value = document_to_json(&ticket(), &SerializeOptions::with_id());
        assert_eq!(value["id"], json!("65a1f0c2e4b0a1b2c3d4e5f6"));
        assert!(value.get("_id").is_none());
    }

    #[test]
    fn test_custom_id_field() {
        let options = SerializeOptions {
            show_id: true,
            id_field: "pk".to_string(),
            ..Default::default()
        };
        let value = document_to_json(&ticket(), &options);
        assert_eq!(value["pk"], json!("65a1f0c2e4b0a1b2c3d4e5f6"));
    }

    #[test]
    fn test_include_fields() {
        let options = SerializeOptions::with_id().fields(FieldFilter::new().include(["title"]));
        let value = document_to_json(&ticket(), &options);
        assert_eq!(
            value,
            json!({ "title": "Printer on fire", "id": "65a1f0c2e4b0a1b2c3d4e5f6" })
        );
    }

    #[test]
    fn test_exclude_fields() {
        let filter = FieldFilter::new().exclude(["priority", "status"]);
        let filtered = filter.apply(&ticket());
        assert_eq!(filtered.len(), 2);
        assert!(filtered.contains_key("_id"));
        assert!(filtered.contains_key("title"));
    }

    #[test]
    fn test_exclude_wins_over_include() {
        let filter = FieldFilter::new().include(["title", "status"]).exclude(["status"]);
        assert!(filter.allows("title"));
        assert!(!filter.allows("status"));
        assert!(!filter.allows("priority"));
        assert!(filter.allows("_id"));
    }

    #[test]
    fn test_string_and_numeric_ids() {
        assert_eq!(id_to_string(&Bson::String("abc".into())), "abc");
        assert_eq!(id_to_string(&Bson::Int64(42)), "42");
    }

    #[test]
    fn test_json_to_document() {
        let document = json_to_document(json!({
            "_id": { "$oid": "65a1f0c2e4b0a1b2c3d4e5f6" },
            "title": "Printer on fire",
            "tags": ["hardware"],
        }))
        .unwrap();
        assert!(matches!(document.get("_id"), Some(Bson::ObjectId(_))));
        assert_eq!(document.get_str("title").unwrap(), "Printer on fire");
    }

    #[test]
    fn test_json_to_document_rejects_non_objects() {
        assert!(json_to_document(json!([1, 2])).is_err());
        assert!(json_to_document(json!("text")).is_err());
    }

    #[test]
    fn test_parse_id() {
        assert!(matches!(parse_id("65a1f0c2e4b0a1b2c3d4e5f6"), Bson::ObjectId(_)));
        assert_eq!(parse_id("ticket-1"), Bson::String("ticket-1".into()));
        assert_eq!(
            parse_id("65a1f0c2e4b0a1b2c3d4e5fz"),
            Bson::String("65a1f0c2e4b0a1b2c3d4e5fz".into())
        );
        assert_eq!(id_filter("ticket-1"), doc! { "_id": "ticket-1" });
    }
}
