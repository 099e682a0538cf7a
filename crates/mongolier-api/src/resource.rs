//! JSON REST resource over a collection
//!
//! Routes, relative to wherever the router is nested:
//!
//! | Method   | Path    | Action                         |
//! |----------|---------|--------------------------------|
//! | `GET`    | `/`     | paginated, filtered list       |
//! | `POST`   | `/`     | create, `201 {"id": ...}`      |
//! | `GET`    | `/{id}` | one object                     |
//! | `PUT`    | `/{id}` | replace                        |
//! | `PATCH`  | `/{id}` | `$set` the given fields        |
//! | `DELETE` | `/{id}` | delete, `204`                  |
//!
//! List query parameters: `page`, `limit`, `ordering=a,-b`; anything else is
//! an equality filter. Errors are `{"detail": "..."}`.

use crate::error::{ApiError, ApiResult};
use crate::pagination::{PageOutcome, Paginator};
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{Method, StatusCode};
use axum::routing::get;
use axum::{Json, Router};
use bson::{doc, Bson, Document};
use mongolier::filters::{document_to_json, documents_to_json, id_filter, id_to_string, json_to_document, parse_id};
use mongolier::validation::{validate_field_name, validate_filter};
use mongolier::{DocumentStore, FieldFilter, FindQuery, PaginationSettings, SerializeOptions};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

const ID_FIELD: &str = "id";

/// A collection exposed over HTTP
#[derive(Clone)]
pub struct Resource {
    store: Arc<dyn DocumentStore>,
    fields: FieldFilter,
    per_page: u64,
    max_limit: u64,
    allowed_methods: Vec<Method>,
}

impl std::fmt::Debug for Resource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resource")
            .field("collection", &self.store.collection_name())
            .field("fields", &self.fields)
            .field("per_page", &self.per_page)
            .field("max_limit", &self.max_limit)
            .field("allowed_methods", &self.allowed_methods)
            .finish()
    }
}

struct ListParams {
    page: Option<String>,
    limit: u64,
    sort: Option<Document>,
    filter: Document,
}

impl Resource {
    /// Resource allowing every method, with default pagination
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        let pagination = PaginationSettings::default();
        Self {
            store,
            fields: FieldFilter::default(),
            per_page: pagination.per_page,
            max_limit: pagination.max_limit,
            allowed_methods: vec![
                Method::GET,
                Method::POST,
                Method::PUT,
                Method::PATCH,
                Method::DELETE,
            ],
        }
    }

    /// Fields exposed in responses and usable in filters and ordering
    pub fn fields(mut self, fields: FieldFilter) -> Self {
        self.fields = fields;
        self
    }

    pub fn pagination(mut self, settings: &PaginationSettings) -> Self {
        self.per_page = settings.per_page.max(1);
        self.max_limit = settings.max_limit.max(1);
        self
    }

    pub fn allowed_methods<I>(mut self, methods: I) -> Self
    where
        I: IntoIterator<Item = Method>,
    {
        self.allowed_methods = methods.into_iter().collect();
        self
    }

    /// Router with the resource routes mounted at `/` and `/{id}`
    pub fn router(self) -> Router {
        Router::new()
            .route("/", get(list).post(create))
            .route(
                "/{id}",
                get(retrieve).put(replace).patch(partial_update).delete(destroy),
            )
            .with_state(Arc::new(self))
    }

    fn ensure_allowed(&self, method: &Method) -> ApiResult<()> {
        if self.allowed_methods.contains(method) {
            Ok(())
        } else {
            Err(ApiError::MethodNotAllowed(method.to_string()))
        }
    }

    fn serialize_options(&self) -> SerializeOptions {
        SerializeOptions::with_id().fields(self.fields.clone())
    }

    /// Maps a public field name to the stored one, rejecting unknown or
    /// hidden fields
    fn stored_field(&self, name: &str) -> ApiResult<String> {
        if name == ID_FIELD {
            return Ok("_id".to_string());
        }
        validate_field_name(name)?;
        if !self.fields.allows(name) || name == "_id" {
            return Err(ApiError::BadRequest(format!("Unknown field '{}'.", name)));
        }
        Ok(name.to_string())
    }

    fn parse_ordering(&self, raw: &str) -> ApiResult<Option<Document>> {
        let mut sort = Document::new();
        for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (name, direction) = match part.strip_prefix('-') {
                Some(name) => (name, -1),
                None => (part, 1),
            };
            sort.insert(self.stored_field(name)?, direction);
        }
        Ok((!sort.is_empty()).then_some(sort))
    }

    fn list_params(&self, pairs: Vec<(String, String)>) -> ApiResult<ListParams> {
        let mut params = ListParams {
            page: None,
            limit: self.per_page,
            sort: None,
            filter: Document::new(),
        };

        for (key, value) in pairs {
            match key.as_str() {
                "page" => params.page = Some(value),
                "limit" => {
                    let limit: u64 = value.trim().parse().map_err(|_| {
                        ApiError::BadRequest(format!("Invalid limit '{}'.", value))
                    })?;
                    if limit == 0 {
                        return Err(ApiError::BadRequest("Limit must be positive.".to_string()));
                    }
                    params.limit = limit.min(self.max_limit);
                }
                "ordering" => params.sort = self.parse_ordering(&value)?,
                _ => {
                    let field = self.stored_field(&key)?;
                    let value = if field == "_id" {
                        parse_id(&value)
                    } else {
                        query_value(&value)
                    };
                    params.filter.insert(field, value);
                }
            }
        }

        validate_filter(&params.filter)?;
        Ok(params)
    }
}

/// Filter value for one query-string pair.
///
/// Values that read as integers or booleans match either the typed value or
/// the raw string, so digit-only string fields (zip codes, SKUs) still match.
fn query_value(raw: &str) -> Bson {
    let typed = if let Ok(i) = raw.parse::<i64>() {
        Bson::Int64(i)
    } else {
        match raw {
            "true" => Bson::Boolean(true),
            "false" => Bson::Boolean(false),
            _ => return Bson::String(raw.to_string()),
        }
    };
    Bson::Document(doc! { "$in": [typed, raw] })
}

fn parse_body(body: &Bytes) -> ApiResult<Document> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|e| ApiError::BadRequest(format!("Malformed JSON: {}", e)))?;
    let document = json_to_document(value)?;
    for key in document.keys() {
        if key != "_id" {
            validate_field_name(key)?;
        }
    }
    Ok(document)
}

/// Body of a PUT or PATCH: the URL decides the id
fn parse_update_body(body: &Bytes) -> ApiResult<Document> {
    let mut document = parse_body(body)?;
    document.remove("_id");
    document.remove(ID_FIELD);
    Ok(document)
}

fn not_found() -> ApiError {
    ApiError::NotFound("Not found.".to_string())
}

async fn list(
    State(resource): State<Arc<Resource>>,
    Query(pairs): Query<Vec<(String, String)>>,
) -> ApiResult<Json<Value>> {
    resource.ensure_allowed(&Method::GET)?;
    let params = resource.list_params(pairs)?;

    let total = resource.store.count(&params.filter).await?;
    let page = match Paginator::new(params.limit).paginate(total, params.page.as_deref())? {
        PageOutcome::Page(page) => page,
        PageOutcome::Redirect(_) => return Err(ApiError::NotFound("Invalid page.".to_string())),
    };

    let query = FindQuery::new(params.filter)
        .sort_opt(params.sort)
        .skip(page.offset)
        .limit(page.limit());
    let documents = resource.store.find(&query).await?;
    debug!(
        collection = resource.store.collection_name(),
        total = total,
        page = page.number,
        returned = documents.len(),
        "Listed objects"
    );

    Ok(Json(json!({
        "meta": {
            "total_count": total,
            "page": page.number,
            "pages": page.pages,
            "limit": page.per_page,
        },
        "objects": documents_to_json(&documents, &resource.serialize_options()),
    })))
}

async fn create(
    State(resource): State<Arc<Resource>>,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<Value>)> {
    resource.ensure_allowed(&Method::POST)?;
    let mut document = parse_body(&body)?;

    if let Some(id) = document.remove(ID_FIELD) {
        if !document.contains_key("_id") {
            let id = match id {
                Bson::String(raw) => parse_id(&raw),
                other => other,
            };
            document.insert("_id", id);
        }
    }

    let id = resource.store.insert_one(document).await?;
    debug!(collection = resource.store.collection_name(), id = %id, "Created object");
    Ok((StatusCode::CREATED, Json(json!({ "id": id_to_string(&id) }))))
}

async fn retrieve(
    State(resource): State<Arc<Resource>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    resource.ensure_allowed(&Method::GET)?;
    let document = resource
        .store
        .find_one(&FindQuery::new(id_filter(&id)))
        .await?
        .ok_or_else(not_found)?;
    Ok(Json(document_to_json(&document, &resource.serialize_options())))
}

async fn replace(
    State(resource): State<Arc<Resource>>,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    resource.ensure_allowed(&Method::PUT)?;
    let document = parse_update_body(&body)?;
    let filter = id_filter(&id);

    if resource.store.replace_one(&filter, document).await? == 0 {
        return Err(not_found());
    }
    fetch_updated(&resource, filter).await
}

async fn partial_update(
    State(resource): State<Arc<Resource>>,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    resource.ensure_allowed(&Method::PATCH)?;
    let fields = parse_update_body(&body)?;
    if fields.is_empty() {
        return Err(ApiError::BadRequest("Nothing to update.".to_string()));
    }
    let filter = id_filter(&id);

    if resource.store.update_one(&filter, doc! { "$set": fields }).await? == 0 {
        return Err(not_found());
    }
    fetch_updated(&resource, filter).await
}

async fn fetch_updated(resource: &Resource, filter: Document) -> ApiResult<Json<Value>> {
    let document = resource
        .store
        .find_one(&FindQuery::new(filter))
        .await?
        .ok_or_else(not_found)?;
    Ok(Json(document_to_json(&document, &resource.serialize_options())))
}

async fn destroy(
    State(resource): State<Arc<Resource>>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    resource.ensure_allowed(&Method::DELETE)?;
    if resource.store.delete_one(&id_filter(&id)).await? == 0 {
        return Err(not_found());
    }
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use axum::response::Response;
    use http_body_util::BodyExt;
    use mongolier::MemoryStore;
    use tower::ServiceExt;

    fn store() -> Arc<MemoryStore> {
        Arc::new(MemoryStore::with_documents(
            "tickets",
            vec![
                doc! { "_id": "t1", "title": "Printer on fire", "status": "open", "priority": 3, "secret": "x" },
                doc! { "_id": "t2", "title": "Mouse missing", "status": "closed", "priority": 1, "secret": "y" },
                doc! { "_id": "t3", "title": "Coffee machine", "status": "open", "priority": 2, "secret": "z" },
            ],
        ))
    }

    async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> Response {
        let request = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => request
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => request.body(Body::empty()).unwrap(),
        };
        app.clone().oneshot(request).await.unwrap()
    }

    async fn json_body(response: Response) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_list_with_meta() {
        let app = Resource::new(store()).router();
        let response = send(&app, Method::GET, "/?ordering=-priority", None).await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = json_body(response).await;
        assert_eq!(
            body["meta"],
            json!({ "total_count": 3, "page": 1, "pages": 1, "limit": 25 })
        );
        let ids: Vec<&str> = body["objects"]
            .as_array()
            .unwrap()
            .iter()
            .map(|o| o["id"].as_str().unwrap())
            .collect();
        assert_eq!(ids, vec!["t1", "t3", "t2"]);
    }

    #[tokio::test]
    async fn test_list_filters_and_limit() {
        let app = Resource::new(store()).router();
        let body = json_body(send(&app, Method::GET, "/?status=open&limit=1&page=2&ordering=priority", None).await).await;
        assert_eq!(body["meta"]["total_count"], json!(2));
        assert_eq!(body["meta"]["pages"], json!(2));
        assert_eq!(body["objects"][0]["id"], json!("t1"));

        let body = json_body(send(&app, Method::GET, "/?priority=1", None).await).await;
        assert_eq!(body["objects"][0]["id"], json!("t2"));
    }

    #[tokio::test]
    async fn test_digit_strings_match_string_fields() {
        let places = Arc::new(MemoryStore::with_documents(
            "places",
            vec![
                doc! { "_id": "a", "zip": "02134", "active": "true" },
                doc! { "_id": "b", "zip": "123", "active": true },
                doc! { "_id": "c", "zip": 123 },
            ],
        ));
        let app = Resource::new(places).router();

        let body = json_body(send(&app, Method::GET, "/?zip=02134", None).await).await;
        assert_eq!(body["meta"]["total_count"], json!(1));
        assert_eq!(body["objects"][0]["id"], json!("a"));

        let body = json_body(send(&app, Method::GET, "/?zip=123&ordering=id", None).await).await;
        assert_eq!(body["meta"]["total_count"], json!(2));
        assert_eq!(body["objects"][0]["id"], json!("b"));
        assert_eq!(body["objects"][1]["id"], json!("c"));

        let body = json_body(send(&app, Method::GET, "/?active=true", None).await).await;
        assert_eq!(body["meta"]["total_count"], json!(2));
    }

    #[tokio::test]
    async fn test_limit_is_capped() {
        let settings = PaginationSettings { per_page: 2, max_limit: 2 };
        let app = Resource::new(store()).pagination(&settings).router();
        let body = json_body(send(&app, Method::GET, "/?limit=500", None).await).await;
        assert_eq!(body["meta"]["limit"], json!(2));
        assert_eq!(body["objects"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_unbounded_limit_returns_everything() {
        let settings = PaginationSettings { per_page: u64::MAX, max_limit: u64::MAX };
        let app = Resource::new(store()).pagination(&settings).router();
        let body = json_body(send(&app, Method::GET, "/?limit=18446744073709551615", None).await).await;
        assert_eq!(body["meta"]["pages"], json!(1));
        assert_eq!(body["objects"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_list_rejects_bad_params() {
        let app = Resource::new(store()).fields(FieldFilter::new().exclude(["secret"])).router();

        let response = send(&app, Method::GET, "/?limit=abc", None).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = send(&app, Method::GET, "/?secret=x", None).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["detail"], json!("Unknown field 'secret'."));

        let response = send(&app, Method::GET, "/?%24where=1", None).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = send(&app, Method::GET, "/?page=9", None).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_fields_hidden_from_objects() {
        let app = Resource::new(store()).fields(FieldFilter::new().exclude(["secret"])).router();
        let body = json_body(send(&app, Method::GET, "/t1", None).await).await;
        assert_eq!(body["title"], json!("Printer on fire"));
        assert!(body.get("secret").is_none());
        assert_eq!(body["id"], json!("t1"));
    }

    #[tokio::test]
    async fn test_create_and_retrieve() {
        let store = store();
        let app = Resource::new(store.clone()).router();

        let response = send(&app, Method::POST, "/", Some(json!({ "title": "Desk wobbles" }))).await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let id = json_body(response).await["id"].as_str().unwrap().to_string();
        assert_eq!(id.len(), 24);
        assert_eq!(store.len(), 4);

        let response = send(&app, Method::GET, &format!("/{}", id), None).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["title"], json!("Desk wobbles"));
    }

    #[tokio::test]
    async fn test_create_with_explicit_id() {
        let app = Resource::new(store()).router();
        let response = send(&app, Method::POST, "/", Some(json!({ "id": "t9", "title": "Lamp" }))).await;
        assert_eq!(json_body(response).await, json!({ "id": "t9" }));

        let response = send(&app, Method::POST, "/", Some(json!({ "id": "t9" }))).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_create_rejects_bad_bodies() {
        let app = Resource::new(store()).router();
        let response = send(&app, Method::POST, "/", Some(json!([1, 2]))).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = send(&app, Method::POST, "/", Some(json!({ "$set": { "a": 1 } }))).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_replace_and_patch() {
        let store = store();
        let app = Resource::new(store.clone()).router();

        let response = send(&app, Method::PUT, "/t2", Some(json!({ "title": "Mouse found", "id": "ignored" }))).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await, json!({ "title": "Mouse found", "id": "t2" }));

        let response = send(&app, Method::PATCH, "/t1", Some(json!({ "status": "closed" }))).await;
        let body = json_body(response).await;
        assert_eq!(body["status"], json!("closed"));
        assert_eq!(body["title"], json!("Printer on fire"));

        let response = send(&app, Method::PATCH, "/t1", Some(json!({}))).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = send(&app, Method::PUT, "/missing", Some(json!({ "title": "x" }))).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_delete() {
        let store = store();
        let app = Resource::new(store.clone()).router();

        let response = send(&app, Method::DELETE, "/t3", None).await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(store.len(), 2);

        let response = send(&app, Method::DELETE, "/t3", None).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(json_body(response).await, json!({ "detail": "Not found." }));
    }

    #[tokio::test]
    async fn test_disallowed_method() {
        let store = store();
        let app = Resource::new(store.clone())
            .allowed_methods([Method::GET])
            .router();

        let response = send(&app, Method::DELETE, "/t1", None).await;
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(store.len(), 3);

        let response = send(&app, Method::GET, "/t1", None).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn test_parse_scalar() {
        assert_eq!(parse_scalar("42"), Bson::Int64(42));
        assert_eq!(parse_scalar("true"), Bson::Boolean(true));
        assert_eq!(parse_scalar("open"), Bson::String("open".into()));
    }
}
