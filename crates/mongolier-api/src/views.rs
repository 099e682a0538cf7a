//! Class-based views over a collection
//!
//! Three views are provided:
//! - [`ListView`]: paginated list, items expose `id`
//! - [`PagelessListView`]: every match in one page
//! - [`DetailView`]: a single document
//!
//! A view resolves a [`ViewRequest`] into a [`ViewResponse`]: either a
//! template plus its context, or a redirect (when the requested page is out of
//! range). Turning the template into bytes is the job of a [`Renderer`].
//!
//! ```no_run
//! use std::sync::Arc;
//! use axum::Router;
//! use bson::doc;
//! use mongolier::MemoryStore;
//! use mongolier_api::views::{view_route, JsonRenderer, ListView, ViewConfig};
//!
//! let store = Arc::new(MemoryStore::new("tickets"));
//! let view = ListView::new(ViewConfig::new(store).sort(doc! { "number": -1 })).per_page(10);
//! let app: Router = Router::new().route("/tickets/{status}", view_route(Arc::new(view), Arc::new(JsonRenderer)));
//! ```

use crate::error::{ApiError, ApiResult};
use crate::pagination::{PageOutcome, Paginator};
use async_trait::async_trait;
use axum::extract::{OriginalUri, Path, Query};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, MethodRouter};
use axum::Json;
use bson::{Bson, Document};
use mongolier::filters::{document_to_json, documents_to_json, SerializeOptions};
use mongolier::validation::{validate_field_name, validate_filter};
use mongolier::{DocumentStore, FindQuery, DEFAULT_PAGINATION};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

const EMPTY_LIST: &str = "List is empty.";

/// What a view sees of an incoming request
#[derive(Debug, Clone, Default)]
pub struct ViewRequest {
    /// Request path, used to build pagination redirects
    pub path: String,
    /// Query string parameters
    pub query: HashMap<String, String>,
    /// Named URL captures; they become part of the filter
    pub kwargs: Document,
}

impl ViewRequest {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn query_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(key.into(), value.into());
        self
    }

    pub fn kwarg(mut self, key: impl Into<String>, value: impl Into<Bson>) -> Self {
        self.kwargs.insert(key.into(), value.into());
        self
    }

    /// Raw `page` query value, if any
    pub fn page(&self) -> Option<&str> {
        self.query.get("page").map(String::as_str)
    }
}

/// A template to render and its context
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateResponse {
    pub template_name: String,
    pub context: Map<String, Value>,
}

/// Outcome of a view
#[derive(Debug, Clone, PartialEq)]
pub enum ViewResponse {
    Render(TemplateResponse),
    /// Location to send the client to (302)
    Redirect(String),
}

impl ViewResponse {
    pub fn into_response_with(self, renderer: &dyn Renderer) -> Response {
        match self {
            ViewResponse::Render(template) => match renderer.render(template) {
                Ok(response) => response,
                Err(e) => e.into_response(),
            },
            ViewResponse::Redirect(location) => {
                (StatusCode::FOUND, [(header::LOCATION, location)]).into_response()
            }
        }
    }
}

/// Turns a [`TemplateResponse`] into an HTTP response
pub trait Renderer: Send + Sync {
    fn render(&self, template: TemplateResponse) -> ApiResult<Response>;
}

/// Renders `{"template": ..., "context": ...}` as JSON. Useful for APIs and
/// tests; plug a template engine in through [`Renderer`] for HTML.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonRenderer;

impl Renderer for JsonRenderer {
    fn render(&self, template: TemplateResponse) -> ApiResult<Response> {
        Ok(Json(json!({
            "template": template.template_name,
            "context": template.context,
        }))
        .into_response())
    }
}

/// Settings shared by every view type
#[derive(Clone)]
pub struct ViewConfig {
    store: Arc<dyn DocumentStore>,
    sort: Option<Document>,
    query: Option<Document>,
    context_object_name: Option<String>,
    template_name: Option<String>,
}

impl std::fmt::Debug for ViewConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ViewConfig")
            .field("collection", &self.store.collection_name())
            .field("sort", &self.sort)
            .field("query", &self.query)
            .field("context_object_name", &self.context_object_name)
            .field("template_name", &self.template_name)
            .finish()
    }
}

impl ViewConfig {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            sort: None,
            query: None,
            context_object_name: None,
            template_name: None,
        }
    }

    pub fn sort(mut self, sort: Document) -> Self {
        self.sort = Some(sort);
        self
    }

    /// Base filter; its keys win over URL captures of the same name
    pub fn query(mut self, query: Document) -> Self {
        self.query = Some(query);
        self
    }

    /// Extra context key holding the results
    pub fn context_object_name(mut self, name: impl Into<String>) -> Self {
        self.context_object_name = Some(name.into());
        self
    }

    pub fn template_name(mut self, name: impl Into<String>) -> Self {
        self.template_name = Some(name.into());
        self
    }

    fn filter(&self, kwargs: &Document) -> ApiResult<Document> {
        let mut filter = Document::new();
        for (key, value) in kwargs {
            validate_field_name(key)?;
            filter.insert(key.clone(), value.clone());
        }
        if let Some(query) = &self.query {
            for (key, value) in query {
                filter.insert(key.clone(), value.clone());
            }
        }
        validate_filter(&filter)?;
        Ok(filter)
    }

    fn resolve_template_name(&self, class_type: &str) -> String {
        match &self.template_name {
            Some(name) => name.clone(),
            None => {
                let collection = self.store.collection_name();
                format!("{}/{}_{}.html", collection, collection, class_type)
            }
        }
    }

    fn context(&self, results: Value, kwargs: &Document) -> Map<String, Value> {
        let mut context = Map::new();
        context.insert("object_list".to_string(), results.clone());
        for (key, value) in kwargs {
            context.insert(key.clone(), value.clone().into_relaxed_extjson());
        }
        if let Some(name) = &self.context_object_name {
            context.insert(name.clone(), results);
        }
        context
    }
}

/// A view that can be mounted on a GET route
#[async_trait]
pub trait View: Send + Sync {
    /// `list` or `detail`; part of the default template name
    fn class_type(&self) -> &'static str;

    fn template_name(&self) -> String;

    async fn get(&self, request: &ViewRequest) -> ApiResult<ViewResponse>;
}

/// Paginated list view
#[derive(Debug, Clone)]
pub struct ListView {
    config: ViewConfig,
    paginator: Paginator,
}

impl ListView {
    pub fn new(config: ViewConfig) -> Self {
        Self {
            config,
            paginator: Paginator::new(DEFAULT_PAGINATION),
        }
    }

    pub fn per_page(mut self, per_page: u64) -> Self {
        self.paginator = Paginator::new(per_page);
        self
    }
}

#[async_trait]
impl View for ListView {
    fn class_type(&self) -> &'static str {
        "list"
    }

    fn template_name(&self) -> String {
        self.config.resolve_template_name(self.class_type())
    }

    async fn get(&self, request: &ViewRequest) -> ApiResult<ViewResponse> {
        let filter = self.config.filter(&request.kwargs)?;
        let total = self.config.store.count(&filter).await?;

        let page = match self.paginator.paginate(total, request.page())? {
            PageOutcome::Page(page) => page,
            PageOutcome::Redirect(number) => {
                debug!(path = %request.path, page = number, "Redirecting out-of-range page");
                return Ok(ViewResponse::Redirect(format!("{}?page={}", request.path, number)));
            }
        };

        let query = FindQuery::new(filter)
            .sort_opt(self.config.sort.clone())
            .skip(page.offset)
            .limit(page.limit());
        let documents = self.config.store.find(&query).await?;
        if documents.is_empty() {
            return Err(ApiError::NotFound(EMPTY_LIST.to_string()));
        }

        let items = documents_to_json(&documents, &SerializeOptions::with_id());
        let mut context = self.config.context(Value::Array(items), &request.kwargs);
        context.insert("page".to_string(), json!(page.number));
        context.insert("pages".to_string(), json!(page.pages));
        context.insert("page_range".to_string(), json!(page.page_range()));
        context.insert("previous_page_number".to_string(), json!(page.previous_page_number));
        context.insert("next_page_number".to_string(), json!(page.next_page_number));

        Ok(ViewResponse::Render(TemplateResponse {
            template_name: self.template_name(),
            context,
        }))
    }
}

/// Every matching document in one response
#[derive(Debug, Clone)]
pub struct PagelessListView {
    config: ViewConfig,
    show_id: bool,
}

impl PagelessListView {
    pub fn new(config: ViewConfig) -> Self {
        Self {
            config,
            show_id: false,
        }
    }

    /// Expose each document's `_id` as a string `id`
    pub fn show_id(mut self, show_id: bool) -> Self {
        self.show_id = show_id;
        self
    }
}

#[async_trait]
impl View for PagelessListView {
    fn class_type(&self) -> &'static str {
        "list"
    }

    fn template_name(&self) -> String {
        self.config.resolve_template_name(self.class_type())
    }

    async fn get(&self, request: &ViewRequest) -> ApiResult<ViewResponse> {
        let query = FindQuery::new(self.config.filter(&request.kwargs)?)
            .sort_opt(self.config.sort.clone());
        let documents = self.config.store.find(&query).await?;
        if documents.is_empty() {
            return Err(ApiError::NotFound(EMPTY_LIST.to_string()));
        }

        let options = SerializeOptions {
            show_id: self.show_id,
            ..Default::default()
        };
        let items = documents_to_json(&documents, &options);

        Ok(ViewResponse::Render(TemplateResponse {
            template_name: self.template_name(),
            context: self.config.context(Value::Array(items), &request.kwargs),
        }))
    }
}

/// A single document
#[derive(Debug, Clone)]
pub struct DetailView {
    config: ViewConfig,
}

impl DetailView {
    pub fn new(config: ViewConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl View for DetailView {
    fn class_type(&self) -> &'static str {
        "detail"
    }

    fn template_name(&self) -> String {
        self.config.resolve_template_name(self.class_type())
    }

    async fn get(&self, request: &ViewRequest) -> ApiResult<ViewResponse> {
        let query = FindQuery::new(self.config.filter(&request.kwargs)?)
            .sort_opt(self.config.sort.clone());
        let document = self
            .config
            .store
            .find_one(&query)
            .await?
            .ok_or_else(|| ApiError::NotFound(EMPTY_LIST.to_string()))?;

        let object = document_to_json(&document, &SerializeOptions::with_id());

        Ok(ViewResponse::Render(TemplateResponse {
            template_name: self.template_name(),
            context: self.config.context(object, &request.kwargs),
        }))
    }
}

/// GET route serving `view`. Path captures become string kwargs.
pub fn view_route(view: Arc<dyn View>, renderer: Arc<dyn Renderer>) -> MethodRouter {
    get(
        move |params: Option<Path<HashMap<String, String>>>,
              Query(query): Query<HashMap<String, String>>,
              OriginalUri(uri): OriginalUri| {
            let view = view.clone();
            let renderer = renderer.clone();
            async move {
                let mut request = ViewRequest::new(uri.path());
                request.query = query;
                if let Some(Path(params)) = params {
                    for (key, value) in params {
                        request.kwargs.insert(key, value);
                    }
                }

                match view.get(&request).await {
                    Ok(response) => response.into_response_with(renderer.as_ref()),
                    Err(e) => e.into_response(),
                }
            }
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use axum::Router;
    use bson::doc;
    use http_body_util::BodyExt;
    use mongolier::MemoryStore;
    use tower::ServiceExt;

    fn tickets(count: i32) -> Arc<MemoryStore> {
        let documents = (1..=count)
            .map(|n| {
                let status = if n % 2 == 0 { "closed" } else { "open" };
                doc! {
                    "number": n,
                    "status": status,
                    "title": format!("Ticket {}", n),
                }
            })
            .collect();
        Arc::new(MemoryStore::with_documents("tickets", documents))
    }

    fn render(response: ViewResponse) -> TemplateResponse {
        match response {
            ViewResponse::Render(template) => template,
            ViewResponse::Redirect(location) => panic!("unexpected redirect to {}", location),
        }
    }

    #[test]
    fn test_default_template_names() {
        let store = tickets(1);
        let list = ListView::new(ViewConfig::new(store.clone()));
        assert_eq!(list.template_name(), "tickets/tickets_list.html");

        let detail = DetailView::new(ViewConfig::new(store.clone()));
        assert_eq!(detail.template_name(), "tickets/tickets_detail.html");

        let custom = PagelessListView::new(ViewConfig::new(store).template_name("board.html"));
        assert_eq!(custom.template_name(), "board.html");
    }

    #[tokio::test]
    async fn test_list_view_first_page() {
        let view = ListView::new(ViewConfig::new(tickets(30)).sort(doc! { "number": 1 }))
            .per_page(10);
        let template = render(view.get(&ViewRequest::new("/tickets/")).await.unwrap());

        let context = &template.context;
        assert_eq!(context["page"], json!(1));
        assert_eq!(context["pages"], json!(3));
        assert_eq!(context["page_range"], json!([1, 2, 3]));
        assert_eq!(context["previous_page_number"], Value::Null);
        assert_eq!(context["next_page_number"], json!(2));

        let items = context["object_list"].as_array().unwrap();
        assert_eq!(items.len(), 10);
        assert_eq!(items[0]["number"], json!(1));
        assert!(items[0].get("id").is_some());
        assert!(items[0].get("_id").is_none());
    }

    #[tokio::test]
    async fn test_list_view_last_page_offset() {
        let view = ListView::new(ViewConfig::new(tickets(30)).sort(doc! { "number": 1 }))
            .per_page(10);
        let request = ViewRequest::new("/tickets/").query_param("page", "3");
        let template = render(view.get(&request).await.unwrap());

        let items = template.context["object_list"].as_array().unwrap();
        assert_eq!(items[0]["number"], json!(21));
        assert_eq!(template.context["previous_page_number"], json!(2));
        assert_eq!(template.context["next_page_number"], Value::Null);
    }

    #[tokio::test]
    async fn test_list_view_redirects_out_of_range() {
        let view = ListView::new(ViewConfig::new(tickets(30))).per_page(10);

        let low = view
            .get(&ViewRequest::new("/tickets/").query_param("page", "0"))
            .await
            .unwrap();
        assert_eq!(low, ViewResponse::Redirect("/tickets/?page=1".to_string()));

        let high = view
            .get(&ViewRequest::new("/tickets/").query_param("page", "7"))
            .await
            .unwrap();
        assert_eq!(high, ViewResponse::Redirect("/tickets/?page=3".to_string()));
    }

    #[tokio::test]
    async fn test_list_view_bad_page_and_empty() {
        let view = ListView::new(ViewConfig::new(tickets(5)));
        let err = view
            .get(&ViewRequest::new("/").query_param("page", "abc"))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 404);

        let empty = ListView::new(ViewConfig::new(Arc::new(MemoryStore::new("tickets"))));
        let err = empty.get(&ViewRequest::new("/")).await.unwrap_err();
        assert_eq!(err.to_string(), "List is empty.");
    }

    #[tokio::test]
    async fn test_kwargs_filter_and_context() {
        let view = PagelessListView::new(
            ViewConfig::new(tickets(6))
                .sort(doc! { "number": -1 })
                .context_object_name("tickets"),
        );
        let request = ViewRequest::new("/tickets/open/").kwarg("status", "open");
        let template = render(view.get(&request).await.unwrap());

        let items = template.context["object_list"].as_array().unwrap();
        let numbers: Vec<i64> = items.iter().map(|i| i["number"].as_i64().unwrap()).collect();
        assert_eq!(numbers, vec![5, 3, 1]);
        assert!(items[0].get("id").is_none());
        assert_eq!(template.context["tickets"], template.context["object_list"]);
        assert_eq!(template.context["status"], json!("open"));
    }

    #[tokio::test]
    async fn test_base_query_wins_over_kwargs() {
        let view = PagelessListView::new(
            ViewConfig::new(tickets(6)).query(doc! { "status": "closed" }),
        )
        .show_id(true);
        let request = ViewRequest::new("/").kwarg("status", "open");
        let template = render(view.get(&request).await.unwrap());

        let items = template.context["object_list"].as_array().unwrap();
        assert_eq!(items.len(), 3);
        assert!(items.iter().all(|i| i["status"] == json!("closed")));
        assert!(items[0].get("id").is_some());
    }

    #[tokio::test]
    async fn test_script_operators_are_rejected() {
        let view = PagelessListView::new(
            ViewConfig::new(tickets(6)).query(doc! { "$where": "this.number > 2" }),
        );
        let err = view.get(&ViewRequest::new("/")).await.unwrap_err();
        assert_eq!(err.status_code(), 400);

        let view = ListView::new(ViewConfig::new(tickets(6)));
        let err = view
            .get(&ViewRequest::new("/").kwarg("$where", "sleep(1000)"))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 400);
    }

    #[tokio::test]
    async fn test_detail_view() {
        let view = DetailView::new(ViewConfig::new(tickets(4)).context_object_name("ticket"));
        let template = render(
            view.get(&ViewRequest::new("/").kwarg("number", 3))
                .await
                .unwrap(),
        );
        assert_eq!(template.template_name, "tickets/tickets_detail.html");
        assert_eq!(template.context["ticket"]["title"], json!("Ticket 3"));

        let err = view
            .get(&ViewRequest::new("/").kwarg("number", 99))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 404);
    }

    #[tokio::test]
    async fn test_view_route_renders_and_redirects() {
        let view = ListView::new(ViewConfig::new(tickets(12)).sort(doc! { "number": 1 })).per_page(5);
        let app = Router::new().route(
            "/tickets/{status}",
            view_route(Arc::new(view), Arc::new(JsonRenderer)),
        );

        let response = app
            .clone()
            .oneshot(Request::get("/tickets/open").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let body: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["template"], json!("tickets/tickets_list.html"));
        assert_eq!(body["context"]["status"], json!("open"));
        assert_eq!(body["context"]["pages"], json!(2));

        let response = app
            .oneshot(Request::get("/tickets/open?page=5").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(
            response.headers()[header::LOCATION],
            "/tickets/open?page=2"
        );
    }
}
