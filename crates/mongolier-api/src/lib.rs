//! mongolier-api: web layer over mongolier collections
//!
//! Two ways to put a collection on the web:
//! - [`views`]: list/detail views that produce a template name and context,
//!   with page-number pagination and redirects for out-of-range pages
//! - [`resource`]: a JSON REST resource (list, create, retrieve, replace,
//!   patch, delete) as an axum [`Router`](axum::Router)
//!
//! Both work against any [`DocumentStore`](mongolier::DocumentStore), so they
//! are tested with the in-memory store and served with a `MongoConnection`.

pub mod error;
pub mod pagination;
pub mod resource;
pub mod views;

pub use error::{ApiError, ApiResult};
pub use pagination::{Page, PageOutcome, Paginator};
pub use resource::Resource;
pub use views::{
    view_route, DetailView, JsonRenderer, ListView, PagelessListView, Renderer, TemplateResponse,
    View, ViewConfig, ViewRequest, ViewResponse,
};
