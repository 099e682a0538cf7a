//! Find query: a native filter plus cursor options

use bson::Document;
use mongodb::options::{FindOneOptions, FindOptions};

/// A driver-native filter with sort / skip / limit / projection
///
/// The filter is passed to the driver untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindQuery {
    filter: Document,
    sort: Option<Document>,
    skip: Option<u64>,
    limit: Option<i64>,
    projection: Option<Document>,
}

impl FindQuery {
    /// Create a query for the given filter
    pub fn new(filter: Document) -> Self {
        Self {
            filter,
            ..Default::default()
        }
    }

    /// Set the sort order
    pub fn sort(mut self, sort: Document) -> Self {
        self.sort = Some(sort);
        self
    }

    /// Set the sort order if one is given
    pub fn sort_opt(mut self, sort: Option<Document>) -> Self {
        self.sort = sort;
        self
    }

    /// Set the number of documents to skip
    pub fn skip(mut self, skip: u64) -> Self {
        self.skip = Some(skip);
        self
    }

    /// Set the maximum number of documents to return
    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Restrict the returned fields
    pub fn projection(mut self, projection: Document) -> Self {
        self.projection = Some(projection);
        self
    }

    pub fn get_filter(&self) -> &Document {
        &self.filter
    }

    pub fn get_sort(&self) -> Option<&Document> {
        self.sort.as_ref()
    }

    pub fn get_skip(&self) -> Option<u64> {
        self.skip
    }

    pub fn get_limit(&self) -> Option<i64> {
        self.limit
    }

    pub fn get_projection(&self) -> Option<&Document> {
        self.projection.as_ref()
    }

    /// Driver options for `find`
    pub fn find_options(&self) -> FindOptions {
        let mut options = FindOptions::default();
        options.sort = self.sort.clone();
        options.skip = self.skip;
        options.limit = self.limit;
        options.projection = self.projection.clone();
        options
    }

    /// Driver options for `find_one`
    pub fn find_one_options(&self) -> FindOneOptions {
        let mut options = FindOneOptions::default();
        options.sort = self.sort.clone();
        options.skip = self.skip;
        options.projection = self.projection.clone();
        options
    }
}

impl From<Document> for FindQuery {
    fn from(filter: Document) -> Self {
        Self::new(filter)
    }
}
