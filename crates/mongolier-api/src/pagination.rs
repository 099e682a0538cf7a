//! Page arithmetic shared by list views and resources

use crate::error::{ApiError, ApiResult};
use serde::Serialize;

/// A resolved page of a result set
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Page {
    pub number: u64,
    pub pages: u64,
    pub per_page: u64,
    pub offset: u64,
    pub previous_page_number: Option<u64>,
    pub next_page_number: Option<u64>,
}

impl Page {
    /// `1..=pages`
    pub fn page_range(&self) -> Vec<u64> {
        (1..=self.pages).collect()
    }

    /// Page size as a driver limit, saturating at `i64::MAX`
    pub fn limit(&self) -> i64 {
        i64::try_from(self.per_page).unwrap_or(i64::MAX)
    }
}

/// Either the page to render or the page number to redirect to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageOutcome {
    Page(Page),
    Redirect(u64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Paginator {
    per_page: u64,
}

impl Paginator {
    /// A zero page size is treated as one item per page
    pub fn new(per_page: u64) -> Self {
        Self {
            per_page: per_page.max(1),
        }
    }

    pub fn per_page(&self) -> u64 {
        self.per_page
    }

    /// Number of pages for `total` items
    pub fn pages(&self, total: u64) -> u64 {
        total.div_ceil(self.per_page)
    }

    /// Resolves the raw `page` query value against `total` items.
    ///
    /// A missing page means page 1. Pages below 1 redirect to 1, pages past
    /// the end redirect to the last page, and a value that is not an integer
    /// is a 404. An empty result set always resolves to page 1 so callers can
    /// report it as empty instead of redirecting forever.
    pub fn paginate(&self, total: u64, requested: Option<&str>) -> ApiResult<PageOutcome> {
        let pages = self.pages(total);

        let number = match requested {
            None => 1,
            Some(raw) => raw
                .trim()
                .parse::<i64>()
                .map_err(|_| ApiError::NotFound(format!("Invalid page ({}).", raw)))?,
        };

        if number < 1 {
            return Ok(PageOutcome::Redirect(1));
        }
        let number = number as u64;
        if pages > 0 && number > pages {
            return Ok(PageOutcome::Redirect(pages));
        }
        if pages == 0 {
            return Ok(PageOutcome::Page(Page {
                number: 1,
                pages,
                per_page: self.per_page,
                offset: 0,
                previous_page_number: None,
                next_page_number: None,
            }));
        }

        Ok(PageOutcome::Page(Page {
            number,
            pages,
            per_page: self.per_page,
            offset: (number - 1) * self.per_page,
            previous_page_number: (number > 1).then(|| number - 1),
            next_page_number: (number < pages).then(|| number + 1),
        }))
    }
}
