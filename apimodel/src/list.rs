//! List responses and their pagination headers.

use crate::entity::EntityRef;
use apimodel_transport::Response;

/// Total number of items across all pages.
pub const PAGINATION_COUNT: &str = "Pagination-Count";
/// Items per page.
pub const PAGINATION_LIMIT: &str = "Pagination-Limit";
/// Current page number.
pub const PAGINATION_PAGE: &str = "Pagination-Page";

/// One page of entities plus the raw response it came from.
#[derive(Debug, Clone)]
pub struct ListResponse {
    pub entities: Vec<EntityRef>,
    pub response: Response,
}

impl ListResponse {
    /// Total item count, from `Pagination-Count`.
    pub fn count(&self) -> Option<u64> {
        self.response.headers.get_u64(PAGINATION_COUNT)
    }

    /// Page size, from `Pagination-Limit`.
    pub fn per_page(&self) -> Option<u64> {
        self.response.headers.get_u64(PAGINATION_LIMIT)
    }

    /// Current page, from `Pagination-Page`.
    pub fn current_page(&self) -> Option<u64> {
        self.response.headers.get_u64(PAGINATION_PAGE)
    }

    /// Number of pages: `ceil(count / per_page)`.
    pub fn pages(&self) -> Option<u64> {
        let per_page = self.per_page().filter(|n| *n > 0)?;
        Some(self.count()?.div_ceil(per_page))
    }

    /// True when a later page exists.
    pub fn has_next(&self) -> bool {
        match (self.current_page(), self.pages()) {
            (Some(page), Some(pages)) => page < pages,
            _ => false,
        }
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}
