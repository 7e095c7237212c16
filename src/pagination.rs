use serde::{Deserialize, Serialize};

use crate::response::RestResponse;

/// Names of the response headers carrying pagination metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PaginationHeaders {
    pub total_count: String,
    pub page_count: String,
    pub current_page: String,
    pub per_page: String,
}

impl Default for PaginationHeaders {
    fn default() -> Self {
        Self {
            total_count: "x-pagination-total-count".to_string(),
            page_count: "x-pagination-page-count".to_string(),
            current_page: "x-pagination-current-page".to_string(),
            per_page: "x-pagination-per-page".to_string(),
        }
    }
}

/// Pagination metadata of a single response. Pages are 1-based, as the
/// backend reports them. Missing or malformed headers read as `None`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaginationState {
    pub per_page: Option<u64>,
    pub current_page: Option<u64>,
    pub page_count: Option<u64>,
    pub total_count: Option<u64>,
}

impl PaginationState {
    pub fn from_response(response: &RestResponse, names: &PaginationHeaders) -> Self {
        let read = |name: &str| {
            response
                .header(name)
                .and_then(|value| value.trim().parse::<u64>().ok())
        };
        Self {
            per_page: read(&names.per_page),
            current_page: read(&names.current_page),
            page_count: read(&names.page_count),
            total_count: read(&names.total_count),
        }
    }

    /// True only when the server reported a current page strictly below the
    /// page count. Responses without pagination headers are a single page.
    pub fn has_more(&self) -> bool {
        match (self.current_page, self.page_count) {
            (Some(current), Some(count)) => current < count,
            _ => false,
        }
    }

    /// Offset of the page following the current one. `None` on the last
    /// page, without a page size, or when the offset would not fit a `u64`.
    pub fn next_offset(&self) -> Option<u64> {
        if !self.has_more() {
            return None;
        }
        self.current_page?.checked_mul(self.per_page?)
    }
}
