//! Shared pagination utilities
//!
//! ```rust,ignore
//! use limonero_server::features::shared::pagination::{PaginationParams, PaginationMetadata};
//!
//! let params = PaginationParams::new(Some(2), Some(20));
//! let page = params.page_request();
//!
//! // After fetching data...
//! let metadata = PaginationMetadata::new(params.page(), params.size(), 100);
//! ```

use crate::catalog::PageRequest;
use serde::{Deserialize, Serialize};

pub const DEFAULT_PAGE_SIZE: i64 = 20;

pub const MAX_PAGE_SIZE: i64 = 100;

/// Common pagination request parameters
///
/// Defaults to page 1 with 20 items per page.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PaginationParams {
    /// Page number (1-indexed)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<i64>,

    /// Items per page, 1-100
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<i64>,
}

impl PaginationParams {
    pub fn new(page: Option<i64>, size: Option<i64>) -> Self {
        Self { page, size }
    }

    pub fn page(&self) -> i64 {
        self.page.unwrap_or(1).max(1)
    }

    pub fn size(&self) -> i64 {
        self.size.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE)
    }

    pub fn page_request(&self) -> PageRequest {
        PageRequest {
            page: self.page(),
            size: self.size(),
        }
    }

    /// Returns an error message if validation fails
    pub fn validate(&self) -> Result<(), &'static str> {
        if let Some(page) = self.page {
            if page < 1 {
                return Err("Page must be greater than 0");
            }
        }
        if let Some(size) = self.size {
            if !(1..=MAX_PAGE_SIZE).contains(&size) {
                return Err("Page size must be between 1 and 100");
            }
        }
        Ok(())
    }
}

/// Pagination metadata for response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaginationMetadata {
    pub page: i64,
    pub size: i64,
    pub total: i64,
    pub pages: i64,
}

impl PaginationMetadata {
    pub fn new(page: i64, size: i64, total: i64) -> Self {
        let pages = if total == 0 { 0 } else { (total + size - 1) / size };
        Self {
            page,
            size,
            total,
            pages,
        }
    }

    pub fn from_params(params: &PaginationParams, total: i64) -> Self {
        Self::new(params.page(), params.size(), total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let params = PaginationParams::default();
        assert_eq!(params.page(), 1);
        assert_eq!(params.size(), DEFAULT_PAGE_SIZE);
        assert_eq!(params.page_request(), PageRequest { page: 1, size: 20 });
    }

    #[test]
    fn test_clamping_and_validation() {
        let params = PaginationParams::new(Some(0), Some(500));
        assert_eq!(params.page(), 1);
        assert_eq!(params.size(), MAX_PAGE_SIZE);
        assert!(params.validate().is_err());
        assert!(PaginationParams::new(Some(2), Some(10)).validate().is_ok());
    }

    #[test]
    fn test_metadata_pages() {
        assert_eq!(PaginationMetadata::new(1, 20, 0).pages, 0);
        assert_eq!(PaginationMetadata::new(1, 20, 20).pages, 1);
        assert_eq!(PaginationMetadata::new(1, 20, 21).pages, 2);
    }
}
