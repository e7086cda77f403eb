//! Pagination types shared by list endpoints

use serde::{Deserialize, Serialize};

/// Pagination parameters for list queries
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListParams {
    /// Page number (1-indexed)
    pub page: u32,
    /// Number of items per page
    pub per_page: u32,
}

impl Default for ListParams {
    fn default() -> Self {
        Self {
            page: 1,
            per_page: 10,
        }
    }
}

impl ListParams {
    /// Create new pagination parameters, clamped to sane bounds
    pub fn new(page: u32, per_page: u32) -> Self {
        Self {
            page: page.max(1),
            per_page: per_page.clamp(1, 100),
        }
    }

    pub fn offset(&self) -> i64 {
        (self.page.saturating_sub(1) as i64) * self.per_page as i64
    }

    pub fn limit(&self) -> i64 {
        self.per_page as i64
    }
}

/// Paginated result container
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PagedResult<T> {
    pub items: Vec<T>,
    /// Total number of items across all pages
    pub total: i64,
    pub page: u32,
    pub per_page: u32,
}

impl<T> PagedResult<T> {
    pub fn new(items: Vec<T>, total: i64, params: &ListParams) -> Self {
        Self {
            items,
            total,
            page: params.page,
            per_page: params.per_page,
        }
    }

    pub fn total_pages(&self) -> u32 {
        if self.per_page == 0 || self.total <= 0 {
            return 0;
        }
        ((self.total as u64 + self.per_page as u64 - 1) / self.per_page as u64) as u32
    }

    pub fn has_next(&self) -> bool {
        self.page < self.total_pages()
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> PagedResult<U> {
        PagedResult {
            items: self.items.into_iter().map(f).collect(),
            total: self.total,
            page: self.page,
            per_page: self.per_page,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_list_params_clamped() {
        let params = ListParams::new(0, 1000);
        assert_eq!(params.page, 1);
        assert_eq!(params.per_page, 100);
        assert_eq!(params.offset(), 0);
    }

    #[test]
    fn test_total_pages() {
        let params = ListParams::new(2, 10);
        let result: PagedResult<i32> = PagedResult::new(vec![], 25, &params);
        assert_eq!(result.total_pages(), 3);
        assert!(result.has_next());

        let empty: PagedResult<i32> = PagedResult::new(vec![], 0, &params);
        assert_eq!(empty.total_pages(), 0);
        assert!(!empty.has_next());
    }

    proptest! {
        #[test]
        fn prop_offset_matches_page(page in 1u32..10_000, per_page in 1u32..=100) {
            let params = ListParams::new(page, per_page);
            prop_assert_eq!(params.offset(), (page as i64 - 1) * per_page as i64);
            prop_assert_eq!(params.limit(), per_page as i64);
        }

        #[test]
        fn prop_total_pages_covers_total(total in 0i64..1_000_000, per_page in 1u32..=100) {
            let params = ListParams::new(1, per_page);
            let result: PagedResult<()> = PagedResult::new(vec![], total, &params);
            let pages = result.total_pages() as i64;
            prop_assert!(pages * per_page as i64 >= total);
            prop_assert!(pages == 0 || (pages - 1) * (per_page as i64) < total);
        }
    }
}
