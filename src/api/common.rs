//! Common API utilities and shared types

use serde::{Deserialize, Serialize};

use crate::models::ListParams;

pub fn default_page() -> u32 {
    1
}

pub fn default_per_page() -> u32 {
    20
}

/// Pagination query parameters for admin lists
#[derive(Debug, Deserialize)]
pub struct PaginationQuery {
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_per_page")]
    pub per_page: u32,
}

impl PaginationQuery {
    pub fn params(&self) -> ListParams {
        ListParams::new(self.page, self.per_page)
    }
}

/// Body returned by endpoints that only report success
#[derive(Debug, Serialize)]
pub struct SuccessResponse {
    pub success: bool,
}

impl SuccessResponse {
    pub fn ok() -> Self {
        Self { success: true }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_pagination_defaults() {
        let query: PaginationQuery = serde_json::from_str("{}").unwrap();
        assert_eq!(query.page, 1);
        assert_eq!(query.per_page, 20);
    }

    proptest! {
        #[test]
        fn params_are_always_in_bounds(page in any::<u32>(), per_page in any::<u32>()) {
            let params = PaginationQuery { page, per_page }.params();
            prop_assert!(params.page >= 1);
            prop_assert!((1..=100).contains(&params.per_page));
            prop_assert!(params.offset() >= 0);
        }
    }
}
