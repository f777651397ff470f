//! Engine conversation log models and DTOs.

use longrun_core::types::Timestamp;
use serde::Serialize;
use sqlx::FromRow;

/// Default page size for log listing.
pub const DEFAULT_LIMIT: i64 = 50;

/// Maximum page size for log listing.
pub const MAX_LIMIT: i64 = 100;

/// A row from the `engine_logs` table.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineLog {
    pub id: i64,
    pub engine_log_id: String,
    pub log_type: String,
    pub content: serde_json::Value,
    pub user_id: Option<String>,
    pub status: Option<String>,
    pub created_at: Timestamp,
    pub fetched_at: Timestamp,
}

/// A message fetched from the engine, ready to be upserted.
#[derive(Debug, Clone, PartialEq)]
pub struct NewEngineLog {
    pub engine_log_id: String,
    pub log_type: String,
    pub content: serde_json::Value,
    pub user_id: Option<String>,
    pub status: Option<String>,
    pub created_at: Timestamp,
}

/// One page of logs plus pagination metadata.
#[derive(Debug, Clone, Serialize)]
pub struct LogPage {
    pub logs: Vec<EngineLog>,
    pub pagination: Pagination,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub page: i64,
    pub limit: i64,
    pub total: i64,
    pub total_pages: i64,
}

impl Pagination {
    /// Normalize a requested page/limit: page is at least 1 and limit is
    /// clamped to `1..=MAX_LIMIT`.
    pub fn normalize(page: i64, limit: i64) -> (i64, i64) {
        (page.max(1), limit.clamp(1, MAX_LIMIT))
    }

    pub fn new(page: i64, limit: i64, total: i64) -> Self {
        let total_pages = if total == 0 { 0 } else { (total + limit - 1) / limit };
        Self {
            page,
            limit,
            total,
            total_pages,
        }
    }

    /// Rows to skip. Saturates for pages far past the end.
    pub fn offset(&self) -> i64 {
        (self.page - 1).saturating_mul(self.limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_clamps_page_and_limit() {
        assert_eq!(Pagination::normalize(0, 0), (1, 1));
        assert_eq!(Pagination::normalize(3, 500), (3, MAX_LIMIT));
    }

    #[test]
    fn total_pages_rounds_up() {
        assert_eq!(Pagination::new(1, 50, 0).total_pages, 0);
        assert_eq!(Pagination::new(1, 50, 50).total_pages, 1);
        assert_eq!(Pagination::new(1, 50, 51).total_pages, 2);
    }

    #[test]
    fn offset_is_zero_based() {
        assert_eq!(Pagination::new(1, 20, 100).offset(), 0);
        assert_eq!(Pagination::new(3, 20, 100).offset(), 40);
    }

    #[test]
    fn offset_saturates_for_huge_pages() {
        let (page, limit) = Pagination::normalize(i64::MAX, MAX_LIMIT);
        assert_eq!(Pagination::new(page, limit, 10).offset(), i64::MAX);
    }
}
