//! Query builder ORDER BY / GROUP BY / LIMIT / OFFSET operations

use super::builder::QueryBuilder;
use super::types::OrderDirection;

impl QueryBuilder {
    /// Order ascending by a column
    pub fn order_by(mut self, column: &str) -> Self {
        self.order_by
            .push((column.to_string(), OrderDirection::Asc));
        self
    }

    /// Order descending by a column
    pub fn order_by_desc(mut self, column: &str) -> Self {
        self.order_by
            .push((column.to_string(), OrderDirection::Desc));
        self
    }

    /// Group by a column
    pub fn group_by(mut self, column: &str) -> Self {
        self.group_by.push(column.to_string());
        self
    }

    /// Limit the number of returned rows
    pub fn limit(mut self, count: i64) -> Self {
        self.limit_count = Some(count);
        self
    }

    /// Skip the first `count` rows
    pub fn offset(mut self, count: i64) -> Self {
        self.offset_value = Some(count);
        self
    }

    /// Drop ordering and pagination; used when a select is re-purposed as a
    /// correlated sub-query.
    pub(crate) fn strip_ordering(mut self) -> Self {
        self.order_by.clear();
        self.limit_count = None;
        self.offset_value = None;
        self
    }
}
