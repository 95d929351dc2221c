//! Query builder JOIN operations

use super::builder::QueryBuilder;
use super::types::{JoinClause, JoinType};

impl QueryBuilder {
    /// Add an INNER JOIN with a single ON equality between two columns
    pub fn join(mut self, table: &str, left_column: &str, right_column: &str) -> Self {
        self.joins.push(JoinClause {
            join_type: JoinType::Inner,
            table: table.to_string(),
            on_conditions: vec![(left_column.to_string(), right_column.to_string())],
        });
        self
    }

    /// Add a LEFT JOIN with a single ON equality between two columns
    pub fn left_join(mut self, table: &str, left_column: &str, right_column: &str) -> Self {
        self.joins.push(JoinClause {
            join_type: JoinType::Left,
            table: table.to_string(),
            on_conditions: vec![(left_column.to_string(), right_column.to_string())],
        });
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_renders_on_clause() {
        let query = QueryBuilder::table("posts").join("users", "users.id", "posts.user_id");
        assert_eq!(
            query.to_sql(),
            "SELECT * FROM posts INNER JOIN users ON users.id = posts.user_id"
        );
    }
}
