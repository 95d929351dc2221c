//! Query builder SELECT clause operations

use super::builder::QueryBuilder;

impl QueryBuilder {
    /// Set the selected columns, replacing any previous selection
    pub fn select(mut self, columns: Vec<String>) -> Self {
        self.select_fields = columns;
        self
    }

    /// Append a single column or raw select expression
    pub fn add_select(mut self, expression: impl Into<String>) -> Self {
        self.select_fields.push(expression.into());
        self
    }

    /// Select DISTINCT rows
    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    /// Set the FROM table
    pub fn from(mut self, table: impl Into<String>) -> Self {
        self.from_table = Some(table.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_replaces_and_add_select_appends() {
        let query = QueryBuilder::table("posts")
            .select(vec!["posts.*".to_string()])
            .add_select("users.name AS author_name");

        assert_eq!(
            query.to_sql(),
            "SELECT posts.*, users.name AS author_name FROM posts"
        );
    }
}
