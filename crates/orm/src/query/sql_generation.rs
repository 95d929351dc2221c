//! Query builder SQL generation
//!
//! Two render paths: `to_sql_with_params` produces placeholder SQL plus the
//! bound parameter list, and `to_sql` inlines values. The inline path exists
//! for correlated sub-queries (existence checks, relation counts), which are
//! embedded into an outer statement and cannot renumber its placeholders.

use serde_json::Value;

use super::builder::QueryBuilder;
use super::types::*;

impl QueryBuilder {
    /// Generate SQL with `$n` placeholders and the parameter list to bind
    pub fn to_sql_with_params(&self) -> (String, Vec<Value>) {
        match self.query_type {
            QueryType::Select => self.build_select_sql(),
            QueryType::Insert => self.build_insert_sql(),
            QueryType::Update => self.build_update_sql(),
            QueryType::Delete => self.build_delete_sql(),
        }
    }

    /// Generate SQL with values inlined (sub-query embedding)
    pub fn to_sql(&self) -> String {
        let mut sql = self.render_select_head();
        if !self.where_conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&self.render_where_inline());
        }
        self.render_tail(&mut sql);
        sql
    }

    fn build_select_sql(&self) -> (String, Vec<Value>) {
        let mut sql = self.render_select_head();
        let mut params = Vec::new();
        self.render_where_params(&mut sql, &mut params);
        self.render_tail(&mut sql);
        (sql, params)
    }

    fn build_insert_sql(&self) -> (String, Vec<Value>) {
        let mut sql = String::new();
        let mut params = Vec::new();

        if let Some(table) = &self.insert_table {
            sql.push_str(&format!("INSERT INTO {}", table));

            if self.set_clauses.is_empty() {
                sql.push_str(" DEFAULT VALUES");
            } else {
                let columns: Vec<&str> = self
                    .set_clauses
                    .iter()
                    .map(|clause| clause.column.as_str())
                    .collect();
                sql.push_str(&format!(" ({}) VALUES (", columns.join(", ")));
                for (i, clause) in self.set_clauses.iter().enumerate() {
                    if i > 0 {
                        sql.push_str(", ");
                    }
                    match &clause.value {
                        Some(value) => {
                            params.push(value.clone());
                            sql.push_str(&format!("${}", params.len()));
                        }
                        None => sql.push_str("NULL"),
                    }
                }
                sql.push(')');
            }

            if let Some(column) = &self.returning {
                sql.push_str(&format!(" RETURNING {}", column));
            }
        }

        (sql, params)
    }

    fn build_update_sql(&self) -> (String, Vec<Value>) {
        let mut sql = String::new();
        let mut params = Vec::new();

        if let Some(table) = &self.update_table {
            sql.push_str(&format!("UPDATE {} SET ", table));
            for (i, clause) in self.set_clauses.iter().enumerate() {
                if i > 0 {
                    sql.push_str(", ");
                }
                match &clause.value {
                    Some(value) => {
                        params.push(value.clone());
                        sql.push_str(&format!("{} = ${}", clause.column, params.len()));
                    }
                    None => sql.push_str(&format!("{} = NULL", clause.column)),
                }
            }
            self.render_where_params(&mut sql, &mut params);
        }

        (sql, params)
    }

    fn build_delete_sql(&self) -> (String, Vec<Value>) {
        let mut sql = String::new();
        let mut params = Vec::new();

        if let Some(table) = &self.delete_table {
            sql.push_str(&format!("DELETE FROM {}", table));
            self.render_where_params(&mut sql, &mut params);
        }

        (sql, params)
    }

    fn render_select_head(&self) -> String {
        let mut sql = String::new();
        if self.distinct {
            sql.push_str("SELECT DISTINCT ");
        } else {
            sql.push_str("SELECT ");
        }

        if self.select_fields.is_empty() {
            sql.push('*');
        } else {
            sql.push_str(&self.select_fields.join(", "));
        }

        if let Some(table) = &self.from_table {
            sql.push_str(" FROM ");
            sql.push_str(table);
        }

        for join in &self.joins {
            sql.push_str(&format!(" {} {}", join.join_type, join.table));
            if !join.on_conditions.is_empty() {
                sql.push_str(" ON ");
                let on: Vec<String> = join
                    .on_conditions
                    .iter()
                    .map(|(left, right)| format!("{} = {}", left, right))
                    .collect();
                sql.push_str(&on.join(" AND "));
            }
        }

        sql
    }

    fn render_tail(&self, sql: &mut String) {
        if !self.group_by.is_empty() {
            sql.push_str(&format!(" GROUP BY {}", self.group_by.join(", ")));
        }
        if !self.order_by.is_empty() {
            let orders: Vec<String> = self
                .order_by
                .iter()
                .map(|(column, direction)| format!("{} {}", column, direction))
                .collect();
            sql.push_str(&format!(" ORDER BY {}", orders.join(", ")));
        }
        if let Some(limit) = self.limit_count {
            sql.push_str(&format!(" LIMIT {}", limit));
        }
        if let Some(offset) = self.offset_value {
            sql.push_str(&format!(" OFFSET {}", offset));
        }
    }

    fn render_where_params(&self, sql: &mut String, params: &mut Vec<Value>) {
        if self.where_conditions.is_empty() {
            return;
        }
        sql.push_str(" WHERE ");
        for (i, condition) in self.where_conditions.iter().enumerate() {
            if i > 0 {
                sql.push_str(&format!(" {} ", condition.boolean));
            }
            match condition.operator {
                QueryOperator::Raw => sql.push_str(&condition.column),
                QueryOperator::IsNull | QueryOperator::IsNotNull => {
                    sql.push_str(&format!("{} {}", condition.column, condition.operator));
                }
                QueryOperator::In | QueryOperator::NotIn => {
                    sql.push_str(&format!("{} {} (", condition.column, condition.operator));
                    for (j, value) in condition.values.iter().enumerate() {
                        if j > 0 {
                            sql.push_str(", ");
                        }
                        params.push(value.clone());
                        sql.push_str(&format!("${}", params.len()));
                    }
                    sql.push(')');
                }
                _ => match &condition.value {
                    Some(Value::Null) | None => {
                        // equality against NULL matches nothing; render literally
                        sql.push_str(&format!("{} {} NULL", condition.column, condition.operator));
                    }
                    Some(value) => {
                        params.push(value.clone());
                        sql.push_str(&format!(
                            "{} {} ${}",
                            condition.column,
                            condition.operator,
                            params.len()
                        ));
                    }
                },
            }
        }
    }

    fn render_where_inline(&self) -> String {
        let rendered: Vec<String> = self
            .where_conditions
            .iter()
            .enumerate()
            .map(|(i, condition)| {
                let clause = match condition.operator {
                    QueryOperator::Raw => condition.column.clone(),
                    QueryOperator::IsNull | QueryOperator::IsNotNull => {
                        format!("{} {}", condition.column, condition.operator)
                    }
                    QueryOperator::In | QueryOperator::NotIn => {
                        let values: Vec<String> =
                            condition.values.iter().map(format_value).collect();
                        format!(
                            "{} {} ({})",
                            condition.column,
                            condition.operator,
                            values.join(", ")
                        )
                    }
                    _ => match &condition.value {
                        Some(Value::Null) | None => {
                            format!("{} {} NULL", condition.column, condition.operator)
                        }
                        Some(value) => format!(
                            "{} {} {}",
                            condition.column,
                            condition.operator,
                            format_value(value)
                        ),
                    },
                };
                if i == 0 {
                    clause
                } else {
                    format!("{} {}", condition.boolean, clause)
                }
            })
            .collect();
        rendered.join(" ")
    }
}

/// Format a value as a SQL literal, escaping single quotes
fn format_value(value: &Value) -> String {
    match value {
        Value::String(s) => format!("'{}'", s.replace('\'', "''")),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => "NULL".to_string(),
        _ => "NULL".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_select_with_params() {
        let query = QueryBuilder::table("users")
            .where_eq("active", true)
            .where_in("role", vec![json!("admin"), json!("editor")])
            .order_by_desc("created_at")
            .limit(10);

        let (sql, params) = query.to_sql_with_params();
        assert_eq!(
            sql,
            "SELECT * FROM users WHERE active = $1 AND role IN ($2, $3) \
             ORDER BY created_at DESC LIMIT 10"
        );
        assert_eq!(params, vec![json!(true), json!("admin"), json!("editor")]);
    }

    #[test]
    fn test_inline_rendering_escapes_strings() {
        let query = QueryBuilder::table("users").where_eq("name", "O'Brien");
        assert_eq!(
            query.to_sql(),
            "SELECT * FROM users WHERE name = 'O''Brien'"
        );
    }

    #[test]
    fn test_null_equality_renders_literally() {
        let query = QueryBuilder::table("posts").where_eq("user_id", Value::Null);
        let (sql, params) = query.to_sql_with_params();
        assert_eq!(sql, "SELECT * FROM posts WHERE user_id = NULL");
        assert!(params.is_empty());
    }

    #[test]
    fn test_or_boolean_joins_conditions() {
        let query = QueryBuilder::table("users")
            .where_eq("active", true)
            .or_where_eq("admin", true);
        let (sql, _) = query.to_sql_with_params();
        assert_eq!(sql, "SELECT * FROM users WHERE active = $1 OR admin = $2");
    }

    #[test]
    fn test_raw_condition_embedded_verbatim() {
        let query =
            QueryBuilder::table("posts").where_raw("posts.user_id = users.id");
        assert_eq!(
            query.to_sql(),
            "SELECT * FROM posts WHERE posts.user_id = users.id"
        );
    }
}
