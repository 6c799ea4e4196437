//! Query-to-SQL translation.
//!
//! Filter values are always bound as parameters, never inlined. The
//! pagination cursor fields (`first_count`, `after_cursor`) are not
//! translated; cursor slicing happens on the fetched list.

use crate::value::SqlValue;
use lodestore_core::{Filter, FilterOp, Query};
use serde_json::Value;

/// SQL text plus its bound parameters, in order.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlStatement {
    /// The SQL text with `?` placeholders.
    pub sql: String,
    /// Bound parameter values.
    pub params: Vec<SqlValue>,
}

impl SqlStatement {
    /// Creates a statement without parameters.
    pub fn bare(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }
}

/// Builds a `SELECT *` over `table` for the query.
pub fn select_statement(table: &str, query: Option<&Query>) -> SqlStatement {
    let mut sql = format!("SELECT * FROM {table}");
    let mut params = Vec::new();

    if let Some(query) = query {
        if let Some(clause) = where_clause(query, &mut params) {
            sql.push_str(" WHERE ");
            sql.push_str(&clause);
        }
        if let Some(order) = order_clause(query) {
            sql.push_str(" ORDER BY ");
            sql.push_str(&order);
        }
        push_window(&mut sql, query);
    }

    SqlStatement { sql, params }
}

/// Builds a `DELETE` over `table` for the query's filters.
pub fn delete_statement(table: &str, query: &Query) -> SqlStatement {
    let mut sql = format!("DELETE FROM {table}");
    let mut params = Vec::new();

    if let Some(clause) = where_clause(query, &mut params) {
        sql.push_str(" WHERE ");
        sql.push_str(&clause);
    }

    SqlStatement { sql, params }
}

fn where_clause(query: &Query, params: &mut Vec<SqlValue>) -> Option<String> {
    if query.filters.is_empty() {
        return None;
    }
    let fragments: Vec<String> = query
        .filters
        .iter()
        .map(|filter| render_filter(query, filter, params))
        .collect();
    Some(fragments.join(" AND "))
}

fn order_clause(query: &Query) -> Option<String> {
    if query.sorts.is_empty() {
        return None;
    }
    let terms: Vec<String> = query
        .sorts
        .iter()
        .map(|term| {
            format!(
                "{} {}",
                query.physical_field(&term.field),
                if term.descending { "DESC" } else { "ASC" }
            )
        })
        .collect();
    Some(terms.join(", "))
}

fn push_window(sql: &mut String, query: &Query) {
    match (query.limit, query.offset) {
        (Some(limit), Some(offset)) => {
            sql.push_str(&format!(" LIMIT {limit} OFFSET {offset}"));
        }
        (Some(limit), None) => sql.push_str(&format!(" LIMIT {limit}")),
        // SQLite requires a LIMIT before OFFSET; -1 means unbounded.
        (None, Some(offset)) => sql.push_str(&format!(" LIMIT -1 OFFSET {offset}")),
        (None, None) => {}
    }
}

fn render_filter(query: &Query, filter: &Filter, params: &mut Vec<SqlValue>) -> String {
    let column = query.physical_field(&filter.field);

    match filter.op {
        FilterOp::Equals => bind_comparison(column, "=", &filter.value, params),
        FilterOp::NotEquals => bind_comparison(column, "!=", &filter.value, params),
        FilterOp::LessThan => bind_comparison(column, "<", &filter.value, params),
        FilterOp::LessThanOrEquals => bind_comparison(column, "<=", &filter.value, params),
        FilterOp::GreaterThan => bind_comparison(column, ">", &filter.value, params),
        FilterOp::GreaterThanOrEquals => bind_comparison(column, ">=", &filter.value, params),
        FilterOp::WhereIn => match value_list(&filter.value) {
            list if list.is_empty() => "1 = 0".to_owned(),
            list => {
                let placeholders = bind_list(&list, params);
                format!("{column} IN ({placeholders})")
            }
        },
        FilterOp::WhereNotIn => match value_list(&filter.value) {
            list if list.is_empty() => "1 = 1".to_owned(),
            list => {
                let placeholders = bind_list(&list, params);
                format!("{column} NOT IN ({placeholders})")
            }
        },
        FilterOp::IsNull => {
            if filter.value == Value::Bool(false) {
                format!("{column} IS NOT NULL")
            } else {
                format!("{column} IS NULL")
            }
        }
        FilterOp::IsNotNull => format!("{column} IS NOT NULL"),
        FilterOp::Contains | FilterOp::ArrayContains => {
            params.push(SqlValue::Text(format!("%{}%", text_form(&filter.value))));
            format!("{column} LIKE ?")
        }
        FilterOp::StartsWith => {
            params.push(SqlValue::Text(format!("{}%", text_form(&filter.value))));
            format!("{column} LIKE ?")
        }
        FilterOp::EndsWith => {
            params.push(SqlValue::Text(format!("%{}", text_form(&filter.value))));
            format!("{column} LIKE ?")
        }
        FilterOp::ArrayContainsAny => match value_list(&filter.value) {
            list if list.is_empty() => "1 = 0".to_owned(),
            list => {
                let placeholders = bind_list(&list, params);
                format!(
                    "EXISTS (SELECT 1 FROM json_each({column}) WHERE value IN ({placeholders}))"
                )
            }
        },
    }
}

fn bind_comparison(
    column: &str,
    op: &str,
    value: &Value,
    params: &mut Vec<SqlValue>,
) -> String {
    params.push(SqlValue::from_json(value));
    format!("{column} {op} ?")
}

fn bind_list(values: &[Value], params: &mut Vec<SqlValue>) -> String {
    let placeholders: Vec<&str> = values
        .iter()
        .map(|value| {
            params.push(SqlValue::from_json(value));
            "?"
        })
        .collect();
    placeholders.join(", ")
}

fn value_list(value: &Value) -> Vec<Value> {
    value.as_array().cloned().unwrap_or_default()
}

fn text_form(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn bare_select() {
        let stmt = select_statement("users", None);
        assert_eq!(stmt.sql, "SELECT * FROM users");
        assert!(stmt.params.is_empty());
    }

    #[test]
    fn filters_join_with_and() {
        let q = Query::new()
            .filter("age", FilterOp::GreaterThanOrEquals, json!(18))
            .filter("name", FilterOp::NotEquals, json!("root"));
        let stmt = select_statement("users", Some(&q));

        assert_eq!(
            stmt.sql,
            "SELECT * FROM users WHERE age >= ? AND name != ?"
        );
        assert_eq!(
            stmt.params,
            vec![SqlValue::Integer(18), SqlValue::Text("root".into())]
        );
    }

    #[test]
    fn where_in_binds_each_value() {
        let q = Query::new().filter("tier", FilterOp::WhereIn, json!(["a", "b", "c"]));
        let stmt = select_statement("users", Some(&q));

        assert_eq!(stmt.sql, "SELECT * FROM users WHERE tier IN (?, ?, ?)");
        assert_eq!(stmt.params.len(), 3);
    }

    #[test]
    fn empty_where_in_is_constant_false() {
        let q = Query::new().filter("tier", FilterOp::WhereIn, json!([]));
        let stmt = select_statement("users", Some(&q));
        assert_eq!(stmt.sql, "SELECT * FROM users WHERE 1 = 0");
        assert!(stmt.params.is_empty());
    }

    #[test]
    fn empty_where_not_in_is_constant_true() {
        let q = Query::new().filter("tier", FilterOp::WhereNotIn, json!([]));
        let stmt = select_statement("users", Some(&q));
        assert_eq!(stmt.sql, "SELECT * FROM users WHERE 1 = 1");
    }

    #[test]
    fn null_checks() {
        let q = Query::new().filter("nickname", FilterOp::IsNull, json!(true));
        assert_eq!(
            select_statement("users", Some(&q)).sql,
            "SELECT * FROM users WHERE nickname IS NULL"
        );

        // isNull with value false flips to IS NOT NULL.
        let q = Query::new().filter("nickname", FilterOp::IsNull, json!(false));
        assert_eq!(
            select_statement("users", Some(&q)).sql,
            "SELECT * FROM users WHERE nickname IS NOT NULL"
        );

        let q = Query::new().filter("nickname", FilterOp::IsNotNull, Value::Null);
        assert_eq!(
            select_statement("users", Some(&q)).sql,
            "SELECT * FROM users WHERE nickname IS NOT NULL"
        );
    }

    #[test]
    fn like_operators() {
        let q = Query::new().filter("name", FilterOp::Contains, json!("li"));
        let stmt = select_statement("users", Some(&q));
        assert_eq!(stmt.sql, "SELECT * FROM users WHERE name LIKE ?");
        assert_eq!(stmt.params, vec![SqlValue::Text("%li%".into())]);

        let q = Query::new().filter("name", FilterOp::StartsWith, json!("Al"));
        assert_eq!(
            select_statement("users", Some(&q)).params,
            vec![SqlValue::Text("Al%".into())]
        );

        let q = Query::new().filter("name", FilterOp::EndsWith, json!("ce"));
        assert_eq!(
            select_statement("users", Some(&q)).params,
            vec![SqlValue::Text("%ce".into())]
        );
    }

    #[test]
    fn array_contains_is_like_on_json_text() {
        let q = Query::new().filter("tags", FilterOp::ArrayContains, json!("beta"));
        let stmt = select_statement("users", Some(&q));
        assert_eq!(stmt.sql, "SELECT * FROM users WHERE tags LIKE ?");
        assert_eq!(stmt.params, vec![SqlValue::Text("%beta%".into())]);
    }

    #[test]
    fn array_contains_any_uses_json_each() {
        let q = Query::new().filter("tags", FilterOp::ArrayContainsAny, json!(["a", "b"]));
        let stmt = select_statement("users", Some(&q));
        assert_eq!(
            stmt.sql,
            "SELECT * FROM users WHERE EXISTS (SELECT 1 FROM json_each(tags) WHERE value IN (?, ?))"
        );
        assert_eq!(stmt.params.len(), 2);

        let q = Query::new().filter("tags", FilterOp::ArrayContainsAny, json!([]));
        assert_eq!(
            select_statement("users", Some(&q)).sql,
            "SELECT * FROM users WHERE 1 = 0"
        );
    }

    #[test]
    fn order_limit_offset() {
        let q = Query::new()
            .order_by("name", false)
            .order_by("age", true)
            .limit(10)
            .offset(20);
        let stmt = select_statement("users", Some(&q));
        assert_eq!(
            stmt.sql,
            "SELECT * FROM users ORDER BY name ASC, age DESC LIMIT 10 OFFSET 20"
        );
    }

    #[test]
    fn offset_without_limit_uses_sqlite_convention() {
        let q = Query::new().offset(5);
        assert_eq!(
            select_statement("users", Some(&q)).sql,
            "SELECT * FROM users LIMIT -1 OFFSET 5"
        );
    }

    #[test]
    fn field_mapping_applies_to_filters_and_sorts() {
        let q = Query::new()
            .filter("name", FilterOp::Equals, json!("A"))
            .order_by("name", false)
            .map_field("name", "user_name");
        let stmt = select_statement("users", Some(&q));
        assert_eq!(
            stmt.sql,
            "SELECT * FROM users WHERE user_name = ? ORDER BY user_name ASC"
        );
    }

    #[test]
    fn delete_statement_shape() {
        let q = Query::new().filter("age", FilterOp::LessThan, json!(18));
        let stmt = delete_statement("users", &q);
        assert_eq!(stmt.sql, "DELETE FROM users WHERE age < ?");
        assert_eq!(stmt.params, vec![SqlValue::Integer(18)]);
    }

    #[test]
    fn delete_without_filters_deletes_all() {
        let stmt = delete_statement("users", &Query::new());
        assert_eq!(stmt.sql, "DELETE FROM users");
    }

    #[test]
    fn booleans_bind_as_integers() {
        let q = Query::new().filter("active", FilterOp::Equals, json!(true));
        let stmt = select_statement("users", Some(&q));
        assert_eq!(stmt.params, vec![SqlValue::Integer(1)]);
    }

    #[test]
    fn cursor_fields_are_not_translated() {
        let q = Query::new().first(3).after(lodestore_core::Cursor::from_index(3));
        let stmt = select_statement("users", Some(&q));
        assert_eq!(stmt.sql, "SELECT * FROM users");
    }
}
