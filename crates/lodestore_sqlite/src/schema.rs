//! Table schemas: typed columns, name validation, DDL generation.

use crate::handle::SqlRow;
use crate::value::SqlValue;
use lodestore_core::{FieldMap, StoreError, StoreResult};
use serde_json::Value;

/// SQL reserved words rejected as column names.
const RESERVED_WORDS: &[&str] = &[
    "ADD", "ALL", "ALTER", "AND", "AS", "BETWEEN", "BY", "CASE", "CHECK", "COLUMN", "COMMIT",
    "CREATE", "CROSS", "DEFAULT", "DELETE", "DISTINCT", "DROP", "ELSE", "END", "EXISTS",
    "FOREIGN", "FROM", "GROUP", "HAVING", "IN", "INDEX", "INNER", "INSERT", "INTO", "IS",
    "JOIN", "KEY", "LEFT", "LIKE", "LIMIT", "NOT", "NULL", "OFFSET", "ON", "OR", "ORDER",
    "OUTER", "PRIMARY", "REFERENCES", "RIGHT", "ROLLBACK", "SELECT", "SET", "TABLE", "THEN",
    "TRANSACTION", "UNION", "UNIQUE", "UPDATE", "VALUES", "WHEN", "WHERE",
];

/// Logical column type. Booleans are stored as INTEGER 0/1, datetimes
/// as INTEGER epoch milliseconds, JSON values as their text form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    /// UTF-8 text.
    Text,
    /// 64-bit integer.
    Integer,
    /// Double-precision float.
    Real,
    /// Raw bytes.
    Blob,
    /// Boolean, stored as INTEGER 0/1.
    Boolean,
    /// Datetime, stored as INTEGER epoch milliseconds.
    DateTime,
    /// JSON array or object, stored as TEXT.
    Json,
}

impl ColumnType {
    fn sql_type(self) -> &'static str {
        match self {
            ColumnType::Text | ColumnType::Json => "TEXT",
            ColumnType::Integer | ColumnType::Boolean | ColumnType::DateTime => "INTEGER",
            ColumnType::Real => "REAL",
            ColumnType::Blob => "BLOB",
        }
    }
}

/// One caller-defined column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    /// Physical column name.
    pub name: String,
    /// Column type.
    pub ty: ColumnType,
}

impl ColumnDef {
    /// Creates a column definition.
    pub fn new(name: impl Into<String>, ty: ColumnType) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

/// A secondary index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSpec {
    /// Index name.
    pub name: String,
    /// Indexed columns, in order.
    pub columns: Vec<String>,
    /// Whether the index enforces uniqueness.
    pub unique: bool,
}

/// The relational layout of one entity table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    /// Table name.
    pub table: String,
    /// Primary-key column name.
    pub primary_key: String,
    /// All columns, including the primary key.
    pub columns: Vec<ColumnDef>,
    /// Secondary indexes.
    pub indexes: Vec<IndexSpec>,
}

impl TableSchema {
    /// Creates a schema with the default `"id"` primary key.
    pub fn new(table: impl Into<String>, columns: Vec<ColumnDef>) -> Self {
        Self {
            table: table.into(),
            primary_key: "id".to_owned(),
            columns,
            indexes: Vec::new(),
        }
    }

    /// Overrides the primary-key column name.
    #[must_use]
    pub fn primary_key(mut self, name: impl Into<String>) -> Self {
        self.primary_key = name.into();
        self
    }

    /// Adds a secondary index.
    #[must_use]
    pub fn index(mut self, name: impl Into<String>, columns: Vec<String>, unique: bool) -> Self {
        self.indexes.push(IndexSpec {
            name: name.into(),
            columns,
            unique,
        });
        self
    }

    /// Validates every name in the schema.
    ///
    /// Column names must be identifiers without whitespace and must not
    /// be SQL reserved words; the primary key must be one of the columns.
    pub fn validate(&self) -> StoreResult<()> {
        validate_identifier(&self.table)?;
        for column in &self.columns {
            validate_identifier(&column.name)?;
        }
        if !self.columns.iter().any(|c| c.name == self.primary_key) {
            return Err(StoreError::validation(format!(
                "primary key column {:?} is not defined",
                self.primary_key
            )));
        }
        for index in &self.indexes {
            validate_identifier(&index.name)?;
            for column in &index.columns {
                if !self.columns.iter().any(|c| &c.name == column) {
                    return Err(StoreError::validation(format!(
                        "index {:?} references unknown column {column:?}",
                        index.name
                    )));
                }
            }
        }
        Ok(())
    }

    /// The `CREATE TABLE IF NOT EXISTS` statement for this schema.
    pub fn create_table_sql(&self) -> String {
        let columns: Vec<String> = self
            .columns
            .iter()
            .map(|c| {
                if c.name == self.primary_key {
                    format!("{} {} PRIMARY KEY", c.name, c.ty.sql_type())
                } else {
                    format!("{} {}", c.name, c.ty.sql_type())
                }
            })
            .collect();
        format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            self.table,
            columns.join(", ")
        )
    }

    /// The `CREATE INDEX` statements for this schema.
    pub fn create_index_sql(&self) -> Vec<String> {
        self.indexes
            .iter()
            .map(|index| {
                format!(
                    "CREATE {}INDEX IF NOT EXISTS {} ON {} ({})",
                    if index.unique { "UNIQUE " } else { "" },
                    index.name,
                    self.table,
                    index.columns.join(", ")
                )
            })
            .collect()
    }

    /// The type of a column, if defined.
    pub fn column_type(&self, name: &str) -> Option<ColumnType> {
        self.columns.iter().find(|c| c.name == name).map(|c| c.ty)
    }

    /// Encodes one field value for its column.
    pub fn encode_value(&self, column: &str, value: &Value) -> SqlValue {
        match self.column_type(column) {
            Some(ColumnType::Boolean) => match value.as_bool() {
                Some(b) => SqlValue::Integer(i64::from(b)),
                None => SqlValue::from_json(value),
            },
            Some(ColumnType::Json) => {
                if value.is_null() {
                    SqlValue::Null
                } else {
                    SqlValue::Text(value.to_string())
                }
            }
            _ => SqlValue::from_json(value),
        }
    }

    /// Decodes one stored value back to its field form.
    pub fn decode_value(&self, column: &str, value: &SqlValue) -> Value {
        match (self.column_type(column), value) {
            (Some(ColumnType::Boolean), SqlValue::Integer(i)) => Value::Bool(*i != 0),
            (Some(ColumnType::Json), SqlValue::Text(s)) => {
                serde_json::from_str(s).unwrap_or_else(|_| Value::String(s.clone()))
            }
            _ => value.to_json(),
        }
    }

    /// Converts a fetched row into an entity field map.
    pub fn row_to_map(&self, row: &SqlRow) -> FieldMap {
        let mut map = FieldMap::new();
        for (column, value) in &row.columns {
            map.insert(column.clone(), self.decode_value(column, value));
        }
        map
    }
}

fn validate_identifier(name: &str) -> StoreResult<()> {
    if name.is_empty() {
        return Err(StoreError::validation("empty identifier"));
    }
    if name.chars().any(char::is_whitespace) {
        return Err(StoreError::validation(format!(
            "identifier {name:?} contains whitespace"
        )));
    }
    let mut chars = name.chars();
    let first = chars.next().unwrap_or('_');
    if !(first.is_ascii_alphabetic() || first == '_')
        || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return Err(StoreError::validation(format!(
            "identifier {name:?} is not a valid SQL name"
        )));
    }
    if RESERVED_WORDS.contains(&name.to_ascii_uppercase().as_str()) {
        return Err(StoreError::validation(format!(
            "identifier {name:?} is a reserved word"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn user_schema() -> TableSchema {
        TableSchema::new(
            "users",
            vec![
                ColumnDef::new("id", ColumnType::Text),
                ColumnDef::new("name", ColumnType::Text),
                ColumnDef::new("active", ColumnType::Boolean),
                ColumnDef::new("created_at", ColumnType::DateTime),
                ColumnDef::new("tags", ColumnType::Json),
            ],
        )
    }

    #[test]
    fn create_table_shape() {
        let sql = user_schema().create_table_sql();
        assert_eq!(
            sql,
            "CREATE TABLE IF NOT EXISTS users (id TEXT PRIMARY KEY, name TEXT, \
             active INTEGER, created_at INTEGER, tags TEXT)"
        );
    }

    #[test]
    fn index_sql() {
        let schema = user_schema()
            .index("idx_users_name", vec!["name".into()], false)
            .index("idx_users_active_name", vec!["active".into(), "name".into()], true);
        let sql = schema.create_index_sql();
        assert_eq!(
            sql[0],
            "CREATE INDEX IF NOT EXISTS idx_users_name ON users (name)"
        );
        assert_eq!(
            sql[1],
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_users_active_name ON users (active, name)"
        );
    }

    #[test]
    fn validation_accepts_good_schema() {
        assert!(user_schema().validate().is_ok());
    }

    #[test]
    fn validation_rejects_reserved_and_whitespace() {
        let schema = TableSchema::new(
            "t",
            vec![ColumnDef::new("id", ColumnType::Text), ColumnDef::new("select", ColumnType::Text)],
        );
        assert!(schema.validate().is_err());

        let schema = TableSchema::new(
            "t",
            vec![ColumnDef::new("id", ColumnType::Text), ColumnDef::new("two words", ColumnType::Text)],
        );
        assert!(schema.validate().is_err());
    }

    #[test]
    fn validation_requires_pk_column() {
        let schema = TableSchema::new("t", vec![ColumnDef::new("name", ColumnType::Text)]);
        assert!(schema.validate().is_err());

        let schema = TableSchema::new("t", vec![ColumnDef::new("uid", ColumnType::Text)])
            .primary_key("uid");
        assert!(schema.validate().is_ok());
    }

    #[test]
    fn validation_rejects_unknown_index_column() {
        let schema = user_schema().index("idx_bad", vec!["missing".into()], false);
        assert!(schema.validate().is_err());
    }

    #[test]
    fn boolean_roundtrip() {
        let schema = user_schema();
        assert_eq!(
            schema.encode_value("active", &json!(true)),
            SqlValue::Integer(1)
        );
        assert_eq!(
            schema.decode_value("active", &SqlValue::Integer(1)),
            json!(true)
        );
        assert_eq!(
            schema.decode_value("active", &SqlValue::Integer(0)),
            json!(false)
        );
    }

    #[test]
    fn json_column_roundtrip() {
        let schema = user_schema();
        let tags = json!(["a", "b"]);
        let encoded = schema.encode_value("tags", &tags);
        assert_eq!(encoded, SqlValue::Text(r#"["a","b"]"#.into()));
        assert_eq!(schema.decode_value("tags", &encoded), tags);
    }

    #[test]
    fn datetime_stored_as_integer() {
        let schema = user_schema();
        assert_eq!(
            schema.encode_value("created_at", &json!(1_700_000_000_000i64)),
            SqlValue::Integer(1_700_000_000_000)
        );
    }

    #[test]
    fn row_to_map_uses_column_types() {
        let schema = user_schema();
        let row = SqlRow {
            columns: vec![
                ("id".into(), SqlValue::Text("u1".into())),
                ("active".into(), SqlValue::Integer(1)),
                ("tags".into(), SqlValue::Text(r#"["x"]"#.into())),
            ],
        };
        let map = schema.row_to_map(&row);
        assert_eq!(map.get("id"), Some(&json!("u1")));
        assert_eq!(map.get("active"), Some(&json!(true)));
        assert_eq!(map.get("tags"), Some(&json!(["x"])));
    }
}
