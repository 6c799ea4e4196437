//! Query translation for record stores.
//!
//! Maps the core operator set onto the shapes remote query builders
//! expose (`eq`, `neq`, `in`, `like`, array containment). The in-memory
//! evaluation here doubles as the reference semantics for test clients.

use lodestore_core::{FieldMap, FilterOp, Query};
use serde_json::Value;
use std::cmp::Ordering;

/// A record-store filter operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOp {
    /// Equal.
    Eq,
    /// Not equal.
    Neq,
    /// Less than.
    Lt,
    /// Less than or equal.
    Lte,
    /// Greater than.
    Gt,
    /// Greater than or equal.
    Gte,
    /// Member of the listed values.
    In,
    /// Not a member of the listed values.
    NotIn,
    /// Is null.
    Is,
    /// Is not null.
    IsNot,
    /// Pattern match with `%` wildcards.
    Like,
    /// Array column contains the value.
    Contains,
    /// Array column overlaps the listed values.
    ContainsAny,
}

/// One remote filter.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordFilter {
    /// Physical column name.
    pub column: String,
    /// Operator.
    pub op: RecordOp,
    /// Comparison value (a list for the collection operators, a `%`
    /// pattern for `Like`).
    pub value: Value,
}

/// One remote ordering term.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordOrder {
    /// Physical column name.
    pub column: String,
    /// Sort descending.
    pub descending: bool,
}

/// The remote form of a query.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RecordQuery {
    /// Filters, combined with AND.
    pub filters: Vec<RecordFilter>,
    /// Ordering terms.
    pub order: Vec<RecordOrder>,
    /// Row limit.
    pub limit: Option<u64>,
    /// Row offset.
    pub offset: Option<u64>,
}

impl RecordQuery {
    /// A query matching everything.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// A query selecting one row by key column.
    pub fn by_key(column: impl Into<String>, value: Value) -> Self {
        Self {
            filters: vec![RecordFilter {
                column: column.into(),
                op: RecordOp::Eq,
                value,
            }],
            ..Self::default()
        }
    }

    /// Returns true when the row satisfies every filter.
    pub fn matches(&self, row: &FieldMap) -> bool {
        self.filters.iter().all(|filter| filter.matches(row))
    }

    /// Filters, sorts, and windows `rows` with this query's terms.
    pub fn apply(&self, rows: Vec<FieldMap>) -> Vec<FieldMap> {
        let mut rows: Vec<FieldMap> = rows
            .into_iter()
            .filter(|row| self.matches(row))
            .collect();

        if !self.order.is_empty() {
            rows.sort_by(|a, b| {
                for term in &self.order {
                    let ord = compare(a.get(&term.column), b.get(&term.column));
                    let ord = if term.descending { ord.reverse() } else { ord };
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                Ordering::Equal
            });
        }

        if let Some(offset) = self.offset {
            let offset = (offset as usize).min(rows.len());
            rows.drain(..offset);
        }
        if let Some(limit) = self.limit {
            rows.truncate(limit as usize);
        }
        rows
    }
}

impl RecordFilter {
    fn matches(&self, row: &FieldMap) -> bool {
        let field = row.get(&self.column);
        match self.op {
            RecordOp::Eq => field.is_some_and(|v| loose_eq(v, &self.value)),
            RecordOp::Neq => !field.is_some_and(|v| loose_eq(v, &self.value)),
            RecordOp::Lt => cmp_pred(field, &self.value, |o| o == Ordering::Less),
            RecordOp::Lte => cmp_pred(field, &self.value, |o| o != Ordering::Greater),
            RecordOp::Gt => cmp_pred(field, &self.value, |o| o == Ordering::Greater),
            RecordOp::Gte => cmp_pred(field, &self.value, |o| o != Ordering::Less),
            RecordOp::In => list(&self.value)
                .iter()
                .any(|candidate| field.is_some_and(|v| loose_eq(v, candidate))),
            RecordOp::NotIn => !list(&self.value)
                .iter()
                .any(|candidate| field.is_some_and(|v| loose_eq(v, candidate))),
            RecordOp::Is => field.map_or(true, Value::is_null),
            RecordOp::IsNot => !field.map_or(true, Value::is_null),
            RecordOp::Like => match (field.and_then(Value::as_str), self.value.as_str()) {
                (Some(s), Some(pattern)) => like_match(s, pattern),
                _ => false,
            },
            RecordOp::Contains => field
                .and_then(Value::as_array)
                .is_some_and(|arr| arr.iter().any(|v| loose_eq(v, &self.value))),
            RecordOp::ContainsAny => {
                let candidates = list(&self.value);
                field.and_then(Value::as_array).is_some_and(|arr| {
                    arr.iter()
                        .any(|v| candidates.iter().any(|c| loose_eq(v, c)))
                })
            }
        }
    }
}

/// Translates the core query form, resolving field-name mappings.
pub fn to_record_query(query: Option<&Query>) -> RecordQuery {
    let Some(query) = query else {
        return RecordQuery::all();
    };

    let filters = query
        .filters
        .iter()
        .map(|filter| {
            let column = query.physical_field(&filter.field).to_owned();
            match filter.op {
                FilterOp::Equals => plain(column, RecordOp::Eq, filter.value.clone()),
                FilterOp::NotEquals => plain(column, RecordOp::Neq, filter.value.clone()),
                FilterOp::LessThan => plain(column, RecordOp::Lt, filter.value.clone()),
                FilterOp::LessThanOrEquals => plain(column, RecordOp::Lte, filter.value.clone()),
                FilterOp::GreaterThan => plain(column, RecordOp::Gt, filter.value.clone()),
                FilterOp::GreaterThanOrEquals => {
                    plain(column, RecordOp::Gte, filter.value.clone())
                }
                FilterOp::WhereIn => plain(column, RecordOp::In, filter.value.clone()),
                FilterOp::WhereNotIn => plain(column, RecordOp::NotIn, filter.value.clone()),
                FilterOp::IsNull => {
                    // isNull with value false maps to IS NOT NULL.
                    if filter.value == Value::Bool(false) {
                        plain(column, RecordOp::IsNot, Value::Null)
                    } else {
                        plain(column, RecordOp::Is, Value::Null)
                    }
                }
                FilterOp::IsNotNull => plain(column, RecordOp::IsNot, Value::Null),
                FilterOp::Contains => {
                    plain(column, RecordOp::Like, pattern("%", &filter.value, "%"))
                }
                FilterOp::StartsWith => {
                    plain(column, RecordOp::Like, pattern("", &filter.value, "%"))
                }
                FilterOp::EndsWith => {
                    plain(column, RecordOp::Like, pattern("%", &filter.value, ""))
                }
                FilterOp::ArrayContains => {
                    plain(column, RecordOp::Contains, filter.value.clone())
                }
                FilterOp::ArrayContainsAny => {
                    plain(column, RecordOp::ContainsAny, filter.value.clone())
                }
            }
        })
        .collect();

    RecordQuery {
        filters,
        order: query
            .sorts
            .iter()
            .map(|term| RecordOrder {
                column: query.physical_field(&term.field).to_owned(),
                descending: term.descending,
            })
            .collect(),
        limit: query.limit,
        offset: query.offset,
    }
}

fn plain(column: String, op: RecordOp, value: Value) -> RecordFilter {
    RecordFilter { column, op, value }
}

fn pattern(prefix: &str, value: &Value, suffix: &str) -> Value {
    let text = match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    Value::String(format!("{prefix}{text}{suffix}"))
}

fn list(value: &Value) -> Vec<Value> {
    value.as_array().cloned().unwrap_or_default()
}

fn loose_eq(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

fn cmp_pred(field: Option<&Value>, value: &Value, pred: impl Fn(Ordering) -> bool) -> bool {
    match field {
        Some(v) if !v.is_null() && !value.is_null() => compare_values(v, value).is_some_and(pred),
        _ => false,
    }
}

fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(_), Value::Number(_)) => {
            a.as_f64().zip(b.as_f64()).and_then(|(x, y)| x.partial_cmp(&y))
        }
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn compare(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let a_null = a.map_or(true, Value::is_null);
    let b_null = b.map_or(true, Value::is_null);
    match (a_null, b_null) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => match (a, b) {
            (Some(x), Some(y)) => compare_values(x, y).unwrap_or(Ordering::Equal),
            _ => Ordering::Equal,
        },
    }
}

/// `%`-wildcard matching: `%` matches any run of characters; other
/// characters match literally.
fn like_match(text: &str, pattern: &str) -> bool {
    let segments: Vec<&str> = pattern.split('%').collect();
    match segments.as_slice() {
        [exact] => text == *exact,
        [first, rest @ ..] => {
            let mut remainder = match text.strip_prefix(first) {
                Some(r) => r,
                None => return false,
            };
            let (last, middle) = match rest.split_last() {
                Some(pair) => pair,
                None => return true,
            };
            for segment in middle {
                match remainder.find(segment) {
                    Some(pos) => remainder = &remainder[pos + segment.len()..],
                    None => return false,
                }
            }
            if last.is_empty() {
                true
            } else {
                remainder.ends_with(last)
                    && remainder.len() >= last.len()
            }
        }
        [] => text.is_empty(),
    }
}
