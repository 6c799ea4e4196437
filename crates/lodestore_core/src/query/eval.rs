//! In-memory query evaluation over entity field maps.
//!
//! Used by backends without a native query engine (memory, CRDT) and by
//! the fetch-policy handler's `invalidate_where`.

use crate::entity::FieldMap;
use crate::query::{Filter, FilterOp, Query};
use serde_json::Value;
use std::cmp::Ordering;

/// Returns true when the field map satisfies every filter in the query.
pub fn matches(map: &FieldMap, query: &Query) -> bool {
    query.filters.iter().all(|f| filter_matches(map, f))
}

/// Filters, sorts, and windows `items` according to `query`.
///
/// `to_map` supplies each item's field-map view; it is called once per
/// item. Cursor pagination is not applied here; see
/// [`super::paginate`].
pub fn apply_query<T>(
    items: Vec<T>,
    query: &Query,
    to_map: impl Fn(&T) -> FieldMap,
) -> Vec<T> {
    let mut rows: Vec<(FieldMap, T)> = items
        .into_iter()
        .map(|item| (to_map(&item), item))
        .filter(|(map, _)| matches(map, query))
        .collect();

    if !query.sorts.is_empty() {
        rows.sort_by(|(a, _), (b, _)| {
            for term in &query.sorts {
                let ord = compare_values(a.get(&term.field), b.get(&term.field));
                let ord = if term.descending { ord.reverse() } else { ord };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            Ordering::Equal
        });
    }

    let mut result: Vec<T> = rows.into_iter().map(|(_, item)| item).collect();

    if let Some(offset) = query.offset {
        let offset = (offset as usize).min(result.len());
        result.drain(..offset);
    }
    if let Some(limit) = query.limit {
        result.truncate(limit as usize);
    }

    result
}

fn filter_matches(map: &FieldMap, filter: &Filter) -> bool {
    let field = map.get(&filter.field);

    match filter.op {
        FilterOp::Equals => field.is_some_and(|v| values_equal(v, &filter.value)),
        FilterOp::NotEquals => !field.is_some_and(|v| values_equal(v, &filter.value)),
        FilterOp::LessThan => ordered(field, &filter.value, |o| o == Ordering::Less),
        FilterOp::LessThanOrEquals => ordered(field, &filter.value, |o| o != Ordering::Greater),
        FilterOp::GreaterThan => ordered(field, &filter.value, |o| o == Ordering::Greater),
        FilterOp::GreaterThanOrEquals => ordered(field, &filter.value, |o| o != Ordering::Less),
        FilterOp::WhereIn => value_list(&filter.value)
            .iter()
            .any(|candidate| field.is_some_and(|v| values_equal(v, candidate))),
        FilterOp::WhereNotIn => !value_list(&filter.value)
            .iter()
            .any(|candidate| field.is_some_and(|v| values_equal(v, candidate))),
        FilterOp::IsNull => {
            let is_null = field.map_or(true, Value::is_null);
            // `isNull` with value `false` flips to IS NOT NULL.
            if filter.value == Value::Bool(false) {
                !is_null
            } else {
                is_null
            }
        }
        FilterOp::IsNotNull => !field.map_or(true, Value::is_null),
        FilterOp::Contains => string_op(field, &filter.value, |s, v| s.contains(v)),
        FilterOp::StartsWith => string_op(field, &filter.value, |s, v| s.starts_with(v)),
        FilterOp::EndsWith => string_op(field, &filter.value, |s, v| s.ends_with(v)),
        FilterOp::ArrayContains => field
            .and_then(Value::as_array)
            .is_some_and(|arr| arr.iter().any(|v| values_equal(v, &filter.value))),
        FilterOp::ArrayContainsAny => {
            let candidates = value_list(&filter.value);
            field.and_then(Value::as_array).is_some_and(|arr| {
                arr.iter()
                    .any(|v| candidates.iter().any(|c| values_equal(v, c)))
            })
        }
    }
}

/// Value equality with numeric normalization (1 == 1.0).
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

fn value_list(value: &Value) -> Vec<Value> {
    value.as_array().cloned().unwrap_or_default()
}

fn ordered(field: Option<&Value>, value: &Value, pred: impl Fn(Ordering) -> bool) -> bool {
    match field {
        Some(v) if !v.is_null() && !value.is_null() => {
            partial_compare(v, value).is_some_and(pred)
        }
        _ => false,
    }
}

fn string_op(field: Option<&Value>, value: &Value, pred: impl Fn(&str, &str) -> bool) -> bool {
    match (field.and_then(Value::as_str), value.as_str()) {
        (Some(s), Some(v)) => pred(s, v),
        _ => false,
    }
}

/// Comparison of two same-kind scalars; `None` for incomparable kinds.
fn partial_compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(_), Value::Number(_)) => {
            a.as_f64().zip(b.as_f64()).and_then(|(x, y)| x.partial_cmp(&y))
        }
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// Total ordering for sorting: null sorts before everything (SQLite
/// convention); incomparable kinds compare equal.
fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let a_null = a.map_or(true, Value::is_null);
    let b_null = b.map_or(true, Value::is_null);
    match (a_null, b_null) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => match (a, b) {
            (Some(x), Some(y)) => partial_compare(x, y).unwrap_or(Ordering::Equal),
            _ => Ordering::Equal,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::FilterOp;
    use serde_json::json;

    fn row(pairs: &[(&str, Value)]) -> FieldMap {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), v.clone()))
            .collect()
    }

    #[test]
    fn equals_and_not_equals() {
        let map = row(&[("name", json!("Alice")), ("age", json!(30))]);

        let q = Query::new().filter("name", FilterOp::Equals, json!("Alice"));
        assert!(matches(&map, &q));

        let q = Query::new().filter("name", FilterOp::NotEquals, json!("Bob"));
        assert!(matches(&map, &q));

        // Integer and float forms of the same number compare equal.
        let q = Query::new().filter("age", FilterOp::Equals, json!(30.0));
        assert!(matches(&map, &q));
    }

    #[test]
    fn comparisons() {
        let map = row(&[("age", json!(30))]);

        assert!(matches(
            &map,
            &Query::new().filter("age", FilterOp::GreaterThan, json!(21))
        ));
        assert!(matches(
            &map,
            &Query::new().filter("age", FilterOp::LessThanOrEquals, json!(30))
        ));
        assert!(!matches(
            &map,
            &Query::new().filter("age", FilterOp::LessThan, json!(30))
        ));
    }

    #[test]
    fn where_in_empty_matches_nothing() {
        let map = row(&[("age", json!(30))]);
        let q = Query::new().filter("age", FilterOp::WhereIn, json!([]));
        assert!(!matches(&map, &q));
    }

    #[test]
    fn where_not_in_empty_matches_everything() {
        let map = row(&[("age", json!(30))]);
        let q = Query::new().filter("age", FilterOp::WhereNotIn, json!([]));
        assert!(matches(&map, &q));
    }

    #[test]
    fn null_checks() {
        let present = row(&[("nickname", json!("Al"))]);
        let null = row(&[("nickname", Value::Null)]);
        let missing = row(&[]);

        let is_null = Query::new().filter("nickname", FilterOp::IsNull, json!(true));
        assert!(!matches(&present, &is_null));
        assert!(matches(&null, &is_null));
        assert!(matches(&missing, &is_null));

        // isNull with value false inverts to IS NOT NULL.
        let not_null = Query::new().filter("nickname", FilterOp::IsNull, json!(false));
        assert!(matches(&present, &not_null));
        assert!(!matches(&null, &not_null));

        let q = Query::new().filter("nickname", FilterOp::IsNotNull, Value::Null);
        assert!(matches(&present, &q));
        assert!(!matches(&missing, &q));
    }

    #[test]
    fn string_operators() {
        let map = row(&[("name", json!("Alice"))]);
        assert!(matches(
            &map,
            &Query::new().filter("name", FilterOp::Contains, json!("lic"))
        ));
        assert!(matches(
            &map,
            &Query::new().filter("name", FilterOp::StartsWith, json!("Al"))
        ));
        assert!(matches(
            &map,
            &Query::new().filter("name", FilterOp::EndsWith, json!("ce"))
        ));
        assert!(!matches(
            &map,
            &Query::new().filter("name", FilterOp::StartsWith, json!("ce"))
        ));
    }

    #[test]
    fn array_operators() {
        let map = row(&[("tags", json!(["premium", "beta"]))]);

        assert!(matches(
            &map,
            &Query::new().filter("tags", FilterOp::ArrayContains, json!("beta"))
        ));
        assert!(!matches(
            &map,
            &Query::new().filter("tags", FilterOp::ArrayContains, json!("basic"))
        ));
        assert!(matches(
            &map,
            &Query::new().filter("tags", FilterOp::ArrayContainsAny, json!(["basic", "beta"]))
        ));
        assert!(!matches(
            &map,
            &Query::new().filter("tags", FilterOp::ArrayContainsAny, json!([]))
        ));
    }

    #[test]
    fn apply_sorts_and_windows() {
        let items = vec![("c", 3), ("a", 1), ("b", 2), ("d", 4)];
        let to_map = |item: &(&str, i32)| {
            row(&[("name", json!(item.0)), ("rank", json!(item.1))])
        };

        let q = Query::new().order_by("rank", false);
        let sorted = apply_query(items.clone(), &q, to_map);
        assert_eq!(sorted.iter().map(|i| i.0).collect::<Vec<_>>(), ["a", "b", "c", "d"]);

        let q = Query::new().order_by("rank", true).limit(2);
        let top = apply_query(items.clone(), &q, to_map);
        assert_eq!(top.iter().map(|i| i.0).collect::<Vec<_>>(), ["d", "c"]);

        let q = Query::new().order_by("rank", false).offset(1).limit(2);
        let mid = apply_query(items, &q, to_map);
        assert_eq!(mid.iter().map(|i| i.0).collect::<Vec<_>>(), ["b", "c"]);
    }

    #[test]
    fn multi_term_sort() {
        let items = vec![("b", 1), ("a", 2), ("a", 1)];
        let to_map = |item: &(&str, i32)| {
            row(&[("name", json!(item.0)), ("rank", json!(item.1))])
        };

        let q = Query::new().order_by("name", false).order_by("rank", false);
        let sorted = apply_query(items, &q, to_map);
        assert_eq!(sorted, vec![("a", 1), ("a", 2), ("b", 1)]);
    }

    #[test]
    fn nulls_sort_first() {
        let items = vec![Some(2), None, Some(1)];
        let to_map = |item: &Option<i32>| match item {
            Some(n) => row(&[("rank", json!(n))]),
            None => row(&[("rank", Value::Null)]),
        };

        let q = Query::new().order_by("rank", false);
        let sorted = apply_query(items, &q, to_map);
        assert_eq!(sorted, vec![None, Some(1), Some(2)]);
    }
}
