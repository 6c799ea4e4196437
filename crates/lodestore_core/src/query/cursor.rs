//! Opaque cursors and page metadata.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Key used by offset-derived cursors.
const INDEX_KEY: &str = "_index";

/// An opaque pagination position, serializable to a map of named values.
///
/// The core produces `{"_index": n}` cursors; backends with native
/// keyset pagination may carry richer keys (primary-key tuples).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Cursor {
    values: BTreeMap<String, Value>,
}

impl Cursor {
    /// Creates an empty cursor.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an offset-derived cursor positioned at `index`.
    #[must_use]
    pub fn from_index(index: usize) -> Self {
        let mut values = BTreeMap::new();
        values.insert(INDEX_KEY.to_owned(), Value::from(index as u64));
        Self { values }
    }

    /// Returns the offset position, if this is an offset-derived cursor.
    pub fn index(&self) -> Option<usize> {
        self.values
            .get(INDEX_KEY)
            .and_then(Value::as_u64)
            .map(|n| n as usize)
    }

    /// Returns a named value.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Sets a named value.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: Value) -> Self {
        self.values.insert(key.into(), value);
        self
    }

    /// Returns the underlying map.
    pub fn values(&self) -> &BTreeMap<String, Value> {
        &self.values
    }
}

/// Metadata about one page of results.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PageInfo {
    /// Whether items exist after this page.
    pub has_next_page: bool,
    /// Whether items exist before this page.
    pub has_previous_page: bool,
    /// Cursor positioned at the first item of this page.
    pub start_cursor: Option<Cursor>,
    /// Cursor to resume after this page; present only when a next page exists.
    pub end_cursor: Option<Cursor>,
    /// Total number of items across all pages, when known.
    pub total_count: Option<u64>,
}

/// One page of items plus its metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct PagedResult<T> {
    /// The items on this page.
    pub items: Vec<T>,
    /// Page metadata.
    pub page_info: PageInfo,
}

impl<T> PagedResult<T> {
    /// Wraps a full item list as a single page.
    pub fn single_page(items: Vec<T>) -> Self {
        let total = items.len() as u64;
        Self {
            items,
            page_info: PageInfo {
                total_count: Some(total),
                ..PageInfo::default()
            },
        }
    }
}
