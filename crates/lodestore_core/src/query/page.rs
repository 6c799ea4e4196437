//! Offset-encoded cursor pagination.
//!
//! Backends without native keyset cursors slice their full result list
//! through this window. The cursor carries `{"_index": n}`.

use crate::query::{Cursor, PageInfo, PagedResult, Query};

/// Slices `items` into the page described by the query's `first_count`
/// and `after_cursor`.
///
/// With no pagination fields set, the whole list is returned as a single
/// page with `total_count` populated.
pub fn paginate<T>(items: Vec<T>, query: Option<&Query>) -> PagedResult<T> {
    let total = items.len();
    let first_count = query.and_then(|q| q.first_count);
    let after = query.and_then(|q| q.after_cursor.as_ref());

    let start_index = after
        .and_then(Cursor::index)
        .unwrap_or(0)
        .min(total);
    let end_index = match first_count {
        Some(count) => (start_index + count).min(total),
        None => total,
    };

    let page_items: Vec<T> = items
        .into_iter()
        .skip(start_index)
        .take(end_index - start_index)
        .collect();

    let has_next_page = end_index < total;
    let has_previous_page = start_index > 0;

    PagedResult {
        page_info: PageInfo {
            has_next_page,
            has_previous_page,
            start_cursor: (!page_items.is_empty()).then(|| Cursor::from_index(start_index)),
            end_cursor: has_next_page.then(|| Cursor::from_index(end_index)),
            total_count: Some(total as u64),
        },
        items: page_items,
    }
}
