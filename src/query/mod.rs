//! Filtering, sorting, pagination and LIKE matching over serialized entity
//! documents.

use serde::{Deserialize, Serialize};

mod filter;
mod pattern;
mod sort;

pub use filter::{lookup, values_equal, Combinator, FilterCondition, FilterNode, FilterOp};
pub use pattern::like_match;
pub use sort::{sort_documents, SortKey};

pub const DEFAULT_PAGE_LIMIT: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageRequest {
    #[serde(default)]
    pub offset: usize,
    pub limit: usize,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: DEFAULT_PAGE_LIMIT,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<FilterNode>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sort: Vec<SortKey>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pagination: Option<PageRequest>,
}

impl QueryOptions {
    pub fn filtered(filter: FilterNode) -> Self {
        Self {
            filter: Some(filter),
            ..Self::default()
        }
    }
}

/// One page of query results. `total` counts all post-filter matches, not
/// just the returned slice.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryPage<T> {
    pub items: Vec<T>,
    pub total: usize,
    pub offset: usize,
    pub limit: usize,
    pub has_more: bool,
}

impl<T> QueryPage<T> {
    /// Paginate an already filtered and sorted result set.
    pub fn slice(items: Vec<T>, pagination: Option<PageRequest>) -> Self {
        let total = items.len();
        let page = pagination.unwrap_or_default();
        let offset = page.offset.min(total);
        let end = offset.saturating_add(page.limit).min(total);
        let items: Vec<T> = items
            .into_iter()
            .skip(offset)
            .take(end - offset)
            .collect();
        Self {
            items,
            total,
            offset,
            limit: page.limit,
            has_more: end < total,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slice_reports_total_and_has_more() {
        let page = QueryPage::slice(
            (0..10).collect::<Vec<_>>(),
            Some(PageRequest { offset: 4, limit: 3 }),
        );
        assert_eq!(page.items, vec![4, 5, 6]);
        assert_eq!(page.total, 10);
        assert!(page.has_more);

        let tail = QueryPage::slice(
            (0..10).collect::<Vec<_>>(),
            Some(PageRequest { offset: 8, limit: 5 }),
        );
        assert_eq!(tail.items, vec![8, 9]);
        assert!(!tail.has_more);
    }

    #[test]
    fn offset_past_the_end_yields_empty_page() {
        let page = QueryPage::slice(vec![1, 2], Some(PageRequest { offset: 10, limit: 5 }));
        assert!(page.items.is_empty());
        assert_eq!(page.total, 2);
        assert!(!page.has_more);
    }
}
