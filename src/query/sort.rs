//! Multi-key stable sorting over serialized entity documents. The
//! `priority` field sorts by semantic rank (critical > high > medium > low),
//! everything else by natural comparison; missing values sort last.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::filter::lookup;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SortKey {
    pub field: String,
    #[serde(default)]
    pub descending: bool,
}

impl SortKey {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            descending: false,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            descending: true,
        }
    }
}

fn priority_rank(value: &Value) -> Option<u8> {
    match value.as_str()? {
        "critical" => Some(4),
        "high" => Some(3),
        "medium" => Some(2),
        "low" => Some(1),
        _ => None,
    }
}

fn compare_by_key(a: &Value, b: &Value, key: &SortKey) -> Ordering {
    let left = lookup(a, &key.field);
    let right = lookup(b, &key.field);

    let ordering = match (left, right) {
        (None, None) => Ordering::Equal,
        // Missing values sort last regardless of direction.
        (None, Some(_)) => return Ordering::Greater,
        (Some(_), None) => return Ordering::Less,
        (Some(l), Some(r)) => {
            if key.field == "priority" {
                match (priority_rank(l), priority_rank(r)) {
                    // Semantic rank, not lexical order of the labels.
                    (Some(x), Some(y)) => x.cmp(&y),
                    _ => compare_values(l, r),
                }
            } else {
                compare_values(l, r)
            }
        }
    };

    if key.descending {
        ordering.reverse()
    } else {
        ordering
    }
}

fn compare_values(a: &Value, b: &Value) -> Ordering {
    if let (Some(x), Some(y)) = (a.as_f64(), b.as_f64()) {
        return x.partial_cmp(&y).unwrap_or(Ordering::Equal);
    }
    match (a, b) {
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Greater,
        (_, Value::Null) => Ordering::Less,
        _ => Ordering::Equal,
    }
}

/// Stable sort of `(document, payload)` pairs by the given keys.
pub fn sort_documents<T>(rows: &mut [(Value, T)], keys: &[SortKey]) {
    if keys.is_empty() {
        return;
    }
    rows.sort_by(|(a, _), (b, _)| {
        for key in keys {
            let ordering = compare_by_key(a, b, key);
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });
}
