//! Filter trees evaluated against serialized entity documents. Conditions
//! address fields by dotted path (`source.type`), combine via `and`/`or`,
//! and never error: a condition that cannot be evaluated is simply false
//! for that row.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FilterOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    Nin,
    Contains,
    StartsWith,
    EndsWith,
    Exists,
    Regex,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Combinator {
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterCondition {
    pub field: String,
    pub op: FilterOp,
    #[serde(default)]
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterNode {
    Group {
        combinator: Combinator,
        conditions: Vec<FilterNode>,
    },
    Condition(FilterCondition),
}

impl FilterNode {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Condition(FilterCondition {
            field: field.into(),
            op: FilterOp::Eq,
            value: value.into(),
        })
    }

    pub fn condition(field: impl Into<String>, op: FilterOp, value: impl Into<Value>) -> Self {
        Self::Condition(FilterCondition {
            field: field.into(),
            op,
            value: value.into(),
        })
    }

    pub fn and(conditions: Vec<FilterNode>) -> Self {
        Self::Group {
            combinator: Combinator::And,
            conditions,
        }
    }

    pub fn or(conditions: Vec<FilterNode>) -> Self {
        Self::Group {
            combinator: Combinator::Or,
            conditions,
        }
    }

    pub fn matches(&self, document: &Value) -> bool {
        match self {
            Self::Group {
                combinator,
                conditions,
            } => match combinator {
                Combinator::And => conditions.iter().all(|c| c.matches(document)),
                Combinator::Or => conditions.iter().any(|c| c.matches(document)),
            },
            Self::Condition(condition) => eval_condition(condition, document),
        }
    }
}

/// Resolve a dotted field path inside a document.
pub fn lookup<'a>(document: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = document;
    for segment in path.split('.') {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

fn eval_condition(condition: &FilterCondition, document: &Value) -> bool {
    let field = lookup(document, &condition.field);

    match condition.op {
        FilterOp::Exists => {
            let wanted = condition.value.as_bool().unwrap_or(true);
            let present = matches!(field, Some(v) if !v.is_null());
            present == wanted
        }
        FilterOp::Eq => field.map(|v| values_equal(v, &condition.value)).unwrap_or(false),
        FilterOp::Ne => field.map(|v| !values_equal(v, &condition.value)).unwrap_or(true),
        FilterOp::Gt => compare(field, &condition.value)
            .map(|o| o == std::cmp::Ordering::Greater)
            .unwrap_or(false),
        FilterOp::Gte => compare(field, &condition.value)
            .map(|o| o != std::cmp::Ordering::Less)
            .unwrap_or(false),
        FilterOp::Lt => compare(field, &condition.value)
            .map(|o| o == std::cmp::Ordering::Less)
            .unwrap_or(false),
        FilterOp::Lte => compare(field, &condition.value)
            .map(|o| o != std::cmp::Ordering::Greater)
            .unwrap_or(false),
        FilterOp::In => condition
            .value
            .as_array()
            .map(|candidates| {
                field
                    .map(|v| candidates.iter().any(|c| values_equal(v, c)))
                    .unwrap_or(false)
            })
            .unwrap_or(false),
        FilterOp::Nin => condition
            .value
            .as_array()
            .map(|candidates| {
                field
                    .map(|v| !candidates.iter().any(|c| values_equal(v, c)))
                    .unwrap_or(true)
            })
            .unwrap_or(false),
        FilterOp::Contains => match field {
            Some(Value::String(s)) => condition
                .value
                .as_str()
                .map(|needle| s.contains(needle))
                .unwrap_or(false),
            Some(Value::Array(items)) => items.iter().any(|v| values_equal(v, &condition.value)),
            _ => false,
        },
        FilterOp::StartsWith => string_pair(field, &condition.value)
            .map(|(s, prefix)| s.starts_with(prefix))
            .unwrap_or(false),
        FilterOp::EndsWith => string_pair(field, &condition.value)
            .map(|(s, suffix)| s.ends_with(suffix))
            .unwrap_or(false),
        FilterOp::Regex => {
            let (Some(Value::String(s)), Some(pattern)) = (field, condition.value.as_str()) else {
                return false;
            };
            // Invalid patterns are silently false for this row.
            regex::RegexBuilder::new(pattern)
                .case_insensitive(true)
                .build()
                .map(|re| re.is_match(s))
                .unwrap_or(false)
        }
    }
}

fn string_pair<'a>(field: Option<&'a Value>, value: &'a Value) -> Option<(&'a str, &'a str)> {
    Some((field?.as_str()?, value.as_str()?))
}

/// Equality with numeric coercion: `1` and `1.0` are the same value.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

/// Natural ordering between a document field and a literal: numbers by
/// magnitude, strings lexicographically, booleans false < true. `None` when
/// the pair is incomparable or the field is absent.
pub fn compare(field: Option<&Value>, literal: &Value) -> Option<std::cmp::Ordering> {
    let field = field?;
    if let (Some(x), Some(y)) = (field.as_f64(), literal.as_f64()) {
        return x.partial_cmp(&y);
    }
    match (field, literal) {
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc() -> Value {
        json!({
            "title": "User Authentication",
            "priority": "high",
            "votes": 7,
            "source": {"type": "derived", "parentId": "r0"},
            "acceptanceCriteria": ["login", "logout"],
            "rationale": null
        })
    }

    #[test]
    fn dotted_paths_reach_nested_fields() {
        let node = FilterNode::eq("source.type", "derived");
        assert!(node.matches(&doc()));
        assert!(!FilterNode::eq("source.type", "discovered").matches(&doc()));
    }

    #[test]
    fn numeric_comparisons() {
        assert!(FilterNode::condition("votes", FilterOp::Gt, 5).matches(&doc()));
        assert!(FilterNode::condition("votes", FilterOp::Lte, 7).matches(&doc()));
        assert!(!FilterNode::condition("votes", FilterOp::Lt, 7).matches(&doc()));
        assert!(FilterNode::condition("votes", FilterOp::Gte, 7.0).matches(&doc()));
    }

    #[test]
    fn in_and_nin() {
        assert!(FilterNode::condition("priority", FilterOp::In, json!(["high", "critical"]))
            .matches(&doc()));
        assert!(FilterNode::condition("priority", FilterOp::Nin, json!(["low"])).matches(&doc()));
        assert!(!FilterNode::condition("missing", FilterOp::In, json!(["x"])).matches(&doc()));
    }

    #[test]
    fn contains_covers_strings_and_arrays() {
        assert!(FilterNode::condition("title", FilterOp::Contains, "Auth").matches(&doc()));
        assert!(FilterNode::condition("acceptanceCriteria", FilterOp::Contains, "login")
            .matches(&doc()));
        assert!(!FilterNode::condition("acceptanceCriteria", FilterOp::Contains, "signup")
            .matches(&doc()));
    }

    #[test]
    fn exists_treats_null_as_absent() {
        assert!(FilterNode::condition("rationale", FilterOp::Exists, false).matches(&doc()));
        assert!(FilterNode::condition("title", FilterOp::Exists, true).matches(&doc()));
        assert!(FilterNode::condition("ghost", FilterOp::Exists, false).matches(&doc()));
    }

    #[test]
    fn invalid_regex_is_false_not_an_error() {
        assert!(!FilterNode::condition("title", FilterOp::Regex, "([").matches(&doc()));
        assert!(FilterNode::condition("title", FilterOp::Regex, "user auth").matches(&doc()));
    }

    #[test]
    fn groups_combine() {
        let node = FilterNode::and(vec![
            FilterNode::eq("priority", "high"),
            FilterNode::or(vec![
                FilterNode::condition("votes", FilterOp::Gt, 100),
                FilterNode::condition("title", FilterOp::StartsWith, "User"),
            ]),
        ]);
        assert!(node.matches(&doc()));
    }
}
