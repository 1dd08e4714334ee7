//! Query evaluation against in-memory rows

use std::cmp::Ordering;

use regex::Regex;
use serde_json::Value;

use super::builder::Query;
use super::types::*;
use crate::value::{loose_cmp, loose_eq, Row};

fn like_matches(pattern: &str, value: &Value) -> bool {
    let text = match value {
        Value::String(s) => s.clone(),
        Value::Null => return false,
        other => other.to_string(),
    };

    let mut expr = String::from("(?s)^");
    for ch in pattern.chars() {
        match ch {
            '%' => expr.push_str(".*"),
            '_' => expr.push('.'),
            other => expr.push_str(&regex::escape(&other.to_string())),
        }
    }
    expr.push('$');

    Regex::new(&expr)
        .map(|re| re.is_match(&text))
        .unwrap_or(false)
}

impl WhereCondition {
    /// Whether `row` satisfies this condition; absent columns read as null
    pub fn matches(&self, row: &Row) -> bool {
        let actual = row.get(&self.column).unwrap_or(&Value::Null);
        let expected = self.value.as_ref().unwrap_or(&Value::Null);

        match self.operator {
            QueryOperator::Equal => {
                if expected.is_null() {
                    actual.is_null()
                } else {
                    loose_eq(actual, expected)
                }
            }
            QueryOperator::NotEqual => !loose_eq(actual, expected),
            QueryOperator::GreaterThan => {
                !actual.is_null() && loose_cmp(actual, expected) == Some(Ordering::Greater)
            }
            QueryOperator::GreaterThanOrEqual => {
                !actual.is_null()
                    && matches!(
                        loose_cmp(actual, expected),
                        Some(Ordering::Greater | Ordering::Equal)
                    )
            }
            QueryOperator::LessThan => {
                !actual.is_null() && loose_cmp(actual, expected) == Some(Ordering::Less)
            }
            QueryOperator::LessThanOrEqual => {
                !actual.is_null()
                    && matches!(
                        loose_cmp(actual, expected),
                        Some(Ordering::Less | Ordering::Equal)
                    )
            }
            QueryOperator::Like => match expected {
                Value::String(pattern) => like_matches(pattern, actual),
                _ => false,
            },
            QueryOperator::NotLike => match expected {
                Value::String(pattern) => !like_matches(pattern, actual),
                _ => true,
            },
            QueryOperator::In => self.values.iter().any(|v| loose_eq(actual, v)),
            QueryOperator::NotIn => !self.values.iter().any(|v| loose_eq(actual, v)),
            QueryOperator::IsNull => actual.is_null(),
            QueryOperator::IsNotNull => !actual.is_null(),
            QueryOperator::Between => match self.values.as_slice() {
                [start, end] => {
                    !actual.is_null()
                        && matches!(
                            loose_cmp(actual, start),
                            Some(Ordering::Greater | Ordering::Equal)
                        )
                        && matches!(
                            loose_cmp(actual, end),
                            Some(Ordering::Less | Ordering::Equal)
                        )
                }
                _ => false,
            },
        }
    }
}

impl Query {
    /// Whether `row` satisfies every condition
    pub fn matches(&self, row: &Row) -> bool {
        self.conditions.iter().all(|condition| condition.matches(row))
    }

    /// Sort, then apply offset and limit
    pub fn arrange(&self, mut rows: Vec<Row>) -> Vec<Row> {
        if !self.order_by.is_empty() {
            rows.sort_by(|a, b| {
                for (column, direction) in &self.order_by {
                    let left = a.get(column).unwrap_or(&Value::Null);
                    let right = b.get(column).unwrap_or(&Value::Null);
                    let ordering = loose_cmp(left, right).unwrap_or(Ordering::Equal);
                    let ordering = match direction {
                        OrderDirection::Asc => ordering,
                        OrderDirection::Desc => ordering.reverse(),
                    };
                    if ordering != Ordering::Equal {
                        return ordering;
                    }
                }
                Ordering::Equal
            });
        }

        let offset = self.offset_value.unwrap_or(0);
        let limit = self.limit_count.unwrap_or(usize::MAX);
        rows.into_iter().skip(offset).take(limit).collect()
    }
}
