//! Query Types - conditions, ordering and statement kinds

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use super::builder::Query;

/// Comparison applied by a `WhereCondition`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryOperator {
    Equal,
    NotEqual,
    GreaterThan,
    GreaterThanOrEqual,
    LessThan,
    LessThanOrEqual,
    Like,
    NotLike,
    In,
    NotIn,
    IsNull,
    IsNotNull,
    Between,
}

/// Operators accepted in textual form by `where_condition`
const SCALAR_OPERATORS: [QueryOperator; 8] = [
    QueryOperator::Equal,
    QueryOperator::NotEqual,
    QueryOperator::GreaterThan,
    QueryOperator::GreaterThanOrEqual,
    QueryOperator::LessThan,
    QueryOperator::LessThanOrEqual,
    QueryOperator::Like,
    QueryOperator::NotLike,
];

impl QueryOperator {
    pub fn symbol(self) -> &'static str {
        match self {
            QueryOperator::Equal => "=",
            QueryOperator::NotEqual => "!=",
            QueryOperator::GreaterThan => ">",
            QueryOperator::GreaterThanOrEqual => ">=",
            QueryOperator::LessThan => "<",
            QueryOperator::LessThanOrEqual => "<=",
            QueryOperator::Like => "LIKE",
            QueryOperator::NotLike => "NOT LIKE",
            QueryOperator::In => "IN",
            QueryOperator::NotIn => "NOT IN",
            QueryOperator::IsNull => "IS NULL",
            QueryOperator::IsNotNull => "IS NOT NULL",
            QueryOperator::Between => "BETWEEN",
        }
    }

    /// Parse a scalar comparison (`=`, `<>`, `like`, ...)
    pub fn parse(operator: &str) -> Option<Self> {
        let wanted = operator.trim().to_ascii_uppercase();
        match wanted.as_str() {
            "==" => Some(QueryOperator::Equal),
            "<>" => Some(QueryOperator::NotEqual),
            other => SCALAR_OPERATORS
                .iter()
                .copied()
                .find(|op| op.symbol() == other),
        }
    }

    /// Whether the operator reads `values` instead of `value`
    pub fn takes_list(self) -> bool {
        matches!(
            self,
            QueryOperator::In | QueryOperator::NotIn | QueryOperator::Between
        )
    }
}

impl fmt::Display for QueryOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// One filter of a query, matched against stored rows
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WhereCondition {
    pub column: String,
    pub operator: QueryOperator,
    pub value: Option<Value>,
    /// Operands of list operators
    pub values: Vec<Value>,
}

impl fmt::Display for WhereCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.value, self.operator.takes_list()) {
            (_, true) => write!(f, "{} {} {:?}", self.column, self.operator, self.values),
            (Some(value), false) => write!(f, "{} {} {}", self.column, self.operator, value),
            (None, false) => write!(f, "{} {}", self.column, self.operator),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderDirection {
    Asc,
    Desc,
}

/// Statement kinds a query can describe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryType {
    Select,
    Insert,
    Update,
    Delete,
}

impl QueryType {
    pub fn as_str(self) -> &'static str {
        match self {
            QueryType::Select => "select",
            QueryType::Insert => "insert",
            QueryType::Update => "update",
            QueryType::Delete => "delete",
        }
    }
}

impl fmt::Display for QueryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Query-modifying predicate attached to relations and counter scopes
pub type Condition = Arc<dyn Fn(Query) -> Query + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_textual_operators() {
        assert_eq!(QueryOperator::parse("<>"), Some(QueryOperator::NotEqual));
        assert_eq!(QueryOperator::parse(" not like "), Some(QueryOperator::NotLike));
        assert_eq!(QueryOperator::parse(">="), Some(QueryOperator::GreaterThanOrEqual));
        assert_eq!(QueryOperator::parse("in"), None);
        assert_eq!(QueryOperator::parse("~"), None);
    }

    #[test]
    fn test_condition_display() {
        let condition = WhereCondition {
            column: "genre_id".to_string(),
            operator: QueryOperator::In,
            value: None,
            values: vec![json!(1), json!(2)],
        };
        assert_eq!(condition.to_string(), "genre_id IN [Number(1), Number(2)]");
        assert_eq!(QueryType::Delete.to_string(), "delete");
    }
}
