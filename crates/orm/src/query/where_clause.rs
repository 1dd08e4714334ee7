//! Query WHERE clause operations

use super::builder::Query;
use super::types::*;
use serde_json::Value;

impl Query {
    fn push_condition(
        mut self,
        column: &str,
        operator: QueryOperator,
        value: Option<Value>,
        values: Vec<Value>,
    ) -> Self {
        self.conditions.push(WhereCondition {
            column: column.to_string(),
            operator,
            value,
            values,
        });
        self
    }

    /// Add WHERE condition with equality
    pub fn where_eq<T: Into<Value>>(self, column: &str, value: T) -> Self {
        self.push_condition(column, QueryOperator::Equal, Some(value.into()), Vec::new())
    }

    /// Add WHERE condition with not equal
    pub fn where_ne<T: Into<Value>>(self, column: &str, value: T) -> Self {
        self.push_condition(column, QueryOperator::NotEqual, Some(value.into()), Vec::new())
    }

    pub fn where_gt<T: Into<Value>>(self, column: &str, value: T) -> Self {
        self.push_condition(column, QueryOperator::GreaterThan, Some(value.into()), Vec::new())
    }

    pub fn where_gte<T: Into<Value>>(self, column: &str, value: T) -> Self {
        self.push_condition(
            column,
            QueryOperator::GreaterThanOrEqual,
            Some(value.into()),
            Vec::new(),
        )
    }

    pub fn where_lt<T: Into<Value>>(self, column: &str, value: T) -> Self {
        self.push_condition(column, QueryOperator::LessThan, Some(value.into()), Vec::new())
    }

    pub fn where_lte<T: Into<Value>>(self, column: &str, value: T) -> Self {
        self.push_condition(
            column,
            QueryOperator::LessThanOrEqual,
            Some(value.into()),
            Vec::new(),
        )
    }

    /// Add WHERE condition with LIKE (`%` and `_` wildcards)
    pub fn where_like(self, column: &str, pattern: &str) -> Self {
        self.push_condition(
            column,
            QueryOperator::Like,
            Some(Value::String(pattern.to_string())),
            Vec::new(),
        )
    }

    pub fn where_not_like(self, column: &str, pattern: &str) -> Self {
        self.push_condition(
            column,
            QueryOperator::NotLike,
            Some(Value::String(pattern.to_string())),
            Vec::new(),
        )
    }

    /// Add WHERE condition with a textual operator; unknown operators fall back to equality
    pub fn where_condition<T: Into<Value>>(self, column: &str, operator: &str, value: T) -> Self {
        let operator = QueryOperator::parse(operator).unwrap_or(QueryOperator::Equal);
        self.push_condition(column, operator, Some(value.into()), Vec::new())
    }

    /// Add WHERE condition with IN
    pub fn where_in<T: Into<Value>>(self, column: &str, values: Vec<T>) -> Self {
        let values = values.into_iter().map(Into::into).collect();
        self.push_condition(column, QueryOperator::In, None, values)
    }

    pub fn where_not_in<T: Into<Value>>(self, column: &str, values: Vec<T>) -> Self {
        let values = values.into_iter().map(Into::into).collect();
        self.push_condition(column, QueryOperator::NotIn, None, values)
    }

    pub fn where_null(self, column: &str) -> Self {
        self.push_condition(column, QueryOperator::IsNull, None, Vec::new())
    }

    pub fn where_not_null(self, column: &str) -> Self {
        self.push_condition(column, QueryOperator::IsNotNull, None, Vec::new())
    }

    pub fn where_between<T: Into<Value>>(self, column: &str, start: T, end: T) -> Self {
        self.push_condition(
            column,
            QueryOperator::Between,
            None,
            vec![start.into(), end.into()],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_where_condition_parses_operators() {
        let query = Query::select("posts")
            .where_condition("views", ">=", 10)
            .where_condition("title", "not like", "draft%")
            .where_condition("state", "~", "odd");

        let ops: Vec<_> = query.conditions().iter().map(|c| c.operator.clone()).collect();
        assert_eq!(
            ops,
            vec![
                QueryOperator::GreaterThanOrEqual,
                QueryOperator::NotLike,
                QueryOperator::Equal
            ]
        );
    }

    #[test]
    fn test_where_in_collects_values() {
        let query = Query::select("genres").where_in("id", vec![1, 2, 3]);
        let condition = &query.conditions()[0];
        assert_eq!(condition.operator, QueryOperator::In);
        assert_eq!(condition.values, vec![json!(1), json!(2), json!(3)]);
        assert!(condition.value.is_none());
    }
}
