//! Query Builder - Statement description handed to repositories

use serde_json::Value;

use crate::error::RepositoryResult;
use crate::repository::Repository;
use crate::value::Row;

use super::types::*;

/// Description of a statement against one table
///
/// Repositories decide how to execute it; the record layer only builds it.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub(crate) query_type: QueryType,
    pub(crate) table: String,
    pub(crate) fields: Vec<String>,
    pub(crate) exclude_fields: Vec<String>,
    pub(crate) conditions: Vec<WhereCondition>,
    pub(crate) order_by: Vec<(String, OrderDirection)>,
    pub(crate) limit_count: Option<usize>,
    pub(crate) offset_value: Option<usize>,
}

impl Query {
    fn new(query_type: QueryType, table: &str) -> Self {
        Self {
            query_type,
            table: table.to_string(),
            fields: Vec::new(),
            exclude_fields: Vec::new(),
            conditions: Vec::new(),
            order_by: Vec::new(),
            limit_count: None,
            offset_value: None,
        }
    }

    /// Read query against `table`
    pub fn select(table: &str) -> Self {
        Self::new(QueryType::Select, table)
    }

    /// Bulk update query against `table`
    pub fn update(table: &str) -> Self {
        Self::new(QueryType::Update, table)
    }

    /// Bulk delete query against `table`
    pub fn delete(table: &str) -> Self {
        Self::new(QueryType::Delete, table)
    }

    pub fn query_type(&self) -> QueryType {
        self.query_type
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn conditions(&self) -> &[WhereCondition] {
        &self.conditions
    }

    /// Conditions rendered for logs, joined with `AND`
    pub fn filter_summary(&self) -> String {
        self.conditions
            .iter()
            .map(|c| c.to_string())
            .collect::<Vec<_>>()
            .join(" AND ")
    }

    /// Explicit projection, empty when all columns are selected
    pub fn selected_fields(&self) -> &[String] {
        &self.fields
    }

    /// Restrict the projection to `fields`
    pub fn fields<S: AsRef<str>>(mut self, fields: &[S]) -> Self {
        self.fields = fields.iter().map(|f| f.as_ref().to_string()).collect();
        self
    }

    /// Select every column except `fields`
    pub fn fields_except<S: AsRef<str>>(mut self, fields: &[S]) -> Self {
        self.exclude_fields = fields.iter().map(|f| f.as_ref().to_string()).collect();
        self
    }

    /// Add `field` to an explicit projection; no-op when selecting all columns
    pub fn ensure_field(mut self, field: &str) -> Self {
        if !self.fields.is_empty() && !self.fields.iter().any(|f| f == field) {
            self.fields.push(field.to_string());
        }
        self.exclude_fields.retain(|f| f != field);
        self
    }

    pub fn order_by(mut self, column: &str) -> Self {
        self.order_by.push((column.to_string(), OrderDirection::Asc));
        self
    }

    pub fn order_by_desc(mut self, column: &str) -> Self {
        self.order_by.push((column.to_string(), OrderDirection::Desc));
        self
    }

    pub fn limit(mut self, count: usize) -> Self {
        self.limit_count = Some(count);
        self
    }

    pub fn offset(mut self, count: usize) -> Self {
        self.offset_value = Some(count);
        self
    }

    /// Apply a stored predicate
    pub fn bind_callback(self, condition: &Condition) -> Self {
        condition(self)
    }

    /// Apply the projection to a fetched row
    pub fn project(&self, row: &Row) -> Row {
        row.iter()
            .filter(|(column, _)| self.fields.is_empty() || self.fields.contains(column))
            .filter(|(column, _)| !self.exclude_fields.contains(column))
            .map(|(column, value)| (column.clone(), value.clone()))
            .collect()
    }

    /// Execute as a read and return every row
    pub fn all(&self, repository: &dyn Repository) -> RepositoryResult<Vec<Row>> {
        repository.fetch(self)
    }

    /// Execute as a read and return the first row
    pub fn first(&self, repository: &dyn Repository) -> RepositoryResult<Option<Row>> {
        repository.first(self)
    }

    /// Count the rows matching the conditions
    pub fn count(&self, repository: &dyn Repository) -> RepositoryResult<u64> {
        repository.count(self)
    }

    /// Value bound by the first equality condition on `column`
    pub fn equality_value(&self, column: &str) -> Option<&Value> {
        self.conditions
            .iter()
            .find(|c| c.column == column && c.operator == QueryOperator::Equal)
            .and_then(|c| c.value.as_ref())
    }
}
