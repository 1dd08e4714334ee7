//! Repository boundary - storage collaborators used by records
//!
//! A repository owns one table. It executes `Query` descriptions and
//! provides the transactional scope records wrap their writes in.

pub mod memory;

pub use memory::{MemoryDatabase, MemoryRepository, TableStats};

use serde_json::Value;

use crate::error::RepositoryResult;
use crate::query::Query;
use crate::value::Row;

/// Storage collaborator for one table
pub trait Repository: Send + Sync {
    /// Table (or collection) name
    fn table(&self) -> &str;

    /// Primary key column
    fn primary_key(&self) -> &str {
        "id"
    }

    /// Read a single row by primary key
    fn read(&self, id: &Value) -> RepositoryResult<Option<Row>>;

    /// Fresh read query bound to this table
    fn select(&self) -> Query {
        Query::select(self.table())
    }

    /// Execute a read query
    fn fetch(&self, query: &Query) -> RepositoryResult<Vec<Row>>;

    /// Execute a read query and keep the first row
    fn first(&self, query: &Query) -> RepositoryResult<Option<Row>> {
        let query = query.clone().limit(1);
        Ok(self.fetch(&query)?.into_iter().next())
    }

    /// Count rows matching the query conditions
    fn count(&self, query: &Query) -> RepositoryResult<u64>;

    /// Insert `data`, or update the row identified by `id`; returns the row id
    fn upsert(&self, data: &Row, id: Option<&Value>) -> RepositoryResult<Value>;

    /// Update one row, returning the affected count
    fn update(&self, id: &Value, data: &Row) -> RepositoryResult<u64>;

    /// Update every row matching the query conditions
    fn update_where(&self, query: &Query, data: &Row) -> RepositoryResult<u64>;

    /// Delete one row, returning the affected count
    fn delete(&self, id: &Value) -> RepositoryResult<u64>;

    /// Delete every row matching the query conditions
    fn delete_where(&self, query: &Query) -> RepositoryResult<u64>;

    fn begin(&self) -> RepositoryResult<()>;

    fn commit(&self) -> RepositoryResult<()>;

    fn rollback(&self) -> RepositoryResult<()>;
}
