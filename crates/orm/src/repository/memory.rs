//! In-memory repository backend
//!
//! Every `MemoryRepository` handle points at one table of a shared
//! `MemoryDatabase`, so a transaction opened through any handle covers the
//! writes made through all of them. Nested `begin` calls behave like
//! savepoints.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use indexmap::IndexMap;
use serde_json::Value;
use tracing::trace;

use super::Repository;
use crate::error::{RepositoryError, RepositoryResult};
use crate::query::Query;
use crate::value::{is_blank, value_key, Row};

/// Per-table call counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TableStats {
    pub reads: usize,
    pub fetches: usize,
    pub counts: usize,
    pub upserts: usize,
    pub updates: usize,
    pub deletes: usize,
}

#[derive(Debug, Clone, Default)]
struct Table {
    rows: IndexMap<String, Row>,
    next_id: i64,
}

impl Table {
    fn allocate_id(&mut self) -> i64 {
        self.next_id = self.next_id.max(1);
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn observe_id(&mut self, id: &Value) {
        if let Some(n) = id.as_i64() {
            self.next_id = self.next_id.max(n + 1);
        }
    }
}

#[derive(Debug, Default)]
struct DatabaseState {
    tables: HashMap<String, Table>,
    savepoints: Vec<HashMap<String, Table>>,
    stats: HashMap<String, TableStats>,
    failing_writes: HashSet<String>,
}

impl DatabaseState {
    fn table_mut(&mut self, name: &str) -> &mut Table {
        self.tables.entry(name.to_string()).or_default()
    }

    fn stats_mut(&mut self, name: &str) -> &mut TableStats {
        self.stats.entry(name.to_string()).or_default()
    }

    fn check_writable(&self, name: &str) -> RepositoryResult<()> {
        if self.failing_writes.contains(name) {
            return Err(RepositoryError::Backend(format!(
                "writes to '{}' are failing",
                name
            )));
        }
        Ok(())
    }

    fn matching_keys(&self, name: &str, query: &Query) -> Vec<String> {
        self.tables
            .get(name)
            .map(|table| {
                table
                    .rows
                    .iter()
                    .filter(|(_, row)| query.matches(row))
                    .map(|(key, _)| key.clone())
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Shared in-memory storage for any number of tables
#[derive(Debug, Clone, Default)]
pub struct MemoryDatabase {
    state: Arc<Mutex<DatabaseState>>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self, operation: &'static str) -> RepositoryResult<MutexGuard<'_, DatabaseState>> {
        self.state
            .lock()
            .map_err(|_| RepositoryError::LockPoisoned(operation))
    }

    /// Repository handle for `table` keyed by `id`
    pub fn repository(&self, table: &str) -> MemoryRepository {
        self.repository_with_key(table, "id")
    }

    /// Repository handle for `table` with a custom primary key column
    pub fn repository_with_key(&self, table: &str, primary_key: &str) -> MemoryRepository {
        MemoryRepository {
            database: self.clone(),
            table: table.to_string(),
            primary_key: primary_key.to_string(),
        }
    }

    /// Insert rows directly, bypassing statistics; returns their ids
    pub fn seed(&self, table: &str, rows: Vec<Row>) -> Vec<Value> {
        let mut ids = Vec::with_capacity(rows.len());
        if let Ok(mut state) = self.lock("seed") {
            let table = state.table_mut(table);
            for row in rows {
                let id = match row.get("id") {
                    Some(id) if !is_blank(id) => id.clone(),
                    _ => Value::from(table.allocate_id()),
                };
                table.observe_id(&id);
                let mut stored = Row::new();
                stored.insert("id".to_string(), id.clone());
                stored.extend(row.into_iter().filter(|(k, _)| k != "id"));
                table.rows.insert(value_key(&id), stored);
                ids.push(id);
            }
        }
        ids
    }

    /// Snapshot of every row in `table`, in insertion order
    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.lock("rows")
            .map(|state| {
                state
                    .tables
                    .get(table)
                    .map(|t| t.rows.values().cloned().collect())
                    .unwrap_or_default()
            })
            .unwrap_or_default()
    }

    /// Look up a row without touching statistics
    pub fn find(&self, table: &str, id: &Value) -> Option<Row> {
        let state = self.lock("find").ok()?;
        state.tables.get(table)?.rows.get(&value_key(id)).cloned()
    }

    pub fn stats(&self, table: &str) -> TableStats {
        self.lock("stats")
            .map(|state| state.stats.get(table).copied().unwrap_or_default())
            .unwrap_or_default()
    }

    pub fn reset_stats(&self) {
        if let Ok(mut state) = self.lock("reset_stats") {
            state.stats.clear();
        }
    }

    /// Number of open (possibly nested) transactions
    pub fn transaction_depth(&self) -> usize {
        self.lock("transaction_depth")
            .map(|state| state.savepoints.len())
            .unwrap_or_default()
    }

    /// Make every write to `table` fail until `restore_writes`
    pub fn fail_writes(&self, table: &str) {
        if let Ok(mut state) = self.lock("fail_writes") {
            state.failing_writes.insert(table.to_string());
        }
    }

    pub fn restore_writes(&self, table: &str) {
        if let Ok(mut state) = self.lock("restore_writes") {
            state.failing_writes.remove(table);
        }
    }
}

/// Handle on one table of a `MemoryDatabase`
#[derive(Debug, Clone)]
pub struct MemoryRepository {
    database: MemoryDatabase,
    table: String,
    primary_key: String,
}

impl MemoryRepository {
    pub fn database(&self) -> &MemoryDatabase {
        &self.database
    }

    fn merge(row: &mut Row, data: &Row, primary_key: &str) {
        for (column, value) in data {
            if column != primary_key {
                row.insert(column.clone(), value.clone());
            }
        }
    }
}

impl Repository for MemoryRepository {
    fn table(&self) -> &str {
        &self.table
    }

    fn primary_key(&self) -> &str {
        &self.primary_key
    }

    fn read(&self, id: &Value) -> RepositoryResult<Option<Row>> {
        let mut state = self.database.lock("read")?;
        state.stats_mut(&self.table).reads += 1;
        Ok(state
            .tables
            .get(&self.table)
            .and_then(|t| t.rows.get(&value_key(id)))
            .cloned())
    }

    fn fetch(&self, query: &Query) -> RepositoryResult<Vec<Row>> {
        let mut state = self.database.lock("fetch")?;
        state.stats_mut(&self.table).fetches += 1;
        trace!(table = %self.table, filter = %query.filter_summary(), "fetch");

        let rows: Vec<Row> = state
            .tables
            .get(&self.table)
            .map(|t| t.rows.values().filter(|row| query.matches(row)).cloned().collect())
            .unwrap_or_default();

        Ok(query
            .arrange(rows)
            .iter()
            .map(|row| query.project(row))
            .collect())
    }

    fn count(&self, query: &Query) -> RepositoryResult<u64> {
        let mut state = self.database.lock("count")?;
        state.stats_mut(&self.table).counts += 1;
        trace!(table = %self.table, filter = %query.filter_summary(), "count");
        Ok(state.matching_keys(&self.table, query).len() as u64)
    }

    fn upsert(&self, data: &Row, id: Option<&Value>) -> RepositoryResult<Value> {
        let mut state = self.database.lock("upsert")?;
        state.stats_mut(&self.table).upserts += 1;
        state.check_writable(&self.table)?;

        let explicit = id
            .filter(|id| !is_blank(id))
            .or_else(|| data.get(&self.primary_key).filter(|id| !is_blank(id)))
            .cloned();

        let primary_key = self.primary_key.clone();
        let table = state.table_mut(&self.table);

        if let Some(id) = explicit {
            let key = value_key(&id);
            if let Some(row) = table.rows.get_mut(&key) {
                Self::merge(row, data, &primary_key);
                return Ok(row.get(&primary_key).cloned().unwrap_or(id));
            }
            table.observe_id(&id);
            let mut row = Row::new();
            row.insert(primary_key.clone(), id.clone());
            Self::merge(&mut row, data, &primary_key);
            table.rows.insert(key, row);
            return Ok(id);
        }

        let id = Value::from(table.allocate_id());
        let mut row = Row::new();
        row.insert(primary_key.clone(), id.clone());
        Self::merge(&mut row, data, &primary_key);
        table.rows.insert(value_key(&id), row);
        Ok(id)
    }

    fn update(&self, id: &Value, data: &Row) -> RepositoryResult<u64> {
        let mut state = self.database.lock("update")?;
        state.stats_mut(&self.table).updates += 1;
        state.check_writable(&self.table)?;

        let primary_key = self.primary_key.clone();
        match state.table_mut(&self.table).rows.get_mut(&value_key(id)) {
            Some(row) => {
                Self::merge(row, data, &primary_key);
                Ok(1)
            }
            None => Ok(0),
        }
    }

    fn update_where(&self, query: &Query, data: &Row) -> RepositoryResult<u64> {
        let mut state = self.database.lock("update_where")?;
        state.stats_mut(&self.table).updates += 1;
        state.check_writable(&self.table)?;

        let keys = state.matching_keys(&self.table, query);
        let primary_key = self.primary_key.clone();
        let table = state.table_mut(&self.table);
        for key in &keys {
            if let Some(row) = table.rows.get_mut(key) {
                Self::merge(row, data, &primary_key);
            }
        }
        Ok(keys.len() as u64)
    }

    fn delete(&self, id: &Value) -> RepositoryResult<u64> {
        let mut state = self.database.lock("delete")?;
        state.stats_mut(&self.table).deletes += 1;
        state.check_writable(&self.table)?;

        let removed = state
            .table_mut(&self.table)
            .rows
            .shift_remove(&value_key(id))
            .is_some();
        Ok(u64::from(removed))
    }

    fn delete_where(&self, query: &Query) -> RepositoryResult<u64> {
        let mut state = self.database.lock("delete_where")?;
        state.stats_mut(&self.table).deletes += 1;
        state.check_writable(&self.table)?;

        let keys = state.matching_keys(&self.table, query);
        let table = state.table_mut(&self.table);
        for key in &keys {
            table.rows.shift_remove(key);
        }
        Ok(keys.len() as u64)
    }

    fn begin(&self) -> RepositoryResult<()> {
        let mut state = self.database.lock("begin")?;
        let snapshot = state.tables.clone();
        state.savepoints.push(snapshot);
        Ok(())
    }

    fn commit(&self) -> RepositoryResult<()> {
        let mut state = self.database.lock("commit")?;
        state
            .savepoints
            .pop()
            .map(|_| ())
            .ok_or_else(|| RepositoryError::Transaction("commit without begin".to_string()))
    }

    fn rollback(&self) -> RepositoryResult<()> {
        let mut state = self.database.lock("rollback")?;
        let snapshot = state
            .savepoints
            .pop()
            .ok_or_else(|| RepositoryError::Transaction("rollback without begin".to_string()))?;
        state.tables = snapshot;
        Ok(())
    }
}
