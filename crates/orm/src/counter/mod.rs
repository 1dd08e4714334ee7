//! Counter cache - denormalized relation counts kept on the related side
//!
//! A model tracks a relation alias by naming the column on the related
//! model that stores how many rows of this model reference it. Only
//! many-to-one and many-to-many relations can be tracked.

pub mod sync;

pub use sync::{CounterSync, SnapshotKind, SyncCache, SyncReport};

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::Value;

use crate::query::{Condition, Query};

/// One tracked counter
#[derive(Clone)]
pub struct CounterConfig {
    /// Column on the related model holding the count
    pub field: String,
    /// Limits which rows are counted
    pub scope: Option<Condition>,
}

impl fmt::Debug for CounterConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CounterConfig")
            .field("field", &self.field)
            .field("scoped", &self.scope.is_some())
            .finish()
    }
}

impl CounterConfig {
    pub fn new(field: &str) -> Self {
        Self {
            field: field.to_string(),
            scope: None,
        }
    }

    pub fn scoped<F>(field: &str, scope: F) -> Self
    where
        F: Fn(Query) -> Query + Send + Sync + 'static,
    {
        Self {
            field: field.to_string(),
            scope: Some(Arc::new(scope)),
        }
    }

    /// Scope made of column equalities, as read from configuration files
    pub fn with_equalities(field: &str, equalities: IndexMap<String, Value>) -> Self {
        if equalities.is_empty() {
            return Self::new(field);
        }
        Self::scoped(field, move |query| {
            equalities
                .iter()
                .fold(query, |query, (column, value)| query.where_eq(column, value.clone()))
        })
    }

    /// Apply the scope to a counting query
    pub fn apply_scope(&self, query: Query) -> Query {
        match &self.scope {
            Some(scope) => query.bind_callback(scope),
            None => query,
        }
    }
}

/// Counters tracked by one model, keyed by relation alias
#[derive(Debug, Clone, Default)]
pub struct Counters {
    tracked: IndexMap<String, CounterConfig>,
}

impl Counters {
    pub fn track(&mut self, alias: &str, config: CounterConfig) {
        self.tracked.insert(alias.to_string(), config);
    }

    pub fn get(&self, alias: &str) -> Option<&CounterConfig> {
        self.tracked.get(alias)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &CounterConfig)> {
        self.tracked.iter().map(|(alias, config)| (alias.as_str(), config))
    }

    pub fn is_tracking(&self) -> bool {
        !self.tracked.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tracked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracked.is_empty()
    }
}
