//! Counter synchronization
//!
//! Counts are recomputed from storage, never incremented. A `CounterSync`
//! runs one batch: rows about to be deleted are snapshotted first, then
//! `sync_counters` recounts each distinct target once and clears the
//! batch cache.

use std::collections::{HashMap, HashSet};

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, trace, warn};

use crate::error::{OrmError, OrmResult};
use crate::model::{ModelDefinition, Registry};
use crate::relationships::{Relation, RelationKind};
use crate::value::{is_blank, value_key, Row};

use super::CounterConfig;

/// What a snapshot holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SnapshotKind {
    /// Junction rows referencing a record about to be deleted
    JunctionRows,
    /// The owner row itself, read before it is deleted
    OwnerRow,
    /// The owner row as loaded before a save changed it
    PreviousOwnerRow,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SnapshotKey {
    kind: SnapshotKind,
    alias: String,
    id: String,
}

impl SnapshotKey {
    fn new(kind: SnapshotKind, alias: &str, id: &Value) -> Self {
        Self {
            kind,
            alias: alias.to_string(),
            id: value_key(id),
        }
    }
}

/// Per-batch cache: snapshots plus the set of targets already recounted
#[derive(Debug, Default)]
pub struct SyncCache {
    snapshots: HashMap<SnapshotKey, Vec<Row>>,
    processed: HashSet<(String, String, String)>,
}

impl SyncCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&mut self, kind: SnapshotKind, alias: &str, id: &Value, rows: Vec<Row>) {
        self.snapshots.insert(SnapshotKey::new(kind, alias, id), rows);
    }

    pub fn snapshot(&self, kind: SnapshotKind, alias: &str, id: &Value) -> Option<&[Row]> {
        self.snapshots
            .get(&SnapshotKey::new(kind, alias, id))
            .map(Vec::as_slice)
    }

    /// Record that `(alias, related_key, value)` was recounted; false when
    /// it already was in this batch
    pub fn mark_processed(&mut self, alias: &str, related_key: &str, value: &Value) -> bool {
        self.processed.insert((
            alias.to_string(),
            related_key.to_string(),
            value_key(value),
        ))
    }

    pub fn snapshot_count(&self) -> usize {
        self.snapshots.len()
    }

    pub fn processed_count(&self) -> usize {
        self.processed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty() && self.processed.is_empty()
    }

    pub fn clear(&mut self) {
        self.snapshots.clear();
        self.processed.clear();
    }
}

/// Outcome of one `sync_counters` call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Targets whose count was recomputed and written
    pub recounted: usize,
    /// Targets skipped because they were already recounted in the batch
    pub skipped: usize,
    /// Failed reads or counter writes
    pub failed: usize,
}

impl SyncReport {
    pub fn is_clean(&self) -> bool {
        self.failed == 0
    }
}

/// One synchronization batch for the counters tracked by `model`
pub struct CounterSync<'a> {
    registry: &'a Registry,
    model: &'a ModelDefinition,
    cache: SyncCache,
}

impl<'a> CounterSync<'a> {
    pub fn new(registry: &'a Registry, model: &'a ModelDefinition) -> Self {
        Self {
            registry,
            model,
            cache: SyncCache::new(),
        }
    }

    pub fn cache(&self) -> &SyncCache {
        &self.cache
    }

    fn tracked_relation(&self, alias: &str) -> Option<Relation> {
        match self.model.relation_config(alias) {
            Some(config) => Some(Relation::new(config, self.model.name())),
            None => {
                warn!(model = %self.model.name(), alias, "Tracked counter has no relation");
                None
            }
        }
    }

    /// Capture what the recount needs once `ids` are gone
    pub fn snapshot_before_delete(&mut self, ids: &[Value]) -> OrmResult<()> {
        let model = self.model;
        for (alias, _) in model.counters().iter() {
            let Some(relation) = self.tracked_relation(alias) else {
                continue;
            };

            match relation.kind() {
                RelationKind::ManyToMany { .. } => {
                    let (junction, owner_column, _) = relation.junction().unwrap_or_default();
                    let junction = self.registry.definition(junction)?;
                    for id in ids {
                        let query = junction
                            .repository()
                            .select()
                            .where_eq(owner_column, id.clone());
                        let rows = junction.repository().fetch(&query)?;
                        trace!(alias, rows = rows.len(), "Snapshot junction rows");
                        self.cache.store(SnapshotKind::JunctionRows, alias, id, rows);
                    }
                }
                RelationKind::ManyToOne { .. } => {
                    for id in ids {
                        let row = model.repository().read(id)?;
                        self.cache
                            .store(SnapshotKind::OwnerRow, alias, id, row.into_iter().collect());
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Keep the pre-save state of a record so a moved many-to-one link
    /// also recounts its previous target
    pub fn remember_previous(&mut self, id: &Value, previous: &Row) {
        if previous.is_empty() {
            return;
        }
        let model = self.model;
        for (alias, _) in model.counters().iter() {
            self.cache
                .store(SnapshotKind::PreviousOwnerRow, alias, id, vec![previous.clone()]);
        }
    }

    /// Recount every target referenced by `ids` and clear the batch cache
    ///
    /// Failures are logged and counted; they never abort the batch.
    pub fn sync_counters(&mut self, ids: &[Value]) -> SyncReport {
        let mut report = SyncReport::default();
        let model = self.model;

        for (alias, counter) in model.counters().iter() {
            let Some(relation) = self.tracked_relation(alias) else {
                report.failed += 1;
                continue;
            };

            let result = match relation.kind() {
                RelationKind::ManyToMany { .. } => {
                    self.sync_many_to_many(&relation, counter, ids, &mut report)
                }
                RelationKind::ManyToOne { .. } => {
                    self.sync_many_to_one(&relation, counter, ids, &mut report)
                }
                _ => Ok(()),
            };

            if let Err(err) = result {
                warn!(model = %model.name(), alias, error = %err, "Counter sync failed");
                report.failed += 1;
            }
        }

        self.flush_cache();
        debug!(
            model = %model.name(),
            recounted = report.recounted,
            skipped = report.skipped,
            failed = report.failed,
            "Counters synchronized"
        );
        report
    }

    /// Discard snapshots and the processed set
    pub fn flush_cache(&mut self) {
        self.cache.clear();
    }

    fn sync_many_to_many(
        &mut self,
        relation: &Relation,
        counter: &CounterConfig,
        ids: &[Value],
        report: &mut SyncReport,
    ) -> OrmResult<()> {
        let alias = relation.alias();
        let (junction, owner_column, related_column) = relation.junction().unwrap_or_default();
        let junction = self.registry.definition(junction)?;
        let related = self.registry.definition(relation.related_class())?;

        for id in ids {
            let rows = match self.cache.snapshot(SnapshotKind::JunctionRows, alias, id) {
                Some(rows) => rows.to_vec(),
                None => {
                    let query = junction
                        .repository()
                        .select()
                        .where_eq(owner_column, id.clone());
                    junction.repository().fetch(&query)?
                }
            };

            for row in rows {
                let Some(value) = row.get(related_column).filter(|v| !is_blank(v)) else {
                    continue;
                };
                if !self.cache.mark_processed(alias, related_column, value) {
                    report.skipped += 1;
                    continue;
                }

                let query = counter.apply_scope(
                    junction
                        .repository()
                        .select()
                        .where_eq(related_column, value.clone()),
                );
                let count = junction.repository().count(&query)?;
                write_count(&related, value, counter, count, report);
            }
        }
        Ok(())
    }

    fn sync_many_to_one(
        &mut self,
        relation: &Relation,
        counter: &CounterConfig,
        ids: &[Value],
        report: &mut SyncReport,
    ) -> OrmResult<()> {
        let alias = relation.alias();
        let foreign_key = relation.foreign_key();
        let related = self.registry.definition(relation.related_class())?;
        let model = self.model;
        let owners = model.repository();

        for id in ids {
            let current = match self.cache.snapshot(SnapshotKind::OwnerRow, alias, id) {
                Some(rows) => rows.first().cloned(),
                None => owners.read(id)?,
            };

            let mut targets: Vec<Value> = current
                .iter()
                .filter_map(|row| row.get(foreign_key).cloned())
                .collect();
            if let Some(previous) = self.cache.snapshot(SnapshotKind::PreviousOwnerRow, alias, id) {
                targets.extend(previous.iter().filter_map(|row| row.get(foreign_key).cloned()));
            }

            for value in targets.iter().filter(|v| !is_blank(v)) {
                if !self.cache.mark_processed(alias, foreign_key, value) {
                    report.skipped += 1;
                    continue;
                }

                let query =
                    counter.apply_scope(owners.select().where_eq(foreign_key, value.clone()));
                let count = owners.count(&query)?;
                write_count(&related, value, counter, count, report);
            }
        }
        Ok(())
    }
}

/// Best effort: a failed write is logged and counted, never raised
fn write_count(
    related: &ModelDefinition,
    id: &Value,
    counter: &CounterConfig,
    count: u64,
    report: &mut SyncReport,
) {
    let mut data = Row::new();
    data.insert(counter.field.clone(), Value::from(count));

    match related.repository().update(id, &data) {
        Ok(_) => {
            trace!(model = %related.name(), field = %counter.field, count, "Counter written");
            report.recounted += 1;
        }
        Err(err) => {
            warn!(
                model = %related.name(),
                field = %counter.field,
                error = %OrmError::from(err),
                "Counter write failed"
            );
            report.failed += 1;
        }
    }
}
