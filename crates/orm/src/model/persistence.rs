//! Save and delete orchestration
//!
//! Save: validate -> `saving` -> relation payloads -> timestamps ->
//! [owner upsert -> `saved` -> linked records -> `relations_saved` ->
//! counters]. Delete: `deleting` -> counter snapshot -> [cascade -> owner
//! delete -> `deleted` -> counters]. The bracketed part runs inside one
//! transaction when the options ask for atomicity. Failures inside it are
//! kept on the record and reported as `Ok(false)` / `Ok(0)`.

use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use serde_json::Value;
use tracing::{debug, warn};

use crate::counter::CounterSync;
use crate::error::{OrmError, OrmResult, RepositoryError};
use crate::relationships::RelationType;
use crate::transaction::transaction;
use crate::value::{is_blank, Attributes};

use super::config::{DeleteOptions, SaveOptions};
use super::definition::ModelDefinition;
use super::record::Record;

pub const CREATED_AT: &str = "created_at";
pub const UPDATED_AT: &str = "updated_at";

impl Record {
    /// Persist the record and its queued links
    ///
    /// `Ok(false)` when validation, a `saving` observer or any write inside
    /// the transaction failed; the cause is available from `last_error`
    /// (validation failures from `errors`). Malformed relation payloads are
    /// returned as errors before anything is written.
    pub fn save(&mut self, options: SaveOptions) -> OrmResult<bool> {
        let definition = Arc::clone(&self.definition);
        self.last_error = None;

        if options.validate && !self.validate() {
            debug!(model = %definition.name(), errors = self.errors.len(), "Save aborted by validation");
            return Ok(false);
        }

        if let Err(err) = definition.observers().trigger_saving(self) {
            if err.is_veto() {
                debug!(model = %definition.name(), error = %err, "Save vetoed by observer");
            } else {
                warn!(model = %definition.name(), error = %err, "Saving observer failed");
            }
            self.last_error = Some(err.into());
            return Ok(false);
        }

        self.absorb_relation_payloads()?;

        if definition.uses_timestamps() {
            self.touch();
        }

        let was_new = self.id().is_none();
        let queued = self.queued_links();
        let previous = if self.exists {
            self.original.clone()
        } else {
            Attributes::new()
        };

        let result = if options.atomic {
            let repository = definition.shared_repository();
            transaction(repository.as_ref(), || {
                self.persist(&definition, options.force, &previous)
            })
        } else {
            self.persist(&definition, options.force, &previous)
        };

        match result {
            Ok(()) => {
                self.finish_save();
                debug!(model = %definition.name(), id = ?self.id(), "Saved");
                Ok(true)
            }
            Err(err) => {
                warn!(model = %definition.name(), error = %err, "Save failed");
                self.exists = false;
                if was_new {
                    self.attributes.shift_remove(definition.primary_key());
                }
                // Links written before the rollback must be written again
                self.restore_links(queued);
                self.last_error = Some(err);
                Ok(false)
            }
        }
    }

    /// Delete the row and its dependents
    ///
    /// Errors with `MissingPrimaryKey` when there is no id. `Ok(0)` when a
    /// `deleting` observer or a write inside the transaction failed.
    pub fn delete(&mut self, options: DeleteOptions) -> OrmResult<u64> {
        let definition = Arc::clone(&self.definition);
        let id = self
            .id()
            .cloned()
            .ok_or_else(|| OrmError::MissingPrimaryKey {
                model: definition.name().to_string(),
            })?;
        self.last_error = None;

        if let Err(err) = definition.observers().trigger_deleting(self) {
            if err.is_veto() {
                debug!(model = %definition.name(), error = %err, "Delete vetoed by observer");
            } else {
                warn!(model = %definition.name(), error = %err, "Deleting observer failed");
            }
            self.last_error = Some(err.into());
            return Ok(0);
        }

        let registry = self.registry.clone();
        let mut counters = definition
            .counters()
            .is_tracking()
            .then(|| CounterSync::new(&registry, &definition));
        if let Some(sync) = counters.as_mut() {
            if let Err(err) = sync.snapshot_before_delete(std::slice::from_ref(&id)) {
                warn!(model = %definition.name(), error = %err, "Counter snapshot failed");
            }
        }

        let repository = definition.shared_repository();
        let record = &*self;
        let mut run = || -> OrmResult<u64> {
            if options.cascade {
                for relation in record.relations.values() {
                    relation.delete_dependents(&id, &registry)?;
                }
            }
            let deleted = repository.delete(&id)?;
            definition.observers().trigger_deleted(record)?;
            if let Some(sync) = counters.as_mut() {
                sync.sync_counters(std::slice::from_ref(&id));
            }
            Ok(deleted)
        };

        let result = if options.atomic {
            transaction(repository.as_ref(), run)
        } else {
            run()
        };

        match result {
            Ok(deleted) => {
                debug!(model = %definition.name(), id = %id, deleted, "Deleted");
                self.flush();
                Ok(deleted)
            }
            Err(err) => {
                warn!(model = %definition.name(), id = %id, error = %err, "Delete failed");
                self.last_error = Some(err);
                Ok(0)
            }
        }
    }

    /// Owner write, linked records and counters
    fn persist(
        &mut self,
        definition: &ModelDefinition,
        force: bool,
        previous: &Attributes,
    ) -> OrmResult<()> {
        let payload = self.payload(force);
        let id = definition.repository().upsert(&payload, self.id())?;
        if is_blank(&id) {
            return Err(RepositoryError::Backend(format!(
                "upsert into '{}' returned no identifier",
                definition.repository().table()
            ))
            .into());
        }

        self.attributes
            .insert(definition.primary_key().to_string(), id.clone());
        self.exists = true;
        definition.observers().trigger_saved(self)?;

        let registry = self.registry.clone();
        for relation in self.relations.values_mut() {
            relation.save_linked(&id, &registry)?;
        }
        definition.observers().trigger_relations_saved(self)?;

        if definition.counters().is_tracking() {
            let mut sync = CounterSync::new(&registry, definition);
            sync.remember_previous(&id, previous);
            sync.sync_counters(std::slice::from_ref(&id));
        }
        Ok(())
    }

    /// Columns to write: the dirty diff, or everything when forced, plus
    /// the primary key when known
    fn payload(&self, force: bool) -> Attributes {
        let mut payload = if force { self.columns() } else { self.dirty() };
        if let Some(id) = self.id() {
            payload.insert(self.primary_key().to_string(), id.clone());
        }
        payload
    }

    /// Turn nested relation data into linked records
    ///
    /// To-one relations take an object, to-many relations an array of
    /// objects. Many-to-one objects must name the existing parent's key.
    /// Only data set by the caller counts; rendered results are dropped.
    /// Every payload is checked before any alias is consumed or linked.
    fn absorb_relation_payloads(&mut self) -> OrmResult<()> {
        let aliases: Vec<String> = self
            .relations
            .keys()
            .filter(|alias| self.attributes.contains_key(alias.as_str()))
            .cloned()
            .collect();

        let mut pending = Vec::new();
        for alias in &aliases {
            let relation = &self.relations[alias];
            let value = match self.attributes.get(alias) {
                Some(value) if relation.has_payload() && !value.is_null() => value,
                _ => continue,
            };

            let relation_type = relation.relation_type();
            let related = relation.related_class().to_string();
            let items = match (relation_type.is_collection(), value) {
                (false, Value::Object(item)) => vec![item.clone()],
                (true, Value::Array(items)) => items
                    .iter()
                    .map(|item| match item {
                        Value::Object(item) => Ok(item.clone()),
                        other => Err(OrmError::invalid_structure(
                            alias,
                            format!("expected an array of objects, found an element {}", other),
                        )),
                    })
                    .collect::<OrmResult<Vec<_>>>()?,
                (false, other) => {
                    return Err(OrmError::invalid_structure(
                        alias,
                        format!("expected an object, found {}", other),
                    ))
                }
                (true, other) => {
                    return Err(OrmError::invalid_structure(
                        alias,
                        format!("expected an array of objects, found {}", other),
                    ))
                }
            };

            let related_definition = self.registry.definition(&related)?;
            let related_key = related_definition.primary_key().to_string();
            for item in items {
                let data: Attributes = item.into_iter().collect();
                let known = data.get(&related_key).filter(|v| !is_blank(v)).cloned();

                let record = match (relation_type, known) {
                    (RelationType::ManyToOne, Some(id)) => {
                        let mut record = self.registry.make_with(&related, data)?;
                        record.attributes.insert(related_key.clone(), id);
                        record.exists = true;
                        record
                    }
                    (RelationType::ManyToOne, None) => {
                        return Err(OrmError::invalid_structure(
                            alias,
                            format!("parent object must carry '{}'", related_key),
                        ))
                    }
                    _ => self.registry.make_with(&related, data)?,
                };
                pending.push((alias.clone(), record));
            }
        }

        for alias in &aliases {
            self.attributes.shift_remove(alias);
            if let Some(relation) = self.relations.get_mut(alias) {
                relation.mark_payload(false);
            }
        }
        for (alias, record) in pending {
            self.link(&alias, record)?;
        }
        Ok(())
    }

    /// Copies of every queued link, taken before the owner is written
    fn queued_links(&self) -> Vec<(String, Vec<Record>)> {
        self.relations
            .iter()
            .filter(|(_, relation)| !relation.links().is_empty())
            .map(|(alias, relation)| (alias.clone(), relation.links().to_vec()))
            .collect()
    }

    fn restore_links(&mut self, queued: Vec<(String, Vec<Record>)>) {
        for (alias, links) in queued {
            if let Some(relation) = self.relations.get_mut(&alias) {
                relation.replace_links(links);
            }
        }
    }

    fn touch(&mut self) {
        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true);
        if !self.exists && !self.attributes.contains_key(CREATED_AT) {
            self.set(CREATED_AT, now.clone());
        }
        self.set(UPDATED_AT, now);
    }

    fn finish_save(&mut self) {
        self.original = self.columns();
        self.changed = false;
        self.exists = true;

        let aliases: Vec<String> = self.relations.keys().cloned().collect();
        for alias in aliases {
            self.attributes.shift_remove(&alias);
        }
        for relation in self.relations.values_mut() {
            relation.clear_links();
            relation.invalidate();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use serde_json::json;

    use crate::event_error::EventError;
    use crate::events::RecordObserver;
    use crate::model::Registry;
    use crate::repository::MemoryDatabase;
    use crate::value::Row;

    fn row(pairs: &[(&str, Value)]) -> Row {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[derive(Default)]
    struct Journal {
        stages: Mutex<Vec<String>>,
        veto: bool,
    }

    impl Journal {
        fn push(&self, stage: &str, record: &Record) {
            let id = record.id().map(|id| id.to_string()).unwrap_or_default();
            if let Ok(mut stages) = self.stages.lock() {
                stages.push(format!("{}:{}", stage, id));
            }
        }
    }

    impl RecordObserver for Arc<Journal> {
        fn saving(&self, record: &mut Record) -> Result<(), EventError> {
            self.push("saving", record);
            if self.veto {
                return Err(EventError::propagation_stopped("read only"));
            }
            record.set("slug", "from-observer");
            Ok(())
        }

        fn saved(&self, record: &Record) -> Result<(), EventError> {
            self.push("saved", record);
            Ok(())
        }

        fn relations_saved(&self, record: &Record) -> Result<(), EventError> {
            self.push("relations_saved", record);
            Ok(())
        }

        fn deleting(&self, record: &Record) -> Result<(), EventError> {
            self.push("deleting", record);
            Ok(())
        }

        fn deleted(&self, record: &Record) -> Result<(), EventError> {
            self.push("deleted", record);
            Ok(())
        }
    }

    fn setup(journal: Arc<Journal>) -> (MemoryDatabase, Registry) {
        let db = MemoryDatabase::new();
        let registry = Registry::new();
        registry.register(
            ModelDefinition::builder("Note", db.repository("notes"))
                .rule("body", &["required"])
                .observer(journal)
                .timestamps(true)
                .build()
                .unwrap(),
        );
        (db, registry)
    }

    #[test]
    fn test_save_insert_then_update_writes_only_dirty_columns() {
        let (db, registry) = setup(Arc::new(Journal::default()));
        let mut note = registry.make_with("Note", row(&[("body", json!("hi"))])).unwrap();

        assert!(note.save(SaveOptions::default()).unwrap());
        assert_eq!(note.id(), Some(&json!(1)));
        assert!(note.exists());
        assert!(!note.changed());
        assert!(note.attributes().contains_key(CREATED_AT));

        let stored = db.find("notes", &json!(1)).unwrap();
        assert_eq!(stored["body"], json!("hi"));
        assert_eq!(stored["slug"], json!("from-observer"));

        note.set("body", "bye");
        assert_eq!(note.payload(false).keys().collect::<Vec<_>>(), vec!["body", "id"]);
        assert!(note.save(SaveOptions::default().validate(false)).unwrap());
        assert_eq!(db.find("notes", &json!(1)).unwrap()["body"], json!("bye"));
        assert_eq!(db.rows("notes").len(), 1);
    }

    #[test]
    fn test_save_reports_validation_failure() {
        let (db, registry) = setup(Arc::new(Journal::default()));
        let mut note = registry.make("Note").unwrap();

        assert!(!note.save(SaveOptions::default()).unwrap());
        assert!(note.errors().contains_key("body"));
        assert!(db.rows("notes").is_empty());

        assert!(note.save(SaveOptions::default().validate(false)).unwrap());
        assert_eq!(db.rows("notes").len(), 1);
    }

    #[test]
    fn test_lifecycle_order() {
        let journal = Arc::new(Journal::default());
        let (_db, registry) = setup(journal.clone());
        let mut note = registry.make_with("Note", row(&[("body", json!("hi"))])).unwrap();

        note.save(SaveOptions::default()).unwrap();
        note.delete(DeleteOptions::default()).unwrap();

        let stages = journal.stages.lock().unwrap().clone();
        assert_eq!(
            stages,
            vec!["saving:", "saved:1", "relations_saved:1", "deleting:1", "deleted:1"]
        );
    }

    #[test]
    fn test_saving_observer_can_abort() {
        let journal = Arc::new(Journal { veto: true, ..Journal::default() });
        let (db, registry) = setup(journal);
        let mut note = registry.make_with("Note", row(&[("body", json!("hi"))])).unwrap();

        assert!(!note.save(SaveOptions::default()).unwrap());
        assert!(note.last_error().unwrap().is_propagation_stopped());
        assert!(db.rows("notes").is_empty());
    }

    #[test]
    fn test_failed_write_is_reported_and_id_released() {
        let (db, registry) = setup(Arc::new(Journal::default()));
        db.fail_writes("notes");
        let mut note = registry.make_with("Note", row(&[("body", json!("hi"))])).unwrap();

        assert!(!note.save(SaveOptions::default()).unwrap());
        assert!(!note.exists());
        assert!(note.id().is_none());
        assert!(matches!(note.last_error(), Some(OrmError::Repository(_))));
        assert_eq!(db.transaction_depth(), 0);

        db.restore_writes("notes");
        assert!(note.save(SaveOptions::default()).unwrap());
        assert_eq!(note.id(), Some(&json!(1)));
    }

    #[test]
    fn test_delete_requires_primary_key() {
        let (_db, registry) = setup(Arc::new(Journal::default()));
        let mut note = registry.make("Note").unwrap();
        let err = note.delete(DeleteOptions::default()).unwrap_err();
        assert!(matches!(err, OrmError::MissingPrimaryKey { .. }));
    }

    #[test]
    fn test_delete_flushes_record() {
        let (db, registry) = setup(Arc::new(Journal::default()));
        db.seed("notes", vec![row(&[("body", json!("hi"))])]);
        let mut note = registry.find_or_fail("Note", 1).unwrap();

        assert_eq!(note.delete(DeleteOptions::default()).unwrap(), 1);
        assert!(note.attributes().is_empty());
        assert!(!note.exists());
        assert!(db.rows("notes").is_empty());
    }

    #[test]
    fn test_failed_delete_keeps_record() {
        let (db, registry) = setup(Arc::new(Journal::default()));
        db.seed("notes", vec![row(&[("body", json!("hi"))])]);
        let mut note = registry.find_or_fail("Note", 1).unwrap();
        db.fail_writes("notes");

        assert_eq!(note.delete(DeleteOptions::default()).unwrap(), 0);
        assert!(note.exists());
        assert!(note.last_error().is_some());
        assert_eq!(db.rows("notes").len(), 1);
    }
}
