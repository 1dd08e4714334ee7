//! Records - one row of a model with dirty tracking and relations
//!
//! Attributes are stored as JSON values. `original` is the snapshot of the
//! last load or save; the dirty diff is taken against it. Relation aliases
//! and the pivot key are reserved: values stored under them never mark the
//! record as changed and never reach the repository.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::Value;
use tracing::trace;

use crate::error::{OrmError, OrmResult};
use crate::relationships::{Relation, RelationResults};
use crate::validation::FieldErrors;
use crate::value::{is_blank, loose_eq, Attributes, Row};

use super::definition::{ModelDefinition, GUARD_ALL};
use super::registry::Registry;

/// Reserved attribute holding the junction row of a record loaded through
/// a many-to-many relation
pub const PIVOT_KEY: &str = "_pivot";

#[derive(Clone)]
pub struct Record {
    pub(crate) registry: Registry,
    pub(crate) definition: Arc<ModelDefinition>,
    pub(crate) attributes: Attributes,
    pub(crate) original: Attributes,
    pub(crate) changed: bool,
    pub(crate) exists: bool,
    pub(crate) errors: FieldErrors,
    pub(crate) relations: IndexMap<String, Relation>,
    pub(crate) last_error: Option<OrmError>,
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Record")
            .field("model", &self.definition.name())
            .field("attributes", &self.attributes)
            .field("exists", &self.exists)
            .field("changed", &self.changed)
            .field("errors", &self.errors)
            .field("relations", &self.relations.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Record {
    /// Empty record of `definition`
    pub fn new(registry: &Registry, definition: Arc<ModelDefinition>) -> Self {
        let relations = definition
            .relations()
            .iter()
            .map(|config| {
                (
                    config.alias.clone(),
                    Relation::new(config, definition.name()),
                )
            })
            .collect();

        Self {
            registry: registry.clone(),
            definition,
            attributes: Attributes::new(),
            original: Attributes::new(),
            changed: false,
            exists: false,
            errors: FieldErrors::new(),
            relations,
            last_error: None,
        }
    }

    /// Record built from a stored row
    pub fn hydrated(registry: &Registry, definition: &Arc<ModelDefinition>, row: Row) -> Self {
        let mut record = Self::new(registry, Arc::clone(definition));
        record.map_data(row);
        record
    }

    pub fn definition(&self) -> &ModelDefinition {
        &self.definition
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Model name
    pub fn class(&self) -> &str {
        self.definition.name()
    }

    pub fn primary_key(&self) -> &str {
        self.definition.primary_key()
    }

    /// Primary key value, `None` while blank
    pub fn id(&self) -> Option<&Value> {
        self.attributes
            .get(self.definition.primary_key())
            .filter(|id| !is_blank(id))
    }

    pub fn exists(&self) -> bool {
        self.exists
    }

    pub fn changed(&self) -> bool {
        self.changed
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    pub fn original(&self) -> &Attributes {
        &self.original
    }

    /// Validation messages from the last `validate`
    pub fn errors(&self) -> &FieldErrors {
        &self.errors
    }

    /// Error swallowed by the last failed `save` or `delete`
    pub fn last_error(&self) -> Option<&OrmError> {
        self.last_error.as_ref()
    }

    /// Relation aliases and the pivot key
    pub fn is_reserved(&self, key: &str) -> bool {
        key == PIVOT_KEY || self.relations.contains_key(key)
    }

    /// Junction row this record was loaded through, if any
    pub fn pivot(&self) -> Option<&Value> {
        self.attributes.get(PIVOT_KEY)
    }

    pub(crate) fn attach_pivot(&mut self, row: Row) {
        self.attributes
            .insert(PIVOT_KEY.to_string(), Value::Object(row.into_iter().collect()));
    }

    /// Store `value` under `key`
    ///
    /// Relation aliases are stored as-is and saved as nested data. Other keys
    /// mark the record changed when the value differs loosely (`1` equals
    /// `"1"` and `1.0`); a registered mutator decides what is stored.
    pub fn set(&mut self, key: &str, value: impl Into<Value>) {
        let value = value.into();

        if let Some(relation) = self.relations.get_mut(key) {
            relation.mark_payload(!value.is_null());
            self.attributes.insert(key.to_string(), value);
            return;
        }

        let same = self
            .attributes
            .get(key)
            .is_some_and(|current| loose_eq(current, &value));
        if !self.is_reserved(key) && !same {
            self.changed = true;
        }

        let value = match self.definition.mutator(key) {
            Some(mutator) => mutator(&value),
            None => value,
        };
        self.attributes.insert(key.to_string(), value);
    }

    /// Read `key`
    ///
    /// Stored attributes come first. A relation alias is fetched once and
    /// stored. Anything else goes through its accessor, if registered.
    pub fn get(&mut self, key: &str) -> OrmResult<Value> {
        if let Some(value) = self.attributes.get(key) {
            return Ok(value.clone());
        }

        if self.relations.contains_key(key) {
            let value = self.related(key)?.to_value();
            self.attributes.insert(key.to_string(), value.clone());
            return Ok(value);
        }

        Ok(match self.definition.accessor(key) {
            Some(accessor) => accessor(&Value::Null),
            None => Value::Null,
        })
    }

    /// Lazily fetched relation results
    pub fn related(&mut self, alias: &str) -> OrmResult<&RelationResults> {
        let primary_key = self.definition.primary_key().to_string();
        let relation = self
            .relations
            .get_mut(alias)
            .ok_or_else(|| OrmError::missing_relation(self.definition.name(), alias))?;
        relation.get_results(&self.attributes, &primary_key, &self.registry)
    }

    pub fn relation(&self, alias: &str) -> OrmResult<&Relation> {
        self.relations
            .get(alias)
            .ok_or_else(|| OrmError::missing_relation(self.definition.name(), alias))
    }

    pub fn relation_mut(&mut self, alias: &str) -> OrmResult<&mut Relation> {
        let model = self.definition.name();
        self.relations
            .get_mut(alias)
            .ok_or_else(|| OrmError::missing_relation(model, alias))
    }

    pub fn relations(&self) -> impl Iterator<Item = &Relation> {
        self.relations.values()
    }

    /// Queue `record` on the relation behind `alias`
    ///
    /// A many-to-one link writes the parent's id into the foreign key now.
    pub fn link(&mut self, alias: &str, record: Record) -> OrmResult<()> {
        let effect = self.relation_mut(alias)?.link(record)?;
        if let Some((foreign_key, id)) = effect {
            self.set(&foreign_key, id);
        }
        Ok(())
    }

    /// Install eager loaded results
    pub(crate) fn set_relation_results(&mut self, alias: &str, results: RelationResults) {
        if let Some(relation) = self.relations.get_mut(alias) {
            self.attributes.insert(alias.to_string(), results.to_value());
            relation.set_results(results);
        }
    }

    pub fn is_fillable(&self, key: &str) -> bool {
        let fillable = self.definition.fillable();
        fillable.is_empty() || fillable.iter().any(|f| f == key)
    }

    pub fn is_guarded(&self, key: &str) -> bool {
        self.definition
            .guarded()
            .iter()
            .any(|g| g == GUARD_ALL || g == key)
    }

    /// Mass assignment through `set`, skipping keys that are not fillable
    /// or are guarded
    pub fn fill(&mut self, data: Attributes) -> OrmResult<()> {
        if self.definition.is_fully_guarded() {
            return Err(OrmError::MassAssignment {
                model: self.definition.name().to_string(),
            });
        }

        for (key, value) in data {
            if self.is_fillable(&key) && !self.is_guarded(&key) {
                self.set(&key, value);
            } else {
                trace!(model = %self.definition.name(), key = %key, "Skipping guarded attribute");
            }
        }
        Ok(())
    }

    /// Replace the attributes with a stored row
    pub fn map_data(&mut self, row: Row) {
        self.original = row
            .iter()
            .filter(|(key, _)| !self.is_reserved(key))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        self.attributes = row;
        self.exists = self.id().is_some();
        self.changed = false;
        self.errors.clear();
        for relation in self.relations.values_mut() {
            relation.invalidate();
            relation.clear_links();
        }
    }

    /// Reset to the empty state
    pub fn flush(&mut self) {
        self.attributes.clear();
        self.original.clear();
        self.changed = false;
        self.exists = false;
        self.errors.clear();
        self.last_error = None;
        for relation in self.relations.values_mut() {
            relation.invalidate();
            relation.clear_links();
        }
    }

    /// Attributes differing from the last loaded or saved state
    pub fn dirty(&self) -> Attributes {
        self.attributes
            .iter()
            .filter(|(key, _)| !self.is_reserved(key))
            .filter(|(key, value)| {
                !self
                    .original
                    .get(key.as_str())
                    .is_some_and(|original| loose_eq(original, value))
            })
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }

    pub fn is_dirty(&self, key: &str) -> bool {
        if self.is_reserved(key) {
            return false;
        }
        match (self.attributes.get(key), self.original.get(key)) {
            (Some(current), Some(original)) => !loose_eq(current, original),
            (current, original) => current != original,
        }
    }

    /// Run the model's validator; messages land in `errors`
    pub fn validate(&mut self) -> bool {
        self.errors.clear();
        if self.definition.rules().is_empty() {
            return true;
        }

        let data = self.columns();
        match self
            .definition
            .validator()
            .validate(&data, self.definition.rules(), self.definition.messages())
        {
            Ok(()) => true,
            Err(errors) => {
                self.errors = errors;
                false
            }
        }
    }

    /// Non-reserved attributes
    pub(crate) fn columns(&self) -> Attributes {
        self.attributes
            .iter()
            .filter(|(key, _)| !self.is_reserved(key))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }

    /// Non-reserved attributes with accessors applied
    pub fn to_array(&self) -> Attributes {
        self.attributes
            .iter()
            .filter(|(key, _)| !self.is_reserved(key))
            .map(|(key, value)| {
                let value = match self.definition.accessor(key) {
                    Some(accessor) => accessor(value),
                    None => value.clone(),
                };
                (key.clone(), value)
            })
            .collect()
    }

    pub fn to_json(&self) -> Value {
        Value::Object(self.to_array().into_iter().collect())
    }

    /// Reload from the repository; false when the row is gone
    pub fn refresh(&mut self) -> OrmResult<bool> {
        let id = self.id().cloned().ok_or_else(|| OrmError::MissingPrimaryKey {
            model: self.definition.name().to_string(),
        })?;

        match self.definition.repository().read(&id)? {
            Some(row) => {
                self.map_data(row);
                Ok(true)
            }
            None => {
                self.exists = false;
                Ok(false)
            }
        }
    }
}

impl Serialize for Record {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let data = self.to_array();
        let mut map = serializer.serialize_map(Some(data.len()))?;
        for (key, value) in &data {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::MemoryDatabase;
    use serde_json::json;

    fn row(pairs: &[(&str, Value)]) -> Row {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    fn registry(db: &MemoryDatabase) -> Registry {
        let registry = Registry::new();
        registry.register(
            ModelDefinition::builder("Genre", db.repository("genres"))
                .build()
                .unwrap(),
        );
        registry.register(
            ModelDefinition::builder("Book", db.repository("books"))
                .belongs_to("genre", "Genre")
                .fillable(&["title", "genre_id", "genre"])
                .guarded(&["genre_id"])
                .mutator("title", |v| match v.as_str() {
                    Some(s) => json!(s.trim()),
                    None => v.clone(),
                })
                .accessor("slug", |_| json!("computed"))
                .rule("title", &["required"])
                .build()
                .unwrap(),
        );
        registry
    }

    #[test]
    fn test_map_data_is_clean() {
        let db = MemoryDatabase::new();
        let registry = registry(&db);
        let book = registry
            .hydrate("Book", row(&[("id", json!(3)), ("title", json!("Dune"))]))
            .unwrap();

        assert!(book.exists());
        assert!(!book.changed());
        assert!(book.dirty().is_empty());
        assert_eq!(book.original(), book.attributes());
    }

    #[test]
    fn test_set_tracks_changes() {
        let db = MemoryDatabase::new();
        let registry = registry(&db);
        let mut book = registry
            .hydrate("Book", row(&[("id", json!(3)), ("title", json!("Dune"))]))
            .unwrap();

        book.set("title", "Dune");
        assert!(!book.changed());

        book.set("title", "  Emma ");
        assert!(book.changed());
        assert_eq!(book.attributes()["title"], json!("Emma"));
        assert!(book.is_dirty("title"));
        assert_eq!(book.dirty(), row(&[("title", json!("Emma"))]));
    }

    #[test]
    fn test_loosely_equal_values_stay_clean() {
        let db = MemoryDatabase::new();
        let registry = registry(&db);
        let mut book = registry
            .hydrate(
                "Book",
                row(&[("id", json!(3)), ("genre_id", json!(1)), ("pages", json!(300))]),
            )
            .unwrap();

        book.set("genre_id", "1");
        book.set("pages", 300.0);
        assert!(!book.changed());
        assert!(!book.is_dirty("genre_id"));
        assert!(!book.is_dirty("pages"));
        assert!(book.dirty().is_empty());

        book.set("pages", "301");
        assert!(book.changed());
        assert_eq!(book.dirty(), row(&[("pages", json!("301"))]));
    }

    #[test]
    fn test_relation_alias_is_reserved() {
        let db = MemoryDatabase::new();
        let registry = registry(&db);
        let mut book = registry.hydrate("Book", row(&[("id", json!(3))])).unwrap();

        book.set("genre", json!({ "id": 1 }));
        assert!(!book.changed());
        assert!(book.dirty().is_empty());
        assert!(book.relation("genre").unwrap().has_payload());
        assert!(book.is_reserved("genre"));
        assert!(book.is_reserved(PIVOT_KEY));
        assert!(!book.to_array().contains_key("genre"));
    }

    #[test]
    fn test_fill_respects_lists() {
        let db = MemoryDatabase::new();
        let registry = registry(&db);
        let mut book = registry.make("Book").unwrap();

        assert!(book.is_fillable("title"));
        assert!(!book.is_fillable("isbn"));
        assert!(book.is_guarded("genre_id"));

        book.fill(row(&[("title", json!("Dune")), ("isbn", json!("x")), ("genre_id", json!(2))]))
            .unwrap();
        assert_eq!(book.attributes(), &row(&[("title", json!("Dune"))]));
    }

    #[test]
    fn test_fill_on_fully_guarded_model() {
        let db = MemoryDatabase::new();
        let registry = registry(&db);
        registry.register(
            ModelDefinition::builder("Secret", db.repository("secrets"))
                .guard_all()
                .build()
                .unwrap(),
        );
        let mut secret = registry.make("Secret").unwrap();

        assert!(secret.is_guarded("anything"));
        let err = secret.fill(row(&[("token", json!("t"))])).unwrap_err();
        assert!(matches!(err, OrmError::MassAssignment { .. }));
    }

    #[test]
    fn test_get_falls_back_to_accessor() {
        let db = MemoryDatabase::new();
        let registry = registry(&db);
        let mut book = registry.make("Book").unwrap();

        assert_eq!(book.get("slug").unwrap(), json!("computed"));
        assert_eq!(book.get("missing").unwrap(), Value::Null);
    }

    #[test]
    fn test_get_relation_fetches_once() {
        let db = MemoryDatabase::new();
        let registry = registry(&db);
        db.seed("genres", vec![row(&[("name", json!("Sci-Fi"))])]);
        let mut book = registry
            .hydrate("Book", row(&[("id", json!(3)), ("genre_id", json!(1))]))
            .unwrap();

        db.reset_stats();
        assert_eq!(book.get("genre").unwrap()["name"], json!("Sci-Fi"));
        assert_eq!(book.get("genre").unwrap()["name"], json!("Sci-Fi"));
        assert_eq!(db.stats("genres").fetches, 1);
        assert!(!book.changed());
    }

    #[test]
    fn test_many_to_one_link_sets_foreign_key() {
        let db = MemoryDatabase::new();
        let registry = registry(&db);
        let genre = registry.hydrate("Genre", row(&[("id", json!(5))])).unwrap();
        let mut book = registry.make("Book").unwrap();

        book.link("genre", genre).unwrap();
        assert_eq!(book.attributes()["genre_id"], json!(5));
        assert!(book.changed());

        let err = book.link("author", registry.make("Genre").unwrap()).unwrap_err();
        assert!(matches!(err, OrmError::MissingRelation { .. }));
    }

    #[test]
    fn test_validate_collects_errors() {
        let db = MemoryDatabase::new();
        let registry = registry(&db);
        let mut book = registry.make("Book").unwrap();

        assert!(!book.validate());
        assert!(book.errors().contains_key("title"));

        book.set("title", "Dune");
        assert!(book.validate());
        assert!(book.errors().is_empty());
    }

    #[test]
    fn test_flush_resets_state() {
        let db = MemoryDatabase::new();
        let registry = registry(&db);
        let mut book = registry
            .hydrate("Book", row(&[("id", json!(3)), ("title", json!("Dune"))]))
            .unwrap();
        book.set("title", "Emma");

        book.flush();
        assert!(book.attributes().is_empty());
        assert!(!book.exists());
        assert!(!book.changed());
    }

    #[test]
    fn test_serialize_matches_to_array() {
        let db = MemoryDatabase::new();
        let registry = registry(&db);
        let mut book = registry
            .hydrate("Book", row(&[("id", json!(3)), ("title", json!("Dune"))]))
            .unwrap();
        book.set("genre", json!(null));

        let value = serde_json::to_value(&book).unwrap();
        assert_eq!(value, json!({ "id": 3, "title": "Dune" }));
        assert_eq!(value, book.to_json());
    }
}
