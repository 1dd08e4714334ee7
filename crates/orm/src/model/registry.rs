//! Model registry
//!
//! Maps model names to their definitions so relations can resolve the
//! model on the other side by name. Cloning a registry is cheap; every
//! clone sees the same definitions.

use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;
use tracing::debug;

use crate::error::{OrmError, OrmResult};
use crate::relationships::{short_name, RecordQuery};
use crate::value::{value_key, Attributes, Row};

use super::definition::ModelDefinition;
use super::record::Record;

#[derive(Clone, Default)]
pub struct Registry {
    models: Arc<DashMap<String, Arc<ModelDefinition>>>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<String> = self.models.iter().map(|e| e.key().clone()).collect();
        names.sort();
        f.debug_struct("Registry").field("models", &names).finish()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a definition under its name, replacing any previous one
    ///
    /// Records already made keep the definition they were made with.
    pub fn register(&self, definition: ModelDefinition) -> Arc<ModelDefinition> {
        let definition = Arc::new(definition);
        debug!(model = %definition.name(), "Registering model");
        self.models
            .insert(definition.name().to_string(), Arc::clone(&definition));
        definition
    }

    pub fn contains(&self, name: &str) -> bool {
        self.definition(name).is_ok()
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Look a definition up by its registered name, falling back to the
    /// unqualified name (`Genre` finds `app::models::Genre`)
    ///
    /// The fallback fails with a configuration error when several models
    /// share the unqualified name.
    pub fn definition(&self, name: &str) -> OrmResult<Arc<ModelDefinition>> {
        if let Some(entry) = self.models.get(name) {
            return Ok(Arc::clone(entry.value()));
        }

        let wanted = short_name(name);
        let mut matches: Vec<(String, Arc<ModelDefinition>)> = self
            .models
            .iter()
            .filter(|entry| short_name(entry.key()) == wanted)
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect();

        match matches.len() {
            0 => Err(OrmError::MissingModel(name.to_string())),
            1 => Ok(matches.remove(0).1),
            _ => {
                let mut names: Vec<String> = matches.into_iter().map(|(key, _)| key).collect();
                names.sort();
                Err(OrmError::Configuration(format!(
                    "model name '{}' is ambiguous: {}",
                    name,
                    names.join(", ")
                )))
            }
        }
    }

    /// New empty record
    pub fn make(&self, name: &str) -> OrmResult<Record> {
        let definition = self.definition(name)?;
        Ok(Record::new(self, definition))
    }

    /// New record filled through mass assignment
    pub fn make_with(&self, name: &str, data: Attributes) -> OrmResult<Record> {
        let mut record = self.make(name)?;
        record.fill(data)?;
        Ok(record)
    }

    /// Record built from a stored row
    pub fn hydrate(&self, name: &str, row: Row) -> OrmResult<Record> {
        let definition = self.definition(name)?;
        Ok(Record::hydrated(self, &definition, row))
    }

    pub fn find(&self, name: &str, id: impl Into<Value>) -> OrmResult<Option<Record>> {
        let definition = self.definition(name)?;
        let id = id.into();
        let row = definition.repository().read(&id)?;
        Ok(row.map(|row| Record::hydrated(self, &definition, row)))
    }

    pub fn find_or_fail(&self, name: &str, id: impl Into<Value>) -> OrmResult<Record> {
        let id = id.into();
        self.find(name, id.clone())?.ok_or_else(|| OrmError::NotFound {
            model: name.to_string(),
            id: value_key(&id),
        })
    }

    /// Select query over every row of the model
    pub fn query(&self, name: &str) -> OrmResult<RecordQuery> {
        let definition = self.definition(name)?;
        Ok(RecordQuery::new(self, definition))
    }
}
