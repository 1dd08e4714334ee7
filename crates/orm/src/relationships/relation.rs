//! Relation instances owned by a record
//!
//! Each record builds one `Relation` per declared alias. The instance keeps
//! the queue of linked records waiting to be persisted with the owner and
//! the memoized results of its single fetch.

use std::collections::HashMap;
use std::fmt;

use serde_json::Value;
use tracing::{debug, trace};

use crate::error::{OrmError, OrmResult};
use crate::model::{ModelDefinition, Record, Registry, SaveOptions};
use crate::query::{Condition, Query};
use crate::value::{is_blank, value_key, Row};

use super::types::{RelationConfig, RelationKind, RelationResults, RelationType};

/// Owner attribute a link writes immediately (many-to-one only)
pub type LinkEffect = Option<(String, Value)>;

#[derive(Clone)]
pub struct Relation {
    alias: String,
    primary_class: String,
    related_class: String,
    kind: RelationKind,
    conditions: Option<Condition>,
    links: Vec<Record>,
    results: Option<RelationResults>,
    /// Caller data stored under the alias waits to be linked on save
    payload: bool,
}

impl fmt::Debug for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Relation")
            .field("alias", &self.alias)
            .field("primary_class", &self.primary_class)
            .field("related_class", &self.related_class)
            .field("kind", &self.kind)
            .field("links", &self.links.len())
            .field("loaded", &self.results.is_some())
            .finish()
    }
}

impl Relation {
    pub fn new(config: &RelationConfig, primary_class: &str) -> Self {
        let mut kind = config.kind.clone();
        kind.resolve(primary_class, &config.related);

        Self {
            alias: config.alias.clone(),
            primary_class: primary_class.to_string(),
            related_class: config.related.clone(),
            kind,
            conditions: config.conditions.clone(),
            links: Vec::new(),
            results: None,
            payload: false,
        }
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn primary_class(&self) -> &str {
        &self.primary_class
    }

    pub fn related_class(&self) -> &str {
        &self.related_class
    }

    pub fn kind(&self) -> &RelationKind {
        &self.kind
    }

    pub fn relation_type(&self) -> RelationType {
        self.kind.relation_type()
    }

    pub fn is_dependent(&self) -> bool {
        self.kind.is_dependent()
    }

    /// Foreign key column: on the owner for many-to-one, on the related rows
    /// for one-to-many and one-to-one, the owner-side junction column for
    /// many-to-many
    pub fn foreign_key(&self) -> &str {
        match &self.kind {
            RelationKind::ManyToOne { foreign_key }
            | RelationKind::OneToMany { foreign_key, .. }
            | RelationKind::OneToOne { foreign_key, .. } => foreign_key.as_deref().unwrap_or(""),
            RelationKind::ManyToMany { owner_key, .. } => owner_key.as_deref().unwrap_or(""),
        }
    }

    /// Junction model name and its (owner, related) columns
    pub fn junction(&self) -> Option<(&str, &str, &str)> {
        match &self.kind {
            RelationKind::ManyToMany {
                junction,
                owner_key,
                related_key,
            } => Some((
                junction,
                owner_key.as_deref().unwrap_or(""),
                related_key.as_deref().unwrap_or(""),
            )),
            _ => None,
        }
    }

    pub fn conditions(&self) -> Option<&Condition> {
        self.conditions.as_ref()
    }

    /// Owner attribute holding the value related rows are matched against
    pub fn owner_key<'a>(&'a self, owner_primary_key: &'a str) -> &'a str {
        match &self.kind {
            RelationKind::ManyToOne { .. } => self.foreign_key(),
            _ => owner_primary_key,
        }
    }

    /// Related query with the relation's base conditions applied
    pub(crate) fn base_query(&self, related: &ModelDefinition) -> Query {
        let query = related.repository().select();
        match &self.conditions {
            Some(condition) => query.bind_callback(condition),
            None => query,
        }
    }

    pub fn links(&self) -> &[Record] {
        &self.links
    }

    pub fn links_mut(&mut self) -> &mut [Record] {
        &mut self.links
    }

    pub fn is_loaded(&self) -> bool {
        self.results.is_some()
    }

    pub fn results(&self) -> Option<&RelationResults> {
        self.results.as_ref()
    }

    /// Drop memoized results so the next access fetches again
    pub fn invalidate(&mut self) {
        self.results = None;
    }

    pub(crate) fn clear_links(&mut self) {
        self.links.clear();
        self.payload = false;
    }

    pub(crate) fn replace_links(&mut self, links: Vec<Record>) {
        self.links = links;
    }

    /// Whether the alias attribute holds caller data rather than results
    pub fn has_payload(&self) -> bool {
        self.payload
    }

    pub(crate) fn mark_payload(&mut self, pending: bool) {
        self.payload = pending;
    }

    pub(crate) fn set_results(&mut self, results: RelationResults) {
        self.results = Some(results);
        self.payload = false;
    }

    /// Queue `record` for persistence with the owner
    ///
    /// Many-to-one and one-to-one links replace any previous link. A
    /// many-to-one link returns the owner foreign key assignment the caller
    /// must apply right away.
    pub fn link(&mut self, record: Record) -> OrmResult<LinkEffect> {
        if record.class() != self.related_class {
            return Err(OrmError::invalid_structure(
                &self.alias,
                format!(
                    "expected a '{}' record, got '{}'",
                    self.related_class,
                    record.class()
                ),
            ));
        }

        match &self.kind {
            RelationKind::ManyToOne { .. } => {
                let id = record.id().cloned().unwrap_or(Value::Null);
                self.links = vec![record];
                Ok(Some((self.foreign_key().to_string(), id)))
            }
            RelationKind::OneToOne { .. } => {
                self.links = vec![record];
                Ok(None)
            }
            RelationKind::OneToMany { .. } | RelationKind::ManyToMany { .. } => {
                self.links.push(record);
                Ok(None)
            }
        }
    }

    /// Fetch once and memoize
    pub fn get_results(
        &mut self,
        owner: &Row,
        owner_primary_key: &str,
        registry: &Registry,
    ) -> OrmResult<&RelationResults> {
        let relation_type = self.relation_type();
        if self.results.is_none() {
            let results = self.fetch(owner, owner_primary_key, registry)?;
            self.results = Some(results);
        }
        Ok(self
            .results
            .get_or_insert_with(|| RelationResults::empty(relation_type)))
    }

    /// Run the relation query for one owner
    pub fn fetch(
        &self,
        owner: &Row,
        owner_primary_key: &str,
        registry: &Registry,
    ) -> OrmResult<RelationResults> {
        let related = registry.definition(&self.related_class)?;
        let key = match owner.get(self.owner_key(owner_primary_key)) {
            Some(value) if !is_blank(value) => value.clone(),
            _ => return Ok(RelationResults::empty(self.relation_type())),
        };
        trace!(alias = %self.alias, related = %self.related_class, "Fetching relation");

        match &self.kind {
            RelationKind::ManyToOne { .. } => {
                let query = self.base_query(&related).where_eq(related.primary_key(), key);
                let row = related.repository().first(&query)?;
                let record = row.map(|row| Record::hydrated(registry, &related, row));
                Ok(RelationResults::One(record))
            }
            RelationKind::OneToMany { .. } => {
                let query = self.base_query(&related).where_eq(self.foreign_key(), key);
                let rows = related.repository().fetch(&query)?;
                Ok(RelationResults::Many(
                    rows.into_iter()
                        .map(|row| Record::hydrated(registry, &related, row))
                        .collect(),
                ))
            }
            RelationKind::OneToOne { .. } => {
                let query = self.base_query(&related).where_eq(self.foreign_key(), key);
                let row = related.repository().first(&query)?;
                let record = row.map(|row| Record::hydrated(registry, &related, row));
                Ok(RelationResults::One(record))
            }
            RelationKind::ManyToMany { .. } => {
                let (junction, owner_column, related_column) = self.junction_parts();
                let junction = registry.definition(junction)?;
                let pivots = junction
                    .repository()
                    .fetch(&junction.repository().select().where_eq(owner_column, key))?;

                let ids: Vec<Value> = pivots
                    .iter()
                    .filter_map(|pivot| pivot.get(related_column))
                    .filter(|value| !is_blank(value))
                    .cloned()
                    .collect();
                if ids.is_empty() {
                    return Ok(RelationResults::Many(Vec::new()));
                }

                let query = self
                    .base_query(&related)
                    .where_in(related.primary_key(), ids);
                let records: Vec<Record> = related
                    .repository()
                    .fetch(&query)?
                    .into_iter()
                    .map(|row| Record::hydrated(registry, &related, row))
                    .collect();

                Ok(RelationResults::Many(attach_pivots(
                    &records,
                    &pivots,
                    related_column,
                )))
            }
        }
    }

    fn junction_parts(&self) -> (&str, &str, &str) {
        self.junction().unwrap_or(("", "", ""))
    }

    /// Persist queued links once the owner has its id
    ///
    /// Runs inside the owner's transaction; linked records are saved
    /// without validation and without opening their own transaction.
    pub fn save_linked(&mut self, owner_id: &Value, registry: &Registry) -> OrmResult<()> {
        if self.links.is_empty() {
            return Ok(());
        }
        debug!(
            alias = %self.alias,
            kind = %self.relation_type(),
            links = self.links.len(),
            "Saving linked records"
        );

        match &self.kind {
            RelationKind::ManyToOne { .. } => Ok(()),
            RelationKind::OneToMany { .. } => {
                let foreign_key = self.foreign_key().to_string();
                for link in self.links.iter_mut() {
                    link.set(&foreign_key, owner_id.clone());
                    save_nested(&self.alias, link)?;
                }
                Ok(())
            }
            RelationKind::OneToOne { .. } => {
                let foreign_key = self.foreign_key().to_string();
                let related = registry.definition(&self.related_class)?;

                // Release whichever row currently points at the owner
                let mut others = related.repository().select().where_eq(&foreign_key, owner_id.clone());
                if let Some(id) = self.links.first().and_then(|link| link.id()) {
                    others = others.where_ne(related.primary_key(), id.clone());
                }
                let mut clear = Row::new();
                clear.insert(foreign_key.clone(), Value::Null);
                related
                    .repository()
                    .update_where(&others, &clear)
                    .map_err(|err| OrmError::relation_failure(&self.alias, err.to_string()))?;

                for link in self.links.iter_mut() {
                    link.set(&foreign_key, owner_id.clone());
                    save_nested(&self.alias, link)?;
                }
                Ok(())
            }
            RelationKind::ManyToMany { .. } => {
                let (junction, owner_column, related_column) = self.junction_parts();
                let (owner_column, related_column) =
                    (owner_column.to_string(), related_column.to_string());
                let junction = registry.definition(junction)?;
                let repository = junction.repository();

                for link in self.links.iter_mut() {
                    if !link.exists() || link.changed() {
                        save_nested(&self.alias, link)?;
                    }
                    let related_id = link.id().cloned().ok_or_else(|| {
                        OrmError::relation_failure(&self.alias, "linked record has no primary key")
                    })?;

                    let pair = repository
                        .select()
                        .where_eq(&owner_column, owner_id.clone())
                        .where_eq(&related_column, related_id.clone());
                    let existing = repository
                        .count(&pair)
                        .map_err(|err| OrmError::relation_failure(&self.alias, err.to_string()))?;
                    if existing > 0 {
                        continue;
                    }

                    let mut row = Row::new();
                    row.insert(owner_column.clone(), owner_id.clone());
                    row.insert(related_column.clone(), related_id);
                    repository
                        .upsert(&row, None)
                        .map_err(|err| OrmError::relation_failure(&self.alias, err.to_string()))?;
                }
                Ok(())
            }
        }
    }

    /// Delete rows owned through this relation; junction rows only for
    /// many-to-many
    pub fn delete_dependents(&self, owner_id: &Value, registry: &Registry) -> OrmResult<u64> {
        if !self.is_dependent() {
            return Ok(0);
        }

        let deleted = match &self.kind {
            RelationKind::ManyToOne { .. } => 0,
            RelationKind::OneToMany { .. } | RelationKind::OneToOne { .. } => {
                let related = registry.definition(&self.related_class)?;
                let query = Query::delete(related.repository().table())
                    .where_eq(self.foreign_key(), owner_id.clone());
                related.repository().delete_where(&query)?
            }
            RelationKind::ManyToMany { .. } => {
                let (junction, owner_column, _) = self.junction_parts();
                let junction = registry.definition(junction)?;
                let query = Query::delete(junction.repository().table())
                    .where_eq(owner_column, owner_id.clone());
                junction.repository().delete_where(&query)?
            }
        };

        debug!(alias = %self.alias, deleted, "Cascade delete");
        Ok(deleted)
    }
}

fn save_nested(alias: &str, link: &mut Record) -> OrmResult<()> {
    let saved = link
        .save(SaveOptions::nested())
        .map_err(|err| OrmError::relation_failure(alias, err.to_string()))?;
    if saved {
        return Ok(());
    }

    let reason = link
        .last_error()
        .map(|err| err.to_string())
        .unwrap_or_else(|| format!("'{}' record was not saved", link.class()));
    Err(OrmError::relation_failure(alias, reason))
}

/// Order related records by junction row and attach each junction row
pub(crate) fn attach_pivots(records: &[Record], pivots: &[Row], related_column: &str) -> Vec<Record> {
    let by_id: HashMap<String, &Record> = records
        .iter()
        .filter_map(|record| record.id().map(|id| (value_key(id), record)))
        .collect();

    pivots
        .iter()
        .filter_map(|pivot| {
            let related = pivot.get(related_column)?;
            let record = by_id.get(&value_key(related))?;
            let mut record = (*record).clone();
            record.attach_pivot(pivot.clone());
            Some(record)
        })
        .collect()
}
