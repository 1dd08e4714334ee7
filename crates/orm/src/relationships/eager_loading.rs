//! Eager loading - `with` support for record queries
//!
//! Every requested alias runs one secondary query per level, keyed with
//! `IN` over the values collected from the parent records, and the results
//! are distributed into each parent's relation memo.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::error::{OrmError, OrmResult};
use crate::model::{ModelDefinition, Record, Registry};
use crate::query::{Query, QueryType};
use crate::value::{is_blank, value_key, Row};

use super::relation::{attach_pivots, Relation};
use super::types::{RelationKind, RelationResults};

/// Query over one model that yields records
#[derive(Clone)]
pub struct RecordQuery {
    registry: Registry,
    definition: Arc<ModelDefinition>,
    query: Query,
    eager: Vec<EagerLoad>,
}

#[derive(Clone)]
struct EagerLoad {
    relation: Relation,
    query: RecordQuery,
}

impl fmt::Debug for RecordQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordQuery")
            .field("model", &self.definition.name())
            .field("query", &self.query)
            .field(
                "with",
                &self.eager.iter().map(|load| load.relation.alias()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl RecordQuery {
    /// Select query over every row of the model
    pub fn new(registry: &Registry, definition: Arc<ModelDefinition>) -> Self {
        let query = definition.repository().select();
        Self::from_query(registry, definition, query)
    }

    /// Wrap an existing statement
    pub fn from_query(registry: &Registry, definition: Arc<ModelDefinition>, query: Query) -> Self {
        Self {
            registry: registry.clone(),
            definition,
            query,
            eager: Vec::new(),
        }
    }

    pub fn definition(&self) -> &ModelDefinition {
        &self.definition
    }

    pub fn query(&self) -> &Query {
        &self.query
    }

    pub fn query_type(&self) -> QueryType {
        self.query.query_type()
    }

    /// Aliases requested for eager loading, in request order
    pub fn eager_aliases(&self) -> Vec<&str> {
        self.eager.iter().map(|load| load.relation.alias()).collect()
    }

    /// Apply an arbitrary change to the wrapped statement
    pub fn map_query<F>(mut self, f: F) -> Self
    where
        F: FnOnce(Query) -> Query,
    {
        self.query = f(self.query);
        self
    }

    pub fn where_eq<T: Into<Value>>(self, column: &str, value: T) -> Self {
        self.map_query(|q| q.where_eq(column, value))
    }

    pub fn where_ne<T: Into<Value>>(self, column: &str, value: T) -> Self {
        self.map_query(|q| q.where_ne(column, value))
    }

    pub fn where_condition<T: Into<Value>>(self, column: &str, operator: &str, value: T) -> Self {
        self.map_query(|q| q.where_condition(column, operator, value))
    }

    pub fn where_in<T: Into<Value>>(self, column: &str, values: Vec<T>) -> Self {
        self.map_query(|q| q.where_in(column, values))
    }

    pub fn where_null(self, column: &str) -> Self {
        self.map_query(|q| q.where_null(column))
    }

    pub fn where_not_null(self, column: &str) -> Self {
        self.map_query(|q| q.where_not_null(column))
    }

    pub fn order_by(self, column: &str) -> Self {
        self.map_query(|q| q.order_by(column))
    }

    pub fn order_by_desc(self, column: &str) -> Self {
        self.map_query(|q| q.order_by_desc(column))
    }

    pub fn limit(self, count: usize) -> Self {
        self.map_query(|q| q.limit(count))
    }

    pub fn offset(self, count: usize) -> Self {
        self.map_query(|q| q.offset(count))
    }

    /// Restrict the projection; keys needed by requested relations are kept
    pub fn fields<S: AsRef<str>>(mut self, fields: &[S]) -> Self {
        self.query = self.query.fields(fields);
        let keys: Vec<String> = self
            .eager
            .iter()
            .map(|load| load.relation.owner_key(self.definition.primary_key()).to_string())
            .collect();
        for key in keys {
            self.query = self.query.ensure_field(&key);
        }
        self
    }

    /// Eager load `alias`
    pub fn with(self, alias: &str) -> OrmResult<Self> {
        self.with_where(alias, Ok)
    }

    /// Eager load several aliases
    pub fn with_many(self, aliases: &[&str]) -> OrmResult<Self> {
        aliases.iter().try_fold(self, |query, alias| query.with(alias))
    }

    /// Eager load `alias` only when `condition` holds
    pub fn with_when(self, condition: bool, alias: &str) -> OrmResult<Self> {
        if condition {
            self.with(alias)
        } else {
            Ok(self)
        }
    }

    /// Eager load `alias`, constraining the related query
    ///
    /// The relation's own conditions are applied first, then `constraint`,
    /// which may itself request nested eager loads.
    pub fn with_where<F>(mut self, alias: &str, constraint: F) -> OrmResult<Self>
    where
        F: FnOnce(RecordQuery) -> OrmResult<RecordQuery>,
    {
        if self.query.query_type() != QueryType::Select {
            return Err(OrmError::InvalidRelationQuery {
                alias: alias.to_string(),
                query_type: self.query.query_type().to_string(),
            });
        }

        let config = self
            .definition
            .relation_config(alias)
            .ok_or_else(|| OrmError::missing_relation(self.definition.name(), alias))?;
        let relation = Relation::new(config, self.definition.name());
        let related = self.registry.definition(relation.related_class())?;

        let base = relation.base_query(&related);
        let query = constraint(RecordQuery::from_query(&self.registry, related, base))?;

        // The owner key must survive an explicit projection to join results
        let owner_key = relation.owner_key(self.definition.primary_key()).to_string();
        self.query = self.query.ensure_field(&owner_key);

        debug!(model = %self.definition.name(), alias, "Eager load requested");
        self.eager.retain(|load| load.relation.alias() != alias);
        self.eager.push(EagerLoad { relation, query });
        Ok(self)
    }

    /// Execute and hydrate records, then run the eager loads
    pub fn all(self) -> OrmResult<Vec<Record>> {
        let rows = self.definition.repository().fetch(&self.query)?;
        let mut records: Vec<Record> = rows
            .into_iter()
            .map(|row| Record::hydrated(&self.registry, &self.definition, row))
            .collect();

        if records.is_empty() {
            return Ok(records);
        }

        for load in self.eager {
            load.apply(&self.registry, &self.definition, &mut records)?;
        }
        Ok(records)
    }

    pub fn first(self) -> OrmResult<Option<Record>> {
        Ok(self.limit(1).all()?.into_iter().next())
    }

    pub fn count(&self) -> OrmResult<u64> {
        Ok(self.definition.repository().count(&self.query)?)
    }
}

fn distinct_keys<'a>(values: impl Iterator<Item = Option<&'a Value>>) -> Vec<Value> {
    let mut seen = HashSet::new();
    values
        .flatten()
        .filter(|value| !is_blank(value))
        .filter(|value| seen.insert(value_key(value)))
        .cloned()
        .collect()
}

fn group_by_column(records: Vec<Record>, column: &str) -> HashMap<String, Vec<Record>> {
    let mut groups: HashMap<String, Vec<Record>> = HashMap::new();
    for record in records {
        if let Some(key) = record.attributes().get(column).filter(|v| !is_blank(v)) {
            groups.entry(value_key(key)).or_default().push(record);
        }
    }
    groups
}

impl EagerLoad {
    fn apply(
        self,
        registry: &Registry,
        owner: &ModelDefinition,
        parents: &mut [Record],
    ) -> OrmResult<()> {
        let alias = self.relation.alias().to_string();
        let owner_pk = owner.primary_key().to_string();
        let related_pk = self.query.definition.primary_key().to_string();

        match self.relation.kind() {
            RelationKind::ManyToOne { .. } => {
                let foreign_key = self.relation.foreign_key().to_string();
                let keys = distinct_keys(parents.iter().map(|p| p.attributes().get(&foreign_key)));
                let by_id = if keys.is_empty() {
                    HashMap::new()
                } else {
                    let related = self
                        .query
                        .map_query(|q| q.where_in(&related_pk, keys).ensure_field(&related_pk))
                        .all()?;
                    group_by_column(related, &related_pk)
                };

                for parent in parents.iter_mut() {
                    let record = parent
                        .attributes()
                        .get(&foreign_key)
                        .and_then(|key| by_id.get(&value_key(key)))
                        .and_then(|group| group.first().cloned());
                    parent.set_relation_results(&alias, RelationResults::One(record));
                }
            }
            RelationKind::OneToMany { .. } | RelationKind::OneToOne { .. } => {
                let foreign_key = self.relation.foreign_key().to_string();
                let single = matches!(self.relation.kind(), RelationKind::OneToOne { .. });
                let keys = distinct_keys(parents.iter().map(|p| p.attributes().get(&owner_pk)));
                let mut groups = if keys.is_empty() {
                    HashMap::new()
                } else {
                    let related = self
                        .query
                        .map_query(|q| q.where_in(&foreign_key, keys).ensure_field(&foreign_key))
                        .all()?;
                    group_by_column(related, &foreign_key)
                };

                for parent in parents.iter_mut() {
                    let group = parent
                        .attributes()
                        .get(&owner_pk)
                        .and_then(|key| groups.remove(&value_key(key)))
                        .unwrap_or_default();
                    let results = if single {
                        RelationResults::One(group.into_iter().next())
                    } else {
                        RelationResults::Many(group)
                    };
                    parent.set_relation_results(&alias, results);
                }
            }
            RelationKind::ManyToMany { .. } => {
                let (junction, owner_column, related_column) = self
                    .relation
                    .junction()
                    .map(|(j, o, r)| (j.to_string(), o.to_string(), r.to_string()))
                    .unwrap_or_default();
                let junction = registry.definition(&junction)?;

                let owner_ids = distinct_keys(parents.iter().map(|p| p.attributes().get(&owner_pk)));
                let pivots = if owner_ids.is_empty() {
                    Vec::new()
                } else {
                    let query = junction.repository().select().where_in(&owner_column, owner_ids);
                    junction.repository().fetch(&query)?
                };

                let related_ids = distinct_keys(pivots.iter().map(|p| p.get(&related_column)));
                let related = if related_ids.is_empty() {
                    Vec::new()
                } else {
                    self.query
                        .map_query(|q| q.where_in(&related_pk, related_ids).ensure_field(&related_pk))
                        .all()?
                };

                let mut pivots_by_owner: HashMap<String, Vec<Row>> = HashMap::new();
                for pivot in pivots {
                    if let Some(owner_id) = pivot.get(&owner_column).filter(|v| !is_blank(v)) {
                        pivots_by_owner.entry(value_key(owner_id)).or_default().push(pivot);
                    }
                }

                for parent in parents.iter_mut() {
                    let records = parent
                        .attributes()
                        .get(&owner_pk)
                        .and_then(|key| pivots_by_owner.get(&value_key(key)))
                        .map(|pivots| attach_pivots(&related, pivots, &related_column))
                        .unwrap_or_default();
                    parent.set_relation_results(&alias, RelationResults::Many(records));
                }
            }
        }

        debug!(model = %owner.name(), alias = %alias, parents = parents.len(), "Eager load distributed");
        Ok(())
    }
}
