//! Model definitions
//!
//! A `ModelDefinition` is everything records of one model share: the
//! repository, relation declarations, mass assignment lists, transforms,
//! validation, observers and tracked counters. It is immutable once built
//! and shared behind `Arc`.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::counter::{CounterConfig, Counters};
use crate::error::{OrmError, OrmResult};
use crate::events::RecordObserver;
use crate::observers::ObserverRegistry;
use crate::query::Query;
use crate::relationships::{short_name, RelationBuilder, RelationConfig, RelationType};
use crate::repository::Repository;
use crate::validation::{Messages, RuleValidator, ValidationRules, Validator};

use super::config::ModelConfig;

/// Transform applied by `set` before storing a value
pub type Mutator = Arc<dyn Fn(&Value) -> Value + Send + Sync>;

/// Transform applied when reading a value out of a record
pub type Accessor = Arc<dyn Fn(&Value) -> Value + Send + Sync>;

/// Guard list entry blocking every attribute
pub const GUARD_ALL: &str = "*";

pub struct ModelDefinition {
    name: String,
    repository: Arc<dyn Repository>,
    relations: Vec<RelationConfig>,
    fillable: Vec<String>,
    guarded: Vec<String>,
    mutators: HashMap<String, Mutator>,
    accessors: HashMap<String, Accessor>,
    rules: ValidationRules,
    messages: Messages,
    validator: Arc<dyn Validator>,
    observers: ObserverRegistry,
    counters: Counters,
    timestamps: bool,
}

impl fmt::Debug for ModelDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelDefinition")
            .field("name", &self.name)
            .field("table", &self.repository.table())
            .field("primary_key", &self.repository.primary_key())
            .field("relations", &self.relations)
            .field("fillable", &self.fillable)
            .field("guarded", &self.guarded)
            .field("rules", &self.rules)
            .field("observers", &self.observers)
            .field("counters", &self.counters)
            .field("timestamps", &self.timestamps)
            .finish()
    }
}

impl ModelDefinition {
    pub fn builder<R>(name: &str, repository: R) -> ModelBuilder
    where
        R: Repository + 'static,
    {
        ModelBuilder::new(name, Arc::new(repository))
    }

    /// Builder over a repository handle shared with other code
    pub fn builder_shared(name: &str, repository: Arc<dyn Repository>) -> ModelBuilder {
        ModelBuilder::new(name, repository)
    }

    /// Model name as registered, possibly module qualified
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn short_name(&self) -> &str {
        short_name(&self.name)
    }

    pub fn repository(&self) -> &dyn Repository {
        self.repository.as_ref()
    }

    pub fn shared_repository(&self) -> Arc<dyn Repository> {
        Arc::clone(&self.repository)
    }

    pub fn primary_key(&self) -> &str {
        self.repository.primary_key()
    }

    pub fn relations(&self) -> &[RelationConfig] {
        &self.relations
    }

    pub fn relation_config(&self, alias: &str) -> Option<&RelationConfig> {
        self.relations.iter().find(|config| config.alias == alias)
    }

    pub fn has_relation(&self, alias: &str) -> bool {
        self.relation_config(alias).is_some()
    }

    pub fn fillable(&self) -> &[String] {
        &self.fillable
    }

    pub fn guarded(&self) -> &[String] {
        &self.guarded
    }

    /// Guard list is exactly the wildcard
    pub fn is_fully_guarded(&self) -> bool {
        self.guarded.len() == 1 && self.guarded[0] == GUARD_ALL
    }

    pub fn mutator(&self, key: &str) -> Option<&Mutator> {
        self.mutators.get(key)
    }

    pub fn accessor(&self, key: &str) -> Option<&Accessor> {
        self.accessors.get(key)
    }

    pub fn rules(&self) -> &ValidationRules {
        &self.rules
    }

    pub fn messages(&self) -> &Messages {
        &self.messages
    }

    pub fn validator(&self) -> &dyn Validator {
        self.validator.as_ref()
    }

    pub fn observers(&self) -> &ObserverRegistry {
        &self.observers
    }

    pub fn counters(&self) -> &Counters {
        &self.counters
    }

    pub fn uses_timestamps(&self) -> bool {
        self.timestamps
    }
}

/// Builder for `ModelDefinition`
pub struct ModelBuilder {
    name: String,
    repository: Arc<dyn Repository>,
    relations: Vec<RelationConfig>,
    fillable: Vec<String>,
    guarded: Vec<String>,
    mutators: HashMap<String, Mutator>,
    accessors: HashMap<String, Accessor>,
    rules: ValidationRules,
    messages: Messages,
    validator: Arc<dyn Validator>,
    observers: ObserverRegistry,
    counters: Counters,
    timestamps: bool,
}

impl ModelBuilder {
    fn new(name: &str, repository: Arc<dyn Repository>) -> Self {
        Self {
            name: name.to_string(),
            repository,
            relations: Vec::new(),
            fillable: Vec::new(),
            guarded: Vec::new(),
            mutators: HashMap::new(),
            accessors: HashMap::new(),
            rules: ValidationRules::new(),
            messages: Messages::new(),
            validator: Arc::new(RuleValidator::new()),
            observers: ObserverRegistry::new(),
            counters: Counters::default(),
            timestamps: false,
        }
    }

    /// Declare a relation from a configured `RelationBuilder`
    pub fn relation(mut self, relation: RelationBuilder) -> Self {
        self.relations.push(relation.build());
        self
    }

    /// Many-to-one: this model holds `<related>_id`
    pub fn belongs_to(self, alias: &str, related: &str) -> Self {
        self.relation(RelationBuilder::many_to_one(alias, related))
    }

    pub fn belongs_to_with<F>(self, alias: &str, related: &str, configure: F) -> Self
    where
        F: FnOnce(RelationBuilder) -> RelationBuilder,
    {
        self.relation(configure(RelationBuilder::many_to_one(alias, related)))
    }

    /// One-to-many: related rows hold `<model>_id`
    pub fn has_many(self, alias: &str, related: &str) -> Self {
        self.relation(RelationBuilder::one_to_many(alias, related))
    }

    pub fn has_many_with<F>(self, alias: &str, related: &str, configure: F) -> Self
    where
        F: FnOnce(RelationBuilder) -> RelationBuilder,
    {
        self.relation(configure(RelationBuilder::one_to_many(alias, related)))
    }

    /// One-to-one: at most one related row holds `<model>_id`
    pub fn has_one(self, alias: &str, related: &str) -> Self {
        self.relation(RelationBuilder::one_to_one(alias, related))
    }

    pub fn has_one_with<F>(self, alias: &str, related: &str, configure: F) -> Self
    where
        F: FnOnce(RelationBuilder) -> RelationBuilder,
    {
        self.relation(configure(RelationBuilder::one_to_one(alias, related)))
    }

    /// Many-to-many through the `junction` model
    pub fn belongs_to_many(self, alias: &str, related: &str, junction: &str) -> Self {
        self.relation(RelationBuilder::many_to_many(alias, related, junction))
    }

    pub fn belongs_to_many_with<F>(
        self,
        alias: &str,
        related: &str,
        junction: &str,
        configure: F,
    ) -> Self
    where
        F: FnOnce(RelationBuilder) -> RelationBuilder,
    {
        self.relation(configure(RelationBuilder::many_to_many(alias, related, junction)))
    }

    pub fn fillable(mut self, fields: &[&str]) -> Self {
        self.fillable = fields.iter().map(|f| f.to_string()).collect();
        self
    }

    pub fn guarded(mut self, fields: &[&str]) -> Self {
        self.guarded = fields.iter().map(|f| f.to_string()).collect();
        self
    }

    /// Refuse mass assignment entirely
    pub fn guard_all(self) -> Self {
        self.guarded(&[GUARD_ALL])
    }

    pub fn mutator<F>(mut self, field: &str, transform: F) -> Self
    where
        F: Fn(&Value) -> Value + Send + Sync + 'static,
    {
        self.mutators.insert(field.to_string(), Arc::new(transform));
        self
    }

    pub fn accessor<F>(mut self, field: &str, transform: F) -> Self
    where
        F: Fn(&Value) -> Value + Send + Sync + 'static,
    {
        self.accessors.insert(field.to_string(), Arc::new(transform));
        self
    }

    pub fn rule(mut self, field: &str, rules: &[&str]) -> Self {
        self.rules.insert(
            field.to_string(),
            rules.iter().map(|r| r.to_string()).collect(),
        );
        self
    }

    pub fn rules(mut self, rules: ValidationRules) -> Self {
        self.rules.extend(rules);
        self
    }

    pub fn message(mut self, key: &str, message: &str) -> Self {
        self.messages.insert(key.to_string(), message.to_string());
        self
    }

    pub fn messages(mut self, messages: Messages) -> Self {
        self.messages.extend(messages);
        self
    }

    pub fn validator<V>(mut self, validator: V) -> Self
    where
        V: Validator + 'static,
    {
        self.validator = Arc::new(validator);
        self
    }

    pub fn observer<O>(mut self, observer: O) -> Self
    where
        O: RecordObserver + 'static,
    {
        self.observers.register(Arc::new(observer));
        self
    }

    /// Keep `field` on the model behind `alias` equal to the number of
    /// rows of this model referencing it
    pub fn track(mut self, alias: &str, field: &str) -> Self {
        self.counters.track(alias, CounterConfig::new(field));
        self
    }

    /// Like `track`, counting only rows matched by `scope`
    pub fn track_scoped<F>(mut self, alias: &str, field: &str, scope: F) -> Self
    where
        F: Fn(Query) -> Query + Send + Sync + 'static,
    {
        self.counters.track(alias, CounterConfig::scoped(field, scope));
        self
    }

    /// Stamp `created_at` / `updated_at` on save
    pub fn timestamps(mut self, enabled: bool) -> Self {
        self.timestamps = enabled;
        self
    }

    /// Apply a deserialized configuration on top of the builder
    pub fn configure(mut self, config: ModelConfig) -> Self {
        if !config.fillable.is_empty() {
            self.fillable = config.fillable;
        }
        if !config.guarded.is_empty() {
            self.guarded = config.guarded;
        }
        self.rules.extend(config.rules);
        self.messages.extend(config.messages);
        if let Some(timestamps) = config.timestamps {
            self.timestamps = timestamps;
        }
        for (alias, counter) in config.counters {
            self.counters
                .track(&alias, CounterConfig::with_equalities(&counter.field, counter.scope));
        }
        self
    }

    /// Validate the declarations and freeze them
    pub fn build(mut self) -> OrmResult<ModelDefinition> {
        if self.name.trim().is_empty() {
            return Err(OrmError::Configuration("model name cannot be empty".to_string()));
        }

        let mut aliases = HashSet::new();
        for config in &mut self.relations {
            if config.alias.is_empty() {
                return Err(OrmError::Configuration(format!(
                    "relation on model '{}' has an empty alias",
                    self.name
                )));
            }
            if !aliases.insert(config.alias.clone()) {
                return Err(OrmError::Configuration(format!(
                    "relation alias '{}' is declared twice on model '{}'",
                    config.alias, self.name
                )));
            }
            if config.alias == self.repository.primary_key() {
                return Err(OrmError::Configuration(format!(
                    "relation alias '{}' collides with the primary key of '{}'",
                    config.alias, self.name
                )));
            }
            config.kind.resolve(&self.name, &config.related);
        }

        for (alias, counter) in self.counters.iter() {
            let config = self
                .relations
                .iter()
                .find(|config| config.alias == alias)
                .ok_or_else(|| OrmError::missing_relation(&self.name, alias))?;
            match config.relation_type() {
                RelationType::ManyToOne | RelationType::ManyToMany => {}
                other => {
                    return Err(OrmError::Configuration(format!(
                        "counter '{}' on model '{}' tracks a {} relation; only many_to_one and many_to_many can be tracked",
                        counter.field, self.name, other
                    )))
                }
            }
        }

        debug!(
            model = %self.name,
            table = self.repository.table(),
            relations = self.relations.len(),
            counters = self.counters.len(),
            "Model defined"
        );

        Ok(ModelDefinition {
            name: self.name,
            repository: self.repository,
            relations: self.relations,
            fillable: self.fillable,
            guarded: self.guarded,
            mutators: self.mutators,
            accessors: self.accessors,
            rules: self.rules,
            messages: self.messages,
            validator: self.validator,
            observers: self.observers,
            counters: self.counters,
            timestamps: self.timestamps,
        })
    }
}
