//! Relation declarations and fetched results

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::model::Record;
use crate::query::{Condition, Query};

use super::inference::detect_foreign_key;

/// Defines the type of relation between two models
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RelationType {
    /// Owner holds the foreign key (belongsTo)
    ManyToOne,
    /// Related rows hold the foreign key (hasMany)
    OneToMany,
    /// Like `OneToMany` with at most one related row (hasOne)
    OneToOne,
    /// Association through a junction model
    ManyToMany,
}

impl RelationType {
    /// Returns true if this relation resolves to a collection
    pub fn is_collection(self) -> bool {
        matches!(self, Self::OneToMany | Self::ManyToMany)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ManyToOne => "many_to_one",
            Self::OneToMany => "one_to_many",
            Self::OneToOne => "one_to_one",
            Self::ManyToMany => "many_to_many",
        }
    }
}

impl fmt::Display for RelationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind-specific relation configuration
///
/// Key slots left as `None` are inferred from model names on resolution.
#[derive(Debug, Clone, PartialEq)]
pub enum RelationKind {
    ManyToOne {
        foreign_key: Option<String>,
    },
    OneToMany {
        foreign_key: Option<String>,
        dependent: bool,
    },
    OneToOne {
        foreign_key: Option<String>,
        dependent: bool,
    },
    ManyToMany {
        junction: String,
        owner_key: Option<String>,
        related_key: Option<String>,
    },
}

impl RelationKind {
    pub fn relation_type(&self) -> RelationType {
        match self {
            Self::ManyToOne { .. } => RelationType::ManyToOne,
            Self::OneToMany { .. } => RelationType::OneToMany,
            Self::OneToOne { .. } => RelationType::OneToOne,
            Self::ManyToMany { .. } => RelationType::ManyToMany,
        }
    }

    /// Whether related rows go away with the owner
    ///
    /// Fixed for many-to-one (never) and many-to-many (always, junction rows).
    pub fn is_dependent(&self) -> bool {
        match self {
            Self::ManyToOne { .. } => false,
            Self::OneToMany { dependent, .. } | Self::OneToOne { dependent, .. } => *dependent,
            Self::ManyToMany { .. } => true,
        }
    }

    /// Fill every unset key slot
    ///
    /// Many-to-one keys reference the related model; one-to-many and
    /// one-to-one keys live on the related rows and reference the owner;
    /// both junction keys are inferred independently.
    pub fn resolve(&mut self, owner_class: &str, related_class: &str) {
        match self {
            Self::ManyToOne { foreign_key } => {
                detect_foreign_key(foreign_key, related_class);
            }
            Self::OneToMany { foreign_key, .. } | Self::OneToOne { foreign_key, .. } => {
                detect_foreign_key(foreign_key, owner_class);
            }
            Self::ManyToMany {
                owner_key,
                related_key,
                ..
            } => {
                detect_foreign_key(owner_key, owner_class);
                detect_foreign_key(related_key, related_class);
            }
        }
    }
}

/// Declared association of one model
#[derive(Clone)]
pub struct RelationConfig {
    pub alias: String,
    pub related: String,
    pub kind: RelationKind,
    pub conditions: Option<Condition>,
}

impl fmt::Debug for RelationConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelationConfig")
            .field("alias", &self.alias)
            .field("related", &self.related)
            .field("kind", &self.kind)
            .field("has_conditions", &self.conditions.is_some())
            .finish()
    }
}

impl RelationConfig {
    pub fn relation_type(&self) -> RelationType {
        self.kind.relation_type()
    }
}

/// Chainable configuration of one relation declaration
#[derive(Debug, Clone)]
pub struct RelationBuilder {
    config: RelationConfig,
}

impl RelationBuilder {
    fn new(alias: &str, related: &str, kind: RelationKind) -> Self {
        Self {
            config: RelationConfig {
                alias: alias.to_string(),
                related: related.to_string(),
                kind,
                conditions: None,
            },
        }
    }

    pub fn many_to_one(alias: &str, related: &str) -> Self {
        Self::new(alias, related, RelationKind::ManyToOne { foreign_key: None })
    }

    pub fn one_to_many(alias: &str, related: &str) -> Self {
        Self::new(
            alias,
            related,
            RelationKind::OneToMany {
                foreign_key: None,
                dependent: true,
            },
        )
    }

    pub fn one_to_one(alias: &str, related: &str) -> Self {
        Self::new(
            alias,
            related,
            RelationKind::OneToOne {
                foreign_key: None,
                dependent: false,
            },
        )
    }

    pub fn many_to_many(alias: &str, related: &str, junction: &str) -> Self {
        Self::new(
            alias,
            related,
            RelationKind::ManyToMany {
                junction: junction.to_string(),
                owner_key: None,
                related_key: None,
            },
        )
    }

    /// Explicit foreign key column; ignored for many-to-many (see `junction_keys`)
    pub fn foreign_key(mut self, column: &str) -> Self {
        match &mut self.config.kind {
            RelationKind::ManyToOne { foreign_key }
            | RelationKind::OneToMany { foreign_key, .. }
            | RelationKind::OneToOne { foreign_key, .. } => {
                *foreign_key = Some(column.to_string());
            }
            RelationKind::ManyToMany { .. } => {
                tracing::debug!(
                    alias = %self.config.alias,
                    "foreign_key() ignored on a many-to-many relation"
                );
            }
        }
        self
    }

    /// Junction columns referencing the owner and the related model
    pub fn junction_keys(mut self, owner: &str, related: &str) -> Self {
        if let RelationKind::ManyToMany {
            owner_key,
            related_key,
            ..
        } = &mut self.config.kind
        {
            *owner_key = Some(owner.to_string());
            *related_key = Some(related.to_string());
        }
        self
    }

    /// Cascade flag; only one-to-many and one-to-one accept an override
    pub fn dependent(mut self, value: bool) -> Self {
        match &mut self.config.kind {
            RelationKind::OneToMany { dependent, .. } | RelationKind::OneToOne { dependent, .. } => {
                *dependent = value;
            }
            _ => {
                tracing::debug!(
                    alias = %self.config.alias,
                    "dependent() is fixed for this relation type"
                );
            }
        }
        self
    }

    /// Base predicate applied to every query against the related model
    pub fn conditions<F>(mut self, predicate: F) -> Self
    where
        F: Fn(Query) -> Query + Send + Sync + 'static,
    {
        self.config.conditions = Some(Arc::new(predicate));
        self
    }

    pub fn build(self) -> RelationConfig {
        self.config
    }
}

/// Memoized fetch result of a relation
#[derive(Debug, Clone)]
pub enum RelationResults {
    One(Option<Record>),
    Many(Vec<Record>),
}

impl RelationResults {
    pub fn empty(relation_type: RelationType) -> Self {
        if relation_type.is_collection() {
            Self::Many(Vec::new())
        } else {
            Self::One(None)
        }
    }

    pub fn records(&self) -> Vec<&Record> {
        match self {
            Self::One(record) => record.iter().collect(),
            Self::Many(records) => records.iter().collect(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::One(record) => usize::from(record.is_some()),
            Self::Many(records) => records.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn first(&self) -> Option<&Record> {
        match self {
            Self::One(record) => record.as_ref(),
            Self::Many(records) => records.first(),
        }
    }

    /// Attribute rendering stored under the relation alias
    pub fn to_value(&self) -> Value {
        match self {
            Self::One(Some(record)) => record.to_json(),
            Self::One(None) => Value::Null,
            Self::Many(records) => Value::Array(records.iter().map(Record::to_json).collect()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dependent_defaults_and_fixed_flags() {
        assert!(!RelationBuilder::many_to_one("genre", "Genre").build().kind.is_dependent());
        assert!(RelationBuilder::one_to_many("posts", "Post").build().kind.is_dependent());
        assert!(!RelationBuilder::one_to_one("profile", "Profile").build().kind.is_dependent());
        assert!(RelationBuilder::many_to_many("tags", "Tag", "PostTag")
            .build()
            .kind
            .is_dependent());

        // Overrides only reach the configurable kinds
        let belongs = RelationBuilder::many_to_one("genre", "Genre").dependent(true).build();
        assert!(!belongs.kind.is_dependent());
        let junction = RelationBuilder::many_to_many("tags", "Tag", "PostTag")
            .dependent(false)
            .build();
        assert!(junction.kind.is_dependent());
        let posts = RelationBuilder::one_to_many("posts", "Post").dependent(false).build();
        assert!(!posts.kind.is_dependent());
    }

    #[test]
    fn test_resolve_infers_keys_by_direction() {
        let mut belongs = RelationKind::ManyToOne { foreign_key: None };
        belongs.resolve("Book", "Genre");
        assert_eq!(belongs, RelationKind::ManyToOne { foreign_key: Some("genre_id".into()) });

        let mut has_many = RelationKind::OneToMany { foreign_key: None, dependent: true };
        has_many.resolve("app::Topic", "Post");
        assert_eq!(
            has_many,
            RelationKind::OneToMany { foreign_key: Some("topic_id".into()), dependent: true }
        );

        let mut junction = RelationKind::ManyToMany {
            junction: "BookGenre".into(),
            owner_key: None,
            related_key: Some("category_id".into()),
        };
        junction.resolve("Book", "Genre");
        assert_eq!(
            junction,
            RelationKind::ManyToMany {
                junction: "BookGenre".into(),
                owner_key: Some("book_id".into()),
                related_key: Some("category_id".into()),
            }
        );
    }

    #[test]
    fn test_explicit_foreign_key_survives_resolution() {
        let mut config = RelationBuilder::many_to_one("author", "User")
            .foreign_key("written_by")
            .build();
        config.kind.resolve("Post", "User");
        assert_eq!(
            config.kind,
            RelationKind::ManyToOne { foreign_key: Some("written_by".into()) }
        );
    }

    #[test]
    fn test_empty_results_follow_cardinality() {
        assert!(matches!(RelationResults::empty(RelationType::OneToOne), RelationResults::One(None)));
        assert!(matches!(RelationResults::empty(RelationType::ManyToMany), RelationResults::Many(ref v) if v.is_empty()));
        assert_eq!(RelationResults::empty(RelationType::OneToMany).to_value(), Value::Array(vec![]));
        assert_eq!(RelationResults::empty(RelationType::ManyToOne).to_value(), Value::Null);
    }
}
