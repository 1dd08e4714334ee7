//! # elif-record: ActiveRecord layer for elif.rs
//!
//! Records track their own attributes, dirty state and existence, declare
//! relations to other models, and save, delete and validate themselves
//! through a `Repository` collaborator. Counter caches on related models
//! are kept in sync after every write.
//!
//! ```no_run
//! use elif_record::{MemoryDatabase, ModelDefinition, Registry, SaveOptions};
//! use serde_json::json;
//!
//! # fn main() -> elif_record::OrmResult<()> {
//! let db = MemoryDatabase::new();
//! let registry = Registry::new();
//! registry.register(ModelDefinition::builder("Genre", db.repository("genres")).build()?);
//! registry.register(
//!     ModelDefinition::builder("Book", db.repository("books"))
//!         .belongs_to("genre", "Genre")
//!         .track("genre", "book_count")
//!         .build()?,
//! );
//!
//! let mut book = registry.make_with("Book", [("title".to_string(), json!("Dune"))].into_iter().collect())?;
//! book.link("genre", registry.find_or_fail("Genre", 1)?)?;
//! book.save(SaveOptions::default())?;
//! # Ok(())
//! # }
//! ```

pub mod counter;
pub mod error;
pub mod event_error;
pub mod events;
pub mod model;
pub mod observers;
pub mod query;
pub mod relationships;
pub mod repository;
pub mod transaction;
pub mod validation;
pub mod value;

pub use counter::{CounterConfig, CounterSync, Counters, SyncCache, SyncReport};
pub use error::{OrmError, OrmResult, RepositoryError, RepositoryResult};
pub use event_error::EventError;
pub use events::{LifecycleStage, RecordObserver};
pub use model::{
    DeleteOptions, ModelBuilder, ModelConfig, ModelDefinition, Record, Registry, SaveOptions,
};
pub use observers::ObserverRegistry;
pub use query::{Condition, Query, QueryOperator, QueryType};
pub use relationships::{
    RecordQuery, Relation, RelationBuilder, RelationKind, RelationResults, RelationType,
};
pub use repository::{MemoryDatabase, MemoryRepository, Repository, TableStats};
pub use transaction::transaction;
pub use validation::{FieldErrors, Messages, RuleValidator, ValidationRules, Validator};
pub use value::{Attributes, Row};
