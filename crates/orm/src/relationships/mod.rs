//! Relationships Module - relation declarations, per-record relation
//! instances and eager loading

pub mod eager_loading;
pub mod inference;
pub mod relation;
pub mod types;

pub use eager_loading::RecordQuery;
pub use inference::{detect_foreign_key, foreign_key_for, short_name};
pub use relation::{LinkEffect, Relation};
pub use types::{RelationBuilder, RelationConfig, RelationKind, RelationResults, RelationType};
