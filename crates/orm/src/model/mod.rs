//! Model System - definitions, the registry and records
//!
//! - `definition`: per-model configuration and its builder
//! - `config`: serializable model settings and operation options
//! - `registry`: name -> definition lookup used by relations
//! - `record`: attributes, dirty tracking, mass assignment
//! - `persistence`: save/delete orchestration

pub mod config;
pub mod definition;
pub mod persistence;
pub mod record;
pub mod registry;

pub use config::{CounterSpec, DeleteOptions, ModelConfig, SaveOptions};
pub use definition::{Accessor, ModelBuilder, ModelDefinition, Mutator, GUARD_ALL};
pub use persistence::{CREATED_AT, UPDATED_AT};
pub use record::{Record, PIVOT_KEY};
pub use registry::Registry;
