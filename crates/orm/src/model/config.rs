//! Model configuration and operation options
//!
//! `ModelConfig` is the serializable part of a model definition, so it can
//! live in a JSON or YAML file next to the application config.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::OrmResult;
use crate::validation::{Messages, ValidationRules};

/// Serializable model settings applied with `ModelBuilder::configure`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub fillable: Vec<String>,
    pub guarded: Vec<String>,
    pub rules: ValidationRules,
    pub messages: Messages,
    pub timestamps: Option<bool>,
    /// Relation alias -> counter column and equality scope
    pub counters: IndexMap<String, CounterSpec>,
}

/// Counter entry of a `ModelConfig`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CounterSpec {
    pub field: String,
    #[serde(default)]
    pub scope: IndexMap<String, Value>,
}

impl ModelConfig {
    pub fn from_json(source: &str) -> OrmResult<Self> {
        Ok(serde_json::from_str(source)?)
    }

    pub fn from_value(value: Value) -> OrmResult<Self> {
        Ok(serde_json::from_value(value)?)
    }
}

/// Options of `Record::save`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SaveOptions {
    /// Run validation first
    pub validate: bool,
    /// Wrap every write in one transaction
    pub atomic: bool,
    /// Write every attribute instead of the dirty diff
    pub force: bool,
}

impl Default for SaveOptions {
    fn default() -> Self {
        Self {
            validate: true,
            atomic: true,
            force: false,
        }
    }
}

impl SaveOptions {
    /// Linked records saved inside the owner's transaction
    pub fn nested() -> Self {
        Self {
            validate: false,
            atomic: false,
            force: false,
        }
    }

    pub fn validate(mut self, validate: bool) -> Self {
        self.validate = validate;
        self
    }

    pub fn atomic(mut self, atomic: bool) -> Self {
        self.atomic = atomic;
        self
    }

    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }
}

/// Options of `Record::delete`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeleteOptions {
    pub atomic: bool,
    /// Delete dependent relation rows with the owner
    pub cascade: bool,
}

impl Default for DeleteOptions {
    fn default() -> Self {
        Self {
            atomic: true,
            cascade: true,
        }
    }
}

impl DeleteOptions {
    pub fn atomic(mut self, atomic: bool) -> Self {
        self.atomic = atomic;
        self
    }

    pub fn cascade(mut self, cascade: bool) -> Self {
        self.cascade = cascade;
        self
    }
}
