//! Record lifecycle stages
//!
//! Saves run `saving -> (owner write) -> saved -> (linked records) ->
//! relations_saved`; deletes run `deleting -> (delete) -> deleted`. Returning
//! an error from `saving` or `deleting` aborts the operation before any write.

use crate::event_error::EventError;
use crate::model::Record;

/// Stage of the record lifecycle, used for logging and diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleStage {
    Saving,
    Saved,
    RelationsSaved,
    Deleting,
    Deleted,
}

impl LifecycleStage {
    pub fn as_str(self) -> &'static str {
        match self {
            LifecycleStage::Saving => "saving",
            LifecycleStage::Saved => "saved",
            LifecycleStage::RelationsSaved => "relations_saved",
            LifecycleStage::Deleting => "deleting",
            LifecycleStage::Deleted => "deleted",
        }
    }
}

pub trait RecordObserver: Send + Sync {
    fn saving(&self, _record: &mut Record) -> Result<(), EventError> {
        Ok(())
    }

    fn saved(&self, _record: &Record) -> Result<(), EventError> {
        Ok(())
    }

    fn relations_saved(&self, _record: &Record) -> Result<(), EventError> {
        Ok(())
    }

    fn deleting(&self, _record: &Record) -> Result<(), EventError> {
        Ok(())
    }

    fn deleted(&self, _record: &Record) -> Result<(), EventError> {
        Ok(())
    }
}
