use std::sync::Arc;

use tracing::debug;

use crate::event_error::EventError;
use crate::events::{LifecycleStage, RecordObserver};
use crate::model::Record;

/// Observers of one model, triggered in registration order
#[derive(Clone, Default)]
pub struct ObserverRegistry {
    observers: Vec<Arc<dyn RecordObserver>>,
}

impl std::fmt::Debug for ObserverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverRegistry")
            .field("observer_count", &self.observers.len())
            .finish()
    }
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, observer: Arc<dyn RecordObserver>) {
        self.observers.push(observer);
    }

    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    /// Stops at the first observer that fails
    fn run<F>(&self, stage: LifecycleStage, record: &str, mut notify: F) -> Result<(), EventError>
    where
        F: FnMut(&dyn RecordObserver) -> Result<(), EventError>,
    {
        for (index, observer) in self.observers.iter().enumerate() {
            if let Err(err) = notify(observer.as_ref()) {
                debug!(
                    model = record,
                    stage = stage.as_str(),
                    observer = index,
                    error = %err,
                    "Observer stopped the lifecycle"
                );
                return Err(err);
            }
        }
        Ok(())
    }

    pub fn trigger_saving(&self, record: &mut Record) -> Result<(), EventError> {
        let model = record.class().to_string();
        self.run(LifecycleStage::Saving, &model, |o| o.saving(record))
    }

    pub fn trigger_saved(&self, record: &Record) -> Result<(), EventError> {
        self.run(LifecycleStage::Saved, record.class(), |o| o.saved(record))
    }

    pub fn trigger_relations_saved(&self, record: &Record) -> Result<(), EventError> {
        self.run(LifecycleStage::RelationsSaved, record.class(), |o| {
            o.relations_saved(record)
        })
    }

    pub fn trigger_deleting(&self, record: &Record) -> Result<(), EventError> {
        self.run(LifecycleStage::Deleting, record.class(), |o| o.deleting(record))
    }

    pub fn trigger_deleted(&self, record: &Record) -> Result<(), EventError> {
        self.run(LifecycleStage::Deleted, record.class(), |o| o.deleted(record))
    }
}
