//! Transaction Management
//!
//! Scoped transactions over a repository: the operation's writes commit
//! together or roll back together.

use tracing::{debug, warn};

use crate::error::{OrmError, OrmResult};
use crate::repository::Repository;

/// Run `op` inside a transaction on `repository`
///
/// Commits when `op` returns `Ok`, rolls back and returns the original
/// error otherwise. A failed rollback is logged; the operation's error wins.
pub fn transaction<T, F>(repository: &dyn Repository, op: F) -> OrmResult<T>
where
    F: FnOnce() -> OrmResult<T>,
{
    debug!(table = repository.table(), "Beginning transaction");
    repository.begin()?;

    match op() {
        Ok(value) => {
            if let Err(err) = repository.commit() {
                warn!(table = repository.table(), error = %err, "Commit failed, rolling back");
                if let Err(rollback_err) = repository.rollback() {
                    warn!(error = %rollback_err, "Rollback after failed commit also failed");
                }
                return Err(OrmError::from(err));
            }
            debug!(table = repository.table(), "Transaction committed");
            Ok(value)
        }
        Err(err) => {
            debug!(table = repository.table(), error = %err, "Rolling back transaction");
            if let Err(rollback_err) = repository.rollback() {
                warn!(
                    table = repository.table(),
                    error = %rollback_err,
                    "Rollback failed"
                );
            }
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::MemoryDatabase;
    use crate::value::Row;
    use serde_json::json;

    fn title_row(title: &str) -> Row {
        let mut row = Row::new();
        row.insert("title".to_string(), json!(title));
        row
    }

    #[test]
    fn test_transaction_commits_on_success() {
        let db = MemoryDatabase::new();
        let books = db.repository("books");

        let id = transaction(&books, || Ok(books.upsert(&title_row("Dune"), None)?)).unwrap();

        assert_eq!(id, json!(1));
        assert_eq!(db.rows("books").len(), 1);
        assert_eq!(db.transaction_depth(), 0);
    }

    #[test]
    fn test_transaction_rolls_back_on_error() {
        let db = MemoryDatabase::new();
        let books = db.repository("books");

        let result: OrmResult<()> = transaction(&books, || {
            books.upsert(&title_row("Dune"), None)?;
            Err(OrmError::Configuration("boom".to_string()))
        });

        assert!(matches!(result, Err(OrmError::Configuration(_))));
        assert!(db.rows("books").is_empty());
        assert_eq!(db.transaction_depth(), 0);
    }

    #[test]
    fn test_nested_transaction_rolls_back_inner_only() {
        let db = MemoryDatabase::new();
        let books = db.repository("books");

        transaction(&books, || {
            books.upsert(&title_row("Dune"), None)?;
            let inner: OrmResult<()> = transaction(&books, || {
                books.upsert(&title_row("Emma"), None)?;
                Err(OrmError::Configuration("inner".to_string()))
            });
            assert!(inner.is_err());
            Ok(())
        })
        .unwrap();

        let titles: Vec<_> = db.rows("books").iter().map(|r| r["title"].clone()).collect();
        assert_eq!(titles, vec![json!("Dune")]);
    }
}
