mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use common::{library, row};
use elif_record::{
    DeleteOptions, EventError, MemoryDatabase, ModelConfig, ModelDefinition, OrmError, Record,
    RecordObserver, Registry, SaveOptions,
};
use serde_json::{json, Value};

#[test]
fn to_array_round_trips_through_a_forced_save() {
    let (source, registry) = library();
    source.seed(
        "books",
        vec![row(&[
            ("id", json!(7)),
            ("title", json!("Earthsea")),
            ("genre_id", json!(2)),
            ("published", json!(true)),
        ])],
    );
    let book = registry.find_or_fail("Book", 7).unwrap();

    let (target, copies) = library();
    let mut copy = copies.make_with("Book", book.to_array()).unwrap();
    assert!(copy.save(SaveOptions::default().force(true)).unwrap());

    assert_eq!(target.find("books", &json!(7)), source.find("books", &json!(7)));
}

#[test]
fn saves_write_only_dirty_columns() {
    let (db, registry) = library();
    db.seed("books", vec![row(&[("title", json!("Earthsea")), ("isbn", json!("1"))])]);
    let mut book = registry.find_or_fail("Book", 1).unwrap();

    // Someone else changes another column in the meantime
    let mut other = registry.find_or_fail("Book", 1).unwrap();
    other.set("isbn", "2");
    assert!(other.save(SaveOptions::default()).unwrap());

    book.set("title", "Earthsea");
    assert!(!book.changed());
    book.set("title", "The Farthest Shore");
    assert_eq!(book.dirty(), row(&[("title", json!("The Farthest Shore"))]));
    assert!(book.save(SaveOptions::default()).unwrap());

    let stored = db.find("books", &json!(1)).unwrap();
    assert_eq!(stored["title"], json!("The Farthest Shore"));
    assert_eq!(stored["isbn"], json!("2"));
    assert!(book.dirty().is_empty());
}

#[test]
fn mass_assignment_from_configuration() {
    let config: ModelConfig = serde_yaml::from_str(
        r#"
fillable: [name, email, role]
guarded: [role]
rules:
  email: [required, email]
messages:
  email.email: "Email looks wrong"
timestamps: true
"#,
    )
    .unwrap();

    let db = MemoryDatabase::new();
    let registry = Registry::new();
    registry.register(
        ModelDefinition::builder("Member", db.repository("members"))
            .configure(config)
            .build()
            .unwrap(),
    );

    let mut member = registry
        .make_with(
            "Member",
            row(&[
                ("name", json!("Ged")),
                ("email", json!("not-an-email")),
                ("role", json!("admin")),
                ("token", json!("x")),
            ]),
        )
        .unwrap();
    assert_eq!(
        member.attributes(),
        &row(&[("name", json!("Ged")), ("email", json!("not-an-email"))])
    );

    assert!(!member.save(SaveOptions::default()).unwrap());
    assert_eq!(member.errors()["email"], "Email looks wrong");

    member.set("email", "ged@roke.example");
    assert!(member.save(SaveOptions::default()).unwrap());
    let stored = db.find("members", &json!(1)).unwrap();
    assert!(stored.contains_key("created_at"));
    assert!(!stored.contains_key("role"));
}

#[test]
fn timestamps_keep_creation_time() {
    let db = MemoryDatabase::new();
    let registry = Registry::new();
    registry.register(
        ModelDefinition::builder("Note", db.repository("notes"))
            .timestamps(true)
            .build()
            .unwrap(),
    );

    let mut note = registry.make_with("Note", row(&[("body", json!("a"))])).unwrap();
    assert!(note.save(SaveOptions::default()).unwrap());
    let created = note.attributes()["created_at"].clone();
    assert_eq!(note.attributes()["updated_at"], created);

    note.set("body", "b");
    assert!(note.save(SaveOptions::default()).unwrap());
    assert_eq!(db.find("notes", &json!(1)).unwrap()["created_at"], created);
}

#[test]
fn failing_child_write_rolls_back_the_owner() {
    let (db, registry) = library();
    db.fail_writes("books");

    let mut author = registry
        .make_with(
            "Author",
            row(&[("name", json!("Le Guin")), ("books", json!([{ "title": "Earthsea" }]))]),
        )
        .unwrap();
    assert!(!author.save(SaveOptions::default()).unwrap());

    assert!(matches!(
        author.last_error(),
        Some(OrmError::RelationQueryFailure { alias, .. }) if alias == "books"
    ));
    assert!(!author.exists());
    assert!(author.id().is_none());
    assert!(db.rows("authors").is_empty());
    assert!(db.rows("books").is_empty());
    assert_eq!(db.transaction_depth(), 0);
}

/// Rejects the first save of a book with the given title
struct RejectOnce {
    title: &'static str,
    tripped: AtomicBool,
}

impl RecordObserver for RejectOnce {
    fn saving(&self, record: &mut Record) -> Result<(), EventError> {
        let matches = record.attributes().get("title") == Some(&json!(self.title));
        if matches && !self.tripped.swap(true, Ordering::SeqCst) {
            return Err(EventError::observer("search index unavailable"));
        }
        Ok(())
    }
}

#[test]
fn retry_after_rollback_writes_linked_records_in_full() {
    let db = MemoryDatabase::new();
    let registry = Registry::new();
    registry.register(
        ModelDefinition::builder("Author", db.repository("authors"))
            .has_many("books", "Book")
            .build()
            .unwrap(),
    );
    registry.register(
        ModelDefinition::builder("Book", db.repository("books"))
            .belongs_to("author", "Author")
            .observer(RejectOnce {
                title: "Tehanu",
                tripped: AtomicBool::new(false),
            })
            .build()
            .unwrap(),
    );

    let mut author = registry
        .make_with(
            "Author",
            row(&[
                ("name", json!("Le Guin")),
                ("books", json!([{ "title": "Earthsea" }, { "title": "Tehanu" }])),
            ]),
        )
        .unwrap();
    assert!(!author.save(SaveOptions::default()).unwrap());
    assert!(db.rows("books").is_empty());

    let links = author.relation("books").unwrap().links();
    assert_eq!(links.len(), 2);
    assert!(links.iter().all(|book| !book.exists() && book.id().is_none()));
    assert!(links.iter().all(|book| !book.attributes().contains_key("author_id")));

    assert!(author.save(SaveOptions::default()).unwrap());
    let books = db.rows("books");
    let titles: Vec<Value> = books.iter().map(|book| book["title"].clone()).collect();
    assert_eq!(titles, vec![json!("Earthsea"), json!("Tehanu")]);
    assert!(books
        .iter()
        .all(|book| book["author_id"] == author.attributes()["id"]));
}

#[test]
fn non_atomic_save_keeps_partial_writes() {
    let (db, registry) = library();
    db.fail_writes("books");

    let mut author = registry
        .make_with(
            "Author",
            row(&[("name", json!("Le Guin")), ("books", json!([{ "title": "Earthsea" }]))]),
        )
        .unwrap();
    assert!(!author.save(SaveOptions::default().atomic(false)).unwrap());
    assert_eq!(db.rows("authors").len(), 1);
    assert_eq!(db.transaction_depth(), 0);
}

#[test]
fn refresh_reloads_or_reports_missing_rows() {
    let (db, registry) = library();
    db.seed("authors", vec![row(&[("name", json!("Le Guin"))])]);
    let mut author = registry.find_or_fail("Author", 1).unwrap();

    let mut other = registry.find_or_fail("Author", 1).unwrap();
    other.set("name", "Ursula K. Le Guin");
    other.save(SaveOptions::default()).unwrap();

    author.set("name", "stale");
    assert!(author.refresh().unwrap());
    assert_eq!(author.attributes()["name"], json!("Ursula K. Le Guin"));
    assert!(!author.changed());

    other.delete(DeleteOptions::default()).unwrap();
    assert!(!author.refresh().unwrap());
    assert!(!author.exists());

    let mut blank = registry.make("Author").unwrap();
    assert!(matches!(blank.refresh(), Err(OrmError::MissingPrimaryKey { .. })));
}

#[test]
fn get_reads_relations_without_dirtying() {
    let (db, registry) = library();
    db.seed("genres", vec![row(&[("name", json!("Fantasy"))])]);
    db.seed("books", vec![row(&[("genre_id", json!(1))])]);

    let mut book = registry.find_or_fail("Book", 1).unwrap();
    assert_eq!(book.get("genre").unwrap()["name"], json!("Fantasy"));
    assert_eq!(book.get("tags").unwrap(), json!([]));
    assert!(!book.changed());

    // Rendered results are not mistaken for new relation data
    assert!(book.save(SaveOptions::default()).unwrap());
    assert_eq!(db.rows("genres").len(), 1);
}

#[derive(Default)]
struct Archive {
    events: Mutex<Vec<String>>,
}

struct Guard(Arc<Archive>);

impl RecordObserver for Guard {
    fn saved(&self, record: &Record) -> Result<(), EventError> {
        if let Ok(mut events) = self.0.events.lock() {
            events.push(format!("saved {}", record.class()));
        }
        Ok(())
    }

    fn deleting(&self, record: &Record) -> Result<(), EventError> {
        if record.attributes().get("locked") == Some(&json!(true)) {
            return Err(EventError::validation_with_hint("locked", "unlock it first"));
        }
        Ok(())
    }

    fn deleted(&self, record: &Record) -> Result<(), EventError> {
        if let Ok(mut events) = self.0.events.lock() {
            events.push(format!("deleted {}", record.class()));
        }
        Ok(())
    }
}

#[test]
fn observers_can_veto_deletes() {
    let db = MemoryDatabase::new();
    let archive = Arc::new(Archive::default());
    let registry = Registry::new();
    registry.register(
        ModelDefinition::builder("Page", db.repository("pages"))
            .observer(Guard(Arc::clone(&archive)))
            .build()
            .unwrap(),
    );

    let mut page = registry.make_with("Page", row(&[("locked", json!(true))])).unwrap();
    assert!(page.save(SaveOptions::default()).unwrap());

    assert_eq!(page.delete(DeleteOptions::default()).unwrap(), 0);
    assert!(matches!(page.last_error(), Some(OrmError::Event(EventError::Validation { .. }))));
    assert_eq!(db.rows("pages").len(), 1);

    page.set("locked", false);
    assert!(page.save(SaveOptions::default()).unwrap());
    assert_eq!(page.delete(DeleteOptions::default()).unwrap(), 1);

    let events = archive.events.lock().unwrap().clone();
    assert_eq!(events, vec!["saved Page", "saved Page", "deleted Page"]);
}
