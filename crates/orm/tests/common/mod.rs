#![allow(dead_code)]

use elif_record::{MemoryDatabase, ModelDefinition, Registry, Row};
use serde_json::Value;

pub fn row(pairs: &[(&str, Value)]) -> Row {
    pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
}

/// Library schema shared by the integration tests
///
/// Author 1--* Book *--1 Genre, Book *--* Tag through BookTag,
/// Author 1--1 Profile. Genres and tags cache their book counts.
pub fn library() -> (MemoryDatabase, Registry) {
    let db = MemoryDatabase::new();
    let registry = Registry::new();

    registry.register(
        ModelDefinition::builder("Author", db.repository("authors"))
            .has_many("books", "Book")
            .has_many_with("published_books", "Book", |r| {
                r.conditions(|q| q.where_eq("published", true))
            })
            .has_one("profile", "Profile")
            .rule("name", &["required"])
            .build()
            .unwrap(),
    );
    registry.register(
        ModelDefinition::builder("Profile", db.repository("profiles"))
            .belongs_to("author", "Author")
            .build()
            .unwrap(),
    );
    registry.register(
        ModelDefinition::builder("Genre", db.repository("genres"))
            .has_many("books", "Book")
            .build()
            .unwrap(),
    );
    registry.register(
        ModelDefinition::builder("Tag", db.repository("tags"))
            .belongs_to_many("books", "Book", "BookTag")
            .build()
            .unwrap(),
    );
    registry.register(
        ModelDefinition::builder("BookTag", db.repository("book_tags"))
            .build()
            .unwrap(),
    );
    registry.register(
        ModelDefinition::builder("Book", db.repository("books"))
            .belongs_to("author", "Author")
            .belongs_to("genre", "Genre")
            .belongs_to_many("tags", "Tag", "BookTag")
            .track("genre", "book_count")
            .track("tags", "book_count")
            .build()
            .unwrap(),
    );

    (db, registry)
}
