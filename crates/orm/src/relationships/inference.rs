//! Foreign key inference from model names
//!
//! A model name may be module qualified (`app::models::Genre`,
//! `App\Models\Genre`, `models.Genre`); only the last segment takes part
//! in the derived column name.

use heck::ToSnakeCase;

/// Model name without its module/namespace qualification
pub fn short_name(class: &str) -> &str {
    class
        .rsplit(|c| c == ':' || c == '\\' || c == '.')
        .find(|segment| !segment.is_empty())
        .unwrap_or(class)
}

/// Conventional foreign key column referencing `class`: `BookGenre` -> `book_genre_id`
pub fn foreign_key_for(class: &str) -> String {
    format!("{}_id", short_name(class).to_snake_case())
}

/// Resolve a foreign key slot
///
/// An explicitly configured key is returned unchanged. Otherwise the key is
/// derived from `referenced_class` and written back into the slot, so later
/// calls and downstream queries see the same concrete column.
pub fn detect_foreign_key(slot: &mut Option<String>, referenced_class: &str) -> String {
    slot.get_or_insert_with(|| foreign_key_for(referenced_class))
        .clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_name_strips_qualification() {
        assert_eq!(short_name("Genre"), "Genre");
        assert_eq!(short_name("app::models::Genre"), "Genre");
        assert_eq!(short_name("App\\Models\\BookGenre"), "BookGenre");
        assert_eq!(short_name("models.Topic"), "Topic");
    }

    #[test]
    fn test_foreign_key_for_uses_snake_case() {
        assert_eq!(foreign_key_for("Genre"), "genre_id");
        assert_eq!(foreign_key_for("App\\Models\\BookGenre"), "book_genre_id");
        assert_eq!(foreign_key_for("HTTPRequest"), "http_request_id");
    }

    #[test]
    fn test_detect_foreign_key_persists_inferred_value() {
        let mut slot = None;
        assert_eq!(detect_foreign_key(&mut slot, "Genre"), "genre_id");
        assert_eq!(slot.as_deref(), Some("genre_id"));

        // Stable once written, even for a different referenced class
        assert_eq!(detect_foreign_key(&mut slot, "Topic"), "genre_id");
    }

    #[test]
    fn test_detect_foreign_key_keeps_explicit_value() {
        let mut slot = Some("category".to_string());
        assert_eq!(detect_foreign_key(&mut slot, "Genre"), "category");
        assert_eq!(detect_foreign_key(&mut slot, "Genre"), "category");
        assert_eq!(slot.as_deref(), Some("category"));
    }
}
