//! Validation boundary for records
//!
//! Records hand their attributes, the model's rule table and any custom
//! messages to a `Validator` and keep the returned field errors.

use std::collections::HashMap;

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::value::Attributes;

/// Field name -> rule names (`"required"`, `"max:255"`, ...)
pub type ValidationRules = IndexMap<String, Vec<String>>;

/// Custom messages keyed `"field.rule"` or `"rule"`; `:field` is substituted
pub type Messages = HashMap<String, String>;

/// Field name -> first failing message
pub type FieldErrors = IndexMap<String, String>;

/// Validation collaborator
pub trait Validator: Send + Sync {
    fn validate(
        &self,
        data: &Attributes,
        rules: &ValidationRules,
        messages: &Messages,
    ) -> Result<(), FieldErrors>;
}

static EMAIL_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^[a-zA-Z0-9]([a-zA-Z0-9._%+-]*[a-zA-Z0-9])?@[a-zA-Z0-9]([a-zA-Z0-9.-]*[a-zA-Z0-9])?\.[a-zA-Z]{2,}$",
    )
    .expect("email pattern is valid")
});

/// Built-in validator for the common rule names
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleValidator;

impl RuleValidator {
    pub fn new() -> Self {
        Self
    }

    fn is_empty(value: &Value) -> bool {
        match value {
            Value::Null => true,
            Value::String(s) => s.trim().is_empty(),
            Value::Array(arr) => arr.is_empty(),
            Value::Object(obj) => obj.is_empty(),
            _ => false,
        }
    }

    fn size(value: &Value) -> Option<f64> {
        match value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => Some(s.chars().count() as f64),
            Value::Array(a) => Some(a.len() as f64),
            _ => None,
        }
    }

    /// Default message for a failed rule, `None` when the rule passes
    fn check(field: &str, rule: &str, value: &Value) -> Option<String> {
        let (name, parameter) = match rule.split_once(':') {
            Some((name, parameter)) => (name.trim(), Some(parameter.trim())),
            None => (rule.trim(), None),
        };

        let failed = match name {
            "required" => Self::is_empty(value),
            "nullable" => false,
            "string" => !value.is_string(),
            "integer" => match value {
                Value::Number(n) => !(n.is_i64() || n.is_u64()),
                Value::String(s) => s.trim().parse::<i64>().is_err(),
                _ => true,
            },
            "numeric" => match value {
                Value::Number(_) => false,
                Value::String(s) => s.trim().parse::<f64>().is_err(),
                _ => true,
            },
            "boolean" => !matches!(value, Value::Bool(_))
                && !matches!(value.as_i64(), Some(0 | 1)),
            "email" => value
                .as_str()
                .map(|s| !EMAIL_PATTERN.is_match(s))
                .unwrap_or(true),
            "min" | "max" => {
                let bound = parameter.and_then(|p| p.parse::<f64>().ok());
                match (bound, Self::size(value)) {
                    (Some(bound), Some(size)) if name == "min" => size < bound,
                    (Some(bound), Some(size)) => size > bound,
                    _ => true,
                }
            }
            "in" => {
                let allowed: Vec<&str> = parameter
                    .map(|p| p.split(',').map(str::trim).collect())
                    .unwrap_or_default();
                let actual = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                !allowed.contains(&actual.as_str())
            }
            _ => return Some(format!("{} has an unknown rule '{}'", field, name)),
        };

        if !failed {
            return None;
        }

        let message = match (name, parameter) {
            ("required", _) => format!("{} is required", field),
            ("min", Some(p)) => format!("{} must be at least {}", field, p),
            ("max", Some(p)) => format!("{} may not be greater than {}", field, p),
            ("in", _) => format!("{} is not an allowed value", field),
            (other, _) => format!("{} must be a valid {}", field, other),
        };
        Some(message)
    }

    fn message_for(messages: &Messages, field: &str, rule: &str, default: String) -> String {
        let name = rule.split(':').next().unwrap_or(rule).trim();
        messages
            .get(&format!("{}.{}", field, name))
            .or_else(|| messages.get(name))
            .map(|m| m.replace(":field", field))
            .unwrap_or(default)
    }
}

impl Validator for RuleValidator {
    fn validate(
        &self,
        data: &Attributes,
        rules: &ValidationRules,
        messages: &Messages,
    ) -> Result<(), FieldErrors> {
        let mut errors = FieldErrors::new();

        for (field, field_rules) in rules {
            let value = data.get(field).unwrap_or(&Value::Null);
            let nullable = field_rules.iter().any(|r| r == "nullable");
            let required = field_rules.iter().any(|r| r == "required");

            // Optional fields are only checked when present
            if value.is_null() && (nullable || !required) {
                continue;
            }

            for rule in field_rules {
                if let Some(default) = Self::check(field, rule, value) {
                    let message = Self::message_for(messages, field, rule, default);
                    errors.insert(field.clone(), message);
                    break;
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
