//! `${NAME}` placeholder substitution.
//!
//! Every string leaf of a configuration document may reference process
//! environment variables with `${NAME}`. Unset variables keep the literal
//! token so a half-configured environment still loads.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde_json::Value;
use std::collections::HashMap;
use tracing::*;

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\$\{([^}]*)\}").unwrap());

/// Substitutes placeholders using the process environment.
pub fn substitute(value: Value) -> Value {
    substitute_with(value, |name| std::env::var(name).ok())
}

/// Substitutes placeholders using a custom lookup.
pub fn substitute_with(value: Value, lookup: impl FnMut(&str) -> Option<String>) -> Value {
    Substitution::new(lookup).value(value)
}

/// One substitution pass over a document.
///
/// Each name is looked up at most once per pass, so every occurrence of
/// `${NAME}` within a document resolves to the same value.
pub struct Substitution<F> {
    lookup: F,
    resolved: HashMap<String, Option<String>>,
}

impl<F> Substitution<F>
where
    F: FnMut(&str) -> Option<String>,
{
    pub fn new(lookup: F) -> Substitution<F> {
        Substitution {
            lookup,
            resolved: HashMap::new(),
        }
    }

    /// Walks objects and arrays, substituting every string leaf.
    pub fn value(&mut self, value: Value) -> Value {
        match value {
            Value::String(s) => Value::String(self.string(&s)),
            Value::Array(items) => Value::Array(items.into_iter().map(|v| self.value(v)).collect()),
            Value::Object(map) => Value::Object(
                map.into_iter()
                    .map(|(key, v)| (key, self.value(v)))
                    .collect(),
            ),
            other => other,
        }
    }

    pub fn string(&mut self, input: &str) -> String {
        PLACEHOLDER
            .replace_all(input, |caps: &Captures| match self.resolve(&caps[1]) {
                Some(value) => value,
                None => caps[0].to_string(),
            })
            .into_owned()
    }

    fn resolve(&mut self, name: &str) -> Option<String> {
        if let Some(cached) = self.resolved.get(name) {
            return cached.clone();
        }

        let value = (self.lookup)(name);
        if value.is_none() {
            warn!("environment variable \"{name}\" not found, keeping the placeholder");
        }
        self.resolved.insert(name.to_string(), value.clone());
        value
    }
}
