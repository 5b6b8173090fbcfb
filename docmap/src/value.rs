//! Attribute-level helpers shared by documents, proxies and the nested
//! attributes assigner.

use serde_json::{Map, Value};

/// Schema-less attribute map of a single document.
pub type Attributes = Map<String, Value>;

/// Keys that identify or flag a nested element and are never mass-assigned.
pub const UNASSIGNABLE_KEYS: [&str; 3] = ["id", "_id", "_destroy"];

/// Stored discriminator naming the concrete class of a document.
pub const TYPE_KEY: &str = "_type";

/// Rails-style blankness: null, `false`, whitespace-only strings and empty
/// containers are blank.
pub fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(flag) => !flag,
        Value::String(string) => string.trim().is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        Value::Number(_) => false,
    }
}

/// Boolean-like truthiness accepted for `_destroy`: `true`, `"true"`, `"t"`,
/// `"1"` and the number `1`. Everything else is false.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.to_string() == "1",
        Value::String(string) => matches!(string.trim().to_ascii_lowercase().as_str(), "true" | "t" | "1"),
        _ => false,
    }
}

/// Copy of `attributes` without the keys listed in [`UNASSIGNABLE_KEYS`].
pub fn without_unassignable(attributes: &Attributes) -> Attributes {
    attributes
        .iter()
        .filter(|(key, _)| !UNASSIGNABLE_KEYS.contains(&key.as_str()))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

/// Whether every non-reserved value of `attributes` is blank.
pub fn all_blank(attributes: &Attributes) -> bool {
    attributes
        .iter()
        .all(|(key, value)| key == "_destroy" || is_blank(value))
}

/// Class name inferred from an association name: `retired_players` -> `RetiredPlayer`.
pub fn classify(name: &str) -> String {
    camelize(&singularize(name))
}

/// Collection name inferred from a class name: `RetiredPlayer` -> `retired_players`.
pub fn tableize(class_name: &str) -> String {
    pluralize(&underscore(class_name))
}

/// Default foreign key pointing at `class_name`: `Team` -> `team_id`.
pub fn foreign_key_for(class_name: &str) -> String {
    format!("{}_id", underscore(class_name))
}

pub fn underscore(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for (index, ch) in name.chars().enumerate() {
        if ch.is_ascii_uppercase() {
            if index > 0 && !out.ends_with('_') {
                out.push('_');
            }
            out.push(ch.to_ascii_lowercase());
        } else if ch == ':' {
            if !out.ends_with('_') {
                out.push('_');
            }
        } else {
            out.push(ch);
        }
    }
    out
}

fn camelize(name: &str) -> String {
    name.split('_')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect()
}

fn singularize(word: &str) -> String {
    if let Some(stem) = word.strip_suffix("ies") {
        return format!("{stem}y");
    }
    for suffix in ["sses", "shes", "ches", "xes"] {
        if word.ends_with(suffix) {
            return word[..word.len() - 2].to_string();
        }
    }
    if word.ends_with("ss") || word.ends_with("us") {
        return word.to_string();
    }
    word.strip_suffix('s').unwrap_or(word).to_string()
}

fn pluralize(word: &str) -> String {
    if let Some(stem) = word.strip_suffix('y')
        && !stem.ends_with(['a', 'e', 'i', 'o', 'u'])
    {
        return format!("{stem}ies");
    }
    if word.ends_with('s') || word.ends_with('x') || word.ends_with("ch") || word.ends_with("sh") {
        return format!("{word}es");
    }
    format!("{word}s")
}
