//! Document ids: where they live in an attribute map, how loose id values
//! are read, and how missing ones are filled in.

use nanoid::nanoid;
use serde_json::Value;

use crate::value::{Attributes, is_blank};

/// Stored id field of every document.
pub const ID_KEY: &str = "_id";

/// Alias accepted on input and moved to [`ID_KEY`].
pub const ID_ALIAS: &str = "id";

const ID_ALPHABET: &[char] = &[
    'A', 'B', 'C', 'D', 'E', 'F', 'G', 'H', 'J', 'K', 'L', 'M', 'N', 'P', 'Q', 'R', 'S', 'T', 'U', 'V', 'W', 'X', 'Y',
    'Z', 'a', 'b', 'c', 'd', 'e', 'f', 'g', 'h', 'j', 'm', 'n', 'p', 'q', 'r', 's', 't', 'u', 'v', 'w', 'x', 'y', 'z',
];
const ID_LENGTH: usize = 20;

/// Ids are assigned client-side when a document is built, so embedded and
/// referenced documents both carry one before their first save.
pub fn generate_document_id() -> String {
    nanoid!(ID_LENGTH, ID_ALPHABET)
}

/// String form of an id value: strings as-is, numbers in decimal and
/// `{"$oid": ..}` wrappers unwrapped. Blank values have no id.
pub fn id_string(value: &Value) -> Option<String> {
    if is_blank(value) {
        return None;
    }
    match value {
        Value::String(string) => Some(string.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Object(map) => map.get("$oid").and_then(id_string),
        _ => None,
    }
}

/// Reads the identifying id from `_id`, falling back to `id`.
pub fn id_from_attributes(attributes: &Attributes) -> Option<String> {
    attributes
        .get(ID_KEY)
        .and_then(id_string)
        .or_else(|| attributes.get(ID_ALIAS).and_then(id_string))
}

/// Returns the document's id, generating and storing one when it has none.
pub fn ensure_id(attributes: &mut Attributes) -> String {
    if let Some(id) = id_from_attributes(attributes) {
        return id;
    }
    let id = generate_document_id();
    attributes.insert(ID_KEY.to_string(), Value::String(id.clone()));
    id
}

/// Moves an `id` alias to `_id` unless `_id` is already present.
pub(crate) fn normalize_stored_id(raw: &mut Attributes) {
    if !raw.contains_key(ID_KEY)
        && let Some(id) = raw.remove(ID_ALIAS)
    {
        raw.insert(ID_KEY.to_string(), id);
    }
}
