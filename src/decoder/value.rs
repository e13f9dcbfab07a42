use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::markers::{AttributeKind, Slot};

/// `{code, name, value}` as the registry encodes custom attributes. The same
/// shape is reused for the elements nested inside TEP pairs and groups.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttributeEntry {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub value: Value,
}

impl AttributeEntry {
    pub fn slot(&self) -> Option<Slot> {
        Slot::of(&self.code, &self.name)
    }
}

pub type Pair = Vec<AttributeEntry>;

/// A value carried into the output exactly as the registry sent it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Verbatim(pub Value);

impl Eq for Verbatim {}

impl Hash for Verbatim {
    fn hash<H: Hasher>(&self, state: &mut H) {
        hash_value(&self.0, state);
    }
}

impl From<Value> for Verbatim {
    fn from(v: Value) -> Self {
        Verbatim(v)
    }
}

// Must agree with `Value`'s equality: numbers compare by value, objects
// regardless of key order.
fn hash_value<H: Hasher>(v: &Value, state: &mut H) {
    std::mem::discriminant(v).hash(state);
    match v {
        Value::Null => {}
        Value::Bool(b) => b.hash(state),
        Value::Number(n) => {
            let f = n.as_f64().unwrap_or_default();
            let f = if f == 0.0 { 0.0 } else { f };
            f.to_bits().hash(state);
        }
        Value::String(s) => s.hash(state),
        Value::Array(items) => {
            items.len().hash(state);
            for item in items {
                hash_value(item, state);
            }
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            keys.len().hash(state);
            for key in keys {
                key.hash(state);
                hash_value(&map[key.as_str()], state);
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GroupMember {
    Name(String),
    Teps(Vec<Pair>),
}

/// An attribute value after its JSON-in-JSON encoding has been unpacked.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    Scalar(Value),
    PairList(Vec<Pair>),
    GroupList(Vec<Vec<GroupMember>>),
}

impl AttributeValue {
    pub fn resolve(kind: Option<AttributeKind>, raw: &Value) -> Self {
        match kind {
            None => AttributeValue::Scalar(raw.clone()),
            Some(AttributeKind::Teps(_)) => AttributeValue::PairList(parse_pairs(raw)),
            Some(AttributeKind::TepGroups(_)) => AttributeValue::GroupList(parse_groups(raw)),
        }
    }
}

/// Text form of a JSON scalar, for display names and links: strings as-is,
/// null as empty, anything else as JSON.
pub fn scalar_text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Unpack a value that is either a JSON array or a string holding one.
pub fn unpack_list(raw: &Value) -> Vec<Value> {
    match raw {
        Value::Array(items) => items.clone(),
        Value::String(s) if s.trim().is_empty() => Vec::new(),
        Value::String(s) => match serde_json::from_str::<Value>(s) {
            Ok(Value::Array(items)) => items,
            Ok(_) => {
                debug!("Encoded attribute is not a list, treating as empty");
                Vec::new()
            }
            Err(e) => {
                debug!("Unparsable encoded attribute ({}), treating as empty", e);
                Vec::new()
            }
        },
        _ => Vec::new(),
    }
}

fn parse_entry(item: Value) -> Option<AttributeEntry> {
    match item {
        Value::Object(_) => serde_json::from_value(item).ok(),
        _ => None,
    }
}

/// A pair is only meaningful whole, so one bad element drops it.
fn parse_entries(items: Vec<Value>) -> Option<Vec<AttributeEntry>> {
    items.into_iter().map(parse_entry).collect()
}

/// Pairs whose elements are not all entry objects are dropped here; length
/// is checked by the decoder.
pub fn parse_pairs(raw: &Value) -> Vec<Pair> {
    unpack_list(raw)
        .into_iter()
        .filter_map(|pair| match pair {
            Value::Array(items) => parse_entries(items),
            _ => None,
        })
        .collect()
}

fn parse_groups(raw: &Value) -> Vec<Vec<GroupMember>> {
    unpack_list(raw)
        .into_iter()
        .filter_map(|group| match group {
            Value::Array(items) => Some(items),
            _ => None,
        })
        .map(|items| {
            items
                .into_iter()
                .filter_map(|item| {
                    let entry = parse_entry(item);
                    if entry.is_none() {
                        debug!("Dropping malformed TEP group member");
                    }
                    entry
                })
                .map(|entry| match entry.slot() {
                    Some(Slot::GroupName) => GroupMember::Name(scalar_text(&entry.value)),
                    _ => GroupMember::Teps(parse_pairs(&entry.value)),
                })
                .collect()
        })
        .collect()
}
