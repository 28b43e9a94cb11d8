//! Runtime values exchanged with the script host
//!
//! Keyword bodies produce [`Value`]s; the dispatcher assembles them into a
//! [`Record`] whose field order is the order in which keys were first seen.
//! Field lookups are ASCII case-insensitive.

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Ordered field map used for map bodies and record fields
pub type FieldMap = IndexMap<String, Value>;

/// Named arguments passed to the script host
pub type NamedArgs = IndexMap<String, Value>;

// =============================================================================
// SCRIPT BLOCK
// =============================================================================

/// Opaque executable body; only the script host knows how to run it
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScriptBlock {
    source: String,
}

impl ScriptBlock {
    pub fn new(source: impl AsRef<str>) -> Self {
        Self {
            source: source.as_ref().to_string(),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }
}

impl fmt::Display for ScriptBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{ {} }}", self.source)
    }
}

// =============================================================================
// VALUE
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<Value>),
    Map(FieldMap),
    Record(Record),
    Script(ScriptBlock),
}

impl Value {
    /// Type tag used when an item carries no explicit `Name` field
    pub fn type_name(&self) -> &str {
        match self {
            Value::Null => "Null",
            Value::Bool(_) => "Bool",
            Value::Int(_) => "Int",
            Value::Float(_) => "Float",
            Value::String(_) => "String",
            Value::List(_) => "List",
            Value::Map(_) => "Map",
            Value::Record(record) => record.type_name().unwrap_or("Record"),
            Value::Script(_) => "ScriptBlock",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_record(&self) -> Option<&Record> {
        match self {
            Value::Record(r) => Some(r),
            _ => None,
        }
    }

    /// Field lookup on maps and records (case-insensitive)
    pub fn field(&self, name: &str) -> Option<&Value> {
        match self {
            Value::Map(fields) => find_field(fields, name),
            Value::Record(record) => record.get(name),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::String(s) => write!(f, "{}", s),
            Value::List(items) => {
                let parts: Vec<String> = items.iter().map(|v| v.to_string()).collect();
                write!(f, "[{}]", parts.join(", "))
            }
            Value::Map(fields) => write_fields(f, fields),
            Value::Record(record) => write_fields(f, &record.fields),
            Value::Script(block) => write!(f, "{}", block),
        }
    }
}

fn write_fields(f: &mut fmt::Formatter<'_>, fields: &FieldMap) -> fmt::Result {
    let parts: Vec<String> = fields.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
    write!(f, "@{{{}}}", parts.join("; "))
}

fn find_field<'a>(fields: &'a FieldMap, name: &str) -> Option<&'a Value> {
    fields
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v)
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<Record> for Value {
    fn from(r: Record) -> Self {
        Value::Record(r)
    }
}

impl From<ScriptBlock> for Value {
    fn from(s: ScriptBlock) -> Self {
        Value::Script(s)
    }
}

// =============================================================================
// RECORD
// =============================================================================

/// Structured result of one keyword invocation
///
/// `type_names` is most-specific first; the dispatcher inserts the keyword's
/// category label at position 0.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Record {
    pub type_names: Vec<String>,
    pub fields: FieldMap,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_type(type_name: impl Into<String>) -> Self {
        Self {
            type_names: vec![type_name.into()],
            fields: FieldMap::new(),
        }
    }

    /// Builder-style field insertion
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value.into());
        self
    }

    pub fn type_name(&self) -> Option<&str> {
        self.type_names.first().map(|s| s.as_str())
    }

    /// Insert a field. An existing key (compared case-insensitively) keeps its
    /// position and original spelling; only the value is replaced.
    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        let key = key.into();
        match self
            .fields
            .keys()
            .position(|k| k.eq_ignore_ascii_case(&key))
        {
            Some(index) => {
                if let Some((_, slot)) = self.fields.get_index_mut(index) {
                    *slot = value;
                }
            }
            None => {
                self.fields.insert(key, value);
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        find_field(&self.fields, key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(|k| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_insert_preserves_first_position() {
        let mut record = Record::new();
        record.insert("a", Value::Int(1));
        record.insert("b", Value::Int(2));
        record.insert("A", Value::Int(3));

        assert_eq!(record.keys().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(record.get("a"), Some(&Value::Int(3)));
    }

    #[test]
    fn test_field_lookup_is_case_insensitive() {
        let record = Record::with_type("Thing").with_field("Name", "x");
        let value = Value::Record(record);
        assert_eq!(value.field("name"), Some(&Value::from("x")));
        assert_eq!(value.type_name(), "Thing");
    }

    #[test]
    fn test_type_names() {
        assert_eq!(Value::Int(3).type_name(), "Int");
        assert_eq!(Value::Record(Record::new()).type_name(), "Record");
        assert_eq!(Value::Script(ScriptBlock::new("x")).type_name(), "ScriptBlock");
    }

    #[test]
    fn test_json_keeps_field_order() {
        let record = Record::with_type("Stage")
            .with_field("Name", "build")
            .with_field("Retries", 3i64);
        let json = serde_json::to_string(&Value::Record(record)).unwrap();
        assert_eq!(
            json,
            r#"{"type_names":["Stage"],"fields":{"Name":"build","Retries":3}}"#
        );
    }

    #[test]
    fn test_display() {
        let record = Record::new().with_field("Name", "build").with_field("Retries", 3i64);
        assert_eq!(Value::Record(record).to_string(), "@{Name=build; Retries=3}");
    }
}
