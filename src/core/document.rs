use std::io;

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::error::DatabaseError;

/// Row identity field, assigned once at insert time
pub const ID_FIELD: &str = "_id";
/// Timestamp refreshed on every in-place mutation
pub const UPDATED_AT_FIELD: &str = "_updatedAt";

/// Read access to a row by field path.
///
/// Implemented by plain documents and by the paired views the join
/// processor builds, so one predicate evaluator serves both.
pub trait RowView {
    fn field(&self, path: &str) -> Option<&Value>;
}

/// One row: a JSON object with insertion-ordered keys
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Document(Map<String, Value>);

impl Document {
    #[must_use]
    pub fn new() -> Self {
        Self(Map::new())
    }

    #[must_use]
    pub const fn from_map(map: Map<String, Value>) -> Self {
        Self(map)
    }

    /// Accepts only JSON objects
    pub fn from_value(value: Value) -> Result<Self, DatabaseError> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(DatabaseError::InvalidDocument(format!(
                "expected a JSON object, got {}",
                json_type_name(&other)
            ))),
        }
    }

    #[must_use]
    pub fn id(&self) -> Option<&str> {
        self.0.get(ID_FIELD).and_then(Value::as_str)
    }

    #[must_use]
    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.0
            .get(UPDATED_AT_FIELD)
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|t| t.with_timezone(&Utc))
    }

    /// Assign a fresh 128-bit random `_id` and stamp `_updatedAt`
    pub fn assign_identity(&mut self) -> String {
        let id = Uuid::new_v4().simple().to_string();
        self.0.insert(ID_FIELD.to_string(), Value::String(id.clone()));
        self.touch();
        id
    }

    /// Refresh `_updatedAt`, strictly later than the previous stamp
    pub fn touch(&mut self) {
        let mut now = Utc::now();
        if let Some(previous) = self.updated_at() {
            if now <= previous {
                now = previous + Duration::milliseconds(1);
            }
        }
        self.0.insert(
            UPDATED_AT_FIELD.to_string(),
            Value::String(now.to_rfc3339_opts(SecondsFormat::Millis, true)),
        );
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(key.into(), value)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.shift_remove(key)
    }

    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Fields excluding the `_id` / `_updatedAt` bookkeeping
    pub fn user_fields(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter().filter(|(k, _)| !is_system_field(k))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub const fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    #[must_use]
    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    /// Copy every field of `other` over this document (other wins on collision)
    pub fn merge_from(&mut self, other: &Self) {
        for (k, v) in &other.0 {
            self.0.insert(k.clone(), v.clone());
        }
    }

    /// Serialized size in bytes, as stored inside a partition row
    #[must_use]
    pub fn byte_size(&self) -> usize {
        let mut counter = ByteCounter(0);
        match serde_json::to_writer(&mut counter, &self.0) {
            Ok(()) => counter.0,
            Err(_) => 0,
        }
    }
}

impl RowView for Document {
    /// Exact key first, then a dot-separated path into nested objects
    fn field(&self, path: &str) -> Option<&Value> {
        if let Some(v) = self.0.get(path) {
            return Some(v);
        }
        if !path.contains('.') {
            return None;
        }
        let mut segments = path.split('.');
        let mut current = self.0.get(segments.next()?)?;
        for segment in segments {
            current = current.as_object()?.get(segment)?;
        }
        Some(current)
    }
}

impl From<Map<String, Value>> for Document {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl FromIterator<(String, Value)> for Document {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[must_use]
pub fn is_system_field(key: &str) -> bool {
    key == ID_FIELD || key == UPDATED_AT_FIELD
}

#[must_use]
pub const fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

struct ByteCounter(usize);

impl io::Write for ByteCounter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0 += buf.len();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
