// 🧱 Values - Field values and record projections
//
// A tracked record is handled as a map of field name -> FieldValue. Typed
// application structs convert through the `Trackable` trait.

use crate::error::{HistoryError, Result};
use crate::schema::{FieldKind, Storage};
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use rusqlite::types::{FromSqlError, ToSql, ToSqlOutput, Value, ValueRef};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ============================================================================
// FIELD VALUE
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Boolean(bool),
    Timestamp(DateTime<Utc>),
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Real(r) => Some(*r),
            FieldValue::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FieldValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            FieldValue::Timestamp(t) => Some(*t),
            _ => None,
        }
    }

    /// Short name of the variant, used in type-mismatch errors
    pub fn type_name(&self) -> &'static str {
        match self {
            FieldValue::Null => "null",
            FieldValue::Integer(_) => "integer",
            FieldValue::Real(_) => "real",
            FieldValue::Text(_) => "text",
            FieldValue::Boolean(_) => "boolean",
            FieldValue::Timestamp(_) => "timestamp",
        }
    }

    /// Parse a textual value (CLI arguments, config) into the storage class of `kind`
    pub fn parse_as(kind: &FieldKind, raw: &str) -> Result<FieldValue> {
        let mismatch = |expected: &'static str| HistoryError::TypeMismatch {
            field: raw.to_string(),
            expected,
            found: "text".to_string(),
        };

        match kind.storage() {
            Storage::Integer => raw
                .parse()
                .map(FieldValue::Integer)
                .map_err(|_| mismatch("integer")),
            Storage::Real => raw
                .parse()
                .map(FieldValue::Real)
                .map_err(|_| mismatch("real")),
            Storage::Boolean => match raw {
                "1" | "true" => Ok(FieldValue::Boolean(true)),
                "0" | "false" => Ok(FieldValue::Boolean(false)),
                _ => Err(mismatch("boolean")),
            },
            Storage::Timestamp => DateTime::parse_from_rfc3339(raw)
                .map(|dt| FieldValue::Timestamp(dt.with_timezone(&Utc)))
                .map_err(|_| mismatch("timestamp")),
            Storage::Text => Ok(FieldValue::Text(raw.to_string())),
        }
    }

    /// Convert to the form `kind` is stored and read back in
    ///
    /// Integers widen into real fields, 0/1 integers narrow into booleans and
    /// timestamps lose everything below microseconds. Anything else that does
    /// not match the storage class is a `TypeMismatch` for `field`.
    pub fn coerce(self, field: &str, kind: &FieldKind) -> Result<FieldValue> {
        let storage = kind.storage();
        let coerced = match (storage, self) {
            (_, FieldValue::Null) => FieldValue::Null,
            (Storage::Integer, FieldValue::Integer(i)) => FieldValue::Integer(i),
            (Storage::Real, FieldValue::Real(r)) => FieldValue::Real(r),
            (Storage::Real, FieldValue::Integer(i)) => FieldValue::Real(i as f64),
            (Storage::Text, FieldValue::Text(s)) => FieldValue::Text(s),
            (Storage::Boolean, FieldValue::Boolean(b)) => FieldValue::Boolean(b),
            (Storage::Boolean, FieldValue::Integer(i @ (0 | 1))) => FieldValue::Boolean(i == 1),
            (Storage::Timestamp, FieldValue::Timestamp(t)) => FieldValue::Timestamp(t.trunc_subsecs(6)),
            (storage, other) => {
                return Err(HistoryError::TypeMismatch {
                    field: field.to_string(),
                    expected: storage.name(),
                    found: other.type_name().to_string(),
                })
            }
        };
        Ok(coerced)
    }

    /// Plain JSON rendering (no enum tags) for display and export
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            FieldValue::Null => serde_json::Value::Null,
            FieldValue::Integer(i) => serde_json::json!(i),
            FieldValue::Real(r) => serde_json::json!(r),
            FieldValue::Text(s) => serde_json::json!(s),
            FieldValue::Boolean(b) => serde_json::json!(b),
            FieldValue::Timestamp(t) => serde_json::json!(format_timestamp(t)),
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Null => write!(f, "null"),
            FieldValue::Integer(i) => write!(f, "{}", i),
            FieldValue::Real(r) => write!(f, "{}", r),
            FieldValue::Text(s) => write!(f, "{}", s),
            FieldValue::Boolean(b) => write!(f, "{}", b),
            FieldValue::Timestamp(t) => write!(f, "{}", format_timestamp(t)),
        }
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Integer(value)
    }
}

impl From<i32> for FieldValue {
    fn from(value: i32) -> Self {
        FieldValue::Integer(i64::from(value))
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Real(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Boolean(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl From<DateTime<Utc>> for FieldValue {
    fn from(value: DateTime<Utc>) -> Self {
        FieldValue::Timestamp(value)
    }
}

impl<T: Into<FieldValue>> From<Option<T>> for FieldValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(FieldValue::Null, Into::into)
    }
}

impl From<&FieldValue> for Value {
    fn from(value: &FieldValue) -> Self {
        match value {
            FieldValue::Null => Value::Null,
            FieldValue::Integer(i) => Value::Integer(*i),
            FieldValue::Real(r) => Value::Real(*r),
            FieldValue::Text(s) => Value::Text(s.clone()),
            FieldValue::Boolean(b) => Value::Integer(i64::from(*b)),
            FieldValue::Timestamp(t) => Value::Text(format_timestamp(t)),
        }
    }
}

impl ToSql for FieldValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            FieldValue::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            other => ToSqlOutput::Owned(Value::from(other)),
        })
    }
}

/// Fixed-width RFC 3339 (microseconds, `Z` suffix): string order == time order
pub fn format_timestamp(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Decode one column of a history row according to the field's kind
pub(crate) fn decode_column(
    kind: &FieldKind,
    idx: usize,
    value: ValueRef<'_>,
) -> rusqlite::Result<FieldValue> {
    if let ValueRef::Null = value {
        return Ok(FieldValue::Null);
    }

    let conversion = |e: FromSqlError| {
        rusqlite::Error::FromSqlConversionFailure(idx, value.data_type(), Box::new(e))
    };

    let decoded = match kind.storage() {
        Storage::Integer => FieldValue::Integer(value.as_i64().map_err(conversion)?),
        Storage::Real => match value {
            ValueRef::Integer(i) => FieldValue::Real(i as f64),
            other => FieldValue::Real(other.as_f64().map_err(conversion)?),
        },
        Storage::Boolean => FieldValue::Boolean(value.as_i64().map_err(conversion)? != 0),
        Storage::Text => FieldValue::Text(value.as_str().map_err(conversion)?.to_string()),
        Storage::Timestamp => {
            let raw = value.as_str().map_err(conversion)?;
            let parsed = DateTime::parse_from_rfc3339(raw).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(idx, value.data_type(), Box::new(e))
            })?;
            FieldValue::Timestamp(parsed.with_timezone(&Utc))
        }
    };

    Ok(decoded)
}

// ============================================================================
// RECORD
// ============================================================================

/// Field values of one tracked record (live, or rebuilt from history)
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Record {
    values: BTreeMap<String, FieldValue>,
}

impl Record {
    pub fn new() -> Self {
        Record::default()
    }

    /// Builder: set a field
    pub fn with(mut self, field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.set(field, value);
        self
    }

    pub fn set(&mut self, field: impl Into<String>, value: impl Into<FieldValue>) {
        self.values.insert(field.into(), value.into());
    }

    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.values.get(field)
    }

    /// Value of `field`, treating an absent field as null
    pub fn value(&self, field: &str) -> FieldValue {
        self.values.get(field).cloned().unwrap_or(FieldValue::Null)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.values.contains_key(field)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.values.iter().map(|(name, value)| (name.as_str(), value))
    }

    /// Keep only the named fields
    pub fn project<'a>(&self, fields: impl IntoIterator<Item = &'a str>) -> Record {
        let mut projected = Record::new();
        for field in fields {
            projected.set(field, self.value(field));
        }
        projected
    }

    pub fn to_json(&self) -> serde_json::Value {
        let map = self
            .values
            .iter()
            .map(|(name, value)| (name.clone(), value.to_json()))
            .collect::<serde_json::Map<_, _>>();
        serde_json::Value::Object(map)
    }

    // ========================================================================
    // TYPED ACCESSORS (for Trackable implementations)
    // ========================================================================

    fn require(&self, field: &str) -> Result<&FieldValue> {
        self.values.get(field).ok_or_else(|| HistoryError::UnknownField {
            schema: "record".to_string(),
            field: field.to_string(),
        })
    }

    fn mismatch(field: &str, expected: &'static str, found: &FieldValue) -> HistoryError {
        HistoryError::TypeMismatch {
            field: field.to_string(),
            expected,
            found: found.type_name().to_string(),
        }
    }

    pub fn integer(&self, field: &str) -> Result<i64> {
        let value = self.require(field)?;
        value.as_i64().ok_or_else(|| Self::mismatch(field, "integer", value))
    }

    pub fn real(&self, field: &str) -> Result<f64> {
        let value = self.require(field)?;
        value.as_f64().ok_or_else(|| Self::mismatch(field, "real", value))
    }

    pub fn text(&self, field: &str) -> Result<String> {
        let value = self.require(field)?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| Self::mismatch(field, "text", value))
    }

    pub fn boolean(&self, field: &str) -> Result<bool> {
        let value = self.require(field)?;
        value.as_bool().ok_or_else(|| Self::mismatch(field, "boolean", value))
    }

    pub fn timestamp(&self, field: &str) -> Result<DateTime<Utc>> {
        let value = self.require(field)?;
        value
            .as_timestamp()
            .ok_or_else(|| Self::mismatch(field, "timestamp", value))
    }

    /// Nullable text: absent or null both map to `None`
    pub fn optional_text(&self, field: &str) -> Result<Option<String>> {
        match self.values.get(field) {
            None | Some(FieldValue::Null) => Ok(None),
            Some(_) => self.text(field).map(Some),
        }
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

impl FromIterator<(String, FieldValue)> for Record {
    fn from_iter<I: IntoIterator<Item = (String, FieldValue)>>(iter: I) -> Self {
        Record {
            values: iter.into_iter().collect(),
        }
    }
}

// ============================================================================
// TRACKABLE
// ============================================================================

/// Application structs that can be projected to and rebuilt from a `Record`
pub trait Trackable: Sized {
    fn to_record(&self) -> Record;

    fn from_record(record: &Record) -> Result<Self>;
}

impl Trackable for Record {
    fn to_record(&self) -> Record {
        self.clone()
    }

    fn from_record(record: &Record) -> Result<Self> {
        Ok(record.clone())
    }
}
