// 📚 History Store - read/append surface over one history table
//
// A HistoryManager is either table-wide or scoped to one tracked record (all
// queries filtered by the record's primary-key value). Entries only ever get
// appended; there is no update or delete path here.

use crate::error::{HistoryError, Result};
use crate::projector::{HistoricalSchema, HISTORY_DATE, HISTORY_EDITOR, HISTORY_ID, HISTORY_TYPE};
use crate::schema::FieldDescriptor;
use crate::snapshot;
use crate::value::{decode_column, format_timestamp, FieldValue, Record, Trackable};
use chrono::{DateTime, Utc};
use rusqlite::types::{Type, Value};
use rusqlite::{params_from_iter, Connection, Row};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// Identifier of the acting principal (row id in the editor table)
pub type EditorId = i64;

// ============================================================================
// HISTORY TYPE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HistoryType {
    Created,
    Changed,
    Deleted,
}

impl HistoryType {
    /// Single-character code stored in the `history_type` column
    pub fn code(&self) -> &'static str {
        match self {
            HistoryType::Created => "+",
            HistoryType::Changed => "~",
            HistoryType::Deleted => "-",
        }
    }

    pub fn from_code(code: &str) -> Option<HistoryType> {
        match code {
            "+" => Some(HistoryType::Created),
            "~" => Some(HistoryType::Changed),
            "-" => Some(HistoryType::Deleted),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            HistoryType::Created => "Created",
            HistoryType::Changed => "Changed",
            HistoryType::Deleted => "Deleted",
        }
    }
}

// ============================================================================
// HISTORICAL ENTRY
// ============================================================================

/// One immutable row of a history table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricalEntry {
    pub history_id: i64,
    pub history_date: DateTime<Utc>,
    pub history_type: HistoryType,
    pub history_editor: Option<EditorId>,
    /// Important-field values, copied when the entry was written
    pub values: Record,
}

impl HistoricalEntry {
    /// The tracked record as it was when this entry was written
    pub fn history_object(&self) -> Record {
        snapshot::reconstruct(self)
    }

    /// Primary-key value of the tracked record this entry belongs to
    pub fn object_id(&self, schema: &HistoricalSchema) -> FieldValue {
        self.values.value(&schema.key_field)
    }
}

impl fmt::Display for HistoricalEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} as of {}",
            self.history_object(),
            format_timestamp(&self.history_date)
        )
    }
}

// ============================================================================
// HISTORY MANAGER
// ============================================================================

pub struct HistoryManager<'a> {
    conn: &'a Connection,
    schema: &'a HistoricalSchema,
    instance: Option<FieldValue>,
}

impl<'a> HistoryManager<'a> {
    /// Table-wide manager
    pub fn new(conn: &'a Connection, schema: &'a HistoricalSchema) -> Self {
        HistoryManager {
            conn,
            schema,
            instance: None,
        }
    }

    /// Manager scoped to the tracked record whose primary key is `id`
    pub fn scoped(conn: &'a Connection, schema: &'a HistoricalSchema, id: FieldValue) -> Self {
        HistoryManager {
            conn,
            schema,
            instance: Some(id),
        }
    }

    /// Same table, scoped to another record id
    pub fn scoped_to(&self, id: FieldValue) -> HistoryManager<'a> {
        HistoryManager::scoped(self.conn, self.schema, id)
    }

    pub fn schema(&self) -> &'a HistoricalSchema {
        self.schema
    }

    pub fn instance(&self) -> Option<&FieldValue> {
        self.instance.as_ref()
    }

    fn instance_label(&self) -> String {
        self.instance
            .as_ref()
            .map(|id| id.to_string())
            .unwrap_or_else(|| "*".to_string())
    }

    fn require_instance(&self, operation: &'static str) -> Result<&FieldValue> {
        self.instance.as_ref().ok_or(HistoryError::Unscoped(operation))
    }

    // ========================================================================
    // QUERIES
    // ========================================================================

    fn columns(&self) -> String {
        let mut columns = vec![
            format!("\"{}\"", HISTORY_ID),
            format!("\"{}\"", HISTORY_DATE),
            format!("\"{}\"", HISTORY_TYPE),
            format!("\"{}\"", HISTORY_EDITOR),
        ];
        columns.extend(self.schema.tracked_fields().map(|f| format!("\"{}\"", f.name)));
        columns.join(", ")
    }

    fn where_clause(&self, filters: &[(&str, Value)]) -> (String, Vec<Value>) {
        let mut clauses = Vec::new();
        let mut args = Vec::new();

        if let Some(id) = &self.instance {
            clauses.push(format!("\"{}\" = ?", self.schema.key_field));
            args.push(Value::from(id));
        }
        for (clause, arg) in filters {
            clauses.push(clause.to_string());
            args.push(arg.clone());
        }

        if clauses.is_empty() {
            (String::new(), args)
        } else {
            (format!(" WHERE {}", clauses.join(" AND ")), args)
        }
    }

    /// Entries matching `filters`, most recent first
    fn fetch(&self, filters: &[(&str, Value)], limit: Option<usize>) -> Result<Vec<HistoricalEntry>> {
        let (condition, args) = self.where_clause(filters);
        let mut sql = format!(
            "SELECT {} FROM \"{}\"{} ORDER BY {}",
            self.columns(),
            self.schema.table_name(),
            condition,
            self.schema.order_by_sql()
        );
        if let Some(limit) = limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }

        let tracked: Vec<&FieldDescriptor> = self.schema.tracked_fields().collect();
        let mut stmt = self.conn.prepare(&sql)?;
        let entries = stmt
            .query_map(params_from_iter(args.iter()), |row| decode_entry(row, &tracked))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(entries)
    }

    fn first(&self, filters: &[(&str, Value)]) -> Result<Option<HistoricalEntry>> {
        Ok(self.fetch(filters, Some(1))?.into_iter().next())
    }

    /// Every entry in scope, most recent first
    pub fn all(&self) -> Result<Vec<HistoricalEntry>> {
        self.fetch(&[], None)
    }

    pub fn count(&self) -> Result<i64> {
        let (condition, args) = self.where_clause(&[]);
        let sql = format!(
            "SELECT COUNT(*) FROM \"{}\"{}",
            self.schema.table_name(),
            condition
        );
        let count = self
            .conn
            .query_row(&sql, params_from_iter(args.iter()), |row| row.get(0))?;
        Ok(count)
    }

    /// Highest `history_id` in scope
    pub fn latest(&self) -> Result<Option<HistoricalEntry>> {
        self.first(&[])
    }

    pub fn get(&self, history_id: i64) -> Result<Option<HistoricalEntry>> {
        self.first(&[("\"history_id\" = ?", Value::Integer(history_id))])
    }

    /// The entry immediately preceding `history_id` within scope
    pub fn before(&self, history_id: i64) -> Result<Option<HistoricalEntry>> {
        self.first(&[("\"history_id\" < ?", Value::Integer(history_id))])
    }

    /// Latest entry written at or before `time`
    pub fn latest_at(&self, time: DateTime<Utc>) -> Result<Option<HistoricalEntry>> {
        self.first(&[("\"history_date\" <= ?", Value::Text(format_timestamp(&time)))])
    }

    /// Entries with `from <= history_date <= to`, most recent first
    pub fn between(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<HistoricalEntry>> {
        self.fetch(
            &[
                ("\"history_date\" >= ?", Value::Text(format_timestamp(&from))),
                ("\"history_date\" <= ?", Value::Text(format_timestamp(&to))),
            ],
            None,
        )
    }

    pub fn of_type(&self, history_type: HistoryType) -> Result<Vec<HistoricalEntry>> {
        self.fetch(
            &[("\"history_type\" = ?", Value::Text(history_type.code().to_string()))],
            None,
        )
    }

    /// Distinct tracked-record ids present in scope
    pub fn record_ids(&self) -> Result<Vec<FieldValue>> {
        let (condition, args) = self.where_clause(&[]);
        let sql = format!(
            "SELECT DISTINCT \"{key}\" FROM \"{table}\"{condition} ORDER BY \"{key}\"",
            key = self.schema.key_field,
            table = self.schema.table_name(),
            condition = condition
        );
        let key_kind = self.schema.key_kind();

        let mut stmt = self.conn.prepare(&sql)?;
        let ids = stmt
            .query_map(params_from_iter(args.iter()), |row| {
                decode_column(&key_kind, 0, row.get_ref(0)?)
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(ids)
    }

    // ========================================================================
    // INSTANCE LOOKUPS
    // ========================================================================

    /// The record as captured by its most recent entry
    pub fn most_recent(&self) -> Result<Record> {
        self.require_instance("most_recent")?;
        match self.latest()? {
            Some(entry) => Ok(entry.history_object()),
            None => Err(HistoryError::NotFound {
                schema: self.schema.name.clone(),
                id: self.instance_label(),
            }),
        }
    }

    /// The record as it was at `time`
    pub fn as_of(&self, time: DateTime<Utc>) -> Result<Record> {
        self.require_instance("as_of")?;
        match self.latest_at(time)? {
            None => Err(HistoryError::NotFound {
                schema: self.schema.name.clone(),
                id: self.instance_label(),
            }),
            Some(entry) if entry.history_type == HistoryType::Deleted => {
                Err(HistoryError::AlreadyDeleted {
                    schema: self.schema.name.clone(),
                    id: self.instance_label(),
                })
            }
            Some(entry) => Ok(entry.history_object()),
        }
    }

    pub fn most_recent_as<T: Trackable>(&self) -> Result<T> {
        T::from_record(&self.most_recent()?)
    }

    pub fn as_of_as<T: Trackable>(&self, time: DateTime<Utc>) -> Result<T> {
        T::from_record(&self.as_of(time)?)
    }

    // ========================================================================
    // APPEND
    // ========================================================================

    /// Append one entry holding the record's important-field values
    pub fn insert(
        &self,
        record: &Record,
        history_type: HistoryType,
        editor: Option<EditorId>,
        at: DateTime<Utc>,
    ) -> Result<i64> {
        if !record.contains(&self.schema.key_field) {
            return Err(HistoryError::UnknownField {
                schema: self.schema.source_name.clone(),
                field: self.schema.key_field.clone(),
            });
        }

        // Rejects values the column could not read back
        let values = self.schema.normalize(record)?;
        let tracked: Vec<&str> = self.schema.important_field_names();

        let mut columns: Vec<String> = tracked.iter().map(|name| format!("\"{}\"", name)).collect();
        columns.extend(
            [HISTORY_DATE, HISTORY_TYPE, HISTORY_EDITOR]
                .iter()
                .map(|name| format!("\"{}\"", name)),
        );

        let mut args: Vec<Value> = tracked
            .iter()
            .map(|name| Value::from(&values.value(name)))
            .collect();
        args.push(Value::Text(format_timestamp(&at)));
        args.push(Value::Text(history_type.code().to_string()));
        args.push(editor.map_or(Value::Null, Value::Integer));

        let placeholders = vec!["?"; args.len()].join(", ");
        let sql = format!(
            "INSERT INTO \"{}\" ({}) VALUES ({})",
            self.schema.table_name(),
            columns.join(", "),
            placeholders
        );

        self.conn.execute(&sql, params_from_iter(args.iter()))?;
        let history_id = self.conn.last_insert_rowid();

        debug!(
            schema = %self.schema.name,
            history_id,
            history_type = history_type.code(),
            "appended historical entry"
        );

        Ok(history_id)
    }
}

/// Row layout: history_id, history_date, history_type, history_editor, tracked...
fn decode_entry(row: &Row<'_>, tracked: &[&FieldDescriptor]) -> rusqlite::Result<HistoricalEntry> {
    let history_id: i64 = row.get(0)?;

    let date_raw: String = row.get(1)?;
    let history_date = DateTime::parse_from_rfc3339(&date_raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(1, Type::Text, Box::new(e)))?
        .with_timezone(&Utc);

    let code: String = row.get(2)?;
    let history_type = HistoryType::from_code(&code).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            Type::Text,
            format!("unknown history type {:?}", code).into(),
        )
    })?;

    let history_editor: Option<EditorId> = row.get(3)?;

    let mut values = Record::new();
    for (offset, field) in tracked.iter().enumerate() {
        let idx = 4 + offset;
        values.set(field.name.clone(), decode_column(&field.kind, idx, row.get_ref(idx)?)?);
    }

    Ok(HistoricalEntry {
        history_id,
        history_date,
        history_type,
        history_editor,
        values,
    })
}

// ============================================================================
// TESTS
// ============================================================================
