// 🕵️ Change Detector - decides when a mutation becomes a history entry
//
// The host persistence layer calls `record_change` after every committed
// create, update or delete of a tracked record. Each call appends zero or
// one entry and never touches existing ones.

use crate::error::{HistoryError, Result};
use crate::projector::HistoricalSchema;
use crate::schema::RecordSchema;
use crate::store::{EditorId, HistoryManager, HistoryType};
use crate::value::{FieldValue, Record};
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::{debug, warn};

// ============================================================================
// MUTATION EVENTS
// ============================================================================

/// A successful create-or-update of a tracked record
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SaveEvent {
    /// The save inserted a new row
    pub created: bool,
    /// Bulk/raw load (fixtures): never historized
    pub raw: bool,
    /// Acting editor; overrides one staged with `set_editor`
    pub editor: Option<EditorId>,
    /// Entry timestamp; defaults to now
    pub at: Option<DateTime<Utc>>,
}

impl SaveEvent {
    pub fn created() -> Self {
        SaveEvent {
            created: true,
            ..SaveEvent::default()
        }
    }

    pub fn updated() -> Self {
        SaveEvent::default()
    }

    pub fn raw() -> Self {
        SaveEvent {
            raw: true,
            ..SaveEvent::default()
        }
    }

    /// Builder: acting editor
    pub fn by(mut self, editor: EditorId) -> Self {
        self.editor = Some(editor);
        self
    }

    /// Builder: explicit entry timestamp
    pub fn at(mut self, time: DateTime<Utc>) -> Self {
        self.at = Some(time);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    Saved(SaveEvent),
    Deleted { at: Option<DateTime<Utc>> },
}

impl Change {
    pub fn deleted() -> Self {
        Change::Deleted { at: None }
    }
}

// ============================================================================
// HISTORICAL RECORDS
// ============================================================================

/// History tracking attached to one source schema
///
/// Built by `SchemaCatalog::register`; shareable across threads.
#[derive(Debug)]
pub struct HistoricalRecords {
    attribute: String,
    source: RecordSchema,
    schema: HistoricalSchema,
    /// Keyed by (storage class, rendered key) of the record's primary key
    staged_editors: Mutex<HashMap<(&'static str, String), EditorId>>,
}

impl HistoricalRecords {
    pub(crate) fn new(attribute: String, source: RecordSchema, schema: HistoricalSchema) -> Self {
        HistoricalRecords {
            attribute,
            source,
            schema,
            staged_editors: Mutex::new(HashMap::new()),
        }
    }

    /// Name the history is reachable under on the source schema
    pub fn attribute(&self) -> &str {
        &self.attribute
    }

    pub fn source(&self) -> &RecordSchema {
        &self.source
    }

    pub fn schema(&self) -> &HistoricalSchema {
        &self.schema
    }

    pub fn important_field_names(&self) -> Vec<&str> {
        self.schema.important_field_names()
    }

    /// Primary-key value of `record`, in the key column's stored form
    fn key_of(&self, record: &Record) -> Result<FieldValue> {
        match record.get(&self.schema.key_field) {
            Some(value) if !value.is_null() => value
                .clone()
                .coerce(&self.schema.key_field, &self.schema.key_kind()),
            _ => Err(HistoryError::UnknownField {
                schema: self.source.name.clone(),
                field: self.schema.key_field.clone(),
            }),
        }
    }

    fn staging_key(key: &FieldValue) -> (&'static str, String) {
        (key.type_name(), key.to_string())
    }

    // ========================================================================
    // ACCESSORS
    // ========================================================================

    /// Table-wide history
    pub fn objects<'a>(&'a self, conn: &'a Connection) -> HistoryManager<'a> {
        HistoryManager::new(conn, &self.schema)
    }

    /// History of one tracked record
    pub fn history<'a>(&'a self, conn: &'a Connection, record: &Record) -> Result<HistoryManager<'a>> {
        Ok(HistoryManager::scoped(conn, &self.schema, self.key_of(record)?))
    }

    pub fn for_id<'a>(&'a self, conn: &'a Connection, id: impl Into<FieldValue>) -> HistoryManager<'a> {
        HistoryManager::scoped(conn, &self.schema, id.into())
    }

    // ========================================================================
    // EDITOR STAGING
    // ========================================================================

    /// Stage the editor for the next save of `record`
    pub fn set_editor(&self, record: &Record, editor: EditorId) -> Result<()> {
        let key = Self::staging_key(&self.key_of(record)?);
        self.staged_editors
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(key, editor);
        Ok(())
    }

    fn take_editor(&self, key: &FieldValue) -> Option<EditorId> {
        self.staged_editors
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&Self::staging_key(key))
    }

    // ========================================================================
    // RECORD CHANGE
    // ========================================================================

    /// Report a committed mutation; returns the new `history_id` if one was written
    pub fn record_change(&self, conn: &Connection, record: &Record, change: Change) -> Result<Option<i64>> {
        match change {
            Change::Saved(event) => self.record_saved(conn, record, event),
            Change::Deleted { at } => self.record_deleted(conn, record, at).map(Some),
        }
    }

    fn record_saved(&self, conn: &Connection, record: &Record, event: SaveEvent) -> Result<Option<i64>> {
        if event.raw {
            debug!(schema = %self.source.name, "raw save, history skipped");
            return Ok(None);
        }

        let key = self.key_of(record)?;
        let values = self.schema.normalize(record)?;
        let manager = HistoryManager::scoped(conn, &self.schema, key.clone());
        let latest = manager.latest()?;

        // Any non-raw save that got this far consumes the staged editor
        let staged = self.take_editor(&key);
        let editor = event.editor.or(staged);
        let saved_type = if event.created {
            HistoryType::Created
        } else {
            HistoryType::Changed
        };

        let history_type = match latest {
            None => HistoryType::Created,
            Some(latest) => {
                let changed: Vec<&str> = self
                    .important_field_names()
                    .into_iter()
                    .filter(|field| values.value(field) != latest.values.value(field))
                    .collect();

                if changed.is_empty() {
                    debug!(schema = %self.source.name, id = %key, "no important field changed");
                    return Ok(None);
                }
                if latest.history_type == HistoryType::Deleted {
                    warn!(
                        schema = %self.source.name,
                        id = %key,
                        "appending history after a deletion entry"
                    );
                }
                debug!(schema = %self.source.name, id = %key, fields = ?changed, "fields changed");
                saved_type
            }
        };

        let at = event.at.unwrap_or_else(Utc::now);
        manager.insert(&values, history_type, editor, at).map(Some)
    }

    fn record_deleted(&self, conn: &Connection, record: &Record, at: Option<DateTime<Utc>>) -> Result<i64> {
        let manager = self.history(conn, record)?;
        // Deletions carry no editor attribution
        manager.insert(record, HistoryType::Deleted, None, at.unwrap_or_else(Utc::now))
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::projector::{project, HistoryOptions};
    use crate::schema::FieldDescriptor;
    use std::sync::Arc;

    fn tracker(options: HistoryOptions) -> (Connection, HistoricalRecords) {
        let source = RecordSchema::new("Article", "blog.models")
            .field(FieldDescriptor::auto("id"))
            .field(FieldDescriptor::text("title"))
            .field(FieldDescriptor::text("body"))
            .field(FieldDescriptor::integer("views"));
        let schema = project(&source, &options).unwrap();
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(&schema.create_table_sql()).unwrap();
        (conn, HistoricalRecords::new("history".to_string(), source, schema))
    }

    fn article(title: &str, views: i64) -> Record {
        Record::new()
            .with("id", 1)
            .with("title", title)
            .with("body", "...")
            .with("views", views)
    }

    #[test]
    fn test_create_always_historizes() {
        let (conn, history) = tracker(HistoryOptions::new());

        let written = history
            .record_change(&conn, &article("Hello", 0), Change::Saved(SaveEvent::created()))
            .unwrap();

        assert!(written.is_some());
        let latest = history.for_id(&conn, 1).latest().unwrap().unwrap();
        assert_eq!(latest.history_type, HistoryType::Created);
    }

    #[test]
    fn test_first_update_of_unhistorized_record_is_created() {
        let (conn, history) = tracker(HistoryOptions::new());

        history
            .record_change(&conn, &article("Legacy", 3), Change::Saved(SaveEvent::updated()))
            .unwrap();

        let latest = history.for_id(&conn, 1).latest().unwrap().unwrap();
        assert_eq!(latest.history_type, HistoryType::Created);
    }

    #[test]
    fn test_unchanged_save_writes_nothing() {
        let (conn, history) = tracker(HistoryOptions::new());
        let record = article("Hello", 0);

        history.record_change(&conn, &record, Change::Saved(SaveEvent::created())).unwrap();
        let second = history
            .record_change(&conn, &record, Change::Saved(SaveEvent::updated()))
            .unwrap();

        assert_eq!(second, None);
        assert_eq!(history.for_id(&conn, 1).count().unwrap(), 1);
    }

    #[test]
    fn test_change_writes_changed_entry() {
        let (conn, history) = tracker(HistoryOptions::new());
        history
            .record_change(&conn, &article("Hello", 0), Change::Saved(SaveEvent::created()))
            .unwrap();

        history
            .record_change(&conn, &article("Hello, world", 0), Change::Saved(SaveEvent::updated()))
            .unwrap();

        let entries = history.for_id(&conn, 1).all().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].history_type, HistoryType::Changed);
        assert_eq!(entries[0].values.text("title").unwrap(), "Hello, world");
    }

    #[test]
    fn test_untracked_field_changes_are_ignored() {
        let (conn, history) = tracker(HistoryOptions::new().fields(["title"]));
        history
            .record_change(&conn, &article("Hello", 0), Change::Saved(SaveEvent::created()))
            .unwrap();

        let written = history
            .record_change(&conn, &article("Hello", 500), Change::Saved(SaveEvent::updated()))
            .unwrap();

        assert_eq!(written, None);
    }

    #[test]
    fn test_raw_saves_are_skipped() {
        let (conn, history) = tracker(HistoryOptions::new());

        let written = history
            .record_change(&conn, &article("Fixture", 0), Change::Saved(SaveEvent::raw()))
            .unwrap();

        assert_eq!(written, None);
        assert_eq!(history.objects(&conn).count().unwrap(), 0);
    }

    #[test]
    fn test_editor_explicit_and_staged() {
        let (conn, history) = tracker(HistoryOptions::new());

        history
            .record_change(&conn, &article("v1", 0), Change::Saved(SaveEvent::created().by(7)))
            .unwrap();

        history.set_editor(&article("v1", 0), 8).unwrap();
        history
            .record_change(&conn, &article("v2", 0), Change::Saved(SaveEvent::updated()))
            .unwrap();

        // Staged editor was consumed by the previous save
        history
            .record_change(&conn, &article("v3", 0), Change::Saved(SaveEvent::updated()))
            .unwrap();

        let editors: Vec<Option<i64>> = history
            .for_id(&conn, 1)
            .all()
            .unwrap()
            .iter()
            .map(|e| e.history_editor)
            .collect();
        assert_eq!(editors, vec![None, Some(8), Some(7)]);
    }

    #[test]
    fn test_delete_has_no_editor() {
        let (conn, history) = tracker(HistoryOptions::new());
        history
            .record_change(&conn, &article("v1", 0), Change::Saved(SaveEvent::created().by(7)))
            .unwrap();

        history.record_change(&conn, &article("v1", 0), Change::deleted()).unwrap();

        let latest = history.for_id(&conn, 1).latest().unwrap().unwrap();
        assert_eq!(latest.history_type, HistoryType::Deleted);
        assert_eq!(latest.history_editor, None);
    }

    #[test]
    fn test_staged_editor_skips_delete_and_stays_staged() {
        let (conn, history) = tracker(HistoryOptions::new());
        history
            .record_change(&conn, &article("v1", 0), Change::Saved(SaveEvent::created()))
            .unwrap();

        history.set_editor(&article("v1", 0), 8).unwrap();
        history.record_change(&conn, &article("v1", 0), Change::deleted()).unwrap();

        let deleted = history.for_id(&conn, 1).latest().unwrap().unwrap();
        assert_eq!(deleted.history_editor, None);
        assert_eq!(history.take_editor(&FieldValue::Integer(1)), Some(8));
    }

    #[test]
    fn test_save_after_delete_appends() {
        let (conn, history) = tracker(HistoryOptions::new());
        let record = article("gone", 1);
        history.record_change(&conn, &record, Change::Saved(SaveEvent::created())).unwrap();
        history.record_change(&conn, &record, Change::deleted()).unwrap();

        // Key reused by a new record
        let written = history
            .record_change(&conn, &article("reborn", 0), Change::Saved(SaveEvent::created()))
            .unwrap();

        assert!(written.is_some());
        let types: Vec<HistoryType> = history
            .for_id(&conn, 1)
            .all()
            .unwrap()
            .iter()
            .map(|e| e.history_type)
            .collect();
        assert_eq!(types, vec![HistoryType::Created, HistoryType::Deleted, HistoryType::Created]);
    }

    #[test]
    fn test_failed_read_keeps_staged_editor() {
        let (conn, history) = tracker(HistoryOptions::new());
        history.set_editor(&article("v1", 0), 5).unwrap();
        conn.execute_batch(&format!("DROP TABLE \"{}\"", history.schema().table_name()))
            .unwrap();

        let err = history
            .record_change(&conn, &article("v1", 0), Change::Saved(SaveEvent::created()))
            .unwrap_err();

        assert!(matches!(err, HistoryError::Database(_)));
        assert_eq!(history.take_editor(&FieldValue::Integer(1)), Some(5));
    }

    #[test]
    fn test_staged_editor_key_is_typed() {
        let (_conn, history) = tracker(HistoryOptions::new());
        let text_key = article("x", 0).with("id", "1");

        let err = history.set_editor(&text_key, 4).unwrap_err();
        assert!(matches!(err, HistoryError::TypeMismatch { .. }));
        assert_eq!(history.take_editor(&FieldValue::Integer(1)), None);
    }

    #[test]
    fn test_unchanged_timestamp_and_real_fields_write_nothing() {
        let source = RecordSchema::new("Event", "agenda.models")
            .field(FieldDescriptor::auto("id"))
            .field(FieldDescriptor::timestamp("starts_at"))
            .field(FieldDescriptor::real("price"));
        let schema = project(&source, &HistoryOptions::new()).unwrap();
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(&schema.create_table_sql()).unwrap();
        let history = HistoricalRecords::new("history".to_string(), source, schema);

        // Sub-microsecond precision and an integer in a real field
        let event = Record::new()
            .with("id", 1)
            .with("starts_at", Utc::now())
            .with("price", 10);

        history.record_change(&conn, &event, Change::Saved(SaveEvent::created())).unwrap();
        let second = history
            .record_change(&conn, &event, Change::Saved(SaveEvent::updated()))
            .unwrap();

        assert_eq!(second, None);
        let manager = history.for_id(&conn, 1);
        assert_eq!(manager.count().unwrap(), 1);
        assert_eq!(manager.most_recent().unwrap().value("price"), FieldValue::Real(10.0));
    }

    #[test]
    fn test_wrong_kind_is_rejected_before_writing() {
        let (conn, history) = tracker(HistoryOptions::new());
        let bad = article("Hello", 0).with("views", "lots");

        let err = history
            .record_change(&conn, &bad, Change::Saved(SaveEvent::created()))
            .unwrap_err();
        assert!(matches!(err, HistoryError::TypeMismatch { expected: "integer", .. }));

        // History stays readable and usable
        history
            .record_change(&conn, &article("Hello", 0), Change::Saved(SaveEvent::created()))
            .unwrap();
        assert_eq!(history.for_id(&conn, 1).most_recent().unwrap(), article("Hello", 0));
    }

    #[test]
    fn test_record_without_key_is_rejected() {
        let (conn, history) = tracker(HistoryOptions::new());
        let keyless = Record::new().with("title", "orphan");

        let err = history
            .record_change(&conn, &keyless, Change::Saved(SaveEvent::created()))
            .unwrap_err();
        assert!(matches!(err, HistoryError::UnknownField { .. }));
    }

    #[test]
    fn test_tracker_is_shareable() {
        let (_conn, history) = tracker(HistoryOptions::new());
        let shared = Arc::new(history);
        let clone = Arc::clone(&shared);

        std::thread::spawn(move || clone.set_editor(&article("x", 0), 3).unwrap())
            .join()
            .unwrap();

        assert_eq!(shared.take_editor(&FieldValue::Integer(1)), Some(3));
    }
}
