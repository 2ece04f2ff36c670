// 🔍 Diff Engine - field-level changes between consecutive entries

use crate::error::Result;
use crate::projector::HistoricalSchema;
use crate::store::{HistoricalEntry, HistoryManager};
use crate::value::FieldValue;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    pub field_name: String,
    pub display_label: String,
    /// `None` when the field had no earlier value (first entry)
    pub from_value: Option<FieldValue>,
    pub to_value: FieldValue,
}

impl fmt::Display for FieldChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.from_value {
            Some(from) => write!(
                f,
                "Field \"{}\" changed from \"{}\" to \"{}\"",
                self.field_name, from, self.to_value
            ),
            None => write!(f, "Field \"{}\" set to \"{}\"", self.field_name, self.to_value),
        }
    }
}

/// Compare an entry with its predecessor (pure)
///
/// Without a predecessor every important field is reported as changed.
pub fn compare(
    schema: &HistoricalSchema,
    previous: Option<&HistoricalEntry>,
    current: &HistoricalEntry,
) -> Vec<FieldChange> {
    schema
        .important_field_names()
        .into_iter()
        .filter_map(|field| {
            let to_value = current.values.value(field);
            let from_value = match previous {
                Some(prev) => {
                    let from = prev.values.value(field);
                    if from == to_value {
                        return None;
                    }
                    Some(from)
                }
                None => None,
            };
            Some(FieldChange {
                field_name: field.to_string(),
                display_label: schema.display_label(field),
                from_value,
                to_value,
            })
        })
        .collect()
}

/// Fields modified by `entry` relative to the previous entry of the same record
pub fn modified_fields(manager: &HistoryManager<'_>, entry: &HistoricalEntry) -> Result<Vec<FieldChange>> {
    let schema = manager.schema();
    let scoped = manager.scoped_to(entry.object_id(schema));
    let previous = scoped.before(entry.history_id)?;
    Ok(compare(schema, previous.as_ref(), entry))
}

/// Walk the history in scope oldest-first, pairing each entry with its changes
pub fn changelog(manager: &HistoryManager<'_>) -> Result<Vec<(HistoricalEntry, Vec<FieldChange>)>> {
    let schema = manager.schema();
    let mut entries = manager.all()?;
    entries.reverse();

    // Keyed by record id: an unscoped manager interleaves many records
    let mut last_seen: HashMap<String, HistoricalEntry> = HashMap::new();
    let mut log = Vec::with_capacity(entries.len());

    for entry in entries {
        let key = entry.object_id(schema).to_string();
        let changes = compare(schema, last_seen.get(&key), &entry);
        last_seen.insert(key, entry.clone());
        log.push((entry, changes));
    }

    Ok(log)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::projector::{project, HistoryOptions};
    use crate::schema::{FieldDescriptor, RecordSchema};
    use crate::store::HistoryType;
    use crate::value::Record;
    use chrono::{DateTime, TimeZone, Utc};
    use pretty_assertions::assert_eq;
    use rusqlite::Connection;

    fn setup() -> (Connection, HistoricalSchema) {
        let source = RecordSchema::new("Task", "todo")
            .field(FieldDescriptor::auto("id"))
            .field(FieldDescriptor::text("name").verbose_name("Task name"))
            .field(FieldDescriptor::boolean("done"));
        let schema = project(&source, &HistoryOptions::new()).unwrap();
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(&schema.create_table_sql()).unwrap();
        (conn, schema)
    }

    fn t(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 7, 1, hour, 0, 0).unwrap()
    }

    fn task(id: i64, name: &str, done: bool) -> Record {
        Record::new().with("id", id).with("name", name).with("done", done)
    }

    #[test]
    fn test_first_entry_reports_every_field() {
        let (conn, schema) = setup();
        let manager = HistoryManager::new(&conn, &schema);
        let id = manager.insert(&task(1, "write", false), HistoryType::Created, None, t(1)).unwrap();
        let entry = manager.get(id).unwrap().unwrap();

        let changes = modified_fields(&manager, &entry).unwrap();

        assert_eq!(changes.len(), 3);
        assert!(changes.iter().all(|c| c.from_value.is_none()));
        assert_eq!(changes[1].display_label, "Task name");
    }

    #[test]
    fn test_single_field_change() {
        let (conn, schema) = setup();
        let manager = HistoryManager::new(&conn, &schema);
        manager.insert(&task(1, "A", false), HistoryType::Created, None, t(1)).unwrap();
        // Another record in between must not count as predecessor
        manager.insert(&task(2, "other", true), HistoryType::Created, None, t(2)).unwrap();
        let id = manager.insert(&task(1, "B", false), HistoryType::Changed, None, t(3)).unwrap();
        let entry = manager.get(id).unwrap().unwrap();

        let changes = modified_fields(&manager, &entry).unwrap();

        assert_eq!(
            changes,
            vec![FieldChange {
                field_name: "name".to_string(),
                display_label: "Task name".to_string(),
                from_value: Some(FieldValue::Text("A".to_string())),
                to_value: FieldValue::Text("B".to_string()),
            }]
        );
        assert_eq!(changes[0].to_string(), "Field \"name\" changed from \"A\" to \"B\"");
    }

    #[test]
    fn test_changelog_groups_by_record() {
        let (conn, schema) = setup();
        let manager = HistoryManager::new(&conn, &schema);
        manager.insert(&task(1, "A", false), HistoryType::Created, None, t(1)).unwrap();
        manager.insert(&task(2, "X", false), HistoryType::Created, None, t(2)).unwrap();
        manager.insert(&task(1, "A", true), HistoryType::Changed, None, t(3)).unwrap();

        let log = changelog(&manager).unwrap();

        assert_eq!(log.len(), 3);
        assert_eq!(log[0].1.len(), 3);
        assert_eq!(log[1].1.len(), 3);
        assert_eq!(log[2].1.len(), 1);
        assert_eq!(log[2].1[0].field_name, "done");
    }
}
