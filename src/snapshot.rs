// 📸 Snapshot Reconstructor
//
// Rebuilds source-shaped records from history entries. Nothing here writes
// to the database.

use crate::error::Result;
use crate::projector::HistoricalSchema;
use crate::store::{HistoricalEntry, HistoryManager};
use crate::value::{Record, Trackable};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Project one entry back onto the tracked record's important fields
pub fn reconstruct(entry: &HistoricalEntry) -> Record {
    entry.values.clone()
}

/// Same projection, restricted to (and completed with) the schema's important fields
pub fn reconstruct_for(schema: &HistoricalSchema, entry: &HistoricalEntry) -> Record {
    entry.values.project(schema.important_field_names())
}

pub fn reconstruct_as<T: Trackable>(entry: &HistoricalEntry) -> Result<T> {
    T::from_record(&reconstruct(entry))
}

// ============================================================================
// TABLE SNAPSHOT
// ============================================================================

/// Every tracked record that existed at one point in time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableSnapshot {
    pub schema: String,
    pub as_of: DateTime<Utc>,
    pub records: Vec<Record>,
}

impl TableSnapshot {
    pub fn count(&self) -> usize {
        self.records.len()
    }
}

/// Rebuild all records of a history table as of `time`
///
/// Records not yet created, or already deleted at `time`, are left out.
pub fn table_as_of(objects: &HistoryManager<'_>, time: DateTime<Utc>) -> Result<TableSnapshot> {
    let mut records = Vec::new();

    for id in objects.record_ids()? {
        match objects.scoped_to(id).as_of(time) {
            Ok(record) => records.push(record),
            Err(e) if e.is_not_found() || e.is_already_deleted() => continue,
            Err(e) => return Err(e),
        }
    }

    Ok(TableSnapshot {
        schema: objects.schema().source_name.clone(),
        as_of: time,
        records,
    })
}
