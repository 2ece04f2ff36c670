// 🗂️ Schema Catalog - registration of tracked schemas and their histories
//
// `register` is the only place history gets attached to a schema: it runs
// the projector once, records the derived schema under its own name and
// hands back the `HistoricalRecords` the host reports mutations to.

use crate::detector::HistoricalRecords;
use crate::error::{conflict, HistoryError, Result};
use crate::projector::{project, HistoricalSchema, HistoryOptions};
use crate::schema::RecordSchema;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// Attribute names history tracking installs on every tracked schema
pub const RESERVED_ATTRIBUTES: [&str; 1] = ["set_editor"];

const METADATA_TABLE: &str = "history_schemas";

#[derive(Debug, Default)]
pub struct SchemaCatalog {
    schemas: HashMap<String, RecordSchema>,
    historical: HashMap<String, HistoricalSchema>,
    /// Source schema name -> its history tracking
    histories: HashMap<String, Arc<HistoricalRecords>>,
}

impl SchemaCatalog {
    pub fn new() -> Self {
        SchemaCatalog::default()
    }

    /// Register a plain (untracked) schema
    pub fn add_schema(&mut self, schema: RecordSchema) -> Result<()> {
        if self.contains(&schema.name) {
            return Err(HistoryError::DuplicateSchema(schema.name));
        }
        self.schemas.insert(schema.name.clone(), schema);
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.schemas.contains_key(name) || self.historical.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&RecordSchema> {
        self.schemas.get(name)
    }

    pub fn historical(&self, name: &str) -> Option<&HistoricalSchema> {
        self.historical.get(name)
    }

    /// History tracking attached to `source_name`, if any
    pub fn history(&self, source_name: &str) -> Option<Arc<HistoricalRecords>> {
        self.histories.get(source_name).cloned()
    }

    pub fn histories(&self) -> impl Iterator<Item = &Arc<HistoricalRecords>> {
        self.histories.values()
    }

    // ========================================================================
    // REGISTRATION
    // ========================================================================

    /// Attach history tracking to `source` under `attribute`
    pub fn register(
        &mut self,
        source: &RecordSchema,
        attribute: &str,
        options: HistoryOptions,
    ) -> Result<Arc<HistoricalRecords>> {
        if self.histories.contains_key(&source.name) {
            return Err(conflict(format!(
                "history cannot add method set_editor to {}: it already has one",
                source.name
            )));
        }
        if RESERVED_ATTRIBUTES.contains(&attribute) {
            return Err(conflict(format!(
                "{} is reserved and cannot name the history of {}",
                attribute, source.name
            )));
        }
        if source.get_field(attribute).is_some() {
            return Err(conflict(format!(
                "{} already has a field named {}",
                source.name, attribute
            )));
        }

        let schema = project(source, &options)?;
        if self.contains(&schema.name) {
            return Err(HistoryError::DuplicateSchema(schema.name));
        }
        if let Some(existing) = self.schemas.get(&source.name) {
            if existing != source {
                return Err(conflict(format!(
                    "a different schema named {} is already registered",
                    source.name
                )));
            }
        }

        info!(
            source = %source.name,
            historical = %schema.name,
            module = %schema.module,
            fields = ?schema.important_field_names(),
            "registered history tracking"
        );

        self.schemas
            .entry(source.name.clone())
            .or_insert_with(|| source.clone());
        self.historical.insert(schema.name.clone(), schema.clone());

        let history = Arc::new(HistoricalRecords::new(
            attribute.to_string(),
            source.clone(),
            schema,
        ));
        self.histories
            .insert(source.name.clone(), Arc::clone(&history));

        Ok(history)
    }

    /// Attach history to a schema defined outside the caller's code
    ///
    /// `module` is where the history schema is filed (and named after), so
    /// external migration tooling attributes it to the caller's module.
    pub fn register_external(
        &mut self,
        source: &RecordSchema,
        attribute: &str,
        module: &str,
    ) -> Result<Arc<HistoricalRecords>> {
        self.register(source, attribute, HistoryOptions::new().module(module))
    }

    // ========================================================================
    // INSTALLATION
    // ========================================================================

    /// Create every registered history table and index, and record the
    /// derived schemas so tools can load them back with `load_installed`
    pub fn install(&self, conn: &Connection) -> Result<()> {
        conn.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS \"{}\" (
                    table_name TEXT PRIMARY KEY,
                    schema_name TEXT NOT NULL,
                    source_name TEXT NOT NULL,
                    definition TEXT NOT NULL,
                    installed_at DATETIME DEFAULT CURRENT_TIMESTAMP
                )",
                METADATA_TABLE
            ),
            [],
        )?;

        for schema in self.historical.values() {
            conn.execute_batch(&schema.create_table_sql())?;
            for sql in schema.create_index_sql() {
                conn.execute_batch(&sql)?;
            }

            let definition = serde_json::to_string(schema)?;
            conn.execute(
                &format!(
                    "INSERT OR REPLACE INTO \"{}\" (table_name, schema_name, source_name, definition)
                     VALUES (?1, ?2, ?3, ?4)",
                    METADATA_TABLE
                ),
                params![schema.table_name(), schema.name, schema.source_name, definition],
            )?;

            info!(table = %schema.table_name(), "installed history table");
        }

        Ok(())
    }
}

/// Load a derived schema previously written by `SchemaCatalog::install`
pub fn load_installed(conn: &Connection, table: &str) -> Result<HistoricalSchema> {
    let definition: Option<String> = conn
        .query_row(
            &format!(
                "SELECT definition FROM \"{}\" WHERE table_name = ?1",
                METADATA_TABLE
            ),
            [table],
            |row| row.get(0),
        )
        .optional()
        .or_else(|e| match e {
            // Metadata table itself missing: nothing was installed
            rusqlite::Error::SqliteFailure(_, Some(ref msg)) if msg.contains("no such table") => {
                Ok(None)
            }
            other => Err(other),
        })?;

    let definition = definition.ok_or_else(|| HistoryError::NotInstalled(table.to_string()))?;
    Ok(serde_json::from_str(&definition)?)
}

/// Table names of every installed history schema
pub fn installed_tables(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT table_name FROM \"{}\" ORDER BY table_name",
        METADATA_TABLE
    ))?;
    let tables = stmt
        .query_map([], |row| row.get(0))?
        .collect::<std::result::Result<Vec<String>, _>>()?;
    Ok(tables)
}

// ============================================================================
// TESTS
// ============================================================================
