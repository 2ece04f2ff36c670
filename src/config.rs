//! Configuration
//!
//! Settings come from the environment (`HISTORY_*`), with a `.env` file
//! loaded first when present.

use crate::error::Result;
use crate::projector::{HistoryOptions, DEFAULT_EDITOR_TABLE};
use rusqlite::Connection;
use serde::Deserialize;
use std::path::PathBuf;
use tracing::debug;

#[derive(Debug, Clone, Deserialize)]
pub struct HistoryConfig {
    /// SQLite database holding the history tables
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// Table `history_editor` references
    #[serde(default = "default_editor_table")]
    pub editor_table: String,

    /// Put the database in WAL mode when opening it
    #[serde(default = "default_wal")]
    pub wal: bool,

    /// Emit logs as JSON lines
    #[serde(default)]
    pub log_json: bool,
}

fn default_database_path() -> PathBuf {
    PathBuf::from("history.db")
}

fn default_editor_table() -> String {
    DEFAULT_EDITOR_TABLE.to_string()
}

fn default_wal() -> bool {
    true
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            editor_table: default_editor_table(),
            wal: default_wal(),
            log_json: false,
        }
    }
}

impl HistoryConfig {
    /// Load settings from environment variables
    pub fn load() -> Result<Self> {
        // Missing .env is fine
        let _ = dotenvy::dotenv();

        let settings = config::Config::builder()
            .add_source(config::Environment::with_prefix("HISTORY").try_parsing(true))
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    /// Registration options carrying the configured editor table
    pub fn options(&self) -> HistoryOptions {
        HistoryOptions::new().editor_table(self.editor_table.clone())
    }

    /// Open the configured database
    pub fn open(&self) -> Result<Connection> {
        let conn = Connection::open(&self.database_path)?;
        if self.wal {
            // Crash recovery; readers don't block the writer
            conn.pragma_update(None, "journal_mode", "WAL")?;
        }
        debug!(path = %self.database_path.display(), wal = self.wal, "opened history database");
        Ok(conn)
    }
}
