use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use std::env;
use std::path::Path;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use record_history::{
    changelog, installed_tables, load_installed, table_as_of, FieldValue, HistoricalSchema,
    HistoryConfig, HistoryManager,
};

const USAGE: &str = "usage:
  record-history tables
  record-history log <table> [id]
  record-history as-of <table> <id> <rfc3339>
  record-history snapshot <table> <rfc3339>
  record-history export <table> <out.csv>";

fn main() -> Result<()> {
    let config = HistoryConfig::load().context("Failed to load configuration")?;
    init_tracing(config.log_json);

    let args: Vec<String> = env::args().skip(1).collect();
    let conn = config
        .open()
        .with_context(|| format!("Failed to open {}", config.database_path.display()))?;
    info!(database = %config.database_path.display(), "history database opened");

    match args.iter().map(String::as_str).collect::<Vec<_>>().as_slice() {
        ["tables"] => run_tables(&conn),
        ["log", table] => run_log(&conn, table, None),
        ["log", table, id] => run_log(&conn, table, Some(*id)),
        ["as-of", table, id, time] => run_as_of(&conn, table, id, time),
        ["snapshot", table, time] => run_snapshot(&conn, table, time),
        ["export", table, out] => run_export(&conn, table, Path::new(out)),
        _ => {
            eprintln!("{}", USAGE);
            std::process::exit(2);
        }
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
}

fn parse_time(raw: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("Invalid RFC 3339 timestamp: {}", raw))?
        .with_timezone(&Utc))
}

fn parse_id(schema: &HistoricalSchema, raw: &str) -> Result<FieldValue> {
    Ok(FieldValue::parse_as(&schema.key_kind(), raw)?)
}

fn run_tables(conn: &Connection) -> Result<()> {
    let tables = installed_tables(conn)?;
    if tables.is_empty() {
        println!("No history tables installed");
    }
    for table in tables {
        let schema = load_installed(conn, &table)?;
        let count = HistoryManager::new(conn, &schema).count()?;
        println!("📚 {} ({} → {}): {} entries", table, schema.source_name, schema.name, count);
    }
    Ok(())
}

fn run_log(conn: &Connection, table: &str, id: Option<&str>) -> Result<()> {
    let schema = load_installed(conn, table)?;
    let objects = HistoryManager::new(conn, &schema);
    let manager = match id {
        Some(raw) => objects.scoped_to(parse_id(&schema, raw)?),
        None => objects,
    };

    for (entry, changes) in changelog(&manager)? {
        let editor = entry
            .history_editor
            .map(|e| e.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "#{} {} {} {}={} editor={}",
            entry.history_id,
            entry.history_date.to_rfc3339(),
            entry.history_type.label(),
            schema.key_field,
            entry.object_id(&schema),
            editor
        );
        for change in changes {
            println!("    {}", change);
        }
    }
    Ok(())
}

fn run_as_of(conn: &Connection, table: &str, id: &str, time: &str) -> Result<()> {
    let schema = load_installed(conn, table)?;
    let manager = HistoryManager::scoped(conn, &schema, parse_id(&schema, id)?);
    let record = manager.as_of(parse_time(time)?)?;
    println!("{}", serde_json::to_string_pretty(&record.to_json())?);
    Ok(())
}

fn run_snapshot(conn: &Connection, table: &str, time: &str) -> Result<()> {
    let schema = load_installed(conn, table)?;
    let snapshot = table_as_of(&HistoryManager::new(conn, &schema), parse_time(time)?)?;
    let records: Vec<_> = snapshot.records.iter().map(|r| r.to_json()).collect();
    println!("{}", serde_json::to_string_pretty(&records)?);
    eprintln!("✓ {} {} records as of {}", snapshot.count(), snapshot.schema, snapshot.as_of);
    Ok(())
}

fn run_export(conn: &Connection, table: &str, out: &Path) -> Result<()> {
    let schema = load_installed(conn, table)?;
    let mut entries = HistoryManager::new(conn, &schema).all()?;
    if entries.is_empty() {
        bail!("{} has no entries to export", table);
    }
    entries.reverse();

    let fields = schema.important_field_names();
    let mut writer = csv::Writer::from_path(out).context("Failed to create CSV file")?;

    let mut header = vec!["history_id", "history_date", "history_type", "history_editor"];
    header.extend(fields.iter().copied());
    writer.write_record(&header)?;

    for entry in &entries {
        let mut row = vec![
            entry.history_id.to_string(),
            entry.history_date.to_rfc3339(),
            entry.history_type.code().to_string(),
            entry.history_editor.map(|e| e.to_string()).unwrap_or_default(),
        ];
        row.extend(fields.iter().map(|f| match entry.values.value(f) {
            FieldValue::Null => String::new(),
            value => value.to_string(),
        }));
        writer.write_record(&row)?;
    }
    writer.flush()?;

    println!("✓ Exported {} entries to {}", entries.len(), out.display());
    Ok(())
}
