// 🪞 Schema Projector - derives the historical schema of a tracked schema
//
// Pure function from (source schema, options) to `HistoricalSchema`. Field
// rewriting is driven by the FIELD_RULES table below; nothing is mutated in
// place and nothing is registered here.

use crate::error::{conflict, HistoryError, Result};
use crate::schema::{app_label, FieldDescriptor, FieldKind, KindTag, RecordSchema, ReverseAccessor};
use crate::value::{FieldValue, Record};
use serde::{Deserialize, Serialize};

/// Metadata columns every history table carries
pub const HISTORY_ID: &str = "history_id";
pub const HISTORY_DATE: &str = "history_date";
pub const HISTORY_TYPE: &str = "history_type";
pub const HISTORY_EDITOR: &str = "history_editor";

pub const HISTORY_FIELDS: [&str; 4] = [HISTORY_ID, HISTORY_DATE, HISTORY_TYPE, HISTORY_EDITOR];

pub const DEFAULT_EDITOR_TABLE: &str = "auth_user";

// ============================================================================
// FIELD RULES
// ============================================================================

/// What happens to a copied field of a given kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldRule {
    /// The history table has its own identity; the old one becomes a plain integer
    DemoteAutoIncrement,
    /// Uniqueness of the relation no longer holds: nullable many-to-one
    OneToOneAsManyToOne,
    /// Keep the relation, drop the reverse accessor so it cannot clash
    SuppressReverse,
    Copy,
}

pub const FIELD_RULES: [(KindTag, FieldRule); 8] = [
    (KindTag::AutoIncrement, FieldRule::DemoteAutoIncrement),
    (KindTag::OneToOne, FieldRule::OneToOneAsManyToOne),
    (KindTag::ManyToOne, FieldRule::SuppressReverse),
    (KindTag::Integer, FieldRule::Copy),
    (KindTag::Real, FieldRule::Copy),
    (KindTag::Text, FieldRule::Copy),
    (KindTag::Boolean, FieldRule::Copy),
    (KindTag::Timestamp, FieldRule::Copy),
];

pub fn rule_for(kind: &FieldKind) -> FieldRule {
    let tag = kind.tag();
    FIELD_RULES
        .iter()
        .find(|(k, _)| *k == tag)
        .map(|(_, rule)| *rule)
        .unwrap_or(FieldRule::Copy)
}

/// Rewrite one important field for the history table
pub fn transform_field(field: &FieldDescriptor) -> FieldDescriptor {
    let mut copy = field.clone();

    match rule_for(&field.kind) {
        FieldRule::DemoteAutoIncrement => copy.kind = FieldKind::Integer,
        FieldRule::OneToOneAsManyToOne => {
            let target = field.kind.target().unwrap_or_default().to_string();
            copy.kind = FieldKind::ManyToOne { target };
            copy.nullable = true;
            copy.reverse = ReverseAccessor::Suppressed;
        }
        FieldRule::SuppressReverse => copy.reverse = ReverseAccessor::Suppressed,
        FieldRule::Copy => {}
    }

    // Many entries share a value, but lookups by it stay indexed
    if field.primary_key || field.unique {
        copy.primary_key = false;
        copy.unique = false;
        copy.indexed = true;
    }

    copy
}

// ============================================================================
// OPTIONS
// ============================================================================

/// Registration options: field allow-list, module override, editor table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryOptions {
    pub fields: Option<Vec<String>>,
    pub module: Option<String>,
    pub editor_table: String,
}

impl Default for HistoryOptions {
    fn default() -> Self {
        HistoryOptions {
            fields: None,
            module: None,
            editor_table: DEFAULT_EDITOR_TABLE.to_string(),
        }
    }
}

impl HistoryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: only track these fields (the primary key is always tracked)
    pub fn fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    /// Builder: register the history schema under another module
    pub fn module(mut self, module: impl Into<String>) -> Self {
        self.module = Some(module.into());
        self
    }

    /// Builder: table that `history_editor` references
    pub fn editor_table(mut self, table: impl Into<String>) -> Self {
        self.editor_table = table.into();
        self
    }
}

// ============================================================================
// HISTORICAL SCHEMA
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoricalSchema {
    /// `Historical<SourceName>`
    pub name: String,
    pub module: String,
    pub source_name: String,
    /// Source primary-key field; entries are scoped by its value
    pub key_field: String,
    /// Transformed important fields in source order, then the history fields
    pub fields: Vec<FieldDescriptor>,
    /// Default ordering, most recent first (`-` prefix: descending)
    pub ordering: Vec<String>,
}

impl HistoricalSchema {
    pub fn table_name(&self) -> String {
        format!("{}_{}", app_label(&self.module), self.name.to_lowercase())
    }

    /// The copied important fields (everything except the history metadata)
    pub fn tracked_fields(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields
            .iter()
            .filter(|f| !HISTORY_FIELDS.contains(&f.name.as_str()))
    }

    pub fn important_field_names(&self) -> Vec<&str> {
        self.tracked_fields().map(|f| f.name.as_str()).collect()
    }

    pub fn get_field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn key_kind(&self) -> FieldKind {
        self.get_field(&self.key_field)
            .map(|f| f.kind.clone())
            .unwrap_or(FieldKind::Integer)
    }

    pub fn display_label(&self, field: &str) -> String {
        self.get_field(field)
            .map(FieldDescriptor::display_label)
            .unwrap_or_else(|| field.replace('_', " "))
    }

    /// Important fields of `record`, each in the form its column stores
    ///
    /// Both change detection and writes go through this, so a value compares
    /// equal to the copy read back from the table.
    pub fn normalize(&self, record: &Record) -> Result<Record> {
        self.tracked_fields()
            .map(|field| -> Result<(String, FieldValue)> {
                let value = record.value(&field.name).coerce(&field.name, &field.kind)?;
                Ok((field.name.clone(), value))
            })
            .collect()
    }

    /// `ORDER BY` body for the default ordering
    pub fn order_by_sql(&self) -> String {
        self.ordering
            .iter()
            .map(|term| match term.strip_prefix('-') {
                Some(field) => format!("\"{}\" DESC", field),
                None => format!("\"{}\" ASC", term),
            })
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn create_table_sql(&self) -> String {
        let columns = self
            .fields
            .iter()
            .map(|field| match field.name.as_str() {
                HISTORY_TYPE => format!(
                    "{} CHECK (\"{}\" IN ('+', '~', '-'))",
                    field.column_sql(),
                    HISTORY_TYPE
                ),
                _ => field.column_sql(),
            })
            .collect::<Vec<_>>()
            .join(",\n    ");

        format!(
            "CREATE TABLE IF NOT EXISTS \"{}\" (\n    {}\n)",
            self.table_name(),
            columns
        )
    }

    /// One non-unique index per indexed or relation field
    pub fn create_index_sql(&self) -> Vec<String> {
        let table = self.table_name();
        self.fields
            .iter()
            .filter(|f| !f.primary_key && (f.indexed || f.kind.is_relation()))
            .map(|f| {
                format!(
                    "CREATE INDEX IF NOT EXISTS \"idx_{table}_{field}\" ON \"{table}\"(\"{field}\")",
                    table = table,
                    field = f.name
                )
            })
            .collect()
    }
}

// ============================================================================
// PROJECTION
// ============================================================================

/// A field is important iff it is the primary key, or there is no
/// allow-list, or the allow-list names it. Source order is preserved.
pub fn important_fields<'a>(
    source: &'a RecordSchema,
    allow: Option<&[String]>,
) -> Vec<&'a FieldDescriptor> {
    source
        .fields
        .iter()
        .filter(|f| f.primary_key || allow.map_or(true, |names| names.contains(&f.name)))
        .collect()
}

fn history_fields(source: &RecordSchema, editor_table: &str) -> Vec<FieldDescriptor> {
    let editor_accessor = format!("_{}_history_editor", source.name.to_lowercase());
    vec![
        FieldDescriptor::auto(HISTORY_ID),
        FieldDescriptor::timestamp(HISTORY_DATE),
        FieldDescriptor::text(HISTORY_TYPE),
        FieldDescriptor::many_to_one(HISTORY_EDITOR, editor_table)
            .nullable()
            .related_name(editor_accessor),
    ]
}

/// Build the `Historical<Name>` schema for `source`
pub fn project(source: &RecordSchema, options: &HistoryOptions) -> Result<HistoricalSchema> {
    let key = source.primary_key().ok_or_else(|| {
        conflict(format!("{} has no primary key to attach history to", source.name))
    })?;

    if let Some(reserved) = source
        .fields
        .iter()
        .find(|f| HISTORY_FIELDS.contains(&f.name.as_str()))
    {
        return Err(conflict(format!(
            "{} already has a field named {}",
            source.name, reserved.name
        )));
    }

    if let Some(allow) = &options.fields {
        if let Some(missing) = allow.iter().find(|name| source.get_field(name).is_none()) {
            return Err(HistoryError::UnknownField {
                schema: source.name.clone(),
                field: missing.clone(),
            });
        }
    }

    let mut fields: Vec<FieldDescriptor> = important_fields(source, options.fields.as_deref())
        .into_iter()
        .map(transform_field)
        .collect();
    fields.extend(history_fields(source, &options.editor_table));

    Ok(HistoricalSchema {
        name: format!("Historical{}", source.name),
        module: options.module.clone().unwrap_or_else(|| source.module.clone()),
        source_name: source.name.clone(),
        key_field: key.name.clone(),
        fields,
        ordering: vec![format!("-{}", HISTORY_ID)],
    })
}

// ============================================================================
// TESTS
// ============================================================================
