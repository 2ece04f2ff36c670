// 📐 Shape Layer - Record schemas
// Field descriptors and the source schemas that history tracking attaches to

use serde::{Deserialize, Serialize};

// ============================================================================
// FIELD KINDS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldKind {
    /// Auto-incrementing integer identity
    AutoIncrement,
    Integer,
    Real,
    Text,
    Boolean,
    Timestamp,
    /// Many-to-one relation (foreign key) to another schema
    ManyToOne { target: String },
    /// One-to-one relation (unique foreign key) to another schema
    OneToOne { target: String },
}

/// Payload-free discriminant of `FieldKind`, used as the key of rule tables
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KindTag {
    AutoIncrement,
    Integer,
    Real,
    Text,
    Boolean,
    Timestamp,
    ManyToOne,
    OneToOne,
}

/// How a value of some kind is stored in SQLite
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Storage {
    Integer,
    Real,
    Text,
    Boolean,
    Timestamp,
}

impl Storage {
    pub fn name(&self) -> &'static str {
        match self {
            Storage::Integer => "integer",
            Storage::Real => "real",
            Storage::Text => "text",
            Storage::Boolean => "boolean",
            Storage::Timestamp => "timestamp",
        }
    }
}

impl FieldKind {
    pub fn tag(&self) -> KindTag {
        match self {
            FieldKind::AutoIncrement => KindTag::AutoIncrement,
            FieldKind::Integer => KindTag::Integer,
            FieldKind::Real => KindTag::Real,
            FieldKind::Text => KindTag::Text,
            FieldKind::Boolean => KindTag::Boolean,
            FieldKind::Timestamp => KindTag::Timestamp,
            FieldKind::ManyToOne { .. } => KindTag::ManyToOne,
            FieldKind::OneToOne { .. } => KindTag::OneToOne,
        }
    }

    pub fn storage(&self) -> Storage {
        match self {
            FieldKind::AutoIncrement
            | FieldKind::Integer
            | FieldKind::ManyToOne { .. }
            | FieldKind::OneToOne { .. } => Storage::Integer,
            FieldKind::Real => Storage::Real,
            FieldKind::Text => Storage::Text,
            FieldKind::Boolean => Storage::Boolean,
            FieldKind::Timestamp => Storage::Timestamp,
        }
    }

    /// Declared SQLite column type
    ///
    /// `BOOLEAN` and `TIMESTAMP` get NUMERIC affinity, which keeps 0/1
    /// integers and RFC 3339 text unchanged.
    pub fn sql_type(&self) -> &'static str {
        match self.storage() {
            Storage::Integer => "INTEGER",
            Storage::Real => "REAL",
            Storage::Text => "TEXT",
            Storage::Boolean => "BOOLEAN",
            Storage::Timestamp => "TIMESTAMP",
        }
    }

    pub fn target(&self) -> Option<&str> {
        match self {
            FieldKind::ManyToOne { target } | FieldKind::OneToOne { target } => Some(target),
            _ => None,
        }
    }

    pub fn is_relation(&self) -> bool {
        self.target().is_some()
    }
}

// ============================================================================
// FIELD DESCRIPTOR
// ============================================================================

/// Name of the reverse accessor a relation installs on its target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReverseAccessor {
    /// Derived from the owning schema's name
    Default,
    Named(String),
    /// No reverse accessor at all
    Suppressed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub name: String,
    pub kind: FieldKind,
    pub primary_key: bool,
    pub unique: bool,
    pub nullable: bool,
    /// Non-unique secondary index
    pub indexed: bool,
    /// Human-readable label; defaults to the name with underscores as spaces
    pub verbose_name: Option<String>,
    pub reverse: ReverseAccessor,
}

impl FieldDescriptor {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        FieldDescriptor {
            name: name.into(),
            kind,
            primary_key: false,
            unique: false,
            nullable: false,
            indexed: false,
            verbose_name: None,
            reverse: ReverseAccessor::Default,
        }
    }

    /// Auto-incrementing primary key, the usual `id` column
    pub fn auto(name: impl Into<String>) -> Self {
        FieldDescriptor::new(name, FieldKind::AutoIncrement).primary_key()
    }

    pub fn integer(name: impl Into<String>) -> Self {
        FieldDescriptor::new(name, FieldKind::Integer)
    }

    pub fn real(name: impl Into<String>) -> Self {
        FieldDescriptor::new(name, FieldKind::Real)
    }

    pub fn text(name: impl Into<String>) -> Self {
        FieldDescriptor::new(name, FieldKind::Text)
    }

    pub fn boolean(name: impl Into<String>) -> Self {
        FieldDescriptor::new(name, FieldKind::Boolean)
    }

    pub fn timestamp(name: impl Into<String>) -> Self {
        FieldDescriptor::new(name, FieldKind::Timestamp)
    }

    pub fn many_to_one(name: impl Into<String>, target: impl Into<String>) -> Self {
        FieldDescriptor::new(name, FieldKind::ManyToOne { target: target.into() })
    }

    pub fn one_to_one(name: impl Into<String>, target: impl Into<String>) -> Self {
        FieldDescriptor::new(name, FieldKind::OneToOne { target: target.into() })
    }

    /// Builder: mark as primary key
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    /// Builder: mark as unique
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Builder: allow NULL
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// Builder: add a non-unique index
    pub fn indexed(mut self) -> Self {
        self.indexed = true;
        self
    }

    /// Builder: human-readable label
    pub fn verbose_name(mut self, label: impl Into<String>) -> Self {
        self.verbose_name = Some(label.into());
        self
    }

    /// Builder: reverse accessor name on the relation target
    pub fn related_name(mut self, name: impl Into<String>) -> Self {
        self.reverse = ReverseAccessor::Named(name.into());
        self
    }

    pub fn display_label(&self) -> String {
        self.verbose_name
            .clone()
            .unwrap_or_else(|| self.name.replace('_', " "))
    }

    /// Column definition for CREATE TABLE (without trailing comma)
    pub fn column_sql(&self) -> String {
        let mut column = format!("\"{}\" {}", self.name, self.kind.sql_type());
        if self.primary_key {
            column.push_str(" PRIMARY KEY");
            if self.kind == FieldKind::AutoIncrement {
                column.push_str(" AUTOINCREMENT");
            }
        } else {
            if !self.nullable {
                column.push_str(" NOT NULL");
            }
            if self.unique {
                column.push_str(" UNIQUE");
            }
        }
        column
    }
}

// ============================================================================
// RECORD SCHEMA
// ============================================================================

/// Schema of a tracked record: ordered fields within a logical module
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordSchema {
    pub name: String,
    /// Logical module the schema belongs to, e.g. `shop.models`
    pub module: String,
    pub fields: Vec<FieldDescriptor>,
}

impl RecordSchema {
    pub fn new(name: impl Into<String>, module: impl Into<String>) -> Self {
        RecordSchema {
            name: name.into(),
            module: module.into(),
            fields: Vec::new(),
        }
    }

    /// Builder: append a field
    pub fn field(mut self, field: FieldDescriptor) -> Self {
        self.fields.push(field);
        self
    }

    pub fn get_field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn primary_key(&self) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.primary_key)
    }

    pub fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }

    pub fn app_label(&self) -> String {
        app_label(&self.module)
    }

    pub fn table_name(&self) -> String {
        format!("{}_{}", self.app_label(), self.name.to_lowercase())
    }
}

/// Application label of a module path: `shop.models` -> `shop`, `crm` -> `crm`
pub fn app_label(module: &str) -> String {
    let segments: Vec<&str> = module.split('.').filter(|s| !s.is_empty()).collect();
    match segments.as_slice() {
        [] => module.to_string(),
        [.., parent, "models"] => parent.to_string(),
        [.., last] => last.to_string(),
    }
}

// ============================================================================
// TESTS
// ============================================================================
