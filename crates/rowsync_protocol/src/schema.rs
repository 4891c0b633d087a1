//! Table definitions exchanged between parties.

use crate::value::{Row, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Logical column type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    /// 64-bit integer.
    Integer,
    /// Floating point.
    Real,
    /// Text.
    Text,
    /// Boolean.
    Boolean,
    /// UTC timestamp in milliseconds.
    Timestamp,
}

impl ColumnType {
    /// Returns true if `value` may be stored in a column of this type.
    /// NULL is accepted by every type; nullability is checked separately.
    pub fn accepts(self, value: &Value) -> bool {
        matches!(
            (self, value),
            (_, Value::Null)
                | (ColumnType::Integer, Value::Integer(_))
                | (ColumnType::Real, Value::Real(_))
                | (ColumnType::Real, Value::Integer(_))
                | (ColumnType::Text, Value::Text(_))
                | (ColumnType::Boolean, Value::Bool(_))
                | (ColumnType::Timestamp, Value::Timestamp(_))
        )
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ColumnType::Integer => "integer",
            ColumnType::Real => "real",
            ColumnType::Text => "text",
            ColumnType::Boolean => "boolean",
            ColumnType::Timestamp => "timestamp",
        };
        f.write_str(name)
    }
}

/// A column definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    /// Column name.
    pub name: String,
    /// Logical type.
    pub column_type: ColumnType,
    /// Whether NULL is allowed.
    #[serde(default)]
    pub nullable: bool,
}

impl ColumnDef {
    /// Creates a non-nullable column.
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            nullable: false,
        }
    }

    /// Marks the column nullable.
    #[must_use]
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }
}

/// A table definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    /// Table name.
    pub name: String,
    /// Columns in declaration order.
    pub columns: Vec<ColumnDef>,
    /// Name of the single primary key column.
    pub primary_key: String,
}

impl TableSchema {
    /// Creates a table definition.
    pub fn new(
        name: impl Into<String>,
        primary_key: impl Into<String>,
        columns: Vec<ColumnDef>,
    ) -> Self {
        Self {
            name: name.into(),
            columns,
            primary_key: primary_key.into(),
        }
    }

    /// Looks up a column by name.
    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Returns the column names in declaration order.
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Checks a row against this definition.
    pub fn check_row(&self, row: &Row) -> Result<(), String> {
        for (name, value) in row {
            let col = self
                .column(name)
                .ok_or_else(|| format!("unknown column {}.{name}", self.name))?;
            if value.is_null() && !col.nullable && col.name != self.primary_key {
                return Err(format!("column {}.{name} is not nullable", self.name));
            }
            if !col.column_type.accepts(value) {
                return Err(format!(
                    "column {}.{name} expects {}, got {}",
                    self.name,
                    col.column_type,
                    value.type_name()
                ));
            }
        }
        Ok(())
    }
}

/// A set of table definitions keyed by name.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Schema {
    tables: BTreeMap<String, TableSchema>,
}

impl Schema {
    /// Creates an empty schema.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a table definition.
    #[must_use]
    pub fn with_table(mut self, table: TableSchema) -> Self {
        self.insert(table);
        self
    }

    /// Adds or replaces a table definition.
    pub fn insert(&mut self, table: TableSchema) {
        self.tables.insert(table.name.clone(), table);
    }

    /// Looks up a table.
    pub fn table(&self, name: &str) -> Option<&TableSchema> {
        self.tables.get(name)
    }

    /// Iterates over the tables in name order.
    pub fn tables(&self) -> impl Iterator<Item = &TableSchema> {
        self.tables.values()
    }

    /// Returns true if the schema defines no tables.
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Returns a schema restricted to the named tables.
    pub fn subset<'a, I>(&self, names: I) -> Schema
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut out = Schema::new();
        for name in names {
            if let Some(t) = self.tables.get(name) {
                out.insert(t.clone());
            }
        }
        out
    }

    /// Describes how `other` differs from this schema for the named tables.
    /// Column order is ignored.
    pub fn differences<'a, I>(&self, other: &Schema, names: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut out = Vec::new();
        for name in names {
            match (self.table(name), other.table(name)) {
                (None, None) => out.push(format!("table {name} missing on both sides")),
                (Some(_), None) => out.push(format!("table {name} missing remotely")),
                (None, Some(_)) => out.push(format!("table {name} missing locally")),
                (Some(a), Some(b)) => {
                    if a.primary_key != b.primary_key {
                        out.push(format!(
                            "table {name}: primary key {} vs {}",
                            a.primary_key, b.primary_key
                        ));
                    }
                    let mut left: Vec<_> = a.columns.iter().collect();
                    let mut right: Vec<_> = b.columns.iter().collect();
                    left.sort_by(|x, y| x.name.cmp(&y.name));
                    right.sort_by(|x, y| x.name.cmp(&y.name));
                    if left != right {
                        out.push(format!("table {name}: column definitions differ"));
                    }
                }
            }
        }
        out
    }
}
