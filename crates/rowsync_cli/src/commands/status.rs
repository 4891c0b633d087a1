//! Status command implementation.

use serde::Serialize;
use std::path::Path;

/// Synchronization status of a database.
#[derive(Debug, Serialize)]
pub struct StatusReport {
    /// Database path.
    pub path: String,
    /// Role the database was initialized for.
    pub scope: Option<String>,
    /// Global revision on a server, sync anchor on a client.
    pub revision: u64,
    /// Per-table details.
    pub tables: Vec<TableStatus>,
}

/// Status of a single table.
#[derive(Debug, Serialize)]
pub struct TableStatus {
    /// Table name.
    pub name: String,
    /// Whether the metadata table exists.
    pub tracked: bool,
    /// Highest metadata revision.
    pub revision: u64,
    /// Rows with metadata.
    pub rows: usize,
    /// Rows deleted but remembered as tombstones.
    pub tombstones: usize,
    /// Local edits not yet synchronized.
    pub dirty: usize,
}

/// Collects the status of `tables`, or of every table when empty.
pub fn collect(path: &Path, tables: &[String]) -> Result<StatusReport, Box<dyn std::error::Error>> {
    let adapter = super::open(path)?;
    let names: Vec<String> = if tables.is_empty() {
        adapter
            .current_schema()?
            .tables()
            .map(|t| t.name.clone())
            .collect()
    } else {
        tables.to_vec()
    };

    let scope = adapter.scope()?;
    let mut report = StatusReport {
        path: path.display().to_string(),
        scope: scope.map(|s| s.to_string()),
        revision: if scope.is_some() { adapter.last_revision()? } else { 0 },
        tables: Vec::with_capacity(names.len()),
    };

    for name in names {
        let tracked = adapter.metadata_table_exists(&name)?;
        let mut status = TableStatus {
            name,
            tracked,
            revision: 0,
            rows: 0,
            tombstones: 0,
            dirty: 0,
        };
        if tracked {
            let entries = adapter.metadata_entries(&status.name)?;
            status.rows = entries.iter().filter(|e| e.exists).count();
            status.tombstones = entries.len() - status.rows;
            status.revision = adapter.table_revision(&status.name)?;
            status.dirty = adapter.changes_by_dirty_flag(&status.name)?.count();
        }
        report.tables.push(status);
    }
    Ok(report)
}

/// Runs the status command.
pub fn run(path: &Path, tables: &[String], format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let report = collect(path, tables)?;
    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        _ => {
            print_text_output(&report);
        }
    }
    Ok(())
}

fn print_text_output(report: &StatusReport) {
    println!("Database: {}", report.path);
    println!(
        "Scope:    {}",
        report.scope.as_deref().unwrap_or("not initialized")
    );
    println!("Revision: {}", report.revision);
    println!();
    println!(
        "{:<24} {:>10} {:>8} {:>11} {:>7}",
        "TABLE", "REVISION", "ROWS", "TOMBSTONES", "DIRTY"
    );
    for table in &report.tables {
        if table.tracked {
            println!(
                "{:<24} {:>10} {:>8} {:>11} {:>7}",
                table.name, table.revision, table.rows, table.tombstones, table.dirty
            );
        } else {
            println!("{:<24} (not tracked)", table.name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowsync_protocol::{
        row_from, ColumnDef, ColumnType, MetadataEntry, Role, Schema, TableSchema, Value,
    };
    use tempfile::TempDir;

    #[test]
    fn counts_dirty_rows_and_tombstones() {
        let dir = TempDir::new().unwrap();
        let db = dir.path().join("client.db");
        {
            let mut adapter = super::super::open(&db).unwrap();
            adapter
                .apply_schema(&Schema::new().with_table(TableSchema::new(
                    "categories",
                    "id",
                    vec![
                        ColumnDef::new("id", ColumnType::Integer),
                        ColumnDef::new("name", ColumnType::Text),
                    ],
                )))
                .unwrap();
            adapter.ensure_metadata_schema(Role::Client).unwrap();
            adapter.ensure_metadata_table("categories").unwrap();
            adapter.begin().unwrap();
            adapter
                .upsert_row(
                    "categories",
                    &1.into(),
                    &row_from([("id", Value::from(1)), ("name", Value::from("Beverages"))]),
                )
                .unwrap();
            adapter
                .upsert_metadata(&MetadataEntry::live("categories", 1, 0, "aa"), true)
                .unwrap();
            adapter
                .upsert_metadata(&MetadataEntry::tombstone("categories", 2, 3), false)
                .unwrap();
            adapter.commit().unwrap();
        }

        let report = collect(&db, &[]).unwrap();
        assert_eq!(report.scope.as_deref(), Some("client"));
        let table = &report.tables[0];
        assert!(table.tracked);
        assert_eq!((table.rows, table.tombstones, table.dirty), (1, 1, 1));
        assert_eq!(table.revision, 3);

        let missing = collect(&db, &["orders".to_string()]).unwrap();
        assert!(!missing.tables[0].tracked);
    }
}
