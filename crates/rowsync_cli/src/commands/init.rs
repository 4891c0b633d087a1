//! Init command implementation.

use rowsync_protocol::{JsonCodec, Role, Schema};
use std::path::Path;

/// Prepares the database at `path` for synchronization.
///
/// Tables from `schema_file` are created first. Metadata is then ensured
/// for every application table. Returns the tables prepared.
pub fn prepare(
    path: &Path,
    role: Role,
    schema_file: Option<&Path>,
) -> Result<Vec<String>, Box<dyn std::error::Error>> {
    let mut adapter = super::open(path)?;
    if let Some(file) = schema_file {
        let schema = Schema::decode(&std::fs::read(file)?)?;
        adapter.apply_schema(&schema)?;
    }

    adapter.ensure_metadata_schema(role)?;
    let tables: Vec<String> = adapter
        .current_schema()?
        .tables()
        .map(|t| t.name.clone())
        .collect();
    for table in &tables {
        adapter.ensure_metadata_table(table)?;
    }
    Ok(tables)
}

/// Runs the init command.
pub fn run(
    path: &Path,
    role: Role,
    schema_file: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    let tables = prepare(path, role, schema_file)?;
    println!("Initialized {} as {role}", path.display());
    for table in &tables {
        println!("  {table}");
    }
    if tables.is_empty() {
        println!("  (no tables)");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowsync_protocol::{ColumnDef, ColumnType, TableSchema};
    use tempfile::TempDir;

    #[test]
    fn init_from_schema_file() {
        let dir = TempDir::new().unwrap();
        let db = dir.path().join("server.db");
        let schema_file = dir.path().join("schema.json");
        let schema = Schema::new().with_table(TableSchema::new(
            "categories",
            "id",
            vec![
                ColumnDef::new("id", ColumnType::Integer),
                ColumnDef::new("name", ColumnType::Text),
            ],
        ));
        std::fs::write(&schema_file, schema.encode().unwrap()).unwrap();

        let tables = prepare(&db, Role::Server, Some(&schema_file)).unwrap();
        assert_eq!(tables, vec!["categories"]);

        let adapter = super::super::open(&db).unwrap();
        assert_eq!(adapter.scope().unwrap(), Some(Role::Server));
        assert!(adapter.metadata_table_exists("categories").unwrap());
    }

    #[test]
    fn init_rejects_role_change() {
        let dir = TempDir::new().unwrap();
        let db = dir.path().join("client.db");
        prepare(&db, Role::Client, None).unwrap();
        assert!(prepare(&db, Role::Server, None).is_err());
    }
}
