//! Test fixtures and party helpers.
//!
//! A [`TestParty`] is one database taking part in synchronization, backed
//! either by a shared [`MemoryStore`] or by a SQLite file in a temporary
//! directory. Helpers write rows the way an application would: directly
//! into the tables, leaving metadata to change detection.

use rowsync_protocol::{row_from, ColumnDef, ColumnType, PrimaryKey, Row, Schema, TableSchema, Value};
use rowsync_storage::{
    AdapterConfig, AdapterFactory, AdapterRegistry, AdapterResult, MemoryStore, StorageAdapter,
};
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

/// Schema with `categories` and `products`, shared by most scenarios.
pub fn catalog_schema() -> Schema {
    Schema::new()
        .with_table(TableSchema::new(
            "categories",
            "id",
            vec![
                ColumnDef::new("id", ColumnType::Integer),
                ColumnDef::new("name", ColumnType::Text),
                ColumnDef::new("description", ColumnType::Text).nullable(),
            ],
        ))
        .with_table(TableSchema::new(
            "products",
            "id",
            vec![
                ColumnDef::new("id", ColumnType::Integer),
                ColumnDef::new("name", ColumnType::Text),
                ColumnDef::new("price", ColumnType::Real).nullable(),
                ColumnDef::new("category_id", ColumnType::Integer).nullable(),
            ],
        ))
}

/// A `categories` row.
pub fn category(id: i64, name: &str) -> Row {
    row_from([
        ("id", Value::from(id)),
        ("name", Value::from(name)),
        ("description", Value::Null),
    ])
}

/// A `products` row.
pub fn product(id: i64, name: &str, price: f64, category_id: i64) -> Row {
    row_from([
        ("id", Value::from(id)),
        ("name", Value::from(name)),
        ("price", Value::from(price)),
        ("category_id", Value::from(category_id)),
    ])
}

/// One database with automatic cleanup.
pub struct TestParty {
    factory: AdapterFactory,
    store: Option<MemoryStore>,
    _temp_dir: Option<TempDir>,
    path: Option<PathBuf>,
}

impl std::fmt::Debug for TestParty {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestParty")
            .field("path", &self.path)
            .field("memory", &self.store.is_some())
            .finish()
    }
}

impl TestParty {
    /// Creates an empty in-memory party.
    pub fn memory() -> Self {
        let store = MemoryStore::new();
        let factory_store = store.clone();
        let factory: AdapterFactory = Arc::new(move || -> AdapterResult<Box<dyn StorageAdapter>> {
            Ok(Box::new(factory_store.adapter()))
        });
        Self {
            factory,
            store: Some(store),
            _temp_dir: None,
            path: None,
        }
    }

    /// Creates an empty SQLite party in a temporary directory.
    pub fn sqlite() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let path = temp_dir.path().join("party.db");
        let factory = AdapterRegistry::with_defaults()
            .resolve(&AdapterConfig::sqlite(&path))
            .expect("Failed to resolve sqlite backend");
        Self {
            factory,
            store: None,
            _temp_dir: Some(temp_dir),
            path: Some(path),
        }
    }

    /// Creates the tables of `schema`.
    pub fn with_schema(self, schema: &Schema) -> Self {
        self.open()
            .apply_schema(schema)
            .expect("Failed to apply schema");
        self
    }

    /// Opens a fresh adapter.
    pub fn open(&self) -> Box<dyn StorageAdapter> {
        (self.factory)().expect("Failed to open adapter")
    }

    /// Returns the factory for servers and agents.
    pub fn factory(&self) -> AdapterFactory {
        Arc::clone(&self.factory)
    }

    /// Returns the database file if SQLite-backed.
    pub fn path(&self) -> Option<PathBuf> {
        self.path.clone()
    }

    /// Returns the memory store if memory-backed.
    pub fn store(&self) -> Option<&MemoryStore> {
        self.store.as_ref()
    }

    /// Inserts or replaces a row without touching metadata.
    pub fn write(&self, table: &str, row: Row) {
        let mut adapter = self.open();
        let column = adapter
            .primary_key_column(table)
            .expect("Failed to read primary key column");
        let key = row
            .get(&column)
            .and_then(PrimaryKey::from_value)
            .expect("Row lacks a usable primary key");
        adapter.begin().expect("Failed to begin");
        adapter.upsert_row(table, &key, &row).expect("Failed to write row");
        adapter.commit().expect("Failed to commit");
    }

    /// Deletes a row without touching metadata.
    pub fn remove(&self, table: &str, key: impl Into<PrimaryKey>) {
        let mut adapter = self.open();
        adapter.begin().expect("Failed to begin");
        adapter
            .delete_row(table, &key.into())
            .expect("Failed to delete row");
        adapter.commit().expect("Failed to commit");
    }

    /// Returns every row of `table`, ordered by key.
    pub fn rows(&self, table: &str) -> Vec<Row> {
        let adapter = self.open();
        let mut rows: Vec<(PrimaryKey, Row)> = adapter
            .all_rows(table)
            .expect("Failed to scan table")
            .collect::<AdapterResult<_>>()
            .expect("Failed to read row");
        rows.sort_by(|a, b| a.0.cmp(&b.0));
        rows.into_iter().map(|(_, row)| row).collect()
    }

    /// Returns the revision counter.
    pub fn revision(&self) -> u64 {
        self.open().last_revision().expect("Failed to read revision")
    }
}

/// Test scenario helpers.
pub mod scenarios {
    use super::*;

    /// Category names used by seeded databases.
    pub const CATEGORY_NAMES: [&str; 8] = [
        "Beverages",
        "Condiments",
        "Confections",
        "Dairy Products",
        "Grains/Cereals",
        "Meat/Poultry",
        "Produce",
        "Seafood",
    ];

    /// Creates a memory server with the catalog schema and `count`
    /// categories.
    pub fn seeded_server(count: usize) -> TestParty {
        let party = TestParty::memory().with_schema(&catalog_schema());
        seed_categories(&party, count);
        party
    }

    /// Writes categories `1..=count`.
    pub fn seed_categories(party: &TestParty, count: usize) {
        for i in 0..count {
            let name = CATEGORY_NAMES[i % CATEGORY_NAMES.len()];
            party.write("categories", category(i as i64 + 1, name));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_party_round_trip() {
        let party = TestParty::memory().with_schema(&catalog_schema());
        party.write("categories", category(2, "Condiments"));
        party.write("categories", category(1, "Beverages"));
        assert_eq!(
            party.rows("categories"),
            vec![category(1, "Beverages"), category(2, "Condiments")]
        );
        party.remove("categories", 1);
        assert_eq!(party.rows("categories").len(), 1);
        assert!(party.path().is_none());
    }

    #[test]
    fn sqlite_party_round_trip() {
        let party = TestParty::sqlite().with_schema(&catalog_schema());
        party.write("products", product(1, "Chai", 18.0, 1));
        assert_eq!(party.rows("products"), vec![product(1, "Chai", 18.0, 1)]);
        assert!(party.path().unwrap().exists());
    }

    #[test]
    fn seeded_server_has_rows() {
        let party = scenarios::seeded_server(10);
        assert_eq!(party.rows("categories").len(), 10);
    }
}
