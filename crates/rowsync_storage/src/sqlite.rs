//! SQLite adapter.

use crate::adapter::{ChangeStream, IsolationLevel, RowStream, StorageAdapter};
use crate::config::AdapterConfig;
use crate::error::{AdapterError, AdapterResult};
use crate::registry::AdapterFactory;
use parking_lot::RwLock;
use rowsync_protocol::{
    ColumnDef, ColumnType, MetadataEntry, PrimaryKey, Revision, Role, Row, Schema, TableSchema,
    Value,
};
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};

const REVISION_TABLE: &str = "rowsync_revision";

const CONNECTION_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
"#;

const INIT_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS rowsync_revision (
    id INTEGER PRIMARY KEY CHECK (id = 0),
    revision INTEGER NOT NULL,
    scope TEXT NOT NULL
);
"#;

#[derive(Debug)]
struct TableInfo {
    columns: Vec<ColumnDef>,
    primary_key: String,
}

impl TableInfo {
    fn column_type(&self, name: &str) -> Option<ColumnType> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.column_type)
    }
}

/// Adapter over a SQLite database.
///
/// Transactions use `BEGIN IMMEDIATE`, so at most one writer holds the
/// database at a time and a competing writer fails with
/// [`AdapterError::TransactionAborted`] once the busy timeout expires.
pub struct SqliteAdapter {
    conn: Connection,
    suffix: String,
    isolation: IsolationLevel,
    in_transaction: bool,
    tables: RwLock<HashMap<String, Arc<TableInfo>>>,
}

impl SqliteAdapter {
    /// Opens the database named by `config.location`, or an in-memory
    /// database when no location is set.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::Instantiation`] if the database cannot be
    /// opened or configured.
    pub fn open(config: &AdapterConfig) -> AdapterResult<Self> {
        let conn = match &config.location {
            Some(path) => Connection::open(path),
            None => Connection::open_in_memory(),
        }
        .map_err(|e| AdapterError::Instantiation(e.to_string()))?;
        Self::from_connection(conn, config)
    }

    /// Opens a private in-memory database with default settings.
    pub fn open_in_memory() -> AdapterResult<Self> {
        Self::open(&AdapterConfig::default().with_backend("sqlite"))
    }

    /// Adopts an existing connection.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::Instantiation`] if the connection cannot be
    /// configured.
    pub fn from_connection(conn: Connection, config: &AdapterConfig) -> AdapterResult<Self> {
        let setup = |conn: &Connection| -> rusqlite::Result<IsolationLevel> {
            conn.busy_timeout(config.busy_timeout)?;
            conn.execute_batch(CONNECTION_SQL)?;
            conn.pragma_update(None, "read_uncommitted", false)?;
            let dirty_reads: bool =
                conn.pragma_query_value(None, "read_uncommitted", |row| row.get(0))?;
            Ok(if dirty_reads {
                IsolationLevel::ReadCommitted
            } else {
                IsolationLevel::Serializable
            })
        };
        let isolation = setup(&conn).map_err(|e| AdapterError::Instantiation(e.to_string()))?;
        if isolation < IsolationLevel::Serializable {
            warn!(?isolation, "sqlite connection cannot disable read_uncommitted");
        }
        Ok(Self {
            conn,
            suffix: config.metadata_suffix.clone(),
            isolation,
            in_transaction: false,
            tables: RwLock::new(HashMap::new()),
        })
    }

    /// Returns a factory opening a new connection to the same file for
    /// every adapter.
    ///
    /// # Errors
    ///
    /// In-memory databases are private to one connection, so a config
    /// without a location is rejected with [`AdapterError::Instantiation`].
    pub fn factory(config: &AdapterConfig) -> AdapterResult<AdapterFactory> {
        if config.location.is_none() {
            return Err(AdapterError::Instantiation(
                "sqlite factory requires a database file".to_string(),
            ));
        }
        let config = config.clone();
        Ok(Arc::new(move || -> AdapterResult<Box<dyn StorageAdapter>> {
            Ok(Box::new(SqliteAdapter::open(&config)?))
        }))
    }

    /// Returns the underlying connection.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    fn meta_table(&self, table: &str) -> String {
        quote(&format!("{table}{}", self.suffix))
    }

    fn require_transaction(&self) -> AdapterResult<()> {
        if self.in_transaction {
            Ok(())
        } else {
            Err(AdapterError::NoTransaction)
        }
    }

    fn table_exists(&self, name: &str) -> AdapterResult<bool> {
        let found = self
            .conn
            .query_row(
                "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
                params![name],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn table_info(&self, table: &str) -> AdapterResult<Arc<TableInfo>> {
        if let Some(info) = self.tables.read().get(table) {
            return Ok(Arc::clone(info));
        }

        let mut stmt = self
            .conn
            .prepare(&format!("PRAGMA table_info({})", quote(table)))?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, bool>(3)?,
                    row.get::<_, i64>(5)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        if rows.is_empty() {
            return Err(AdapterError::UnknownTable(table.to_string()));
        }

        let mut columns = Vec::with_capacity(rows.len());
        let mut keys = Vec::new();
        for (name, decl, not_null, pk) in rows {
            let column_type = column_type_from_decl(&decl).ok_or_else(|| {
                AdapterError::SchemaConversion(format!(
                    "column {table}.{name} has unsupported type '{decl}'"
                ))
            })?;
            if pk > 0 {
                keys.push(name.clone());
            }
            columns.push(ColumnDef {
                name,
                column_type,
                nullable: !not_null && pk == 0,
            });
        }
        let primary_key = match keys.as_slice() {
            [key] => key.clone(),
            _ => {
                return Err(AdapterError::SchemaConversion(format!(
                    "table {table} must have exactly one primary key column"
                )))
            }
        };

        let info = Arc::new(TableInfo {
            columns,
            primary_key,
        });
        self.tables
            .write()
            .insert(table.to_string(), Arc::clone(&info));
        Ok(info)
    }

    /// Lists application tables. A `<table><suffix>` table counts as
    /// metadata only while `<table>` exists.
    fn user_tables(&self) -> AdapterResult<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<BTreeSet<_>, _>>()?;
        let is_metadata = |name: &str| {
            name.strip_suffix(self.suffix.as_str())
                .is_some_and(|base| !base.is_empty() && names.contains(base))
        };
        Ok(names
            .iter()
            .filter(|n| n.as_str() != REVISION_TABLE && !is_metadata(n.as_str()))
            .cloned()
            .collect())
    }

    fn query_metadata(&self, table: &str, filter: &str) -> AdapterResult<Vec<MetadataEntry>> {
        let sql = format!(
            "SELECT pk, revision, present, fingerprint FROM {} {filter} ORDER BY revision",
            self.meta_table(table)
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let entries = stmt
            .query_map([], |row| {
                Ok(MetadataEntry {
                    table: table.to_string(),
                    primary_key: key_from_ref(row.get_ref(0)?)?,
                    revision: row.get(1)?,
                    exists: row.get(2)?,
                    fingerprint: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }
}

impl StorageAdapter for SqliteAdapter {
    fn backend(&self) -> &'static str {
        "sqlite"
    }

    fn isolation(&self) -> IsolationLevel {
        self.isolation
    }

    fn metadata_suffix(&self) -> &str {
        &self.suffix
    }

    fn ensure_metadata_schema(&mut self, scope: Role) -> AdapterResult<()> {
        self.conn.execute_batch(INIT_SQL)?;
        let existing: Option<String> = self
            .conn
            .query_row(
                "SELECT scope FROM rowsync_revision WHERE id = 0",
                [],
                |row| row.get(0),
            )
            .optional()?;
        match existing {
            None => {
                self.conn.execute(
                    "INSERT INTO rowsync_revision (id, revision, scope) VALUES (0, 0, ?1)",
                    params![scope.to_string()],
                )?;
                info!(%scope, "initialized sqlite metadata schema");
                Ok(())
            }
            Some(found) if found == scope.to_string() => Ok(()),
            Some(found) => Err(AdapterError::Backend(format!(
                "database already initialized for {found}"
            ))),
        }
    }

    fn scope(&self) -> AdapterResult<Option<Role>> {
        if !self.table_exists(REVISION_TABLE)? {
            return Ok(None);
        }
        let scope: Option<String> = self
            .conn
            .query_row(
                "SELECT scope FROM rowsync_revision WHERE id = 0",
                [],
                |row| row.get(0),
            )
            .optional()?;
        Ok(match scope.as_deref() {
            Some("server") => Some(Role::Server),
            Some("client") => Some(Role::Client),
            _ => None,
        })
    }

    fn ensure_metadata_table(&mut self, table: &str) -> AdapterResult<()> {
        self.table_info(table)?;
        let meta = self.meta_table(table);
        let index = quote(&format!("{table}{}_revision", self.suffix));
        self.conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {meta} (
                pk PRIMARY KEY NOT NULL,
                revision INTEGER NOT NULL,
                dirty INTEGER NOT NULL DEFAULT 0,
                present INTEGER NOT NULL DEFAULT 1,
                fingerprint TEXT NOT NULL DEFAULT ''
            );
            CREATE INDEX IF NOT EXISTS {index} ON {meta}(revision);"
        ))?;
        Ok(())
    }

    fn metadata_table_exists(&self, table: &str) -> AdapterResult<bool> {
        self.table_exists(&format!("{table}{}", self.suffix))
    }

    fn next_revision(&mut self) -> AdapterResult<Revision> {
        self.require_transaction()?;
        let revision = self.conn.query_row(
            "UPDATE rowsync_revision SET revision = revision + 1 WHERE id = 0 RETURNING revision",
            [],
            |row| row.get(0),
        )?;
        Ok(revision)
    }

    fn last_revision(&self) -> AdapterResult<Revision> {
        let revision: Option<Revision> = self
            .conn
            .query_row(
                "SELECT revision FROM rowsync_revision WHERE id = 0",
                [],
                |row| row.get(0),
            )
            .optional()?;
        Ok(revision.unwrap_or(0))
    }

    fn set_last_revision(&mut self, revision: Revision) -> AdapterResult<()> {
        self.require_transaction()?;
        let current = self.last_revision()?;
        if revision < current {
            return Err(AdapterError::Backend(format!(
                "cannot rewind revision from {current} to {revision}"
            )));
        }
        self.conn.execute(
            "UPDATE rowsync_revision SET revision = ?1 WHERE id = 0",
            params![revision],
        )?;
        Ok(())
    }

    fn table_revision(&self, table: &str) -> AdapterResult<Revision> {
        let revision = self.conn.query_row(
            &format!(
                "SELECT COALESCE(MAX(revision), 0) FROM {}",
                self.meta_table(table)
            ),
            [],
            |row| row.get(0),
        )?;
        Ok(revision)
    }

    fn changes_since(&self, table: &str, since: Revision) -> AdapterResult<ChangeStream<'_>> {
        let entries = self.query_metadata(table, &format!("WHERE revision > {since}"))?;
        Ok(ChangeStream::new(self, entries))
    }

    fn changes_by_dirty_flag(&self, table: &str) -> AdapterResult<ChangeStream<'_>> {
        let entries = self.query_metadata(table, "WHERE dirty = 1")?;
        Ok(ChangeStream::new(self, entries))
    }

    fn deleted_rows(&self, table: &str) -> AdapterResult<ChangeStream<'_>> {
        let entries = self.query_metadata(table, "WHERE present = 0")?;
        Ok(ChangeStream::new(self, entries))
    }

    fn all_rows(&self, table: &str) -> AdapterResult<RowStream<'_>> {
        let info = self.table_info(table)?;
        let pk = quote(&info.primary_key);
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {pk} FROM {} ORDER BY {pk}", quote(table)))?;
        let keys = stmt
            .query_map([], |row| key_from_ref(row.get_ref(0)?))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(RowStream::new(self, table, keys))
    }

    fn row_by_key(&self, table: &str, key: &PrimaryKey) -> AdapterResult<Option<Row>> {
        let info = self.table_info(table)?;
        let columns: Vec<String> = info.columns.iter().map(|c| quote(&c.name)).collect();
        let sql = format!(
            "SELECT {} FROM {} WHERE {} = ?1",
            columns.join(", "),
            quote(table),
            quote(&info.primary_key)
        );
        let raw: Option<Vec<SqlValue>> = self
            .conn
            .query_row(&sql, params![key_to_sql(key)], |row| {
                (0..info.columns.len())
                    .map(|i| row.get::<_, SqlValue>(i))
                    .collect()
            })
            .optional()?;
        let Some(raw) = raw else {
            return Ok(None);
        };
        info.columns
            .iter()
            .zip(raw)
            .map(|(col, value)| Ok((col.name.clone(), value_from_sql(value, col.column_type)?)))
            .collect::<AdapterResult<Row>>()
            .map(Some)
    }

    fn metadata(&self, table: &str, key: &PrimaryKey) -> AdapterResult<Option<MetadataEntry>> {
        let sql = format!(
            "SELECT revision, present, fingerprint FROM {} WHERE pk = ?1",
            self.meta_table(table)
        );
        let entry = self
            .conn
            .query_row(&sql, params![key_to_sql(key)], |row| {
                Ok(MetadataEntry {
                    table: table.to_string(),
                    primary_key: key.clone(),
                    revision: row.get(0)?,
                    exists: row.get(1)?,
                    fingerprint: row.get(2)?,
                })
            })
            .optional()?;
        Ok(entry)
    }

    fn metadata_entries(&self, table: &str) -> AdapterResult<Vec<MetadataEntry>> {
        self.query_metadata(table, "")
    }

    fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    fn begin(&mut self) -> AdapterResult<()> {
        if self.in_transaction {
            return Err(AdapterError::TransactionActive);
        }
        self.conn.execute_batch("BEGIN IMMEDIATE")?;
        self.in_transaction = true;
        Ok(())
    }

    fn upsert_metadata(&mut self, entry: &MetadataEntry, dirty: bool) -> AdapterResult<()> {
        self.require_transaction()?;
        let sql = format!(
            "INSERT INTO {} (pk, revision, dirty, present, fingerprint)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(pk) DO UPDATE SET
                revision = excluded.revision,
                dirty = excluded.dirty,
                present = excluded.present,
                fingerprint = excluded.fingerprint",
            self.meta_table(&entry.table)
        );
        self.conn.execute(
            &sql,
            params![
                key_to_sql(&entry.primary_key),
                entry.revision,
                dirty,
                entry.exists,
                entry.fingerprint,
            ],
        )?;
        Ok(())
    }

    fn upsert_row(&mut self, table: &str, key: &PrimaryKey, data: &Row) -> AdapterResult<()> {
        self.require_transaction()?;
        let info = self.table_info(table)?;

        let mut row = data.clone();
        row.insert(info.primary_key.clone(), Value::from(key.clone()));

        let mut names = Vec::with_capacity(row.len());
        let mut values = Vec::with_capacity(row.len());
        for (name, value) in &row {
            if info.column_type(name).is_none() {
                return Err(AdapterError::Backend(format!(
                    "unknown column {table}.{name}"
                )));
            }
            names.push(quote(name));
            values.push(value_to_sql(value));
        }

        let pk = quote(&info.primary_key);
        let placeholders: Vec<String> = (1..=values.len()).map(|i| format!("?{i}")).collect();
        let updates: Vec<String> = names
            .iter()
            .filter(|n| **n != pk)
            .map(|n| format!("{n} = excluded.{n}"))
            .collect();
        let on_conflict = if updates.is_empty() {
            "DO NOTHING".to_string()
        } else {
            format!("DO UPDATE SET {}", updates.join(", "))
        };
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT({pk}) {on_conflict}",
            quote(table),
            names.join(", "),
            placeholders.join(", "),
        );
        self.conn.execute(&sql, params_from_iter(values))?;
        Ok(())
    }

    fn delete_row(&mut self, table: &str, key: &PrimaryKey) -> AdapterResult<()> {
        self.require_transaction()?;
        let info = self.table_info(table)?;
        self.conn.execute(
            &format!(
                "DELETE FROM {} WHERE {} = ?1",
                quote(table),
                quote(&info.primary_key)
            ),
            params![key_to_sql(key)],
        )?;
        Ok(())
    }

    fn advance_revision(
        &mut self,
        table: &str,
        key: &PrimaryKey,
        revision: Revision,
    ) -> AdapterResult<()> {
        self.require_transaction()?;
        self.conn.execute(
            &format!(
                "UPDATE {} SET revision = ?1, dirty = 0 WHERE pk = ?2",
                self.meta_table(table)
            ),
            params![revision, key_to_sql(key)],
        )?;
        Ok(())
    }

    fn commit(&mut self) -> AdapterResult<()> {
        self.require_transaction()?;
        self.in_transaction = false;
        if let Err(err) = self.conn.execute_batch("COMMIT") {
            if let Err(rollback) = self.conn.execute_batch("ROLLBACK") {
                debug!(error = %rollback, "rollback after failed commit");
            }
            return Err(err.into());
        }
        Ok(())
    }

    fn rollback(&mut self) -> AdapterResult<()> {
        if self.in_transaction {
            self.in_transaction = false;
            self.conn.execute_batch("ROLLBACK")?;
            // Definitions read inside the transaction may be gone.
            self.tables.write().clear();
        }
        Ok(())
    }

    fn primary_key_column(&self, table: &str) -> AdapterResult<String> {
        Ok(self.table_info(table)?.primary_key.clone())
    }

    fn column_names(&self, table: &str) -> AdapterResult<Vec<String>> {
        Ok(self
            .table_info(table)?
            .columns
            .iter()
            .map(|c| c.name.clone())
            .collect())
    }

    fn current_schema(&self) -> AdapterResult<Schema> {
        let mut schema = Schema::new();
        for name in self.user_tables()? {
            let info = match self.table_info(&name) {
                Ok(info) => info,
                Err(AdapterError::SchemaConversion(reason)) => {
                    warn!(table = %name, %reason, "skipping table");
                    continue;
                }
                Err(e) => return Err(e),
            };
            schema.insert(TableSchema::new(
                name,
                info.primary_key.clone(),
                info.columns.clone(),
            ));
        }
        Ok(schema)
    }

    fn schema_for(&self, tables: &[String]) -> AdapterResult<Schema> {
        let mut schema = Schema::new();
        for name in tables {
            if !self.table_exists(name)? {
                continue;
            }
            let info = self.table_info(name)?;
            schema.insert(TableSchema::new(
                name.clone(),
                info.primary_key.clone(),
                info.columns.clone(),
            ));
        }
        Ok(schema)
    }

    fn apply_schema(&mut self, schema: &Schema) -> AdapterResult<()> {
        for table in schema.tables() {
            if self.table_exists(&table.name)? {
                continue;
            }
            if table.column(&table.primary_key).is_none() {
                return Err(AdapterError::SchemaConversion(format!(
                    "table {} has no column for key {}",
                    table.name, table.primary_key
                )));
            }
            let columns: Vec<String> = table
                .columns
                .iter()
                .map(|c| {
                    let mut def = format!("{} {}", quote(&c.name), decl_for(c.column_type));
                    if c.name == table.primary_key {
                        def.push_str(" NOT NULL PRIMARY KEY");
                    } else if !c.nullable {
                        def.push_str(" NOT NULL");
                    }
                    def
                })
                .collect();
            self.conn.execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {} ({})",
                quote(&table.name),
                columns.join(", ")
            ))?;
            info!(table = %table.name, "created table from schema");
        }
        self.tables.write().clear();
        Ok(())
    }

    fn has_schema(&self) -> AdapterResult<bool> {
        Ok(!self.user_tables()?.is_empty())
    }
}

fn quote(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

fn column_type_from_decl(decl: &str) -> Option<ColumnType> {
    let decl = decl.to_ascii_uppercase();
    if decl.contains("BOOL") {
        Some(ColumnType::Boolean)
    } else if decl.contains("TIMESTAMP") || decl.contains("DATETIME") {
        Some(ColumnType::Timestamp)
    } else if decl.contains("INT") {
        Some(ColumnType::Integer)
    } else if decl.contains("CHAR") || decl.contains("CLOB") || decl.contains("TEXT") {
        Some(ColumnType::Text)
    } else if ["REAL", "FLOA", "DOUB", "NUMERIC", "DECIMAL"]
        .iter()
        .any(|t| decl.contains(t))
    {
        Some(ColumnType::Real)
    } else {
        None
    }
}

fn decl_for(column_type: ColumnType) -> &'static str {
    match column_type {
        ColumnType::Integer => "INTEGER",
        ColumnType::Real => "REAL",
        ColumnType::Text => "TEXT",
        ColumnType::Boolean => "BOOLEAN",
        ColumnType::Timestamp => "TIMESTAMP",
    }
}

fn key_to_sql(key: &PrimaryKey) -> SqlValue {
    match key {
        PrimaryKey::Integer(i) => SqlValue::Integer(*i),
        PrimaryKey::Text(s) => SqlValue::Text(s.clone()),
    }
}

fn key_from_ref(value: ValueRef<'_>) -> rusqlite::Result<PrimaryKey> {
    match value {
        ValueRef::Integer(i) => Ok(PrimaryKey::Integer(i)),
        ValueRef::Text(t) => Ok(PrimaryKey::Text(String::from_utf8_lossy(t).into_owned())),
        other => Err(rusqlite::Error::FromSqlConversionFailure(
            0,
            other.data_type(),
            "primary keys must be integer or text".into(),
        )),
    }
}

fn value_to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Integer(i) | Value::Timestamp(i) => SqlValue::Integer(*i),
        Value::Real(f) => SqlValue::Real(*f),
        Value::Text(s) => SqlValue::Text(s.clone()),
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
    }
}

fn value_from_sql(value: SqlValue, column_type: ColumnType) -> AdapterResult<Value> {
    Ok(match (value, column_type) {
        (SqlValue::Null, _) => Value::Null,
        (SqlValue::Integer(i), ColumnType::Boolean) => Value::Bool(i != 0),
        (SqlValue::Integer(i), ColumnType::Timestamp) => Value::Timestamp(i),
        (SqlValue::Integer(i), ColumnType::Real) => Value::Real(i as f64),
        (SqlValue::Integer(i), _) => Value::Integer(i),
        (SqlValue::Real(f), _) => Value::Real(f),
        (SqlValue::Text(s), _) => Value::Text(s),
        (SqlValue::Blob(_), _) => {
            return Err(AdapterError::Backend(
                "blob columns are not supported".to_string(),
            ))
        }
    })
}
