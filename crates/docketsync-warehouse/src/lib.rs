//! # Docketsync Warehouse
//!
//! DuckDB-backed durable store for harvested header and detail records.
//!
//! Each entity type (dockets, documents, comments) owns two tables:
//!
//! | Table | Description |
//! |-------|-------------|
//! | `<entity>_header` | Listing records, one row per identifier, ordered by `sort_key` |
//! | `<entity>_detail` | Full records fetched one identifier at a time |
//! | `harvest_runs` | One ledger row per header or detail run |
//!
//! Writes are idempotent: a row whose identifier already exists is skipped,
//! so replaying a batch after a crash never duplicates data.
//!
//! ```rust,no_run
//! use docketsync_warehouse::{ItemRow, Warehouse, WarehouseConfig};
//!
//! let warehouse = Warehouse::open(WarehouseConfig::at("/tmp/docketsync.duckdb"))?;
//! let rows = vec![ItemRow {
//!     item_id: "EPA-HQ-OAR-2021-0317-0001".to_string(),
//!     sort_key: Some("2021-06-01T12:00:00Z".to_string()),
//!     attributes: r#"{"title":"Comment"}"#.to_string(),
//! }];
//! let inserted = warehouse.upsert_records("comments_header", "run-1", &rows)?;
//! assert_eq!(inserted, 1);
//! # Ok::<(), docketsync_warehouse::WarehouseError>(())
//! ```

pub mod duckdb;
pub mod migrations;

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use ::duckdb::{Connection, OptionalExt, ToSql};
use serde::Serialize;
use thiserror::Error;

pub use duckdb::{DuckDbConnectionManager, PooledConnection};

/// Errors that can occur during warehouse operations.
#[derive(Debug, Error)]
pub enum WarehouseError {
    /// `DuckDB` database error.
    #[error(transparent)]
    DuckDb(#[from] ::duckdb::Error),

    /// I/O error (file system operations).
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Another process holds the database file lock.
    #[error("database '{path}' is locked by another process: {message}")]
    Locked { path: PathBuf, message: String },

    /// Table name outside the closed set of entity tables.
    #[error("unknown table '{0}'")]
    UnknownTable(String),

    /// Row rejected before reaching the database.
    #[error("invalid record: {0}")]
    InvalidRecord(String),
}

impl WarehouseError {
    /// Whether the error means the database is held by someone else.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        matches!(self, Self::Locked { .. })
    }
}

/// Entity names with header and detail tables.
pub const ENTITIES: [&str; 3] = ["dockets", "documents", "comments"];

/// Which of an entity's two tables a row belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TableKind {
    Header,
    Detail,
}

impl TableKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Header => "header",
            Self::Detail => "detail",
        }
    }
}

/// Resolve the table for an entity name and kind.
///
/// # Errors
/// Returns [`WarehouseError::UnknownTable`] for entities outside [`ENTITIES`].
pub fn table_name(entity: &str, kind: TableKind) -> Result<&'static str, WarehouseError> {
    match (entity, kind) {
        ("dockets", TableKind::Header) => Ok("dockets_header"),
        ("dockets", TableKind::Detail) => Ok("dockets_detail"),
        ("documents", TableKind::Header) => Ok("documents_header"),
        ("documents", TableKind::Detail) => Ok("documents_detail"),
        ("comments", TableKind::Header) => Ok("comments_header"),
        ("comments", TableKind::Detail) => Ok("comments_detail"),
        _ => Err(WarehouseError::UnknownTable(format!(
            "{entity}_{}",
            kind.as_str()
        ))),
    }
}

fn validated_table(table: &str) -> Result<&'static str, WarehouseError> {
    let (entity, kind) = match table.rsplit_once('_') {
        Some((entity, "header")) => (entity, TableKind::Header),
        Some((entity, "detail")) => (entity, TableKind::Detail),
        _ => return Err(WarehouseError::UnknownTable(table.to_string())),
    };
    table_name(entity, kind).map_err(|_| WarehouseError::UnknownTable(table.to_string()))
}

/// Configuration for the warehouse database.
#[derive(Debug, Clone)]
pub struct WarehouseConfig {
    /// Path to the `DuckDB` database file.
    pub db_path: PathBuf,
    /// Maximum number of idle connections kept in the pool.
    pub max_pool_size: usize,
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self {
            db_path: resolve_docketsync_home().join("docketsync.duckdb"),
            max_pool_size: 4,
        }
    }
}

impl WarehouseConfig {
    /// Configuration for an explicit database file.
    pub fn at(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
            max_pool_size: 4,
        }
    }
}

/// One header or detail row ready for insertion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemRow {
    pub item_id: String,
    /// Canonical UTC sort key; required for header rows.
    pub sort_key: Option<String>,
    /// Flattened attributes serialized as a JSON object.
    pub attributes: String,
}

/// A row of the `harvest_runs` ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunRecord {
    pub run_id: String,
    pub entity: String,
    pub phase: String,
    pub status: String,
    pub items: u64,
    pub failures: u64,
    /// Query criteria of a header run.
    pub criteria: Option<String>,
    pub started_at: String,
    pub finished_at: Option<String>,
}

/// Main warehouse interface for durable header and detail storage.
#[derive(Clone)]
pub struct Warehouse {
    manager: DuckDbConnectionManager,
}

impl Warehouse {
    /// Open the warehouse with default configuration.
    pub fn open_default() -> Result<Self, WarehouseError> {
        Self::open(WarehouseConfig::default())
    }

    /// Open a warehouse with the specified configuration.
    ///
    /// # Errors
    /// Returns [`WarehouseError::Locked`] when another process holds the file.
    pub fn open(config: WarehouseConfig) -> Result<Self, WarehouseError> {
        if let Some(parent) = config.db_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let manager = DuckDbConnectionManager::open(config.db_path.clone(), config.max_pool_size)
            .map_err(|error| classify_open_error(&config.db_path, error))?;
        let warehouse = Self { manager };
        warehouse.initialize()?;
        Ok(warehouse)
    }

    /// Apply pending schema migrations.
    pub fn initialize(&self) -> Result<(), WarehouseError> {
        let connection = self.manager.acquire()?;
        migrations::apply_migrations(&connection)?;
        Ok(())
    }

    /// Get the path to the database file.
    pub fn db_path(&self) -> &Path {
        self.manager.db_path()
    }

    /// Insert rows into `table` in one transaction, skipping identifiers that
    /// already exist. Returns the number of rows actually inserted.
    ///
    /// # Errors
    /// Nothing is committed when any row fails; the caller may retry the batch.
    pub fn upsert_records(
        &self,
        table: &str,
        run_id: &str,
        rows: &[ItemRow],
    ) -> Result<usize, WarehouseError> {
        let table = validated_table(table)?;
        if rows.is_empty() {
            return Ok(0);
        }
        let requires_sort_key = table.ends_with("_header");
        for row in rows {
            if row.item_id.trim().is_empty() {
                return Err(WarehouseError::InvalidRecord(String::from(
                    "item identifier is empty",
                )));
            }
            if requires_sort_key && row.sort_key.is_none() {
                return Err(WarehouseError::InvalidRecord(format!(
                    "header row '{}' has no sort key",
                    row.item_id
                )));
            }
        }

        let connection = self.manager.acquire()?;
        connection.execute_batch("BEGIN TRANSACTION")?;
        let result = (|| -> Result<usize, WarehouseError> {
            let before = row_count(&connection, table)?;
            let insert_sql = format!(
                "INSERT OR IGNORE INTO {table} \
                 (item_id, sort_key, attributes, run_id, ingested_at) \
                 VALUES (?, ?, ?, ?, CURRENT_TIMESTAMP)"
            );
            let mut statement = connection.prepare(insert_sql.as_str())?;
            for row in rows {
                let params: [&dyn ToSql; 4] =
                    [&row.item_id, &row.sort_key, &row.attributes, &run_id];
                statement.execute(params.as_slice())?;
            }
            drop(statement);
            let after = row_count(&connection, table)?;
            Ok(after.saturating_sub(before) as usize)
        })();

        finalize_transaction(&connection, result)
    }

    /// Greatest stored sort key in `table`, or `None` when it is empty.
    pub fn max_sort_key(&self, table: &str) -> Result<Option<String>, WarehouseError> {
        let table = validated_table(table)?;
        let connection = self.manager.acquire()?;
        let sql = format!("SELECT MAX(sort_key) FROM {table}");
        let value: Option<String> = connection.query_row(sql.as_str(), [], |row| row.get(0))?;
        Ok(value)
    }

    /// Greatest sort key among rows written by runs started with `criteria`.
    pub fn max_sort_key_for(
        &self,
        table: &str,
        criteria: &str,
    ) -> Result<Option<String>, WarehouseError> {
        let table = validated_table(table)?;
        let connection = self.manager.acquire()?;
        let sql = format!(
            "SELECT MAX(t.sort_key) FROM {table} AS t \
             JOIN harvest_runs AS r ON r.run_id = t.run_id \
             WHERE r.criteria = ?"
        );
        let value: Option<String> =
            connection.query_row(sql.as_str(), [criteria], |row| row.get(0))?;
        Ok(value)
    }

    /// Identifiers present in `header` but absent from `detail`, ordered by
    /// sort key then identifier.
    pub fn missing_identifiers(
        &self,
        detail: &str,
        header: &str,
    ) -> Result<Vec<String>, WarehouseError> {
        let detail = validated_table(detail)?;
        let header = validated_table(header)?;
        let connection = self.manager.acquire()?;
        let sql = format!(
            "SELECT h.item_id FROM {header} AS h \
             WHERE NOT EXISTS (SELECT 1 FROM {detail} AS d WHERE d.item_id = h.item_id) \
             ORDER BY h.sort_key, h.item_id"
        );
        let mut statement = connection.prepare(sql.as_str())?;
        let rows = statement.query_map([], |row| row.get::<_, String>(0))?;
        let mut identifiers = Vec::new();
        for row in rows {
            identifiers.push(row?);
        }
        Ok(identifiers)
    }

    /// Number of rows stored in `table`.
    pub fn count_rows(&self, table: &str) -> Result<u64, WarehouseError> {
        let table = validated_table(table)?;
        let connection = self.manager.acquire()?;
        Ok(row_count(&connection, table)?)
    }

    /// Whether `table` holds a row for `item_id`.
    pub fn contains(&self, table: &str, item_id: &str) -> Result<bool, WarehouseError> {
        let table = validated_table(table)?;
        let connection = self.manager.acquire()?;
        let sql = format!("SELECT 1 FROM {table} WHERE item_id = ?");
        let found: Option<i32> = connection
            .query_row(sql.as_str(), [item_id], |row| row.get(0))
            .optional()?;
        Ok(found.is_some())
    }

    /// Stored attributes JSON for `item_id`, if present.
    pub fn attributes(&self, table: &str, item_id: &str) -> Result<Option<String>, WarehouseError> {
        let table = validated_table(table)?;
        let connection = self.manager.acquire()?;
        let sql = format!("SELECT attributes FROM {table} WHERE item_id = ?");
        let attributes = connection
            .query_row(sql.as_str(), [item_id], |row| row.get::<_, String>(0))
            .optional()?;
        Ok(attributes)
    }

    /// Record the start of a header or detail run in the ledger.
    pub fn begin_run(
        &self,
        run_id: &str,
        entity: &str,
        phase: &str,
        criteria: Option<&str>,
    ) -> Result<(), WarehouseError> {
        table_name(entity, TableKind::Header)?;
        let connection = self.manager.acquire()?;
        let params: [&dyn ToSql; 4] = [&run_id, &entity, &phase, &criteria];
        connection.execute(
            "INSERT OR REPLACE INTO harvest_runs \
             (run_id, entity, phase, status, items, failures, criteria, started_at) \
             VALUES (?, ?, ?, 'running', 0, 0, ?, CURRENT_TIMESTAMP)",
            params.as_slice(),
        )?;
        Ok(())
    }

    /// Close a ledger row with its final status and counters.
    pub fn finish_run(
        &self,
        run_id: &str,
        status: &str,
        items: u64,
        failures: u64,
    ) -> Result<(), WarehouseError> {
        let connection = self.manager.acquire()?;
        let items = i64::try_from(items).unwrap_or(i64::MAX);
        let failures = i64::try_from(failures).unwrap_or(i64::MAX);
        let params: [&dyn ToSql; 4] = [&status, &items, &failures, &run_id];
        connection.execute(
            "UPDATE harvest_runs \
             SET status = ?, items = ?, failures = ?, finished_at = CURRENT_TIMESTAMP \
             WHERE run_id = ?",
            params.as_slice(),
        )?;
        Ok(())
    }

    /// Most recent ledger rows, newest first.
    pub fn recent_runs(&self, limit: usize) -> Result<Vec<RunRecord>, WarehouseError> {
        let connection = self.manager.acquire()?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut statement = connection.prepare(
            "SELECT run_id, entity, phase, status, items, failures, criteria, \
                    CAST(started_at AS VARCHAR), CAST(finished_at AS VARCHAR) \
             FROM harvest_runs ORDER BY started_at DESC, run_id LIMIT ?",
        )?;
        let rows = statement.query_map([limit], |row| {
            Ok(RunRecord {
                run_id: row.get(0)?,
                entity: row.get(1)?,
                phase: row.get(2)?,
                status: row.get(3)?,
                items: row.get::<_, i64>(4)?.max(0) as u64,
                failures: row.get::<_, i64>(5)?.max(0) as u64,
                criteria: row.get(6)?,
                started_at: row.get(7)?,
                finished_at: row.get(8)?,
            })
        })?;
        let mut runs = Vec::new();
        for row in rows {
            runs.push(row?);
        }
        Ok(runs)
    }
}

fn row_count(connection: &Connection, table: &str) -> Result<u64, ::duckdb::Error> {
    let sql = format!("SELECT COUNT(*) FROM {table}");
    let count: i64 = connection.query_row(sql.as_str(), [], |row| row.get(0))?;
    Ok(count.max(0) as u64)
}

fn finalize_transaction<T>(
    connection: &Connection,
    result: Result<T, WarehouseError>,
) -> Result<T, WarehouseError> {
    match result {
        Ok(value) => {
            connection.execute_batch("COMMIT")?;
            Ok(value)
        }
        Err(error) => {
            let _ = connection.execute_batch("ROLLBACK");
            Err(error)
        }
    }
}

fn classify_open_error(path: &Path, error: ::duckdb::Error) -> WarehouseError {
    let message = error.to_string();
    let lowered = message.to_ascii_lowercase();
    if lowered.contains("could not set lock") || lowered.contains("conflicting lock") {
        WarehouseError::Locked {
            path: path.to_path_buf(),
            message,
        }
    } else {
        WarehouseError::DuckDb(error)
    }
}

/// Resolve the docketsync home directory from `DOCKETSYNC_HOME` or `$HOME`.
pub fn resolve_docketsync_home() -> PathBuf {
    if let Some(path) = env::var_os("DOCKETSYNC_HOME") {
        return PathBuf::from(path);
    }
    if let Some(home) = env::var_os("HOME") {
        return PathBuf::from(home).join(".docketsync");
    }
    PathBuf::from(".docketsync")
}
