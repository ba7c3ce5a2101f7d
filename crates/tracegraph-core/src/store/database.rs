//! SQLite store handle.
//!
//! Each public method opens its own connection so that the caller never has
//! to manage connection lifetime.

use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use crate::errors::{TraceError, TraceResult};
use crate::models::{EntityTable, PrimaryKey};
use crate::stabilizer::PreviousKeys;
use crate::store::schema;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &str) -> PathBuf {
    if path == "~" || path.starts_with("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            let mut expanded = PathBuf::from(home);
            if path.len() > 2 {
                expanded.push(&path[2..]);
            }
            return expanded;
        }
    }
    PathBuf::from(path)
}

/// `store_meta` key holding the highest key ever allocated in `table`.
pub(crate) fn max_key_meta(table: EntityTable) -> String {
    format!("max_key.{}", table.table_name())
}

pub(crate) fn set_meta(conn: &Connection, key: &str, value: &str) -> TraceResult<()> {
    conn.execute(
        "INSERT INTO store_meta(key, value) VALUES(?1, ?2) \
         ON CONFLICT(key) DO UPDATE SET value = excluded.value;",
        params![key, value],
    )?;
    Ok(())
}

pub(crate) fn get_meta(conn: &Connection, key: &str) -> TraceResult<Option<String>> {
    let value = conn
        .query_row(
            "SELECT value FROM store_meta WHERE key = ?1 LIMIT 1;",
            params![key],
            |row| row.get(0),
        )
        .optional()?;
    Ok(value)
}

/// Newest committed run id.
pub(crate) fn last_run_id(conn: &Connection) -> TraceResult<Option<i64>> {
    let id: Option<i64> = conn.query_row("SELECT MAX(id) FROM runs;", [], |row| row.get(0))?;
    Ok(id)
}

/// Path-based handle to the trace store.
#[derive(Clone, Debug)]
pub struct Database {
    db_path: PathBuf,
}

impl Database {
    /// The path is expanded and parent directories are created if they do
    /// not already exist.
    pub fn new(db_path: impl AsRef<Path>) -> TraceResult<Self> {
        let expanded = expand_tilde(&db_path.as_ref().to_string_lossy());
        let resolved = if expanded.is_absolute() {
            expanded
        } else {
            std::env::current_dir()?.join(&expanded)
        };
        if let Some(parent) = resolved.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(Self { db_path: resolved })
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    /// Open a new connection with foreign keys on and a busy timeout, so a
    /// reader never fails outright while the saver holds the write lock.
    pub fn connect(&self) -> TraceResult<Connection> {
        let conn = Connection::open(&self.db_path)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(conn)
    }

    /// Set WAL mode, create all tables and indexes, then run pending
    /// migrations. Safe to call on every start.
    pub fn init_schema(&self) -> TraceResult<()> {
        let conn = self.connect()?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        for stmt in schema::SCHEMA_STATEMENTS {
            conn.execute_batch(stmt)?;
        }
        schema::migrate_schema(&conn)?;
        debug!(path = %self.db_path.display(), version = schema::SCHEMA_VERSION, "store schema ready");
        Ok(())
    }

    pub fn schema_version(&self) -> TraceResult<i32> {
        let conn = self.connect()?;
        Ok(schema::get_schema_version(&conn))
    }

    pub fn meta(&self, key: &str) -> TraceResult<Option<String>> {
        let conn = self.connect()?;
        get_meta(&conn, key)
    }

    /// Live content-hash to key maps plus the allocation high-water mark of
    /// every entity table.
    pub fn load_previous_keys(&self) -> TraceResult<PreviousKeys> {
        let conn = self.connect()?;
        let mut previous = PreviousKeys {
            last_run_id: last_run_id(&conn)?,
            ..Default::default()
        };
        for table in EntityTable::ALL {
            let name = table.table_name();
            let keys = previous.table_mut(table);

            let mut stmt = conn.prepare(&format!(
                "SELECT content_hash, id FROM {name} WHERE is_current = 1;"
            ))?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, PrimaryKey(row.get::<_, i64>(1)?)))
            })?;
            for row in rows {
                let (hash, key) = row?;
                keys.live.insert(hash, key);
            }

            let in_table: Option<i64> =
                conn.query_row(&format!("SELECT MAX(id) FROM {name};"), [], |row| row.get(0))?;
            let recorded = get_meta(&conn, &max_key_meta(table))?
                .and_then(|v| v.parse::<i64>().ok());
            keys.max_allocated = in_table.unwrap_or(0).max(recorded.unwrap_or(0));
        }
        Ok(previous)
    }

    /// Row count of one of the store's tables.
    pub fn count_rows(&self, table: &str) -> TraceResult<i64> {
        if !schema::TABLES.contains(&table) {
            return Err(TraceError::Storage(format!("unknown table `{table}`")));
        }
        let conn = self.connect()?;
        let count = conn.query_row(&format!("SELECT COUNT(*) FROM {table};"), [], |row| row.get(0))?;
        Ok(count)
    }

    /// Live (current) row count of an entity table.
    pub fn count_current(&self, table: EntityTable) -> TraceResult<i64> {
        let conn = self.connect()?;
        let count = conn.query_row(
            &format!("SELECT COUNT(*) FROM {} WHERE is_current = 1;", table.table_name()),
            [],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}
