//! The destination store: a single SQLite database session.
//!
//! All writes of a run go through one [`Destination`]. Transactions are
//! explicit (`begin`/`commit`/`rollback`) because the events step commits
//! once per event while every other step commits once.

use crate::core::error::{MigrateError, Result};
use crate::core::schemas;
use rusqlite::{Connection, OptionalExtension, Params};
use std::cell::Cell;
use std::path::{Path, PathBuf};

pub fn db_connect(db_path: &Path) -> Result<Connection> {
    let conn = Connection::open(db_path)?;
    conn.busy_timeout(std::time::Duration::from_secs(5))?;
    conn.query_row("PRAGMA journal_mode=WAL;", [], |_| Ok(()))?;
    conn.execute("PRAGMA foreign_keys=ON;", [])?;
    Ok(conn)
}

/// Accepts `sqlite:///abs/path`, `sqlite://rel/path` or a plain path.
pub fn path_from_uri(uri: &str) -> PathBuf {
    let trimmed = uri
        .strip_prefix("sqlite://")
        .or_else(|| uri.strip_prefix("sqlite:"))
        .unwrap_or(uri);
    PathBuf::from(trimmed)
}

pub struct Destination {
    conn: Connection,
    path: PathBuf,
    in_tx: Cell<bool>,
    log_sql: bool,
}

impl Destination {
    pub fn open(uri: &str) -> Result<Self> {
        let path = path_from_uri(uri);
        let conn = db_connect(&path)?;
        Ok(Self {
            conn,
            path,
            in_tx: Cell::new(false),
            log_sql: false,
        })
    }

    /// Trace every statement at debug level.
    pub fn with_sql_logging(mut self, enabled: bool) -> Self {
        self.log_sql = enabled;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    pub fn prepare_schema(&self) -> Result<()> {
        for statement in schemas::destination_schema() {
            self.conn.execute_batch(&statement)?;
        }
        Ok(())
    }

    /// First non-empty data table, if any.
    pub fn has_data(&self) -> Result<Option<String>> {
        for table in schemas::DATA_TABLES {
            let exists: bool = self.conn.query_row(
                "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type = 'table' AND name = ?1",
                [table],
                |r| r.get(0),
            )?;
            if !exists {
                continue;
            }
            let rows: i64 =
                self.conn
                    .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |r| r.get(0))?;
            if rows > 0 {
                return Ok(Some(table.to_string()));
            }
        }
        Ok(None)
    }

    pub fn in_transaction(&self) -> bool {
        self.in_tx.get()
    }

    /// Foreign keys are checked at commit, so rows may be written in any order
    /// inside a transaction.
    pub fn begin(&self) -> Result<()> {
        if !self.in_tx.get() {
            self.conn
                .execute_batch("BEGIN; PRAGMA defer_foreign_keys = ON;")?;
            self.in_tx.set(true);
        }
        Ok(())
    }

    pub fn commit(&self) -> Result<()> {
        if self.in_tx.get() {
            self.conn.execute_batch("COMMIT")?;
            self.in_tx.set(false);
        }
        Ok(())
    }

    pub fn rollback(&self) -> Result<()> {
        if self.in_tx.get() {
            self.in_tx.set(false);
            self.conn.execute_batch("ROLLBACK")?;
        }
        Ok(())
    }

    /// Run `f` in its own transaction, committing on success.
    pub fn with_transaction<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&Destination) -> Result<R>,
    {
        self.begin()?;
        match f(self) {
            Ok(value) => {
                self.commit()?;
                Ok(value)
            }
            Err(e) => {
                self.rollback()?;
                Err(e)
            }
        }
    }

    pub fn execute<P: Params>(&self, sql: &str, params: P) -> Result<usize> {
        if self.log_sql {
            tracing::debug!(target: "conf_migrate::sql", "{}", sql.trim());
        }
        Ok(self.conn.execute(sql, params)?)
    }

    /// Execute an INSERT and return the new row id.
    pub fn insert<P: Params>(&self, sql: &str, params: P) -> Result<i64> {
        self.execute(sql, params)?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn query_i64<P: Params>(&self, sql: &str, params: P) -> Result<Option<i64>> {
        Ok(self
            .conn
            .query_row(sql, params, |r| r.get::<_, Option<i64>>(0))
            .optional()?
            .flatten())
    }

    pub fn count<P: Params>(&self, sql: &str, params: P) -> Result<i64> {
        Ok(self.query_i64(sql, params)?.unwrap_or(0))
    }

    pub fn row_exists(&self, table: &str, id: i64) -> Result<bool> {
        Ok(self.count(&format!("SELECT COUNT(*) FROM {} WHERE id = ?1", table), [id])? > 0)
    }

    pub fn max_id(&self, table: &str) -> Result<i64> {
        Ok(self
            .query_i64(&format!("SELECT MAX(id) FROM {}", table), [])?
            .unwrap_or(0))
    }

    /// The id the next plain insert into `table` will receive.
    pub fn next_id(&self, table: &str) -> Result<i64> {
        let seq = self
            .query_i64("SELECT seq FROM sqlite_sequence WHERE name = ?1", [table])?
            .unwrap_or(0);
        Ok(seq.max(self.max_id(table)?) + 1)
    }

    /// Move each table's sequence to its current max id, so rows inserted
    /// with explicit legacy ids are never reissued.
    pub fn fix_sequences(&self, tables: &[&str]) -> Result<()> {
        for table in tables {
            let max = self.max_id(table)?;
            let updated = self.execute(
                "UPDATE sqlite_sequence SET seq = ?1 WHERE name = ?2",
                rusqlite::params![max, table],
            )?;
            if updated == 0 && max > 0 {
                self.execute(
                    "INSERT INTO sqlite_sequence (name, seq) VALUES (?1, ?2)",
                    rusqlite::params![table, max],
                )?;
            }
        }
        Ok(())
    }

    pub fn set_trigger(&self, name: &str, enabled: bool) -> Result<()> {
        self.execute(
            "INSERT INTO migration_triggers (name, enabled) VALUES (?1, ?2)
             ON CONFLICT(name) DO UPDATE SET enabled = excluded.enabled",
            rusqlite::params![name, enabled],
        )?;
        Ok(())
    }

    pub fn trigger_enabled(&self, name: &str) -> Result<bool> {
        Ok(self
            .query_i64("SELECT enabled FROM migration_triggers WHERE name = ?1", [name])?
            .map(|v| v != 0)
            .unwrap_or(true))
    }

    /// Disable triggers until the returned guard is dropped.
    pub fn disable_triggers(&self, names: &[&str]) -> Result<TriggerGuard<'_>> {
        for name in names {
            self.set_trigger(name, false)?;
        }
        Ok(TriggerGuard {
            dest: self,
            names: names.iter().map(|n| n.to_string()).collect(),
        })
    }

    /// Read every row id of `tables` so a resumed run starts with a warm cache.
    pub fn preload(&self, tables: &[&str]) -> Result<Vec<(String, usize)>> {
        let mut loaded = Vec::with_capacity(tables.len());
        for table in tables {
            let mut stmt = self.conn.prepare(&format!("SELECT id FROM {}", table))?;
            let ids = stmt
                .query_map([], |r| r.get::<_, i64>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            loaded.push((table.to_string(), ids.len()));
        }
        Ok(loaded)
    }

    pub fn setting(&self, module: &str, name: &str) -> Result<Option<String>> {
        Ok(self
            .conn
            .query_row(
                "SELECT value FROM settings WHERE module = ?1 AND name = ?2",
                [module, name],
                |r| r.get(0),
            )
            .optional()?)
    }

    pub fn set_setting(&self, module: &str, name: &str, value: &serde_json::Value) -> Result<()> {
        self.execute(
            "INSERT INTO settings (module, name, value) VALUES (?1, ?2, ?3)
             ON CONFLICT(module, name) DO UPDATE SET value = excluded.value",
            rusqlite::params![module, name, value.to_string()],
        )?;
        Ok(())
    }
}

impl Drop for Destination {
    fn drop(&mut self) {
        if self.in_tx.get() {
            if let Err(e) = self.conn.execute_batch("ROLLBACK") {
                tracing::error!("rollback on close failed: {}", e);
            }
        }
    }
}

/// Re-enables triggers when dropped, including on error paths.
pub struct TriggerGuard<'a> {
    dest: &'a Destination,
    names: Vec<String>,
}

impl Drop for TriggerGuard<'_> {
    fn drop(&mut self) {
        for name in &self.names {
            if let Err(e) = self.dest.set_trigger(name, true) {
                tracing::error!("failed to re-enable trigger {}: {}", name, e);
            }
        }
    }
}

pub fn not_empty(table: String) -> MigrateError {
    MigrateError::NotEmpty(format!("table '{}' already has rows", table))
}
