//! SQLite-backed keyed-row tables.
//!
//! Every registry (tasks, triggers, actions) stores its rows through the
//! same `Table<R>`; a row type only describes its columns.

use std::fmt;
use std::marker::PhantomData;
use std::path::Path;
use std::sync::{Arc, Mutex};

use chatterbox_core::error::{BotError, Result};
use rusqlite::types::{FromSql, ToSql};
use rusqlite::{Connection, OptionalExtension};

/// A row type stored in one table.
pub trait Record: Sized {
    /// Primary key type (`i64` for AUTOINCREMENT tables, `String` for named rows).
    type Key: ToSql + FromSql + Clone + fmt::Display;

    const TABLE: &'static str;
    const KEY: &'static str;
    /// Non-key columns, in the order `values` yields them.
    const COLUMNS: &'static [&'static str];
    /// `CREATE TABLE IF NOT EXISTS ...`
    const SCHEMA: &'static str;

    fn key(&self) -> Self::Key;
    fn values(&self) -> Vec<&dyn ToSql>;
    /// Build from a row selected as `KEY, COLUMNS...`.
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self>;
}

/// Shared SQLite connection.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create the database file.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(|e| storage("DB open", e))?;
        tracing::debug!("💾 Database opened: {}", path.display());
        Ok(Self::from_connection(conn))
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| storage("DB open", e))?;
        Ok(Self::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    fn with_conn<T>(
        &self,
        context: &str,
        f: impl FnOnce(&Connection) -> rusqlite::Result<T>,
    ) -> Result<T> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| BotError::Storage(format!("{context}: connection poisoned: {e}")))?;
        f(&conn).map_err(|e| storage(context, e))
    }

    /// Typed access to `R`'s table, creating it if needed.
    pub fn table<R: Record>(&self) -> Result<Table<R>> {
        self.with_conn(&format!("Migration {}", R::TABLE), |conn| {
            conn.execute_batch(R::SCHEMA)
        })?;
        Ok(Table {
            db: self.clone(),
            _row: PhantomData,
        })
    }
}

fn storage(context: &str, e: rusqlite::Error) -> BotError {
    BotError::Storage(format!("{context}: {e}"))
}

fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _) if err.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

/// Keyed-row access to one table.
pub struct Table<R> {
    db: Database,
    _row: PhantomData<fn() -> R>,
}

impl<R> Clone for Table<R> {
    fn clone(&self) -> Self {
        Self {
            db: self.db.clone(),
            _row: PhantomData,
        }
    }
}

impl<R: Record> Table<R> {
    fn select_sql() -> String {
        format!("SELECT {}, {} FROM {}", R::KEY, R::COLUMNS.join(", "), R::TABLE)
    }

    fn placeholders(n: usize) -> String {
        (1..=n).map(|i| format!("?{i}")).collect::<Vec<_>>().join(", ")
    }

    /// Insert a row with its own key. Duplicate keys are `AlreadyExists`.
    pub fn insert(&self, record: &R) -> Result<()> {
        let sql = format!(
            "INSERT INTO {} ({}, {}) VALUES ({})",
            R::TABLE,
            R::KEY,
            R::COLUMNS.join(", "),
            Self::placeholders(R::COLUMNS.len() + 1)
        );
        let key = record.key();
        let mut params: Vec<&dyn ToSql> = vec![&key];
        params.extend(record.values());

        let conn = self
            .db
            .conn
            .lock()
            .map_err(|e| BotError::Storage(format!("Insert {}: connection poisoned: {e}", R::TABLE)))?;
        match conn.execute(&sql, rusqlite::params_from_iter(params)) {
            Ok(_) => Ok(()),
            Err(e) if is_constraint_violation(&e) => Err(BotError::AlreadyExists(format!(
                "{} '{}' already exists",
                R::TABLE,
                key
            ))),
            Err(e) => Err(storage(&format!("Insert {}", R::TABLE), e)),
        }
    }

    /// Insert a row letting SQLite pick the key. Returns the new id.
    pub fn insert_auto(&self, record: &R) -> Result<i64> {
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            R::TABLE,
            R::COLUMNS.join(", "),
            Self::placeholders(R::COLUMNS.len())
        );
        self.db.with_conn(&format!("Insert {}", R::TABLE), |conn| {
            conn.execute(&sql, rusqlite::params_from_iter(record.values()))?;
            Ok(conn.last_insert_rowid())
        })
    }

    pub fn get(&self, key: &R::Key) -> Result<Option<R>> {
        let sql = format!("{} WHERE {} = ?1", Self::select_sql(), R::KEY);
        self.db.with_conn(&format!("Get {}", R::TABLE), |conn| {
            conn.query_row(&sql, [key], R::from_row).optional()
        })
    }

    /// Like `get`, but a missing row is `NotFound`.
    pub fn require(&self, key: &R::Key) -> Result<R> {
        self.get(key)?
            .ok_or_else(|| BotError::NotFound(format!("{} '{}' does not exist", R::TABLE, key)))
    }

    pub fn exists(&self, key: &R::Key) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Overwrite the non-key columns of an existing row.
    pub fn update(&self, record: &R) -> Result<()> {
        let assignments = R::COLUMNS
            .iter()
            .enumerate()
            .map(|(i, c)| format!("{c} = ?{}", i + 1))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "UPDATE {} SET {} WHERE {} = ?{}",
            R::TABLE,
            assignments,
            R::KEY,
            R::COLUMNS.len() + 1
        );
        let key = record.key();
        let mut params = record.values();
        params.push(&key);

        let changed = self.db.with_conn(&format!("Update {}", R::TABLE), |conn| {
            conn.execute(&sql, rusqlite::params_from_iter(params))
        })?;
        self.expect_changed(changed, &key)
    }

    /// Change a row's key.
    pub fn rename(&self, old: &R::Key, new: &R::Key) -> Result<()> {
        let sql = format!("UPDATE {} SET {} = ?1 WHERE {} = ?2", R::TABLE, R::KEY, R::KEY);
        let conn = self
            .db
            .conn
            .lock()
            .map_err(|e| BotError::Storage(format!("Rename {}: connection poisoned: {e}", R::TABLE)))?;
        match conn.execute(&sql, rusqlite::params![new, old]) {
            Ok(changed) => self.expect_changed(changed, old),
            Err(e) if is_constraint_violation(&e) => Err(BotError::AlreadyExists(format!(
                "{} '{}' already exists",
                R::TABLE,
                new
            ))),
            Err(e) => Err(storage(&format!("Rename {}", R::TABLE), e)),
        }
    }

    pub fn delete(&self, key: &R::Key) -> Result<()> {
        let sql = format!("DELETE FROM {} WHERE {} = ?1", R::TABLE, R::KEY);
        let changed = self.db.with_conn(&format!("Delete {}", R::TABLE), |conn| {
            conn.execute(&sql, [key])
        })?;
        self.expect_changed(changed, key)
    }

    /// Every row, ordered by key.
    pub fn all(&self) -> Result<Vec<R>> {
        let sql = format!("{} ORDER BY {}", Self::select_sql(), R::KEY);
        self.db.with_conn(&format!("Load {}", R::TABLE), |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map([], R::from_row)?;
            rows.collect()
        })
    }

    /// Every key, ordered.
    pub fn keys(&self) -> Result<Vec<R::Key>> {
        let sql = format!("SELECT {} FROM {} ORDER BY {}", R::KEY, R::TABLE, R::KEY);
        self.db.with_conn(&format!("Load {} keys", R::TABLE), |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map([], |row| row.get::<_, R::Key>(0))?;
            rows.collect()
        })
    }

    pub fn count(&self) -> Result<usize> {
        let sql = format!("SELECT COUNT(*) FROM {}", R::TABLE);
        let n: i64 = self.db.with_conn(&format!("Count {}", R::TABLE), |conn| {
            conn.query_row(&sql, [], |row| row.get(0))
        })?;
        Ok(usize::try_from(n).unwrap_or_default())
    }

    fn expect_changed(&self, changed: usize, key: &R::Key) -> Result<()> {
        if changed == 0 {
            Err(BotError::NotFound(format!("{} '{}' does not exist", R::TABLE, key)))
        } else {
            Ok(())
        }
    }
}
