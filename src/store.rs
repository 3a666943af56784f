use std::{
    collections::HashMap,
    fs,
    path::Path,
    sync::{Arc, Mutex},
};

use log::debug;
use r2d2::Pool;
use r2d2_sqlite::rusqlite::{params, OptionalExtension};
use r2d2_sqlite::SqliteConnectionManager;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("failed to get a store connection: {0}")]
    Pool(#[from] r2d2::Error),
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("failed to create store directory: {0}")]
    Io(#[from] std::io::Error),
    #[error("store lock poisoned")]
    Poisoned,
}

/// The two record spaces. Users and ports never share keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Keyspace {
    Users,
    Ports,
}

impl Keyspace {
    fn table(&self) -> &'static str {
        match self {
            Keyspace::Users => "users",
            Keyspace::Ports => "ports",
        }
    }
}

/// A key-value store holding serialized records.
pub trait Store {
    fn get(&self, space: Keyspace, key: &str) -> Result<Option<String>, StoreError>;

    fn set(&self, space: Keyspace, key: &str, value: &str) -> Result<(), StoreError>;

    /// Write every entry or none of them.
    fn set_all(&self, entries: &[(Keyspace, &str, &str)]) -> Result<(), StoreError>;
}

#[derive(Clone)]
pub struct SqliteStore {
    pool: Pool<SqliteConnectionManager>,
}

impl SqliteStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let manager = SqliteConnectionManager::file(path);
        Self::with_pool(Pool::new(manager)?)
    }

    /// A private in-memory database. Every connection to `:memory:` is a
    /// separate database, so the pool is capped at one connection.
    pub fn in_memory() -> Result<Self, StoreError> {
        let pool = Pool::builder()
            .max_size(1)
            .build(SqliteConnectionManager::memory())?;
        Self::with_pool(pool)
    }

    fn with_pool(pool: Pool<SqliteConnectionManager>) -> Result<Self, StoreError> {
        let mut conn = pool.get()?;
        let tx = conn.transaction()?;
        for space in [Keyspace::Users, Keyspace::Ports] {
            tx.execute(
                &format!(
                    "CREATE TABLE IF NOT EXISTS {} (
                        key TEXT PRIMARY KEY,
                        value TEXT NOT NULL
                    )",
                    space.table()
                ),
                [],
            )?;
        }
        tx.commit()?;
        drop(conn);

        Ok(Self { pool })
    }
}

fn upsert_sql(space: Keyspace) -> String {
    format!(
        "INSERT INTO {} (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        space.table()
    )
}

impl Store for SqliteStore {
    fn get(&self, space: Keyspace, key: &str) -> Result<Option<String>, StoreError> {
        let conn = self.pool.get()?;
        let value = conn
            .query_row(
                &format!("SELECT value FROM {} WHERE key = ?1", space.table()),
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set(&self, space: Keyspace, key: &str, value: &str) -> Result<(), StoreError> {
        debug!("SET {}[{}] = {}", space.table(), key, value);
        let conn = self.pool.get()?;
        conn.execute(&upsert_sql(space), params![key, value])?;
        Ok(())
    }

    fn set_all(&self, entries: &[(Keyspace, &str, &str)]) -> Result<(), StoreError> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;
        for (space, key, value) in entries {
            debug!("SET {}[{}] = {}", space.table(), key, value);
            tx.execute(&upsert_sql(*space), params![key, value])?;
        }
        tx.commit()?;
        Ok(())
    }
}

/// Non-persistent store, mostly useful for development and tests.
#[derive(Clone, Default)]
pub struct MemoryStore {
    records: Arc<Mutex<HashMap<(Keyspace, String), String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for MemoryStore {
    fn get(&self, space: Keyspace, key: &str) -> Result<Option<String>, StoreError> {
        let records = self.records.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(records.get(&(space, key.to_string())).cloned())
    }

    fn set(&self, space: Keyspace, key: &str, value: &str) -> Result<(), StoreError> {
        self.set_all(&[(space, key, value)])
    }

    fn set_all(&self, entries: &[(Keyspace, &str, &str)]) -> Result<(), StoreError> {
        let mut records = self.records.lock().map_err(|_| StoreError::Poisoned)?;
        for (space, key, value) in entries {
            records.insert((*space, key.to_string()), value.to_string());
        }
        Ok(())
    }
}
