//! Pooled `SQLite` access.
//!
//! [`Database`] is a cheap-to-clone handle around an `r2d2` pool. Each
//! repository call borrows one connection; when all `pool_size` connections
//! are out, callers wait up to `connection_timeout_ms` and then fail with
//! [`StoreError::Pool`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;
use tracing::info;

use crate::error::StoreError;
use crate::schema;

/// Alias for the connection pool type.
pub type ConnectionPool = Pool<SqliteConnectionManager>;

/// Configuration for the connection pool.
#[derive(Clone, Debug)]
pub struct ConnectionConfig {
    /// Maximum concurrent store connections (default: 16).
    pub pool_size: u32,
    /// Busy timeout in milliseconds (default: 5000).
    pub busy_timeout_ms: u32,
    /// How long a caller waits for a free pooled connection (default: 5000).
    pub connection_timeout_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            pool_size: 16,
            busy_timeout_ms: 5_000,
            connection_timeout_ms: 5_000,
        }
    }
}

#[derive(Debug)]
struct PragmaCustomizer {
    busy_timeout_ms: u32,
}

impl r2d2::CustomizeConnection<Connection, rusqlite::Error> for PragmaCustomizer {
    fn on_acquire(&self, conn: &mut Connection) -> Result<(), rusqlite::Error> {
        conn.execute_batch(&schema::pragmas(self.busy_timeout_ms))
    }
}

/// Shared handle to the perch database.
#[derive(Clone)]
pub struct Database {
    pool: ConnectionPool,
    path: PathBuf,
}

impl Database {
    /// Open or create a file-backed database and run migrations.
    pub fn open(path: &Path, config: &ConnectionConfig) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Io(format!("create dir: {e}")))?;
        }

        let pool = Pool::builder()
            .max_size(config.pool_size)
            .connection_timeout(Duration::from_millis(config.connection_timeout_ms))
            .connection_customizer(Box::new(PragmaCustomizer {
                busy_timeout_ms: config.busy_timeout_ms,
            }))
            .build(SqliteConnectionManager::file(path))?;

        let db = Self {
            pool,
            path: path.to_owned(),
        };
        db.migrate()?;
        info!(path = %path.display(), pool_size = config.pool_size, "database opened");
        Ok(db)
    }

    /// Open an in-memory database (for testing).
    ///
    /// Every `SQLite` in-memory connection is its own database, so the pool
    /// holds exactly one connection and never recycles it.
    pub fn in_memory() -> Result<Self, StoreError> {
        let pool = Pool::builder()
            .max_size(1)
            .max_lifetime(None)
            .idle_timeout(None)
            .connection_timeout(Duration::from_secs(5))
            .connection_customizer(Box::new(PragmaCustomizer {
                busy_timeout_ms: 5_000,
            }))
            .build(SqliteConnectionManager::memory())?;

        let db = Self {
            pool,
            path: PathBuf::from(":memory:"),
        };
        db.migrate()?;
        Ok(db)
    }

    fn migrate(&self) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute_batch(schema::CREATE_TABLES)
                .map_err(|e| StoreError::Database(format!("schema: {e}")))?;

            let version: Option<u32> = conn
                .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
                    row.get(0)
                })
                .ok();
            if version.is_none() {
                let _ = conn
                    .execute(
                        "INSERT INTO schema_version (version) VALUES (?1)",
                        [schema::SCHEMA_VERSION],
                    )
                    .map_err(|e| StoreError::Database(format!("schema version: {e}")))?;
            }
            Ok(())
        })
    }

    /// Execute a closure with a pooled connection.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Connection) -> Result<T, StoreError>,
    {
        let conn = self.pool.get()?;
        f(&*conn)
    }

    /// Execute a closure that needs a mutable connection (transactions).
    pub fn with_conn_mut<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Connection) -> Result<T, StoreError>,
    {
        let mut conn = self.pool.get()?;
        f(&mut *conn)
    }

    /// Round-trip a trivial query; used by health checks and at startup.
    pub fn ping(&self) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            let one: i64 = conn.query_row("SELECT 1", [], |row| row.get(0))?;
            if one == 1 {
                Ok(())
            } else {
                Err(StoreError::Database(format!("unexpected ping result {one}")))
            }
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Maximum number of concurrently borrowed connections.
    pub fn max_connections(&self) -> u32 {
        self.pool.max_size()
    }
}
