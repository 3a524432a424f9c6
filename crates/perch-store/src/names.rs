use std::fmt;

use chrono::Utc;
use rusqlite::{ErrorCode, OptionalExtension, TransactionBehavior};
use tracing::{debug, instrument};

use crate::database::Database;
use crate::error::StoreError;

/// Result of a rename attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RenameOutcome {
    Renamed,
    HashNotValid,
    Duplicate,
    UnknownName,
}

impl RenameOutcome {
    /// Wire text sent back to the client.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Renamed => "ok",
            Self::HashNotValid => "hash not valid",
            Self::Duplicate => "duplicate",
            Self::UnknownName => "unknown name",
        }
    }
}

impl fmt::Display for RenameOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Registry of claimed names, each guarded by an integrity hash.
#[derive(Clone)]
pub struct NameRepo {
    db: Database,
}

impl NameRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Claim a new name.
    #[instrument(skip(self, hash))]
    pub fn register(&self, name: &str, hash: &str) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let now = Utc::now().to_rfc3339();
            let inserted = conn.execute(
                "INSERT INTO names (name, hash, created_at, updated_at) VALUES (?1, ?2, ?3, ?3)",
                rusqlite::params![name, hash, now],
            );
            match inserted {
                Ok(_) => Ok(()),
                Err(e) if is_unique_violation(&e) => {
                    Err(StoreError::Conflict(format!("name {name} already registered")))
                }
                Err(e) => Err(e.into()),
            }
        })
    }

    pub fn contains(&self, name: &str) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare_cached("SELECT 1 FROM names WHERE name = ?1")?;
            Ok(stmt.exists([name])?)
        })
    }

    pub fn hash_of(&self, name: &str) -> Result<String, StoreError> {
        self.db.with_conn(|conn| {
            conn.query_row("SELECT hash FROM names WHERE name = ?1", [name], |row| {
                row.get(0)
            })
            .optional()?
            .ok_or_else(|| StoreError::NotFound(format!("name {name}")))
        })
    }

    /// Names from `candidates` not yet claimed, in request order.
    #[instrument(skip(self, candidates), fields(count = candidates.len()))]
    pub fn available(&self, candidates: &[String]) -> Result<Vec<String>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare_cached("SELECT 1 FROM names WHERE name = ?1")?;
            let mut free = Vec::new();
            for name in candidates {
                if !stmt.exists([name.as_str()])? {
                    free.push(name.clone());
                }
            }
            debug!(available = free.len(), "checked names");
            Ok(free)
        })
    }

    /// Move `old` to `new` if `hash` matches the stored hash of `old`.
    ///
    /// A taken `new` is reported as `Duplicate` before `old` or `hash` are
    /// looked at.
    ///
    /// Runs in one IMMEDIATE transaction so two concurrent renames cannot
    /// both claim the same target.
    #[instrument(skip(self, hash))]
    pub fn change_name(&self, old: &str, new: &str, hash: &str) -> Result<RenameOutcome, StoreError> {
        self.db.with_conn_mut(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let taken = tx
                .prepare("SELECT 1 FROM names WHERE name = ?1")?
                .exists([new])?;
            if taken {
                return Ok(RenameOutcome::Duplicate);
            }

            let stored: Option<String> = tx
                .query_row("SELECT hash FROM names WHERE name = ?1", [old], |row| {
                    row.get(0)
                })
                .optional()?;
            let Some(stored) = stored else {
                return Ok(RenameOutcome::UnknownName);
            };
            if stored != hash {
                return Ok(RenameOutcome::HashNotValid);
            }

            let now = Utc::now().to_rfc3339();
            match tx.execute(
                "UPDATE names SET name = ?1, updated_at = ?2 WHERE name = ?3",
                rusqlite::params![new, now, old],
            ) {
                Ok(_) => {}
                Err(e) if is_unique_violation(&e) => return Ok(RenameOutcome::Duplicate),
                Err(e) => return Err(e.into()),
            }
            tx.commit()?;
            Ok(RenameOutcome::Renamed)
        })
    }

    pub fn count(&self) -> Result<i64, StoreError> {
        self.db.with_conn(|conn| {
            Ok(conn.query_row("SELECT COUNT(*) FROM names", [], |row| row.get(0))?)
        })
    }
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation
    )
}
