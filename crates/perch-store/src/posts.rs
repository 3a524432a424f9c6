use chrono::Utc;
use serde::Serialize;
use tracing::instrument;

use crate::database::Database;
use crate::error::StoreError;

/// A post accepted by the posting service.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PostRow {
    pub id: i64,
    pub remote_id: String,
    pub body: String,
    pub created_at: String,
}

/// Local log of everything published through the posting service.
#[derive(Clone)]
pub struct PostRepo {
    db: Database,
}

impl PostRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[instrument(skip(self, body), fields(len = body.len()))]
    pub fn record(&self, remote_id: &str, body: &str) -> Result<PostRow, StoreError> {
        self.db.with_conn(|conn| {
            let now = Utc::now().to_rfc3339();
            let _ = conn.execute(
                "INSERT INTO posts (remote_id, body, created_at) VALUES (?1, ?2, ?3)",
                rusqlite::params![remote_id, body, now],
            )?;
            Ok(PostRow {
                id: conn.last_insert_rowid(),
                remote_id: remote_id.to_owned(),
                body: body.to_owned(),
                created_at: now,
            })
        })
    }

    /// Newest first.
    pub fn recent(&self, limit: u32) -> Result<Vec<PostRow>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, remote_id, body, created_at FROM posts ORDER BY id DESC LIMIT ?1",
            )?;
            let rows = stmt
                .query_map([limit], |row| {
                    Ok(PostRow {
                        id: row.get(0)?,
                        remote_id: row.get(1)?,
                        body: row.get(2)?,
                        created_at: row.get(3)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn count(&self) -> Result<i64, StoreError> {
        self.db.with_conn(|conn| {
            Ok(conn.query_row("SELECT COUNT(*) FROM posts", [], |row| row.get(0))?)
        })
    }
}
