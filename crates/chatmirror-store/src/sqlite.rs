//! `SQLite` store.
//!
//! Every record kind shares one `records` table; bodies are the JSON
//! encoding of the record. `updated_at` is duplicated into its own column
//! (unix millis) for inspection and ordering by external tools.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};

use crate::error::StoreError;
use crate::identity::Identity;
use crate::record::Record;
use crate::store::{Store, UnitOfWork};

/// Local schema version. Bump when the schema changes.
const SCHEMA_VERSION: i64 = 1;

/// Identities bound per `IN (...)` lookup, well under `SQLite`'s variable limit.
const BATCH_CHUNK: usize = 500;

const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS records (
    kind TEXT NOT NULL,
    identity TEXT NOT NULL,
    updated_at INTEGER,
    body TEXT NOT NULL,
    PRIMARY KEY (kind, identity)
);

CREATE INDEX IF NOT EXISTS idx_records_updated
    ON records(kind, updated_at);
";

#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) a database file and run migrations.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let conn = Connection::open(path)
            .map_err(|e| StoreError::Open(format!("{}: {e}", path.display())))?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::init(conn)
    }

    /// A private database that disappears with the store.
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| StoreError::Open(format!("in-memory database: {e}")))?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        migrate(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

fn migrate(conn: &Connection) -> Result<(), StoreError> {
    let current: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

    if current != SCHEMA_VERSION {
        if current != 0 {
            // The store is a cache of server state; it is rebuilt by the
            // next sync rather than migrated in place.
            tracing::info!(
                old = current,
                new = SCHEMA_VERSION,
                "local schema version mismatch, recreating"
            );
            conn.execute_batch("DROP TABLE IF EXISTS records;")?;
        }
        conn.execute_batch(SCHEMA)?;
        conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    }
    Ok(())
}

impl Store for SqliteStore {
    type Unit<'a> = SqliteUnit<'a>;

    fn begin(&self) -> Result<SqliteUnit<'_>, StoreError> {
        let conn = self.conn.lock();
        conn.execute_batch("BEGIN IMMEDIATE;")?;
        Ok(SqliteUnit {
            conn,
            finished: false,
        })
    }
}

/// An open `BEGIN IMMEDIATE` transaction. Rolled back on drop unless
/// committed.
pub struct SqliteUnit<'a> {
    conn: MutexGuard<'a, Connection>,
    finished: bool,
}

impl Drop for SqliteUnit<'_> {
    fn drop(&mut self) {
        if !self.finished {
            if let Err(e) = self.conn.execute_batch("ROLLBACK;") {
                tracing::warn!(error = %e, "failed to roll back unit of work");
            }
        }
    }
}

fn updated_at_millis<R: Record>(record: &R) -> Option<i64> {
    record.updated_at().map(|at| at.timestamp_millis())
}

impl UnitOfWork for SqliteUnit<'_> {
    fn fetch_by_identity<R: Record>(
        &mut self,
        identity: &Identity,
    ) -> Result<Option<R>, StoreError> {
        let body: Option<String> = self
            .conn
            .query_row(
                "SELECT body FROM records WHERE kind = ?1 AND identity = ?2",
                params![R::KIND.as_str(), identity.as_str()],
                |row| row.get(0),
            )
            .optional()?;

        match body {
            Some(body) => Ok(Some(serde_json::from_str(&body)?)),
            None => Ok(None),
        }
    }

    fn fetch_batch<R: Record>(
        &mut self,
        identities: &[Identity],
    ) -> Result<HashMap<Identity, R>, StoreError> {
        let mut found = HashMap::with_capacity(identities.len());

        for chunk in identities.chunks(BATCH_CHUNK) {
            let placeholders = (0..chunk.len())
                .map(|i| format!("?{}", i + 2))
                .collect::<Vec<_>>()
                .join(", ");
            let sql = format!(
                "SELECT body FROM records WHERE kind = ?1 AND identity IN ({placeholders})"
            );
            let bind = std::iter::once(R::KIND.as_str()).chain(chunk.iter().map(Identity::as_str));

            let mut stmt = self.conn.prepare(&sql)?;
            let bodies: Vec<String> = stmt
                .query_map(params_from_iter(bind), |row| row.get(0))?
                .collect::<Result<_, _>>()?;

            for body in bodies {
                let record: R = serde_json::from_str(&body)?;
                found.insert(record.identity().clone(), record);
            }
        }
        Ok(found)
    }

    fn insert<R: Record>(&mut self, record: &R) -> Result<(), StoreError> {
        let body = serde_json::to_string(record)?;
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO records (kind, identity, updated_at, body)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                R::KIND.as_str(),
                record.identity().as_str(),
                updated_at_millis(record),
                body
            ],
        )?;
        if inserted == 0 {
            return Err(StoreError::Duplicate {
                kind: R::KIND,
                identity: record.identity().clone(),
            });
        }
        Ok(())
    }

    fn update<R: Record>(&mut self, record: &R) -> Result<(), StoreError> {
        let body = serde_json::to_string(record)?;
        let updated = self.conn.execute(
            "UPDATE records SET updated_at = ?3, body = ?4 WHERE kind = ?1 AND identity = ?2",
            params![
                R::KIND.as_str(),
                record.identity().as_str(),
                updated_at_millis(record),
                body
            ],
        )?;
        if updated == 0 {
            return Err(StoreError::NotFound {
                kind: R::KIND,
                identity: record.identity().clone(),
            });
        }
        Ok(())
    }

    fn remove<R: Record>(&mut self, identity: &Identity) -> Result<bool, StoreError> {
        let removed = self.conn.execute(
            "DELETE FROM records WHERE kind = ?1 AND identity = ?2",
            params![R::KIND.as_str(), identity.as_str()],
        )?;
        Ok(removed > 0)
    }

    fn commit(mut self) -> Result<(), StoreError> {
        self.conn.execute_batch("COMMIT;")?;
        self.finished = true;
        Ok(())
    }
}
