//! Durable revocation tombstones.
//!
//! `revoke` and `revoke_all` write a tombstone row *before* returning; a
//! capability with a persisted tombstone is never satisfiable again, even
//! after a process restart. At startup the broker re-emits revoked
//! capabilities from this store so a denied check still reports
//! `revoked` rather than `no_grant`.

use std::path::Path;
use std::sync::{Arc, Mutex};

use rusqlite::{params, Connection, OpenFlags};

use super::CapabilityError;

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS revocations (
    cap_id      TEXT PRIMARY KEY,
    principal   TEXT NOT NULL,
    operation   TEXT NOT NULL,
    resource    TEXT NOT NULL,
    revoked_at  REAL NOT NULL,
    reason      TEXT
);
CREATE INDEX IF NOT EXISTS idx_revocations_principal ON revocations (principal);
";

/// A persisted revocation row.
#[derive(Debug, Clone)]
pub struct Tombstone {
    /// The revoked capability's token.
    pub cap_id: String,
    /// Principal the capability belonged to.
    pub principal: String,
    /// The capability's operation pattern.
    pub operation: String,
    /// The capability's resource pattern.
    pub resource: String,
    /// When it was revoked (Unix seconds).
    pub revoked_at: f64,
    /// Why.
    pub reason: String,
}

/// SQLite-backed tombstone store.
pub struct RevocationStore {
    conn: Arc<Mutex<Connection>>,
}

impl std::fmt::Debug for RevocationStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RevocationStore").finish_non_exhaustive()
    }
}

impl RevocationStore {
    /// Opens or creates the store at the given path.
    ///
    /// # Errors
    ///
    /// Returns [`CapabilityError::Store`] if the database cannot be opened.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CapabilityError> {
        let conn = Connection::open_with_flags(
            path.as_ref(),
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        Self::from_connection(conn)
    }

    /// Creates an in-memory store (tests; no restart guarantee).
    ///
    /// # Errors
    ///
    /// Returns [`CapabilityError::Store`] on initialization failure.
    pub fn in_memory() -> Result<Self, CapabilityError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, CapabilityError> {
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Persists a tombstone. Must succeed before the in-memory revocation
    /// is applied.
    ///
    /// # Errors
    ///
    /// Returns [`CapabilityError::Store`] if the row cannot be written.
    pub fn record(&self, tombstone: &Tombstone) -> Result<(), CapabilityError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO revocations
             (cap_id, principal, operation, resource, revoked_at, reason)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                tombstone.cap_id,
                tombstone.principal,
                tombstone.operation,
                tombstone.resource,
                tombstone.revoked_at,
                tombstone.reason,
            ],
        )?;
        Ok(())
    }

    /// Loads every tombstone (startup re-emission).
    ///
    /// # Errors
    ///
    /// Returns [`CapabilityError::Store`] on read failure.
    pub fn load_all(&self) -> Result<Vec<Tombstone>, CapabilityError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT cap_id, principal, operation, resource, revoked_at, reason
             FROM revocations",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(Tombstone {
                cap_id: row.get(0)?,
                principal: row.get(1)?,
                operation: row.get(2)?,
                resource: row.get(3)?,
                revoked_at: row.get(4)?,
                reason: row.get::<_, Option<String>>(5)?.unwrap_or_default(),
            })
        })?;
        let mut tombstones = Vec::new();
        for row in rows {
            tombstones.push(row?);
        }
        Ok(tombstones)
    }

    /// Whether a capability token has a persisted tombstone.
    ///
    /// # Errors
    ///
    /// Returns [`CapabilityError::Store`] on read failure.
    pub fn is_revoked(&self, cap_id: &str) -> Result<bool, CapabilityError> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM revocations WHERE cap_id = ?1",
            params![cap_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }
}
