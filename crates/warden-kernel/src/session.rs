//! Session and grant-lifecycle management.
//!
//! Answers the operational questions the broker alone does not: what a
//! "session" is (process, workspace, timed, or persistent), how a grant
//! issued hours ago is found and revoked, and how revocations survive a
//! restart. Revocation records are always persisted; this table backs
//! the broker's tombstone guarantee. Persistent sessions and
//! `always`-scoped grants are reloaded at startup; everything else dies
//! with the process.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use rusqlite::{params, Connection, OpenFlags};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::audit::unix_now;

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS sessions (
    id           TEXT PRIMARY KEY,
    kind         TEXT NOT NULL,
    principal    TEXT NOT NULL,
    created_at   REAL NOT NULL,
    expires_at   REAL,
    workspace_id TEXT,
    metadata     TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS grants (
    id          TEXT PRIMARY KEY,
    token       TEXT NOT NULL,
    principal   TEXT NOT NULL,
    operation   TEXT NOT NULL,
    resource    TEXT NOT NULL,
    scope       TEXT NOT NULL,
    session_id  TEXT,
    granted_at  REAL NOT NULL,
    granted_by  TEXT NOT NULL,
    expires_at  REAL,
    revoked_at  REAL,
    revoked_by  TEXT,
    metadata    TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS grant_revocations (
    id          TEXT PRIMARY KEY,
    grant_id    TEXT NOT NULL,
    token       TEXT NOT NULL,
    principal   TEXT NOT NULL,
    operation   TEXT NOT NULL,
    resource    TEXT NOT NULL,
    revoked_at  REAL NOT NULL,
    revoked_by  TEXT NOT NULL,
    reason      TEXT
);
CREATE INDEX IF NOT EXISTS idx_grants_principal ON grants (principal);
CREATE INDEX IF NOT EXISTS idx_grants_token ON grants (token);
CREATE INDEX IF NOT EXISTS idx_grant_revocations_token ON grant_revocations (token);
";

/// Errors from session management.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SessionError {
    /// The session store failed.
    #[error("session store error: {0}")]
    Store(#[from] rusqlite::Error),

    /// The session was not found (or already ended).
    #[error("unknown session: {session_id}")]
    Unknown {
        /// The session id.
        session_id: String,
    },
}

/// Lifetime classes of a capability session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    /// Dies with the kernel process.
    Process,
    /// Dies when its workspace closes.
    Workspace,
    /// Dies after a TTL.
    Timed,
    /// Survives restarts (persisted).
    Persistent,
}

impl SessionKind {
    /// Returns the wire representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Process => "process",
            Self::Workspace => "workspace",
            Self::Timed => "timed",
            Self::Persistent => "persistent",
        }
    }

    /// Parses a session kind.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "process" => Some(Self::Process),
            "workspace" => Some(Self::Workspace),
            "timed" => Some(Self::Timed),
            "persistent" => Some(Self::Persistent),
            _ => None,
        }
    }
}

/// Scope of a capability grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantScope {
    /// One operation.
    Once,
    /// Until the session ends.
    Session,
    /// For a resource pattern.
    Resource,
    /// Permanent (persisted).
    Always,
}

impl GrantScope {
    /// Returns the wire representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Once => "once",
            Self::Session => "session",
            Self::Resource => "resource",
            Self::Always => "always",
        }
    }

    /// Parses a grant scope.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "once" => Some(Self::Once),
            "session" => Some(Self::Session),
            "resource" => Some(Self::Resource),
            "always" => Some(Self::Always),
            _ => None,
        }
    }
}

/// A capability session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Session id (`session:<hex>`).
    pub id: String,
    /// Lifetime class.
    pub kind: SessionKind,
    /// Owning principal.
    pub principal: String,
    /// Creation time.
    pub created_at: f64,
    /// Expiry, for timed sessions.
    pub expires_at: Option<f64>,
    /// Associated workspace, for workspace sessions.
    pub workspace_id: Option<String>,
    /// Free-form metadata.
    pub metadata: Map<String, Value>,
}

impl Session {
    /// Whether the session is expired at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: f64) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// A recorded capability grant with lifecycle metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityGrant {
    /// Grant id (`grant:<hex>`).
    pub id: String,
    /// The broker token this grant tracks.
    pub token: String,
    /// Receiving principal.
    pub principal: String,
    /// Permitted operation pattern.
    pub operation: String,
    /// Permitted resource pattern.
    pub resource: String,
    /// Scope.
    pub scope: GrantScope,
    /// Owning session, for session-scoped grants.
    pub session_id: Option<String>,
    /// When granted.
    pub granted_at: f64,
    /// Who granted: `user`, `policy`, or `auto`.
    pub granted_by: String,
    /// Expiry.
    pub expires_at: Option<f64>,
    /// Revocation time, if revoked.
    pub revoked_at: Option<f64>,
    /// Who revoked.
    pub revoked_by: Option<String>,
    /// Free-form metadata.
    pub metadata: Map<String, Value>,
}

impl CapabilityGrant {
    /// Whether the grant is live at `now`.
    #[must_use]
    pub fn is_active_at(&self, now: f64) -> bool {
        self.revoked_at.is_none() && !self.expires_at.is_some_and(|at| now >= at)
    }
}

/// A persisted revocation record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevocationRecord {
    /// Record id (`revoke:<hex>`).
    pub id: String,
    /// The revoked grant.
    pub grant_id: String,
    /// The revoked broker token.
    pub token: String,
    /// Principal the grant belonged to.
    pub principal: String,
    /// The grant's operation pattern.
    pub operation: String,
    /// The grant's resource pattern.
    pub resource: String,
    /// When revoked.
    pub revoked_at: f64,
    /// Who revoked: `user`, `system`, `session_end`.
    pub revoked_by: String,
    /// Why.
    pub reason: String,
}

fn short_id(prefix: &str) -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("{prefix}:{}", &hex[..8])
}

struct SessionState {
    sessions: HashMap<String, Session>,
    grants: HashMap<String, CapabilityGrant>,
    revocations: HashMap<String, RevocationRecord>,
}

/// Manages sessions, grant lifecycle records, and revocation persistence.
pub struct SessionManager {
    conn: Arc<Mutex<Connection>>,
    state: Mutex<SessionState>,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager").finish_non_exhaustive()
    }
}

impl SessionManager {
    /// Opens or creates the session store at the given path and reloads
    /// persisted sessions, grants, and revocations.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Store`] on open or load failure.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SessionError> {
        let conn = Connection::open_with_flags(
            path.as_ref(),
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        Self::from_connection(conn)
    }

    /// Creates an in-memory manager (tests; no restart guarantee).
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Store`] on initialization failure.
    pub fn in_memory() -> Result<Self, SessionError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, SessionError> {
        conn.execute_batch(SCHEMA_SQL)?;
        let state = Self::load(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            state: Mutex::new(state),
        })
    }

    fn load(conn: &Connection) -> Result<SessionState, SessionError> {
        let mut sessions = HashMap::new();
        {
            let mut stmt = conn.prepare(
                "SELECT id, kind, principal, created_at, expires_at, workspace_id, metadata
                 FROM sessions WHERE kind = 'persistent'",
            )?;
            let rows = stmt.query_map([], |row| {
                let kind: String = row.get(1)?;
                let metadata: String = row.get(6)?;
                Ok(Session {
                    id: row.get(0)?,
                    kind: SessionKind::parse(&kind).unwrap_or(SessionKind::Persistent),
                    principal: row.get(2)?,
                    created_at: row.get(3)?,
                    expires_at: row.get(4)?,
                    workspace_id: row.get(5)?,
                    metadata: serde_json::from_str(&metadata).unwrap_or_default(),
                })
            })?;
            for row in rows {
                let session = row?;
                sessions.insert(session.id.clone(), session);
            }
        }

        let mut grants = HashMap::new();
        {
            let mut stmt = conn.prepare(
                "SELECT id, token, principal, operation, resource, scope, session_id,
                        granted_at, granted_by, expires_at, revoked_at, revoked_by, metadata
                 FROM grants",
            )?;
            let rows = stmt.query_map([], |row| {
                let scope: String = row.get(5)?;
                let metadata: String = row.get(12)?;
                Ok(CapabilityGrant {
                    id: row.get(0)?,
                    token: row.get(1)?,
                    principal: row.get(2)?,
                    operation: row.get(3)?,
                    resource: row.get(4)?,
                    scope: GrantScope::parse(&scope).unwrap_or(GrantScope::Once),
                    session_id: row.get(6)?,
                    granted_at: row.get(7)?,
                    granted_by: row.get(8)?,
                    expires_at: row.get(9)?,
                    revoked_at: row.get(10)?,
                    revoked_by: row.get(11)?,
                    metadata: serde_json::from_str(&metadata).unwrap_or_default(),
                })
            })?;
            for row in rows {
                let grant = row?;
                grants.insert(grant.id.clone(), grant);
            }
        }

        let mut revocations = HashMap::new();
        {
            let mut stmt = conn.prepare(
                "SELECT id, grant_id, token, principal, operation, resource,
                        revoked_at, revoked_by, reason
                 FROM grant_revocations",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok(RevocationRecord {
                    id: row.get(0)?,
                    grant_id: row.get(1)?,
                    token: row.get(2)?,
                    principal: row.get(3)?,
                    operation: row.get(4)?,
                    resource: row.get(5)?,
                    revoked_at: row.get(6)?,
                    revoked_by: row.get(7)?,
                    reason: row.get::<_, Option<String>>(8)?.unwrap_or_default(),
                })
            })?;
            for row in rows {
                let record = row?;
                revocations.insert(record.id.clone(), record);
            }
        }

        Ok(SessionState {
            sessions,
            grants,
            revocations,
        })
    }

    /// Creates a session. Persistent sessions are written through.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Store`] if persistence fails.
    pub fn create_session(
        &self,
        principal: &str,
        kind: SessionKind,
        workspace_id: Option<&str>,
        ttl_seconds: Option<f64>,
    ) -> Result<Session, SessionError> {
        let now = unix_now();
        let session = Session {
            id: short_id("session"),
            kind,
            principal: principal.to_string(),
            created_at: now,
            expires_at: ttl_seconds.map(|ttl| now + ttl),
            workspace_id: workspace_id.map(str::to_string),
            metadata: Map::new(),
        };
        if kind == SessionKind::Persistent {
            self.persist_session(&session)?;
        }
        self.state
            .lock()
            .unwrap()
            .sessions
            .insert(session.id.clone(), session.clone());
        debug!(session = %session.id, principal, kind = kind.as_str(), "session created");
        Ok(session)
    }

    fn persist_session(&self, session: &Session) -> Result<(), SessionError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO sessions
             (id, kind, principal, created_at, expires_at, workspace_id, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                session.id,
                session.kind.as_str(),
                session.principal,
                session.created_at,
                session.expires_at,
                session.workspace_id,
                serde_json::to_string(&session.metadata).unwrap_or_else(|_| "{}".into()),
            ],
        )?;
        Ok(())
    }

    /// Looks up a session; expired sessions are ended and reported gone.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Store`] if ending an expired session fails.
    pub fn get_session(&self, session_id: &str) -> Result<Option<Session>, SessionError> {
        let session = self
            .state
            .lock()
            .unwrap()
            .sessions
            .get(session_id)
            .cloned();
        match session {
            Some(session) if session.is_expired_at(unix_now()) => {
                self.end_session(session_id)?;
                Ok(None)
            }
            other => Ok(other),
        }
    }

    /// Ends a session: revokes its active session-scoped grants and
    /// removes any persisted row. Returns the revoked grant tokens so the
    /// caller can revoke them at the broker too.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Unknown`] or [`SessionError::Store`].
    pub fn end_session(&self, session_id: &str) -> Result<Vec<String>, SessionError> {
        let existed = self
            .state
            .lock()
            .unwrap()
            .sessions
            .remove(session_id)
            .is_some();
        if !existed {
            return Err(SessionError::Unknown {
                session_id: session_id.to_string(),
            });
        }

        let grant_ids: Vec<String> = {
            let state = self.state.lock().unwrap();
            let now = unix_now();
            state
                .grants
                .values()
                .filter(|g| g.session_id.as_deref() == Some(session_id) && g.is_active_at(now))
                .map(|g| g.id.clone())
                .collect()
        };
        let mut tokens = Vec::with_capacity(grant_ids.len());
        for grant_id in grant_ids {
            if let Some(token) = self.revoke_grant(&grant_id, "session_end", "session ended")? {
                tokens.push(token);
            }
        }

        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM sessions WHERE id = ?1", params![session_id])?;
        debug!(session = session_id, revoked = tokens.len(), "session ended");
        Ok(tokens)
    }

    /// Records a grant. `always`-scoped grants are written through.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Store`] if persistence fails.
    #[allow(clippy::too_many_arguments)]
    pub fn record_grant(
        &self,
        token: &str,
        principal: &str,
        operation: &str,
        resource: &str,
        scope: GrantScope,
        granted_by: &str,
        session_id: Option<&str>,
        expires_at: Option<f64>,
    ) -> Result<CapabilityGrant, SessionError> {
        let grant = CapabilityGrant {
            id: short_id("grant"),
            token: token.to_string(),
            principal: principal.to_string(),
            operation: operation.to_string(),
            resource: resource.to_string(),
            scope,
            session_id: session_id.map(str::to_string),
            granted_at: unix_now(),
            granted_by: granted_by.to_string(),
            expires_at,
            revoked_at: None,
            revoked_by: None,
            metadata: Map::new(),
        };
        if scope == GrantScope::Always {
            self.persist_grant(&grant)?;
        }
        self.state
            .lock()
            .unwrap()
            .grants
            .insert(grant.id.clone(), grant.clone());
        Ok(grant)
    }

    fn persist_grant(&self, grant: &CapabilityGrant) -> Result<(), SessionError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO grants
             (id, token, principal, operation, resource, scope, session_id,
              granted_at, granted_by, expires_at, revoked_at, revoked_by, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                grant.id,
                grant.token,
                grant.principal,
                grant.operation,
                grant.resource,
                grant.scope.as_str(),
                grant.session_id,
                grant.granted_at,
                grant.granted_by,
                grant.expires_at,
                grant.revoked_at,
                grant.revoked_by,
                serde_json::to_string(&grant.metadata).unwrap_or_else(|_| "{}".into()),
            ],
        )?;
        Ok(())
    }

    /// Revokes a grant. The revocation record is always persisted before
    /// this returns. Returns the grant's broker token when the grant was
    /// live.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Store`] if the record cannot be persisted.
    pub fn revoke_grant(
        &self,
        grant_id: &str,
        revoked_by: &str,
        reason: &str,
    ) -> Result<Option<String>, SessionError> {
        let record = {
            let mut state = self.state.lock().unwrap();
            let now = unix_now();
            let Some(grant) = state.grants.get_mut(grant_id) else {
                return Ok(None);
            };
            if !grant.is_active_at(now) {
                return Ok(None);
            }
            grant.revoked_at = Some(now);
            grant.revoked_by = Some(revoked_by.to_string());
            RevocationRecord {
                id: short_id("revoke"),
                grant_id: grant_id.to_string(),
                token: grant.token.clone(),
                principal: grant.principal.clone(),
                operation: grant.operation.clone(),
                resource: grant.resource.clone(),
                revoked_at: now,
                revoked_by: revoked_by.to_string(),
                reason: reason.to_string(),
            }
        };

        // Durable before observable.
        {
            let conn = self.conn.lock().unwrap();
            conn.execute(
                "INSERT INTO grant_revocations
                 (id, grant_id, token, principal, operation, resource,
                  revoked_at, revoked_by, reason)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    record.id,
                    record.grant_id,
                    record.token,
                    record.principal,
                    record.operation,
                    record.resource,
                    record.revoked_at,
                    record.revoked_by,
                    record.reason,
                ],
            )?;
        }

        let token = record.token.clone();
        let persisted_grant = {
            let state = self.state.lock().unwrap();
            state
                .grants
                .get(grant_id)
                .filter(|g| g.scope == GrantScope::Always)
                .cloned()
        };
        if let Some(grant) = persisted_grant {
            self.persist_grant(&grant)?;
        }
        self.state
            .lock()
            .unwrap()
            .revocations
            .insert(record.id.clone(), record);
        Ok(Some(token))
    }

    /// Whether a broker token has a persisted revocation.
    #[must_use]
    pub fn is_token_revoked(&self, token: &str) -> bool {
        self.state
            .lock()
            .unwrap()
            .revocations
            .values()
            .any(|r| r.token == token)
    }

    /// Lists grants, newest first.
    #[must_use]
    pub fn list_grants(&self, principal: Option<&str>, active_only: bool) -> Vec<CapabilityGrant> {
        let now = unix_now();
        let state = self.state.lock().unwrap();
        let mut grants: Vec<CapabilityGrant> = state
            .grants
            .values()
            .filter(|g| principal.is_none_or(|p| g.principal == p))
            .filter(|g| !active_only || g.is_active_at(now))
            .cloned()
            .collect();
        grants.sort_by(|a, b| b.granted_at.total_cmp(&a.granted_at));
        grants
    }

    /// Lists revocation records, newest first.
    #[must_use]
    pub fn list_revocations(&self, principal: Option<&str>) -> Vec<RevocationRecord> {
        let state = self.state.lock().unwrap();
        let mut records: Vec<RevocationRecord> = state
            .revocations
            .values()
            .filter(|r| principal.is_none_or(|p| r.principal == p))
            .cloned()
            .collect();
        records.sort_by(|a, b| b.revoked_at.total_cmp(&a.revoked_at));
        records
    }

    /// Revokes every active grant of a principal. Returns revoked broker
    /// tokens.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Store`] if a record cannot be persisted.
    pub fn revoke_all_for_principal(
        &self,
        principal: &str,
        revoked_by: &str,
    ) -> Result<Vec<String>, SessionError> {
        let grant_ids: Vec<String> = {
            let now = unix_now();
            let state = self.state.lock().unwrap();
            state
                .grants
                .values()
                .filter(|g| g.principal == principal && g.is_active_at(now))
                .map(|g| g.id.clone())
                .collect()
        };
        let mut tokens = Vec::new();
        for grant_id in grant_ids {
            if let Some(token) = self.revoke_grant(&grant_id, revoked_by, "revoke_all")? {
                tokens.push(token);
            }
        }
        Ok(tokens)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> SessionManager {
        SessionManager::in_memory().unwrap()
    }

    #[test]
    fn session_lifecycle() {
        let sessions = manager();
        let session = sessions
            .create_session("agent:1", SessionKind::Process, None, None)
            .unwrap();
        assert!(sessions.get_session(&session.id).unwrap().is_some());

        sessions.end_session(&session.id).unwrap();
        assert!(sessions.get_session(&session.id).unwrap().is_none());
        assert!(matches!(
            sessions.end_session(&session.id),
            Err(SessionError::Unknown { .. })
        ));
    }

    #[test]
    fn expired_timed_session_reports_gone() {
        let sessions = manager();
        let session = sessions
            .create_session("agent:1", SessionKind::Timed, None, Some(-1.0))
            .unwrap();
        assert!(sessions.get_session(&session.id).unwrap().is_none());
    }

    #[test]
    fn end_session_revokes_its_grants() {
        let sessions = manager();
        let session = sessions
            .create_session("agent:1", SessionKind::Process, None, None)
            .unwrap();
        sessions
            .record_grant(
                "tok-1",
                "agent:1",
                "tab.read",
                "tab:*",
                GrantScope::Session,
                "user",
                Some(&session.id),
                None,
            )
            .unwrap();
        sessions
            .record_grant(
                "tok-2",
                "agent:1",
                "tab.read",
                "tab:*",
                GrantScope::Resource,
                "policy",
                None,
                None,
            )
            .unwrap();

        let revoked = sessions.end_session(&session.id).unwrap();
        assert_eq!(revoked, vec!["tok-1".to_string()]);
        assert!(sessions.is_token_revoked("tok-1"));
        assert!(!sessions.is_token_revoked("tok-2"));
    }

    #[test]
    fn revocations_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sessions.db");
        {
            let sessions = SessionManager::open(&path).unwrap();
            let grant = sessions
                .record_grant(
                    "tok-1",
                    "agent:1",
                    "tab.read",
                    "tab:*",
                    GrantScope::Once,
                    "user",
                    None,
                    None,
                )
                .unwrap();
            sessions.revoke_grant(&grant.id, "user", "test").unwrap();
            assert!(sessions.is_token_revoked("tok-1"));
        }
        let reopened = SessionManager::open(&path).unwrap();
        assert!(reopened.is_token_revoked("tok-1"));
    }

    #[test]
    fn always_grants_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sessions.db");
        {
            let sessions = SessionManager::open(&path).unwrap();
            sessions
                .record_grant(
                    "tok-always",
                    "agent:1",
                    "tab.read",
                    "tab:*",
                    GrantScope::Always,
                    "user",
                    None,
                    None,
                )
                .unwrap();
        }
        let reopened = SessionManager::open(&path).unwrap();
        let grants = reopened.list_grants(Some("agent:1"), true);
        assert_eq!(grants.len(), 1);
        assert_eq!(grants[0].token, "tok-always");
    }

    #[test]
    fn revoke_all_for_principal_counts() {
        let sessions = manager();
        for token in ["t1", "t2"] {
            sessions
                .record_grant(
                    token,
                    "agent:1",
                    "tab.read",
                    "tab:*",
                    GrantScope::Resource,
                    "user",
                    None,
                    None,
                )
                .unwrap();
        }
        let revoked = sessions.revoke_all_for_principal("agent:1", "user").unwrap();
        assert_eq!(revoked.len(), 2);
        assert!(sessions.list_grants(Some("agent:1"), true).is_empty());
        // Lifecycle rows remain queryable for audit.
        assert_eq!(sessions.list_grants(Some("agent:1"), false).len(), 2);
    }
}
