//! Append-only audit log with provenance tracking.
//!
//! Every privileged operation in the kernel produces exactly one audit
//! entry, written *after* the broker's allow decision and after any
//! snapshot the operation requires. The store is `SQLite` in WAL mode;
//! entries are never updated or deleted.
//!
//! # Causal chains
//!
//! Each entry carries `prev_id`, linking it to the previous entry in the
//! same principal's stream. Within one principal the chain is dense, so a
//! stream can be replayed in order; across principals only the commit
//! order to the log is implied.
//!
//! # Failure semantics
//!
//! A failed write is fatal for the originating operation: the operation
//! must not be treated as allowed if its audit record cannot be persisted
//! (fail-closed). Query failures are recoverable.

mod redact;

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

pub use redact::{Redactor, REDACTED_VALUE};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

use crate::capability::RiskTier;

/// Schema SQL embedded at compile time.
const SCHEMA_SQL: &str = include_str!("schema.sql");

/// Default query limit when the caller does not set one.
const DEFAULT_QUERY_LIMIT: usize = 1000;

/// Current Unix time as fractional seconds.
pub(crate) fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Errors from the audit log.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AuditError {
    /// The entry could not be persisted. Fatal for the originating
    /// operation: it must be treated as not having happened.
    #[error("audit write failed: {0}")]
    Write(rusqlite::Error),

    /// A query against the store failed. Recoverable.
    #[error("audit query failed: {0}")]
    Query(rusqlite::Error),

    /// Export I/O failed.
    #[error("audit export failed: {0}")]
    Export(#[from] std::io::Error),

    /// A stored row could not be decoded.
    #[error("corrupt audit row {id}: {reason}")]
    CorruptRow {
        /// Entry id of the bad row.
        id: String,
        /// What failed to decode.
        reason: String,
    },
}

/// Origin of an action or of a piece of data.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
#[repr(u8)]
pub enum Provenance {
    /// Kernel-internal bookkeeping.
    #[default]
    System = 0,
    /// A human at the controls.
    User = 1,
    /// Agent-generated code.
    Agent = 2,
    /// Content extracted from the web. Dominates every other origin under
    /// taint join; T3 operations driven by it are refused at the
    /// mediation boundary.
    WebContent = 3,
}

impl Provenance {
    /// Returns the wire representation of this provenance.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Agent => "agent",
            Self::WebContent => "web-content",
        }
    }

    /// Parses a provenance from its wire representation.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "system" => Some(Self::System),
            "user" => Some(Self::User),
            "agent" => Some(Self::Agent),
            "web-content" => Some(Self::WebContent),
            _ => None,
        }
    }

    /// Taint join: the less trusted origin wins.
    #[must_use]
    pub const fn join(self, other: Self) -> Self {
        if (self as u8) >= (other as u8) {
            self
        } else {
            other
        }
    }
}

impl std::fmt::Display for Provenance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of an audited operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpResult {
    /// The operation was allowed and completed.
    Success,
    /// The operation was refused by the broker or the firewall.
    Denied,
    /// The operation was allowed but failed.
    Error,
}

impl OpResult {
    /// Returns the wire representation of this result.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Denied => "denied",
            Self::Error => "error",
        }
    }

    /// Parses a result from its wire representation.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "success" => Some(Self::Success),
            "denied" => Some(Self::Denied),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

/// A single persisted audit entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Entry id.
    pub id: Uuid,
    /// Unix timestamp (fractional seconds).
    pub ts: f64,
    /// Identity that performed the operation.
    pub principal: String,
    /// Operation name, e.g. `tab.navigate`.
    pub op: String,
    /// Target object id, if any.
    pub object: Option<String>,
    /// Redacted operation arguments.
    pub args: Map<String, Value>,
    /// Outcome.
    pub result: OpResult,
    /// Machine-readable failure class (`no_grant`, `firewall`,
    /// `quota_exceeded`, ...). Only set when `result != success`.
    pub error_kind: Option<String>,
    /// Enclosing transaction, if any.
    pub tx_id: Option<String>,
    /// Enclosing checkpoint, if any.
    pub checkpoint_id: Option<String>,
    /// Origin of the action.
    pub provenance: Provenance,
    /// Risk tier of the operation, when known.
    pub risk_tier: Option<RiskTier>,
    /// Previous entry in this principal's stream.
    pub prev_id: Option<Uuid>,
}

/// A draft entry handed to [`AuditLog::log`]. Timestamp, id, redaction,
/// transaction context and the causal link are filled in by the log.
#[derive(Debug, Clone)]
pub struct AuditEvent {
    op: String,
    principal: String,
    object: Option<String>,
    args: Map<String, Value>,
    result: OpResult,
    error_kind: Option<String>,
    provenance: Provenance,
    risk_tier: Option<RiskTier>,
}

impl AuditEvent {
    /// Creates a draft for a successful operation.
    #[must_use]
    pub fn new(op: impl Into<String>, principal: impl Into<String>) -> Self {
        Self {
            op: op.into(),
            principal: principal.into(),
            object: None,
            args: Map::new(),
            result: OpResult::Success,
            error_kind: None,
            provenance: Provenance::System,
            risk_tier: None,
        }
    }

    /// Sets the target object id.
    #[must_use]
    pub fn object(mut self, id: impl Into<String>) -> Self {
        self.object = Some(id.into());
        self
    }

    /// Sets the (pre-redaction) argument map.
    #[must_use]
    pub fn args(mut self, args: Map<String, Value>) -> Self {
        self.args = args;
        self
    }

    /// Sets the outcome.
    #[must_use]
    pub fn result(mut self, result: OpResult) -> Self {
        self.result = result;
        self
    }

    /// Sets the failure class and flips the result to the given outcome.
    #[must_use]
    pub fn failure(mut self, result: OpResult, kind: impl Into<String>) -> Self {
        self.result = result;
        self.error_kind = Some(kind.into());
        self
    }

    /// Sets the provenance.
    #[must_use]
    pub fn provenance(mut self, provenance: Provenance) -> Self {
        self.provenance = provenance;
        self
    }

    /// Sets the risk tier.
    #[must_use]
    pub fn risk(mut self, tier: RiskTier) -> Self {
        self.risk_tier = Some(tier);
        self
    }
}

/// Filter over the audit store. All fields are conjunctive; `op` supports
/// a trailing `*` glob (`tab.*` matches `tab.open`, `tab.navigate`, ...).
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    /// Filter by principal.
    pub principal: Option<String>,
    /// Filter by operation (trailing `*` glob allowed).
    pub op: Option<String>,
    /// Filter by object id.
    pub object: Option<String>,
    /// Filter by transaction id.
    pub tx_id: Option<String>,
    /// Filter by outcome.
    pub result: Option<OpResult>,
    /// Entries at or after this timestamp.
    pub since: Option<f64>,
    /// Entries at or before this timestamp.
    pub until: Option<f64>,
    /// Maximum entries returned (default 1000).
    pub limit: Option<usize>,
}

impl AuditFilter {
    /// Filter matching every entry.
    #[must_use]
    pub fn any() -> Self {
        Self::default()
    }

    /// Filter by operation (trailing `*` glob allowed).
    #[must_use]
    pub fn op(op: impl Into<String>) -> Self {
        Self {
            op: Some(op.into()),
            ..Self::default()
        }
    }

    /// Filter by principal.
    #[must_use]
    pub fn principal(principal: impl Into<String>) -> Self {
        Self {
            principal: Some(principal.into()),
            ..Self::default()
        }
    }
}

/// Transaction context stamped onto entries logged while a transaction is
/// open. Set and cleared by the transaction coordinator.
#[derive(Debug, Default, Clone)]
struct TxContext {
    tx_id: Option<String>,
    checkpoint_id: Option<String>,
}

/// The append-only audit log.
pub struct AuditLog {
    conn: Arc<Mutex<Connection>>,
    redactor: Redactor,
    chain_heads: Mutex<HashMap<String, Uuid>>,
    tx_ctx: Mutex<TxContext>,
}

impl std::fmt::Debug for AuditLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLog").finish_non_exhaustive()
    }
}

impl AuditLog {
    /// Opens or creates an audit store at the given path.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError::Write`] if the store cannot be opened or its
    /// schema initialized.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, AuditError> {
        let conn = Connection::open_with_flags(
            path.as_ref(),
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(AuditError::Write)?;
        Self::from_connection(conn)
    }

    /// Creates an in-memory audit store (no durability; tests and
    /// ephemeral kernels).
    ///
    /// # Errors
    ///
    /// Returns [`AuditError::Write`] if schema initialization fails.
    pub fn in_memory() -> Result<Self, AuditError> {
        let conn = Connection::open_in_memory().map_err(AuditError::Write)?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self, AuditError> {
        conn.execute_batch(SCHEMA_SQL).map_err(AuditError::Write)?;
        let salt = Self::load_or_create_salt(&conn)?;
        let chain_heads = Self::load_chain_heads(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            redactor: Redactor::new(salt),
            chain_heads: Mutex::new(chain_heads),
            tx_ctx: Mutex::new(TxContext::default()),
        })
    }

    fn load_or_create_salt(conn: &Connection) -> Result<String, AuditError> {
        let existing: Option<String> = conn
            .query_row(
                "SELECT value FROM kernel_meta WHERE key = 'redaction_salt'",
                [],
                |row| row.get(0),
            )
            .optional()
            .map_err(AuditError::Write)?;
        if let Some(salt) = existing {
            return Ok(salt);
        }
        let salt = Uuid::new_v4().simple().to_string();
        conn.execute(
            "INSERT INTO kernel_meta (key, value) VALUES ('redaction_salt', ?1)",
            params![salt],
        )
        .map_err(AuditError::Write)?;
        Ok(salt)
    }

    fn load_chain_heads(conn: &Connection) -> Result<HashMap<String, Uuid>, AuditError> {
        let mut stmt = conn
            .prepare(
                "SELECT principal, id FROM entries
                 WHERE rowid IN (SELECT MAX(rowid) FROM entries GROUP BY principal)",
            )
            .map_err(AuditError::Query)?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(AuditError::Query)?;
        let mut heads = HashMap::new();
        for row in rows {
            let (principal, id) = row.map_err(AuditError::Query)?;
            if let Ok(id) = Uuid::parse_str(&id) {
                heads.insert(principal, id);
            }
        }
        Ok(heads)
    }

    /// Returns the redactor (queries need it to match hashed names).
    #[must_use]
    pub fn redactor(&self) -> &Redactor {
        &self.redactor
    }

    /// Sets the transaction context stamped onto subsequent entries.
    pub fn set_transaction_context(&self, tx_id: &str, checkpoint_id: Option<&str>) {
        let mut ctx = self.tx_ctx.lock().unwrap();
        ctx.tx_id = Some(tx_id.to_string());
        ctx.checkpoint_id = checkpoint_id.map(str::to_string);
    }

    /// Clears the transaction context.
    pub fn clear_transaction_context(&self) {
        *self.tx_ctx.lock().unwrap() = TxContext::default();
    }

    /// Appends an entry. Arguments are redacted, the per-principal causal
    /// link is attached, and the current transaction context is stamped.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError::Write`] if the row cannot be persisted; the
    /// originating operation must then fail (fail-closed).
    pub fn log(&self, event: AuditEvent) -> Result<AuditEntry, AuditError> {
        let ctx = self.tx_ctx.lock().unwrap().clone();
        let mut heads = self.chain_heads.lock().unwrap();
        let prev_id = heads.get(&event.principal).copied();

        let entry = AuditEntry {
            id: Uuid::new_v4(),
            ts: unix_now(),
            principal: event.principal,
            op: event.op,
            object: event.object,
            args: self.redactor.redact(&event.args),
            result: event.result,
            error_kind: event.error_kind,
            tx_id: ctx.tx_id,
            checkpoint_id: ctx.checkpoint_id,
            provenance: event.provenance,
            risk_tier: event.risk_tier,
            prev_id,
        };

        let args_text =
            serde_json::to_string(&entry.args).unwrap_or_else(|_| "{}".to_string());
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO entries
             (id, ts, principal, op, object, args, result, error_kind,
              tx_id, cp_id, provenance, risk_tier, prev_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                entry.id.to_string(),
                entry.ts,
                entry.principal,
                entry.op,
                entry.object,
                args_text,
                entry.result.as_str(),
                entry.error_kind,
                entry.tx_id,
                entry.checkpoint_id,
                entry.provenance.as_str(),
                entry.risk_tier.map(RiskTier::as_str),
                entry.prev_id.map(|id| id.to_string()),
            ],
        )
        .map_err(AuditError::Write)?;
        drop(conn);

        heads.insert(entry.principal.clone(), entry.id);
        Ok(entry)
    }

    /// Queries the store. Results are in append order.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError::Query`] on store failure (recoverable).
    pub fn query(&self, filter: &AuditFilter) -> Result<Vec<AuditEntry>, AuditError> {
        let mut conditions: Vec<String> = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

        if let Some(principal) = &filter.principal {
            conditions.push("principal = ?".into());
            params.push(Box::new(principal.clone()));
        }
        if let Some(op) = &filter.op {
            if let Some(prefix) = op.strip_suffix('*') {
                conditions.push("op LIKE ?".into());
                params.push(Box::new(format!("{prefix}%")));
            } else {
                conditions.push("op = ?".into());
                params.push(Box::new(op.clone()));
            }
        }
        if let Some(object) = &filter.object {
            conditions.push("object = ?".into());
            params.push(Box::new(object.clone()));
        }
        if let Some(tx_id) = &filter.tx_id {
            conditions.push("tx_id = ?".into());
            params.push(Box::new(tx_id.clone()));
        }
        if let Some(result) = filter.result {
            conditions.push("result = ?".into());
            params.push(Box::new(result.as_str().to_string()));
        }
        if let Some(since) = filter.since {
            conditions.push("ts >= ?".into());
            params.push(Box::new(since));
        }
        if let Some(until) = filter.until {
            conditions.push("ts <= ?".into());
            params.push(Box::new(until));
        }

        let where_clause = if conditions.is_empty() {
            "1=1".to_string()
        } else {
            conditions.join(" AND ")
        };
        let limit = filter.limit.unwrap_or(DEFAULT_QUERY_LIMIT);
        let sql = format!(
            "SELECT id, ts, principal, op, object, args, result, error_kind,
                    tx_id, cp_id, provenance, risk_tier, prev_id
             FROM entries WHERE {where_clause} ORDER BY rowid ASC LIMIT {limit}"
        );

        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&sql).map_err(AuditError::Query)?;
        let param_refs: Vec<&dyn rusqlite::types::ToSql> =
            params.iter().map(|p| p.as_ref() as &dyn rusqlite::types::ToSql).collect();
        let rows = stmt
            .query_map(param_refs.as_slice(), Self::decode_row)
            .map_err(AuditError::Query)?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row.map_err(AuditError::Query)??);
        }
        Ok(entries)
    }

    #[allow(clippy::needless_pass_by_value)]
    fn decode_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Result<AuditEntry, AuditError>> {
        let id: String = row.get(0)?;
        let args_text: String = row.get(5)?;
        let result_text: String = row.get(6)?;
        let provenance_text: String = row.get(10)?;
        let risk_text: Option<String> = row.get(11)?;
        let prev_text: Option<String> = row.get(12)?;

        let decode = || -> Result<AuditEntry, String> {
            Ok(AuditEntry {
                id: Uuid::parse_str(&id).map_err(|e| e.to_string())?,
                ts: row.get(1).map_err(|e| e.to_string())?,
                principal: row.get(2).map_err(|e| e.to_string())?,
                op: row.get(3).map_err(|e| e.to_string())?,
                object: row.get(4).map_err(|e| e.to_string())?,
                args: serde_json::from_str(&args_text).map_err(|e| e.to_string())?,
                result: OpResult::parse(&result_text)
                    .ok_or_else(|| format!("bad result {result_text}"))?,
                error_kind: row.get(7).map_err(|e| e.to_string())?,
                tx_id: row.get(8).map_err(|e| e.to_string())?,
                checkpoint_id: row.get(9).map_err(|e| e.to_string())?,
                provenance: Provenance::parse(&provenance_text)
                    .ok_or_else(|| format!("bad provenance {provenance_text}"))?,
                risk_tier: match risk_text {
                    Some(t) => Some(
                        RiskTier::parse(&t).ok_or_else(|| format!("bad risk tier {t}"))?,
                    ),
                    None => None,
                },
                prev_id: match prev_text {
                    Some(t) => Some(Uuid::parse_str(&t).map_err(|e| e.to_string())?),
                    None => None,
                },
            })
        };

        Ok(decode().map_err(|reason| AuditError::CorruptRow { id, reason }))
    }

    /// Returns the most recent entry, if any.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError::Query`] on store failure.
    pub fn last(&self) -> Result<Option<AuditEntry>, AuditError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT id, ts, principal, op, object, args, result, error_kind,
                        tx_id, cp_id, provenance, risk_tier, prev_id
                 FROM entries ORDER BY rowid DESC LIMIT 1",
            )
            .map_err(AuditError::Query)?;
        let row = stmt
            .query_row([], Self::decode_row)
            .optional()
            .map_err(AuditError::Query)?;
        row.transpose()
    }

    /// Counts entries matching the filter.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError::Query`] on store failure.
    pub fn count(&self, filter: &AuditFilter) -> Result<usize, AuditError> {
        Ok(self.query(filter)?.len())
    }

    /// Returns every entry logged inside the given transaction.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError::Query`] on store failure.
    pub fn transaction_log(&self, tx_id: &str) -> Result<Vec<AuditEntry>, AuditError> {
        self.query(&AuditFilter {
            tx_id: Some(tx_id.to_string()),
            ..AuditFilter::default()
        })
    }

    /// Exports matching entries as a JSON array. The redaction salt is
    /// never part of the export.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError::Query`] or [`AuditError::Export`].
    pub fn export_json(
        &self,
        path: impl AsRef<Path>,
        filter: &AuditFilter,
    ) -> Result<usize, AuditError> {
        let entries = self.query(filter)?;
        let text = serde_json::to_string_pretty(&entries)
            .map_err(|e| AuditError::Export(std::io::Error::other(e)))?;
        std::fs::write(path, text)?;
        Ok(entries.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log() -> AuditLog {
        AuditLog::in_memory().unwrap()
    }

    fn map(pairs: &[(&str, &str)]) -> Map<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), Value::String((*v).to_string())))
            .collect()
    }

    #[test]
    fn log_and_query_roundtrip() {
        let audit = log();
        audit
            .log(
                AuditEvent::new("tab.open", "agent:1")
                    .object("tab:1")
                    .args(map(&[("url", "https://example.com")]))
                    .provenance(Provenance::Agent),
            )
            .unwrap();

        let entries = audit.query(&AuditFilter::op("tab.open")).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].principal, "agent:1");
        assert_eq!(entries[0].object.as_deref(), Some("tab:1"));
        assert_eq!(entries[0].provenance, Provenance::Agent);
        assert_eq!(entries[0].result, OpResult::Success);
    }

    #[test]
    fn op_glob_matches_prefix() {
        let audit = log();
        for op in ["tab.open", "tab.navigate", "form.fill"] {
            audit.log(AuditEvent::new(op, "agent:1")).unwrap();
        }
        let entries = audit.query(&AuditFilter::op("tab.*")).unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|e| e.op.starts_with("tab.")));
    }

    #[test]
    fn prev_id_chain_is_dense_per_principal() {
        let audit = log();
        let first = audit.log(AuditEvent::new("tab.open", "agent:1")).unwrap();
        // Another principal's entry must not break agent:1's chain.
        audit.log(AuditEvent::new("tab.open", "agent:2")).unwrap();
        let second = audit.log(AuditEvent::new("tab.close", "agent:1")).unwrap();

        assert_eq!(first.prev_id, None);
        assert_eq!(second.prev_id, Some(first.id));
    }

    #[test]
    fn secrets_are_redacted_before_persisting() {
        let audit = log();
        audit
            .log(
                AuditEvent::new("form.fill", "agent:1")
                    .args(map(&[("password", "hunter2"), ("username", "alice")])),
            )
            .unwrap();
        let entries = audit.query(&AuditFilter::any()).unwrap();
        let text = serde_json::to_string(&entries[0].args).unwrap();
        assert!(!text.contains("hunter2"));
        assert!(text.contains("alice"));
    }

    #[test]
    fn last_returns_most_recent() {
        let audit = log();
        audit.log(AuditEvent::new("tab.open", "agent:1")).unwrap();
        audit.log(AuditEvent::new("tab.close", "agent:1")).unwrap();
        let last = audit.last().unwrap().unwrap();
        assert_eq!(last.op, "tab.close");
    }

    #[test]
    fn transaction_context_is_stamped() {
        let audit = log();
        audit.set_transaction_context("tx:1", Some("cp:1"));
        let entry = audit.log(AuditEvent::new("tab.navigate", "agent:1")).unwrap();
        audit.clear_transaction_context();
        let after = audit.log(AuditEvent::new("tab.close", "agent:1")).unwrap();

        assert_eq!(entry.tx_id.as_deref(), Some("tx:1"));
        assert_eq!(entry.checkpoint_id.as_deref(), Some("cp:1"));
        assert_eq!(after.tx_id, None);
    }

    #[test]
    fn denied_entries_carry_error_kind() {
        let audit = log();
        audit
            .log(
                AuditEvent::new("form.submit", "agent:1")
                    .failure(OpResult::Denied, "no_grant"),
            )
            .unwrap();
        let entries = audit
            .query(&AuditFilter {
                result: Some(OpResult::Denied),
                ..AuditFilter::default()
            })
            .unwrap();
        assert_eq!(entries[0].error_kind.as_deref(), Some("no_grant"));
    }
}
