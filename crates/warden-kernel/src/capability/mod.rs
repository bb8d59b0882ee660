//! Capability Broker: authorization decisions for every privileged
//! operation.
//!
//! A capability is an unforgeable token binding `(principal, operation
//! pattern, resource pattern, risk tier, constraints)`. The broker answers
//! `check`/`require` by searching the principal's non-revoked, non-expired
//! capabilities for one whose patterns match and whose constraints hold;
//! presence of any match is sufficient.
//!
//! Expired capabilities are tombstoned in memory, never deleted, so a
//! denied check can still say *why*. Revocations are persisted to the
//! tombstone store before `revoke` returns and are re-emitted at startup:
//! a restart can never resurrect a revoked token.
//!
//! Every `check`/`require` emits exactly one audit entry; if that entry
//! cannot be written, the decision itself fails (fail-closed).

mod pattern;
mod store;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

pub use pattern::{op_matches, resource_matches, url_matches};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
pub use store::{RevocationStore, Tombstone};
use subtle::ConstantTimeEq;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::audit::{unix_now, AuditError, AuditEvent, AuditLog, OpResult};

/// Errors from the capability broker.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CapabilityError {
    /// The check failed: no satisfiable capability.
    #[error("{principal} may not {operation} on {resource} ({reason})")]
    Denied {
        /// The principal that was refused.
        principal: String,
        /// The requested operation.
        operation: String,
        /// The requested resource.
        resource: String,
        /// Why the check failed.
        reason: DenyReason,
    },

    /// The revocation store failed. Revocation must not be reported as
    /// done if its tombstone is not durable.
    #[error("revocation store error: {0}")]
    Store(#[from] rusqlite::Error),

    /// The decision's audit entry could not be written; the decision is
    /// void (fail-closed).
    #[error(transparent)]
    Audit(#[from] AuditError),

    /// The capability token was not found.
    #[error("unknown capability token: {token}")]
    UnknownToken {
        /// The presented token.
        token: String,
    },
}

/// Why a check was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    /// No capability pattern covers the request.
    NoGrant,
    /// A covering capability exists but has expired.
    Expired,
    /// A covering capability exists but was revoked.
    Revoked,
    /// A covering, live capability exists but a constraint failed.
    ConstraintFailed,
}

impl DenyReason {
    /// Returns the audit `error_kind` string for this reason.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NoGrant => "no_grant",
            Self::Expired => "expired",
            Self::Revoked => "revoked",
            Self::ConstraintFailed => "constraint_failed",
        }
    }
}

impl std::fmt::Display for DenyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Risk tiers controlling approval and rollback rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RiskTier {
    /// Read-only; auto-grantable by policy, always logged.
    #[serde(rename = "T1_READ")]
    Read,
    /// Mutates browser-local state; rollback-safe.
    #[serde(rename = "T2_STATEFUL")]
    Stateful,
    /// External side effects; per-execution approval, never rolled back
    /// after commit.
    #[serde(rename = "T3_IRREVERSIBLE")]
    Irreversible,
}

impl RiskTier {
    /// Returns the wire representation of this tier.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Read => "T1_READ",
            Self::Stateful => "T2_STATEFUL",
            Self::Irreversible => "T3_IRREVERSIBLE",
        }
    }

    /// Parses a tier from its wire representation.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "T1_READ" => Some(Self::Read),
            "T2_STATEFUL" => Some(Self::Stateful),
            "T3_IRREVERSIBLE" => Some(Self::Irreversible),
            _ => None,
        }
    }
}

impl std::fmt::Display for RiskTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Token-bucket rate limit constraint. Token bucket (rather than a fixed
/// window) so short bursts up to `burst` are allowed while the long-run
/// rate stays at `per_sec`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateLimit {
    /// Sustained refill rate, tokens per second.
    pub per_sec: f64,
    /// Bucket capacity.
    pub burst: u32,
}

/// Wall-clock validity window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeWindow {
    /// Checks before this instant fail.
    pub not_before: Option<f64>,
    /// Checks at or after this instant fail.
    pub not_after: Option<f64>,
}

/// Optional constraints on a capability. All present constraints must
/// hold for a match.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Constraints {
    /// URL glob the call's URL argument must match (when a URL is part of
    /// the call).
    pub url_pattern: Option<String>,
    /// Token-bucket rate limit.
    pub rate_limit: Option<RateLimit>,
    /// Wall-clock window.
    pub time_window: Option<TimeWindow>,
}

impl Constraints {
    /// No constraints.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// Constrains matched calls to URLs under the given glob.
    #[must_use]
    pub fn url(pattern: impl Into<String>) -> Self {
        Self {
            url_pattern: Some(pattern.into()),
            ..Self::default()
        }
    }
}

/// Lifecycle state of a capability. Terminal states are tombstones: the
/// record stays so deny reasons stay precise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CapabilityState {
    /// Usable.
    Active,
    /// Past `expires_at`.
    Expired,
    /// Explicitly revoked (tombstone persisted).
    Revoked,
}

/// An unforgeable authorization record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Capability {
    /// Unguessable token; also the capability's id in the tombstone store.
    pub token: Uuid,
    /// Principal the capability was granted to.
    pub principal: String,
    /// Operation pattern (`tab.*`, `form.submit`, `**`).
    pub operation: String,
    /// Resource pattern (`tab:*`, `form:8`, `*`).
    pub resource: String,
    /// Risk tier.
    pub risk: RiskTier,
    /// Constraints that must hold for a match.
    pub constraints: Constraints,
    /// When the capability was issued (Unix seconds).
    pub issued_at: f64,
    /// Expiry instant; `None` means no expiry.
    pub expires_at: Option<f64>,
    /// Lifecycle state.
    pub state: CapabilityState,
}

impl Capability {
    /// Whether the capability is expired at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: f64) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }

    /// Whether the patterns cover `(operation, resource)`.
    #[must_use]
    pub fn covers(&self, operation: &str, resource: &str) -> bool {
        op_matches(&self.operation, operation) && resource_matches(&self.resource, resource)
    }
}

/// Constant-time token comparison.
fn token_eq(a: Uuid, b: Uuid) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

#[derive(Debug, Clone, Copy)]
struct Bucket {
    tokens: f64,
    last_refill: f64,
}

#[derive(Default)]
struct BrokerState {
    caps: HashMap<Uuid, Capability>,
    by_principal: HashMap<String, Vec<Uuid>>,
    buckets: HashMap<Uuid, Bucket>,
}

/// Extra context supplied with a check (currently the URL argument that
/// URL constraints are evaluated against).
#[derive(Debug, Clone, Copy, Default)]
pub struct CheckContext<'a> {
    /// URL argument of the mediated call, when it has one.
    pub url: Option<&'a str>,
}

/// The capability broker.
pub struct CapabilityBroker {
    state: Mutex<BrokerState>,
    store: RevocationStore,
    audit: Arc<AuditLog>,
}

impl std::fmt::Debug for CapabilityBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityBroker").finish_non_exhaustive()
    }
}

impl CapabilityBroker {
    /// Creates a broker over the given audit log and tombstone store.
    /// Revoked capabilities are re-emitted from the store so restart
    /// cannot resurrect them and deny reasons survive.
    ///
    /// # Errors
    ///
    /// Returns [`CapabilityError::Store`] if tombstones cannot be loaded.
    pub fn new(audit: Arc<AuditLog>, store: RevocationStore) -> Result<Self, CapabilityError> {
        let mut state = BrokerState::default();
        for tombstone in store.load_all()? {
            let Ok(token) = Uuid::parse_str(&tombstone.cap_id) else {
                warn!(cap_id = %tombstone.cap_id, "skipping unparseable tombstone");
                continue;
            };
            let cap = Capability {
                token,
                principal: tombstone.principal.clone(),
                operation: tombstone.operation.clone(),
                resource: tombstone.resource.clone(),
                risk: RiskTier::Read,
                constraints: Constraints::none(),
                issued_at: tombstone.revoked_at,
                expires_at: None,
                state: CapabilityState::Revoked,
            };
            state
                .by_principal
                .entry(cap.principal.clone())
                .or_default()
                .push(token);
            state.caps.insert(token, cap);
        }
        Ok(Self {
            state: Mutex::new(state),
            store,
            audit,
        })
    }

    /// Grants a capability.
    ///
    /// # Errors
    ///
    /// Returns [`CapabilityError::Audit`] if the grant cannot be audited.
    pub fn grant(
        &self,
        principal: &str,
        operation: &str,
        resource: &str,
        risk: RiskTier,
        ttl_seconds: Option<f64>,
        constraints: Constraints,
    ) -> Result<Capability, CapabilityError> {
        let now = unix_now();
        let cap = Capability {
            token: Uuid::new_v4(),
            principal: principal.to_string(),
            operation: operation.to_string(),
            resource: resource.to_string(),
            risk,
            constraints,
            issued_at: now,
            expires_at: ttl_seconds.map(|ttl| now + ttl),
            state: CapabilityState::Active,
        };

        let mut args = Map::new();
        args.insert("to".into(), Value::String(principal.into()));
        args.insert("operation".into(), Value::String(operation.into()));
        args.insert("resource".into(), Value::String(resource.into()));
        self.audit.log(
            AuditEvent::new("capability.grant", "system")
                .object(short_token(cap.token))
                .args(args)
                .risk(risk),
        )?;

        let mut state = self.state.lock().unwrap();
        state
            .by_principal
            .entry(cap.principal.clone())
            .or_default()
            .push(cap.token);
        if let Some(limit) = cap.constraints.rate_limit {
            state.buckets.insert(
                cap.token,
                Bucket {
                    tokens: f64::from(limit.burst),
                    last_refill: now,
                },
            );
        }
        state.caps.insert(cap.token, cap.clone());
        debug!(principal, operation, resource, risk = %risk, "capability granted");
        Ok(cap)
    }

    /// Evaluates a request without auditing. Flips expired capabilities
    /// to their tombstone state as a side effect.
    fn evaluate(
        &self,
        principal: &str,
        operation: &str,
        resource: &str,
        ctx: CheckContext<'_>,
    ) -> Result<RiskTier, DenyReason> {
        let now = unix_now();
        let mut state = self.state.lock().unwrap();
        let tokens: Vec<Uuid> = state
            .by_principal
            .get(principal)
            .cloned()
            .unwrap_or_default();

        let mut best_deny: Option<DenyReason> = None;
        for token in tokens {
            let Some(cap) = state.caps.get_mut(&token) else {
                continue;
            };
            if !cap.covers(operation, resource) {
                continue;
            }
            if cap.state == CapabilityState::Active && cap.is_expired_at(now) {
                cap.state = CapabilityState::Expired;
            }
            match cap.state {
                CapabilityState::Revoked => {
                    best_deny = Some(prefer(best_deny, DenyReason::Revoked));
                    continue;
                }
                CapabilityState::Expired => {
                    best_deny = Some(prefer(best_deny, DenyReason::Expired));
                    continue;
                }
                CapabilityState::Active => {}
            }
            let constraints = cap.constraints.clone();
            let risk = cap.risk;
            if !Self::constraints_hold(&mut *state, token, &constraints, ctx, now) {
                best_deny = Some(prefer(best_deny, DenyReason::ConstraintFailed));
                continue;
            }
            return Ok(risk);
        }
        Err(best_deny.unwrap_or(DenyReason::NoGrant))
    }

    fn constraints_hold(
        state: &mut BrokerState,
        token: Uuid,
        constraints: &Constraints,
        ctx: CheckContext<'_>,
        now: f64,
    ) -> bool {
        if let Some(window) = &constraints.time_window {
            if window.not_before.is_some_and(|at| now < at) {
                return false;
            }
            if window.not_after.is_some_and(|at| now >= at) {
                return false;
            }
        }
        if let Some(pattern) = &constraints.url_pattern {
            match ctx.url {
                Some(url) if url_matches(pattern, url) => {}
                // A URL constraint with no URL in the call fails closed.
                _ => return false,
            }
        }
        if let Some(limit) = constraints.rate_limit {
            let bucket = state.buckets.entry(token).or_insert(Bucket {
                tokens: f64::from(limit.burst),
                last_refill: now,
            });
            let elapsed = (now - bucket.last_refill).max(0.0);
            bucket.tokens =
                (bucket.tokens + elapsed * limit.per_sec).min(f64::from(limit.burst));
            bucket.last_refill = now;
            if bucket.tokens < 1.0 {
                return false;
            }
            bucket.tokens -= 1.0;
        }
        true
    }

    /// Checks whether `principal` may perform `operation` on `resource`.
    /// Emits exactly one audit entry.
    ///
    /// # Errors
    ///
    /// Returns [`CapabilityError::Audit`] if the entry cannot be written
    /// (the decision is then void).
    pub fn check(
        &self,
        principal: &str,
        operation: &str,
        resource: &str,
        ctx: CheckContext<'_>,
    ) -> Result<bool, CapabilityError> {
        match self.evaluate(principal, operation, resource, ctx) {
            Ok(risk) => {
                self.audit_decision(principal, operation, resource, Ok(risk))?;
                Ok(true)
            }
            Err(reason) => {
                self.audit_decision(principal, operation, resource, Err(reason))?;
                Ok(false)
            }
        }
    }

    /// Like [`Self::check`], but an error on denial. Returns the matching
    /// capability's risk tier on success.
    ///
    /// # Errors
    ///
    /// Returns [`CapabilityError::Denied`] with the deny reason, or
    /// [`CapabilityError::Audit`] if the decision cannot be audited.
    pub fn require(
        &self,
        principal: &str,
        operation: &str,
        resource: &str,
        ctx: CheckContext<'_>,
    ) -> Result<RiskTier, CapabilityError> {
        match self.evaluate(principal, operation, resource, ctx) {
            Ok(risk) => {
                self.audit_decision(principal, operation, resource, Ok(risk))?;
                Ok(risk)
            }
            Err(reason) => {
                self.audit_decision(principal, operation, resource, Err(reason))?;
                Err(CapabilityError::Denied {
                    principal: principal.to_string(),
                    operation: operation.to_string(),
                    resource: resource.to_string(),
                    reason,
                })
            }
        }
    }

    fn audit_decision(
        &self,
        principal: &str,
        operation: &str,
        resource: &str,
        outcome: Result<RiskTier, DenyReason>,
    ) -> Result<(), CapabilityError> {
        let mut args = Map::new();
        args.insert("operation".into(), Value::String(operation.into()));
        let mut event = AuditEvent::new("capability.check", principal)
            .object(resource)
            .args(args);
        event = match outcome {
            Ok(risk) => event.risk(risk),
            Err(reason) => event.failure(OpResult::Denied, reason.as_str()),
        };
        self.audit.log(event)?;
        Ok(())
    }

    /// Revokes a capability by token. The tombstone is durable before
    /// this returns.
    ///
    /// # Errors
    ///
    /// Returns [`CapabilityError::UnknownToken`] for an unknown token,
    /// [`CapabilityError::Store`] if the tombstone cannot be persisted.
    pub fn revoke(&self, token: Uuid, reason: &str) -> Result<(), CapabilityError> {
        let tombstone = {
            let state = self.state.lock().unwrap();
            let cap = state
                .caps
                .values()
                .find(|c| token_eq(c.token, token))
                .ok_or_else(|| CapabilityError::UnknownToken {
                    token: token.to_string(),
                })?;
            Tombstone {
                cap_id: cap.token.to_string(),
                principal: cap.principal.clone(),
                operation: cap.operation.clone(),
                resource: cap.resource.clone(),
                revoked_at: unix_now(),
                reason: reason.to_string(),
            }
        };
        // Durable first: an un-persisted revocation must not be observable.
        self.store.record(&tombstone)?;

        let principal = {
            let mut state = self.state.lock().unwrap();
            match state.caps.get_mut(&token) {
                Some(cap) => {
                    cap.state = CapabilityState::Revoked;
                    cap.principal.clone()
                }
                None => tombstone.principal.clone(),
            }
        };
        self.audit.log(
            AuditEvent::new("capability.revoke", "system")
                .object(short_token(token))
                .args({
                    let mut args = Map::new();
                    args.insert("was_for".into(), Value::String(principal.clone()));
                    args
                }),
        )?;
        debug!(principal, token = %short_token(token), "capability revoked");
        Ok(())
    }

    /// Revokes every active capability of a principal. Returns the count.
    ///
    /// # Errors
    ///
    /// Returns [`CapabilityError::Store`] if any tombstone cannot be
    /// persisted; capabilities already tombstoned stay revoked.
    pub fn revoke_all(&self, principal: &str) -> Result<usize, CapabilityError> {
        let tokens: Vec<Uuid> = {
            let state = self.state.lock().unwrap();
            state
                .by_principal
                .get(principal)
                .map(|tokens| {
                    tokens
                        .iter()
                        .copied()
                        .filter(|t| {
                            state.caps.get(t).is_some_and(|c| {
                                c.state == CapabilityState::Active
                            })
                        })
                        .collect()
                })
                .unwrap_or_default()
        };
        for token in &tokens {
            self.revoke(*token, "revoke_all")?;
        }
        Ok(tokens.len())
    }

    /// Lists the principal's live (non-expired, non-revoked) capabilities.
    #[must_use]
    pub fn list(&self, principal: &str) -> Vec<Capability> {
        let now = unix_now();
        let state = self.state.lock().unwrap();
        state
            .by_principal
            .get(principal)
            .map(|tokens| {
                tokens
                    .iter()
                    .filter_map(|t| state.caps.get(t))
                    .filter(|c| c.state == CapabilityState::Active && !c.is_expired_at(now))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Deny-reason priority when several capabilities cover the request:
/// a failed constraint on a live capability is the most informative,
/// then revocation, then expiry.
fn prefer(current: Option<DenyReason>, new: DenyReason) -> DenyReason {
    fn rank(reason: DenyReason) -> u8 {
        match reason {
            DenyReason::ConstraintFailed => 3,
            DenyReason::Revoked => 2,
            DenyReason::Expired => 1,
            DenyReason::NoGrant => 0,
        }
    }
    match current {
        Some(existing) if rank(existing) >= rank(new) => existing,
        _ => new,
    }
}

/// Abbreviated token for audit object fields.
fn short_token(token: Uuid) -> String {
    let full = token.simple().to_string();
    format!("cap:{}", &full[..8])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditFilter;

    fn broker() -> CapabilityBroker {
        let audit = Arc::new(AuditLog::in_memory().unwrap());
        CapabilityBroker::new(audit, RevocationStore::in_memory().unwrap()).unwrap()
    }

    #[test]
    fn grant_then_check_allows() {
        let broker = broker();
        broker
            .grant("agent:1", "tab.read", "tab:*", RiskTier::Read, None, Constraints::none())
            .unwrap();
        assert!(broker
            .check("agent:1", "tab.read", "tab:42", CheckContext::default())
            .unwrap());
    }

    #[test]
    fn absent_grant_denies_with_no_grant() {
        let broker = broker();
        let err = broker
            .require("agent:1", "tab.read", "tab:42", CheckContext::default())
            .unwrap_err();
        assert!(matches!(
            err,
            CapabilityError::Denied {
                reason: DenyReason::NoGrant,
                ..
            }
        ));
    }

    #[test]
    fn expired_capability_is_equivalent_to_absence_but_reports_expired() {
        let broker = broker();
        broker
            .grant(
                "agent:1",
                "tab.read",
                "tab:*",
                RiskTier::Read,
                Some(-1.0),
                Constraints::none(),
            )
            .unwrap();
        let err = broker
            .require("agent:1", "tab.read", "tab:42", CheckContext::default())
            .unwrap_err();
        assert!(matches!(
            err,
            CapabilityError::Denied {
                reason: DenyReason::Expired,
                ..
            }
        ));
    }

    #[test]
    fn revoke_denies_with_revoked() {
        let broker = broker();
        let cap = broker
            .grant("agent:1", "tab.read", "tab:*", RiskTier::Read, None, Constraints::none())
            .unwrap();
        broker.revoke(cap.token, "test").unwrap();
        let err = broker
            .require("agent:1", "tab.read", "tab:42", CheckContext::default())
            .unwrap_err();
        assert!(matches!(
            err,
            CapabilityError::Denied {
                reason: DenyReason::Revoked,
                ..
            }
        ));
    }

    #[test]
    fn require_returns_matched_risk_tier() {
        let broker = broker();
        broker
            .grant(
                "agent:1",
                "form.submit",
                "form:*",
                RiskTier::Irreversible,
                None,
                Constraints::none(),
            )
            .unwrap();
        let tier = broker
            .require("agent:1", "form.submit", "form:8", CheckContext::default())
            .unwrap();
        assert_eq!(tier, RiskTier::Irreversible);
    }

    #[test]
    fn url_constraint_fails_closed_without_url() {
        let broker = broker();
        broker
            .grant(
                "agent:1",
                "tab.navigate",
                "tab:*",
                RiskTier::Stateful,
                None,
                Constraints::url("https://example.com/*"),
            )
            .unwrap();

        // Matching URL passes.
        assert!(broker
            .check(
                "agent:1",
                "tab.navigate",
                "tab:1",
                CheckContext {
                    url: Some("https://example.com/login")
                },
            )
            .unwrap());
        // Non-matching URL fails.
        let err = broker
            .require(
                "agent:1",
                "tab.navigate",
                "tab:1",
                CheckContext {
                    url: Some("https://evil.test/")
                },
            )
            .unwrap_err();
        assert!(matches!(
            err,
            CapabilityError::Denied {
                reason: DenyReason::ConstraintFailed,
                ..
            }
        ));
        // Missing URL fails closed.
        assert!(!broker
            .check("agent:1", "tab.navigate", "tab:1", CheckContext::default())
            .unwrap());
    }

    #[test]
    fn rate_limit_is_a_token_bucket() {
        let broker = broker();
        broker
            .grant(
                "agent:1",
                "tab.read",
                "tab:*",
                RiskTier::Read,
                None,
                Constraints {
                    rate_limit: Some(RateLimit {
                        per_sec: 0.0,
                        burst: 2,
                    }),
                    ..Constraints::none()
                },
            )
            .unwrap();
        let ctx = CheckContext::default();
        assert!(broker.check("agent:1", "tab.read", "tab:1", ctx).unwrap());
        assert!(broker.check("agent:1", "tab.read", "tab:1", ctx).unwrap());
        // Bucket exhausted, no refill (per_sec = 0).
        assert!(!broker.check("agent:1", "tab.read", "tab:1", ctx).unwrap());
    }

    #[test]
    fn every_check_is_audited() {
        let audit = Arc::new(AuditLog::in_memory().unwrap());
        let broker =
            CapabilityBroker::new(Arc::clone(&audit), RevocationStore::in_memory().unwrap())
                .unwrap();
        broker
            .grant("agent:1", "tab.read", "tab:*", RiskTier::Read, None, Constraints::none())
            .unwrap();
        broker
            .check("agent:1", "tab.read", "tab:1", CheckContext::default())
            .unwrap();
        broker
            .check("agent:1", "form.fill", "form:1", CheckContext::default())
            .unwrap();

        let checks = audit.query(&AuditFilter::op("capability.check")).unwrap();
        assert_eq!(checks.len(), 2);
        assert_eq!(checks[0].result, OpResult::Success);
        assert_eq!(checks[1].result, OpResult::Denied);
        assert_eq!(checks[1].error_kind.as_deref(), Some("no_grant"));
    }

    #[test]
    fn revoke_all_counts_and_tombstones() {
        let broker = broker();
        for op in ["tab.read", "tab.navigate"] {
            broker
                .grant("agent:1", op, "tab:*", RiskTier::Read, None, Constraints::none())
                .unwrap();
        }
        assert_eq!(broker.revoke_all("agent:1").unwrap(), 2);
        assert!(broker.list("agent:1").is_empty());
        // Idempotent on an already-clean principal.
        assert_eq!(broker.revoke_all("agent:1").unwrap(), 0);
    }
}
