//! Agent Runtime: code admission and mediated execution.
//!
//! A submission moves through three gates. **Admission** parses the
//! source and walks the AST against the allow-list (see [`admission`]); one violation refuses execution. **Dry-run** executes the program with
//! every side effect stubbed to collect the capability set it would
//! need, for surfacing to a human governance collaborator. **Execution**
//! interprets the program with the mediated `browser` surface bound,
//! under a wall-clock deadline, an operation budget, a best-effort value
//! high-water mark, and an external cancellation flag, all observed at
//! every mediated call boundary. On any abnormal end, transactions the
//! submission left open are aborted and the failure is audited.

mod admission;
mod api;
mod ast;
mod interp;
mod lexer;
mod parser;
mod value;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub use admission::{validate, ValidationError, ALLOWED_IMPORTS};
pub use api::{
    ApprovalDecision, ApprovalHandler, CallTarget, DenyAll, DryRunApi, MediatedApi,
    RequiredCapability, StaticApprovals,
};
pub use ast::{BinaryOp, Expr, ExprKind, Pos, Program, Stmt, StmtKind, UnaryOp};
pub use parser::{parse, ParseError};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;
pub use value::{Data, ScriptValue};

use crate::audit::{AuditError, AuditEvent, AuditLog, OpResult, Provenance};
use crate::capability::{CapabilityBroker, CapabilityError};
use crate::credential::{CredentialError, CredentialVault};
use crate::object::{ObjectError, ObjectManager};
use crate::renderer::{Renderer, RendererError};
use crate::txn::{TransactionCoordinator, TxnError};

/// Errors raised while running agent code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RuntimeError {
    /// The broker refused or could not decide.
    #[error(transparent)]
    Capability(#[from] CapabilityError),

    /// Registry failure.
    #[error(transparent)]
    Object(#[from] ObjectError),

    /// Transaction failure.
    #[error(transparent)]
    Txn(#[from] TxnError),

    /// Renderer failure (aborts the enclosing transaction).
    #[error(transparent)]
    Renderer(#[from] RendererError),

    /// Credential vault failure.
    #[error(transparent)]
    Credential(#[from] CredentialError),

    /// Audit store failure (fail-closed for the operation).
    #[error(transparent)]
    Audit(#[from] AuditError),

    /// A mediation-boundary security rule refused the call.
    #[error("security rule '{rule}' refused {op} (provenance: {provenance})")]
    Security {
        /// The rule that fired (`firewall`).
        rule: &'static str,
        /// The refused operation.
        op: String,
        /// The offending provenance.
        provenance: Provenance,
    },

    /// A resource budget ran out.
    #[error("quota exceeded: {kind}")]
    QuotaExceeded {
        /// Which budget (`operations`, `values`).
        kind: &'static str,
    },

    /// The wall-clock deadline passed.
    #[error("execution timed out after {budget_secs}s")]
    Timeout {
        /// The configured budget.
        budget_secs: f64,
    },

    /// The submission was cancelled externally.
    #[error("execution cancelled")]
    Cancelled,

    /// A script-level fault (type error, unbound name, unknown op).
    #[error("script error: {message}")]
    Script {
        /// What went wrong.
        message: String,
    },
}

impl RuntimeError {
    /// The audit `error_kind` string for this error.
    #[must_use]
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Capability(CapabilityError::Denied { reason, .. }) => reason.as_str(),
            Self::Capability(CapabilityError::Audit(e)) | Self::Audit(e) => match e {
                AuditError::Write(_) => "audit_write",
                _ => "audit_query",
            },
            Self::Capability(_) => "capability",
            Self::Object(ObjectError::NotFound { .. }) => "not_found",
            Self::Object(ObjectError::Conflict { .. }) => "conflict",
            Self::Object(_) => "bad_object",
            Self::Txn(TxnError::Irreversible { .. }) => "irreversible",
            Self::Txn(TxnError::Closed { .. }) => "tx_closed",
            Self::Txn(TxnError::CommitBoundary { .. }) => "commit_boundary",
            Self::Txn(TxnError::CheckpointNotFound { .. }) => "checkpoint_not_found",
            Self::Txn(_) => "transaction",
            Self::Renderer(_) => "renderer",
            Self::Credential(_) => "credential",
            Self::Security { .. } => "firewall",
            Self::QuotaExceeded { .. } => "quota_exceeded",
            Self::Timeout { .. } => "timeout",
            Self::Cancelled => "cancelled",
            Self::Script { .. } => "script",
        }
    }

    /// Whether this error reflects a capability denial (never retried).
    #[must_use]
    pub const fn is_denial(&self) -> bool {
        matches!(
            self,
            Self::Capability(CapabilityError::Denied { .. }) | Self::Security { .. }
        )
    }
}

/// Resource-accounting context threaded through an execution.
pub struct ExecCx {
    deadline: Instant,
    budget_secs: f64,
    ops_used: u32,
    max_ops: u32,
    values_created: u64,
    max_values: u64,
    cancel: Option<Arc<AtomicBool>>,
}

impl ExecCx {
    fn new(config: &RuntimeConfig, cancel: Option<Arc<AtomicBool>>) -> Self {
        Self {
            deadline: Instant::now() + config.timeout,
            budget_secs: config.timeout.as_secs_f64(),
            ops_used: 0,
            max_ops: config.max_ops,
            values_created: 0,
            max_values: config.max_values,
            cancel,
        }
    }

    /// Observes the cancellation flag and the deadline.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::Cancelled`] or [`RuntimeError::Timeout`].
    pub fn observe(&self) -> Result<(), RuntimeError> {
        if self
            .cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
        {
            return Err(RuntimeError::Cancelled);
        }
        if Instant::now() >= self.deadline {
            return Err(RuntimeError::Timeout {
                budget_secs: self.budget_secs,
            });
        }
        Ok(())
    }

    /// Charges one privileged operation against the budget.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::QuotaExceeded`] past the budget, plus the
    /// observation errors.
    pub fn charge_op(&mut self) -> Result<(), RuntimeError> {
        self.observe()?;
        self.ops_used += 1;
        if self.ops_used > self.max_ops {
            return Err(RuntimeError::QuotaExceeded { kind: "operations" });
        }
        Ok(())
    }

    /// Charges allocated values against the high-water mark
    /// (best-effort memory bound).
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::QuotaExceeded`].
    pub fn charge_values(&mut self, count: usize) -> Result<(), RuntimeError> {
        self.values_created += count as u64;
        if self.values_created > self.max_values {
            return Err(RuntimeError::QuotaExceeded { kind: "values" });
        }
        Ok(())
    }

    /// Privileged operations used so far.
    #[must_use]
    pub const fn ops_used(&self) -> u32 {
        self.ops_used
    }
}

/// Terminal states of a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    /// Ran to the end (or an explicit `return`).
    Completed,
    /// Refused or failed.
    Failed,
    /// Hit the wall-clock deadline.
    TimedOut,
    /// Exhausted an operation or value budget.
    BudgetExhausted,
}

impl ExecutionState {
    /// Returns the wire representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
            Self::BudgetExhausted => "budget_exhausted",
        }
    }
}

/// Outcome of a submission.
#[derive(Debug)]
pub struct ExecutionResult {
    /// Terminal state.
    pub state: ExecutionState,
    /// The script's return value (JSON; provenance dropped).
    pub return_value: Option<serde_json::Value>,
    /// Error display, when not completed.
    pub error: Option<String>,
    /// Audit `error_kind`, when not completed.
    pub error_kind: Option<&'static str>,
    /// Wall-clock duration.
    pub duration: Duration,
    /// Privileged operations used.
    pub ops_used: u32,
    /// First and last audit entry ids of this submission's window.
    pub audit_range: Option<(Uuid, Uuid)>,
}

/// Runtime quotas and limits.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Wall-clock budget per submission.
    pub timeout: Duration,
    /// Privileged-call budget per submission.
    pub max_ops: u32,
    /// Best-effort value-allocation high-water mark.
    pub max_values: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_ops: 1000,
            max_values: 1_000_000,
        }
    }
}

/// The agent runtime.
pub struct AgentRuntime {
    audit: Arc<AuditLog>,
    broker: Arc<CapabilityBroker>,
    objects: Arc<ObjectManager>,
    txns: Arc<TransactionCoordinator>,
    renderer: Arc<dyn Renderer>,
    vault: Arc<CredentialVault>,
    approvals: Arc<dyn ApprovalHandler>,
    config: RuntimeConfig,
}

impl std::fmt::Debug for AgentRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentRuntime").finish_non_exhaustive()
    }
}

impl AgentRuntime {
    /// Builds a runtime over the kernel's subsystems.
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        audit: Arc<AuditLog>,
        broker: Arc<CapabilityBroker>,
        objects: Arc<ObjectManager>,
        txns: Arc<TransactionCoordinator>,
        renderer: Arc<dyn Renderer>,
        vault: Arc<CredentialVault>,
        approvals: Arc<dyn ApprovalHandler>,
        config: RuntimeConfig,
    ) -> Self {
        Self {
            audit,
            broker,
            objects,
            txns,
            renderer,
            vault,
            approvals,
            config,
        }
    }

    /// Parses and statically validates source. Empty means admissible.
    #[must_use]
    pub fn validate(&self, source: &str) -> Vec<ValidationError> {
        match parse(source) {
            Ok(program) => validate(&program),
            Err(err) => vec![ValidationError {
                rule: "syntax",
                message: err.message,
                line: err.pos.line,
                column: err.pos.column,
            }],
        }
    }

    /// Dry-runs admissible source with all side effects stubbed and
    /// returns the capability set it would need.
    ///
    /// # Errors
    ///
    /// Returns the admission violations if the source is refused.
    pub fn infer_capabilities(
        &self,
        source: &str,
    ) -> Result<Vec<RequiredCapability>, Vec<ValidationError>> {
        let program = match parse(source) {
            Ok(program) => program,
            Err(err) => {
                return Err(vec![ValidationError {
                    rule: "syntax",
                    message: err.message,
                    line: err.pos.line,
                    column: err.pos.column,
                }])
            }
        };
        let violations = validate(&program);
        if !violations.is_empty() {
            return Err(violations);
        }

        let recorder = DryRunApi::new();
        let mut cx = ExecCx::new(&self.config, None);
        // A dry-run fault is fine: the capabilities observed up to the
        // fault are still the useful output.
        if let Err(error) = interp::run(&program, &recorder, &mut cx) {
            debug!(%error, "dry-run stopped early");
        }
        Ok(recorder.required())
    }

    /// Validates and executes a submission for a principal.
    ///
    /// On timeout, budget exhaustion or cancellation, every transaction
    /// the submission opened is aborted and the failure is audited with
    /// the matching `error_kind`.
    #[must_use]
    pub fn execute(
        &self,
        source: &str,
        principal: &str,
        cancel: Option<Arc<AtomicBool>>,
    ) -> ExecutionResult {
        let started = Instant::now();

        let (program, violations) = match parse(source) {
            Ok(program) => {
                let violations = validate(&program);
                (Some(program), violations)
            }
            Err(err) => (
                None,
                vec![ValidationError {
                    rule: "syntax",
                    message: err.message,
                    line: err.pos.line,
                    column: err.pos.column,
                }],
            ),
        };
        if !violations.is_empty() {
            let message = violations
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ");
            return ExecutionResult {
                state: ExecutionState::Failed,
                return_value: None,
                error: Some(message),
                error_kind: Some("validation"),
                duration: started.elapsed(),
                ops_used: 0,
                audit_range: None,
            };
        }
        let Some(program) = program else {
            // Unreachable: a missing program always carries violations.
            return ExecutionResult {
                state: ExecutionState::Failed,
                return_value: None,
                error: Some("no program".into()),
                error_kind: Some("validation"),
                duration: started.elapsed(),
                ops_used: 0,
                audit_range: None,
            };
        };

        let first_entry = self
            .audit
            .log(AuditEvent::new("runtime.execute", principal).provenance(Provenance::Agent))
            .map(|entry| entry.id);

        let api = MediatedApi::new(
            principal,
            Arc::clone(&self.audit),
            Arc::clone(&self.broker),
            Arc::clone(&self.objects),
            Arc::clone(&self.txns),
            Arc::clone(&self.renderer),
            Arc::clone(&self.vault),
            Arc::clone(&self.approvals),
        );
        let mut cx = ExecCx::new(&self.config, cancel);
        let outcome = interp::run(&program, &api, &mut cx);

        let (state, return_value, error) = match outcome {
            Ok(value) => (ExecutionState::Completed, Some(value.to_json()), None),
            Err(error) => {
                let state = match &error {
                    RuntimeError::Timeout { .. } => ExecutionState::TimedOut,
                    RuntimeError::QuotaExceeded { .. } => ExecutionState::BudgetExhausted,
                    _ => ExecutionState::Failed,
                };
                (state, None, Some(error))
            }
        };

        // Any transaction the script left open is aborted, whatever the
        // exit path.
        if self.txns.in_transaction() {
            let reason = error.as_ref().map_or("submission_end", |e| e.error_kind());
            warn!(principal, reason, "aborting transactions left open by submission");
            self.txns.abort_all(reason);
        }

        let error_kind = error.as_ref().map(RuntimeError::error_kind);
        let mut completion =
            AuditEvent::new("runtime.complete", principal).provenance(Provenance::Agent);
        if let Some(kind) = error_kind {
            let result = if error.as_ref().is_some_and(RuntimeError::is_denial) {
                OpResult::Denied
            } else {
                OpResult::Error
            };
            completion = completion.failure(result, kind);
        }
        let last_entry = self.audit.log(completion).map(|entry| entry.id);

        ExecutionResult {
            state,
            return_value,
            error: error.map(|e| e.to_string()),
            error_kind,
            duration: started.elapsed(),
            ops_used: cx.ops_used(),
            audit_range: match (first_entry, last_entry) {
                (Ok(first), Ok(last)) => Some((first, last)),
                _ => None,
            },
        }
    }

    /// Convenience: grant helper used when an approval decision feeds
    /// the broker (approve-once grants expire quickly; approve-session
    /// grants last until revoked).
    ///
    /// # Errors
    ///
    /// Returns [`CapabilityError`] from the underlying grant.
    pub fn grant_for_decision(
        &self,
        decision: ApprovalDecision,
        principal: &str,
        operation: &str,
        resource: &str,
        risk: crate::capability::RiskTier,
    ) -> Result<bool, CapabilityError> {
        let ttl = match decision {
            ApprovalDecision::Deny => return Ok(false),
            // One execution boundary: long enough to use, too short to stockpile.
            ApprovalDecision::ApproveOnce => Some(60.0),
            ApprovalDecision::ApproveSession => None,
        };
        self.broker.grant(
            principal,
            operation,
            resource,
            risk,
            ttl,
            crate::capability::Constraints::none(),
        )?;
        Ok(true)
    }
}