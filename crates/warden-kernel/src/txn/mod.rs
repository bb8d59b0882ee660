//! Transaction Coordinator: checkpoints, rollback and commit gating for
//! browser-local state.
//!
//! What rolls back: tab navigation state, form fill buffers, workspace
//! membership: anything that lives in the Object Manager. What never
//! rolls back: external side effects (a submitted form, a spent
//! credential). The commit-boundary rule keeps the two apart: a T3
//! operation is admitted only when the enclosing transaction chain has no
//! prior T3 work, and its success force-commits the chain; rolling back a
//! transaction that committed T3 work is an error, not a silent lie.
//!
//! Snapshots are hybrid copy-on-write pre-images (see [`snapshot`]): the
//! coordinator hooks the Object Manager's single mutation path and records
//! each object's prior state on first touch within a checkpoint window.

mod snapshot;

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
pub use snapshot::{estimate_map_size, PreImage, PreImageKind, SNAPSHOT_INLINE_LIMIT};
use thiserror::Error;
use tracing::{debug, warn};

use crate::audit::{unix_now, AuditError, AuditEvent, AuditLog};
use crate::object::{AttrMap, ObjectId, ObjectKind, ObjectManager, PreImageSink};

/// Errors from the transaction coordinator.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TxnError {
    /// The transaction is in a terminal state.
    #[error("transaction {tx_id} is {state}")]
    Closed {
        /// The transaction id.
        tx_id: String,
        /// Its terminal state.
        state: TxnState,
    },

    /// Rollback was requested across a committed irreversible operation.
    #[error("cannot {op}: transaction {tx_id} committed irreversible work")]
    Irreversible {
        /// The refused operation.
        op: String,
        /// The transaction id.
        tx_id: String,
    },

    /// The named checkpoint does not exist in this transaction.
    #[error("checkpoint '{label}' not found in {tx_id}")]
    CheckpointNotFound {
        /// The transaction id.
        tx_id: String,
        /// The label that failed to resolve.
        label: String,
    },

    /// A checkpoint with this label already exists in this transaction.
    #[error("checkpoint label '{label}' already used in {tx_id}")]
    DuplicateLabel {
        /// The transaction id.
        tx_id: String,
        /// The duplicated label.
        label: String,
    },

    /// No transaction with this id.
    #[error("unknown transaction: {tx_id}")]
    Unknown {
        /// The id that failed to resolve.
        tx_id: String,
    },

    /// The transaction has an active child; the child must commit or
    /// abort first.
    #[error("transaction {tx_id} has an active child {child}")]
    ChildActive {
        /// The parent transaction.
        tx_id: String,
        /// Its active child.
        child: String,
    },

    /// A second T3 operation was attempted inside one transaction chain.
    #[error("transaction {tx_id} already carries irreversible work")]
    CommitBoundary {
        /// The transaction id.
        tx_id: String,
    },

    /// The transaction's audit entry could not be written (fail-closed).
    #[error(transparent)]
    Audit(#[from] AuditError),
}

/// Lifecycle state of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxnState {
    /// Accepting operations.
    Active,
    /// Committed (terminal).
    Committed,
    /// Aborted (terminal).
    Aborted,
}

impl TxnState {
    /// Returns the wire representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Committed => "committed",
            Self::Aborted => "aborted",
        }
    }
}

impl fmt::Display for TxnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A sealed checkpoint: the pre-images of every object touched in the
/// window since the previous checkpoint (or transaction start).
#[derive(Debug)]
pub struct Checkpoint {
    /// Stable checkpoint id (`cp:<n>`).
    pub id: ObjectId,
    /// Caller-chosen label, unique within the transaction.
    pub label: String,
    /// Creation time (Unix seconds).
    pub created_at: f64,
    pre_images: HashMap<ObjectId, PreImage>,
}

struct Transaction {
    id: ObjectId,
    parent: Option<ObjectId>,
    state: TxnState,
    checkpoints: Vec<Checkpoint>,
    /// First-touch pre-images since the last checkpoint.
    pending: HashMap<ObjectId, PreImage>,
    t3_committed: bool,
    started_at: f64,
    ended_at: Option<f64>,
}

impl Transaction {
    fn is_active(&self) -> bool {
        self.state == TxnState::Active
    }
}

#[derive(Default)]
struct CoordState {
    txs: HashMap<ObjectId, Transaction>,
    /// Innermost-last stack of active transactions.
    stack: Vec<ObjectId>,
}

/// The transaction coordinator. Registered with the Object Manager as its
/// pre-image sink; mutations outside any transaction record nothing.
pub struct TransactionCoordinator {
    objects: Arc<ObjectManager>,
    audit: Arc<AuditLog>,
    state: Mutex<CoordState>,
}

impl fmt::Debug for TransactionCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionCoordinator").finish_non_exhaustive()
    }
}

impl PreImageSink for TransactionCoordinator {
    fn record(&self, id: ObjectId, kind: ObjectKind, created_at: f64, attrs: &Arc<AttrMap>) {
        let mut state = self.state.lock().unwrap();
        let Some(&current) = state.stack.last() else {
            return;
        };
        if let Some(tx) = state.txs.get_mut(&current) {
            tx.pending
                .entry(id)
                .or_insert_with(|| PreImage::capture(id, kind, created_at, attrs));
        }
    }
}

impl TransactionCoordinator {
    /// Creates a coordinator. Call [`ObjectManager::set_pre_image_sink`]
    /// with the returned `Arc` to wire copy-on-write capture.
    #[must_use]
    pub fn new(objects: Arc<ObjectManager>, audit: Arc<AuditLog>) -> Arc<Self> {
        let coordinator = Arc::new(Self {
            objects,
            audit,
            state: Mutex::new(CoordState::default()),
        });
        coordinator
            .objects
            .set_pre_image_sink(Arc::<Self>::clone(&coordinator));
        coordinator
    }

    /// Begins a transaction. If one is already active it becomes the
    /// parent and the new transaction is a nested child with an
    /// independent snapshot chain.
    ///
    /// # Errors
    ///
    /// Returns [`TxnError::Audit`] if the begin cannot be audited.
    pub fn begin(&self) -> Result<ObjectId, TxnError> {
        let tx_id = self.objects.allocate_id(ObjectKind::Transaction);
        let parent = {
            let mut state = self.state.lock().unwrap();
            let parent = state.stack.last().copied();
            state.txs.insert(
                tx_id,
                Transaction {
                    id: tx_id,
                    parent,
                    state: TxnState::Active,
                    checkpoints: Vec::new(),
                    pending: HashMap::new(),
                    t3_committed: false,
                    started_at: unix_now(),
                    ended_at: None,
                },
            );
            state.stack.push(tx_id);
            parent
        };

        self.audit.set_transaction_context(&tx_id.to_string(), None);
        let mut args = Map::new();
        if let Some(parent) = parent {
            args.insert("parent".into(), Value::String(parent.to_string()));
        }
        self.audit.log(
            AuditEvent::new("transaction.begin", "system")
                .object(tx_id.to_string())
                .args(args),
        )?;
        debug!(tx = %tx_id, parent = ?parent.map(|p| p.to_string()), "transaction begun");
        Ok(tx_id)
    }

    /// The innermost active transaction, if any.
    #[must_use]
    pub fn current(&self) -> Option<ObjectId> {
        self.state.lock().unwrap().stack.last().copied()
    }

    /// Whether the given transaction chain (it or an ancestor) is active.
    #[must_use]
    pub fn in_transaction(&self) -> bool {
        !self.state.lock().unwrap().stack.is_empty()
    }

    /// Checks that `tx_id` exists, is active, and is the innermost frame.
    fn ensure_current(state: &CoordState, tx_id: ObjectId) -> Result<(), TxnError> {
        let tx = state.txs.get(&tx_id).ok_or_else(|| TxnError::Unknown {
            tx_id: tx_id.to_string(),
        })?;
        if !tx.is_active() {
            return Err(TxnError::Closed {
                tx_id: tx_id.to_string(),
                state: tx.state,
            });
        }
        match state.stack.last() {
            Some(&top) if top == tx_id => Ok(()),
            Some(&top) => Err(TxnError::ChildActive {
                tx_id: tx_id.to_string(),
                child: top.to_string(),
            }),
            None => Err(TxnError::Unknown {
                tx_id: tx_id.to_string(),
            }),
        }
    }

    /// Seals the pending pre-images into a named checkpoint.
    ///
    /// # Errors
    ///
    /// Returns [`TxnError::DuplicateLabel`], terminal-state errors, or
    /// [`TxnError::Audit`].
    pub fn checkpoint(&self, tx_id: ObjectId, label: &str) -> Result<ObjectId, TxnError> {
        let cp_id = {
            let mut state = self.state.lock().unwrap();
            Self::ensure_current(&state, tx_id)?;
            let tx = state.txs.get_mut(&tx_id).expect("ensured above");
            if tx.checkpoints.iter().any(|cp| cp.label == label) {
                return Err(TxnError::DuplicateLabel {
                    tx_id: tx_id.to_string(),
                    label: label.to_string(),
                });
            }
            let cp_id = self.objects.allocate_id(ObjectKind::Checkpoint);
            let pre_images = std::mem::take(&mut tx.pending);
            tx.checkpoints.push(Checkpoint {
                id: cp_id,
                label: label.to_string(),
                created_at: unix_now(),
                pre_images,
            });
            cp_id
        };

        self.audit
            .set_transaction_context(&tx_id.to_string(), Some(&cp_id.to_string()));
        let mut args = Map::new();
        args.insert("label".into(), Value::String(label.into()));
        args.insert("checkpoint_id".into(), Value::String(cp_id.to_string()));
        self.audit.log(
            AuditEvent::new("transaction.checkpoint", "system")
                .object(tx_id.to_string())
                .args(args),
        )?;
        Ok(cp_id)
    }

    /// Rolls the transaction back to the named checkpoint, or to its
    /// start when `label` is `None`. Restores every touched object to the
    /// state it had when the checkpoint was taken, then discards the
    /// undone windows. The transaction stays active.
    ///
    /// # Errors
    ///
    /// Returns [`TxnError::CheckpointNotFound`],
    /// [`TxnError::Irreversible`] after committed T3 work, terminal-state
    /// errors, or [`TxnError::Audit`].
    pub fn rollback(&self, tx_id: ObjectId, label: Option<&str>) -> Result<(), TxnError> {
        let restored = {
            let mut state = self.state.lock().unwrap();
            // Terminal transactions report irreversibility precisely.
            if let Some(tx) = state.txs.get(&tx_id) {
                if !tx.is_active() && tx.t3_committed {
                    return Err(TxnError::Irreversible {
                        op: "rollback".to_string(),
                        tx_id: tx_id.to_string(),
                    });
                }
            }
            Self::ensure_current(&state, tx_id)?;
            let tx = state.txs.get_mut(&tx_id).expect("ensured above");

            let keep = match label {
                Some(label) => {
                    let index = tx
                        .checkpoints
                        .iter()
                        .position(|cp| cp.label == label)
                        .ok_or_else(|| TxnError::CheckpointNotFound {
                            tx_id: tx_id.to_string(),
                            label: label.to_string(),
                        })?;
                    index + 1
                }
                None => 0,
            };

            // Newest window first; older windows overwrite, so each object
            // ends at its oldest captured pre-image, its state at the
            // checkpoint.
            let mut restored: HashMap<ObjectId, PreImage> = HashMap::new();
            for (id, pre) in tx.pending.drain() {
                restored.insert(id, pre);
            }
            for cp in tx.checkpoints.drain(keep..).rev() {
                for (id, pre) in cp.pre_images {
                    restored.insert(id, pre);
                }
            }
            restored
        };

        let count = restored.len();
        for (id, pre) in restored {
            let created_at = pre.created_at;
            self.objects.restore(id, created_at, pre.into_attrs());
        }

        let mut args = Map::new();
        args.insert(
            "to_checkpoint".into(),
            label.map_or(Value::Null, |l| Value::String(l.into())),
        );
        args.insert("restored".into(), Value::from(count));
        self.audit.log(
            AuditEvent::new("transaction.rollback", "system")
                .object(tx_id.to_string())
                .args(args),
        )?;
        debug!(tx = %tx_id, restored = count, "transaction rolled back");
        Ok(())
    }

    /// Commits the transaction. A nested child folds its pre-image
    /// windows into its parent so the parent's earlier checkpoints keep
    /// their restore guarantee; only the outermost commit ends the chain.
    ///
    /// # Errors
    ///
    /// Returns terminal-state errors, [`TxnError::ChildActive`], or
    /// [`TxnError::Audit`].
    pub fn commit(&self, tx_id: ObjectId) -> Result<(), TxnError> {
        {
            let mut state = self.state.lock().unwrap();
            Self::ensure_current(&state, tx_id)?;
            let mut tx = state.txs.remove(&tx_id).expect("ensured above");
            tx.state = TxnState::Committed;
            tx.ended_at = Some(unix_now());
            state.stack.pop();

            if let Some(parent_id) = tx.parent {
                // Fold oldest-first with insert-if-absent: the parent's own
                // first-touch pre-images are older and win.
                let windows: Vec<(ObjectId, PreImage)> = tx
                    .checkpoints
                    .drain(..)
                    .flat_map(|cp| cp.pre_images.into_iter())
                    .chain(tx.pending.drain())
                    .collect();
                let t3 = tx.t3_committed;
                state.txs.insert(tx.id, tx);
                if let Some(parent) = state.txs.get_mut(&parent_id) {
                    for (id, pre) in windows {
                        parent.pending.entry(id).or_insert(pre);
                    }
                    parent.t3_committed |= t3;
                }
            } else {
                state.txs.insert(tx.id, tx);
            }
        }

        self.restore_audit_context();
        self.audit.log(
            AuditEvent::new("transaction.commit", "system").object(tx_id.to_string()),
        )?;
        debug!(tx = %tx_id, "transaction committed");
        Ok(())
    }

    /// Aborts the transaction, restoring every object it touched. A
    /// nested child discards only its own effects.
    ///
    /// # Errors
    ///
    /// Returns terminal-state errors, [`TxnError::ChildActive`], or
    /// [`TxnError::Audit`].
    pub fn abort(&self, tx_id: ObjectId) -> Result<(), TxnError> {
        self.rollback(tx_id, None)?;
        {
            let mut state = self.state.lock().unwrap();
            Self::ensure_current(&state, tx_id)?;
            if let Some(tx) = state.txs.get_mut(&tx_id) {
                tx.state = TxnState::Aborted;
                tx.ended_at = Some(unix_now());
            }
            state.stack.pop();
        }
        self.restore_audit_context();
        self.audit.log(
            AuditEvent::new("transaction.abort", "system").object(tx_id.to_string()),
        )?;
        debug!(tx = %tx_id, "transaction aborted");
        Ok(())
    }

    /// Force-aborts every active transaction, innermost first. Used at
    /// shutdown and when a submission exhausts its quota or deadline.
    pub fn abort_all(&self, reason: &str) {
        while let Some(tx_id) = self.current() {
            if let Err(error) = self.abort(tx_id) {
                warn!(tx = %tx_id, %error, reason, "forced abort failed");
                // Drop the frame anyway so shutdown terminates.
                let mut state = self.state.lock().unwrap();
                state.stack.pop();
            }
        }
    }

    /// Commit-boundary admission check for a T3 operation: at most one
    /// per transaction chain.
    ///
    /// # Errors
    ///
    /// Returns [`TxnError::CommitBoundary`] if the chain already carries
    /// irreversible work.
    pub fn admit_t3(&self) -> Result<(), TxnError> {
        let state = self.state.lock().unwrap();
        for tx_id in &state.stack {
            if state.txs.get(tx_id).is_some_and(|tx| tx.t3_committed) {
                return Err(TxnError::CommitBoundary {
                    tx_id: tx_id.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Records a successful T3 operation: marks the whole chain
    /// irreversible and force-commits it, outermost last.
    ///
    /// # Errors
    ///
    /// Returns [`TxnError::Audit`] if a commit cannot be audited.
    pub fn seal_t3(&self) -> Result<(), TxnError> {
        {
            let mut state = self.state.lock().unwrap();
            let stack = state.stack.clone();
            for tx_id in stack {
                if let Some(tx) = state.txs.get_mut(&tx_id) {
                    tx.t3_committed = true;
                }
            }
        }
        while let Some(tx_id) = self.current() {
            self.commit(tx_id)?;
        }
        Ok(())
    }

    /// State of a transaction, if it exists.
    #[must_use]
    pub fn state_of(&self, tx_id: ObjectId) -> Option<TxnState> {
        self.state.lock().unwrap().txs.get(&tx_id).map(|tx| tx.state)
    }

    /// Checkpoint labels of a transaction, oldest first.
    #[must_use]
    pub fn checkpoints(&self, tx_id: ObjectId) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .txs
            .get(&tx_id)
            .map(|tx| tx.checkpoints.iter().map(|cp| cp.label.clone()).collect())
            .unwrap_or_default()
    }

    /// Capture strategies of the pending (not yet sealed) pre-images.
    /// Diagnostic surface; the hybrid boundary tests ride on it.
    #[must_use]
    pub fn pending_pre_images(&self, tx_id: ObjectId) -> Vec<(ObjectId, PreImageKind, Option<usize>)> {
        self.state
            .lock()
            .unwrap()
            .txs
            .get(&tx_id)
            .map(|tx| {
                tx.pending
                    .iter()
                    .map(|(id, pre)| (*id, pre.capture_kind(), pre.shared_refcount()))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn restore_audit_context(&self) {
        match self.current() {
            Some(tx) => self.audit.set_transaction_context(&tx.to_string(), None),
            None => self.audit.clear_transaction_context(),
        }
    }

    /// Begins a transaction behind a scope guard: dropping the guard
    /// without an explicit `commit()` aborts, on every exit path.
    ///
    /// # Errors
    ///
    /// Returns [`TxnError::Audit`] if the begin cannot be audited.
    pub fn begin_guarded(self: &Arc<Self>) -> Result<TransactionGuard, TxnError> {
        let tx_id = self.begin()?;
        Ok(TransactionGuard {
            coordinator: Arc::clone(self),
            tx_id,
            finished: false,
        })
    }
}

/// Scoped transaction handle with guaranteed release: commit must be
/// explicit; drop aborts.
pub struct TransactionGuard {
    coordinator: Arc<TransactionCoordinator>,
    tx_id: ObjectId,
    finished: bool,
}

impl TransactionGuard {
    /// The transaction id.
    #[must_use]
    pub const fn id(&self) -> ObjectId {
        self.tx_id
    }

    /// Takes a named checkpoint.
    ///
    /// # Errors
    ///
    /// See [`TransactionCoordinator::checkpoint`].
    pub fn checkpoint(&self, label: &str) -> Result<ObjectId, TxnError> {
        self.coordinator.checkpoint(self.tx_id, label)
    }

    /// Rolls back to a named checkpoint (or the start).
    ///
    /// # Errors
    ///
    /// See [`TransactionCoordinator::rollback`].
    pub fn rollback(&self, label: Option<&str>) -> Result<(), TxnError> {
        self.coordinator.rollback(self.tx_id, label)
    }

    /// Commits and disarms the guard.
    ///
    /// # Errors
    ///
    /// See [`TransactionCoordinator::commit`].
    pub fn commit(mut self) -> Result<(), TxnError> {
        self.finished = true;
        self.coordinator.commit(self.tx_id)
    }

    /// Aborts and disarms the guard.
    ///
    /// # Errors
    ///
    /// See [`TransactionCoordinator::abort`].
    pub fn abort(mut self) -> Result<(), TxnError> {
        self.finished = true;
        self.coordinator.abort(self.tx_id)
    }
}

impl Drop for TransactionGuard {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        // The T3 path commits the chain out from under the guard; a
        // committed transaction needs no abort.
        if self.coordinator.state_of(self.tx_id) == Some(TxnState::Active) {
            if let Err(error) = self.coordinator.abort(self.tx_id) {
                warn!(tx = %self.tx_id, %error, "abort on drop failed");
            }
        }
    }
}
