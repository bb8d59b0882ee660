//! Kernel construction and teardown.
//!
//! The audit log, capability broker, object manager, transaction
//! coordinator, session manager and credential vault are process-wide
//! singletons with an explicit [`Kernel::init`] / [`Kernel::shutdown`]
//! pair. Dependents receive them as explicit parameters; there is no
//! ambient access path.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::audit::{AuditEvent, AuditLog};
use crate::capability::{CapabilityBroker, RevocationStore};
use crate::credential::CredentialVault;
use crate::error::KernelError;
use crate::object::ObjectManager;
use crate::renderer::{MockRenderer, Renderer};
use crate::runtime::{AgentRuntime, ApprovalHandler, DenyAll, RuntimeConfig};
use crate::session::SessionManager;
use crate::txn::TransactionCoordinator;

/// Locations of the durable stores. `None` means in-memory (no restart
/// guarantee; tests and ephemeral kernels).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorePaths {
    /// Audit store (`entries`, `kernel_meta`).
    pub audit_db: Option<PathBuf>,
    /// Revocation tombstone store.
    pub revocation_db: Option<PathBuf>,
    /// Session and grant-lifecycle store.
    pub session_db: Option<PathBuf>,
}

impl StorePaths {
    /// All three stores under one directory.
    #[must_use]
    pub fn under(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        Self {
            audit_db: Some(dir.join("audit.db")),
            revocation_db: Some(dir.join("revocations.db")),
            session_db: Some(dir.join("sessions.db")),
        }
    }
}

/// Kernel configuration.
#[derive(Debug, Clone, Default)]
pub struct KernelConfig {
    /// Durable store locations.
    pub stores: StorePaths,
    /// Runtime quotas.
    pub runtime: RuntimeConfig,
}

/// The assembled kernel.
pub struct Kernel {
    /// Append-only audit log.
    pub audit: Arc<AuditLog>,
    /// Capability broker.
    pub broker: Arc<CapabilityBroker>,
    /// Object registry.
    pub objects: Arc<ObjectManager>,
    /// Transaction coordinator.
    pub txns: Arc<TransactionCoordinator>,
    /// Session and grant-lifecycle manager.
    pub sessions: Arc<SessionManager>,
    /// Credential vault.
    pub vault: Arc<CredentialVault>,
    /// The renderer collaborator.
    pub renderer: Arc<dyn Renderer>,
    /// Agent runtime bound over all of the above.
    pub runtime: AgentRuntime,
}

impl std::fmt::Debug for Kernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Kernel").finish_non_exhaustive()
    }
}

impl Kernel {
    /// Initializes the kernel with the mock renderer and deny-all
    /// approvals.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError`] if a store cannot be opened.
    pub fn init(config: KernelConfig) -> Result<Self, KernelError> {
        let objects = Arc::new(ObjectManager::new());
        let renderer = Arc::new(MockRenderer::new(Arc::clone(&objects)));
        Self::init_with(config, objects, renderer, Arc::new(DenyAll))
    }

    /// Initializes the kernel with an explicit renderer and approval
    /// handler. The renderer must share `objects`.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError`] if a store cannot be opened.
    pub fn init_with(
        config: KernelConfig,
        objects: Arc<ObjectManager>,
        renderer: Arc<dyn Renderer>,
        approvals: Arc<dyn ApprovalHandler>,
    ) -> Result<Self, KernelError> {
        let audit = Arc::new(match &config.stores.audit_db {
            Some(path) => AuditLog::open(path)?,
            None => AuditLog::in_memory()?,
        });
        let revocations = match &config.stores.revocation_db {
            Some(path) => RevocationStore::open(path)?,
            None => RevocationStore::in_memory()?,
        };
        let broker = Arc::new(CapabilityBroker::new(Arc::clone(&audit), revocations)?);
        let sessions = Arc::new(match &config.stores.session_db {
            Some(path) => SessionManager::open(path)?,
            None => SessionManager::in_memory()?,
        });
        let txns = TransactionCoordinator::new(Arc::clone(&objects), Arc::clone(&audit));
        let vault = Arc::new(CredentialVault::new(Arc::clone(&objects)));
        let runtime = AgentRuntime::new(
            Arc::clone(&audit),
            Arc::clone(&broker),
            Arc::clone(&objects),
            Arc::clone(&txns),
            Arc::clone(&renderer),
            Arc::clone(&vault),
            approvals,
            config.runtime,
        );

        audit.log(AuditEvent::new("kernel.init", "system"))?;
        Ok(Self {
            audit,
            broker,
            objects,
            txns,
            sessions,
            vault,
            renderer,
            runtime,
        })
    }

    /// Shuts the kernel down: active transactions are forcibly aborted
    /// (objects and transactions do not survive a restart; audit entries
    /// and revocations do).
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::Audit`] if the shutdown entry cannot be
    /// written.
    pub fn shutdown(&self) -> Result<(), KernelError> {
        self.txns.abort_all("shutdown");
        self.audit.log(AuditEvent::new("kernel.shutdown", "system"))?;
        Ok(())
    }
}
