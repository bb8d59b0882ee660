//! Kernel-wide error aggregate.
//!
//! Each subsystem owns its error enum; this type is the top-level union
//! callers outside the kernel match on. Every variant carries enough
//! structure `(op, object, reason)` to correlate with its audit entry.

use thiserror::Error;

use crate::audit::AuditError;
use crate::capability::CapabilityError;
use crate::credential::CredentialError;
use crate::object::ObjectError;
use crate::renderer::RendererError;
use crate::runtime::RuntimeError;
use crate::session::SessionError;
use crate::txn::TxnError;

/// Union of every kernel subsystem error.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum KernelError {
    /// Audit log failure.
    #[error(transparent)]
    Audit(#[from] AuditError),

    /// Capability broker failure or denial.
    #[error(transparent)]
    Capability(#[from] CapabilityError),

    /// Object registry failure.
    #[error(transparent)]
    Object(#[from] ObjectError),

    /// Transaction coordinator failure.
    #[error(transparent)]
    Txn(#[from] TxnError),

    /// Session store failure.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// Credential vault failure.
    #[error(transparent)]
    Credential(#[from] CredentialError),

    /// Renderer collaborator failure.
    #[error(transparent)]
    Renderer(#[from] RendererError),

    /// Agent runtime failure.
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}
