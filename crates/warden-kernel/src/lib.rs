//! # warden-kernel
//!
//! A browser kernel: the privileged mediation layer between untrusted,
//! agent-generated code and browser-local resources (tabs, forms,
//! workspaces, credentials).
//!
//! Every privileged operation is:
//!
//! - **authorized** against an unforgeable capability held by the
//!   [`capability::CapabilityBroker`],
//! - **observable** through the append-only [`audit::AuditLog`], and
//! - **reversible** (for browser-local state) inside the
//!   [`txn::TransactionCoordinator`]'s checkpointed envelope.
//!
//! Agent code is admitted by the [`runtime::AgentRuntime`]: parsed,
//! statically validated against a hard-coded allow-list, optionally
//! dry-run to infer the capability set it needs, then interpreted with
//! the mediated `browser` surface bound, the only way agent code can
//! influence kernel-managed state.
//!
//! External side effects (a submitted form, a spent credential) are
//! never rolled back; the commit-boundary rule confines each transaction
//! chain to at most one irreversible operation and commits the chain the
//! moment it succeeds.
//!
//! ## Example
//!
//! ```rust,no_run
//! use warden_kernel::capability::{Constraints, RiskTier};
//! use warden_kernel::config::{Kernel, KernelConfig};
//!
//! # fn main() -> Result<(), warden_kernel::error::KernelError> {
//! let kernel = Kernel::init(KernelConfig::default())?;
//! kernel.broker.grant("agent:1", "tab.**", "*", RiskTier::Stateful, None, Constraints::none())?;
//!
//! let result = kernel.runtime.execute(
//!     "import browser\n\
//!      let tab = browser.tab.open(\"https://example.com\")\n\
//!      return browser.tab.extract(tab, \"markdown\")",
//!     "agent:1",
//!     None,
//! );
//! println!("{:?}", result.state);
//! kernel.shutdown()?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod audit;
pub mod capability;
pub mod config;
pub mod credential;
pub mod error;
pub mod object;
pub mod renderer;
pub mod runtime;
pub mod session;
pub mod txn;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::audit::{AuditFilter, AuditLog, Provenance};
    pub use crate::capability::{CapabilityBroker, Constraints, RiskTier};
    pub use crate::config::{Kernel, KernelConfig, StorePaths};
    pub use crate::error::KernelError;
    pub use crate::object::{ObjectId, ObjectKind, ObjectManager};
    pub use crate::runtime::{AgentRuntime, ExecutionState, RuntimeConfig};
    pub use crate::txn::TransactionCoordinator;
}

pub use config::{Kernel, KernelConfig, StorePaths};
pub use error::KernelError;
