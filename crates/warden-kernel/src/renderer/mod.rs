//! The renderer collaborator boundary.
//!
//! The kernel treats the web renderer as an opaque, message-oriented
//! collaborator: it can navigate a tab, extract structured content, drive
//! forms, and dispose of tab-side resources. The real renderer lives in
//! another process; the kernel's own tests run against [`MockRenderer`],
//! which simulates just enough page behavior to exercise kernel
//! semantics.
//!
//! Extracted content is untrusted by construction: everything a renderer
//! returns is labeled web-content at the mediation boundary.

mod mock;

pub use mock::{MockForm, MockPage, MockRenderer, SubmitCallback};
use serde_json::Value;
use thiserror::Error;

use crate::object::{FormKind, LoadState, ObjectId};

/// Errors reported by a renderer. A renderer failure aborts the
/// enclosing transaction.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RendererError {
    /// The tab has no loaded page.
    #[error("no page loaded in {tab_id}")]
    NoPage {
        /// The tab id.
        tab_id: String,
    },

    /// The target object is gone.
    #[error("renderer target not found: {id}")]
    TargetNotFound {
        /// The missing object id.
        id: String,
    },

    /// Transient renderer-side failure; retriable with backoff.
    #[error("renderer transient failure: {cause}")]
    Transient {
        /// What went wrong.
        cause: String,
    },
}

/// Content extraction kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractKind {
    /// Readable page content as markdown.
    Markdown,
    /// Form inventory.
    Forms,
    /// Link inventory.
    Links,
    /// Table data.
    Tables,
}

impl ExtractKind {
    /// Returns the wire representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Markdown => "markdown",
            Self::Forms => "forms",
            Self::Links => "links",
            Self::Tables => "tables",
        }
    }

    /// Parses an extraction kind.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "markdown" => Some(Self::Markdown),
            "forms" => Some(Self::Forms),
            "links" => Some(Self::Links),
            "tables" => Some(Self::Tables),
            _ => None,
        }
    }
}

/// The opaque renderer collaborator.
pub trait Renderer: Send + Sync {
    /// Navigates a tab; resolves when the load settles.
    ///
    /// # Errors
    ///
    /// Returns [`RendererError`] if the tab is unknown or the load fails.
    fn navigate(&self, tab: ObjectId, url: &str) -> Result<LoadState, RendererError>;

    /// Waits until the tab reaches (at least) the given load state.
    ///
    /// # Errors
    ///
    /// Returns [`RendererError::TargetNotFound`] for unknown tabs.
    fn wait_for(&self, tab: ObjectId, state: LoadState) -> Result<(), RendererError>;

    /// Extracts structured content from the tab's current page.
    ///
    /// # Errors
    ///
    /// Returns [`RendererError::NoPage`] if nothing is loaded.
    fn extract(&self, tab: ObjectId, kind: ExtractKind) -> Result<Value, RendererError>;

    /// Finds a form of the given kind on the tab's current page and
    /// registers it, returning its id.
    ///
    /// # Errors
    ///
    /// Returns [`RendererError::NoPage`] if nothing is loaded.
    fn find_form(&self, tab: ObjectId, kind: FormKind) -> Result<Option<ObjectId>, RendererError>;

    /// Fills form fields (buffered tab-side; reversible).
    ///
    /// # Errors
    ///
    /// Returns [`RendererError::TargetNotFound`] for unknown forms.
    fn fill_form(
        &self,
        form: ObjectId,
        values: &serde_json::Map<String, Value>,
    ) -> Result<(), RendererError>;

    /// Clears buffered form values.
    ///
    /// # Errors
    ///
    /// Returns [`RendererError::TargetNotFound`] for unknown forms.
    fn clear_form(&self, form: ObjectId) -> Result<(), RendererError>;

    /// Submits the form to its action endpoint. Irreversible.
    ///
    /// # Errors
    ///
    /// Returns [`RendererError::TargetNotFound`] for unknown forms.
    fn submit_form(&self, form: ObjectId) -> Result<Value, RendererError>;

    /// Releases renderer-side resources for a tab.
    ///
    /// # Errors
    ///
    /// Returns [`RendererError::TargetNotFound`] for unknown tabs.
    fn dispose(&self, tab: ObjectId) -> Result<(), RendererError>;
}
