//! Credential vault.
//!
//! Secret material never enters the Object Manager or the mediated API:
//! the registry holds only opaque handles (`cred:<n>`), and the vault maps
//! handles to [`SecretString`]s. `use_credential` is the T3 surface: it
//! mints a single-use bearer reference that downstream collaborators can
//! redeem exactly once; the secret itself is never returned to agent code
//! and never logged.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::object::{AttrMap, ObjectId, ObjectKind, ObjectManager};

/// Errors from the credential vault.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CredentialError {
    /// No credential behind this handle.
    #[error("unknown credential handle: {handle}")]
    UnknownHandle {
        /// The handle that failed to resolve.
        handle: String,
    },

    /// The bearer reference was already redeemed (or never issued).
    #[error("bearer reference is not redeemable")]
    BearerSpent,
}

/// An opaque, single-use reference to a credential. Handed to external
/// collaborators in place of the secret.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BearerRef(Uuid);

impl BearerRef {
    /// Renders the reference for transport.
    #[must_use]
    pub fn as_token(&self) -> String {
        format!("bearer:{}", self.0.simple())
    }
}

struct VaultEntry {
    name: String,
    secret: SecretString,
}

/// The credential vault.
pub struct CredentialVault {
    objects: Arc<ObjectManager>,
    entries: Mutex<HashMap<ObjectId, VaultEntry>>,
    /// Outstanding single-use bearer references.
    bearers: Mutex<HashMap<BearerRef, ObjectId>>,
}

impl std::fmt::Debug for CredentialVault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialVault").finish_non_exhaustive()
    }
}

impl CredentialVault {
    /// Creates an empty vault over the given registry.
    #[must_use]
    pub fn new(objects: Arc<ObjectManager>) -> Self {
        Self {
            objects,
            entries: Mutex::new(HashMap::new()),
            bearers: Mutex::new(HashMap::new()),
        }
    }

    /// Registers a credential, returning its opaque handle. Only the
    /// display name reaches the Object Manager.
    pub fn register(&self, name: &str, secret: SecretString) -> ObjectId {
        let mut attrs = AttrMap::new();
        attrs.insert("name".into(), Value::String(name.into()));
        let view = self.objects.create(ObjectKind::Credential, attrs);
        self.entries.lock().unwrap().insert(
            view.id,
            VaultEntry {
                name: name.to_string(),
                secret,
            },
        );
        view.id
    }

    /// Mints a single-use bearer reference for a credential.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::UnknownHandle`].
    pub fn use_credential(&self, handle: ObjectId) -> Result<BearerRef, CredentialError> {
        if !self.entries.lock().unwrap().contains_key(&handle) {
            return Err(CredentialError::UnknownHandle {
                handle: handle.to_string(),
            });
        }
        let bearer = BearerRef(Uuid::new_v4());
        self.bearers.lock().unwrap().insert(bearer.clone(), handle);
        Ok(bearer)
    }

    /// Redeems a bearer reference for the secret. One shot: a second
    /// redemption fails.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::BearerSpent`].
    pub fn redeem(&self, bearer: &BearerRef) -> Result<SecretString, CredentialError> {
        let handle = self
            .bearers
            .lock()
            .unwrap()
            .remove(bearer)
            .ok_or(CredentialError::BearerSpent)?;
        let entries = self.entries.lock().unwrap();
        let entry = entries
            .get(&handle)
            .ok_or(CredentialError::BearerSpent)?;
        Ok(SecretString::from(entry.secret.expose_secret().to_string()))
    }

    /// Display name for a handle.
    #[must_use]
    pub fn name_of(&self, handle: ObjectId) -> Option<String> {
        self.entries
            .lock()
            .unwrap()
            .get(&handle)
            .map(|entry| entry.name.clone())
    }
}
