//! Object Manager: canonical registry of browser resources with stable,
//! type-prefixed ids.
//!
//! Every kernel-managed resource (tab, form, workspace, credential handle,
//! transaction, checkpoint) lives here under an id of the form
//! `"<tag>:<n>"`, where `n` comes from a per-kind monotonic counter that is
//! never reused within a process lifetime.
//!
//! Mutation goes through exactly one path, [`ObjectManager::update`], which
//! is crate-private: agent code can only reach it through the mediated API.
//! [`ObjectManager::get`] returns a deep, immutable view (the attribute map
//! is behind an `Arc` that is replaced, never mutated, on update, which is
//! also what makes large transaction pre-images a refcount bump instead of
//! a copy).

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

use crate::audit::unix_now;

/// Attribute map shared by all managed objects.
pub type AttrMap = Map<String, Value>;

/// Errors from the object registry.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ObjectError {
    /// No object with this id (possibly disposed).
    #[error("object not found: {id}")]
    NotFound {
        /// The id that failed to resolve.
        id: String,
    },

    /// A conditional update observed a different value than expected.
    #[error("object conflict on {id}.{key}: expected {expected}, found {actual}")]
    Conflict {
        /// The object id.
        id: String,
        /// The attribute that conflicted.
        key: String,
        /// The expected value.
        expected: String,
        /// The value actually present.
        actual: String,
    },

    /// The id string did not parse as `<tag>:<n>`.
    #[error("malformed object id: {input}")]
    BadId {
        /// The offending input.
        input: String,
    },

    /// The object exists but has a different kind than the caller needs.
    #[error("object {id} is a {actual}, not a {expected}")]
    WrongKind {
        /// The object id.
        id: String,
        /// The kind the caller expected.
        expected: ObjectKind,
        /// The kind actually registered.
        actual: ObjectKind,
    },
}

/// Kinds of managed objects. Closed set: unknown tags are rejected at
/// parse time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(usize)]
pub enum ObjectKind {
    /// A browser tab.
    Tab = 0,
    /// A form discovered on a page.
    Form = 1,
    /// A workspace grouping tabs, credentials and policy.
    Workspace = 2,
    /// An opaque credential handle (secret material lives in the vault).
    Credential = 3,
    /// A transaction.
    Transaction = 4,
    /// A checkpoint.
    Checkpoint = 5,
}

/// Number of object kinds (per-kind counter and lock arrays).
const KIND_COUNT: usize = 6;

impl ObjectKind {
    /// All kinds, in tag order.
    pub const ALL: [Self; KIND_COUNT] = [
        Self::Tab,
        Self::Form,
        Self::Workspace,
        Self::Credential,
        Self::Transaction,
        Self::Checkpoint,
    ];

    /// Returns the id tag for this kind.
    #[must_use]
    pub const fn tag(self) -> &'static str {
        match self {
            Self::Tab => "tab",
            Self::Form => "form",
            Self::Workspace => "workspace",
            Self::Credential => "cred",
            Self::Transaction => "tx",
            Self::Checkpoint => "cp",
        }
    }

    /// Parses a kind from its id tag.
    #[must_use]
    pub fn parse(tag: &str) -> Option<Self> {
        match tag {
            "tab" => Some(Self::Tab),
            "form" => Some(Self::Form),
            "workspace" => Some(Self::Workspace),
            "cred" => Some(Self::Credential),
            "tx" => Some(Self::Transaction),
            "cp" => Some(Self::Checkpoint),
            _ => None,
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// A stable object identifier: `(kind, monotonic counter)`, rendered
/// `"<tag>:<n>"`. Equality is by value, which matches equality of the
/// rendered string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectId {
    /// The object kind.
    pub kind: ObjectKind,
    /// Per-kind counter value, starting at 1.
    pub n: u64,
}

impl ObjectId {
    /// Creates an id from parts.
    #[must_use]
    pub const fn new(kind: ObjectKind, n: u64) -> Self {
        Self { kind, n }
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.tag(), self.n)
    }
}

impl FromStr for ObjectId {
    type Err = ObjectError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || ObjectError::BadId {
            input: s.to_string(),
        };
        let (tag, n) = s.split_once(':').ok_or_else(bad)?;
        let kind = ObjectKind::parse(tag).ok_or_else(bad)?;
        let n: u64 = n.parse().map_err(|_| bad())?;
        Ok(Self { kind, n })
    }
}

/// Load states of a tab.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadState {
    /// Nothing loaded yet.
    #[default]
    Idle,
    /// Navigation in flight.
    Loading,
    /// DOM ready, subresources may still load.
    Interactive,
    /// Fully loaded.
    Complete,
    /// Load failed.
    Error,
}

impl LoadState {
    /// Returns the wire representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Loading => "loading",
            Self::Interactive => "interactive",
            Self::Complete => "complete",
            Self::Error => "error",
        }
    }

    /// Parses a load state.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "idle" => Some(Self::Idle),
            "loading" => Some(Self::Loading),
            "interactive" => Some(Self::Interactive),
            "complete" => Some(Self::Complete),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

/// Kinds of forms the kernel understands. Unknown kinds are rejected at
/// admission time rather than carried as free-form strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormKind {
    /// Login/sign-in form.
    Login,
    /// Search box.
    Search,
    /// Contact/feedback form.
    Contact,
    /// Anything else.
    Generic,
}

impl FormKind {
    /// Returns the wire representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Login => "login",
            Self::Search => "search",
            Self::Contact => "contact",
            Self::Generic => "generic",
        }
    }

    /// Parses a form kind.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "login" => Some(Self::Login),
            "search" => Some(Self::Search),
            "contact" => Some(Self::Contact),
            "generic" | "" => Some(Self::Generic),
            _ => None,
        }
    }
}

/// A deep, immutable view of a managed object. The attribute map cannot
/// be mutated through the view; updates replace the `Arc` wholesale.
#[derive(Debug, Clone)]
pub struct ObjectView {
    /// Stable id.
    pub id: ObjectId,
    /// Attribute map at the time of the lookup.
    pub attrs: Arc<AttrMap>,
    /// Creation timestamp (Unix seconds).
    pub created_at: f64,
    /// Last-update timestamp (Unix seconds).
    pub updated_at: f64,
}

impl ObjectView {
    /// String attribute accessor.
    #[must_use]
    pub fn attr_str(&self, key: &str) -> Option<&str> {
        self.attrs.get(key).and_then(Value::as_str)
    }

    /// Bool attribute accessor.
    #[must_use]
    pub fn attr_bool(&self, key: &str) -> Option<bool> {
        self.attrs.get(key).and_then(Value::as_bool)
    }
}

/// Lifecycle events published to subscribers after the mutation is
/// visible to `get`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// Object registered.
    Created(ObjectId),
    /// Object attributes replaced.
    Updated(ObjectId),
    /// Object disposed.
    Destroyed(ObjectId),
}

/// Sink for lifecycle events.
pub type LifecycleSink = Box<dyn Fn(&LifecycleEvent) + Send + Sync>;

/// Hook through which the transaction coordinator captures pre-images.
/// Called with the attribute map an object held *before* a mutation, while
/// the mutation is being applied; nothing is called when no transaction is
/// active.
pub(crate) trait PreImageSink: Send + Sync {
    /// Records the pre-image of `id` ahead of a mutation.
    fn record(&self, id: ObjectId, kind: ObjectKind, created_at: f64, attrs: &Arc<AttrMap>);
}

struct ObjectRecord {
    attrs: Arc<AttrMap>,
    created_at: f64,
    updated_at: f64,
}

/// The registry. Reads are concurrent per kind; writes take the kind's
/// lock exclusively (single-writer-per-id is enforced one level up by the
/// single-submission-per-principal scheduling rule).
pub struct ObjectManager {
    counters: [AtomicU64; KIND_COUNT],
    maps: [RwLock<HashMap<u64, ObjectRecord>>; KIND_COUNT],
    listeners: Mutex<Vec<LifecycleSink>>,
    pre_image_sink: Mutex<Option<Arc<dyn PreImageSink>>>,
}

impl fmt::Debug for ObjectManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectManager").finish_non_exhaustive()
    }
}

impl Default for ObjectManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectManager {
    /// Creates an empty registry with all counters at zero (first id per
    /// kind is `<tag>:1`).
    #[must_use]
    pub fn new() -> Self {
        Self {
            counters: std::array::from_fn(|_| AtomicU64::new(0)),
            maps: std::array::from_fn(|_| RwLock::new(HashMap::new())),
            listeners: Mutex::new(Vec::new()),
            pre_image_sink: Mutex::new(None),
        }
    }

    /// Registers the transaction coordinator's pre-image hook.
    pub(crate) fn set_pre_image_sink(&self, sink: Arc<dyn PreImageSink>) {
        *self.pre_image_sink.lock().unwrap() = Some(sink);
    }

    /// Allocates a fresh id without registering a record. Transactions
    /// and checkpoints draw their ids from the same per-kind counters as
    /// every other object but are tracked by the coordinator, not the
    /// registry.
    pub(crate) fn allocate_id(&self, kind: ObjectKind) -> ObjectId {
        let n = self.counters[kind as usize].fetch_add(1, Ordering::SeqCst) + 1;
        ObjectId::new(kind, n)
    }

    /// Subscribes a lifecycle event sink.
    pub fn subscribe(&self, sink: LifecycleSink) {
        self.listeners.lock().unwrap().push(sink);
    }

    fn emit(&self, event: &LifecycleEvent) {
        for listener in self.listeners.lock().unwrap().iter() {
            listener(event);
        }
    }

    /// Creates and registers a new object, returning its view.
    pub fn create(&self, kind: ObjectKind, attrs: AttrMap) -> ObjectView {
        let n = self.counters[kind as usize].fetch_add(1, Ordering::SeqCst) + 1;
        let id = ObjectId::new(kind, n);
        let now = unix_now();
        let record = ObjectRecord {
            attrs: Arc::new(attrs),
            created_at: now,
            updated_at: now,
        };
        let view = ObjectView {
            id,
            attrs: Arc::clone(&record.attrs),
            created_at: now,
            updated_at: now,
        };
        self.maps[kind as usize].write().unwrap().insert(n, record);
        debug!(id = %id, "object created");
        self.emit(&LifecycleEvent::Created(id));
        view
    }

    /// Returns a deep, immutable view of an object.
    #[must_use]
    pub fn get(&self, id: ObjectId) -> Option<ObjectView> {
        let map = self.maps[id.kind as usize].read().unwrap();
        map.get(&id.n).map(|record| ObjectView {
            id,
            attrs: Arc::clone(&record.attrs),
            created_at: record.created_at,
            updated_at: record.updated_at,
        })
    }

    /// Like [`Self::get`], but an error when the object is gone.
    ///
    /// # Errors
    ///
    /// Returns [`ObjectError::NotFound`].
    pub fn require(&self, id: ObjectId) -> Result<ObjectView, ObjectError> {
        self.get(id).ok_or_else(|| ObjectError::NotFound {
            id: id.to_string(),
        })
    }

    /// Resolves an id string and checks its kind.
    ///
    /// # Errors
    ///
    /// Returns [`ObjectError::BadId`] or [`ObjectError::WrongKind`].
    pub fn resolve(&self, id: &str, expected: ObjectKind) -> Result<ObjectId, ObjectError> {
        let id: ObjectId = id.parse()?;
        if id.kind != expected {
            return Err(ObjectError::WrongKind {
                id: id.to_string(),
                expected,
                actual: id.kind,
            });
        }
        Ok(id)
    }

    /// Applies a patch to an object's attributes. This is the only legal
    /// mutation path and it is crate-private: agent code reaches it only
    /// through the mediated API.
    ///
    /// The pre-mutation attribute map is handed to the registered
    /// pre-image sink (if any) before the new value becomes visible; the
    /// lifecycle event is emitted after.
    ///
    /// # Errors
    ///
    /// Returns [`ObjectError::NotFound`].
    pub(crate) fn update(&self, id: ObjectId, patch: AttrMap) -> Result<ObjectView, ObjectError> {
        let sink = self.pre_image_sink.lock().unwrap().clone();
        let view = {
            let mut map = self.maps[id.kind as usize].write().unwrap();
            let record = map.get_mut(&id.n).ok_or_else(|| ObjectError::NotFound {
                id: id.to_string(),
            })?;
            if let Some(sink) = &sink {
                sink.record(id, id.kind, record.created_at, &record.attrs);
            }
            let mut next = (*record.attrs).clone();
            for (key, value) in patch {
                next.insert(key, value);
            }
            record.attrs = Arc::new(next);
            record.updated_at = unix_now();
            ObjectView {
                id,
                attrs: Arc::clone(&record.attrs),
                created_at: record.created_at,
                updated_at: record.updated_at,
            }
        };
        self.emit(&LifecycleEvent::Updated(id));
        Ok(view)
    }

    /// Restores an object to a previously captured attribute map. Used by
    /// transaction rollback; re-registers the object if it was disposed in
    /// the meantime. Does not feed the pre-image sink (a rollback is not a
    /// new mutation to snapshot).
    pub(crate) fn restore(
        &self,
        id: ObjectId,
        created_at: f64,
        attrs: Arc<AttrMap>,
    ) {
        {
            let mut map = self.maps[id.kind as usize].write().unwrap();
            let record = map.entry(id.n).or_insert_with(|| ObjectRecord {
                attrs: Arc::clone(&attrs),
                created_at,
                updated_at: created_at,
            });
            record.attrs = attrs;
            record.updated_at = unix_now();
        }
        self.emit(&LifecycleEvent::Updated(id));
    }

    /// Disposes an object. The id is never reused. The pre-image sink
    /// sees the final state so an enclosing transaction can restore it.
    ///
    /// # Errors
    ///
    /// Returns [`ObjectError::NotFound`].
    pub fn dispose(&self, id: ObjectId) -> Result<(), ObjectError> {
        let sink = self.pre_image_sink.lock().unwrap().clone();
        {
            let mut map = self.maps[id.kind as usize].write().unwrap();
            let record = map.get(&id.n).ok_or_else(|| ObjectError::NotFound {
                id: id.to_string(),
            })?;
            if let Some(sink) = &sink {
                sink.record(id, id.kind, record.created_at, &record.attrs);
            }
            map.remove(&id.n);
        }
        debug!(id = %id, "object disposed");
        self.emit(&LifecycleEvent::Destroyed(id));
        Ok(())
    }

    /// Lists all live objects of a kind, in id order.
    #[must_use]
    pub fn list_by_type(&self, kind: ObjectKind) -> Vec<ObjectView> {
        let map = self.maps[kind as usize].read().unwrap();
        let mut views: Vec<ObjectView> = map
            .iter()
            .map(|(n, record)| ObjectView {
                id: ObjectId::new(kind, *n),
                attrs: Arc::clone(&record.attrs),
                created_at: record.created_at,
                updated_at: record.updated_at,
            })
            .collect();
        views.sort_by_key(|v| v.id.n);
        views
    }

    /// Queries objects by kind and attribute equality filters.
    #[must_use]
    pub fn query(&self, kind: ObjectKind, filters: &AttrMap) -> Vec<ObjectView> {
        self.list_by_type(kind)
            .into_iter()
            .filter(|view| {
                filters
                    .iter()
                    .all(|(key, expected)| view.attrs.get(key) == Some(expected))
            })
            .collect()
    }
}

/// Builds the canonical attribute map for a tab.
#[must_use]
pub fn tab_attrs(url: &str, workspace_id: Option<&str>) -> AttrMap {
    let mut attrs = AttrMap::new();
    attrs.insert("url".into(), Value::String(url.into()));
    attrs.insert("title".into(), Value::String(String::new()));
    attrs.insert(
        "load_state".into(),
        Value::String(LoadState::Idle.as_str().into()),
    );
    attrs.insert(
        "workspace_id".into(),
        workspace_id.map_or(Value::Null, |w| Value::String(w.into())),
    );
    attrs.insert("created_at".into(), unix_now().into());
    attrs
}

/// Builds the canonical attribute map for a form.
#[must_use]
pub fn form_attrs(tab_id: &str, kind: FormKind) -> AttrMap {
    let mut attrs = AttrMap::new();
    attrs.insert("tab_id".into(), Value::String(tab_id.into()));
    attrs.insert("kind".into(), Value::String(kind.as_str().into()));
    attrs.insert("fields".into(), Value::Object(Map::new()));
    attrs.insert("filled".into(), Value::Object(Map::new()));
    attrs.insert("submitted".into(), Value::Bool(false));
    attrs
}

/// Builds the canonical attribute map for a workspace.
#[must_use]
pub fn workspace_attrs(name: &str) -> AttrMap {
    let mut attrs = AttrMap::new();
    attrs.insert("name".into(), Value::String(name.into()));
    attrs.insert("tab_ids".into(), Value::Array(Vec::new()));
    attrs.insert("credential_ids".into(), Value::Array(Vec::new()));
    attrs.insert("policy_ref".into(), Value::Null);
    attrs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_monotonic_per_kind() {
        let objects = ObjectManager::new();
        let a = objects.create(ObjectKind::Tab, AttrMap::new());
        let b = objects.create(ObjectKind::Tab, AttrMap::new());
        let f = objects.create(ObjectKind::Form, AttrMap::new());

        assert_eq!(a.id.to_string(), "tab:1");
        assert_eq!(b.id.to_string(), "tab:2");
        assert!(b.id.n > a.id.n);
        assert_eq!(f.id.to_string(), "form:1");
    }

    #[test]
    fn disposed_ids_are_never_reused() {
        let objects = ObjectManager::new();
        let a = objects.create(ObjectKind::Tab, AttrMap::new());
        objects.dispose(a.id).unwrap();
        let b = objects.create(ObjectKind::Tab, AttrMap::new());
        assert!(b.id.n > a.id.n);
        assert!(objects.get(a.id).is_none());
    }

    #[test]
    fn id_roundtrip_and_rejects() {
        let id: ObjectId = "tab:42".parse().unwrap();
        assert_eq!(id, ObjectId::new(ObjectKind::Tab, 42));
        assert_eq!(id.to_string(), "tab:42");

        assert!("tab".parse::<ObjectId>().is_err());
        assert!("gizmo:1".parse::<ObjectId>().is_err());
        assert!("tab:abc".parse::<ObjectId>().is_err());
    }

    #[test]
    fn update_replaces_attrs_and_views_stay_immutable() {
        let objects = ObjectManager::new();
        let tab = objects.create(ObjectKind::Tab, tab_attrs("https://a.example", None));
        let before = objects.get(tab.id).unwrap();

        let mut patch = AttrMap::new();
        patch.insert("url".into(), Value::String("https://b.example".into()));
        objects.update(tab.id, patch).unwrap();

        // The earlier view still sees the old value.
        assert_eq!(before.attr_str("url"), Some("https://a.example"));
        let after = objects.get(tab.id).unwrap();
        assert_eq!(after.attr_str("url"), Some("https://b.example"));
    }

    #[test]
    fn lifecycle_events_fire_after_visibility() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let objects = Arc::new(ObjectManager::new());
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = Arc::clone(&seen);
        objects.subscribe(Box::new(move |_event| {
            seen_clone.fetch_add(1, Ordering::SeqCst);
        }));

        let tab = objects.create(ObjectKind::Tab, AttrMap::new());
        objects
            .update(tab.id, AttrMap::new())
            .unwrap();
        objects.dispose(tab.id).unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn query_filters_on_attrs() {
        let objects = ObjectManager::new();
        objects.create(ObjectKind::Form, form_attrs("tab:1", FormKind::Login));
        objects.create(ObjectKind::Form, form_attrs("tab:1", FormKind::Search));
        objects.create(ObjectKind::Form, form_attrs("tab:2", FormKind::Login));

        let mut filters = AttrMap::new();
        filters.insert("tab_id".into(), Value::String("tab:1".into()));
        filters.insert("kind".into(), Value::String("login".into()));
        let hits = objects.query(ObjectKind::Form, &filters);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].attr_str("tab_id"), Some("tab:1"));
    }

    #[test]
    fn form_kind_rejects_unknown() {
        assert_eq!(FormKind::parse("login"), Some(FormKind::Login));
        assert_eq!(FormKind::parse(""), Some(FormKind::Generic));
        assert_eq!(FormKind::parse("jackpot"), None);
    }
}
