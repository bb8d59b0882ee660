//! The mediated `browser` surface.
//!
//! Every operation agent code can perform funnels through
//! [`MediatedApi::invoke`], the only path to the Capability Broker, the
//! Audit Log, the Object Manager, the Transaction Coordinator, the
//! renderer and the credential vault. The wrapper charges the operation
//! budget, applies the capability firewall, asks the broker, performs the
//! operation, and writes the operation's audit entry.
//!
//! [`DryRunApi`] implements the same call surface with every side effect
//! stubbed; it records the capability set a submission would need, for
//! surfacing to a governance collaborator before real execution.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use serde_json::{Map, Value};
use tracing::debug;

use super::value::{Data, ScriptValue};
use super::{ExecCx, RuntimeError};
use crate::audit::{AuditEvent, AuditFilter, AuditLog, OpResult, Provenance};
use crate::capability::{CapabilityBroker, CheckContext, RiskTier};
use crate::credential::CredentialVault;
use crate::object::{
    tab_attrs, workspace_attrs, FormKind, LoadState, ObjectId, ObjectKind, ObjectManager,
    ObjectView,
};
use crate::renderer::{ExtractKind, Renderer, RendererError};
use crate::txn::TransactionCoordinator;

/// Retry bound for transient renderer failures on non-irreversible
/// calls. Capability denials are never retried.
const RENDERER_RETRIES: u32 = 3;

/// Retries a renderer call with exponential backoff while it reports a
/// transient failure. Never used for T3 operations.
fn with_renderer_retry<T>(
    mut call: impl FnMut() -> Result<T, RendererError>,
) -> Result<T, RendererError> {
    let mut attempt = 0;
    loop {
        match call() {
            Err(RendererError::Transient { cause }) if attempt < RENDERER_RETRIES => {
                attempt += 1;
                tracing::debug!(attempt, cause = %cause, "retrying transient renderer failure");
                std::thread::sleep(std::time::Duration::from_millis(10 << attempt));
            }
            other => return other,
        }
    }
}

/// Outcome of a human approval prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalDecision {
    /// Approve this one operation.
    ApproveOnce,
    /// Approve for the rest of the session.
    ApproveSession,
    /// Deny.
    Deny,
}

/// The human governance collaborator. Out-of-scope internals; the kernel
/// only needs an answer.
pub trait ApprovalHandler: Send + Sync {
    /// Asks the human to approve an operation of the given risk.
    fn approve(&self, prompt: &str, risk: RiskTier) -> ApprovalDecision;
}

/// Deny-by-default handler (production default until a UI is wired).
#[derive(Debug, Default)]
pub struct DenyAll;

impl ApprovalHandler for DenyAll {
    fn approve(&self, _prompt: &str, _risk: RiskTier) -> ApprovalDecision {
        ApprovalDecision::Deny
    }
}

/// Fixed-answer handler for tests.
#[derive(Debug)]
pub struct StaticApprovals(pub ApprovalDecision);

impl ApprovalHandler for StaticApprovals {
    fn approve(&self, _prompt: &str, _risk: RiskTier) -> ApprovalDecision {
        self.0
    }
}

/// A capability a submission was observed to need during dry-run.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequiredCapability {
    /// The operation.
    pub operation: String,
    /// The resource pattern (dry-run cannot know concrete ids; `*`).
    pub resource: String,
    /// The operation's risk tier.
    pub risk: RiskTier,
}

/// Anything the interpreter can direct mediated calls at.
pub trait CallTarget {
    /// Invokes a mediated operation.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError`] on refusal or failure.
    fn invoke(
        &self,
        op: &str,
        args: &[ScriptValue],
        cx: &mut ExecCx,
    ) -> Result<ScriptValue, RuntimeError>;
}

/// Risk tier of each broker-gated operation. Transaction control ops are
/// not listed: they are not broker-gated (but are still audited by the
/// coordinator and charged against the budget).
fn risk_of(op: &str) -> Option<RiskTier> {
    Some(match op {
        "tab.get" | "tab.list" | "tab.wait_for" | "tab.extract" | "form.find" | "form.get"
        | "workspace.get" | "workspace.list" | "credential.list" | "human.approve"
        | "audit.query" | "audit.count" => RiskTier::Read,
        "tab.open" | "tab.close" | "tab.navigate" | "form.fill" | "form.clear"
        | "workspace.create" | "workspace.add_tab" | "workspace.remove_tab" => RiskTier::Stateful,
        "form.submit" | "credential.use" => RiskTier::Irreversible,
        _ => return None,
    })
}

/// The live mediated surface.
pub struct MediatedApi {
    principal: String,
    audit: Arc<AuditLog>,
    broker: Arc<CapabilityBroker>,
    objects: Arc<ObjectManager>,
    txns: Arc<TransactionCoordinator>,
    renderer: Arc<dyn Renderer>,
    vault: Arc<CredentialVault>,
    approvals: Arc<dyn ApprovalHandler>,
    /// The transaction most recently force-committed by a T3 success.
    /// Transaction ops landing after the seal are directed here so the
    /// caller sees the irreversibility error, not a missing transaction.
    last_sealed: Mutex<Option<ObjectId>>,
}

impl MediatedApi {
    /// Binds the mediated surface for a principal.
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        principal: &str,
        audit: Arc<AuditLog>,
        broker: Arc<CapabilityBroker>,
        objects: Arc<ObjectManager>,
        txns: Arc<TransactionCoordinator>,
        renderer: Arc<dyn Renderer>,
        vault: Arc<CredentialVault>,
        approvals: Arc<dyn ApprovalHandler>,
    ) -> Self {
        Self {
            principal: principal.to_string(),
            audit,
            broker,
            objects,
            txns,
            renderer,
            vault,
            approvals,
            last_sealed: Mutex::new(None),
        }
    }

    fn arg<'a>(args: &'a [ScriptValue], at: usize, what: &str) -> Result<&'a ScriptValue, RuntimeError> {
        args.get(at).ok_or_else(|| RuntimeError::Script {
            message: format!("missing argument: {what}"),
        })
    }

    fn str_arg(args: &[ScriptValue], at: usize, what: &str) -> Result<String, RuntimeError> {
        Self::arg(args, at, what)?
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| RuntimeError::Script {
                message: format!("{what} must be a string"),
            })
    }

    fn id_arg(
        &self,
        args: &[ScriptValue],
        at: usize,
        kind: ObjectKind,
    ) -> Result<ObjectId, RuntimeError> {
        let text = Self::str_arg(args, at, kind.tag())?;
        Ok(self.objects.resolve(&text, kind)?)
    }

    /// The resource a request targets, for the broker.
    fn resource_of(op: &str, args: &[ScriptValue]) -> String {
        let first_id = || {
            args.first()
                .and_then(ScriptValue::as_str)
                .unwrap_or("*")
                .to_string()
        };
        match op {
            "tab.get" | "tab.close" | "tab.navigate" | "tab.wait_for" | "tab.extract"
            | "form.find" | "form.get" | "form.fill" | "form.clear" | "form.submit"
            | "workspace.get" | "workspace.add_tab" | "workspace.remove_tab"
            | "credential.use" => first_id(),
            _ => "*".to_string(),
        }
    }

    /// The URL argument of a request, for URL constraints.
    fn url_of(op: &str, args: &[ScriptValue]) -> Option<String> {
        let at = match op {
            "tab.open" => 0,
            "tab.navigate" => 1,
            _ => return None,
        };
        args.get(at).and_then(ScriptValue::as_str).map(str::to_string)
    }

    /// Audit-args summary for an operation. Field *values* never appear;
    /// the log's redactor additionally hashes sensitive names.
    fn audit_args(op: &str, args: &[ScriptValue]) -> Map<String, Value> {
        let mut map = Map::new();
        match op {
            "tab.open" | "tab.navigate" => {
                if let Some(url) = Self::url_of(op, args) {
                    map.insert("url".into(), Value::String(url));
                }
            }
            "tab.extract" | "tab.wait_for" | "form.find" => {
                if let Some(kind) = args.get(1).and_then(ScriptValue::as_str) {
                    map.insert("kind".into(), Value::String(kind.into()));
                }
            }
            "form.fill" => {
                if let Some(Data::Map(entries)) = args.get(1).map(|a| &a.data) {
                    map.insert(
                        "fields".into(),
                        Value::Array(
                            entries.keys().map(|k| Value::String(k.clone())).collect(),
                        ),
                    );
                }
            }
            "workspace.create" => {
                if let Some(name) = args.first().and_then(ScriptValue::as_str) {
                    map.insert("name".into(), Value::String(name.into()));
                }
            }
            "human.approve" => {
                if let Some(prompt) = args.first().and_then(ScriptValue::as_str) {
                    map.insert("prompt".into(), Value::String(prompt.into()));
                }
            }
            _ => {}
        }
        map
    }

    fn view_to_value(view: &ObjectView) -> ScriptValue {
        let mut json = Map::new();
        json.insert("id".into(), Value::String(view.id.to_string()));
        for (key, value) in view.attrs.iter() {
            json.insert(key.clone(), value.clone());
        }
        ScriptValue::from_json(&Value::Object(json), Provenance::Agent)
    }

    fn transaction_op(&self, op: &str, args: &[ScriptValue]) -> Result<ScriptValue, RuntimeError> {
        match op {
            "txn.begin" => {
                let tx = self.txns.begin()?;
                Ok(ScriptValue::str(tx.to_string(), Provenance::Agent))
            }
            "txn.checkpoint" => {
                let label = Self::str_arg(args, 0, "checkpoint label")?;
                let tx = self.current_txn()?;
                let cp = self.txns.checkpoint(tx, &label)?;
                Ok(ScriptValue::str(cp.to_string(), Provenance::Agent))
            }
            "txn.rollback" => {
                let label = args.first().and_then(ScriptValue::as_str).map(str::to_string);
                let tx = self.current_txn()?;
                self.txns.rollback(tx, label.as_deref())?;
                Ok(ScriptValue::bool(true, Provenance::Agent))
            }
            "txn.commit" => {
                let tx = self.current_txn()?;
                self.txns.commit(tx)?;
                Ok(ScriptValue::bool(true, Provenance::Agent))
            }
            "txn.abort" => {
                let tx = self.current_txn()?;
                self.txns.abort(tx)?;
                Ok(ScriptValue::bool(true, Provenance::Agent))
            }
            _ => Err(RuntimeError::Script {
                message: format!("unknown operation '{op}'"),
            }),
        }
    }

    fn current_txn(&self) -> Result<ObjectId, RuntimeError> {
        if let Some(tx) = self.txns.current() {
            return Ok(tx);
        }
        // After a T3 seal the chain is gone; route the op at the sealed
        // transaction so the caller gets the precise refusal.
        if let Some(sealed) = *self.last_sealed.lock().unwrap() {
            return Ok(sealed);
        }
        Err(RuntimeError::Script {
            message: "no active transaction".into(),
        })
    }

    #[allow(clippy::too_many_lines)]
    fn perform(&self, op: &str, args: &[ScriptValue]) -> Result<ScriptValue, RuntimeError> {
        match op {
            "tab.open" => {
                let url = Self::str_arg(args, 0, "url")?;
                let workspace = args.get(1).and_then(ScriptValue::as_str).map(str::to_string);
                let tab = self
                    .objects
                    .create(ObjectKind::Tab, tab_attrs(&url, workspace.as_deref()));
                with_renderer_retry(|| self.renderer.navigate(tab.id, &url))?;
                if let Some(workspace) = workspace {
                    let ws = self.objects.resolve(&workspace, ObjectKind::Workspace)?;
                    self.add_tab_to_workspace(ws, tab.id)?;
                }
                Ok(ScriptValue::str(tab.id.to_string(), Provenance::Agent))
            }
            "tab.get" => {
                let id = self.id_arg(args, 0, ObjectKind::Tab)?;
                Ok(Self::view_to_value(&self.objects.require(id)?))
            }
            "tab.list" => {
                let tabs = self.objects.list_by_type(ObjectKind::Tab);
                Ok(ScriptValue {
                    data: Data::List(tabs.iter().map(Self::view_to_value).collect()),
                    provenance: Provenance::Agent,
                })
            }
            "tab.close" => {
                let id = self.id_arg(args, 0, ObjectKind::Tab)?;
                self.renderer.dispose(id)?;
                self.objects.dispose(id)?;
                Ok(ScriptValue::bool(true, Provenance::Agent))
            }
            "tab.navigate" => {
                let id = self.id_arg(args, 0, ObjectKind::Tab)?;
                let url = Self::str_arg(args, 1, "url")?;
                let state = with_renderer_retry(|| self.renderer.navigate(id, &url))?;
                Ok(ScriptValue::str(state.as_str(), Provenance::Agent))
            }
            "tab.wait_for" => {
                let id = self.id_arg(args, 0, ObjectKind::Tab)?;
                let state_text = Self::str_arg(args, 1, "load state")?;
                let state = LoadState::parse(&state_text).ok_or_else(|| RuntimeError::Script {
                    message: format!("unknown load state '{state_text}'"),
                })?;
                self.renderer.wait_for(id, state)?;
                Ok(ScriptValue::bool(true, Provenance::Agent))
            }
            "tab.extract" => {
                let id = self.id_arg(args, 0, ObjectKind::Tab)?;
                let kind_text = Self::str_arg(args, 1, "extraction kind")?;
                let kind = ExtractKind::parse(&kind_text).ok_or_else(|| RuntimeError::Script {
                    message: format!("unknown extraction kind '{kind_text}'"),
                })?;
                let extracted = with_renderer_retry(|| self.renderer.extract(id, kind))?;
                // Everything a renderer returns is untrusted.
                Ok(ScriptValue::from_json(&extracted, Provenance::WebContent))
            }
            "form.find" => {
                let tab = self.id_arg(args, 0, ObjectKind::Tab)?;
                let kind_text = args
                    .get(1)
                    .and_then(ScriptValue::as_str)
                    .unwrap_or("generic");
                let kind = FormKind::parse(kind_text).ok_or_else(|| RuntimeError::Script {
                    message: format!("unknown form kind '{kind_text}'"),
                })?;
                match with_renderer_retry(|| self.renderer.find_form(tab, kind))? {
                    Some(form) => Ok(ScriptValue::str(form.to_string(), Provenance::Agent)),
                    None => Ok(ScriptValue::null(Provenance::Agent)),
                }
            }
            "form.get" => {
                let id = self.id_arg(args, 0, ObjectKind::Form)?;
                Ok(Self::view_to_value(&self.objects.require(id)?))
            }
            "form.fill" => {
                let id = self.id_arg(args, 0, ObjectKind::Form)?;
                let values = Self::arg(args, 1, "field mapping")?
                    .to_json_object()
                    .ok_or_else(|| RuntimeError::Script {
                        message: "field mapping must be a map".into(),
                    })?;
                self.renderer.fill_form(id, &values)?;
                Ok(ScriptValue::bool(true, Provenance::Agent))
            }
            "form.clear" => {
                let id = self.id_arg(args, 0, ObjectKind::Form)?;
                self.renderer.clear_form(id)?;
                Ok(ScriptValue::bool(true, Provenance::Agent))
            }
            "form.submit" => {
                let id = self.id_arg(args, 0, ObjectKind::Form)?;
                let response = self.renderer.submit_form(id)?;
                Ok(ScriptValue::from_json(&response, Provenance::WebContent))
            }
            "workspace.create" => {
                let name = Self::str_arg(args, 0, "workspace name")?;
                let ws = self
                    .objects
                    .create(ObjectKind::Workspace, workspace_attrs(&name));
                Ok(ScriptValue::str(ws.id.to_string(), Provenance::Agent))
            }
            "workspace.get" => {
                let id = self.id_arg(args, 0, ObjectKind::Workspace)?;
                Ok(Self::view_to_value(&self.objects.require(id)?))
            }
            "workspace.list" => {
                let spaces = self.objects.list_by_type(ObjectKind::Workspace);
                Ok(ScriptValue {
                    data: Data::List(spaces.iter().map(Self::view_to_value).collect()),
                    provenance: Provenance::Agent,
                })
            }
            "workspace.add_tab" => {
                let ws = self.id_arg(args, 0, ObjectKind::Workspace)?;
                let tab = self.id_arg(args, 1, ObjectKind::Tab)?;
                self.add_tab_to_workspace(ws, tab)?;
                Ok(ScriptValue::bool(true, Provenance::Agent))
            }
            "workspace.remove_tab" => {
                let ws = self.id_arg(args, 0, ObjectKind::Workspace)?;
                let tab = self.id_arg(args, 1, ObjectKind::Tab)?;
                let view = self.objects.require(ws)?;
                let tab_text = tab.to_string();
                let tab_ids: Vec<Value> = view
                    .attrs
                    .get("tab_ids")
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default()
                    .into_iter()
                    .filter(|v| v.as_str() != Some(tab_text.as_str()))
                    .collect();
                let mut patch = Map::new();
                patch.insert("tab_ids".into(), Value::Array(tab_ids));
                self.objects.update(ws, patch)?;
                Ok(ScriptValue::bool(true, Provenance::Agent))
            }
            "credential.use" => {
                let handle = self.id_arg(args, 0, ObjectKind::Credential)?;
                let bearer = self.vault.use_credential(handle)?;
                Ok(ScriptValue::str(bearer.as_token(), Provenance::Agent))
            }
            "credential.list" => {
                let creds = self.objects.list_by_type(ObjectKind::Credential);
                Ok(ScriptValue {
                    data: Data::List(creds.iter().map(Self::view_to_value).collect()),
                    provenance: Provenance::Agent,
                })
            }
            "human.approve" => {
                let prompt = Self::str_arg(args, 0, "prompt")?;
                let decision = self.approvals.approve(&prompt, RiskTier::Irreversible);
                Ok(ScriptValue::bool(
                    decision != ApprovalDecision::Deny,
                    Provenance::User,
                ))
            }
            "audit.query" | "audit.count" => {
                let filter = Self::filter_from_arg(args.first());
                if op == "audit.count" {
                    let count = self.audit.count(&filter).map_err(RuntimeError::from)?;
                    Ok(ScriptValue::int(
                        i64::try_from(count).unwrap_or(i64::MAX),
                        Provenance::Agent,
                    ))
                } else {
                    let entries = self.audit.query(&filter).map_err(RuntimeError::from)?;
                    let items = entries
                        .iter()
                        .map(|entry| {
                            let json =
                                serde_json::to_value(entry).unwrap_or(Value::Null);
                            ScriptValue::from_json(&json, Provenance::Agent)
                        })
                        .collect();
                    Ok(ScriptValue {
                        data: Data::List(items),
                        provenance: Provenance::Agent,
                    })
                }
            }
            _ => Err(RuntimeError::Script {
                message: format!("unknown operation '{op}'"),
            }),
        }
    }

    fn filter_from_arg(arg: Option<&ScriptValue>) -> AuditFilter {
        let mut filter = AuditFilter::any();
        let Some(Data::Map(entries)) = arg.map(|a| &a.data) else {
            return filter;
        };
        let get = |key: &str| -> Option<String> {
            entries.get(key).and_then(|v| v.as_str()).map(str::to_string)
        };
        filter.principal = get("principal");
        filter.op = get("op");
        filter.object = get("object");
        filter.tx_id = get("tx_id");
        if let Some(Data::Int(limit)) = entries.get("limit").map(|v| &v.data) {
            filter.limit = usize::try_from(*limit).ok();
        }
        filter
    }

    fn add_tab_to_workspace(&self, ws: ObjectId, tab: ObjectId) -> Result<(), RuntimeError> {
        let view = self.objects.require(ws)?;
        let tab_text = tab.to_string();
        let mut tab_ids = view
            .attrs
            .get("tab_ids")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        if !tab_ids.iter().any(|v| v.as_str() == Some(tab_text.as_str())) {
            tab_ids.push(Value::String(tab_text.clone()));
        }
        let mut patch = Map::new();
        patch.insert("tab_ids".into(), Value::Array(tab_ids));
        self.objects.update(ws, patch)?;
        let mut tab_patch = Map::new();
        tab_patch.insert("workspace_id".into(), Value::String(ws.to_string()));
        self.objects.update(tab, tab_patch)?;
        Ok(())
    }

    fn audit_failure(&self, op: &str, args: &[ScriptValue], error: &RuntimeError) {
        let result = if matches!(error, RuntimeError::Security { .. }) {
            OpResult::Denied
        } else {
            OpResult::Error
        };
        let event = AuditEvent::new(op, &self.principal)
            .args(Self::audit_args(op, args))
            .provenance(Provenance::Agent)
            .failure(result, error.error_kind());
        if let Err(audit_error) = self.audit.log(event) {
            tracing::error!(%audit_error, op, "audit write failed while reporting failure");
        }
    }
}

impl CallTarget for MediatedApi {
    fn invoke(
        &self,
        op: &str,
        args: &[ScriptValue],
        cx: &mut ExecCx,
    ) -> Result<ScriptValue, RuntimeError> {
        cx.charge_op()?;

        if op.starts_with("txn.") {
            return self.transaction_op(op, args);
        }

        let risk = risk_of(op).ok_or_else(|| RuntimeError::Script {
            message: format!("unknown operation '{op}'"),
        })?;
        let resource = Self::resource_of(op, args);

        if risk == RiskTier::Irreversible {
            // Capability firewall: content-derived T3 calls never reach
            // the broker.
            let taint = args
                .iter()
                .fold(Provenance::System, |acc, arg| acc.join(arg.taint()));
            if taint == Provenance::WebContent {
                let error = RuntimeError::Security {
                    rule: "firewall",
                    op: op.to_string(),
                    provenance: taint,
                };
                self.audit_failure(op, args, &error);
                return Err(error);
            }
            self.txns.admit_t3().inspect_err(|e| {
                debug!(op, error = %e, "commit boundary refused T3");
            })?;
        }

        let url = Self::url_of(op, args);
        self.broker.require(
            &self.principal,
            op,
            &resource,
            CheckContext {
                url: url.as_deref(),
            },
        )?;

        match self.perform(op, args) {
            Ok(value) => {
                let object = match op {
                    "tab.open" | "form.find" | "workspace.create" => {
                        value.as_str().map(str::to_string)
                    }
                    _ => args.first().and_then(ScriptValue::as_str).map(str::to_string),
                };
                let mut event = AuditEvent::new(op, &self.principal)
                    .args(Self::audit_args(op, args))
                    .provenance(Provenance::Agent)
                    .risk(risk);
                if let Some(object) = object {
                    event = event.object(object);
                }
                self.audit.log(event)?;

                if risk == RiskTier::Irreversible && self.txns.in_transaction() {
                    // Success at T3 forces the enclosing chain to commit.
                    let sealed = self.txns.current();
                    self.txns.seal_t3()?;
                    *self.last_sealed.lock().unwrap() = sealed;
                }
                Ok(value)
            }
            Err(error) => {
                self.audit_failure(op, args, &error);
                Err(error)
            }
        }
    }
}

/// Dry-run surface: records required capabilities, touches nothing.
pub struct DryRunApi {
    collected: Mutex<Vec<RequiredCapability>>,
}

impl Default for DryRunApi {
    fn default() -> Self {
        Self::new()
    }
}

impl DryRunApi {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self {
            collected: Mutex::new(Vec::new()),
        }
    }

    /// The capability set observed so far, deduplicated, in first-use
    /// order.
    #[must_use]
    pub fn required(&self) -> Vec<RequiredCapability> {
        let collected = self.collected.lock().unwrap();
        let mut seen = std::collections::HashSet::new();
        collected
            .iter()
            .filter(|cap| seen.insert((*cap).clone()))
            .cloned()
            .collect()
    }

    fn stub(op: &str) -> ScriptValue {
        match op {
            "tab.open" => ScriptValue::str("tab:1", Provenance::Agent),
            "form.find" => ScriptValue::str("form:1", Provenance::Agent),
            "workspace.create" => ScriptValue::str("workspace:1", Provenance::Agent),
            "credential.use" => ScriptValue::str("bearer:dryrun", Provenance::Agent),
            "tab.navigate" => ScriptValue::str("complete", Provenance::Agent),
            "human.approve" => ScriptValue::bool(true, Provenance::User),
            "audit.count" => ScriptValue::int(0, Provenance::Agent),
            "tab.list" | "workspace.list" | "credential.list" | "audit.query" => ScriptValue {
                data: Data::List(Vec::new()),
                provenance: Provenance::Agent,
            },
            "tab.extract" | "form.submit" => ScriptValue {
                data: Data::Map(BTreeMap::new()),
                provenance: Provenance::WebContent,
            },
            "tab.get" | "form.get" | "workspace.get" => ScriptValue {
                data: Data::Map(BTreeMap::new()),
                provenance: Provenance::Agent,
            },
            _ => ScriptValue::bool(true, Provenance::Agent),
        }
    }
}

impl CallTarget for DryRunApi {
    fn invoke(
        &self,
        op: &str,
        args: &[ScriptValue],
        cx: &mut ExecCx,
    ) -> Result<ScriptValue, RuntimeError> {
        cx.charge_op()?;
        if op.starts_with("txn.") {
            return Ok(match op {
                "txn.begin" => ScriptValue::str("tx:1", Provenance::Agent),
                "txn.checkpoint" => ScriptValue::str("cp:1", Provenance::Agent),
                _ => ScriptValue::bool(true, Provenance::Agent),
            });
        }
        let risk = risk_of(op).ok_or_else(|| RuntimeError::Script {
            message: format!("unknown operation '{op}'"),
        })?;
        let _ = args;
        self.collected.lock().unwrap().push(RequiredCapability {
            operation: op.to_string(),
            resource: "*".to_string(),
            risk,
        });
        Ok(Self::stub(op))
    }
}
