//! Audit trail properties: completeness, redaction, causal chains, and
//! durability across reopen.

use std::sync::Arc;

use serde_json::{Map, Value};
use warden_kernel::audit::{AuditEvent, AuditFilter, AuditLog, OpResult, Provenance};
use warden_kernel::capability::{CapabilityBroker, Constraints, RevocationStore, RiskTier};
use warden_kernel::config::{Kernel, KernelConfig};
use warden_kernel::runtime::{ApprovalDecision, StaticApprovals};

fn args(pairs: &[(&str, &str)]) -> Map<String, Value> {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), Value::String((*v).to_string())))
        .collect()
}

/// P1: for every successful mediated mutation, the newest entry for that
/// op names the mutated object.
#[test]
fn audit_completeness_for_mediated_mutations() {
    let kernel = Kernel::init(KernelConfig::default()).unwrap();
    kernel
        .broker
        .grant("agent:1", "**", "*", RiskTier::Stateful, None, Constraints::none())
        .unwrap();

    let result = kernel.runtime.execute(
        "import browser\nlet tab = browser.tab.open(\"https://example.com\")\nreturn tab",
        "agent:1",
        None,
    );
    let tab_id = result.return_value.unwrap();
    let tab_id = tab_id.as_str().unwrap();

    let entries = kernel.audit.query(&AuditFilter::op("tab.open")).unwrap();
    let last = entries.last().unwrap();
    assert_eq!(last.object.as_deref(), Some(tab_id));
    assert_eq!(last.result, OpResult::Success);
    assert_eq!(last.risk_tier, Some(RiskTier::Stateful));
}

/// P7: a provided secret value never appears in any audit entry, in the
/// store or in an export.
#[test]
fn secrets_never_reach_the_store_or_exports() {
    let secret = "hunter2-super-secret";
    let dir = tempfile::tempdir().unwrap();
    let export_path = dir.path().join("export.json");

    let audit = AuditLog::in_memory().unwrap();
    audit
        .log(
            AuditEvent::new("form.fill", "agent:1")
                .object("form:1")
                .args(args(&[("password", secret), ("username", "alice")])),
        )
        .unwrap();

    let entries = audit.query(&AuditFilter::any()).unwrap();
    let serialized = serde_json::to_string(&entries).unwrap();
    assert!(!serialized.contains(secret));

    audit.export_json(&export_path, &AuditFilter::any()).unwrap();
    let exported = std::fs::read_to_string(&export_path).unwrap();
    assert!(!exported.contains(secret));
    // The sensitive *name* appears only as a salted hash.
    assert!(!exported.contains("\"password\""));
    assert!(exported.contains("[k:"));
}

#[test]
fn per_principal_chains_are_dense_and_independent() {
    let audit = AuditLog::in_memory().unwrap();
    let a1 = audit.log(AuditEvent::new("tab.open", "agent:1")).unwrap();
    let b1 = audit.log(AuditEvent::new("tab.open", "agent:2")).unwrap();
    let a2 = audit.log(AuditEvent::new("tab.navigate", "agent:1")).unwrap();
    let b2 = audit.log(AuditEvent::new("tab.close", "agent:2")).unwrap();

    assert_eq!(a1.prev_id, None);
    assert_eq!(a2.prev_id, Some(a1.id));
    assert_eq!(b1.prev_id, None);
    assert_eq!(b2.prev_id, Some(b1.id));
}

#[test]
fn chains_continue_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("audit.db");

    let first_id = {
        let audit = AuditLog::open(&path).unwrap();
        audit.log(AuditEvent::new("tab.open", "agent:1")).unwrap().id
    };

    let audit = AuditLog::open(&path).unwrap();
    let next = audit.log(AuditEvent::new("tab.close", "agent:1")).unwrap();
    assert_eq!(next.prev_id, Some(first_id));

    // And the earlier entry is still there, in order.
    let entries = audit.query(&AuditFilter::principal("agent:1")).unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].id, first_id);
}

#[test]
fn capability_decisions_are_always_audited() {
    let audit = Arc::new(AuditLog::in_memory().unwrap());
    let broker =
        CapabilityBroker::new(Arc::clone(&audit), RevocationStore::in_memory().unwrap()).unwrap();

    broker
        .grant("agent:1", "tab.read", "tab:*", RiskTier::Read, None, Constraints::none())
        .unwrap();
    broker
        .check(
            "agent:1",
            "tab.read",
            "tab:1",
            warden_kernel::capability::CheckContext::default(),
        )
        .unwrap();
    broker
        .check(
            "agent:1",
            "form.submit",
            "form:1",
            warden_kernel::capability::CheckContext::default(),
        )
        .unwrap();

    let checks = audit.query(&AuditFilter::op("capability.check")).unwrap();
    assert_eq!(checks.len(), 2);
    assert_eq!(checks[0].result, OpResult::Success);
    assert_eq!(checks[1].result, OpResult::Denied);
    assert_eq!(checks[1].error_kind.as_deref(), Some("no_grant"));
}

#[test]
fn transaction_context_correlates_entries() {
    let kernel = Kernel::init(KernelConfig::default()).unwrap();
    kernel
        .broker
        .grant("agent:1", "**", "*", RiskTier::Stateful, None, Constraints::none())
        .unwrap();

    let result = kernel.runtime.execute(
        "import browser\n\
         let tx = browser.txn.begin()\n\
         let tab = browser.tab.open(\"https://example.com\")\n\
         browser.txn.commit()\n\
         return tx",
        "agent:1",
        None,
    );
    let tx_id = result.return_value.unwrap();
    let tx_id = tx_id.as_str().unwrap();

    let in_tx = kernel.audit.transaction_log(tx_id).unwrap();
    assert!(
        in_tx.iter().any(|e| e.op == "tab.open"),
        "the mediated mutation must be correlated to its transaction"
    );
}

#[test]
fn provenance_is_recorded_per_entry() {
    use warden_kernel::object::ObjectManager;
    use warden_kernel::renderer::MockRenderer;

    let objects = Arc::new(ObjectManager::new());
    let renderer = Arc::new(MockRenderer::new(Arc::clone(&objects)));
    let kernel = Kernel::init_with(
        KernelConfig::default(),
        objects,
        renderer,
        Arc::new(StaticApprovals(ApprovalDecision::ApproveOnce)),
    )
    .unwrap();
    kernel
        .broker
        .grant("agent:1", "**", "*", RiskTier::Stateful, None, Constraints::none())
        .unwrap();

    kernel.runtime.execute(
        "import browser\n\
         browser.human.approve(\"may I open a tab?\")\n\
         browser.tab.open(\"https://example.com\")",
        "agent:1",
        None,
    );

    let opens = kernel.audit.query(&AuditFilter::op("tab.open")).unwrap();
    assert_eq!(opens.last().unwrap().provenance, Provenance::Agent);
    // Grants are recorded by the system.
    let grants = kernel.audit.query(&AuditFilter::op("capability.grant")).unwrap();
    assert_eq!(grants.last().unwrap().provenance, Provenance::System);
    // The approval prompt was audited too.
    assert_eq!(kernel.audit.count(&AuditFilter::op("human.approve")).unwrap(), 1);
}
