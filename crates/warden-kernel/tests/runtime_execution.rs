//! End-to-end execution: workflows over the mock renderer, the
//! capability firewall, quotas, timeouts, cancellation and dry-run
//! inference.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use warden_kernel::audit::{AuditFilter, OpResult};
use warden_kernel::capability::{Constraints, RiskTier};
use warden_kernel::config::{Kernel, KernelConfig};
use warden_kernel::object::{ObjectKind, ObjectManager};
use warden_kernel::renderer::MockRenderer;
use warden_kernel::runtime::{
    ApprovalDecision, ExecutionState, RequiredCapability, RuntimeConfig, StaticApprovals,
};

/// A kernel whose approval prompt says yes, with a blanket grant for the
/// principal. Most tests start here and narrow.
fn permissive_kernel() -> Kernel {
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
        .grant("agent:1", "**", "*", RiskTier::Irreversible, None, Constraints::none())
        .unwrap();
    kernel
}

const LOGIN_WORKFLOW: &str = r#"
import browser
let tab = browser.tab.open("https://example.com/login")
browser.tab.wait_for(tab, "interactive")
let form = browser.form.find(tab, "login")
if form != null {
    browser.form.fill(form, {"email": "alice@example.com", "password": "hunter2"})
    if browser.human.approve("Submit the login form?") {
        browser.form.submit(form)
    }
}
return form
"#;

#[test]
fn login_workflow_completes_and_submits() {
    let kernel = permissive_kernel();
    let result = kernel.runtime.execute(LOGIN_WORKFLOW, "agent:1", None);
    assert_eq!(result.state, ExecutionState::Completed, "{:?}", result.error);

    let form_id = result.return_value.unwrap();
    let form_id: warden_kernel::object::ObjectId = form_id.as_str().unwrap().parse().unwrap();
    let form = kernel.objects.get(form_id).unwrap();
    assert_eq!(form.attr_bool("submitted"), Some(true));

    // One successful T3 entry, and the password value is nowhere.
    let submits = kernel.audit.query(&AuditFilter::op("form.submit")).unwrap();
    assert_eq!(submits.len(), 1);
    assert_eq!(submits[0].result, OpResult::Success);
    let all = kernel.audit.query(&AuditFilter::any()).unwrap();
    assert!(!serde_json::to_string(&all).unwrap().contains("hunter2"));
}

#[test]
fn extraction_workflow_returns_web_content() {
    let kernel = permissive_kernel();
    let result = kernel.runtime.execute(
        "import browser\n\
         let tab = browser.tab.open(\"https://example.com/\")\n\
         let page = browser.tab.extract(tab, \"markdown\")\n\
         return page.title",
        "agent:1",
        None,
    );
    assert_eq!(result.state, ExecutionState::Completed, "{:?}", result.error);
    assert_eq!(result.return_value.unwrap(), "Example Domain");
}

/// P6 / scenario 3: a T3 call fed by extracted content is refused at the
/// mediation boundary, before the broker, and audited as `firewall`.
#[test]
fn firewall_refuses_web_content_driven_t3() {
    let kernel = permissive_kernel();
    let result = kernel.runtime.execute(
        "import browser\n\
         let tab = browser.tab.open(\"https://example.com/login\")\n\
         let page = browser.tab.extract(tab, \"forms\")\n\
         browser.form.submit(page.forms[0].action)",
        "agent:1",
        None,
    );
    assert_eq!(result.state, ExecutionState::Failed);
    assert_eq!(result.error_kind, Some("firewall"));

    let denied = kernel
        .audit
        .query(&AuditFilter {
            op: Some("form.submit".into()),
            result: Some(OpResult::Denied),
            ..AuditFilter::default()
        })
        .unwrap();
    assert_eq!(denied.len(), 1);
    assert_eq!(denied[0].error_kind.as_deref(), Some("firewall"));
    // No submission happened.
    for form in kernel.objects.list_by_type(ObjectKind::Form) {
        assert_ne!(form.attr_bool("submitted"), Some(true));
    }
}

#[test]
fn taint_survives_string_concatenation() {
    let kernel = permissive_kernel();
    let result = kernel.runtime.execute(
        "import browser\n\
         let tab = browser.tab.open(\"https://example.com/\")\n\
         let page = browser.tab.extract(tab, \"markdown\")\n\
         let laundered = \"form:\" + page.title\n\
         browser.form.submit(laundered)",
        "agent:1",
        None,
    );
    assert_eq!(result.error_kind, Some("firewall"));
}

#[test]
fn capability_denial_is_structured_and_not_retried() {
    let objects = Arc::new(ObjectManager::new());
    let renderer = Arc::new(MockRenderer::new(Arc::clone(&objects)));
    let kernel = Kernel::init_with(
        KernelConfig::default(),
        objects,
        renderer,
        Arc::new(StaticApprovals(ApprovalDecision::Deny)),
    )
    .unwrap();
    // Read-only grant; the open is stateful and must be denied.
    kernel
        .broker
        .grant("agent:1", "tab.extract", "tab:*", RiskTier::Read, None, Constraints::none())
        .unwrap();

    let result = kernel.runtime.execute(
        "import browser\nbrowser.tab.open(\"https://example.com/\")",
        "agent:1",
        None,
    );
    assert_eq!(result.state, ExecutionState::Failed);
    assert_eq!(result.error_kind, Some("no_grant"));
}

/// Scenario 6: the call past the budget raises, open transactions abort,
/// and the final audit entry carries `quota_exceeded`.
#[test]
fn op_budget_exhaustion_aborts_open_transactions() {
    let objects = Arc::new(ObjectManager::new());
    let renderer = Arc::new(MockRenderer::new(Arc::clone(&objects)));
    let config = KernelConfig {
        runtime: RuntimeConfig {
            max_ops: 5,
            ..RuntimeConfig::default()
        },
        ..KernelConfig::default()
    };
    let kernel = Kernel::init_with(
        config,
        objects,
        renderer,
        Arc::new(StaticApprovals(ApprovalDecision::ApproveOnce)),
    )
    .unwrap();
    kernel
        .broker
        .grant("agent:1", "**", "*", RiskTier::Stateful, None, Constraints::none())
        .unwrap();

    let result = kernel.runtime.execute(
        "import browser\n\
         browser.txn.begin()\n\
         let tab = browser.tab.open(\"https://example.com/\")\n\
         for state in [\"interactive\", \"complete\", \"interactive\", \"complete\"] {\n\
             browser.tab.wait_for(tab, state)\n\
         }",
        "agent:1",
        None,
    );
    assert_eq!(result.state, ExecutionState::BudgetExhausted);
    assert_eq!(result.error_kind, Some("quota_exceeded"));
    assert_eq!(result.ops_used, 6);

    // The transaction the script left open was aborted...
    assert!(kernel.txns.current().is_none());
    // ...and the submission's closing entry records the reason.
    let last = kernel.audit.last().unwrap().unwrap();
    assert_eq!(last.op, "runtime.complete");
    assert_eq!(last.error_kind.as_deref(), Some("quota_exceeded"));
}

#[test]
fn wall_clock_timeout_follows_the_same_path() {
    let objects = Arc::new(ObjectManager::new());
    let renderer = Arc::new(MockRenderer::new(Arc::clone(&objects)));
    let config = KernelConfig {
        runtime: RuntimeConfig {
            timeout: Duration::ZERO,
            ..RuntimeConfig::default()
        },
        ..KernelConfig::default()
    };
    let kernel = Kernel::init_with(
        config,
        objects,
        renderer,
        Arc::new(StaticApprovals(ApprovalDecision::Deny)),
    )
    .unwrap();
    kernel
        .broker
        .grant("agent:1", "**", "*", RiskTier::Stateful, None, Constraints::none())
        .unwrap();

    let result = kernel.runtime.execute(
        "import browser\nbrowser.tab.list()",
        "agent:1",
        None,
    );
    assert_eq!(result.state, ExecutionState::TimedOut);
    assert_eq!(result.error_kind, Some("timeout"));
}

#[test]
fn external_cancellation_aborts_with_cancelled() {
    let kernel = permissive_kernel();
    let cancel = Arc::new(AtomicBool::new(false));
    cancel.store(true, Ordering::Relaxed);

    let result = kernel.runtime.execute(
        "import browser\nbrowser.txn.begin()\nbrowser.tab.list()",
        "agent:1",
        Some(Arc::clone(&cancel)),
    );
    assert_eq!(result.state, ExecutionState::Failed);
    assert_eq!(result.error_kind, Some("cancelled"));
    assert!(kernel.txns.current().is_none());
}

#[test]
fn t3_success_force_commits_and_later_rollback_is_irreversible() {
    let kernel = permissive_kernel();
    let result = kernel.runtime.execute(
        "import browser\n\
         browser.txn.begin()\n\
         let tab = browser.tab.open(\"https://example.com/login\")\n\
         browser.txn.checkpoint(\"filled\")\n\
         let form = browser.form.find(tab, \"login\")\n\
         browser.form.fill(form, {\"email\": \"a@b.c\", \"password\": \"pw\"})\n\
         browser.form.submit(form)\n\
         browser.txn.rollback(\"filled\")",
        "agent:1",
        None,
    );
    // The submit sealed the chain; the rollback afterwards must fail
    // with the irreversibility error, not silently undo.
    assert_eq!(result.state, ExecutionState::Failed);
    assert_eq!(result.error_kind, Some("irreversible"));

    let commits = kernel.audit.query(&AuditFilter::op("transaction.commit")).unwrap();
    assert_eq!(commits.len(), 1);
}

#[test]
fn transactions_left_open_abort_on_normal_exit_too() {
    let kernel = permissive_kernel();
    let result = kernel.runtime.execute(
        "import browser\nlet tx = browser.txn.begin()\nreturn tx",
        "agent:1",
        None,
    );
    assert_eq!(result.state, ExecutionState::Completed);
    assert!(kernel.txns.current().is_none());
    let aborts = kernel.audit.query(&AuditFilter::op("transaction.abort")).unwrap();
    assert_eq!(aborts.len(), 1);
}

#[test]
fn dry_run_collects_the_required_capability_set() {
    let kernel = permissive_kernel();
    let required = kernel.runtime.infer_capabilities(LOGIN_WORKFLOW).unwrap();

    let ops: Vec<&str> = required.iter().map(|c| c.operation.as_str()).collect();
    assert_eq!(
        ops,
        vec![
            "tab.open",
            "tab.wait_for",
            "form.find",
            "form.fill",
            "human.approve",
            "form.submit"
        ]
    );
    let submit: &RequiredCapability = required
        .iter()
        .find(|c| c.operation == "form.submit")
        .unwrap();
    assert_eq!(submit.risk, RiskTier::Irreversible);

    // Dry-run touched nothing real.
    assert!(kernel.objects.list_by_type(ObjectKind::Tab).is_empty());
    assert_eq!(kernel.audit.count(&AuditFilter::op("form.*")).unwrap(), 0);
}

#[test]
fn audit_range_brackets_the_submission() {
    let kernel = permissive_kernel();
    let result = kernel.runtime.execute(
        "import browser\nbrowser.tab.open(\"https://example.com/\")",
        "agent:1",
        None,
    );
    let (first, last) = result.audit_range.unwrap();
    let entries = kernel.audit.query(&AuditFilter::principal("agent:1")).unwrap();
    assert_eq!(entries.first().unwrap().id, first);
    assert_eq!(entries.last().unwrap().id, last);
    assert_eq!(entries.first().unwrap().op, "runtime.execute");
    assert_eq!(entries.last().unwrap().op, "runtime.complete");
}
