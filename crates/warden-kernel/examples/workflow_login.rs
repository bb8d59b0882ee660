//! A login workflow under full mediation: grant, dry-run, approve,
//! execute, inspect the audit trail.

use std::sync::Arc;

use warden_kernel::audit::AuditFilter;
use warden_kernel::capability::{Constraints, RiskTier};
use warden_kernel::config::{Kernel, KernelConfig};
use warden_kernel::object::ObjectManager;
use warden_kernel::renderer::MockRenderer;
use warden_kernel::runtime::{ApprovalDecision, StaticApprovals};

const SCRIPT: &str = r#"
import browser

let tab = browser.tab.open("https://example.com/login")
browser.tab.wait_for(tab, "interactive")

let form = browser.form.find(tab, "login")
if form == null {
    return "no login form found"
}

browser.form.fill(form, {"email": "alice@example.com", "password": "hunter2"})
if browser.human.approve("Submit the login form on example.com?") {
    browser.form.submit(form)
    return "submitted"
}
return "submission not approved"
"#;

fn main() -> Result<(), warden_kernel::error::KernelError> {
    let objects = Arc::new(ObjectManager::new());
    let renderer = Arc::new(MockRenderer::new(Arc::clone(&objects)));
    let kernel = Kernel::init_with(
        KernelConfig::default(),
        objects,
        renderer,
        Arc::new(StaticApprovals(ApprovalDecision::ApproveOnce)),
    )?;

    // Surface what the script would need before letting it run.
    match kernel.runtime.infer_capabilities(SCRIPT) {
        Ok(required) => {
            println!("capabilities required:");
            for cap in &required {
                println!("  {} on {} ({})", cap.operation, cap.resource, cap.risk.as_str());
            }
        }
        Err(violations) => {
            for violation in violations {
                eprintln!("refused: {violation}");
            }
            return Ok(());
        }
    }

    kernel.broker.grant(
        "agent:1",
        "**",
        "*",
        RiskTier::Irreversible,
        Some(300.0),
        Constraints::none(),
    )?;

    let result = kernel.runtime.execute(SCRIPT, "agent:1", None);
    println!(
        "state={} ops={} value={:?}",
        result.state.as_str(),
        result.ops_used,
        result.return_value
    );

    for entry in kernel.audit.query(&AuditFilter::principal("agent:1"))? {
        println!("  [{}] {} -> {}", entry.op, entry.object.as_deref().unwrap_or("-"), entry.result.as_str());
    }

    kernel.shutdown()?;
    Ok(())
}
