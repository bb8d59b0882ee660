//! Static admission: what the runtime refuses before anything runs.

use warden_kernel::config::{Kernel, KernelConfig};
use warden_kernel::runtime::ExecutionState;

fn kernel() -> Kernel {
    Kernel::init(KernelConfig::default()).unwrap()
}

#[test]
fn blocked_imports_are_refused_with_locations() {
    let kernel = kernel();
    let errors = kernel.runtime.validate("import browser\nimport subprocess");
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].rule, "blocked-import");
    assert_eq!(errors[0].line, 2);
}

#[test]
fn the_allow_list_is_exactly_the_allow_list() {
    let kernel = kernel();
    for module in ["browser", "strings", "math", "json"] {
        assert!(
            kernel.runtime.validate(&format!("import {module}")).is_empty(),
            "{module} should be admissible"
        );
    }
    for module in ["os", "sys", "net", "fs", "ffi"] {
        assert!(
            !kernel.runtime.validate(&format!("import {module}")).is_empty(),
            "{module} should be refused"
        );
    }
}

#[test]
fn eval_exec_and_dunders_are_refused() {
    let kernel = kernel();
    assert_eq!(kernel.runtime.validate(r#"eval("1")"#)[0].rule, "blocked-call");
    assert_eq!(kernel.runtime.validate(r#"exec("1")"#)[0].rule, "blocked-call");
    assert_eq!(
        kernel.runtime.validate("let x = tab.__proto__")[0].rule,
        "dunder-access"
    );
}

#[test]
fn raw_io_primitives_are_refused() {
    let kernel = kernel();
    for source in [r#"open("/etc/shadow")"#, r#"connect("10.0.0.1", 443)"#] {
        let errors = kernel.runtime.validate(source);
        assert_eq!(errors[0].rule, "blocked-primitive", "{source}");
    }
}

#[test]
fn unknown_closed_enum_kinds_are_refused_at_admission() {
    let kernel = kernel();
    let errors = kernel
        .runtime
        .validate(r#"browser.form.find(tab, "megaform")"#);
    assert_eq!(errors[0].rule, "unknown-kind");

    let errors = kernel
        .runtime
        .validate(r#"browser.tab.extract(tab, "screenshot")"#);
    assert_eq!(errors[0].rule, "unknown-kind");
}

#[test]
fn syntax_errors_come_back_structured() {
    let kernel = kernel();
    let errors = kernel.runtime.validate("let = 3");
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].rule, "syntax");
    assert_eq!(errors[0].line, 1);
}

#[test]
fn one_violation_is_enough_to_refuse_execution() {
    let kernel = kernel();
    let result = kernel
        .runtime
        .execute("import subprocess", "agent:1", None);
    assert_eq!(result.state, ExecutionState::Failed);
    assert_eq!(result.error_kind, Some("validation"));
    assert_eq!(result.ops_used, 0);
}

#[test]
fn every_violation_is_reported_not_just_the_first() {
    let kernel = kernel();
    let errors = kernel
        .runtime
        .validate("import os\nimport sys\neval(\"x\")\nlet y = a.__dict__");
    assert_eq!(errors.len(), 4);
}
