//! Static code admission.
//!
//! Submitted source is parsed and the AST walked before anything runs.
//! The walk rejects imports outside the allow-list, calls to the host's
//! dynamic-evaluation primitives, member access on double-underscored
//! names, raw network/filesystem primitives, and unknown closed-enum
//! arguments (form kinds, extraction kinds, load states) in literal
//! position. One violation is enough to refuse execution; all violations
//! are reported with their source positions.
//!
//! The allow-list is a finite, hard-coded set. There is no mechanism to
//! extend it at runtime.

use serde::Serialize;

use super::ast::{Expr, ExprKind, Pos, Program, Stmt, StmtKind};
use crate::object::{FormKind, LoadState};
use crate::renderer::ExtractKind;

/// Modules agent code may import.
pub const ALLOWED_IMPORTS: &[&str] = &["browser", "strings", "math", "json"];

/// Host evaluation primitives: never callable.
const BLOCKED_CALLS: &[&str] = &["eval", "exec", "compile", "spawn"];

/// Raw I/O primitives: never callable, whatever they resolve to.
const BLOCKED_PRIMITIVES: &[&str] = &[
    "open", "connect", "socket", "listen", "recv", "send", "read_file", "write_file",
];

/// A structured admission violation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationError {
    /// Which admission rule fired.
    pub rule: &'static str,
    /// Human-readable description.
    pub message: String,
    /// Source line (1-based).
    pub line: u32,
    /// Source column (1-based).
    pub column: u32,
}

impl ValidationError {
    fn at(rule: &'static str, message: String, pos: Pos) -> Self {
        Self {
            rule,
            message,
            line: pos.line,
            column: pos.column,
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}: [{}] {}", self.line, self.column, self.rule, self.message)
    }
}

/// Walks a parsed program and returns every admission violation.
#[must_use]
pub fn validate(program: &Program) -> Vec<ValidationError> {
    let mut walker = Walker {
        violations: Vec::new(),
    };
    walker.stmts(&program.body);
    walker.violations
}

struct Walker {
    violations: Vec<ValidationError>,
}

impl Walker {
    fn stmts(&mut self, stmts: &[Stmt]) {
        for stmt in stmts {
            self.stmt(stmt);
        }
    }

    fn stmt(&mut self, stmt: &Stmt) {
        match &stmt.kind {
            StmtKind::Import { module } => {
                if !ALLOWED_IMPORTS.contains(&module.as_str()) {
                    self.violations.push(ValidationError::at(
                        "blocked-import",
                        format!("import of '{module}' is not allowed"),
                        stmt.pos,
                    ));
                }
            }
            StmtKind::Let { value, .. } | StmtKind::Assign { value, .. } => self.expr(value),
            StmtKind::Expr(expr) => self.expr(expr),
            StmtKind::If {
                cond,
                then,
                otherwise,
            } => {
                self.expr(cond);
                self.stmts(then);
                self.stmts(otherwise);
            }
            StmtKind::For { iter, body, .. } => {
                self.expr(iter);
                self.stmts(body);
            }
            StmtKind::Return(value) => {
                if let Some(value) = value {
                    self.expr(value);
                }
            }
        }
    }

    fn expr(&mut self, expr: &Expr) {
        match &expr.kind {
            ExprKind::Member { object, name } => {
                if name.starts_with("__") {
                    self.violations.push(ValidationError::at(
                        "dunder-access",
                        format!("access to '{name}' is not allowed"),
                        expr.pos,
                    ));
                }
                self.expr(object);
            }
            ExprKind::Call { callee, args } => {
                self.check_callee(callee);
                self.check_closed_enums(callee, args);
                self.expr(callee);
                for arg in args {
                    self.expr(arg);
                }
            }
            ExprKind::Index { object, index } => {
                self.expr(object);
                self.expr(index);
            }
            ExprKind::Unary { expr, .. } => self.expr(expr),
            ExprKind::Binary { lhs, rhs, .. } => {
                self.expr(lhs);
                self.expr(rhs);
            }
            ExprKind::List(items) => {
                for item in items {
                    self.expr(item);
                }
            }
            ExprKind::MapLit(pairs) => {
                for (_, value) in pairs {
                    self.expr(value);
                }
            }
            ExprKind::Str(_)
            | ExprKind::Int(_)
            | ExprKind::Float(_)
            | ExprKind::Bool(_)
            | ExprKind::Null
            | ExprKind::Var(_) => {}
        }
    }

    fn check_callee(&mut self, callee: &Expr) {
        let name = match &callee.kind {
            ExprKind::Var(name) => name.as_str(),
            ExprKind::Member { name, .. } => name.as_str(),
            _ => return,
        };
        if BLOCKED_CALLS.contains(&name) {
            self.violations.push(ValidationError::at(
                "blocked-call",
                format!("call to '{name}' is not allowed"),
                callee.pos,
            ));
        } else if BLOCKED_PRIMITIVES.contains(&name) {
            self.violations.push(ValidationError::at(
                "blocked-primitive",
                format!("raw I/O primitive '{name}' is not allowed"),
                callee.pos,
            ));
        }
    }

    /// Closed-enum arguments in literal position are checked here rather
    /// than at run time, so a typo'd form kind refuses admission.
    fn check_closed_enums(&mut self, callee: &Expr, args: &[Expr]) {
        let Some(path) = callee.dotted_path() else {
            return;
        };
        let check = |walker: &mut Self, arg: Option<&Expr>, ok: &dyn Fn(&str) -> bool, what: &str| {
            if let Some(Expr {
                kind: ExprKind::Str(value),
                pos,
            }) = arg
            {
                if !ok(value) {
                    walker.violations.push(ValidationError::at(
                        "unknown-kind",
                        format!("unknown {what} '{value}'"),
                        *pos,
                    ));
                }
            }
        };
        match path.as_slice() {
            ["browser", "form", "find"] => {
                check(self, args.get(1), &|s| FormKind::parse(s).is_some(), "form kind");
            }
            ["browser", "tab", "extract"] => {
                check(
                    self,
                    args.get(1),
                    &|s| ExtractKind::parse(s).is_some(),
                    "extraction kind",
                );
            }
            ["browser", "tab", "wait_for"] => {
                check(
                    self,
                    args.get(1),
                    &|s| LoadState::parse(s).is_some(),
                    "load state",
                );
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::parser::parse;
    use super::*;

    fn violations(source: &str) -> Vec<ValidationError> {
        validate(&parse(source).unwrap())
    }

    #[test]
    fn clean_program_passes() {
        let source = r#"
import browser
let tab = browser.tab.open("https://example.com")
let content = browser.tab.extract(tab, "markdown")
return content
"#;
        assert!(violations(source).is_empty());
    }

    #[test]
    fn blocked_import_is_refused() {
        let found = violations("import sockets");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].rule, "blocked-import");
        assert_eq!(found[0].line, 1);
    }

    #[test]
    fn allowed_imports_pass() {
        for module in ALLOWED_IMPORTS {
            assert!(violations(&format!("import {module}")).is_empty());
        }
    }

    #[test]
    fn eval_and_exec_are_refused() {
        assert_eq!(violations(r#"eval("code")"#)[0].rule, "blocked-call");
        assert_eq!(violations(r#"exec("code")"#)[0].rule, "blocked-call");
        // Also when reached through a member.
        assert_eq!(violations(r#"x.eval("code")"#)[0].rule, "blocked-call");
    }

    #[test]
    fn dunder_access_is_refused() {
        let found = violations("let x = tab.__class__");
        assert_eq!(found[0].rule, "dunder-access");
    }

    #[test]
    fn raw_io_primitives_are_refused() {
        assert_eq!(violations(r#"open("/etc/passwd")"#)[0].rule, "blocked-primitive");
        assert_eq!(violations(r#"connect("10.0.0.1")"#)[0].rule, "blocked-primitive");
    }

    #[test]
    fn unknown_form_kind_is_refused_at_admission() {
        let found = violations(r#"browser.form.find(tab, "jackpot")"#);
        assert_eq!(found[0].rule, "unknown-kind");
        // Known kinds pass.
        assert!(violations(r#"browser.form.find(tab, "login")"#).is_empty());
    }

    #[test]
    fn unknown_extract_kind_is_refused_at_admission() {
        let found = violations(r#"browser.tab.extract(tab, "pixels")"#);
        assert_eq!(found[0].rule, "unknown-kind");
    }

    #[test]
    fn all_violations_are_collected() {
        let source = "import sockets\nimport subprocess\neval(\"x\")";
        assert_eq!(violations(source).len(), 3);
    }
}
