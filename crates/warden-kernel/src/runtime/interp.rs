//! Tree-walking interpreter for admitted agent scripts.
//!
//! The interpreter binds the mediated `browser` surface (any
//! [`CallTarget`]) plus a few pure helper modules (`strings`, `math`,
//! `json`, global `len`). It has no other way to touch the world: every
//! effect goes through the call target, which charges the operation
//! budget and observes the deadline and cancellation flag. Loop
//! iterations also observe the deadline so a long pure loop cannot
//! outlive its submission.
//!
//! Taint propagation: operator results join their operands' provenance;
//! container literals join their elements; member and index access yield
//! the element's own label.

use std::collections::{BTreeMap, HashMap};

use super::api::CallTarget;
use super::ast::{BinaryOp, Expr, ExprKind, Program, Stmt, StmtKind, UnaryOp};
use super::value::{Data, ScriptValue};
use super::{ExecCx, RuntimeError};
use crate::audit::Provenance;

/// Control-flow signal from statement execution.
enum Signal {
    Normal,
    Return(ScriptValue),
}

/// Executes a program against a call target. Returns the value of the
/// first `return` statement, or null.
///
/// # Errors
///
/// Returns the first [`RuntimeError`] raised by a statement.
pub fn run(
    program: &Program,
    target: &dyn CallTarget,
    cx: &mut ExecCx,
) -> Result<ScriptValue, RuntimeError> {
    let mut interp = Interp {
        scopes: vec![HashMap::new()],
        target,
    };
    match interp.stmts(&program.body, cx)? {
        Signal::Return(value) => Ok(value),
        Signal::Normal => Ok(ScriptValue::null(Provenance::Agent)),
    }
}

struct Interp<'a> {
    scopes: Vec<HashMap<String, ScriptValue>>,
    target: &'a dyn CallTarget,
}

impl Interp<'_> {
    fn stmts(&mut self, stmts: &[Stmt], cx: &mut ExecCx) -> Result<Signal, RuntimeError> {
        for stmt in stmts {
            match self.stmt(stmt, cx)? {
                Signal::Normal => {}
                done @ Signal::Return(_) => return Ok(done),
            }
        }
        Ok(Signal::Normal)
    }

    fn stmt(&mut self, stmt: &Stmt, cx: &mut ExecCx) -> Result<Signal, RuntimeError> {
        match &stmt.kind {
            // Imports are admission's concern; at run time they are inert.
            StmtKind::Import { .. } => Ok(Signal::Normal),
            StmtKind::Let { name, value } => {
                let value = self.expr(value, cx)?;
                self.scopes
                    .last_mut()
                    .expect("scope stack is never empty")
                    .insert(name.clone(), value);
                Ok(Signal::Normal)
            }
            StmtKind::Assign { name, value } => {
                let value = self.expr(value, cx)?;
                for scope in self.scopes.iter_mut().rev() {
                    if let Some(slot) = scope.get_mut(name) {
                        *slot = value;
                        return Ok(Signal::Normal);
                    }
                }
                Err(RuntimeError::Script {
                    message: format!("assignment to unbound name '{name}'"),
                })
            }
            StmtKind::Expr(expr) => {
                self.expr(expr, cx)?;
                Ok(Signal::Normal)
            }
            StmtKind::If {
                cond,
                then,
                otherwise,
            } => {
                let cond = self.expr(cond, cx)?;
                let branch = if cond.truthy() { then } else { otherwise };
                self.scopes.push(HashMap::new());
                let signal = self.stmts(branch, cx);
                self.scopes.pop();
                signal
            }
            StmtKind::For { var, iter, body } => {
                let iterable = self.expr(iter, cx)?;
                let type_name = iterable.type_name();
                let Data::List(items) = iterable.data else {
                    return Err(RuntimeError::Script {
                        message: format!("cannot iterate a {type_name}"),
                    });
                };
                for item in items {
                    cx.observe()?;
                    self.scopes.push(HashMap::new());
                    self.scopes
                        .last_mut()
                        .expect("just pushed")
                        .insert(var.clone(), item);
                    let signal = self.stmts(body, cx);
                    self.scopes.pop();
                    match signal? {
                        Signal::Normal => {}
                        done @ Signal::Return(_) => return Ok(done),
                    }
                }
                Ok(Signal::Normal)
            }
            StmtKind::Return(value) => {
                let value = match value {
                    Some(expr) => self.expr(expr, cx)?,
                    None => ScriptValue::null(Provenance::Agent),
                };
                Ok(Signal::Return(value))
            }
        }
    }

    fn lookup(&self, name: &str) -> Option<&ScriptValue> {
        self.scopes.iter().rev().find_map(|scope| scope.get(name))
    }

    #[allow(clippy::too_many_lines)]
    fn expr(&mut self, expr: &Expr, cx: &mut ExecCx) -> Result<ScriptValue, RuntimeError> {
        match &expr.kind {
            ExprKind::Str(s) => Ok(ScriptValue::str(s.clone(), Provenance::Agent)),
            ExprKind::Int(n) => Ok(ScriptValue::int(*n, Provenance::Agent)),
            ExprKind::Float(f) => Ok(ScriptValue {
                data: Data::Float(*f),
                provenance: Provenance::Agent,
            }),
            ExprKind::Bool(b) => Ok(ScriptValue::bool(*b, Provenance::Agent)),
            ExprKind::Null => Ok(ScriptValue::null(Provenance::Agent)),
            ExprKind::List(items) => {
                cx.charge_values(items.len())?;
                let mut values = Vec::with_capacity(items.len());
                let mut provenance = Provenance::Agent;
                for item in items {
                    let value = self.expr(item, cx)?;
                    provenance = provenance.join(value.provenance);
                    values.push(value);
                }
                Ok(ScriptValue {
                    data: Data::List(values),
                    provenance,
                })
            }
            ExprKind::MapLit(pairs) => {
                cx.charge_values(pairs.len())?;
                let mut entries = BTreeMap::new();
                let mut provenance = Provenance::Agent;
                for (key, value) in pairs {
                    let value = self.expr(value, cx)?;
                    provenance = provenance.join(value.provenance);
                    entries.insert(key.clone(), value);
                }
                Ok(ScriptValue {
                    data: Data::Map(entries),
                    provenance,
                })
            }
            ExprKind::Var(name) => self.lookup(name).cloned().ok_or_else(|| {
                RuntimeError::Script {
                    message: format!("unbound name '{name}'"),
                }
            }),
            ExprKind::Member { object, name } => {
                // Module paths are only meaningful as call callees.
                if expr.dotted_path().is_some_and(|p| is_module_root(p[0])) {
                    return Err(RuntimeError::Script {
                        message: format!("'{name}' is not a value; call it"),
                    });
                }
                let object = self.expr(object, cx)?;
                match &object.data {
                    Data::Map(entries) => Ok(entries.get(name).cloned().unwrap_or_else(|| {
                        ScriptValue::null(object.provenance)
                    })),
                    other => Err(RuntimeError::Script {
                        message: format!(
                            "cannot access member '{name}' on a {}",
                            type_name_of(other)
                        ),
                    }),
                }
            }
            ExprKind::Index { object, index } => {
                let container = self.expr(object, cx)?;
                let index = self.expr(index, cx)?;
                match (&container.data, &index.data) {
                    (Data::List(items), Data::Int(n)) => {
                        let at = usize::try_from(*n).ok();
                        at.and_then(|at| items.get(at).cloned()).ok_or_else(|| {
                            RuntimeError::Script {
                                message: format!("index {n} out of bounds"),
                            }
                        })
                    }
                    (Data::Map(entries), Data::Str(key)) => Ok(entries
                        .get(key)
                        .cloned()
                        .unwrap_or_else(|| ScriptValue::null(container.provenance))),
                    _ => Err(RuntimeError::Script {
                        message: format!(
                            "cannot index a {} with a {}",
                            container.type_name(),
                            index.type_name()
                        ),
                    }),
                }
            }
            ExprKind::Unary { op, expr: inner } => {
                let value = self.expr(inner, cx)?;
                match op {
                    UnaryOp::Not => Ok(ScriptValue::bool(!value.truthy(), value.provenance)),
                    UnaryOp::Neg => match value.data {
                        Data::Int(n) => Ok(ScriptValue {
                            data: Data::Int(-n),
                            provenance: value.provenance,
                        }),
                        Data::Float(f) => Ok(ScriptValue {
                            data: Data::Float(-f),
                            provenance: value.provenance,
                        }),
                        _ => Err(RuntimeError::Script {
                            message: format!("cannot negate a {}", value.type_name()),
                        }),
                    },
                }
            }
            ExprKind::Binary { op, lhs, rhs } => self.binary(*op, lhs, rhs, cx),
            ExprKind::Call { callee, args } => self.call(callee, args, cx),
        }
    }

    fn binary(
        &mut self,
        op: BinaryOp,
        lhs: &Expr,
        rhs: &Expr,
        cx: &mut ExecCx,
    ) -> Result<ScriptValue, RuntimeError> {
        // Short-circuit forms first.
        if matches!(op, BinaryOp::And | BinaryOp::Or) {
            let left = self.expr(lhs, cx)?;
            let take_right = match op {
                BinaryOp::And => left.truthy(),
                _ => !left.truthy(),
            };
            return if take_right { self.expr(rhs, cx) } else { Ok(left) };
        }

        let left = self.expr(lhs, cx)?;
        let right = self.expr(rhs, cx)?;
        let provenance = left.provenance.join(right.provenance);

        let value = match op {
            BinaryOp::Eq => Data::Bool(left.data == right.data),
            BinaryOp::Ne => Data::Bool(left.data != right.data),
            BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
                let ordering = compare(&left, &right)?;
                let holds = match op {
                    BinaryOp::Lt => ordering.is_lt(),
                    BinaryOp::Le => ordering.is_le(),
                    BinaryOp::Gt => ordering.is_gt(),
                    _ => ordering.is_ge(),
                };
                Data::Bool(holds)
            }
            BinaryOp::Add => match (&left.data, &right.data) {
                (Data::Int(a), Data::Int(b)) => Data::Int(a.wrapping_add(*b)),
                (Data::Float(a), Data::Float(b)) => Data::Float(a + b),
                (Data::Int(a), Data::Float(b)) => Data::Float(*a as f64 + b),
                (Data::Float(a), Data::Int(b)) => Data::Float(a + *b as f64),
                (Data::Str(a), Data::Str(b)) => {
                    cx.charge_values(1)?;
                    Data::Str(format!("{a}{b}"))
                }
                (Data::List(a), Data::List(b)) => {
                    cx.charge_values(a.len() + b.len())?;
                    let mut items = a.clone();
                    items.extend(b.iter().cloned());
                    Data::List(items)
                }
                _ => {
                    return Err(RuntimeError::Script {
                        message: format!(
                            "cannot add {} and {}",
                            left.type_name(),
                            right.type_name()
                        ),
                    })
                }
            },
            BinaryOp::Sub => match (&left.data, &right.data) {
                (Data::Int(a), Data::Int(b)) => Data::Int(a.wrapping_sub(*b)),
                (Data::Float(a), Data::Float(b)) => Data::Float(a - b),
                (Data::Int(a), Data::Float(b)) => Data::Float(*a as f64 - b),
                (Data::Float(a), Data::Int(b)) => Data::Float(a - *b as f64),
                _ => {
                    return Err(RuntimeError::Script {
                        message: format!(
                            "cannot subtract {} from {}",
                            right.type_name(),
                            left.type_name()
                        ),
                    })
                }
            },
            BinaryOp::And | BinaryOp::Or => unreachable!("handled above"),
        };
        Ok(ScriptValue {
            data: value,
            provenance,
        })
    }

    fn call(
        &mut self,
        callee: &Expr,
        args: &[Expr],
        cx: &mut ExecCx,
    ) -> Result<ScriptValue, RuntimeError> {
        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            values.push(self.expr(arg, cx)?);
        }

        let Some(path) = callee.dotted_path() else {
            return Err(RuntimeError::Script {
                message: "expression is not callable".into(),
            });
        };
        match path.as_slice() {
            ["browser", rest @ ..] if !rest.is_empty() => {
                let op = rest.join(".");
                self.target.invoke(&op, &values, cx)
            }
            ["len"] => builtin_len(&values),
            ["strings", method] => builtin_strings(method, &values, cx),
            ["math", method] => builtin_math(method, &values),
            ["json", method] => builtin_json(method, &values, cx),
            _ => Err(RuntimeError::Script {
                message: format!("'{}' is not callable", path.join(".")),
            }),
        }
    }
}

fn is_module_root(name: &str) -> bool {
    matches!(name, "browser" | "strings" | "math" | "json")
}

fn type_name_of(data: &Data) -> &'static str {
    ScriptValue {
        data: data.clone(),
        provenance: Provenance::Agent,
    }
    .type_name()
}

fn compare(left: &ScriptValue, right: &ScriptValue) -> Result<std::cmp::Ordering, RuntimeError> {
    match (&left.data, &right.data) {
        (Data::Int(a), Data::Int(b)) => Ok(a.cmp(b)),
        (Data::Str(a), Data::Str(b)) => Ok(a.cmp(b)),
        (Data::Float(a), Data::Float(b)) => Ok(a.total_cmp(b)),
        (Data::Int(a), Data::Float(b)) => Ok((*a as f64).total_cmp(b)),
        (Data::Float(a), Data::Int(b)) => Ok(a.total_cmp(&(*b as f64))),
        _ => Err(RuntimeError::Script {
            message: format!(
                "cannot compare {} with {}",
                left.type_name(),
                right.type_name()
            ),
        }),
    }
}

fn one_str<'a>(values: &'a [ScriptValue], what: &str) -> Result<&'a ScriptValue, RuntimeError> {
    values.first().filter(|v| v.as_str().is_some()).ok_or_else(|| {
        RuntimeError::Script {
            message: format!("{what} takes a string argument"),
        }
    })
}

fn builtin_len(values: &[ScriptValue]) -> Result<ScriptValue, RuntimeError> {
    let value = values.first().ok_or_else(|| RuntimeError::Script {
        message: "len takes one argument".into(),
    })?;
    let len = match &value.data {
        Data::Str(s) => s.chars().count(),
        Data::List(items) => items.len(),
        Data::Map(entries) => entries.len(),
        _ => {
            return Err(RuntimeError::Script {
                message: format!("len of a {}", value.type_name()),
            })
        }
    };
    Ok(ScriptValue::int(
        i64::try_from(len).unwrap_or(i64::MAX),
        value.provenance,
    ))
}

fn builtin_strings(
    method: &str,
    values: &[ScriptValue],
    cx: &mut ExecCx,
) -> Result<ScriptValue, RuntimeError> {
    cx.charge_values(1)?;
    let subject = one_str(values, "strings method")?;
    let text = subject.as_str().unwrap_or_default();
    let provenance = subject.provenance;
    match method {
        "upper" => Ok(ScriptValue::str(text.to_uppercase(), provenance)),
        "lower" => Ok(ScriptValue::str(text.to_lowercase(), provenance)),
        "trim" => Ok(ScriptValue::str(text.trim(), provenance)),
        "contains" => {
            let needle = values.get(1).and_then(ScriptValue::as_str).unwrap_or("");
            Ok(ScriptValue::bool(text.contains(needle), provenance))
        }
        "split" => {
            let sep = values.get(1).and_then(ScriptValue::as_str).unwrap_or(" ");
            let parts = text
                .split(sep)
                .map(|part| ScriptValue::str(part, provenance))
                .collect();
            Ok(ScriptValue {
                data: Data::List(parts),
                provenance,
            })
        }
        other => Err(RuntimeError::Script {
            message: format!("unknown strings method '{other}'"),
        }),
    }
}

fn builtin_math(method: &str, values: &[ScriptValue]) -> Result<ScriptValue, RuntimeError> {
    let num = |at: usize| -> Result<f64, RuntimeError> {
        match values.get(at).map(|v| &v.data) {
            Some(Data::Int(n)) => Ok(*n as f64),
            Some(Data::Float(f)) => Ok(*f),
            _ => Err(RuntimeError::Script {
                message: format!("math.{method} takes numeric arguments"),
            }),
        }
    };
    let provenance = values
        .iter()
        .fold(Provenance::Agent, |acc, v| acc.join(v.provenance));
    let result = match method {
        "min" => num(0)?.min(num(1)?),
        "max" => num(0)?.max(num(1)?),
        "abs" => num(0)?.abs(),
        other => {
            return Err(RuntimeError::Script {
                message: format!("unknown math method '{other}'"),
            })
        }
    };
    // Keep ints when the inputs were ints and the result is integral.
    let all_ints = values
        .iter()
        .all(|v| matches!(v.data, Data::Int(_)));
    if all_ints {
        #[allow(clippy::cast_possible_truncation)]
        Ok(ScriptValue::int(result as i64, provenance))
    } else {
        Ok(ScriptValue {
            data: Data::Float(result),
            provenance,
        })
    }
}

fn builtin_json(
    method: &str,
    values: &[ScriptValue],
    cx: &mut ExecCx,
) -> Result<ScriptValue, RuntimeError> {
    cx.charge_values(1)?;
    let value = values.first().ok_or_else(|| RuntimeError::Script {
        message: format!("json.{method} takes one argument"),
    })?;
    match method {
        "stringify" => Ok(ScriptValue::str(
            value.to_json().to_string(),
            value.provenance,
        )),
        "parse" => {
            let text = value.as_str().ok_or_else(|| RuntimeError::Script {
                message: "json.parse takes a string".into(),
            })?;
            let parsed: serde_json::Value =
                serde_json::from_str(text).map_err(|e| RuntimeError::Script {
                    message: format!("json.parse: {e}"),
                })?;
            Ok(ScriptValue::from_json(&parsed, value.provenance))
        }
        other => Err(RuntimeError::Script {
            message: format!("unknown json method '{other}'"),
        }),
    }
}
