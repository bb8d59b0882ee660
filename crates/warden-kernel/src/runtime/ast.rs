//! AST for agent scripts.
//!
//! Deliberately small: statements and expressions cover what a browsing
//! workflow needs (bindings, calls on the mediated surface, conditionals,
//! iteration over extracted collections) and nothing that admission would
//! have to reason hard about. Every node carries its source position for
//! structured validation errors.

pub use super::lexer::Pos;

/// A parsed program.
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    /// Top-level statements.
    pub body: Vec<Stmt>,
}

/// A statement with its source position.
#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    /// The statement.
    pub kind: StmtKind,
    /// Where it starts.
    pub pos: Pos,
}

/// Statement kinds.
#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    /// `import browser`
    Import {
        /// The imported module name.
        module: String,
    },
    /// `let name = expr`
    Let {
        /// Bound name.
        name: String,
        /// Bound value.
        value: Expr,
    },
    /// `name = expr`
    Assign {
        /// Assigned name (must already be bound).
        name: String,
        /// New value.
        value: Expr,
    },
    /// A bare expression (usually a mediated call).
    Expr(Expr),
    /// `if cond { ... } else { ... }`
    If {
        /// Condition.
        cond: Expr,
        /// Then-branch.
        then: Vec<Stmt>,
        /// Else-branch (empty when absent).
        otherwise: Vec<Stmt>,
    },
    /// `for name in expr { ... }`
    For {
        /// Loop variable.
        var: String,
        /// Iterated expression (list).
        iter: Expr,
        /// Loop body.
        body: Vec<Stmt>,
    },
    /// `return expr?`
    Return(Option<Expr>),
}

/// An expression with its source position.
#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    /// The expression.
    pub kind: ExprKind,
    /// Where it starts.
    pub pos: Pos,
}

/// Expression kinds.
#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    /// String literal.
    Str(String),
    /// Integer literal.
    Int(i64),
    /// Float literal.
    Float(f64),
    /// Boolean literal.
    Bool(bool),
    /// `null`
    Null,
    /// `[a, b, c]`
    List(Vec<Expr>),
    /// `{"k": v}`
    MapLit(Vec<(String, Expr)>),
    /// Variable reference.
    Var(String),
    /// `object.name`
    Member {
        /// The accessed object.
        object: Box<Expr>,
        /// The member name.
        name: String,
    },
    /// `callee(args...)`
    Call {
        /// The called expression.
        callee: Box<Expr>,
        /// Arguments.
        args: Vec<Expr>,
    },
    /// `object[index]`
    Index {
        /// The indexed object.
        object: Box<Expr>,
        /// The index expression.
        index: Box<Expr>,
    },
    /// `!expr` or `-expr`
    Unary {
        /// The operator.
        op: UnaryOp,
        /// The operand.
        expr: Box<Expr>,
    },
    /// `lhs op rhs`
    Binary {
        /// The operator.
        op: BinaryOp,
        /// Left operand.
        lhs: Box<Expr>,
        /// Right operand.
        rhs: Box<Expr>,
    },
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    /// Logical not.
    Not,
    /// Numeric negation.
    Neg,
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    /// `==`
    Eq,
    /// `!=`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `and`
    And,
    /// `or`
    Or,
}

impl Expr {
    /// If this expression is a dotted path rooted at a variable
    /// (`browser.tab.open`), returns the segments
    /// (`["browser", "tab", "open"]`).
    #[must_use]
    pub fn dotted_path(&self) -> Option<Vec<&str>> {
        match &self.kind {
            ExprKind::Var(name) => Some(vec![name.as_str()]),
            ExprKind::Member { object, name } => {
                let mut path = object.dotted_path()?;
                path.push(name.as_str());
                Some(path)
            }
            _ => None,
        }
    }
}
