//! The abstract syntax tree consumed by the compiler.
//!
//! Every expression and statement carries the source position of its first
//! token so compile errors can point at the offending node.

use crate::{
    error::Pos,
    token::{BinOp, UnaryOp},
};

/// An expression with its source position.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ExprLoc {
    pub expr: Expr,
    pub pos: Pos,
}

impl ExprLoc {
    pub fn new(expr: Expr, pos: Pos) -> Self {
        Self { expr, pos }
    }
}

/// Binary operator tokens at the AST level.
///
/// Short-circuit and equality forms compile to dedicated opcodes rather than
/// `BinaryOp`, so they are separate from [`BinOp`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BinTok {
    Op(BinOp),
    And,
    Or,
    NilCoalesce,
    Eq,
    NotEq,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Expr {
    Nil,
    True,
    False,
    Yes,
    No,
    Int(i64),
    Uint(u64),
    Float(f64),
    Decimal(String),
    Char(char),
    Str(String),
    RawStr(String),
    Ident(String),
    Array(Vec<ExprLoc>),
    Dict(Vec<(String, ExprLoc)>),
    Func(Box<FuncLit>),
    Unary {
        op: UnaryOp,
        operand: Box<ExprLoc>,
    },
    Binary {
        op: BinTok,
        left: Box<ExprLoc>,
        right: Box<ExprLoc>,
    },
    Ternary {
        cond: Box<ExprLoc>,
        then: Box<ExprLoc>,
        otherwise: Box<ExprLoc>,
    },
    /// `target[index]`
    Index {
        target: Box<ExprLoc>,
        index: Box<ExprLoc>,
    },
    /// `target.name`
    Selector {
        target: Box<ExprLoc>,
        name: String,
    },
    /// `target[low:high]`, either bound optional
    Slice {
        target: Box<ExprLoc>,
        low: Option<Box<ExprLoc>>,
        high: Option<Box<ExprLoc>>,
    },
    Call(Box<CallExpr>),
    /// `left | right` pipeline
    Pipe {
        left: Box<ExprLoc>,
        right: Box<ExprLoc>,
    },
    /// `import("name")`
    Import(String),
}

/// A call site: positional arguments, an optional `*` splat, named arguments
/// after the `;` separator, and an optional `**` splat.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct CallExpr {
    pub callee: ExprLoc,
    pub args: Vec<ExprLoc>,
    pub var_arg: Option<ExprLoc>,
    pub named: Vec<NamedArgExpr>,
    pub var_named: Option<ExprLoc>,
}

/// One named argument at a call site. A missing value is the flag shorthand
/// and compiles to the `yes` singleton.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct NamedArgExpr {
    pub name: String,
    pub value: Option<ExprLoc>,
}

/// A positional parameter declaration, optionally typed (`x int|str`).
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ParamDecl {
    pub name: String,
    pub types: Vec<String>,
}

/// A named parameter declaration with its default expression.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct NamedParamDecl {
    pub name: String,
    pub types: Vec<String>,
    pub default: ExprLoc,
}

/// A function literal or declaration.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct FuncLit {
    /// Present for `func name(...) { ... }` declarations.
    pub name: Option<String>,
    pub params: Vec<ParamDecl>,
    /// Name of the `*rest` parameter, if any.
    pub var_param: Option<String>,
    pub named_params: Vec<NamedParamDecl>,
    /// Name of the `**named` parameter, if any.
    pub var_named_param: Option<String>,
    pub body: Vec<StmtLoc>,
    pub pos: Pos,
}

/// A statement with its source position.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct StmtLoc {
    pub stmt: Stmt,
    pub pos: Pos,
}

impl StmtLoc {
    pub fn new(stmt: Stmt, pos: Pos) -> Self {
        Self { stmt, pos }
    }
}

/// Assignment operators. `Assign` is plain `=`; the compound forms load the
/// target, apply the operator and store back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AssignOp {
    Assign,
    Bin(BinOp),
    /// `??=`: assign only when the target is nil.
    NilCoalesce,
    /// `||=`: assign only when the target is falsy.
    Or,
}

/// The left-hand side of an assignment.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum AssignTarget {
    Ident(String),
    Index { target: ExprLoc, index: ExprLoc },
    Selector { target: ExprLoc, name: String },
}

/// The else arm of an `if` statement.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ElseArm {
    Block(Vec<StmtLoc>),
    If(Box<StmtLoc>),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Stmt {
    Expr(ExprLoc),
    /// `a := e` or destructuring `a, b := e`.
    Define { names: Vec<String>, value: ExprLoc },
    /// `var a` / `var a = e` (comma-separated).
    Var { decls: Vec<(String, Option<ExprLoc>)> },
    /// `const a = e, b = e`; `iota` counts entries within one declaration.
    Const { decls: Vec<(String, ExprLoc)> },
    /// `param a, b, *rest` — valid only at the top level of a module.
    Param { names: Vec<String>, var_name: Option<String> },
    /// `global a, b` — valid only at the top level of a module.
    Global { names: Vec<String> },
    /// `t1, t2 op= e`; multi-target only with plain `=`.
    Assign {
        targets: Vec<AssignTarget>,
        op: AssignOp,
        value: ExprLoc,
    },
    /// `x++` / `x--`.
    IncDec { target: AssignTarget, inc: bool },
    If {
        init: Option<Box<StmtLoc>>,
        cond: ExprLoc,
        then: Vec<StmtLoc>,
        otherwise: Option<ElseArm>,
    },
    For {
        init: Option<Box<StmtLoc>>,
        cond: Option<ExprLoc>,
        post: Option<Box<StmtLoc>>,
        body: Vec<StmtLoc>,
    },
    ForIn {
        key: String,
        value: String,
        iterable: ExprLoc,
        body: Vec<StmtLoc>,
        /// Runs when the iterable yields nothing at all.
        else_body: Option<Vec<StmtLoc>>,
    },
    Try {
        body: Vec<StmtLoc>,
        /// Catch identifier (None for `catch { }`) and body.
        catch: Option<(Option<String>, Vec<StmtLoc>)>,
        finally: Option<Vec<StmtLoc>>,
    },
    Throw(ExprLoc),
    Return(Option<ExprLoc>),
    Break,
    Continue,
    Block(Vec<StmtLoc>),
    /// `func name(...) { ... }` declaration sugar.
    FuncDecl(Box<FuncLit>),
}
