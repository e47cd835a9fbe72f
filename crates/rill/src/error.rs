//! Runtime and compile-time error types.
//!
//! Runtime errors carry a stable kind name from the error taxonomy plus a
//! human-readable message, and stringify as `<name>: <message>`. Errors that
//! originate from a `throw` of an error value keep a handle to that value so
//! a `catch` can rebind the exact same object.

use std::{
    borrow::Cow,
    fmt::{self, Display},
};

use strum::{Display as StrumDisplay, EnumString, IntoStaticStr};

use crate::value::Value;

/// Result type alias for operations that can produce a runtime error.
pub type RunResult<T> = Result<T, RunError>;

/// The error taxonomy.
///
/// Each kind has a stable name used for `isError`-style chain matching.
/// The string representation matches the variant name exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, StrumDisplay, EnumString, IntoStaticStr)]
pub enum ErrorKind {
    WrongNumArguments,
    ArgumentType,
    NamedArgumentType,
    IndexType,
    IndexValueType,
    IndexOutOfBounds,
    InvalidIndex,
    NotIterable,
    NotIndexable,
    NotIndexAssignable,
    NotIndexDeletable,
    NotCallable,
    NotImplemented,
    ZeroDivision,
    InvalidOperator,
    UnexpectedNamedArg,
    UnexpectedArgValue,
    IncompatibleCast,
    MethodDuplication,
    MethodNotAppendable,
    Type,
    NotInitializable,
    NotWriteable,
    SymbolLimit,
    StackOverflow,
    VmAborted,
    /// Catch-all for errors raised by `throw` with a non-error operand and
    /// for user-constructed errors without an explicit name.
    Error,
}

/// A runtime error: a stable name, a message, and (for thrown error values)
/// the original value so `catch` can rebind it.
#[derive(Debug, Clone)]
pub struct RunError {
    name: Cow<'static, str>,
    message: String,
    /// The originally thrown error value, when the error came from `throw`.
    /// `None` for errors raised by the runtime itself; the VM materialises a
    /// fresh error value at the catch site in that case.
    pub(crate) value: Option<Value>,
}

impl RunError {
    /// Creates an error of the given kind with a message.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            name: Cow::Borrowed(kind.into()),
            message: message.into(),
            value: None,
        }
    }

    /// Creates an error with a custom name (used for user-defined errors).
    pub(crate) fn named(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: Cow::Owned(name.into()),
            message: message.into(),
            value: None,
        }
    }

    /// Attaches the originally thrown error value.
    pub(crate) fn with_value(mut self, value: Value) -> Self {
        self.value = Some(value);
        self
    }

    /// The stable error name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The human-readable message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Name-based matching in the manner of error chains: true when the
    /// error's name equals the target kind's name.
    #[must_use]
    pub fn is(&self, kind: ErrorKind) -> bool {
        self.name == <&'static str>::from(kind)
    }

    // Constructors for the common kinds, so call sites stay terse.

    pub(crate) fn wrong_num_args(want: impl Display, got: usize) -> Self {
        Self::new(ErrorKind::WrongNumArguments, format!("want={want} got={got}"))
    }

    pub(crate) fn argument_type(pos: usize, expected: &str, got: &str) -> Self {
        Self::new(
            ErrorKind::ArgumentType,
            format!("argument {pos}: expected {expected}, found {got}"),
        )
    }

    pub(crate) fn named_argument_type(name: &str, expected: &str, got: &str) -> Self {
        Self::new(
            ErrorKind::NamedArgumentType,
            format!("named argument {name}: expected {expected}, found {got}"),
        )
    }

    pub(crate) fn index_out_of_bounds(index: impl Display, len: usize) -> Self {
        Self::new(ErrorKind::IndexOutOfBounds, format!("index {index} out of bounds (len {len})"))
    }

    pub(crate) fn not_iterable(type_name: &str) -> Self {
        Self::new(ErrorKind::NotIterable, format!("'{type_name}' is not iterable"))
    }

    pub(crate) fn not_indexable(type_name: &str) -> Self {
        Self::new(ErrorKind::NotIndexable, format!("'{type_name}' is not indexable"))
    }

    pub(crate) fn not_index_assignable(type_name: &str) -> Self {
        Self::new(
            ErrorKind::NotIndexAssignable,
            format!("'{type_name}' is not index-assignable"),
        )
    }

    pub(crate) fn not_callable(type_name: &str) -> Self {
        Self::new(ErrorKind::NotCallable, format!("'{type_name}' is not callable"))
    }

    pub(crate) fn zero_division() -> Self {
        Self::new(ErrorKind::ZeroDivision, "division by zero")
    }

    /// Operator-not-supported carries the operator token and both type names.
    pub(crate) fn invalid_operator(tok: impl Display, left: &str, right: &str) -> Self {
        Self::new(
            ErrorKind::InvalidOperator,
            format!("operator '{tok}' not supported between '{left}' and '{right}'"),
        )
    }

    pub(crate) fn invalid_unary_operator(tok: impl Display, operand: &str) -> Self {
        Self::new(
            ErrorKind::InvalidOperator,
            format!("unary operator '{tok}' not supported on '{operand}'"),
        )
    }

    pub(crate) fn unexpected_named_arg(name: &str) -> Self {
        Self::new(ErrorKind::UnexpectedNamedArg, format!("unexpected named argument '{name}'"))
    }

    pub(crate) fn aborted() -> Self {
        Self::new(ErrorKind::VmAborted, "execution aborted")
    }

    pub(crate) fn stack_overflow() -> Self {
        Self::new(ErrorKind::StackOverflow, "stack overflow")
    }
}

impl Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.message)
    }
}

impl std::error::Error for RunError {}

/// Source position, 1-based line and column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub struct Pos {
    pub line: u32,
    pub column: u32,
}

impl Pos {
    #[must_use]
    pub fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

impl Display for Pos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// A compile-time error: the source position of the offending node and a
/// human-readable reason.
#[derive(Debug, Clone)]
pub struct CompileError {
    pub pos: Pos,
    pub message: String,
}

impl CompileError {
    pub(crate) fn new(pos: Pos, message: impl Into<String>) -> Self {
        Self {
            pos,
            message: message.into(),
        }
    }
}

impl Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "compile error at {}: {}", self.pos, self.message)
    }
}

impl std::error::Error for CompileError {}

/// Either phase's error, for compile-and-run conveniences.
#[derive(Debug, Clone)]
pub enum Error {
    Compile(CompileError),
    Run(RunError),
}

impl From<CompileError> for Error {
    fn from(err: CompileError) -> Self {
        Self::Compile(err)
    }
}

impl From<RunError> for Error {
    fn from(err: RunError) -> Self {
        Self::Run(err)
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Compile(err) => err.fmt(f),
            Self::Run(err) => err.fmt(f),
        }
    }
}

impl std::error::Error for Error {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RunError::new(ErrorKind::ZeroDivision, "division by zero");
        assert_eq!(err.to_string(), "ZeroDivision: division by zero");
    }

    #[test]
    fn test_is_matches_by_name() {
        let err = RunError::wrong_num_args(2, 3);
        assert!(err.is(ErrorKind::WrongNumArguments));
        assert!(!err.is(ErrorKind::Type));
    }

    #[test]
    fn test_invalid_operator_carries_token_and_types() {
        let err = RunError::invalid_operator("+", "int", "dict");
        assert!(err.message().contains('+'));
        assert!(err.message().contains("int"));
        assert!(err.message().contains("dict"));
    }
}
