//! Operator tokens shared by the parser, compiler and VM.
//!
//! Binary and unary operators are encoded into bytecode as the `#[repr(u8)]`
//! discriminant of these enums, so the VM can reconstruct the token from an
//! operand without a lookup table.

use strum::{Display, FromRepr, IntoStaticStr};

/// Binary operator tokens.
///
/// `==`, `!=` and the nil checks have dedicated opcodes and are not listed
/// here. The string representation is the surface syntax, which is what
/// invalid-operator errors print.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, FromRepr, IntoStaticStr, serde::Serialize, serde::Deserialize)]
pub enum BinOp {
    #[strum(serialize = "+")]
    Add,
    #[strum(serialize = "-")]
    Sub,
    #[strum(serialize = "*")]
    Mul,
    #[strum(serialize = "/")]
    Div,
    #[strum(serialize = "%")]
    Rem,
    #[strum(serialize = "&")]
    BitAnd,
    #[strum(serialize = "|")]
    BitOr,
    #[strum(serialize = "^")]
    BitXor,
    #[strum(serialize = "<<")]
    Shl,
    #[strum(serialize = ">>")]
    Shr,
    #[strum(serialize = "<")]
    Less,
    #[strum(serialize = "<=")]
    LessEq,
    #[strum(serialize = ">")]
    Greater,
    #[strum(serialize = ">=")]
    GreaterEq,
    /// Regex match: `pattern ~ text` is true when the pattern matches.
    #[strum(serialize = "~")]
    Match,
    /// Regex find: `pattern ~~ text` returns the first match or nil.
    #[strum(serialize = "~~")]
    Find,
    /// Regex find-all: `pattern ~~~ text` returns every match.
    #[strum(serialize = "~~~")]
    FindAll,
}

/// Unary operator tokens.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, FromRepr, IntoStaticStr, serde::Serialize, serde::Deserialize)]
pub enum UnaryOp {
    #[strum(serialize = "-")]
    Neg,
    #[strum(serialize = "+")]
    Pos,
    #[strum(serialize = "!")]
    Not,
    #[strum(serialize = "^")]
    BitNot,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binop_roundtrip() {
        for op in [BinOp::Add, BinOp::Shl, BinOp::FindAll] {
            assert_eq!(BinOp::from_repr(op as u8), Some(op));
        }
    }

    #[test]
    fn test_display_is_surface_syntax() {
        assert_eq!(BinOp::Add.to_string(), "+");
        assert_eq!(BinOp::Shr.to_string(), ">>");
        assert_eq!(UnaryOp::BitNot.to_string(), "^");
    }
}
