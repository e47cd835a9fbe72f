//! Compiled-program representation: constants, functions and the bytecode
//! object produced by the compiler and consumed by a VM.
//!
//! Bytecode serializes with serde so hosts can snapshot compiled programs;
//! bit-exact persistence across versions is not promised.

pub(crate) mod builder;
pub(crate) mod op;

use std::fmt::Write as _;

use crate::{
    intern::{Interns, StringId},
    types::Decimal,
};
pub(crate) use op::{Opcode, call_flags};

/// Index of a compiled function within its bytecode object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub(crate) struct FuncId(u32);

impl FuncId {
    pub(crate) fn new(index: usize) -> Self {
        Self(u32::try_from(index).expect("function table exceeds u32 range"))
    }

    #[inline]
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// A constant pool entry.
///
/// Structured variants (`Bytes`, `Array`, `Dict`) exist for value modules
/// supplied by an importer; literal collections compile to build opcodes
/// instead.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub(crate) enum Constant {
    Nil,
    Bool(bool),
    Int(i64),
    Uint(u64),
    Float(f64),
    Char(char),
    Str(StringId),
    RawStr(StringId),
    Decimal(Decimal),
    Func(FuncId),
    Bytes(Vec<u8>),
    Array(Vec<Constant>),
    Dict(Vec<(String, Constant)>),
}

/// Positional parameter metadata: ordered names with optional type
/// annotations; the variadic flag covers the last name.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub(crate) struct Params {
    pub names: Vec<StringId>,
    /// Accepted type names per parameter; empty means untyped.
    pub types: Vec<Vec<StringId>>,
    pub var: bool,
}

impl Params {
    /// Number of required positional parameters.
    #[must_use]
    pub fn required(&self) -> usize {
        if self.var { self.names.len() - 1 } else { self.names.len() }
    }
}

/// Named parameter metadata. Defaults and type checks are compiled into the
/// function body's prelude; the descriptor records names and the variadic
/// slot.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub(crate) struct NamedParams {
    pub names: Vec<StringId>,
    pub var: bool,
}

/// A compiled function.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub(crate) struct CompiledFunction {
    pub name: StringId,
    pub instructions: Vec<u8>,
    pub num_locals: u16,
    pub params: Params,
    pub named_params: NamedParams,
    /// Whether methods may be attached to this function by name collision.
    pub allow_methods: bool,
    /// For source modules: the module-cache slot this function initialises.
    pub module_slot: Option<u16>,
}

/// The output of a compilation: functions, constants and the intern table.
#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct Bytecode {
    pub(crate) constants: Vec<Constant>,
    pub(crate) functions: Vec<CompiledFunction>,
    pub(crate) main: FuncId,
    pub(crate) num_module_slots: u16,
    pub(crate) interns: Interns,
}

impl Bytecode {
    pub(crate) fn func(&self, id: FuncId) -> &CompiledFunction {
        &self.functions[id.index()]
    }

    /// Human-readable listing of one function's instructions.
    #[must_use]
    pub fn disassemble(&self) -> String {
        let mut out = String::new();
        for (i, func) in self.functions.iter().enumerate() {
            let _ = writeln!(out, "func #{i} {}:", self.interns.get(func.name));
            let code = &func.instructions;
            let mut ip = 0;
            while ip < code.len() {
                let Some(op) = Opcode::from_repr(code[ip]) else {
                    let _ = writeln!(out, "  {ip:04}  <bad opcode {}>", code[ip]);
                    break;
                };
                let _ = write!(out, "  {ip:04}  {op}");
                ip += 1;
                for _ in 0..op.operand_count() {
                    let operand = u16::from_le_bytes([code[ip], code[ip + 1]]);
                    let _ = write!(out, " {operand}");
                    ip += 2;
                }
                let _ = writeln!(out);
            }
        }
        out
    }
}
