//! Builder for emitting one function's bytecode during compilation.
//!
//! Handles opcode/operand encoding and forward jumps with patching. Jump
//! operands are absolute offsets, so back-patching writes the final target
//! directly.

use crate::{
    bytecode::op::Opcode,
    error::{CompileError, Pos},
};

/// Label for a forward jump operand that needs patching: the byte offset of
/// the operand within the instruction stream.
#[derive(Debug, Clone, Copy)]
pub(crate) struct JumpLabel(usize);

/// Builder for a single function's instruction stream.
#[derive(Debug, Default)]
pub(crate) struct FuncBuilder {
    code: Vec<u8>,
}

impl FuncBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current offset as a jump target, failing when the function has grown
    /// past the 16-bit operand range.
    pub fn target(&self, pos: Pos) -> Result<u16, CompileError> {
        u16::try_from(self.code.len()).map_err(|_| CompileError::new(pos, "function too large"))
    }

    pub fn emit0(&mut self, op: Opcode) {
        debug_assert_eq!(op.operand_count(), 0);
        self.code.push(op as u8);
    }

    pub fn emit1(&mut self, op: Opcode, operand: u16) {
        debug_assert_eq!(op.operand_count(), 1);
        self.code.push(op as u8);
        self.code.extend_from_slice(&operand.to_le_bytes());
    }

    pub fn emit2(&mut self, op: Opcode, a: u16, b: u16) {
        debug_assert_eq!(op.operand_count(), 2);
        self.code.push(op as u8);
        self.code.extend_from_slice(&a.to_le_bytes());
        self.code.extend_from_slice(&b.to_le_bytes());
    }

    /// Emits a one-operand jump with a placeholder target.
    #[must_use]
    pub fn emit_jump(&mut self, op: Opcode) -> JumpLabel {
        debug_assert_eq!(op.operand_count(), 1);
        self.code.push(op as u8);
        let label = JumpLabel(self.code.len());
        self.code.extend_from_slice(&0u16.to_le_bytes());
        label
    }

    /// Emits a two-operand instruction with placeholder operands, returning
    /// a label per operand.
    #[must_use]
    pub fn emit_jump2(&mut self, op: Opcode) -> (JumpLabel, JumpLabel) {
        debug_assert_eq!(op.operand_count(), 2);
        self.code.push(op as u8);
        let first = JumpLabel(self.code.len());
        self.code.extend_from_slice(&0u16.to_le_bytes());
        let second = JumpLabel(self.code.len());
        self.code.extend_from_slice(&0u16.to_le_bytes());
        (first, second)
    }

    /// Patches a jump operand to the current offset.
    pub fn patch_here(&mut self, label: JumpLabel, pos: Pos) -> Result<(), CompileError> {
        let target = self.target(pos)?;
        self.patch_to(label, target);
        Ok(())
    }

    /// Patches a jump operand to an explicit target.
    pub fn patch_to(&mut self, label: JumpLabel, target: u16) {
        let bytes = target.to_le_bytes();
        self.code[label.0] = bytes[0];
        self.code[label.0 + 1] = bytes[1];
    }

    /// Consumes the builder, returning the instruction stream.
    pub fn finish(self) -> Vec<u8> {
        self.code
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_encoding() {
        let mut b = FuncBuilder::new();
        b.emit0(Opcode::Nil);
        b.emit1(Opcode::Constant, 0x1234);
        b.emit2(Opcode::SetupTry, 1, 2);
        assert_eq!(
            b.finish(),
            vec![
                Opcode::Nil as u8,
                Opcode::Constant as u8,
                0x34,
                0x12,
                Opcode::SetupTry as u8,
                1,
                0,
                2,
                0,
            ]
        );
    }

    #[test]
    fn test_forward_jump_patch() {
        let mut b = FuncBuilder::new();
        let jump = b.emit_jump(Opcode::Jump);
        b.emit0(Opcode::Nil);
        b.emit0(Opcode::Pop);
        b.patch_here(jump, Pos::default()).unwrap();
        b.emit0(Opcode::Nil);
        // Jump target is offset 5: 3 bytes of jump + 2 single-byte opcodes.
        assert_eq!(
            b.finish(),
            vec![Opcode::Jump as u8, 5, 0, Opcode::Nil as u8, Opcode::Pop as u8, Opcode::Nil as u8]
        );
    }

    #[test]
    fn test_two_operand_patching() {
        let mut b = FuncBuilder::new();
        let (catch, finally) = b.emit_jump2(Opcode::SetupTry);
        b.emit0(Opcode::Nil);
        b.patch_to(catch, 100);
        b.patch_to(finally, 200);
        let code = b.finish();
        assert_eq!(u16::from_le_bytes([code[1], code[2]]), 100);
        assert_eq!(u16::from_le_bytes([code[3], code[4]]), 200);
    }
}
