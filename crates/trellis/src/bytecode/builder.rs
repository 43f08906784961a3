//! Builder for emitting template bytecode.
//!
//! `CodeBuilder` helps emit opcodes plus operand words, with support for
//! forward jumps (emit now, patch the target later) and backward jumps.
//! Offsets are relative to the buffer start, so a finished buffer can be
//! appended at any heap position as long as absolute references such as
//! block starts are rebased (see [`CodeBuilder::block_starts`]).

use super::op::Opcode;

/// Label for a forward jump that needs patching.
///
/// Stores the offset of the jump's operand word. Pass this to
/// [`CodeBuilder::patch_jump`] once the target location is known.
#[derive(Debug, Clone, Copy)]
#[must_use]
pub struct JumpLabel(usize);

#[derive(Debug, Default)]
pub struct CodeBuilder {
    code: Vec<u32>,
    /// Buffer-relative start of every inner block emitted into this buffer.
    block_starts: Vec<usize>,
}

impl CodeBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Emits an opcode with its operands.
    ///
    /// The operand count must match [`Opcode::operand_count`]; a mismatch is a
    /// compiler defect and is caught in debug builds.
    pub fn emit(&mut self, op: Opcode, operands: &[u32]) {
        debug_assert_eq!(operands.len(), op.operand_count(), "operand count mismatch for {op}");
        self.code.push(op as u32);
        self.code.extend_from_slice(operands);
    }

    /// Emits a jump with a placeholder offset, to be patched later.
    pub fn emit_jump(&mut self, op: Opcode) -> JumpLabel {
        debug_assert!(op.is_jump(), "{op} is not a jump");
        self.code.push(op as u32);
        let label = JumpLabel(self.code.len());
        self.code.push(0);
        label
    }

    /// Points a forward jump at the current position.
    pub fn patch_jump(&mut self, label: JumpLabel) {
        let target = self.code.len();
        self.code[label.0] = relative(label.0 + 1, target);
    }

    /// Emits a jump to an already known position.
    pub fn emit_jump_to(&mut self, op: Opcode, target: usize) {
        debug_assert!(op.is_jump(), "{op} is not a jump");
        self.code.push(op as u32);
        let operand_at = self.code.len();
        self.code.push(relative(operand_at + 1, target));
    }

    #[must_use]
    pub fn current_offset(&self) -> usize {
        self.code.len()
    }

    /// Records that an inner block starts at the current offset.
    pub fn mark_block_start(&mut self) -> usize {
        let start = self.code.len();
        self.block_starts.push(start);
        start
    }

    #[must_use]
    pub fn block_starts(&self) -> &[usize] {
        &self.block_starts
    }

    #[must_use]
    pub fn build(self) -> Vec<u32> {
        self.code
    }
}

/// Offset from `from` (the next instruction) to `to`, stored as an `i32` bit pattern.
fn relative(from: usize, to: usize) -> u32 {
    let from = i64::try_from(from).unwrap_or(i64::MAX);
    let to = i64::try_from(to).unwrap_or(i64::MAX);
    let offset = i32::try_from(to - from).unwrap_or(i32::MAX);
    offset.cast_unsigned()
}

/// Decodes a jump operand into the absolute target, given the offset of the
/// instruction following the jump.
#[inline]
#[must_use]
pub fn jump_target(next_ip: usize, operand: u32) -> Option<usize> {
    let offset = i64::from(operand.cast_signed());
    let target = i64::try_from(next_ip).ok()? + offset;
    usize::try_from(target).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_with_operands() {
        let mut builder = CodeBuilder::new();
        builder.emit(Opcode::StaticAttr, &[3, 4]);
        builder.emit(Opcode::CloseElement, &[]);
        assert_eq!(
            builder.build(),
            vec![Opcode::StaticAttr as u32, 3, 4, Opcode::CloseElement as u32]
        );
    }

    #[test]
    fn test_forward_jump() {
        let mut builder = CodeBuilder::new();
        let jump = builder.emit_jump(Opcode::JumpUnless);
        builder.emit(Opcode::Text, &[0]); // 2 words, skipped by jump
        builder.patch_jump(jump);
        builder.emit(Opcode::Return, &[]);

        let code = builder.build();
        // operand at 1, next instruction at 2, target at 4
        assert_eq!(code[1], 2);
        assert_eq!(jump_target(2, code[1]), Some(4));
    }

    #[test]
    fn test_backward_jump() {
        let mut builder = CodeBuilder::new();
        let loop_start = builder.current_offset();
        builder.emit(Opcode::Text, &[0]);
        builder.emit_jump_to(Opcode::Jump, loop_start);

        let code = builder.build();
        // jump at 2, next instruction at 4, target 0
        assert_eq!(code[3], (-4i32).cast_unsigned());
        assert_eq!(jump_target(4, code[3]), Some(0));
    }

    #[test]
    fn test_block_starts_are_buffer_relative() {
        let mut builder = CodeBuilder::new();
        builder.emit(Opcode::Return, &[]);
        assert_eq!(builder.mark_block_start(), 1);
        builder.emit(Opcode::Return, &[]);
        assert_eq!(builder.block_starts(), &[1]);
    }
}
