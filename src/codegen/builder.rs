//! Emits one function's bytecode, mirroring the teacher's
//! `bytecode::builder::CodeBuilder`: raw byte emission plus forward-jump
//! labels that get patched once their target offset is known.
//!
//! Unlike the teacher's single-pass structured-control-flow compiler (which
//! patches a jump as soon as the enclosing `if`/`while` block ends), this
//! builder can walk an arbitrary reducible CFG with back-edges, so forward
//! jumps are recorded and patched in one batch after the whole function has
//! been emitted rather than at each block boundary.

use super::link::LinkItemId;
use super::opcode::Opcode;
use crate::ir::BlockId;

#[derive(Debug, Clone, Copy)]
pub struct JumpLabel(usize);

#[derive(Debug, Default)]
pub struct CodeBuilder {
    bytecode: Vec<u8>,
    /// `(bytecode offset of the operand, link item)` pairs for the
    /// (out-of-scope) linker to fix up, per §3.4/§6.
    fixups: Vec<(u32, LinkItemId)>,
    pending: Vec<(JumpLabel, BlockId)>,
}

impl CodeBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn offset(&self) -> usize {
        self.bytecode.len()
    }

    /// Emits `op` followed by `operands`, each as a little-endian `u16`.
    /// Every fixed-arity instruction in this set takes only local-slot or
    /// small-integer operands, so one variadic writer covers all of them.
    pub fn emit(&mut self, op: Opcode, operands: &[u16]) {
        self.bytecode.push(op as u8);
        for o in operands {
            self.bytecode.extend_from_slice(&o.to_le_bytes());
        }
    }

    pub fn emit_i64(&mut self, op: Opcode, dst: u16, value: i64) {
        self.bytecode.push(op as u8);
        self.bytecode.extend_from_slice(&dst.to_le_bytes());
        self.bytecode.extend_from_slice(&value.to_le_bytes());
    }

    pub fn emit_f64(&mut self, op: Opcode, dst: u16, value: f64) {
        self.bytecode.push(op as u8);
        self.bytecode.extend_from_slice(&dst.to_le_bytes());
        self.bytecode.extend_from_slice(&value.to_le_bytes());
    }

    /// Emits `op` followed by `operands`, then a reference to `link_id`,
    /// recording a fix-up entry at the reference's byte offset so the
    /// (out-of-scope) linker can resolve it.
    pub fn emit_link_ref(&mut self, op: Opcode, operands: &[u16], link_id: LinkItemId) {
        self.bytecode.push(op as u8);
        for o in operands {
            self.bytecode.extend_from_slice(&o.to_le_bytes());
        }
        self.fixups.push((u32::try_from(self.bytecode.len()).expect("bytecode offset fits u32"), link_id));
        let raw = u16::try_from(link_id.index()).expect("link table fits u16");
        self.bytecode.extend_from_slice(&raw.to_le_bytes());
    }

    /// Emits an unconditional or conditional jump to `target`. If `target`'s
    /// offset is already known (a backward edge), the offset is written
    /// immediately; otherwise a placeholder is written and patched once
    /// every block in the function has been emitted.
    pub fn emit_jump(&mut self, op: Opcode, value: Option<u16>, target: BlockId, known_offsets: &[Option<usize>]) {
        self.bytecode.push(op as u8);
        if let Some(v) = value {
            self.bytecode.extend_from_slice(&v.to_le_bytes());
        }
        if let Some(target_offset) = known_offsets[target.index()] {
            let raw = target_offset as i64 - (self.bytecode.len() as i64 + 4);
            let offset = i32::try_from(raw).expect("jump offset exceeds i32 range; function too large");
            self.bytecode.extend_from_slice(&offset.to_le_bytes());
        } else {
            let label = JumpLabel(self.bytecode.len());
            self.bytecode.extend_from_slice(&0i32.to_le_bytes());
            self.pending.push((label, target));
        }
    }

    /// Patches every jump recorded against a block whose offset is now
    /// known. Call once after the whole function body has been emitted.
    pub fn patch_pending(&mut self, block_offsets: &[Option<usize>]) {
        for (label, target) in std::mem::take(&mut self.pending) {
            let target_offset = block_offsets[target.index()].expect("every reachable block was emitted");
            let raw = target_offset as i64 - (label.0 as i64 + 4);
            let offset = i32::try_from(raw).expect("jump offset exceeds i32 range; function too large");
            self.bytecode[label.0..label.0 + 4].copy_from_slice(&offset.to_le_bytes());
        }
    }

    pub fn into_parts(self) -> (Vec<u8>, Vec<(u32, LinkItemId)>) {
        (self.bytecode, self.fixups)
    }
}
