//! Variable-length bytecode buffer
//!
//! `BytecodeTable` owns the raw instruction bytes of one function. It is the
//! emit target of the (external) compiler, the read surface of the
//! interpreter, and the input of the disassembler. All multi-byte operands
//! are little-endian.

use serde::{Deserialize, Serialize};

use crate::opcode::{Opcode, OperandWidth};
use crate::operand::{ConstIndex, Pc, VarIndex};

/// A growable byte buffer holding encoded instructions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BytecodeTable {
    bytes: Vec<u8>,
}

impl BytecodeTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current size in bytes (also the PC of the next emitted instruction).
    #[inline]
    pub fn len(&self) -> Pc {
        self.bytes.len() as Pc
    }

    /// True when nothing has been emitted yet.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Raw byte view.
    #[inline]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    // ==================== Reads ====================

    /// Decode the opcode at `pc`.
    ///
    /// # Panics
    /// Panics on an out-of-range `pc` or an unknown byte; both indicate a
    /// corrupted emit stream and are not recoverable at dispatch time.
    #[inline]
    pub fn opcode(&self, pc: Pc) -> Opcode {
        let byte = self.bytes[pc as usize];
        Opcode::from_byte(byte)
            .unwrap_or_else(|| panic!("invalid opcode byte {byte:#04x} at pc {pc}"))
    }

    /// Read a `u8` operand.
    #[inline]
    pub fn get_u8(&self, pc: Pc) -> u8 {
        self.bytes[pc as usize]
    }

    /// Read an `i8` operand.
    #[inline]
    pub fn get_i8(&self, pc: Pc) -> i8 {
        self.bytes[pc as usize] as i8
    }

    /// Read a little-endian `u16` operand.
    #[inline]
    pub fn get_u16(&self, pc: Pc) -> u16 {
        let i = pc as usize;
        u16::from_le_bytes([self.bytes[i], self.bytes[i + 1]])
    }

    /// Read a little-endian `i16` operand.
    #[inline]
    pub fn get_i16(&self, pc: Pc) -> i16 {
        self.get_u16(pc) as i16
    }

    /// Read a little-endian `u32` operand.
    #[inline]
    pub fn get_u32(&self, pc: Pc) -> u32 {
        let i = pc as usize;
        u32::from_le_bytes([
            self.bytes[i],
            self.bytes[i + 1],
            self.bytes[i + 2],
            self.bytes[i + 3],
        ])
    }

    /// Read a little-endian `i32` operand.
    #[inline]
    pub fn get_i32(&self, pc: Pc) -> i32 {
        self.get_u32(pc) as i32
    }

    /// Read a const-index operand (`u32` bit-cast).
    #[inline]
    pub fn get_const_index(&self, pc: Pc) -> ConstIndex {
        ConstIndex::from_wire(self.get_u32(pc))
    }

    // ==================== Emits ====================

    /// Append an opcode byte.
    pub fn emit_opcode(&mut self, opcode: Opcode) {
        self.bytes.push(opcode.to_byte());
    }

    /// Append a `u8`.
    pub fn emit_u8(&mut self, val: u8) {
        self.bytes.push(val);
    }

    /// Append an `i8`.
    pub fn emit_i8(&mut self, val: i8) {
        self.bytes.push(val as u8);
    }

    /// Append a little-endian `u16`.
    pub fn emit_u16(&mut self, val: u16) {
        self.bytes.extend_from_slice(&val.to_le_bytes());
    }

    /// Append a little-endian `i16`.
    pub fn emit_i16(&mut self, val: i16) {
        self.emit_u16(val as u16);
    }

    /// Append a little-endian `u32`.
    pub fn emit_u32(&mut self, val: u32) {
        self.bytes.extend_from_slice(&val.to_le_bytes());
    }

    /// Append a little-endian `i32`.
    pub fn emit_i32(&mut self, val: i32) {
        self.emit_u32(val as u32);
    }

    /// Emit the narrowest constant-load encoding for `idx`.
    ///
    /// Indices 0..=5 use the dedicated one-byte forms, small non-negative
    /// indices the `u8`/`u16` forms; everything else (including all local,
    /// negative indices) falls back to the 32-bit form whose bit-cast
    /// preserves the sign.
    pub fn emit_const_load(&mut self, idx: ConstIndex) {
        let v = idx.value();
        if (0..=5).contains(&v) {
            self.bytes
                .push(Opcode::CLoad0.to_byte() + v as u8);
        } else if (0..=0xff).contains(&v) {
            self.emit_opcode(Opcode::CLoad);
            self.emit_u8(v as u8);
        } else if (0..=0xffff).contains(&v) {
            self.emit_opcode(Opcode::CLoadW);
            self.emit_u16(v as u16);
        } else {
            self.emit_opcode(Opcode::CLoadD);
            self.emit_u32(idx.to_wire());
        }
    }

    /// Emit the narrowest variable-load encoding for `idx`.
    pub fn emit_var_load(&mut self, idx: VarIndex) {
        if idx <= 3 {
            self.bytes.push(Opcode::VLoad0.to_byte() + idx as u8);
        } else {
            debug_assert!(idx <= 0xff, "variable index exceeds one-byte encoding");
            self.emit_opcode(Opcode::VLoad);
            self.emit_u8(idx as u8);
        }
    }

    /// Emit the narrowest variable-store encoding for `idx`.
    pub fn emit_var_store(&mut self, idx: VarIndex) {
        if idx <= 3 {
            self.bytes.push(Opcode::VStore0.to_byte() + idx as u8);
        } else {
            debug_assert!(idx <= 0xff, "variable index exceeds one-byte encoding");
            self.emit_opcode(Opcode::VStore);
            self.emit_u8(idx as u8);
        }
    }

    /// Emit a property load with its interned key.
    pub fn emit_property_load(&mut self, key: ConstIndex) {
        self.emit_opcode(Opcode::PropertyLoad);
        self.emit_u32(key.to_wire());
    }

    /// Emit a property store with its interned key.
    pub fn emit_property_store(&mut self, key: ConstIndex) {
        self.emit_opcode(Opcode::PropertyStore);
        self.emit_u32(key.to_wire());
    }

    /// Emit a closure instruction for the function def at `idx`.
    pub fn emit_closure(&mut self, idx: ConstIndex) {
        self.emit_opcode(Opcode::Closure);
        self.emit_u32(idx.to_wire());
    }

    /// Emit a jump opcode with a placeholder offset.
    ///
    /// Returns the PC of the offset operand, to be resolved later with
    /// [`patch_jump`](Self::patch_jump).
    pub fn emit_jump(&mut self, opcode: Opcode) -> Pc {
        debug_assert!(opcode.is_jump());
        self.emit_opcode(opcode);
        let operand_pc = self.len();
        self.emit_i16(0);
        operand_pc
    }

    /// Resolve a previously emitted jump so it lands on `target`.
    ///
    /// Offsets are relative to the PC of the instruction following the jump
    /// (`operand_pc + 2`), so an offset of zero falls through.
    pub fn patch_jump(&mut self, operand_pc: Pc, target: Pc) {
        let base = operand_pc + 2;
        let delta = target as i64 - base as i64;
        assert!(
            (i16::MIN as i64..=i16::MAX as i64).contains(&delta),
            "jump distance {delta} exceeds i16 range"
        );
        let bytes = (delta as i16).to_le_bytes();
        self.bytes[operand_pc as usize] = bytes[0];
        self.bytes[operand_pc as usize + 1] = bytes[1];
    }

    /// Overwrite the opcode byte at `opcode_pc`.
    pub fn repair_opcode(&mut self, opcode_pc: Pc, opcode: Opcode) {
        self.bytes[opcode_pc as usize] = opcode.to_byte();
    }

    /// Compute the target of the jump whose offset operand sits at
    /// `operand_pc`.
    #[inline]
    pub fn jump_target(&self, operand_pc: Pc) -> Pc {
        let base = (operand_pc + 2) as i64;
        (base + self.get_i16(operand_pc) as i64) as Pc
    }

    // ==================== Disassembly ====================

    /// Disassemble the instruction at `*pc`, advancing `*pc` past it.
    ///
    /// Output format: `pppp<TAB>mnemonic<TAB>operand...`.
    pub fn disassemble_one(&self, pc: &mut Pc) -> String {
        let at = *pc;
        let opcode = self.opcode(at);
        *pc += 1;
        let mut line = format!("{at:04}\t{}", opcode.name());
        for width in opcode.operands() {
            match width {
                OperandWidth::B1 => {
                    line.push_str(&format!("\t{}", self.get_u8(*pc)));
                    *pc += 1;
                }
                OperandWidth::B2 => {
                    if opcode.is_jump() {
                        let offset = self.get_i16(*pc);
                        line.push_str(&format!("\t{offset} -> {}", self.jump_target(*pc)));
                    } else {
                        line.push_str(&format!("\t{}", self.get_u16(*pc)));
                    }
                    *pc += 2;
                }
                OperandWidth::B4 => {
                    line.push_str(&format!("\t{}", self.get_const_index(*pc)));
                    *pc += 4;
                }
            }
        }
        line
    }

    /// Disassemble the whole table, one instruction per line.
    pub fn disassemble(&self) -> String {
        let mut out = String::new();
        let mut pc: Pc = 0;
        while pc < self.len() {
            out.push_str(&self.disassemble_one(&mut pc));
            out.push('\n');
        }
        out
    }
}
