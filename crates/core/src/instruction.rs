//! Decoded instructions and their operands
//!
//! An [`Instruction`] is produced once per code address and then shared
//! out of the instruction cache as `Rc<Instruction>`; nothing in it changes
//! after decode. Memory operands keep their addressing form ([`MemRef`]) and
//! resolve the offset against the live registers every time they execute.

use crate::bus::Memory;
use crate::cpu::Cpu386;
use crate::mnemonic::Mnemonic;
use crate::registers::{width_mask, RegId, Registers, Seg};
use std::fmt::Write;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RepeatPrefix {
    #[default]
    None,
    /// F3: REP, or REPE/REPZ for CMPS and SCAS
    Rep,
    /// F2: REPNE/REPNZ
    Repne,
}

/// Memory addressing form: `segment:[base + index + disp]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemRef {
    pub segment: Seg,
    pub base: Option<RegId>,
    pub index: Option<RegId>,
    /// Displacement, sign-extended to the address size
    pub disp: u32,
    /// 2 or 4
    pub address_size: u8,
}

impl MemRef {
    pub fn offset(&self, regs: &Registers) -> u32 {
        let base = self.base.map_or(0, |r| regs.read(r));
        let index = self.index.map_or(0, |r| regs.read(r));
        base.wrapping_add(index).wrapping_add(self.disp) & width_mask(self.address_size)
    }

    /// Segment implied by the base register when no override is present
    pub fn default_segment(&self) -> Seg {
        match self.base {
            Some(RegId::BP | RegId::EBP | RegId::ESP | RegId::SP) => Seg::SS,
            _ => Seg::DS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandKind {
    None,
    Register(RegId),
    Memory(MemRef),
    Immediate(u32),
    /// Signed displacement from the end of the instruction
    Relative(i32),
    FarPointer { segment: u16, offset: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Operand {
    pub kind: OperandKind,
    /// Width in bytes (6 for a 48-bit pseudo-descriptor, 4 for a 16:16 pointer)
    pub size: u8,
    pub is_pointer: bool,
}

impl Operand {
    pub const NONE: Operand = Operand {
        kind: OperandKind::None,
        size: 0,
        is_pointer: false,
    };

    pub const fn register(id: RegId, size: u8) -> Self {
        Self {
            kind: OperandKind::Register(id),
            size,
            is_pointer: false,
        }
    }

    pub const fn memory(mem: MemRef, size: u8) -> Self {
        Self {
            kind: OperandKind::Memory(mem),
            size,
            is_pointer: true,
        }
    }

    pub const fn immediate(value: u32, size: u8) -> Self {
        Self {
            kind: OperandKind::Immediate(value),
            size,
            is_pointer: false,
        }
    }

    pub fn is_memory(&self) -> bool {
        matches!(self.kind, OperandKind::Memory(_))
    }

    pub fn reg(&self) -> Option<RegId> {
        match self.kind {
            OperandKind::Register(id) => Some(id),
            _ => None,
        }
    }

    pub fn read<M: Memory>(&self, cpu: &Cpu386<M>) -> u32 {
        match self.kind {
            OperandKind::Register(id) => cpu.regs.read(id),
            OperandKind::Memory(mem) => {
                cpu.read_segment(mem.segment, mem.offset(&cpu.regs), self.size.min(4))
            }
            OperandKind::Immediate(value) => value,
            OperandKind::Relative(rel) => rel as u32,
            OperandKind::FarPointer { offset, .. } => offset,
            OperandKind::None => 0,
        }
    }

    /// Store `value` masked to the operand width; immediates ignore writes
    pub fn write<M: Memory>(&self, cpu: &mut Cpu386<M>, value: u32) {
        match self.kind {
            OperandKind::Register(id) => cpu.regs.write(id, value),
            OperandKind::Memory(mem) => {
                let offset = mem.offset(&cpu.regs);
                cpu.write_segment(mem.segment, offset, self.size.min(4), value);
            }
            _ => debug_assert!(false, "write to non-storage operand {:?}", self.kind),
        }
    }

    pub fn effective_offset(&self, regs: &Registers) -> Option<u32> {
        match self.kind {
            OperandKind::Memory(mem) => Some(mem.offset(regs)),
            _ => None,
        }
    }

    /// Read a `selector:offset` pair; the offset is stored first in memory
    pub fn read_far_pointer<M: Memory>(&self, cpu: &Cpu386<M>) -> Option<(u16, u32)> {
        match self.kind {
            OperandKind::FarPointer { segment, offset } => Some((segment, offset)),
            OperandKind::Memory(mem) => {
                let ea = mem.offset(&cpu.regs);
                let offset_size = self.size.saturating_sub(2).clamp(2, 4);
                let offset = cpu.read_segment(mem.segment, ea, offset_size);
                let selector =
                    cpu.read_segment(mem.segment, ea.wrapping_add(offset_size as u32), 2);
                Some((selector as u16, offset))
            }
            _ => None,
        }
    }

    /// Sign-extend the low `from` bytes of `value` to `to` bytes
    pub fn sign_extend(value: u32, from: u8, to: u8) -> u32 {
        let extended = match from {
            1 => value as u8 as i8 as i32 as u32,
            2 => value as u16 as i16 as i32 as u32,
            _ => value,
        };
        extended & width_mask(to)
    }

    fn render(&self, out: &mut String, insn: &Instruction) {
        match self.kind {
            OperandKind::None => {}
            OperandKind::Register(id) => out.push_str(id.name()),
            OperandKind::Immediate(value) => {
                let _ = write!(out, "0x{:X}", value);
            }
            OperandKind::Relative(rel) => {
                let from_start = rel as i64 + insn.length as i64;
                if from_start < 0 {
                    let _ = write!(out, "$-0x{:X}", -from_start);
                } else {
                    let _ = write!(out, "$+0x{:X}", from_start);
                }
            }
            OperandKind::FarPointer { segment, offset } => {
                let _ = write!(out, "0x{:04X}:0x{:04X}", segment, offset);
            }
            OperandKind::Memory(mem) => {
                out.push_str(match self.size {
                    1 => "BYTE PTR ",
                    2 => "WORD PTR ",
                    4 => "DWORD PTR ",
                    6 => "FWORD PTR ",
                    _ => "",
                });
                if mem.segment != mem.default_segment() {
                    out.push_str(mem.segment.name());
                    out.push(':');
                }
                out.push('[');
                let mut any = false;
                for reg in [mem.base, mem.index].into_iter().flatten() {
                    if any {
                        out.push('+');
                    }
                    out.push_str(reg.name());
                    any = true;
                }
                let disp = mem.disp & width_mask(mem.address_size);
                if !any {
                    let _ = write!(out, "0x{:X}", disp);
                } else if disp != 0 {
                    let signed = Operand::sign_extend(disp, mem.address_size, 4) as i32;
                    if signed < 0 {
                        let _ = write!(out, "-0x{:X}", (signed as i64).unsigned_abs());
                    } else {
                        let _ = write!(out, "+0x{:X}", signed);
                    }
                }
                out.push(']');
            }
        }
    }
}

/// One decoded instruction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub mnemonic: Mnemonic,
    pub operands: [Operand; 3],
    pub operand_count: u8,
    /// Bytes consumed, prefixes included
    pub length: u8,
    pub repeat: RepeatPrefix,
    pub segment_override: Option<Seg>,
    /// Operand-size attribute in bytes (2 or 4)
    pub operand_size: u8,
    /// Address-size attribute in bytes (2 or 4)
    pub address_size: u8,
    pub lock: bool,
    /// Opcode byte; two-byte opcodes carry 0x0F in the high byte
    pub opcode: u16,
}

impl Instruction {
    pub fn operands(&self) -> &[Operand] {
        &self.operands[..self.operand_count as usize]
    }

    #[inline]
    pub fn op(&self, index: usize) -> &Operand {
        &self.operands[index]
    }

    /// Counter register for LOOP/JCXZ/REP under this address size
    pub fn count_register(&self) -> RegId {
        if self.address_size == 4 {
            RegId::ECX
        } else {
            RegId::CX
        }
    }

    fn display_name(&self) -> String {
        use Mnemonic::*;
        let wide = self.operand_size == 4;
        match self.mnemonic {
            Cbw if wide => "CWDE".to_string(),
            Cwd if wide => "CDQ".to_string(),
            Pusha | Popa | Pushf | Popf | Iret if wide => format!("{}D", self.mnemonic.name()),
            Jcxz if self.address_size == 4 => "JECXZ".to_string(),
            m if m.is_string() => {
                let size = self.operands().first().map_or(self.operand_size, |op| op.size);
                let suffix = match size {
                    1 => 'B',
                    2 => 'W',
                    _ => 'D',
                };
                format!("{}{}", m.name(), suffix)
            }
            m => m.name().to_string(),
        }
    }

    /// Intel-syntax rendering for traces and tests
    pub fn to_asm(&self) -> String {
        let mut out = String::new();
        if self.lock {
            out.push_str("LOCK ");
        }
        let string_op = self.mnemonic.is_string();
        if string_op {
            match self.repeat {
                RepeatPrefix::None => {}
                RepeatPrefix::Rep
                    if matches!(self.mnemonic, Mnemonic::Cmps | Mnemonic::Scas) =>
                {
                    out.push_str("REPE ")
                }
                RepeatPrefix::Rep => out.push_str("REP "),
                RepeatPrefix::Repne => out.push_str("REPNE "),
            }
        }
        out.push_str(&self.display_name());
        if string_op {
            return out;
        }
        for (i, operand) in self.operands().iter().enumerate() {
            out.push_str(if i == 0 { " " } else { ", " });
            operand.render(&mut out, self);
        }
        out
    }
}
