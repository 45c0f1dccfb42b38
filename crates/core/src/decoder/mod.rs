//! Instruction decoder
//!
//! Turns the byte stream at CS:EIP into an [`Instruction`]. Decoding only
//! reads bytes through the supplied fetch closure and depends on nothing but
//! those bytes, the default size and the CPU model, so decoding the same
//! bytes twice gives the same result.
//!
//! Addressing covers the 16-bit ModRM forms and the 32-bit forms that do not
//! need a SIB byte.

mod tables;

pub use tables::{Entry, Group, Method, OperandSpec, SizeCode, Slot};

use crate::config::CpuModel;
use crate::error::{DecodeError, UnsupportedFeature};
use crate::instruction::{Instruction, MemRef, Operand, OperandKind, RepeatPrefix};
use crate::mnemonic::Mnemonic;
use crate::registers::{width_mask, RegId, Seg};
use tables::{group_slot, PRIMARY, SECONDARY};

/// Architectural limit on instruction length
pub const MAX_INSTRUCTION_LENGTH: u8 = 15;

const MODRM16_BASE: [(Option<RegId>, Option<RegId>); 8] = [
    (Some(RegId::BX), Some(RegId::SI)),
    (Some(RegId::BX), Some(RegId::DI)),
    (Some(RegId::BP), Some(RegId::SI)),
    (Some(RegId::BP), Some(RegId::DI)),
    (Some(RegId::SI), None),
    (Some(RegId::DI), None),
    (Some(RegId::BP), None),
    (Some(RegId::BX), None),
];

/// Byte reader bounded by the 15-byte limit; offsets wrap at the code segment width
struct Cursor<'a, F: FnMut(u32) -> u8> {
    fetch: &'a mut F,
    start: u32,
    mask: u32,
    pos: u8,
}

impl<'a, F: FnMut(u32) -> u8> Cursor<'a, F> {
    fn u8(&mut self) -> Result<u8, DecodeError> {
        if self.pos >= MAX_INSTRUCTION_LENGTH {
            return Err(DecodeError::TooLong);
        }
        let byte = (self.fetch)(self.start.wrapping_add(self.pos as u32) & self.mask);
        self.pos += 1;
        Ok(byte)
    }

    fn u16(&mut self) -> Result<u16, DecodeError> {
        let lo = self.u8()? as u16;
        let hi = self.u8()? as u16;
        Ok(lo | hi << 8)
    }

    fn u32(&mut self) -> Result<u32, DecodeError> {
        let lo = self.u16()? as u32;
        let hi = self.u16()? as u32;
        Ok(lo | hi << 16)
    }

    /// Immediate of `size` bytes, zero-extended
    fn imm(&mut self, size: u8) -> Result<u32, DecodeError> {
        match size {
            1 => Ok(self.u8()? as u32),
            2 => Ok(self.u16()? as u32),
            _ => self.u32(),
        }
    }
}

/// State accumulated while decoding one instruction
struct Pending {
    operand_size: u8,
    address_size: u8,
    segment_override: Option<Seg>,
    repeat: RepeatPrefix,
    lock: bool,
    opcode: u16,
    modrm: u8,
    mem: Option<MemRef>,
}

impl Pending {
    fn mod_bits(&self) -> u8 {
        self.modrm >> 6
    }

    fn reg_bits(&self) -> u8 {
        (self.modrm >> 3) & 7
    }

    fn rm_bits(&self) -> u8 {
        self.modrm & 7
    }

    fn data_segment(&self) -> Seg {
        self.segment_override.unwrap_or(Seg::DS)
    }

    fn invalid(&self) -> DecodeError {
        DecodeError::InvalidOpcode {
            opcode: self.opcode,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Decoder {
    model: CpuModel,
}

impl Decoder {
    pub fn new(model: CpuModel) -> Self {
        Self { model }
    }

    pub fn model(&self) -> CpuModel {
        self.model
    }

    /// Decode the instruction at code offset `eip`.
    ///
    /// `fetch` receives code-segment offsets. `default_size` (2 or 4) is the
    /// code segment's default operand and address size.
    pub fn decode<F: FnMut(u32) -> u8>(
        &self,
        fetch: &mut F,
        eip: u32,
        default_size: u8,
    ) -> Result<Instruction, DecodeError> {
        let mut cur = Cursor {
            fetch,
            start: eip,
            mask: width_mask(default_size),
            pos: 0,
        };
        let other_size = if default_size == 4 { 2 } else { 4 };
        let mut p = Pending {
            operand_size: default_size,
            address_size: default_size,
            segment_override: None,
            repeat: RepeatPrefix::None,
            lock: false,
            opcode: 0,
            modrm: 0,
            mem: None,
        };

        let mut byte = cur.u8()?;
        while PRIMARY[byte as usize] == Entry::Prefix {
            match byte {
                0x26 => p.segment_override = Some(Seg::ES),
                0x2E => p.segment_override = Some(Seg::CS),
                0x36 => p.segment_override = Some(Seg::SS),
                0x3E => p.segment_override = Some(Seg::DS),
                0x64 => p.segment_override = Some(Seg::FS),
                0x65 => p.segment_override = Some(Seg::GS),
                0x66 => p.operand_size = other_size,
                0x67 => p.address_size = other_size,
                0xF0 => p.lock = true,
                0xF2 => p.repeat = RepeatPrefix::Repne,
                _ => p.repeat = RepeatPrefix::Rep,
            }
            byte = cur.u8()?;
        }

        let mut entry = PRIMARY[byte as usize];
        p.opcode = byte as u16;
        if entry == Entry::Escape {
            let second = cur.u8()?;
            p.opcode = 0x0F00 | second as u16;
            entry = SECONDARY[second as usize];
        }

        let (mnemonic, specs) = match entry {
            Entry::Op(m, specs) => {
                if specs.iter().any(|s| matches!(s, OperandSpec::Addr(Method::R, _))) {
                    // Moves to and from CRn/DRn/TRn ignore mod and never
                    // carry a displacement
                    p.modrm = cur.u8()?;
                } else if specs.iter().any(|s| s.needs_modrm()) {
                    self.read_modrm(&mut cur, &mut p)?;
                }
                (m, specs)
            }
            Entry::Group(group, parent) => {
                self.read_modrm(&mut cur, &mut p)?;
                match group_slot(group, p.reg_bits()) {
                    Slot::Op(m) => (m, parent),
                    Slot::With(m, own) => (m, own),
                    Slot::Invalid => return Err(p.invalid()),
                }
            }
            Entry::Invalid | Entry::Prefix | Entry::Escape => return Err(p.invalid()),
        };

        if mnemonic.requires_486() && !self.model.supports_486_instructions() {
            return Err(p.invalid());
        }

        let mut operands = [Operand::NONE; 3];
        let mut count = 0;
        for spec in specs.iter().filter(|s| **s != OperandSpec::None) {
            operands[count] = self.resolve(*spec, &mut cur, &p)?;
            count += 1;
        }

        // MOV r/m,Sreg stores a word to memory; a register destination
        // takes the operand size and is zero-extended
        if p.opcode == 0x8C {
            if let OperandKind::Memory(_) = operands[0].kind {
                operands[0].size = 2;
            }
        }

        // MOV CS, r/m is not an instruction
        if mnemonic == Mnemonic::Mov
            && p.opcode == 0x8E
            && operands[0].reg() == Some(RegId::CS)
        {
            return Err(p.invalid());
        }

        Ok(Instruction {
            mnemonic,
            operands,
            operand_count: count as u8,
            length: cur.pos,
            repeat: p.repeat,
            segment_override: p.segment_override,
            operand_size: p.operand_size,
            address_size: p.address_size,
            lock: p.lock,
            opcode: p.opcode,
        })
    }

    /// Read the ModRM byte and, for memory forms, the displacement
    fn read_modrm<F: FnMut(u32) -> u8>(
        &self,
        cur: &mut Cursor<'_, F>,
        p: &mut Pending,
    ) -> Result<(), DecodeError> {
        p.modrm = cur.u8()?;
        if p.mod_bits() == 3 {
            return Ok(());
        }
        p.mem = Some(if p.address_size == 2 {
            Self::memory16(cur, p)?
        } else {
            Self::memory32(cur, p)?
        });
        Ok(())
    }

    fn memory16<F: FnMut(u32) -> u8>(
        cur: &mut Cursor<'_, F>,
        p: &Pending,
    ) -> Result<MemRef, DecodeError> {
        let (mode, rm) = (p.mod_bits(), p.rm_bits());
        let (mut base, index) = MODRM16_BASE[rm as usize];
        let disp = match mode {
            0 if rm == 6 => {
                base = None;
                cur.u16()? as u32
            }
            0 => 0,
            1 => Operand::sign_extend(cur.u8()? as u32, 1, 2),
            _ => cur.u16()? as u32,
        };
        let stack_based = base == Some(RegId::BP);
        Ok(MemRef {
            segment: p
                .segment_override
                .unwrap_or(if stack_based { Seg::SS } else { Seg::DS }),
            base,
            index,
            disp,
            address_size: 2,
        })
    }

    fn memory32<F: FnMut(u32) -> u8>(
        cur: &mut Cursor<'_, F>,
        p: &Pending,
    ) -> Result<MemRef, DecodeError> {
        let (mode, rm) = (p.mod_bits(), p.rm_bits());
        if rm == 4 {
            return Err(DecodeError::UnsupportedAddressing("SIB byte"));
        }
        let mut base = Some(RegId::gpr(rm, 4));
        let disp = match mode {
            0 if rm == 5 => {
                base = None;
                cur.u32()?
            }
            0 => 0,
            1 => Operand::sign_extend(cur.u8()? as u32, 1, 4),
            _ => cur.u32()?,
        };
        let stack_based = base == Some(RegId::EBP);
        Ok(MemRef {
            segment: p
                .segment_override
                .unwrap_or(if stack_based { Seg::SS } else { Seg::DS }),
            base,
            index: None,
            disp,
            address_size: 4,
        })
    }

    fn resolve<F: FnMut(u32) -> u8>(
        &self,
        spec: OperandSpec,
        cur: &mut Cursor<'_, F>,
        p: &Pending,
    ) -> Result<Operand, DecodeError> {
        let (method, code) = match spec {
            OperandSpec::None => return Ok(Operand::NONE),
            OperandSpec::Reg(id) => return Ok(Operand::register(id, id.size())),
            OperandSpec::RegV(index) => {
                return Ok(Operand::register(
                    RegId::gpr(index, p.operand_size),
                    p.operand_size,
                ))
            }
            OperandSpec::Const(value) => return Ok(Operand::immediate(value as u32, 1)),
            OperandSpec::Addr(method, code) => (method, code),
        };

        let size = match code {
            SizeCode::B => 1,
            SizeCode::W => 2,
            SizeCode::D => 4,
            SizeCode::V | SizeCode::Bs => p.operand_size,
            SizeCode::P => p.operand_size + 2,
            SizeCode::A => p.operand_size * 2,
            SizeCode::S => 6,
        };

        let operand = match method {
            Method::E => match p.mem {
                Some(mem) => Operand::memory(mem, size),
                None => Operand::register(RegId::gpr(p.rm_bits(), size), size),
            },
            Method::G => Operand::register(RegId::gpr(p.reg_bits(), size), size),
            Method::M => match p.mem {
                Some(mem) => Operand::memory(mem, size),
                None => return Err(p.invalid()),
            },
            Method::R => Operand::register(RegId::gpr(p.rm_bits(), size), size),
            Method::S => {
                let seg = Seg::from_index(p.reg_bits()).ok_or_else(|| p.invalid())?;
                Operand::register(seg.reg(), 2)
            }
            Method::C => {
                let cr = RegId::control(p.reg_bits()).ok_or_else(|| p.invalid())?;
                Operand::register(cr, 4)
            }
            Method::D => Operand::register(RegId::debug(p.reg_bits()), 4),
            Method::I => {
                let value = match code {
                    SizeCode::Bs => Operand::sign_extend(cur.u8()? as u32, 1, size),
                    _ => cur.imm(size)?,
                };
                Operand::immediate(value, size)
            }
            Method::J => {
                let rel = match code {
                    SizeCode::B => cur.u8()? as i8 as i32,
                    _ if p.operand_size == 2 => cur.u16()? as i16 as i32,
                    _ => cur.u32()? as i32,
                };
                Operand {
                    kind: OperandKind::Relative(rel),
                    size: p.operand_size,
                    is_pointer: false,
                }
            }
            Method::O => {
                let disp = cur.imm(p.address_size)?;
                Operand::memory(
                    MemRef {
                        segment: p.data_segment(),
                        base: None,
                        index: None,
                        disp,
                        address_size: p.address_size,
                    },
                    size,
                )
            }
            Method::A => {
                if p.operand_size == 4 {
                    return Err(DecodeError::Unsupported(UnsupportedFeature::FarPointer48));
                }
                let offset = cur.u16()? as u32;
                let segment = cur.u16()?;
                Operand {
                    kind: OperandKind::FarPointer { segment, offset },
                    size: 4,
                    is_pointer: false,
                }
            }
            Method::X | Method::Y => {
                let (segment, index_reg) = if method == Method::X {
                    (p.data_segment(), 6)
                } else {
                    (Seg::ES, 7)
                };
                Operand::memory(
                    MemRef {
                        segment,
                        base: Some(RegId::gpr(index_reg, p.address_size)),
                        index: None,
                        disp: 0,
                        address_size: p.address_size,
                    },
                    size,
                )
            }
            Method::Z => Operand::register(RegId::gpr((p.opcode & 7) as u8, size), size),
        };
        Ok(operand)
    }
}
