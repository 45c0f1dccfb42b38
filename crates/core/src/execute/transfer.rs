//! Data movement, stack and port instructions

use super::ExecResult;
use crate::bus::Memory;
use crate::cpu::Cpu386;
use crate::error::{Fault, UnsupportedFeature};
use crate::flags::Flag;
use crate::instruction::{Instruction, Operand};
use crate::mnemonic::Mnemonic;
use crate::registers::{cr0, width_mask, RegId, Seg};

/// Bits of the low flags byte visible to LAHF/SAHF
const FLAGS_LOW_BYTE: u32 = 0xD5;

pub fn mov<M: Memory>(cpu: &mut Cpu386<M>, insn: &Instruction) -> ExecResult {
    let dst = insn.op(0);
    let value = insn.op(1).read(cpu);
    match dst.reg() {
        Some(RegId::CR0) if value & cr0::PE != 0 => {
            return Err(Fault::Unsupported(UnsupportedFeature::ProtectedMode));
        }
        Some(RegId::SS) => cpu.set_interrupt_shadow(),
        _ => {}
    }
    dst.write(cpu, value);
    Ok(())
}

/// MOVZX / MOVSX
pub fn mov_extend<M: Memory>(cpu: &mut Cpu386<M>, insn: &Instruction) -> ExecResult {
    let (dst, src) = (insn.op(0), insn.op(1));
    let value = src.read(cpu) & width_mask(src.size);
    let value = if insn.mnemonic == Mnemonic::Movsx {
        Operand::sign_extend(value, src.size, dst.size)
    } else {
        value
    };
    dst.write(cpu, value);
    Ok(())
}

pub fn xchg<M: Memory>(cpu: &mut Cpu386<M>, insn: &Instruction) -> ExecResult {
    let (a, b) = (insn.op(0), insn.op(1));
    let first = a.read(cpu);
    let second = b.read(cpu);
    a.write(cpu, second);
    b.write(cpu, first);
    Ok(())
}

pub fn lea<M: Memory>(cpu: &mut Cpu386<M>, insn: &Instruction) -> ExecResult {
    let dst = insn.op(0);
    let offset = insn
        .op(1)
        .effective_offset(&cpu.regs)
        .ok_or(Fault::invalid_opcode())?;
    dst.write(cpu, offset & width_mask(dst.size));
    Ok(())
}

/// LDS, LES, LFS, LGS, LSS
pub fn load_far_pointer<M: Memory>(cpu: &mut Cpu386<M>, insn: &Instruction) -> ExecResult {
    let (selector, offset) = insn
        .op(1)
        .read_far_pointer(cpu)
        .ok_or(Fault::invalid_opcode())?;
    let seg = match insn.mnemonic {
        Mnemonic::Lds => Seg::DS,
        Mnemonic::Les => Seg::ES,
        Mnemonic::Lfs => Seg::FS,
        Mnemonic::Lgs => Seg::GS,
        _ => Seg::SS,
    };
    insn.op(0).write(cpu, offset);
    cpu.regs.write(seg.reg(), selector as u32);
    if seg == Seg::SS {
        cpu.set_interrupt_shadow();
    }
    Ok(())
}

/// PUSH at the operand size; PUSH SP stores the value before the decrement
pub fn push<M: Memory>(cpu: &mut Cpu386<M>, insn: &Instruction) -> ExecResult {
    let value = insn.op(0).read(cpu);
    cpu.push_stack(value, insn.operand_size);
    Ok(())
}

/// POP to memory computes the address with the incremented stack pointer
pub fn pop<M: Memory>(cpu: &mut Cpu386<M>, insn: &Instruction) -> ExecResult {
    let dst = insn.op(0);
    let value = cpu.pop_stack(insn.operand_size);
    if dst.reg() == Some(RegId::SS) {
        cpu.set_interrupt_shadow();
    }
    dst.write(cpu, value);
    Ok(())
}

pub fn pusha<M: Memory>(cpu: &mut Cpu386<M>, insn: &Instruction) -> ExecResult {
    let size = insn.operand_size;
    let original_sp = cpu.regs.read(RegId::gpr(4, size));
    for index in 0..8 {
        let value = if index == 4 {
            original_sp
        } else {
            cpu.regs.read(RegId::gpr(index, size))
        };
        cpu.push_stack(value, size);
    }
    Ok(())
}

/// POPA discards the saved stack pointer
pub fn popa<M: Memory>(cpu: &mut Cpu386<M>, insn: &Instruction) -> ExecResult {
    let size = insn.operand_size;
    for index in (0..8).rev() {
        let value = cpu.pop_stack(size);
        if index != 4 {
            cpu.regs.write(RegId::gpr(index, size), value);
        }
    }
    Ok(())
}

pub fn pushf<M: Memory>(cpu: &mut Cpu386<M>, insn: &Instruction) -> ExecResult {
    let flags = cpu.regs.flags.value();
    if insn.operand_size == 4 {
        cpu.push_stack(flags & !(Flag::VM.mask() | Flag::RF.mask()), 4);
    } else {
        cpu.push_stack(flags & 0xFFFF, 2);
    }
    Ok(())
}

pub fn popf<M: Memory>(cpu: &mut Cpu386<M>, insn: &Instruction) -> ExecResult {
    let size = insn.operand_size;
    let value = cpu.pop_stack(size);
    let mut writable = cpu.writable_flags();
    if size == 2 {
        writable &= 0xFFFF;
    }
    cpu.regs.flags.load(value, writable);
    Ok(())
}

pub fn lahf<M: Memory>(cpu: &mut Cpu386<M>) -> ExecResult {
    let low = cpu.regs.flags.value() & FLAGS_LOW_BYTE;
    cpu.regs.write(RegId::AH, low | 0x02);
    Ok(())
}

pub fn sahf<M: Memory>(cpu: &mut Cpu386<M>) -> ExecResult {
    let ah = cpu.regs.read(RegId::AH);
    cpu.regs.flags.load(ah, FLAGS_LOW_BYTE);
    Ok(())
}

/// AL = [seg:(E)BX + AL]
pub fn xlat<M: Memory>(cpu: &mut Cpu386<M>, insn: &Instruction) -> ExecResult {
    let base = cpu.regs.read(RegId::gpr(3, insn.address_size));
    let al = cpu.regs.read(RegId::AL);
    let offset = base.wrapping_add(al) & width_mask(insn.address_size);
    let seg = insn.segment_override.unwrap_or(Seg::DS);
    let value = cpu.read_segment(seg, offset, 1);
    cpu.regs.write(RegId::AL, value);
    Ok(())
}

pub fn port_in<M: Memory>(cpu: &mut Cpu386<M>, insn: &Instruction) -> ExecResult {
    let dst = insn.op(0);
    let port = insn.op(1).read(cpu) as u16;
    let value = cpu.port_read(port, dst.size);
    dst.write(cpu, value);
    Ok(())
}

pub fn port_out<M: Memory>(cpu: &mut Cpu386<M>, insn: &Instruction) -> ExecResult {
    let port = insn.op(0).read(cpu) as u16;
    let src = insn.op(1);
    let value = src.read(cpu);
    cpu.port_write(port, value, src.size);
    Ok(())
}

pub fn bswap<M: Memory>(cpu: &mut Cpu386<M>, insn: &Instruction) -> ExecResult {
    let reg = insn.op(0);
    let value = reg.read(cpu);
    reg.write(cpu, value.swap_bytes());
    Ok(())
}
