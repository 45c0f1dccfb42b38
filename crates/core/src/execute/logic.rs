//! Shifts, rotates and bit operations

use super::{to_signed, ExecResult};
use crate::bus::Memory;
use crate::cpu::Cpu386;
use crate::flags::{Cond, Flag, FlagOp};
use crate::instruction::{Instruction, OperandKind};
use crate::mnemonic::Mnemonic;
use crate::registers::{sign_bit, width_mask};

/// Shift and rotate counts are taken modulo 32
fn shift_count<M: Memory>(cpu: &Cpu386<M>, insn: &Instruction, index: usize) -> u32 {
    insn.op(index).read(cpu) & 0x1F
}

/// SHL/SAL, SHR, SAR
pub fn shift<M: Memory>(cpu: &mut Cpu386<M>, insn: &Instruction) -> ExecResult {
    let dst = insn.op(0);
    let size = dst.size;
    let count = shift_count(cpu, insn, 1);
    if count == 0 {
        return Ok(());
    }
    let a = dst.read(cpu) & width_mask(size);
    let (result, op) = match insn.mnemonic {
        Mnemonic::Shl => (((a as u64) << count) as u32, FlagOp::Shl),
        Mnemonic::Shr => (a >> count, FlagOp::Shr),
        _ => ((to_signed(a, size) >> count) as u32, FlagOp::Sar),
    };
    let result = result & width_mask(size);
    dst.write(cpu, result);

    // D0/D1 encode the count in the opcode
    if matches!(insn.opcode, 0xD0 | 0xD1) {
        cpu.regs.flags.set_flags_op1(op, a, result, size);
    } else {
        cpu.regs.flags.set_flags(op, a, count, result, size);
    }
    Ok(())
}

/// ROL / ROR: only CF and OF change
pub fn rotate<M: Memory>(cpu: &mut Cpu386<M>, insn: &Instruction) -> ExecResult {
    let dst = insn.op(0);
    let size = dst.size;
    let bits = size as u32 * 8;
    let count = shift_count(cpu, insn, 1);
    if count == 0 {
        return Ok(());
    }
    let a = dst.read(cpu) & width_mask(size);
    let n = count % bits;
    let msb = sign_bit(size);
    let mask = width_mask(size);

    let (result, cf, of) = if insn.mnemonic == Mnemonic::Rol {
        let r = if n == 0 { a } else { ((a << n) | (a >> (bits - n))) & mask };
        let cf = r & 1 != 0;
        (r, cf, (r & msb != 0) != cf)
    } else {
        let r = if n == 0 { a } else { ((a >> n) | (a << (bits - n))) & mask };
        let top = r & msb != 0;
        (r, top, top != (r & (msb >> 1) != 0))
    };

    dst.write(cpu, result);
    cpu.regs.flags.set(Flag::CF, cf);
    cpu.regs.flags.set(Flag::OF, of);
    Ok(())
}

/// RCL / RCR rotate through CF, one bit at a time
pub fn rotate_through_carry<M: Memory>(cpu: &mut Cpu386<M>, insn: &Instruction) -> ExecResult {
    let dst = insn.op(0);
    let size = dst.size;
    let bits = size as u32 * 8;
    let count = shift_count(cpu, insn, 1) % (bits + 1);
    if count == 0 {
        return Ok(());
    }
    let mask = width_mask(size);
    let msb = sign_bit(size);
    let mut value = dst.read(cpu) & mask;
    let mut cf = cpu.regs.flags.get(Flag::CF);
    let of;

    if insn.mnemonic == Mnemonic::Rcl {
        for _ in 0..count {
            let out = value & msb != 0;
            value = ((value << 1) | cf as u32) & mask;
            cf = out;
        }
        of = (value & msb != 0) != cf;
    } else {
        of = (value & msb != 0) != cf;
        for _ in 0..count {
            let out = value & 1 != 0;
            value = (value >> 1) | if cf { msb } else { 0 };
            cf = out;
        }
    }

    dst.write(cpu, value);
    cpu.regs.flags.set(Flag::CF, cf);
    cpu.regs.flags.set(Flag::OF, of);
    Ok(())
}

/// SHLD / SHRD
pub fn double_shift<M: Memory>(cpu: &mut Cpu386<M>, insn: &Instruction) -> ExecResult {
    let dst = insn.op(0);
    let size = dst.size;
    let bits = size as u32 * 8;
    let count = shift_count(cpu, insn, 2);
    if count == 0 {
        return Ok(());
    }
    let a = dst.read(cpu) & width_mask(size);
    let fill = insn.op(1).read(cpu) & width_mask(size);

    let (result, op) = if insn.mnemonic == Mnemonic::Shld {
        let wide = (a as u64) << bits | fill as u64;
        ((wide << count >> bits) as u32, FlagOp::Shl)
    } else {
        let wide = (fill as u64) << bits | a as u64;
        ((wide >> count) as u32, FlagOp::Shr)
    };
    let result = result & width_mask(size);
    dst.write(cpu, result);
    cpu.regs.flags.set_flags(op, a, count, result, size);
    Ok(())
}

/// BT, BTS, BTR, BTC
///
/// A register bit offset against a memory operand addresses a bit string:
/// the signed offset may reach outside the operand.
pub fn bit_test<M: Memory>(cpu: &mut Cpu386<M>, insn: &Instruction) -> ExecResult {
    let (dst, src) = (insn.op(0), insn.op(1));
    let size = dst.size;
    let bits = size as u32 * 8;
    let raw = src.read(cpu);

    let (value, bit, location) = match (dst.kind, src.kind) {
        (OperandKind::Memory(mem), OperandKind::Register(_)) => {
            let offset = to_signed(raw, size);
            let unit = offset.div_euclid(bits as i64);
            let bit = offset.rem_euclid(bits as i64) as u32;
            let addr = mem
                .offset(&cpu.regs)
                .wrapping_add((unit * size as i64) as u32)
                & width_mask(mem.address_size);
            (cpu.read_segment(mem.segment, addr, size), bit, Some((mem.segment, addr)))
        }
        _ => (dst.read(cpu), raw & (bits - 1), None),
    };

    let mask = 1u32 << bit;
    cpu.regs.flags.set(Flag::CF, value & mask != 0);
    let updated = match insn.mnemonic {
        Mnemonic::Bts => value | mask,
        Mnemonic::Btr => value & !mask,
        Mnemonic::Btc => value ^ mask,
        _ => return Ok(()),
    };
    match location {
        Some((seg, addr)) => cpu.write_segment(seg, addr, size, updated),
        None => dst.write(cpu, updated),
    }
    Ok(())
}

/// BSF / BSR leave the destination alone when the source is zero
pub fn bit_scan<M: Memory>(cpu: &mut Cpu386<M>, insn: &Instruction) -> ExecResult {
    let dst = insn.op(0);
    let source = insn.op(1).read(cpu) & width_mask(dst.size);
    if source == 0 {
        cpu.regs.flags.set(Flag::ZF, true);
        return Ok(());
    }
    let index = if insn.mnemonic == Mnemonic::Bsf {
        source.trailing_zeros()
    } else {
        31 - source.leading_zeros()
    };
    cpu.regs.flags.set(Flag::ZF, false);
    dst.write(cpu, index);
    Ok(())
}

pub fn setcc<M: Memory>(cpu: &mut Cpu386<M>, insn: &Instruction, cond: Cond) -> ExecResult {
    let value = cpu.regs.flags.condition(cond) as u32;
    insn.op(0).write(cpu, value);
    Ok(())
}
