//! Integer and BCD arithmetic

use super::{to_signed, ExecResult};
use crate::bus::Memory;
use crate::cpu::Cpu386;
use crate::error::Fault;
use crate::flags::{Flag, FlagOp};
use crate::instruction::{Instruction, Operand};
use crate::mnemonic::Mnemonic;
use crate::registers::{sign_bit, width_mask, RegId};

/// Accumulator of the given width
fn acc(size: u8) -> RegId {
    RegId::gpr(0, size)
}

/// Source value widened to `size`, sign-extending narrower sources
fn source<M: Memory>(cpu: &Cpu386<M>, src: &Operand, size: u8) -> u32 {
    let value = src.read(cpu);
    if src.size < size {
        Operand::sign_extend(value, src.size, size)
    } else {
        value & width_mask(size)
    }
}

/// ADD ADC SUB SBB CMP AND OR XOR TEST
pub fn binary<M: Memory>(cpu: &mut Cpu386<M>, insn: &Instruction) -> ExecResult {
    use Mnemonic::*;
    let dst = insn.op(0);
    let size = dst.size;
    let a = dst.read(cpu);
    let b = source(cpu, insn.op(1), size);
    let carry = cpu.regs.flags.get(Flag::CF) as u32;

    let (result, op) = match insn.mnemonic {
        Add => (a.wrapping_add(b), FlagOp::Add),
        Adc => (a.wrapping_add(b).wrapping_add(carry), FlagOp::Adc),
        Sub | Cmp => (a.wrapping_sub(b), FlagOp::Sub),
        Sbb => (a.wrapping_sub(b).wrapping_sub(carry), FlagOp::Sbb),
        And | Test => (a & b, FlagOp::Logic),
        Or => (a | b, FlagOp::Logic),
        _ => (a ^ b, FlagOp::Logic),
    };
    let result = result & width_mask(size);

    if !matches!(insn.mnemonic, Cmp | Test) {
        dst.write(cpu, result);
    }
    cpu.regs.flags.set_flags(op, a, b, result, size);
    Ok(())
}

pub fn inc_dec<M: Memory>(cpu: &mut Cpu386<M>, insn: &Instruction) -> ExecResult {
    let dst = insn.op(0);
    let a = dst.read(cpu);
    let (result, op) = if insn.mnemonic == Mnemonic::Inc {
        (a.wrapping_add(1), FlagOp::Inc)
    } else {
        (a.wrapping_sub(1), FlagOp::Dec)
    };
    let result = result & width_mask(dst.size);
    dst.write(cpu, result);
    cpu.regs.flags.set_flags_result(op, result, dst.size);
    Ok(())
}

pub fn neg<M: Memory>(cpu: &mut Cpu386<M>, insn: &Instruction) -> ExecResult {
    let dst = insn.op(0);
    let a = dst.read(cpu);
    let result = 0u32.wrapping_sub(a) & width_mask(dst.size);
    dst.write(cpu, result);
    cpu.regs.flags.set_flags_op2(FlagOp::Neg, a, result, dst.size);
    Ok(())
}

pub fn not<M: Memory>(cpu: &mut Cpu386<M>, insn: &Instruction) -> ExecResult {
    let dst = insn.op(0);
    let value = !dst.read(cpu);
    dst.write(cpu, value & width_mask(dst.size));
    Ok(())
}

/// Store a double-width product in AX, DX:AX or EDX:EAX
fn store_wide<M: Memory>(cpu: &mut Cpu386<M>, size: u8, product: u64) {
    match size {
        1 => cpu.regs.write(RegId::AX, product as u32),
        2 => {
            cpu.regs.write(RegId::AX, product as u32);
            cpu.regs.write(RegId::DX, (product >> 16) as u32);
        }
        _ => {
            cpu.regs.write(RegId::EAX, product as u32);
            cpu.regs.write(RegId::EDX, (product >> 32) as u32);
        }
    }
}

/// Dividend for DIV/IDIV: AX, DX:AX or EDX:EAX
fn wide_dividend<M: Memory>(cpu: &Cpu386<M>, size: u8) -> u64 {
    match size {
        1 => cpu.regs.read(RegId::AX) as u64,
        2 => (cpu.regs.read(RegId::DX) as u64) << 16 | cpu.regs.read(RegId::AX) as u64,
        _ => (cpu.regs.read(RegId::EDX) as u64) << 32 | cpu.regs.read(RegId::EAX) as u64,
    }
}

/// Record flags for a multiply: SF/ZF/PF from the low half, CF=OF=`overflow`
fn multiply_flags<M: Memory>(cpu: &mut Cpu386<M>, low: u32, size: u8, overflow: bool) {
    cpu.regs.flags.set_flags_result(FlagOp::Logic, low, size);
    cpu.regs.flags.set(Flag::CF, overflow);
    cpu.regs.flags.set(Flag::OF, overflow);
}

pub fn mul<M: Memory>(cpu: &mut Cpu386<M>, insn: &Instruction) -> ExecResult {
    let src = insn.op(0);
    let size = src.size;
    let a = cpu.regs.read(acc(size)) as u64;
    let product = a * src.read(cpu) as u64;
    store_wide(cpu, size, product);
    let high = product >> (size as u32 * 8);
    multiply_flags(cpu, product as u32 & width_mask(size), size, high != 0);
    Ok(())
}

pub fn imul<M: Memory>(cpu: &mut Cpu386<M>, insn: &Instruction) -> ExecResult {
    if insn.operand_count == 1 {
        let src = insn.op(0);
        let size = src.size;
        let a = to_signed(cpu.regs.read(acc(size)), size);
        let b = to_signed(src.read(cpu), size);
        let product = a * b;
        store_wide(cpu, size, product as u64);
        let low = product as u32 & width_mask(size);
        multiply_flags(cpu, low, size, to_signed(low, size) != product);
        return Ok(());
    }

    // IMUL r, r/m  and  IMUL r, r/m, imm
    let dst = insn.op(0);
    let size = dst.size;
    let (x, y) = if insn.operand_count == 3 {
        (insn.op(1), insn.op(2))
    } else {
        (insn.op(0), insn.op(1))
    };
    let a = to_signed(source(cpu, x, size), size);
    let b = to_signed(source(cpu, y, size), size);
    let product = a * b;
    let low = product as u32 & width_mask(size);
    dst.write(cpu, low);
    multiply_flags(cpu, low, size, to_signed(low, size) != product);
    Ok(())
}

/// Write quotient and remainder to AL/AH, AX/DX or EAX/EDX
fn store_division<M: Memory>(cpu: &mut Cpu386<M>, size: u8, quotient: u32, remainder: u32) {
    match size {
        1 => {
            cpu.regs.write(RegId::AL, quotient);
            cpu.regs.write(RegId::AH, remainder);
        }
        2 => {
            cpu.regs.write(RegId::AX, quotient);
            cpu.regs.write(RegId::DX, remainder);
        }
        _ => {
            cpu.regs.write(RegId::EAX, quotient);
            cpu.regs.write(RegId::EDX, remainder);
        }
    }
}

/// DIV: #DE on a zero divisor or a quotient too wide for the destination
pub fn div<M: Memory>(cpu: &mut Cpu386<M>, insn: &Instruction) -> ExecResult {
    let src = insn.op(0);
    let size = src.size;
    let divisor = src.read(cpu) as u64;
    if divisor == 0 {
        return Err(Fault::divide_error());
    }
    let dividend = wide_dividend(cpu, size);
    let quotient = dividend / divisor;
    if quotient > width_mask(size) as u64 {
        return Err(Fault::divide_error());
    }
    store_division(cpu, size, quotient as u32, (dividend % divisor) as u32);
    Ok(())
}

pub fn idiv<M: Memory>(cpu: &mut Cpu386<M>, insn: &Instruction) -> ExecResult {
    let src = insn.op(0);
    let size = src.size;
    let divisor = to_signed(src.read(cpu), size);
    if divisor == 0 {
        return Err(Fault::divide_error());
    }
    let raw = wide_dividend(cpu, size);
    let dividend = match size {
        1 => raw as u16 as i16 as i64,
        2 => raw as u32 as i32 as i64,
        _ => raw as i64,
    };
    let quotient = dividend.checked_div(divisor).ok_or(Fault::divide_error())?;
    let remainder = dividend.checked_rem(divisor).ok_or(Fault::divide_error())?;
    let bits = size as u32 * 8;
    let (min, max) = (-(1i64 << (bits - 1)), (1i64 << (bits - 1)) - 1);
    if quotient < min || quotient > max {
        return Err(Fault::divide_error());
    }
    let mask = width_mask(size);
    store_division(cpu, size, quotient as u32 & mask, remainder as u32 & mask);
    Ok(())
}

/// DAA / DAS
pub fn decimal_adjust<M: Memory>(cpu: &mut Cpu386<M>, insn: &Instruction) -> ExecResult {
    let old_al = cpu.regs.read(RegId::AL);
    let old_cf = cpu.regs.flags.get(Flag::CF);
    let subtract = insn.mnemonic == Mnemonic::Das;
    let mut al = old_al;
    let mut cf = false;
    let mut af = false;

    if old_al & 0x0F > 9 || cpu.regs.flags.get(Flag::AF) {
        if subtract {
            cf = old_cf || old_al < 6;
            al = al.wrapping_sub(6) & 0xFF;
        } else {
            cf = old_cf || old_al > 0xF9;
            al = (al + 6) & 0xFF;
        }
        af = true;
    }
    if old_al > 0x99 || old_cf {
        al = if subtract {
            al.wrapping_sub(0x60)
        } else {
            al.wrapping_add(0x60)
        } & 0xFF;
        cf = true;
    }

    cpu.regs.write(RegId::AL, al);
    cpu.regs.flags.set_flags_result(FlagOp::Logic, al, 1);
    cpu.regs.flags.set(Flag::CF, cf);
    cpu.regs.flags.set(Flag::AF, af);
    Ok(())
}

/// AAA / AAS
pub fn ascii_adjust<M: Memory>(cpu: &mut Cpu386<M>, insn: &Instruction) -> ExecResult {
    let al = cpu.regs.read(RegId::AL);
    let ah = cpu.regs.read(RegId::AH);
    let adjust = al & 0x0F > 9 || cpu.regs.flags.get(Flag::AF);
    let (al, ah) = match (adjust, insn.mnemonic == Mnemonic::Aas) {
        (false, _) => (al, ah),
        (true, false) => (al.wrapping_add(6), ah.wrapping_add(1)),
        (true, true) => (al.wrapping_sub(6), ah.wrapping_sub(1)),
    };
    let al = al & 0x0F;
    cpu.regs.write(RegId::AL, al);
    cpu.regs.write(RegId::AH, ah);
    cpu.regs.flags.set_flags_result(FlagOp::Logic, al, 1);
    cpu.regs.flags.set(Flag::AF, adjust);
    cpu.regs.flags.set(Flag::CF, adjust);
    Ok(())
}

pub fn aam<M: Memory>(cpu: &mut Cpu386<M>, insn: &Instruction) -> ExecResult {
    let base = insn.op(0).read(cpu) & 0xFF;
    if base == 0 {
        return Err(Fault::divide_error());
    }
    let al = cpu.regs.read(RegId::AL);
    cpu.regs.write(RegId::AH, al / base);
    cpu.regs.write(RegId::AL, al % base);
    cpu.regs.flags.set_flags_result(FlagOp::Logic, al % base, 1);
    Ok(())
}

pub fn aad<M: Memory>(cpu: &mut Cpu386<M>, insn: &Instruction) -> ExecResult {
    let base = insn.op(0).read(cpu) & 0xFF;
    let al = cpu.regs.read(RegId::AL);
    let ah = cpu.regs.read(RegId::AH);
    let result = al.wrapping_add(ah.wrapping_mul(base)) & 0xFF;
    cpu.regs.write(RegId::AX, result);
    cpu.regs.flags.set_flags_result(FlagOp::Logic, result, 1);
    Ok(())
}

pub fn xadd<M: Memory>(cpu: &mut Cpu386<M>, insn: &Instruction) -> ExecResult {
    let (dst, src) = (insn.op(0), insn.op(1));
    let size = dst.size;
    let a = dst.read(cpu);
    let b = src.read(cpu);
    let sum = a.wrapping_add(b) & width_mask(size);
    src.write(cpu, a);
    dst.write(cpu, sum);
    cpu.regs.flags.set_flags(FlagOp::Add, a, b, sum, size);
    Ok(())
}

pub fn cmpxchg<M: Memory>(cpu: &mut Cpu386<M>, insn: &Instruction) -> ExecResult {
    let (dst, src) = (insn.op(0), insn.op(1));
    let size = dst.size;
    let accumulator = cpu.regs.read(acc(size));
    let current = dst.read(cpu);
    let diff = accumulator.wrapping_sub(current) & width_mask(size);
    cpu.regs.flags.set_flags(FlagOp::Sub, accumulator, current, diff, size);
    if diff == 0 {
        let value = src.read(cpu);
        dst.write(cpu, value);
    } else {
        cpu.regs.write(acc(size), current);
    }
    Ok(())
}

/// CBW / CWDE
pub fn cbw<M: Memory>(cpu: &mut Cpu386<M>, insn: &Instruction) -> ExecResult {
    if insn.operand_size == 4 {
        let ax = cpu.regs.read(RegId::AX);
        cpu.regs.write(RegId::EAX, Operand::sign_extend(ax, 2, 4));
    } else {
        let al = cpu.regs.read(RegId::AL);
        cpu.regs.write(RegId::AX, Operand::sign_extend(al, 1, 2));
    }
    Ok(())
}

/// CWD / CDQ
pub fn cwd<M: Memory>(cpu: &mut Cpu386<M>, insn: &Instruction) -> ExecResult {
    let size = insn.operand_size;
    let negative = cpu.regs.read(acc(size)) & sign_bit(size) != 0;
    let high = if negative { width_mask(size) } else { 0 };
    cpu.regs.write(RegId::gpr(2, size), high);
    Ok(())
}

/// Undocumented: AL = CF ? 0xFF : 0x00
pub fn salc<M: Memory>(cpu: &mut Cpu386<M>) -> ExecResult {
    let value = if cpu.regs.flags.get(Flag::CF) { 0xFF } else { 0 };
    cpu.regs.write(RegId::AL, value);
    Ok(())
}
