//! Control transfer: jumps, calls, returns, loops and software interrupts

use super::{to_signed, ExecResult};
use crate::bus::Memory;
use crate::cpu::Cpu386;
use crate::error::{vectors, Fault, UnsupportedFeature};
use crate::flags::{Cond, Flag};
use crate::instruction::{Instruction, Operand, OperandKind};
use crate::mnemonic::Mnemonic;
use crate::registers::{width_mask, RegId, Seg};

/// Destination of a near transfer, truncated to the operand size
fn near_target<M: Memory>(cpu: &Cpu386<M>, insn: &Instruction, target: &Operand) -> u32 {
    let mask = width_mask(insn.operand_size);
    match target.kind {
        OperandKind::Relative(rel) => cpu.regs.eip().wrapping_add(rel as u32) & mask,
        _ => target.read(cpu) & mask,
    }
}

fn far_target<M: Memory>(cpu: &Cpu386<M>, insn: &Instruction) -> Result<(u16, u32), Fault> {
    insn.op(0)
        .read_far_pointer(cpu)
        .ok_or(Fault::invalid_opcode())
}

/// Drop `bytes` from the stack after a return
fn release_stack<M: Memory>(cpu: &mut Cpu386<M>, bytes: u32) {
    if bytes == 0 {
        return;
    }
    let (sp, mask) = cpu.stack_pointer();
    let value = cpu.regs.read(sp).wrapping_add(bytes) & mask;
    cpu.regs.write(sp, value);
}

pub fn jmp<M: Memory>(cpu: &mut Cpu386<M>, insn: &Instruction) -> ExecResult {
    let target = near_target(cpu, insn, insn.op(0));
    cpu.regs.set_eip(target);
    Ok(())
}

pub fn jmp_far<M: Memory>(cpu: &mut Cpu386<M>, insn: &Instruction) -> ExecResult {
    let (selector, offset) = far_target(cpu, insn)?;
    cpu.regs.write(RegId::CS, selector as u32);
    cpu.regs.set_eip(offset & width_mask(insn.operand_size));
    Ok(())
}

pub fn call<M: Memory>(cpu: &mut Cpu386<M>, insn: &Instruction) -> ExecResult {
    let target = near_target(cpu, insn, insn.op(0));
    let ret = cpu.regs.eip();
    cpu.push_stack(ret, insn.operand_size);
    cpu.regs.set_eip(target);
    Ok(())
}

pub fn call_far<M: Memory>(cpu: &mut Cpu386<M>, insn: &Instruction) -> ExecResult {
    let (selector, offset) = far_target(cpu, insn)?;
    let size = insn.operand_size;
    let cs = cpu.regs.read(RegId::CS);
    let ret = cpu.regs.eip();
    cpu.push_stack(cs, size);
    cpu.push_stack(ret, size);
    cpu.regs.write(RegId::CS, selector as u32);
    cpu.regs.set_eip(offset & width_mask(size));
    Ok(())
}

/// RET and RET imm16
pub fn ret<M: Memory>(cpu: &mut Cpu386<M>, insn: &Instruction) -> ExecResult {
    let ip = cpu.pop_stack(insn.operand_size);
    let release = if insn.operand_count > 0 {
        insn.op(0).read(cpu)
    } else {
        0
    };
    release_stack(cpu, release);
    cpu.regs.set_eip(ip);
    Ok(())
}

pub fn ret_far<M: Memory>(cpu: &mut Cpu386<M>, insn: &Instruction) -> ExecResult {
    let size = insn.operand_size;
    let ip = cpu.pop_stack(size);
    let cs = cpu.pop_stack(size) & 0xFFFF;
    let release = if insn.operand_count > 0 {
        insn.op(0).read(cpu)
    } else {
        0
    };
    release_stack(cpu, release);
    cpu.regs.write(RegId::CS, cs);
    cpu.regs.set_eip(ip);
    Ok(())
}

pub fn jcc<M: Memory>(cpu: &mut Cpu386<M>, insn: &Instruction, cond: Cond) -> ExecResult {
    if cpu.regs.flags.condition(cond) {
        jmp(cpu, insn)?;
    }
    Ok(())
}

/// JCXZ / JECXZ by address size
pub fn jcxz<M: Memory>(cpu: &mut Cpu386<M>, insn: &Instruction) -> ExecResult {
    if cpu.regs.read(insn.count_register()) == 0 {
        jmp(cpu, insn)?;
    }
    Ok(())
}

/// LOOP, LOOPE, LOOPNE: decrement the count register without touching flags
pub fn loop_<M: Memory>(cpu: &mut Cpu386<M>, insn: &Instruction) -> ExecResult {
    let counter = insn.count_register();
    let count = cpu.regs.read(counter).wrapping_sub(1) & width_mask(insn.address_size);
    cpu.regs.write(counter, count);
    let zf = cpu.regs.flags.get(Flag::ZF);
    let taken = count != 0
        && match insn.mnemonic {
            Mnemonic::Loope => zf,
            Mnemonic::Loopne => !zf,
            _ => true,
        };
    if taken {
        jmp(cpu, insn)?;
    }
    Ok(())
}

/// INT n and INT3; the pushed IP is the following instruction
pub fn int<M: Memory>(cpu: &mut Cpu386<M>, insn: &Instruction) -> ExecResult {
    let vector = insn.op(0).read(cpu) as u8;
    cpu.real_mode_interrupt(vector, false, 0)?;
    Ok(())
}

/// ICEBP
pub fn int1<M: Memory>(cpu: &mut Cpu386<M>) -> ExecResult {
    cpu.real_mode_interrupt(vectors::DEBUG, false, 0)?;
    Ok(())
}

pub fn into<M: Memory>(cpu: &mut Cpu386<M>) -> ExecResult {
    if cpu.regs.flags.get(Flag::OF) {
        cpu.real_mode_interrupt(vectors::OVERFLOW, false, 0)?;
    }
    Ok(())
}

pub fn iret<M: Memory>(cpu: &mut Cpu386<M>, insn: &Instruction) -> ExecResult {
    if cpu.regs.protected_mode() {
        return Err(Fault::Unsupported(UnsupportedFeature::ProtectedMode));
    }
    cpu.interrupt_return(insn.operand_size == 4);
    Ok(())
}

/// ENTER size, level
pub fn enter<M: Memory>(cpu: &mut Cpu386<M>, insn: &Instruction) -> ExecResult {
    let size = insn.operand_size;
    let frame_size = insn.op(0).read(cpu) & 0xFFFF;
    let level = insn.op(1).read(cpu) & 0x1F;
    let (sp_reg, mask) = cpu.stack_pointer();
    let bp_reg = RegId::gpr(5, size);

    let bp = cpu.regs.read(bp_reg);
    cpu.push_stack(bp, size);
    let frame = cpu.regs.read(sp_reg);

    if level > 0 {
        let mut outer = bp;
        for _ in 1..level {
            outer = outer.wrapping_sub(size as u32) & mask;
            let saved = cpu.read_segment(Seg::SS, outer, size);
            cpu.push_stack(saved, size);
        }
        cpu.push_stack(frame, size);
    }

    cpu.regs.write(bp_reg, frame);
    let sp = cpu.regs.read(sp_reg).wrapping_sub(frame_size) & mask;
    cpu.regs.write(sp_reg, sp);
    Ok(())
}

pub fn leave<M: Memory>(cpu: &mut Cpu386<M>, insn: &Instruction) -> ExecResult {
    let (sp_reg, mask) = cpu.stack_pointer();
    let bp = cpu.regs.read(RegId::EBP) & mask;
    cpu.regs.write(sp_reg, bp);
    let saved = cpu.pop_stack(insn.operand_size);
    cpu.regs.write(RegId::gpr(5, insn.operand_size), saved);
    Ok(())
}

/// #BR when the signed index lies outside the bounds pair in memory
pub fn bound<M: Memory>(cpu: &mut Cpu386<M>, insn: &Instruction) -> ExecResult {
    let size = insn.op(0).size;
    let index = to_signed(insn.op(0).read(cpu), size);
    let OperandKind::Memory(mem) = insn.op(1).kind else {
        return Err(Fault::invalid_opcode());
    };
    let ea = mem.offset(&cpu.regs);
    let lower = to_signed(cpu.read_segment(mem.segment, ea, size), size);
    let upper = to_signed(
        cpu.read_segment(mem.segment, ea.wrapping_add(size as u32), size),
        size,
    );
    if index < lower || index > upper {
        return Err(Fault::exception(vectors::BOUND_RANGE));
    }
    Ok(())
}

pub fn hlt<M: Memory>(cpu: &mut Cpu386<M>) -> ExecResult {
    cpu.halt();
    Ok(())
}
