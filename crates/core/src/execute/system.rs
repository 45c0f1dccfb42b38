//! Flag control, FPU escapes and system registers

use super::ExecResult;
use crate::bus::Memory;
use crate::cpu::Cpu386;
use crate::error::{vectors, Fault, UnsupportedFeature};
use crate::flags::Flag;
use crate::instruction::{Instruction, OperandKind};
use crate::logging::{log, LogCategory, LogLevel};
use crate::mnemonic::Mnemonic;
use crate::registers::{cr0, DescriptorTable, RegId, Seg};

/// CLC, STC, CMC, CLD, STD, CLI, STI
pub fn flag_op<M: Memory>(cpu: &mut Cpu386<M>, insn: &Instruction) -> ExecResult {
    let flags = &mut cpu.regs.flags;
    match insn.mnemonic {
        Mnemonic::Clc => flags.set(Flag::CF, false),
        Mnemonic::Stc => flags.set(Flag::CF, true),
        Mnemonic::Cmc => {
            let cf = flags.get(Flag::CF);
            flags.set(Flag::CF, !cf);
        }
        Mnemonic::Cld => flags.set(Flag::DF, false),
        Mnemonic::Std => flags.set(Flag::DF, true),
        Mnemonic::Cli => flags.set(Flag::IF, false),
        _ => {
            flags.set(Flag::IF, true);
            cpu.set_interrupt_shadow();
        }
    }
    Ok(())
}

fn device_not_available() -> Fault {
    Fault::exception(vectors::DEVICE_NOT_AVAILABLE)
}

pub fn wait<M: Memory>(cpu: &mut Cpu386<M>) -> ExecResult {
    let control = cpu.regs.cr0();
    if control & cr0::MP != 0 && control & cr0::TS != 0 {
        return Err(device_not_available());
    }
    Ok(())
}

/// D8-DF: #NM when the FPU is emulated or switched out, otherwise unsupported
pub fn esc<M: Memory>(cpu: &mut Cpu386<M>) -> ExecResult {
    if cpu.regs.cr0() & (cr0::EM | cr0::TS) != 0 {
        return Err(device_not_available());
    }
    Err(Fault::Unsupported(UnsupportedFeature::Fpu))
}

/// Offset and segment of a pseudo-descriptor operand
fn descriptor_location<M: Memory>(
    cpu: &Cpu386<M>,
    insn: &Instruction,
) -> Result<(Seg, u32), Fault> {
    match insn.op(0).kind {
        OperandKind::Memory(mem) => Ok((mem.segment, mem.offset(&cpu.regs))),
        _ => Err(Fault::invalid_opcode()),
    }
}

/// LGDT / LIDT: 16-bit limit then base; a 16-bit operand size keeps 24 bits of base
pub fn load_table<M: Memory>(cpu: &mut Cpu386<M>, insn: &Instruction) -> ExecResult {
    let (seg, offset) = descriptor_location(cpu, insn)?;
    let limit = cpu.read_segment(seg, offset, 2) as u16;
    let mut base = cpu.read_segment(seg, offset.wrapping_add(2), 4);
    if insn.operand_size == 2 {
        base &= 0x00FF_FFFF;
    }
    let table = DescriptorTable { base, limit };
    if insn.mnemonic == Mnemonic::Lidt {
        log(LogCategory::Interrupts, LogLevel::Debug, || {
            format!("LIDT base {:08X} limit {:04X}", base, limit)
        });
        cpu.regs.idtr = table;
    } else {
        cpu.regs.gdtr = table;
    }
    Ok(())
}

pub fn store_table<M: Memory>(cpu: &mut Cpu386<M>, insn: &Instruction) -> ExecResult {
    let (seg, offset) = descriptor_location(cpu, insn)?;
    let table = if insn.mnemonic == Mnemonic::Sidt {
        cpu.regs.idtr
    } else {
        cpu.regs.gdtr
    };
    let base = if insn.operand_size == 2 {
        table.base & 0x00FF_FFFF
    } else {
        table.base
    };
    cpu.write_segment(seg, offset, 2, table.limit as u32);
    cpu.write_segment(seg, offset.wrapping_add(2), 4, base);
    Ok(())
}

/// LMSW loads MP, EM and TS; PE can be set but never cleared
pub fn lmsw<M: Memory>(cpu: &mut Cpu386<M>, insn: &Instruction) -> ExecResult {
    let value = insn.op(0).read(cpu) & 0xF;
    let current = cpu.regs.cr0();
    if value & cr0::PE != 0 && current & cr0::PE == 0 {
        return Err(Fault::Unsupported(UnsupportedFeature::ProtectedMode));
    }
    cpu.regs.write(RegId::CR0, (current & !0xF) | value | (current & cr0::PE));
    Ok(())
}

pub fn smsw<M: Memory>(cpu: &mut Cpu386<M>, insn: &Instruction) -> ExecResult {
    let value = cpu.regs.cr0() & 0xFFFF;
    insn.op(0).write(cpu, value);
    Ok(())
}

pub fn clts<M: Memory>(cpu: &mut Cpu386<M>) -> ExecResult {
    let value = cpu.regs.cr0() & !cr0::TS;
    cpu.regs.write(RegId::CR0, value);
    Ok(())
}

/// Vendor string as it lands in EBX, EDX, ECX
const VENDOR: &[u8; 12] = b"GenuineIntel";

fn vendor_word(index: usize) -> u32 {
    u32::from_le_bytes([
        VENDOR[index * 4],
        VENDOR[index * 4 + 1],
        VENDOR[index * 4 + 2],
        VENDOR[index * 4 + 3],
    ])
}

/// Leaf 0 reports the vendor and one standard leaf; leaf 1 the signature
pub fn cpuid<M: Memory>(cpu: &mut Cpu386<M>) -> ExecResult {
    let leaf = cpu.regs.read(RegId::EAX);
    let (eax, ebx, ecx, edx) = match leaf {
        0 => (1, vendor_word(0), vendor_word(2), vendor_word(1)),
        1 => (cpu.model().signature(), 0, 0, 0),
        _ => (0, 0, 0, 0),
    };
    cpu.regs.write(RegId::EAX, eax);
    cpu.regs.write(RegId::EBX, ebx);
    cpu.regs.write(RegId::ECX, ecx);
    cpu.regs.write(RegId::EDX, edx);
    Ok(())
}
