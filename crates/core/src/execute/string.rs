//! String instructions and their REP forms
//!
//! A repeated instruction runs at most [`REP_BATCH`] iterations per step.
//! When the count is not exhausted EIP is rewound to the prefix bytes so
//! the instruction resumes on the next step, which leaves a window for
//! interrupts between batches. The count register is written back after
//! every iteration.

use super::ExecResult;
use crate::bus::Memory;
use crate::cpu::Cpu386;
use crate::flags::{Flag, FlagOp};
use crate::instruction::{Instruction, RepeatPrefix};
use crate::mnemonic::Mnemonic;
use crate::registers::{width_mask, RegId, Seg};

/// Iterations of a REP instruction per step
pub const REP_BATCH: u32 = 4096;

struct StringOp {
    mnemonic: Mnemonic,
    size: u8,
    source: Seg,
    si: RegId,
    di: RegId,
    delta: u32,
}

impl StringOp {
    fn new<M: Memory>(cpu: &Cpu386<M>, insn: &Instruction) -> Self {
        let size = if insn.mnemonic == Mnemonic::Outs {
            insn.op(1).size
        } else {
            insn.op(0).size
        };
        let delta = if cpu.regs.flags.get(Flag::DF) {
            (size as u32).wrapping_neg()
        } else {
            size as u32
        };
        Self {
            mnemonic: insn.mnemonic,
            size,
            source: insn.segment_override.unwrap_or(Seg::DS),
            si: RegId::gpr(6, insn.address_size),
            di: RegId::gpr(7, insn.address_size),
            delta,
        }
    }

    fn advance<M: Memory>(&self, cpu: &mut Cpu386<M>, reg: RegId) {
        let value = cpu.regs.read(reg).wrapping_add(self.delta);
        cpu.regs.write(reg, value);
    }

    fn read_source<M: Memory>(&self, cpu: &Cpu386<M>) -> u32 {
        cpu.read_segment(self.source, cpu.regs.read(self.si), self.size)
    }

    fn read_destination<M: Memory>(&self, cpu: &Cpu386<M>) -> u32 {
        cpu.read_segment(Seg::ES, cpu.regs.read(self.di), self.size)
    }

    fn write_destination<M: Memory>(&self, cpu: &mut Cpu386<M>, value: u32) {
        let di = cpu.regs.read(self.di);
        cpu.write_segment(Seg::ES, di, self.size, value);
    }

    fn compare<M: Memory>(&self, cpu: &mut Cpu386<M>, a: u32, b: u32) {
        let result = a.wrapping_sub(b) & width_mask(self.size);
        cpu.regs.flags.set_flags(FlagOp::Sub, a, b, result, self.size);
    }

    /// One element
    fn iterate<M: Memory>(&self, cpu: &mut Cpu386<M>) {
        let acc = RegId::gpr(0, self.size);
        match self.mnemonic {
            Mnemonic::Movs => {
                let value = self.read_source(cpu);
                self.write_destination(cpu, value);
                self.advance(cpu, self.si);
                self.advance(cpu, self.di);
            }
            Mnemonic::Cmps => {
                let a = self.read_source(cpu);
                let b = self.read_destination(cpu);
                self.compare(cpu, a, b);
                self.advance(cpu, self.si);
                self.advance(cpu, self.di);
            }
            Mnemonic::Stos => {
                let value = cpu.regs.read(acc);
                self.write_destination(cpu, value);
                self.advance(cpu, self.di);
            }
            Mnemonic::Lods => {
                let value = self.read_source(cpu);
                cpu.regs.write(acc, value);
                self.advance(cpu, self.si);
            }
            Mnemonic::Scas => {
                let a = cpu.regs.read(acc);
                let b = self.read_destination(cpu);
                self.compare(cpu, a, b);
                self.advance(cpu, self.di);
            }
            Mnemonic::Ins => {
                let port = cpu.regs.read(RegId::DX) as u16;
                let value = cpu.port_read(port, self.size);
                self.write_destination(cpu, value);
                self.advance(cpu, self.di);
            }
            _ => {
                let port = cpu.regs.read(RegId::DX) as u16;
                let value = self.read_source(cpu);
                cpu.port_write(port, value, self.size);
                self.advance(cpu, self.si);
            }
        }
    }

    fn compares(&self) -> bool {
        matches!(self.mnemonic, Mnemonic::Cmps | Mnemonic::Scas)
    }
}

pub fn execute<M: Memory>(cpu: &mut Cpu386<M>, insn: &Instruction) -> ExecResult {
    let op = StringOp::new(cpu, insn);
    if insn.repeat == RepeatPrefix::None {
        op.iterate(cpu);
        return Ok(());
    }

    let counter = insn.count_register();
    let mut done = 0;
    loop {
        let count = cpu.regs.read(counter);
        if count == 0 {
            break;
        }
        op.iterate(cpu);
        cpu.regs.write(counter, count - 1);

        if op.compares() {
            let zf = cpu.regs.flags.get(Flag::ZF);
            let stop = match insn.repeat {
                RepeatPrefix::Repne => zf,
                _ => !zf,
            };
            if stop {
                break;
            }
        }

        done += 1;
        if done >= REP_BATCH && count > 1 {
            let start = cpu.insn_start();
            cpu.regs.set_eip(start);
            break;
        }
    }
    Ok(())
}
