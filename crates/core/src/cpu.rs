//! The 386/486 real-mode CPU core
//!
//! [`Cpu386`] owns the register file, the instruction cache and the memory,
//! and borrows the rest of the machine through the traits in [`crate::bus`].
//! One call to [`Cpu386::run`] executes a time slice: instructions run in
//! batches of `batch_size`, and between batches the core services
//! asynchronous events (NMI, one PIC interrupt, DMA, timers) and checks the
//! slice deadline. Nothing preempts an instruction in flight.

use crate::bus::{DmaController, InterruptController, Memory, NullIo, PortIo};
use crate::cache::{CacheStats, InstructionCache};
use crate::config::{CpuConfig, CpuModel};
use crate::decoder::Decoder;
use crate::error::{vectors, CpuError, DecodeError, Fault, UnsupportedFeature};
use crate::execute;
use crate::flags::Flag;
use crate::instruction::Instruction;
use crate::logging::{log, LogCategory, LogConfig, LogLevel};
use crate::registers::{cr0, width_mask, DescriptorTable, RegId, Registers, Seg, SegRegister};
use crate::timers::Timers;
use serde::{Deserialize, Serialize};
use std::rc::Rc;
use std::time::Instant;

/// Linear address mask with the A20 line forced low
const A20_DISABLED_MASK: u32 = 0xFFEF_FFFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunState {
    Running,
    Halted,
}

/// Why [`Cpu386::run`] returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SliceExit {
    /// The slice deadline passed
    Yield,
    /// HLT with nothing to wake the CPU
    Halted,
    /// The instruction budget passed to [`Cpu386::run_with_budget`] ran out
    BudgetExhausted,
}

/// Diagnostic snapshot of the architectural state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CpuState {
    pub model: CpuModel,
    pub eax: u32,
    pub ecx: u32,
    pub edx: u32,
    pub ebx: u32,
    pub esp: u32,
    pub ebp: u32,
    pub esi: u32,
    pub edi: u32,
    pub eip: u32,
    pub eflags: u32,
    pub es: u16,
    pub cs: u16,
    pub ss: u16,
    pub ds: u16,
    pub fs: u16,
    pub gs: u16,
    pub cr0: u32,
    pub idtr: DescriptorTable,
    pub gdtr: DescriptorTable,
    pub state: RunState,
    pub instructions: u64,
    pub cache: CacheStats,
    pub fatal: Option<String>,
}

pub struct Cpu386<M: Memory> {
    pub regs: Registers,
    pub memory: M,
    config: CpuConfig,
    decoder: Decoder,
    cache: InstructionCache,
    io: Box<dyn PortIo>,
    pic: Option<Box<dyn InterruptController>>,
    dma: Option<Box<dyn DmaController>>,
    timers: Timers,
    state: RunState,
    nmi_pending: bool,
    reset_pending: bool,
    trap_pending: bool,
    /// Set by STI, MOV SS and POP SS: no maskable interrupt before the next instruction
    interrupt_shadow: bool,
    a20_mask: u32,
    fatal: Option<CpuError>,
    instructions: u64,
    /// EIP of the instruction being executed, for fault restarts
    insn_start: u32,
    started: Instant,
}

impl<M: Memory> Cpu386<M> {
    pub fn new(memory: M) -> Self {
        Self::with_config(memory, CpuConfig::default())
    }

    pub fn with_config(memory: M, config: CpuConfig) -> Self {
        let mut cpu = Self {
            regs: Registers::new(),
            memory,
            decoder: Decoder::new(config.model),
            cache: InstructionCache::new(config.instruction_cache),
            config,
            io: Box::new(NullIo),
            pic: None,
            dma: None,
            timers: Timers::new(),
            state: RunState::Running,
            nmi_pending: false,
            reset_pending: false,
            trap_pending: false,
            interrupt_shadow: false,
            a20_mask: 0xFFFF_FFFF,
            fatal: None,
            instructions: 0,
            insn_start: 0,
            started: Instant::now(),
        };
        cpu.init();
        cpu
    }

    /// Power-on state: F000:FFF0, EDX holds the CPU signature
    pub fn init(&mut self) {
        let model = self.config.model;
        self.regs = Registers::new();
        self.regs.write(RegId::CS, 0xF000);
        self.regs.set_eip(0xFFF0);
        self.regs.write(RegId::EDX, model.signature());
        self.regs.write(
            RegId::CR0,
            match model {
                CpuModel::Intel80386 => cr0::ET,
                CpuModel::Intel80486 => 0x6000_0000 | cr0::ET,
            },
        );
        self.regs.idtr = DescriptorTable {
            base: 0,
            limit: 0x03FF,
        };
        self.state = RunState::Running;
        self.nmi_pending = false;
        self.reset_pending = false;
        self.trap_pending = false;
        self.interrupt_shadow = false;
        self.a20_mask = if self.config.a20_enabled {
            0xFFFF_FFFF
        } else {
            A20_DISABLED_MASK
        };
        self.fatal = None;
        self.instructions = 0;
        self.insn_start = 0xFFF0;
        self.cache.clear();
    }

    pub fn reset(&mut self) {
        log(LogCategory::CPU, LogLevel::Info, || "CPU reset".to_string());
        self.init();
    }

    pub fn config(&self) -> &CpuConfig {
        &self.config
    }

    pub fn model(&self) -> CpuModel {
        self.config.model
    }

    pub fn run_state(&self) -> RunState {
        self.state
    }

    pub fn is_halted(&self) -> bool {
        self.state == RunState::Halted
    }

    /// Instructions retired since init
    pub fn instructions(&self) -> u64 {
        self.instructions
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// The sticky fatal error, if emulation has stopped
    pub fn fatal_error(&self) -> Option<&CpuError> {
        self.fatal.as_ref()
    }

    pub fn set_io(&mut self, io: Box<dyn PortIo>) {
        self.io = io;
    }

    pub fn attach_pic(&mut self, pic: Box<dyn InterruptController>) {
        self.pic = Some(pic);
    }

    pub fn attach_dma(&mut self, dma: Box<dyn DmaController>) {
        self.dma = Some(dma);
    }

    pub fn timers_mut(&mut self) -> &mut Timers {
        &mut self.timers
    }

    pub fn halt(&mut self) {
        self.state = RunState::Halted;
    }

    pub fn resume(&mut self) {
        self.state = RunState::Running;
    }

    pub fn raise_nmi(&mut self) {
        self.nmi_pending = true;
    }

    /// Reset and machine-check requests are reported but not acted on
    pub fn request_reset(&mut self) {
        self.reset_pending = true;
    }

    pub fn set_a20(&mut self, enabled: bool) {
        let mask = if enabled {
            0xFFFF_FFFF
        } else {
            A20_DISABLED_MASK
        };
        if mask != self.a20_mask {
            self.a20_mask = mask;
            self.cache.clear();
        }
    }

    pub fn a20_enabled(&self) -> bool {
        self.a20_mask == 0xFFFF_FFFF
    }

    /// Point CS:IP at `selector:offset` using real-mode segment semantics
    pub fn jump_to(&mut self, selector: u16, offset: u32) {
        self.regs.write(RegId::CS, selector as u32);
        self.regs.set_eip(offset);
        self.state = RunState::Running;
    }

    pub(crate) fn set_interrupt_shadow(&mut self) {
        self.interrupt_shadow = true;
    }

    pub(crate) fn writable_flags(&self) -> u32 {
        self.config.model.writable_flags()
    }

    pub(crate) fn insn_start(&self) -> u32 {
        self.insn_start
    }

    // Memory access -------------------------------------------------------

    pub fn read_linear(&self, addr: u32, len: u8) -> u32 {
        (0..len as u32).fold(0, |acc, i| {
            let byte = self.memory.read(addr.wrapping_add(i) & self.a20_mask);
            acc | (byte as u32) << (8 * i)
        })
    }

    /// Write memory and invalidate any cached code it overlaps
    pub fn write_linear(&mut self, addr: u32, len: u8, val: u32) {
        for i in 0..len as u32 {
            let target = addr.wrapping_add(i) & self.a20_mask;
            self.memory.write(target, (val >> (8 * i)) as u8);
            self.cache.notify_write(target, 1);
        }
    }

    /// Real mode performs no limit checks
    pub fn read_segment(&self, seg: Seg, offset: u32, len: u8) -> u32 {
        let linear = self.regs.seg(seg).linear_address(offset);
        self.read_linear(linear, len)
    }

    pub fn write_segment(&mut self, seg: Seg, offset: u32, len: u8, val: u32) {
        let linear = self.regs.seg(seg).linear_address(offset);
        self.write_linear(linear, len, val);
    }

    pub(crate) fn port_read(&mut self, port: u16, len: u8) -> u32 {
        let value = self.io.read(port, len) & width_mask(len);
        log(LogCategory::Io, LogLevel::Trace, || {
            format!("IN  port {:04X} len {} -> {:08X}", port, len, value)
        });
        value
    }

    pub(crate) fn port_write(&mut self, port: u16, val: u32, len: u8) {
        log(LogCategory::Io, LogLevel::Trace, || {
            format!("OUT port {:04X} len {} <- {:08X}", port, len, val)
        });
        self.io.write(port, val & width_mask(len), len);
    }

    // Stack ---------------------------------------------------------------

    /// SP or ESP by the stack segment's B bit, with its wrap mask
    pub(crate) fn stack_pointer(&self) -> (RegId, u32) {
        if self.regs.seg(Seg::SS).big {
            (RegId::ESP, 0xFFFF_FFFF)
        } else {
            (RegId::SP, 0xFFFF)
        }
    }

    /// Push `len` bytes on SS:(E)SP; byte pushes are widened to a word.
    ///
    /// # Panics
    /// On a width other than 1, 2 or 4, which is a bug in the caller.
    pub fn push_stack(&mut self, val: u32, len: u8) {
        let len = if len == 1 { 2 } else { len };
        assert!(len == 2 || len == 4, "push_stack: invalid width {}", len);
        let (sp_reg, mask) = self.stack_pointer();
        let sp = self.regs.read(sp_reg).wrapping_sub(len as u32) & mask;
        self.write_segment(Seg::SS, sp, len, val);
        self.regs.write(sp_reg, sp);
    }

    /// # Panics
    /// On a width other than 2 or 4, which is a bug in the caller.
    pub fn pop_stack(&mut self, len: u8) -> u32 {
        assert!(len == 2 || len == 4, "pop_stack: invalid width {}", len);
        let (sp_reg, mask) = self.stack_pointer();
        let sp = self.regs.read(sp_reg);
        let value = self.read_segment(Seg::SS, sp, len);
        self.regs.write(sp_reg, sp.wrapping_add(len as u32) & mask);
        value
    }

    // Interrupts ----------------------------------------------------------

    /// Deliver `vector` through the real-mode interrupt vector table.
    ///
    /// A vector beyond the IDTR limit becomes #GP, a #GP beyond it a double
    /// fault, and a double fault beyond it a triple fault.
    pub fn real_mode_interrupt(
        &mut self,
        vector: u8,
        push_error: bool,
        error_code: u16,
    ) -> Result<(), CpuError> {
        if self.regs.protected_mode() {
            return Err(self.unsupported(UnsupportedFeature::ProtectedMode));
        }

        let mut vector = vector;
        let mut push_error = push_error;
        loop {
            let entry = vector as u32 * 4;
            if entry + 3 > self.regs.idtr.limit as u32 {
                let escalated = self.escalate(vector)?;
                log(LogCategory::Interrupts, LogLevel::Warn, || {
                    format!(
                        "vector {:02X} outside IDT limit {:04X}, raising {:02X}",
                        vector, self.regs.idtr.limit, escalated
                    )
                });
                vector = escalated;
                push_error = false;
                continue;
            }

            let flags = self.regs.flags.value();
            let cs = self.regs.read(RegId::CS);
            let ip = self.regs.eip();
            self.push_stack(flags, 2);
            self.push_stack(cs, 2);
            self.push_stack(ip, 2);
            if push_error {
                self.push_stack(error_code as u32, 2);
            }

            let table = self.regs.idtr.base.wrapping_add(entry);
            let new_ip = self.read_linear(table, 2);
            let new_cs = self.read_linear(table.wrapping_add(2), 2);
            self.regs.write(RegId::CS, new_cs);
            if !self.regs.seg(Seg::CS).within_limit(new_ip, 1) {
                vector = self.escalate(vector)?;
                push_error = false;
                continue;
            }
            self.regs.set_eip(new_ip);

            self.regs.flags.set(Flag::IF, false);
            self.regs.flags.set(Flag::TF, false);
            self.regs.flags.set(Flag::RF, false);
            self.interrupt_shadow = false;
            self.trap_pending = false;
            self.state = RunState::Running;

            log(LogCategory::Interrupts, LogLevel::Debug, || {
                format!(
                    "INT {:02X} from {:04X}:{:04X} -> {:04X}:{:04X}",
                    vector, cs, ip, new_cs, new_ip
                )
            });
            return Ok(());
        }
    }

    fn escalate(&self, vector: u8) -> Result<u8, CpuError> {
        match vector {
            vectors::DOUBLE_FAULT => Err(CpuError::TripleFault {
                cs: self.regs.read(RegId::CS) as u16,
                eip: self.insn_start,
            }),
            vectors::GENERAL_PROTECTION => Ok(vectors::DOUBLE_FAULT),
            _ => Ok(vectors::GENERAL_PROTECTION),
        }
    }

    /// IRET: pop IP, CS and FLAGS at the operand width.
    ///
    /// The 32-bit form drops the upper half of the CS slot and leaves
    /// VM, VIF and VIP untouched.
    pub fn interrupt_return(&mut self, is32: bool) {
        let writable = self.writable_flags();
        if is32 {
            let eip = self.pop_stack(4);
            let cs = self.pop_stack(4) & 0xFFFF;
            let flags = self.pop_stack(4);
            let keep = Flag::VM.mask() | Flag::VIF.mask() | Flag::VIP.mask();
            self.regs.write(RegId::CS, cs);
            self.regs.set_eip(eip);
            self.regs.flags.load(flags, writable & !keep);
        } else {
            let ip = self.pop_stack(2);
            let cs = self.pop_stack(2);
            let flags = self.pop_stack(2);
            self.regs.write(RegId::CS, cs);
            self.regs.set_eip(ip);
            self.regs.flags.load(flags, writable & 0xFFFF);
        }
    }

    fn unsupported(&self, feature: UnsupportedFeature) -> CpuError {
        CpuError::Unsupported {
            feature,
            cs: self.regs.read(RegId::CS) as u16,
            eip: self.insn_start,
        }
    }

    fn stop(&mut self, err: CpuError) -> CpuError {
        log(LogCategory::CPU, LogLevel::Error, || format!("emulation stopped: {}", err));
        self.fatal = Some(err.clone());
        err
    }

    /// Deliver a guest-visible exception for the current instruction
    fn raise_exception(&mut self, vector: u8, error_code: Option<u16>) -> Result<(), CpuError> {
        self.regs.set_eip(self.insn_start);
        match self.real_mode_interrupt(vector, error_code.is_some(), error_code.unwrap_or(0)) {
            Ok(()) => Ok(()),
            Err(err) => Err(self.stop(err)),
        }
    }

    fn handle_fault(&mut self, fault: Fault) -> Result<(), CpuError> {
        match fault {
            Fault::Exception { vector, error_code } => {
                log(LogCategory::Interrupts, LogLevel::Debug, || {
                    format!(
                        "exception {:02X} at {:04X}:{:04X}",
                        vector,
                        self.regs.read(RegId::CS),
                        self.insn_start
                    )
                });
                self.raise_exception(vector, error_code)
            }
            Fault::Unsupported(feature) => {
                let err = self.unsupported(feature);
                Err(self.stop(err))
            }
            Fault::Fatal(err) => Err(self.stop(err)),
        }
    }

    fn handle_decode_error(&mut self, err: DecodeError) -> Result<(), CpuError> {
        log(LogCategory::Decoder, LogLevel::Debug, || {
            format!(
                "decode failed at {:04X}:{:04X}: {}",
                self.regs.read(RegId::CS),
                self.insn_start,
                err
            )
        });
        match (err.exception_vector(), err) {
            (Some(vector), _) => self.raise_exception(vector, None),
            (None, DecodeError::Unsupported(feature)) => {
                let err = self.unsupported(feature);
                Err(self.stop(err))
            }
            (None, other) => {
                log(LogCategory::Stubs, LogLevel::Error, || {
                    format!("undeliverable decode error: {}", other)
                });
                self.raise_exception(vectors::INVALID_OPCODE, None)
            }
        }
    }

    // Execution -----------------------------------------------------------

    fn fetch(&mut self) -> Result<Rc<Instruction>, DecodeError> {
        let cs = *self.regs.seg(Seg::CS);
        let eip = self.regs.eip();
        let linear = cs.linear_address(eip) & self.a20_mask;
        if let Some(insn) = self.cache.lookup(linear) {
            return Ok(insn);
        }
        let insn = self.decode_at(&cs, eip)?;
        let a20 = self.a20_mask;
        let offset_mask = width_mask(cs.address_width());
        Ok(self.cache.insert(linear, insn, |i| {
            cs.base.wrapping_add(eip.wrapping_add(i) & offset_mask) & a20
        }))
    }

    fn decode_at(&self, cs: &SegRegister, eip: u32) -> Result<Instruction, DecodeError> {
        let memory = &self.memory;
        let mask = self.a20_mask;
        let base = cs.base;
        let mut fetch = |offset: u32| memory.read(base.wrapping_add(offset) & mask);
        self.decoder.decode(&mut fetch, eip, cs.address_width())
    }

    /// Execute one instruction; a halted CPU does nothing
    pub fn step(&mut self) -> Result<(), CpuError> {
        if let Some(err) = &self.fatal {
            return Err(err.clone());
        }
        if self.state == RunState::Halted {
            return Ok(());
        }

        self.interrupt_shadow = false;
        self.insn_start = self.regs.eip();
        let insn = match self.fetch() {
            Ok(insn) => insn,
            Err(err) => return self.handle_decode_error(err),
        };

        let ip_mask = width_mask(self.regs.seg(Seg::CS).address_width());
        self.regs
            .set_eip(self.insn_start.wrapping_add(insn.length as u32) & ip_mask);
        self.instructions += 1;

        if LogConfig::global().should_log(LogCategory::CPU, LogLevel::Trace) {
            let cs = self.regs.read(RegId::CS);
            log(LogCategory::CPU, LogLevel::Trace, || {
                format!("{:04X}:{:04X}  {}", cs, self.insn_start, insn.to_asm())
            });
        }

        let result = execute::dispatch(self, &insn);
        if self.regs.flags.get(Flag::TF) {
            self.trap_pending = true;
        }
        match result {
            Ok(()) => Ok(()),
            Err(fault) => self.handle_fault(fault),
        }
    }

    /// Run up to `batch_size` instructions, stopping early on HLT
    pub fn execute_batch(&mut self) -> Result<u32, CpuError> {
        self.execute_up_to(self.config.batch_size.max(1))
    }

    fn execute_up_to(&mut self, limit: u32) -> Result<u32, CpuError> {
        let mut executed = 0;
        while executed < limit {
            if self.state == RunState::Halted {
                break;
            }
            self.step()?;
            executed += 1;
        }
        Ok(executed)
    }

    /// Service asynchronous events in priority order.
    ///
    /// At most one maskable interrupt is taken per call.
    pub fn service_events(&mut self) -> Result<(), CpuError> {
        if let Some(err) = &self.fatal {
            return Err(err.clone());
        }

        if std::mem::take(&mut self.reset_pending) {
            log(LogCategory::Stubs, LogLevel::Warn, || {
                "reset/machine-check request ignored: not emulated".to_string()
            });
        }
        if std::mem::take(&mut self.trap_pending) {
            log(LogCategory::Stubs, LogLevel::Debug, || {
                "single-step debug trap not emulated".to_string()
            });
        }

        if std::mem::take(&mut self.nmi_pending) {
            self.insn_start = self.regs.eip();
            if let Err(err) = self.real_mode_interrupt(vectors::NMI, false, 0) {
                return Err(self.stop(err));
            }
        } else if self.regs.flags.get(Flag::IF) && !self.interrupt_shadow {
            let vector = match self.pic.as_mut() {
                Some(pic) if pic.has_interrupt() => Some(pic.acknowledge_interrupt()),
                _ => None,
            };
            if let Some(vector) = vector {
                self.insn_start = self.regs.eip();
                if let Err(err) = self.real_mode_interrupt(vector, false, 0) {
                    return Err(self.stop(err));
                }
            }
        }

        if let Some(dma) = self.dma.as_mut() {
            if dma.hold_request() {
                dma.raise_hlda();
            }
        }

        let now = self.started.elapsed().as_micros() as u64;
        self.timers.fire_expired(now);
        Ok(())
    }

    /// Run one time slice
    pub fn run(&mut self) -> Result<SliceExit, CpuError> {
        self.run_with_budget(u64::MAX)
    }

    /// Run one time slice, retiring at most `budget` instructions
    pub fn run_with_budget(&mut self, budget: u64) -> Result<SliceExit, CpuError> {
        let deadline = Instant::now() + self.config.slice_duration();
        let batch = self.config.batch_size.max(1);
        let mut remaining = budget;
        loop {
            self.service_events()?;
            if self.state == RunState::Halted {
                return Ok(SliceExit::Halted);
            }
            if remaining == 0 {
                return Ok(SliceExit::BudgetExhausted);
            }
            let limit = remaining.min(batch as u64) as u32;
            remaining -= self.execute_up_to(limit)? as u64;
            if Instant::now() >= deadline {
                return Ok(SliceExit::Yield);
            }
        }
    }

    pub fn get_state(&self) -> CpuState {
        let r = &self.regs;
        CpuState {
            model: self.config.model,
            eax: r.read(RegId::EAX),
            ecx: r.read(RegId::ECX),
            edx: r.read(RegId::EDX),
            ebx: r.read(RegId::EBX),
            esp: r.read(RegId::ESP),
            ebp: r.read(RegId::EBP),
            esi: r.read(RegId::ESI),
            edi: r.read(RegId::EDI),
            eip: r.eip(),
            eflags: r.flags.value(),
            es: r.read(RegId::ES) as u16,
            cs: r.read(RegId::CS) as u16,
            ss: r.read(RegId::SS) as u16,
            ds: r.read(RegId::DS) as u16,
            fs: r.read(RegId::FS) as u16,
            gs: r.read(RegId::GS) as u16,
            cr0: r.cr0(),
            idtr: r.idtr,
            gdtr: r.gdtr,
            state: self.state,
            instructions: self.instructions,
            cache: self.cache.stats(),
            fatal: self.fatal.as_ref().map(|e| e.to_string()),
        }
    }
}

impl<M: Memory> crate::Cpu for Cpu386<M> {
    fn reset(&mut self) {
        Cpu386::reset(self);
    }

    /// One instruction per step; a stopped CPU reports no progress
    fn step(&mut self) -> u32 {
        match Cpu386::step(self) {
            Ok(()) => 1,
            Err(_) => 0,
        }
    }
}
