//! Real-mode 386/486 CPU core.
//!
//! The crate decodes and executes x86 instructions against a [`bus::Memory`]
//! supplied by the host. Ports, the interrupt controller and DMA are reached
//! through the traits in [`bus`]; [`cpu::Cpu386`] ties them together and runs
//! in time slices.
//!
//! ```no_run
//! use emu_x86::bus::ArrayMemory;
//! use emu_x86::cpu::Cpu386;
//!
//! let mut memory = ArrayMemory::new();
//! memory.load_program(0x7C00, &[0xB8, 0x34, 0x12, 0xF4]); // MOV AX,1234h; HLT
//! let mut cpu = Cpu386::new(memory);
//! cpu.jump_to(0x0000, 0x7C00);
//! cpu.run().unwrap();
//! ```

pub mod bus;
pub mod cache;
pub mod config;
pub mod cpu;
pub mod decoder;
pub mod error;
pub mod execute;
pub mod flags;
pub mod instruction;
pub mod logging;
pub mod mnemonic;
pub mod registers;
pub mod timers;


pub use bus::{ArrayMemory, DmaController, InterruptController, Memory, NullIo, PortIo};
pub use config::{CpuConfig, CpuModel};
pub use cpu::{Cpu386, CpuState, RunState, SliceExit};
pub use error::{CpuError, DecodeError, Fault, UnsupportedFeature};
pub use instruction::{Instruction, Operand, OperandKind};
pub use mnemonic::Mnemonic;
pub use registers::{RegId, Seg};

/// A CPU-like component that can be stepped; returns the work done.
pub trait Cpu {
    fn reset(&mut self);
    fn step(&mut self) -> u32;
}
