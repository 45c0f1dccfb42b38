//! Error taxonomy for the x86 core
//!
//! Three families of failure exist and they are handled very differently:
//!
//! - [`DecodeError`]: the byte stream does not form an instruction this core
//!   understands. Guest-visible: delivered as an invalid-opcode (or general
//!   protection) exception, never surfaced to the host.
//! - [`Fault`]: raised by execution handlers. Exceptions (divide error, bound
//!   range, ...) are delivered to the guest through the interrupt vector
//!   table; unsupported features stop emulation.
//! - [`CpuError`]: fatal to emulation. Returned from the run loop, sticky
//!   until the CPU is reset.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Exception vector numbers used by the core
pub mod vectors {
    pub const DIVIDE_ERROR: u8 = 0;
    pub const DEBUG: u8 = 1;
    pub const NMI: u8 = 2;
    pub const BREAKPOINT: u8 = 3;
    pub const OVERFLOW: u8 = 4;
    pub const BOUND_RANGE: u8 = 5;
    pub const INVALID_OPCODE: u8 = 6;
    pub const DEVICE_NOT_AVAILABLE: u8 = 7;
    pub const DOUBLE_FAULT: u8 = 8;
    pub const GENERAL_PROTECTION: u8 = 13;
}

/// Processor features the core deliberately does not emulate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum UnsupportedFeature {
    #[error("protected mode")]
    ProtectedMode,
    #[error("48-bit far pointer")]
    FarPointer48,
    #[error("floating point instruction")]
    Fpu,
}

/// Failure to decode the instruction stream
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Unknown, reserved, or model-gated opcode (two-byte opcodes carry 0x0F in the high byte)
    #[error("invalid opcode {opcode:#06x}")]
    InvalidOpcode { opcode: u16 },
    #[error("unsupported addressing form: {0}")]
    UnsupportedAddressing(&'static str),
    #[error("instruction longer than 15 bytes")]
    TooLong,
    #[error("unsupported feature: {0}")]
    Unsupported(UnsupportedFeature),
}

impl DecodeError {
    /// The exception vector the guest observes, or `None` when the error is fatal
    pub fn exception_vector(&self) -> Option<u8> {
        match self {
            DecodeError::InvalidOpcode { .. } | DecodeError::UnsupportedAddressing(_) => {
                Some(vectors::INVALID_OPCODE)
            }
            DecodeError::TooLong => Some(vectors::GENERAL_PROTECTION),
            DecodeError::Unsupported(_) => None,
        }
    }
}

/// Fatal emulation errors returned from the CPU loop
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CpuError {
    #[error("unsupported feature {feature} at {cs:04X}:{eip:08X}")]
    Unsupported {
        feature: UnsupportedFeature,
        cs: u16,
        eip: u32,
    },
    #[error("triple fault at {cs:04X}:{eip:08X}")]
    TripleFault { cs: u16, eip: u32 },
}

/// Result of an execution handler that did not complete normally
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// Deliver `vector` with the saved IP pointing at the faulting instruction
    Exception { vector: u8, error_code: Option<u16> },
    Unsupported(UnsupportedFeature),
    Fatal(CpuError),
}

impl Fault {
    pub const fn exception(vector: u8) -> Self {
        Fault::Exception {
            vector,
            error_code: None,
        }
    }

    pub const fn divide_error() -> Self {
        Self::exception(vectors::DIVIDE_ERROR)
    }

    pub const fn invalid_opcode() -> Self {
        Self::exception(vectors::INVALID_OPCODE)
    }

    pub const fn general_protection() -> Self {
        Self::exception(vectors::GENERAL_PROTECTION)
    }
}

impl From<CpuError> for Fault {
    fn from(err: CpuError) -> Self {
        Fault::Fatal(err)
    }
}

impl From<UnsupportedFeature> for Fault {
    fn from(feature: UnsupportedFeature) -> Self {
        Fault::Unsupported(feature)
    }
}
