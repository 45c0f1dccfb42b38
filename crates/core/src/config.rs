//! CPU configuration
//!
//! Loaded from JSON by the host; every field has a default so a partial
//! file (or `{}`) is valid.

use crate::flags::Flag;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Processor model; decides which opcodes decode and which EFLAGS bits toggle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CpuModel {
    #[default]
    Intel80386,
    Intel80486,
}

impl CpuModel {
    pub fn name(self) -> &'static str {
        match self {
            CpuModel::Intel80386 => "80386",
            CpuModel::Intel80486 => "80486",
        }
    }

    pub fn supports_486_instructions(self) -> bool {
        self == CpuModel::Intel80486
    }

    /// Value left in EDX after reset (family/model/stepping)
    pub fn signature(self) -> u32 {
        match self {
            CpuModel::Intel80386 => 0x0308,
            CpuModel::Intel80486 => 0x0402,
        }
    }

    /// EFLAGS bits POPF/IRET/SAHF-style loads may change in real mode
    pub fn writable_flags(self) -> u32 {
        let base = 0x0000_7FD5;
        match self {
            CpuModel::Intel80386 => base,
            CpuModel::Intel80486 => base | Flag::AC.mask() | Flag::ID.mask(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CpuConfig {
    pub model: CpuModel,
    /// Instructions between asynchronous event checks
    pub batch_size: u32,
    /// Wall-clock length of one `run()` slice
    pub slice_duration_ms: u64,
    pub instruction_cache: bool,
    /// When false, linear addresses wrap at 1 MiB
    pub a20_enabled: bool,
}

impl Default for CpuConfig {
    fn default() -> Self {
        Self {
            model: CpuModel::default(),
            batch_size: 100,
            slice_duration_ms: 10,
            instruction_cache: true,
            a20_enabled: true,
        }
    }
}

impl CpuConfig {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn slice_duration(&self) -> Duration {
        Duration::from_millis(self.slice_duration_ms)
    }
}
