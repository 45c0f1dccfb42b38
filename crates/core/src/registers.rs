//! Register model
//!
//! The 32-bit general registers own their storage. The 16-bit and 8-bit
//! names (AX, AL, AH, SI, ...) are [`SubRegister`] views described by a
//! parent index, a shift and a mask, so a write through any alias is visible
//! through every other alias of the same parent immediately.
//!
//! Every addressable register is named by [`RegId`]; [`Registers::read`] and
//! [`Registers::write`] resolve an id through a static view table.

use crate::flags::Flags;
use serde::{Deserialize, Serialize};

/// Value mask for an operand width in bytes (1, 2 or 4)
#[inline]
pub const fn width_mask(size: u8) -> u32 {
    match size {
        1 => 0xFF,
        2 => 0xFFFF,
        _ => 0xFFFF_FFFF,
    }
}

/// Sign bit for an operand width in bytes
#[inline]
pub const fn sign_bit(size: u8) -> u32 {
    match size {
        1 => 0x80,
        2 => 0x8000,
        _ => 0x8000_0000,
    }
}

/// Segment register index, in ModRM `sreg` encoding order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Seg {
    ES = 0,
    CS = 1,
    SS = 2,
    DS = 3,
    FS = 4,
    GS = 5,
}

impl Seg {
    pub const ALL: [Seg; 6] = [Seg::ES, Seg::CS, Seg::SS, Seg::DS, Seg::FS, Seg::GS];

    pub const fn from_index(index: u8) -> Option<Seg> {
        match index {
            0 => Some(Seg::ES),
            1 => Some(Seg::CS),
            2 => Some(Seg::SS),
            3 => Some(Seg::DS),
            4 => Some(Seg::FS),
            5 => Some(Seg::GS),
            _ => None,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Seg::ES => "ES",
            Seg::CS => "CS",
            Seg::SS => "SS",
            Seg::DS => "DS",
            Seg::FS => "FS",
            Seg::GS => "GS",
        }
    }

    pub const fn reg(self) -> RegId {
        match self {
            Seg::ES => RegId::ES,
            Seg::CS => RegId::CS,
            Seg::SS => RegId::SS,
            Seg::DS => RegId::DS,
            Seg::FS => RegId::FS,
            Seg::GS => RegId::GS,
        }
    }
}

/// Every register an operand can name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegId {
    AL,
    CL,
    DL,
    BL,
    AH,
    CH,
    DH,
    BH,
    AX,
    CX,
    DX,
    BX,
    SP,
    BP,
    SI,
    DI,
    EAX,
    ECX,
    EDX,
    EBX,
    ESP,
    EBP,
    ESI,
    EDI,
    ES,
    CS,
    SS,
    DS,
    FS,
    GS,
    CR0,
    CR2,
    CR3,
    DR0,
    DR1,
    DR2,
    DR3,
    DR6,
    DR7,
}

const GPR8: [RegId; 8] = [
    RegId::AL,
    RegId::CL,
    RegId::DL,
    RegId::BL,
    RegId::AH,
    RegId::CH,
    RegId::DH,
    RegId::BH,
];
const GPR16: [RegId; 8] = [
    RegId::AX,
    RegId::CX,
    RegId::DX,
    RegId::BX,
    RegId::SP,
    RegId::BP,
    RegId::SI,
    RegId::DI,
];
const GPR32: [RegId; 8] = [
    RegId::EAX,
    RegId::ECX,
    RegId::EDX,
    RegId::EBX,
    RegId::ESP,
    RegId::EBP,
    RegId::ESI,
    RegId::EDI,
];

impl RegId {
    /// General register by ModRM encoding and width in bytes
    pub const fn gpr(index: u8, size: u8) -> RegId {
        let i = (index & 7) as usize;
        match size {
            1 => GPR8[i],
            2 => GPR16[i],
            _ => GPR32[i],
        }
    }

    /// Control register by ModRM encoding (CR0, CR2, CR3 exist on a 386/486)
    pub const fn control(index: u8) -> Option<RegId> {
        match index {
            0 => Some(RegId::CR0),
            2 => Some(RegId::CR2),
            3 => Some(RegId::CR3),
            _ => None,
        }
    }

    /// Debug register by ModRM encoding; DR4/DR5 alias DR6/DR7
    pub const fn debug(index: u8) -> RegId {
        match index & 7 {
            0 => RegId::DR0,
            1 => RegId::DR1,
            2 => RegId::DR2,
            3 => RegId::DR3,
            4 | 6 => RegId::DR6,
            _ => RegId::DR7,
        }
    }

    pub const fn size(self) -> u8 {
        match self.view() {
            View::Sub(i) => SUB_REGISTERS[i].width(),
            View::Segment(_) => 2,
            _ => 4,
        }
    }

    pub const fn segment(self) -> Option<Seg> {
        match self.view() {
            View::Segment(seg) => Some(seg),
            _ => None,
        }
    }

    pub const fn name(self) -> &'static str {
        match self.view() {
            View::Gpr(i) => GPR_NAMES[i],
            View::Sub(i) => SUB_REGISTERS[i].name,
            View::Segment(seg) => seg.name(),
            View::Control(i) => CR_NAMES[i],
            View::Debug(i) => DR_NAMES[i],
        }
    }

    const fn view(self) -> View {
        use RegId::*;
        match self {
            AL => View::Sub(0),
            CL => View::Sub(1),
            DL => View::Sub(2),
            BL => View::Sub(3),
            AH => View::Sub(4),
            CH => View::Sub(5),
            DH => View::Sub(6),
            BH => View::Sub(7),
            AX => View::Sub(8),
            CX => View::Sub(9),
            DX => View::Sub(10),
            BX => View::Sub(11),
            SP => View::Sub(12),
            BP => View::Sub(13),
            SI => View::Sub(14),
            DI => View::Sub(15),
            EAX => View::Gpr(0),
            ECX => View::Gpr(1),
            EDX => View::Gpr(2),
            EBX => View::Gpr(3),
            ESP => View::Gpr(4),
            EBP => View::Gpr(5),
            ESI => View::Gpr(6),
            EDI => View::Gpr(7),
            ES => View::Segment(Seg::ES),
            CS => View::Segment(Seg::CS),
            SS => View::Segment(Seg::SS),
            DS => View::Segment(Seg::DS),
            FS => View::Segment(Seg::FS),
            GS => View::Segment(Seg::GS),
            CR0 => View::Control(0),
            CR2 => View::Control(1),
            CR3 => View::Control(2),
            DR0 => View::Debug(0),
            DR1 => View::Debug(1),
            DR2 => View::Debug(2),
            DR3 => View::Debug(3),
            DR6 => View::Debug(4),
            DR7 => View::Debug(5),
        }
    }
}

/// Where a [`RegId`] lives in [`Registers`]
#[derive(Clone, Copy)]
enum View {
    Gpr(usize),
    Sub(usize),
    Segment(Seg),
    Control(usize),
    Debug(usize),
}

const GPR_NAMES: [&str; 8] = ["EAX", "ECX", "EDX", "EBX", "ESP", "EBP", "ESI", "EDI"];
const CR_NAMES: [&str; 3] = ["CR0", "CR2", "CR3"];
const DR_NAMES: [&str; 6] = ["DR0", "DR1", "DR2", "DR3", "DR6", "DR7"];

/// A register that owns its storage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Register {
    name: &'static str,
    width: u8,
    value: u32,
}

impl Register {
    pub const fn new(name: &'static str, width: u8) -> Self {
        Self {
            name,
            width,
            value: 0,
        }
    }

    pub const fn name(&self) -> &'static str {
        self.name
    }

    pub const fn width(&self) -> u8 {
        self.width
    }

    #[inline]
    pub const fn get(&self) -> u32 {
        self.value
    }

    #[inline]
    pub fn set(&mut self, value: u32) {
        self.value = value & width_mask(self.width);
    }
}

/// Aliased view of a bit-field inside a parent [`Register`]
///
/// `get(parent) == (parent.get() >> shift) & mask`. `set` rewrites only the
/// view's bits; out-of-range values wrap modulo `mask + 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubRegister {
    name: &'static str,
    parent: usize,
    shift: u8,
    mask: u32,
}

impl SubRegister {
    pub const fn new(name: &'static str, parent: usize, shift: u8, mask: u32) -> Self {
        Self {
            name,
            parent,
            shift,
            mask,
        }
    }

    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Index of the parent general register (EAX = 0 ... EDI = 7)
    pub const fn parent(&self) -> usize {
        self.parent
    }

    pub const fn width(&self) -> u8 {
        if self.mask == 0xFF {
            1
        } else {
            2
        }
    }

    #[inline]
    pub fn get(&self, parent: &Register) -> u32 {
        (parent.get() >> self.shift) & self.mask
    }

    #[inline]
    pub fn set(&self, parent: &mut Register, value: u32) {
        let field = self.mask << self.shift;
        let merged = (parent.get() & !field) | ((value & self.mask) << self.shift);
        parent.set(merged);
    }
}

/// The sixteen 8/16-bit aliases of the general registers
pub const SUB_REGISTERS: [SubRegister; 16] = [
    SubRegister::new("AL", 0, 0, 0xFF),
    SubRegister::new("CL", 1, 0, 0xFF),
    SubRegister::new("DL", 2, 0, 0xFF),
    SubRegister::new("BL", 3, 0, 0xFF),
    SubRegister::new("AH", 0, 8, 0xFF),
    SubRegister::new("CH", 1, 8, 0xFF),
    SubRegister::new("DH", 2, 8, 0xFF),
    SubRegister::new("BH", 3, 8, 0xFF),
    SubRegister::new("AX", 0, 0, 0xFFFF),
    SubRegister::new("CX", 1, 0, 0xFFFF),
    SubRegister::new("DX", 2, 0, 0xFFFF),
    SubRegister::new("BX", 3, 0, 0xFFFF),
    SubRegister::new("SP", 4, 0, 0xFFFF),
    SubRegister::new("BP", 5, 0, 0xFFFF),
    SubRegister::new("SI", 6, 0, 0xFFFF),
    SubRegister::new("DI", 7, 0, 0xFFFF),
];

/// Segment register: visible selector plus the cached descriptor
///
/// In real mode a selector load only recomputes the base; the cached limit
/// and default size survive, which is what lets code keep "unreal" limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegRegister {
    pub selector: u16,
    pub base: u32,
    /// Scaled limit (highest valid offset)
    pub limit: u32,
    /// Default operand/stack width is 32-bit (descriptor D/B bit)
    pub big: bool,
}

impl SegRegister {
    pub const fn real_mode(selector: u16) -> Self {
        Self {
            selector,
            base: (selector as u32) << 4,
            limit: 0xFFFF,
            big: false,
        }
    }

    pub fn load_real_mode(&mut self, selector: u16) {
        self.selector = selector;
        self.base = (selector as u32) << 4;
    }

    #[inline]
    pub fn linear_address(&self, offset: u32) -> u32 {
        self.base.wrapping_add(offset)
    }

    /// True when `len` bytes at `offset` fit under the cached limit
    pub fn within_limit(&self, offset: u32, len: u8) -> bool {
        (offset as u64) + (len.max(1) as u64) - 1 <= self.limit as u64
    }

    /// Address width for stack and code accesses in bytes
    pub const fn address_width(&self) -> u8 {
        if self.big {
            4
        } else {
            2
        }
    }
}

/// IDTR / GDTR contents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DescriptorTable {
    pub base: u32,
    pub limit: u16,
}

/// CR0 bits the core looks at
pub mod cr0 {
    pub const PE: u32 = 1 << 0;
    pub const MP: u32 = 1 << 1;
    pub const EM: u32 = 1 << 2;
    pub const TS: u32 = 1 << 3;
    pub const ET: u32 = 1 << 4;
    pub const PG: u32 = 1 << 31;
}

/// Complete architectural register set
#[derive(Debug, Clone)]
pub struct Registers {
    gpr: [Register; 8],
    eip: Register,
    segs: [SegRegister; 6],
    control: [Register; 3],
    debug: [Register; 6],
    pub flags: Flags,
    pub idtr: DescriptorTable,
    pub gdtr: DescriptorTable,
}

impl Default for Registers {
    fn default() -> Self {
        Self::new()
    }
}

impl Registers {
    pub fn new() -> Self {
        Self {
            gpr: [
                Register::new("EAX", 4),
                Register::new("ECX", 4),
                Register::new("EDX", 4),
                Register::new("EBX", 4),
                Register::new("ESP", 4),
                Register::new("EBP", 4),
                Register::new("ESI", 4),
                Register::new("EDI", 4),
            ],
            eip: Register::new("EIP", 4),
            segs: [SegRegister::real_mode(0); 6],
            control: [
                Register::new("CR0", 4),
                Register::new("CR2", 4),
                Register::new("CR3", 4),
            ],
            debug: [
                Register::new("DR0", 4),
                Register::new("DR1", 4),
                Register::new("DR2", 4),
                Register::new("DR3", 4),
                Register::new("DR6", 4),
                Register::new("DR7", 4),
            ],
            flags: Flags::new(),
            idtr: DescriptorTable {
                base: 0,
                limit: 0x03FF,
            },
            gdtr: DescriptorTable::default(),
        }
    }

    pub fn read(&self, id: RegId) -> u32 {
        match id.view() {
            View::Gpr(i) => self.gpr[i].get(),
            View::Sub(i) => {
                let sub = &SUB_REGISTERS[i];
                sub.get(&self.gpr[sub.parent])
            }
            View::Segment(seg) => self.segs[seg as usize].selector as u32,
            View::Control(i) => self.control[i].get(),
            View::Debug(i) => self.debug[i].get(),
        }
    }

    /// Write a register. Segment writes perform a real-mode selector load.
    pub fn write(&mut self, id: RegId, value: u32) {
        match id.view() {
            View::Gpr(i) => self.gpr[i].set(value),
            View::Sub(i) => {
                let sub = &SUB_REGISTERS[i];
                sub.set(&mut self.gpr[sub.parent], value);
            }
            View::Segment(seg) => self.segs[seg as usize].load_real_mode(value as u16),
            View::Control(i) => self.control[i].set(value),
            View::Debug(i) => self.debug[i].set(value),
        }
    }

    pub fn gpr(&self, index: usize) -> &Register {
        &self.gpr[index & 7]
    }

    #[inline]
    pub fn eip(&self) -> u32 {
        self.eip.get()
    }

    #[inline]
    pub fn set_eip(&mut self, value: u32) {
        self.eip.set(value);
    }

    #[inline]
    pub fn seg(&self, seg: Seg) -> &SegRegister {
        &self.segs[seg as usize]
    }

    #[inline]
    pub fn seg_mut(&mut self, seg: Seg) -> &mut SegRegister {
        &mut self.segs[seg as usize]
    }

    #[inline]
    pub fn cr0(&self) -> u32 {
        self.control[0].get()
    }

    pub fn protected_mode(&self) -> bool {
        self.cr0() & cr0::PE != 0
    }
}
