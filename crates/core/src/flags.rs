//! EFLAGS with lazily evaluated arithmetic flags
//!
//! Flag-affecting instructions do not compute CF/PF/AF/ZF/SF/OF. They record
//! a [`FlagSnapshot`] of the operation class, inputs and result, and mark the
//! bits the class defines as dirty. A dirty bit is derived from the snapshot
//! only when something reads it, which for most instructions is never.
//!
//! The remaining bits (TF, IF, DF, IOPL, ...) are stored directly.

use crate::registers::{sign_bit, width_mask};

/// Single-bit flags in EFLAGS
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flag {
    CF = 0,
    PF = 2,
    AF = 4,
    ZF = 6,
    SF = 7,
    TF = 8,
    IF = 9,
    DF = 10,
    OF = 11,
    NT = 14,
    RF = 16,
    VM = 17,
    AC = 18,
    VIF = 19,
    VIP = 20,
    ID = 21,
}

impl Flag {
    #[inline]
    pub const fn mask(self) -> u32 {
        1 << self as u32
    }
}

/// Bits derived from the last recorded operation
pub const LAZY_MASK: u32 = Flag::CF.mask()
    | Flag::PF.mask()
    | Flag::AF.mask()
    | Flag::ZF.mask()
    | Flag::SF.mask()
    | Flag::OF.mask();

/// Bit 1 of EFLAGS is reserved and always reads as 1
pub const RESERVED_ONE: u32 = 0x0000_0002;

pub const IOPL_MASK: u32 = 0x0000_3000;

/// Operation class of the last flag-affecting instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagOp {
    Logic,
    Add,
    Adc,
    Sub,
    Sbb,
    Inc,
    Dec,
    Neg,
    Shl,
    Shr,
    Sar,
}

impl FlagOp {
    /// Lazy bits this class defines; INC and DEC leave CF alone
    pub const fn affected(self) -> u32 {
        match self {
            FlagOp::Inc | FlagOp::Dec => LAZY_MASK & !Flag::CF.mask(),
            _ => LAZY_MASK,
        }
    }

    const fn is_arithmetic(self) -> bool {
        matches!(
            self,
            FlagOp::Add
                | FlagOp::Adc
                | FlagOp::Sub
                | FlagOp::Sbb
                | FlagOp::Inc
                | FlagOp::Dec
                | FlagOp::Neg
        )
    }
}

/// Inputs and result of the last flag-affecting operation
///
/// For shifts `val2` is the masked shift count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlagSnapshot {
    pub op: FlagOp,
    pub val1: u32,
    pub val2: u32,
    pub result: u32,
    pub width: u8,
}

impl FlagSnapshot {
    pub fn new(op: FlagOp, val1: u32, val2: u32, result: u32, width: u8) -> Self {
        let mask = width_mask(width);
        Self {
            op,
            val1: val1 & mask,
            val2: if matches!(op, FlagOp::Shl | FlagOp::Shr | FlagOp::Sar) {
                val2
            } else {
                val2 & mask
            },
            result: result & mask,
            width,
        }
    }

    pub fn carry(&self) -> bool {
        let (a, b, r) = (self.val1, self.val2, self.result);
        let mask = width_mask(self.width);
        let bits = self.width as u32 * 8;
        match self.op {
            FlagOp::Logic => false,
            FlagOp::Add | FlagOp::Inc => r < a,
            FlagOp::Adc => {
                let carry_in = r.wrapping_sub(a).wrapping_sub(b) & mask;
                if carry_in != 0 {
                    r <= a
                } else {
                    r < a
                }
            }
            FlagOp::Sub | FlagOp::Dec | FlagOp::Neg => a < b,
            FlagOp::Sbb => {
                let borrow_in = a.wrapping_sub(b).wrapping_sub(r) & mask;
                (a as u64) < (b as u64) + (borrow_in as u64 & 1)
            }
            FlagOp::Shl => {
                if b == 0 || b > bits {
                    false
                } else {
                    ((a as u64) << b) >> bits & 1 != 0
                }
            }
            FlagOp::Shr => b != 0 && ((a as u64) >> (b - 1)) & 1 != 0,
            FlagOp::Sar => {
                if b == 0 {
                    return false;
                }
                let signed = sign_extend_to_i64(a, self.width);
                (signed >> (b - 1).min(63)) & 1 != 0
            }
        }
    }

    pub fn parity(&self) -> bool {
        (self.result as u8).count_ones() % 2 == 0
    }

    pub fn adjust(&self) -> bool {
        self.op.is_arithmetic() && (self.val1 ^ self.val2 ^ self.result) & 0x10 != 0
    }

    pub fn zero(&self) -> bool {
        self.result == 0
    }

    pub fn sign(&self) -> bool {
        self.result & sign_bit(self.width) != 0
    }

    pub fn overflow(&self) -> bool {
        let (a, b, r) = (self.val1, self.val2, self.result);
        let sign = sign_bit(self.width);
        match self.op {
            FlagOp::Logic => false,
            FlagOp::Add | FlagOp::Adc | FlagOp::Inc => (a ^ r) & (b ^ r) & sign != 0,
            FlagOp::Sub | FlagOp::Sbb | FlagOp::Dec | FlagOp::Neg => {
                (a ^ b) & (a ^ r) & sign != 0
            }
            FlagOp::Shl => (r & sign != 0) != self.carry(),
            FlagOp::Shr | FlagOp::Sar => (r ^ a) & sign != 0,
        }
    }

    /// Compute every lazy bit selected by `mask`
    fn materialize(&self, mask: u32) -> u32 {
        let mut bits = 0;
        let mut put = |flag: Flag, on: bool| {
            if mask & flag.mask() != 0 && on {
                bits |= flag.mask();
            }
        };
        put(Flag::CF, self.carry());
        put(Flag::PF, self.parity());
        put(Flag::AF, self.adjust());
        put(Flag::ZF, self.zero());
        put(Flag::SF, self.sign());
        put(Flag::OF, self.overflow());
        bits
    }
}

fn sign_extend_to_i64(value: u32, width: u8) -> i64 {
    match width {
        1 => value as u8 as i8 as i64,
        2 => value as u16 as i16 as i64,
        _ => value as i32 as i64,
    }
}

/// Jcc / SETcc condition, in opcode low-nibble order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cond {
    O,
    NO,
    B,
    AE,
    E,
    NE,
    BE,
    A,
    S,
    NS,
    P,
    NP,
    L,
    GE,
    LE,
    G,
}

impl Cond {
    pub const fn from_index(index: u8) -> Cond {
        match index & 0x0F {
            0x0 => Cond::O,
            0x1 => Cond::NO,
            0x2 => Cond::B,
            0x3 => Cond::AE,
            0x4 => Cond::E,
            0x5 => Cond::NE,
            0x6 => Cond::BE,
            0x7 => Cond::A,
            0x8 => Cond::S,
            0x9 => Cond::NS,
            0xA => Cond::P,
            0xB => Cond::NP,
            0xC => Cond::L,
            0xD => Cond::GE,
            0xE => Cond::LE,
            _ => Cond::G,
        }
    }

    pub const fn suffix(self) -> &'static str {
        match self {
            Cond::O => "O",
            Cond::NO => "NO",
            Cond::B => "B",
            Cond::AE => "AE",
            Cond::E => "E",
            Cond::NE => "NE",
            Cond::BE => "BE",
            Cond::A => "A",
            Cond::S => "S",
            Cond::NS => "NS",
            Cond::P => "P",
            Cond::NP => "NP",
            Cond::L => "L",
            Cond::GE => "GE",
            Cond::LE => "LE",
            Cond::G => "G",
        }
    }
}

/// The EFLAGS register
#[derive(Debug, Clone)]
pub struct Flags {
    /// Stored bits; lazy bits listed in `dirty` are stale here
    bits: u32,
    dirty: u32,
    last: FlagSnapshot,
}

impl Default for Flags {
    fn default() -> Self {
        Self::new()
    }
}

impl Flags {
    pub fn new() -> Self {
        Self {
            bits: RESERVED_ONE,
            dirty: 0,
            last: FlagSnapshot::new(FlagOp::Logic, 0, 0, 0, 4),
        }
    }

    #[inline]
    pub fn get(&self, flag: Flag) -> bool {
        let mask = flag.mask();
        if self.dirty & mask != 0 {
            self.last.materialize(mask) != 0
        } else {
            self.bits & mask != 0
        }
    }

    #[inline]
    pub fn set(&mut self, flag: Flag, on: bool) {
        let mask = flag.mask();
        self.dirty &= !mask;
        if on {
            self.bits |= mask;
        } else {
            self.bits &= !mask;
        }
    }

    pub fn iopl(&self) -> u8 {
        ((self.bits & IOPL_MASK) >> 12) as u8
    }

    /// The last recorded operation
    pub fn snapshot(&self) -> &FlagSnapshot {
        &self.last
    }

    fn flush(&mut self) {
        if self.dirty != 0 {
            let computed = self.last.materialize(self.dirty);
            self.bits = (self.bits & !self.dirty) | computed;
            self.dirty = 0;
        }
    }

    /// Materialize the whole register
    pub fn value(&self) -> u32 {
        let computed = self.last.materialize(self.dirty);
        (self.bits & !self.dirty) | computed | RESERVED_ONE
    }

    /// Replace the bits selected by `writable` and discard the snapshot
    pub fn load(&mut self, value: u32, writable: u32) {
        self.flush();
        self.bits = (self.bits & !writable) | (value & writable) | RESERVED_ONE;
    }

    fn record(&mut self, snapshot: FlagSnapshot) {
        let affected = snapshot.op.affected();
        let carried = self.dirty & !affected;
        if carried != 0 {
            let computed = self.last.materialize(carried);
            self.bits = (self.bits & !carried) | computed;
        }
        self.last = snapshot;
        self.dirty = affected;
    }

    /// Two-operand operations and shifts by an explicit count
    pub fn set_flags(&mut self, op: FlagOp, val1: u32, val2: u32, result: u32, width: u8) {
        self.record(FlagSnapshot::new(op, val1, val2, result, width));
    }

    /// Single operand with an implied second operand of 1 (shift-by-one forms)
    pub fn set_flags_op1(&mut self, op: FlagOp, op1: u32, result: u32, width: u8) {
        self.record(FlagSnapshot::new(op, op1, 1, result, width));
    }

    /// Single operand subtracted from an implied zero (NEG)
    pub fn set_flags_op2(&mut self, op: FlagOp, op2: u32, result: u32, width: u8) {
        self.record(FlagSnapshot::new(op, 0, op2, result, width));
    }

    /// Result-only operations; INC/DEC recover the original operand
    pub fn set_flags_result(&mut self, op: FlagOp, result: u32, width: u8) {
        let mask = width_mask(width);
        let snapshot = match op {
            FlagOp::Inc => FlagSnapshot::new(op, result.wrapping_sub(1) & mask, 1, result, width),
            FlagOp::Dec => FlagSnapshot::new(op, result.wrapping_add(1) & mask, 1, result, width),
            _ => FlagSnapshot::new(op, result, 0, result, width),
        };
        self.record(snapshot);
    }

    pub fn condition(&self, cond: Cond) -> bool {
        match cond {
            Cond::O => self.get(Flag::OF),
            Cond::NO => !self.get(Flag::OF),
            Cond::B => self.get(Flag::CF),
            Cond::AE => !self.get(Flag::CF),
            Cond::E => self.get(Flag::ZF),
            Cond::NE => !self.get(Flag::ZF),
            Cond::BE => self.get(Flag::CF) || self.get(Flag::ZF),
            Cond::A => !self.get(Flag::CF) && !self.get(Flag::ZF),
            Cond::S => self.get(Flag::SF),
            Cond::NS => !self.get(Flag::SF),
            Cond::P => self.get(Flag::PF),
            Cond::NP => !self.get(Flag::PF),
            Cond::L => self.get(Flag::SF) != self.get(Flag::OF),
            Cond::GE => self.get(Flag::SF) == self.get(Flag::OF),
            Cond::LE => self.get(Flag::ZF) || self.get(Flag::SF) != self.get(Flag::OF),
            Cond::G => !self.get(Flag::ZF) && self.get(Flag::SF) == self.get(Flag::OF),
        }
    }
}
