//! Opcode maps
//!
//! Operand descriptors follow the usual opcode-map notation: an addressing
//! method letter plus a type code (`Ev` = ModRM r/m at operand size, `Ib` =
//! byte immediate, ...). Tables are built at compile time.

use crate::flags::Cond;
use crate::mnemonic::Mnemonic;
use crate::registers::RegId;

/// How an operand is located
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// ModRM r/m: register or memory
    E,
    /// ModRM reg: general register
    G,
    /// ModRM r/m, memory only
    M,
    /// ModRM r/m, register only (mod ignored)
    R,
    /// ModRM reg: segment register
    S,
    /// ModRM reg: control register
    C,
    /// ModRM reg: debug register
    D,
    I,
    J,
    /// Direct offset in the instruction stream
    O,
    /// Far immediate `seg:offset`
    A,
    /// DS:(E)SI, segment overridable
    X,
    /// ES:(E)DI, never overridden
    Y,
    /// General register from the opcode's low three bits
    Z,
}

/// Operand width code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeCode {
    B,
    /// Byte immediate sign-extended to the operand size
    Bs,
    W,
    D,
    /// Word or dword by operand size
    V,
    /// Far pointer: 16-bit selector plus offset at operand size
    P,
    /// BOUND pair: two operand-size values
    A,
    /// 48-bit pseudo-descriptor
    S,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandSpec {
    None,
    /// Fixed register
    Reg(RegId),
    /// General register widened by the operand size (eAX..eDI)
    RegV(u8),
    /// Implied byte constant (shift count 1, INT3 vector)
    Const(u8),
    Addr(Method, SizeCode),
}

impl OperandSpec {
    pub const fn needs_modrm(self) -> bool {
        matches!(
            self,
            OperandSpec::Addr(
                Method::E | Method::G | Method::M | Method::R | Method::S | Method::C | Method::D,
                _
            )
        )
    }
}

pub type Specs = [OperandSpec; 3];

/// Opcode extension groups selected by ModRM.reg
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Group {
    G1,
    G2,
    G3Byte,
    G3Word,
    G4,
    G5,
    G6,
    G7,
    G8,
    G11,
    G1A,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entry {
    Invalid,
    Prefix,
    Escape,
    Op(Mnemonic, Specs),
    Group(Group, Specs),
}

/// A group member either inherits the parent's operands or brings its own
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    Invalid,
    Op(Mnemonic),
    With(Mnemonic, Specs),
}

const N: OperandSpec = OperandSpec::None;

pub const EB: OperandSpec = OperandSpec::Addr(Method::E, SizeCode::B);
pub const EW: OperandSpec = OperandSpec::Addr(Method::E, SizeCode::W);
pub const EV: OperandSpec = OperandSpec::Addr(Method::E, SizeCode::V);
pub const GB: OperandSpec = OperandSpec::Addr(Method::G, SizeCode::B);
pub const GV: OperandSpec = OperandSpec::Addr(Method::G, SizeCode::V);
pub const IB: OperandSpec = OperandSpec::Addr(Method::I, SizeCode::B);
pub const IBS: OperandSpec = OperandSpec::Addr(Method::I, SizeCode::Bs);
pub const IW: OperandSpec = OperandSpec::Addr(Method::I, SizeCode::W);
pub const IV: OperandSpec = OperandSpec::Addr(Method::I, SizeCode::V);
pub const JB: OperandSpec = OperandSpec::Addr(Method::J, SizeCode::B);
pub const JV: OperandSpec = OperandSpec::Addr(Method::J, SizeCode::V);
const MV: OperandSpec = OperandSpec::Addr(Method::M, SizeCode::V);
const MP: OperandSpec = OperandSpec::Addr(Method::M, SizeCode::P);
const MA: OperandSpec = OperandSpec::Addr(Method::M, SizeCode::A);
const MS: OperandSpec = OperandSpec::Addr(Method::M, SizeCode::S);
const MB: OperandSpec = OperandSpec::Addr(Method::M, SizeCode::B);
const SW: OperandSpec = OperandSpec::Addr(Method::S, SizeCode::W);
const RD: OperandSpec = OperandSpec::Addr(Method::R, SizeCode::D);
const CD: OperandSpec = OperandSpec::Addr(Method::C, SizeCode::D);
const DD: OperandSpec = OperandSpec::Addr(Method::D, SizeCode::D);
const OB: OperandSpec = OperandSpec::Addr(Method::O, SizeCode::B);
const OV: OperandSpec = OperandSpec::Addr(Method::O, SizeCode::V);
const AP: OperandSpec = OperandSpec::Addr(Method::A, SizeCode::P);
const XB: OperandSpec = OperandSpec::Addr(Method::X, SizeCode::B);
const XV: OperandSpec = OperandSpec::Addr(Method::X, SizeCode::V);
const YB: OperandSpec = OperandSpec::Addr(Method::Y, SizeCode::B);
const YV: OperandSpec = OperandSpec::Addr(Method::Y, SizeCode::V);
const ZB: OperandSpec = OperandSpec::Addr(Method::Z, SizeCode::B);
const ZV: OperandSpec = OperandSpec::Addr(Method::Z, SizeCode::V);
const ZD: OperandSpec = OperandSpec::Addr(Method::Z, SizeCode::D);
const AL: OperandSpec = OperandSpec::Reg(RegId::AL);
const CL: OperandSpec = OperandSpec::Reg(RegId::CL);
const DX: OperandSpec = OperandSpec::Reg(RegId::DX);
const EAX: OperandSpec = OperandSpec::RegV(0);
const ONE: OperandSpec = OperandSpec::Const(1);

const fn op0(m: Mnemonic) -> Entry {
    Entry::Op(m, [N, N, N])
}

const fn op1(m: Mnemonic, a: OperandSpec) -> Entry {
    Entry::Op(m, [a, N, N])
}

const fn op2(m: Mnemonic, a: OperandSpec, b: OperandSpec) -> Entry {
    Entry::Op(m, [a, b, N])
}

const fn op3(m: Mnemonic, a: OperandSpec, b: OperandSpec, c: OperandSpec) -> Entry {
    Entry::Op(m, [a, b, c])
}

const fn group(g: Group, a: OperandSpec, b: OperandSpec) -> Entry {
    Entry::Group(g, [a, b, N])
}

const fn seg_reg(id: RegId) -> OperandSpec {
    OperandSpec::Reg(id)
}

const ALU_ORDER: [Mnemonic; 8] = [
    Mnemonic::Add,
    Mnemonic::Or,
    Mnemonic::Adc,
    Mnemonic::Sbb,
    Mnemonic::And,
    Mnemonic::Sub,
    Mnemonic::Xor,
    Mnemonic::Cmp,
];

const fn build_primary() -> [Entry; 256] {
    use Mnemonic::*;
    let mut t = [Entry::Invalid; 256];

    // 00-3F: eight ALU rows of Eb,Gb / Ev,Gv / Gb,Eb / Gv,Ev / AL,Ib / eAX,Iv
    let mut row = 0;
    while row < 8 {
        let m = ALU_ORDER[row];
        let base = row * 8;
        t[base] = op2(m, EB, GB);
        t[base + 1] = op2(m, EV, GV);
        t[base + 2] = op2(m, GB, EB);
        t[base + 3] = op2(m, GV, EV);
        t[base + 4] = op2(m, AL, IB);
        t[base + 5] = op2(m, EAX, IV);
        row += 1;
    }
    t[0x06] = op1(Push, seg_reg(RegId::ES));
    t[0x07] = op1(Pop, seg_reg(RegId::ES));
    t[0x0E] = op1(Push, seg_reg(RegId::CS));
    t[0x0F] = Entry::Escape;
    t[0x16] = op1(Push, seg_reg(RegId::SS));
    t[0x17] = op1(Pop, seg_reg(RegId::SS));
    t[0x1E] = op1(Push, seg_reg(RegId::DS));
    t[0x1F] = op1(Pop, seg_reg(RegId::DS));
    t[0x26] = Entry::Prefix;
    t[0x27] = op0(Daa);
    t[0x2E] = Entry::Prefix;
    t[0x2F] = op0(Das);
    t[0x36] = Entry::Prefix;
    t[0x37] = op0(Aaa);
    t[0x3E] = Entry::Prefix;
    t[0x3F] = op0(Aas);

    let mut i = 0;
    while i < 8 {
        t[0x40 + i] = op1(Inc, ZV);
        t[0x48 + i] = op1(Dec, ZV);
        t[0x50 + i] = op1(Push, ZV);
        t[0x58 + i] = op1(Pop, ZV);
        t[0x90 + i] = op2(Xchg, ZV, EAX);
        t[0xB0 + i] = op2(Mov, ZB, IB);
        t[0xB8 + i] = op2(Mov, ZV, IV);
        i += 1;
    }

    t[0x60] = op0(Pusha);
    t[0x61] = op0(Popa);
    t[0x62] = op2(Bound, GV, MA);
    t[0x64] = Entry::Prefix;
    t[0x65] = Entry::Prefix;
    t[0x66] = Entry::Prefix;
    t[0x67] = Entry::Prefix;
    t[0x68] = op1(Push, IV);
    t[0x69] = op3(Imul, GV, EV, IV);
    t[0x6A] = op1(Push, IBS);
    t[0x6B] = op3(Imul, GV, EV, IBS);
    t[0x6C] = op2(Ins, YB, DX);
    t[0x6D] = op2(Ins, YV, DX);
    t[0x6E] = op2(Outs, DX, XB);
    t[0x6F] = op2(Outs, DX, XV);

    let mut cc = 0;
    while cc < 16 {
        t[0x70 + cc] = op1(Jcc(Cond::from_index(cc as u8)), JB);
        cc += 1;
    }

    t[0x80] = group(Group::G1, EB, IB);
    t[0x81] = group(Group::G1, EV, IV);
    t[0x82] = group(Group::G1, EB, IB);
    t[0x83] = group(Group::G1, EV, IBS);
    t[0x84] = op2(Test, EB, GB);
    t[0x85] = op2(Test, EV, GV);
    t[0x86] = op2(Xchg, EB, GB);
    t[0x87] = op2(Xchg, EV, GV);
    t[0x88] = op2(Mov, EB, GB);
    t[0x89] = op2(Mov, EV, GV);
    t[0x8A] = op2(Mov, GB, EB);
    t[0x8B] = op2(Mov, GV, EV);
    t[0x8C] = op2(Mov, EV, SW);
    t[0x8D] = op2(Lea, GV, MV);
    t[0x8E] = op2(Mov, SW, EW);
    t[0x8F] = group(Group::G1A, EV, N);

    t[0x90] = op0(Nop);
    t[0x98] = op0(Cbw);
    t[0x99] = op0(Cwd);
    t[0x9A] = op1(CallFar, AP);
    t[0x9B] = op0(Wait);
    t[0x9C] = op0(Pushf);
    t[0x9D] = op0(Popf);
    t[0x9E] = op0(Sahf);
    t[0x9F] = op0(Lahf);

    t[0xA0] = op2(Mov, AL, OB);
    t[0xA1] = op2(Mov, EAX, OV);
    t[0xA2] = op2(Mov, OB, AL);
    t[0xA3] = op2(Mov, OV, EAX);
    t[0xA4] = op2(Movs, YB, XB);
    t[0xA5] = op2(Movs, YV, XV);
    t[0xA6] = op2(Cmps, XB, YB);
    t[0xA7] = op2(Cmps, XV, YV);
    t[0xA8] = op2(Test, AL, IB);
    t[0xA9] = op2(Test, EAX, IV);
    t[0xAA] = op2(Stos, YB, AL);
    t[0xAB] = op2(Stos, YV, EAX);
    t[0xAC] = op2(Lods, AL, XB);
    t[0xAD] = op2(Lods, EAX, XV);
    t[0xAE] = op2(Scas, AL, YB);
    t[0xAF] = op2(Scas, EAX, YV);

    t[0xC0] = group(Group::G2, EB, IB);
    t[0xC1] = group(Group::G2, EV, IB);
    t[0xC2] = op1(Ret, IW);
    t[0xC3] = op0(Ret);
    t[0xC4] = op2(Les, GV, MP);
    t[0xC5] = op2(Lds, GV, MP);
    t[0xC6] = group(Group::G11, EB, IB);
    t[0xC7] = group(Group::G11, EV, IV);
    t[0xC8] = op2(Enter, IW, IB);
    t[0xC9] = op0(Leave);
    t[0xCA] = op1(RetFar, IW);
    t[0xCB] = op0(RetFar);
    t[0xCC] = op1(Int, OperandSpec::Const(3));
    t[0xCD] = op1(Int, IB);
    t[0xCE] = op0(Into);
    t[0xCF] = op0(Iret);

    t[0xD0] = group(Group::G2, EB, ONE);
    t[0xD1] = group(Group::G2, EV, ONE);
    t[0xD2] = group(Group::G2, EB, CL);
    t[0xD3] = group(Group::G2, EV, CL);
    t[0xD4] = op1(Aam, IB);
    t[0xD5] = op1(Aad, IB);
    t[0xD6] = op0(Salc);
    t[0xD7] = op0(Xlat);
    let mut esc = 0;
    while esc < 8 {
        t[0xD8 + esc] = op1(Esc, EW);
        esc += 1;
    }

    t[0xE0] = op1(Loopne, JB);
    t[0xE1] = op1(Loope, JB);
    t[0xE2] = op1(Loop, JB);
    t[0xE3] = op1(Jcxz, JB);
    t[0xE4] = op2(In, AL, IB);
    t[0xE5] = op2(In, EAX, IB);
    t[0xE6] = op2(Out, IB, AL);
    t[0xE7] = op2(Out, IB, EAX);
    t[0xE8] = op1(Call, JV);
    t[0xE9] = op1(Jmp, JV);
    t[0xEA] = op1(JmpFar, AP);
    t[0xEB] = op1(Jmp, JB);
    t[0xEC] = op2(In, AL, DX);
    t[0xED] = op2(In, EAX, DX);
    t[0xEE] = op2(Out, DX, AL);
    t[0xEF] = op2(Out, DX, EAX);

    t[0xF0] = Entry::Prefix;
    t[0xF1] = op0(Int1);
    t[0xF2] = Entry::Prefix;
    t[0xF3] = Entry::Prefix;
    t[0xF4] = op0(Hlt);
    t[0xF5] = op0(Cmc);
    t[0xF6] = group(Group::G3Byte, EB, N);
    t[0xF7] = group(Group::G3Word, EV, N);
    t[0xF8] = op0(Clc);
    t[0xF9] = op0(Stc);
    t[0xFA] = op0(Cli);
    t[0xFB] = op0(Sti);
    t[0xFC] = op0(Cld);
    t[0xFD] = op0(Std);
    t[0xFE] = group(Group::G4, EB, N);
    t[0xFF] = group(Group::G5, EV, N);
    t
}

const fn build_secondary() -> [Entry; 256] {
    use Mnemonic::*;
    let mut t = [Entry::Invalid; 256];

    t[0x00] = group(Group::G6, EW, N);
    t[0x01] = group(Group::G7, N, N);
    t[0x06] = op0(Clts);
    t[0x08] = op0(Invd);
    t[0x09] = op0(Wbinvd);
    t[0x20] = op2(Mov, RD, CD);
    t[0x21] = op2(Mov, RD, DD);
    t[0x22] = op2(Mov, CD, RD);
    t[0x23] = op2(Mov, DD, RD);

    let mut cc = 0;
    while cc < 16 {
        let cond = Cond::from_index(cc as u8);
        t[0x80 + cc] = op1(Jcc(cond), JV);
        t[0x90 + cc] = op1(Setcc(cond), EB);
        cc += 1;
    }

    t[0xA0] = op1(Push, seg_reg(RegId::FS));
    t[0xA1] = op1(Pop, seg_reg(RegId::FS));
    t[0xA2] = op0(Cpuid);
    t[0xA3] = op2(Bt, EV, GV);
    t[0xA4] = op3(Shld, EV, GV, IB);
    t[0xA5] = op3(Shld, EV, GV, CL);
    t[0xA8] = op1(Push, seg_reg(RegId::GS));
    t[0xA9] = op1(Pop, seg_reg(RegId::GS));
    t[0xAB] = op2(Bts, EV, GV);
    t[0xAC] = op3(Shrd, EV, GV, IB);
    t[0xAD] = op3(Shrd, EV, GV, CL);
    t[0xAF] = op2(Imul, GV, EV);
    t[0xB0] = op2(Cmpxchg, EB, GB);
    t[0xB1] = op2(Cmpxchg, EV, GV);
    t[0xB2] = op2(Lss, GV, MP);
    t[0xB3] = op2(Btr, EV, GV);
    t[0xB4] = op2(Lfs, GV, MP);
    t[0xB5] = op2(Lgs, GV, MP);
    t[0xB6] = op2(Movzx, GV, EB);
    t[0xB7] = op2(Movzx, GV, EW);
    t[0xBA] = group(Group::G8, EV, IB);
    t[0xBB] = op2(Btc, EV, GV);
    t[0xBC] = op2(Bsf, GV, EV);
    t[0xBD] = op2(Bsr, GV, EV);
    t[0xBE] = op2(Movsx, GV, EB);
    t[0xBF] = op2(Movsx, GV, EW);
    t[0xC0] = op2(Xadd, EB, GB);
    t[0xC1] = op2(Xadd, EV, GV);

    let mut r = 0;
    while r < 8 {
        t[0xC8 + r] = op1(Bswap, ZD);
        r += 1;
    }
    t
}

pub static PRIMARY: [Entry; 256] = build_primary();
pub static SECONDARY: [Entry; 256] = build_secondary();

const fn with1(m: Mnemonic, a: OperandSpec) -> Slot {
    Slot::With(m, [a, N, N])
}

const fn with2(m: Mnemonic, a: OperandSpec, b: OperandSpec) -> Slot {
    Slot::With(m, [a, b, N])
}

const G1: [Slot; 8] = [
    Slot::Op(Mnemonic::Add),
    Slot::Op(Mnemonic::Or),
    Slot::Op(Mnemonic::Adc),
    Slot::Op(Mnemonic::Sbb),
    Slot::Op(Mnemonic::And),
    Slot::Op(Mnemonic::Sub),
    Slot::Op(Mnemonic::Xor),
    Slot::Op(Mnemonic::Cmp),
];

/// /6 is the undocumented SAL alias of SHL
const G2: [Slot; 8] = [
    Slot::Op(Mnemonic::Rol),
    Slot::Op(Mnemonic::Ror),
    Slot::Op(Mnemonic::Rcl),
    Slot::Op(Mnemonic::Rcr),
    Slot::Op(Mnemonic::Shl),
    Slot::Op(Mnemonic::Shr),
    Slot::Op(Mnemonic::Shl),
    Slot::Op(Mnemonic::Sar),
];

const G3_BYTE: [Slot; 8] = [
    with2(Mnemonic::Test, EB, IB),
    with2(Mnemonic::Test, EB, IB),
    Slot::Op(Mnemonic::Not),
    Slot::Op(Mnemonic::Neg),
    Slot::Op(Mnemonic::Mul),
    Slot::Op(Mnemonic::Imul),
    Slot::Op(Mnemonic::Div),
    Slot::Op(Mnemonic::Idiv),
];

const G3_WORD: [Slot; 8] = [
    with2(Mnemonic::Test, EV, IV),
    with2(Mnemonic::Test, EV, IV),
    Slot::Op(Mnemonic::Not),
    Slot::Op(Mnemonic::Neg),
    Slot::Op(Mnemonic::Mul),
    Slot::Op(Mnemonic::Imul),
    Slot::Op(Mnemonic::Div),
    Slot::Op(Mnemonic::Idiv),
];

const G4: [Slot; 8] = [
    Slot::Op(Mnemonic::Inc),
    Slot::Op(Mnemonic::Dec),
    Slot::Invalid,
    Slot::Invalid,
    Slot::Invalid,
    Slot::Invalid,
    Slot::Invalid,
    Slot::Invalid,
];

const G5: [Slot; 8] = [
    Slot::Op(Mnemonic::Inc),
    Slot::Op(Mnemonic::Dec),
    with1(Mnemonic::Call, EV),
    with1(Mnemonic::CallFar, MP),
    with1(Mnemonic::Jmp, EV),
    with1(Mnemonic::JmpFar, MP),
    with1(Mnemonic::Push, EV),
    Slot::Invalid,
];

/// SLDT/STR/LLDT/LTR/VERR/VERW do not exist in real mode
const G6: [Slot; 8] = [Slot::Invalid; 8];

const G7: [Slot; 8] = [
    with1(Mnemonic::Sgdt, MS),
    with1(Mnemonic::Sidt, MS),
    with1(Mnemonic::Lgdt, MS),
    with1(Mnemonic::Lidt, MS),
    with1(Mnemonic::Smsw, EW),
    Slot::Invalid,
    with1(Mnemonic::Lmsw, EW),
    with1(Mnemonic::Invlpg, MB),
];

const G8: [Slot; 8] = [
    Slot::Invalid,
    Slot::Invalid,
    Slot::Invalid,
    Slot::Invalid,
    Slot::Op(Mnemonic::Bt),
    Slot::Op(Mnemonic::Bts),
    Slot::Op(Mnemonic::Btr),
    Slot::Op(Mnemonic::Btc),
];

const G11: [Slot; 8] = [
    Slot::Op(Mnemonic::Mov),
    Slot::Invalid,
    Slot::Invalid,
    Slot::Invalid,
    Slot::Invalid,
    Slot::Invalid,
    Slot::Invalid,
    Slot::Invalid,
];

const G1A: [Slot; 8] = [
    Slot::Op(Mnemonic::Pop),
    Slot::Invalid,
    Slot::Invalid,
    Slot::Invalid,
    Slot::Invalid,
    Slot::Invalid,
    Slot::Invalid,
    Slot::Invalid,
];

pub fn group_slot(group: Group, reg: u8) -> Slot {
    let table = match group {
        Group::G1 => &G1,
        Group::G2 => &G2,
        Group::G3Byte => &G3_BYTE,
        Group::G3Word => &G3_WORD,
        Group::G4 => &G4,
        Group::G5 => &G5,
        Group::G6 => &G6,
        Group::G7 => &G7,
        Group::G8 => &G8,
        Group::G11 => &G11,
        Group::G1A => &G1A,
    };
    table[(reg & 7) as usize]
}
