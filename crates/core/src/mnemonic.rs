//! Closed set of instruction mnemonics
//!
//! The decoder resolves each opcode to a [`Mnemonic`] once; execution
//! dispatches on it with a single `match`.

use crate::flags::Cond;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mnemonic {
    Aaa,
    Aad,
    Aam,
    Aas,
    Adc,
    Add,
    And,
    Bound,
    Bsf,
    Bsr,
    Bswap,
    Bt,
    Btc,
    Btr,
    Bts,
    Call,
    CallFar,
    Cbw,
    Clc,
    Cld,
    Cli,
    Clts,
    Cmc,
    Cmp,
    Cmps,
    Cmpxchg,
    Cpuid,
    Cwd,
    Daa,
    Das,
    Dec,
    Div,
    Enter,
    Esc,
    Hlt,
    Idiv,
    Imul,
    In,
    Inc,
    Ins,
    Int,
    Int1,
    Into,
    Invd,
    Invlpg,
    Iret,
    Jcc(Cond),
    Jcxz,
    Jmp,
    JmpFar,
    Lahf,
    Lds,
    Lea,
    Leave,
    Les,
    Lfs,
    Lgdt,
    Lgs,
    Lidt,
    Lmsw,
    Lods,
    Loop,
    Loope,
    Loopne,
    Lss,
    Mov,
    Movs,
    Movsx,
    Movzx,
    Mul,
    Neg,
    Nop,
    Not,
    Or,
    Out,
    Outs,
    Pop,
    Popa,
    Popf,
    Push,
    Pusha,
    Pushf,
    Rcl,
    Rcr,
    Ret,
    RetFar,
    Rol,
    Ror,
    Sahf,
    Salc,
    Sar,
    Sbb,
    Scas,
    Setcc(Cond),
    Sgdt,
    Shl,
    Shld,
    Shr,
    Shrd,
    Sidt,
    Smsw,
    Stc,
    Std,
    Sti,
    Stos,
    Sub,
    Test,
    Wait,
    Wbinvd,
    Xadd,
    Xchg,
    Xlat,
    Xor,
}

impl Mnemonic {
    /// Base assembler name; width suffixes are added by `Instruction::to_asm`
    pub fn name(self) -> &'static str {
        use Mnemonic::*;
        match self {
            Aaa => "AAA",
            Aad => "AAD",
            Aam => "AAM",
            Aas => "AAS",
            Adc => "ADC",
            Add => "ADD",
            And => "AND",
            Bound => "BOUND",
            Bsf => "BSF",
            Bsr => "BSR",
            Bswap => "BSWAP",
            Bt => "BT",
            Btc => "BTC",
            Btr => "BTR",
            Bts => "BTS",
            Call => "CALL",
            CallFar => "CALL FAR",
            Cbw => "CBW",
            Clc => "CLC",
            Cld => "CLD",
            Cli => "CLI",
            Clts => "CLTS",
            Cmc => "CMC",
            Cmp => "CMP",
            Cmps => "CMPS",
            Cmpxchg => "CMPXCHG",
            Cpuid => "CPUID",
            Cwd => "CWD",
            Daa => "DAA",
            Das => "DAS",
            Dec => "DEC",
            Div => "DIV",
            Enter => "ENTER",
            Esc => "ESC",
            Hlt => "HLT",
            Idiv => "IDIV",
            Imul => "IMUL",
            In => "IN",
            Inc => "INC",
            Ins => "INS",
            Int => "INT",
            Int1 => "INT1",
            Into => "INTO",
            Invd => "INVD",
            Invlpg => "INVLPG",
            Iret => "IRET",
            Jcc(cond) => JCC_NAMES[cond as usize],
            Jcxz => "JCXZ",
            Jmp => "JMP",
            JmpFar => "JMP FAR",
            Lahf => "LAHF",
            Lds => "LDS",
            Lea => "LEA",
            Leave => "LEAVE",
            Les => "LES",
            Lfs => "LFS",
            Lgdt => "LGDT",
            Lgs => "LGS",
            Lidt => "LIDT",
            Lmsw => "LMSW",
            Lods => "LODS",
            Loop => "LOOP",
            Loope => "LOOPE",
            Loopne => "LOOPNE",
            Lss => "LSS",
            Mov => "MOV",
            Movs => "MOVS",
            Movsx => "MOVSX",
            Movzx => "MOVZX",
            Mul => "MUL",
            Neg => "NEG",
            Nop => "NOP",
            Not => "NOT",
            Or => "OR",
            Out => "OUT",
            Outs => "OUTS",
            Pop => "POP",
            Popa => "POPA",
            Popf => "POPF",
            Push => "PUSH",
            Pusha => "PUSHA",
            Pushf => "PUSHF",
            Rcl => "RCL",
            Rcr => "RCR",
            Ret => "RET",
            RetFar => "RETF",
            Rol => "ROL",
            Ror => "ROR",
            Sahf => "SAHF",
            Salc => "SALC",
            Sar => "SAR",
            Sbb => "SBB",
            Scas => "SCAS",
            Setcc(cond) => SETCC_NAMES[cond as usize],
            Sgdt => "SGDT",
            Shl => "SHL",
            Shld => "SHLD",
            Shr => "SHR",
            Shrd => "SHRD",
            Sidt => "SIDT",
            Smsw => "SMSW",
            Stc => "STC",
            Std => "STD",
            Sti => "STI",
            Stos => "STOS",
            Sub => "SUB",
            Test => "TEST",
            Wait => "WAIT",
            Wbinvd => "WBINVD",
            Xadd => "XADD",
            Xchg => "XCHG",
            Xlat => "XLAT",
            Xor => "XOR",
        }
    }

    pub fn requires_486(self) -> bool {
        use Mnemonic::*;
        matches!(
            self,
            Bswap | Xadd | Cmpxchg | Cpuid | Invd | Wbinvd | Invlpg
        )
    }

    /// String instructions that honour REP prefixes
    pub fn is_string(self) -> bool {
        use Mnemonic::*;
        matches!(self, Movs | Cmps | Scas | Lods | Stos | Ins | Outs)
    }
}

const JCC_NAMES: [&str; 16] = [
    "JO", "JNO", "JB", "JAE", "JE", "JNE", "JBE", "JA", "JS", "JNS", "JP", "JNP", "JL", "JGE",
    "JLE", "JG",
];

const SETCC_NAMES: [&str; 16] = [
    "SETO", "SETNO", "SETB", "SETAE", "SETE", "SETNE", "SETBE", "SETA", "SETS", "SETNS", "SETP",
    "SETNP", "SETL", "SETGE", "SETLE", "SETG",
];
