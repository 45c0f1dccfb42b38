//! Per-mnemonic execution
//!
//! [`dispatch`] is one `match` over [`Mnemonic`]. Handlers receive the CPU
//! and the decoded instruction with EIP already pointing past it, and report
//! guest exceptions or unsupported features through [`Fault`].

mod arith;
mod control;
mod logic;
mod string;
mod system;
mod transfer;

pub use string::REP_BATCH;

use crate::bus::Memory;
use crate::cpu::Cpu386;
use crate::error::Fault;
use crate::instruction::Instruction;
use crate::mnemonic::Mnemonic;

pub type ExecResult = Result<(), Fault>;

/// Interpret the low `size` bytes of `value` as a signed integer
fn to_signed(value: u32, size: u8) -> i64 {
    match size {
        1 => value as u8 as i8 as i64,
        2 => value as u16 as i16 as i64,
        _ => value as i32 as i64,
    }
}

pub fn dispatch<M: Memory>(cpu: &mut Cpu386<M>, insn: &Instruction) -> ExecResult {
    use Mnemonic::*;
    match insn.mnemonic {
        Add | Adc | Sub | Sbb | Cmp | And | Or | Xor | Test => arith::binary(cpu, insn),
        Inc | Dec => arith::inc_dec(cpu, insn),
        Neg => arith::neg(cpu, insn),
        Not => arith::not(cpu, insn),
        Mul => arith::mul(cpu, insn),
        Imul => arith::imul(cpu, insn),
        Div => arith::div(cpu, insn),
        Idiv => arith::idiv(cpu, insn),
        Daa | Das => arith::decimal_adjust(cpu, insn),
        Aaa | Aas => arith::ascii_adjust(cpu, insn),
        Aam => arith::aam(cpu, insn),
        Aad => arith::aad(cpu, insn),
        Xadd => arith::xadd(cpu, insn),
        Cmpxchg => arith::cmpxchg(cpu, insn),
        Cbw => arith::cbw(cpu, insn),
        Cwd => arith::cwd(cpu, insn),
        Salc => arith::salc(cpu),

        Shl | Shr | Sar => logic::shift(cpu, insn),
        Rol | Ror => logic::rotate(cpu, insn),
        Rcl | Rcr => logic::rotate_through_carry(cpu, insn),
        Shld | Shrd => logic::double_shift(cpu, insn),
        Bt | Bts | Btr | Btc => logic::bit_test(cpu, insn),
        Bsf | Bsr => logic::bit_scan(cpu, insn),
        Setcc(cond) => logic::setcc(cpu, insn, cond),

        Movs | Cmps | Scas | Lods | Stos | Ins | Outs => string::execute(cpu, insn),

        Mov => transfer::mov(cpu, insn),
        Movzx | Movsx => transfer::mov_extend(cpu, insn),
        Xchg => transfer::xchg(cpu, insn),
        Lea => transfer::lea(cpu, insn),
        Lds | Les | Lfs | Lgs | Lss => transfer::load_far_pointer(cpu, insn),
        Push => transfer::push(cpu, insn),
        Pop => transfer::pop(cpu, insn),
        Pusha => transfer::pusha(cpu, insn),
        Popa => transfer::popa(cpu, insn),
        Pushf => transfer::pushf(cpu, insn),
        Popf => transfer::popf(cpu, insn),
        Lahf => transfer::lahf(cpu),
        Sahf => transfer::sahf(cpu),
        Xlat => transfer::xlat(cpu, insn),
        In => transfer::port_in(cpu, insn),
        Out => transfer::port_out(cpu, insn),
        Bswap => transfer::bswap(cpu, insn),

        Jmp => control::jmp(cpu, insn),
        JmpFar => control::jmp_far(cpu, insn),
        Call => control::call(cpu, insn),
        CallFar => control::call_far(cpu, insn),
        Ret => control::ret(cpu, insn),
        RetFar => control::ret_far(cpu, insn),
        Jcc(cond) => control::jcc(cpu, insn, cond),
        Jcxz => control::jcxz(cpu, insn),
        Loop | Loope | Loopne => control::loop_(cpu, insn),
        Int => control::int(cpu, insn),
        Int1 => control::int1(cpu),
        Into => control::into(cpu),
        Iret => control::iret(cpu, insn),
        Enter => control::enter(cpu, insn),
        Leave => control::leave(cpu, insn),
        Bound => control::bound(cpu, insn),
        Hlt => control::hlt(cpu),

        Clc | Stc | Cmc | Cld | Std | Cli | Sti => system::flag_op(cpu, insn),
        Nop | Invd | Wbinvd | Invlpg => Ok(()),
        Wait => system::wait(cpu),
        Esc => system::esc(cpu),
        Lgdt | Lidt => system::load_table(cpu, insn),
        Sgdt | Sidt => system::store_table(cpu, insn),
        Lmsw => system::lmsw(cpu, insn),
        Smsw => system::smsw(cpu, insn),
        Clts => system::clts(cpu),
        Cpuid => system::cpuid(cpu),
    }
}
