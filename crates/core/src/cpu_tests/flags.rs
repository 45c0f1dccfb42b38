//! Flags as the guest observes them, shifts, rotates and bit instructions

use super::{cpu_486, cpu_with, run};
use crate::flags::{Flag, FlagOp, Flags};
use crate::registers::{width_mask, RegId};

/// Eager reference computation for ADD and SUB
fn reference(op: FlagOp, a: u32, b: u32, width: u8) -> (bool, bool, bool, bool) {
    let mask = width_mask(width);
    let sign = 1u64 << (width as u32 * 8 - 1);
    let (a, b) = (a as u64 & mask as u64, b as u64 & mask as u64);
    let (wide, result) = match op {
        FlagOp::Add => (a + b, (a + b) & mask as u64),
        _ => (a.wrapping_sub(b), a.wrapping_sub(b) & mask as u64),
    };
    let carry = match op {
        FlagOp::Add => wide > mask as u64,
        _ => a < b,
    };
    let overflow = match op {
        FlagOp::Add => (a ^ result) & (b ^ result) & sign != 0,
        _ => (a ^ b) & (a ^ result) & sign != 0,
    };
    (carry, result == 0, result & sign != 0, overflow)
}

#[test]
fn test_lazy_flags_agree_with_eager_reference() {
    let samples = [
        0u32,
        1,
        0x7F,
        0x80,
        0xFF,
        0x7FFF,
        0x8000,
        0xFFFF,
        0x7FFF_FFFF,
        0x8000_0000,
        0xFFFF_FFFF,
    ];
    for width in [1u8, 2, 4] {
        let mask = width_mask(width);
        for &a in &samples {
            for &b in &samples {
                for op in [FlagOp::Add, FlagOp::Sub] {
                    let result = match op {
                        FlagOp::Add => a.wrapping_add(b),
                        _ => a.wrapping_sub(b),
                    } & mask;
                    let mut flags = Flags::new();
                    flags.set_flags(op, a, b, result, width);
                    let (cf, zf, sf, of) = reference(op, a, b, width);
                    let ctx = format!("{:?} {:#x} {:#x} width {}", op, a, b, width);
                    assert_eq!(flags.get(Flag::CF), cf, "CF {}", ctx);
                    assert_eq!(flags.get(Flag::ZF), zf, "ZF {}", ctx);
                    assert_eq!(flags.get(Flag::SF), sf, "SF {}", ctx);
                    assert_eq!(flags.get(Flag::OF), of, "OF {}", ctx);
                }
            }
        }
    }
}

#[test]
fn test_pushf_materializes_pending_flags() {
    // MOV AL,7Fh; ADD AL,1; PUSHF; POP BX
    let mut cpu = cpu_with(&[0xB0, 0x7F, 0x04, 0x01, 0x9C, 0x5B]);
    run(&mut cpu, 4);
    // SF | OF | AF | reserved bit 1
    assert_eq!(cpu.regs.read(RegId::BX), 0x0892);
}

#[test]
fn test_popf_only_loads_writable_bits() {
    // MOV AX,FFFFh; PUSH AX; POPF; PUSHF; POP BX
    let mut cpu = cpu_with(&[0xB8, 0xFF, 0xFF, 0x50, 0x9D, 0x9C, 0x5B]);
    run(&mut cpu, 5);
    assert_eq!(cpu.regs.read(RegId::BX), 0x7FD7);
}

#[test]
fn test_popfd_ac_toggles_only_on_486() {
    // MOV EAX,00040000h; PUSH EAX; POPFD; PUSHFD; POP EBX
    let program = [
        0x66, 0xB8, 0x00, 0x00, 0x04, 0x00, 0x66, 0x50, 0x66, 0x9D, 0x66, 0x9C, 0x66, 0x5B,
    ];
    let mut cpu = cpu_with(&program);
    run(&mut cpu, 5);
    assert_eq!(cpu.regs.read(RegId::EBX) & Flag::AC.mask(), 0);

    let mut cpu = cpu_486(&program);
    run(&mut cpu, 5);
    assert_ne!(cpu.regs.read(RegId::EBX) & Flag::AC.mask(), 0);
}

#[test]
fn test_sahf_lahf() {
    // MOV AH,FFh; SAHF; MOV AH,0; LAHF
    let mut cpu = cpu_with(&[0xB4, 0xFF, 0x9E, 0xB4, 0x00, 0x9F]);
    run(&mut cpu, 2);
    assert!(cpu.regs.flags.get(Flag::CF));
    assert!(cpu.regs.flags.get(Flag::ZF));
    assert!(!cpu.regs.flags.get(Flag::OF));

    run(&mut cpu, 2);
    assert_eq!(cpu.regs.read(RegId::AH), 0xD7);
}

#[test]
fn test_flag_instructions() {
    // STC; CMC; STD; CLD; STI; CLI
    let mut cpu = cpu_with(&[0xF9, 0xF5, 0xFD, 0xFC, 0xFB, 0xFA]);
    run(&mut cpu, 1);
    assert!(cpu.regs.flags.get(Flag::CF));
    run(&mut cpu, 1);
    assert!(!cpu.regs.flags.get(Flag::CF));
    run(&mut cpu, 1);
    assert!(cpu.regs.flags.get(Flag::DF));
    run(&mut cpu, 1);
    assert!(!cpu.regs.flags.get(Flag::DF));
    run(&mut cpu, 1);
    assert!(cpu.regs.flags.get(Flag::IF));
    run(&mut cpu, 1);
    assert!(!cpu.regs.flags.get(Flag::IF));
}

#[test]
fn test_shift_by_one_flags() {
    // MOV AL,81h; SHL AL,1
    let mut cpu = cpu_with(&[0xB0, 0x81, 0xD0, 0xE0]);
    run(&mut cpu, 2);
    assert_eq!(cpu.regs.read(RegId::AL), 0x02);
    assert!(cpu.regs.flags.get(Flag::CF));
    assert!(cpu.regs.flags.get(Flag::OF));

    // MOV AL,81h; SHR AL,1
    let mut cpu = cpu_with(&[0xB0, 0x81, 0xD0, 0xE8]);
    run(&mut cpu, 2);
    assert_eq!(cpu.regs.read(RegId::AL), 0x40);
    assert!(cpu.regs.flags.get(Flag::CF));
    assert!(cpu.regs.flags.get(Flag::OF));
}

#[test]
fn test_sar_by_cl_keeps_sign() {
    // MOV AL,80h; MOV CL,3; SAR AL,CL
    let mut cpu = cpu_with(&[0xB0, 0x80, 0xB1, 0x03, 0xD2, 0xF8]);
    run(&mut cpu, 3);
    assert_eq!(cpu.regs.read(RegId::AL), 0xF0);
    assert!(!cpu.regs.flags.get(Flag::CF));
    assert!(cpu.regs.flags.get(Flag::SF));
}

#[test]
fn test_masked_zero_count_changes_nothing() {
    // STC; MOV AX,1234h; MOV CL,20h; SHL AX,CL
    let mut cpu = cpu_with(&[0xF9, 0xB8, 0x34, 0x12, 0xB1, 0x20, 0xD3, 0xE0]);
    run(&mut cpu, 4);
    assert_eq!(cpu.regs.read(RegId::AX), 0x1234);
    assert!(cpu.regs.flags.get(Flag::CF));
}

#[test]
fn test_rotates() {
    // MOV AL,81h; ROL AL,1
    let mut cpu = cpu_with(&[0xB0, 0x81, 0xD0, 0xC0]);
    run(&mut cpu, 2);
    assert_eq!(cpu.regs.read(RegId::AL), 0x03);
    assert!(cpu.regs.flags.get(Flag::CF));

    // MOV AX,0001h; ROR AX,4 (C1 /1 ib)
    let mut cpu = cpu_with(&[0xB8, 0x01, 0x00, 0xC1, 0xC8, 0x04]);
    run(&mut cpu, 2);
    assert_eq!(cpu.regs.read(RegId::AX), 0x1000);
    assert!(!cpu.regs.flags.get(Flag::CF));

    // CLC; MOV AL,01h; RCR AL,1; RCL AL,1
    let mut cpu = cpu_with(&[0xF8, 0xB0, 0x01, 0xD0, 0xD8, 0xD0, 0xD0]);
    run(&mut cpu, 3);
    assert_eq!(cpu.regs.read(RegId::AL), 0x00);
    assert!(cpu.regs.flags.get(Flag::CF));
    run(&mut cpu, 1);
    assert_eq!(cpu.regs.read(RegId::AL), 0x01);
    assert!(!cpu.regs.flags.get(Flag::CF));
}

#[test]
fn test_double_shifts() {
    // MOV AX,1234h; MOV DX,ABCDh; SHLD AX,DX,4; SHRD AX,DX,8
    let mut cpu = cpu_with(&[
        0xB8, 0x34, 0x12, 0xBA, 0xCD, 0xAB, 0x0F, 0xA4, 0xD0, 0x04, 0x0F, 0xAC, 0xD0, 0x08,
    ]);
    run(&mut cpu, 3);
    assert_eq!(cpu.regs.read(RegId::AX), 0x234A);
    assert!(cpu.regs.flags.get(Flag::CF));

    run(&mut cpu, 1);
    assert_eq!(cpu.regs.read(RegId::AX), 0xCD23);
    assert!(!cpu.regs.flags.get(Flag::CF));
}

#[test]
fn test_setcc_signed_compare() {
    // MOV AL,80h; CMP AL,1; SETL BL; SETGE CL; SETA DL
    let mut cpu = cpu_with(&[
        0xB0, 0x80, 0x3C, 0x01, 0x0F, 0x9C, 0xC3, 0x0F, 0x9D, 0xC1, 0x0F, 0x97, 0xC2,
    ]);
    run(&mut cpu, 5);
    assert_eq!(cpu.regs.read(RegId::BL), 1);
    assert_eq!(cpu.regs.read(RegId::CL), 0);
    assert_eq!(cpu.regs.read(RegId::DL), 1);
}

#[test]
fn test_bit_test_family_on_register() {
    // MOV AX,0010h; BT AX,4; BTS AX,0; BTR AX,4; BTC AX,0
    let mut cpu = cpu_with(&[
        0xB8, 0x10, 0x00, //
        0x0F, 0xBA, 0xE0, 0x04, //
        0x0F, 0xBA, 0xE8, 0x00, //
        0x0F, 0xBA, 0xF0, 0x04, //
        0x0F, 0xBA, 0xF8, 0x00,
    ]);
    run(&mut cpu, 2);
    assert!(cpu.regs.flags.get(Flag::CF));
    assert_eq!(cpu.regs.read(RegId::AX), 0x0010);

    run(&mut cpu, 1);
    assert_eq!(cpu.regs.read(RegId::AX), 0x0011);
    assert!(!cpu.regs.flags.get(Flag::CF));

    run(&mut cpu, 1);
    assert_eq!(cpu.regs.read(RegId::AX), 0x0001);
    assert!(cpu.regs.flags.get(Flag::CF));

    run(&mut cpu, 1);
    assert_eq!(cpu.regs.read(RegId::AX), 0x0000);
    assert!(cpu.regs.flags.get(Flag::CF));
}

#[test]
fn test_bts_register_offset_addresses_bit_string() {
    // MOV BX,0200h; MOV AX,17; BTS [BX],AX
    let mut cpu = cpu_with(&[0xBB, 0x00, 0x02, 0xB8, 0x11, 0x00, 0x0F, 0xAB, 0x07]);
    run(&mut cpu, 3);
    assert_eq!(cpu.memory.read_u16(0x0202), 0x0002);
    assert_eq!(cpu.memory.read_u16(0x0200), 0x0000);
    assert!(!cpu.regs.flags.get(Flag::CF));
}

#[test]
fn test_bit_scans() {
    // MOV BX,0140h; BSF AX,BX; BSR CX,BX
    let mut cpu = cpu_with(&[0xBB, 0x40, 0x01, 0x0F, 0xBC, 0xC3, 0x0F, 0xBD, 0xCB]);
    run(&mut cpu, 3);
    assert_eq!(cpu.regs.read(RegId::AX), 6);
    assert_eq!(cpu.regs.read(RegId::CX), 8);
    assert!(!cpu.regs.flags.get(Flag::ZF));

    // MOV AX,1234h; MOV DX,0; BSF AX,DX
    let mut cpu = cpu_with(&[0xB8, 0x34, 0x12, 0xBA, 0x00, 0x00, 0x0F, 0xBC, 0xC2]);
    run(&mut cpu, 3);
    assert!(cpu.regs.flags.get(Flag::ZF));
    assert_eq!(cpu.regs.read(RegId::AX), 0x1234);
}
