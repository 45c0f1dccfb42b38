//! ALU, multiply/divide and BCD adjustments

use super::{cpu_486, cpu_with, run, set_vector, stack_word, ORIGIN};
use crate::bus::ArrayMemory;
use crate::cpu::Cpu386;
use crate::flags::Flag;
use crate::registers::RegId;

#[test]
fn test_add_byte_carry_and_zero() {
    // MOV AL,FFh; ADD AL,1
    let mut cpu = cpu_with(&[0xB0, 0xFF, 0x04, 0x01]);
    run(&mut cpu, 2);

    assert_eq!(cpu.regs.read(RegId::AL), 0x00);
    assert!(cpu.regs.flags.get(Flag::CF));
    assert!(cpu.regs.flags.get(Flag::ZF));
    assert!(cpu.regs.flags.get(Flag::AF));
    assert!(!cpu.regs.flags.get(Flag::OF));
    assert!(!cpu.regs.flags.get(Flag::SF));
}

#[test]
fn test_sub_word_signed_overflow() {
    // MOV AX,8000h; SUB AX,1
    let mut cpu = cpu_with(&[0xB8, 0x00, 0x80, 0x2D, 0x01, 0x00]);
    run(&mut cpu, 2);

    assert_eq!(cpu.regs.read(RegId::AX), 0x7FFF);
    assert!(cpu.regs.flags.get(Flag::OF));
    assert!(!cpu.regs.flags.get(Flag::CF));
    assert!(!cpu.regs.flags.get(Flag::SF));
}

#[test]
fn test_operand_size_prefix_selects_32_bit_alu() {
    // MOV EAX,FFFFFFFFh; ADD EAX,1
    let mut cpu = cpu_with(&[
        0x66, 0xB8, 0xFF, 0xFF, 0xFF, 0xFF, //
        0x66, 0x05, 0x01, 0x00, 0x00, 0x00,
    ]);
    run(&mut cpu, 2);

    assert_eq!(cpu.regs.read(RegId::EAX), 0);
    assert!(cpu.regs.flags.get(Flag::CF));
    assert!(cpu.regs.flags.get(Flag::ZF));
    assert_eq!(cpu.regs.eip(), ORIGIN + 12);
}

#[test]
fn test_group1_sign_extended_immediate() {
    // MOV BX,0010h; ADD BX,-1 (83 /0 ib)
    let mut cpu = cpu_with(&[0xBB, 0x10, 0x00, 0x83, 0xC3, 0xFF]);
    run(&mut cpu, 2);
    assert_eq!(cpu.regs.read(RegId::BX), 0x000F);
    assert!(cpu.regs.flags.get(Flag::CF));
}

#[test]
fn test_adc_and_sbb_use_carry() {
    // STC; MOV AX,5; ADC AX,1; STC; SBB AX,2
    let mut cpu = cpu_with(&[
        0xF9, 0xB8, 0x05, 0x00, 0x15, 0x01, 0x00, 0xF9, 0x1D, 0x02, 0x00,
    ]);
    run(&mut cpu, 3);
    assert_eq!(cpu.regs.read(RegId::AX), 7);
    assert!(!cpu.regs.flags.get(Flag::CF));

    run(&mut cpu, 2);
    assert_eq!(cpu.regs.read(RegId::AX), 4);
}

#[test]
fn test_cmp_and_test_leave_operands() {
    // MOV AX,5; CMP AX,7; TEST AX,4
    let mut cpu = cpu_with(&[0xB8, 0x05, 0x00, 0x3D, 0x07, 0x00, 0xA9, 0x04, 0x00]);
    run(&mut cpu, 2);
    assert_eq!(cpu.regs.read(RegId::AX), 5);
    assert!(cpu.regs.flags.get(Flag::CF));
    assert!(cpu.regs.flags.get(Flag::SF));

    run(&mut cpu, 1);
    assert_eq!(cpu.regs.read(RegId::AX), 5);
    assert!(!cpu.regs.flags.get(Flag::ZF));
    assert!(!cpu.regs.flags.get(Flag::CF));
}

#[test]
fn test_inc_keeps_carry() {
    // STC; MOV AL,FFh; INC AL
    let mut cpu = cpu_with(&[0xF9, 0xB0, 0xFF, 0xFE, 0xC0]);
    run(&mut cpu, 3);

    assert_eq!(cpu.regs.read(RegId::AL), 0);
    assert!(cpu.regs.flags.get(Flag::CF), "INC must not touch CF");
    assert!(cpu.regs.flags.get(Flag::ZF));
}

#[test]
fn test_neg_sets_carry_unless_zero() {
    // MOV AL,1; NEG AL; MOV BL,0; NEG BL
    let mut cpu = cpu_with(&[0xB0, 0x01, 0xF6, 0xD8, 0xB3, 0x00, 0xF6, 0xDB]);
    run(&mut cpu, 2);
    assert_eq!(cpu.regs.read(RegId::AL), 0xFF);
    assert!(cpu.regs.flags.get(Flag::CF));

    run(&mut cpu, 2);
    assert_eq!(cpu.regs.read(RegId::BL), 0);
    assert!(!cpu.regs.flags.get(Flag::CF));
}

#[test]
fn test_mul_word_spills_into_dx() {
    // MOV AX,1234h; MOV BX,0100h; MUL BX
    let mut cpu = cpu_with(&[0xB8, 0x34, 0x12, 0xBB, 0x00, 0x01, 0xF7, 0xE3]);
    run(&mut cpu, 3);

    assert_eq!(cpu.regs.read(RegId::AX), 0x3400);
    assert_eq!(cpu.regs.read(RegId::DX), 0x0012);
    assert!(cpu.regs.flags.get(Flag::CF));
    assert!(cpu.regs.flags.get(Flag::OF));
}

#[test]
fn test_mul_byte_fits_clears_carry() {
    // MOV AL,10h; MOV CL,3; MUL CL
    let mut cpu = cpu_with(&[0xB0, 0x10, 0xB1, 0x03, 0xF6, 0xE1]);
    run(&mut cpu, 3);
    assert_eq!(cpu.regs.read(RegId::AX), 0x0030);
    assert!(!cpu.regs.flags.get(Flag::CF));
}

#[test]
fn test_imul_three_operand_form() {
    // MOV BX,FFFEh; IMUL AX,BX,3
    let mut cpu = cpu_with(&[0xBB, 0xFE, 0xFF, 0x6B, 0xC3, 0x03]);
    run(&mut cpu, 2);

    assert_eq!(cpu.regs.read(RegId::AX), 0xFFFA);
    assert!(!cpu.regs.flags.get(Flag::CF));
    assert!(!cpu.regs.flags.get(Flag::OF));
}

#[test]
fn test_imul_one_operand_overflow() {
    // MOV AL,-128; MOV BL,2; IMUL BL  -> AX = -256
    let mut cpu = cpu_with(&[0xB0, 0x80, 0xB3, 0x02, 0xF6, 0xEB]);
    run(&mut cpu, 3);
    assert_eq!(cpu.regs.read(RegId::AX), 0xFF00);
    assert!(cpu.regs.flags.get(Flag::CF));
    assert!(cpu.regs.flags.get(Flag::OF));
}

#[test]
fn test_div_by_zero_raises_vector_0_without_writes() {
    // MOV AX,1234h; MOV DX,0055h; XOR BX,BX; DIV BX
    let mut cpu = cpu_with(&[
        0xB8, 0x34, 0x12, 0xBA, 0x55, 0x00, 0x31, 0xDB, 0xF7, 0xF3,
    ]);
    set_vector(&mut cpu, 0, 0x0500);
    run(&mut cpu, 4);

    assert_eq!(cpu.regs.eip(), 0x0500);
    assert_eq!(cpu.regs.read(RegId::AX), 0x1234);
    assert_eq!(cpu.regs.read(RegId::DX), 0x0055);
    // The saved IP points at the DIV itself
    assert_eq!(cpu.regs.read(RegId::SP), 0xFFF8);
    assert_eq!(stack_word(&cpu, 0xFFF8), ORIGIN + 8);
    assert_eq!(stack_word(&cpu, 0xFFFA), 0x0000);
}

/// Vector 0 was taken with CS:IP of the faulting divide on the stack
fn assert_divide_error_at(cpu: &Cpu386<ArrayMemory>, ip: u32) {
    assert_eq!(cpu.regs.eip(), 0x0500);
    assert_eq!(cpu.regs.read(RegId::SP), 0xFFF8);
    assert_eq!(stack_word(cpu, 0xFFF8), ip);
    assert_eq!(stack_word(cpu, 0xFFFA), 0x0000);
}

#[test]
fn test_byte_div_and_idiv_by_zero() {
    // MOV AX,1234h; XOR BL,BL; DIV BL / IDIV BL
    for modrm in [0xF3, 0xFB] {
        let mut cpu = cpu_with(&[0xB8, 0x34, 0x12, 0x30, 0xDB, 0xF6, modrm]);
        set_vector(&mut cpu, 0, 0x0500);
        run(&mut cpu, 3);

        assert_divide_error_at(&cpu, ORIGIN + 5);
        assert_eq!(cpu.regs.read(RegId::AX), 0x1234);
    }
}

#[test]
fn test_dword_div_and_idiv_by_zero() {
    // MOV EAX,12345678h; MOV EDX,00000055h; XOR EBX,EBX; DIV EBX / IDIV EBX
    for modrm in [0xF3, 0xFB] {
        let mut cpu = cpu_with(&[
            0x66, 0xB8, 0x78, 0x56, 0x34, 0x12, 0x66, 0xBA, 0x55, 0x00, 0x00, 0x00, 0x66,
            0x31, 0xDB, 0x66, 0xF7, modrm,
        ]);
        set_vector(&mut cpu, 0, 0x0500);
        run(&mut cpu, 4);

        assert_divide_error_at(&cpu, ORIGIN + 15);
        assert_eq!(cpu.regs.read(RegId::EAX), 0x1234_5678);
        assert_eq!(cpu.regs.read(RegId::EDX), 0x0000_0055);
    }
}

#[test]
fn test_div_quotient_overflow_raises_vector_0() {
    // MOV AX,1000h; MOV BL,2; DIV BL  (quotient 800h does not fit AL)
    let mut cpu = cpu_with(&[0xB8, 0x00, 0x10, 0xB3, 0x02, 0xF6, 0xF3]);
    set_vector(&mut cpu, 0, 0x0500);
    run(&mut cpu, 3);

    assert_eq!(cpu.regs.eip(), 0x0500);
    assert_eq!(cpu.regs.read(RegId::AX), 0x1000);
}

#[test]
fn test_div_and_idiv_results() {
    // MOV AX,0007h; MOV CL,2; DIV CL
    let mut cpu = cpu_with(&[0xB8, 0x07, 0x00, 0xB1, 0x02, 0xF6, 0xF1]);
    run(&mut cpu, 3);
    assert_eq!(cpu.regs.read(RegId::AL), 3);
    assert_eq!(cpu.regs.read(RegId::AH), 1);

    // MOV AX,-7; CWD; MOV BX,2; IDIV BX
    let mut cpu = cpu_with(&[0xB8, 0xF9, 0xFF, 0x99, 0xBB, 0x02, 0x00, 0xF7, 0xFB]);
    run(&mut cpu, 2);
    assert_eq!(cpu.regs.read(RegId::DX), 0xFFFF);
    run(&mut cpu, 2);
    assert_eq!(cpu.regs.read(RegId::AX), 0xFFFD);
    assert_eq!(cpu.regs.read(RegId::DX), 0xFFFF);
}

#[test]
fn test_daa_after_bcd_add() {
    // MOV AL,09h; ADD AL,08h; DAA
    let mut cpu = cpu_with(&[0xB0, 0x09, 0x04, 0x08, 0x27]);
    run(&mut cpu, 3);
    assert_eq!(cpu.regs.read(RegId::AL), 0x17);
    assert!(!cpu.regs.flags.get(Flag::CF));

    // MOV AL,99h; ADD AL,01h; DAA -> 00 with carry
    let mut cpu = cpu_with(&[0xB0, 0x99, 0x04, 0x01, 0x27]);
    run(&mut cpu, 3);
    assert_eq!(cpu.regs.read(RegId::AL), 0x00);
    assert!(cpu.regs.flags.get(Flag::CF));
    assert!(cpu.regs.flags.get(Flag::ZF));
}

#[test]
fn test_das_after_bcd_sub() {
    // MOV AL,32h; SUB AL,15h; DAS -> 17h
    let mut cpu = cpu_with(&[0xB0, 0x32, 0x2C, 0x15, 0x2F]);
    run(&mut cpu, 3);
    assert_eq!(cpu.regs.read(RegId::AL), 0x17);
    assert!(!cpu.regs.flags.get(Flag::CF));
}

#[test]
fn test_aaa_unpacked_carry() {
    // MOV AX,0009h; ADD AL,03h; AAA -> AX = 0102h
    let mut cpu = cpu_with(&[0xB8, 0x09, 0x00, 0x04, 0x03, 0x37]);
    run(&mut cpu, 3);
    assert_eq!(cpu.regs.read(RegId::AX), 0x0102);
    assert!(cpu.regs.flags.get(Flag::CF));
    assert!(cpu.regs.flags.get(Flag::AF));
}

#[test]
fn test_aam_and_aad() {
    // MOV AL,47; AAM; AAD
    let mut cpu = cpu_with(&[0xB0, 0x2F, 0xD4, 0x0A, 0xD5, 0x0A]);
    run(&mut cpu, 2);
    assert_eq!(cpu.regs.read(RegId::AH), 4);
    assert_eq!(cpu.regs.read(RegId::AL), 7);

    run(&mut cpu, 1);
    assert_eq!(cpu.regs.read(RegId::AX), 47);
}

#[test]
fn test_aam_zero_base_raises_divide_error() {
    let mut cpu = cpu_with(&[0xD4, 0x00]);
    set_vector(&mut cpu, 0, 0x0600);
    run(&mut cpu, 1);
    assert_eq!(cpu.regs.eip(), 0x0600);
}

#[test]
fn test_cbw_and_cwde() {
    // MOV AL,80h; CBW; CWDE
    let mut cpu = cpu_with(&[0xB0, 0x80, 0x98, 0x66, 0x98]);
    run(&mut cpu, 2);
    assert_eq!(cpu.regs.read(RegId::AX), 0xFF80);
    run(&mut cpu, 1);
    assert_eq!(cpu.regs.read(RegId::EAX), 0xFFFF_FF80);
}

#[test]
fn test_movzx_movsx() {
    // MOV BL,F0h; MOVZX AX,BL; MOVSX CX,BL
    let mut cpu = cpu_with(&[0xB3, 0xF0, 0x0F, 0xB6, 0xC3, 0x0F, 0xBE, 0xCB]);
    run(&mut cpu, 3);
    assert_eq!(cpu.regs.read(RegId::AX), 0x00F0);
    assert_eq!(cpu.regs.read(RegId::CX), 0xFFF0);
}

#[test]
fn test_cmpxchg_and_xadd_on_486() {
    // MOV AX,5; MOV BX,5; MOV CX,9; CMPXCHG BX,CX
    let mut cpu = cpu_486(&[
        0xB8, 0x05, 0x00, 0xBB, 0x05, 0x00, 0xB9, 0x09, 0x00, 0x0F, 0xB1, 0xCB,
    ]);
    run(&mut cpu, 4);
    assert_eq!(cpu.regs.read(RegId::BX), 9);
    assert!(cpu.regs.flags.get(Flag::ZF));

    // MOV AX,3; MOV BX,4; XADD AX,BX
    let mut cpu = cpu_486(&[0xB8, 0x03, 0x00, 0xBB, 0x04, 0x00, 0x0F, 0xC1, 0xD8]);
    run(&mut cpu, 3);
    assert_eq!(cpu.regs.read(RegId::AX), 7);
    assert_eq!(cpu.regs.read(RegId::BX), 3);
}

#[test]
fn test_cmpxchg_mismatch_loads_accumulator() {
    // MOV AX,1; MOV BX,5; MOV CX,9; CMPXCHG BX,CX
    let mut cpu = cpu_486(&[
        0xB8, 0x01, 0x00, 0xBB, 0x05, 0x00, 0xB9, 0x09, 0x00, 0x0F, 0xB1, 0xCB,
    ]);
    run(&mut cpu, 4);
    assert_eq!(cpu.regs.read(RegId::BX), 5);
    assert_eq!(cpu.regs.read(RegId::AX), 5);
    assert!(!cpu.regs.flags.get(Flag::ZF));
}
