//! String instructions and REP prefixes

use super::{cpu_with, run, ORIGIN};
use crate::bus::{ArrayMemory, PortIo};
use crate::cpu::Cpu386;
use crate::execute::REP_BATCH;
use crate::flags::Flag;
use crate::registers::RegId;
use std::cell::RefCell;
use std::rc::Rc;

#[test]
fn test_rep_movsb_copies_and_counts_down() {
    // MOV SI,0200h; MOV DI,0300h; MOV CX,5; CLD; REP MOVSB
    let mut cpu = cpu_with(&[
        0xBE, 0x00, 0x02, 0xBF, 0x00, 0x03, 0xB9, 0x05, 0x00, 0xFC, 0xF3, 0xA4,
    ]);
    cpu.memory.load_program(0x0200, b"HELLO");
    run(&mut cpu, 5);

    for (i, byte) in b"HELLO".iter().enumerate() {
        assert_eq!(cpu.memory.read_u16(0x0300 + i as u32) as u8, *byte);
    }
    assert_eq!(cpu.regs.read(RegId::CX), 0);
    assert_eq!(cpu.regs.read(RegId::SI), 0x0205);
    assert_eq!(cpu.regs.read(RegId::DI), 0x0305);
    assert_eq!(cpu.regs.eip(), ORIGIN + 12);
}

#[test]
fn test_rep_with_zero_count_does_nothing() {
    // MOV SI,0200h; MOV DI,0300h; MOV CX,0; REP MOVSB
    let mut cpu = cpu_with(&[
        0xBE, 0x00, 0x02, 0xBF, 0x00, 0x03, 0xB9, 0x00, 0x00, 0xF3, 0xA4,
    ]);
    cpu.memory.load_program(0x0200, &[0x55]);
    run(&mut cpu, 4);

    assert_eq!(cpu.regs.read(RegId::SI), 0x0200);
    assert_eq!(cpu.regs.read(RegId::DI), 0x0300);
    assert_eq!(cpu.memory.read_u16(0x0300), 0);
    assert_eq!(cpu.regs.eip(), ORIGIN + 11);
}

#[test]
fn test_movsw_backward_with_direction_flag() {
    // STD; MOV SI,0202h; MOV DI,0302h; MOV CX,2; REP MOVSW
    let mut cpu = cpu_with(&[
        0xFD, 0xBE, 0x02, 0x02, 0xBF, 0x02, 0x03, 0xB9, 0x02, 0x00, 0xF3, 0xA5,
    ]);
    cpu.memory.load_program(0x0200, &[0x11, 0x22, 0x33, 0x44]);
    run(&mut cpu, 5);

    assert_eq!(cpu.memory.read_u16(0x0300), 0x2211);
    assert_eq!(cpu.memory.read_u16(0x0302), 0x4433);
    assert_eq!(cpu.regs.read(RegId::SI), 0x01FE);
    assert_eq!(cpu.regs.read(RegId::DI), 0x02FE);
}

#[test]
fn test_repe_cmpsb_stops_at_first_mismatch() {
    // MOV SI,0200h; MOV DI,0300h; MOV CX,4; REPE CMPSB
    let mut cpu = cpu_with(&[
        0xBE, 0x00, 0x02, 0xBF, 0x00, 0x03, 0xB9, 0x04, 0x00, 0xF3, 0xA6,
    ]);
    cpu.memory.load_program(0x0200, b"AXCD");
    cpu.memory.load_program(0x0300, b"ABCD");
    run(&mut cpu, 4);

    assert_eq!(cpu.regs.read(RegId::CX), 2);
    assert_eq!(cpu.regs.read(RegId::SI), 0x0202);
    assert!(!cpu.regs.flags.get(Flag::ZF));
    assert!(!cpu.regs.flags.get(Flag::CF));
}

#[test]
fn test_repne_scasb_finds_terminator() {
    // XOR AL,AL; MOV DI,0300h; MOV CX,FFFFh; REPNE SCASB
    let mut cpu = cpu_with(&[
        0x30, 0xC0, 0xBF, 0x00, 0x03, 0xB9, 0xFF, 0xFF, 0xF2, 0xAE,
    ]);
    cpu.memory.load_program(0x0300, b"abc\0");
    run(&mut cpu, 4);

    assert!(cpu.regs.flags.get(Flag::ZF));
    assert_eq!(cpu.regs.read(RegId::DI), 0x0304);
    assert_eq!(cpu.regs.read(RegId::CX), 0xFFFB);
}

#[test]
fn test_stosw_and_lodsb() {
    // MOV AX,BEEFh; MOV DI,0400h; MOV CX,3; REP STOSW; MOV SI,0401h; LODSB
    let mut cpu = cpu_with(&[
        0xB8, 0xEF, 0xBE, 0xBF, 0x00, 0x04, 0xB9, 0x03, 0x00, 0xF3, 0xAB, 0xBE, 0x01, 0x04,
        0xAC,
    ]);
    run(&mut cpu, 4);
    for offset in [0x400, 0x402, 0x404] {
        assert_eq!(cpu.memory.read_u16(offset), 0xBEEF);
    }
    assert_eq!(cpu.memory.read_u16(0x406), 0);
    assert_eq!(cpu.regs.read(RegId::DI), 0x0406);

    run(&mut cpu, 2);
    assert_eq!(cpu.regs.read(RegId::AL), 0xBE);
    assert_eq!(cpu.regs.read(RegId::SI), 0x0402);
}

#[test]
fn test_long_rep_resumes_across_steps() {
    let count = REP_BATCH + 10;
    // MOV CX,count; MOV DI,1000h; MOV AL,5Ah; REP STOSB
    let mut cpu = cpu_with(&[
        0xB9,
        count as u8,
        (count >> 8) as u8,
        0xBF,
        0x00,
        0x10,
        0xB0,
        0x5A,
        0xF3,
        0xAA,
    ]);
    run(&mut cpu, 4);

    // One batch done; EIP rewound onto the REP prefix
    assert_eq!(cpu.regs.read(RegId::CX), 10);
    assert_eq!(cpu.regs.eip(), ORIGIN + 8);

    run(&mut cpu, 1);
    assert_eq!(cpu.regs.read(RegId::CX), 0);
    assert_eq!(cpu.regs.eip(), ORIGIN + 10);
    assert_eq!(cpu.regs.read(RegId::DI), 0x1000 + count);
    assert_eq!(cpu.memory.read_u16(0x1000 + count - 2), 0x5A5A);
}

/// Run `REP MOVSB` at ORIGIN from DS:si to ES:di until it retires
fn rep_movsb_from(cpu: &mut Cpu386<ArrayMemory>, si: u32, di: u32, count: u32) -> u32 {
    cpu.jump_to(0, ORIGIN);
    cpu.regs.write(RegId::SI, si);
    cpu.regs.write(RegId::DI, di);
    cpu.regs.write(RegId::CX, count);
    let mut steps = 0;
    while cpu.regs.eip() == ORIGIN {
        cpu.step().unwrap();
        steps += 1;
    }
    steps
}

fn check_rep_movsb_repeatable(count: u32, backward: bool) {
    let mut cpu = cpu_with(&[0xF3, 0xA4]);
    cpu.regs.flags.set(Flag::DF, backward);
    let source: Vec<u8> = (0..count).map(|i| (i * 7 + 3) as u8).collect();
    cpu.memory.load_program(0x1000, &source);

    let (si, di) = if backward {
        (0x1000 + count - 1, 0x6000 + count - 1)
    } else {
        (0x1000, 0x6000)
    };
    let moved = |start: u32| {
        if backward {
            start - count
        } else {
            start + count
        }
    };

    for _ in 0..2 {
        let steps = rep_movsb_from(&mut cpu, si, di, count);
        assert_eq!(steps, count.div_ceil(REP_BATCH));
        assert_eq!(cpu.regs.eip(), ORIGIN + 2);
        assert_eq!(cpu.regs.read(RegId::CX), 0);
        assert_eq!(cpu.regs.read(RegId::SI), moved(si));
        assert_eq!(cpu.regs.read(RegId::DI), moved(di));
        let copied: Vec<u8> = (0..count)
            .map(|i| cpu.read_linear(0x6000 + i, 1) as u8)
            .collect();
        assert_eq!(copied, source);
        // Nothing past either end of the destination is touched
        assert_eq!(cpu.read_linear(0x5FFF, 1), 0);
        assert_eq!(cpu.read_linear(0x6000 + count, 1), 0);
    }
}

#[test]
fn test_rep_movsb_rerun_from_same_state_is_identical() {
    check_rep_movsb_repeatable(37, false);
    check_rep_movsb_repeatable(37, true);
}

#[test]
fn test_rep_movsb_rerun_spanning_several_steps() {
    check_rep_movsb_repeatable(REP_BATCH * 2 + 5, false);
    check_rep_movsb_repeatable(REP_BATCH * 2 + 5, true);
}

#[test]
fn test_segment_override_applies_to_source_only() {
    // MOV AX,0050h; MOV DS,AX; MOV SI,0200h; MOV DI,0300h; ES: MOVSB
    let mut cpu = cpu_with(&[
        0xB8, 0x50, 0x00, 0x8E, 0xD8, 0xBE, 0x00, 0x02, 0xBF, 0x00, 0x03, 0x26, 0xA4,
    ]);
    cpu.memory.load_program(0x0200, &[0xAA]);
    cpu.memory.load_program(0x0700, &[0xBB]);
    run(&mut cpu, 5);
    assert_eq!(cpu.memory.read_u16(0x0300) as u8, 0xAA);
}

#[derive(Default)]
struct RecordingIo {
    written: Vec<(u16, u32, u8)>,
    next_read: u32,
}

impl PortIo for RecordingIo {
    fn read(&mut self, _port: u16, _len: u8) -> u32 {
        self.next_read += 1;
        self.next_read
    }

    fn write(&mut self, port: u16, val: u32, len: u8) {
        self.written.push((port, val, len));
    }
}

#[test]
fn test_rep_outsb_and_insb_use_dx() {
    // MOV DX,03F8h; MOV SI,0200h; MOV CX,2; REP OUTSB; MOV DI,0300h; MOV CX,3; REP INSB
    let mut cpu = cpu_with(&[
        0xBA, 0xF8, 0x03, 0xBE, 0x00, 0x02, 0xB9, 0x02, 0x00, 0xF3, 0x6E, //
        0xBF, 0x00, 0x03, 0xB9, 0x03, 0x00, 0xF3, 0x6C,
    ]);
    cpu.memory.load_program(0x0200, b"ok");
    let io = Rc::new(RefCell::new(RecordingIo::default()));
    cpu.set_io(Box::new(Rc::clone(&io)));
    run(&mut cpu, 7);

    assert_eq!(
        io.borrow().written,
        vec![(0x03F8, b'o' as u32, 1), (0x03F8, b'k' as u32, 1)]
    );
    assert_eq!(cpu.memory.read_u16(0x0300), 0x0201);
    assert_eq!(cpu.memory.read_u16(0x0302) as u8, 0x03);
}
