//! Software interrupts, exception escalation and asynchronous events

use super::{cpu_486, cpu_with, run, set_vector, stack_word, ORIGIN};
use crate::bus::{ArrayMemory, DmaController, InterruptController};
use crate::cpu::Cpu386;
use crate::error::{CpuError, UnsupportedFeature};
use crate::flags::Flag;
use crate::registers::{RegId, Seg};
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

#[derive(Default)]
struct TestPic {
    pending: Option<u8>,
    acknowledged: u32,
}

impl InterruptController for TestPic {
    fn raise_irq(&mut self, irq: u8) {
        self.pending = Some(0x70 + irq);
    }

    fn lower_irq(&mut self, _irq: u8) {
        self.pending = None;
    }

    fn has_interrupt(&self) -> bool {
        self.pending.is_some()
    }

    fn acknowledge_interrupt(&mut self) -> u8 {
        self.acknowledged += 1;
        self.pending.take().unwrap_or(0x70)
    }
}

#[derive(Default)]
struct TestDma {
    hold: bool,
    grants: u32,
}

impl DmaController for TestDma {
    fn hold_request(&self) -> bool {
        self.hold
    }

    fn raise_hlda(&mut self) {
        self.grants += 1;
        self.hold = false;
    }
}

fn attach_test_pic(cpu: &mut Cpu386<ArrayMemory>) -> Rc<RefCell<TestPic>> {
    let pic = Rc::new(RefCell::new(TestPic::default()));
    cpu.attach_pic(Box::new(Rc::clone(&pic)));
    set_vector(cpu, 0x70, 0x0600);
    pic
}

#[test]
fn test_int_and_iret_round_trip() {
    // STI; INT 21h; handler: IRET
    let mut cpu = cpu_with(&[0xFB, 0xCD, 0x21]);
    cpu.memory.load_program(0x0600, &[0xCF]);
    set_vector(&mut cpu, 0x21, 0x0600);

    run(&mut cpu, 2);
    assert_eq!(cpu.regs.eip(), 0x0600);
    assert!(!cpu.regs.flags.get(Flag::IF));
    assert_eq!(cpu.regs.read(RegId::SP), 0xFFF8);
    assert_eq!(stack_word(&cpu, 0xFFF8), ORIGIN + 3);
    assert_eq!(stack_word(&cpu, 0xFFFA), 0x0000);
    assert_eq!(stack_word(&cpu, 0xFFFC), 0x0202);

    run(&mut cpu, 1);
    assert_eq!(cpu.regs.eip(), ORIGIN + 3);
    assert!(cpu.regs.flags.get(Flag::IF));
    assert_eq!(cpu.regs.read(RegId::SP), 0xFFFE);
}

#[test]
fn test_iret_restores_lazily_computed_flags_exactly() {
    // STI; MOV AL,80h; ADD AL,80h; INT 21h; handler: XOR AX,AX; IRET
    let mut cpu = cpu_with(&[0xFB, 0xB0, 0x80, 0x04, 0x80, 0xCD, 0x21]);
    cpu.memory.load_program(0x0600, &[0x31, 0xC0, 0xCF]);
    set_vector(&mut cpu, 0x21, 0x0600);

    run(&mut cpu, 3);
    let before = cpu.regs.flags.value();
    // IF, OF, ZF, PF, CF and the reserved bit
    assert_eq!(before, 0x0A47);

    run(&mut cpu, 1);
    assert_eq!(stack_word(&cpu, 0xFFFC), before);

    run(&mut cpu, 1);
    assert!(!cpu.regs.flags.get(Flag::CF));
    assert!(!cpu.regs.flags.get(Flag::OF));

    run(&mut cpu, 1);
    assert_eq!(cpu.regs.eip(), ORIGIN + 7);
    assert_eq!(cpu.regs.flags.value(), before);
}

#[test]
fn test_iretd_discards_cs_high_word_and_keeps_virtual_flags() {
    // VM, VIP and AC set in the popped image; VIF clear
    let popped_flags = 0x0016_0241;
    for (mut cpu, expected) in [
        (cpu_with(&[0x66, 0xCF]), 0x0008_0243),
        (cpu_486(&[0x66, 0xCF]), 0x000C_0243),
    ] {
        cpu.regs.flags.load(Flag::VIF.mask(), Flag::VIF.mask());
        cpu.write_segment(Seg::SS, 0xFFF2, 4, 0x0000_0250);
        cpu.write_segment(Seg::SS, 0xFFF6, 4, 0xDEAD_0040);
        cpu.write_segment(Seg::SS, 0xFFFA, 4, popped_flags);
        cpu.regs.write(RegId::SP, 0xFFF2);

        run(&mut cpu, 1);
        assert_eq!(cpu.regs.read(RegId::CS), 0x0040);
        assert_eq!(cpu.regs.eip(), 0x0250);
        assert_eq!(cpu.regs.read(RegId::SP), 0xFFFE);
        assert_eq!(cpu.regs.flags.value(), expected);
        assert!(!cpu.regs.flags.get(Flag::VM));
        assert!(!cpu.regs.flags.get(Flag::VIP));
        assert!(cpu.regs.flags.get(Flag::VIF));
    }
}

#[test]
fn test_int3_pushes_next_ip() {
    let mut cpu = cpu_with(&[0xCC]);
    set_vector(&mut cpu, 3, 0x0640);
    run(&mut cpu, 1);
    assert_eq!(cpu.regs.eip(), 0x0640);
    assert_eq!(stack_word(&cpu, 0xFFF8), ORIGIN + 1);
}

#[test]
fn test_into_only_on_overflow() {
    // MOV AL,7Fh; INTO; ADD AL,1; INTO
    let mut cpu = cpu_with(&[0xB0, 0x7F, 0xCE, 0x04, 0x01, 0xCE]);
    set_vector(&mut cpu, 4, 0x0680);

    run(&mut cpu, 2);
    assert_eq!(cpu.regs.eip(), ORIGIN + 3);

    run(&mut cpu, 2);
    assert_eq!(cpu.regs.eip(), 0x0680);
    assert_eq!(stack_word(&cpu, 0xFFF8), ORIGIN + 6);
}

#[test]
fn test_short_idt_escalates_to_triple_fault() {
    // LIDT [0200h]; INT 20h
    let mut cpu = cpu_with(&[0x0F, 0x01, 0x1E, 0x00, 0x02, 0xCD, 0x20]);
    cpu.memory.load_program(0x0200, &[0x1F, 0x00, 0x00, 0x00, 0x00, 0x00]);

    run(&mut cpu, 1);
    assert_eq!(cpu.regs.idtr.limit, 0x1F);

    let err = cpu.step().unwrap_err();
    assert_eq!(
        err,
        CpuError::TripleFault {
            cs: 0,
            eip: ORIGIN + 5
        }
    );
    assert_eq!(cpu.step().unwrap_err(), err);
    assert_eq!(cpu.fatal_error(), Some(&err));
}

#[test]
fn test_vector_past_idt_limit_raises_gp() {
    // LIDT [0200h] with limit 3Fh; INT 20h
    let mut cpu = cpu_with(&[0x0F, 0x01, 0x1E, 0x00, 0x02, 0xCD, 0x20]);
    cpu.memory.load_program(0x0200, &[0x3F, 0x00, 0x00, 0x00, 0x00, 0x00]);
    set_vector(&mut cpu, 13, 0x0700);

    run(&mut cpu, 2);
    assert_eq!(cpu.regs.eip(), 0x0700);
}

#[test]
fn test_sti_shadow_delays_irq_by_one_instruction() {
    // STI; NOP; NOP
    let mut cpu = cpu_with(&[0xFB, 0x90, 0x90]);
    let pic = attach_test_pic(&mut cpu);
    pic.borrow_mut().raise_irq(0);

    run(&mut cpu, 1);
    cpu.service_events().unwrap();
    assert_eq!(cpu.regs.eip(), ORIGIN + 1);
    assert_eq!(pic.borrow().acknowledged, 0);

    run(&mut cpu, 1);
    cpu.service_events().unwrap();
    assert_eq!(cpu.regs.eip(), 0x0600);
    assert_eq!(pic.borrow().acknowledged, 1);
    assert_eq!(stack_word(&cpu, 0xFFF8), ORIGIN + 2);
    assert!(!cpu.regs.flags.get(Flag::IF));
}

#[test]
fn test_irq_masked_while_if_clear() {
    let mut cpu = cpu_with(&[0x90]);
    let pic = attach_test_pic(&mut cpu);
    pic.borrow_mut().raise_irq(1);

    run(&mut cpu, 1);
    cpu.service_events().unwrap();
    assert_eq!(cpu.regs.eip(), ORIGIN + 1);
    assert!(pic.borrow().has_interrupt());
}

#[test]
fn test_mov_ss_shadow_blocks_irq() {
    // STI; NOP; MOV SS,AX; NOP
    let mut cpu = cpu_with(&[0xFB, 0x90, 0x8E, 0xD0, 0x90]);
    cpu.regs.write(RegId::AX, 0);
    let pic = attach_test_pic(&mut cpu);

    run(&mut cpu, 2);
    pic.borrow_mut().raise_irq(0);
    run(&mut cpu, 1);
    cpu.service_events().unwrap();
    assert_eq!(cpu.regs.eip(), ORIGIN + 4);

    run(&mut cpu, 1);
    cpu.service_events().unwrap();
    assert_eq!(cpu.regs.eip(), 0x0600);
}

#[test]
fn test_irq_wakes_halted_cpu() {
    // STI; HLT
    let mut cpu = cpu_with(&[0xFB, 0xF4]);
    let pic = attach_test_pic(&mut cpu);

    run(&mut cpu, 2);
    assert!(cpu.is_halted());
    // A halted CPU does not advance
    run(&mut cpu, 1);
    assert_eq!(cpu.regs.eip(), ORIGIN + 2);

    pic.borrow_mut().raise_irq(3);
    cpu.service_events().unwrap();
    assert!(!cpu.is_halted());
    assert_eq!(cpu.regs.eip(), 0x0600);
    assert_eq!(stack_word(&cpu, 0xFFF8), ORIGIN + 2);
}

#[test]
fn test_nmi_ignores_interrupt_flag() {
    let mut cpu = cpu_with(&[0x90]);
    set_vector(&mut cpu, 2, 0x0650);
    assert!(!cpu.regs.flags.get(Flag::IF));

    cpu.raise_nmi();
    cpu.service_events().unwrap();
    assert_eq!(cpu.regs.eip(), 0x0650);

    // Delivered once
    cpu.service_events().unwrap();
    assert_eq!(cpu.regs.read(RegId::SP), 0xFFF8);
}

#[test]
fn test_expired_timer_fires_from_service_events() {
    let mut cpu = cpu_with(&[0x90]);
    let fired = Rc::new(Cell::new(0u32));
    let counter = Rc::clone(&fired);
    let id = cpu
        .timers_mut()
        .register_timer(Box::new(move |_| counter.set(counter.get() + 1)), 1000, false);
    cpu.timers_mut().activate(id);

    std::thread::sleep(Duration::from_millis(5));
    cpu.service_events().unwrap();
    assert_eq!(fired.get(), 1);
    assert!(!cpu.timers_mut().is_active(id));

    std::thread::sleep(Duration::from_millis(2));
    cpu.service_events().unwrap();
    assert_eq!(fired.get(), 1);
}

#[test]
fn test_dma_hold_request_is_granted() {
    let mut cpu = cpu_with(&[0x90]);
    let dma = Rc::new(RefCell::new(TestDma {
        hold: true,
        grants: 0,
    }));
    cpu.attach_dma(Box::new(Rc::clone(&dma)));

    cpu.service_events().unwrap();
    assert_eq!(dma.borrow().grants, 1);
    cpu.service_events().unwrap();
    assert_eq!(dma.borrow().grants, 1);
}

#[test]
fn test_entering_protected_mode_is_fatal_and_sticky() {
    // MOV EAX,CR0; OR AL,1; MOV CR0,EAX
    let mut cpu = cpu_with(&[0x0F, 0x20, 0xC0, 0x0C, 0x01, 0x0F, 0x22, 0xC0]);
    run(&mut cpu, 2);

    let expected = CpuError::Unsupported {
        feature: UnsupportedFeature::ProtectedMode,
        cs: 0,
        eip: ORIGIN + 5,
    };
    assert_eq!(cpu.step().unwrap_err(), expected);
    assert_eq!(cpu.step().unwrap_err(), expected);
    assert_eq!(cpu.service_events().unwrap_err(), expected);
    assert!(!cpu.regs.protected_mode());
    assert!(cpu.get_state().fatal.is_some());

    cpu.reset();
    assert!(cpu.fatal_error().is_none());
    assert_eq!(cpu.regs.read(RegId::CS), 0xF000);
}

#[test]
fn test_fpu_escape_with_em_raises_nm() {
    // MOV EAX,CR0; OR AL,4; MOV CR0,EAX; FADD ST0,ST0
    let mut cpu = cpu_with(&[
        0x0F, 0x20, 0xC0, 0x0C, 0x04, 0x0F, 0x22, 0xC0, 0xD8, 0xC0,
    ]);
    set_vector(&mut cpu, 7, 0x0600);
    run(&mut cpu, 4);
    assert_eq!(cpu.regs.eip(), 0x0600);
    assert_eq!(stack_word(&cpu, 0xFFF8), ORIGIN + 8);
}

#[test]
fn test_fpu_escape_without_em_is_unsupported() {
    let mut cpu = cpu_with(&[0xD8, 0xC0]);
    match cpu.step() {
        Err(CpuError::Unsupported { feature, .. }) => {
            assert_eq!(feature, UnsupportedFeature::Fpu)
        }
        other => panic!("expected unsupported FPU, got {:?}", other),
    }
}
