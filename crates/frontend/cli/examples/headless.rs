use emu_x86::bus::ArrayMemory;
use emu_x86::cpu::{Cpu386, SliceExit};
use emu_x86::registers::RegId;

fn main() {
    // Sum 1..=10 into AX, then halt
    let program = [0xB9, 0x0A, 0x00, 0x01, 0xC8, 0xE2, 0xFC, 0xF4];

    let mut memory = ArrayMemory::new();
    memory.load_program(0x7C00, &program);
    let mut cpu = Cpu386::new(memory);
    cpu.jump_to(0x0000, 0x7C00);
    cpu.regs.write(RegId::SP, 0x7BFE);

    loop {
        match cpu.run() {
            Ok(SliceExit::Halted | SliceExit::BudgetExhausted) => break,
            Ok(SliceExit::Yield) => continue,
            Err(err) => {
                eprintln!("emulation stopped: {}", err);
                break;
            }
        }
    }

    println!("Headless x86: AX = {}", cpu.regs.read(RegId::AX));
    println!(
        "CPU state: {}",
        serde_json::to_string_pretty(&cpu.get_state()).unwrap()
    );
}
