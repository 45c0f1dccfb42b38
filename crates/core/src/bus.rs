//! Interfaces to the world outside the CPU
//!
//! The core talks to memory, I/O ports, the interrupt controller and the DMA
//! controller only through these traits. Devices are owned by the host;
//! the `Rc<RefCell<_>>` impls let a host keep a handle to a device it has
//! attached to the CPU.

use std::cell::RefCell;
use std::rc::Rc;

/// Byte-addressed physical memory
///
/// Implementors only provide byte access; multi-byte accesses are composed
/// little-endian by the provided methods.
pub trait Memory {
    fn read(&self, addr: u32) -> u8;

    fn write(&mut self, addr: u32, val: u8);

    /// Read `len` (1, 2 or 4) bytes little-endian
    fn read_linear(&self, addr: u32, len: u8) -> u32 {
        (0..len as u32).fold(0, |acc, i| {
            acc | (self.read(addr.wrapping_add(i)) as u32) << (8 * i)
        })
    }

    /// Write the low `len` (1, 2 or 4) bytes of `val` little-endian
    fn write_linear(&mut self, addr: u32, len: u8, val: u32) {
        for i in 0..len as u32 {
            self.write(addr.wrapping_add(i), (val >> (8 * i)) as u8);
        }
    }
}

/// Size of [`ArrayMemory`]: 1 MiB plus the high memory area above it
pub const ARRAY_MEMORY_SIZE: usize = 0x10_0000 + 0x1_0000;

/// Flat RAM for tests and the headless runner
pub struct ArrayMemory {
    data: Vec<u8>,
}

impl ArrayMemory {
    pub fn new() -> Self {
        Self::with_size(ARRAY_MEMORY_SIZE)
    }

    pub fn with_size(size: usize) -> Self {
        Self {
            data: vec![0; size],
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Copy `program` to physical address `addr`; bytes past the end are dropped
    pub fn load_program(&mut self, addr: u32, program: &[u8]) {
        let start = (addr as usize).min(self.data.len());
        let end = (start + program.len()).min(self.data.len());
        self.data[start..end].copy_from_slice(&program[..end - start]);
    }

    pub fn read_u16(&self, addr: u32) -> u16 {
        self.read_linear(addr, 2) as u16
    }

    pub fn write_u16(&mut self, addr: u32, val: u16) {
        self.write_linear(addr, 2, val as u32);
    }

    pub fn read_u32(&self, addr: u32) -> u32 {
        self.read_linear(addr, 4)
    }
}

impl Default for ArrayMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl Memory for ArrayMemory {
    /// Unbacked addresses float high
    fn read(&self, addr: u32) -> u8 {
        self.data.get(addr as usize).copied().unwrap_or(0xFF)
    }

    fn write(&mut self, addr: u32, val: u8) {
        if let Some(byte) = self.data.get_mut(addr as usize) {
            *byte = val;
        }
    }
}

/// I/O port space
pub trait PortIo {
    /// Read `len` (1, 2 or 4) bytes from `port`
    fn read(&mut self, port: u16, len: u8) -> u32;

    fn write(&mut self, port: u16, val: u32, len: u8);
}

/// Port space with nothing attached: reads float high, writes vanish
#[derive(Debug, Default, Clone, Copy)]
pub struct NullIo;

impl PortIo for NullIo {
    fn read(&mut self, _port: u16, len: u8) -> u32 {
        crate::registers::width_mask(len)
    }

    fn write(&mut self, _port: u16, _val: u32, _len: u8) {}
}

/// Programmable interrupt controller as seen by the CPU
pub trait InterruptController {
    fn raise_irq(&mut self, irq: u8);

    fn lower_irq(&mut self, irq: u8);

    /// An unmasked request is waiting for acknowledgement
    fn has_interrupt(&self) -> bool;

    /// INTA cycle: returns the vector to deliver
    fn acknowledge_interrupt(&mut self) -> u8;
}

/// DMA controller HRQ/HLDA handshake
pub trait DmaController {
    /// HRQ line: the controller wants the bus
    fn hold_request(&self) -> bool;

    /// Grant the bus; the controller runs its transfers before returning
    fn raise_hlda(&mut self);
}

impl<T: PortIo> PortIo for Rc<RefCell<T>> {
    fn read(&mut self, port: u16, len: u8) -> u32 {
        self.borrow_mut().read(port, len)
    }

    fn write(&mut self, port: u16, val: u32, len: u8) {
        self.borrow_mut().write(port, val, len)
    }
}

impl<T: InterruptController> InterruptController for Rc<RefCell<T>> {
    fn raise_irq(&mut self, irq: u8) {
        self.borrow_mut().raise_irq(irq)
    }

    fn lower_irq(&mut self, irq: u8) {
        self.borrow_mut().lower_irq(irq)
    }

    fn has_interrupt(&self) -> bool {
        self.borrow().has_interrupt()
    }

    fn acknowledge_interrupt(&mut self) -> u8 {
        self.borrow_mut().acknowledge_interrupt()
    }
}

impl<T: DmaController> DmaController for Rc<RefCell<T>> {
    fn hold_request(&self) -> bool {
        self.borrow().hold_request()
    }

    fn raise_hlda(&mut self) {
        self.borrow_mut().raise_hlda()
    }
}
