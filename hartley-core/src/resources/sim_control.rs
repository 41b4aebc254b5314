//! Peripheral through which guest software terminates the simulation.

use crate::bus::{AccessError, Bus};
use crate::resources::mmio::RegisterBank;
use std::cell::Cell;
use std::rc::Rc;

/// Byte offset of the `CONTROL` register within the SimControl window.
pub const CONTROL: u32 = 0x0;

/// Bit in `CONTROL` that requests a halt.
pub const CONTROL_HALT: u32 = 1 << 0;

/// Shared halt signal, owned jointly by [`SimControl`] and the hart.
///
/// Cloning yields another handle to the same flag. The peripheral raises it
/// from a register trigger; the hart polls it after every retired
/// instruction.
#[derive(Debug, Clone, Default)]
pub struct HaltLine(Rc<Cell<bool>>);

impl HaltLine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.0.set(true);
    }

    pub fn clear(&self) {
        self.0.set(false);
    }

    pub fn is_raised(&self) -> bool {
        self.0.get()
    }
}

/// Memory-mapped simulation controller.
///
/// Exposes a single `CONTROL` register at offset 0. A write whose bit 0 is
/// set raises the halt line before the bus write returns; the hart then
/// leaves its run loop at the next poll. All other bits are plain read-write
/// storage.
#[derive(Debug)]
pub struct SimControl {
    bank: RegisterBank,
}

impl SimControl {
    pub fn new(halt: HaltLine) -> Self {
        let mut bank = RegisterBank::new(4);
        bank.add_register(CONTROL, 0);
        bank.add_trigger(
            CONTROL,
            |new, _old| new & CONTROL_HALT != 0,
            move |_new, _old| halt.raise(),
        );
        Self { bank }
    }

    /// Returns the size of the peripheral's bus window in bytes.
    pub fn size(&self) -> u32 {
        self.bank.size()
    }
}

impl Bus for SimControl {
    fn read(&mut self, buf: &mut [u8], offset: u32) -> Result<(), AccessError> {
        self.bank.read(buf, offset)
    }

    fn write(&mut self, offset: u32, buf: &[u8]) -> Result<(), AccessError> {
        self.bank.write(offset, buf)
    }
}
