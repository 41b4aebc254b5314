//! Register-bank machinery for memory-mapped peripherals.
//!
//! A concrete peripheral embeds a [`RegisterBank`] and forwards its
//! [`Bus`] implementation to it. The bank maps word-aligned offsets to
//! 32-bit registers, handles the byte-lane arithmetic for narrow accesses,
//! and runs declarative *triggers*: predicate/callback pairs that fire
//! synchronously after a register's storage has been updated.

use crate::bus::{AccessError, Bus};
use log::trace;
use std::collections::BTreeMap;
use std::fmt;

/// Decides whether a trigger fires, given the `(new, old)` register values.
pub type TriggerPredicate = Box<dyn Fn(u32, u32) -> bool>;
/// Runs synchronously on the writing control flow, after the storage update,
/// with the `(new, old)` register values.
pub type TriggerCallback = Box<dyn FnMut(u32, u32)>;
/// Maps the raw stored value to the value returned by bus reads.
pub type ReadHandler = Box<dyn Fn(u32) -> u32>;
/// Maps the `(incoming, old)` values of a write to the value actually stored.
pub type WriteHandler = Box<dyn Fn(u32, u32) -> u32>;

struct Trigger {
    predicate: TriggerPredicate,
    callback: TriggerCallback,
}

/// One 32-bit register of the bank.
#[derive(Default)]
struct Register {
    value: u32,
    read_handler: Option<ReadHandler>,
    write_handler: Option<WriteHandler>,
    triggers: Vec<Trigger>,
}

/// A bank of 32-bit registers exposed over a bus window of `size` bytes.
///
/// Registers live at word-aligned offsets and are allocated explicitly with
/// [`add_register`](Self::add_register); accessing an offset with no register
/// behind it faults. Narrow (1- or 2-byte) accesses address the byte lanes of
/// the containing register, so a byte write only replaces its own lane.
pub struct RegisterBank {
    size: u32,
    registers: BTreeMap<u32, Register>,
}

impl RegisterBank {
    /// Creates an empty bank covering `[0, size)`.
    ///
    /// Panics if `size` is zero or not word-aligned; bank layout is decided
    /// by the embedding peripheral at construction time, so violations are
    /// programming errors.
    pub fn new(size: u32) -> Self {
        assert!(size > 0 && size % 4 == 0, "bank size must be a multiple of 4");
        Self {
            size,
            registers: BTreeMap::new(),
        }
    }

    /// Returns the size of the bank's bus window in bytes.
    pub fn size(&self) -> u32 {
        self.size
    }

    /// Allocates the register at `offset` with the given reset value.
    ///
    /// Panics if `offset` is not word-aligned, lies outside the window, or is
    /// already allocated.
    pub fn add_register(&mut self, offset: u32, reset_value: u32) {
        assert!(offset % 4 == 0, "register offset must be word-aligned");
        assert!(offset < self.size, "register offset outside bank window");
        let old = self.registers.insert(
            offset,
            Register {
                value: reset_value,
                ..Register::default()
            },
        );
        assert!(old.is_none(), "register {offset:#x} allocated twice");
    }

    /// Returns the raw stored value of the register at `offset`, bypassing
    /// its read handler.
    pub fn value(&self, offset: u32) -> Option<u32> {
        self.registers.get(&offset).map(|register| register.value)
    }

    /// Overwrites the raw storage of the register at `offset` without running
    /// handlers or triggers.
    ///
    /// Panics if no register is allocated at `offset`.
    pub fn set_value(&mut self, offset: u32, value: u32) {
        self.register_mut(offset).value = value;
    }

    /// Installs the read handler of the register at `offset`.
    ///
    /// Panics if no register is allocated at `offset`.
    pub fn set_read_handler<F>(&mut self, offset: u32, handler: F)
    where
        F: Fn(u32) -> u32 + 'static,
    {
        self.register_mut(offset).read_handler = Some(Box::new(handler));
    }

    /// Installs the write handler of the register at `offset`.
    ///
    /// Panics if no register is allocated at `offset`.
    pub fn set_write_handler<F>(&mut self, offset: u32, handler: F)
    where
        F: Fn(u32, u32) -> u32 + 'static,
    {
        self.register_mut(offset).write_handler = Some(Box::new(handler));
    }

    /// Appends a trigger to the register at `offset`. Triggers fire in
    /// registration order, after every write whose resulting `(new, old)`
    /// pair satisfies `predicate`.
    ///
    /// Callbacks capture whatever shared state they signal (a halt line, a
    /// queue, ...) by explicit handle; they never receive a bus reference.
    ///
    /// Panics if no register is allocated at `offset`.
    pub fn add_trigger<P, C>(&mut self, offset: u32, predicate: P, callback: C)
    where
        P: Fn(u32, u32) -> bool + 'static,
        C: FnMut(u32, u32) + 'static,
    {
        self.register_mut(offset).triggers.push(Trigger {
            predicate: Box::new(predicate),
            callback: Box::new(callback),
        });
    }

    fn register_mut(&mut self, offset: u32) -> &mut Register {
        self.registers
            .get_mut(&offset)
            .unwrap_or_else(|| panic!("no register allocated at {offset:#x}"))
    }

    /// Splits an access into the word-aligned register offset, the bit shift
    /// of its byte lane, and the value mask for the access size.
    fn lane(offset: u32, size: usize) -> Result<(u32, u32, u32), AccessError> {
        let mask = match size {
            1 => 0xFF,
            2 => 0xFFFF,
            4 => 0xFFFF_FFFF,
            _ => {
                return Err(AccessError::MisalignedAccess {
                    address: offset,
                    size,
                })
            }
        };
        Ok((offset & !3, (offset & 3) * 8, mask))
    }
}

impl Bus for RegisterBank {
    fn read(&mut self, buf: &mut [u8], offset: u32) -> Result<(), AccessError> {
        let (word_offset, lane_shift, mask) = Self::lane(offset, buf.len())?;
        let register = self
            .registers
            .get(&word_offset)
            .ok_or(AccessError::UnmappedAddress { address: offset })?;
        let value = match &register.read_handler {
            Some(handler) => handler(register.value),
            None => register.value,
        };
        let lane_value = (value >> lane_shift) & mask;
        buf.copy_from_slice(&lane_value.to_le_bytes()[..buf.len()]);
        Ok(())
    }

    fn write(&mut self, offset: u32, buf: &[u8]) -> Result<(), AccessError> {
        let (word_offset, lane_shift, mask) = Self::lane(offset, buf.len())?;
        let register = self
            .registers
            .get_mut(&word_offset)
            .ok_or(AccessError::UnmappedAddress { address: offset })?;

        let mut raw = [0u8; 4];
        raw[..buf.len()].copy_from_slice(buf);
        let incoming = u32::from_le_bytes(raw);

        let old = register.value;
        let merged = (old & !(mask << lane_shift)) | ((incoming & mask) << lane_shift);
        let new = match &register.write_handler {
            Some(handler) => handler(merged, old),
            None => merged,
        };
        // The storage update happens first; triggers observe the
        // post-update value.
        register.value = new;
        for trigger in &mut register.triggers {
            if (trigger.predicate)(new, old) {
                trace!("trigger fired on register {word_offset:#x}: {old:#010x} -> {new:#010x}");
                (trigger.callback)(new, old);
            }
        }
        Ok(())
    }
}

impl fmt::Debug for RegisterBank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisterBank")
            .field("size", &self.size)
            .field(
                "registers",
                &self
                    .registers
                    .iter()
                    .map(|(offset, register)| (*offset, register.value))
                    .collect::<BTreeMap<_, _>>(),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn bank_with_value(value: u32) -> RegisterBank {
        let mut bank = RegisterBank::new(16);
        bank.add_register(0x0, value);
        bank
    }

    #[test]
    fn test_byte_lane_reads() {
        let mut bank = bank_with_value(0xAABB_CCDD);
        assert_eq!(0xDD, bank.read_u8(0x0).unwrap());
        assert_eq!(0xCC, bank.read_u8(0x1).unwrap());
        assert_eq!(0xBB, bank.read_u8(0x2).unwrap());
        assert_eq!(0xAA, bank.read_u8(0x3).unwrap());
        assert_eq!(0xCCDD, bank.read_u16(0x0).unwrap());
        assert_eq!(0xAABB, bank.read_u16(0x2).unwrap());
        assert_eq!(0xAABB_CCDD, bank.read_u32(0x0).unwrap());
    }

    #[test]
    fn test_byte_lane_writes_merge() {
        let mut bank = bank_with_value(0xAABB_CCDD);
        bank.write_u8(0x1, 0x55).unwrap();
        assert_eq!(0xAABB_55DD, bank.read_u32(0x0).unwrap());
        bank.write_u16(0x2, 0x1122).unwrap();
        assert_eq!(0x1122_55DD, bank.read_u32(0x0).unwrap());
    }

    #[test]
    fn test_unallocated_offset_faults() {
        let mut bank = RegisterBank::new(16);
        bank.add_register(0x4, 0);
        assert_eq!(
            Err(AccessError::UnmappedAddress { address: 0x0 }),
            bank.read_u32(0x0),
        );
        assert_eq!(
            Err(AccessError::UnmappedAddress { address: 0x8 }),
            bank.write_u8(0x8, 1),
        );
        assert!(bank.read_u32(0x4).is_ok());
    }

    #[test]
    fn test_trigger_fires_on_predicate() {
        let mut bank = bank_with_value(0);
        let fired = Rc::new(RefCell::new(Vec::new()));
        let recorded = Rc::clone(&fired);
        bank.add_trigger(
            0x0,
            |new, _old| new == 0xAABB,
            move |new, old| recorded.borrow_mut().push((new, old)),
        );

        bank.write_u32(0x0, 0x1111).unwrap();
        assert!(fired.borrow().is_empty());

        bank.write_u32(0x0, 0xAABB).unwrap();
        // The callback observes the post-update value and the previous one.
        assert_eq!(vec![(0xAABB, 0x1111)], *fired.borrow());

        // Predicates run on values, not edges; a repeated write fires again.
        bank.write_u32(0x0, 0xAABB).unwrap();
        assert_eq!(2, fired.borrow().len());
    }

    #[test]
    fn test_triggers_fire_in_registration_order() {
        let mut bank = bank_with_value(0);
        let order = Rc::new(RefCell::new(Vec::new()));
        for tag in [1, 2, 3] {
            let order = Rc::clone(&order);
            bank.add_trigger(0x0, |_, _| true, move |_, _| order.borrow_mut().push(tag));
        }
        bank.write_u32(0x0, 7).unwrap();
        assert_eq!(vec![1, 2, 3], *order.borrow());
    }

    #[test]
    fn test_narrow_write_triggers_see_merged_word() {
        let mut bank = bank_with_value(0xAABB_CCDD);
        let seen = Rc::new(RefCell::new(None));
        let recorded = Rc::clone(&seen);
        bank.add_trigger(
            0x0,
            |_, _| true,
            move |new, old| *recorded.borrow_mut() = Some((new, old)),
        );
        bank.write_u8(0x3, 0x11).unwrap();
        assert_eq!(Some((0x11BB_CCDD, 0xAABB_CCDD)), *seen.borrow());
    }

    #[test]
    fn test_read_handler() {
        let mut bank = bank_with_value(0x0000_00F0);
        bank.set_read_handler(0x0, |raw| raw | 0x8000_0000);
        assert_eq!(0x8000_00F0, bank.read_u32(0x0).unwrap());
        // The raw storage is unchanged.
        assert_eq!(Some(0x0000_00F0), bank.value(0x0));
    }

    #[test]
    fn test_write_handler() {
        // Write-one-to-clear semantics expressed as a write handler.
        let mut bank = bank_with_value(0b1111);
        bank.set_write_handler(0x0, |incoming, old| old & !incoming);
        bank.write_u32(0x0, 0b0101).unwrap();
        assert_eq!(0b1010, bank.read_u32(0x0).unwrap());
    }

    #[test]
    fn test_set_value_skips_triggers() {
        let mut bank = bank_with_value(0);
        let fired = Rc::new(RefCell::new(0u32));
        let counter = Rc::clone(&fired);
        bank.add_trigger(0x0, |_, _| true, move |_, _| *counter.borrow_mut() += 1);
        bank.set_value(0x0, 0xFFFF_FFFF);
        assert_eq!(0, *fired.borrow());
        assert_eq!(Some(0xFFFF_FFFF), bank.value(0x0));
    }
}
