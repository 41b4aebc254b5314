//! Defines the byte-level bus interface shared by every addressable device.

use std::fmt::Debug;
use thiserror::Error;

/// Interface exposed by anything that can be the target of a memory access:
/// the system bus itself, memory regions, and memory-mapped peripherals.
///
/// Accesses are always in the form of `(address, size)` pairs, where `size`
/// is the length of the caller's buffer. Values are serialized in
/// little-endian byte order: multi-byte values in memory, in instruction
/// encodings, and in register views of loads and stores all use
/// least-significant-byte-first order.
///
/// Addresses are interpreted relative to the implementor: a slave device
/// attached to the [`SystemBus`](crate::system_bus::SystemBus) sees offsets
/// within its own window, while the system bus itself sees full physical
/// addresses.
///
/// Implementors decide which `(address, size)` pairs they accept and report
/// everything else as an [`AccessError`]; a failed access must leave the
/// device state unchanged.
pub trait Bus: Debug {
    /// Invoke a read access for `address` with size `buf.len()`, writing the
    /// result to `buf`.
    fn read(&mut self, buf: &mut [u8], address: u32) -> Result<(), AccessError>;

    /// Invoke a write access for `address` with size `buf.len()`, reading the
    /// data from `buf`.
    fn write(&mut self, address: u32, buf: &[u8]) -> Result<(), AccessError>;

    /// Reads a single byte at `address`.
    fn read_u8(&mut self, address: u32) -> Result<u8, AccessError> {
        let mut buf = [0u8; 1];
        self.read(&mut buf, address)?;
        Ok(buf[0])
    }

    /// Reads a little-endian halfword at `address`.
    fn read_u16(&mut self, address: u32) -> Result<u16, AccessError> {
        let mut buf = [0u8; 2];
        self.read(&mut buf, address)?;
        Ok(u16::from_le_bytes(buf))
    }

    /// Reads a little-endian word at `address`.
    fn read_u32(&mut self, address: u32) -> Result<u32, AccessError> {
        let mut buf = [0u8; 4];
        self.read(&mut buf, address)?;
        Ok(u32::from_le_bytes(buf))
    }

    /// Writes a single byte at `address`.
    fn write_u8(&mut self, address: u32, value: u8) -> Result<(), AccessError> {
        self.write(address, &value.to_le_bytes())
    }

    /// Writes a halfword at `address` in little-endian order.
    fn write_u16(&mut self, address: u32, value: u16) -> Result<(), AccessError> {
        self.write(address, &value.to_le_bytes())
    }

    /// Writes a word at `address` in little-endian order.
    fn write_u32(&mut self, address: u32, value: u32) -> Result<(), AccessError> {
        self.write(address, &value.to_le_bytes())
    }
}

/// Reasons a bus access can fault. Faults abort the access without touching
/// device state.
#[derive(Error, Debug, Clone, Eq, PartialEq)]
pub enum AccessError {
    /// Attempt to access an address that no device claims.
    #[error("no device is mapped at address {address:#010x}")]
    UnmappedAddress { address: u32 },
    /// Attempt to access a range that starts inside a device's region but
    /// extends beyond its end.
    #[error("{size}-byte access at {address:#010x} exceeds its region boundary")]
    RangeExceedsRegion { address: u32, size: usize },
    /// Attempt to access an address that is not naturally aligned to the
    /// access size, or to use an access size other than 1, 2, or 4.
    #[error("{size}-byte access at {address:#010x} is misaligned")]
    MisalignedAccess { address: u32, size: usize },
}
