//! The address-decoded interconnect between the hart and its devices.

use crate::address_range::AddressRange;
use crate::bus::{AccessError, Bus};
use crate::Alignment;
use log::debug;
use std::cmp::Ordering;
use thiserror::Error;

/// A contiguous address range owned by one target device on the bus.
#[derive(Debug)]
struct SlavePort {
    /// Identifier for the device, purely informative.
    name: String,
    range: AddressRange,
    target: Box<dyn Bus>,
}

/// Routes every memory access of the hart to the slave port whose address
/// range contains it.
///
/// Ports are kept sorted by start address and never overlap; both invariants
/// are enforced when a port is attached. An access is forwarded to a port's
/// target if and only if the entire range `address..address + size` is
/// contained within that port; the target then sees the port-relative offset.
///
/// Bus accesses are 1, 2, or 4 bytes wide and must be naturally aligned.
/// The [`load`](Self::load) backdoor used by program loaders is exempt from
/// both rules.
#[derive(Debug, Default)]
pub struct SystemBus {
    ports: Vec<SlavePort>,
}

impl SystemBus {
    pub fn new() -> Self {
        Self { ports: Vec::new() }
    }

    /// Chainable version of [`Self::attach`].
    pub fn with_port(
        mut self,
        name: &str,
        base: u32,
        size: u32,
        target: Box<dyn Bus>,
    ) -> Result<Self, AttachError> {
        self.attach(name, base, size, target)?;
        Ok(self)
    }

    /// Registers `target` as the owner of `[base, base + size)`.
    ///
    /// Fails if the range is empty, does not fit the 32-bit address space, or
    /// overlaps a previously attached port. Attach errors are configuration
    /// errors and are fatal at setup time.
    pub fn attach(
        &mut self,
        name: &str,
        base: u32,
        size: u32,
        target: Box<dyn Bus>,
    ) -> Result<(), AttachError> {
        let range = AddressRange::from_base_size(base, size).ok_or_else(|| {
            AttachError::BadPortSize {
                name: name.to_owned(),
                base,
                size,
            }
        })?;

        let index = match self
            .ports
            .binary_search_by_key(&range.start(), |port| port.range.start())
        {
            Ok(index) => {
                return Err(AttachError::Overlap {
                    name: name.to_owned(),
                    existing: self.ports[index].name.clone(),
                });
            }
            Err(index) => index,
        };
        for neighbour in self.ports[..index]
            .last()
            .into_iter()
            .chain(self.ports.get(index))
        {
            if neighbour.range.overlaps(range) {
                return Err(AttachError::Overlap {
                    name: name.to_owned(),
                    existing: neighbour.name.clone(),
                });
            }
        }

        debug!("attached slave port {name:?} at {range}");
        self.ports.insert(
            index,
            SlavePort {
                name: name.to_owned(),
                range,
                target,
            },
        );
        Ok(())
    }

    /// Privileged backdoor for program loaders: copies `bytes` verbatim into
    /// the port owning `[address, address + bytes.len())`, bypassing the
    /// width and alignment rules of ordinary bus accesses.
    pub fn load(&mut self, address: u32, bytes: &[u8]) -> Result<(), AccessError> {
        if bytes.is_empty() {
            return Ok(());
        }
        let (port, offset) = self.port_mut(address, bytes.len())?;
        port.target.write(offset, bytes)
    }

    /// Locates the unique port containing `[address, address + size)` and
    /// returns it along with the port-relative offset of `address`.
    fn port_mut(
        &mut self,
        address: u32,
        size: usize,
    ) -> Result<(&mut SlavePort, u32), AccessError> {
        let index = self
            .ports
            .binary_search_by(|port| {
                if port.range.end() < address {
                    Ordering::Less
                } else if port.range.start() > address {
                    Ordering::Greater
                } else {
                    Ordering::Equal
                }
            })
            .map_err(|_| AccessError::UnmappedAddress { address })?;
        let port = &mut self.ports[index];
        const_assert!(usize::BITS >= 32);
        if size != 0 && (size - 1) as u64 > (port.range.end() - address) as u64 {
            return Err(AccessError::RangeExceedsRegion { address, size });
        }
        let offset = address - port.range.start();
        Ok((port, offset))
    }

    fn check_alignment(address: u32, size: usize) -> Result<(), AccessError> {
        let alignment = match size {
            1 => Alignment::BYTE,
            2 => Alignment::HALFWORD,
            4 => Alignment::WORD,
            _ => return Err(AccessError::MisalignedAccess { address, size }),
        };
        if !alignment.is_aligned(address) {
            return Err(AccessError::MisalignedAccess { address, size });
        }
        Ok(())
    }
}

impl Bus for SystemBus {
    fn read(&mut self, buf: &mut [u8], address: u32) -> Result<(), AccessError> {
        Self::check_alignment(address, buf.len())?;
        let (port, offset) = self.port_mut(address, buf.len())?;
        port.target.read(buf, offset)
    }

    fn write(&mut self, address: u32, buf: &[u8]) -> Result<(), AccessError> {
        Self::check_alignment(address, buf.len())?;
        let (port, offset) = self.port_mut(address, buf.len())?;
        port.target.write(offset, buf)
    }
}

/// Configuration-time errors raised while attaching a slave port.
#[derive(Error, Debug, Clone, Eq, PartialEq)]
pub enum AttachError {
    /// The port is empty or does not fit the 32-bit address space.
    #[error("slave port {name:?} at base {base:#010x} has invalid size {size:#x}")]
    BadPortSize { name: String, base: u32, size: u32 },
    /// The port's address range overlaps a previously attached port.
    #[error("slave port {name:?} overlaps existing port {existing:?}")]
    Overlap { name: String, existing: String },
}
