//! Places program images into board memory: ELF32 executables segment by
//! segment, or raw binary blobs at the flash base.

use goblin::elf::header::EM_RISCV;
use goblin::elf::program_header::PT_LOAD;
use goblin::elf::Elf;
use hartley_core::board::Board;
use hartley_core::bus::AccessError;
use log::debug;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("malformed ELF image: {0}")]
    Elf(#[from] goblin::error::Error),
    #[error("image is not a 32-bit little-endian RISC-V executable")]
    UnsupportedExecutable,
    #[error("segment at {address:#010x} does not fit the memory map: {source}")]
    Placement {
        address: u32,
        #[source]
        source: AccessError,
    },
}

/// Returns `true` if `image` starts with the ELF magic.
pub fn is_elf(image: &[u8]) -> bool {
    image.starts_with(b"\x7fELF")
}

/// Copies all `PT_LOAD` segments of an ELF32 image to the physical addresses
/// given by their program headers, and returns the entry point to use as the
/// reset PC.
pub fn load_elf(board: &mut Board, image: &[u8]) -> Result<u32, LoadError> {
    let elf = Elf::parse(image)?;
    if elf.is_64 || !elf.little_endian || elf.header.e_machine != EM_RISCV {
        return Err(LoadError::UnsupportedExecutable);
    }

    let segments = elf
        .program_headers
        .iter()
        .filter(|header| header.p_type == PT_LOAD && header.p_filesz > 0);

    for header in segments {
        let address =
            u32::try_from(header.p_paddr).map_err(|_| LoadError::UnsupportedExecutable)?;
        debug!(
            "loading segment: file range [{:#010x}..{:#010x}] to physical range [{:#010x}..{:#010x}] (virt {:#010x})",
            header.p_offset,
            header.p_offset + header.p_filesz,
            header.p_paddr,
            header.p_paddr + header.p_memsz,
            header.p_vaddr,
        );
        let bytes = &image[header.file_range()];
        board
            .load_physical(address, bytes)
            .map_err(|source| LoadError::Placement { address, source })?;
    }

    u32::try_from(elf.entry).map_err(|_| LoadError::UnsupportedExecutable)
}

/// Copies a raw binary blob verbatim to the flash base and returns that base
/// as the reset PC.
pub fn load_raw(board: &mut Board, image: &[u8]) -> Result<u32, LoadError> {
    let base = board.config().flash_base;
    board
        .load_physical(base, image)
        .map_err(|source| LoadError::Placement {
            address: base,
            source,
        })?;
    Ok(base)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hartley_core::board::Config;

    #[test]
    fn test_is_elf() {
        assert!(is_elf(b"\x7fELF whatever follows"));
        assert!(!is_elf(b"\x00\x00\x00\x00"));
        assert!(!is_elf(b""));
    }

    #[test]
    fn test_load_raw_places_image_at_flash_base() {
        let mut board = Board::new(Config::default()).unwrap();
        let entry = load_raw(&mut board, &[0x93, 0x00, 0xF0, 0xFF]).unwrap();
        assert_eq!(board.config().flash_base, entry);
    }

    #[test]
    fn test_load_raw_rejects_oversized_image() {
        let mut board = Board::new(Config::default()).unwrap();
        let image = vec![0u8; board.config().flash_size as usize + 1];
        assert!(matches!(
            load_raw(&mut board, &image),
            Err(LoadError::Placement { .. }),
        ));
    }

    #[test]
    fn test_load_elf_rejects_garbage() {
        let mut board = Board::new(Config::default()).unwrap();
        assert!(matches!(
            load_elf(&mut board, b"\x7fELF but truncated"),
            Err(LoadError::Elf(_)),
        ));
    }
}
