//! Provides a small bare-metal SoC around the hart: flash-like instruction
//! memory, SRAM data memory, and the SimControl peripheral, all on one
//! system bus.

use crate::bus::AccessError;
use crate::core::{self, Core};
use crate::resources::ram::Ram;
use crate::resources::sim_control::{HaltLine, SimControl};
use crate::system_bus::{AttachError, SystemBus};
use log::debug;

/// Memory map and reset configuration of a [`Board`].
///
/// The exact addresses are configuration, not part of the simulator
/// contract. The defaults place 2 MiB of flash at the bottom of the address
/// space, 1 MiB of SRAM at `0x1000_0000`, and SimControl at `0x2000_0000`,
/// with the reset vector at the flash base.
#[derive(Debug, Clone)]
pub struct Config {
    pub flash_base: u32,
    pub flash_size: u32,
    pub sram_base: u32,
    pub sram_size: u32,
    pub sim_control_base: u32,
    /// Address of the first instruction executed out of reset. Loaders may
    /// override the PC afterwards (e.g. with an ELF entry point).
    pub reset_vector: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            flash_base: 0x0000_0000,
            flash_size: 0x0020_0000,
            sram_base: 0x1000_0000,
            sram_size: 0x0010_0000,
            sim_control_base: 0x2000_0000,
            reset_vector: 0x0000_0000,
        }
    }
}

/// A complete simulated system: one hart, one bus, two memories, and the
/// SimControl peripheral.
#[derive(Debug)]
pub struct Board {
    config: Config,
    core: Core,
}

impl Board {
    /// Builds the system described by `config`.
    ///
    /// Attach errors surface configuration mistakes (empty or overlapping
    /// regions) and are fatal at setup time.
    pub fn new(config: Config) -> Result<Self, AttachError> {
        let halt = HaltLine::new();

        let flash = Ram::new(config.flash_size as usize).ok_or_else(|| {
            AttachError::BadPortSize {
                name: "flash".to_owned(),
                base: config.flash_base,
                size: config.flash_size,
            }
        })?;
        let sram = Ram::new(config.sram_size as usize).ok_or_else(|| {
            AttachError::BadPortSize {
                name: "sram".to_owned(),
                base: config.sram_base,
                size: config.sram_size,
            }
        })?;
        let sim_control = SimControl::new(halt.clone());

        let sim_control_size = sim_control.size();
        let system_bus = SystemBus::new()
            .with_port("flash", config.flash_base, config.flash_size, Box::new(flash))?
            .with_port("sram", config.sram_base, config.sram_size, Box::new(sram))?
            .with_port(
                "sim-control",
                config.sim_control_base,
                sim_control_size,
                Box::new(sim_control),
            )?;

        let core = Core::new(
            system_bus,
            halt,
            core::Config {
                reset_vector: config.reset_vector,
            },
        );

        Ok(Self { config, core })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn core(&self) -> &Core {
        &self.core
    }

    pub fn core_mut(&mut self) -> &mut Core {
        &mut self.core
    }

    /// Copies `bytes` to the physical address `address`, bypassing the width
    /// and alignment rules of ordinary bus accesses.
    ///
    /// This is the loader backdoor: it does not emulate a guest writing
    /// memory word by word, it places the image directly.
    pub fn load_physical(&mut self, address: u32, bytes: &[u8]) -> Result<(), AccessError> {
        debug!("loading {} bytes at {address:#010x}", bytes.len());
        self.core.system_bus_mut().load(address, bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Status;
    use crate::registers::Specifier;

    fn words(program: &[u32]) -> Vec<u8> {
        program.iter().flat_map(|word| word.to_le_bytes()).collect()
    }

    #[test]
    fn test_default_config_is_consistent() {
        let config = Config::default();
        assert_eq!(config.flash_base, config.reset_vector);
        let board = Board::new(config).unwrap();
        assert_eq!(&Status::Running, board.core().status());
    }

    #[test]
    fn test_rejects_overlapping_map() {
        let config = Config {
            sram_base: 0x0010_0000, // inside the 2 MiB flash window
            ..Config::default()
        };
        assert!(matches!(
            Board::new(config),
            Err(AttachError::Overlap { .. }),
        ));
    }

    #[test]
    fn test_load_physical_out_of_map() {
        let mut board = Board::new(Config::default()).unwrap();
        assert!(board.load_physical(0x4000_0000, &[0]).is_err());
    }

    #[test]
    fn test_store_load_program() {
        let mut board = Board::new(Config::default()).unwrap();
        let program = words(&[
            0xAABBD2B7, // lui x5, 0xAABBD
            0x10000337, // lui x6, 0x10000
            0x00532623, // sw x5, 12(x6)
            0x00C32383, // lw x7, 12(x6)
            0x02A00513, // addi x10, x0, 42
            0x20000E37, // lui x28, 0x20000
            0x00100E93, // addi x29, x0, 1
            0x01DE2023, // sw x29, 0(x28)
        ]);
        board.load_physical(0, &program).unwrap();

        assert_eq!(&Status::Halted, board.core_mut().run());

        let core = board.core();
        assert_eq!(0xAABBD000, core.registers().x(Specifier::from_u5(7)));
        assert_eq!(42, core.registers().x(Specifier::from_u5(10)));
        assert_eq!(8, core.instret());
    }

    #[test]
    fn test_countdown_loop_program() {
        let mut board = Board::new(Config::default()).unwrap();
        let program = words(&[
            0x00300093, // addi x1, x0, 3
            0xFFF08093, // addi x1, x1, -1
            0xFE009EE3, // bne x1, x0, -4
            0x20000E37, // lui x28, 0x20000
            0x00100E93, // addi x29, x0, 1
            0x01DE2023, // sw x29, 0(x28)
        ]);
        board.load_physical(0, &program).unwrap();

        assert_eq!(&Status::Halted, board.core_mut().run());
        assert_eq!(0, board.core().registers().x(Specifier::from_u5(1)));
        assert_eq!(10, board.core().instret());
    }

    #[test]
    fn test_runaway_program_faults() {
        let mut board = Board::new(Config::default()).unwrap();
        // No program loaded: all-zero words are not valid instructions.
        let status = board.core_mut().run().clone();
        match status {
            Status::Faulted(fault) => {
                assert_eq!(0, fault.pc);
            }
            other => panic!("expected fault, got {other:?}"),
        }
    }
}
