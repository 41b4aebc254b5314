mod loader;
mod logging;

use clap::Parser;
use hartley_core::board::{Board, Config};
use hartley_core::core::Status;
use hartley_core::registers::Specifier;
use log::{error, info, warn};
use logging::LogLevel;
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Program image to execute (ELF32 or raw binary).
    image: PathBuf,
    /// Treat the image as a raw binary loaded at the flash base, even if it
    /// looks like an ELF.
    #[arg(long)]
    raw: bool,
    /// Stop after at most this many retired instructions.
    #[arg(long)]
    max_steps: Option<u64>,
    /// Print the register file when the hart stops.
    #[arg(long)]
    dump_registers: bool,
    /// Log verbosity.
    #[arg(long, value_enum, default_value = "warn")]
    log_level: LogLevel,
}

fn main() -> ExitCode {
    let args = Args::parse();
    let _logger_handle = logging::init(args.log_level);

    let image = match fs::read(&args.image) {
        Ok(image) => image,
        Err(err) => {
            error!("cannot read {}: {err}", args.image.display());
            return ExitCode::FAILURE;
        }
    };

    let mut board = match Board::new(Config::default()) {
        Ok(board) => board,
        Err(err) => {
            error!("cannot build board: {err}");
            return ExitCode::FAILURE;
        }
    };

    let load_result = if !args.raw && loader::is_elf(&image) {
        loader::load_elf(&mut board, &image)
    } else {
        loader::load_raw(&mut board, &image)
    };
    let entry = match load_result {
        Ok(entry) => entry,
        Err(err) => {
            error!("cannot load {}: {err}", args.image.display());
            return ExitCode::FAILURE;
        }
    };

    *board.core_mut().registers_mut().pc_mut() = entry;
    info!("starting execution at {entry:#010x}");

    let status = match args.max_steps {
        Some(max_steps) => board.core_mut().run_steps(max_steps),
        None => board.core_mut().run(),
    }
    .clone();

    if args.dump_registers {
        println!("{}", board.core().registers());
    }

    let core = board.core();
    match status {
        Status::Halted => {
            info!("clean halt after {} retired instructions", core.instret());
            // By convention the guest leaves its exit value in a0.
            let exit_value = core.registers().x(Specifier::from_u5(10));
            ExitCode::from((exit_value & 0xFF) as u8)
        }
        Status::Faulted(fault) => {
            error!("{fault}");
            ExitCode::FAILURE
        }
        Status::Running => {
            warn!(
                "step limit reached after {} retired instructions",
                core.instret()
            );
            ExitCode::FAILURE
        }
    }
}
